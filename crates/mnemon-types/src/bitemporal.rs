use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel meaning "still valid" / "current knowledge".
///
/// Kept below chrono's own maximum so the value survives RFC 3339
/// round-trips and SQLite text ordering.
pub fn max_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap()
}

/// Valid-time / transaction-time interval pair carried by every node row.
///
/// Updates never mutate a row in place: the superseded row gets
/// `tt_end = now` and a fresh row is written with `tt_start = now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitemporal {
    pub vt_start: DateTime<Utc>,
    pub vt_end: DateTime<Utc>,
    pub tt_start: DateTime<Utc>,
    pub tt_end: DateTime<Utc>,
}

impl Bitemporal {
    /// Open interval starting now on both axes.
    pub fn open(now: DateTime<Utc>) -> Self {
        Self {
            vt_start: now,
            vt_end: max_sentinel(),
            tt_start: now,
            tt_end: max_sentinel(),
        }
    }

    /// Is this row the current knowledge (transaction interval open)?
    pub fn is_current(&self) -> bool {
        self.tt_end == max_sentinel()
    }

    /// Does this row cover the given point on both axes?
    pub fn contains(&self, vt: DateTime<Utc>, tt: DateTime<Utc>) -> bool {
        self.vt_start <= vt && vt < self.vt_end && self.tt_start <= tt && tt < self.tt_end
    }

    /// Successor row for a close-and-rewrite amendment: valid-time is
    /// carried over, the transaction interval restarts at `now`.
    pub fn amended(&self, now: DateTime<Utc>) -> Self {
        Self {
            vt_start: self.vt_start,
            vt_end: self.vt_end,
            tt_start: now,
            tt_end: max_sentinel(),
        }
    }
}

/// Point-in-time selector for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalRef {
    /// Valid-time instant; None = any
    pub vt: Option<DateTime<Utc>>,
    /// Transaction-time instant; None = current knowledge
    pub tt: Option<DateTime<Utc>>,
}

impl TemporalRef {
    pub fn current() -> Self {
        Self { vt: None, tt: None }
    }

    pub fn at_tt(tt: DateTime<Utc>) -> Self {
        Self { vt: None, tt: Some(tt) }
    }

    pub fn at(vt: DateTime<Utc>, tt: DateTime<Utc>) -> Self {
        Self {
            vt: Some(vt),
            tt: Some(tt),
        }
    }
}
