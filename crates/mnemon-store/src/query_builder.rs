use chrono::{DateTime, Utc};
use mnemon_types::max_sentinel;
use serde_json::{Map, Value};

/// Transaction-time reference for a constraint.
#[derive(Debug, Clone, Copy)]
pub enum TtRef {
    /// Historical instant
    At(DateTime<Utc>),
    /// Current knowledge: `tt_end = MAX_SENTINEL`
    Current,
}

/// Compose graph queries with per-alias bitemporal constraints.
///
/// Every `at` call draws fresh parameter names (`vt_0`, `tt_0`,
/// `vt_1`, ...), so constraining several aliases across several calls
/// never collides parameters.
#[derive(Debug)]
pub struct QueryBuilder {
    base: String,
    clauses: Vec<String>,
    params: Map<String, Value>,
    counter: usize,
}

impl QueryBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            clauses: Vec::new(),
            params: Map::new(),
            counter: 0,
        }
    }

    /// Constrain aliases to a point in time on either or both axes.
    pub fn at(mut self, aliases: &[&str], vt: Option<DateTime<Utc>>, tt: Option<TtRef>) -> Self {
        let n = self.counter;
        self.counter += 1;

        if let Some(vt) = vt {
            let param = format!("vt_{}", n);
            for alias in aliases {
                self.clauses.push(format!(
                    "{a}.vt_start <= ${p} AND {a}.vt_end > ${p}",
                    a = alias,
                    p = param
                ));
            }
            self.params
                .insert(param, Value::String(vt.to_rfc3339()));
        }

        match tt {
            Some(TtRef::At(tt)) => {
                let param = format!("tt_{}", n);
                for alias in aliases {
                    self.clauses.push(format!(
                        "{a}.tt_start <= ${p} AND {a}.tt_end > ${p}",
                        a = alias,
                        p = param
                    ));
                }
                self.params
                    .insert(param, Value::String(tt.to_rfc3339()));
            }
            Some(TtRef::Current) => {
                let param = format!("tt_{}", n);
                for alias in aliases {
                    self.clauses
                        .push(format!("{a}.tt_end = ${p}", a = alias, p = param));
                }
                self.params
                    .insert(param, Value::String(max_sentinel().to_rfc3339()));
            }
            None => {}
        }

        self
    }

    /// Append a raw constraint (caller-provided parameters go through
    /// `param`).
    pub fn and(mut self, clause: impl Into<String>) -> Self {
        self.clauses.push(clause.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Final query text and parameter map.
    pub fn build(self) -> (String, Value) {
        let query = if self.clauses.is_empty() {
            self.base
        } else {
            format!("{} WHERE {}", self.base, self.clauses.join(" AND "))
        };
        (query, Value::Object(self.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_single_at_call() {
        let (query, params) = QueryBuilder::new("MATCH (t:Turn)")
            .at(&["t"], Some(t0()), Some(TtRef::At(t0())))
            .build();

        assert!(query.starts_with("MATCH (t:Turn) WHERE "));
        assert!(query.contains("t.vt_start <= $vt_0 AND t.vt_end > $vt_0"));
        assert!(query.contains("t.tt_start <= $tt_0 AND t.tt_end > $tt_0"));
        assert!(params.get("vt_0").is_some());
        assert!(params.get("tt_0").is_some());
    }

    #[test]
    fn test_composed_calls_never_collide_params() {
        let (query, params) = QueryBuilder::new("MATCH (s:Session)-[:HAS_TURN]->(t:Turn)")
            .at(&["s"], Some(t0()), Some(TtRef::Current))
            .at(&["t"], Some(t0()), Some(TtRef::At(t0())))
            .build();

        assert!(query.contains("$vt_0"));
        assert!(query.contains("$vt_1"));
        assert!(query.contains("$tt_1"));
        let obj = params.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert!(obj.contains_key("vt_0"));
        assert!(obj.contains_key("tt_0"));
        assert!(obj.contains_key("vt_1"));
        assert!(obj.contains_key("tt_1"));
    }

    #[test]
    fn test_current_tt_pins_sentinel() {
        let (query, params) = QueryBuilder::new("MATCH (m:Memory)")
            .at(&["m"], None, Some(TtRef::Current))
            .build();

        assert!(query.contains("m.tt_end = $tt_0"));
        assert_eq!(
            params["tt_0"],
            Value::String(max_sentinel().to_rfc3339())
        );
    }

    #[test]
    fn test_multiple_aliases_share_one_call_param() {
        let (query, params) = QueryBuilder::new("MATCH (a)-[:NEXT]->(b)")
            .at(&["a", "b"], Some(t0()), None)
            .build();

        // Both aliases constrained by the same fresh parameter
        assert_eq!(query.matches("$vt_0").count(), 4);
        assert_eq!(params.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_no_constraints_leaves_base_untouched() {
        let (query, params) = QueryBuilder::new("MATCH (n) RETURN n").build();
        assert_eq!(query, "MATCH (n) RETURN n");
        assert_eq!(params, Value::Object(Map::new()));
    }
}
