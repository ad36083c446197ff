use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mnemon_types::UsageDelta;

use crate::ids::NodeIds;

/// Per-session aggregation state.
///
/// Lives behind a per-session lock; the runtime partitions envelopes
/// by session so mutation is always single-writer and in arrival
/// order.
pub(crate) struct SessionState {
    pub ids: NodeIds,
    pub session_node_id: String,
    /// Session node written to the graph yet?
    pub session_created: bool,
    pub next_turn_index: u64,
    pub open_turn: Option<TurnState>,
    pub last_turn_node: Option<String>,
    /// User text waiting for the first assistant content of its cycle
    pub pending_user: Option<String>,
    /// Provider call handle -> ToolCall node id (session-scoped:
    /// results may straddle turn boundaries)
    pub call_ids: HashMap<String, String>,
    pub last_event_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(session_id: &str, now: DateTime<Utc>) -> Self {
        let ids = NodeIds::new(session_id);
        let session_node_id = ids.session();
        Self {
            ids,
            session_node_id,
            session_created: false,
            next_turn_index: 0,
            open_turn: None,
            last_turn_node: None,
            pending_user: None,
            call_ids: HashMap::new(),
            last_event_at: now,
        }
    }
}

/// Content-block state machine for one open turn.
pub(crate) struct TurnState {
    pub node_id: String,
    pub sequence_index: u64,
    pub assistant_preview: String,
    /// Running content-block position within the turn
    pub block_seq: u64,
    /// Reasoning node ids created since the last tool_use was linked
    pub pending_reasonings: Vec<String>,
    /// Block position of the most recent thinking block
    pub last_reasoning_sequence: Option<u64>,
    pub tool_call_count: u64,
    /// ToolCall node ids still pending in this turn
    pub pending_calls: Vec<String>,
    pub usage: UsageDelta,
    pub stop_reason: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl TurnState {
    pub fn new(node_id: String, sequence_index: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            node_id,
            sequence_index,
            assistant_preview: String::new(),
            block_seq: 0,
            pending_reasonings: Vec::new(),
            last_reasoning_sequence: None,
            tool_call_count: 0,
            pending_calls: Vec::new(),
            usage: UsageDelta::default(),
            stop_reason: None,
            started_at,
        }
    }

    /// Claim the next content-block position.
    pub fn next_block(&mut self) -> u64 {
        let seq = self.block_seq;
        self.block_seq += 1;
        seq
    }
}
