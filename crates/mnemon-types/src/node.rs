use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bitemporal::Bitemporal;
use crate::tool::{FileAction, ToolType};

/// Message bus topics
pub mod topics {
    /// Produced by the aggregator, consumed by the indexer and the hub
    pub const NODES_CREATED: &str = "memory.nodes.created";
    /// Consumer liveness events
    pub const CONSUMERS_STATUS: &str = "observatory.consumers.status";
}

/// Node labels written by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Session,
    Turn,
    Reasoning,
    ToolCall,
    Observation,
    Memory,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Session => "Session",
            NodeLabel::Turn => "Turn",
            NodeLabel::Reasoning => "Reasoning",
            NodeLabel::ToolCall => "ToolCall",
            NodeLabel::Observation => "Observation",
            NodeLabel::Memory => "Memory",
        }
    }
}

/// Labeled directed edge kinds of the lineage graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Session -> Turn
    HasTurn,
    /// Turn -> Turn, sequential chain
    Next,
    /// Turn -> Reasoning
    Contains,
    /// Turn -> ToolCall
    Invokes,
    /// Reasoning -> ToolCall, causal
    Triggers,
    /// ToolCall -> Observation
    Yields,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::HasTurn => "HAS_TURN",
            EdgeKind::Next => "NEXT",
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Invokes => "INVOKES",
            EdgeKind::Triggers => "TRIGGERS",
            EdgeKind::Yields => "YIELDS",
        }
    }
}

/// Tool call execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Success,
    Error,
    Cancelled,
}

/// Memory unit classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Decision,
    Context,
    Code,
    #[serde(other)]
    Other,
}

/// Generic node record: the unit the graph store reads and writes.
///
/// Nodes never cross an I/O boundary as references; the stable string
/// id is the only handle components hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub bitemporal: Bitemporal,
}

impl NodeRecord {
    pub fn new(
        id: impl Into<String>,
        label: NodeLabel,
        properties: Value,
        session_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            labels: vec![label.as_str().to_string()],
            properties,
            session_id,
            bitemporal: Bitemporal::open(now),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// String property accessor (missing or non-string -> None)
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn prop_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(|v| v.as_u64())
    }
}

/// Physical row handle used by the pruner (one logical node spans
/// multiple rows across amendments).
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub row_id: i64,
    pub node: NodeRecord,
}

/// Edge record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub kind: EdgeKind,
    pub from: String,
    pub to: String,
    pub created_at: DateTime<Utc>,
}

impl EdgeRecord {
    pub fn new(kind: EdgeKind, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind,
            from: from.into(),
            to: to.into(),
            created_at: Utc::now(),
        }
    }
}

// --- Typed node properties ---
//
// The aggregator works with these structs and serializes them into
// NodeRecord.properties; readers that only need a field or two go
// through the untyped accessors instead.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProps {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnProps {
    pub sequence_index: u64,
    pub user_content: String,
    pub assistant_preview: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningProps {
    pub sequence_index: u64,
    pub preview: String,
    pub content_hash: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallProps {
    pub call_id: String,
    pub tool_name: String,
    pub tool_type: ToolType,
    pub arguments_json: String,
    pub sequence_index: u64,
    /// Block position of the thinking that most recently preceded
    /// this call, when one did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_sequence: Option<u64>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_action: Option<FileAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationProps {
    pub tool_call_id: String,
    pub content_preview: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryProps {
    pub content: String,
    pub content_hash: u64,
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

// --- Bus payloads ---

/// `memory.nodes.created` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreated {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NodeCreated {
    pub fn from_node(node: &NodeRecord) -> Self {
        Self {
            id: node.id.clone(),
            labels: node.labels.clone(),
            properties: node.properties.clone(),
            session_id: node.session_id.clone(),
            created_at: node.bitemporal.tt_start,
        }
    }
}

/// `observatory.consumers.status` event discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerStatus {
    ConsumerReady,
    ConsumerHeartbeat,
    ConsumerDisconnected,
}

/// `observatory.consumers.status` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerStatusEvent {
    pub event: ConsumerStatus,
    pub group: String,
    pub service: String,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(EdgeKind::HasTurn).unwrap(),
            serde_json::json!("HAS_TURN")
        );
        assert_eq!(
            serde_json::to_value(EdgeKind::Triggers).unwrap(),
            serde_json::json!("TRIGGERS")
        );
    }

    #[test]
    fn test_memory_kind_unknown_maps_to_other() {
        let kind: MemoryKind = serde_json::from_str("\"observation\"").unwrap();
        assert_eq!(kind, MemoryKind::Other);
    }

    #[test]
    fn test_turn_props_roundtrip_through_record() {
        let props = TurnProps {
            sequence_index: 3,
            user_content: "fix the tests".to_string(),
            assistant_preview: "Looking at the failures".to_string(),
            input_tokens: 120,
            output_tokens: 80,
            stop_reason: Some("end_turn".to_string()),
            complete: true,
        };
        let node = NodeRecord::new(
            "turn-3",
            NodeLabel::Turn,
            serde_json::to_value(&props).unwrap(),
            Some("s-1".to_string()),
            Utc::now(),
        );
        assert_eq!(node.prop_u64("sequence_index"), Some(3));
        let back: TurnProps = serde_json::from_value(node.properties.clone()).unwrap();
        assert_eq!(back.sequence_index, 3);
        assert!(back.complete);
    }
}
