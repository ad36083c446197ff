use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of the actor that produced a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Kind of observable change carried by a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Content,
    ToolCall,
    ToolResult,
    Usage,
    Stop,
}

/// Content block flavor for `DeltaKind::Content`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Thinking,
    Text,
}

/// Tool invocation extracted from a provider stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Provider's tool-use handle (e.g. "toolu_abc")
    pub id: String,
    pub name: String,
    pub args: Value,
    /// Content-block position within the assistant message
    pub index: usize,
}

/// Tool result extracted from a provider stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultDelta {
    /// Handle of the tool call this result answers
    pub call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Normalized token counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl UsageDelta {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }

    /// Component-wise max, for streaming updates that repeat totals.
    pub fn merge_max(&mut self, other: &UsageDelta) {
        self.input = self.input.max(other.input);
        self.output = self.output.max(other.output);
        self.cache_read = self.cache_read.max(other.cache_read);
        self.cache_write = self.cache_write.max(other.cache_write);
    }
}

/// Wall-clock timing reported by the provider on turn completion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimingDelta {
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
}

/// Common delta: the provider-agnostic unit every decoder emits.
///
/// One provider payload can expand into several deltas (an assistant
/// message carries a sequence of content blocks); decoders preserve
/// block order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Set for `kind = Content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallDelta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultDelta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageDelta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingDelta>,
}

impl Delta {
    pub fn content(role: Role, block: BlockKind, text: impl Into<String>) -> Self {
        Self {
            kind: DeltaKind::Content,
            role: Some(role),
            block: Some(block),
            content: Some(text.into()),
            tool_call: None,
            tool_result: None,
            usage: None,
            session: None,
            model: None,
            stop_reason: None,
            timing: None,
        }
    }

    pub fn tool_call(call: ToolCallDelta) -> Self {
        Self {
            kind: DeltaKind::ToolCall,
            role: Some(Role::Assistant),
            block: None,
            content: None,
            tool_call: Some(call),
            tool_result: None,
            usage: None,
            session: None,
            model: None,
            stop_reason: None,
            timing: None,
        }
    }

    pub fn tool_result(result: ToolResultDelta) -> Self {
        Self {
            kind: DeltaKind::ToolResult,
            role: Some(Role::Tool),
            block: None,
            content: None,
            tool_call: None,
            tool_result: Some(result),
            usage: None,
            session: None,
            model: None,
            stop_reason: None,
            timing: None,
        }
    }

    pub fn usage(usage: UsageDelta) -> Self {
        Self {
            kind: DeltaKind::Usage,
            role: None,
            block: None,
            content: None,
            tool_call: None,
            tool_result: None,
            usage: Some(usage),
            session: None,
            model: None,
            stop_reason: None,
            timing: None,
        }
    }

    pub fn stop(stop_reason: Option<String>) -> Self {
        Self {
            kind: DeltaKind::Stop,
            role: None,
            block: None,
            content: None,
            tool_call: None,
            tool_result: None,
            usage: None,
            session: None,
            model: None,
            stop_reason,
            timing: None,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: UsageDelta) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_timing(mut self, timing: TimingDelta) -> Self {
        self.timing = Some(timing);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_merge_max() {
        let mut usage = UsageDelta {
            input: 100,
            output: 50,
            cache_read: 10,
            cache_write: 0,
        };
        usage.merge_max(&UsageDelta {
            input: 80,
            output: 120,
            cache_read: 10,
            cache_write: 5,
        });
        assert_eq!(usage.input, 100);
        assert_eq!(usage.output, 120);
        assert_eq!(usage.cache_read, 10);
        assert_eq!(usage.cache_write, 5);
    }

    #[test]
    fn test_delta_serialization_omits_empty_fields() {
        let delta = Delta::content(Role::Assistant, BlockKind::Text, "hello");
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["kind"], "content");
        assert_eq!(json["block"], "text");
        assert!(json.get("tool_call").is_none());
        assert!(json.get("usage").is_none());
    }
}
