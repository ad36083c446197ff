mod schema;

use mnemon_types::{
    BlockKind, Delta, Provider, Role, TimingDelta, ToolCallDelta, ToolResultDelta, UsageDelta,
};
use serde_json::Value;

use crate::traits::StreamDecoder;
use schema::*;

/// Decoder for the claude_code stream-json format.
pub struct ClaudeCodeDecoder;

impl StreamDecoder for ClaudeCodeDecoder {
    fn provider(&self) -> Provider {
        Provider::ClaudeCode
    }

    fn decode(&self, payload: &Value) -> Vec<Delta> {
        let record: StreamRecord = match serde_json::from_value(payload.clone()) {
            Ok(record) => record,
            Err(_) => return Vec::new(),
        };

        match record {
            StreamRecord::Assistant(assistant) => decode_assistant(assistant),
            StreamRecord::User(user) => decode_user(user),
            StreamRecord::Result(result) => decode_result(result),
            // init/system records carry no observable delta
            StreamRecord::System(_) | StreamRecord::Unknown => Vec::new(),
        }
    }
}

fn convert_usage(usage: &TokenUsage) -> UsageDelta {
    UsageDelta {
        input: usage.input_tokens,
        output: usage.output_tokens,
        cache_read: usage.cache_read_input_tokens,
        cache_write: usage.cache_creation_input_tokens,
    }
}

fn attach(mut delta: Delta, session: &Option<String>, model: &Option<String>) -> Delta {
    delta.session = session.clone();
    if delta.model.is_none() {
        delta.model = model.clone();
    }
    delta
}

fn decode_assistant(record: AssistantRecord) -> Vec<Delta> {
    let mut deltas = Vec::new();
    let session = record.session_id;
    let model = record.message.model;

    for (index, content) in record.message.content.into_iter().enumerate() {
        let delta = match content {
            AssistantContent::Thinking { thinking } => {
                Delta::content(Role::Assistant, BlockKind::Thinking, thinking)
            }
            AssistantContent::Text { text } => Delta::content(Role::Assistant, BlockKind::Text, text),
            AssistantContent::ToolUse { id, name, input } => Delta::tool_call(ToolCallDelta {
                id,
                name,
                args: input,
                index,
            }),
            AssistantContent::Unknown => continue,
        };
        deltas.push(attach(delta, &session, &model));
    }

    if let Some(usage) = &record.message.usage {
        let mut delta = Delta::usage(convert_usage(usage));
        delta.stop_reason = record.message.stop_reason.clone();
        deltas.push(attach(delta, &session, &model));
    }

    deltas
}

fn decode_user(record: UserRecord) -> Vec<Delta> {
    let mut deltas = Vec::new();
    let session = record.session_id;

    for content in record.message.content {
        let delta = match content {
            UserContent::Text { text } => Delta::content(Role::User, BlockKind::Text, text),
            UserContent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Delta::tool_result(ToolResultDelta {
                call_id: tool_use_id,
                content: flatten_result_content(content),
                is_error,
            }),
            UserContent::Unknown => continue,
        };
        deltas.push(attach(delta, &session, &None));
    }

    deltas
}

/// Tool result content arrives as a string, a block array, or nothing.
fn flatten_result_content(content: Option<Value>) -> String {
    match content {
        Some(Value::String(s)) => s,
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn decode_result(record: ResultRecord) -> Vec<Delta> {
    let mut delta = Delta::stop(record.subtype.clone()).with_timing(TimingDelta {
        duration_ms: record.duration_ms,
        duration_api_ms: record.duration_api_ms,
    });
    if let Some(usage) = &record.usage {
        delta = delta.with_usage(convert_usage(usage));
    }
    delta.session = record.session_id;
    vec![delta]
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_types::DeltaKind;
    use serde_json::json;

    fn decode(payload: Value) -> Vec<Delta> {
        ClaudeCodeDecoder.decode(&payload)
    }

    #[test]
    fn test_assistant_blocks_in_order() {
        let deltas = decode(json!({
            "type": "assistant",
            "session_id": "s-1",
            "message": {
                "model": "claude-sonnet-4",
                "content": [
                    {"type": "thinking", "thinking": "plan A"},
                    {"type": "text", "text": "Let me check"},
                    {"type": "tool_use", "id": "toolu_1", "name": "Read", "input": {"file_path": "/a"}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 100, "output_tokens": 40, "cache_read_input_tokens": 10}
            }
        }));

        assert_eq!(deltas.len(), 4);
        assert_eq!(deltas[0].kind, DeltaKind::Content);
        assert_eq!(deltas[0].block, Some(BlockKind::Thinking));
        assert_eq!(deltas[1].block, Some(BlockKind::Text));
        assert_eq!(deltas[2].kind, DeltaKind::ToolCall);
        let call = deltas[2].tool_call.as_ref().unwrap();
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.name, "Read");
        assert_eq!(call.index, 2);
        assert_eq!(deltas[3].kind, DeltaKind::Usage);
        assert_eq!(deltas[3].usage.unwrap().cache_read, 10);
        assert!(deltas.iter().all(|d| d.session.as_deref() == Some("s-1")));
    }

    #[test]
    fn test_user_tool_result() {
        let deltas = decode(json!({
            "type": "user",
            "session_id": "s-1",
            "message": {
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok", "is_error": false}
                ]
            }
        }));

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::ToolResult);
        let result = deltas[0].tool_result.as_ref().unwrap();
        assert_eq!(result.call_id, "toolu_1");
        assert_eq!(result.content, "ok");
        assert!(!result.is_error);
    }

    #[test]
    fn test_user_string_content() {
        let deltas = decode(json!({
            "type": "user",
            "message": {"content": "plain prompt"}
        }));
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].role, Some(Role::User));
        assert_eq!(deltas[0].content.as_deref(), Some("plain prompt"));
    }

    #[test]
    fn test_tool_result_block_array_content() {
        let deltas = decode(json!({
            "type": "user",
            "message": {
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1",
                     "content": [{"type": "text", "text": "line 1"}, {"type": "text", "text": "line 2"}]}
                ]
            }
        }));
        assert_eq!(
            deltas[0].tool_result.as_ref().unwrap().content,
            "line 1\nline 2"
        );
    }

    #[test]
    fn test_result_record_stops_turn() {
        let deltas = decode(json!({
            "type": "result",
            "subtype": "success",
            "session_id": "s-1",
            "duration_ms": 1500,
            "usage": {"input_tokens": 200, "output_tokens": 90}
        }));

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Stop);
        assert_eq!(deltas[0].stop_reason.as_deref(), Some("success"));
        assert_eq!(deltas[0].timing.unwrap().duration_ms, Some(1500));
        assert_eq!(deltas[0].usage.unwrap().input, 200);
    }

    #[test]
    fn test_system_and_unknown_records_are_silent() {
        assert!(decode(json!({"type": "system", "subtype": "init", "session_id": "s"})).is_empty());
        assert!(decode(json!({"type": "file_history_snapshot"})).is_empty());
        assert!(decode(json!({"not_even": "an envelope"})).is_empty());
    }

    #[test]
    fn test_unknown_content_blocks_are_skipped() {
        let deltas = decode(json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "server_tool_use", "id": "x"},
                    {"type": "text", "text": "visible"}
                ]
            }
        }));
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].content.as_deref(), Some("visible"));
    }
}
