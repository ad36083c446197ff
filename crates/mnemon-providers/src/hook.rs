use mnemon_types::{
    BlockKind, Delta, Provider, Role, ToolCallDelta, ToolResultDelta,
};
use serde::Deserialize;
use serde_json::Value;

use crate::traits::StreamDecoder;

/// Generic hook payload shape.
///
/// Hooks fire around tool use and prompt submission; they carry less
/// than the stream (no reasoning, no usage) which is why the hook
/// source sits below stream-json in the dedup priority order.
#[derive(Debug, Deserialize)]
struct HookPayload {
    hook_event_name: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Option<Value>,
    #[serde(default)]
    tool_response: Option<Value>,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Decoder for generic hook payloads.
pub struct HookDecoder;

impl StreamDecoder for HookDecoder {
    fn provider(&self) -> Provider {
        Provider::Generic
    }

    fn decode(&self, payload: &Value) -> Vec<Delta> {
        let hook: HookPayload = match serde_json::from_value(payload.clone()) {
            Ok(hook) => hook,
            Err(_) => return Vec::new(),
        };

        let delta = match hook.hook_event_name.as_str() {
            "UserPromptSubmit" => hook
                .prompt
                .map(|prompt| Delta::content(Role::User, BlockKind::Text, prompt)),

            "PreToolUse" => hook.tool_name.map(|name| {
                Delta::tool_call(ToolCallDelta {
                    id: hook
                        .tool_use_id
                        .unwrap_or_else(|| format!("hook-{}", name.to_lowercase())),
                    name,
                    args: hook.tool_input.unwrap_or(Value::Null),
                    index: 0,
                })
            }),

            "PostToolUse" => hook.tool_name.map(|name| {
                let response = hook.tool_response.unwrap_or(Value::Null);
                let is_error = response
                    .get("error")
                    .map(|e| !e.is_null())
                    .unwrap_or(false);
                Delta::tool_result(ToolResultDelta {
                    call_id: hook
                        .tool_use_id
                        .unwrap_or_else(|| format!("hook-{}", name.to_lowercase())),
                    content: match &response {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                    is_error,
                })
            }),

            "Stop" | "SubagentStop" => Some(Delta::stop(hook.stop_reason)),

            // SessionStart, Notification, PreCompact, ... carry nothing
            // the graph records
            _ => None,
        };

        match delta {
            Some(mut delta) => {
                delta.session = hook.session_id;
                vec![delta]
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_types::DeltaKind;
    use serde_json::json;

    fn decode(payload: Value) -> Vec<Delta> {
        HookDecoder.decode(&payload)
    }

    #[test]
    fn test_user_prompt_submit() {
        let deltas = decode(json!({
            "hook_event_name": "UserPromptSubmit",
            "session_id": "s-1",
            "prompt": "add a retry to the client"
        }));
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].kind, DeltaKind::Content);
        assert_eq!(deltas[0].role, Some(Role::User));
        assert_eq!(deltas[0].session.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_pre_and_post_tool_use_share_handle() {
        let call = decode(json!({
            "hook_event_name": "PreToolUse",
            "session_id": "s-1",
            "tool_name": "Bash",
            "tool_use_id": "toolu_9",
            "tool_input": {"command": "cargo check"}
        }));
        assert_eq!(call[0].tool_call.as_ref().unwrap().id, "toolu_9");

        let result = decode(json!({
            "hook_event_name": "PostToolUse",
            "session_id": "s-1",
            "tool_name": "Bash",
            "tool_use_id": "toolu_9",
            "tool_response": "ok"
        }));
        assert_eq!(result[0].tool_result.as_ref().unwrap().call_id, "toolu_9");
    }

    #[test]
    fn test_post_tool_use_error_detection() {
        let deltas = decode(json!({
            "hook_event_name": "PostToolUse",
            "tool_name": "Bash",
            "tool_response": {"error": "exit 1"}
        }));
        assert!(deltas[0].tool_result.as_ref().unwrap().is_error);
    }

    #[test]
    fn test_stop_event() {
        let deltas = decode(json!({"hook_event_name": "Stop", "session_id": "s-1"}));
        assert_eq!(deltas[0].kind, DeltaKind::Stop);
    }

    #[test]
    fn test_unsupported_hooks_are_silent() {
        assert!(decode(json!({"hook_event_name": "SessionStart"})).is_empty());
        assert!(decode(json!({"hook_event_name": "Notification", "message": "hi"})).is_empty());
        assert!(decode(json!({"no_hook_field": true})).is_empty());
    }
}
