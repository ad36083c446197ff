mod schema;

use mnemon_types::{
    BlockKind, Delta, Provider, Role, ToolCallDelta, ToolResultDelta, UsageDelta,
};
use serde_json::Value;

use crate::traits::StreamDecoder;
use schema::*;

/// Decoder for the Gemini stream format.
pub struct GeminiDecoder;

impl StreamDecoder for GeminiDecoder {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    fn decode(&self, payload: &Value) -> Vec<Delta> {
        let chunk: StreamChunk = match serde_json::from_value(payload.clone()) {
            Ok(chunk) => chunk,
            Err(_) => return Vec::new(),
        };

        let mut deltas = Vec::new();
        let session = chunk.session_id.clone();
        let model = chunk.model_version.clone();
        let mut finish_reason: Option<String> = None;

        for candidate in &chunk.candidates {
            if candidate.finish_reason.is_some() {
                finish_reason = candidate.finish_reason.clone();
            }
            let Some(content) = &candidate.content else {
                continue;
            };
            let role = match content.role.as_deref() {
                Some("user") => Role::User,
                _ => Role::Assistant,
            };

            for (index, part) in content.parts.iter().enumerate() {
                let delta = decode_part(part, role, index);
                if let Some(mut delta) = delta {
                    delta.session = session.clone();
                    if delta.model.is_none() {
                        delta.model = model.clone();
                    }
                    deltas.push(delta);
                }
            }
        }

        if let Some(usage) = &chunk.usage_metadata {
            let mut delta = Delta::usage(UsageDelta {
                input: usage.prompt_token_count,
                output: usage.candidates_token_count + usage.thoughts_token_count,
                cache_read: usage.cached_content_token_count,
                cache_write: 0,
            });
            delta.session = session.clone();
            deltas.push(delta);
        }

        // A finish reason on the last chunk terminates the turn
        if let Some(reason) = finish_reason {
            let mut delta = Delta::stop(Some(reason));
            delta.session = session;
            deltas.push(delta);
        }

        deltas
    }
}

fn decode_part(part: &Part, role: Role, index: usize) -> Option<Delta> {
    if let Some(call) = &part.function_call {
        return Some(Delta::tool_call(ToolCallDelta {
            id: call_handle(&call.id, &call.name, index),
            name: call.name.clone(),
            args: call.args.clone(),
            index,
        }));
    }

    if let Some(response) = &part.function_response {
        let is_error = response
            .response
            .get("error")
            .map(|e| !e.is_null())
            .unwrap_or(false);
        let content = response
            .response
            .get("output")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| response.response.to_string());
        return Some(Delta::tool_result(ToolResultDelta {
            call_id: call_handle(&response.id, &response.name, index),
            content,
            is_error,
        }));
    }

    if let Some(text) = &part.text {
        let block = if part.thought {
            BlockKind::Thinking
        } else {
            BlockKind::Text
        };
        return Some(Delta::content(role, block, text.clone()));
    }

    None
}

/// Gemini function calls may omit ids; fall back to a name-derived
/// handle so the call/response pair still correlates.
fn call_handle(id: &Option<String>, name: &str, index: usize) -> String {
    match id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => format!("{}-{}", name, index),
    }
}
