//! Envelope fixtures: build the provider payload shapes the pipeline
//! tests feed in, without hand-writing JSON in every test.

use mnemon_types::{Envelope, IngestSource, Provider};
use serde_json::{json, Value};

pub fn thinking_block(text: &str) -> Value {
    json!({"type": "thinking", "thinking": text})
}

pub fn text_block(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

pub fn tool_use_block(id: &str, name: &str, input: Value) -> Value {
    json!({"type": "tool_use", "id": id, "name": name, "input": input})
}

/// Assistant message envelope with the given content blocks.
pub fn assistant_envelope(session: &str, blocks: Vec<Value>) -> Envelope {
    let mut envelope = Envelope::new(
        Provider::ClaudeCode,
        json!({
            "type": "assistant",
            "session_id": session,
            "message": {
                "model": "claude-sonnet-4",
                "content": blocks,
                "usage": {"input_tokens": 100, "output_tokens": 50}
            }
        }),
    );
    envelope.headers.session_id = Some(session.to_string());
    envelope
}

/// User text envelope (a new user-query cycle).
pub fn user_text_envelope(session: &str, text: &str) -> Envelope {
    let mut envelope = Envelope::new(
        Provider::ClaudeCode,
        json!({
            "type": "user",
            "session_id": session,
            "message": {"content": [{"type": "text", "text": text}]}
        }),
    );
    envelope.headers.session_id = Some(session.to_string());
    envelope
}

/// Tool result envelope answering `call_id`.
pub fn tool_result_envelope(session: &str, call_id: &str, content: &str, is_error: bool) -> Envelope {
    let mut envelope = Envelope::new(
        Provider::ClaudeCode,
        json!({
            "type": "user",
            "session_id": session,
            "message": {"content": [{
                "type": "tool_result",
                "tool_use_id": call_id,
                "content": content,
                "is_error": is_error
            }]}
        }),
    );
    envelope.headers.session_id = Some(session.to_string());
    envelope
}

/// Terminating result envelope for the current turn.
pub fn result_envelope(session: &str) -> Envelope {
    let mut envelope = Envelope::new(
        Provider::ClaudeCode,
        json!({
            "type": "result",
            "subtype": "success",
            "session_id": session,
            "duration_ms": 1200,
            "usage": {"input_tokens": 150, "output_tokens": 80}
        }),
    );
    envelope.headers.session_id = Some(session.to_string());
    envelope
}

/// Tag an envelope with the source that observed it.
pub fn from_source(mut envelope: Envelope, source: IngestSource) -> Envelope {
    envelope.headers.source = Some(source);
    envelope
}

/// Hook observation of the same logical assistant text (poorer payload,
/// same content hash inputs).
pub fn hook_prompt_envelope(session: &str, prompt: &str) -> Envelope {
    let mut envelope = Envelope::new(
        Provider::Generic,
        json!({
            "hook_event_name": "UserPromptSubmit",
            "session_id": session,
            "prompt": prompt
        }),
    );
    envelope.headers.session_id = Some(session.to_string());
    envelope.headers.source = Some(IngestSource::Hook);
    envelope
}
