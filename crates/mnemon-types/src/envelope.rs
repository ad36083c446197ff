use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Provider that produced the raw payload inside an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    ClaudeCode,
    Gemini,
    Generic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::ClaudeCode => "claude_code",
            Provider::Gemini => "gemini",
            Provider::Generic => "generic",
        }
    }
}

/// Event source that observed and forwarded the envelope.
///
/// Three independent producers watch overlapping subsets of the same
/// events; the priority ordering decides which observation wins when
/// the same logical event arrives more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestSource {
    StreamJson,
    Hook,
    FileWatcher,
}

impl IngestSource {
    /// stream-json carries the richest payload, file-watcher the poorest.
    pub fn priority(&self) -> u8 {
        match self {
            IngestSource::StreamJson => 3,
            IngestSource::Hook => 2,
            IngestSource::FileWatcher => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestSource::StreamJson => "stream-json",
            IngestSource::Hook => "hook",
            IngestSource::FileWatcher => "file-watcher",
        }
    }
}

/// Optional transport headers attached to an envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeHeaders {
    #[serde(rename = "x-session-id", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(rename = "x-source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<IngestSource>,
}

/// Ingestion envelope (wire format)
///
/// Wraps one provider-specific payload with the metadata the pipeline
/// needs before the payload itself is decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: Uuid,
    pub ingest_timestamp: DateTime<Utc>,
    pub provider: Provider,
    pub payload: Value,
    #[serde(default)]
    pub headers: EnvelopeHeaders,
}

impl Envelope {
    pub fn new(provider: Provider, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            ingest_timestamp: Utc::now(),
            provider,
            payload,
            headers: EnvelopeHeaders::default(),
        }
    }

    /// Source this envelope arrived from; file-watcher when unlabeled.
    pub fn source(&self) -> IngestSource {
        self.headers.source.unwrap_or(IngestSource::FileWatcher)
    }
}
