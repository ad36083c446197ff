mod claude_code;
mod gemini;
mod hook;
mod traits;

pub use claude_code::ClaudeCodeDecoder;
pub use gemini::GeminiDecoder;
pub use hook::HookDecoder;
pub use traits::{decoder_for, StreamDecoder};

use mnemon_types::{Delta, Envelope};

/// Decode an envelope's payload into ordered deltas.
///
/// An empty result means the payload carried no observable delta
/// (unsupported subtype, malformed record); that is not an error.
pub fn parse_envelope(envelope: &Envelope) -> Vec<Delta> {
    decoder_for(envelope.provider).decode(&envelope.payload)
}
