use mnemon_types::{Delta, Provider};
use serde_json::Value;

use crate::{ClaudeCodeDecoder, GeminiDecoder, HookDecoder};

/// One state-free decoder per provider.
///
/// Decoders are pure functions over a single payload; every piece of
/// cross-payload state (turn boundaries, call-id correlation) lives in
/// the aggregator, never here.
pub trait StreamDecoder: Send + Sync {
    /// Provider this decoder understands
    fn provider(&self) -> Provider;

    /// Decode one payload into ordered deltas; empty = nothing observable
    fn decode(&self, payload: &Value) -> Vec<Delta>;
}

/// Decoder registry, selected by the envelope's provider field.
pub fn decoder_for(provider: Provider) -> &'static dyn StreamDecoder {
    match provider {
        Provider::ClaudeCode => &ClaudeCodeDecoder,
        Provider::Gemini => &GeminiDecoder,
        Provider::Generic => &HookDecoder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_all_providers() {
        for provider in [Provider::ClaudeCode, Provider::Gemini, Provider::Generic] {
            assert_eq!(decoder_for(provider).provider(), provider);
        }
    }
}
