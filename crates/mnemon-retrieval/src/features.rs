use once_cell::sync::Lazy;
use regex::Regex;

/// Query characteristics feeding the adaptive fuser and the learned
/// fusion model.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFeatures {
    pub token_count: usize,
    /// Named entities: capitalized mid-sentence words, quoted spans,
    /// code-ish identifiers
    pub has_entities: bool,
    /// what / how / why / when / where / who
    pub interrogative: Option<String>,
    pub has_numbers: bool,
    pub has_temporal: bool,
}

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[^"]+"|'[^']+'|`[^`]+`"#).unwrap());
static CODE_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\w+_\w+|[a-z]+[A-Z]\w*|\w+::\w+|\w+\.\w+\()").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").unwrap());
static TEMPORAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(today|yesterday|tomorrow|last\s+(week|month|year)|this\s+(week|month|year)|\d+\s+(minutes?|hours?|days?|weeks?|months?)\s+ago|recent(ly)?)\b")
        .unwrap()
});

const INTERROGATIVES: &[&str] = &["what", "how", "why", "when", "where", "who", "which"];

pub fn extract_features(query: &str) -> QueryFeatures {
    let tokens: Vec<&str> = query.split_whitespace().collect();

    let interrogative = tokens
        .first()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| INTERROGATIVES.contains(&t.as_str()));

    // Capitalized words past the first token read as proper nouns
    let capitalized_mid = tokens.iter().skip(1).any(|t| {
        let mut chars = t.chars();
        matches!(chars.next(), Some(c) if c.is_uppercase()) && chars.any(|c| c.is_lowercase())
    });

    QueryFeatures {
        token_count: tokens.len(),
        has_entities: capitalized_mid || QUOTED.is_match(query) || CODE_IDENT.is_match(query),
        interrogative,
        has_numbers: NUMBER.is_match(query),
        has_temporal: TEMPORAL.is_match(query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_count_and_interrogative() {
        let features = extract_features("how does the dedup cache evict entries");
        assert_eq!(features.token_count, 7);
        assert_eq!(features.interrogative.as_deref(), Some("how"));
        assert!(!features.has_numbers);
    }

    #[test]
    fn test_entity_detection() {
        assert!(extract_features("errors in the TurnAggregator").has_entities);
        assert!(extract_features("what is \"rank fusion\"").has_entities);
        assert!(extract_features("calls to content_hash somewhere").has_entities);
        assert!(!extract_features("how do sessions expire").has_entities);
    }

    #[test]
    fn test_sentence_initial_capital_is_not_entity() {
        assert!(!extract_features("Where are the logs").has_entities);
    }

    #[test]
    fn test_temporal_and_numeric() {
        let features = extract_features("failures from 3 days ago");
        assert!(features.has_temporal);
        assert!(features.has_numbers);
        assert!(extract_features("what changed yesterday").has_temporal);
        assert!(!extract_features("what changed in the parser").has_temporal);
    }
}
