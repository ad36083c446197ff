use crate::{Error, Result};

const ALLOWED_PREFIXES: &[&str] = &["MATCH", "OPTIONAL MATCH", "WITH", "RETURN", "CALL"];

const DENIED_TOKENS: &[&str] = &[
    "CREATE", "MERGE", "SET", "DELETE", "DETACH", "REMOVE", "DROP", "ALTER",
];

/// Validate that a raw graph query is read-only.
///
/// The query must start with an allow-listed read verb and contain no
/// write token anywhere. Matching is case-insensitive and word-bounded,
/// so a property named `offset` does not trip on `SET`.
pub fn validate_read_query(query: &str) -> Result<()> {
    let upper = query.trim().to_uppercase();

    if upper.is_empty() {
        return Err(Error::Validation("Query is empty".to_string()));
    }

    let starts_allowed = ALLOWED_PREFIXES.iter().any(|prefix| {
        upper.starts_with(prefix)
            && upper[prefix.len()..]
                .chars()
                .next()
                .map_or(true, |c| !is_word_char(c))
    });
    if !starts_allowed {
        return Err(Error::Validation(format!(
            "Query must start with one of {}",
            ALLOWED_PREFIXES.join(", ")
        )));
    }

    for token in tokenize(&upper) {
        if DENIED_TOKENS.contains(&token) {
            return Err(Error::Validation(
                "Write operations are not allowed".to_string(),
            ));
        }
    }

    Ok(())
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(query: &str) -> impl Iterator<Item = &str> {
    query.split(|c: char| !is_word_char(c)).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_queries_pass() {
        assert!(validate_read_query("MATCH (n) RETURN n LIMIT 10").is_ok());
        assert!(validate_read_query("OPTIONAL MATCH (n:Turn) RETURN n").is_ok());
        assert!(validate_read_query("WITH 1 AS x RETURN x").is_ok());
        assert!(validate_read_query("CALL db.labels()").is_ok());
        assert!(validate_read_query("  match (n) return n  ").is_ok());
    }

    #[test]
    fn test_write_prefix_rejected() {
        let err = validate_read_query("CREATE (n:X)").unwrap_err();
        assert!(err.to_string().contains("Query must start with one of"));
    }

    #[test]
    fn test_embedded_write_token_rejected() {
        let err = validate_read_query("MATCH (n) SET n.p = 1").unwrap_err();
        assert!(err.to_string().contains("Write operations are not allowed"));

        assert!(validate_read_query("MATCH (n) DETACH DELETE n").is_err());
        assert!(validate_read_query("match (n) delete n").is_err());
        assert!(validate_read_query("MATCH (n) REMOVE n.p RETURN n").is_err());
    }

    #[test]
    fn test_word_boundaries_respected() {
        // SETTING / offset contain write tokens as substrings only
        assert!(validate_read_query("MATCH (n) WHERE n.setting = 1 RETURN n").is_ok());
        assert!(validate_read_query("MATCH (n) RETURN n.offset").is_ok());
        assert!(validate_read_query("MATCH (n) RETURN n.created_at").is_ok());
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(validate_read_query("").is_err());
        assert!(validate_read_query("   ").is_err());
    }

    #[test]
    fn test_prefix_must_be_word_bounded() {
        // "MATCHER ..." must not pass as MATCH
        assert!(validate_read_query("MATCHER (n) RETURN n").is_err());
    }
}
