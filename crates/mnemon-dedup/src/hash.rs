/// Content considered beyond this many characters does not change the
/// hash: payloads that differ only deep inside long natural-language
/// content are the same logical event.
pub const HASH_CONTENT_LIMIT: usize = 500;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a over a byte string.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic content hash for a logical event.
///
/// Fields are joined with a unit separator so "ab" + "c" and "a" + "bc"
/// cannot collide; content is truncated on a char boundary first.
pub fn content_hash(
    event_type: &str,
    content: &str,
    tool_name: Option<&str>,
    session_id: &str,
) -> u64 {
    let truncated: String = content.chars().take(HASH_CONTENT_LIMIT).collect();

    let mut input = String::with_capacity(
        event_type.len() + truncated.len() + tool_name.map_or(0, str::len) + session_id.len() + 3,
    );
    input.push_str(event_type);
    input.push('\u{1f}');
    input.push_str(&truncated);
    input.push('\u{1f}');
    input.push_str(tool_name.unwrap_or(""));
    input.push('\u{1f}');
    input.push_str(session_id);

    fnv1a64(input.as_bytes())
}
