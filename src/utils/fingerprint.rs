// Cheap content fingerprint for base64 image payloads
//
// Length + fixed-size prefix/suffix, hashed with xxHash3. Only byte-identical
// payloads collide on purpose; a re-encoded copy of the same photo misses.

use xxhash_rust::xxh3::xxh3_64;

/// Number of characters taken from each end of the payload
const EDGE_CHARS: usize = 100;

/// Compute the cache key for a base64 image payload.
///
/// A `data:<mime>;base64,` prefix is stripped first so a data URL and the
/// bare base64 body of the same image share a key.
pub fn fingerprint(payload: &str) -> String {
    let body = strip_data_url(payload.trim());

    let prefix = char_prefix(body, EDGE_CHARS);
    let suffix = char_suffix(body, EDGE_CHARS);

    let mut hash_input = Vec::with_capacity(8 + prefix.len() + suffix.len() + 1);
    hash_input.extend_from_slice(&(body.len() as u64).to_le_bytes());
    hash_input.extend_from_slice(prefix.as_bytes());
    hash_input.push(b'|');
    hash_input.extend_from_slice(suffix.as_bytes());

    format!("{:016x}", xxh3_64(&hash_input))
}

/// Strip a leading `data:...;base64,` header if present
pub fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:") {
        if let Some(idx) = payload.find(";base64,") {
            return &payload[idx + ";base64,".len()..];
        }
    }
    payload
}

fn char_prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn char_suffix(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    match s.char_indices().nth(count - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
