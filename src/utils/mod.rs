use sha2::{Digest, Sha256};

/// Strip HTML tags from a fragment, leaving only text content.
///
/// Good enough for emptiness checks and for feeding page text to the
/// analyzer; this is not a sanitizer.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                if in_tag {
                    in_tag = false;
                    // Tag boundaries act as whitespace so adjacent text nodes
                    // don't run together.
                    out.push(' ');
                } else {
                    out.push(ch);
                }
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Synthesize a 16-character lowercase alphanumeric id.
pub fn alnum_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..16)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

/// Stable 64-bit hash of a string (first 8 bytes of its SHA-256).
pub fn hash64(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Short stable hex id derived from a string, for deterministic image ids.
pub fn short_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    hex::encode(&digest[..6])
}

/// Slugify a query into a URL path segment: lowercase alphanumerics joined
/// by hyphens, capped at 60 characters.
pub fn slugify(s: &str) -> String {
    let mut slug = String::new();
    let mut last_hyphen = true;
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
        if slug.len() >= 60 {
            break;
        }
    }
    slug.trim_matches('-').to_string()
}
