//! URL slugs derived from rulebook titles.

const MAX_BASE_LEN: usize = 50;
const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Normalize a title into the slug stem: lowercase ASCII alphanumerics joined by single dashes.
pub fn slug_base(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
        } else if (ch.is_whitespace() || ch == '-') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_matches('-');
    trimmed
        .chars()
        .take(MAX_BASE_LEN)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

/// Slug stem plus a random six-character `[a-z0-9]` suffix.
pub fn generate_slug(title: &str) -> String {
    let suffix = random_suffix();
    let base = slug_base(title);
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

/// Map the random bytes of a v4 UUID onto the suffix alphabet.
fn random_suffix() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(SUFFIX_LEN)
        .map(|byte| char::from(SUFFIX_ALPHABET[usize::from(*byte) % SUFFIX_ALPHABET.len()]))
        .collect()
}
