use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::types::TranslationRequest;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Deterministic key for a translation request.
///
/// Case and whitespace differences in the text must not produce distinct
/// cache entries, so the text is lowercased and whitespace-collapsed before
/// hashing. A missing context hashes the same as `"general"`.
pub fn fingerprint(request: &TranslationRequest) -> String {
    let normalized = normalize_text(&request.text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(request.source_lang.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(request.target_lang.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(request.context_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_text(text: &str) -> String {
    WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}
