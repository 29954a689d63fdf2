//! Storage-safe vector ids.
//!
//! Ids are derived from `(asset name, segment index)` and must come out the same
//! at write time and whenever they are rebuilt for lookup.

use std::sync::LazyLock;

use regex::Regex;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9_-]").expect("static pattern")
});

static UNDERSCORE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").expect("static pattern"));

/// Map an arbitrary identifier onto `[A-Za-z0-9_-]`.
///
/// Non-ASCII characters are dropped, every other disallowed character becomes
/// `_`, and runs of `_` collapse to one. Total and idempotent.
pub fn sanitize_id(raw: &str) -> String {
    let ascii: String = raw.chars().filter(char::is_ascii).collect();
    let replaced = UNSAFE_CHARS.replace_all(&ascii, "_");
    UNDERSCORE_RUNS.replace_all(&replaced, "_").into_owned()
}

/// Vector id for one segment of an asset.
pub fn vector_id(asset_name: &str, segment_index: usize) -> String {
    sanitize_id(&format!("{}_{}", asset_name, segment_index))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "plain",
        "Summer Sale (final).mp4",
        "café_crème.mov",
        "a__b___c",
        "__leading and trailing__",
        "tabs\tand\nnewlines",
        "emoji 🎬 clip",
        "日本語のビデオ.mp4",
        "already-safe_id-42",
        "../../etc/passwd",
        "x_ _y",
        "%%%",
    ];

    #[test]
    fn test_sanitize_examples() {
        assert_eq!(sanitize_id("Summer Sale (final).mp4"), "Summer_Sale_final_mp4");
        assert_eq!(sanitize_id("café_crème.mov"), "caf_crme_mov");
        assert_eq!(sanitize_id("a__b___c"), "a_b_c");
        assert_eq!(sanitize_id("already-safe_id-42"), "already-safe_id-42");
        assert_eq!(sanitize_id("日本語のビデオ.mp4"), "_mp4");
        assert_eq!(sanitize_id(""), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for s in SAMPLES {
            let once = sanitize_id(s);
            assert_eq!(sanitize_id(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_sanitize_output_alphabet() {
        for s in SAMPLES {
            let out = sanitize_id(s);
            assert!(
                out.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                "unexpected character in {:?}",
                out
            );
            assert!(!out.contains("__"), "uncollapsed run in {:?}", out);
        }
    }

    #[test]
    fn test_vector_id_is_deterministic() {
        assert_eq!(vector_id("Summer Sale.mp4", 3), "Summer_Sale_mp4_3");
        assert_eq!(vector_id("Summer Sale.mp4", 3), vector_id("Summer Sale.mp4", 3));
        assert_ne!(vector_id("Summer Sale.mp4", 3), vector_id("Summer Sale.mp4", 4));
    }
}
