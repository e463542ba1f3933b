//! Name normalization for matching, indexing, and blocking.
//!
//! Three levels, from least to most aggressive:
//!
//! - [`lookup_key`]: NFKC + case fold + whitespace collapse. Keys the
//!   knowledge base's label/alias indices.
//! - [`normalize`]: `lookup_key` plus trimming of leading/trailing
//!   punctuation. Input to similarity scoring and n-grams.
//! - [`index_key`]: `normalize` with every remaining space and punctuation
//!   mark removed. Used only for blocking buckets, never stored as a label.
//!
//! Internal punctuation and honorific-like prefixes are kept on purpose:
//! "Dr. Pepper" normalizes to "dr. pepper", not "pepper".

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

/// Default n-gram size used for blocking.
pub const DEFAULT_NGRAM: usize = 3;

/// Whether `c` counts as punctuation for trimming purposes.
fn is_punct(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '\u{00A1}' | '\u{00A7}' | '\u{00AB}' | '\u{00B6}' | '\u{00B7}' | '\u{00BB}' | '\u{00BF}'
        )
        || ('\u{2010}'..='\u{2027}').contains(&c)
        || ('\u{2030}'..='\u{205E}').contains(&c)
        || ('\u{3001}'..='\u{3003}').contains(&c)
        || ('\u{3008}'..='\u{3011}').contains(&c)
}

/// Unicode case folding for the handful of characters where it differs
/// from lowercasing.
fn case_fold(s: &str) -> String {
    let lower = s.to_lowercase();
    if lower.chars().any(|c| matches!(c, 'ß' | 'ς' | 'ſ')) {
        lower
            .chars()
            .flat_map(|c| match c {
                'ß' => vec!['s', 's'],
                'ς' => vec!['σ'],
                'ſ' => vec!['s'],
                other => vec![other],
            })
            .collect()
    } else {
        lower
    }
}

/// Case-insensitive key for the label and alias indices.
pub fn lookup_key(name: &str) -> String {
    let folded = case_fold(&name.nfkc().collect::<String>());
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a name for comparison.
///
/// NFKC, case fold, collapse internal whitespace, and strip leading and
/// trailing punctuation only.
pub fn normalize(name: &str) -> String {
    let collapsed = lookup_key(name);
    collapsed
        .trim_matches(|c: char| is_punct(c) || c.is_whitespace())
        .to_string()
}

/// Character n-grams of the normalized name.
///
/// Names shorter than `n` yield a single gram holding the whole normalized
/// string; empty names yield nothing.
pub fn ngrams(name: &str, n: usize) -> HashSet<String> {
    let normalized = normalize(name);
    if normalized.is_empty() {
        return HashSet::new();
    }

    let n = n.max(1);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < n {
        return HashSet::from([normalized]);
    }

    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Blocking key: the normalized name with all whitespace and punctuation removed.
pub fn index_key(name: &str) -> String {
    normalize(name)
        .chars()
        .filter(|c| !c.is_whitespace() && !is_punct(*c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_basic() {
        assert_eq!(normalize("  Sidney   Gottlieb "), "sidney gottlieb");
        assert_eq!(normalize("CIA"), "cia");
        assert_eq!(normalize("\"MKUltra.\""), "mkultra");
    }

    #[test]
    fn normalize_keeps_internal_punctuation_and_prefixes() {
        assert_eq!(normalize("Dr. Pepper"), "dr. pepper");
        assert_eq!(normalize("O'Brien"), "o'brien");
        assert_eq!(normalize("AT&T"), "at&t");
    }

    #[test]
    fn normalize_applies_nfkc_and_case_fold() {
        // Fullwidth letters and the "fi" ligature fold under NFKC.
        assert_eq!(normalize("ＣＩＡ"), "cia");
        assert_eq!(normalize("\u{FB01}eld"), "field");
        assert_eq!(normalize("Straße"), "strasse");
    }

    #[test]
    fn lookup_key_keeps_trailing_punctuation() {
        assert_eq!(lookup_key("Dr."), "dr.");
        assert_eq!(lookup_key("  The   CIA "), "the cia");
    }

    #[test]
    fn ngrams_short_and_empty() {
        assert!(ngrams("", 3).is_empty());
        assert!(ngrams("  ...  ", 3).is_empty());
        assert_eq!(ngrams("Al", 3), HashSet::from(["al".to_string()]));
    }

    #[test]
    fn ngrams_trigrams() {
        let grams = ngrams("Bobby", 3);
        let expected: HashSet<String> = ["bob", "obb", "bby"].iter().map(|s| s.to_string()).collect();
        assert_eq!(grams, expected);
    }

    #[test]
    fn index_key_strips_everything() {
        assert_eq!(index_key("Dr. Pepper"), "drpepper");
        assert_eq!(index_key("A.T. & T."), "att");
        assert_eq!(index_key("C.I.A."), "cia");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in "[a-zA-Z0-9 .,!?'&-]{0,40}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn index_key_has_no_whitespace(s in "[a-zA-Z .,-]{0,40}") {
            prop_assert!(!index_key(&s).contains(' '));
        }
    }
}
