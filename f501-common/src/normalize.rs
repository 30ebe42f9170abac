//! Name normalisation
//!
//! Entity names, team names and competition names are compared through a
//! folded key: Unicode compatibility decomposition with combining marks
//! removed, lowercased, punctuation turned into separators and whitespace
//! collapsed. "Müller, Thomas" and "muller thomas" share a key.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold a display name into its comparison key
pub fn normalize_name(value: &str) -> String {
    let folded: String = value
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            // Apostrophes join rather than split ("O'Brien" -> "obrien")
            '\'' | '\u{2019}' => '\0',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .filter(|c| *c != '\0')
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalise an optional filter value, treating blank input as absent
pub fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(normalize_name)
        .filter(|normalized| !normalized.is_empty())
}
