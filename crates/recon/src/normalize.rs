//! Canonical column names.
//!
//! Every comparison of column names across two tables goes through
//! [`normalize`] on both sides. Raw header spellings never meet each other.

use std::collections::HashSet;

/// Map a column name to its canonical form.
///
/// Lowercases, turns every non-word character (anything other than an
/// alphanumeric or `_`) into `_`, collapses runs of `_` and trims them from
/// both ends. `"From Email"`, `"from_email"` and `" FROM-EMAIL "` all become
/// `from_email`.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Lowercase with spaces and underscores removed. Used for fuzzy name scoring
/// where `created_at`, `CreatedAt` and `created at` should look identical.
pub fn squash(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .collect()
}

/// Normalize a header row into a staged schema.
///
/// Empty canonical names become `column_{n}` (1-based position) and repeats
/// get `_2`, `_3`, ... so no two staged columns share a name.
pub fn dedupe(headers: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut out = Vec::with_capacity(headers.len());
    for (idx, raw) in headers.iter().enumerate() {
        let mut base = normalize(raw);
        if base.is_empty() {
            base = format!("column_{}", idx + 1);
        }
        let mut candidate = base.clone();
        let mut n = 2;
        while seen.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_punctuation_insensitive() {
        assert_eq!(normalize("From Email"), normalize("from_email"));
        assert_eq!(normalize(" FROM-EMAIL "), "from_email");
        assert_eq!(normalize("Amount ($)"), "amount");
        assert_eq!(normalize("__Order__ID__"), "order_id");
    }

    #[test]
    fn keeps_digits_and_unicode_letters() {
        assert_eq!(normalize("Q1 Total"), "q1_total");
        assert_eq!(normalize("Prénom"), "prénom");
    }

    #[test]
    fn punctuation_only_is_empty() {
        assert_eq!(normalize("---"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn squash_drops_separators() {
        assert_eq!(squash("Created_At"), "createdat");
        assert_eq!(squash("created at"), "createdat");
    }

    #[test]
    fn dedupe_suffixes_repeats() {
        let headers: Vec<String> = ["ID", "id", "Id", "", "name"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(dedupe(&headers), vec!["id", "id_2", "id_3", "column_4", "name"]);
    }

    #[test]
    fn dedupe_skips_existing_suffix() {
        let headers: Vec<String> = ["a_2", "a", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedupe(&headers), vec!["a_2", "a", "a_3"]);
    }
}
