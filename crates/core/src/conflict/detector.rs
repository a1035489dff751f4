//! Title matching over a form collection.
//!
//! Both functions are pure: callers resolve the collection first (see
//! [`FormSource`](crate::source::FormSource)) and pass it in.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use super::ConflictInfo;
use crate::errors::ConflictError;
use crate::models::json_id_string;
use crate::source::title_of;

/// Largest `N` tried for an `(Import N)` title.
pub const MAX_IMPORT_SUFFIX: u32 = 10_000;

/// Find the first form whose title equals `title` exactly.
pub fn find_title_conflict(title: &str, forms: &[Value]) -> ConflictInfo {
    match forms.iter().find(|form| title_of(form) == Some(title)) {
        Some(existing) => {
            let existing_id = json_id_string(existing.get("id"));
            debug!(title, existing_id = %existing_id, "title conflict found");
            ConflictInfo::title(existing_id, title)
        }
        None => ConflictInfo::none(),
    }
}

/// `"<base> (Import N)"` with the smallest positive `N` that no form in
/// `forms` already uses for this base.
pub fn next_import_title(base: &str, forms: &[Value]) -> Result<String, ConflictError> {
    let pattern = format!(r"^{} \(Import (\d+)\)$", regex_lite::escape(base));
    let re = regex_lite::Regex::new(&pattern)
        .map_err(|e| ConflictError::Parse(format!("bad import title pattern: {e}")))?;

    let taken: BTreeSet<u32> = forms
        .iter()
        .filter_map(title_of)
        .filter_map(|title| re.captures(title))
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect();

    (1..=MAX_IMPORT_SUFFIX)
        .find(|n| !taken.contains(n))
        .map(|n| format!("{base} (Import {n})"))
        .ok_or_else(|| ConflictError::TitleExhausted(base.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forms(titles: &[&str]) -> Vec<Value> {
        titles
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"id": (i + 1).to_string(), "title": t}))
            .collect()
    }

    #[test]
    fn test_exact_match_conflicts() {
        let info = find_title_conflict("Contact", &forms(&["Survey", "Contact"]));
        assert!(info.has_conflict);
        let details = info.conflict_details.unwrap();
        assert_eq!(details.existing_id, "2");
        assert_eq!(details.existing_title, "Contact");
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let info = find_title_conflict("contact", &forms(&["Contact"]));
        assert!(!info.has_conflict);
        assert!(info.conflict_details.is_none());
    }

    #[test]
    fn test_numeric_ids_render_as_strings() {
        let info = find_title_conflict("A", &[json!({"id": 7, "title": "A"})]);
        assert_eq!(info.conflict_details.unwrap().existing_id, "7");
    }

    #[test]
    fn test_first_import_title() {
        let title = next_import_title("Contact", &forms(&["Contact"])).unwrap();
        assert_eq!(title, "Contact (Import 1)");
    }

    #[test]
    fn test_next_import_title_skips_taken() {
        let existing = forms(&["Contact", "Contact (Import 1)"]);
        assert_eq!(
            next_import_title("Contact", &existing).unwrap(),
            "Contact (Import 2)"
        );
    }

    #[test]
    fn test_next_import_title_fills_gaps() {
        let existing = forms(&["X", "X (Import 1)", "X (Import 3)"]);
        assert_eq!(next_import_title("X", &existing).unwrap(), "X (Import 2)");
    }

    #[test]
    fn test_other_bases_do_not_count() {
        let existing = forms(&["Contact Form (Import 1)", "contact (Import 1)"]);
        assert_eq!(
            next_import_title("Contact", &existing).unwrap(),
            "Contact (Import 1)"
        );
    }

    #[test]
    fn test_base_with_regex_metacharacters() {
        let existing = forms(&["Q&A (v2.0)? (Import 1)"]);
        assert_eq!(
            next_import_title("Q&A (v2.0)?", &existing).unwrap(),
            "Q&A (v2.0)? (Import 2)"
        );
    }
}
