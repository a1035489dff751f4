//! Semantic field categories and rename safety.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of data a field holds, derived from its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Date,
    Phone,
    Email,
    Number,
    Text,
    Choice,
    Other,
}

impl FieldCategory {
    /// Map a field `type` to its category.
    pub fn from_type(field_type: &str) -> Self {
        match field_type.trim().to_ascii_lowercase().as_str() {
            "date" | "time" => Self::Date,
            "phone" => Self::Phone,
            "email" => Self::Email,
            "number" | "quantity" | "price" | "total" => Self::Number,
            "text" | "textarea" | "name" | "address" | "website" | "hidden" => Self::Text,
            "select" | "radio" | "checkbox" | "multiselect" | "option" => Self::Choice,
            _ => Self::Other,
        }
    }

    /// The category a label suggests by its wording, if any.
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

        if lower.contains("email") || lower.contains("e-mail") || has(&["mail"]) {
            Some(Self::Email)
        } else if lower.contains("phone") || has(&["tel", "mobile", "cell", "fax"]) {
            Some(Self::Phone)
        } else if has(&["date", "dob", "birthday", "birthdate", "when"]) {
            Some(Self::Date)
        } else if has(&["number", "amount", "quantity", "qty", "age", "count"]) {
            Some(Self::Number)
        } else {
            None
        }
    }

    /// Date, phone and email carry a format that automation relies on.
    pub fn is_format_sensitive(self) -> bool {
        matches!(self, Self::Date | Self::Phone | Self::Email)
    }
}

impl std::fmt::Display for FieldCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Date => write!(f, "date"),
            Self::Phone => write!(f, "phone"),
            Self::Email => write!(f, "email"),
            Self::Number => write!(f, "number"),
            Self::Text => write!(f, "text"),
            Self::Choice => write!(f, "choice"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Category a new label implies within `fields`: that of another field
/// already carrying the label, else the label's wording.
pub fn implied_category(fields: &[Value], skip_index: usize, new_label: &str) -> Option<FieldCategory> {
    fields
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != skip_index)
        .find(|(_, f)| f.get("label").and_then(Value::as_str) == Some(new_label))
        .and_then(|(_, f)| f.get("type").and_then(Value::as_str))
        .map(FieldCategory::from_type)
        .or_else(|| FieldCategory::from_label(new_label))
}

/// A rename is dangerous when a format-sensitive field would get a label
/// implying a different format-sensitive category.
pub fn is_dangerous_rename(from: FieldCategory, to: Option<FieldCategory>) -> bool {
    match to {
        Some(to) => from.is_format_sensitive() && to.is_format_sensitive() && from != to,
        None => false,
    }
}

/// Check a form's `fields`: a non-empty array whose entries all carry a
/// non-empty `id`, `type` and `label`.
pub(crate) fn check_fields(form: &Value) -> Result<&Vec<Value>, String> {
    let fields = form
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing fields array".to_string())?;
    if fields.is_empty() {
        return Err("fields array is empty".into());
    }
    for (idx, field) in fields.iter().enumerate() {
        if !has_value(field.get("id")) {
            return Err(format!("field {idx} has no id"));
        }
        for key in ["type", "label"] {
            let ok = field
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty());
            if !ok {
                return Err(format!("field {idx} has no {key}"));
            }
        }
    }
    Ok(fields)
}

fn has_value(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_categories() {
        assert_eq!(FieldCategory::from_type("date"), FieldCategory::Date);
        assert_eq!(FieldCategory::from_type("Phone"), FieldCategory::Phone);
        assert_eq!(FieldCategory::from_type("radio"), FieldCategory::Choice);
        assert_eq!(FieldCategory::from_type("fileupload"), FieldCategory::Other);
    }

    #[test]
    fn test_label_keywords() {
        assert_eq!(FieldCategory::from_label("Phone Number"), Some(FieldCategory::Phone));
        assert_eq!(FieldCategory::from_label("Your E-mail"), Some(FieldCategory::Email));
        assert_eq!(FieldCategory::from_label("Date of Birth"), Some(FieldCategory::Date));
        assert_eq!(FieldCategory::from_label("Mobile"), Some(FieldCategory::Phone));
        assert_eq!(FieldCategory::from_label("Hotel name"), None);
        assert_eq!(FieldCategory::from_label("Comments"), None);
    }

    #[test]
    fn test_dangerous_rules() {
        use FieldCategory::*;
        assert!(is_dangerous_rename(Date, Some(Phone)));
        assert!(is_dangerous_rename(Email, Some(Date)));
        assert!(!is_dangerous_rename(Date, Some(Date)));
        assert!(!is_dangerous_rename(Text, Some(Phone)));
        assert!(!is_dangerous_rename(Phone, Some(Number)));
        assert!(!is_dangerous_rename(Date, None));
    }

    #[test]
    fn test_implied_category_prefers_existing_field() {
        let fields = vec![
            json!({"id": 1, "type": "date", "label": "When"}),
            json!({"id": 2, "type": "text", "label": "Contact"}),
        ];
        // "Contact" has no keyword but field 2 is text.
        assert_eq!(implied_category(&fields, 0, "Contact"), Some(FieldCategory::Text));
        assert_eq!(implied_category(&fields, 0, "Cell"), Some(FieldCategory::Phone));
        // The renamed field itself does not count.
        assert_eq!(implied_category(&fields, 1, "Contact"), None);
    }

    #[test]
    fn test_check_fields() {
        assert!(check_fields(&json!({"fields": [{"id": 1, "type": "text", "label": "A"}]})).is_ok());
        assert!(check_fields(&json!({"fields": []})).is_err());
        assert!(check_fields(&json!({"title": "x"})).is_err());
        assert!(check_fields(&json!({"fields": [{"id": 1, "type": "text", "label": " "}]})).is_err());
        assert!(check_fields(&json!({"fields": [{"id": "", "type": "text", "label": "A"}]})).is_err());
    }
}
