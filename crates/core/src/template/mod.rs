//! Template forms: naming, structure checks, cloning and listing.
//!
//! A template is an ordinary form whose title ends with
//! [`TEMPLATE_SUFFIX`]. Templates are cloned into new forms by
//! [`TemplateCloner`] and surfaced by [`TemplateLister`].

pub mod cloner;
pub mod fields;
pub mod lister;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use cloner::{apply_template_modifications, TemplateCloner};
pub use fields::FieldCategory;
pub use lister::TemplateLister;

/// Title suffix marking a form as a template.
pub const TEMPLATE_SUFFIX: &str = "-template";

/// Name used when no usable base name is given.
pub const PLACEHOLDER_TEMPLATE_NAME: &str = "untitled-template";

/// Whether `form` has a string title ending in [`TEMPLATE_SUFFIX`].
pub fn is_template(form: &Value) -> bool {
    form.get("title")
        .and_then(Value::as_str)
        .is_some_and(|title| title.ends_with(TEMPLATE_SUFFIX))
}

/// Template name for `base`: trimmed, with the suffix appended unless already
/// present. Missing or blank input yields [`PLACEHOLDER_TEMPLATE_NAME`].
pub fn generate_template_name(base: Option<&str>) -> String {
    match base.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) if base.ends_with(TEMPLATE_SUFFIX) => base.to_string(),
        Some(base) => format!("{base}{TEMPLATE_SUFFIX}"),
        None => PLACEHOLDER_TEMPLATE_NAME.to_string(),
    }
}

/// Whether `form` has a non-empty `fields` array whose entries all carry a
/// non-empty `id`, `type` and `label`.
pub fn validate_template_structure(form: &Value) -> bool {
    fields::check_fields(form).is_ok()
}

/// One label change applied while cloning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
    pub original_label: String,
    pub new_label: String,
}

impl FieldRename {
    pub fn new(original_label: impl Into<String>, new_label: impl Into<String>) -> Self {
        Self {
            original_label: original_label.into(),
            new_label: new_label.into(),
        }
    }
}

/// Changes applied to a template clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateModification {
    /// Title of the new form.
    pub title: String,
    /// Renames, applied in order.
    #[serde(default)]
    pub field_renames: Vec<FieldRename>,
    /// Field ids are never touched, so conditional logic always survives;
    /// kept for callers that state the requirement explicitly.
    #[serde(default = "default_preserve_logic")]
    pub preserve_logic: bool,
}

fn default_preserve_logic() -> bool {
    true
}

impl TemplateModification {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            field_renames: Vec::new(),
            preserve_logic: true,
        }
    }

    pub fn rename(mut self, original_label: impl Into<String>, new_label: impl Into<String>) -> Self {
        self.field_renames
            .push(FieldRename::new(original_label, new_label));
        self
    }
}

/// A template as presented by the lister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub field_count: usize,
    pub created_date: String,
}
