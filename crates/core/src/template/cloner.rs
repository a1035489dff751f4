//! Cloning templates into new forms with safe label renames.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::fields::{check_fields, implied_category, is_dangerous_rename, FieldCategory};
use super::TemplateModification;
use crate::errors::TemplateError;
use crate::remote::{form_endpoint, RemoteCall, FORMS_ENDPOINT};

/// Fetches templates and turns them into new form definitions.
pub struct TemplateCloner {
    remote: Arc<dyn RemoteCall>,
}

impl TemplateCloner {
    pub fn new(remote: Arc<dyn RemoteCall>) -> Self {
        Self { remote }
    }

    /// Fetch template `template_id` and return an uncreated copy with
    /// `modifications` applied.
    #[instrument(skip(self, modifications), fields(title = %modifications.title))]
    pub async fn clone_from_template(
        &self,
        template_id: i64,
        modifications: &TemplateModification,
    ) -> Result<Value, TemplateError> {
        let template = self.remote.get(&form_endpoint(template_id)).await?;
        apply_template_modifications(template_id, &template, modifications)
    }

    /// Clone a template and create the result remotely.
    #[instrument(skip(self, modifications), fields(title = %modifications.title))]
    pub async fn create_from_template(
        &self,
        template_id: i64,
        modifications: &TemplateModification,
    ) -> Result<Value, TemplateError> {
        let clone = self.clone_from_template(template_id, modifications).await?;
        let created = self.remote.post(FORMS_ENDPOINT, &clone).await?;
        info!(
            template_id,
            id = ?created.get("id"),
            "created form from template"
        );
        Ok(created)
    }
}

/// Copy `template`, drop its `id`, set the title and apply label renames.
///
/// Only `label` strings change; field ids, types and `conditionalLogic` are
/// carried over untouched. `is_template` is carried over as well, so a clone
/// of a flagged template is still flagged.
pub fn apply_template_modifications(
    template_id: i64,
    template: &Value,
    modifications: &TemplateModification,
) -> Result<Value, TemplateError> {
    check_fields(template).map_err(|detail| TemplateError::InvalidStructure {
        id: template_id,
        detail,
    })?;
    let title = modifications.title.trim();
    if title.is_empty() {
        return Err(TemplateError::EmptyTitle);
    }

    let mut clone = template.clone();
    let Some(obj) = clone.as_object_mut() else {
        return Err(TemplateError::InvalidStructure {
            id: template_id,
            detail: "template is not an object".into(),
        });
    };
    obj.remove("id");
    obj.insert("title".into(), Value::String(title.to_string()));

    let Some(fields) = obj.get_mut("fields").and_then(Value::as_array_mut) else {
        return Err(TemplateError::InvalidStructure {
            id: template_id,
            detail: "missing fields array".into(),
        });
    };
    for rename in &modifications.field_renames {
        let idx = fields
            .iter()
            .position(|f| f.get("label").and_then(Value::as_str) == Some(rename.original_label.as_str()))
            .ok_or_else(|| TemplateError::FieldNotFound(rename.original_label.clone()))?;

        let from = fields[idx]
            .get("type")
            .and_then(Value::as_str)
            .map(FieldCategory::from_type)
            .unwrap_or(FieldCategory::Other);
        let to = implied_category(fields, idx, &rename.new_label);
        if is_dangerous_rename(from, to) {
            warn!(
                original = %rename.original_label,
                new_label = %rename.new_label,
                %from,
                "rejected dangerous field rename"
            );
            return Err(TemplateError::DangerousRename {
                original: rename.original_label.clone(),
                new_label: rename.new_label.clone(),
                from: from.to_string(),
                to: to.map(|c| c.to_string()).unwrap_or_default(),
            });
        }

        if let Some(field) = fields[idx].as_object_mut() {
            field.insert("label".into(), Value::String(rename.new_label.clone()));
        }
        debug!(
            original = %rename.original_label,
            new_label = %rename.new_label,
            "renamed field label"
        );
    }
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::RemoteError;
    use crate::remote::fake::FakeRemote;

    fn template() -> Value {
        json!({
            "id": "5",
            "title": "Intake-template",
            "is_template": true,
            "description": "Client intake",
            "fields": [
                {"id": 1, "type": "date", "label": "Appointment Date"},
                {"id": 2, "type": "phone", "label": "Phone"},
                {"id": 3, "type": "text", "label": "Notes",
                 "conditionalLogic": {"actionType": "show", "rules": [{"fieldId": 1, "operator": "is", "value": "x"}]}},
                {"id": 4, "type": "email", "label": "Email"},
            ]
        })
    }

    #[test]
    fn test_clone_strips_id_and_sets_title() {
        let source = template();
        let clone =
            apply_template_modifications(5, &source, &TemplateModification::new("Intake March")).unwrap();
        assert!(clone.get("id").is_none());
        assert_eq!(clone["title"], "Intake March");
        assert_eq!(clone["fields"], source["fields"]);
        // Retained on purpose.
        assert_eq!(clone["is_template"], true);
    }

    #[test]
    fn test_rename_changes_only_label() {
        let source = template();
        let mods = TemplateModification::new("Intake").rename("Notes", "Comments");
        let clone = apply_template_modifications(5, &source, &mods).unwrap();
        let notes = &clone["fields"][2];
        assert_eq!(notes["label"], "Comments");
        assert_eq!(notes["id"], 3);
        assert_eq!(notes["conditionalLogic"], source["fields"][2]["conditionalLogic"]);
        assert_eq!(clone["fields"][0], source["fields"][0]);
    }

    #[test]
    fn test_renames_apply_in_order() {
        let mods = TemplateModification::new("Intake")
            .rename("Notes", "Details")
            .rename("Details", "More Details");
        let clone = apply_template_modifications(5, &template(), &mods).unwrap();
        assert_eq!(clone["fields"][2]["label"], "More Details");
    }

    #[test]
    fn test_date_to_phone_label_is_dangerous() {
        let source = template();
        let snapshot = source.clone();
        let mods = TemplateModification::new("Intake").rename("Appointment Date", "Mobile Phone");
        let err = apply_template_modifications(5, &source, &mods).unwrap_err();
        match err {
            TemplateError::DangerousRename { from, to, .. } => {
                assert_eq!(from, "date");
                assert_eq!(to, "phone");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source, snapshot);
    }

    #[test]
    fn test_label_of_existing_field_implies_its_category() {
        let mut source = template();
        source["fields"][3]["label"] = json!("Primary Contact");
        let mods = TemplateModification::new("Intake").rename("Phone", "Primary Contact");
        match apply_template_modifications(5, &source, &mods) {
            Err(TemplateError::DangerousRename { to, .. }) => assert_eq!(to, "email"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_same_category_and_neutral_renames_are_safe() {
        let mods = TemplateModification::new("Intake")
            .rename("Appointment Date", "Visit Date")
            .rename("Phone", "Best number to reach you");
        let clone = apply_template_modifications(5, &template(), &mods).unwrap();
        assert_eq!(clone["fields"][0]["label"], "Visit Date");
        assert_eq!(clone["fields"][1]["label"], "Best number to reach you");
    }

    #[test]
    fn test_unknown_label_is_not_found() {
        let mods = TemplateModification::new("Intake").rename("Fax", "Other");
        assert!(matches!(
            apply_template_modifications(5, &template(), &mods),
            Err(TemplateError::FieldNotFound(label)) if label == "Fax"
        ));
    }

    #[test]
    fn test_invalid_structure() {
        let bad = json!({"id": "5", "title": "X-template", "fields": []});
        assert!(matches!(
            apply_template_modifications(5, &bad, &TemplateModification::new("Y")),
            Err(TemplateError::InvalidStructure { id: 5, .. })
        ));
    }

    #[test]
    fn test_blank_title_rejected() {
        assert!(matches!(
            apply_template_modifications(5, &template(), &TemplateModification::new("  ")),
            Err(TemplateError::EmptyTitle)
        ));
    }

    #[tokio::test]
    async fn test_clone_fetches_and_create_posts() {
        let remote = Arc::new(FakeRemote::not_found());
        remote.push("/forms/5", Ok(template()));
        remote.push("/forms", Ok(json!({"id": "31", "title": "Intake March"})));
        let cloner = TemplateCloner::new(remote.clone());

        let created = cloner
            .create_from_template(5, &TemplateModification::new("Intake March"))
            .await
            .unwrap();
        assert_eq!(created["id"], "31");
        let posted = remote.posted_bodies();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].get("id").is_none());
        assert_eq!(posted[0]["fields"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_clone_missing_template() {
        let remote = Arc::new(FakeRemote::not_found());
        let cloner = TemplateCloner::new(remote);
        let err = cloner
            .clone_from_template(99, &TemplateModification::new("X"))
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Remote(RemoteError::NotFound { .. })));
    }
}
