//! Declarative field schema ("manifest") derived from a template's placeholders.
//!
//! The JSON shape is the one persisted with every template and shown to users
//! for editing:
//!
//! ```json
//! { "title": "Lease",
//!   "fields": [
//!     { "key": "tenant_name", "label": "Tenant Name", "type": "text" },
//!     { "key": "parties", "type": "repeat",
//!       "fields": [ { "key": "role", "label": "Role", "type": "text" } ] } ] }
//! ```
//!
//! A `repeat` field's `fields` describe **one** repetition; how many
//! repetitions a case has is decided when the form is filled.

use crate::error::LexPrepError;
use crate::pipeline::infer::humanize;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Kind of a manifest field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Single-line scalar value.
    Text,
    /// Multi-line scalar value. Rendered exactly like `Text`.
    Textarea,
    /// Variable-length list of sub-records shaped by the field's children.
    Repeat,
}

impl FieldType {
    /// `true` for every kind that maps to a single string in the context.
    pub fn is_scalar(self) -> bool {
        !matches!(self, FieldType::Repeat)
    }
}

/// One schema entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Shape of one repetition. Only populated for [`FieldType::Repeat`].
    #[serde(default, rename = "fields", skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldSpec>,
}

impl FieldSpec {
    /// A scalar text field labelled with the humanized key.
    pub fn text(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: Some(humanize(&key)),
            key,
            field_type: FieldType::Text,
            children: Vec::new(),
        }
    }

    /// A repeated group with the given per-repetition children.
    pub fn repeat(key: impl Into<String>, children: Vec<FieldSpec>) -> Self {
        Self {
            key: key.into(),
            label: None,
            field_type: FieldType::Repeat,
            children,
        }
    }

    /// Label to show in a form; falls back to the humanized key.
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| humanize(&self.key))
    }
}

/// Field schema of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub title: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl Manifest {
    /// Parse and validate manifest JSON.
    ///
    /// # Errors
    /// [`LexPrepError::ManifestValidation`] when the JSON is malformed or the
    /// schema breaks one of the rules checked by [`Manifest::validate`].
    pub fn from_json(json: &str) -> Result<Self, LexPrepError> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|e| LexPrepError::ManifestValidation(format!("not valid manifest JSON: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Serialise to the pretty-printed JSON users edit.
    pub fn to_json_pretty(&self) -> Result<String, LexPrepError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LexPrepError::Internal(format!("manifest serialisation: {e}")))
    }

    /// Check structural rules:
    /// - the title is not blank
    /// - keys are non-empty and unique among siblings
    /// - `repeat` fields have at least one child; scalar fields have none
    pub fn validate(&self) -> Result<(), LexPrepError> {
        if self.title.trim().is_empty() {
            return Err(LexPrepError::ManifestValidation(
                "title must not be empty".into(),
            ));
        }
        validate_fields(&self.fields, "")
    }

    /// Number of fields at every nesting level.
    pub fn field_count(&self) -> usize {
        fn count(fields: &[FieldSpec]) -> usize {
            fields.iter().map(|f| 1 + count(&f.children)).sum()
        }
        count(&self.fields)
    }
}

fn validate_fields(fields: &[FieldSpec], parent: &str) -> Result<(), LexPrepError> {
    let mut seen = HashSet::new();
    for field in fields {
        let path = if parent.is_empty() {
            field.key.clone()
        } else {
            format!("{parent}.{}", field.key)
        };

        if field.key.trim().is_empty() {
            return Err(LexPrepError::ManifestValidation(format!(
                "empty key under '{}'",
                if parent.is_empty() { "<root>" } else { parent }
            )));
        }
        if !seen.insert(field.key.as_str()) {
            return Err(LexPrepError::ManifestValidation(format!(
                "duplicate key '{path}'"
            )));
        }

        match field.field_type {
            FieldType::Repeat if field.children.is_empty() => {
                return Err(LexPrepError::ManifestValidation(format!(
                    "repeat field '{path}' needs at least one entry in \"fields\""
                )));
            }
            FieldType::Repeat => validate_fields(&field.children, &path)?,
            _ if !field.children.is_empty() => {
                return Err(LexPrepError::ManifestValidation(format!(
                    "scalar field '{path}' must not declare \"fields\""
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_shape() {
        let json = r#"{
            "title": "Lease",
            "fields": [
                {"key": "tenant_name", "label": "Tenant Name", "type": "text"},
                {"key": "parties", "type": "repeat",
                 "fields": [{"key": "role", "label": "Role", "type": "text"}]}
            ]
        }"#;
        let m = Manifest::from_json(json).unwrap();
        assert_eq!(m.fields.len(), 2);
        assert_eq!(m.fields[1].field_type, FieldType::Repeat);
        assert_eq!(m.fields[1].children[0].key, "role");
        assert_eq!(m.field_count(), 3);
    }

    #[test]
    fn serialises_without_empty_children_or_label() {
        let m = Manifest {
            title: "T".into(),
            fields: vec![
                FieldSpec::text("client_name"),
                FieldSpec::repeat("matter", vec![FieldSpec::text("item")]),
            ],
        };
        let value: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["fields"][0]["type"], "text");
        assert!(value["fields"][0].get("fields").is_none());
        assert_eq!(value["fields"][1]["type"], "repeat");
        assert!(value["fields"][1].get("label").is_none());
        assert_eq!(value["fields"][1]["fields"][0]["label"], "Item");
    }

    #[test]
    fn textarea_is_scalar() {
        let m = Manifest::from_json(
            r#"{"title":"x","fields":[{"key":"notes","type":"textarea"}]}"#,
        )
        .unwrap();
        assert!(m.fields[0].field_type.is_scalar());
        assert_eq!(m.fields[0].display_label(), "Notes");
    }

    #[test]
    fn rejects_duplicate_sibling_keys() {
        let err = Manifest::from_json(
            r#"{"title":"x","fields":[{"key":"a","type":"text"},{"key":"a","type":"text"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, LexPrepError::ManifestValidation(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn same_key_in_different_groups_is_fine() {
        let json = r#"{"title":"x","fields":[
            {"key":"a","type":"repeat","fields":[{"key":"name","type":"text"}]},
            {"key":"b","type":"repeat","fields":[{"key":"name","type":"text"}]}]}"#;
        assert!(Manifest::from_json(json).is_ok());
    }

    #[test]
    fn rejects_repeat_without_children() {
        let err = Manifest::from_json(r#"{"title":"x","fields":[{"key":"a","type":"repeat"}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn rejects_scalar_with_children() {
        let json = r#"{"title":"x","fields":[{"key":"a","type":"text",
            "fields":[{"key":"b","type":"text"}]}]}"#;
        assert!(Manifest::from_json(json).is_err());
    }

    #[test]
    fn rejects_unknown_type_and_bad_json() {
        assert!(Manifest::from_json(r#"{"title":"x","fields":[{"key":"a","type":"date"}]}"#).is_err());
        assert!(Manifest::from_json("{not json").is_err());
    }

    #[test]
    fn rejects_blank_title_and_key() {
        assert!(Manifest::from_json(r#"{"title":"  ","fields":[]}"#).is_err());
        assert!(Manifest::from_json(r#"{"title":"x","fields":[{"key":"","type":"text"}]}"#).is_err());
    }
}
