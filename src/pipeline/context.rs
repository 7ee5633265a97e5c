//! Form context builder: rebuild the nested render context from flat form
//! input.
//!
//! The form layer stores every entered value under a hierarchical path
//! (`client_name`, `matter[0].item`) and every repetition count under
//! `<path>::count`. [`build_context`] walks the manifest and reads those paths
//! back into a tree shaped exactly like the manifest.

use crate::error::LexPrepError;
use crate::manifest::{FieldSpec, FieldType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Repetition count used when a group has no `<path>::count` entry.
pub const DEFAULT_REPEAT_COUNT: usize = 1;

/// Suffix addressing a group's repetition count.
pub const COUNT_SUFFIX: &str = "::count";

/// One node of a render context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// A scalar field's raw text.
    Text(String),
    /// One sub-context per repetition of a group.
    Group(Vec<Context>),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(s) => Some(s),
            ContextValue::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&[Context]> {
        match self {
            ContextValue::Group(items) => Some(items),
            ContextValue::Text(_) => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::Text(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::Text(s)
    }
}

impl From<Vec<Context>> for ContextValue {
    fn from(items: Vec<Context>) -> Self {
        ContextValue::Group(items)
    }
}

/// A render context: field key → value. Ordered so serialised cases are stable.
pub type Context = BTreeMap<String, ContextValue>;

/// Read access to the form layer's flat state.
pub trait ValueStore {
    /// Entered text at `path`, if any.
    fn value(&self, path: &str) -> Option<&str>;

    /// Repetition count of the group at `path`, if one was recorded.
    fn count(&self, path: &str) -> Option<usize>;
}

/// In-memory [`ValueStore`]: one flat map holding both values and
/// `<path>::count` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormValues {
    entries: BTreeMap<String, String>,
}

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, path: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(path.into(), value.into());
        self
    }

    pub fn set_count(&mut self, path: &str, count: usize) -> &mut Self {
        self.entries
            .insert(format!("{path}{COUNT_SUFFIX}"), count.to_string());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a flat JSON object of `path → value`. Numbers and booleans are
    /// accepted and kept in their textual form.
    ///
    /// # Errors
    /// [`LexPrepError::Render`] when the JSON is not a flat object of scalars.
    pub fn from_json(json: &str) -> Result<Self, LexPrepError> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)
            .map_err(|e| LexPrepError::render(format!("form values are not a JSON object: {e}")))?;
        let mut values = Self::new();
        for (path, value) in raw {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => continue,
                other => {
                    return Err(LexPrepError::render(format!(
                        "form value '{path}' must be a string, got {other}"
                    )))
                }
            };
            values.entries.insert(path, text);
        }
        Ok(values)
    }
}

impl ValueStore for FormValues {
    fn value(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    fn count(&self, path: &str) -> Option<usize> {
        self.entries
            .get(&format!("{path}{COUNT_SUFFIX}"))
            .and_then(|raw| raw.trim().parse().ok())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ValueStore for BTreeMap<String, String> {
    fn value(&self, path: &str) -> Option<&str> {
        self.get(path).map(String::as_str)
    }

    fn count(&self, path: &str) -> Option<usize> {
        self.get(&format!("{path}{COUNT_SUFFIX}"))
            .and_then(|raw| raw.trim().parse().ok())
    }
}

/// Build the context for `fields` using [`DEFAULT_REPEAT_COUNT`].
pub fn build_context(fields: &[FieldSpec], store: &dyn ValueStore, prefix: Option<&str>) -> Context {
    build_context_with_default(fields, store, prefix, DEFAULT_REPEAT_COUNT)
}

/// Build the context for `fields`, reading values under `prefix`.
///
/// Absent values become empty strings; absent counts become `default_count`.
/// An explicit count of `0` yields an empty group.
pub fn build_context_with_default(
    fields: &[FieldSpec],
    store: &dyn ValueStore,
    prefix: Option<&str>,
    default_count: usize,
) -> Context {
    let mut ctx = Context::new();
    for field in fields {
        let path = match prefix {
            Some(p) if !p.is_empty() => format!("{p}.{}", field.key),
            _ => field.key.clone(),
        };
        let value = match field.field_type {
            FieldType::Repeat => {
                let count = store.count(&path).unwrap_or(default_count);
                ContextValue::Group(
                    (0..count)
                        .map(|i| {
                            let item_path = format!("{path}[{i}]");
                            build_context_with_default(&field.children, store, Some(&item_path), default_count)
                        })
                        .collect(),
                )
            }
            FieldType::Text | FieldType::Textarea => {
                ContextValue::Text(store.value(&path).unwrap_or_default().to_string())
            }
        };
        ctx.insert(field.key.clone(), value);
    }
    ctx
}

/// Check that `ctx` has exactly the keys and nesting of `fields`.
///
/// # Errors
/// [`LexPrepError::Render`] naming the first offending path.
pub fn validate_context(fields: &[FieldSpec], ctx: &Context) -> Result<(), LexPrepError> {
    validate_level(fields, ctx, "")
}

fn validate_level(fields: &[FieldSpec], ctx: &Context, parent: &str) -> Result<(), LexPrepError> {
    let join = |key: &str| {
        if parent.is_empty() {
            key.to_string()
        } else {
            format!("{parent}.{key}")
        }
    };

    for field in fields {
        let path = join(&field.key);
        let value = ctx
            .get(&field.key)
            .ok_or_else(|| LexPrepError::render(format!("context is missing '{path}'")))?;
        match (field.field_type, value) {
            (FieldType::Repeat, ContextValue::Group(items)) => {
                for (i, item) in items.iter().enumerate() {
                    validate_level(&field.children, item, &format!("{path}[{i}]"))?;
                }
            }
            (FieldType::Repeat, ContextValue::Text(_)) => {
                return Err(LexPrepError::render(format!(
                    "'{path}' is a repeated group but the context holds a single value"
                )));
            }
            (_, ContextValue::Group(_)) => {
                return Err(LexPrepError::render(format!(
                    "'{path}' is a single value but the context holds a list"
                )));
            }
            (_, ContextValue::Text(_)) => {}
        }
    }

    if let Some(extra) = ctx.keys().find(|k| !fields.iter().any(|f| &f.key == *k)) {
        return Err(LexPrepError::render(format!(
            "context has '{}' which the manifest does not declare",
            join(extra)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::infer::infer;

    fn matter_fields() -> Vec<FieldSpec> {
        infer(&["client_name", "matter[].item"], "Engagement").fields
    }

    #[test]
    fn round_trip_scenario_context() {
        let mut form = FormValues::new();
        form.set_value("client_name", "Acme")
            .set_count("matter", 2)
            .set_value("matter[0].item", "Claim A")
            .set_value("matter[1].item", "Claim B");

        let ctx = build_context(&matter_fields(), &form, None);
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "client_name": "Acme",
                "matter": [{"item": "Claim A"}, {"item": "Claim B"}]
            })
        );
    }

    #[test]
    fn absent_values_default_to_empty_and_one_repetition() {
        let ctx = build_context(&matter_fields(), &FormValues::new(), None);
        assert_eq!(ctx["client_name"], ContextValue::Text(String::new()));
        let items = ctx["matter"].as_group().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["item"].as_text(), Some(""));
    }

    #[test]
    fn zero_count_yields_empty_group() {
        let mut form = FormValues::new();
        form.set_count("matter", 0);
        let ctx = build_context(&matter_fields(), &form, None);
        assert!(ctx["matter"].as_group().unwrap().is_empty());
    }

    #[test]
    fn count_three_addresses_each_item() {
        let mut form = FormValues::new();
        form.set_count("matter", 3);
        for i in 0..3 {
            form.set_value(format!("matter[{i}].item"), format!("v{i}"));
        }
        let ctx = build_context(&matter_fields(), &form, None);
        let items = ctx["matter"].as_group().unwrap();
        let texts: Vec<&str> = items.iter().map(|c| c["item"].as_text().unwrap()).collect();
        assert_eq!(texts, vec!["v0", "v1", "v2"]);
    }

    #[test]
    fn prefix_is_joined_with_dot() {
        let fields = vec![FieldSpec::text("name")];
        let form: FormValues = [("party.name", "Ada")].into_iter().collect();
        let ctx = build_context(&fields, &form, Some("party"));
        assert_eq!(ctx["name"].as_text(), Some("Ada"));
    }

    #[test]
    fn nested_groups_build_nested_paths() {
        let fields = vec![FieldSpec::repeat(
            "parties",
            vec![
                FieldSpec::text("name"),
                FieldSpec::repeat("addresses", vec![FieldSpec::text("line")]),
            ],
        )];
        let form: FormValues = [
            ("parties::count", "1"),
            ("parties[0].name", "Ada"),
            ("parties[0].addresses::count", "2"),
            ("parties[0].addresses[1].line", "Second St"),
        ]
        .into_iter()
        .collect();
        let ctx = build_context(&fields, &form, None);
        let party = &ctx["parties"].as_group().unwrap()[0];
        let addresses = party["addresses"].as_group().unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0]["line"].as_text(), Some(""));
        assert_eq!(addresses[1]["line"].as_text(), Some("Second St"));
        assert!(validate_context(&fields, &ctx).is_ok());
    }

    #[test]
    fn built_context_always_validates() {
        let fields = matter_fields();
        for count in [0, 1, 5] {
            let mut form = FormValues::new();
            form.set_count("matter", count);
            let ctx = build_context(&fields, &form, None);
            assert!(validate_context(&fields, &ctx).is_ok());
        }
    }

    #[test]
    fn unparseable_count_uses_default() {
        let form: FormValues = [("matter::count", "many")].into_iter().collect();
        let ctx = build_context_with_default(&matter_fields(), &form, None, 2);
        assert_eq!(ctx["matter"].as_group().unwrap().len(), 2);
    }

    #[test]
    fn validation_rejects_shape_mismatches() {
        let fields = matter_fields();
        let ctx: Context = serde_json::from_str(r#"{"client_name":"A","matter":"oops"}"#).unwrap();
        assert!(matches!(validate_context(&fields, &ctx), Err(LexPrepError::Render { .. })));

        let ctx: Context = serde_json::from_str(r#"{"client_name":[],"matter":[]}"#).unwrap();
        assert!(validate_context(&fields, &ctx).is_err());

        let ctx: Context = serde_json::from_str(r#"{"matter":[]}"#).unwrap();
        let err = validate_context(&fields, &ctx).unwrap_err();
        assert!(err.to_string().contains("client_name"));

        let ctx: Context =
            serde_json::from_str(r#"{"client_name":"A","matter":[{"item":"x","extra":"y"}]}"#).unwrap();
        let err = validate_context(&fields, &ctx).unwrap_err();
        assert!(err.to_string().contains("matter[0].extra"));
    }

    #[test]
    fn form_values_from_flat_json() {
        let form = FormValues::from_json(r#"{"a":"x","n":3,"matter::count":"2","skip":null}"#).unwrap();
        assert_eq!(form.value("a"), Some("x"));
        assert_eq!(form.value("n"), Some("3"));
        assert_eq!(form.count("matter"), Some(2));
        assert_eq!(form.value("skip"), None);
        assert!(FormValues::from_json(r#"{"a":{"b":1}}"#).is_err());
        assert!(FormValues::from_json("[]").is_err());
    }
}
