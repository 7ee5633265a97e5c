//! Schema inference: turn scanned tokens into a [`Manifest`].
//!
//! Naming convention: `root[].sub` marks `sub` as a member of the repeated
//! group `root`; any other token is a scalar keyed by the whole token.
//! Scalars come first in first-seen order, then one repeat field per root in
//! first-seen order of the root.

use crate::manifest::{FieldSpec, Manifest};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

/// Marker separating a group root from its member key.
pub const GROUP_MARKER: &str = "[].";

/// Something odd about the token set that inference resolved on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaWarning {
    /// `key` is used both as a scalar and as a group root. The group wins.
    RootCollision { key: String },
    /// `token` carries a `[]` marker but is not `root[].sub`; kept as scalar.
    MalformedGroupToken { token: String },
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaWarning::RootCollision { key } => write!(
                f,
                "'{key}' is used both as a single value and as a repeated group; the repeated group is kept"
            ),
            SchemaWarning::MalformedGroupToken { token } => write!(
                f,
                "'{token}' looks like a repeated-group placeholder but is not of the form root[].field; treated as a single value"
            ),
        }
    }
}

/// Split `root[].sub` at the first marker. `None` for scalar tokens and for
/// tokens with an empty root or member.
pub fn split_group_token(token: &str) -> Option<(&str, &str)> {
    let (root, sub) = token.split_once(GROUP_MARKER)?;
    (!root.is_empty() && !sub.is_empty()).then_some((root, sub))
}

/// Display label for a raw key: drop `[]`, turn `.`/`_` into spaces and
/// title-case each word. `lease_start` → `Lease Start`.
pub fn humanize(raw: &str) -> String {
    raw.replace("[]", "")
        .replace(['.', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Build a manifest from tokens. Warnings are logged.
pub fn infer<S: AsRef<str>>(tokens: &[S], title: &str) -> Manifest {
    let (manifest, warnings) = infer_with_warnings(tokens, title);
    for w in &warnings {
        warn!("{w}");
    }
    manifest
}

/// Build a manifest from tokens and report what was resolved implicitly.
pub fn infer_with_warnings<S: AsRef<str>>(tokens: &[S], title: &str) -> (Manifest, Vec<SchemaWarning>) {
    let mut warnings = Vec::new();
    let mut scalars: Vec<&str> = Vec::new();
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();

    for token in tokens {
        let token = token.as_ref();
        match split_group_token(token) {
            Some((root, sub)) => match groups.iter_mut().find(|(r, _)| *r == root) {
                Some((_, subs)) => {
                    if !subs.contains(&sub) {
                        subs.push(sub);
                    }
                }
                None => groups.push((root, vec![sub])),
            },
            None => {
                if token.contains("[]") {
                    warnings.push(SchemaWarning::MalformedGroupToken {
                        token: token.to_string(),
                    });
                }
                if !scalars.contains(&token) {
                    scalars.push(token);
                }
            }
        }
    }

    let roots: HashSet<&str> = groups.iter().map(|(r, _)| *r).collect();
    let mut fields = Vec::with_capacity(scalars.len() + groups.len());
    for key in scalars {
        if roots.contains(key) {
            warnings.push(SchemaWarning::RootCollision {
                key: key.to_string(),
            });
            continue;
        }
        fields.push(FieldSpec::text(key));
    }
    for (root, subs) in groups {
        fields.push(FieldSpec::repeat(
            root,
            subs.into_iter().map(FieldSpec::text).collect(),
        ));
    }

    let title = if title.trim().is_empty() {
        "Untitled".to_string()
    } else {
        title.trim().to_string()
    };
    (Manifest { title, fields }, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FieldType;

    #[test]
    fn scalar_and_group_classification() {
        let m = infer(&["effective_date", "parties[].role"], "Lease");
        assert_eq!(m.fields.len(), 2);
        assert_eq!(m.fields[0].key, "effective_date");
        assert_eq!(m.fields[0].field_type, FieldType::Text);
        assert_eq!(m.fields[1].key, "parties");
        assert_eq!(m.fields[1].field_type, FieldType::Repeat);
        assert_eq!(m.fields[1].children.len(), 1);
        assert_eq!(m.fields[1].children[0].key, "role");
        assert_eq!(m.fields[1].children[0].label.as_deref(), Some("Role"));
    }

    #[test]
    fn groups_come_after_scalars_in_first_seen_order() {
        let tokens = [
            "b[].x", "a_field", "c[].y", "b[].z", "b[].x", "z_field",
        ];
        let m = infer(&tokens, "T");
        let keys: Vec<&str> = m.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["a_field", "z_field", "b", "c"]);
        let b_children: Vec<&str> = m.fields[2].children.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(b_children, vec!["x", "z"]);
    }

    #[test]
    fn humanize_examples() {
        assert_eq!(humanize("lease_start"), "Lease Start");
        assert_eq!(humanize("role"), "Role");
        assert_eq!(humanize("parties[].role"), "Parties Role");
        assert_eq!(humanize("client.NAME__x"), "Client Name X");
    }

    #[test]
    fn humanize_never_changes_key() {
        let m = infer(&["lease_start"], "T");
        assert_eq!(m.fields[0].key, "lease_start");
        assert_eq!(m.fields[0].label.as_deref(), Some("Lease Start"));
    }

    #[test]
    fn grouped_form_wins_on_collision() {
        let (m, warnings) = infer_with_warnings(&["parties", "parties[].name"], "T");
        assert_eq!(m.fields.len(), 1);
        assert_eq!(m.fields[0].field_type, FieldType::Repeat);
        assert_eq!(
            warnings,
            vec![SchemaWarning::RootCollision {
                key: "parties".into()
            }]
        );
    }

    #[test]
    fn malformed_group_tokens_are_scalars_with_warning() {
        let (m, warnings) = infer_with_warnings(&["[].x", "items[]", "a[]."], "T");
        assert!(m.fields.iter().all(|f| f.field_type == FieldType::Text));
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn split_at_first_marker() {
        assert_eq!(split_group_token("a[].b[].c"), Some(("a", "b[].c")));
        assert_eq!(split_group_token("plain"), None);
        assert_eq!(split_group_token("[].b"), None);
    }

    #[test]
    fn empty_input_yields_empty_fields() {
        let m = infer::<&str>(&[], "");
        assert!(m.fields.is_empty());
        assert_eq!(m.title, "Untitled");
    }

    #[test]
    fn round_trip_scenario_manifest() {
        let m = infer(&["client_name", "matter[].item"], "Engagement");
        assert_eq!(m.fields[0].key, "client_name");
        assert_eq!(m.fields[1].key, "matter");
        assert_eq!(m.fields[1].children[0].key, "item");
        assert!(m.validate().is_ok());
    }
}
