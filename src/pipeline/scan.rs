//! Placeholder scanning: collect every `{{ token }}` in a template.
//!
//! Matching runs on the merged visible text of each paragraph, so a token
//! that Word split across several runs (spell-check marks, a bold fragment)
//! is still found. Table cells are made of paragraphs and are covered by the
//! same walk.

use crate::error::LexPrepError;
use crate::pipeline::docx::{paragraph_texts, DocxPackage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Placeholder grammar: `{{`, optional whitespace, the token, optional
/// whitespace, `}}`. Group 1 is the token.
pub static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\[\]]+)\s*\}\}").unwrap());

/// Distinct tokens in `text`, in order of appearance.
pub fn tokens_in(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    RE_PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| {
            let token = caps[1].to_string();
            seen.insert(token.clone()).then_some(token)
        })
        .collect()
}

/// Scan a DOCX file and return its distinct tokens, sorted.
///
/// # Errors
/// [`LexPrepError::DocumentFormat`] if the file is not a readable DOCX.
/// A document without placeholders yields an empty list.
pub fn scan(path: &Path) -> Result<Vec<String>, LexPrepError> {
    let package = DocxPackage::open(path)?;
    scan_package(&package)
}

/// Scan an already-loaded package.
pub fn scan_package(package: &DocxPackage) -> Result<Vec<String>, LexPrepError> {
    let mut tokens = BTreeSet::new();
    for name in package.text_part_names() {
        let xml = package.part_xml(&name)?;
        for text in paragraph_texts(xml) {
            tokens.extend(
                RE_PLACEHOLDER
                    .captures_iter(&text)
                    .map(|caps| caps[1].to_string()),
            );
        }
    }
    debug!(
        "Found {} distinct placeholders in '{}'",
        tokens.len(),
        package.source_name()
    );
    Ok(tokens.into_iter().collect())
}
