//! Template renderer: substitute a [`Context`] into a DOCX template.
//!
//! Each text part is rendered in one left-to-right walk, so text coming from
//! the context is never scanned for placeholders again.
//!
//! ## Repeated groups
//!
//! A table row whose placeholders reference exactly one group root is
//! emitted once per repetition of that group. Outside table rows, a maximal
//! run of adjacent paragraphs (separated only by whitespace) whose
//! placeholders reference the same single root is emitted once per
//! repetition as a block. Inside a repetition, `root[].sub` resolves against
//! that repetition and plain tokens resolve against the top level.
//!
//! Only a row's own cells decide whether it repeats. A table nested in a
//! cell travels with every copy of the row, and its rows are rendered the
//! same way in the copy's scope. Paragraphs inside text boxes are filled
//! together with the paragraph that anchors them.
//!
//! ## Run handling
//!
//! Placeholders are matched on a paragraph's merged text. A placeholder that
//! fits in one `<w:t>` keeps its run's formatting; one split across runs is
//! written into the run where it starts and the spanned runs lose the
//! consumed text.

use crate::error::LexPrepError;
use crate::pipeline::context::{Context, ContextValue};
use crate::pipeline::docx::{
    all_paragraphs, element_content, nested_paragraphs, outer_elements, paragraph_text, paragraph_texts, text_element,
    text_runs, DocxPackage, Element,
};
use crate::pipeline::infer::split_group_token;
use crate::pipeline::scan::{tokens_in, RE_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What to write for a placeholder with no context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPlaceholder {
    /// Leave `{{ token }}` in the output so the gap is visible.
    #[default]
    KeepToken,
    /// Replace the placeholder with nothing.
    Blank,
}

impl fmt::Display for MissingPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingPlaceholder::KeepToken => write!(f, "keep-token"),
            MissingPlaceholder::Blank => write!(f, "blank"),
        }
    }
}

/// Render `template` with `ctx` into `output`.
///
/// The package is written to a temporary file in the output directory and
/// moved into place only when complete; on any failure nothing is left at
/// `output`.
///
/// # Errors
/// - [`LexPrepError::Render`] if the template cannot be read or its
///   placeholders do not fit the context's shape
/// - [`LexPrepError::OutputWriteFailed`] if the output cannot be written
pub fn render_to(
    template: &Path,
    ctx: &Context,
    output: &Path,
    policy: MissingPlaceholder,
) -> Result<(), LexPrepError> {
    let mut package = DocxPackage::open(template)
        .map_err(|e| LexPrepError::render(format!("cannot read template: {e}")))?;

    for name in package.text_part_names() {
        let rendered = {
            let xml = package
                .part_xml(&name)
                .map_err(|e| LexPrepError::render(format!("cannot read template: {e}")))?;
            render_part(xml, ctx, policy)?
        };
        package.set_part_xml(&name, rendered);
    }

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let write_err = |source: std::io::Error| LexPrepError::OutputWriteFailed {
        path: output.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    package
        .write_to(tmp.as_file_mut())
        .map_err(|e| write_err(std::io::Error::other(e.to_string())))?;
    // Dropping `tmp` on an early return deletes the partial file.
    tmp.persist(output).map_err(|e| write_err(e.error))?;

    info!("Rendered '{}' → '{}'", template.display(), output.display());
    Ok(())
}

/// Render `template` into `<output_dir>/<uuid>.docx` and return that path.
pub fn render(
    template: &Path,
    ctx: &Context,
    output_dir: &Path,
    policy: MissingPlaceholder,
) -> Result<PathBuf, LexPrepError> {
    let output = output_dir.join(format!("{}.docx", uuid::Uuid::new_v4()));
    render_to(template, ctx, &output, policy)?;
    Ok(output)
}

/// Render one WordprocessingML part.
pub fn render_part(xml: &str, ctx: &Context, policy: MissingPlaceholder) -> Result<String, LexPrepError> {
    render_block(xml, &Scope::top(ctx), policy)
}

/// Render a stretch of XML: its outermost table rows and the paragraphs
/// between them.
fn render_block(xml: &str, scope: &Scope<'_>, policy: MissingPlaceholder) -> Result<String, LexPrepError> {
    // A row inside a text box belongs to its paragraph.
    let paragraphs = outer_elements(xml, Element::Paragraph);
    let rows: Vec<Range<usize>> = outer_elements(xml, Element::TableRow)
        .into_iter()
        .filter(|row| !paragraphs.iter().any(|p| p.start < row.start && row.end <= p.end))
        .collect();

    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for row in rows {
        out.push_str(&render_paragraphs(&xml[cursor..row.start], scope, policy)?);
        out.push_str(&render_row(&xml[row.clone()], scope, policy)?);
        cursor = row.end;
    }
    out.push_str(&render_paragraphs(&xml[cursor..], scope, policy)?);
    Ok(out)
}

/// Render one table row, emitting it once per item when its own cells
/// reference a group. Rows of tables nested in its cells are rendered in
/// the scope of each emitted copy.
fn render_row(row_xml: &str, scope: &Scope<'_>, policy: MissingPlaceholder) -> Result<String, LexPrepError> {
    let content = element_content(row_xml);
    let root = single_root(&own_row_text(&row_xml[content.clone()]), "table row")?;

    if let Some(root) = root.as_deref().filter(|r| !scope.is_current(r)) {
        if let Some(items) = scope.group(root)? {
            debug!("Expanding table row for '{}' x{}", root, items.len());
            return items
                .iter()
                .map(|item| render_row_once(row_xml, &content, &scope.with_item(root, item), policy))
                .collect();
        }
    }
    render_row_once(row_xml, &content, scope, policy)
}

fn render_row_once(
    row_xml: &str,
    content: &Range<usize>,
    scope: &Scope<'_>,
    policy: MissingPlaceholder,
) -> Result<String, LexPrepError> {
    Ok(format!(
        "{}{}{}",
        &row_xml[..content.start],
        render_block(&row_xml[content.clone()], scope, policy)?,
        &row_xml[content.end..]
    ))
}

/// Text of the paragraphs that belong to a row itself, leaving out rows of
/// tables nested in its cells.
fn own_row_text(row_content: &str) -> String {
    let nested = outer_elements(row_content, Element::TableRow);
    all_paragraphs(row_content)
        .into_iter()
        .filter(|p| !nested.iter().any(|r| r.start <= p.start && p.end <= r.end))
        .map(|p| paragraph_text(&row_content[p]))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the paragraphs of a stretch of XML that holds no table rows of
/// its own.
fn render_paragraphs(segment: &str, scope: &Scope<'_>, policy: MissingPlaceholder) -> Result<String, LexPrepError> {
    let mut paras: Vec<(Range<usize>, Option<String>)> = Vec::new();
    for range in outer_elements(segment, Element::Paragraph) {
        let text = paragraph_texts(&segment[range.clone()]).join("\n");
        let root = match single_root(&text, "paragraph")? {
            Some(root) if !scope.is_current(&root) && scope.group(&root)?.is_some() => Some(root),
            _ => None,
        };
        paras.push((range, root));
    }

    let mut out = String::with_capacity(segment.len());
    let mut cursor = 0;
    let mut i = 0;
    while i < paras.len() {
        let (range, root) = &paras[i];
        out.push_str(&segment[cursor..range.start]);

        let Some(root) = root else {
            out.push_str(&fill_paragraph(&segment[range.clone()], scope, policy)?);
            cursor = range.end;
            i += 1;
            continue;
        };

        let mut j = i;
        while j + 1 < paras.len()
            && paras[j + 1].1.as_deref() == Some(root.as_str())
            && segment[paras[j].0.end..paras[j + 1].0.start].trim().is_empty()
        {
            j += 1;
        }
        let block = &segment[range.start..paras[j].0.end];
        if let Some(items) = scope.group(root)? {
            debug!(
                "Expanding {} paragraph(s) for '{}' x{}",
                j - i + 1,
                root,
                items.len()
            );
            for item in items {
                out.push_str(&render_paragraphs(block, &scope.with_item(root, item), policy)?);
            }
        }
        cursor = paras[j].0.end;
        i = j + 1;
    }
    out.push_str(&segment[cursor..]);
    Ok(out)
}

/// The one group root referenced by `text`, if any.
fn single_root(text: &str, unit: &str) -> Result<Option<String>, LexPrepError> {
    let roots: BTreeSet<String> = tokens_in(text)
        .iter()
        .filter_map(|t| split_group_token(t).map(|(root, _)| root.to_string()))
        .collect();
    if roots.len() > 1 {
        let names: Vec<&str> = roots.iter().map(String::as_str).collect();
        return Err(LexPrepError::render(format!(
            "a {unit} mixes repeated groups {}; put each group in its own {unit}",
            names.join(", ")
        )));
    }
    Ok(roots.into_iter().next())
}

fn scalar_used_as_group(root: &str) -> LexPrepError {
    LexPrepError::render(format!(
        "'{root}' holds a single value but the template repeats it as a group"
    ))
}

/// How a placeholder resolves in a given scope.
enum Resolution<'a> {
    Value(&'a str),
    Missing,
}

/// Lookup scope: the top-level context plus, inside a repetition, the
/// current item of one group.
#[derive(Clone, Copy)]
struct Scope<'a> {
    top: &'a Context,
    item: Option<(&'a str, &'a Context)>,
}

impl<'a> Scope<'a> {
    fn top(ctx: &'a Context) -> Self {
        Self { top: ctx, item: None }
    }

    fn with_item<'b>(&self, root: &'b str, item: &'b Context) -> Scope<'b>
    where
        'a: 'b,
    {
        Scope {
            top: self.top,
            item: Some((root, item)),
        }
    }

    /// Whether this scope is already inside a repetition of `root`.
    fn is_current(&self, root: &str) -> bool {
        self.item.is_some_and(|(group, _)| group == root)
    }

    /// Items of the top-level group `root`; `None` when the context lacks it.
    fn group(&self, root: &str) -> Result<Option<&'a [Context]>, LexPrepError> {
        match self.top.get(root) {
            Some(ContextValue::Group(items)) => Ok(Some(items)),
            Some(ContextValue::Text(_)) => Err(scalar_used_as_group(root)),
            None => Ok(None),
        }
    }

    fn resolve(&self, token: &str) -> Result<Resolution<'a>, LexPrepError> {
        let Some((root, sub)) = split_group_token(token) else {
            return match self.top.get(token) {
                Some(ContextValue::Text(s)) => Ok(Resolution::Value(s)),
                Some(ContextValue::Group(_)) => Err(LexPrepError::render(format!(
                    "'{token}' is a repeated group but the template uses it as a single value"
                ))),
                None => Ok(Resolution::Missing),
            };
        };

        if let Some((group, item)) = self.item {
            if group == root {
                return match item.get(sub) {
                    Some(ContextValue::Text(s)) => Ok(Resolution::Value(s)),
                    Some(ContextValue::Group(_)) => Err(LexPrepError::render(format!(
                        "'{token}' refers to a nested group but the template uses it as a single value"
                    ))),
                    None => Ok(Resolution::Missing),
                };
            }
        }

        match self.group(root)? {
            None => Ok(Resolution::Missing),
            Some(_) => Err(LexPrepError::render(format!(
                "'{token}' is outside any table row or paragraph that repeats '{root}'"
            ))),
        }
    }
}

/// Substitute the placeholders of one paragraph and of any text-box
/// paragraphs nested in it.
fn fill_paragraph(para: &str, scope: &Scope<'_>, policy: MissingPlaceholder) -> Result<String, LexPrepError> {
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    for nested in nested_paragraphs(para) {
        let filled = fill_paragraph(&para[nested.clone()], scope, policy)?;
        if filled != para[nested.clone()] {
            edits.push((nested, filled));
        }
    }
    edits.extend(fill_runs(para, scope, policy)?);
    if edits.is_empty() {
        return Ok(para.to_string());
    }
    edits.sort_by_key(|(range, _)| range.start);

    let mut out = String::with_capacity(para.len());
    let mut cursor = 0;
    for (range, text) in &edits {
        out.push_str(&para[cursor..range.start]);
        out.push_str(text);
        cursor = range.end;
    }
    out.push_str(&para[cursor..]);
    Ok(out)
}

/// Replacement `<w:t>` elements for the paragraph's own runs that change.
fn fill_runs(
    para: &str,
    scope: &Scope<'_>,
    policy: MissingPlaceholder,
) -> Result<Vec<(Range<usize>, String)>, LexPrepError> {
    let runs = text_runs(para);
    if runs.is_empty() {
        return Ok(Vec::new());
    }

    let mut starts = Vec::with_capacity(runs.len());
    let mut merged = String::new();
    for run in &runs {
        starts.push(merged.len());
        merged.push_str(&run.text);
    }

    let mut replacements: Vec<(Range<usize>, &str)> = Vec::new();
    for caps in RE_PLACEHOLDER.captures_iter(&merged) {
        let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = match scope.resolve(token.as_str())? {
            Resolution::Value(v) => v,
            Resolution::Missing => match policy {
                MissingPlaceholder::KeepToken => continue,
                MissingPlaceholder::Blank => "",
            },
        };
        replacements.push((whole.range(), value));
    }
    if replacements.is_empty() {
        return Ok(Vec::new());
    }

    let run_of = |offset: usize| {
        runs.iter()
            .enumerate()
            .position(|(k, r)| offset < starts[k] + r.text.len())
            .unwrap_or(runs.len() - 1)
    };

    let mut texts: Vec<String> = runs.iter().map(|r| r.text.clone()).collect();
    // Right to left so earlier offsets stay valid.
    for (range, value) in replacements.iter().rev() {
        let first = run_of(range.start);
        let last = run_of(range.end - 1);
        if first == last {
            let base = starts[first];
            texts[first].replace_range(range.start - base..range.end - base, value);
        } else {
            texts[first].replace_range(range.start - starts[first].., value);
            for text in texts.iter_mut().take(last).skip(first + 1) {
                text.clear();
            }
            texts[last].replace_range(..range.end - starts[last], "");
        }
    }

    Ok(runs
        .iter()
        .zip(&texts)
        .filter(|(run, text)| **text != run.text)
        .map(|(run, text)| (run.element.clone(), text_element(text)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::docx::tests::{document_xml, package, para};
    use crate::pipeline::docx::{paragraph_texts, DOCUMENT_PART};

    fn ctx(json: &str) -> Context {
        serde_json::from_str(json).unwrap()
    }

    fn texts(xml: &str) -> Vec<String> {
        paragraph_texts(xml)
    }

    fn row(cells: &[&str]) -> String {
        let cells: String = cells
            .iter()
            .map(|c| format!("<w:tc>{}</w:tc>", para(c)))
            .collect();
        format!("<w:tr>{cells}</w:tr>")
    }

    #[test]
    fn substitutes_scalars_and_escapes() {
        let xml = para("Client: {{ client_name }}");
        let out = render_part(&xml, &ctx(r#"{"client_name":"Smith & <Sons>"}"#), MissingPlaceholder::KeepToken)
            .unwrap();
        assert!(out.contains("Smith &amp; &lt;Sons&gt;"));
        assert_eq!(texts(&out), vec!["Client: Smith & <Sons>"]);
    }

    #[test]
    fn missing_policy_keep_and_blank() {
        let xml = para("A {{x}} B");
        let keep = render_part(&xml, &Context::new(), MissingPlaceholder::KeepToken).unwrap();
        assert_eq!(texts(&keep), vec!["A {{x}} B"]);
        let blank = render_part(&xml, &Context::new(), MissingPlaceholder::Blank).unwrap();
        assert_eq!(texts(&blank), vec!["A  B"]);
    }

    #[test]
    fn expands_table_row_per_item() {
        let xml = format!(
            "<w:tbl>{}{}</w:tbl>",
            row(&["Item", "Client"]),
            row(&["{{matter[].item}}", "{{client_name}}"])
        );
        let c = ctx(r#"{"client_name":"Acme","matter":[{"item":"Claim A"},{"item":"Claim B"}]}"#);
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        assert_eq!(
            texts(&out),
            vec!["Item", "Client", "Claim A", "Acme", "Claim B", "Acme"]
        );
    }

    #[test]
    fn empty_group_removes_row() {
        let xml = format!("<w:tbl>{}</w:tbl>", row(&["{{matter[].item}}"]));
        let out = render_part(&xml, &ctx(r#"{"matter":[]}"#), MissingPlaceholder::KeepToken).unwrap();
        assert!(!out.contains("<w:tr>"));
        assert_eq!(out, "<w:tbl></w:tbl>");
    }

    #[test]
    fn expands_adjacent_paragraph_block() {
        let xml = format!(
            "{}{}\n{}{}",
            para("Parties:"),
            para("Name: {{parties[].name}}"),
            para("Role: {{parties[].role}}"),
            para("End {{date}}")
        );
        let c = ctx(
            r#"{"date":"today","parties":[{"name":"Ada","role":"Buyer"},{"name":"Bob","role":"Seller"}]}"#,
        );
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        assert_eq!(
            texts(&out),
            vec![
                "Parties:",
                "Name: Ada",
                "Role: Buyer",
                "Name: Bob",
                "Role: Seller",
                "End today"
            ]
        );
    }

    #[test]
    fn mixed_roots_in_row_is_render_error() {
        let xml = row(&["{{a[].x}}", "{{b[].y}}"]);
        let err = render_part(&xml, &ctx(r#"{"a":[],"b":[]}"#), MissingPlaceholder::KeepToken).unwrap_err();
        assert!(matches!(err, LexPrepError::Render { .. }));
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn scalar_where_group_expected_is_render_error() {
        let xml = para("{{parties[].name}}");
        let err = render_part(&xml, &ctx(r#"{"parties":"oops"}"#), MissingPlaceholder::KeepToken).unwrap_err();
        assert!(matches!(err, LexPrepError::Render { .. }));

        let xml = para("{{parties}}");
        let err = render_part(&xml, &ctx(r#"{"parties":[]}"#), MissingPlaceholder::KeepToken).unwrap_err();
        assert!(err.to_string().contains("single value"));
    }

    #[test]
    fn token_split_across_runs_is_replaced() {
        let xml = "<w:p><w:r><w:t>Dear {{ cli</w:t></w:r><w:r><w:rPr><w:b/></w:rPr>\
<w:t>ent_na</w:t></w:r><w:r><w:t>me }},</w:t></w:r></w:p>";
        let out = render_part(xml, &ctx(r#"{"client_name":"Ada"}"#), MissingPlaceholder::KeepToken).unwrap();
        assert_eq!(texts(&out), vec!["Dear Ada,"]);
        assert!(out.contains("<w:rPr><w:b/></w:rPr>"));
    }

    #[test]
    fn tokens_within_runs_keep_run_formatting() {
        let xml = "<w:p><w:r><w:rPr><w:i/></w:rPr><w:t>{{a}}</w:t></w:r>\
<w:r><w:t xml:space=\"preserve\"> and {{b}}</w:t></w:r></w:p>";
        let out = render_part(xml, &ctx(r#"{"a":"1","b":"2"}"#), MissingPlaceholder::KeepToken).unwrap();
        assert!(out.contains("<w:rPr><w:i/></w:rPr><w:t xml:space=\"preserve\">1</w:t>"));
        assert_eq!(texts(&out), vec!["1 and 2"]);
    }

    #[test]
    fn values_are_not_rescanned() {
        let xml = para("{{a}} {{b}}");
        let out = render_part(&xml, &ctx(r#"{"a":"{{b}}","b":"x"}"#), MissingPlaceholder::KeepToken).unwrap();
        assert_eq!(texts(&out), vec!["{{b}} x"]);
    }

    #[test]
    fn newlines_become_breaks() {
        let xml = para("{{notes}}");
        let out = render_part(&xml, &ctx(r#"{"notes":"line one\nline two"}"#), MissingPlaceholder::KeepToken)
            .unwrap();
        assert!(out.contains("<w:br/>"));
    }

    fn nested_table(text: &str) -> String {
        format!("<w:tbl>{}</w:tbl>", row(&[text]))
    }

    fn balanced(out: &str) {
        assert_eq!(out.matches("<w:tr>").count(), out.matches("</w:tr>").count(), "{out}");
        assert_eq!(out.matches("<w:tbl>").count(), out.matches("</w:tbl>").count(), "{out}");
    }

    #[test]
    fn row_with_token_before_nested_table_repeats_whole() {
        let xml = format!(
            "<w:tbl><w:tr><w:tc>{}{}</w:tc></w:tr></w:tbl>",
            para("{{items[].x}}"),
            nested_table("Inner")
        );
        let c = ctx(r#"{"items":[{"x":"A"},{"x":"B"}]}"#);
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        balanced(&out);
        assert_eq!(out.matches("<w:tr>").count(), 4);
        assert_eq!(texts(&out), vec!["A", "Inner", "B", "Inner"]);
    }

    #[test]
    fn row_with_token_after_nested_table_repeats_whole() {
        let xml = format!(
            "<w:tbl><w:tr><w:tc>{}<w:p/></w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
            nested_table("Inner"),
            para("{{items[].x}}")
        );
        let c = ctx(r#"{"items":[{"x":"A"},{"x":"B"}]}"#);
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        balanced(&out);
        assert_eq!(texts(&out), vec!["Inner", "", "A", "Inner", "", "B"]);
    }

    #[test]
    fn repeating_row_of_nested_table_expands_inside_its_cell() {
        let xml = format!(
            "<w:tbl><w:tr><w:tc>{}{}</w:tc></w:tr></w:tbl>",
            para("Parties of {{deal}}"),
            nested_table("{{parties[].name}}")
        );
        let c = ctx(r#"{"deal":"Sale","parties":[{"name":"Ada"},{"name":"Bob"}]}"#);
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        balanced(&out);
        assert_eq!(out.matches("<w:tr>").count(), 3);
        assert_eq!(texts(&out), vec!["Parties of Sale", "Ada", "Bob"]);
    }

    #[test]
    fn nested_table_inside_repeated_row_sees_the_item() {
        let xml = format!(
            "<w:tbl><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
            para("{{items[].x}}"),
            nested_table("Detail {{items[].y}}")
        );
        let c = ctx(r#"{"items":[{"x":"A","y":"1"},{"x":"B","y":"2"}]}"#);
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        balanced(&out);
        assert_eq!(texts(&out), vec!["A", "Detail 1", "B", "Detail 2"]);
    }

    #[test]
    fn text_box_paragraphs_are_filled() {
        let xml = format!(
            "<w:p><w:r><w:t>{{{{a}}}}</w:t></w:r><w:r><w:pict><w:txbxContent>{}</w:txbxContent></w:pict></w:r>\
<w:r><w:t>{{{{after_box}}}}</w:t></w:r></w:p>",
            para("In box {{b}}")
        );
        let c = ctx(r#"{"a":"1","b":"2","after_box":"3"}"#);
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        assert!(!out.contains("{{"), "{out}");
        assert_eq!(texts(&out), vec!["13", "In box 2"]);
        assert!(out.contains("<w:txbxContent>"));
    }

    #[test]
    fn paragraph_with_text_box_repeats_as_a_block() {
        let xml = format!(
            "<w:p><w:r><w:t>{{{{items[].x}}}}</w:t></w:r><w:r><w:pict><w:txbxContent>{}</w:txbxContent></w:pict></w:r></w:p>",
            para("note {{items[].y}}")
        );
        let c = ctx(r#"{"items":[{"x":"A","y":"1"},{"x":"B","y":"2"}]}"#);
        let out = render_part(&xml, &c, MissingPlaceholder::KeepToken).unwrap();
        assert_eq!(texts(&out), vec!["A", "note 1", "B", "note 2"]);
    }

    #[test]
    fn render_to_writes_docx_and_cleans_up_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.docx");
        std::fs::write(&template, package(&para("Hi {{name}}")).to_bytes().unwrap()).unwrap();

        let out = dir.path().join("out").join("filled.docx");
        render_to(&template, &ctx(r#"{"name":"Ada"}"#), &out, MissingPlaceholder::KeepToken).unwrap();
        let filled = DocxPackage::open(&out).unwrap();
        assert_eq!(filled.visible_text().unwrap(), "Hi Ada");

        let bad = dir.path().join("out").join("bad.docx");
        let err = render_to(&template, &ctx(r#"{"name":[]}"#), &bad, MissingPlaceholder::KeepToken).unwrap_err();
        assert!(matches!(err, LexPrepError::Render { .. }));
        assert!(!bad.exists());
        let leftovers = std::fs::read_dir(dir.path().join("out")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn unreadable_template_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.docx");
        std::fs::write(&template, b"not a zip").unwrap();
        let err = render(&template, &Context::new(), dir.path(), MissingPlaceholder::KeepToken).unwrap_err();
        assert!(matches!(err, LexPrepError::Render { .. }));
    }

    #[test]
    fn headers_are_rendered() {
        let pkg = DocxPackage::from_parts(vec![
            (DOCUMENT_PART, document_xml(&para("body")).into_bytes()),
            ("word/header1.xml", format!("<w:hdr>{}</w:hdr>", para("Ref {{ref}}")).into_bytes()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.docx");
        std::fs::write(&template, pkg.to_bytes().unwrap()).unwrap();
        let out = render(&template, &ctx(r#"{"ref":"R-1"}"#), dir.path(), MissingPlaceholder::KeepToken).unwrap();
        let text = DocxPackage::open(&out).unwrap().visible_text().unwrap();
        assert!(text.contains("Ref R-1"));
    }
}
