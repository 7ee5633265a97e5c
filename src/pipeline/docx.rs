//! DOCX container access.
//!
//! A `.docx` file is a zip archive of XML parts. Only a handful of parts carry
//! visible text: the body (`word/document.xml`) and any headers/footers
//! (`word/header*.xml`, `word/footer*.xml`). Inside those, text lives in
//! `<w:t>` elements grouped into runs and paragraphs (`<w:p>`); table cells
//! contain ordinary paragraphs, so visiting every paragraph of a part visits
//! every cell as well.
//!
//! Elements nest: a cell may hold a whole table, and a paragraph may hold a
//! text box with paragraphs of its own. Paragraphs and rows are therefore
//! located by pairing tags by depth (`outer_elements`), never by the
//! first closing tag.
//!
//! The package is loaded fully into memory. Templates are small and
//! keeping every part as bytes lets the renderer rewrite the text parts and
//! copy the rest (styles, media, relationships) through untouched.

use crate::error::LexPrepError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Cursor, Read, Seek, Write};
use std::ops::Range;
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the main body part.
pub const DOCUMENT_PART: &str = "word/document.xml";

/// Opening, closing or self-closing `<w:p>` tag. Excludes `<w:pPr>` and friends.
/// Group 1 is `/` on a closing tag, group 2 is `/` on a self-closing one.
static RE_PARAGRAPH_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(/?)w:p(?:\s[^>]*?)?(/?)>").unwrap());

/// Same for `<w:tr>`. Excludes `<w:trPr>`.
static RE_TABLE_ROW_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(/?)w:tr(?:\s[^>]*?)?(/?)>").unwrap());

/// `<w:t>text</w:t>`; group 1 is the escaped text content.
static RE_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>").unwrap());

static RE_HEADER_FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^word/(?:header|footer)\d*\.xml$").unwrap());

static RE_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(amp|lt|gt|quot|apos|#[0-9]+|#x[0-9A-Fa-f]+);").unwrap());

/// One zip entry.
#[derive(Debug, Clone)]
struct PackagePart {
    name: String,
    data: Vec<u8>,
}

/// An in-memory DOCX package.
#[derive(Debug, Clone)]
pub struct DocxPackage {
    source_name: String,
    parts: Vec<PackagePart>,
}

impl DocxPackage {
    /// Open a DOCX file from disk.
    ///
    /// # Errors
    /// [`LexPrepError::DocumentFormat`] if the file is missing, is not a zip
    /// archive, or has no `word/document.xml`.
    pub fn open(path: &Path) -> Result<Self, LexPrepError> {
        let source_name = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|e| LexPrepError::DocumentFormat {
            source_name: source_name.clone(),
            detail: e.to_string(),
        })?;
        Self::read(file, source_name)
    }

    /// Load a DOCX from bytes already in memory (e.g. an upload).
    pub fn from_bytes(bytes: &[u8], source_name: impl Into<String>) -> Result<Self, LexPrepError> {
        Self::read(Cursor::new(bytes), source_name.into())
    }

    /// Assemble a package from `(part name, bytes)` pairs.
    ///
    /// No validation happens here; reading the body later fails with
    /// [`LexPrepError::DocumentFormat`] if `word/document.xml` is absent.
    pub fn from_parts<N, D>(parts: impl IntoIterator<Item = (N, D)>) -> Self
    where
        N: Into<String>,
        D: Into<Vec<u8>>,
    {
        Self {
            source_name: "<memory>".to_string(),
            parts: parts
                .into_iter()
                .map(|(name, data)| PackagePart {
                    name: name.into(),
                    data: data.into(),
                })
                .collect(),
        }
    }

    fn read<R: Read + Seek>(reader: R, source_name: String) -> Result<Self, LexPrepError> {
        let format_err = |detail: String| LexPrepError::DocumentFormat {
            source_name: source_name.clone(),
            detail,
        };

        let mut archive = ZipArchive::new(reader).map_err(|e| format_err(e.to_string()))?;
        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| format_err(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| format_err(format!("{}: {e}", entry.name())))?;
            parts.push(PackagePart {
                name: entry.name().to_string(),
                data,
            });
        }

        if !parts.iter().any(|p| p.name == DOCUMENT_PART) {
            return Err(format_err(format!("missing {DOCUMENT_PART}")));
        }
        let package = Self { source_name, parts };
        debug!(
            "Opened DOCX '{}' with {} parts",
            package.source_name,
            package.parts.len()
        );
        Ok(package)
    }

    /// Human-readable origin used in error messages.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    fn part(&self, name: &str) -> Option<&PackagePart> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Names of the parts that hold visible text: body first, then headers
    /// and footers in archive order.
    pub fn text_part_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.part(DOCUMENT_PART).is_some() {
            names.push(DOCUMENT_PART.to_string());
        }
        names.extend(
            self.parts
                .iter()
                .filter(|p| RE_HEADER_FOOTER.is_match(&p.name))
                .map(|p| p.name.clone()),
        );
        names
    }

    /// UTF-8 contents of an XML part.
    pub fn part_xml(&self, name: &str) -> Result<&str, LexPrepError> {
        let part = self.part(name).ok_or_else(|| LexPrepError::DocumentFormat {
            source_name: self.source_name.clone(),
            detail: format!("missing {name}"),
        })?;
        std::str::from_utf8(&part.data).map_err(|e| LexPrepError::DocumentFormat {
            source_name: self.source_name.clone(),
            detail: format!("{name} is not UTF-8: {e}"),
        })
    }

    /// Replace (or add) a part.
    pub fn set_part_xml(&mut self, name: &str, xml: String) {
        match self.parts.iter_mut().find(|p| p.name == name) {
            Some(part) => part.data = xml.into_bytes(),
            None => self.parts.push(PackagePart {
                name: name.to_string(),
                data: xml.into_bytes(),
            }),
        }
    }

    /// Write the package as a zip archive, preserving part order.
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> zip::result::ZipResult<W> {
        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for part in &self.parts {
            zip.start_file(part.name.as_str(), options)?;
            zip.write_all(&part.data)?;
        }
        zip.finish()
    }

    /// Serialise to zip bytes.
    pub fn to_bytes(&self) -> zip::result::ZipResult<Vec<u8>> {
        Ok(self.write_to(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Visible text of every text part, one line per paragraph.
    pub fn visible_text(&self) -> Result<String, LexPrepError> {
        let mut lines = Vec::new();
        for name in self.text_part_names() {
            lines.extend(paragraph_texts(self.part_xml(&name)?));
        }
        Ok(lines.join("\n"))
    }
}

/// Element kinds located by balanced tag matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Element {
    Paragraph,
    TableRow,
}

impl Element {
    fn tags(self) -> &'static Regex {
        match self {
            Element::Paragraph => &RE_PARAGRAPH_TAG,
            Element::TableRow => &RE_TABLE_ROW_TAG,
        }
    }
}

/// Byte ranges of the outermost `element`s of `xml`, in document order.
///
/// Tags are paired by depth, so a paragraph holding a text box or a row
/// holding a nested table comes back whole. Stray closing tags and an
/// element left open at the end are skipped.
pub(crate) fn outer_elements(xml: &str, element: Element) -> Vec<Range<usize>> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for caps in element.tags().captures_iter(xml) {
        let Some(tag) = caps.get(0) else {
            continue;
        };
        let closing = caps.get(1).is_some_and(|m| !m.is_empty());
        let self_closing = caps.get(2).is_some_and(|m| !m.is_empty());
        if closing {
            if depth == 0 {
                continue;
            }
            depth -= 1;
            if depth == 0 {
                found.push(start..tag.end());
            }
        } else if self_closing {
            if depth == 0 {
                found.push(tag.range());
            }
        } else {
            if depth == 0 {
                start = tag.start();
            }
            depth += 1;
        }
    }
    found
}

/// Range of the content between an element's opening and closing tags.
/// Empty for a self-closing element.
pub(crate) fn element_content(element_xml: &str) -> Range<usize> {
    let open_end = element_xml.find('>').map_or(element_xml.len(), |i| i + 1);
    if element_xml[..open_end].ends_with("/>") {
        return open_end..open_end;
    }
    let close_start = element_xml.rfind("</").map_or(element_xml.len(), |i| i.max(open_end));
    open_end..close_start
}

/// Paragraphs nested inside `paragraph_xml` (text boxes), outermost only.
pub(crate) fn nested_paragraphs(paragraph_xml: &str) -> Vec<Range<usize>> {
    let content = element_content(paragraph_xml);
    outer_elements(&paragraph_xml[content.clone()], Element::Paragraph)
        .into_iter()
        .map(|r| r.start + content.start..r.end + content.start)
        .collect()
}

/// Every paragraph of `xml` including those inside text boxes; a
/// paragraph comes before the paragraphs nested in it.
pub(crate) fn all_paragraphs(xml: &str) -> Vec<Range<usize>> {
    fn collect(xml: &str, offset: usize, out: &mut Vec<Range<usize>>) {
        for range in outer_elements(xml, Element::Paragraph) {
            let para = &xml[range.clone()];
            out.push(offset + range.start..offset + range.end);
            let content = element_content(para);
            collect(&para[content.clone()], offset + range.start + content.start, out);
        }
    }
    let mut out = Vec::new();
    collect(xml, 0, &mut out);
    out
}

/// A `<w:t>` element inside a paragraph.
#[derive(Debug, Clone)]
pub(crate) struct TextRun {
    /// Byte range of the whole element within the paragraph XML.
    pub element: Range<usize>,
    /// Unescaped text content.
    pub text: String,
}

/// The paragraph's own text runs in document order. Runs of nested
/// text-box paragraphs belong to those paragraphs and are left out.
pub(crate) fn text_runs(paragraph_xml: &str) -> Vec<TextRun> {
    let nested = nested_paragraphs(paragraph_xml);
    RE_TEXT
        .captures_iter(paragraph_xml)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let content = caps.get(1)?;
            Some(TextRun {
                element: whole.range(),
                text: unescape_xml(content.as_str()),
            })
        })
        .filter(|run| !nested.iter().any(|r| r.contains(&run.element.start)))
        .collect()
}

/// Merged visible text of one paragraph, excluding nested text boxes.
pub fn paragraph_text(paragraph_xml: &str) -> String {
    text_runs(paragraph_xml)
        .into_iter()
        .map(|r| r.text)
        .collect()
}

/// Merged visible text of every paragraph in an XML part, text-box
/// paragraphs included.
pub fn paragraph_texts(part_xml: &str) -> Vec<String> {
    all_paragraphs(part_xml)
        .into_iter()
        .map(|r| paragraph_text(&part_xml[r]))
        .collect()
}

/// A `<w:t>` element holding `text`. Newlines become `<w:br/>` line breaks.
pub(crate) fn text_element(text: &str) -> String {
    if text.is_empty() {
        return "<w:t/>".to_string();
    }
    let escaped: Vec<String> = text
        .split('\n')
        .map(|line| escape_xml(line.trim_end_matches('\r')))
        .collect();
    format!(
        "<w:t xml:space=\"preserve\">{}</w:t>",
        escaped.join("</w:t><w:br/><w:t xml:space=\"preserve\">")
    )
}

/// Escape text for use as XML character data.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode the predefined XML entities and numeric character references.
pub fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    RE_ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            match entity {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        entity[1..].parse::<u32>().ok()
                    };
                    code.and_then(char::from_u32)
                        .map(String::from)
                        .unwrap_or_else(|| caps[0].to_string())
                }
            }
        })
        .into_owned()
}
