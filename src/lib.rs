//! # lexprep
//!
//! Turn DOCX templates with `{{ placeholder }}` tokens into filled legal
//! documents.
//!
//! A template is scanned for placeholders once, when it is saved, and a field
//! schema (the *manifest*) is inferred from the token names: `client_name`
//! is a single value, `parties[].role` is the `role` field of a repeated
//! `parties` group. Each case then fills a form shaped by that manifest,
//! renders a new DOCX, converts it to RTF and records both artifacts.
//!
//! ## Pipeline Overview
//!
//! ```text
//! DOCX template
//!  │
//!  ├─ 1. Scan     distinct placeholders from paragraphs, cells, headers
//!  ├─ 2. Infer    manifest: scalar fields + repeated groups
//!  │              (persisted with the template)
//!  ├─ 3. Context  flat form values → nested context tree
//!  ├─ 4. Render   filled DOCX; table rows / paragraph blocks repeat per item
//!  ├─ 5. Convert  soffice, falling back to pandoc (sanity-checked)
//!  └─ 6. Persist  case row written only when both artifacts exist
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lexprep::{generate_case, save_template, FormValues, GenerationConfig, SqliteStore};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::open(Path::new("data/lexprep.db"))?;
//!     let config = GenerationConfig::default();
//!
//!     let template = save_template(&store, &config, "Engagement", None, Path::new("engagement.docx"), None)?;
//!
//!     let mut form = FormValues::new();
//!     form.set_value("client_name", "Acme")
//!         .set_count("matter", 2)
//!         .set_value("matter[0].item", "Claim A")
//!         .set_value("matter[1].item", "Claim B");
//!     let context = lexprep::context_from_values(&template, &form, &config);
//!
//!     let case = generate_case(&store, &config, template.id, context, Some("Acme engagement")).await?;
//!     println!("{} / {}", case.filled_path.display(), case.converted_path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `lexprep` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! lexprep = { version = "0.9", default-features = false }
//! ```
//!
//! ## Conversion engines
//!
//! | Engine | Role | Binary |
//! |--------|------|--------|
//! | LibreOffice | primary | `soffice` / `libreoffice` on `PATH`, or `LEXPREP_SOFFICE` in the CLI |
//! | Pandoc | fallback, output must hold ≥ 100 visible characters | `pandoc`, or `LEXPREP_PANDOC` |
//!
//! With neither installed, generation fails with
//! [`LexPrepError::ConversionUnavailable`] and nothing is recorded.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod generate;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{GenerationConfig, GenerationConfigBuilder};
pub use error::{ConverterError, LexPrepError};
pub use generate::{
    archive_template, available_engines, context_from_values, delete_case, draft_manifest, generate_case,
    generate_case_sync, save_template, GeneratedCase, ManifestDraft,
};
pub use manifest::{FieldSpec, FieldType, Manifest};
pub use pipeline::context::{build_context, validate_context, Context, ContextValue, FormValues, ValueStore};
pub use pipeline::convert::{
    ConversionReport, Converter, ConverterChain, EngineKind, EngineRole, EngineStatus, OfficeConverter,
    PandocConverter,
};
pub use pipeline::docx::DocxPackage;
pub use pipeline::infer::{humanize, infer, infer_with_warnings, SchemaWarning};
pub use pipeline::render::{render, render_to, MissingPlaceholder};
pub use pipeline::scan::scan;
pub use progress::{GenerationProgressCallback, NoopProgressCallback, PipelineStage, ProgressCallback};
pub use store::{CaseRecord, NewCase, NewTemplate, SqliteStore, Store, TemplateRecord};
