//! Orchestration entry points: saving templates and generating cases.
//!
//! [`generate_case`] is all-or-nothing. A case row is written only after
//! both artifacts exist on disk; when any stage fails, every file the call
//! produced is removed before the error is returned.

use crate::config::GenerationConfig;
use crate::error::{ConverterError, LexPrepError};
use crate::manifest::Manifest;
use crate::pipeline::context::{build_context_with_default, validate_context, Context, ValueStore};
use crate::pipeline::convert::{engine_statuses, EngineStatus};
use crate::pipeline::docx::DocxPackage;
use crate::pipeline::infer::{infer_with_warnings, SchemaWarning};
use crate::pipeline::render::render_to;
use crate::pipeline::scan::scan_package;
use crate::progress::PipelineStage;
use crate::store::{CaseRecord, NewCase, NewTemplate, Store, TemplateRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

static RE_SLUG_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());

/// Lowercase ASCII slug for file names; never empty.
pub fn slugify(text: &str) -> String {
    let slug = RE_SLUG_SEPARATORS
        .replace_all(text, "-")
        .trim_matches('-')
        .to_lowercase();
    let slug: String = slug.chars().take(60).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.to_string()
    }
}

/// A freshly scanned template, before it is saved.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestDraft {
    /// Distinct placeholders, sorted.
    pub tokens: Vec<String>,
    pub manifest: Manifest,
    #[serde(skip)]
    pub warnings: Vec<SchemaWarning>,
}

/// Scan `template` and infer a manifest titled `title`.
///
/// # Errors
/// [`LexPrepError::DocumentFormat`] if the file is not a readable DOCX.
pub fn draft_manifest(template: &Path, title: &str) -> Result<ManifestDraft, LexPrepError> {
    let package = DocxPackage::open(template)?;
    draft_from_package(&package, title)
}

fn draft_from_package(package: &DocxPackage, title: &str) -> Result<ManifestDraft, LexPrepError> {
    let tokens = scan_package(package)?;
    let (manifest, warnings) = infer_with_warnings(&tokens, title);
    for w in &warnings {
        warn!("{}: {w}", package.source_name());
    }
    info!(
        "Inferred {} field(s) from {} placeholder(s) in '{}'",
        manifest.field_count(),
        tokens.len(),
        package.source_name()
    );
    Ok(ManifestDraft {
        tokens,
        manifest,
        warnings,
    })
}

/// Save an uploaded template.
///
/// The upload is validated as DOCX, copied into `config.templates_dir` under
/// a unique name and recorded in `store`. `manifest` replaces the inferred
/// one when the user edited it. A blank `name` becomes `Template N`.
///
/// # Errors
/// - [`LexPrepError::DocumentFormat`] for an unreadable upload
/// - [`LexPrepError::ManifestValidation`] for an invalid edited manifest
/// - [`LexPrepError::OutputWriteFailed`] / [`LexPrepError::Storage`]; no
///   copied file is left behind
pub fn save_template(
    store: &dyn Store,
    config: &GenerationConfig,
    name: &str,
    description: Option<&str>,
    source: &Path,
    manifest: Option<Manifest>,
) -> Result<TemplateRecord, LexPrepError> {
    let package = DocxPackage::open(source)?;

    let name = match name.trim() {
        "" => format!("Template {}", store.count_templates()? + 1),
        trimmed => trimmed.to_string(),
    };
    let manifest = match manifest {
        Some(m) => {
            m.validate()?;
            m
        }
        None => draft_from_package(&package, &name)?.manifest,
    };

    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| LexPrepError::OutputWriteFailed { path, source }
    };
    std::fs::create_dir_all(&config.templates_dir).map_err(write_err(&config.templates_dir))?;
    let stored = config.templates_dir.join(format!(
        "{}-{}.docx",
        slugify(&name),
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::copy(source, &stored).map_err(write_err(&stored))?;

    let new = NewTemplate {
        name,
        description: description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        manifest,
        docx_path: stored.clone(),
    };
    let id = match store.create_template(&new) {
        Ok(id) => id,
        Err(e) => {
            remove_artifact(&stored);
            return Err(e);
        }
    };
    info!("Saved template #{id} '{}' → '{}'", new.name, stored.display());
    store.get_template(id)
}

/// Soft-archive a template; its cases stay intact.
pub fn archive_template(store: &dyn Store, id: i64) -> Result<(), LexPrepError> {
    store.archive_template(id)
}

/// Build a render context for `template` from flat form state.
pub fn context_from_values(
    template: &TemplateRecord,
    values: &dyn ValueStore,
    config: &GenerationConfig,
) -> Context {
    build_context_with_default(&template.manifest.fields, values, None, config.default_repeat_count)
}

/// Result of [`generate_case`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCase {
    pub case_id: i64,
    pub filled_path: PathBuf,
    pub converted_path: PathBuf,
    /// Engine that produced the converted artifact.
    pub engine: String,
    /// Engines tried before it.
    pub failed_attempts: Vec<ConverterError>,
}

/// Render, convert and record one case.
///
/// Artifacts are named `<slug>-<uuid>.docx` / `.rtf`, where the slug comes
/// from `doc_name` or else the template name.
///
/// # Errors
/// - [`LexPrepError::TemplateNotFound`] / [`LexPrepError::TemplateArchived`]
/// - [`LexPrepError::Render`] when `context` does not fit the manifest or
///   the template
/// - [`LexPrepError::ConversionUnavailable`] / [`LexPrepError::ConversionFailed`]
/// - [`LexPrepError::Storage`]
pub async fn generate_case(
    store: &dyn Store,
    config: &GenerationConfig,
    template_id: i64,
    context: Context,
    doc_name: Option<&str>,
) -> Result<GeneratedCase, LexPrepError> {
    let total_start = Instant::now();
    let template = store.get_template(template_id)?;
    if !template.is_active {
        return Err(LexPrepError::TemplateArchived { id: template_id });
    }
    validate_context(&template.manifest.fields, &context)?;

    let doc_name = doc_name.map(str::trim).filter(|d| !d.is_empty());
    let stem = format!(
        "{}-{}",
        slugify(doc_name.unwrap_or(&template.name)),
        uuid::Uuid::new_v4().simple()
    );
    let filled = config.output_dir.join(format!("{stem}.docx"));
    let progress = config.progress_callback.as_ref();

    // ── Step 1: Render ───────────────────────────────────────────────────
    let stage_start = Instant::now();
    if let Some(cb) = progress {
        cb.on_stage_start(PipelineStage::Render);
    }
    {
        let template_path = template.docx_path.clone();
        let context = context.clone();
        let filled = filled.clone();
        let policy = config.missing_placeholder;
        tokio::task::spawn_blocking(move || render_to(&template_path, &context, &filled, policy))
            .await
            .map_err(|e| LexPrepError::Internal(format!("render task: {e}")))??;
    }
    if let Some(cb) = progress {
        cb.on_stage_complete(PipelineStage::Render, stage_start.elapsed().as_millis() as u64);
    }

    // ── Step 2: Convert ──────────────────────────────────────────────────
    let stage_start = Instant::now();
    if let Some(cb) = progress {
        cb.on_stage_start(PipelineStage::Convert);
    }
    let chain = config.converter_chain();
    debug!("Converter chain: {:?}", chain);
    let report = match chain.convert(&filled, progress).await {
        Ok(report) => report,
        Err(e) => {
            remove_artifact(&filled);
            return Err(e);
        }
    };
    if let Some(cb) = progress {
        cb.on_stage_complete(PipelineStage::Convert, stage_start.elapsed().as_millis() as u64);
    }

    // ── Step 3: Persist ──────────────────────────────────────────────────
    let stage_start = Instant::now();
    if let Some(cb) = progress {
        cb.on_stage_start(PipelineStage::Persist);
    }
    let new = NewCase {
        template_id,
        doc_name: doc_name.map(str::to_string),
        input: context,
        filled_path: filled.clone(),
        converted_path: report.output.clone(),
    };
    let case_id = match store.create_case(&new) {
        Ok(id) => id,
        Err(e) => {
            remove_artifact(&filled);
            remove_artifact(&report.output);
            return Err(e);
        }
    };
    if let Some(cb) = progress {
        cb.on_stage_complete(PipelineStage::Persist, stage_start.elapsed().as_millis() as u64);
        cb.on_generation_complete(case_id);
    }

    info!(
        "Generated case #{case_id} from template #{template_id} in {}ms ({})",
        total_start.elapsed().as_millis(),
        report.engine
    );
    Ok(GeneratedCase {
        case_id,
        filled_path: filled,
        converted_path: report.output,
        engine: report.engine,
        failed_attempts: report.failed_attempts,
    })
}

/// Synchronous wrapper around [`generate_case`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_case_sync(
    store: &dyn Store,
    config: &GenerationConfig,
    template_id: i64,
    context: Context,
    doc_name: Option<&str>,
) -> Result<GeneratedCase, LexPrepError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| LexPrepError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_case(store, config, template_id, context, doc_name))
}

/// Delete a case row, then its artifact files.
///
/// The row goes first; a file that cannot be removed afterwards is logged
/// and left behind.
pub fn delete_case(store: &dyn Store, id: i64) -> Result<CaseRecord, LexPrepError> {
    let record = store.delete_case(id)?;
    for path in [&record.filled_path, &record.converted_path].into_iter().flatten() {
        remove_artifact(path);
    }
    Ok(record)
}

/// Engines the configuration names and whether each can run here.
pub fn available_engines(config: &GenerationConfig) -> Vec<EngineStatus> {
    engine_statuses(config)
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed '{}'", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("'{}' already gone", path.display())
        }
        Err(e) => warn!("Could not remove '{}': {}", path.display(), e),
    }
}
