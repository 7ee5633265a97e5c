//! Error types for the lexprep library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LexPrepError`] — **Fatal**: the requested operation cannot complete
//!   (unreadable template, invalid manifest, render mismatch, no converter
//!   engine, storage failure). Returned as `Err(LexPrepError)` from every
//!   public entry point.
//!
//! * [`ConverterError`] — **Non-fatal**: one converter engine failed or its
//!   output was rejected. The converter chain records it and escalates to the
//!   next engine; only when every engine is exhausted does the chain turn the
//!   collected attempts into [`LexPrepError::ConversionFailed`].
//!
//! Configuration problems ([`LexPrepError::ConversionUnavailable`],
//! [`LexPrepError::InvalidConfig`]) are kept apart from content problems
//! ([`LexPrepError::DocumentFormat`], [`LexPrepError::Render`]) so callers can
//! show an operator-facing message for the former and a user-facing one for
//! the latter.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the lexprep library.
#[derive(Debug, Error)]
pub enum LexPrepError {
    // ── Template errors ───────────────────────────────────────────────────
    /// The uploaded file could not be opened or parsed as a DOCX container.
    #[error("'{source_name}' is not a readable DOCX template: {detail}\nRe-save the file from Word or LibreOffice as .docx and upload it again.")]
    DocumentFormat { source_name: String, detail: String },

    /// A manifest (usually hand-edited JSON) failed schema validation.
    #[error("Manifest is invalid: {0}")]
    ManifestValidation(String),

    // ── Generation errors ─────────────────────────────────────────────────
    /// Template and context disagree on shape, or the template cannot be
    /// re-read while rendering.
    #[error("Render failed: {detail}")]
    Render { detail: String },

    /// No converter engine is installed or configured.
    #[error("Document conversion unavailable, contact the operator.\n{hint}")]
    ConversionUnavailable { hint: String },

    /// Engines were available but every attempt failed or was rejected.
    #[error("Document conversion failed after {attempts} attempt(s): {details}")]
    ConversionFailed { attempts: usize, details: String },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// No template row with this id.
    #[error("Template #{id} does not exist")]
    TemplateNotFound { id: i64 },

    /// The template was archived and no longer accepts new cases.
    #[error("Template #{id} is archived; existing cases remain available")]
    TemplateArchived { id: i64 },

    /// No case row with this id.
    #[error("Case #{id} does not exist")]
    CaseNotFound { id: i64 },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The storage engine rejected an operation.
    #[error("Storage error during {operation}: {detail}")]
    Storage {
        operation: &'static str,
        detail: String,
    },

    /// Could not create or write an artifact file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LexPrepError {
    /// Shorthand for a [`LexPrepError::Render`] with the given detail.
    pub fn render(detail: impl Into<String>) -> Self {
        LexPrepError::Render {
            detail: detail.into(),
        }
    }

    /// `true` when the failure is an environment/configuration problem
    /// rather than something the user can fix in their template or input.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            LexPrepError::ConversionUnavailable { .. } | LexPrepError::InvalidConfig(_)
        )
    }
}

/// A single converter engine attempt that did not produce a usable artifact.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ConverterError {
    /// The engine process could not be spawned.
    #[error("{engine}: failed to launch: {detail}")]
    Launch { engine: String, detail: String },

    /// The engine ran but exited unsuccessfully.
    #[error("{engine}: exited with status {code:?}: {stderr}")]
    ExitStatus {
        engine: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The engine reported success but the expected output file is absent.
    #[error("{engine}: expected output '{path}' was not produced")]
    MissingOutput { engine: String, path: PathBuf },

    /// The output contained too little text to be trusted.
    #[error("{engine}: output has only {chars} characters of text (minimum {minimum})")]
    TooLittleText {
        engine: String,
        chars: usize,
        minimum: usize,
    },
}
