//! Format converter: filled DOCX → RTF.
//!
//! Engines implement the [`Converter`] capability. The [`ConverterChain`]
//! probes which engines are installed once, in the configured preference
//! order, and tries them in turn until one produces an acceptable artifact:
//!
//! 1. **Primary** (`soffice --headless --convert-to rtf`): highest fidelity.
//! 2. **Fallback** (`pandoc -t rtf`): independent implementation.
//!
//! Output from a fallback engine is checked for a minimum amount of
//! extractable text; a near-empty RTF is treated as a failed conversion,
//! deleted, and the chain escalates. The artifact always lands next to the
//! input with the same stem and an `.rtf` extension.

use crate::config::GenerationConfig;
use crate::error::{ConverterError, LexPrepError};
use crate::pipeline::rtf;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extension of the converted artifact.
pub const CONVERTED_EXTENSION: &str = "rtf";

/// LibreOffice filter name for RTF export.
const OFFICE_RTF_FILTER: &str = "rtf:Rich Text Format";

/// Where an engine sits in the escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineRole {
    /// Trusted output; no sanity check.
    Primary,
    /// Output must pass the text-length sanity check.
    Fallback,
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineRole::Primary => write!(f, "primary"),
            EngineRole::Fallback => write!(f, "fallback"),
        }
    }
}

/// Built-in engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// LibreOffice / OpenOffice in headless mode.
    Office,
    /// Pandoc.
    Pandoc,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Office => write!(f, "office"),
            EngineKind::Pandoc => write!(f, "pandoc"),
        }
    }
}

/// One way of turning a DOCX into an RTF.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    fn role(&self) -> EngineRole;

    /// Whether the engine can be run in this environment.
    fn is_available(&self) -> bool;

    /// Convert `input` and write the result to exactly `output`.
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConverterError>;
}

/// Resolve an explicit binary (path or bare name) or the first of
/// `candidates` found on `PATH`.
fn locate(explicit: Option<&Path>, candidates: &[&str]) -> Option<PathBuf> {
    match explicit {
        Some(p) => which::which(p).ok(),
        None => candidates.iter().find_map(|c| which::which(c).ok()),
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(500) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

// ── Office ───────────────────────────────────────────────────────────────

/// Headless LibreOffice (`soffice`).
///
/// Every invocation gets a throw-away user profile so concurrent conversions
/// do not block on the profile lock of a shared installation.
#[derive(Debug, Clone)]
pub struct OfficeConverter {
    binary: Option<PathBuf>,
}

impl OfficeConverter {
    /// Use `binary` if given, else look for `soffice` then `libreoffice` on `PATH`.
    pub fn new(binary: Option<&Path>) -> Self {
        let binary = locate(binary, &["soffice", "libreoffice"]);
        debug!("office engine: {:?}", binary);
        Self { binary }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

#[async_trait]
impl Converter for OfficeConverter {
    fn name(&self) -> &str {
        "soffice"
    }

    fn role(&self) -> EngineRole {
        EngineRole::Primary
    }

    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConverterError> {
        let engine = self.name().to_string();
        let io_err = |e: std::io::Error| ConverterError::Launch {
            engine: self.name().to_string(),
            detail: e.to_string(),
        };
        let binary = self.binary.as_ref().ok_or_else(|| ConverterError::Launch {
            engine: engine.clone(),
            detail: "binary not found".into(),
        })?;

        let out_dir = output.parent().unwrap_or(Path::new("."));
        let profile = tempfile::Builder::new()
            .prefix("lexprep-soffice-profile-")
            .tempdir()
            .map_err(io_err)?;
        // soffice names its output after the input; stage it apart from
        // `output` and move it into place afterwards.
        let staging = tempfile::Builder::new()
            .prefix(".lexprep-soffice-")
            .tempdir_in(out_dir)
            .map_err(io_err)?;

        let result = Command::new(binary)
            .arg("--headless")
            .arg(format!("-env:UserInstallation={}", installation_uri(profile.path(), &engine)?))
            .arg("--convert-to")
            .arg(OFFICE_RTF_FILTER)
            .arg("--outdir")
            .arg(staging.path())
            .arg(input)
            .output()
            .await
            .map_err(io_err)?;

        if !result.status.success() {
            return Err(ConverterError::ExitStatus {
                engine,
                code: result.status.code(),
                stderr: stderr_excerpt(&result.stderr),
            });
        }

        let stem = input.file_stem().unwrap_or_default();
        let produced = staging
            .path()
            .join(stem)
            .with_extension(CONVERTED_EXTENSION);
        if !produced.exists() {
            // soffice exits 0 even when the filter fails.
            return Err(ConverterError::MissingOutput {
                engine,
                path: produced,
            });
        }
        tokio::fs::rename(&produced, output).await.map_err(io_err)?;
        Ok(())
    }
}

/// `file://` URI for a profile directory, percent-encoded so paths with
/// spaces or non-ASCII characters survive.
fn installation_uri(dir: &Path, engine: &str) -> Result<String, ConverterError> {
    url::Url::from_directory_path(dir)
        .map(String::from)
        .map_err(|()| ConverterError::Launch {
            engine: engine.to_string(),
            detail: format!("profile directory '{}' is not an absolute path", dir.display()),
        })
}

// ── Pandoc ───────────────────────────────────────────────────────────────

/// `pandoc -f docx -t rtf -s`.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    binary: Option<PathBuf>,
}

impl PandocConverter {
    /// Use `binary` if given, else look for `pandoc` on `PATH`.
    pub fn new(binary: Option<&Path>) -> Self {
        let binary = locate(binary, &["pandoc"]);
        debug!("pandoc engine: {:?}", binary);
        Self { binary }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

#[async_trait]
impl Converter for PandocConverter {
    fn name(&self) -> &str {
        "pandoc"
    }

    fn role(&self) -> EngineRole {
        EngineRole::Fallback
    }

    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConverterError> {
        let engine = self.name().to_string();
        let binary = self.binary.as_ref().ok_or_else(|| ConverterError::Launch {
            engine: engine.clone(),
            detail: "binary not found".into(),
        })?;

        let result = Command::new(binary)
            .arg(input)
            .args(["-f", "docx", "-t", "rtf", "-s", "-o"])
            .arg(output)
            .output()
            .await
            .map_err(|e| ConverterError::Launch {
                engine: engine.clone(),
                detail: e.to_string(),
            })?;

        if !result.status.success() {
            return Err(ConverterError::ExitStatus {
                engine,
                code: result.status.code(),
                stderr: stderr_excerpt(&result.stderr),
            });
        }
        if !output.exists() {
            return Err(ConverterError::MissingOutput {
                engine,
                path: output.to_path_buf(),
            });
        }
        Ok(())
    }
}

// ── Chain ────────────────────────────────────────────────────────────────

/// Availability of one configured engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub name: String,
    pub role: EngineRole,
    pub available: bool,
}

/// Outcome of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionReport {
    /// Path of the converted artifact.
    pub output: PathBuf,
    /// Engine that produced it.
    pub engine: String,
    /// Engines that were tried first and failed.
    pub failed_attempts: Vec<ConverterError>,
}

/// Every engine the configuration names, available or not, in order.
pub fn configured_engines(config: &GenerationConfig) -> Vec<Arc<dyn Converter>> {
    if let Some(converters) = &config.converters {
        return converters.clone();
    }
    config
        .engine_order
        .iter()
        .map(|kind| -> Arc<dyn Converter> {
            match kind {
                EngineKind::Office => Arc::new(OfficeConverter::new(config.soffice_path.as_deref())),
                EngineKind::Pandoc => Arc::new(PandocConverter::new(config.pandoc_path.as_deref())),
            }
        })
        .collect()
}

/// Report which configured engines are usable.
pub fn engine_statuses(config: &GenerationConfig) -> Vec<EngineStatus> {
    configured_engines(config)
        .iter()
        .map(|c| EngineStatus {
            name: c.name().to_string(),
            role: c.role(),
            available: c.is_available(),
        })
        .collect()
}

/// Available engines in preference order.
#[derive(Clone)]
pub struct ConverterChain {
    engines: Vec<Arc<dyn Converter>>,
    min_fallback_text_len: usize,
}

impl fmt::Debug for ConverterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterChain")
            .field("engines", &self.engine_names())
            .field("min_fallback_text_len", &self.min_fallback_text_len)
            .finish()
    }
}

impl ConverterChain {
    /// Use `engines` as given, in order, without probing.
    pub fn new(engines: Vec<Arc<dyn Converter>>, min_fallback_text_len: usize) -> Self {
        Self {
            engines,
            min_fallback_text_len,
        }
    }

    /// Probe the configured engines once and keep the available ones.
    pub fn detect(config: &GenerationConfig) -> Self {
        let engines: Vec<Arc<dyn Converter>> = configured_engines(config)
            .into_iter()
            .filter(|c| {
                let available = c.is_available();
                if available {
                    debug!("Converter '{}' ({}) available", c.name(), c.role());
                } else {
                    info!("Converter '{}' ({}) not available", c.name(), c.role());
                }
                available
            })
            .collect();
        Self::new(engines, config.min_fallback_text_len)
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Convert `input` to `<input stem>.rtf` beside it.
    ///
    /// # Errors
    /// - [`LexPrepError::ConversionUnavailable`] when the chain is empty
    /// - [`LexPrepError::ConversionFailed`] when every engine failed or was
    ///   rejected; no artifact is left behind
    pub async fn convert(
        &self,
        input: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<ConversionReport, LexPrepError> {
        if self.engines.is_empty() {
            return Err(LexPrepError::ConversionUnavailable {
                hint: "No converter engine is installed. Install LibreOffice (soffice) or pandoc, \
                       or point LEXPREP_SOFFICE / LEXPREP_PANDOC at the binaries."
                    .into(),
            });
        }

        let output = input.with_extension(CONVERTED_EXTENSION);
        let mut failed = Vec::new();

        for (i, engine) in self.engines.iter().enumerate() {
            if let Some(cb) = progress {
                cb.on_engine_attempt(engine.name(), i + 1);
            }
            debug!("Converting '{}' with {}", input.display(), engine.name());

            match self.attempt(engine.as_ref(), input, &output).await {
                Ok(()) => {
                    info!(
                        "Converted '{}' → '{}' with {}",
                        input.display(),
                        output.display(),
                        engine.name()
                    );
                    return Ok(ConversionReport {
                        output,
                        engine: engine.name().to_string(),
                        failed_attempts: failed,
                    });
                }
                Err(e) => {
                    warn!("{e}; escalating");
                    remove_if_present(&output).await;
                    if let Some(cb) = progress {
                        cb.on_engine_failure(engine.name(), &e);
                    }
                    failed.push(e);
                }
            }
        }

        Err(LexPrepError::ConversionFailed {
            attempts: failed.len(),
            details: failed
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        })
    }

    async fn attempt(&self, engine: &dyn Converter, input: &Path, output: &Path) -> Result<(), ConverterError> {
        engine.convert(input, output).await?;
        if !output.exists() {
            return Err(ConverterError::MissingOutput {
                engine: engine.name().to_string(),
                path: output.to_path_buf(),
            });
        }
        if engine.role() == EngineRole::Fallback {
            let bytes = tokio::fs::read(output).await.map_err(|e| ConverterError::Launch {
                engine: engine.name().to_string(),
                detail: format!("cannot read output: {e}"),
            })?;
            let chars = rtf::plain_text_len(&String::from_utf8_lossy(&bytes));
            if chars < self.min_fallback_text_len {
                return Err(ConverterError::TooLittleText {
                    engine: engine.name().to_string(),
                    chars,
                    minimum: self.min_fallback_text_len,
                });
            }
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed rejected artifact '{}'", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove '{}': {}", path.display(), e),
    }
}
