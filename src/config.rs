//! Configuration for template storage and case generation.
//!
//! Every knob lives in [`GenerationConfig`], built through its
//! [`GenerationConfigBuilder`]. The same config is shared by template saving
//! (where uploads are copied), case generation (rendering policy, output
//! directory) and conversion (engine order and binaries).

use crate::error::LexPrepError;
use crate::pipeline::context::DEFAULT_REPEAT_COUNT;
use crate::pipeline::convert::{Converter, ConverterChain, EngineKind};
use crate::pipeline::render::MissingPlaceholder;
use crate::progress::ProgressCallback;
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default minimum number of visible characters a fallback conversion must
/// contain.
pub const DEFAULT_MIN_FALLBACK_TEXT_LEN: usize = 100;

/// Configuration for template saving and case generation.
///
/// # Example
/// ```rust
/// use lexprep::{EngineKind, GenerationConfig};
///
/// let config = GenerationConfig::builder()
///     .output_dir("/srv/lexprep/outputs")
///     .engine_order(vec![EngineKind::Pandoc])
///     .build()
///     .unwrap();
/// assert_eq!(config.min_fallback_text_len, 100);
/// ```
#[derive(Clone)]
pub struct GenerationConfig {
    /// Directory for filled and converted artifacts. Default: `outputs`.
    pub output_dir: PathBuf,

    /// Directory uploaded templates are copied into. Default: `data/templates`.
    pub templates_dir: PathBuf,

    /// Repetitions assumed for a group whose count was never set. Default: 1.
    pub default_repeat_count: usize,

    /// Sanity-check threshold for fallback engines. Default: 100.
    pub min_fallback_text_len: usize,

    /// Engine preference, primary first. Default: `[Office, Pandoc]`.
    pub engine_order: Vec<EngineKind>,

    /// Explicit `soffice` binary. If None, searched on `PATH`.
    pub soffice_path: Option<PathBuf>,

    /// Explicit `pandoc` binary. If None, searched on `PATH`.
    pub pandoc_path: Option<PathBuf>,

    /// Pre-constructed converters, tried in order. Takes precedence over
    /// `engine_order` and the binary paths.
    pub converters: Option<Vec<Arc<dyn Converter>>>,

    /// What the renderer writes for placeholders absent from the context.
    /// Default: [`MissingPlaceholder::KeepToken`].
    pub missing_placeholder: MissingPlaceholder,

    /// Receives stage and engine events during generation.
    pub progress_callback: Option<ProgressCallback>,

    /// Available engines, probed on first use and shared by clones.
    chain: Arc<OnceCell<ConverterChain>>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            templates_dir: PathBuf::from("data/templates"),
            default_repeat_count: DEFAULT_REPEAT_COUNT,
            min_fallback_text_len: DEFAULT_MIN_FALLBACK_TEXT_LEN,
            engine_order: vec![EngineKind::Office, EngineKind::Pandoc],
            soffice_path: None,
            pandoc_path: None,
            converters: None,
            missing_placeholder: MissingPlaceholder::default(),
            progress_callback: None,
            chain: Arc::new(OnceCell::new()),
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("output_dir", &self.output_dir)
            .field("templates_dir", &self.templates_dir)
            .field("default_repeat_count", &self.default_repeat_count)
            .field("min_fallback_text_len", &self.min_fallback_text_len)
            .field("engine_order", &self.engine_order)
            .field("soffice_path", &self.soffice_path)
            .field("pandoc_path", &self.pandoc_path)
            .field(
                "converters",
                &self
                    .converters
                    .as_ref()
                    .map(|cs| cs.iter().map(|c| c.name().to_string()).collect::<Vec<_>>()),
            )
            .field("missing_placeholder", &self.missing_placeholder)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn GenerationProgressCallback>"),
            )
            .field("chain", &self.chain.get())
            .finish()
    }
}

impl GenerationConfig {
    /// Create a new builder for `GenerationConfig`.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            config: Self::default(),
        }
    }

    /// The converter chain for this configuration.
    ///
    /// Engines are probed once, on the first call; later calls and clones
    /// reuse the result. Changing engine fields after that has no effect.
    pub fn converter_chain(&self) -> &ConverterChain {
        self.chain.get_or_init(|| ConverterChain::detect(self))
    }
}

/// Builder for [`GenerationConfig`].
#[derive(Debug)]
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.templates_dir = dir.into();
        self
    }

    pub fn default_repeat_count(mut self, n: usize) -> Self {
        self.config.default_repeat_count = n;
        self
    }

    pub fn min_fallback_text_len(mut self, n: usize) -> Self {
        self.config.min_fallback_text_len = n;
        self
    }

    pub fn engine_order(mut self, order: Vec<EngineKind>) -> Self {
        self.config.engine_order = order;
        self
    }

    pub fn soffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_path = Some(path.into());
        self
    }

    pub fn pandoc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pandoc_path = Some(path.into());
        self
    }

    pub fn converters(mut self, converters: Vec<Arc<dyn Converter>>) -> Self {
        self.config.converters = Some(converters);
        self
    }

    pub fn missing_placeholder(mut self, policy: MissingPlaceholder) -> Self {
        self.config.missing_placeholder = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GenerationConfig, LexPrepError> {
        let c = &self.config;
        if c.converters.is_none() {
            if c.engine_order.is_empty() {
                return Err(LexPrepError::InvalidConfig(
                    "engine order must name at least one engine".into(),
                ));
            }
            let mut seen = HashSet::new();
            if let Some(dup) = c.engine_order.iter().find(|k| !seen.insert(**k)) {
                return Err(LexPrepError::InvalidConfig(format!(
                    "engine '{dup}' appears more than once in the engine order"
                )));
            }
        }
        if c.min_fallback_text_len == 0 {
            return Err(LexPrepError::InvalidConfig(
                "minimum fallback text length must be ≥ 1".into(),
            ));
        }
        if c.output_dir.as_os_str().is_empty() || c.templates_dir.as_os_str().is_empty() {
            return Err(LexPrepError::InvalidConfig(
                "output and templates directories must not be empty paths".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = GenerationConfig::builder().build().unwrap();
        assert_eq!(c.output_dir, PathBuf::from("outputs"));
        assert_eq!(c.templates_dir, PathBuf::from("data/templates"));
        assert_eq!(c.default_repeat_count, 1);
        assert_eq!(c.min_fallback_text_len, 100);
        assert_eq!(c.engine_order, vec![EngineKind::Office, EngineKind::Pandoc]);
        assert_eq!(c.missing_placeholder, MissingPlaceholder::KeepToken);
    }

    #[test]
    fn rejects_empty_and_duplicate_engine_order() {
        assert!(GenerationConfig::builder().engine_order(vec![]).build().is_err());
        let err = GenerationConfig::builder()
            .engine_order(vec![EngineKind::Pandoc, EngineKind::Pandoc])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("pandoc"));
    }

    #[test]
    fn explicit_converters_skip_order_validation() {
        let c = GenerationConfig::builder()
            .engine_order(vec![])
            .converters(vec![])
            .build()
            .unwrap();
        assert!(c.converters.unwrap().is_empty());
    }

    #[test]
    fn rejects_zero_threshold() {
        assert!(GenerationConfig::builder().min_fallback_text_len(0).build().is_err());
    }

    #[test]
    fn converter_chain_is_probed_once() {
        use crate::error::ConverterError;
        use crate::pipeline::convert::EngineRole;
        use async_trait::async_trait;
        use std::path::Path;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting(AtomicUsize);

        #[async_trait]
        impl Converter for Counting {
            fn name(&self) -> &str {
                "counting"
            }
            fn role(&self) -> EngineRole {
                EngineRole::Primary
            }
            fn is_available(&self) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst);
                true
            }
            async fn convert(&self, _input: &Path, _output: &Path) -> Result<(), ConverterError> {
                Ok(())
            }
        }

        let engine = Arc::new(Counting(AtomicUsize::new(0)));
        let config = GenerationConfig::builder()
            .converters(vec![engine.clone() as Arc<dyn Converter>])
            .build()
            .unwrap();
        let copy = config.clone();

        assert_eq!(config.converter_chain().engine_names(), vec!["counting"]);
        assert_eq!(copy.converter_chain().engine_names(), vec!["counting"]);
        config.converter_chain();
        assert_eq!(engine.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_hides_trait_objects() {
        let c = GenerationConfig::builder()
            .progress_callback(Arc::new(crate::progress::NoopProgressCallback))
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(dbg.contains("<dyn GenerationProgressCallback>"));
    }
}
