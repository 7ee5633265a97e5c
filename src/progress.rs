//! Progress-callback trait for case generation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::GenerationConfigBuilder::progress_callback`] to follow a
//! case through rendering, conversion (including every engine attempt) and
//! persistence.
//!
//! # Example
//!
//! ```rust
//! use lexprep::{GenerationConfig, GenerationProgressCallback, PipelineStage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} finished in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = GenerationConfig::builder()
//!     .progress_callback(Arc::new(StageCounter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ConverterError;
use std::fmt;
use std::sync::Arc;

/// The steps of [`crate::generate::generate_case`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Substituting the context into the template.
    Render,
    /// Producing the secondary artifact.
    Convert,
    /// Writing the case row.
    Persist,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Render => write!(f, "render"),
            PipelineStage::Convert => write!(f, "convert"),
            PipelineStage::Persist => write!(f, "persist"),
        }
    }
}

/// Called by the generation pipeline as a case moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`; a callback
/// may be shared by concurrent generations.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage_start(&self, stage: PipelineStage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: PipelineStage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called before a converter engine is tried.
    ///
    /// # Arguments
    /// * `engine`  — engine name, e.g. `"soffice"`
    /// * `attempt` — 1-indexed position in the engine order
    fn on_engine_attempt(&self, engine: &str, attempt: usize) {
        let _ = (engine, attempt);
    }

    /// Called when an engine fails or its output is rejected; the chain
    /// moves on to the next engine afterwards.
    fn on_engine_failure(&self, engine: &str, error: &ConverterError) {
        let _ = (engine, error);
    }

    /// Called once the case row is committed.
    fn on_generation_complete(&self, case_id: i64) {
        let _ = case_id;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::GenerationConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        stages: Mutex<Vec<PipelineStage>>,
        attempts: AtomicUsize,
        failures: AtomicUsize,
    }

    impl GenerationProgressCallback for TrackingCallback {
        fn on_stage_complete(&self, stage: PipelineStage, _elapsed_ms: u64) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_engine_attempt(&self, _engine: &str, _attempt: usize) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_engine_failure(&self, _engine: &str, _error: &ConverterError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(PipelineStage::Render);
        cb.on_stage_complete(PipelineStage::Render, 3);
        cb.on_engine_attempt("pandoc", 1);
        cb.on_engine_failure(
            "pandoc",
            &ConverterError::MissingOutput {
                engine: "pandoc".into(),
                path: "x.rtf".into(),
            },
        );
        cb.on_generation_complete(7);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_engine_attempt("soffice", 1);
        tracker.on_engine_failure(
            "soffice",
            &ConverterError::Launch {
                engine: "soffice".into(),
                detail: "not found".into(),
            },
        );
        tracker.on_engine_attempt("pandoc", 2);
        tracker.on_stage_complete(PipelineStage::Convert, 10);

        assert_eq!(tracker.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.stages.lock().unwrap(), vec![PipelineStage::Convert]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(PipelineStage::Persist);
        assert_eq!(PipelineStage::Persist.to_string(), "persist");
    }
}
