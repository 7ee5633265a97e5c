//! Pipeline stages for template-to-case generation.
//!
//! Each submodule implements one transformation step and can be used and
//! tested on its own; [`crate::generate`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! template ──▶ scan ──▶ infer ──▶ (manifest saved)
//!
//! manifest + form ──▶ context ──▶ render ──▶ convert
//!                    (nested)    (.docx)    (.rtf)
//! ```
//!
//! 1. [`docx`]    — zip container access and WordprocessingML text runs
//! 2. [`scan`]    — collect distinct `{{ token }}` placeholders
//! 3. [`infer`]   — classify tokens into scalar and repeated-group fields
//! 4. [`context`] — rebuild the nested context from flat form paths
//! 5. [`render`]  — substitute the context, expanding repeated rows and
//!    paragraph blocks
//! 6. [`convert`] — external converter engines with fallback; the only stage
//!    that spawns processes
//! 7. [`rtf`]     — visible-text extraction used by the conversion sanity check

pub mod context;
pub mod convert;
pub mod docx;
pub mod infer;
pub mod render;
pub mod rtf;
pub mod scan;
