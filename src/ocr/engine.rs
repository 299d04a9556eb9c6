//! OCR engine abstraction.
//!
//! Engines are pluggable behind the `OcrEngine` trait so the orchestrator
//! never depends on subprocess mechanics, and tests can substitute a
//! scripted engine. The bundled implementation shells out to Tesseract.

use std::path::Path;
use thiserror::Error;

use crate::config::OcrProfile;
use crate::models::OcrWord;

/// Errors from OCR engines.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Engine binary or dependency missing. Fatal for the engine, not for
    /// the document.
    #[error("Engine not available: {0}")]
    NotAvailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    /// One attempt exceeded its per-call timeout. Recorded, never fatal to
    /// sibling attempts.
    #[error("OCR timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one OCR invocation.
#[derive(Debug, Clone)]
pub struct EngineOcrResult {
    /// Extracted text, lines joined with newlines.
    pub text: String,
    /// Mean word confidence, 0-100.
    pub avg_confidence: f32,
    pub words: Vec<OcrWord>,
    pub processing_time_ms: u64,
    pub profile_used: String,
    pub engine_name: String,
}

/// Capability interface for OCR engines.
pub trait OcrEngine: Send + Sync {
    /// Stable engine identifier recorded on artifacts.
    fn engine_name(&self) -> &'static str;

    /// Whether the engine can run (binary installed, models present).
    fn is_available(&self) -> bool;

    /// What is needed to make this engine available.
    fn availability_hint(&self) -> String;

    /// Run OCR on an image with the given profile.
    ///
    /// Blocking: callers dispatch through `spawn_blocking` and enforce the
    /// profile timeout externally.
    fn process(&self, image_path: &Path, profile: &OcrProfile) -> Result<EngineOcrResult, OcrError>;
}
