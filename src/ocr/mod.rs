//! OCR engines and orchestration.

pub mod engine;
pub mod orchestrator;
pub mod tesseract;

pub use engine::{EngineOcrResult, OcrEngine, OcrError};
pub use orchestrator::{
    AttemptOutcome, AttemptRecord, OcrOrchestrator, OrchestratorReport, ZoneOcrResult,
};
pub use tesseract::TesseractEngine;
