//! LedgerLens - invoice OCR enhancement pipeline.
//!
//! Ingests scanned or photographed invoices, corrects orientation,
//! masks noise with cleanup shields, generates preprocessing variants,
//! detects semantic zones, runs budgeted OCR across the
//! (variant x zone x profile) grid with early stopping, resolves field
//! values through consensus and cross-validation, calibrates confidence
//! against review outcomes, and routes low-confidence documents to a
//! human review workflow. Every stage output is an immutable,
//! content-addressed artifact traceable back to the original input.

pub mod calibrate;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod resolve;
pub mod review;
pub mod store;

pub use error::{PipelineError, Result};
