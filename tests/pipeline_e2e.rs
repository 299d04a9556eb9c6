//! End-to-end pipeline runs against a synthetic invoice with a scripted
//! OCR engine standing in for Tesseract.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use tempfile::TempDir;

use ledgerlens::config::{OcrProfile, PipelineConfig};
use ledgerlens::models::{DecisionSource, FieldFlag, ReviewStatus};
use ledgerlens::ocr::{EngineOcrResult, OcrEngine, OcrError};
use ledgerlens::pipeline::PipelineRunner;
use ledgerlens::review::ReviewService;
use ledgerlens::store::ArtifactStore;

/// Returns zone-appropriate text based on the crop file name, which the
/// cropper builds as `{variant}-{zone}.png`.
struct ScriptedEngine {
    total_line: String,
}

impl OcrEngine for ScriptedEngine {
    fn engine_name(&self) -> &'static str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn availability_hint(&self) -> String {
        "always available".to_string()
    }

    fn process(
        &self,
        image_path: &Path,
        _profile: &OcrProfile,
    ) -> Result<EngineOcrResult, OcrError> {
        let name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let text = if name.contains("header_fields") {
            format!(
                "Invoice #: INV-1001\nDate: {}",
                Utc::now().format("%m/%d/%Y")
            )
        } else if name.contains("totals_box") {
            format!("Subtotal: $50.00\nTax: $5.00\n{}", self.total_line)
        } else if name.contains("line_items") {
            "Widget A   2   25.00\nService fee 1   0.00".to_string()
        } else {
            "Thank you for your business".to_string()
        };
        Ok(EngineOcrResult {
            text,
            avg_confidence: 92.0,
            words: Vec::new(),
            processing_time_ms: 1,
            profile_used: String::new(),
            engine_name: "scripted".to_string(),
        })
    }
}

/// Header text, ruled line-items table, totals block bottom-right.
fn write_synthetic_invoice(path: &Path) {
    let mut img = GrayImage::from_pixel(600, 800, Luma([255u8]));
    for row in 0..4 {
        draw_filled_rect_mut(
            &mut img,
            Rect::at(40, 40 + row * 24).of_size(300, 8),
            Luma([0u8]),
        );
    }
    for row in 0..6 {
        let y = 260 + row * 40;
        draw_filled_rect_mut(&mut img, Rect::at(40, y).of_size(520, 2), Luma([0u8]));
        draw_filled_rect_mut(&mut img, Rect::at(50, y + 12).of_size(400, 8), Luma([0u8]));
    }
    for row in 0..3 {
        draw_filled_rect_mut(
            &mut img,
            Rect::at(380, 540 + row * 22).of_size(180, 8),
            Luma([0u8]),
        );
    }
    img.save(path).unwrap();
}

struct Harness {
    _dir: TempDir,
    runner: PipelineRunner,
    review: ReviewService,
    invoice: std::path::PathBuf,
}

fn harness(total_line: &str) -> Harness {
    let dir = TempDir::new().unwrap();
    let invoice = dir.path().join("invoice.png");
    write_synthetic_invoice(&invoice);

    let config = PipelineConfig::default();
    let store = Arc::new(
        ArtifactStore::open(&dir.path().join("artifacts"), config.store.clone()).unwrap(),
    );
    let review =
        ReviewService::open(dir.path().join("cases.json"), config.review.clone()).unwrap();
    let engine = Arc::new(ScriptedEngine {
        total_line: total_line.to_string(),
    });
    let runner = PipelineRunner::new(config, store, engine);
    Harness {
        _dir: dir,
        runner,
        review,
        invoice,
    }
}

#[tokio::test]
async fn test_clean_invoice_auto_approves() {
    let h = harness("Total: $55.00");
    let report = h
        .runner
        .run_document(&h.invoice, None, Vec::new(), &h.review)
        .await
        .unwrap();

    assert_eq!(report.pages.len(), 1);
    assert_eq!(report.pages[0].rotation_applied, 0);
    assert!(report.pages[0].zones_detected >= 3);
    assert!(report.pages[0].ocr_attempts >= 1);

    let case = &report.review_case;
    assert_eq!(
        case.field("invoice_number").unwrap().normalized_value,
        "INV-1001"
    );
    assert_eq!(case.field("subtotal").unwrap().normalized_value, "50.00");
    assert_eq!(case.field("tax").unwrap().normalized_value, "5.00");
    assert_eq!(case.field("total").unwrap().normalized_value, "55.00");

    assert!(case.validation.hard_issues.is_empty());
    assert!(case.validation.can_approve);
    assert!(case.overall_confidence >= 85.0);
    assert_eq!(case.status, ReviewStatus::Approved);
}

#[tokio::test]
async fn test_mismatched_total_blocks_until_decided() {
    let h = harness("Total: $60.00");
    let report = h
        .runner
        .run_document(&h.invoice, None, Vec::new(), &h.review)
        .await
        .unwrap();

    let case = &report.review_case;
    assert_eq!(case.status, ReviewStatus::NeedsReview);
    assert!(!case.validation.can_approve);
    assert!(case
        .field("total")
        .unwrap()
        .has_flag(FieldFlag::CrossValidationFailed));

    // A human confirms each of the three amounts; the hard issues clear.
    for (field, value) in [("subtotal", "50.00"), ("tax", "5.00"), ("total", "55.00")] {
        h.review
            .record_decision(&case.id, field, value, DecisionSource::User, "reviewer")
            .unwrap();
    }
    let updated = h.review.get(&case.id).unwrap();
    assert!(updated.validation.can_approve);

    let approved = h.review.approve(&case.id, "reviewer").unwrap();
    assert_eq!(approved.status, ReviewStatus::Approved);
}

#[tokio::test]
async fn test_artifact_tree_is_stored_and_idempotent() {
    let h = harness("Total: $55.00");
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::default();
    let store = Arc::new(
        ArtifactStore::open(&dir.path().join("artifacts"), config.store.clone()).unwrap(),
    );
    let engine = Arc::new(ScriptedEngine {
        total_line: "Total: $55.00".to_string(),
    });
    let runner = PipelineRunner::new(config, store.clone(), engine);

    let report = runner
        .run_document(&h.invoice, None, Vec::new(), &h.review)
        .await
        .unwrap();
    let first_count = store.stats().artifact_count;
    assert!(store.contains(&report.input_artifact_id));
    assert!(first_count > 3, "expected input, page, variants, and zones");

    // Same document again: content-addressed ids mean no duplicates for
    // the input artifact.
    let again = runner
        .run_document(&h.invoice, None, Vec::new(), &h.review)
        .await
        .unwrap();
    assert_eq!(again.input_artifact_id, report.input_artifact_id);
}
