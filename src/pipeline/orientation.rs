//! Orientation correction: coarse rotation selection plus deskew.
//!
//! Each of the four 90-degree rotations is scored for readability; the
//! winner is applied, then residual skew is estimated from detected
//! near-horizontal lines and removed with an affine rotation.
//!
//! The readability score combines three signals:
//! - horizontal line structure (Hough lines with near-vertical normals);
//! - ink distribution (invoices are top-heavy: header, addresses, logo);
//! - edge density.

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};

use crate::config::OrientationConfig;
use crate::error::{PipelineError, Result};

/// Full scoring evidence retained for audit.
#[derive(Debug, Clone)]
pub struct OrientationEvidence {
    /// Readability score per rotation, indexed 0/90/180/270.
    pub rotation_scores: [f64; 4],
    /// Horizontal lines found at the chosen rotation.
    pub line_count: usize,
    /// Mean angle of those lines, degrees from horizontal.
    pub avg_line_angle: f64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct OrientationResult {
    pub image_path: PathBuf,
    /// Correction applied, degrees clockwise: 0, 90, 180, or 270.
    pub rotation: u32,
    /// Deskew angle applied after rotation, degrees.
    pub skew_angle: f64,
    /// 0.0-1.0.
    pub confidence: f64,
    pub evidence: OrientationEvidence,
}

pub struct OrientationService {
    config: OrientationConfig,
}

/// Ink threshold: pixels darker than this count as text.
const INK_THRESHOLD: u8 = 128;

/// Hough normal angles within this many degrees of vertical count as
/// horizontal lines.
const HORIZONTAL_TOLERANCE: f64 = 10.0;

impl OrientationService {
    pub fn new(config: OrientationConfig) -> Self {
        Self { config }
    }

    /// Correct the orientation of a page image, writing the result to
    /// `output_path`.
    pub fn correct(&self, image_path: &Path, output_path: &Path) -> Result<OrientationResult> {
        let start = Instant::now();
        let gray = image::open(image_path)
            .map_err(|e| {
                PipelineError::ProcessingFailed(format!(
                    "cannot decode {}: {}",
                    image_path.display(),
                    e
                ))
            })?
            .to_luma8();

        let rotations = [
            gray.clone(),
            image::imageops::rotate90(&gray),
            image::imageops::rotate180(&gray),
            image::imageops::rotate270(&gray),
        ];

        let mut scores = [0.0f64; 4];
        for (idx, rotated) in rotations.iter().enumerate() {
            scores[idx] = self.readability_score(rotated);
        }

        let best_idx = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let rotation = best_idx as u32 * 90;
        let corrected = rotations[best_idx].clone();

        // Residual skew from near-horizontal lines on the winner.
        let lines = self.horizontal_lines(&corrected);
        let line_count = lines.len();
        let angles: Vec<f64> = lines
            .iter()
            .map(|l| l.angle_in_degrees as f64 - 90.0)
            .collect();
        let avg_line_angle = if angles.is_empty() {
            0.0
        } else {
            angles.iter().sum::<f64>() / angles.len() as f64
        };
        let skew = median(&angles);

        let apply_deskew = skew.abs() > 0.1
            && skew.abs() <= self.config.max_skew_angle_degrees
            && line_count >= 3;
        let deskewed = if apply_deskew {
            rotate_about_center(
                &corrected,
                (-skew).to_radians() as f32,
                Interpolation::Bilinear,
                image::Luma([255u8]),
            )
        } else {
            corrected
        };
        let skew_applied = if apply_deskew { skew } else { 0.0 };

        deskewed.save(output_path).map_err(|e| {
            PipelineError::ProcessingFailed(format!("saving corrected page: {}", e))
        })?;

        let confidence = self.confidence(&scores, best_idx, line_count);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.time_budget_ms {
            tracing::warn!(
                elapsed_ms,
                budget_ms = self.config.time_budget_ms,
                "orientation correction exceeded its time budget"
            );
        }

        tracing::debug!(rotation, skew = skew_applied, confidence, "orientation corrected");
        Ok(OrientationResult {
            image_path: output_path.to_path_buf(),
            rotation,
            skew_angle: skew_applied,
            confidence,
            evidence: OrientationEvidence {
                rotation_scores: scores,
                line_count,
                avg_line_angle,
                elapsed_ms,
            },
        })
    }

    /// Composite readability score for one rotation, 0.0-1.0.
    fn readability_score(&self, img: &GrayImage) -> f64 {
        let lines = self.horizontal_lines(img);
        let total_lines = self.all_lines(img).len();
        let line_ratio = if total_lines == 0 {
            0.0
        } else {
            lines.len() as f64 / total_lines as f64
        };
        let line_component = (lines.len() as f64 / 10.0).min(1.0) * line_ratio;

        let (ink_total, ink_top) = ink_distribution(img);
        let text_component = if ink_total == 0 {
            0.0
        } else {
            ink_top as f64 / ink_total as f64
        };

        let edges = canny(img, 50.0, 100.0);
        let edge_pixels = edges.pixels().filter(|p| p.0[0] > 0).count();
        let edge_component =
            (edge_pixels as f64 / (img.width() as f64 * img.height() as f64) * 20.0).min(1.0);

        let w = &self.config;
        let total_weight = w.line_weight + w.text_density_weight + w.edge_density_weight;
        (w.line_weight * line_component
            + w.text_density_weight * text_component
            + w.edge_density_weight * edge_component)
            / total_weight
    }

    fn all_lines(&self, img: &GrayImage) -> Vec<PolarLine> {
        let edges = canny(img, 50.0, 100.0);
        detect_lines(
            &edges,
            LineDetectionOptions {
                vote_threshold: self.config.line_vote_threshold,
                suppression_radius: 8,
            },
        )
    }

    fn horizontal_lines(&self, img: &GrayImage) -> Vec<PolarLine> {
        self.all_lines(img)
            .into_iter()
            .filter(|l| {
                let deviation = (l.angle_in_degrees as f64 - 90.0).abs();
                deviation <= HORIZONTAL_TOLERANCE
            })
            .collect()
    }

    /// Confidence from best score, margin over runner-up, and line count.
    fn confidence(&self, scores: &[f64; 4], best_idx: usize, line_count: usize) -> f64 {
        let best = scores[best_idx];
        let second = scores
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best_idx)
            .map(|(_, s)| *s)
            .fold(0.0f64, f64::max);
        let margin = if best > 0.0 { (best - second) / best } else { 0.0 };
        let line_factor = (line_count as f64 / 10.0).min(1.0);
        (0.5 * best + 0.3 * margin + 0.2 * line_factor).clamp(0.0, 1.0)
    }
}

/// Total ink pixel count and the portion in the top half of the image.
fn ink_distribution(img: &GrayImage) -> (u64, u64) {
    let half = img.height() / 2;
    let mut total = 0u64;
    let mut top = 0u64;
    for (_, y, pixel) in img.enumerate_pixels() {
        if pixel.0[0] < INK_THRESHOLD {
            total += 1;
            if y < half {
                top += 1;
            }
        }
    }
    (total, top)
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
