//! Confidence calibration against observed review outcomes.
//!
//! Data points are append-only. Calibration maps a predicted confidence
//! to the observed accuracy of its decile bucket, preferring the vendor
//! pool when it has enough samples, then the global pool, and otherwise
//! returning the prediction unchanged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::CalibrationConfig;
use crate::error::{PipelineError, Result};
use crate::models::CalibrationDataPoint;

/// Per-bucket observed accuracy for reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BucketStats {
    pub bucket: usize,
    pub samples: usize,
    /// Fraction correct, 0.0-1.0.
    pub accuracy: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CalibrationStats {
    pub total_samples: usize,
    pub vendor_counts: HashMap<String, usize>,
    pub buckets: Vec<BucketStats>,
    /// Mean absolute gap between bucket midpoint and observed accuracy,
    /// as a fraction. `None` below the sample minimum.
    pub calibration_error: Option<f64>,
}

pub struct ConfidenceCalibrator {
    config: CalibrationConfig,
    path: Option<PathBuf>,
    points: Mutex<Vec<CalibrationDataPoint>>,
}

impl ConfidenceCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            path: None,
            points: Mutex::new(Vec::new()),
        }
    }

    /// File-backed calibrator; loads any existing data points.
    pub fn open(path: PathBuf, config: CalibrationConfig) -> Result<Self> {
        let points = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };
        Ok(Self {
            config,
            path: Some(path),
            points: Mutex::new(points),
        })
    }

    /// Append one observation. Never overwrites.
    pub fn record(&self, point: CalibrationDataPoint) -> Result<()> {
        let mut points = self.lock()?;
        points.push(point);
        self.persist(&points)
    }

    /// Map a predicted confidence (0-100) through the observed accuracy of
    /// its bucket. Falls back vendor -> global -> unchanged.
    pub fn calibrate_confidence(&self, predicted: f64, vendor_id: Option<&str>) -> Result<f64> {
        let points = self.lock()?;
        let bucket = bucket_of(predicted);

        if let Some(vendor) = vendor_id {
            let pool: Vec<&CalibrationDataPoint> = points
                .iter()
                .filter(|p| p.vendor_id.as_deref() == Some(vendor))
                .collect();
            if pool.len() >= self.config.min_samples {
                if let Some(accuracy) = bucket_accuracy(&pool, bucket) {
                    return Ok(accuracy * 100.0);
                }
            }
        }

        let pool: Vec<&CalibrationDataPoint> = points.iter().collect();
        if pool.len() >= self.config.min_samples {
            if let Some(accuracy) = bucket_accuracy(&pool, bucket) {
                return Ok(accuracy * 100.0);
            }
        }
        Ok(predicted)
    }

    /// Whether the chosen pool's calibration error exceeds the drift
    /// threshold. Insufficient data never flags drift.
    pub fn needs_recalibration(&self, vendor_id: Option<&str>) -> Result<bool> {
        let points = self.lock()?;
        let pool: Vec<&CalibrationDataPoint> = match vendor_id {
            Some(vendor) => points
                .iter()
                .filter(|p| p.vendor_id.as_deref() == Some(vendor))
                .collect(),
            None => points.iter().collect(),
        };
        if pool.len() < self.config.min_samples {
            return Ok(false);
        }
        Ok(calibration_error(&pool).map_or(false, |e| e > self.config.drift_threshold))
    }

    pub fn stats(&self) -> Result<CalibrationStats> {
        let points = self.lock()?;
        let pool: Vec<&CalibrationDataPoint> = points.iter().collect();

        let mut vendor_counts: HashMap<String, usize> = HashMap::new();
        for p in pool.iter() {
            if let Some(v) = &p.vendor_id {
                *vendor_counts.entry(v.clone()).or_insert(0) += 1;
            }
        }
        let buckets = (0..10)
            .filter_map(|b| {
                let samples = pool.iter().filter(|p| p.bucket() == b).count();
                bucket_accuracy(&pool, b).map(|accuracy| BucketStats {
                    bucket: b,
                    samples,
                    accuracy,
                })
            })
            .collect();
        let calibration_error = if pool.len() >= self.config.min_samples {
            calibration_error(&pool)
        } else {
            None
        };
        Ok(CalibrationStats {
            total_samples: pool.len(),
            vendor_counts,
            buckets,
            calibration_error,
        })
    }

    /// Copy of every recorded point, for export.
    pub fn export(&self) -> Result<Vec<CalibrationDataPoint>> {
        Ok(self.lock()?.clone())
    }

    /// Explicit wipe. The only way data points ever leave the store.
    pub fn clear(&self) -> Result<usize> {
        let mut points = self.lock()?;
        let removed = points.len();
        points.clear();
        self.persist(&points)?;
        Ok(removed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<CalibrationDataPoint>>> {
        self.points
            .lock()
            .map_err(|_| PipelineError::ProcessingFailed("calibration store poisoned".to_string()))
    }

    fn persist(&self, points: &[CalibrationDataPoint]) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(points)?)?;
        }
        Ok(())
    }
}

fn bucket_of(confidence: f64) -> usize {
    ((confidence / 10.0).floor() as usize).min(9)
}

fn bucket_accuracy(pool: &[&CalibrationDataPoint], bucket: usize) -> Option<f64> {
    let in_bucket: Vec<&&CalibrationDataPoint> =
        pool.iter().filter(|p| p.bucket() == bucket).collect();
    if in_bucket.is_empty() {
        return None;
    }
    let correct = in_bucket.iter().filter(|p| p.actual_correct).count();
    Some(correct as f64 / in_bucket.len() as f64)
}

/// Mean absolute difference between bucket midpoints and observed
/// accuracy, over non-empty buckets, as a fraction.
fn calibration_error(pool: &[&CalibrationDataPoint]) -> Option<f64> {
    let mut gaps = Vec::new();
    for bucket in 0..10 {
        if let Some(accuracy) = bucket_accuracy(pool, bucket) {
            let midpoint = (bucket as f64 * 10.0 + 5.0) / 100.0;
            gaps.push((midpoint - accuracy).abs());
        }
    }
    if gaps.is_empty() {
        return None;
    }
    Some(gaps.iter().sum::<f64>() / gaps.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(
        n: usize,
        predicted: f64,
        correct_every: usize,
        vendor: Option<&str>,
    ) -> Vec<CalibrationDataPoint> {
        (0..n)
            .map(|i| {
                CalibrationDataPoint::new(
                    predicted,
                    correct_every != 0 && i % correct_every == 0,
                    "total",
                    vendor,
                )
            })
            .collect()
    }

    fn calibrator() -> ConfidenceCalibrator {
        ConfidenceCalibrator::new(CalibrationConfig::default())
    }

    #[test]
    fn test_insufficient_data_returns_input_unchanged() {
        let cal = calibrator();
        for p in points(10, 90.0, 1, None) {
            cal.record(p).unwrap();
        }
        assert_eq!(cal.calibrate_confidence(92.0, None).unwrap(), 92.0);
    }

    #[test]
    fn test_global_pool_maps_to_bucket_accuracy() {
        let cal = calibrator();
        // 100 points in the 90s bucket, 80% correct.
        for p in points(100, 92.0, 0, None) {
            cal.record(p).unwrap();
        }
        let cal2 = calibrator();
        for (i, mut p) in points(100, 92.0, 1, None).into_iter().enumerate() {
            p.actual_correct = i % 5 != 0;
            cal2.record(p).unwrap();
        }
        assert_eq!(cal2.calibrate_confidence(95.0, None).unwrap(), 80.0);
        // All-wrong pool calibrates to zero.
        assert_eq!(cal.calibrate_confidence(95.0, None).unwrap(), 0.0);
    }

    #[test]
    fn test_vendor_fallback_to_global() {
        let cal = calibrator();
        // Vendor has too few samples; global is sufficient at 100% correct.
        for p in points(10, 92.0, 1, Some("acme")) {
            cal.record(p).unwrap();
        }
        for p in points(100, 92.0, 1, None) {
            cal.record(p).unwrap();
        }
        let out = cal.calibrate_confidence(90.0, Some("acme")).unwrap();
        assert_eq!(out, 100.0);
    }

    #[test]
    fn test_vendor_pool_preferred_when_sufficient() {
        let cal = calibrator();
        // Vendor pool 50% correct, global (including vendor) much larger.
        for (i, mut p) in points(100, 92.0, 1, Some("acme")).into_iter().enumerate() {
            p.actual_correct = i % 2 == 0;
            cal.record(p).unwrap();
        }
        for p in points(200, 92.0, 1, None) {
            cal.record(p).unwrap();
        }
        assert_eq!(cal.calibrate_confidence(90.0, Some("acme")).unwrap(), 50.0);
    }

    #[test]
    fn test_drift_detection() {
        let cal = calibrator();
        // Predicted 95 (midpoint 0.95) but only 50% correct: 45% error.
        for (i, mut p) in points(120, 95.0, 1, None).into_iter().enumerate() {
            p.actual_correct = i % 2 == 0;
            cal.record(p).unwrap();
        }
        assert!(cal.needs_recalibration(None).unwrap());

        let ok = calibrator();
        // Predicted 95 and 95% correct: within the 5% threshold.
        for (i, mut p) in points(100, 95.0, 1, None).into_iter().enumerate() {
            p.actual_correct = i % 20 != 0;
            ok.record(p).unwrap();
        }
        assert!(!ok.needs_recalibration(None).unwrap());
    }

    #[test]
    fn test_export_and_clear() {
        let cal = calibrator();
        for p in points(5, 80.0, 1, None) {
            cal.record(p).unwrap();
        }
        assert_eq!(cal.export().unwrap().len(), 5);
        assert_eq!(cal.clear().unwrap(), 5);
        assert!(cal.export().unwrap().is_empty());
    }

    #[test]
    fn test_file_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        {
            let cal =
                ConfidenceCalibrator::open(path.clone(), CalibrationConfig::default()).unwrap();
            for p in points(3, 70.0, 1, Some("acme")) {
                cal.record(p).unwrap();
            }
        }
        let reopened =
            ConfidenceCalibrator::open(path, CalibrationConfig::default()).unwrap();
        assert_eq!(reopened.export().unwrap().len(), 3);
    }
}
