//! OCR orchestration across the (variant x zone x profile) grid.
//!
//! Attempts fan out over a bounded worker set; each zone carries an
//! atomic "satisfied" flag checked before every attempt so remaining
//! combinations are skipped cooperatively once confidence is sufficient.
//! Per-attempt timeouts and a wall-clock budget bound the whole grid.
//! Results for the same zone may complete out of order; merging keeps the
//! highest-confidence result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::OcrConfig;
use crate::error::Result;
use crate::models::ZoneType;
use crate::ocr::engine::{EngineOcrResult, OcrEngine, OcrError};
use crate::pipeline::crop::CroppedZone;

/// Outcome of one (variant, zone, profile) attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success { confidence: f32 },
    Timeout { elapsed_ms: u64 },
    Failed { message: String },
    SkippedSatisfied,
    SkippedBudget,
}

/// Record of one attempt for the orchestration report.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub zone_type: ZoneType,
    pub variant_rank: usize,
    pub profile: String,
    pub outcome: AttemptOutcome,
}

/// Best OCR result for one zone, with the crop it came from.
#[derive(Debug, Clone)]
pub struct ZoneOcrResult {
    pub crop: CroppedZone,
    pub result: EngineOcrResult,
    /// Rank of the variant the winning crop came from.
    pub variant_rank: usize,
}

#[derive(Debug)]
pub struct OrchestratorReport {
    /// Highest-confidence result per zone type.
    pub zone_results: HashMap<ZoneType, ZoneOcrResult>,
    pub attempts: Vec<AttemptRecord>,
    pub elapsed_ms: u64,
}

impl OrchestratorReport {
    pub fn executed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| {
                matches!(
                    a.outcome,
                    AttemptOutcome::Success { .. }
                        | AttemptOutcome::Timeout { .. }
                        | AttemptOutcome::Failed { .. }
                )
            })
            .count()
    }
}

pub struct OcrOrchestrator {
    config: OcrConfig,
    engine: Arc<dyn OcrEngine>,
}

struct PlannedAttempt {
    zone_type: ZoneType,
    variant_rank: usize,
    profile_name: String,
    crop: CroppedZone,
}

impl OcrOrchestrator {
    pub fn new(config: OcrConfig, engine: Arc<dyn OcrEngine>) -> Self {
        Self { config, engine }
    }

    /// Run OCR over cropped zones from all ranked variants.
    ///
    /// `batches` pairs each variant rank with its zone crops, best-ranked
    /// variant first, as produced by the batch cropper.
    pub async fn run(&self, batches: &[(usize, Vec<CroppedZone>)]) -> Result<OrchestratorReport> {
        let start = Instant::now();
        let plan = self.build_plan(batches);

        // One satisfied flag per zone type, shared with every attempt.
        let mut flags: HashMap<ZoneType, Arc<AtomicBool>> = HashMap::new();
        for attempt in &plan {
            flags
                .entry(attempt.zone_type)
                .or_insert_with(|| Arc::new(AtomicBool::new(false)));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let executed = Arc::new(AtomicUsize::new(0));
        let budget = Duration::from_millis(self.config.wall_clock_budget_ms);
        let mut tasks: JoinSet<(ZoneType, usize, String, Option<CroppedZone>, AttemptOutcome, Option<EngineOcrResult>)> =
            JoinSet::new();

        for attempt in plan {
            let satisfied = flags[&attempt.zone_type].clone();
            let semaphore = semaphore.clone();
            let executed = executed.clone();
            let engine = self.engine.clone();
            let profile = match self.config.profiles.get(&attempt.profile_name) {
                Some(p) => p.clone(),
                None => continue,
            };
            let max_attempts = self.config.max_attempts;

            tasks.spawn(async move {
                let PlannedAttempt {
                    zone_type,
                    variant_rank,
                    profile_name,
                    crop,
                } = attempt;

                let _permit = match semaphore.acquire().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            zone_type,
                            variant_rank,
                            profile_name,
                            None,
                            AttemptOutcome::SkippedBudget,
                            None,
                        )
                    }
                };

                // Cooperative early stop: cheap check before doing work.
                if satisfied.load(Ordering::Acquire) {
                    return (
                        zone_type,
                        variant_rank,
                        profile_name,
                        None,
                        AttemptOutcome::SkippedSatisfied,
                        None,
                    );
                }
                if start.elapsed() > budget
                    || executed.fetch_add(1, Ordering::SeqCst) >= max_attempts
                {
                    return (
                        zone_type,
                        variant_rank,
                        profile_name,
                        None,
                        AttemptOutcome::SkippedBudget,
                        None,
                    );
                }

                let timeout = Duration::from_millis(profile.timeout_ms);
                let image_path = crop.image_path.clone();
                let call = tokio::task::spawn_blocking(move || engine.process(&image_path, &profile));
                let attempt_start = Instant::now();

                match tokio::time::timeout(timeout, call).await {
                    Err(_) => {
                        let elapsed_ms = attempt_start.elapsed().as_millis() as u64;
                        (
                            zone_type,
                            variant_rank,
                            profile_name,
                            None,
                            AttemptOutcome::Timeout { elapsed_ms },
                            None,
                        )
                    }
                    Ok(Err(join_err)) => (
                        zone_type,
                        variant_rank,
                        profile_name,
                        None,
                        AttemptOutcome::Failed {
                            message: join_err.to_string(),
                        },
                        None,
                    ),
                    Ok(Ok(Err(OcrError::Timeout { elapsed_ms }))) => (
                        zone_type,
                        variant_rank,
                        profile_name,
                        None,
                        AttemptOutcome::Timeout { elapsed_ms },
                        None,
                    ),
                    Ok(Ok(Err(e))) => (
                        zone_type,
                        variant_rank,
                        profile_name,
                        None,
                        AttemptOutcome::Failed {
                            message: e.to_string(),
                        },
                        None,
                    ),
                    Ok(Ok(Ok(mut result))) => {
                        result.profile_used = profile_name.clone();
                        let confidence = result.avg_confidence;
                        (
                            zone_type,
                            variant_rank,
                            profile_name,
                            Some(crop),
                            AttemptOutcome::Success { confidence },
                            Some(result),
                        )
                    }
                }
            });
        }

        let mut zone_results: HashMap<ZoneType, ZoneOcrResult> = HashMap::new();
        let mut attempts = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (zone_type, variant_rank, profile, crop, outcome, result) = match joined {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "ocr attempt task aborted");
                    continue;
                }
            };
            if let (Some(crop), Some(result)) = (crop, result) {
                // Out-of-order completion: highest confidence wins, not
                // last write.
                let better = zone_results
                    .get(&zone_type)
                    .map_or(true, |existing| {
                        result.avg_confidence > existing.result.avg_confidence
                    });
                if better {
                    if result.avg_confidence >= self.config.early_stop_confidence {
                        flags[&zone_type].store(true, Ordering::Release);
                    }
                    zone_results.insert(
                        zone_type,
                        ZoneOcrResult {
                            crop,
                            result,
                            variant_rank,
                        },
                    );
                }
            }
            attempts.push(AttemptRecord {
                zone_type,
                variant_rank,
                profile,
                outcome,
            });
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            zones = zone_results.len(),
            attempts = attempts.len(),
            elapsed_ms,
            "ocr orchestration complete"
        );
        Ok(OrchestratorReport {
            zone_results,
            attempts,
            elapsed_ms,
        })
    }

    /// Expand the (variant x zone x profile) grid, ordered so the most
    /// promising combinations run first: zone priority, then variant
    /// rank, then profile order.
    fn build_plan(&self, batches: &[(usize, Vec<CroppedZone>)]) -> Vec<PlannedAttempt> {
        let mut plan = Vec::new();
        for (rank, crops) in batches {
            for crop in crops {
                for profile_name in self.config.profiles_for_zone(crop.zone.zone_type.as_str()) {
                    plan.push(PlannedAttempt {
                        zone_type: crop.zone.zone_type,
                        variant_rank: *rank,
                        profile_name,
                        crop: crop.clone(),
                    });
                }
            }
        }
        plan.sort_by_key(|a| (a.crop.zone.priority, a.variant_rank));
        plan
    }
}
