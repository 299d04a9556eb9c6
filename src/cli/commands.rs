//! CLI commands implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::calibrate::ConfidenceCalibrator;
use crate::config::PipelineConfig;
use crate::models::{CalibrationDataPoint, DecisionSource, ReviewStatus};
use crate::ocr::{OcrEngine, TesseractEngine};
use crate::pipeline::{
    render_shield_overlay, FileShieldRuleStore, PipelineRunner, RuleScope, ShieldEngine,
    ShieldRuleStore,
};
use crate::review::ReviewService;
use crate::store::ArtifactStore;

#[derive(Parser)]
#[command(name = "ledgerlens")]
#[command(about = "Invoice OCR enhancement pipeline")]
#[command(version)]
pub struct Cli {
    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on an invoice document
    Process {
        /// Path to the invoice (PDF, PNG, JPEG, or TIFF)
        file: PathBuf,
        /// Vendor id for lexicon overrides and calibration
        #[arg(long)]
        vendor: Option<String>,
        /// Tenant whose shield rules apply
        #[arg(long, default_value = "default")]
        tenant: String,
    },

    /// Cleanup shield operations
    Shields {
        #[command(subcommand)]
        command: ShieldCommands,
    },

    /// Review case workflow
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },

    /// Confidence calibration data
    Calibration {
        #[command(subcommand)]
        command: CalibrationCommands,
    },

    /// Evict expired artifacts from the store
    Cleanup,

    /// Show artifact store statistics
    Stats,
}

#[derive(Subcommand)]
enum ShieldCommands {
    /// Auto-detect shields on page images and print them as JSON
    Detect {
        /// Page image paths
        pages: Vec<PathBuf>,
    },
    /// Render a shield overlay image for visual inspection
    Render {
        /// Page image path
        page: PathBuf,
        /// Output image path
        #[arg(long, short)]
        output: PathBuf,
    },
    /// List active shield rules for a tenant
    Rules {
        #[arg(long, default_value = "default")]
        tenant: String,
    },
    /// Show every saved version of a rule scope
    History {
        #[arg(long, default_value = "default")]
        tenant: String,
        /// vendor or template
        #[arg(long)]
        scope: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// List review cases
    List {
        /// Only cases awaiting review
        #[arg(long)]
        pending: bool,
    },
    /// Show one case with fields, flags, and explanations
    Show { id: String },
    /// Record a decision for a field
    Decide {
        id: String,
        field: String,
        value: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Approve a case once no hard issues remain
    Approve {
        id: String,
        #[arg(long, default_value = "cli")]
        by: String,
    },
}

#[derive(Subcommand)]
enum CalibrationCommands {
    /// Bucket accuracy and drift summary
    Stats,
    /// Export every data point as JSON
    Export {
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Remove all calibration data points
    Clear,
}

struct Paths {
    artifacts: PathBuf,
    review_cases: PathBuf,
    calibration: PathBuf,
    shield_rules: PathBuf,
}

fn resolve_paths(data_dir: Option<PathBuf>) -> Paths {
    let root = data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ledgerlens")
    });
    Paths {
        artifacts: root.join("artifacts"),
        review_cases: root.join("review").join("cases.json"),
        calibration: root.join("calibration.json"),
        shield_rules: root.join("shield_rules.json"),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(PipelineConfig::default()),
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let paths = resolve_paths(cli.data_dir.clone());

    match cli.command {
        Commands::Process {
            file,
            vendor,
            tenant,
        } => process_document(&config, &paths, &file, vendor.as_deref(), &tenant).await,
        Commands::Shields { command } => shields_command(&config, &paths, command),
        Commands::Review { command } => review_command(&config, &paths, command),
        Commands::Calibration { command } => calibration_command(&config, &paths, command),
        Commands::Cleanup => {
            let store = ArtifactStore::open(&paths.artifacts, config.store.clone())?;
            let removed = store.cleanup_expired()?;
            println!("Removed {} expired artifact(s)", removed);
            Ok(())
        }
        Commands::Stats => {
            let store = ArtifactStore::open(&paths.artifacts, config.store.clone())?;
            let stats = store.stats();
            println!("Artifacts:  {}", stats.artifact_count);
            println!("Total size: {} bytes", stats.total_bytes);
            println!("Originals:  {}", stats.original_count);
            Ok(())
        }
    }
}

async fn process_document(
    config: &PipelineConfig,
    paths: &Paths,
    file: &Path,
    vendor: Option<&str>,
    tenant: &str,
) -> anyhow::Result<()> {
    let engine: Arc<dyn OcrEngine> = Arc::new(TesseractEngine::new());
    if !engine.is_available() {
        anyhow::bail!("OCR engine unavailable: {}", engine.availability_hint());
    }

    let store = Arc::new(ArtifactStore::open(&paths.artifacts, config.store.clone())?);
    let review = ReviewService::open(paths.review_cases.clone(), config.review.clone())?;
    let rules = FileShieldRuleStore::open(&paths.shield_rules)?;
    let rule_shields = rules
        .active_rules(tenant, None, None)?
        .into_iter()
        .map(|r| r.shield)
        .collect();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Processing {}", file.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let runner = PipelineRunner::new(config.clone(), store, engine);
    let report = runner
        .run_document(file, vendor, rule_shields, &review)
        .await?;
    spinner.finish_and_clear();

    println!(
        "{} {} page(s) in {}ms",
        style("Processed").green().bold(),
        report.pages.len(),
        report.elapsed_ms
    );
    for page in &report.pages {
        println!(
            "  page {}: rotation {}°, skew {:.2}°, {} zone(s), {} variant(s) kept, {} OCR attempt(s)",
            page.page_number,
            page.rotation_applied,
            page.skew_applied,
            page.zones_detected,
            page.variants_kept,
            page.ocr_attempts
        );
        for conflict in &page.shields.conflicts {
            println!(
                "  {} shield overlaps {} by {:.0}%",
                style("warning:").yellow(),
                conflict.zone_type.as_str(),
                conflict.overlap_ratio * 100.0
            );
        }
    }

    let case = &report.review_case;
    println!();
    println!(
        "Review case {} ({})",
        style(&case.id).cyan(),
        match case.status {
            ReviewStatus::Approved => style("approved").green(),
            ReviewStatus::NeedsReview => style("needs review").yellow(),
        }
    );
    print_case_fields(case);
    Ok(())
}

fn print_case_fields(case: &crate::models::ReviewCase) {
    println!("Overall confidence: {:.0}/100", case.overall_confidence);
    for field in &case.fields {
        let marker = if field.has_hard_flag() {
            style("!").red().bold()
        } else if !field.flags.is_empty() {
            style("~").yellow()
        } else {
            style("+").green()
        };
        let value = if field.value.is_empty() {
            "(missing)"
        } else {
            field.value.as_str()
        };
        println!(
            " {} {:<16} {:<20} {:>5.0}  {}",
            marker, field.field, value, field.confidence, field.explanation
        );
    }
    for issue in &case.validation.hard_issues {
        println!("   {} {}", style("blocker:").red(), issue.message);
    }
    for issue in &case.validation.soft_issues {
        println!("   {} {}", style("note:").yellow(), issue.message);
    }
}

fn shields_command(
    config: &PipelineConfig,
    paths: &Paths,
    command: ShieldCommands,
) -> anyhow::Result<()> {
    match command {
        ShieldCommands::Detect { pages } => {
            let engine = ShieldEngine::new(config.shields.clone());
            let refs: Vec<&Path> = pages.iter().map(|p| p.as_path()).collect();
            let shields = engine.auto_detect_shields_safe(&refs);
            println!("{}", serde_json::to_string_pretty(&shields)?);
            Ok(())
        }
        ShieldCommands::Render { page, output } => {
            let engine = ShieldEngine::new(config.shields.clone());
            let shields = engine.auto_detect_shields_safe(&[page.as_path()]);
            render_shield_overlay(&page, &shields, &output)?;
            println!(
                "Rendered {} shield(s) to {}",
                shields.len(),
                output.display()
            );
            Ok(())
        }
        ShieldCommands::Rules { tenant } => {
            let store = FileShieldRuleStore::open(&paths.shield_rules)?;
            let rules = store.active_rules(&tenant, None, None)?;
            if rules.is_empty() {
                println!("No active rules for tenant {}", tenant);
                return Ok(());
            }
            for rule in rules {
                println!(
                    "{} v{} [{:?}] {:?} conf {:.2}",
                    rule.id,
                    rule.version,
                    rule.scope,
                    rule.shield.shield_type,
                    rule.shield.confidence
                );
            }
            Ok(())
        }
        ShieldCommands::History { tenant, scope, id } => {
            let store = FileShieldRuleStore::open(&paths.shield_rules)?;
            let scope = match scope.as_str() {
                "vendor" => RuleScope::Vendor { vendor_id: id },
                "template" => RuleScope::Template { template_id: id },
                other => anyhow::bail!("unknown scope {} (expected vendor or template)", other),
            };
            for rule in store.history(&tenant, &scope)? {
                println!(
                    "v{} {} by {} at {}{}",
                    rule.version,
                    if rule.active { "active" } else { "superseded" },
                    rule.created_by,
                    rule.created_at.format("%Y-%m-%d %H:%M"),
                    rule.superseded_by
                        .as_deref()
                        .map(|s| format!(" -> {}", s))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
    }
}

fn review_command(
    config: &PipelineConfig,
    paths: &Paths,
    command: ReviewCommands,
) -> anyhow::Result<()> {
    let review = ReviewService::open(paths.review_cases.clone(), config.review.clone())?;
    match command {
        ReviewCommands::List { pending } => {
            let status = pending.then_some(ReviewStatus::NeedsReview);
            let cases = review.list(status)?;
            if cases.is_empty() {
                println!("No review cases");
                return Ok(());
            }
            for case in cases {
                println!(
                    "{}  {:<12}  {:>3.0}/100  {} field(s), {} blocker(s)",
                    case.id,
                    match case.status {
                        ReviewStatus::Approved => "approved",
                        ReviewStatus::NeedsReview => "needs review",
                    },
                    case.overall_confidence,
                    case.fields.len(),
                    case.validation.hard_issues.len()
                );
            }
            Ok(())
        }
        ReviewCommands::Show { id } => {
            let case = review.get(&id)?;
            print_case_fields(&case);
            for decision in &case.decisions {
                println!(
                    "   decided {}: {} -> {} by {} ({})",
                    decision.field,
                    decision.original_value.as_deref().unwrap_or("(none)"),
                    decision.chosen_value,
                    decision.decided_by,
                    decision.decided_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        ReviewCommands::Decide {
            id,
            field,
            value,
            by,
        } => {
            let before = review.get(&id)?;
            let predicted = before
                .field(&field)
                .map(|f| f.confidence)
                .unwrap_or_default();
            let matched = before
                .field(&field)
                .map(|f| f.normalized_value == value || f.value == value)
                .unwrap_or(false);

            let updated = review.record_decision(&id, &field, &value, DecisionSource::User, &by)?;

            // Every human decision doubles as a calibration observation.
            let calibrator =
                ConfidenceCalibrator::open(paths.calibration.clone(), config.calibration.clone())?;
            calibrator.record(CalibrationDataPoint::new(
                predicted,
                matched,
                &field,
                updated.vendor_id.as_deref(),
            ))?;

            println!(
                "Recorded. Case confidence {:.0}/100, {}",
                updated.overall_confidence,
                if updated.validation.can_approve {
                    style("can approve").green()
                } else {
                    style("blockers remain").yellow()
                }
            );
            Ok(())
        }
        ReviewCommands::Approve { id, by } => {
            let case = review.approve(&id, &by)?;
            println!("Case {} {}", case.id, style("approved").green().bold());
            Ok(())
        }
    }
}

fn calibration_command(
    config: &PipelineConfig,
    paths: &Paths,
    command: CalibrationCommands,
) -> anyhow::Result<()> {
    let calibrator =
        ConfidenceCalibrator::open(paths.calibration.clone(), config.calibration.clone())?;
    match command {
        CalibrationCommands::Stats => {
            let stats = calibrator.stats()?;
            println!("Data points: {}", stats.total_samples);
            for bucket in &stats.buckets {
                println!(
                    "  {:>2}0-{}9: {:>4} sample(s), {:.0}% correct",
                    bucket.bucket,
                    bucket.bucket,
                    bucket.samples,
                    bucket.accuracy * 100.0
                );
            }
            match stats.calibration_error {
                Some(err) => {
                    let drifting = err > config.calibration.drift_threshold;
                    println!(
                        "Calibration error: {:.1}%{}",
                        err * 100.0,
                        if drifting {
                            " (drift detected, refresh calibration data)"
                        } else {
                            ""
                        }
                    );
                }
                None => println!("Not enough data for calibration error"),
            }
            Ok(())
        }
        CalibrationCommands::Export { output } => {
            let points = calibrator.export()?;
            std::fs::write(&output, serde_json::to_string_pretty(&points)?)?;
            println!(
                "Exported {} data point(s) to {}",
                points.len(),
                output.display()
            );
            Ok(())
        }
        CalibrationCommands::Clear => {
            let removed = calibrator.clear()?;
            println!("Cleared {} data point(s)", removed);
            Ok(())
        }
    }
}
