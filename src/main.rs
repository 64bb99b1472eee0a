//! bucketlens - fine-grained analysis of evaluated systems
//!
//! Fetches bucketed analyses for one or two systems from the evaluation
//! backend, prints the aligned report and pages through drill-down cases.
//!
//! # Usage
//!
//! ```bash
//! # Single analysis with the backend's default bucketing
//! bucketlens analyze --systems 64f0c2
//!
//! # Pairwise analysis with custom bounds for `length`
//! bucketlens analyze --systems 64f0c2,64f0c3 --bucket length=3,7
//!
//! # Second page of the cases behind bar #1 of length under F1
//! bucketlens cases --systems 64f0c2 --metric F1 --feature length --bucket-index 0 --page 1
//! ```
//!
//! # Environment Variables
//!
//! - `BUCKETLENS_CONFIG`: Path to a TOML config file (default: ./bucketlens.toml)
//! - `BUCKETLENS_API_TOKEN`: Bearer token for the evaluation backend
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use bucketlens::analysis::{ComboMatrix, NoticeLevel};
use bucketlens::{
    AnalysisBackend, AnalysisOrchestrator, AnalysisSession, ClientConfig, DrillDownResolver,
    HttpBackend, ParsedResults, RefreshOutcome, SystemModel,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "bucketlens")]
#[command(about = "Single and pairwise fine-grained system analysis")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides BUCKETLENS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the backend base URL
    #[arg(long, global = true, value_name = "URL")]
    backend: Option<String>,

    /// Bearer token for the evaluation backend
    #[arg(long, global = true, env = "BUCKETLENS_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print JSON instead of a text report
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Args, Debug)]
struct SystemArgs {
    /// Comma-separated system IDs (one for single, two for pairwise analysis)
    #[arg(long, value_delimiter = ',', required = true)]
    systems: Vec<String>,

    /// Custom bucket bounds, repeatable (e.g. --bucket length=3,7)
    #[arg(long = "bucket", value_name = "FEATURE=B1,B2,..", value_parser = parse_bucket_override)]
    buckets: Vec<BucketOverride>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Fetch and print the fine-grained analysis report
    Analyze {
        #[command(flatten)]
        systems: SystemArgs,
    },

    /// Print one page of the cases behind a bar
    Cases {
        #[command(flatten)]
        systems: SystemArgs,
        /// Metric name of the chart
        #[arg(long)]
        metric: String,
        /// Feature name of the chart
        #[arg(long)]
        feature: String,
        /// Zero-based bar index
        #[arg(long)]
        bucket_index: usize,
        /// Zero-based index of the system whose cases are listed
        #[arg(long, default_value = "0")]
        system_index: usize,
        /// Zero-based page number
        #[arg(long, default_value = "0")]
        page: usize,
    },

    /// List metric descriptions known to the backend
    Metrics,

    /// Print the effective configuration as TOML
    ShowConfig,
}

/// `--bucket feature=b1,b2,..`: interior bucket bounds for one feature.
#[derive(Debug, Clone)]
struct BucketOverride {
    feature: String,
    bounds: Vec<f64>,
}

fn parse_bucket_override(raw: &str) -> std::result::Result<BucketOverride, String> {
    let (feature, bounds) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FEATURE=B1,B2,.. but got '{raw}'"))?;
    let bounds = bounds
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid bound '{s}' for {feature}: {e}"))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(BucketOverride {
        feature: feature.trim().to_string(),
        bounds,
    })
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(args: &CliArgs) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::load(),
    };
    if let Some(url) = &args.backend {
        config.backend.base_url.clone_from(url);
    }
    if let Some(token) = &args.token {
        config.backend.api_token = Some(token.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// ============================================================================
// Analysis
// ============================================================================

/// Open a session, run the first load, then apply any `--bucket` overrides.
async fn run_analysis<B: AnalysisBackend>(
    orchestrator: &AnalysisOrchestrator<B>,
    args: &SystemArgs,
) -> Result<AnalysisSession> {
    let mut session = AnalysisSession::new();
    session.open(
        args.systems
            .iter()
            .map(|id| SystemModel::new(id.as_str(), id.as_str()))
            .collect(),
    );

    // Ctrl+C aborts the in-flight recompute
    let close = session.close_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, cancelling analysis...");
        close.close();
    });

    expect_success(orchestrator.refresh(&mut session).await)?;

    if !args.buckets.is_empty() {
        for over in &args.buckets {
            session
                .intervals_mut()
                .update(&over.feature, over.bounds.clone())
                .with_context(|| format!("Cannot rebucket feature '{}'", over.feature))?;
        }
        session.request_update();
        expect_success(orchestrator.refresh(&mut session).await)?;
    }

    Ok(session)
}

fn expect_success(outcome: RefreshOutcome) -> Result<()> {
    match outcome {
        RefreshOutcome::Success | RefreshOutcome::Skipped => Ok(()),
        RefreshOutcome::Failed(e) if e.is_fatal() => {
            Err(anyhow::Error::new(e).context(bucketlens::analysis::FALLBACK_MESSAGE))
        }
        RefreshOutcome::Failed(e) => Err(anyhow::Error::new(e).context("Analysis failed")),
        RefreshOutcome::Cancelled | RefreshOutcome::Stale => {
            Err(anyhow::anyhow!("Analysis was cancelled"))
        }
    }
}

/// One bucket label on a single line: `"0.00\n|\n5.00"` becomes `0.00 - 5.00`.
fn inline_label(name: &str) -> String {
    name.split('\n')
        .filter(|part| !part.is_empty() && *part != "|")
        .collect::<Vec<_>>()
        .join(" - ")
}

fn print_report(title: &str, systems: &[SystemModel], results: &ParsedResults) {
    println!("== {title} ==");
    let mut combos_printed = false;

    for (metric, features) in results.iter() {
        for (feature, per_system) in features {
            let Some(first) = per_system.first() else {
                continue;
            };
            if first.is_combo() {
                if combos_printed {
                    continue;
                }
                println!("\n[combo] {} ({})", feature, first.feature_description);
                for (system, parsed) in systems.iter().zip(per_system) {
                    let matrix = ComboMatrix::from_result(parsed);
                    for cell in &matrix.cells {
                        println!(
                            "  {:<12} ({}, {})  count={}  ratio={:.3}",
                            system.system_name,
                            matrix.categories[cell.row],
                            matrix.categories[cell.column],
                            cell.count,
                            cell.ratio
                        );
                    }
                }
                continue;
            }

            println!("\n[{metric}] {feature} ({})", first.feature_description);
            for (bucket, name) in first.bucket_names.iter().enumerate() {
                for (system, parsed) in systems.iter().zip(per_system) {
                    let value = parsed.values.get(bucket).copied().unwrap_or_default();
                    let n = parsed.numbers_of_samples.get(bucket).copied().unwrap_or_default();
                    let ci = parsed
                        .confidence_scores
                        .get(bucket)
                        .map(|(lo, hi)| format!("  [{lo:.3}, {hi:.3}]"))
                        .unwrap_or_default();
                    println!(
                        "  #{:<3} {:<20} {:<12} value={value:.3}  n={n}{ci}",
                        bucket + 1,
                        inline_label(name),
                        system.system_name
                    );
                }
            }
        }
        combos_printed = true;
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let logger = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.log_json {
        logger.json().init();
    } else {
        logger.init();
    }
    let config = load_config(&args)?;

    if let SubCommand::ShowConfig = &args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let backend = HttpBackend::from_config(&config.backend)
        .context("Failed to build backend HTTP client")?;
    info!(backend = %backend.base_url(), "Using evaluation backend");
    let orchestrator = AnalysisOrchestrator::from_config(backend, &config.analysis);

    match &args.command {
        SubCommand::Analyze { systems } => {
            let session = run_analysis(&orchestrator, systems).await?;
            let results = session
                .results()
                .context("Backend returned no analysis results")?;
            if args.json {
                let report = serde_json::json!({
                    "title": session.title(),
                    "results": results,
                    "insights": session.insights(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&session.title(), session.systems(), results);
                for insight in session.insights() {
                    println!("\n[insight] {}", serde_json::to_string(insight)?);
                }
            }
        }

        SubCommand::Cases {
            systems,
            metric,
            feature,
            bucket_index,
            system_index,
            page,
        } => {
            let session = run_analysis(&orchestrator, systems).await?;
            let results = session
                .results()
                .context("Backend returned no analysis results")?;

            let mut resolver = DrillDownResolver::from_config(&config.analysis);
            let title = resolver
                .resolve(
                    results,
                    session.systems(),
                    metric,
                    feature,
                    *bucket_index,
                    *system_index,
                )?
                .title
                .clone();
            resolver.set_page(*page)?;
            let pages = resolver.page_count();
            let table = resolver.load_page(orchestrator.backend()).await;

            if let Some(notice) = &table.notice {
                match notice.level {
                    NoticeLevel::Warning => warn!("{}", notice.message),
                    NoticeLevel::Error => anyhow::bail!("Case fetch failed: {}", notice.message),
                }
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(table)?);
            } else {
                println!("== {title} ==");
                println!("page {} of {pages} ({} cases)", page + 1, table.total);
                for row in &table.rows {
                    println!("{}", serde_json::to_string(row)?);
                }
            }
        }

        SubCommand::Metrics => {
            let descriptions = orchestrator
                .backend()
                .metric_descriptions()
                .await
                .context("Failed to fetch metric descriptions")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&descriptions)?);
            } else {
                for (metric, description) in &descriptions {
                    println!("{metric:<24} {description}");
                }
            }
        }

        SubCommand::ShowConfig => {}
    }

    Ok(())
}
