//! Ashare Collector - multi-source A-share company, industry and balance-sheet
//! data collector.

use anyhow::{anyhow, Result};
use ashare_collector::pipeline::{cancel_on_ctrl_c, CollectorPipeline, RunOptions, RunSummary};
use ashare_collector::storage::LocalStorage;
use ashare_common::config::Config;
use ashare_common::logging::init_logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "ashare-collector")]
#[command(version)]
#[command(about = "Collect A-share company, industry and balance-sheet data into a workbook", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.ashare-collector/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline: stock list, industries, financials, export
    Run {
        /// Skip codes stored by an earlier run
        #[arg(long)]
        resume: bool,
        /// Only process the first N stocks
        #[arg(long)]
        limit: Option<usize>,
        /// Concurrent workers
        #[arg(long)]
        workers: Option<usize>,
        /// Output directory for the workbook
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Fetch, validate and store the stock list only
    Stocks,
    /// Health-check every enabled source
    Sources,
    /// Show storage statistics, checkpoints and sync state
    Status,
    /// Export stored data without fetching
    Export {
        /// Output directory for the workbook
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Back up stored data to CSV/JSON and prune old backups
    Backup,
    /// Delete checkpoint files
    ClearCheckpoints {
        /// Only this stage (industry, financials)
        #[arg(long)]
        stage: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();
    let cli = Cli::parse();

    let config = Config::load_with_env(cli.config.as_deref())?;
    init_logging(&config.observability.log_level, &config.observability.log_format);
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    tracing::info!("Ashare Collector v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let pipeline = CollectorPipeline::from_config(config, cancel.clone()).await?;
    tracing::debug!(
        duration_ms = startup_start.elapsed().as_millis() as u64,
        "Initialized"
    );

    match cli.command {
        Commands::Run {
            resume,
            limit,
            workers,
            output,
        } => {
            let _listener = cancel_on_ctrl_c(cancel.clone());
            let options = RunOptions {
                resume,
                limit,
                workers,
                output_dir: output,
            };
            let summary = match pipeline.run(&options).await {
                Ok(summary) => summary,
                Err(e)
                    if e
                        .downcast_ref::<ashare_common::Error>()
                        .is_some_and(ashare_common::Error::is_interrupted) =>
                {
                    println!("Interrupted before any data was collected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            print_run_summary(&summary);
        }
        Commands::Stocks => {
            let outcome = pipeline.collect_stock_list(false).await?;
            println!("Stocks: {}", outcome.companies.len());
            println!("Sources: {}", outcome.sources.join(", "));
            println!("Validation: {}", outcome.validation);
            if let Some(diff) = outcome.diff {
                println!("Changes: {}", diff);
            }
        }
        Commands::Sources => {
            let results = pipeline.router().check_all_health().await;
            for info in pipeline.router().get_providers_info().await {
                let status = match results.iter().find(|(name, _)| *name == info.name) {
                    Some((_, true)) => "ok",
                    Some((_, false)) => "unreachable",
                    None => "disabled",
                };
                println!(
                    "{:<15} priority {:>2}  {:<11}  list={} industry={} financials={}",
                    info.name,
                    info.priority,
                    status,
                    info.capabilities.stock_list,
                    info.capabilities.industry,
                    info.capabilities.financials,
                );
            }
        }
        Commands::Status => print_status(&pipeline).await?,
        Commands::Export { output } => {
            let path = pipeline.export_stored(output).await?;
            println!("Exported {}", path.display());
        }
        Commands::Backup => {
            let report = pipeline.backups().backup_storage(pipeline.storage()).await?;
            let removed = pipeline.backups().cleanup()?;
            println!(
                "Backed up {} companies, {} industries, {} metrics to {}",
                report.companies,
                report.industries,
                report.metrics,
                report.dir.display()
            );
            if removed > 0 {
                println!("Removed {} expired backups", removed);
            }
        }
        Commands::ClearCheckpoints { stage } => {
            let removed = pipeline.checkpoints().clear(stage.as_deref())?;
            println!("Removed {} checkpoint files", removed);
        }
    }

    Ok(())
}

fn print_run_summary(summary: &RunSummary) {
    println!("Stocks: {}", summary.stocks);
    if let Some(diff) = summary.diff {
        println!("Changes: {}", diff);
    }
    for (stage, s) in [("Industries", summary.industries), ("Financials", summary.financials)] {
        println!(
            "{}: {} total, {} resumed, {} collected, {} without data, {} failed, {} skipped",
            stage, s.total, s.resumed, s.collected, s.no_data, s.failed, s.skipped
        );
    }
    println!("Validation: {}", summary.validation);
    println!(
        "Quality: {:.1} ({})",
        summary.quality.overall, summary.quality.grade
    );
    for issue in &summary.quality.issues {
        println!("  - {}", issue);
    }
    println!("Workbook: {}", summary.export_path.display());
    if summary.interrupted {
        println!("Interrupted: rerun with --resume to continue");
    }
}

async fn print_status(pipeline: &CollectorPipeline) -> Result<()> {
    let storage: &Arc<LocalStorage> = pipeline.storage();
    println!("{}", storage.get_stats().await?);
    println!("Database: {}", storage.db_path().display());

    for stage in [
        ashare_collector::pipeline::STAGE_INDUSTRY,
        ashare_collector::pipeline::STAGE_FINANCIALS,
    ] {
        match pipeline.checkpoints().latest(Some(stage))? {
            Some(cp) => println!(
                "Checkpoint {}: {:?} at {}, {}/{} processed ({} failed)",
                stage,
                cp.status,
                cp.timestamp.format("%Y-%m-%d %H:%M:%S"),
                cp.progress.processed(),
                cp.progress.total,
                cp.progress.failed
            ),
            None => println!("Checkpoint {}: none", stage),
        }
    }

    for meta in storage.list_sync_metadata().await? {
        println!(
            "Sync {}: {} at {}{}",
            meta.data_type,
            meta.sync_status,
            meta.last_sync_at.format("%Y-%m-%d %H:%M:%S"),
            meta.error_message
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }

    for version in storage.recent_versions(5).await? {
        println!(
            "Version {} at {}: {}",
            version.id,
            version.created_at.format("%Y-%m-%d %H:%M:%S"),
            version.summary
        );
    }
    Ok(())
}
