use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod artifact;
mod batch;
mod config;
mod encode;
mod error;
mod features;
mod interpret;
mod models;
mod pipeline;
mod store;

use artifact::ScoringContext;
use config::ScoringConfig;

#[derive(Parser)]
#[command(name = "dropout-risk-engine")]
#[command(about = "Dropout risk scoring pipeline for school rosters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Score one student on demand
    Score {
        #[arg(long)]
        student: Uuid,
        #[arg(long, default_value = "artifacts/dropout_model.json")]
        artifact: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Sweep the active roster once
    Batch {
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
        #[arg(long, default_value = "artifacts/dropout_model.json")]
        artifact: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a daily roster sweep at a fixed local time until interrupted
    Daemon {
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: u32,
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..60))]
        minute: u32,
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
        #[arg(long, default_value = "artifacts/dropout_model.json")]
        artifact: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the latest prediction for a student
    Latest {
        #[arg(long)]
        student: Uuid,
    },
    /// Show prediction history for a student
    History {
        #[arg(long)]
        student: Uuid,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Risk-level distribution over each student's latest prediction
    Distribution,
    /// Status of the most recent batch run
    LastRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            store::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Score {
            student,
            artifact,
            config,
        } => {
            let (ctx, config) = load_scoring(&artifact, config.as_deref())?;
            let result = pipeline::score_student(&pool, &ctx, &config, student).await?;
            println!(
                "Student {} scored {:.1}/100 ({})",
                student,
                result.risk_score(),
                result.risk_level.as_str()
            );
            print_lines("Contributing factors", &result.contributing_factors);
            print_lines("Recommended interventions", &result.recommendations);
        }
        Commands::Batch {
            batch_size,
            artifact,
            config,
        } => {
            let (ctx, config) = load_scoring(&artifact, config.as_deref())?;
            // A manual run is not cancellable once started; the receiver only
            // exists to satisfy the shared entry point.
            let (_tx, rx) = watch::channel(false);
            let run = batch::run_batch(&pool, &ctx, &config, batch_size, &rx).await?;
            println!(
                "Batch run {} {}: {} processed, {} succeeded, {} failed",
                run.id,
                run.status.as_str(),
                run.processed_count,
                run.success_count,
                run.failure_count
            );
        }
        Commands::Daemon {
            hour,
            minute,
            batch_size,
            artifact,
            config,
        } => {
            let (ctx, config) = load_scoring(&artifact, config.as_deref())?;
            run_daemon(&pool, &ctx, &config, batch_size, hour, minute).await?;
        }
        Commands::Latest { student } => match store::get_latest_prediction(&pool, student).await? {
            Some(record) => {
                println!(
                    "Latest for {}: {:.1}/100 ({}) at {} [{}]",
                    student,
                    record.risk_score,
                    record.risk_level.as_str(),
                    record.predicted_at,
                    record.algorithm_version
                );
                print_lines("Contributing factors", &record.contributing_factors);
                print_lines("Recommended interventions", &record.recommendations);
            }
            None => println!("No predictions recorded for {student}."),
        },
        Commands::History { student, limit } => {
            let records = store::get_prediction_history(&pool, student, limit).await?;
            if records.is_empty() {
                println!("No predictions recorded for {student}.");
            } else {
                println!("Prediction history for {student}:");
                for record in records {
                    println!(
                        "- {} score {:.1}/100 ({}) [{}]",
                        record.predicted_at,
                        record.risk_score,
                        record.risk_level.as_str(),
                        record.algorithm_version
                    );
                }
            }
        }
        Commands::Distribution => {
            let distribution = store::risk_distribution(&pool).await?;
            if distribution.is_empty() {
                println!("No predictions recorded yet.");
            } else {
                println!("Risk distribution (latest prediction per student):");
                for (level, count) in distribution {
                    println!("- {}: {}", level.as_str(), count);
                }
            }
        }
        Commands::LastRun => match store::get_last_batch_run(&pool).await? {
            Some(run) => {
                println!(
                    "Run {} started {} status {}",
                    run.id,
                    run.started_at,
                    run.status.as_str()
                );
                println!(
                    "  {} of {} processed, {} succeeded, {} failed",
                    run.processed_count, run.total_students, run.success_count, run.failure_count
                );
                if let Some(duration) = run.duration_seconds {
                    println!("  took {duration:.1}s");
                }
                if let Some(summary) = run.error_summary {
                    println!("  error: {summary}");
                }
            }
            None => println!("No batch runs recorded."),
        },
    }

    Ok(())
}

/// Load the artifact bundle and scoring config once; both are shared
/// immutably across every scoring task for the life of the process.
fn load_scoring(
    artifact: &Path,
    config: Option<&Path>,
) -> anyhow::Result<(Arc<ScoringContext>, Arc<ScoringConfig>)> {
    let ctx = ScoringContext::load(artifact)
        .with_context(|| format!("failed to load scoring artifact at {}", artifact.display()))?;
    info!(version = %ctx.version, "scoring artifact loaded");
    let config = match config {
        Some(path) => ScoringConfig::load(path)?,
        None => ScoringConfig::default(),
    };
    Ok((Arc::new(ctx), Arc::new(config)))
}

async fn run_daemon(
    pool: &PgPool,
    ctx: &Arc<ScoringContext>,
    config: &Arc<ScoringConfig>,
    batch_size: usize,
    hour: u32,
    minute: u32,
) -> anyhow::Result<()> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });

    let mut shutdown = rx.clone();
    loop {
        let delay = batch::delay_until_daily(Local::now().naive_local(), hour, minute)
            .context("invalid schedule time")?;
        let wait = delay.to_std().unwrap_or_default();
        info!(
            hours = wait.as_secs_f64() / 3600.0,
            "next batch run scheduled"
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match batch::run_batch(pool, ctx, config, batch_size, &rx).await {
                    Ok(run) => info!(
                        run = %run.id,
                        processed = run.processed_count,
                        success = run.success_count,
                        failure = run.failure_count,
                        "scheduled batch run finished"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled batch run failed"),
                }
            }
            _ = shutdown.changed() => {}
        }

        if *rx.borrow() {
            info!("shutdown signal received, stopping daemon");
            break;
        }
    }

    Ok(())
}

fn print_lines(heading: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    println!("{heading}:");
    for line in lines {
        println!("- {line}");
    }
}
