use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod documents;
mod error;
mod llm;
mod models;
mod orchestrator;
mod report;
mod scoring;
mod stores;
mod vector;

use config::AppConfig;
use models::{EvaluationKind, EvaluationStatus, Period, UserId};
use orchestrator::{BatchOrchestrator, OrchestratorSettings, UserSelection};

#[derive(Parser)]
#[command(name = "performance-review-evaluator")]
#[command(about = "Scores performance inputs and stores narrative evaluations", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: AppConfig,
    /// trace, debug, info, warn or error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo categories, selections and grades for a period
    Seed {
        #[arg(long)]
        period: Period,
    },
    /// Import peer keyword selections from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Evaluate a single user
    Evaluate {
        #[arg(long, value_enum)]
        kind: EvaluationKind,
        #[arg(long)]
        period: Period,
        #[arg(long)]
        user: UserId,
    },
    /// Evaluate many users; without --user every user with input is evaluated
    Batch {
        #[arg(long, value_enum)]
        kind: EvaluationKind,
        #[arg(long)]
        period: Period,
        #[arg(long = "user")]
        users: Vec<UserId>,
        /// Also write a markdown report of the period's scores
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Generate a markdown report of stored scores
    Report {
        #[arg(long, value_enum)]
        kind: EvaluationKind,
        #[arg(long)]
        period: Period,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn init_tracing(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::new(format!(
        "performance_review_evaluator={},sqlx=warn",
        level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds every collaborator up front so configuration faults surface before
/// any user is evaluated.
fn build_orchestrator(config: &AppConfig, pool: &PgPool) -> anyhow::Result<BatchOrchestrator> {
    let generator = llm::OpenAiGenerator::new(&config.llm)
        .context("invalid LLM configuration")?;
    let mut orchestrator = BatchOrchestrator::new(
        Arc::new(db::PgRecordStore::new(pool.clone())),
        Arc::new(documents::PgDocumentStore::new(pool.clone())),
        Arc::new(generator),
    )
    .with_settings(OrchestratorSettings {
        discovery_limit: config.vector.top_k,
        activity_limit: config.vector.top_k,
    });

    if config.vector.is_configured() {
        let index = vector::PineconeIndex::new(&config.vector)
            .context("invalid vector index configuration")?;
        orchestrator = orchestrator.with_vector_index(Arc::new(index));
    }

    Ok(orchestrator)
}

async fn write_report(
    pool: &PgPool,
    kind: EvaluationKind,
    period: Period,
    out: &Path,
) -> anyhow::Result<()> {
    let scores = db::fetch_period_scores(pool, kind, period).await?;
    let report = report::build_report(kind, period, &scores);
    std::fs::write(out, report)
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("Report written to {}.", out.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let connect_options = cli
        .config
        .database
        .connect_options()
        .context("database settings are incomplete")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.config.database.max_connections)
        .connect_with(connect_options)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed { period } => {
            db::seed(&pool, period).await?;
            println!("Seed data inserted for {period}.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} selections from {}.", csv.display());
        }
        Commands::Evaluate { kind, period, user } => {
            let orchestrator = build_orchestrator(&cli.config, &pool)?;
            let outcome = orchestrator.evaluate_one(kind, user, period).await?;
            match outcome.status {
                EvaluationStatus::Succeeded(record) => {
                    match record.score {
                        Some(score) => println!("User {user} scored {score:.2} for {period}."),
                        None => println!("User {user} evaluated for {period}."),
                    }
                    println!();
                    println!("{}", record.narrative);
                }
                EvaluationStatus::Failed(reason) => {
                    println!("User {user} was not evaluated: {reason}.");
                }
            }
        }
        Commands::Batch {
            kind,
            period,
            users,
            report: report_out,
        } => {
            let orchestrator = build_orchestrator(&cli.config, &pool)?;
            let selection = if users.is_empty() {
                UserSelection::All
            } else {
                UserSelection::Explicit(users)
            };
            let run = orchestrator.run(kind, period, selection).await?;
            print!("{}", report::render_batch_summary(&run));

            if let Some(out) = report_out {
                write_report(&pool, kind, period, &out).await?;
            }
        }
        Commands::Report { kind, period, out } => {
            write_report(&pool, kind, period, &out).await?;
        }
    }

    info!("done");
    Ok(())
}
