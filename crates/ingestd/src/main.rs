use axum::{response::Json, routing::get, Router};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, level_filters::LevelFilter};

mod api;
mod captions;
mod config;
mod db;
mod error;
mod openai;
mod pinecone;
mod pipeline;
mod proxy;
mod youtube;

use crate::config::PipelineConfig;
use crate::db::state::Stage;
use crate::db::Database;
use crate::openai::OpenAiEmbedder;
use crate::pinecone::PineconeStore;
use crate::pipeline::{RunOptions, StageOrchestrator};

#[derive(Parser)]
#[command(
    name = "ingestd",
    about = "Turns a YouTube channel's transcripts into a searchable vector index"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Copy, Default)]
struct RunFlags {
    /// Maximum number of items to process
    #[arg(long)]
    limit: Option<usize>,

    /// Also retry items that failed retryably on an earlier run
    #[arg(long)]
    retry_blocked: bool,

    /// Only process items not yet done for the stage
    #[arg(long)]
    incremental: bool,

    /// Cheap dry run over a handful of items
    #[arg(long)]
    test: bool,
}

impl From<RunFlags> for RunOptions {
    fn from(flags: RunFlags) -> Self {
        RunOptions {
            limit: flags.limit,
            retry_blocked: flags.retry_blocked,
            incremental: flags.incremental,
            test: flags.test,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run one pipeline stage
    Run {
        #[arg(value_enum)]
        stage: Stage,
        #[command(flatten)]
        flags: RunFlags,
    },
    /// Run every stage in dependency order
    Pipeline {
        #[command(flatten)]
        flags: RunFlags,
    },
    /// Show per-stage progress counts
    Status,
    /// Serve the search API
    Serve {
        #[arg(long, default_value_t = 7777)]
        port: u16,
    },
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(Database::new(&config.db_path)?);
    info!("state store initialized at {:?}", config.db_path);

    match cli.command {
        Command::Run { stage, flags } => {
            let orchestrator = StageOrchestrator::new(db, config);
            let summary = orchestrator.run_stage(stage, &flags.into()).await?;
            println!(
                "{}: {} done, {} failed, {} skipped",
                summary.stage, summary.done, summary.failed, summary.skipped
            );
        }
        Command::Pipeline { flags } => {
            let orchestrator = StageOrchestrator::new(db, config);
            let summaries = orchestrator.run_pipeline(&flags.into()).await?;
            for summary in summaries {
                println!(
                    "{}: {} done, {} failed, {} skipped",
                    summary.stage, summary.done, summary.failed, summary.skipped
                );
            }
        }
        Command::Status => {
            for (stage, counts) in db.stage_summary()? {
                let line: Vec<String> = [
                    crate::db::state::StageStatus::Done,
                    crate::db::state::StageStatus::Pending,
                    crate::db::state::StageStatus::InProgress,
                    crate::db::state::StageStatus::FailedRetryable,
                    crate::db::state::StageStatus::FailedPermanent,
                ]
                .iter()
                .map(|status| {
                    format!("{} {}", counts.get(status).copied().unwrap_or(0), status.as_str())
                })
                .collect();
                println!("{:<13} {}", stage.as_str(), line.join(", "));
            }
            println!(
                "totals: {} videos, {} chunks, {} embeddings",
                db.count_videos()?,
                db.count_chunks()?,
                db.count_embeddings()?
            );
        }
        Command::Serve { port } => {
            let embedder = Arc::new(OpenAiEmbedder::new(
                config.require_openai_key()?,
                config.embedding_model.clone(),
                config.embedding_dimensions,
            ));
            let (pinecone_key, pinecone_host) = config.require_pinecone()?;
            let store = Arc::new(PineconeStore::new(
                pinecone_key,
                pinecone_host,
                config.pinecone_namespace.clone(),
            ));
            let state = api::ApiState {
                db,
                embedder,
                store,
            };

            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);

            let app = Router::new()
                .route("/health", get(health))
                .nest("/api", api::router(state))
                .layer(cors);

            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            info!("starting search API on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
