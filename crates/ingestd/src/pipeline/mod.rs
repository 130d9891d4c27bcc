use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::captions::{CaptionSource, TimedTextSource, TranscriptFetcher};
use crate::config::PipelineConfig;
use crate::db::state::{CandidateFilter, Stage, StageStatus};
use crate::db::Database;
use crate::error::PipelineError;
use crate::openai::{Embedder, OpenAiEmbedder};
use crate::pinecone::{PineconeStore, VectorStore};
use crate::proxy::ProxyPool;
use crate::youtube::YouTubeClient;

pub mod chunk;
pub mod discover;
pub mod embed;
pub mod metadata;
pub mod transcribe;
pub mod upload;

/// Flags for one stage run, mirroring the CLI surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub limit: Option<usize>,
    pub retry_blocked: bool,
    pub incremental: bool,
    pub test: bool,
}

const TEST_RUN_LIMIT: usize = 5;

impl RunOptions {
    fn effective_limit(&self) -> Option<usize> {
        if self.test {
            Some(self.limit.map_or(TEST_RUN_LIMIT, |l| l.min(TEST_RUN_LIMIT)))
        } else {
            self.limit
        }
    }

    fn filter(&self) -> CandidateFilter {
        CandidateFilter {
            incremental: self.incremental,
            retry_blocked: self.retry_blocked,
        }
    }
}

/// Per-run observability counts. Individual item failures live here; only a
/// failure rate above the configured ceiling fails the run itself.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub stage: Stage,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
}

struct Candidates {
    items: Vec<String>,
    skipped: usize,
}

/// Runs below this many attempted items never trip the failure ceiling, so a
/// lone bad video cannot abort a small run.
const FAILURE_CEILING_MIN_ATTEMPTS: usize = 10;

const CAPTION_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives one pipeline stage over the working set: selects candidates from
/// the stage state store, invokes the stage worker per item, classifies
/// failures and persists every outcome before moving on.
pub struct StageOrchestrator {
    db: Arc<Database>,
    config: PipelineConfig,
    caption_source: Option<Arc<dyn CaptionSource>>,
    embedder: Option<Arc<dyn Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl StageOrchestrator {
    pub fn new(db: Arc<Database>, config: PipelineConfig) -> Self {
        StageOrchestrator {
            db,
            config,
            caption_source: None,
            embedder: None,
            vector_store: None,
        }
    }

    pub fn with_caption_source(mut self, source: Arc<dyn CaptionSource>) -> Self {
        self.caption_source = Some(source);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub async fn run_stage(
        &self,
        stage: Stage,
        options: &RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, stage = %stage, ?options, "stage run starting");

        let summary = match stage {
            Stage::Discovery => self.run_discovery(run_id, options).await?,
            Stage::Metadata => self.run_metadata(run_id, options).await?,
            _ => self.run_per_video(run_id, stage, options).await?,
        };

        info!(
            %run_id,
            stage = %stage,
            done = summary.done,
            failed = summary.failed,
            skipped = summary.skipped,
            "stage run finished"
        );
        self.check_failure_ceiling(&summary)?;
        Ok(summary)
    }

    /// Run every stage in dependency order with the same options.
    pub async fn run_pipeline(
        &self,
        options: &RunOptions,
    ) -> Result<Vec<RunSummary>, PipelineError> {
        let mut summaries = Vec::new();
        for stage in Stage::ORDER {
            summaries.push(self.run_stage(stage, options).await?);
        }
        Ok(summaries)
    }

    async fn run_discovery(
        &self,
        run_id: Uuid,
        options: &RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        let discovered =
            discover::run(&self.db, &self.config, options.effective_limit()).await?;
        Ok(RunSummary {
            run_id,
            stage: Stage::Discovery,
            done: discovered,
            failed: 0,
            skipped: 0,
        })
    }

    async fn run_metadata(
        &self,
        run_id: Uuid,
        options: &RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        let candidates = self.candidates(Stage::Metadata, options)?;
        let client = YouTubeClient::new(self.config.require_youtube_key()?);
        let (done, failed) = metadata::run(&self.db, &client, &candidates.items).await?;
        Ok(RunSummary {
            run_id,
            stage: Stage::Metadata,
            done,
            failed,
            skipped: candidates.skipped,
        })
    }

    async fn run_per_video(
        &self,
        run_id: Uuid,
        stage: Stage,
        options: &RunOptions,
    ) -> Result<RunSummary, PipelineError> {
        let candidates = self.candidates(stage, options)?;

        // Resolve collaborators before touching any item, so a missing
        // credential aborts the run instead of failing per-item.
        let fetcher = match stage {
            Stage::Transcription => Some(self.transcript_fetcher()?),
            _ => None,
        };
        let embedder = match stage {
            Stage::Embedding => Some(self.resolve_embedder()?),
            _ => None,
        };
        let store = match stage {
            Stage::Upload => Some(self.resolve_vector_store()?),
            _ => None,
        };

        let mut summary = RunSummary {
            run_id,
            stage,
            done: 0,
            failed: 0,
            skipped: candidates.skipped,
        };

        for video_id in &candidates.items {
            self.db
                .set_status(video_id, stage, StageStatus::InProgress, None)?;

            let outcome = match stage {
                Stage::Transcription => {
                    transcribe::process_video(&self.db, fetcher.as_ref().unwrap(), video_id).await
                }
                Stage::Chunking => {
                    chunk::process_video(&self.db, &self.config.chunk_params, video_id)
                }
                Stage::Embedding => {
                    embed::process_video(
                        &self.db,
                        embedder.as_ref().unwrap().as_ref(),
                        self.config.embedding_batch_size,
                        video_id,
                    )
                    .await
                }
                Stage::Upload => {
                    upload::process_video(
                        &self.db,
                        store.as_ref().unwrap().as_ref(),
                        &self.config,
                        video_id,
                    )
                    .await
                }
                Stage::Discovery | Stage::Metadata => {
                    unreachable!("handled by dedicated runners")
                }
            };

            match outcome {
                Ok(()) => {
                    self.db.set_status(video_id, stage, StageStatus::Done, None)?;
                    summary.done += 1;
                }
                Err(err) if err.is_fatal() => {
                    self.db.set_status(
                        video_id,
                        stage,
                        StageStatus::FailedRetryable,
                        Some(&err.to_string()),
                    )?;
                    error!(video_id, stage = %stage, error = %err, "fatal error, aborting run");
                    return Err(err);
                }
                Err(err) => {
                    let status = if err.is_retryable() {
                        StageStatus::FailedRetryable
                    } else {
                        StageStatus::FailedPermanent
                    };
                    self.db
                        .set_status(video_id, stage, status, Some(&err.to_string()))?;
                    summary.failed += 1;
                    warn!(video_id, stage = %stage, error = %err, "item failed");
                    if let Some(wait) = err.retry_after() {
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Ok(summary)
    }

    fn candidates(
        &self,
        stage: Stage,
        options: &RunOptions,
    ) -> Result<Candidates, PipelineError> {
        let mut items = self.db.list_candidates(stage, options.filter())?;
        let total = self.db.count_videos()? as usize;
        if let Some(limit) = options.effective_limit() {
            items.truncate(limit);
        }
        let skipped = total.saturating_sub(items.len());
        Ok(Candidates { items, skipped })
    }

    fn check_failure_ceiling(&self, summary: &RunSummary) -> Result<(), PipelineError> {
        let attempted = summary.done + summary.failed;
        if attempted < FAILURE_CEILING_MIN_ATTEMPTS {
            return Ok(());
        }
        let rate = summary.failed as f64 / attempted as f64;
        if rate > self.config.max_failure_rate {
            error!(
                stage = %summary.stage,
                failed = summary.failed,
                attempted,
                ceiling = self.config.max_failure_rate,
                "failure rate exceeded ceiling"
            );
            return Err(PipelineError::FailureCeiling {
                failed: summary.failed,
                attempted,
            });
        }
        Ok(())
    }

    fn transcript_fetcher(&self) -> Result<TranscriptFetcher, PipelineError> {
        let source: Arc<dyn CaptionSource> = match &self.caption_source {
            Some(source) => source.clone(),
            None => Arc::new(TimedTextSource::new(CAPTION_FETCH_TIMEOUT)),
        };
        let proxies = self.config.require_proxies()?.to_vec();
        let pool = Arc::new(ProxyPool::new(
            proxies,
            self.config.proxy_failure_threshold,
            self.config.proxy_cooldown,
        ));
        Ok(TranscriptFetcher::new(
            source,
            pool,
            self.config.max_fetch_attempts,
            self.config.fetch_backoff,
        ))
    }

    fn resolve_embedder(&self) -> Result<Arc<dyn Embedder>, PipelineError> {
        match &self.embedder {
            Some(embedder) => Ok(embedder.clone()),
            None => {
                let key = self.config.require_openai_key()?;
                Ok(Arc::new(OpenAiEmbedder::new(
                    key,
                    self.config.embedding_model.clone(),
                    self.config.embedding_dimensions,
                )))
            }
        }
    }

    fn resolve_vector_store(&self) -> Result<Arc<dyn VectorStore>, PipelineError> {
        match &self.vector_store {
            Some(store) => Ok(store.clone()),
            None => {
                let (key, host) = self.config.require_pinecone()?;
                Ok(Arc::new(PineconeStore::new(
                    key,
                    host,
                    self.config.pinecone_namespace.clone(),
                )))
            }
        }
    }
}
