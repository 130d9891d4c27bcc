use std::path::PathBuf;
use std::time::Duration;

use chunker::ChunkParams;

use crate::error::PipelineError;

/// All pipeline settings, loaded once and passed explicitly to the
/// orchestrator and workers. Credentials are validated lazily, per stage, so
/// local-only stages (chunking) run without any API keys configured.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub channel_handle: Option<String>,
    pub channel_id: Option<String>,
    pub channel_display_name: String,

    pub youtube_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub pinecone_namespace: String,
    pub proxy_urls: Vec<String>,

    pub chunk_params: ChunkParams,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_batch_size: usize,
    pub upsert_batch_size: usize,

    pub max_fetch_attempts: usize,
    pub fetch_backoff: Duration,
    pub proxy_failure_threshold: u32,
    pub proxy_cooldown: Duration,
    pub max_failure_rate: f64,

    pub db_path: PathBuf,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        let channel_handle = env_opt("CHANNEL_HANDLE");
        let channel_id = env_opt("CHANNEL_ID");
        if channel_handle.is_none() && channel_id.is_none() {
            return Err(PipelineError::Configuration(
                "set CHANNEL_ID or CHANNEL_HANDLE in the environment or .env".to_string(),
            ));
        }

        let channel_display_name = env_opt("CHANNEL_DISPLAY_NAME")
            .or_else(|| channel_handle.as_ref().map(|h| h.trim_start_matches('@').to_string()))
            .unwrap_or_else(|| "channel".to_string());

        let proxy_urls = env_opt("PROXY_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let chunk_params = ChunkParams {
            target_duration: env_f64("TARGET_CHUNK_DURATION", 75.0),
            min_duration: env_f64("MIN_CHUNK_DURATION", 45.0),
            max_duration: env_f64("MAX_CHUNK_DURATION", 120.0),
        };
        if chunk_params.min_duration > chunk_params.target_duration
            || chunk_params.target_duration > chunk_params.max_duration
        {
            return Err(PipelineError::Configuration(format!(
                "chunk durations must satisfy min <= target <= max, got {}/{}/{}",
                chunk_params.min_duration,
                chunk_params.target_duration,
                chunk_params.max_duration
            )));
        }

        Ok(PipelineConfig {
            channel_handle,
            channel_id,
            channel_display_name,
            youtube_api_key: env_opt("YOUTUBE_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            pinecone_api_key: env_opt("PINECONE_API_KEY"),
            pinecone_index_host: env_opt("PINECONE_INDEX_HOST"),
            pinecone_namespace: env_opt("PINECONE_NAMESPACE")
                .unwrap_or_else(|| "youtube".to_string()),
            proxy_urls,
            chunk_params,
            embedding_model: env_opt("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            embedding_dimensions: env_usize("EMBEDDING_DIMENSIONS", 1536),
            embedding_batch_size: env_usize("EMBEDDING_BATCH_SIZE", 100),
            upsert_batch_size: env_usize("UPSERT_BATCH_SIZE", 100),
            max_fetch_attempts: env_usize("MAX_FETCH_ATTEMPTS", 3),
            fetch_backoff: Duration::from_millis(
                env_usize("FETCH_BACKOFF_MS", 1000) as u64
            ),
            proxy_failure_threshold: env_usize("PROXY_FAILURE_THRESHOLD", 3) as u32,
            proxy_cooldown: Duration::from_secs(env_usize("PROXY_COOLDOWN_SECS", 300) as u64),
            max_failure_rate: env_f64("MAX_FAILURE_RATE", 0.5),
            db_path: env_opt("INGEST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".cache/ingest.db")),
        })
    }

    pub fn require_youtube_key(&self) -> Result<&str, PipelineError> {
        self.youtube_api_key.as_deref().ok_or_else(|| {
            PipelineError::Configuration("YOUTUBE_API_KEY is not set".to_string())
        })
    }

    pub fn require_openai_key(&self) -> Result<&str, PipelineError> {
        self.openai_api_key.as_deref().ok_or_else(|| {
            PipelineError::Configuration("OPENAI_API_KEY is not set".to_string())
        })
    }

    pub fn require_pinecone(&self) -> Result<(&str, &str), PipelineError> {
        let key = self.pinecone_api_key.as_deref().ok_or_else(|| {
            PipelineError::Configuration("PINECONE_API_KEY is not set".to_string())
        })?;
        let host = self.pinecone_index_host.as_deref().ok_or_else(|| {
            PipelineError::Configuration("PINECONE_INDEX_HOST is not set".to_string())
        })?;
        Ok((key, host))
    }

    pub fn require_proxies(&self) -> Result<&[String], PipelineError> {
        if self.proxy_urls.is_empty() {
            return Err(PipelineError::Configuration(
                "PROXY_URLS is empty; transcript extraction needs at least one proxy".to_string(),
            ));
        }
        Ok(&self.proxy_urls)
    }
}

#[cfg(test)]
impl PipelineConfig {
    /// A config with no credentials and default knobs, for exercising the
    /// local-only paths in tests.
    pub(crate) fn test_default() -> Self {
        PipelineConfig {
            channel_handle: Some("@testchannel".to_string()),
            channel_id: None,
            channel_display_name: "Test Channel".to_string(),
            youtube_api_key: None,
            openai_api_key: None,
            pinecone_api_key: None,
            pinecone_index_host: None,
            pinecone_namespace: "youtube".to_string(),
            proxy_urls: Vec::new(),
            chunk_params: ChunkParams::default(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            embedding_batch_size: 100,
            upsert_batch_size: 100,
            max_fetch_attempts: 3,
            fetch_backoff: Duration::from_millis(1),
            proxy_failure_threshold: 3,
            proxy_cooldown: Duration::from_secs(60),
            max_failure_rate: 0.5,
            db_path: PathBuf::from(":memory:"),
        }
    }
}
