use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chunker::{Caption, TranscriptRecord};
use rand::Rng;
use tracing::warn;

use crate::error::PipelineError;
use crate::proxy::ProxyPool;

/// Caption provider contract. Raises on disabled captions, missing videos
/// and network failures; never chunks or post-processes.
#[async_trait]
pub trait CaptionSource: Send + Sync {
    async fn get_captions(
        &self,
        video_id: &str,
        proxy_url: &str,
    ) -> Result<Vec<Caption>, PipelineError>;
}

/// Fetches YouTube timed-text captions (json3 format) through the supplied
/// proxy endpoint.
pub struct TimedTextSource {
    timeout: Duration,
}

impl TimedTextSource {
    pub fn new(timeout: Duration) -> Self {
        TimedTextSource { timeout }
    }
}

#[async_trait]
impl CaptionSource for TimedTextSource {
    async fn get_captions(
        &self,
        video_id: &str,
        proxy_url: &str,
    ) -> Result<Vec<Caption>, PipelineError> {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            PipelineError::Configuration(format!("invalid proxy url '{}': {}", proxy_url, e))
        })?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()?;

        let url = format!(
            "https://video.google.com/timedtext?lang=en&v={}&fmt=json3",
            video_id
        );
        let response = client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::PermanentContent(format!(
                "video {} not found",
                video_id
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(status, body));
        }

        let body = response.text().await?;
        // The timed-text endpoint answers 200 with an empty body when the
        // uploader disabled captions.
        if body.trim().is_empty() {
            return Err(PipelineError::PermanentContent(format!(
                "captions disabled for video {}",
                video_id
            )));
        }
        parse_json3(&body)
    }
}

/// Parse the json3 timed-text payload into caption triples.
pub(crate) fn parse_json3(body: &str) -> Result<Vec<Caption>, PipelineError> {
    let payload: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| PipelineError::PermanentContent(format!("unparseable captions: {}", e)))?;

    let events = payload
        .get("events")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            PipelineError::PermanentContent("caption payload has no events".to_string())
        })?;

    let mut captions = Vec::new();
    for event in events {
        let Some(segs) = event.get("segs").and_then(|s| s.as_array()) else {
            continue;
        };
        let text: String = segs
            .iter()
            .filter_map(|seg| seg.get("utf8").and_then(|t| t.as_str()))
            .collect();
        let start_ms = event.get("tStartMs").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let duration_ms = event
            .get("dDurationMs")
            .and_then(|v| v.as_f64())
            .unwrap_or(2000.0);
        captions.push(Caption {
            start: start_ms / 1000.0,
            end: (start_ms + duration_ms) / 1000.0,
            text,
        });
    }
    Ok(captions)
}

/// Fetches one video's transcript with bounded retries, rotating to a
/// different healthy proxy on each attempt and backing off exponentially
/// with jitter in between.
pub struct TranscriptFetcher {
    source: Arc<dyn CaptionSource>,
    pool: Arc<ProxyPool>,
    max_attempts: usize,
    base_backoff: Duration,
}

impl TranscriptFetcher {
    pub fn new(
        source: Arc<dyn CaptionSource>,
        pool: Arc<ProxyPool>,
        max_attempts: usize,
        base_backoff: Duration,
    ) -> Self {
        TranscriptFetcher {
            source,
            pool,
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    pub async fn fetch_transcript(
        &self,
        video_id: &str,
    ) -> Result<TranscriptRecord, PipelineError> {
        let mut previous_proxy: Option<String> = None;
        let mut last_error: Option<PipelineError> = None;

        for attempt in 1..=self.max_attempts {
            let Some(proxy_url) = self.pool.acquire(previous_proxy.as_deref()) else {
                return Err(PipelineError::TransientNetwork(
                    "no healthy proxies available".to_string(),
                ));
            };

            match self.source.get_captions(video_id, &proxy_url).await {
                Ok(raw) => {
                    self.pool.report_success(&proxy_url);
                    let record = TranscriptRecord::new(video_id, raw);
                    if record.is_empty() {
                        // An empty transcript must never count as a fetched
                        // artifact.
                        return Err(PipelineError::PermanentContent(format!(
                            "transcript for {} is empty after normalization",
                            video_id
                        )));
                    }
                    return Ok(record);
                }
                Err(err @ PipelineError::PermanentContent(_)) => {
                    // The proxy worked; the content itself is the problem.
                    self.pool.report_success(&proxy_url);
                    return Err(err);
                }
                Err(err @ PipelineError::Configuration(_)) => return Err(err),
                Err(err) => {
                    self.pool.report_failure(&proxy_url);
                    warn!(
                        video_id,
                        attempt,
                        proxy = %proxy_url,
                        error = %err,
                        "transcript fetch attempt failed"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(backoff_delay(
                            self.base_backoff,
                            attempt,
                            err.retry_after(),
                        ))
                        .await;
                    }
                    last_error = Some(err);
                    previous_proxy = Some(proxy_url);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::TransientNetwork(format!(
                "transcript fetch for {} exhausted all attempts",
                video_id
            ))
        }))
    }
}

/// Exponential backoff with jitter; a provider-specified wait wins when it
/// is longer.
fn backoff_delay(base: Duration, attempt: usize, retry_after: Option<Duration>) -> Duration {
    let exponent = (attempt.saturating_sub(1)).min(6) as u32;
    let exponential = base.saturating_mul(1 << exponent);
    let jitter_cap = (exponential.as_millis() as u64 / 2).max(1);
    let jitter = Duration::from_millis(rand::rng().random_range(0..jitter_cap));
    let delay = exponential + jitter;
    match retry_after {
        Some(wait) if wait > delay => wait,
        _ => delay,
    }
}
