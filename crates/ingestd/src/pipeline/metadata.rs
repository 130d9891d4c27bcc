use std::collections::HashMap;

use tracing::warn;

use crate::db::state::{Stage, StageStatus};
use crate::db::Database;
use crate::error::PipelineError;
use crate::youtube::{VideoDetails, YouTubeClient};

const METADATA_BATCH_SIZE: usize = 50;

/// Enrich candidate videos with duration, caption availability and view
/// counts, 50 ids per request. Outcomes are persisted per item after each
/// batch; quota errors pause the loop for the provider-specified wait.
pub async fn run(
    db: &Database,
    client: &YouTubeClient,
    candidates: &[String],
) -> Result<(usize, usize), PipelineError> {
    let mut done = 0;
    let mut failed = 0;

    for batch in candidates.chunks(METADATA_BATCH_SIZE) {
        for video_id in batch {
            db.set_status(video_id, Stage::Metadata, StageStatus::InProgress, None)?;
        }

        match client.get_video_metadata(batch).await {
            Ok(details) => {
                let by_id: HashMap<&str, &VideoDetails> = details
                    .iter()
                    .map(|d| (d.video_id.as_str(), d))
                    .collect();
                for video_id in batch {
                    match by_id.get(video_id.as_str()) {
                        Some(detail) => {
                            db.update_video_metadata(
                                video_id,
                                detail.duration_seconds,
                                detail.caption_available,
                                detail.view_count,
                            )?;
                            db.set_status(video_id, Stage::Metadata, StageStatus::Done, None)?;
                            done += 1;
                        }
                        None => {
                            // Discovered but absent from videos.list: deleted
                            // or made private since discovery.
                            db.set_status(
                                video_id,
                                Stage::Metadata,
                                StageStatus::FailedPermanent,
                                Some("video no longer available"),
                            )?;
                            failed += 1;
                        }
                    }
                }
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                let status = if err.is_retryable() {
                    StageStatus::FailedRetryable
                } else {
                    StageStatus::FailedPermanent
                };
                for video_id in batch {
                    db.set_status(video_id, Stage::Metadata, status, Some(&err.to_string()))?;
                }
                failed += batch.len();
                warn!(batch_size = batch.len(), error = %err, "metadata batch failed");
                if let Some(wait) = err.retry_after() {
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    Ok((done, failed))
}
