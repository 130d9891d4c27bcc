use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::db::state::{Stage, StageStatus};
use crate::db::Database;
use crate::error::PipelineError;
use crate::youtube::YouTubeClient;

/// Whole-channel discovery: resolve the channel, page its uploads playlist
/// and upsert every video as a pipeline item. Records a per-video discovery
/// status so later stages share one uniform readiness gate.
pub async fn run(
    db: &Database,
    config: &PipelineConfig,
    limit: Option<usize>,
) -> Result<usize, PipelineError> {
    let api_key = config.require_youtube_key()?;
    let client = YouTubeClient::new(api_key);

    let channel_id = match &config.channel_id {
        Some(id) => id.clone(),
        None => {
            let handle = config.channel_handle.as_deref().ok_or_else(|| {
                PipelineError::Configuration("no CHANNEL_ID or CHANNEL_HANDLE set".to_string())
            })?;
            warn!(handle, "CHANNEL_ID not set; resolving by handle search (less reliable)");
            client.resolve_channel_id(handle).await?
        }
    };

    let playlist_id = client.uploads_playlist_id(&channel_id).await?;
    let videos = client.list_channel_videos(&playlist_id, limit).await?;

    for video in &videos {
        db.upsert_video(video)?;
        db.set_status(&video.video_id, Stage::Discovery, StageStatus::Done, None)?;
    }

    info!(
        channel_id,
        discovered = videos.len(),
        "channel discovery complete"
    );
    Ok(videos.len())
}
