use chunker::Chunk;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::db::{Database, VideoItem};
use crate::error::PipelineError;
use crate::pinecone::{VectorRecord, VectorStore};

/// Upsert the video's embedded chunks into the vector store. Only hashes the
/// store does not already know are sent; upsert is idempotent on id, so a
/// crash between batches re-runs cleanly. Vectors orphaned by a changed
/// transcript are not pruned.
pub async fn process_video(
    db: &Database,
    store: &dyn VectorStore,
    config: &PipelineConfig,
    video_id: &str,
) -> Result<(), PipelineError> {
    let video = db.get_video(video_id)?.ok_or_else(|| {
        PipelineError::PermanentContent(format!("unknown video {}", video_id))
    })?;
    let embedded = db.get_embedded_chunks(video_id, &config.embedding_model)?;
    if embedded.is_empty() {
        debug!(video_id, "no embedded chunks to upload");
        return Ok(());
    }

    let ids: Vec<String> = embedded
        .iter()
        .map(|(chunk, _)| chunk.content_hash.clone())
        .collect();
    let known = store.known_ids(&ids).await?;
    for (chunk, _) in embedded.iter().filter(|(c, _)| known.contains(&c.content_hash)) {
        db.mark_uploaded(&chunk.content_hash)?;
    }

    let pending: Vec<&(Chunk, Vec<f32>)> = embedded
        .iter()
        .filter(|(chunk, _)| !known.contains(&chunk.content_hash))
        .collect();
    debug!(
        video_id,
        total = embedded.len(),
        already_present = known.len(),
        uploading = pending.len(),
        "upload plan"
    );

    for batch in pending.chunks(config.upsert_batch_size.max(1)) {
        let vectors: Vec<VectorRecord> = batch
            .iter()
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.content_hash.clone(),
                values: vector.clone(),
                metadata: vector_metadata(&config.channel_display_name, &video, chunk),
            })
            .collect();
        store.upsert(&vectors).await?;
        for (chunk, _) in batch {
            db.mark_uploaded(&chunk.content_hash)?;
        }
    }
    Ok(())
}

/// Display metadata served back with query results. The store caps metadata
/// size per vector, so text is truncated to 1000 characters and the title to
/// 200.
fn vector_metadata(channel: &str, video: &VideoItem, chunk: &Chunk) -> Value {
    let mut text_preview: String = chunk.text.chars().take(1000).collect();
    if chunk.text.chars().count() > 1000 {
        text_preview.push_str("...");
    }

    json!({
        "video_id": chunk.video_id,
        "chunk_index": chunk.chunk_index,
        "text": text_preview,
        "start_time": chunk.start_time,
        "end_time": chunk.end_time,
        "start_timestamp": chunker::format_timestamp(chunk.start_time),
        "end_timestamp": chunker::format_timestamp(chunk.end_time),
        "duration_seconds": chunk.duration(),
        "video_title": video.title.chars().take(200).collect::<String>(),
        "channel": channel,
        "video_duration_seconds": video.duration_seconds.unwrap_or(0),
        "thumbnail_url": video.thumbnail_url.clone().unwrap_or_default(),
        "youtube_url": chunker::youtube_link(&chunk.video_id, chunk.start_time),
        "video_url": format!("https://www.youtube.com/watch?v={}", chunk.video_id),
        "content_type": "youtube_transcript",
    })
}
