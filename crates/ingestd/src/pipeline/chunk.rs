use chunker::ChunkParams;
use tracing::warn;

use crate::db::state::Stage;
use crate::db::Database;
use crate::error::PipelineError;

/// Derive one video's chunk set from its stored transcript. Pure local work:
/// unchanged transcripts reproduce identical content hashes and leave the
/// stored set untouched; changed output invalidates embedding and upload.
pub fn process_video(
    db: &Database,
    params: &ChunkParams,
    video_id: &str,
) -> Result<(), PipelineError> {
    let transcript = db.get_transcript(video_id)?.ok_or_else(|| {
        PipelineError::PermanentContent(format!("no transcript stored for {}", video_id))
    })?;

    let chunks = chunker::chunk_transcript(&transcript, params);
    if chunks.is_empty() {
        warn!(video_id, "transcript produced no chunks");
    }

    if db.replace_chunks(video_id, &chunks)? {
        db.reset_downstream(video_id, Stage::Chunking)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::state::StageStatus;
    use chunker::{Caption, TranscriptRecord};

    fn store_transcript(db: &Database, video_id: &str, captions: Vec<(f64, f64, &str)>) {
        let record = TranscriptRecord::new(
            video_id,
            captions
                .into_iter()
                .map(|(start, end, text)| Caption {
                    start,
                    end,
                    text: text.to_string(),
                })
                .collect(),
        );
        let fp = record.fingerprint();
        db.store_transcript(&record, &fp).unwrap();
    }

    #[test]
    fn rerunning_on_unchanged_transcript_reproduces_identical_hashes() {
        let db = Database::open_in_memory().unwrap();
        store_transcript(&db, "v1", vec![(0.0, 40.0, "a"), (40.0, 80.0, "b")]);
        let params = ChunkParams::default();

        process_video(&db, &params, "v1").unwrap();
        let first = db.get_chunks("v1").unwrap();
        process_video(&db, &params, "v1").unwrap();
        let second = db.get_chunks("v1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn changed_transcript_invalidates_embedding_and_upload() {
        let db = Database::open_in_memory().unwrap();
        store_transcript(&db, "v1", vec![(0.0, 80.0, "original")]);
        let params = ChunkParams::default();
        process_video(&db, &params, "v1").unwrap();
        db.set_status("v1", Stage::Embedding, StageStatus::Done, None)
            .unwrap();
        db.set_status("v1", Stage::Upload, StageStatus::Done, None)
            .unwrap();

        store_transcript(&db, "v1", vec![(0.0, 80.0, "rewritten")]);
        process_video(&db, &params, "v1").unwrap();
        assert_eq!(
            db.get_status("v1", Stage::Embedding).unwrap(),
            StageStatus::Pending
        );
        assert_eq!(
            db.get_status("v1", Stage::Upload).unwrap(),
            StageStatus::Pending
        );
    }

    #[test]
    fn missing_transcript_is_a_permanent_failure() {
        let db = Database::open_in_memory().unwrap();
        let err = process_video(&db, &ChunkParams::default(), "ghost").unwrap_err();
        assert!(matches!(err, PipelineError::PermanentContent(_)));
    }
}
