use tracing::info;

use crate::captions::TranscriptFetcher;
use crate::db::state::Stage;
use crate::db::Database;
use crate::error::PipelineError;

/// Fetch and store one video's transcript. The fetcher has already validated
/// the record non-empty; a changed fingerprint on re-extraction invalidates
/// everything derived from the old transcript.
pub async fn process_video(
    db: &Database,
    fetcher: &TranscriptFetcher,
    video_id: &str,
) -> Result<(), PipelineError> {
    let record = fetcher.fetch_transcript(video_id).await?;
    let fingerprint = record.fingerprint();
    let previous = db.transcript_fingerprint(video_id)?;
    db.store_transcript(&record, &fingerprint)?;

    if matches!(previous, Some(ref old) if *old != fingerprint) {
        db.reset_downstream(video_id, Stage::Transcription)?;
        info!(
            video_id,
            "transcript changed on re-extraction; downstream stages reset"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::CaptionSource;
    use crate::db::state::StageStatus;
    use crate::proxy::ProxyPool;
    use async_trait::async_trait;
    use chunker::Caption;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FixedSource {
        captions: Mutex<Vec<Caption>>,
    }

    #[async_trait]
    impl CaptionSource for FixedSource {
        async fn get_captions(
            &self,
            _video_id: &str,
            _proxy_url: &str,
        ) -> Result<Vec<Caption>, PipelineError> {
            Ok(self.captions.lock().unwrap().clone())
        }
    }

    fn fetcher_with(captions: Vec<Caption>) -> (TranscriptFetcher, Arc<FixedSource>) {
        let source = Arc::new(FixedSource {
            captions: Mutex::new(captions),
        });
        let pool = Arc::new(ProxyPool::new(
            vec!["http://proxy-a".to_string()],
            3,
            Duration::from_secs(60),
        ));
        (
            TranscriptFetcher::new(source.clone(), pool, 3, Duration::from_millis(1)),
            source,
        )
    }

    fn caption(start: f64, end: f64, text: &str) -> Caption {
        Caption {
            start,
            end,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn changed_transcript_resets_downstream_stages() {
        let db = Database::open_in_memory().unwrap();
        for stage in Stage::ORDER {
            db.set_status("v1", stage, StageStatus::Done, None).unwrap();
        }

        let (fetcher, source) = fetcher_with(vec![caption(0.0, 5.0, "first version")]);
        process_video(&db, &fetcher, "v1").await.unwrap();
        // Same content again: downstream statuses stay done.
        process_video(&db, &fetcher, "v1").await.unwrap();
        assert_eq!(
            db.get_status("v1", Stage::Chunking).unwrap(),
            StageStatus::Done
        );

        *source.captions.lock().unwrap() = vec![caption(0.0, 5.0, "second version")];
        process_video(&db, &fetcher, "v1").await.unwrap();
        assert_eq!(
            db.get_status("v1", Stage::Chunking).unwrap(),
            StageStatus::Pending
        );
        assert_eq!(
            db.get_status("v1", Stage::Upload).unwrap(),
            StageStatus::Pending
        );
    }

    #[tokio::test]
    async fn stored_transcript_matches_fetched_captions() {
        let db = Database::open_in_memory().unwrap();
        let (fetcher, _) = fetcher_with(vec![
            caption(0.0, 2.5, "Hello everyone"),
            caption(2.5, 5.6, "welcome back"),
        ]);
        process_video(&db, &fetcher, "v1").await.unwrap();

        let transcript = db.get_transcript("v1").unwrap().unwrap();
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[0].text, "Hello everyone");
    }
}
