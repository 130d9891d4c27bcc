use tracing::debug;

use crate::db::Database;
use crate::error::PipelineError;
use crate::openai::Embedder;

/// Generate embeddings for every chunk of the video that does not yet have
/// one for the configured model. Chunks embedded on a previous run are
/// skipped, so re-running never re-bills already-processed text.
pub async fn process_video(
    db: &Database,
    embedder: &dyn Embedder,
    batch_size: usize,
    video_id: &str,
) -> Result<(), PipelineError> {
    let chunks = db.get_chunks(video_id)?;
    if chunks.is_empty() {
        debug!(video_id, "no chunks to embed");
        return Ok(());
    }

    let title = db
        .get_video(video_id)?
        .map(|v| v.title)
        .unwrap_or_default();
    let model = embedder.model_id().to_string();

    let mut missing = Vec::new();
    for chunk in &chunks {
        if !db.has_embedding(&chunk.content_hash, &model)? {
            missing.push(chunk);
        }
    }
    if missing.is_empty() {
        debug!(video_id, "all chunks already embedded");
        return Ok(());
    }

    for batch in missing.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch
            .iter()
            .map(|chunk| chunker::embedding_text(&title, chunk))
            .collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(PipelineError::TransientNetwork(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }
        for (chunk, vector) in batch.iter().zip(vectors) {
            if vector.is_empty() {
                return Err(PipelineError::PermanentContent(format!(
                    "empty embedding vector for chunk {}",
                    chunk.content_hash
                )));
            }
            db.store_embedding(&chunk.content_hash, &model, &vector)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chunker::{Caption, ChunkParams, TranscriptRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        texts_embedded: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            CountingEmbedder {
                calls: AtomicUsize::new(0),
                texts_embedded: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model_id(&self) -> &str {
            "fake-embedding-model"
        }
    }

    fn seed_chunks(db: &Database, video_id: &str, captions: Vec<(f64, f64, &str)>) -> usize {
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
        let chunks = chunker::chunk_transcript(&record, &ChunkParams::default());
        db.replace_chunks(video_id, &chunks).unwrap();
        chunks.len()
    }

    #[tokio::test]
    async fn embeds_each_chunk_once() {
        let db = Database::open_in_memory().unwrap();
        let count = seed_chunks(
            &db,
            "v1",
            vec![(0.0, 80.0, "first span"), (80.0, 160.0, "second span")],
        );
        assert_eq!(count, 2);

        let embedder = CountingEmbedder::new();
        process_video(&db, &embedder, 100, "v1").await.unwrap();
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), 2);

        // Second run finds everything embedded and makes no service calls.
        process_video(&db, &embedder, 100, "v1").await.unwrap();
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn respects_batch_size() {
        let db = Database::open_in_memory().unwrap();
        let captions: Vec<(f64, f64, String)> = (0..5)
            .map(|i| (i as f64 * 80.0, (i + 1) as f64 * 80.0, format!("span {}", i)))
            .collect();
        let borrowed: Vec<(f64, f64, &str)> = captions
            .iter()
            .map(|(s, e, t)| (*s, *e, t.as_str()))
            .collect();
        seed_chunks(&db, "v1", borrowed);

        let embedder = CountingEmbedder::new();
        process_video(&db, &embedder, 2, "v1").await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn video_without_chunks_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        let embedder = CountingEmbedder::new();
        process_video(&db, &embedder, 100, "v1").await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }
}
