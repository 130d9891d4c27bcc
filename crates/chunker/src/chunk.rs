use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::transcript::TranscriptRecord;

/// Duration bounds for chunking, in seconds. Defaults are tuned for spoken
/// content: shorter chunks lose context, longer chunks dilute search
/// relevance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub target_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
}

impl Default for ChunkParams {
    fn default() -> Self {
        ChunkParams {
            target_duration: 75.0,
            min_duration: 45.0,
            max_duration: 120.0,
        }
    }
}

/// A bounded-duration span of transcript text, the atomic search unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub video_id: String,
    pub chunk_index: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub content_hash: String,
}

impl Chunk {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Deterministic fingerprint of a chunk's identity. Used as the idempotency
/// key for embedding and upload, so re-running chunking on unchanged input
/// must reproduce identical hashes.
pub fn content_hash(video_id: &str, chunk_index: i64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(video_id.as_bytes());
    hasher.update(b":");
    hasher.update(chunk_index.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Greedily accumulate captions into bounded-duration chunks.
///
/// A chunk closes at a caption end once its accumulated duration reaches the
/// target; a caption that would push the chunk past the maximum forces a
/// close first. A trailing buffer shorter than the minimum is merged into the
/// previous chunk instead of being emitted undersized. Boundaries always fall
/// on caption ends; a single caption longer than the maximum becomes its own
/// oversized chunk.
pub fn chunk_transcript(transcript: &TranscriptRecord, params: &ChunkParams) -> Vec<Chunk> {
    let mut spans: Vec<(f64, f64, String)> = Vec::new();
    let mut buf_start = 0.0;
    let mut buf_end = 0.0;
    let mut buf_text: Vec<&str> = Vec::new();

    for caption in &transcript.segments {
        if !buf_text.is_empty() && caption.end - buf_start > params.max_duration {
            spans.push((buf_start, buf_end, buf_text.join(" ")));
            buf_text.clear();
        }
        if buf_text.is_empty() {
            buf_start = caption.start;
        }
        buf_text.push(&caption.text);
        buf_end = caption.end;

        if buf_end - buf_start >= params.target_duration {
            spans.push((buf_start, buf_end, buf_text.join(" ")));
            buf_text.clear();
        }
    }

    if !buf_text.is_empty() {
        let trailing_text = buf_text.join(" ");
        if buf_end - buf_start < params.min_duration && !spans.is_empty() {
            let prev = spans.last_mut().unwrap();
            prev.1 = buf_end;
            prev.2.push(' ');
            prev.2.push_str(&trailing_text);
        } else {
            spans.push((buf_start, buf_end, trailing_text));
        }
    }

    spans
        .into_iter()
        .enumerate()
        .map(|(i, (start, end, text))| {
            let chunk_index = i as i64;
            let hash = content_hash(&transcript.video_id, chunk_index, &text);
            Chunk {
                video_id: transcript.video_id.clone(),
                chunk_index,
                start_time: start,
                end_time: end,
                text,
                content_hash: hash,
            }
        })
        .collect()
}

/// Format seconds as a human-readable timestamp (`M:SS` or `H:MM:SS`).
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Deep link to the chunk's moment in the source video.
pub fn youtube_link(video_id: &str, start_seconds: f64) -> String {
    format!(
        "https://www.youtube.com/watch?v={}&t={}s",
        video_id,
        start_seconds.max(0.0) as u64
    )
}

/// Text sent to the embedding model: title and timestamp give the model
/// context the chunk text alone lacks.
pub fn embedding_text(video_title: &str, chunk: &Chunk) -> String {
    format!(
        "{} | {}\n\n{}",
        video_title,
        format_timestamp(chunk.start_time),
        chunk.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Caption;

    fn record(video_id: &str, caps: &[(f64, f64, &str)]) -> TranscriptRecord {
        TranscriptRecord::new(
            video_id,
            caps.iter()
                .map(|&(start, end, text)| Caption {
                    start,
                    end,
                    text: text.to_string(),
                })
                .collect(),
        )
    }

    fn params(target: f64, min: f64, max: f64) -> ChunkParams {
        ChunkParams {
            target_duration: target,
            min_duration: min,
            max_duration: max,
        }
    }

    #[test]
    fn short_trailing_buffer_merges_into_previous_chunk() {
        let transcript = record("vid1", &[(0.0, 30.0, "a"), (30.0, 65.0, "b"), (65.0, 80.0, "c")]);
        let chunks = chunk_transcript(&transcript, &params(75.0, 30.0, 90.0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_time, 0.0);
        assert_eq!(chunks[0].end_time, 80.0);
        assert_eq!(chunks[0].text, "a b c");
    }

    #[test]
    fn chunking_is_deterministic() {
        let transcript = record(
            "vid1",
            &[
                (0.0, 20.0, "one"),
                (20.0, 50.0, "two"),
                (50.0, 90.0, "three"),
                (90.0, 130.0, "four"),
                (130.0, 170.0, "five"),
            ],
        );
        let p = ChunkParams::default();
        let first = chunk_transcript(&transcript, &p);
        let second = chunk_transcript(&transcript, &p);
        assert_eq!(first, second);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.content_hash, b.content_hash);
        }
    }

    #[test]
    fn indices_are_sequential_from_zero() {
        let caps: Vec<(f64, f64, String)> = (0..100)
            .map(|i| (i as f64 * 5.0, (i + 1) as f64 * 5.0, format!("caption {}", i)))
            .collect();
        let borrowed: Vec<(f64, f64, &str)> =
            caps.iter().map(|(s, e, t)| (*s, *e, t.as_str())).collect();
        let transcript = record("vid1", &borrowed);
        let chunks = chunk_transcript(&transcript, &ChunkParams::default());
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
        }
    }

    #[test]
    fn boundaries_fall_on_caption_ends() {
        let caps: Vec<(f64, f64, String)> = (0..80)
            .map(|i| (i as f64 * 4.0, (i + 1) as f64 * 4.0, format!("word{}", i)))
            .collect();
        let borrowed: Vec<(f64, f64, &str)> =
            caps.iter().map(|(s, e, t)| (*s, *e, t.as_str())).collect();
        let transcript = record("vid1", &borrowed);
        let boundaries: Vec<f64> = transcript.segments.iter().map(|c| c.end).collect();

        let chunks = chunk_transcript(&transcript, &ChunkParams::default());
        for chunk in &chunks {
            assert!(boundaries.contains(&chunk.end_time));
        }
    }

    #[test]
    fn durations_stay_within_bounds_for_typical_captions() {
        let caps: Vec<(f64, f64, String)> = (0..100)
            .map(|i| (i as f64 * 4.0, (i + 1) as f64 * 4.0, format!("word{}", i)))
            .collect();
        let borrowed: Vec<(f64, f64, &str)> =
            caps.iter().map(|(s, e, t)| (*s, *e, t.as_str())).collect();
        let transcript = record("vid1", &borrowed);
        let p = params(75.0, 45.0, 120.0);
        let chunks = chunk_transcript(&transcript, &p);
        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.duration() >= p.min_duration, "{}", chunk.duration());
            assert!(chunk.duration() <= p.max_duration, "{}", chunk.duration());
        }
    }

    #[test]
    fn empty_transcript_yields_no_chunks() {
        let transcript = record("vid1", &[]);
        assert!(chunk_transcript(&transcript, &ChunkParams::default()).is_empty());
    }

    #[test]
    fn oversized_single_caption_becomes_its_own_chunk() {
        let transcript = record("vid1", &[(0.0, 200.0, "one very long caption")]);
        let chunks = chunk_transcript(&transcript, &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].duration(), 200.0);
    }

    #[test]
    fn merged_trailing_chunk_hash_matches_final_text() {
        let transcript = record("vid1", &[(0.0, 30.0, "a"), (30.0, 65.0, "b"), (65.0, 80.0, "c")]);
        let chunks = chunk_transcript(&transcript, &params(75.0, 30.0, 90.0));
        assert_eq!(
            chunks[0].content_hash,
            content_hash("vid1", 0, &chunks[0].text)
        );
    }

    #[test]
    fn timestamps_format_like_youtube() {
        assert_eq!(format_timestamp(0.0), "0:00");
        assert_eq!(format_timestamp(78.5), "1:18");
        assert_eq!(format_timestamp(3700.0), "1:01:40");
    }

    #[test]
    fn deep_link_includes_start_offset() {
        assert_eq!(
            youtube_link("abc123", 78.9),
            "https://www.youtube.com/watch?v=abc123&t=78s"
        );
    }
}
