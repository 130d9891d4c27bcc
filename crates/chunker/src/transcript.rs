use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single caption from the transcript source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Caption {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Raw transcript for one video: the ordered caption sequence as fetched,
/// after normalization. Produced once per video, overwritten only on
/// explicit re-extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub video_id: String,
    pub segments: Vec<Caption>,
}

impl TranscriptRecord {
    /// Build a record from raw captions, collapsing whitespace and dropping
    /// captions whose text is empty after trimming.
    pub fn new(video_id: impl Into<String>, raw: Vec<Caption>) -> Self {
        let segments = raw
            .into_iter()
            .filter_map(|c| {
                let text = c.text.split_whitespace().collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    None
                } else {
                    Some(Caption {
                        start: c.start,
                        end: c.end,
                        text,
                    })
                }
            })
            .collect();
        TranscriptRecord {
            video_id: video_id.into(),
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Stable fingerprint of the normalized caption stream. A changed
    /// fingerprint on re-extraction invalidates downstream artifacts.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for seg in &self.segments {
            hasher.update(format!("{:.3}|{:.3}|{}\n", seg.start, seg.end, seg.text));
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(start: f64, end: f64, text: &str) -> Caption {
        Caption {
            start,
            end,
            text: text.to_string(),
        }
    }

    #[test]
    fn normalization_drops_empty_and_collapses_whitespace() {
        let record = TranscriptRecord::new(
            "vid1",
            vec![
                cap(0.0, 2.0, "  hello   world "),
                cap(2.0, 4.0, "   "),
                cap(4.0, 6.0, "ok"),
            ],
        );
        assert_eq!(record.segments.len(), 2);
        assert_eq!(record.segments[0].text, "hello world");
        assert_eq!(record.segments[1].text, "ok");
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = TranscriptRecord::new("vid1", vec![cap(0.0, 2.0, "hello")]);
        let b = TranscriptRecord::new("vid1", vec![cap(0.0, 2.0, "hello")]);
        let c = TranscriptRecord::new("vid1", vec![cap(0.0, 2.0, "goodbye")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
