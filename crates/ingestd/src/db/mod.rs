use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use chunker::{Chunk, TranscriptRecord};
use rusqlite::{params, Connection, Row};

use crate::error::PipelineError;

pub mod state;

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self, PipelineError> {
        let conn = Connection::open(db_path)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), PipelineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS videos (
                video_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                published_at TEXT,
                thumbnail_url TEXT,
                category TEXT,
                duration_seconds INTEGER,
                caption_available INTEGER,
                view_count INTEGER,
                discovered_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS stage_status (
                video_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (video_id, stage)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transcripts (
                video_id TEXT PRIMARY KEY,
                transcript_json TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                content_hash TEXT PRIMARY KEY,
                video_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_time REAL NOT NULL,
                end_time REAL NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (video_id, chunk_index)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                vector_blob BLOB NOT NULL,
                uploaded_at TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

/// One discovered channel video. Identity fields are written at discovery;
/// duration, caption and view fields are filled in by the metadata stage.
#[derive(Debug, Clone)]
pub struct VideoItem {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: Option<String>,
    pub thumbnail_url: Option<String>,
    pub category: Option<String>,
    pub duration_seconds: Option<i64>,
    pub caption_available: Option<bool>,
    pub view_count: Option<i64>,
}

impl VideoItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(VideoItem {
            video_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            published_at: row.get(3)?,
            thumbnail_url: row.get(4)?,
            category: row.get(5)?,
            duration_seconds: row.get(6)?,
            caption_available: row
                .get::<_, Option<i64>>(7)?
                .map(|v| v != 0),
            view_count: row.get(8)?,
        })
    }
}

const VIDEO_COLUMNS: &str = "video_id, title, description, published_at, thumbnail_url, \
                             category, duration_seconds, caption_available, view_count";

impl Database {
    /// Insert a newly discovered video, or refresh its identity fields if it
    /// was discovered before. Metadata-stage fields are left untouched.
    pub fn upsert_video(&self, video: &VideoItem) -> Result<(), PipelineError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let existing: Result<String, rusqlite::Error> = conn.query_row(
            "SELECT video_id FROM videos WHERE video_id = ?1",
            params![video.video_id],
            |row| row.get(0),
        );

        match existing {
            Ok(_) => {
                conn.execute(
                    "UPDATE videos SET title = ?1, description = ?2, published_at = ?3,
                            thumbnail_url = ?4, category = ?5
                     WHERE video_id = ?6",
                    params![
                        video.title,
                        video.description,
                        video.published_at,
                        video.thumbnail_url,
                        video.category,
                        video.video_id
                    ],
                )?;
                Ok(())
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                conn.execute(
                    "INSERT INTO videos (video_id, title, description, published_at,
                            thumbnail_url, category, discovered_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        video.video_id,
                        video.title,
                        video.description,
                        video.published_at,
                        video.thumbnail_url,
                        video.category,
                        now
                    ],
                )?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_video_metadata(
        &self,
        video_id: &str,
        duration_seconds: i64,
        caption_available: bool,
        view_count: Option<i64>,
    ) -> Result<(), PipelineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE videos SET duration_seconds = ?1, caption_available = ?2, view_count = ?3
             WHERE video_id = ?4",
            params![
                duration_seconds,
                if caption_available { 1 } else { 0 },
                view_count,
                video_id
            ],
        )?;
        Ok(())
    }

    pub fn get_video(&self, video_id: &str) -> Result<Option<VideoItem>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos WHERE video_id = ?1",
            VIDEO_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![video_id], VideoItem::from_row)?;

        match rows.next() {
            Some(Ok(video)) => Ok(Some(video)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// All known video ids in discovery order.
    pub fn list_video_ids(&self) -> Result<Vec<String>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT video_id FROM videos ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn count_videos(&self) -> Result<i64, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl Database {
    /// Store the raw transcript artifact. Overwrites any previous version:
    /// transcripts are regenerable and never mutated in place.
    pub fn store_transcript(
        &self,
        record: &TranscriptRecord,
        fingerprint: &str,
    ) -> Result<(), PipelineError> {
        let now = Utc::now().to_rfc3339();
        let transcript_json = serde_json::to_string(record)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO transcripts (video_id, transcript_json, fingerprint, fetched_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.video_id, transcript_json, fingerprint, now],
        )?;
        Ok(())
    }

    pub fn get_transcript(&self, video_id: &str) -> Result<Option<TranscriptRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT transcript_json FROM transcripts WHERE video_id = ?1")?;
        let mut rows = stmt.query_map(params![video_id], |row| row.get::<_, String>(0))?;

        match rows.next() {
            Some(Ok(json)) => Ok(Some(serde_json::from_str(&json)?)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    pub fn transcript_fingerprint(&self, video_id: &str) -> Result<Option<String>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT fingerprint FROM transcripts WHERE video_id = ?1")?;
        let mut rows = stmt.query_map(params![video_id], |row| row.get::<_, String>(0))?;

        match rows.next() {
            Some(Ok(fp)) => Ok(Some(fp)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

impl Database {
    /// Replace a video's chunk set with a freshly derived one. Returns true
    /// when the stored set actually changed; unchanged input is a no-op so
    /// incremental re-runs never alter artifacts. Stale embeddings for
    /// superseded hashes are removed with the chunks they described.
    pub fn replace_chunks(&self, video_id: &str, chunks: &[Chunk]) -> Result<bool, PipelineError> {
        let existing = self.get_chunks(video_id)?;
        if existing.len() == chunks.len()
            && existing
                .iter()
                .zip(chunks.iter())
                .all(|(a, b)| a.content_hash == b.content_hash)
        {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM embeddings WHERE chunk_id IN
                 (SELECT content_hash FROM chunks WHERE video_id = ?1)",
            params![video_id],
        )?;
        tx.execute("DELETE FROM chunks WHERE video_id = ?1", params![video_id])?;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (content_hash, video_id, chunk_index, start_time, end_time, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chunk.content_hash,
                    chunk.video_id,
                    chunk.chunk_index,
                    chunk.start_time,
                    chunk.end_time,
                    chunk.text,
                    now
                ],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn get_chunks(&self, video_id: &str) -> Result<Vec<Chunk>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT video_id, chunk_index, start_time, end_time, text, content_hash
             FROM chunks WHERE video_id = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![video_id], |row| {
            Ok(Chunk {
                video_id: row.get(0)?,
                chunk_index: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                text: row.get(4)?,
                content_hash: row.get(5)?,
            })
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    pub fn count_chunks(&self) -> Result<i64, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count)
    }
}

pub(crate) fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl Database {
    pub fn has_embedding(&self, chunk_id: &str, model: &str) -> Result<bool, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let exists = conn.query_row(
            "SELECT COUNT(*) > 0 FROM embeddings WHERE chunk_id = ?1 AND model = ?2",
            params![chunk_id, model],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn store_embedding(
        &self,
        chunk_id: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<(), PipelineError> {
        let now = Utc::now().to_rfc3339();
        let blob = vector_to_blob(vector);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (chunk_id, model, vector_blob, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![chunk_id, model, blob, now],
        )?;
        Ok(())
    }

    /// Chunks of a video that have a stored embedding for the given model,
    /// paired with their vectors, in chunk order.
    pub fn get_embedded_chunks(
        &self,
        video_id: &str,
        model: &str,
    ) -> Result<Vec<(Chunk, Vec<f32>)>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.video_id, c.chunk_index, c.start_time, c.end_time, c.text, c.content_hash,
                    e.vector_blob
             FROM chunks c
             INNER JOIN embeddings e ON e.chunk_id = c.content_hash
             WHERE c.video_id = ?1 AND e.model = ?2
             ORDER BY c.chunk_index",
        )?;
        let rows = stmt.query_map(params![video_id, model], |row| {
            let chunk = Chunk {
                video_id: row.get(0)?,
                chunk_index: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                text: row.get(4)?,
                content_hash: row.get(5)?,
            };
            let blob: Vec<u8> = row.get(6)?;
            Ok((chunk, blob))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (chunk, blob) = row?;
            result.push((chunk, blob_to_vector(&blob)));
        }
        Ok(result)
    }

    pub fn mark_uploaded(&self, chunk_id: &str) -> Result<(), PipelineError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE embeddings SET uploaded_at = ?1 WHERE chunk_id = ?2",
            params![now, chunk_id],
        )?;
        Ok(())
    }

    pub fn count_embeddings(&self) -> Result<i64, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        Ok(count)
    }
}
