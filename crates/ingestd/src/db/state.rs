use std::collections::HashMap;

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::PipelineError;

/// One phase of the ingestion pipeline, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Stage {
    Discovery,
    Metadata,
    Transcription,
    Chunking,
    Embedding,
    Upload,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::Discovery,
        Stage::Metadata,
        Stage::Transcription,
        Stage::Chunking,
        Stage::Embedding,
        Stage::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Metadata => "metadata",
            Stage::Transcription => "transcription",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Upload => "upload",
        }
    }

    /// Stages that must be `done` for an item before this stage may consume it.
    pub fn prior(&self) -> &'static [Stage] {
        let position = Stage::ORDER.iter().position(|s| s == self).unwrap();
        &Stage::ORDER[..position]
    }

    /// Stages downstream of this one, invalidated when its artifact changes.
    pub fn downstream(&self) -> &'static [Stage] {
        let position = Stage::ORDER.iter().position(|s| s == self).unwrap();
        &Stage::ORDER[position + 1..]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item progress marker for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    InProgress,
    Done,
    FailedRetryable,
    FailedPermanent,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Done => "done",
            StageStatus::FailedRetryable => "failed_retryable",
            StageStatus::FailedPermanent => "failed_permanent",
        }
    }

    pub fn parse(raw: &str) -> Option<StageStatus> {
        match raw {
            "pending" => Some(StageStatus::Pending),
            "in_progress" => Some(StageStatus::InProgress),
            "done" => Some(StageStatus::Done),
            "failed_retryable" => Some(StageStatus::FailedRetryable),
            "failed_permanent" => Some(StageStatus::FailedPermanent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageRecord {
    pub video_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// Candidate selection flags for one stage run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateFilter {
    pub incremental: bool,
    pub retry_blocked: bool,
}

impl CandidateFilter {
    fn selects(&self, status: StageStatus) -> bool {
        match status {
            // A stale in_progress row means a previous run crashed mid-item;
            // the work is idempotent, so treat it like pending.
            StageStatus::Pending | StageStatus::InProgress => true,
            StageStatus::Done => !self.incremental && !self.retry_blocked,
            StageStatus::FailedRetryable => {
                self.retry_blocked || (!self.incremental && !self.retry_blocked)
            }
            // Never re-selected automatically; clearing the row is a manual,
            // deliberate act.
            StageStatus::FailedPermanent => false,
        }
    }
}

impl Database {
    pub fn get_status(&self, video_id: &str, stage: Stage) -> Result<StageStatus, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let raw: Result<String, rusqlite::Error> = conn.query_row(
            "SELECT status FROM stage_status WHERE video_id = ?1 AND stage = ?2",
            params![video_id, stage.as_str()],
            |row| row.get(0),
        );
        match raw {
            Ok(raw) => StageStatus::parse(&raw).ok_or_else(|| {
                PipelineError::Storage(format!("unknown stage status '{}'", raw))
            }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(StageStatus::Pending),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_stage_record(
        &self,
        video_id: &str,
        stage: Stage,
    ) -> Result<Option<StageRecord>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT status, attempt_count, last_error, updated_at
             FROM stage_status WHERE video_id = ?1 AND stage = ?2",
        )?;
        let mut rows = stmt.query_map(params![video_id, stage.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        match rows.next() {
            Some(Ok((raw, attempt_count, last_error, updated_at))) => {
                let status = StageStatus::parse(&raw).ok_or_else(|| {
                    PipelineError::Storage(format!("unknown stage status '{}'", raw))
                })?;
                Ok(Some(StageRecord {
                    video_id: video_id.to_string(),
                    stage,
                    status,
                    attempt_count,
                    last_error,
                    updated_at,
                }))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Persist a status transition for `(video_id, stage)`. The write is
    /// immediately visible to subsequent reads: state is flushed per item,
    /// never batched at the end of a run. Entering `in_progress` counts as a
    /// new attempt.
    pub fn set_status(
        &self,
        video_id: &str,
        stage: Stage,
        status: StageStatus,
        error: Option<&str>,
    ) -> Result<(), PipelineError> {
        let now = Utc::now().to_rfc3339();
        let bump = if status == StageStatus::InProgress { 1 } else { 0 };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO stage_status (video_id, stage, status, attempt_count, last_error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (video_id, stage) DO UPDATE SET
                 status = excluded.status,
                 attempt_count = stage_status.attempt_count + ?4,
                 last_error = excluded.last_error,
                 updated_at = excluded.updated_at",
            params![video_id, stage.as_str(), status.as_str(), bump, error, now],
        )?;
        Ok(())
    }

    /// Video ids eligible for a stage run, in discovery order: every prior
    /// stage must be `done`, and the item's own status must pass the filter.
    pub fn list_candidates(
        &self,
        stage: Stage,
        filter: CandidateFilter,
    ) -> Result<Vec<String>, PipelineError> {
        let videos = self.list_video_ids()?;
        let statuses = self.all_statuses()?;
        let status_of = |video_id: &str, stage: Stage| {
            statuses
                .get(&(video_id.to_string(), stage))
                .copied()
                .unwrap_or(StageStatus::Pending)
        };

        Ok(videos
            .into_iter()
            .filter(|video_id| {
                stage
                    .prior()
                    .iter()
                    .all(|prior| status_of(video_id, *prior) == StageStatus::Done)
            })
            .filter(|video_id| filter.selects(status_of(video_id, stage)))
            .collect())
    }

    /// Reset every stage after `stage` to pending for this video. Called when
    /// an upstream artifact is regenerated with different content.
    pub fn reset_downstream(&self, video_id: &str, stage: Stage) -> Result<(), PipelineError> {
        for downstream in stage.downstream() {
            self.set_status(video_id, *downstream, StageStatus::Pending, None)?;
        }
        Ok(())
    }

    fn all_statuses(&self) -> Result<HashMap<(String, Stage), StageStatus>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT video_id, stage, status FROM stage_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (video_id, stage_raw, status_raw) = row?;
            let stage = Stage::ORDER
                .iter()
                .copied()
                .find(|s| s.as_str() == stage_raw);
            let status = StageStatus::parse(&status_raw);
            if let (Some(stage), Some(status)) = (stage, status) {
                map.insert((video_id, stage), status);
            }
        }
        Ok(map)
    }

    /// Per-stage counts of each status, for the `status` command and run logs.
    pub fn stage_summary(&self) -> Result<Vec<(Stage, HashMap<StageStatus, i64>)>, PipelineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT stage, status, COUNT(*) FROM stage_status GROUP BY stage, status")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut by_stage: HashMap<Stage, HashMap<StageStatus, i64>> = HashMap::new();
        for row in rows {
            let (stage_raw, status_raw, count) = row?;
            let stage = Stage::ORDER
                .iter()
                .copied()
                .find(|s| s.as_str() == stage_raw);
            let status = StageStatus::parse(&status_raw);
            if let (Some(stage), Some(status)) = (stage, status) {
                by_stage.entry(stage).or_default().insert(status, count);
            }
        }

        Ok(Stage::ORDER
            .iter()
            .map(|stage| (*stage, by_stage.remove(stage).unwrap_or_default()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::VideoItem;

    fn seed_video(db: &Database, id: &str) {
        db.upsert_video(&VideoItem {
            video_id: id.to_string(),
            title: format!("Video {}", id),
            description: None,
            published_at: None,
            thumbnail_url: None,
            category: None,
            duration_seconds: None,
            caption_available: None,
            view_count: None,
        })
        .unwrap();
    }

    fn mark_prior_done(db: &Database, id: &str, stage: Stage) {
        for prior in stage.prior() {
            db.set_status(id, *prior, StageStatus::Done, None).unwrap();
        }
    }

    #[test]
    fn unknown_items_default_to_pending() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            db.get_status("missing", Stage::Chunking).unwrap(),
            StageStatus::Pending
        );
    }

    #[test]
    fn in_progress_bumps_attempt_count() {
        let db = Database::open_in_memory().unwrap();
        db.set_status("v1", Stage::Transcription, StageStatus::InProgress, None)
            .unwrap();
        db.set_status(
            "v1",
            Stage::Transcription,
            StageStatus::FailedRetryable,
            Some("timeout"),
        )
        .unwrap();
        db.set_status("v1", Stage::Transcription, StageStatus::InProgress, None)
            .unwrap();

        let record = db
            .get_stage_record("v1", Stage::Transcription)
            .unwrap()
            .unwrap();
        assert_eq!(record.attempt_count, 2);
    }

    #[test]
    fn retry_blocked_selects_exactly_pending_and_failed_retryable() {
        let db = Database::open_in_memory().unwrap();
        for id in ["done", "pending", "retryable", "permanent", "stale"] {
            seed_video(&db, id);
            mark_prior_done(&db, id, Stage::Transcription);
        }
        db.set_status("done", Stage::Transcription, StageStatus::Done, None)
            .unwrap();
        db.set_status(
            "retryable",
            Stage::Transcription,
            StageStatus::FailedRetryable,
            Some("proxy error"),
        )
        .unwrap();
        db.set_status(
            "permanent",
            Stage::Transcription,
            StageStatus::FailedPermanent,
            Some("captions disabled"),
        )
        .unwrap();
        db.set_status("stale", Stage::Transcription, StageStatus::InProgress, None)
            .unwrap();

        let candidates = db
            .list_candidates(
                Stage::Transcription,
                CandidateFilter {
                    incremental: false,
                    retry_blocked: true,
                },
            )
            .unwrap();
        assert_eq!(candidates, vec!["pending", "retryable", "stale"]);
    }

    #[test]
    fn incremental_skips_done_and_failures() {
        let db = Database::open_in_memory().unwrap();
        for id in ["done", "pending", "retryable"] {
            seed_video(&db, id);
            mark_prior_done(&db, id, Stage::Chunking);
        }
        db.set_status("done", Stage::Chunking, StageStatus::Done, None)
            .unwrap();
        db.set_status(
            "retryable",
            Stage::Chunking,
            StageStatus::FailedRetryable,
            None,
        )
        .unwrap();

        let candidates = db
            .list_candidates(
                Stage::Chunking,
                CandidateFilter {
                    incremental: true,
                    retry_blocked: false,
                },
            )
            .unwrap();
        assert_eq!(candidates, vec!["pending"]);
    }

    #[test]
    fn items_are_gated_on_prior_stages() {
        let db = Database::open_in_memory().unwrap();
        seed_video(&db, "gated");
        seed_video(&db, "ready");
        mark_prior_done(&db, "ready", Stage::Chunking);
        // "gated" is missing a done transcription stage.
        db.set_status("gated", Stage::Discovery, StageStatus::Done, None)
            .unwrap();
        db.set_status("gated", Stage::Metadata, StageStatus::Done, None)
            .unwrap();

        let candidates = db
            .list_candidates(Stage::Chunking, CandidateFilter::default())
            .unwrap();
        assert_eq!(candidates, vec!["ready"]);
    }

    #[test]
    fn reset_downstream_reopens_later_stages_only() {
        let db = Database::open_in_memory().unwrap();
        for stage in Stage::ORDER {
            db.set_status("v1", stage, StageStatus::Done, None).unwrap();
        }
        db.reset_downstream("v1", Stage::Transcription).unwrap();

        assert_eq!(
            db.get_status("v1", Stage::Transcription).unwrap(),
            StageStatus::Done
        );
        for stage in [Stage::Chunking, Stage::Embedding, Stage::Upload] {
            assert_eq!(db.get_status("v1", stage).unwrap(), StageStatus::Pending);
        }
    }
}
