use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_kind, parse_label, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{Session, SessionStatus},
};

const SESSION_COLUMNS: &str = "id, kind, source, policy_name, started_at, stopped_at, status,
    sample_count, skipped_frames, rejected_frames, duration_secs,
    nervousness_mean, nervousness_peak, nervousness_median, confidence_mean, confidence_median,
    dominant_overall, failure, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let kind: String = row.get("kind")?;
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;
    let status: String = row.get("status")?;
    let sample_count: i64 = row.get("sample_count")?;
    let skipped_frames: i64 = row.get("skipped_frames")?;
    let rejected_frames: i64 = row.get("rejected_frames")?;
    let dominant_overall: Option<String> = row.get("dominant_overall")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Session {
        id: row.get("id")?,
        kind: parse_kind(&kind)?,
        source: row.get("source")?,
        policy_name: row.get("policy_name")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        status: parse_status(&status)?,
        sample_count: to_u64(sample_count, "sample_count")?,
        skipped_frames: to_u64(skipped_frames, "skipped_frames")?,
        rejected_frames: to_u64(rejected_frames, "rejected_frames")?,
        duration_secs: row.get("duration_secs")?,
        nervousness_mean: row.get("nervousness_mean")?,
        nervousness_peak: row.get("nervousness_peak")?,
        nervousness_median: row.get("nervousness_median")?,
        confidence_mean: row.get("confidence_mean")?,
        confidence_median: row.get("confidence_median")?,
        dominant_overall: dominant_overall
            .map(|raw| parse_label(&raw, "dominant_overall"))
            .transpose()?,
        failure: row.get("failure")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, kind, source, policy_name, started_at, stopped_at, status,
                    sample_count, skipped_frames, rejected_frames, duration_secs, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.id,
                    record.kind.as_str(),
                    record.source,
                    record.policy_name,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    to_i64(record.sample_count)?,
                    to_i64(record.skipped_frames)?,
                    to_i64(record.rejected_frames)?,
                    record.duration_secs,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Write the closing state of a session (status, counts, headline stats).
    pub async fn finish_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     sample_count = ?3,
                     skipped_frames = ?4,
                     rejected_frames = ?5,
                     duration_secs = ?6,
                     nervousness_mean = ?7,
                     nervousness_peak = ?8,
                     nervousness_median = ?9,
                     confidence_mean = ?10,
                     confidence_median = ?11,
                     dominant_overall = ?12,
                     failure = ?13,
                     updated_at = ?14
                 WHERE id = ?15",
                params![
                    record.status.as_str(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    to_i64(record.sample_count)?,
                    to_i64(record.skipped_frames)?,
                    to_i64(record.rejected_frames)?,
                    record.duration_secs,
                    record.nervousness_mean,
                    record.nervousness_peak,
                    record.nervousness_median,
                    record.confidence_mean,
                    record.confidence_median,
                    record.dominant_overall.map(|label| label.as_str()),
                    record.failure,
                    record.updated_at.to_rfc3339(),
                    record.id,
                ],
            )?;
            if updated == 0 {
                return Err(anyhow!("session {} not found", record.id));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }

    /// Most recent first.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at DESC LIMIT ?1"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Sessions left `Running` by a process that did not shut down cleanly.
    pub async fn get_incomplete_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = 'Running' ORDER BY started_at"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn mark_session_interrupted(
        &self,
        session_id: &str,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    SessionStatus::Interrupted.as_str(),
                    stopped_at.to_rfc3339(),
                    stopped_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::SessionSummary;
    use crate::db::models::SessionKind;
    use crate::models::EmotionLabel;
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::new(dir.path().join("history.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn session_round_trip() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let mut session = Session::begin(SessionKind::Batch, "interview.mp4", "default");
        db.insert_session(&session).await.unwrap();

        let mut summary = SessionSummary::empty("default");
        summary.sample_count = 3;
        summary.skipped_frames = 1;
        summary.duration_secs = 2.0;
        summary.nervousness.mean = 0.5;
        summary.nervousness.peak = 0.8;
        summary.nervousness.median = Some(0.5);
        summary.confidence.mean = 0.4;
        summary.confidence.median = Some(0.35);
        summary.dominant_overall = Some(EmotionLabel::Fear);
        session.complete(SessionStatus::Completed, &summary, None);
        db.finish_session(&session).await.unwrap();

        let loaded = db.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(loaded.sample_count, 3);
        assert_eq!(loaded.skipped_frames, 1);
        assert_eq!(loaded.nervousness_peak, Some(0.8));
        assert_eq!(loaded.confidence_mean, Some(0.4));
        assert_eq!(loaded.confidence_median, Some(0.35));
        assert_eq!(loaded.dominant_overall, Some(EmotionLabel::Fear));
        assert!(loaded.stopped_at.is_some());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        assert!(db.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn running_sessions_are_recovered_as_interrupted() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stale = Session::begin(SessionKind::Realtime, "/dev/video0", "default");
        db.insert_session(&stale).await.unwrap();

        let mut done = Session::begin(SessionKind::Batch, "clip.mp4", "default");
        db.insert_session(&done).await.unwrap();
        done.complete(SessionStatus::Completed, &SessionSummary::empty("default"), None);
        db.finish_session(&done).await.unwrap();

        let incomplete = db.get_incomplete_sessions().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, stale.id);

        db.mark_session_interrupted(&stale.id, Utc::now()).await.unwrap();
        assert!(db.get_incomplete_sessions().await.unwrap().is_empty());
        let listed = db.list_sessions(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed
            .iter()
            .any(|s| s.id == stale.id && s.status == SessionStatus::Interrupted));
    }
}
