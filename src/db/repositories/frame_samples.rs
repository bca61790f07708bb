use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_label, to_i64, to_u64},
};
use crate::models::{EmotionLabel, EmotionScores, FrameSample, EMOTION_COUNT};

fn row_to_sample(row: &Row) -> Result<FrameSample> {
    let frame_index: i64 = row.get("frame_index")?;
    let dominant: String = row.get("dominant")?;

    let mut values = [0.0; EMOTION_COUNT];
    for label in EmotionLabel::ALL {
        values[label.index()] = row.get(label.as_str())?;
    }

    Ok(FrameSample {
        frame_index: to_u64(frame_index, "frame_index")?,
        timestamp: row.get("timestamp")?,
        scores: EmotionScores::from_array(values),
        dominant: parse_label(&dominant, "dominant")?,
        nervousness: row.get("nervousness")?,
        confidence: row.get("confidence")?,
    })
}

impl Database {
    /// Store a session's samples in one transaction.
    pub async fn insert_frame_samples(
        &self,
        session_id: &str,
        samples: &[FrameSample],
    ) -> Result<usize> {
        let session_id = session_id.to_string();
        let records = samples.to_vec();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open frame sample transaction")?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO frame_samples (
                        session_id, frame_index, timestamp,
                        happy, neutral, surprise, angry, disgust, fear, sad,
                        dominant, nervousness, confidence
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )?;
                for sample in &records {
                    let [happy, neutral, surprise, angry, disgust, fear, sad] =
                        *sample.scores.as_array();
                    stmt.execute(params![
                        session_id,
                        to_i64(sample.frame_index)?,
                        sample.timestamp,
                        happy,
                        neutral,
                        surprise,
                        angry,
                        disgust,
                        fear,
                        sad,
                        sample.dominant.as_str(),
                        sample.nervousness,
                        sample.confidence,
                    ])?;
                }
            }
            tx.commit().context("failed to commit frame samples")?;
            Ok(records.len())
        })
        .await
    }

    pub async fn get_frame_samples_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<FrameSample>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT frame_index, timestamp, happy, neutral, surprise, angry, disgust, fear, sad,
                        dominant, nervousness, confidence
                 FROM frame_samples
                 WHERE session_id = ?1
                 ORDER BY frame_index",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                samples.push(row_to_sample(row)?);
            }
            Ok(samples)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::aggregation::{AggregationConfig, Aggregator};
    use crate::db::{Database, Session, SessionKind};
    use crate::models::{EmotionLabel, EmotionVector};
    use tempfile::tempdir;

    #[tokio::test]
    async fn samples_round_trip_in_frame_order() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("history.sqlite3")).unwrap();
        let session = Session::begin(SessionKind::Batch, "clip.mp4", "default");
        db.insert_session(&session).await.unwrap();

        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        for (i, fear) in [0.1, 0.6, 0.3].into_iter().enumerate() {
            let vector = EmotionVector::zeroed()
                .with(EmotionLabel::Fear, fear)
                .with(EmotionLabel::Happy, 0.2);
            aggregator.ingest(i as u64, i as f64, vector).unwrap();
        }

        let written = db
            .insert_frame_samples(&session.id, aggregator.samples())
            .await
            .unwrap();
        assert_eq!(written, 3);

        let loaded = db.get_frame_samples_for_session(&session.id).await.unwrap();
        assert_eq!(loaded, aggregator.samples());
        assert_eq!(loaded[1].dominant, EmotionLabel::Fear);
        assert_eq!(loaded[0].dominant, EmotionLabel::Happy);
        assert!(loaded[0].confidence > 0.0);
    }

    #[tokio::test]
    async fn samples_require_an_existing_session() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("history.sqlite3")).unwrap();
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        aggregator
            .ingest(0, 0.0, EmotionVector::zeroed().with(EmotionLabel::Sad, 0.4))
            .unwrap();
        assert!(db
            .insert_frame_samples("no-such-session", aggregator.samples())
            .await
            .is_err());
    }
}
