use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregation::{AggregationConfig, Aggregator, SessionSummary};
use crate::models::{EmotionLabel, EmotionVector, FrameSample};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

const COLUMNS: [&str; 11] = [
    "timestamp", "happy", "neutral", "surprise", "angry", "disgust", "fear", "sad", "dominant",
    "nervousness", "confidence",
];

/// One exported frame. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub timestamp: f64,
    pub happy: f64,
    pub neutral: f64,
    pub surprise: f64,
    pub angry: f64,
    pub disgust: f64,
    pub fear: f64,
    pub sad: f64,
    pub dominant: EmotionLabel,
    pub nervousness: f64,
    /// Absent from files written before the column existed.
    #[serde(default)]
    pub confidence: f64,
}

impl From<&FrameSample> for CsvRow {
    fn from(sample: &FrameSample) -> Self {
        let [happy, neutral, surprise, angry, disgust, fear, sad] = *sample.scores.as_array();
        Self {
            timestamp: sample.timestamp,
            happy,
            neutral,
            surprise,
            angry,
            disgust,
            fear,
            sad,
            dominant: sample.dominant,
            nervousness: sample.nervousness,
            confidence: sample.confidence,
        }
    }
}

impl CsvRow {
    pub fn to_vector(&self) -> EmotionVector {
        EmotionVector::new()
            .with(EmotionLabel::Happy, self.happy)
            .with(EmotionLabel::Neutral, self.neutral)
            .with(EmotionLabel::Surprise, self.surprise)
            .with(EmotionLabel::Angry, self.angry)
            .with(EmotionLabel::Disgust, self.disgust)
            .with(EmotionLabel::Fear, self.fear)
            .with(EmotionLabel::Sad, self.sad)
    }
}

pub fn write_samples_csv(path: &Path, samples: &[FrameSample]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    if samples.is_empty() {
        writer.write_record(COLUMNS)?;
    }
    for sample in samples {
        writer
            .serialize(CsvRow::from(sample))
            .with_context(|| format!("failed to write frame {}", sample.frame_index))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

pub fn read_samples_csv(path: &Path) -> Result<Vec<CsvRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    reader
        .deserialize::<CsvRow>()
        .enumerate()
        .map(|(line, row)| row.with_context(|| format!("bad row {} in {}", line + 2, path.display())))
        .collect()
}

/// Rebuild a finalized summary from an exported file.
///
/// Dominant label and both scores are recomputed from the per-label
/// columns with `config`'s policies; the exported derived columns are not
/// trusted. Rows the aggregator refuses are logged and counted as rejected.
pub fn reaggregate(path: &Path, config: AggregationConfig) -> Result<SessionSummary> {
    let rows = read_samples_csv(path)?;
    let mut aggregator = Aggregator::new(config)?;
    for (index, row) in rows.iter().enumerate() {
        match aggregator.ingest(index as u64, row.timestamp, row.to_vector()) {
            Ok(_) => {}
            Err(err) if err.is_frame_rejection() => {
                log_warn!("skipping row {} of {}: {err}", index + 2, path.display());
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(aggregator.finalize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn session() -> (Aggregator, SessionSummary) {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        let frames = [
            (0.0, EmotionVector::zeroed().with(EmotionLabel::Happy, 0.7).with(EmotionLabel::Fear, 0.1)),
            (1.0, EmotionVector::zeroed().with(EmotionLabel::Fear, 0.6).with(EmotionLabel::Sad, 0.3)),
            (2.0, EmotionVector::zeroed().with(EmotionLabel::Angry, 0.4).with(EmotionLabel::Neutral, 0.4)),
        ];
        for (i, (t, vector)) in frames.into_iter().enumerate() {
            aggregator.ingest(i as u64, t, vector).unwrap();
        }
        let summary = aggregator.finalize().unwrap();
        (aggregator, summary)
    }

    #[test]
    fn header_follows_fixed_column_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let (aggregator, _) = session();
        write_samples_csv(&path, aggregator.samples()).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,happy,neutral,surprise,angry,disgust,fear,sad,dominant,nervousness,confidence")
        );
        assert!(lines.next().unwrap().contains(",happy,"));
        assert_eq!(contents.lines().count(), 4);
    }

    #[test]
    fn empty_session_still_writes_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_samples_csv(&path, &[]).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("timestamp,happy"));
        assert!(read_samples_csv(&path).unwrap().is_empty());
    }

    #[test]
    fn reaggregation_reproduces_summary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let (aggregator, summary) = session();
        write_samples_csv(&path, aggregator.samples()).unwrap();

        let rebuilt = reaggregate(&path, AggregationConfig::default()).unwrap();
        assert_eq!(rebuilt.sample_count, summary.sample_count);
        assert_eq!(rebuilt.dominant_overall, summary.dominant_overall);
        assert!((rebuilt.nervousness.mean - summary.nervousness.mean).abs() < 1e-12);
        assert!((rebuilt.nervousness.peak - summary.nervousness.peak).abs() < 1e-12);
        assert_eq!(rebuilt.nervousness.peak_at, summary.nervousness.peak_at);
        assert!((rebuilt.confidence.mean - summary.confidence.mean).abs() < 1e-12);
        assert_eq!(rebuilt.confidence.median, summary.confidence.median);
        for label in EmotionLabel::ALL {
            assert!((rebuilt.label(label).mean - summary.label(label).mean).abs() < 1e-12);
            assert_eq!(
                rebuilt.label(label).dominant_count,
                summary.label(label).dominant_count,
                "{label}"
            );
        }
    }

    #[test]
    fn reaggregation_skips_bad_rows_and_counts_them() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(
            &path,
            "timestamp,happy,neutral,surprise,angry,disgust,fear,sad,dominant,nervousness\n\
             0,0.6,0.1,0,0,0,0.2,0,happy,0.1\n\
             1,0,0,0,0,0,1.2,0,fear,1\n\
             2,0.1,0.1,0,0,0,0.7,0,fear,0.3\n\
             1.5,0.5,0,0,0,0,0,0,happy,0\n",
        )
        .unwrap();

        let summary = reaggregate(&path, AggregationConfig::default()).unwrap();
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.rejected_frames, 2);
        assert_eq!(summary.duration_secs, 2.0);
        assert!(summary.finalized);
    }

    #[test]
    fn files_without_confidence_column_still_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.csv");
        fs::write(
            &path,
            "timestamp,happy,neutral,surprise,angry,disgust,fear,sad,dominant,nervousness\n\
             0,0.6,0.4,0,0,0,0,0,happy,0\n",
        )
        .unwrap();
        let rows = read_samples_csv(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].confidence, 0.0);

        let summary = reaggregate(&path, AggregationConfig::default()).unwrap();
        assert!(summary.confidence.mean > 0.0);
    }
}
