use anyhow::Result;

use crate::aggregation::{AggregationConfig, Aggregator};
use crate::capture::{Classification, EmotionClassifier, FrameSource};
use crate::db::{Session, SessionStatus};

use super::SessionOutcome;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Single synchronous pass over a finite frame source.
pub struct BatchAnalyzer {
    config: AggregationConfig,
}

impl BatchAnalyzer {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Classify and ingest every frame `source` yields.
    ///
    /// No-face frames are skipped and per-frame classifier or validation
    /// failures are counted as rejected. A failing source ends the pass
    /// early; what was accumulated is still finalized and the session is
    /// marked interrupted.
    pub fn analyze(
        &self,
        mut session: Session,
        source: &mut dyn FrameSource,
        classifier: &dyn EmotionClassifier,
    ) -> Result<SessionOutcome> {
        let mut aggregator = Aggregator::new(self.config.clone())?;
        let total = source.remaining_hint();
        let mut processed = 0usize;
        let mut last_reported_decile = 0usize;

        log_info!(
            "Analyzing {} with {} ({} frames)",
            source.describe(),
            classifier.name(),
            total.map(|n| n.to_string()).unwrap_or_else(|| "unknown".into())
        );

        let failure = loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break None,
                Err(err) => {
                    log_warn!("frame source failed after {processed} frames: {err:#}");
                    break Some(format!("{err:#}"));
                }
            };

            match classifier.classify(&frame) {
                Ok(Classification::Emotions(vector)) => {
                    if let Err(err) = aggregator.ingest(frame.index, frame.timestamp, vector) {
                        log_warn!("dropping frame {}: {err}", frame.index);
                    }
                }
                Ok(Classification::NoFace) => {
                    log_debug!("no face in frame {}", frame.index);
                    aggregator.record_skip()?;
                }
                Err(err) => {
                    log_warn!("classification failed on frame {}: {err:#}", frame.index);
                    aggregator.record_rejection()?;
                }
            }

            processed += 1;
            if let Some(total) = total.filter(|total| *total > 0) {
                let decile = processed * 10 / total;
                if decile > last_reported_decile {
                    last_reported_decile = decile;
                    log_info!("Progress: {}% ({processed}/{total})", decile * 10);
                }
            }
        };

        let summary = aggregator.finalize()?;
        let status = if failure.is_some() {
            SessionStatus::Interrupted
        } else {
            SessionStatus::Completed
        };
        session.complete(status, &summary, failure.clone());

        log_info!(
            "Batch analysis finished: {} samples, {} skipped, {} rejected",
            summary.sample_count,
            summary.skipped_frames,
            summary.rejected_frames
        );

        Ok(SessionOutcome {
            session,
            summary,
            samples: aggregator.into_samples(),
            failure,
        })
    }
}
