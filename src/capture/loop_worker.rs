use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::aggregation::Aggregator;

use super::{
    classifier::{Classification, EmotionClassifier},
    source::{Frame, FrameSource},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_debug, log_error, log_info, log_warn};

pub type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    pub capture_interval: Duration,
    /// Upper bound on capture plus classification of one frame.
    pub capture_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            capture_interval: Duration::from_millis(500),
            capture_timeout: Duration::from_secs(10),
        }
    }
}

/// Why the capture loop returned.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    Cancelled,
    SourceExhausted,
    SourceFailed(String),
}

#[derive(Debug, Error)]
enum CaptureError {
    #[error("frame source failed: {0:#}")]
    Source(anyhow::Error),
    #[error("classifier failed: {0:#}")]
    Classifier(anyhow::Error),
    #[error("capture worker failed: {0}")]
    Worker(String),
}

enum CaptureOutcome {
    Classified(Frame, Classification),
    EndOfStream,
}

/// Producer side of a live session.
///
/// Captures and classifies one frame per tick on the blocking pool, then
/// ingests it. Cancellation wins over an in-flight capture: the pending
/// frame is abandoned and never reaches the aggregator. The aggregator is
/// handed back so the caller can finalize whatever was accumulated.
pub async fn capture_loop(
    session_id: String,
    mut aggregator: Aggregator,
    source: SharedSource,
    classifier: Arc<dyn EmotionClassifier>,
    config: LoopConfig,
    cancel_token: CancellationToken,
) -> (Aggregator, LoopExit) {
    let mut ticker = tokio::time::interval(config.capture_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fut = capture_and_classify(source.clone(), classifier.clone());
                let outcome = tokio::select! {
                    result = tokio::time::timeout(config.capture_timeout, fut) => result,
                    _ = cancel_token.cancelled() => {
                        log_info!("capture loop cancelled mid-frame for session {}", session_id);
                        break LoopExit::Cancelled;
                    }
                };

                match outcome {
                    Ok(Ok(CaptureOutcome::Classified(frame, Classification::Emotions(vector)))) => {
                        match aggregator.ingest(frame.index, frame.timestamp, vector) {
                            Ok(sample) => log_debug!(
                                "frame {} at {:.2}s: {} nervousness {:.3}",
                                sample.frame_index, sample.timestamp, sample.dominant, sample.nervousness
                            ),
                            Err(err) if err.is_frame_rejection() => {
                                log_warn!("dropping frame {} for session {}: {err}", frame.index, session_id);
                            }
                            Err(err) => {
                                log_error!("aggregator refused frame {}: {err}", frame.index);
                                break LoopExit::SourceFailed(err.to_string());
                            }
                        }
                    }
                    Ok(Ok(CaptureOutcome::Classified(frame, Classification::NoFace))) => {
                        log_debug!("no face in frame {}", frame.index);
                        let _ = aggregator.record_skip();
                    }
                    Ok(Ok(CaptureOutcome::EndOfStream)) => {
                        log_info!("frame source exhausted for session {}", session_id);
                        break LoopExit::SourceExhausted;
                    }
                    Ok(Err(CaptureError::Classifier(err))) => {
                        log_warn!("classification failed for session {}: {err:#}", session_id);
                        let _ = aggregator.record_rejection();
                    }
                    Ok(Err(err)) => {
                        log_error!("capture failed for session {}: {err}", session_id);
                        break LoopExit::SourceFailed(err.to_string());
                    }
                    Err(_) => {
                        log_warn!(
                            "capture timeout (> {:?}) for session {}",
                            config.capture_timeout, session_id
                        );
                        let _ = aggregator.record_rejection();
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("capture loop shutting down for session {}", session_id);
                break LoopExit::Cancelled;
            }
        }
    };

    (aggregator, exit)
}

async fn capture_and_classify(
    source: SharedSource,
    classifier: Arc<dyn EmotionClassifier>,
) -> Result<CaptureOutcome, CaptureError> {
    tokio::task::spawn_blocking(move || {
        let frame = {
            let mut guard = source
                .lock()
                .map_err(|_| CaptureError::Worker("frame source lock poisoned".into()))?;
            guard.next_frame().map_err(CaptureError::Source)?
        };

        let Some(frame) = frame else {
            return Ok(CaptureOutcome::EndOfStream);
        };

        let classification = classifier
            .classify(&frame)
            .map_err(CaptureError::Classifier)?;
        Ok(CaptureOutcome::Classified(frame, classification))
    })
    .await
    .map_err(|err| CaptureError::Worker(err.to_string()))?
}
