use thiserror::Error;

use crate::models::EmotionLabel;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregationError {
    #[error("malformed classification for frame {frame_index}: {reason}")]
    MalformedClassification { frame_index: u64, reason: String },

    #[error("frame {frame_index} has timestamp {timestamp}s, expected >= {previous}s")]
    OutOfOrderTimestamp {
        frame_index: u64,
        timestamp: f64,
        previous: f64,
    },

    #[error("session is closed; no further frames can be ingested")]
    SessionClosed,

    #[error("invalid aggregation policy: {0}")]
    InvalidPolicy(String),
}

impl AggregationError {
    pub(crate) fn missing_label(frame_index: u64, label: EmotionLabel) -> Self {
        Self::MalformedClassification {
            frame_index,
            reason: format!("missing confidence for {label}"),
        }
    }

    pub(crate) fn out_of_range(frame_index: u64, label: EmotionLabel, value: f64) -> Self {
        Self::MalformedClassification {
            frame_index,
            reason: format!("confidence {value} for {label} is outside [0, 1]"),
        }
    }

    /// Rejections drop a single frame; everything else stops the caller.
    pub fn is_frame_rejection(&self) -> bool {
        matches!(
            self,
            Self::MalformedClassification { .. } | Self::OutOfOrderTimestamp { .. }
        )
    }
}
