use serde::{Deserialize, Serialize};

use super::emotion::{EmotionLabel, EmotionScores};

/// One ingested frame. Created by the aggregator, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSample {
    pub frame_index: u64,
    /// Seconds from stream start.
    pub timestamp: f64,
    pub scores: EmotionScores,
    pub dominant: EmotionLabel,
    pub nervousness: f64,
    pub confidence: f64,
}
