use serde::{Deserialize, Serialize};

use crate::models::EmotionLabel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NervousnessLevel {
    Low,
    Medium,
    High,
}

impl NervousnessLevel {
    pub fn classify(value: f64, medium_threshold: f64, high_threshold: f64) -> Self {
        if value > high_threshold {
            NervousnessLevel::High
        } else if value > medium_threshold {
            NervousnessLevel::Medium
        } else {
            NervousnessLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NervousnessLevel::Low => "Low",
            NervousnessLevel::Medium => "Medium",
            NervousnessLevel::High => "High",
        }
    }
}

/// Five-number summary used by the box plot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quartiles {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl Quartiles {
    /// `None` for an empty slice. The slice does not need to be sorted.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(Self {
            min: sorted[0],
            q1: quantile_sorted(&sorted, 0.25),
            median: quantile_sorted(&sorted, 0.5),
            q3: quantile_sorted(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
        })
    }
}

/// Linear interpolation between closest ranks.
pub(crate) fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let position = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelStats {
    pub label: EmotionLabel,
    pub mean: f64,
    /// Population variance of the label's confidence.
    pub variance: f64,
    /// Number of samples where this label was dominant.
    pub dominant_count: u64,
    /// Only computed on finalize.
    pub quartiles: Option<Quartiles>,
}

impl LabelStats {
    pub fn empty(label: EmotionLabel) -> Self {
        Self {
            label,
            mean: 0.0,
            variance: 0.0,
            dominant_count: 0,
            quartiles: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NervousnessStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub peak: f64,
    /// Timestamp of the first sample that reached `peak`.
    pub peak_at: Option<f64>,
    /// Only computed on finalize.
    pub median: Option<f64>,
    /// Least-squares slope of nervousness over time, per second.
    pub trend_per_sec: f64,
    /// Classification of the median; only set on finalize with data.
    pub level: Option<NervousnessLevel>,
}

/// Spread of the per-frame confidence score.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Only computed on finalize.
    pub median: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub timestamp: f64,
    pub nervousness: f64,
    pub confidence: f64,
    pub dominant: EmotionLabel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

/// Aggregate view of one session.
///
/// Live snapshots carry only the most recent part of `timeline` and leave
/// the order statistics (medians, quartiles, histograms) empty. A
/// finalized summary carries everything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub sample_count: u64,
    pub skipped_frames: u64,
    pub rejected_frames: u64,
    pub duration_secs: f64,
    pub labels: Vec<LabelStats>,
    pub nervousness: NervousnessStats,
    pub confidence: ConfidenceStats,
    pub timeline: Vec<TimelinePoint>,
    /// Nervousness distribution over [0, 1].
    pub histogram: Vec<HistogramBin>,
    /// Confidence distribution, same bins as `histogram`.
    pub confidence_histogram: Vec<HistogramBin>,
    pub dominant_overall: Option<EmotionLabel>,
    pub policy_name: String,
    pub confidence_policy_name: String,
    pub finalized: bool,
}

impl SessionSummary {
    pub fn empty(policy_name: impl Into<String>) -> Self {
        Self {
            sample_count: 0,
            skipped_frames: 0,
            rejected_frames: 0,
            duration_secs: 0.0,
            labels: EmotionLabel::ALL.into_iter().map(LabelStats::empty).collect(),
            nervousness: NervousnessStats::default(),
            confidence: ConfidenceStats::default(),
            timeline: Vec::new(),
            histogram: Vec::new(),
            confidence_histogram: Vec::new(),
            dominant_overall: None,
            policy_name: policy_name.into(),
            confidence_policy_name: String::new(),
            finalized: false,
        }
    }

    pub fn label(&self, label: EmotionLabel) -> &LabelStats {
        &self.labels[label.index()]
    }

    /// Frames that reached the classifier, whatever the outcome.
    pub fn frames_seen(&self) -> u64 {
        self.sample_count + self.skipped_frames + self.rejected_frames
    }

    /// Share of seen frames that produced a sample, in [0, 1].
    pub fn detection_coverage(&self) -> f64 {
        let seen = self.frames_seen();
        if seen == 0 {
            0.0
        } else {
            self.sample_count as f64 / seen as f64
        }
    }

    /// Ingested samples per second of session time.
    pub fn analysis_rate(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.sample_count as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    /// Dominant-label shares in priority order; zeros for an empty session.
    pub fn dominant_proportions(&self) -> Vec<(EmotionLabel, f64)> {
        self.labels
            .iter()
            .map(|stats| {
                let share = if self.sample_count == 0 {
                    0.0
                } else {
                    stats.dominant_count as f64 / self.sample_count as f64
                };
                (stats.label, share)
            })
            .collect()
    }
}
