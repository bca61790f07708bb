use serde::{Deserialize, Serialize};

use crate::models::{EmotionLabel, EMOTION_COUNT};

use super::error::AggregationError;

/// Declares a named per-label weighting.
///
/// A policy scores a frame as `Σ wᵢ·cᵢ / Σ wᵢ`, so with confidences in
/// [0, 1] the score always lands in [0, 1].
macro_rules! weight_policy {
    (
        $(#[$meta:meta])*
        $policy:ident, $default_name:literal,
        [$happy:expr, $neutral:expr, $surprise:expr, $angry:expr, $disgust:expr, $fear:expr, $sad:expr]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $policy {
            /// Name recorded in reports so alternative weightings stay traceable.
            pub name: String,
            pub happy: f64,
            pub neutral: f64,
            pub surprise: f64,
            pub angry: f64,
            pub disgust: f64,
            pub fear: f64,
            pub sad: f64,
        }

        impl Default for $policy {
            fn default() -> Self {
                Self::from_weights(
                    $default_name,
                    [$happy, $neutral, $surprise, $angry, $disgust, $fear, $sad],
                )
            }
        }

        impl $policy {
            /// A policy that only looks at one label, with weight 1.
            pub fn single(label: EmotionLabel) -> Self {
                let mut weights = [0.0; EMOTION_COUNT];
                weights[label.index()] = 1.0;
                Self::from_weights(format!("{label}-only"), weights)
            }

            pub fn from_weights(name: impl Into<String>, weights: [f64; EMOTION_COUNT]) -> Self {
                Self {
                    name: name.into(),
                    happy: weights[0],
                    neutral: weights[1],
                    surprise: weights[2],
                    angry: weights[3],
                    disgust: weights[4],
                    fear: weights[5],
                    sad: weights[6],
                }
            }

            pub fn weights(&self) -> [f64; EMOTION_COUNT] {
                [
                    self.happy,
                    self.neutral,
                    self.surprise,
                    self.angry,
                    self.disgust,
                    self.fear,
                    self.sad,
                ]
            }

            pub fn weight(&self, label: EmotionLabel) -> f64 {
                self.weights()[label.index()]
            }

            pub fn validate(&self) -> Result<(), AggregationError> {
                validate_weights(stringify!($policy), &self.weights())
            }
        }
    };
}

weight_policy!(
    /// Weights feeding the nervousness score. The defaults are the
    /// complement of the classic confidence mapping for the four
    /// arousal-heavy negative emotions.
    NervousnessPolicy,
    "fear-anger-disgust-surprise",
    [0.0, 0.0, 0.5, 0.7, 0.8, 0.9, 0.0]
);

weight_policy!(
    /// Weights feeding the confidence score, taken from the classic
    /// confidence mapping for the composed emotions.
    ConfidencePolicy,
    "happy-neutral-surprise",
    [0.8, 0.6, 0.5, 0.0, 0.0, 0.0, 0.0]
);

fn validate_weights(kind: &str, weights: &[f64; EMOTION_COUNT]) -> Result<(), AggregationError> {
    if let Some(label) = EmotionLabel::ALL
        .into_iter()
        .find(|label| !weights[label.index()].is_finite() || weights[label.index()] < 0.0)
    {
        return Err(AggregationError::InvalidPolicy(format!(
            "{kind}: weight for {label} must be a finite non-negative number"
        )));
    }

    let total: f64 = weights.iter().sum();
    if !total.is_finite() {
        return Err(AggregationError::InvalidPolicy(format!(
            "{kind}: weights are too large to sum"
        )));
    }
    if total <= 0.0 {
        return Err(AggregationError::InvalidPolicy(format!(
            "{kind}: at least one weight must be positive"
        )));
    }

    Ok(())
}

/// Tunables for the aggregation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub nervousness: NervousnessPolicy,
    pub confidence: ConfidencePolicy,

    /// Bins used for the nervousness distribution histogram over [0, 1].
    pub histogram_bins: usize,

    /// Number of most recent time-series points carried by live snapshots.
    pub snapshot_window: usize,

    /// Median nervousness above this is reported as High.
    pub high_level_threshold: f64,

    /// Median nervousness above this (and not High) is reported as Medium.
    pub medium_level_threshold: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            nervousness: NervousnessPolicy::default(),
            confidence: ConfidencePolicy::default(),
            histogram_bins: 20,
            snapshot_window: 60,
            high_level_threshold: 0.6,
            medium_level_threshold: 0.4,
        }
    }
}

impl AggregationConfig {
    pub fn validate(&self) -> Result<(), AggregationError> {
        self.nervousness.validate()?;
        self.confidence.validate()?;
        if self.histogram_bins == 0 {
            return Err(AggregationError::InvalidPolicy(
                "histogram_bins must be at least 1".into(),
            ));
        }
        if self.medium_level_threshold > self.high_level_threshold {
            return Err(AggregationError::InvalidPolicy(
                "medium_level_threshold must not exceed high_level_threshold".into(),
            ));
        }
        Ok(())
    }
}
