use std::{collections::HashMap, fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Number of labels in the fixed emotion set.
pub const EMOTION_COUNT: usize = 7;

/// The fixed emotion label set.
///
/// Declaration order doubles as the dominant-label tie-break priority and
/// as the CSV column order, so do not reorder variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Happy,
    Neutral,
    Surprise,
    Angry,
    Disgust,
    Fear,
    Sad,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; EMOTION_COUNT] = [
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
        EmotionLabel::Surprise,
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Sad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Happy => "happy",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Sad => "sad",
        }
    }

    /// Position in the priority order; lower wins ties.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EmotionLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| anyhow!("unknown emotion label '{value}'"))
    }
}

/// Raw classifier output for one frame.
///
/// Nothing is checked here: labels may be missing and values may be out of
/// range. The aggregator validates it on ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionVector {
    values: HashMap<EmotionLabel, f64>,
}

impl EmotionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: EmotionLabel, confidence: f64) -> Self {
        self.values.insert(label, confidence);
        self
    }

    pub fn set(&mut self, label: EmotionLabel, confidence: f64) {
        self.values.insert(label, confidence);
    }

    pub fn get(&self, label: EmotionLabel) -> Option<f64> {
        self.values.get(&label).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every label present, all others set to zero.
    pub fn zeroed() -> Self {
        EmotionLabel::ALL
            .into_iter()
            .fold(Self::new(), |vector, label| vector.with(label, 0.0))
    }
}

impl From<EmotionScores> for EmotionVector {
    fn from(scores: EmotionScores) -> Self {
        EmotionLabel::ALL
            .into_iter()
            .fold(Self::new(), |vector, label| vector.with(label, scores.get(label)))
    }
}

/// Validated confidences, one per label in priority order, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionScores([f64; EMOTION_COUNT]);

impl EmotionScores {
    /// Callers are expected to have validated the range already.
    pub(crate) fn from_array(values: [f64; EMOTION_COUNT]) -> Self {
        Self(values)
    }

    pub fn get(&self, label: EmotionLabel) -> f64 {
        self.0[label.index()]
    }

    pub fn as_array(&self) -> &[f64; EMOTION_COUNT] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (EmotionLabel, f64)> + '_ {
        EmotionLabel::ALL.into_iter().zip(self.0.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("Fear".parse::<EmotionLabel>().unwrap(), EmotionLabel::Fear);
        assert_eq!(" happy ".parse::<EmotionLabel>().unwrap(), EmotionLabel::Happy);
        assert!("contempt".parse::<EmotionLabel>().is_err());
    }

    #[test]
    fn priority_order_matches_declaration() {
        let indices: Vec<usize> = EmotionLabel::ALL.iter().map(|l| l.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(EmotionLabel::Happy < EmotionLabel::Fear);
    }

    #[test]
    fn vector_serializes_with_lowercase_keys() {
        let vector = EmotionVector::new().with(EmotionLabel::Sad, 0.25);
        let json = serde_json::to_string(&vector).unwrap();
        assert!(json.contains("\"sad\":0.25"));
    }
}
