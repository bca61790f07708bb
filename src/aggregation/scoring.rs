use crate::models::{EmotionLabel, EmotionScores, EmotionVector, EMOTION_COUNT};

use super::{
    config::{ConfidencePolicy, NervousnessPolicy},
    error::AggregationError,
};

/// Check that every label is present and within [0, 1].
pub fn validate_vector(
    frame_index: u64,
    vector: &EmotionVector,
) -> Result<EmotionScores, AggregationError> {
    let mut values = [0.0; EMOTION_COUNT];
    for label in EmotionLabel::ALL {
        let value = vector
            .get(label)
            .ok_or_else(|| AggregationError::missing_label(frame_index, label))?;
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(AggregationError::out_of_range(frame_index, label, value));
        }
        values[label.index()] = value;
    }
    Ok(EmotionScores::from_array(values))
}

/// Argmax over the scores; ties go to the label earliest in priority order.
pub fn dominant_label(scores: &EmotionScores) -> EmotionLabel {
    let mut best = EmotionLabel::ALL[0];
    let mut best_value = scores.get(best);
    for (label, value) in scores.iter().skip(1) {
        // Strict comparison keeps the earlier label on ties.
        if value > best_value {
            best = label;
            best_value = value;
        }
    }
    best
}

/// Weighted sum normalized by the maximum possible weighted sum.
fn weighted_score(scores: &EmotionScores, weights: &[f64; EMOTION_COUNT]) -> f64 {
    let max_sum: f64 = weights.iter().sum();
    if !max_sum.is_finite() || max_sum <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = scores
        .as_array()
        .iter()
        .zip(weights.iter())
        .map(|(confidence, weight)| confidence * weight)
        .sum();

    (weighted / max_sum).clamp(0.0, 1.0)
}

pub fn nervousness_score(scores: &EmotionScores, policy: &NervousnessPolicy) -> f64 {
    weighted_score(scores, &policy.weights())
}

pub fn confidence_score(scores: &EmotionScores, policy: &ConfidencePolicy) -> f64 {
    weighted_score(scores, &policy.weights())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: [f64; EMOTION_COUNT]) -> EmotionScores {
        EmotionScores::from_array(values)
    }

    #[test]
    fn tie_between_happy_and_fear_resolves_to_happy() {
        let tied = scores([0.4, 0.0, 0.0, 0.0, 0.0, 0.4, 0.0]);
        for _ in 0..5 {
            assert_eq!(dominant_label(&tied), EmotionLabel::Happy);
        }
    }

    #[test]
    fn tie_among_later_labels_uses_priority_order() {
        let tied = scores([0.1, 0.1, 0.0, 0.3, 0.3, 0.3, 0.3]);
        assert_eq!(dominant_label(&tied), EmotionLabel::Angry);
    }

    #[test]
    fn all_zero_vector_resolves_to_first_label() {
        assert_eq!(dominant_label(&scores([0.0; EMOTION_COUNT])), EmotionLabel::Happy);
    }

    #[test]
    fn validation_reports_missing_label() {
        let vector = EmotionVector::zeroed();
        let mut partial = EmotionVector::new();
        for label in EmotionLabel::ALL.into_iter().filter(|l| *l != EmotionLabel::Sad) {
            partial.set(label, vector.get(label).unwrap());
        }
        let err = validate_vector(3, &partial).unwrap_err();
        assert_eq!(err, AggregationError::missing_label(3, EmotionLabel::Sad));
    }

    #[test]
    fn validation_rejects_out_of_range_and_nan() {
        let over = EmotionVector::zeroed().with(EmotionLabel::Fear, 1.2);
        assert!(validate_vector(0, &over).is_err());
        let negative = EmotionVector::zeroed().with(EmotionLabel::Happy, -0.01);
        assert!(validate_vector(0, &negative).is_err());
        let nan = EmotionVector::zeroed().with(EmotionLabel::Angry, f64::NAN);
        assert!(validate_vector(0, &nan).is_err());
    }

    #[test]
    fn nervousness_is_normalized_by_total_weight() {
        let policy = NervousnessPolicy::default();
        let all_max = scores([1.0; EMOTION_COUNT]);
        assert!((nervousness_score(&all_max, &policy) - 1.0).abs() < 1e-12);

        let fear_only = scores([0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        let expected = 0.9 / (0.5 + 0.7 + 0.8 + 0.9);
        assert!((nervousness_score(&fear_only, &policy) - expected).abs() < 1e-12);
    }

    #[test]
    fn scaling_contributors_preserves_ranking() {
        let policy = NervousnessPolicy::default();
        let a = scores([0.2, 0.1, 0.1, 0.2, 0.1, 0.3, 0.0]);
        let b = scores([0.1, 0.1, 0.3, 0.1, 0.2, 0.4, 0.0]);
        let before = nervousness_score(&a, &policy) < nervousness_score(&b, &policy);

        let scale = |s: &EmotionScores, k: f64| {
            let mut values = *s.as_array();
            for label in [
                EmotionLabel::Fear,
                EmotionLabel::Angry,
                EmotionLabel::Disgust,
                EmotionLabel::Surprise,
            ] {
                values[label.index()] *= k;
            }
            scores(values)
        };

        for k in [0.25, 0.5, 2.0] {
            let after = nervousness_score(&scale(&a, k), &policy)
                < nervousness_score(&scale(&b, k), &policy);
            assert_eq!(before, after, "ranking changed at factor {k}");
        }
    }

    #[test]
    fn sad_counts_only_when_weighted() {
        let sad = scores([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(nervousness_score(&sad, &NervousnessPolicy::default()), 0.0);
        assert_eq!(
            nervousness_score(&sad, &NervousnessPolicy::single(EmotionLabel::Sad)),
            1.0
        );
    }

    #[test]
    fn confidence_uses_its_own_weights() {
        let policy = ConfidencePolicy::default();
        let happy = scores([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let expected = 0.8 / (0.8 + 0.6 + 0.5);
        assert!((confidence_score(&happy, &policy) - expected).abs() < 1e-12);

        let fear = scores([0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(confidence_score(&fear, &policy), 0.0);
        assert!(nervousness_score(&fear, &NervousnessPolicy::default()) > 0.0);
    }
}
