use std::{collections::VecDeque, sync::Arc};

use tokio::sync::watch;

use crate::models::{EmotionLabel, EmotionVector, FrameSample, EMOTION_COUNT};

use super::{
    config::AggregationConfig,
    error::AggregationError,
    scoring::{confidence_score, dominant_label, nervousness_score, validate_vector},
    summary::{
        ConfidenceStats, HistogramBin, LabelStats, NervousnessLevel, NervousnessStats, Quartiles,
        SessionSummary, TimelinePoint,
    },
};

/// Welford accumulator for mean and population variance.
#[derive(Debug, Clone, Copy, Default)]
struct RunningMoments {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }
}

/// Sums for the least-squares slope of nervousness over time.
#[derive(Debug, Clone, Copy, Default)]
struct TrendSums {
    n: f64,
    t: f64,
    s: f64,
    tt: f64,
    ts: f64,
}

impl TrendSums {
    fn push(&mut self, t: f64, s: f64) {
        self.n += 1.0;
        self.t += t;
        self.s += s;
        self.tt += t * t;
        self.ts += t * s;
    }

    fn slope(&self) -> f64 {
        let denominator = self.n * self.tt - self.t * self.t;
        if self.n < 2.0 || denominator.abs() < f64::EPSILON {
            return 0.0;
        }
        (self.n * self.ts - self.t * self.s) / denominator
    }
}

#[derive(Debug, Clone, Default)]
struct RunningAggregates {
    labels: [RunningMoments; EMOTION_COUNT],
    dominant_counts: [u64; EMOTION_COUNT],
    nervousness: RunningMoments,
    nervousness_min: f64,
    nervousness_peak: f64,
    peak_at: Option<f64>,
    confidence: RunningMoments,
    confidence_min: f64,
    confidence_max: f64,
    trend: TrendSums,
    last_timestamp: Option<f64>,
}

impl RunningAggregates {
    fn push(&mut self, sample: &FrameSample) {
        for (label, value) in sample.scores.iter() {
            self.labels[label.index()].push(value);
        }
        self.dominant_counts[sample.dominant.index()] += 1;

        if self.nervousness.count == 0 || sample.nervousness < self.nervousness_min {
            self.nervousness_min = sample.nervousness;
        }
        if self.peak_at.is_none() || sample.nervousness > self.nervousness_peak {
            self.nervousness_peak = sample.nervousness;
            self.peak_at = Some(sample.timestamp);
        }
        self.nervousness.push(sample.nervousness);

        if self.confidence.count == 0 {
            self.confidence_min = sample.confidence;
            self.confidence_max = sample.confidence;
        } else {
            self.confidence_min = self.confidence_min.min(sample.confidence);
            self.confidence_max = self.confidence_max.max(sample.confidence);
        }
        self.confidence.push(sample.confidence);

        self.trend.push(sample.timestamp, sample.nervousness);
        self.last_timestamp = Some(sample.timestamp);
    }

    /// Most frequent dominant label, ties broken by priority order.
    fn dominant_overall(&self) -> Option<EmotionLabel> {
        let mut best: Option<(EmotionLabel, u64)> = None;
        for label in EmotionLabel::ALL {
            let count = self.dominant_counts[label.index()];
            if count == 0 {
                continue;
            }
            match best {
                Some((_, best_count)) if best_count >= count => {}
                _ => best = Some((label, count)),
            }
        }
        best.map(|(label, _)| label)
    }
}

/// Read side of a session's published aggregates.
///
/// Each ingest swaps in a fully built [`SessionSummary`]; readers only ever
/// see complete values and never hold up the producer.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Arc<SessionSummary>>,
}

impl SnapshotReader {
    pub fn snapshot(&self) -> Arc<SessionSummary> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot. Returns `false` once the
    /// aggregator is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Per-session aggregation engine.
///
/// Owns the session's samples. Running aggregates are updated in O(1) per
/// sample; order statistics are computed once by [`Aggregator::finalize`].
#[derive(Debug)]
pub struct Aggregator {
    config: AggregationConfig,
    samples: Vec<FrameSample>,
    running: RunningAggregates,
    recent: VecDeque<TimelinePoint>,
    skipped_frames: u64,
    rejected_frames: u64,
    closed: bool,
    published: watch::Sender<Arc<SessionSummary>>,
}

impl Aggregator {
    pub fn new(config: AggregationConfig) -> Result<Self, AggregationError> {
        config.validate()?;
        let (published, _) = watch::channel(Arc::new(SessionSummary {
            confidence_policy_name: config.confidence.name.clone(),
            ..SessionSummary::empty(config.nervousness.name.clone())
        }));
        Ok(Self {
            recent: VecDeque::with_capacity(config.snapshot_window),
            config,
            samples: Vec::new(),
            running: RunningAggregates::default(),
            skipped_frames: 0,
            rejected_frames: 0,
            closed: false,
            published,
        })
    }

    pub fn samples(&self) -> &[FrameSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<FrameSample> {
        self.samples
    }

    /// Validate one classifier result and fold it into the session.
    ///
    /// Rejected frames are counted and leave every aggregate untouched.
    pub fn ingest(
        &mut self,
        frame_index: u64,
        timestamp: f64,
        vector: EmotionVector,
    ) -> Result<FrameSample, AggregationError> {
        if self.closed {
            return Err(AggregationError::SessionClosed);
        }

        let sample = match self.build_sample(frame_index, timestamp, &vector) {
            Ok(sample) => sample,
            Err(err) => {
                self.rejected_frames += 1;
                self.publish_snapshot();
                return Err(err);
            }
        };

        self.running.push(&sample);
        self.samples.push(sample);

        if self.config.snapshot_window > 0 {
            if self.recent.len() == self.config.snapshot_window {
                self.recent.pop_front();
            }
            self.recent.push_back(timeline_point(&sample));
        }

        self.publish_snapshot();
        Ok(sample)
    }

    /// Count a frame where no face was detected.
    pub fn record_skip(&mut self) -> Result<(), AggregationError> {
        if self.closed {
            return Err(AggregationError::SessionClosed);
        }
        self.skipped_frames += 1;
        self.publish_snapshot();
        Ok(())
    }

    /// Count a frame the classifier failed on.
    pub fn record_rejection(&mut self) -> Result<(), AggregationError> {
        if self.closed {
            return Err(AggregationError::SessionClosed);
        }
        self.rejected_frames += 1;
        self.publish_snapshot();
        Ok(())
    }

    /// Latest published aggregates. Never fails.
    pub fn snapshot(&self) -> SessionSummary {
        self.published.borrow().as_ref().clone()
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.published.subscribe(),
        }
    }

    /// Close the session and compute the full statistics.
    pub fn finalize(&mut self) -> Result<SessionSummary, AggregationError> {
        if self.closed {
            return Err(AggregationError::SessionClosed);
        }
        self.closed = true;

        let mut summary = self.running_summary(self.samples.iter().map(timeline_point).collect());

        for label in EmotionLabel::ALL {
            let values: Vec<f64> = self.samples.iter().map(|s| s.scores.get(label)).collect();
            summary.labels[label.index()].quartiles = Quartiles::from_values(&values);
        }

        let nervousness: Vec<f64> = self.samples.iter().map(|s| s.nervousness).collect();
        if let Some(quartiles) = Quartiles::from_values(&nervousness) {
            summary.nervousness.median = Some(quartiles.median);
            summary.nervousness.level = Some(NervousnessLevel::classify(
                quartiles.median,
                self.config.medium_level_threshold,
                self.config.high_level_threshold,
            ));
        }
        summary.histogram = histogram(&nervousness, self.config.histogram_bins);

        let confidence: Vec<f64> = self.samples.iter().map(|s| s.confidence).collect();
        summary.confidence.median = Quartiles::from_values(&confidence).map(|q| q.median);
        summary.confidence_histogram = histogram(&confidence, self.config.histogram_bins);
        summary.finalized = true;

        self.published.send_replace(Arc::new(summary.clone()));
        Ok(summary)
    }

    fn build_sample(
        &self,
        frame_index: u64,
        timestamp: f64,
        vector: &EmotionVector,
    ) -> Result<FrameSample, AggregationError> {
        let previous = self.running.last_timestamp.unwrap_or(0.0);
        if !timestamp.is_finite() || timestamp < previous {
            return Err(AggregationError::OutOfOrderTimestamp {
                frame_index,
                timestamp,
                previous,
            });
        }

        let scores = validate_vector(frame_index, vector)?;
        Ok(FrameSample {
            frame_index,
            timestamp,
            scores,
            dominant: dominant_label(&scores),
            nervousness: nervousness_score(&scores, &self.config.nervousness),
            confidence: confidence_score(&scores, &self.config.confidence),
        })
    }

    fn running_summary(&self, timeline: Vec<TimelinePoint>) -> SessionSummary {
        let running = &self.running;
        let labels = EmotionLabel::ALL
            .into_iter()
            .map(|label| {
                let moments = running.labels[label.index()];
                LabelStats {
                    label,
                    mean: moments.mean,
                    variance: moments.variance(),
                    dominant_count: running.dominant_counts[label.index()],
                    quartiles: None,
                }
            })
            .collect();

        SessionSummary {
            sample_count: self.samples.len() as u64,
            skipped_frames: self.skipped_frames,
            rejected_frames: self.rejected_frames,
            duration_secs: running.last_timestamp.unwrap_or(0.0),
            labels,
            nervousness: NervousnessStats {
                mean: running.nervousness.mean,
                std_dev: running.nervousness.variance().sqrt(),
                min: running.nervousness_min,
                peak: running.nervousness_peak,
                peak_at: running.peak_at,
                median: None,
                trend_per_sec: running.trend.slope(),
                level: None,
            },
            confidence: ConfidenceStats {
                mean: running.confidence.mean,
                std_dev: running.confidence.variance().sqrt(),
                min: running.confidence_min,
                max: running.confidence_max,
                median: None,
            },
            timeline,
            histogram: Vec::new(),
            confidence_histogram: Vec::new(),
            dominant_overall: running.dominant_overall(),
            policy_name: self.config.nervousness.name.clone(),
            confidence_policy_name: self.config.confidence.name.clone(),
            finalized: false,
        }
    }

    fn publish_snapshot(&self) {
        let summary = self.running_summary(self.recent.iter().copied().collect());
        self.published.send_replace(Arc::new(summary));
    }
}

fn timeline_point(sample: &FrameSample) -> TimelinePoint {
    TimelinePoint {
        timestamp: sample.timestamp,
        nervousness: sample.nervousness,
        confidence: sample.confidence,
        dominant: sample.dominant,
    }
}

/// Equal-width bins over [0, 1]; a value of exactly 1 lands in the last bin.
fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let width = 1.0 / bins as f64;
    let mut counts = vec![0u64; bins];
    for value in values {
        let index = ((value / width).floor() as usize).min(bins - 1);
        counts[index] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: i as f64 * width,
            upper: (i + 1) as f64 * width,
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::config::NervousnessPolicy;

    fn fear_only_config() -> AggregationConfig {
        AggregationConfig {
            nervousness: NervousnessPolicy::single(EmotionLabel::Fear),
            ..AggregationConfig::default()
        }
    }

    fn fear_vector(fear: f64) -> EmotionVector {
        EmotionVector::zeroed()
            .with(EmotionLabel::Fear, fear)
            .with(EmotionLabel::Neutral, 1.0 - fear)
    }

    #[test]
    fn concrete_scenario_mean_and_peak() {
        let mut aggregator = Aggregator::new(fear_only_config()).unwrap();
        for (i, fear) in [0.2, 0.8, 0.5].into_iter().enumerate() {
            let sample = aggregator.ingest(i as u64, i as f64, fear_vector(fear)).unwrap();
            assert!((sample.nervousness - fear).abs() < 1e-12);
        }

        let summary = aggregator.finalize().unwrap();
        assert_eq!(summary.sample_count, 3);
        assert!((summary.nervousness.mean - 0.5).abs() < 1e-9);
        assert!((summary.nervousness.peak - 0.8).abs() < 1e-12);
        assert_eq!(summary.nervousness.peak_at, Some(1.0));
        assert_eq!(summary.nervousness.median, Some(0.5));
        assert!((summary.nervousness.min - 0.2).abs() < 1e-12);
        assert_eq!(summary.duration_secs, 2.0);
        assert_eq!(summary.timeline.len(), 3);
        assert!(summary.finalized);
    }

    #[test]
    fn tied_vector_is_dominated_by_happy() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        let tied = EmotionVector::zeroed()
            .with(EmotionLabel::Happy, 0.4)
            .with(EmotionLabel::Fear, 0.4);
        for i in 0..3 {
            let sample = aggregator.ingest(i, i as f64, tied.clone()).unwrap();
            assert_eq!(sample.dominant, EmotionLabel::Happy);
        }
        assert_eq!(
            aggregator.snapshot().label(EmotionLabel::Happy).dominant_count,
            3
        );
    }

    #[test]
    fn empty_session_finalizes_to_zeroes() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        let summary = aggregator.finalize().unwrap();
        assert_eq!(summary.sample_count, 0);
        assert_eq!(summary.duration_secs, 0.0);
        assert_eq!(summary.nervousness, NervousnessStats::default());
        assert_eq!(summary.confidence, ConfidenceStats::default());
        assert!(summary.confidence_histogram.is_empty());
        assert!(summary.timeline.is_empty());
        assert!(summary.histogram.is_empty());
        assert!(summary.dominant_overall.is_none());
        assert!(summary.labels.iter().all(|l| l.mean == 0.0 && l.quartiles.is_none()));
        assert!(summary.finalized);
    }

    #[test]
    fn snapshot_sample_count_never_decreases() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        let mut last = 0;
        for i in 0..25u64 {
            let vector = if i % 4 == 0 {
                EmotionVector::new().with(EmotionLabel::Happy, 0.3)
            } else {
                fear_vector((i % 10) as f64 / 10.0)
            };
            let _ = aggregator.ingest(i, i as f64, vector);
            let count = aggregator.snapshot().sample_count;
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 18);
        assert_eq!(aggregator.snapshot().rejected_frames, 7);
    }

    #[test]
    fn malformed_frame_does_not_touch_aggregates() {
        let mut aggregator = Aggregator::new(fear_only_config()).unwrap();
        aggregator.ingest(0, 0.0, fear_vector(0.5)).unwrap();
        let before = aggregator.snapshot();

        let err = aggregator
            .ingest(1, 1.0, EmotionVector::zeroed().with(EmotionLabel::Sad, 3.0))
            .unwrap_err();
        assert!(err.is_frame_rejection());

        let after = aggregator.snapshot();
        assert_eq!(after.sample_count, before.sample_count);
        assert_eq!(after.nervousness, before.nervousness);
        assert_eq!(after.rejected_frames, 1);

        aggregator.ingest(2, 2.0, fear_vector(0.1)).unwrap();
        assert_eq!(aggregator.snapshot().sample_count, 2);
    }

    #[test]
    fn out_of_order_timestamp_is_rejected() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        aggregator.ingest(0, 5.0, fear_vector(0.2)).unwrap();
        let err = aggregator.ingest(1, 4.0, fear_vector(0.2)).unwrap_err();
        assert!(matches!(err, AggregationError::OutOfOrderTimestamp { .. }));
        // Equal timestamps are allowed.
        assert!(aggregator.ingest(2, 5.0, fear_vector(0.2)).is_ok());
    }

    #[test]
    fn ingest_after_finalize_fails_with_session_closed() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        aggregator.ingest(0, 0.0, fear_vector(0.2)).unwrap();
        aggregator.finalize().unwrap();
        assert_eq!(
            aggregator.ingest(1, 1.0, fear_vector(0.3)).unwrap_err(),
            AggregationError::SessionClosed
        );
        assert_eq!(aggregator.record_skip().unwrap_err(), AggregationError::SessionClosed);
        assert_eq!(aggregator.finalize().unwrap_err(), AggregationError::SessionClosed);
        assert_eq!(aggregator.samples().len(), 1);
    }

    #[test]
    fn skipped_frames_are_disclosed() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        aggregator.record_skip().unwrap();
        aggregator.ingest(1, 1.0, fear_vector(0.4)).unwrap();
        aggregator.record_skip().unwrap();
        let summary = aggregator.finalize().unwrap();
        assert_eq!(summary.skipped_frames, 2);
        assert_eq!(summary.sample_count, 1);
        assert!((summary.detection_coverage() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn snapshot_window_is_bounded() {
        let config = AggregationConfig {
            snapshot_window: 5,
            ..fear_only_config()
        };
        let mut aggregator = Aggregator::new(config).unwrap();
        for i in 0..12u64 {
            aggregator.ingest(i, i as f64, fear_vector(0.1)).unwrap();
        }
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.timeline.len(), 5);
        assert_eq!(snapshot.timeline[0].timestamp, 7.0);
        assert!(snapshot.histogram.is_empty());
        assert!(!snapshot.finalized);

        let summary = aggregator.finalize().unwrap();
        assert_eq!(summary.timeline.len(), 12);
    }

    #[test]
    fn reader_sees_final_summary() {
        let mut aggregator = Aggregator::new(fear_only_config()).unwrap();
        let reader = aggregator.reader();
        aggregator.ingest(0, 0.0, fear_vector(0.3)).unwrap();
        assert_eq!(reader.snapshot().sample_count, 1);
        aggregator.finalize().unwrap();
        assert!(reader.snapshot().finalized);
    }

    #[test]
    fn histogram_places_one_in_last_bin() {
        let bins = histogram(&[0.0, 0.05, 0.5, 1.0], 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].count, 2);
        assert_eq!(bins[5].count, 1);
        assert_eq!(bins[9].count, 1);
        assert_eq!(bins.iter().map(|b| b.count).sum::<u64>(), 4);
    }

    #[test]
    fn trend_follows_rising_nervousness() {
        let mut aggregator = Aggregator::new(fear_only_config()).unwrap();
        for i in 0..5u64 {
            aggregator.ingest(i, i as f64, fear_vector(0.1 * i as f64)).unwrap();
        }
        let summary = aggregator.finalize().unwrap();
        assert!((summary.nervousness.trend_per_sec - 0.1).abs() < 1e-9);
    }

    #[test]
    fn dominant_overall_is_the_mode() {
        let mut aggregator = Aggregator::new(AggregationConfig::default()).unwrap();
        let sad = EmotionVector::zeroed().with(EmotionLabel::Sad, 0.9);
        let angry = EmotionVector::zeroed().with(EmotionLabel::Angry, 0.9);
        aggregator.ingest(0, 0.0, sad.clone()).unwrap();
        aggregator.ingest(1, 1.0, angry.clone()).unwrap();
        // One each: tie goes to angry, which precedes sad.
        assert_eq!(aggregator.snapshot().dominant_overall, Some(EmotionLabel::Angry));
        aggregator.ingest(2, 2.0, sad).unwrap();
        assert_eq!(aggregator.snapshot().dominant_overall, Some(EmotionLabel::Sad));
    }

    #[test]
    fn confidence_is_scored_alongside_nervousness() {
        let config = AggregationConfig {
            confidence: crate::aggregation::ConfidencePolicy::single(EmotionLabel::Neutral),
            ..fear_only_config()
        };
        let mut aggregator = Aggregator::new(config).unwrap();
        for (i, fear) in [0.2, 0.8, 0.5].into_iter().enumerate() {
            let sample = aggregator.ingest(i as u64, i as f64, fear_vector(fear)).unwrap();
            assert!((sample.confidence - (1.0 - fear)).abs() < 1e-12);
        }

        let live = aggregator.snapshot();
        assert!((live.confidence.mean - 0.5).abs() < 1e-9);
        assert_eq!(live.confidence.median, None);
        assert_eq!(live.confidence_policy_name, "neutral-only");

        let summary = aggregator.finalize().unwrap();
        assert!((summary.confidence.min - 0.2).abs() < 1e-12);
        assert!((summary.confidence.max - 0.8).abs() < 1e-12);
        assert_eq!(summary.confidence.median, Some(0.5));
        assert!((summary.timeline[1].confidence - 0.2).abs() < 1e-12);
        assert_eq!(
            summary.confidence_histogram.iter().map(|b| b.count).sum::<u64>(),
            3
        );
        assert_eq!(summary.confidence_histogram.len(), summary.histogram.len());
    }
}
