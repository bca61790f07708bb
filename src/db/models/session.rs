//! Persisted session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregation::SessionSummary;
use crate::models::EmotionLabel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    Batch,
    Realtime,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Batch => "Batch",
            SessionKind::Realtime => "Realtime",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Completed => "Completed",
            SessionStatus::Cancelled => "Cancelled",
            SessionStatus::Interrupted => "Interrupted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    /// Video path or camera device.
    pub source: String,
    pub policy_name: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub sample_count: u64,
    pub skipped_frames: u64,
    pub rejected_frames: u64,
    pub duration_secs: f64,
    pub nervousness_mean: Option<f64>,
    pub nervousness_peak: Option<f64>,
    pub nervousness_median: Option<f64>,
    pub confidence_mean: Option<f64>,
    pub confidence_median: Option<f64>,
    pub dominant_overall: Option<EmotionLabel>,
    /// Upstream failure that ended the session early.
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A fresh `Running` session starting now.
    pub fn begin(kind: SessionKind, source: impl Into<String>, policy_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            source: source.into(),
            policy_name: policy_name.into(),
            started_at: now,
            stopped_at: None,
            status: SessionStatus::Running,
            sample_count: 0,
            skipped_frames: 0,
            rejected_frames: 0,
            duration_secs: 0.0,
            nervousness_mean: None,
            nervousness_peak: None,
            nervousness_median: None,
            confidence_mean: None,
            confidence_median: None,
            dominant_overall: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy the headline numbers of a finalized summary and close the
    /// session with `status`.
    pub fn complete(&mut self, status: SessionStatus, summary: &SessionSummary, failure: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.stopped_at = Some(now);
        self.updated_at = now;
        self.sample_count = summary.sample_count;
        self.skipped_frames = summary.skipped_frames;
        self.rejected_frames = summary.rejected_frames;
        self.duration_secs = summary.duration_secs;
        let has_samples = summary.sample_count > 0;
        self.nervousness_mean = has_samples.then_some(summary.nervousness.mean);
        self.nervousness_peak = has_samples.then_some(summary.nervousness.peak);
        self.nervousness_median = summary.nervousness.median;
        self.confidence_mean = has_samples.then_some(summary.confidence.mean);
        self.confidence_median = summary.confidence.median;
        self.dominant_overall = summary.dominant_overall;
        self.failure = failure;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_running_with_fresh_id() {
        let a = Session::begin(SessionKind::Batch, "clip.mp4", "default");
        let b = Session::begin(SessionKind::Batch, "clip.mp4", "default");
        assert_eq!(a.status, SessionStatus::Running);
        assert!(a.stopped_at.is_none());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn complete_on_empty_summary_leaves_stats_unset() {
        let mut session = Session::begin(SessionKind::Realtime, "/dev/video0", "default");
        session.complete(SessionStatus::Cancelled, &SessionSummary::empty("default"), None);
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert!(session.status.is_terminal());
        assert!(session.stopped_at.is_some());
        assert_eq!(session.nervousness_mean, None);
        assert_eq!(session.confidence_mean, None);
        assert_eq!(session.dominant_overall, None);
    }
}
