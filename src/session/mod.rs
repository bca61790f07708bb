pub mod batch;
pub mod controller;

use anyhow::Result;

use crate::aggregation::SessionSummary;
use crate::db::{Database, Session};
use crate::models::FrameSample;

pub use batch::BatchAnalyzer;
pub use controller::RealtimeController;

/// Everything a finished session leaves behind.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: Session,
    pub summary: SessionSummary,
    pub samples: Vec<FrameSample>,
    /// Upstream failure that ended the session early.
    pub failure: Option<String>,
}

impl SessionOutcome {
    pub fn is_interrupted(&self) -> bool {
        self.failure.is_some()
    }
}

/// Record the closing state of `outcome` and its samples.
pub async fn persist_outcome(db: &Database, outcome: &SessionOutcome) -> Result<()> {
    db.finish_session(&outcome.session).await?;
    db.insert_frame_samples(&outcome.session.id, &outcome.samples)
        .await?;
    Ok(())
}
