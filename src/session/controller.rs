use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, bail, Context, Result};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::aggregation::{AggregationConfig, Aggregator, SessionSummary, SnapshotReader};
use crate::capture::{capture_loop, EmotionClassifier, FrameSource, LoopConfig, LoopExit};
use crate::db::{Database, Session, SessionKind, SessionStatus};

use super::{persist_outcome, SessionOutcome};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

struct ActiveSession {
    session: Session,
    handle: JoinHandle<(Aggregator, LoopExit)>,
    cancel_token: CancellationToken,
    /// Cancelled by the producer task itself once it returns.
    exited: CancellationToken,
    reader: SnapshotReader,
}

/// Owns at most one live session at a time.
///
/// The producer task holds the aggregator; everyone else reads published
/// snapshots through a [`SnapshotReader`]. Stopping cancels the task, takes
/// the aggregator back and finalizes it.
#[derive(Clone)]
pub struct RealtimeController {
    aggregation: AggregationConfig,
    loop_config: LoopConfig,
    db: Option<Database>,
    active: Arc<Mutex<Option<ActiveSession>>>,
}

impl RealtimeController {
    pub fn new(aggregation: AggregationConfig, loop_config: LoopConfig, db: Option<Database>) -> Self {
        Self {
            aggregation,
            loop_config,
            db,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(
        &self,
        source: Box<dyn FrameSource>,
        classifier: Arc<dyn EmotionClassifier>,
    ) -> Result<SnapshotReader> {
        let mut guard = self.active.lock().await;
        if guard.is_some() {
            bail!("real-time session already active");
        }

        let aggregator = Aggregator::new(self.aggregation.clone())?;
        let reader = aggregator.reader();
        let session = Session::begin(
            SessionKind::Realtime,
            source.describe(),
            self.aggregation.nervousness.name.clone(),
        );

        if let Some(db) = &self.db {
            db.insert_session(&session)
                .await
                .context("failed to record new session")?;
        }

        let cancel_token = CancellationToken::new();
        let exited = CancellationToken::new();
        let task = capture_loop(
            session.id.clone(),
            aggregator,
            Arc::new(StdMutex::new(source)),
            classifier,
            self.loop_config,
            cancel_token.clone(),
        );
        let exited_signal = exited.clone();
        let handle = tokio::spawn(async move {
            let result = task.await;
            exited_signal.cancel();
            result
        });

        log_info!("Real-time session {} started on {}", session.id, session.source);

        *guard = Some(ActiveSession {
            session,
            handle,
            cancel_token,
            exited,
            reader: reader.clone(),
        });
        Ok(reader)
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Latest published aggregates of the running session.
    pub async fn snapshot(&self) -> Option<Arc<SessionSummary>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.reader.snapshot())
    }

    /// Resolves when the producer task returns on its own (source exhausted
    /// or failed) or after it was stopped. Immediately if nothing runs.
    pub async fn wait_for_exit(&self) {
        let exited = match self.active.lock().await.as_ref() {
            Some(active) => active.exited.clone(),
            None => return,
        };
        exited.cancelled().await;
    }

    /// Stop the session and finalize it as completed (or interrupted, if
    /// the source had already failed).
    pub async fn stop(&self) -> Result<SessionOutcome> {
        self.finish(SessionStatus::Completed).await
    }

    /// Stop the session and finalize it as cancelled. Accumulated samples
    /// are still finalized and returned.
    pub async fn cancel(&self) -> Result<SessionOutcome> {
        self.finish(SessionStatus::Cancelled).await
    }

    async fn finish(&self, requested: SessionStatus) -> Result<SessionOutcome> {
        let active = self
            .active
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("no active real-time session"))?;

        let ActiveSession {
            mut session,
            handle,
            cancel_token,
            ..
        } = active;

        cancel_token.cancel();
        let (mut aggregator, exit) = handle
            .await
            .context("capture loop task failed to join")?;

        let summary = aggregator.finalize()?;
        let (status, failure) = match exit {
            LoopExit::SourceFailed(reason) => (SessionStatus::Interrupted, Some(reason)),
            LoopExit::Cancelled | LoopExit::SourceExhausted => (requested, None),
        };
        session.complete(status, &summary, failure.clone());

        let outcome = SessionOutcome {
            session,
            summary,
            samples: aggregator.into_samples(),
            failure,
        };

        if let Some(db) = &self.db {
            if let Err(err) = persist_outcome(db, &outcome).await {
                log_error!("Failed to persist session {}: {err:#}", outcome.session.id);
            }
        }

        log_info!(
            "Real-time session {} finished as {} with {} samples",
            outcome.session.id,
            outcome.session.status.as_str(),
            outcome.summary.sample_count
        );
        Ok(outcome)
    }
}
