use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::lease::{Acquisition, LeaseManager, LeasePolicy, Release};
use super::query::{BatchQueryFacade, CompletionSummary, Holder};
use super::sequencer::{Position, StageProgress, StageSequencer};
use crate::error::{EngineError, StoreError};
use crate::model::{Actor, ActorId, Batch, BatchId, Lease, StageCompletionRecord, StageDefinition};
use crate::store::{BatchStore, InsertOutcome};

/// The three states a batch moves through.
///
/// UNASSIGNED → FIXED (repeats while stages remain) → COMPLETED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchState {
    Unassigned,
    Fixed(ActorId),
    Completed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Unassigned => write!(f, "UNASSIGNED"),
            BatchState::Fixed(actor) => write!(f, "FIXED({actor})"),
            BatchState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Where a non-terminal batch stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub batch: Batch,
    pub stages: Vec<StageProgress>,
    pub current: StageDefinition,
    pub holder: Option<ActorId>,
}

impl ProgressSnapshot {
    fn new(position: &Position, current: StageDefinition, holder: Option<ActorId>) -> Self {
        Self {
            batch: position.batch.clone(),
            stages: position.marks(),
            current,
            holder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Active(ProgressSnapshot),
    /// Another actor holds a live fixation. Nothing was changed.
    HeldByOther { batch: Batch, holder: Holder },
    Completed(CompletionSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// More stages remain; the actor still holds the batch.
    Advanced {
        record: StageCompletionRecord,
        snapshot: ProgressSnapshot,
    },
    /// That was the last stage; the fixation was released.
    Finished {
        record: StageCompletionRecord,
        summary: CompletionSummary,
    },
}

impl Completion {
    pub fn record(&self) -> &StageCompletionRecord {
        match self {
            Completion::Advanced { record, .. } | Completion::Finished { record, .. } => record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cancellation {
    Released { batch: Batch },
    /// Nothing to cancel; any lingering fixation was cleared.
    AlreadyCompleted(CompletionSummary),
}

/// Drives batches through their stage catalog under exclusive fixation.
///
/// Holds no state of its own. Every operation re-reads the batch position
/// from the store and mutates only through the store's conditional
/// primitives, so any number of engines may share one store.
#[derive(Clone)]
pub struct StageCompletionEngine {
    store: Arc<dyn BatchStore>,
    leases: LeaseManager,
    sequencer: StageSequencer,
    query: BatchQueryFacade,
    auto_fix_on_view: bool,
}

impl StageCompletionEngine {
    pub fn new(store: Arc<dyn BatchStore>, policy: LeasePolicy) -> Self {
        Self {
            leases: LeaseManager::new(Arc::clone(&store), policy),
            sequencer: StageSequencer::new(Arc::clone(&store)),
            query: BatchQueryFacade::new(Arc::clone(&store)),
            store,
            auto_fix_on_view: true,
        }
    }

    /// Whether viewing a batch fixes it to the viewer.
    pub fn with_auto_fix_on_view(mut self, enabled: bool) -> Self {
        self.auto_fix_on_view = enabled;
        self
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn query(&self) -> &BatchQueryFacade {
        &self.query
    }

    #[instrument(skip_all, fields(batch = %batch, actor = %actor))]
    pub async fn request_status(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<StatusReport, EngineError> {
        observe(self.status_inner(batch, actor).await)
    }

    #[instrument(skip_all, fields(batch = %batch, actor = %actor))]
    pub async fn complete_current_stage(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<Completion, EngineError> {
        observe(self.complete_inner(batch, actor).await)
    }

    #[instrument(skip_all, fields(batch = %batch, actor = %actor))]
    pub async fn cancel_fixation(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<Cancellation, EngineError> {
        observe(self.cancel_inner(batch, actor).await)
    }

    /// Current state without side effects.
    pub async fn state(&self, batch: BatchId) -> Result<BatchState, EngineError> {
        let position = self.sequencer.position(batch).await?;
        if position.is_terminal() {
            return Ok(BatchState::Completed);
        }
        let state = match self.leases.holder_of(batch).await? {
            Some(lease) if self.leases.is_live(&lease, Utc::now()) => {
                BatchState::Fixed(lease.holder)
            }
            _ => BatchState::Unassigned,
        };
        Ok(state)
    }

    async fn status_inner(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<StatusReport, EngineError> {
        self.resolve_actor(actor).await?;
        let position = self.sequencer.position(batch).await?;
        let Some(current) = position.next_stage().cloned() else {
            return Ok(StatusReport::Completed(self.close(position).await?));
        };

        let now = Utc::now();
        let lease = self.leases.holder_of(batch).await?;
        if let Some(lease) = &lease {
            if !lease.is_held_by(actor) && self.leases.is_live(lease, now) {
                let holder = self.query.holder(lease).await?;
                return Ok(StatusReport::HeldByOther {
                    batch: position.batch,
                    holder,
                });
            }
        }

        if !self.auto_fix_on_view {
            let holder = lease
                .filter(|lease| self.leases.is_live(lease, now))
                .map(|lease| lease.holder);
            return Ok(StatusReport::Active(ProgressSnapshot::new(
                &position, current, holder,
            )));
        }

        if let Acquisition::AlreadyHeld(lease) = self.leases.acquire(batch, actor, now).await? {
            let holder = self.query.holder(&lease).await?;
            return Ok(StatusReport::HeldByOther {
                batch: position.batch,
                holder,
            });
        }

        // The last stage may have been completed between the read above and
        // the acquire; a finished batch must not stay fixed.
        let position = self.sequencer.position_of(position.batch).await?;
        match position.next_stage().cloned() {
            Some(current) => Ok(StatusReport::Active(ProgressSnapshot::new(
                &position,
                current,
                Some(actor),
            ))),
            None => {
                debug!("batch finished while it was being fixed");
                Ok(StatusReport::Completed(self.close(position).await?))
            }
        }
    }

    async fn complete_inner(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<Completion, EngineError> {
        self.resolve_actor(actor).await?;
        let position = self.sequencer.position(batch).await?;
        let Some(stage) = position.next_stage().cloned() else {
            let summary = self.close(position).await?;
            return Err(EngineError::NoRemainingStage(Box::new(summary)));
        };

        let now = Utc::now();
        if let Acquisition::AlreadyHeld(lease) = self.leases.acquire(batch, actor, now).await? {
            return Err(self.conflict(&lease).await?);
        }

        let record = StageCompletionRecord {
            batch,
            stage: stage.id,
            actor,
            quantity: position.batch.quantity,
            completed_at: now,
        };
        match self.store.insert_completion(record.clone()).await? {
            InsertOutcome::Inserted => {
                info!(stage = %stage.label, quantity = record.quantity, "stage completed");
            }
            InsertOutcome::Duplicate => {
                warn!(stage = %stage.label, "stage already completed by a concurrent request");
                // The racing writer may have finished the batch after we
                // re-acquired it; do not leave our fixation behind.
                let position = self.sequencer.position_of(position.batch).await?;
                if position.is_terminal() {
                    self.leases.release(batch, actor).await?;
                }
                return Err(EngineError::StageAlreadyCompleted(stage.id));
            }
            InsertOutcome::LeaseLost(Some(lease)) => {
                return Err(self.conflict(&lease).await?);
            }
            InsertOutcome::LeaseLost(None) => {
                warn!("fixation vanished before the completion was recorded");
                return Err(EngineError::NotHolder { batch, actor });
            }
        }

        let position = self.sequencer.position_of(position.batch).await?;
        match position.next_stage().cloned() {
            Some(current) => Ok(Completion::Advanced {
                record,
                snapshot: ProgressSnapshot::new(&position, current, Some(actor)),
            }),
            None => {
                self.leases.release(batch, actor).await?;
                info!("batch finished");
                let summary = self.query.summarize(position.batch, &position.catalog).await?;
                Ok(Completion::Finished { record, summary })
            }
        }
    }

    async fn cancel_inner(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<Cancellation, EngineError> {
        self.resolve_actor(actor).await?;
        let position = self.sequencer.position(batch).await?;
        if position.is_terminal() {
            return Ok(Cancellation::AlreadyCompleted(self.close(position).await?));
        }

        match self.leases.release(batch, actor).await? {
            Release::Released => Ok(Cancellation::Released {
                batch: position.batch,
            }),
            Release::NotHolder(Some(lease)) => Err(self.conflict(&lease).await?),
            Release::NotHolder(None) => Err(EngineError::NotHolder { batch, actor }),
        }
    }

    async fn resolve_actor(&self, id: ActorId) -> Result<Actor, EngineError> {
        match self.store.find_actor(id).await? {
            Some(actor) if actor.active => Ok(actor),
            Some(_) => {
                warn!(actor = %id, "inactive actor rejected");
                Err(EngineError::Unauthorized(id))
            }
            None => {
                warn!(actor = %id, "unknown actor rejected");
                Err(EngineError::Unauthorized(id))
            }
        }
    }

    /// Terminal batch: clear a lingering lease and build the summary.
    async fn close(&self, position: Position) -> Result<CompletionSummary, StoreError> {
        self.leases.release_any(position.batch.id).await?;
        self.query.summarize(position.batch, &position.catalog).await
    }

    async fn conflict(&self, lease: &Lease) -> Result<EngineError, StoreError> {
        warn!(holder = %lease.holder, "batch fixed by another actor");
        Ok(EngineError::Conflict(self.query.holder(lease).await?))
    }
}

fn observe<T>(result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(err) = &result {
        if err.is_fatal() {
            error!(error = %err, "engine operation failed");
        }
    }
    result
}
