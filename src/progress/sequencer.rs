use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use super::catalog::{StageCatalog, StageCatalogResolver};
use crate::error::{EngineError, Missing};
use crate::model::{Batch, BatchId, StageDefinition, StageId};
use crate::store::BatchStore;

/// How a stage relates to the batch's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageMark {
    Done,
    Current,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageProgress {
    pub stage: StageDefinition,
    pub mark: StageMark,
}

/// A batch's position in its catalog, recomputed from persisted records.
#[derive(Debug, Clone)]
pub struct Position {
    pub batch: Batch,
    pub catalog: StageCatalog,
    pub completed: HashSet<StageId>,
}

impl Position {
    pub fn next_stage(&self) -> Option<&StageDefinition> {
        self.catalog.first_pending(&self.completed)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_stage().is_none()
    }

    /// Every catalog stage with its mark, in sequence order.
    pub fn marks(&self) -> Vec<StageProgress> {
        let current = self.next_stage().map(|stage| stage.id);
        self.catalog
            .stages()
            .iter()
            .map(|stage| StageProgress {
                stage: stage.clone(),
                mark: if self.completed.contains(&stage.id) {
                    StageMark::Done
                } else if Some(stage.id) == current {
                    StageMark::Current
                } else {
                    StageMark::Pending
                },
            })
            .collect()
    }
}

/// Determines the next stage a batch must complete.
///
/// There is no cached "current stage": every answer is derived from the
/// completion records in the store, so a writer that has committed sees
/// its own completion on the next call, from any process.
#[derive(Clone)]
pub struct StageSequencer {
    store: Arc<dyn BatchStore>,
    catalogs: StageCatalogResolver,
}

impl StageSequencer {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        let catalogs = StageCatalogResolver::new(Arc::clone(&store));
        Self { store, catalogs }
    }

    pub async fn position(&self, batch: BatchId) -> Result<Position, EngineError> {
        let batch = self
            .store
            .find_batch(batch)
            .await?
            .ok_or(EngineError::NotFound(Missing::Batch(batch)))?;
        self.position_of(batch).await
    }

    pub async fn position_of(&self, batch: Batch) -> Result<Position, EngineError> {
        let catalog = self.catalogs.stages_for(batch.category).await?;
        let completed = self
            .store
            .find_completions(batch.id)
            .await?
            .into_iter()
            .map(|record| record.stage)
            .collect();
        Ok(Position {
            batch,
            catalog,
            completed,
        })
    }

    pub async fn next_stage(&self, batch: BatchId) -> Result<Option<StageDefinition>, EngineError> {
        Ok(self.position(batch).await?.next_stage().cloned())
    }
}
