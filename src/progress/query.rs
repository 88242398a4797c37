use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::StageCatalog;
use super::sequencer::StageSequencer;
use crate::error::{EngineError, Missing, StoreError};
use crate::model::{ActorId, Batch, BatchId, Lease, StageCompletionRecord, StageId};
use crate::store::BatchStore;

/// The actor currently holding a batch, resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holder {
    pub actor: ActorId,
    /// `None` when the holder's profile no longer exists.
    pub name: Option<String>,
    pub since: DateTime<Utc>,
}

impl Holder {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.actor.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStage {
    pub stage: StageId,
    pub label: String,
    pub actor: ActorId,
    pub actor_name: String,
    pub quantity: u32,
    pub completed_at: DateTime<Utc>,
}

/// Who completed what, in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub batch: Batch,
    pub stages: Vec<CompletedStage>,
}

/// Read-only projections over batches and their completion history.
#[derive(Clone)]
pub struct BatchQueryFacade {
    store: Arc<dyn BatchStore>,
    sequencer: StageSequencer,
}

impl BatchQueryFacade {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        let sequencer = StageSequencer::new(Arc::clone(&store));
        Self { store, sequencer }
    }

    pub async fn batch(&self, id: BatchId) -> Result<Batch, EngineError> {
        self.store
            .find_batch(id)
            .await?
            .ok_or(EngineError::NotFound(Missing::Batch(id)))
    }

    pub async fn completions(&self, id: BatchId) -> Result<Vec<StageCompletionRecord>, EngineError> {
        Ok(self.store.find_completions(id).await?)
    }

    pub async fn summary(&self, id: BatchId) -> Result<CompletionSummary, EngineError> {
        let position = self.sequencer.position(id).await?;
        Ok(self.summarize(position.batch, &position.catalog).await?)
    }

    /// Builds the summary for an already-resolved batch and catalog.
    /// Records for stages no longer in the catalog are listed last.
    pub async fn summarize(
        &self,
        batch: Batch,
        catalog: &StageCatalog,
    ) -> Result<CompletionSummary, StoreError> {
        let mut records = self.store.find_completions(batch.id).await?;
        records.sort_by_key(|record| {
            let position = catalog
                .get(record.stage)
                .map(|stage| stage.position)
                .unwrap_or(u32::MAX);
            (position, record.completed_at)
        });

        let mut names: HashMap<ActorId, String> = HashMap::new();
        let mut stages = Vec::with_capacity(records.len());
        for record in records {
            let actor_name = match names.get(&record.actor) {
                Some(name) => name.clone(),
                None => {
                    let name = self.actor_name(record.actor).await?;
                    names.insert(record.actor, name.clone());
                    name
                }
            };
            let label = catalog
                .get(record.stage)
                .map(|stage| stage.label.clone())
                .unwrap_or_else(|| record.stage.to_string());
            stages.push(CompletedStage {
                stage: record.stage,
                label,
                actor: record.actor,
                actor_name,
                quantity: record.quantity,
                completed_at: record.completed_at,
            });
        }

        Ok(CompletionSummary { batch, stages })
    }

    pub async fn holder(&self, lease: &Lease) -> Result<Holder, StoreError> {
        let name = self
            .store
            .find_actor(lease.holder)
            .await?
            .map(|actor| actor.display_name);
        Ok(Holder {
            actor: lease.holder,
            name,
            since: lease.acquired_at,
        })
    }

    async fn actor_name(&self, id: ActorId) -> Result<String, StoreError> {
        Ok(self
            .store
            .find_actor(id)
            .await?
            .map(|actor| actor.display_name)
            .unwrap_or_else(|| id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, CategoryId, StageDefinition};
    use crate::store::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn summary_lists_stages_in_catalog_order_with_names() {
        let store = Arc::new(MemoryStore::new());
        let category = CategoryId::new();
        let assembly = StageDefinition {
            id: StageId::new(),
            label: "assembly".into(),
            position: 1,
            category,
        };
        let packing = StageDefinition {
            id: StageId::new(),
            label: "packing".into(),
            position: 2,
            category,
        };
        store.put_stage(packing.clone());
        store.put_stage(assembly.clone());

        let anna = Actor {
            id: ActorId::new(),
            display_name: "Anna".into(),
            active: true,
        };
        store.put_actor(anna.clone());
        let batch = Batch {
            id: BatchId::new(),
            number: "B-7".into(),
            quantity: 3,
            category,
            comment: None,
        };
        store.put_batch(batch.clone());

        let now = Utc::now();
        store.try_set_holder(batch.id, anna.id, now, None).await.unwrap();
        // Recorded in reverse so ordering comes from the catalog.
        for (stage, at) in [(&packing, now), (&assembly, now - Duration::minutes(10))] {
            store
                .insert_completion(StageCompletionRecord {
                    batch: batch.id,
                    stage: stage.id,
                    actor: anna.id,
                    quantity: 3,
                    completed_at: at,
                })
                .await
                .unwrap();
        }

        let facade = BatchQueryFacade::new(store);
        let summary = facade.summary(batch.id).await.unwrap();
        assert_eq!(summary.batch, batch);
        let rows: Vec<(&str, &str, u32)> = summary
            .stages
            .iter()
            .map(|s| (s.label.as_str(), s.actor_name.as_str(), s.quantity))
            .collect();
        assert_eq!(rows, vec![("assembly", "Anna", 3), ("packing", "Anna", 3)]);
    }

    #[tokio::test]
    async fn holder_without_profile_displays_id() {
        let facade = BatchQueryFacade::new(Arc::new(MemoryStore::new()));
        let lease = Lease::new(ActorId::new(), Utc::now());
        let holder = facade.holder(&lease).await.unwrap();
        assert_eq!(holder.name, None);
        assert_eq!(holder.display_name(), lease.holder.to_string());
    }
}
