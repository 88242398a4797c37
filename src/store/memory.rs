use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    check_insert, swap_holder, ActorDirectory, BatchStore, HolderSwap, InsertOutcome,
    LineItemSource,
};
use crate::error::StoreError;
use crate::model::{
    Actor, ActorId, Batch, BatchId, CategoryId, ConversationId, Lease, StageCompletionRecord,
    StageDefinition,
};
use crate::products::LineItem;

#[derive(Default)]
struct Tables {
    batches: HashMap<BatchId, Batch>,
    catalogs: HashMap<CategoryId, Vec<StageDefinition>>,
    completions: HashMap<BatchId, Vec<StageCompletionRecord>>,
    leases: HashMap<BatchId, Lease>,
    actors: HashMap<ActorId, Actor>,
    conversations: HashMap<ConversationId, ActorId>,
    line_items: HashMap<BatchId, Vec<LineItem>>,
}

/// Process-local store. Each operation runs inside one critical section,
/// which gives the same atomicity a database statement would.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_batch(&self, batch: Batch) {
        self.tables.lock().batches.insert(batch.id, batch);
    }

    pub fn put_stage(&self, stage: StageDefinition) {
        self.tables
            .lock()
            .catalogs
            .entry(stage.category)
            .or_default()
            .push(stage);
    }

    pub fn put_actor(&self, actor: Actor) {
        self.tables.lock().actors.insert(actor.id, actor);
    }

    pub fn link_conversation(&self, conversation: ConversationId, actor: ActorId) {
        self.tables.lock().conversations.insert(conversation, actor);
    }

    pub fn put_line_items(&self, batch: BatchId, items: Vec<LineItem>) {
        self.tables.lock().line_items.insert(batch, items);
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn find_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        Ok(self.tables.lock().batches.get(&id).cloned())
    }

    async fn find_catalog(
        &self,
        category: CategoryId,
    ) -> Result<Vec<StageDefinition>, StoreError> {
        Ok(self
            .tables
            .lock()
            .catalogs
            .get(&category)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_completions(
        &self,
        batch: BatchId,
    ) -> Result<Vec<StageCompletionRecord>, StoreError> {
        Ok(self
            .tables
            .lock()
            .completions
            .get(&batch)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_completion(
        &self,
        record: StageCompletionRecord,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.tables.lock();
        let already_completed = tables
            .completions
            .get(&record.batch)
            .is_some_and(|records| records.iter().any(|r| r.stage == record.stage));
        let outcome = check_insert(
            already_completed,
            tables.leases.get(&record.batch),
            record.actor,
        );
        if outcome == InsertOutcome::Inserted {
            tables
                .completions
                .entry(record.batch)
                .or_default()
                .push(record);
        }
        Ok(outcome)
    }

    async fn find_lease(&self, batch: BatchId) -> Result<Option<Lease>, StoreError> {
        Ok(self.tables.lock().leases.get(&batch).cloned())
    }

    async fn try_set_holder(
        &self,
        batch: BatchId,
        actor: ActorId,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<HolderSwap, StoreError> {
        let mut tables = self.tables.lock();
        let swap = swap_holder(tables.leases.get(&batch), actor, stale_before);
        if matches!(swap, HolderSwap::Applied { .. }) {
            tables.leases.insert(batch, Lease::new(actor, now));
        }
        Ok(swap)
    }

    async fn clear_holder_if_held_by(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        match tables.leases.get(&batch) {
            Some(lease) if lease.is_held_by(actor) => {
                tables.leases.remove(&batch);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_actor(&self, id: ActorId) -> Result<Option<Actor>, StoreError> {
        Ok(self.tables.lock().actors.get(&id).cloned())
    }
}

#[async_trait]
impl ActorDirectory for MemoryStore {
    async fn actor_for_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<ActorId>, StoreError> {
        Ok(self.tables.lock().conversations.get(conversation).copied())
    }
}

#[async_trait]
impl LineItemSource for MemoryStore {
    async fn line_items(&self, batch: BatchId) -> Result<Vec<LineItem>, StoreError> {
        Ok(self
            .tables
            .lock()
            .line_items
            .get(&batch)
            .cloned()
            .unwrap_or_default())
    }
}
