//! Persistence contract for batches, catalogs, completions and fixation.
//!
//! The engine never reads-then-writes shared state itself. The two
//! mutating primitives, [`BatchStore::try_set_holder`] and
//! [`BatchStore::insert_completion`], are each a single atomic step in
//! every implementation, so correctness holds across processes.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    Actor, ActorId, Batch, BatchId, CategoryId, ConversationId, Lease, StageCompletionRecord,
    StageDefinition,
};
use crate::products::LineItem;

/// Result of the conditional holder update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HolderSwap {
    /// The new lease is in place; `previous` is what it replaced (none,
    /// the same actor's older lease, or a stale lease of someone else).
    Applied { previous: Option<Lease> },
    /// Someone else holds a live lease; nothing changed.
    Rejected(Lease),
}

/// Result of the guarded completion insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record for this (batch, stage) already exists.
    Duplicate,
    /// The writer no longer holds the batch; carries the current lease.
    LeaseLost(Option<Lease>),
}

#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn find_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError>;

    /// Stage definitions of a category in storage order. Empty when the
    /// category has no configured stages.
    async fn find_catalog(&self, category: CategoryId)
    -> Result<Vec<StageDefinition>, StoreError>;

    async fn find_completions(
        &self,
        batch: BatchId,
    ) -> Result<Vec<StageCompletionRecord>, StoreError>;

    /// Insert `record` iff no record exists for its (batch, stage) and the
    /// batch is currently held by `record.actor`.
    async fn insert_completion(
        &self,
        record: StageCompletionRecord,
    ) -> Result<InsertOutcome, StoreError>;

    async fn find_lease(&self, batch: BatchId) -> Result<Option<Lease>, StoreError>;

    /// Atomically set the holder to `actor` when the batch is unheld, held
    /// by `actor` already, or held by a lease acquired before
    /// `stale_before`.
    async fn try_set_holder(
        &self,
        batch: BatchId,
        actor: ActorId,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<HolderSwap, StoreError>;

    /// Atomically clear the holder iff it is `actor`. Returns whether a
    /// lease was cleared.
    async fn clear_holder_if_held_by(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<bool, StoreError>;

    async fn find_actor(&self, id: ActorId) -> Result<Option<Actor>, StoreError>;
}

/// Maps a transport conversation to the worker behind it.
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn actor_for_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<ActorId>, StoreError>;
}

/// Product lines of a batch, for display only.
#[async_trait]
pub trait LineItemSource: Send + Sync {
    async fn line_items(&self, batch: BatchId) -> Result<Vec<LineItem>, StoreError>;
}

/// Shared decision for [`BatchStore::try_set_holder`] so every backend
/// applies the same predicate inside its own critical section.
pub(crate) fn swap_holder(
    current: Option<&Lease>,
    actor: ActorId,
    stale_before: Option<DateTime<Utc>>,
) -> HolderSwap {
    match current {
        Some(lease) if !lease.is_held_by(actor) && !lease.is_stale(stale_before) => {
            HolderSwap::Rejected(lease.clone())
        }
        previous => HolderSwap::Applied {
            previous: previous.cloned(),
        },
    }
}

/// Shared guard for [`BatchStore::insert_completion`].
pub(crate) fn check_insert(
    already_completed: bool,
    lease: Option<&Lease>,
    actor: ActorId,
) -> InsertOutcome {
    if already_completed {
        return InsertOutcome::Duplicate;
    }
    match lease {
        Some(lease) if lease.is_held_by(actor) => InsertOutcome::Inserted,
        other => InsertOutcome::LeaseLost(other.cloned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn swap_applies_to_empty_and_own_leases() {
        let now = Utc::now();
        let actor = ActorId::new();
        assert_eq!(
            swap_holder(None, actor, None),
            HolderSwap::Applied { previous: None }
        );

        let own = Lease::new(actor, now - Duration::minutes(5));
        assert_eq!(
            swap_holder(Some(&own), actor, None),
            HolderSwap::Applied {
                previous: Some(own.clone())
            }
        );
    }

    #[test]
    fn swap_rejects_live_foreign_lease_and_takes_stale_one() {
        let now = Utc::now();
        let other = Lease::new(ActorId::new(), now - Duration::hours(2));
        let actor = ActorId::new();

        assert_eq!(
            swap_holder(Some(&other), actor, None),
            HolderSwap::Rejected(other.clone())
        );
        assert_eq!(
            swap_holder(Some(&other), actor, Some(now - Duration::hours(1))),
            HolderSwap::Applied {
                previous: Some(other.clone())
            }
        );
    }

    #[test]
    fn insert_guard_checks_uniqueness_before_lease() {
        let actor = ActorId::new();
        let lease = Lease::new(actor, Utc::now());
        assert_eq!(check_insert(true, Some(&lease), actor), InsertOutcome::Duplicate);
        assert_eq!(check_insert(false, Some(&lease), actor), InsertOutcome::Inserted);
        assert_eq!(check_insert(false, None, actor), InsertOutcome::LeaseLost(None));

        let foreign = Lease::new(ActorId::new(), Utc::now());
        assert_eq!(
            check_insert(false, Some(&foreign), actor),
            InsertOutcome::LeaseLost(Some(foreign.clone()))
        );
    }
}
