use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::{ActorId, BatchId, Lease};
use crate::store::{BatchStore, HolderSwap};

/// When, if ever, an abandoned fixation may be taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeasePolicy {
    /// `None` keeps a lease until its holder releases it or the batch
    /// completes.
    pub reclaim_after: Option<Duration>,
}

impl LeasePolicy {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn reclaim_after(window: Duration) -> Self {
        Self {
            reclaim_after: Some(window),
        }
    }

    /// Leases acquired before the returned instant are stale. A window
    /// reaching past the earliest representable time never goes stale.
    pub fn stale_before(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.reclaim_after.and_then(|window| now.checked_sub_signed(window))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    /// The actor already held the batch; the lease timestamp was refreshed.
    Renewed,
    /// A stale lease of another actor was taken over.
    Reclaimed { previous: ActorId },
    AlreadyHeld(Lease),
}

impl Acquisition {
    pub fn is_held(&self) -> bool {
        !matches!(self, Acquisition::AlreadyHeld(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The actor did not hold the batch; carries the current lease, if any.
    NotHolder(Option<Lease>),
}

/// Grants and releases exclusive fixation of a batch.
///
/// Both mutations are single conditional updates in the store; this type
/// adds policy, classification and logging on top.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn BatchStore>,
    policy: LeasePolicy,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn BatchStore>, policy: LeasePolicy) -> Self {
        Self { store, policy }
    }

    pub async fn acquire(
        &self,
        batch: BatchId,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Acquisition, StoreError> {
        let swap = self
            .store
            .try_set_holder(batch, actor, now, self.policy.stale_before(now))
            .await?;

        let acquisition = match swap {
            HolderSwap::Applied { previous: None } => {
                info!(%batch, %actor, "batch fixed");
                Acquisition::Acquired
            }
            HolderSwap::Applied {
                previous: Some(lease),
            } if lease.is_held_by(actor) => {
                debug!(%batch, %actor, "fixation renewed");
                Acquisition::Renewed
            }
            HolderSwap::Applied {
                previous: Some(lease),
            } => {
                warn!(
                    %batch,
                    %actor,
                    previous = %lease.holder,
                    held_since = %lease.acquired_at,
                    "stale fixation reclaimed"
                );
                Acquisition::Reclaimed {
                    previous: lease.holder,
                }
            }
            HolderSwap::Rejected(lease) => {
                debug!(%batch, %actor, holder = %lease.holder, "batch already fixed");
                Acquisition::AlreadyHeld(lease)
            }
        };
        Ok(acquisition)
    }

    pub async fn release(&self, batch: BatchId, actor: ActorId) -> Result<Release, StoreError> {
        if self.store.clear_holder_if_held_by(batch, actor).await? {
            info!(%batch, %actor, "fixation released");
            return Ok(Release::Released);
        }
        let current = self.store.find_lease(batch).await?;
        Ok(Release::NotHolder(current))
    }

    /// Current lease, if any. Stale leases are still reported; callers
    /// decide with [`LeaseManager::is_live`].
    pub async fn holder_of(&self, batch: BatchId) -> Result<Option<Lease>, StoreError> {
        self.store.find_lease(batch).await
    }

    pub fn is_live(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        !lease.is_stale(self.policy.stale_before(now))
    }

    /// Clears whatever lease the batch carries. Used once a batch is
    /// terminal; still a compare-and-clear, so a racing acquire is never
    /// wiped blindly.
    pub async fn release_any(&self, batch: BatchId) -> Result<Option<ActorId>, StoreError> {
        let Some(lease) = self.store.find_lease(batch).await? else {
            return Ok(None);
        };
        if self.store.clear_holder_if_held_by(batch, lease.holder).await? {
            info!(%batch, holder = %lease.holder, "fixation cleared on completed batch");
            return Ok(Some(lease.holder));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(policy: LeasePolicy) -> LeaseManager {
        LeaseManager::new(Arc::new(MemoryStore::new()), policy)
    }

    #[tokio::test]
    async fn second_actor_sees_holder() {
        let leases = manager(LeasePolicy::never());
        let batch = BatchId::new();
        let (anna, boris) = (ActorId::new(), ActorId::new());
        let now = Utc::now();

        assert_eq!(leases.acquire(batch, anna, now).await.unwrap(), Acquisition::Acquired);
        assert_eq!(leases.acquire(batch, anna, now).await.unwrap(), Acquisition::Renewed);
        match leases.acquire(batch, boris, now).await.unwrap() {
            Acquisition::AlreadyHeld(lease) => assert_eq!(lease.holder, anna),
            other => panic!("expected AlreadyHeld, got {other:?}"),
        }
        assert_eq!(leases.holder_of(batch).await.unwrap().unwrap().holder, anna);
    }

    #[tokio::test]
    async fn release_by_non_holder_is_a_no_op() {
        let leases = manager(LeasePolicy::never());
        let batch = BatchId::new();
        let (anna, boris) = (ActorId::new(), ActorId::new());

        assert_eq!(
            leases.release(batch, anna).await.unwrap(),
            Release::NotHolder(None)
        );
        leases.acquire(batch, anna, Utc::now()).await.unwrap();
        assert!(matches!(
            leases.release(batch, boris).await.unwrap(),
            Release::NotHolder(Some(lease)) if lease.holder == anna
        ));
        assert_eq!(leases.release(batch, anna).await.unwrap(), Release::Released);
        assert!(leases.holder_of(batch).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn never_policy_keeps_old_leases() {
        let leases = manager(LeasePolicy::never());
        let batch = BatchId::new();
        let long_ago = Utc::now() - Duration::days(30);
        leases.acquire(batch, ActorId::new(), long_ago).await.unwrap();

        let outcome = leases.acquire(batch, ActorId::new(), Utc::now()).await.unwrap();
        assert!(!outcome.is_held());
    }

    #[tokio::test]
    async fn stale_lease_is_reclaimed_under_policy() {
        let leases = manager(LeasePolicy::reclaim_after(Duration::hours(8)));
        let batch = BatchId::new();
        let (anna, boris) = (ActorId::new(), ActorId::new());
        let now = Utc::now();

        leases.acquire(batch, anna, now - Duration::hours(9)).await.unwrap();
        assert_eq!(
            leases.acquire(batch, boris, now).await.unwrap(),
            Acquisition::Reclaimed { previous: anna }
        );
        let lease = leases.holder_of(batch).await.unwrap().unwrap();
        assert_eq!(lease.holder, boris);
        assert!(leases.is_live(&lease, now));
    }

    #[tokio::test]
    async fn oversized_window_never_goes_stale() {
        let policy = LeasePolicy::reclaim_after(Duration::days(100_000_000));
        assert_eq!(policy.stale_before(Utc::now()), None);

        let leases = manager(policy);
        let batch = BatchId::new();
        let anna = ActorId::new();
        leases.acquire(batch, anna, Utc::now()).await.unwrap();
        assert!(matches!(
            leases.acquire(batch, ActorId::new(), Utc::now()).await.unwrap(),
            Acquisition::AlreadyHeld(lease) if lease.holder == anna
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_has_exactly_one_winner() {
        let leases = manager(LeasePolicy::never());
        let batch = BatchId::new();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let leases = leases.clone();
            handles.push(tokio::spawn(async move {
                leases.acquire(batch, ActorId::new(), Utc::now()).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() == Acquisition::Acquired {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn release_any_clears_lingering_lease() {
        let leases = manager(LeasePolicy::never());
        let batch = BatchId::new();
        let anna = ActorId::new();

        assert_eq!(leases.release_any(batch).await.unwrap(), None);
        leases.acquire(batch, anna, Utc::now()).await.unwrap();
        assert_eq!(leases.release_any(batch).await.unwrap(), Some(anna));
        assert!(leases.holder_of(batch).await.unwrap().is_none());
    }
}
