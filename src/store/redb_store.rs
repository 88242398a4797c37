use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadTransaction, ReadableTable, Table, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    check_insert, swap_holder, ActorDirectory, BatchStore, HolderSwap, InsertOutcome,
    LineItemSource,
};
use crate::error::StoreError;
use crate::fixture::Fixture;
use crate::model::{
    Actor, ActorId, Batch, BatchId, CategoryId, ConversationId, Lease, MessageId,
    StageCompletionRecord, StageDefinition, StageId,
};
use crate::products::LineItem;
use crate::session::{Session, SessionKey, SessionStore, StoredSession, expiry};

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

const BATCHES: JsonTable = TableDefinition::new("batches");
/// Keyed `{category}/{stage}`.
const STAGES: JsonTable = TableDefinition::new("stages");
/// Keyed `{batch}/{stage}`; the key itself is the uniqueness constraint.
const COMPLETIONS: JsonTable = TableDefinition::new("completions");
const LEASES: JsonTable = TableDefinition::new("leases");
const ACTORS: JsonTable = TableDefinition::new("actors");
const CONVERSATIONS: JsonTable = TableDefinition::new("conversations");
const LINE_ITEMS: JsonTable = TableDefinition::new("line_items");
/// Keyed `{conversation}/{actor}`.
const SESSIONS: JsonTable = TableDefinition::new("sessions");
const META: JsonTable = TableDefinition::new("meta");

const NEXT_MESSAGE_ID: &str = "next_message_id";

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn pair_key(parent: impl std::fmt::Display, child: StageId) -> String {
    format!("{parent}/{child}")
}

fn session_key(key: &SessionKey) -> String {
    format!("{}/{}", key.conversation.0, key.actor)
}

fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match table.get(key).map_err(storage)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> Result<Vec<T>, StoreError> {
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(storage)? {
        let (key, value) = entry.map_err(storage)?;
        if !key.value().starts_with(prefix) {
            break;
        }
        results.push(serde_json::from_slice(value.value())?);
    }
    Ok(results)
}

fn put_json<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    table.insert(key, bytes.as_slice()).map_err(storage)?;
    Ok(())
}

/// Durable store on an embedded redb database.
///
/// redb admits a single write transaction at a time, so every conditional
/// update below runs its check and its write inside one transaction and
/// is committed before the call returns.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(storage)?;

        let txn = db.begin_write().map_err(storage)?;
        for table in [
            BATCHES,
            STAGES,
            COMPLETIONS,
            LEASES,
            ACTORS,
            CONVERSATIONS,
            LINE_ITEMS,
            SESSIONS,
            META,
        ] {
            txn.open_table(table).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&ReadTransaction) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(storage)?;
            f(&txn)
        })
        .await?
    }

    /// Runs `f` in a write transaction and commits it. An error from `f`
    /// drops the transaction, which aborts it.
    async fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&WriteTransaction) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(storage)?;
            let value = f(&txn)?;
            txn.commit().map_err(storage)?;
            Ok(value)
        })
        .await?
    }

    /// Load reference data from a fixture in a single transaction.
    /// Existing keys are overwritten; leases and completions are untouched.
    pub async fn seed(&self, fixture: Fixture) -> Result<(), StoreError> {
        self.write(move |txn| {
            let mut actors = txn.open_table(ACTORS).map_err(storage)?;
            let mut conversations = txn.open_table(CONVERSATIONS).map_err(storage)?;
            for (actor, links) in fixture.actors() {
                for conversation in links {
                    put_json(&mut conversations, &conversation.0, &actor.id)?;
                }
                put_json(&mut actors, &actor.id.to_string(), &actor)?;
            }

            let mut stages = txn.open_table(STAGES).map_err(storage)?;
            for stage in fixture.stages() {
                put_json(&mut stages, &pair_key(stage.category, stage.id), &stage)?;
            }

            let mut batches = txn.open_table(BATCHES).map_err(storage)?;
            let mut line_items = txn.open_table(LINE_ITEMS).map_err(storage)?;
            for (batch, items) in fixture.batches() {
                let key = batch.id.to_string();
                put_json(&mut line_items, &key, &items)?;
                put_json(&mut batches, &key, &batch)?;
            }
            Ok(())
        })
        .await
    }

    /// Hands out the next message id. The counter lives in the database so
    /// ids keep increasing across runs.
    pub async fn reserve_message_id(&self) -> Result<MessageId, StoreError> {
        self.write(|txn| {
            let mut meta = txn.open_table(META).map_err(storage)?;
            let next: i64 = get_json(&meta, NEXT_MESSAGE_ID)?.unwrap_or(1);
            put_json(&mut meta, NEXT_MESSAGE_ID, &(next + 1))?;
            Ok(MessageId(next))
        })
        .await
    }
}

#[async_trait]
impl BatchStore for RedbStore {
    async fn find_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        self.read(move |txn| {
            let table = txn.open_table(BATCHES).map_err(storage)?;
            get_json(&table, &id.to_string())
        })
        .await
    }

    async fn find_catalog(
        &self,
        category: CategoryId,
    ) -> Result<Vec<StageDefinition>, StoreError> {
        self.read(move |txn| {
            let table = txn.open_table(STAGES).map_err(storage)?;
            scan_json(&table, &format!("{category}/"))
        })
        .await
    }

    async fn find_completions(
        &self,
        batch: BatchId,
    ) -> Result<Vec<StageCompletionRecord>, StoreError> {
        self.read(move |txn| {
            let table = txn.open_table(COMPLETIONS).map_err(storage)?;
            scan_json(&table, &format!("{batch}/"))
        })
        .await
    }

    async fn insert_completion(
        &self,
        record: StageCompletionRecord,
    ) -> Result<InsertOutcome, StoreError> {
        self.write(move |txn| {
            let key = pair_key(record.batch, record.stage);
            let mut completions = txn.open_table(COMPLETIONS).map_err(storage)?;
            let already_completed = completions.get(key.as_str()).map_err(storage)?.is_some();

            let leases = txn.open_table(LEASES).map_err(storage)?;
            let lease: Option<Lease> = get_json(&leases, &record.batch.to_string())?;

            let outcome = check_insert(already_completed, lease.as_ref(), record.actor);
            if outcome == InsertOutcome::Inserted {
                put_json(&mut completions, &key, &record)?;
            }
            Ok(outcome)
        })
        .await
    }

    async fn find_lease(&self, batch: BatchId) -> Result<Option<Lease>, StoreError> {
        self.read(move |txn| {
            let table = txn.open_table(LEASES).map_err(storage)?;
            get_json(&table, &batch.to_string())
        })
        .await
    }

    async fn try_set_holder(
        &self,
        batch: BatchId,
        actor: ActorId,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<HolderSwap, StoreError> {
        self.write(move |txn| {
            let key = batch.to_string();
            let mut leases = txn.open_table(LEASES).map_err(storage)?;
            let current: Option<Lease> = get_json(&leases, &key)?;

            let swap = swap_holder(current.as_ref(), actor, stale_before);
            if matches!(swap, HolderSwap::Applied { .. }) {
                put_json(&mut leases, &key, &Lease::new(actor, now))?;
            }
            Ok(swap)
        })
        .await
    }

    async fn clear_holder_if_held_by(
        &self,
        batch: BatchId,
        actor: ActorId,
    ) -> Result<bool, StoreError> {
        self.write(move |txn| {
            let key = batch.to_string();
            let mut leases = txn.open_table(LEASES).map_err(storage)?;
            let current: Option<Lease> = get_json(&leases, &key)?;

            match current {
                Some(lease) if lease.is_held_by(actor) => {
                    leases.remove(key.as_str()).map_err(storage)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
        .await
    }

    async fn find_actor(&self, id: ActorId) -> Result<Option<Actor>, StoreError> {
        self.read(move |txn| {
            let table = txn.open_table(ACTORS).map_err(storage)?;
            get_json(&table, &id.to_string())
        })
        .await
    }
}

#[async_trait]
impl ActorDirectory for RedbStore {
    async fn actor_for_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<ActorId>, StoreError> {
        let key = conversation.0.clone();
        self.read(move |txn| {
            let table = txn.open_table(CONVERSATIONS).map_err(storage)?;
            get_json(&table, &key)
        })
        .await
    }
}

#[async_trait]
impl LineItemSource for RedbStore {
    async fn line_items(&self, batch: BatchId) -> Result<Vec<LineItem>, StoreError> {
        self.read(move |txn| {
            let table = txn.open_table(LINE_ITEMS).map_err(storage)?;
            Ok(get_json(&table, &batch.to_string())?.unwrap_or_default())
        })
        .await
    }
}

#[async_trait]
impl SessionStore for RedbStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        let id = session_key(key);
        let stored: Option<StoredSession> = self
            .read({
                let id = id.clone();
                move |txn| {
                    let table = txn.open_table(SESSIONS).map_err(storage)?;
                    get_json(&table, &id)
                }
            })
            .await?;

        let now = Utc::now();
        match stored {
            Some(stored) if stored.is_live(now) => Ok(Some(stored.session)),
            Some(_) => {
                self.write(move |txn| {
                    let mut table = txn.open_table(SESSIONS).map_err(storage)?;
                    let current: Option<StoredSession> = get_json(&table, &id)?;
                    if current.is_some_and(|stored| !stored.is_live(now)) {
                        table.remove(id.as_str()).map_err(storage)?;
                    }
                    Ok(())
                })
                .await?;
                debug!(conversation = %key.conversation, "session expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: SessionKey,
        session: Session,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let stored = StoredSession {
            expires_at: expiry(Utc::now(), ttl),
            key,
            session,
        };
        self.write(move |txn| {
            let mut table = txn.open_table(SESSIONS).map_err(storage)?;
            put_json(&mut table, &session_key(&stored.key), &stored)
        })
        .await
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError> {
        let id = session_key(key);
        self.write(move |txn| {
            let mut table = txn.open_table(SESSIONS).map_err(storage)?;
            table.remove(id.as_str()).map_err(storage)?;
            Ok(())
        })
        .await
    }

    async fn purge_conversation(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        let conversation = conversation.clone();
        let purged = self
            .write({
                let conversation = conversation.clone();
                move |txn| {
                    let mut table = txn.open_table(SESSIONS).map_err(storage)?;
                    // The prefix may also match longer conversation names.
                    let stale: Vec<String> =
                        scan_json::<StoredSession>(&table, &format!("{}/", conversation.0))?
                            .into_iter()
                            .filter(|stored| stored.key.conversation == conversation)
                            .map(|stored| session_key(&stored.key))
                            .collect();
                    for id in &stale {
                        table.remove(id.as_str()).map_err(storage)?;
                    }
                    Ok(stale.len())
                }
            })
            .await?;
        debug!(%conversation, purged, "sessions purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FIXTURE: &str = r#"
        [[actors]]
        id = "6f1c1b43-8a62-4a57-9d50-3f2f5a3e0a01"
        name = "Anna"
        conversations = ["tty-anna"]

        [[categories]]
        id = "0d8c5a4e-5b7e-4f6a-8a11-5a1f3c2b9e10"
        stages = [
            { id = "a0000000-0000-4000-8000-000000000001", label = "assembly" },
            { id = "a0000000-0000-4000-8000-000000000002", label = "pressing" },
        ]

        [[batches]]
        id = "0194fafe-3911-7cdf-b1ae-245469b6b1c8"
        number = "173.937.775.229"
        quantity = 5
        category = "0d8c5a4e-5b7e-4f6a-8a11-5a1f3c2b9e10"
        items = [{ article = "FSWHITE-0064-02-L", total = 5 }]
    "#;

    async fn seeded() -> (TempDir, RedbStore, Fixture) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("test.redb")).unwrap();
        let fixture = Fixture::parse(FIXTURE).unwrap();
        store.seed(fixture.clone()).await.unwrap();
        (dir, store, fixture)
    }

    #[tokio::test]
    async fn seeded_records_are_readable() {
        let (_dir, store, fixture) = seeded().await;
        let (batch, _) = fixture.batches().remove(0);

        assert_eq!(store.find_batch(batch.id).await.unwrap(), Some(batch.clone()));
        assert_eq!(store.find_catalog(batch.category).await.unwrap().len(), 2);
        assert_eq!(store.line_items(batch.id).await.unwrap().len(), 1);

        let anna = store
            .actor_for_conversation(&ConversationId::new("tty-anna"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.find_actor(anna).await.unwrap().unwrap().display_name, "Anna");
    }

    #[tokio::test]
    async fn holder_swap_and_guarded_insert_survive_reopen() {
        let (dir, store, fixture) = seeded().await;
        let (batch, _) = fixture.batches().remove(0);
        let stage = fixture.stages()[0].id;
        let (anna, boris) = (ActorId::new(), ActorId::new());

        let now = Utc::now();
        assert_eq!(
            store.try_set_holder(batch.id, anna, now, None).await.unwrap(),
            HolderSwap::Applied { previous: None }
        );
        assert!(matches!(
            store.try_set_holder(batch.id, boris, now, None).await.unwrap(),
            HolderSwap::Rejected(lease) if lease.holder == anna
        ));

        let record = StageCompletionRecord {
            batch: batch.id,
            stage,
            actor: anna,
            quantity: batch.quantity,
            completed_at: now,
        };
        assert_eq!(
            store.insert_completion(record.clone()).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_completion(record).await.unwrap(),
            InsertOutcome::Duplicate
        );
        drop(store);

        let reopened = RedbStore::open(&dir.path().join("test.redb")).unwrap();
        assert_eq!(reopened.find_completions(batch.id).await.unwrap().len(), 1);
        assert_eq!(
            reopened.find_lease(batch.id).await.unwrap().map(|l| l.holder),
            Some(anna)
        );
        assert!(reopened.clear_holder_if_held_by(batch.id, anna).await.unwrap());
        assert!(reopened.find_lease(batch.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_and_message_ids_survive_reopen() {
        let (dir, store, _) = seeded().await;
        let anna = SessionKey::new(ActorId::new(), ConversationId::new("tty-anna"));
        let longer = SessionKey::new(ActorId::new(), ConversationId::new("tty-anna/2"));
        let session = Session {
            awaiting_identifier: true,
            last_message: Some(store.reserve_message_id().await.unwrap()),
            target_batch: None,
        };
        store.set(anna.clone(), session.clone(), Duration::hours(1)).await.unwrap();
        store.set(longer.clone(), Session::default(), Duration::hours(1)).await.unwrap();
        drop(store);

        let reopened = RedbStore::open(&dir.path().join("test.redb")).unwrap();
        assert_eq!(reopened.get(&anna).await.unwrap(), Some(session));
        assert_eq!(reopened.reserve_message_id().await.unwrap(), MessageId(2));

        reopened.purge_conversation(&anna.conversation).await.unwrap();
        assert_eq!(reopened.get(&anna).await.unwrap(), None);
        assert!(reopened.get(&longer).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_session_is_dropped() {
        let (_dir, store, _) = seeded().await;
        let key = SessionKey::new(ActorId::new(), ConversationId::new("tty-anna"));
        store.set(key.clone(), Session::default(), Duration::zero()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);

        store.set(key.clone(), Session::default(), Duration::hours(1)).await.unwrap();
        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
