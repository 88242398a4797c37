//! Per-conversation ephemeral state of the front desk.
//!
//! Sessions carry only presentation bookkeeping: whether the desk is
//! waiting for a batch identifier, which batch was shown last and which
//! message to retract next. Nothing here affects batch progress, so losing
//! a session is harmless.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::model::{ActorId, BatchId, ConversationId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub actor: ActorId,
    pub conversation: ConversationId,
}

impl SessionKey {
    pub fn new(actor: ActorId, conversation: ConversationId) -> Self {
        Self {
            actor,
            conversation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub awaiting_identifier: bool,
    /// Message to retract before the next payload is delivered.
    pub last_message: Option<MessageId>,
    /// Batch the last payload was about; free text refreshes it.
    pub target_batch: Option<BatchId>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError>;

    /// Stores `session`; it is gone once `ttl` has elapsed.
    async fn set(&self, key: SessionKey, session: Session, ttl: Duration)
    -> Result<(), StoreError>;

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError>;

    /// Drops every session of a conversation, whichever actor it belonged to.
    async fn purge_conversation(&self, conversation: &ConversationId) -> Result<(), StoreError>;
}

/// Instant a session stored at `now` stops being served. TTLs past the
/// representable range saturate.
pub fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A session as persisted, with the instant it stops being served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub key: SessionKey,
    pub session: Session,
    pub expires_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone)]
struct Entry {
    session: Session,
    expires_at: DateTime<Utc>,
}

/// In-process session store. Expired entries are dropped lazily on read.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: DashMap<SessionKey, Entry>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.session.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
            debug!(conversation = %key.conversation, "session expired");
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: SessionKey,
        session: Session,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = expiry(Utc::now(), ttl);
        self.entries.insert(
            key,
            Entry {
                session,
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn purge_conversation(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        self.entries.retain(|key, _| &key.conversation != conversation);
        debug!(%conversation, "sessions purged");
        Ok(())
    }
}
