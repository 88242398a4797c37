//! Domain records shared by the engine, the stores and the front desk.
//!
//! Everything that crosses the core boundary is a named struct; stores
//! persist these with serde and hand them back unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identity of a production batch.
    BatchId
);
uuid_id!(
    /// Identity of a worker profile.
    ActorId
);
uuid_id!(StageId);
uuid_id!(
    /// Product category; selects the stage catalog a batch follows.
    CategoryId
);

/// Transport-level conversation handle (a chat id, a web session, a tty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id the notifier assigned to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// A tracked unit of production work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Human-facing batch number printed on the QR label.
    pub number: String,
    pub quantity: u32,
    pub category: CategoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One ordered step of a category's production sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub label: String,
    pub position: u32,
    pub category: CategoryId,
}

/// Proof that a stage was completed for a batch. Unique per (batch, stage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCompletionRecord {
    pub batch: BatchId,
    pub stage: StageId,
    pub actor: ActorId,
    pub quantity: u32,
    pub completed_at: DateTime<Utc>,
}

/// Exclusive fixation of a batch to one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: ActorId,
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(holder: ActorId, acquired_at: DateTime<Utc>) -> Self {
        Self {
            holder,
            acquired_at,
        }
    }

    pub fn is_held_by(&self, actor: ActorId) -> bool {
        self.holder == actor
    }

    /// A lease acquired strictly before `cutoff` is stale.
    pub fn is_stale(&self, cutoff: Option<DateTime<Utc>>) -> bool {
        cutoff.is_some_and(|cutoff| self.acquired_at < cutoff)
    }
}

/// A worker profile as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub display_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ids_parse_and_display() {
        let id = BatchId::new();
        let parsed: BatchId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(" 0194fafe-3911-7cdf-b1ae-245469b6b1c8 ".parse::<BatchId>().is_ok());
        assert!("not-a-batch".parse::<BatchId>().is_err());
    }

    #[test]
    fn lease_staleness_needs_a_cutoff() {
        let now = Utc::now();
        let lease = Lease::new(ActorId::new(), now - Duration::hours(3));
        assert!(!lease.is_stale(None));
        assert!(lease.is_stale(Some(now - Duration::hours(1))));
        assert!(!lease.is_stale(Some(now - Duration::hours(4))));
    }

    #[test]
    fn actor_defaults_to_active() {
        let actor: Actor = serde_json::from_str(&format!(
            r#"{{"id":"{}","display_name":"Anna"}}"#,
            ActorId::new()
        ))
        .unwrap();
        assert!(actor.active);
    }
}
