use std::fmt;

use thiserror::Error;

use crate::model::{ActorId, BatchId, CategoryId, StageId};
use crate::progress::{CompletionSummary, Holder};

#[derive(Debug, Error)]
pub enum BatchlineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Front desk error: {0}")]
    Desk(#[from] DeskError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures of the persistence layer. Always fatal for the current action.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The record an engine operation could not find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Batch(BatchId),
    Catalog(CategoryId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Batch(id) => write!(f, "batch {id}"),
            Missing::Catalog(id) => write!(f, "stage catalog for category {id}"),
        }
    }
}

/// Outcome of an engine operation that did not apply.
///
/// Everything except [`EngineError::Persistence`] is an expected, typed
/// rejection that callers recover from locally. Persistence failures mean
/// a write may not have been committed and must reach an operator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(Missing),

    #[error("batch is fixed by {}", .0.display_name())]
    Conflict(Holder),

    #[error("batch {} has no remaining stage", .0.batch.number)]
    NoRemainingStage(Box<CompletionSummary>),

    #[error("actor {0} cannot be resolved")]
    Unauthorized(ActorId),

    #[error("actor {actor} does not hold batch {batch}")]
    NotHolder { batch: BatchId, actor: ActorId },

    #[error("stage {0} was already completed for this batch")]
    StageAlreadyCompleted(StageId),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {conversation} failed: {reason}")]
    Delivery {
        conversation: String,
        reason: String,
    },
}

/// Failures the front desk cannot turn into a message for the worker.
#[derive(Debug, Error)]
pub enum DeskError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_persistence_is_fatal() {
        assert!(EngineError::Persistence(StoreError::Storage("disk full".into())).is_fatal());
        assert!(!EngineError::Unauthorized(ActorId::new()).is_fatal());
        assert!(!EngineError::StageAlreadyCompleted(StageId::new()).is_fatal());
        assert!(!EngineError::NotFound(Missing::Batch(BatchId::new())).is_fatal());
    }

    #[test]
    fn missing_display() {
        let id = CategoryId::new();
        assert_eq!(
            Missing::Catalog(id).to_string(),
            format!("stage catalog for category {id}")
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
        assert_send_sync::<DeskError>();
    }
}
