//! Stage progression of batches under exclusive fixation.

pub mod catalog;
pub mod engine;
pub mod lease;
pub mod query;
pub mod sequencer;

pub use catalog::{StageCatalog, StageCatalogResolver};
pub use engine::{
    BatchState, Cancellation, Completion, ProgressSnapshot, StageCompletionEngine, StatusReport,
};
pub use lease::{Acquisition, LeaseManager, LeasePolicy, Release};
pub use query::{BatchQueryFacade, CompletedStage, CompletionSummary, Holder};
pub use sequencer::{Position, StageMark, StageProgress, StageSequencer};
