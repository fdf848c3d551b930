mod backoff;
pub mod copy;
pub mod discovery;
mod engine;
mod error;
pub mod plan;
pub mod progress;
pub mod tree;
pub mod wiki;

#[cfg(test)]
pub(crate) mod fake_drive;

pub use engine::{
    CleanupNotice, CopySummary, FolderRef, MigrationReport, Migrator, SelectionCounts,
    WikiSummary,
};
pub use error::MigrationError;
pub use progress::{ProgressEvent, ProgressSnapshot, RunContext, RunState, StepId, StepState};
pub use tree::{NodeId, SelectionSummary, Tree};
