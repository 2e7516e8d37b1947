//! Synchronization error types.

use entity_store::StoreError;
use thiserror::Error;

/// Errors that can occur while synchronizing mailing-list membership.
///
/// Any error means nothing was written for the trigger that raised it; the
/// caller should roll back or retry the source mutation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The entity store failed.
    #[error("Entity store error: {0}")]
    Store(#[from] StoreError),

    /// Every attempt lost an optimistic concurrency race.
    #[error("{trigger} gave up after {attempts} conflicting attempts")]
    RetriesExhausted {
        trigger: &'static str,
        attempts: u32,
    },
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
