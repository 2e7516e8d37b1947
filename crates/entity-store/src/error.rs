use thiserror::Error;

use crate::{MailingListId, Version};

/// Base validation failures for entities, raised before anything is stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Interest names must be between 4 and 50 characters.
    #[error("Interest name must be 4-50 characters, got {0}")]
    InterestNameLength(usize),

    /// Interest names may only contain letters, digits, spaces and dashes.
    #[error("Interest name contains invalid character {0:?}")]
    InterestNameCharacter(char),

    /// A mailing address must have a street.
    #[error("Street is required for a mailing address")]
    StreetRequired,

    /// Mailing list names must be between 4 and 50 characters.
    #[error("Mailing list name must be 4-50 characters, got {0}")]
    ListNameLength(usize),

    /// Mailing list names may only contain letters, digits, spaces and dashes.
    #[error("Mailing list name contains invalid character {0:?}")]
    ListNameCharacter(char),

    /// Mailing list names must not be blank.
    #[error("Mailing list name must not be empty")]
    EmptyListName,
}

/// Errors that can occur when interacting with the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A mailing list's derived membership was written by someone else since
    /// it was read.
    #[error(
        "Concurrency conflict for mailing list {list_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        list_id: MailingListId,
        expected: Version,
        actual: Version,
    },

    /// A membership batch targeted the same mailing list twice.
    #[error("Mailing list {0} written more than once in one batch")]
    DuplicateWrite(MailingListId),

    /// A record would reuse a name that must be unique.
    #[error("{entity} named {name:?} already exists")]
    Duplicate { entity: &'static str, name: String },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A record failed base validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn duplicate(entity: &'static str, name: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            name: name.into(),
        }
    }
}

/// Result type for entity store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
