//! HTTP handlers, grouped by resource.

pub mod addresses;
pub mod customers;
pub mod health;
pub mod interests;
pub mod mailing_lists;
pub mod metrics;

use entity_store::EntityStore;
use membership::MembershipSync;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
///
/// Every route that mutates source data persists the change through the
/// store first and then invokes the matching membership trigger.
pub struct AppState<S: EntityStore> {
    pub sync: MembershipSync<S>,
}

impl<S: EntityStore> AppState<S> {
    pub fn store(&self) -> &S {
        self.sync.store()
    }
}

/// Parses a path segment into a typed identifier.
pub(crate) fn parse_id<T: From<uuid::Uuid>>(raw: &str, what: &str) -> Result<T, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(T::from)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what} ID: {e}")))
}
