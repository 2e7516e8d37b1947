//! Shared identifier types.

pub mod types;

pub use types::{AddressId, CustomerId, InterestId, MailingListId, Version};
