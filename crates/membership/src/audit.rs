//! Comparison of stored membership against a full recomputation.

use std::collections::BTreeSet;

use common::{AddressId, CustomerId, MailingListId};
use serde::Serialize;

use crate::resolver::Membership;

/// How a list's stored membership differs from what it should be.
///
/// "Missing" entries should be on the list but are not; "unexpected" ones
/// are on the list but should not be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipDrift {
    pub list_id: MailingListId,
    pub missing_customers: BTreeSet<CustomerId>,
    pub unexpected_customers: BTreeSet<CustomerId>,
    pub missing_addresses: BTreeSet<AddressId>,
    pub unexpected_addresses: BTreeSet<AddressId>,
}

impl MembershipDrift {
    pub fn between(list_id: MailingListId, stored: &Membership, expected: &Membership) -> Self {
        Self {
            list_id,
            missing_customers: expected.customers.difference(&stored.customers).copied().collect(),
            unexpected_customers: stored.customers.difference(&expected.customers).copied().collect(),
            missing_addresses: expected.addresses.difference(&stored.addresses).copied().collect(),
            unexpected_addresses: stored.addresses.difference(&expected.addresses).copied().collect(),
        }
    }

    /// Returns true if the stored membership is exactly right.
    pub fn is_empty(&self) -> bool {
        self.missing_customers.is_empty()
            && self.unexpected_customers.is_empty()
            && self.missing_addresses.is_empty()
            && self.unexpected_addresses.is_empty()
    }
}
