//! Mailing eligibility predicate.

use common::AddressId;
use entity_store::Customer;

/// Returns true if the customer currently qualifies for mailings: active,
/// with at least one address flagged as a mailing address.
///
/// `is_mailing_address` must reflect the current address records; callers
/// re-read addresses after any mutation before asking.
pub fn is_eligible(customer: &Customer, is_mailing_address: impl Fn(AddressId) -> bool) -> bool {
    !customer.is_inactive && customer.addresses.iter().any(|id| is_mailing_address(*id))
}
