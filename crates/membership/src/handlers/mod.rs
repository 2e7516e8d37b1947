//! The three change handlers, one per kind of source mutation.

pub mod address_validity;
pub mod customer_interests;
pub mod mailing_list_interests;

use std::collections::BTreeMap;

use common::MailingListId;
use entity_store::MailingList;

pub use address_validity::AddressValidityHandler;
pub use customer_interests::{CustomerInterestsChange, CustomerInterestsHandler};
pub use mailing_list_interests::MailingListInterestsHandler;

/// Affected lists keyed by id, so a list reached twice is planned once.
type AffectedLists = BTreeMap<MailingListId, MailingList>;

fn collect_lists(affected: &mut AffectedLists, lists: Vec<MailingList>) {
    for list in lists {
        affected.entry(list.id).or_insert(list);
    }
}
