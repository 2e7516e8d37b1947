//! Incremental maintenance of one customer's place on one list.

use std::collections::BTreeSet;

use common::{AddressId, InterestId};
use entity_store::Customer;

use crate::resolver::Membership;
use crate::source::SourceView;

/// Brings `customer`'s presence in `membership` in line with its current
/// state in `view`.
///
/// A customer belongs on the list iff it is eligible and shares an interest
/// with it. Members carry all of their mailing addresses and none of their
/// other addresses. When a customer is removed, each of its addresses stays
/// only while another remaining member holds it as a mailing address; the
/// view must therefore have been loaded with holders.
pub fn reconcile_customer(
    membership: &mut Membership,
    list_interests: &BTreeSet<InterestId>,
    customer: &Customer,
    view: &SourceView,
) {
    let qualifies = customer.shares_interest(list_interests) && view.is_eligible(customer);

    if qualifies {
        membership.customers.insert(customer.id);
        for &address_id in &customer.addresses {
            if view.is_mailing_address(address_id) {
                membership.addresses.insert(address_id);
            } else {
                membership.addresses.remove(&address_id);
            }
        }
        return;
    }

    membership.customers.remove(&customer.id);
    for &address_id in &customer.addresses {
        if !is_justified(membership, address_id, view) {
            membership.addresses.remove(&address_id);
        }
    }
}

/// An address belongs on a list while some member holds it and it is
/// flagged as a mailing address.
fn is_justified(membership: &Membership, address_id: AddressId, view: &SourceView) -> bool {
    view.is_mailing_address(address_id)
        && view
            .holders(address_id)
            .any(|holder| membership.customers.contains(&holder))
}
