//! Full recomputation of a mailing list's derived membership.

use std::collections::BTreeSet;

use common::{AddressId, CustomerId, InterestId};
use entity_store::{EntityStore, MailingList};
use serde::Serialize;

use crate::Result;
use crate::source::SourceView;

/// The derived side of a mailing list: who is on it and where to mail them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Membership {
    pub customers: BTreeSet<CustomerId>,
    pub addresses: BTreeSet<AddressId>,
}

impl Membership {
    /// The membership currently stored on `list`.
    pub fn of(list: &MailingList) -> Self {
        Self {
            customers: list.customers.clone(),
            addresses: list.addresses.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty() && self.addresses.is_empty()
    }
}

/// Resolves the membership a list targeting `interests` should have, over
/// the customers in `view`.
///
/// Customers in the view that share no interest with the list are ignored,
/// so the view may hold more than the candidates. A list with no interests
/// resolves to an empty membership.
pub fn resolve_membership(interests: &BTreeSet<InterestId>, view: &SourceView) -> Membership {
    let mut membership = Membership::default();
    if interests.is_empty() {
        return membership;
    }

    for customer in view
        .customers()
        .filter(|c| c.shares_interest(interests))
        .filter(|c| view.is_eligible(c))
    {
        membership.customers.insert(customer.id);
        membership.addresses.extend(view.mailing_addresses(customer));
    }
    membership
}

/// Loads the candidates for `list` from the store and resolves its membership.
pub async fn resolve_list<S: EntityStore + ?Sized>(
    store: &S,
    list: &MailingList,
) -> Result<Membership> {
    if list.interests.is_empty() {
        return Ok(Membership::default());
    }
    let candidates = store.customers_with_any_interest(&list.interests).await?;
    let view = SourceView::load(store, candidates, false).await?;
    Ok(resolve_membership(&list.interests, &view))
}
