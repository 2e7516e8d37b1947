//! Incremental maintenance when a customer's interests change.

use std::collections::BTreeSet;

use async_trait::async_trait;
use common::{CustomerId, InterestId};
use entity_store::EntityStore;
use serde::{Deserialize, Serialize};

use super::{AffectedLists, collect_lists};
use crate::Result;
use crate::handler::{ChangeHandler, SyncPlan};
use crate::reconcile::reconcile_customer;
use crate::resolver::Membership;
use crate::source::SourceView;

/// The explicit delta applied to a customer's interest set.
///
/// Clearing all interests is expressed as removing each of them. An empty
/// delta asks for an eligibility re-check only, e.g. after the customer was
/// marked inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInterestsChange {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub added: BTreeSet<InterestId>,
    #[serde(default)]
    pub removed: BTreeSet<InterestId>,
}

impl CustomerInterestsChange {
    /// A change with no interest delta, used to re-check eligibility.
    pub fn recheck(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            ..Default::default()
        }
    }
}

/// Reacts to interests being added to or removed from a customer.
///
/// Only lists that could be affected are touched: those targeting any added,
/// removed or currently held interest, and those already containing the
/// customer. On each of them the customer is reconciled individually rather
/// than re-resolving the whole list.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerInterestsHandler;

#[async_trait]
impl ChangeHandler for CustomerInterestsHandler {
    type Trigger = CustomerInterestsChange;

    fn name(&self) -> &'static str {
        "customer_interests"
    }

    async fn plan<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        change: &CustomerInterestsChange,
    ) -> Result<SyncPlan> {
        let customer_id = change.customer_id;
        let Some(customer) = store.get_customer(customer_id).await? else {
            tracing::debug!(%customer_id, "customer no longer exists");
            return Ok(SyncPlan::empty());
        };

        let touched: BTreeSet<InterestId> = customer
            .interests
            .iter()
            .chain(&change.added)
            .chain(&change.removed)
            .copied()
            .collect();

        let mut affected = AffectedLists::new();
        if !touched.is_empty() {
            collect_lists(
                &mut affected,
                store.mailing_lists_with_any_interest(&touched).await?,
            );
        }
        collect_lists(
            &mut affected,
            store.mailing_lists_containing_customer(customer_id).await?,
        );

        if affected.is_empty() {
            return Ok(SyncPlan::empty());
        }

        // Re-read after list versions are captured so a concurrent change to
        // this customer either shows up here or fails our version check.
        let Some(customer) = store.get_customer(customer_id).await? else {
            return Ok(SyncPlan::empty());
        };
        let view = SourceView::load(store, vec![customer.clone()], true).await?;

        let mut plan = SyncPlan::empty();
        for list in affected.values() {
            let mut target = Membership::of(list);
            reconcile_customer(&mut target, &list.interests, &customer, &view);
            plan.push(list, target);
        }
        Ok(plan)
    }
}
