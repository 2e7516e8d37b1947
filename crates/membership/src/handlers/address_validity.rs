//! Maintenance when an address is created or edited.

use async_trait::async_trait;
use common::AddressId;
use entity_store::{EntityStore, EntityStoreExt};

use super::{AffectedLists, collect_lists};
use crate::Result;
use crate::handler::{ChangeHandler, SyncPlan};
use crate::reconcile::reconcile_customer;
use crate::resolver::Membership;
use crate::source::SourceView;

/// Reacts to an address being saved, most importantly to its mailing flag
/// flipping.
///
/// Every customer holding the address may have changed eligibility, so each
/// of them is reconciled on every list that targets their interests or
/// already contains them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressValidityHandler;

#[async_trait]
impl ChangeHandler for AddressValidityHandler {
    type Trigger = AddressId;

    fn name(&self) -> &'static str {
        "address_validity"
    }

    async fn plan<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        address_id: &AddressId,
    ) -> Result<SyncPlan> {
        let address_id = *address_id;
        if store.get_address(address_id).await?.is_none() {
            tracing::debug!(%address_id, "address no longer exists");
            return Ok(SyncPlan::empty());
        }

        let holder_ids = store.customer_ids_with_address(address_id).await?;
        if holder_ids.is_empty() {
            return Ok(SyncPlan::empty());
        }

        let mut affected = AffectedLists::new();
        for &customer_id in &holder_ids {
            let Some(customer) = store.get_customer(customer_id).await? else {
                continue;
            };
            if !customer.interests.is_empty() {
                collect_lists(
                    &mut affected,
                    store
                        .mailing_lists_with_any_interest(&customer.interests)
                        .await?,
                );
            }
            collect_lists(
                &mut affected,
                store.mailing_lists_containing_customer(customer_id).await?,
            );
        }

        if affected.is_empty() {
            return Ok(SyncPlan::empty());
        }

        // Fresh snapshot taken after the list versions above.
        let holders = store.customers_with_address(address_id).await?;
        let view = SourceView::load(store, holders.clone(), true).await?;

        let mut plan = SyncPlan::empty();
        for list in affected.values() {
            let mut target = Membership::of(list);
            for customer in &holders {
                reconcile_customer(&mut target, &list.interests, customer, &view);
            }
            plan.push(list, target);
        }
        Ok(plan)
    }
}
