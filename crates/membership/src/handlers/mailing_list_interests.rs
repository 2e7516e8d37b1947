//! Full recomputation when a list's interest set changes.

use async_trait::async_trait;
use common::MailingListId;
use entity_store::EntityStore;

use crate::Result;
use crate::handler::{ChangeHandler, SyncPlan};
use crate::resolver::resolve_list;

/// Reacts to an interest being added to, removed from, or cleared on a
/// mailing list by replacing the list's derived sets with a fresh resolution.
///
/// Removing one interest can leave a customer qualified through another, so
/// only a full recomputation is correct here.
#[derive(Debug, Clone, Copy, Default)]
pub struct MailingListInterestsHandler;

#[async_trait]
impl ChangeHandler for MailingListInterestsHandler {
    type Trigger = MailingListId;

    fn name(&self) -> &'static str {
        "mailing_list_interests"
    }

    async fn plan<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        list_id: &MailingListId,
    ) -> Result<SyncPlan> {
        let Some(list) = store.get_mailing_list(*list_id).await? else {
            tracing::debug!(%list_id, "mailing list no longer exists");
            return Ok(SyncPlan::empty());
        };

        let target = resolve_list(store, &list).await?;

        let mut plan = SyncPlan::empty();
        plan.push(&list, target);
        Ok(plan)
    }
}
