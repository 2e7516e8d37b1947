//! Entry points invoked after a source mutation has been persisted.

use std::collections::BTreeSet;

use common::{AddressId, CustomerId, InterestId, MailingListId};
use entity_store::{EntityStore, StoreError};
use serde::{Deserialize, Serialize};

use crate::audit::MembershipDrift;
use crate::error::{Result, SyncError};
use crate::handler::{ChangeHandler, SyncReport};
use crate::handlers::{
    AddressValidityHandler, CustomerInterestsChange, CustomerInterestsHandler,
    MailingListInterestsHandler,
};
use crate::resolver::{Membership, resolve_list};

/// Tuning for the optimistic retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Attempts per trigger before giving up on concurrency conflicts.
    pub max_attempts: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// A source mutation that requires derived membership to be brought up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceChange {
    MailingListInterestsChanged {
        list_id: MailingListId,
    },
    CustomerInterestsChanged {
        customer_id: CustomerId,
        #[serde(default)]
        added: BTreeSet<InterestId>,
        #[serde(default)]
        removed: BTreeSet<InterestId>,
    },
    AddressSaved {
        address_id: AddressId,
    },
}

/// Runs change handlers against a store and commits their results.
///
/// Each trigger computes its writes from a fresh read and commits them in one
/// batch guarded by list versions. When another writer got there first the
/// trigger is recomputed, up to [`SyncOptions::max_attempts`] times.
pub struct MembershipSync<S: EntityStore> {
    store: S,
    options: SyncOptions,
}

impl<S: EntityStore> MembershipSync<S> {
    /// Creates a dispatcher with default options.
    pub fn new(store: S) -> Self {
        Self::with_options(store, SyncOptions::default())
    }

    pub fn with_options(store: S, options: SyncOptions) -> Self {
        Self { store, options }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Recomputes a list after its interest set was replaced.
    #[tracing::instrument(skip(self))]
    pub async fn on_mailing_list_interests_changed(
        &self,
        list_id: MailingListId,
    ) -> Result<SyncReport> {
        self.run(&MailingListInterestsHandler, &list_id).await
    }

    /// Updates every list affected by interests added to or removed from a
    /// customer. Empty deltas re-check the customer's eligibility.
    #[tracing::instrument(skip(self))]
    pub async fn on_customer_interests_changed(
        &self,
        customer_id: CustomerId,
        added: BTreeSet<InterestId>,
        removed: BTreeSet<InterestId>,
    ) -> Result<SyncReport> {
        let change = CustomerInterestsChange {
            customer_id,
            added,
            removed,
        };
        self.run(&CustomerInterestsHandler, &change).await
    }

    /// Updates every list affected by an address being created or edited.
    #[tracing::instrument(skip(self))]
    pub async fn on_address_saved(&self, address_id: AddressId) -> Result<SyncReport> {
        self.run(&AddressValidityHandler, &address_id).await
    }

    /// Routes a [`SourceChange`] to its handler.
    pub async fn dispatch(&self, change: SourceChange) -> Result<SyncReport> {
        match change {
            SourceChange::MailingListInterestsChanged { list_id } => {
                self.on_mailing_list_interests_changed(list_id).await
            }
            SourceChange::CustomerInterestsChanged {
                customer_id,
                added,
                removed,
            } => {
                self.on_customer_interests_changed(customer_id, added, removed)
                    .await
            }
            SourceChange::AddressSaved { address_id } => self.on_address_saved(address_id).await,
        }
    }

    /// Fully recomputes every mailing list.
    ///
    /// Lists are committed one at a time so a conflict on one list does not
    /// restart the others.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<SyncReport> {
        let mut total = SyncReport::default();
        for list_id in self.store.mailing_list_ids().await? {
            let report = self.on_mailing_list_interests_changed(list_id).await?;
            total.merge(report);
        }
        tracing::info!(%total, "rebuilt all mailing lists");
        Ok(total)
    }

    /// Compares a list's stored membership with a fresh resolution.
    ///
    /// Returns `None` if the list does not exist.
    pub async fn audit(&self, list_id: MailingListId) -> Result<Option<MembershipDrift>> {
        let Some(list) = self.store.get_mailing_list(list_id).await? else {
            return Ok(None);
        };
        let expected = resolve_list(&self.store, &list).await?;
        Ok(Some(MembershipDrift::between(
            list_id,
            &Membership::of(&list),
            &expected,
        )))
    }

    async fn run<H: ChangeHandler>(&self, handler: &H, trigger: &H::Trigger) -> Result<SyncReport> {
        let name = handler.name();
        metrics::counter!("membership_triggers_total", "trigger" => name).increment(1);

        let max_attempts = self.options.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let mut plan = handler.plan(&self.store, trigger).await?;
            plan.report.attempts = attempt;

            if plan.writes.is_empty() {
                tracing::debug!(trigger = name, report = %plan.report, "membership already current");
                return Ok(plan.report);
            }

            let written = plan.writes.len() as u64;
            match self.store.commit_membership(plan.writes).await {
                Ok(()) => {
                    metrics::counter!("membership_list_writes_total").increment(written);
                    tracing::debug!(trigger = name, report = %plan.report, "membership committed");
                    return Ok(plan.report);
                }
                Err(StoreError::ConcurrencyConflict {
                    list_id,
                    expected,
                    actual,
                }) => {
                    metrics::counter!("membership_conflict_retries_total").increment(1);
                    tracing::warn!(
                        trigger = name,
                        attempt,
                        %list_id,
                        %expected,
                        %actual,
                        "membership commit conflicted, recomputing"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::RetriesExhausted {
            trigger: name,
            attempts: max_attempts,
        })
    }
}
