//! Change handler trait and the plans handlers produce.

use std::collections::BTreeSet;

use async_trait::async_trait;
use entity_store::{EntityStore, MailingList, MembershipWrite};
use serde::Serialize;

use crate::Result;
use crate::resolver::Membership;

/// Counts describing what one synchronization did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Lists whose membership was recomputed.
    pub lists_examined: u64,
    /// Lists whose derived sets actually changed and were written.
    pub lists_written: u64,
    pub customers_added: u64,
    pub customers_removed: u64,
    pub addresses_added: u64,
    pub addresses_removed: u64,
    /// Attempts needed to commit without a concurrency conflict. A merged
    /// report keeps the most any single trigger needed.
    pub attempts: u32,
}

impl SyncReport {
    /// Adds another report's counts to this one.
    pub fn merge(&mut self, other: SyncReport) {
        self.lists_examined += other.lists_examined;
        self.lists_written += other.lists_written;
        self.customers_added += other.customers_added;
        self.customers_removed += other.customers_removed;
        self.addresses_added += other.addresses_added;
        self.addresses_removed += other.addresses_removed;
        self.attempts = self.attempts.max(other.attempts);
    }

    /// Returns true if nothing was written.
    pub fn is_noop(&self) -> bool {
        self.lists_written == 0
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} lists written, customers +{} -{}, addresses +{} -{}",
            self.lists_written,
            self.lists_examined,
            self.customers_added,
            self.customers_removed,
            self.addresses_added,
            self.addresses_removed
        )
    }
}

/// The writes a handler wants committed, all-or-nothing.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub writes: Vec<MembershipWrite>,
    pub report: SyncReport,
}

impl SyncPlan {
    /// A plan that writes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Records the membership `list` should now have. Lists whose membership
    /// is unchanged produce no write, so the version only moves on change.
    pub fn push(&mut self, list: &MailingList, target: Membership) {
        self.report.lists_examined += 1;

        let current = Membership::of(list);
        if current == target {
            return;
        }

        self.report.customers_added += missing_from(&current.customers, &target.customers);
        self.report.customers_removed += missing_from(&target.customers, &current.customers);
        self.report.addresses_added += missing_from(&current.addresses, &target.addresses);
        self.report.addresses_removed += missing_from(&target.addresses, &current.addresses);
        self.report.lists_written += 1;

        tracing::debug!(
            list_id = %list.id,
            customers = target.customers.len(),
            addresses = target.addresses.len(),
            "membership changed"
        );

        self.writes.push(MembershipWrite::replace(
            list,
            target.customers,
            target.addresses,
        ));
    }
}

/// Number of entries in `other` that are not in `base`.
fn missing_from<T: Ord>(base: &BTreeSet<T>, other: &BTreeSet<T>) -> u64 {
    other.difference(base).count() as u64
}

/// Translates one kind of source mutation into membership writes.
///
/// Handlers only read; the dispatcher commits their plan and re-runs them
/// when the commit loses a concurrency race, so `plan` must recompute from
/// the store every time it is called.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// The payload identifying what changed.
    type Trigger: Send + Sync + std::fmt::Debug;

    /// Returns the name of this handler, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Computes the writes that bring affected lists up to date.
    async fn plan<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        trigger: &Self::Trigger,
    ) -> Result<SyncPlan>;
}
