//! End-to-end membership scenarios against the in-memory store.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use common::{AddressId, CustomerId, InterestId, MailingListId};
use entity_store::{
    Address, Customer, CustomerInterest, EntityStore, InMemoryEntityStore, MailingList,
    MembershipWrite,
};
use membership::{MembershipSync, SourceChange, SyncError, SyncOptions, resolve_list};

struct Nursery {
    sync: MembershipSync<InMemoryEntityStore>,
    tree_sale: InterestId,
    soil_tests: InterestId,
}

impl Nursery {
    async fn new() -> Self {
        let store = InMemoryEntityStore::new();
        let tree_sale = CustomerInterest::new("Tree Sale").unwrap();
        let soil_tests = CustomerInterest::new("Soil Tests").unwrap();
        store.save_interest(tree_sale.clone()).await.unwrap();
        store.save_interest(soil_tests.clone()).await.unwrap();
        Self {
            sync: MembershipSync::new(store),
            tree_sale: tree_sale.id,
            soil_tests: soil_tests.id,
        }
    }

    fn store(&self) -> &InMemoryEntityStore {
        self.sync.store()
    }

    async fn address(&self, mailing: bool) -> Address {
        let address = Address::new("1 Main St", "Fargo", "ND", "58102").with_mailing_address(mailing);
        self.store().save_address(address.clone()).await.unwrap();
        address
    }

    /// Saves a customer and fires the trigger for its initial interests.
    async fn customer(&self, interests: &[InterestId], addresses: &[AddressId]) -> Customer {
        let mut customer = Customer::new();
        customer.interests.extend(interests.iter().copied());
        customer.addresses.extend(addresses.iter().copied());
        self.store().save_customer(customer.clone()).await.unwrap();
        self.sync
            .on_customer_interests_changed(customer.id, customer.interests.clone(), BTreeSet::new())
            .await
            .unwrap();
        customer
    }

    async fn list(&self, interests: &[InterestId]) -> MailingListId {
        let name = format!("Catalogue {}", self.store().mailing_list_count().await + 1);
        let list = MailingList::new(name, interests.iter().copied()).unwrap();
        self.store().create_mailing_list(list.clone()).await.unwrap();
        self.sync.on_mailing_list_interests_changed(list.id).await.unwrap();
        list.id
    }

    async fn get(&self, list_id: MailingListId) -> MailingList {
        self.store().get_mailing_list(list_id).await.unwrap().unwrap()
    }

    async fn set_interests(&self, customer: &mut Customer, interests: BTreeSet<InterestId>) {
        let added = interests.difference(&customer.interests).copied().collect();
        let removed = customer.interests.difference(&interests).copied().collect();
        customer.interests = interests;
        self.store().save_customer(customer.clone()).await.unwrap();
        self.sync
            .on_customer_interests_changed(customer.id, added, removed)
            .await
            .unwrap();
    }

    async fn set_mailing(&self, address: &mut Address, mailing: bool) {
        address.mailing_address = mailing;
        self.store().save_address(address.clone()).await.unwrap();
        self.sync.on_address_saved(address.id).await.unwrap();
    }

    async fn assert_no_drift(&self, list_id: MailingListId) {
        let drift = self.sync.audit(list_id).await.unwrap().unwrap();
        assert!(drift.is_empty(), "list drifted: {drift:?}");
    }
}

/// Scenario 1 setup: Customer1 qualifies, Customer2 has no mailing address.
struct Catalogue {
    n: Nursery,
    list: MailingListId,
    c1: Customer,
    c1_address: Address,
    c2: Customer,
    c2_address: Address,
}

async fn catalogue() -> Catalogue {
    let n = Nursery::new().await;
    let c1_address = n.address(true).await;
    let c2_address = n.address(false).await;
    let c1 = n.customer(&[n.tree_sale], &[c1_address.id]).await;
    let c2 = n.customer(&[n.soil_tests], &[c2_address.id]).await;
    let list = n.list(&[n.tree_sale, n.soil_tests]).await;
    Catalogue {
        n,
        list,
        c1,
        c1_address,
        c2,
        c2_address,
    }
}

#[tokio::test]
async fn scenario_only_eligible_customers_join() {
    let c = catalogue().await;
    let list = c.n.get(c.list).await;

    assert_eq!(list.customers, BTreeSet::from([c.c1.id]));
    assert_eq!(list.addresses, BTreeSet::from([c.c1_address.id]));
    c.n.assert_no_drift(c.list).await;
}

#[tokio::test]
async fn scenario_address_upgrade_adds_customer() {
    let mut c = catalogue().await;
    c.n.set_mailing(&mut c.c2_address, true).await;

    let list = c.n.get(c.list).await;
    assert_eq!(list.customers, BTreeSet::from([c.c1.id, c.c2.id]));
    assert_eq!(
        list.addresses,
        BTreeSet::from([c.c1_address.id, c.c2_address.id])
    );
    c.n.assert_no_drift(c.list).await;
}

#[tokio::test]
async fn scenario_removing_list_interest_drops_customer() {
    let mut c = catalogue().await;
    c.n.set_mailing(&mut c.c2_address, true).await;

    c.n.store()
        .set_mailing_list_interests(c.list, BTreeSet::from([c.n.tree_sale]))
        .await
        .unwrap();
    c.n.sync.on_mailing_list_interests_changed(c.list).await.unwrap();

    let list = c.n.get(c.list).await;
    assert_eq!(list.customers, BTreeSet::from([c.c1.id]));
    assert_eq!(list.addresses, BTreeSet::from([c.c1_address.id]));
}

#[tokio::test]
async fn scenario_inactive_customer_removed() {
    let mut c = catalogue().await;
    c.c1.is_inactive = true;
    c.n.store().save_customer(c.c1.clone()).await.unwrap();
    c.n.sync
        .dispatch(SourceChange::CustomerInterestsChanged {
            customer_id: c.c1.id,
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
        })
        .await
        .unwrap();

    let list = c.n.get(c.list).await;
    assert!(list.customers.is_empty());
    assert!(list.addresses.is_empty());
}

#[tokio::test]
async fn scenario_shared_address_survives_removal() {
    let n = Nursery::new().await;
    let shared = n.address(true).await;
    let mut c1 = n.customer(&[n.tree_sale], &[shared.id]).await;
    let c3 = n.customer(&[n.tree_sale], &[shared.id]).await;
    let list_id = n.list(&[n.tree_sale]).await;

    n.set_interests(&mut c1, BTreeSet::new()).await;

    let list = n.get(list_id).await;
    assert_eq!(list.customers, BTreeSet::from([c3.id]));
    assert_eq!(list.addresses, BTreeSet::from([shared.id]));
    n.assert_no_drift(list_id).await;
}

#[tokio::test]
async fn address_scoped_to_members() {
    let n = Nursery::new().await;
    let shared = n.address(true).await;
    let billing = n.address(false).await;
    let member = n.customer(&[n.tree_sale], &[shared.id, billing.id]).await;
    let outsider_home = n.address(true).await;
    n.customer(&[n.soil_tests], &[outsider_home.id, shared.id]).await;
    let list_id = n.list(&[n.tree_sale]).await;

    let list = n.get(list_id).await;
    assert_eq!(list.customers, BTreeSet::from([member.id]));
    assert_eq!(list.addresses, BTreeSet::from([shared.id]));
}

#[tokio::test]
async fn triggers_are_idempotent() {
    let c = catalogue().await;
    let before = c.n.get(c.list).await;

    let report = c.n.sync.on_mailing_list_interests_changed(c.list).await.unwrap();
    assert!(report.is_noop());
    let report = c.n
        .sync
        .on_customer_interests_changed(c.c1.id, BTreeSet::new(), BTreeSet::new())
        .await
        .unwrap();
    assert!(report.is_noop());
    let report = c.n.sync.on_address_saved(c.c2_address.id).await.unwrap();
    assert!(report.is_noop());

    let after = c.n.get(c.list).await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn inactive_customer_leaves_every_list() {
    let n = Nursery::new().await;
    let home = n.address(true).await;
    let mut customer = n.customer(&[n.tree_sale, n.soil_tests], &[home.id]).await;
    let trees = n.list(&[n.tree_sale]).await;
    let soil = n.list(&[n.soil_tests]).await;
    assert!(n.get(trees).await.customers.contains(&customer.id));
    assert!(n.get(soil).await.customers.contains(&customer.id));

    customer.is_inactive = true;
    n.store().save_customer(customer.clone()).await.unwrap();
    n.sync
        .on_customer_interests_changed(customer.id, BTreeSet::new(), BTreeSet::new())
        .await
        .unwrap();

    for list_id in [trees, soil] {
        let list = n.get(list_id).await;
        assert!(list.customers.is_empty());
        assert!(list.addresses.is_empty());
    }
}

#[tokio::test]
async fn address_downgrade_removes_dependent_customer_everywhere() {
    let n = Nursery::new().await;
    let mut only = n.address(true).await;
    let customer = n.customer(&[n.tree_sale, n.soil_tests], &[only.id]).await;
    let other_home = n.address(true).await;
    let other = n.customer(&[n.tree_sale], &[other_home.id]).await;
    let trees = n.list(&[n.tree_sale]).await;
    let soil = n.list(&[n.soil_tests]).await;

    n.set_mailing(&mut only, false).await;

    assert_eq!(n.get(trees).await.customers, BTreeSet::from([other.id]));
    assert_eq!(n.get(trees).await.addresses, BTreeSet::from([other_home.id]));
    assert!(n.get(soil).await.customers.is_empty());
    assert!(!n.get(soil).await.customers.contains(&customer.id));
    n.assert_no_drift(trees).await;
    n.assert_no_drift(soil).await;
}

#[tokio::test]
async fn list_with_no_interests_is_empty() {
    let c = catalogue().await;
    c.n.store()
        .set_mailing_list_interests(c.list, BTreeSet::new())
        .await
        .unwrap();
    c.n.sync.on_mailing_list_interests_changed(c.list).await.unwrap();

    let list = c.n.get(c.list).await;
    assert!(list.customers.is_empty());
    assert!(list.addresses.is_empty());
}

#[tokio::test]
async fn triggers_for_missing_entities_are_noops() {
    let n = Nursery::new().await;
    let report = n
        .sync
        .on_mailing_list_interests_changed(MailingListId::new())
        .await
        .unwrap();
    assert_eq!(report.lists_examined, 0);
    assert!(report.is_noop());

    let report = n
        .sync
        .on_customer_interests_changed(CustomerId::new(), BTreeSet::new(), BTreeSet::new())
        .await
        .unwrap();
    assert!(report.is_noop());

    let report = n.sync.on_address_saved(AddressId::new()).await.unwrap();
    assert!(report.is_noop());
    assert!(n.sync.audit(MailingListId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn rebuild_repairs_drifted_lists() {
    let c = catalogue().await;

    // Source changes applied without their triggers
    let late = c.n.address(true).await;
    let joiner = Customer::new()
        .with_interest(c.n.soil_tests)
        .with_address(late.id);
    c.n.store().save_customer(joiner.clone()).await.unwrap();
    let mut c1 = c.c1.clone();
    c1.is_inactive = true;
    c.n.store().save_customer(c1).await.unwrap();

    let drift = c.n.sync.audit(c.list).await.unwrap().unwrap();
    assert_eq!(drift.missing_customers, BTreeSet::from([joiner.id]));
    assert_eq!(drift.unexpected_customers, BTreeSet::from([c.c1.id]));

    let report = c.n.sync.rebuild_all().await.unwrap();
    assert_eq!(report.lists_examined, 1);
    assert_eq!(report.lists_written, 1);
    assert_eq!(report.customers_added, 1);
    assert_eq!(report.customers_removed, 1);

    let list = c.n.get(c.list).await;
    assert_eq!(list.customers, BTreeSet::from([joiner.id]));
    assert_eq!(list.addresses, BTreeSet::from([late.id]));
    c.n.assert_no_drift(c.list).await;
}

#[tokio::test]
async fn clean_rebuild_reports_single_attempt() {
    let n = Nursery::new().await;
    for _ in 0..3 {
        n.list(&[n.tree_sale]).await;
    }

    let report = n.sync.rebuild_all().await.unwrap();
    assert_eq!(report.lists_examined, 3);
    assert_eq!(report.attempts, 1);
    assert!(report.is_noop());
}

#[tokio::test]
async fn unchanged_trigger_does_not_bump_version() {
    let c = catalogue().await;
    let before = c.n.get(c.list).await.version;
    c.n.sync.on_mailing_list_interests_changed(c.list).await.unwrap();
    assert_eq!(c.n.get(c.list).await.version, before);
}


/// What a competing writer does right before one of our commits.
#[derive(Clone, Copy)]
enum Competitor {
    /// Rewrites the list's current membership, only bumping its version.
    Touch,
    /// Recomputes the list from scratch and writes the result.
    Rebuild,
    /// Clears the list's interests and runs the list trigger.
    ClearInterests,
}

/// Store where another writer commits to each target list right before the
/// first `races` commits, so those commits carry stale versions.
struct RacingStore {
    inner: InMemoryEntityStore,
    competitor: Competitor,
    races: AtomicU32,
}

impl RacingStore {
    fn new(inner: InMemoryEntityStore, competitor: Competitor, races: u32) -> Self {
        Self {
            inner,
            competitor,
            races: AtomicU32::new(races),
        }
    }

    async fn compete(&self, list_id: MailingListId) -> entity_store::Result<()> {
        let Some(list) = self.inner.get_mailing_list(list_id).await? else {
            return Ok(());
        };
        let (customers, addresses) = match self.competitor {
            Competitor::Touch => (list.customers.clone(), list.addresses.clone()),
            Competitor::Rebuild => {
                let membership = resolve_list(&self.inner, &list)
                    .await
                    .map_err(into_store_error)?;
                (membership.customers, membership.addresses)
            }
            Competitor::ClearInterests => {
                self.inner
                    .set_mailing_list_interests(list_id, BTreeSet::new())
                    .await?;
                MembershipSync::new(self.inner.clone())
                    .on_mailing_list_interests_changed(list_id)
                    .await
                    .map_err(into_store_error)?;
                return Ok(());
            }
        };
        self.inner
            .commit_membership(vec![MembershipWrite::replace(&list, customers, addresses)])
            .await
    }
}

fn into_store_error(err: SyncError) -> entity_store::StoreError {
    match err {
        SyncError::Store(e) => e,
        other => panic!("unexpected sync error: {other}"),
    }
}

#[async_trait]
impl EntityStore for RacingStore {
    async fn get_mailing_list(
        &self,
        id: MailingListId,
    ) -> entity_store::Result<Option<MailingList>> {
        self.inner.get_mailing_list(id).await
    }

    async fn mailing_list_ids(&self) -> entity_store::Result<Vec<MailingListId>> {
        self.inner.mailing_list_ids().await
    }

    async fn mailing_lists_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> entity_store::Result<Vec<MailingList>> {
        self.inner.mailing_lists_with_any_interest(interests).await
    }

    async fn mailing_lists_containing_customer(
        &self,
        customer_id: CustomerId,
    ) -> entity_store::Result<Vec<MailingList>> {
        self.inner.mailing_lists_containing_customer(customer_id).await
    }

    async fn commit_membership(&self, writes: Vec<MembershipWrite>) -> entity_store::Result<()> {
        let raced = self
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if raced {
            for write in &writes {
                self.compete(write.list_id).await?;
            }
        }
        self.inner.commit_membership(writes).await
    }

    async fn get_customer(&self, id: CustomerId) -> entity_store::Result<Option<Customer>> {
        self.inner.get_customer(id).await
    }

    async fn customers_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> entity_store::Result<Vec<Customer>> {
        self.inner.customers_with_any_interest(interests).await
    }

    async fn customer_ids_with_address(
        &self,
        address_id: AddressId,
    ) -> entity_store::Result<Vec<CustomerId>> {
        self.inner.customer_ids_with_address(address_id).await
    }

    async fn get_address(&self, id: AddressId) -> entity_store::Result<Option<Address>> {
        self.inner.get_address(id).await
    }

    async fn get_addresses(
        &self,
        ids: &BTreeSet<AddressId>,
    ) -> entity_store::Result<Vec<Address>> {
        self.inner.get_addresses(ids).await
    }

    async fn save_interest(&self, interest: CustomerInterest) -> entity_store::Result<()> {
        self.inner.save_interest(interest).await
    }

    async fn save_address(&self, address: Address) -> entity_store::Result<()> {
        self.inner.save_address(address).await
    }

    async fn save_customer(&self, customer: Customer) -> entity_store::Result<()> {
        self.inner.save_customer(customer).await
    }

    async fn create_mailing_list(&self, list: MailingList) -> entity_store::Result<()> {
        self.inner.create_mailing_list(list).await
    }

    async fn set_mailing_list_interests(
        &self,
        id: MailingListId,
        interests: BTreeSet<InterestId>,
    ) -> entity_store::Result<()> {
        self.inner.set_mailing_list_interests(id, interests).await
    }

    async fn delete_mailing_list(&self, id: MailingListId) -> entity_store::Result<bool> {
        self.inner.delete_mailing_list(id).await
    }
}

/// Saves a new Tree Sale customer without firing its trigger.
async fn untriggered_joiner(c: &Catalogue) -> Customer {
    let home = c.n.address(true).await;
    let joiner = Customer::new()
        .with_interest(c.n.tree_sale)
        .with_address(home.id);
    c.n.store().save_customer(joiner.clone()).await.unwrap();
    joiner
}

#[tokio::test]
async fn stale_commit_is_recomputed() {
    let c = catalogue().await;
    let joiner = untriggered_joiner(&c).await;

    let sync = MembershipSync::new(RacingStore::new(c.n.store().clone(), Competitor::Touch, 2));
    let report = sync
        .on_customer_interests_changed(joiner.id, joiner.interests.clone(), BTreeSet::new())
        .await
        .unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(report.lists_written, 1);
    assert_eq!(
        c.n.get(c.list).await.customers,
        BTreeSet::from([c.c1.id, joiner.id])
    );
    c.n.assert_no_drift(c.list).await;
}

#[tokio::test]
async fn competitor_result_is_not_overwritten() {
    let c = catalogue().await;
    let joiner = untriggered_joiner(&c).await;

    let sync = MembershipSync::new(RacingStore::new(
        c.n.store().clone(),
        Competitor::Rebuild,
        1,
    ));
    let report = sync
        .on_customer_interests_changed(joiner.id, joiner.interests.clone(), BTreeSet::new())
        .await
        .unwrap();

    // The retry sees the competitor already added the joiner.
    assert_eq!(report.attempts, 2);
    assert!(report.is_noop());
    c.n.assert_no_drift(c.list).await;
}

#[tokio::test]
async fn list_interest_change_invalidates_incremental_commit() {
    let n = Nursery::new().await;
    let list_id = n.list(&[n.tree_sale]).await;
    let home = n.address(true).await;
    let joiner = Customer::new().with_interest(n.tree_sale).with_address(home.id);
    n.store().save_customer(joiner.clone()).await.unwrap();

    // The list's interests are cleared between planning and committing. The
    // list trigger sees an empty list resolve to empty and writes nothing.
    let sync = MembershipSync::new(RacingStore::new(
        n.store().clone(),
        Competitor::ClearInterests,
        1,
    ));
    let report = sync
        .on_customer_interests_changed(joiner.id, joiner.interests.clone(), BTreeSet::new())
        .await
        .unwrap();

    assert_eq!(report.attempts, 2);
    assert!(report.is_noop());
    let list = n.get(list_id).await;
    assert!(list.interests.is_empty());
    assert!(list.customers.is_empty());
    assert!(list.addresses.is_empty());
    n.assert_no_drift(list_id).await;
}

#[tokio::test]
async fn endless_conflicts_exhaust_retries() {
    let c = catalogue().await;
    let joiner = untriggered_joiner(&c).await;
    let before = c.n.get(c.list).await;

    let sync = MembershipSync::with_options(
        RacingStore::new(c.n.store().clone(), Competitor::Touch, u32::MAX),
        SyncOptions { max_attempts: 3 },
    );
    let err = sync
        .on_customer_interests_changed(joiner.id, joiner.interests.clone(), BTreeSet::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::RetriesExhausted {
            trigger: "customer_interests",
            attempts: 3
        }
    ));
    let after = c.n.get(c.list).await;
    assert_eq!(after.customers, before.customers);

    // Re-running the trigger once the contention is gone converges.
    c.n.sync
        .on_customer_interests_changed(joiner.id, joiner.interests.clone(), BTreeSet::new())
        .await
        .unwrap();
    c.n.assert_no_drift(c.list).await;
}
