use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    Address, AddressId, Customer, CustomerId, CustomerInterest, InterestId, MailingList,
    MailingListId, Result, StoreError,
    store::{EntityStore, MembershipWrite, validate_membership_batch},
};

#[derive(Default)]
struct Tables {
    interests: HashMap<InterestId, CustomerInterest>,
    addresses: HashMap<AddressId, Address>,
    customers: HashMap<CustomerId, Customer>,
    mailing_lists: HashMap<MailingListId, MailingList>,
}

impl Tables {
    fn check_interests(&self, ids: &BTreeSet<InterestId>) -> Result<()> {
        match ids.iter().find(|id| !self.interests.contains_key(id)) {
            Some(missing) => Err(StoreError::not_found("Interest", missing)),
            None => Ok(()),
        }
    }

    fn check_interest_unique(&self, interest: &CustomerInterest) -> Result<()> {
        let taken = self.interests.values().find(|other| {
            other.id != interest.id && (other.name == interest.name || other.slug == interest.slug)
        });
        match taken {
            Some(other) => Err(StoreError::duplicate("Interest", &other.name)),
            None => Ok(()),
        }
    }

    fn check_addresses(&self, ids: &BTreeSet<AddressId>) -> Result<()> {
        match ids.iter().find(|id| !self.addresses.contains_key(id)) {
            Some(missing) => Err(StoreError::not_found("Address", missing)),
            None => Ok(()),
        }
    }
}

/// In-memory entity store for tests and the demo server.
///
/// All tables live behind a single lock, so a membership commit checks and
/// applies every write without interleaving with other writers.
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryEntityStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of mailing lists stored.
    pub async fn mailing_list_count(&self) -> usize {
        self.tables.read().await.mailing_lists.len()
    }

}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_mailing_list(&self, id: MailingListId) -> Result<Option<MailingList>> {
        Ok(self.tables.read().await.mailing_lists.get(&id).cloned())
    }

    async fn mailing_list_ids(&self) -> Result<Vec<MailingListId>> {
        let tables = self.tables.read().await;
        let mut ids: Vec<_> = tables.mailing_lists.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn mailing_lists_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> Result<Vec<MailingList>> {
        let tables = self.tables.read().await;
        let mut lists: Vec<_> = tables
            .mailing_lists
            .values()
            .filter(|list| list.targets_any(interests))
            .cloned()
            .collect();
        lists.sort_by_key(|list| list.id);
        Ok(lists)
    }

    async fn mailing_lists_containing_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<MailingList>> {
        let tables = self.tables.read().await;
        let mut lists: Vec<_> = tables
            .mailing_lists
            .values()
            .filter(|list| list.customers.contains(&customer_id))
            .cloned()
            .collect();
        lists.sort_by_key(|list| list.id);
        Ok(lists)
    }

    async fn commit_membership(&self, writes: Vec<MembershipWrite>) -> Result<()> {
        validate_membership_batch(&writes)?;

        let mut tables = self.tables.write().await;

        // Check every version before touching anything
        for write in &writes {
            if let Some(list) = tables.mailing_lists.get(&write.list_id)
                && list.version != write.expected_version
            {
                return Err(StoreError::ConcurrencyConflict {
                    list_id: write.list_id,
                    expected: write.expected_version,
                    actual: list.version,
                });
            }
        }

        let now = Utc::now();
        for write in writes {
            let Some(list) = tables.mailing_lists.get_mut(&write.list_id) else {
                tracing::debug!(list_id = %write.list_id, "skipping write for deleted mailing list");
                continue;
            };
            list.customers = write.customers;
            list.addresses = write.addresses;
            list.version = list.version.next();
            list.updated_at = now;
        }

        Ok(())
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }

    async fn customers_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> Result<Vec<Customer>> {
        let tables = self.tables.read().await;
        let mut customers: Vec<_> = tables
            .customers
            .values()
            .filter(|c| c.shares_interest(interests))
            .cloned()
            .collect();
        customers.sort_by_key(|c| c.id);
        Ok(customers)
    }

    async fn customer_ids_with_address(&self, address_id: AddressId) -> Result<Vec<CustomerId>> {
        let tables = self.tables.read().await;
        let mut ids: Vec<_> = tables
            .customers
            .values()
            .filter(|c| c.addresses.contains(&address_id))
            .map(|c| c.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_address(&self, id: AddressId) -> Result<Option<Address>> {
        Ok(self.tables.read().await.addresses.get(&id).cloned())
    }

    async fn get_addresses(&self, ids: &BTreeSet<AddressId>) -> Result<Vec<Address>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.addresses.get(id).cloned())
            .collect())
    }

    async fn save_interest(&self, interest: CustomerInterest) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_interest_unique(&interest)?;
        tables.interests.insert(interest.id, interest);
        Ok(())
    }

    async fn save_address(&self, address: Address) -> Result<()> {
        address.validate()?;
        self.tables
            .write()
            .await
            .addresses
            .insert(address.id, address);
        Ok(())
    }

    async fn save_customer(&self, customer: Customer) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_interests(&customer.interests)?;
        tables.check_addresses(&customer.addresses)?;
        tables.customers.insert(customer.id, customer);
        Ok(())
    }

    async fn create_mailing_list(&self, mut list: MailingList) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_interests(&list.interests)?;
        if tables.mailing_lists.values().any(|other| other.name == list.name) {
            return Err(StoreError::duplicate("Mailing list", &list.name));
        }
        list.customers.clear();
        list.addresses.clear();
        list.version = crate::Version::initial();
        tables.mailing_lists.insert(list.id, list);
        Ok(())
    }

    async fn set_mailing_list_interests(
        &self,
        id: MailingListId,
        interests: BTreeSet<InterestId>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.check_interests(&interests)?;
        let list = tables
            .mailing_lists
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Mailing list", id))?;
        list.interests = interests;
        list.version = list.version.next();
        list.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_mailing_list(&self, id: MailingListId) -> Result<bool> {
        Ok(self.tables.write().await.mailing_lists.remove(&id).is_some())
    }
}
