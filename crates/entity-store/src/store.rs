use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::{
    Address, AddressId, Customer, CustomerId, CustomerInterest, InterestId, MailingList,
    MailingListId, Result, StoreError, Version,
};

/// A replacement of one mailing list's derived membership.
///
/// The write only applies if the list is still at `expected_version`;
/// otherwise the whole batch it belongs to is rejected with
/// [`StoreError::ConcurrencyConflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipWrite {
    pub list_id: MailingListId,
    pub expected_version: Version,
    pub customers: BTreeSet<CustomerId>,
    pub addresses: BTreeSet<AddressId>,
}

impl MembershipWrite {
    /// Creates a write replacing the derived sets of `list`, expecting the
    /// version it was read at.
    pub fn replace(
        list: &MailingList,
        customers: BTreeSet<CustomerId>,
        addresses: BTreeSet<AddressId>,
    ) -> Self {
        Self {
            list_id: list.id,
            expected_version: list.version,
            customers,
            addresses,
        }
    }
}

/// Storage for the entities the membership engine reads, and for the derived
/// sets it writes.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EntityStore: Send + Sync {
    // -- Mailing lists --

    /// Retrieves a mailing list. Returns None if it does not exist.
    async fn get_mailing_list(&self, id: MailingListId) -> Result<Option<MailingList>>;

    /// Returns the ids of every mailing list.
    async fn mailing_list_ids(&self) -> Result<Vec<MailingListId>>;

    /// Returns every mailing list targeting at least one of `interests`.
    async fn mailing_lists_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> Result<Vec<MailingList>>;

    /// Returns every mailing list whose derived customers include `customer_id`.
    async fn mailing_lists_containing_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<MailingList>>;

    /// Atomically replaces the derived membership of several lists.
    ///
    /// Either every write is applied or none is. Writes for lists that no
    /// longer exist are skipped. Each applied write increments the list's
    /// version.
    async fn commit_membership(&self, writes: Vec<MembershipWrite>) -> Result<()>;

    // -- Customers --

    /// Retrieves a customer. Returns None if it does not exist.
    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>>;

    /// Returns every customer holding at least one of `interests`.
    async fn customers_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> Result<Vec<Customer>>;

    /// Returns the ids of every customer associated with `address_id`.
    async fn customer_ids_with_address(&self, address_id: AddressId) -> Result<Vec<CustomerId>>;

    // -- Addresses --

    /// Retrieves an address. Returns None if it does not exist.
    async fn get_address(&self, id: AddressId) -> Result<Option<Address>>;

    /// Retrieves the given addresses. Unknown ids are ignored.
    async fn get_addresses(&self, ids: &BTreeSet<AddressId>) -> Result<Vec<Address>>;

    // -- Source mutations (owned by the CRUD layer) --

    /// Inserts or updates an interest. Fails with `Duplicate` if another
    /// interest has the same name or slug.
    async fn save_interest(&self, interest: CustomerInterest) -> Result<()>;

    /// Inserts or updates an address after validating it.
    async fn save_address(&self, address: Address) -> Result<()>;

    /// Inserts or updates a customer, including its interest and address sets.
    async fn save_customer(&self, customer: Customer) -> Result<()>;

    /// Creates a mailing list with empty derived membership. Fails with
    /// `Duplicate` if the name is taken.
    async fn create_mailing_list(&self, list: MailingList) -> Result<()>;

    /// Replaces a mailing list's interest set and bumps its version, so
    /// membership planned against the old interests no longer commits.
    /// Derived sets are left untouched.
    async fn set_mailing_list_interests(
        &self,
        id: MailingListId,
        interests: BTreeSet<InterestId>,
    ) -> Result<()>;

    /// Deletes a mailing list. Returns false if it did not exist.
    async fn delete_mailing_list(&self, id: MailingListId) -> Result<bool>;
}

/// Extension trait providing convenience methods for entity stores.
#[async_trait]
pub trait EntityStoreExt: EntityStore {
    /// Retrieves a mailing list, failing with `NotFound` if it is missing.
    async fn require_mailing_list(&self, id: MailingListId) -> Result<MailingList> {
        self.get_mailing_list(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Mailing list", id))
    }

    /// Retrieves a customer, failing with `NotFound` if it is missing.
    async fn require_customer(&self, id: CustomerId) -> Result<Customer> {
        self.get_customer(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Customer", id))
    }

    /// Retrieves the customers associated with `address_id`.
    async fn customers_with_address(&self, address_id: AddressId) -> Result<Vec<Customer>> {
        let mut customers = Vec::new();
        for id in self.customer_ids_with_address(address_id).await? {
            if let Some(customer) = self.get_customer(id).await? {
                customers.push(customer);
            }
        }
        Ok(customers)
    }
}

// Blanket implementation for all EntityStore implementations
impl<T: EntityStore + ?Sized> EntityStoreExt for T {}

/// Checks that a batch of membership writes targets each list at most once.
pub fn validate_membership_batch(writes: &[MembershipWrite]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for write in writes {
        if !seen.insert(write.list_id) {
            return Err(StoreError::DuplicateWrite(write.list_id));
        }
    }
    Ok(())
}
