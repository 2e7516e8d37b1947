//! Snapshot of the source facts a handler computes against.

use std::collections::{BTreeSet, HashMap};

use common::{AddressId, CustomerId};
use entity_store::{Address, Customer, EntityStore};

use crate::Result;
use crate::eligibility::is_eligible;

/// The customers, addresses and address holders one computation needs.
///
/// Handlers load a view once per attempt so every decision in that attempt
/// sees the same source state.
#[derive(Debug, Clone, Default)]
pub struct SourceView {
    customers: HashMap<CustomerId, Customer>,
    addresses: HashMap<AddressId, Address>,
    holders: HashMap<AddressId, BTreeSet<CustomerId>>,
}

impl SourceView {
    /// Creates an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a view over `customers` and their addresses.
    ///
    /// With `with_holders`, also loads which customers hold each of those
    /// addresses, which incremental removals need to keep shared addresses.
    pub async fn load<S: EntityStore + ?Sized>(
        store: &S,
        customers: Vec<Customer>,
        with_holders: bool,
    ) -> Result<Self> {
        let address_ids: BTreeSet<AddressId> = customers
            .iter()
            .flat_map(|c| c.addresses.iter().copied())
            .collect();

        let mut view = Self::new();
        for address in store.get_addresses(&address_ids).await? {
            view.insert_address(address);
        }
        if with_holders {
            for &address_id in &address_ids {
                let holders = store.customer_ids_with_address(address_id).await?;
                view.insert_holders(address_id, holders);
            }
        }
        for customer in customers {
            view.insert_customer(customer);
        }
        Ok(view)
    }

    pub fn insert_customer(&mut self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    pub fn insert_address(&mut self, address: Address) {
        self.addresses.insert(address.id, address);
    }

    pub fn insert_holders(
        &mut self,
        address_id: AddressId,
        holders: impl IntoIterator<Item = CustomerId>,
    ) {
        self.holders
            .entry(address_id)
            .or_default()
            .extend(holders);
    }

    pub fn customer(&self, id: CustomerId) -> Option<&Customer> {
        self.customers.get(&id)
    }

    pub fn customers(&self) -> impl Iterator<Item = &Customer> {
        self.customers.values()
    }

    /// Returns true if the address is known and flagged as a mailing address.
    pub fn is_mailing_address(&self, id: AddressId) -> bool {
        self.addresses.get(&id).is_some_and(|a| a.mailing_address)
    }

    /// The customer's addresses that are currently flagged as mailing addresses.
    pub fn mailing_addresses<'a>(
        &'a self,
        customer: &'a Customer,
    ) -> impl Iterator<Item = AddressId> + 'a {
        customer
            .addresses
            .iter()
            .copied()
            .filter(move |id| self.is_mailing_address(*id))
    }

    /// Customers associated with `address_id`, as loaded.
    pub fn holders(&self, address_id: AddressId) -> impl Iterator<Item = CustomerId> + '_ {
        self.holders.get(&address_id).into_iter().flatten().copied()
    }

    /// Applies the eligibility predicate using this view's addresses.
    pub fn is_eligible(&self, customer: &Customer) -> bool {
        is_eligible(customer, |id| self.is_mailing_address(id))
    }
}
