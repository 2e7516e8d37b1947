pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use common::{AddressId, CustomerId, InterestId, MailingListId, Version};
pub use error::{Result, StoreError, ValidationError};
pub use memory::InMemoryEntityStore;
pub use model::{Address, Customer, CustomerInterest, MailingList};
pub use postgres::PostgresEntityStore;
pub use store::{EntityStore, EntityStoreExt, MembershipWrite};
