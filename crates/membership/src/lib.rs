//! Mailing-list membership synchronization.
//!
//! A mailing list stores the interests it targets together with two derived
//! sets: the customers that should receive it and the addresses to mail them
//! at. This crate keeps those derived sets equal to what the source facts
//! imply:
//! - [`is_eligible`] decides whether a customer may receive mail at all
//! - [`resolve_membership`] recomputes a list from scratch
//! - the [`handlers`] update affected lists after each kind of source change
//! - [`MembershipSync`] runs handlers with optimistic retries, and can rebuild
//!   or audit every list

pub mod audit;
pub mod dispatcher;
pub mod eligibility;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod reconcile;
pub mod resolver;
pub mod source;

pub use audit::MembershipDrift;
pub use dispatcher::{MembershipSync, SourceChange, SyncOptions};
pub use eligibility::is_eligible;
pub use error::{Result, SyncError};
pub use handler::{ChangeHandler, SyncPlan, SyncReport};
pub use handlers::{
    AddressValidityHandler, CustomerInterestsChange, CustomerInterestsHandler,
    MailingListInterestsHandler,
};
pub use reconcile::reconcile_customer;
pub use resolver::{Membership, resolve_list, resolve_membership};
pub use source::SourceView;
