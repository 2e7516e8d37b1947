//! Entity records owned by the surrounding application.
//!
//! Many-to-many relationships are held as id sets rather than object graphs,
//! so a mailing list never owns the customers it lists and a customer never
//! points back at the lists it belongs to.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::{AddressId, CustomerId, InterestId, MailingListId, Version};

const NAME_MIN: usize = 4;
const NAME_MAX: usize = 50;

/// A topic a customer can be interested in and a mailing list can target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInterest {
    pub id: InterestId,
    pub name: String,
    pub slug: String,
}

impl CustomerInterest {
    /// Creates an interest after validating its name.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name(
            &name,
            ValidationError::InterestNameLength,
            ValidationError::InterestNameCharacter,
        )?;
        Ok(Self {
            id: InterestId::new(),
            slug: slugify(&name),
            name,
        })
    }
}

/// Interest and mailing list names: 4-50 ASCII letters, digits, spaces or dashes.
fn validate_name(
    name: &str,
    length: fn(usize) -> ValidationError,
    character: fn(char) -> ValidationError,
) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&len) {
        return Err(length(len));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == ' ' || *c == '-'))
    {
        return Err(character(bad));
    }
    Ok(())
}

/// Lowercases and joins words with single dashes ("Tree  Sale" -> "tree-sale").
pub fn slugify(name: &str) -> String {
    name.split(|c: char| c == ' ' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// A postal address. Only addresses flagged `mailing_address` are used for
/// mailings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub street: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub mailing_address: bool,
}

impl Address {
    /// Creates a mailing address.
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip_code: impl Into<String>,
    ) -> Self {
        Self {
            id: AddressId::new(),
            street: Some(street.into()),
            city: city.into(),
            state: state.into(),
            zip_code: zip_code.into(),
            mailing_address: true,
        }
    }

    /// Sets the mailing flag.
    pub fn with_mailing_address(mut self, mailing_address: bool) -> Self {
        self.mailing_address = mailing_address;
        self
    }

    /// Checks the street requirement for mailing addresses.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_street = self
            .street
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if self.mailing_address && !has_street {
            return Err(ValidationError::StreetRequired);
        }
        Ok(())
    }
}

/// A customer with its interests and addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub is_inactive: bool,
    pub interests: BTreeSet<InterestId>,
    pub addresses: BTreeSet<AddressId>,
}

impl Customer {
    /// Creates an active customer with no interests or addresses.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interest(mut self, interest: InterestId) -> Self {
        self.interests.insert(interest);
        self
    }

    pub fn with_address(mut self, address: AddressId) -> Self {
        self.addresses.insert(address);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_inactive = true;
        self
    }

    /// Returns true if the customer shares at least one interest with `interests`.
    pub fn shares_interest(&self, interests: &BTreeSet<InterestId>) -> bool {
        !self.interests.is_disjoint(interests)
    }
}

/// A mailing list.
///
/// `interests` is the input set; `customers` and `addresses` are derived by
/// the membership engine and must not be written by anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingList {
    pub id: MailingListId,
    pub name: String,
    pub interests: BTreeSet<InterestId>,
    pub customers: BTreeSet<CustomerId>,
    pub addresses: BTreeSet<AddressId>,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl MailingList {
    /// Creates an empty mailing list targeting `interests`.
    pub fn new(
        name: impl Into<String>,
        interests: impl IntoIterator<Item = InterestId>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyListName);
        }
        validate_name(
            &name,
            ValidationError::ListNameLength,
            ValidationError::ListNameCharacter,
        )?;
        Ok(Self {
            id: MailingListId::new(),
            name,
            interests: interests.into_iter().collect(),
            customers: BTreeSet::new(),
            addresses: BTreeSet::new(),
            version: Version::initial(),
            updated_at: Utc::now(),
        })
    }

    /// Returns true if the list targets at least one of `interests`.
    pub fn targets_any(&self, interests: &BTreeSet<InterestId>) -> bool {
        !self.interests.is_disjoint(interests)
    }
}
