use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Address, AddressId, Customer, CustomerId, CustomerInterest, InterestId, MailingList,
    MailingListId, Result, StoreError, Version,
    store::{EntityStore, MembershipWrite, validate_membership_batch},
};

/// PostgreSQL-backed entity store implementation.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

fn uuids<T: Copy + Into<Uuid>>(ids: impl IntoIterator<Item = T>) -> Vec<Uuid> {
    ids.into_iter().map(Into::into).collect()
}

/// Maps a foreign key violation to `NotFound`, naming the violated constraint.
fn map_reference_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_foreign_key_violation()
    {
        return StoreError::not_found(
            "Referenced entity",
            db_err.constraint().unwrap_or("unknown constraint"),
        );
    }
    StoreError::Database(e)
}

/// Maps a unique violation to `Duplicate` for the record named `name`.
fn map_unique_error(e: sqlx::Error, entity: &'static str, name: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::duplicate(entity, name);
    }
    map_reference_error(e)
}

impl PostgresEntityStore {
    /// Creates a new PostgreSQL entity store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn id_set(&self, sql: &str, owner: Uuid) -> Result<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>(sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn load_mailing_list(&self, row: PgRow) -> Result<MailingList> {
        let id: Uuid = row.try_get("id")?;
        let interests = self
            .id_set(
                "SELECT interest_id FROM mailing_list_interests WHERE list_id = $1",
                id,
            )
            .await?;
        let customers = self
            .id_set(
                "SELECT customer_id FROM mailing_list_customers WHERE list_id = $1",
                id,
            )
            .await?;
        let addresses = self
            .id_set(
                "SELECT address_id FROM mailing_list_addresses WHERE list_id = $1",
                id,
            )
            .await?;

        Ok(MailingList {
            id: MailingListId::from_uuid(id),
            name: row.try_get("name")?,
            interests: interests.into_iter().map(InterestId::from_uuid).collect(),
            customers: customers.into_iter().map(CustomerId::from_uuid).collect(),
            addresses: addresses.into_iter().map(AddressId::from_uuid).collect(),
            version: Version::new(row.try_get("version")?),
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }

    async fn load_mailing_lists(&self, rows: Vec<PgRow>) -> Result<Vec<MailingList>> {
        let mut lists = Vec::with_capacity(rows.len());
        for row in rows {
            lists.push(self.load_mailing_list(row).await?);
        }
        Ok(lists)
    }

    async fn load_customer(&self, row: PgRow) -> Result<Customer> {
        let id: Uuid = row.try_get("id")?;
        let interests = self
            .id_set(
                "SELECT interest_id FROM customer_interest_links WHERE customer_id = $1",
                id,
            )
            .await?;
        let addresses = self
            .id_set(
                "SELECT address_id FROM customer_address_links WHERE customer_id = $1",
                id,
            )
            .await?;

        Ok(Customer {
            id: CustomerId::from_uuid(id),
            is_inactive: row.try_get("is_inactive")?,
            interests: interests.into_iter().map(InterestId::from_uuid).collect(),
            addresses: addresses.into_iter().map(AddressId::from_uuid).collect(),
        })
    }

    fn row_to_address(row: PgRow) -> Result<Address> {
        Ok(Address {
            id: AddressId::from_uuid(row.try_get::<Uuid, _>("id")?),
            street: row.try_get("street")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
            mailing_address: row.try_get("mailing_address")?,
        })
    }

    /// Replaces the rows of a link table owned by `owner`.
    async fn replace_links(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        owner_column: &str,
        member_column: &str,
        owner: Uuid,
        members: Vec<Uuid>,
    ) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {table} WHERE {owner_column} = $1"))
            .bind(owner)
            .execute(&mut **tx)
            .await?;

        if !members.is_empty() {
            sqlx::query(&format!(
                "INSERT INTO {table} ({owner_column}, {member_column}) SELECT $1, UNNEST($2::uuid[])"
            ))
            .bind(owner)
            .bind(members)
            .execute(&mut **tx)
            .await
            .map_err(map_reference_error)?;
        }
        Ok(())
    }
}

const LIST_COLUMNS: &str = "id, name, version, updated_at";

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn get_mailing_list(&self, id: MailingListId) -> Result<Option<MailingList>> {
        let row = sqlx::query(&format!(
            "SELECT {LIST_COLUMNS} FROM mailing_lists WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_mailing_list(row).await?)),
            None => Ok(None),
        }
    }

    async fn mailing_list_ids(&self) -> Result<Vec<MailingListId>> {
        let ids: Vec<MailingListId> =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM mailing_lists ORDER BY id")
            .fetch(&self.pool)
            .map_ok(MailingListId::from_uuid)
            .try_collect()
            .await?;
        Ok(ids)
    }

    async fn mailing_lists_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> Result<Vec<MailingList>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LIST_COLUMNS} FROM mailing_lists
            WHERE id IN (
                SELECT list_id FROM mailing_list_interests WHERE interest_id = ANY($1)
            )
            ORDER BY id
            "#
        ))
        .bind(uuids(interests.iter().copied()))
        .fetch_all(&self.pool)
        .await?;

        self.load_mailing_lists(rows).await
    }

    async fn mailing_lists_containing_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<MailingList>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LIST_COLUMNS} FROM mailing_lists
            WHERE id IN (
                SELECT list_id FROM mailing_list_customers WHERE customer_id = $1
            )
            ORDER BY id
            "#
        ))
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.load_mailing_lists(rows).await
    }

    #[tracing::instrument(skip(self, writes), fields(lists = writes.len()))]
    async fn commit_membership(&self, mut writes: Vec<MembershipWrite>) -> Result<()> {
        validate_membership_batch(&writes)?;

        // Lock rows in a fixed order so concurrent batches cannot deadlock
        writes.sort_by_key(|w| w.list_id);

        let mut tx = self.pool.begin().await?;

        for write in writes {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT version FROM mailing_lists WHERE id = $1 FOR UPDATE")
                    .bind(write.list_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;

            let Some(current) = current.map(Version::new) else {
                tracing::debug!(list_id = %write.list_id, "skipping write for deleted mailing list");
                continue;
            };

            if current != write.expected_version {
                // Dropping `tx` rolls back anything already written
                return Err(StoreError::ConcurrencyConflict {
                    list_id: write.list_id,
                    expected: write.expected_version,
                    actual: current,
                });
            }

            let list_id = write.list_id.as_uuid();
            Self::replace_links(
                &mut tx,
                "mailing_list_customers",
                "list_id",
                "customer_id",
                list_id,
                uuids(write.customers),
            )
            .await?;
            Self::replace_links(
                &mut tx,
                "mailing_list_addresses",
                "list_id",
                "address_id",
                list_id,
                uuids(write.addresses),
            )
            .await?;

            sqlx::query(
                "UPDATE mailing_lists SET version = version + 1, updated_at = NOW() WHERE id = $1",
            )
            .bind(list_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let row = sqlx::query("SELECT id, is_inactive FROM customers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.load_customer(row).await?)),
            None => Ok(None),
        }
    }

    async fn customers_with_any_interest(
        &self,
        interests: &BTreeSet<InterestId>,
    ) -> Result<Vec<Customer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, is_inactive FROM customers
            WHERE id IN (
                SELECT customer_id FROM customer_interest_links WHERE interest_id = ANY($1)
            )
            ORDER BY id
            "#,
        )
        .bind(uuids(interests.iter().copied()))
        .fetch_all(&self.pool)
        .await?;

        let mut customers = Vec::with_capacity(rows.len());
        for row in rows {
            customers.push(self.load_customer(row).await?);
        }
        Ok(customers)
    }

    async fn customer_ids_with_address(&self, address_id: AddressId) -> Result<Vec<CustomerId>> {
        let ids = self
            .id_set(
                "SELECT customer_id FROM customer_address_links WHERE address_id = $1 ORDER BY customer_id",
                address_id.as_uuid(),
            )
            .await?;
        Ok(ids.into_iter().map(CustomerId::from_uuid).collect())
    }

    async fn get_address(&self, id: AddressId) -> Result<Option<Address>> {
        let row = sqlx::query(
            "SELECT id, street, city, state, zip_code, mailing_address FROM addresses WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_address).transpose()
    }

    async fn get_addresses(&self, ids: &BTreeSet<AddressId>) -> Result<Vec<Address>> {
        let rows = sqlx::query(
            r#"
            SELECT id, street, city, state, zip_code, mailing_address
            FROM addresses
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(uuids(ids.iter().copied()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_address).collect()
    }

    #[tracing::instrument(skip(self, interest), fields(interest_id = %interest.id))]
    async fn save_interest(&self, interest: CustomerInterest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customer_interests (id, name, slug)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, slug = EXCLUDED.slug
            "#,
        )
        .bind(interest.id.as_uuid())
        .bind(&interest.name)
        .bind(&interest.slug)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_error(e, "Interest", &interest.name))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, address), fields(address_id = %address.id))]
    async fn save_address(&self, address: Address) -> Result<()> {
        address.validate()?;
        sqlx::query(
            r#"
            INSERT INTO addresses (id, street, city, state, zip_code, mailing_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                street = EXCLUDED.street,
                city = EXCLUDED.city,
                state = EXCLUDED.state,
                zip_code = EXCLUDED.zip_code,
                mailing_address = EXCLUDED.mailing_address
            "#,
        )
        .bind(address.id.as_uuid())
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.zip_code)
        .bind(address.mailing_address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, customer), fields(customer_id = %customer.id))]
    async fn save_customer(&self, customer: Customer) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let id = customer.id.as_uuid();

        sqlx::query(
            r#"
            INSERT INTO customers (id, is_inactive) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET is_inactive = EXCLUDED.is_inactive
            "#,
        )
        .bind(id)
        .bind(customer.is_inactive)
        .execute(&mut *tx)
        .await?;

        Self::replace_links(
            &mut tx,
            "customer_interest_links",
            "customer_id",
            "interest_id",
            id,
            uuids(customer.interests),
        )
        .await?;
        Self::replace_links(
            &mut tx,
            "customer_address_links",
            "customer_id",
            "address_id",
            id,
            uuids(customer.addresses),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, list), fields(list_id = %list.id))]
    async fn create_mailing_list(&self, list: MailingList) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let id = list.id.as_uuid();

        sqlx::query("INSERT INTO mailing_lists (id, name, version, updated_at) VALUES ($1, $2, 0, $3)")
            .bind(id)
            .bind(&list.name)
            .bind(list.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_unique_error(e, "Mailing list", &list.name))?;

        Self::replace_links(
            &mut tx,
            "mailing_list_interests",
            "list_id",
            "interest_id",
            id,
            uuids(list.interests),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, interests))]
    async fn set_mailing_list_interests(
        &self,
        id: MailingListId,
        interests: BTreeSet<InterestId>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Changing the input invalidates any membership computed from the old
        // interests, so it bumps the version like a derived write does.
        let updated = sqlx::query(
            "UPDATE mailing_lists SET version = version + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("Mailing list", id));
        }

        Self::replace_links(
            &mut tx,
            "mailing_list_interests",
            "list_id",
            "interest_id",
            id.as_uuid(),
            uuids(interests),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_mailing_list(&self, id: MailingListId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM mailing_lists WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }
}
