//! Customer endpoints. Interest and activity changes are pushed to the
//! membership engine as explicit deltas.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{AddressId, CustomerId, InterestId};
use entity_store::{Customer, EntityStore, EntityStoreExt};
use membership::SyncReport;
use serde::{Deserialize, Serialize};

use super::{AppState, parse_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateCustomerRequest {
    #[serde(default)]
    pub interests: BTreeSet<InterestId>,
    #[serde(default)]
    pub addresses: BTreeSet<AddressId>,
    #[serde(default)]
    pub is_inactive: bool,
}

#[derive(Deserialize)]
pub struct InterestDeltaRequest {
    #[serde(default)]
    pub added: BTreeSet<InterestId>,
    #[serde(default)]
    pub removed: BTreeSet<InterestId>,
}

#[derive(Deserialize)]
pub struct ActivityRequest {
    pub is_inactive: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct CustomerResponse {
    pub customer: Customer,
    pub sync: SyncReport,
}

// -- Handlers --

/// POST /customers — create a customer and add it to matching lists.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<CustomerResponse>), ApiError> {
    let customer = Customer {
        id: CustomerId::new(),
        is_inactive: req.is_inactive,
        interests: req.interests,
        addresses: req.addresses,
    };
    state.store().save_customer(customer.clone()).await?;

    let sync = state
        .sync
        .on_customer_interests_changed(customer.id, customer.interests.clone(), BTreeSet::new())
        .await?;

    Ok((StatusCode::CREATED, Json(CustomerResponse { customer, sync })))
}

/// GET /customers/{id} — load a customer.
#[tracing::instrument(skip(state))]
pub async fn get<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Customer>, ApiError> {
    let customer_id: CustomerId = parse_id(&id, "customer")?;
    let customer = state
        .store()
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Customer {id} not found")))?;
    Ok(Json(customer))
}

/// PATCH /customers/{id}/interests — add and remove interests.
#[tracing::instrument(skip(state, req))]
pub async fn change_interests<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<InterestDeltaRequest>,
) -> Result<Json<CustomerResponse>, ApiError> {
    let customer_id = parse_id(&id, "customer")?;
    if let Some(both) = req.added.intersection(&req.removed).next() {
        return Err(ApiError::BadRequest(format!(
            "Interest {both} is both added and removed"
        )));
    }

    let mut customer = state.store().require_customer(customer_id).await?;
    customer.interests.extend(req.added.iter().copied());
    customer.interests.retain(|i| !req.removed.contains(i));
    state.store().save_customer(customer.clone()).await?;

    let sync = state
        .sync
        .on_customer_interests_changed(customer_id, req.added, req.removed)
        .await?;

    Ok(Json(CustomerResponse { customer, sync }))
}

/// PUT /customers/{id}/active — mark a customer active or inactive.
#[tracing::instrument(skip(state, req))]
pub async fn set_activity<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ActivityRequest>,
) -> Result<Json<CustomerResponse>, ApiError> {
    let customer_id = parse_id(&id, "customer")?;
    let mut customer = state.store().require_customer(customer_id).await?;
    customer.is_inactive = req.is_inactive;
    state.store().save_customer(customer.clone()).await?;

    // An empty delta re-checks eligibility on every list the customer is on
    // or could join.
    let sync = state
        .sync
        .on_customer_interests_changed(customer_id, BTreeSet::new(), BTreeSet::new())
        .await?;

    Ok(Json(CustomerResponse { customer, sync }))
}
