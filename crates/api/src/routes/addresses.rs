//! Address endpoints. Saving an address re-checks every customer holding it.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AddressId;
use entity_store::{Address, EntityStore};
use membership::SyncReport;
use serde::{Deserialize, Serialize};

use super::{AppState, parse_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct AddressRequest {
    pub street: Option<String>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default = "default_mailing")]
    pub mailing_address: bool,
}

fn default_mailing() -> bool {
    true
}

impl AddressRequest {
    fn into_address(self, id: AddressId) -> Address {
        Address {
            id,
            street: self.street,
            city: self.city,
            state: self.state,
            zip_code: self.zip_code,
            mailing_address: self.mailing_address,
        }
    }
}

#[derive(Serialize)]
pub struct AddressResponse {
    pub address: Address,
    pub sync: SyncReport,
}

/// POST /addresses — create an address.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<AddressRequest>,
) -> Result<(StatusCode, Json<AddressResponse>), ApiError> {
    let response = save(&state, req.into_address(AddressId::new())).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /addresses/{id} — create or replace an address.
#[tracing::instrument(skip(state, req))]
pub async fn update<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AddressRequest>,
) -> Result<Json<AddressResponse>, ApiError> {
    let address_id = parse_id(&id, "address")?;
    let response = save(&state, req.into_address(address_id)).await?;
    Ok(Json(response))
}

async fn save<S: EntityStore>(
    state: &AppState<S>,
    address: Address,
) -> Result<AddressResponse, ApiError> {
    state.store().save_address(address.clone()).await?;
    let sync = state.sync.on_address_saved(address.id).await?;
    Ok(AddressResponse { address, sync })
}
