//! Customer interest endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use entity_store::{CustomerInterest, EntityStore};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateInterestRequest {
    pub name: String,
}

/// POST /interests — create a named interest.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateInterestRequest>,
) -> Result<(StatusCode, Json<CustomerInterest>), ApiError> {
    let interest = CustomerInterest::new(req.name)?;
    state.store().save_interest(interest.clone()).await?;
    Ok((StatusCode::CREATED, Json(interest)))
}
