//! Mailing list endpoints, plus rebuild and audit of derived membership.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{InterestId, MailingListId};
use entity_store::{EntityStore, MailingList};
use membership::{MembershipDrift, SyncReport};
use serde::{Deserialize, Serialize};

use super::{AppState, parse_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateMailingListRequest {
    pub name: String,
    #[serde(default)]
    pub interests: BTreeSet<InterestId>,
}

#[derive(Deserialize)]
pub struct SetInterestsRequest {
    pub interests: BTreeSet<InterestId>,
}

// -- Response types --

#[derive(Serialize)]
pub struct MailingListResponse {
    pub mailing_list: MailingList,
    pub sync: SyncReport,
}

// -- Handlers --

/// POST /mailing-lists — create a list and populate it.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateMailingListRequest>,
) -> Result<(StatusCode, Json<MailingListResponse>), ApiError> {
    let list = MailingList::new(req.name, req.interests)?;
    let list_id = list.id;
    state.store().create_mailing_list(list).await?;

    let sync = state.sync.on_mailing_list_interests_changed(list_id).await?;
    let mailing_list = load(&state, list_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(MailingListResponse { mailing_list, sync }),
    ))
}

/// GET /mailing-lists/{id} — a list with its derived membership.
#[tracing::instrument(skip(state))]
pub async fn get<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<MailingList>, ApiError> {
    let list_id = parse_id(&id, "mailing list")?;
    Ok(Json(load(&state, list_id).await?))
}

/// PUT /mailing-lists/{id}/interests — replace the targeted interests.
#[tracing::instrument(skip(state, req))]
pub async fn set_interests<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SetInterestsRequest>,
) -> Result<Json<MailingListResponse>, ApiError> {
    let list_id = parse_id(&id, "mailing list")?;
    state
        .store()
        .set_mailing_list_interests(list_id, req.interests)
        .await?;

    let sync = state.sync.on_mailing_list_interests_changed(list_id).await?;
    let mailing_list = load(&state, list_id).await?;
    Ok(Json(MailingListResponse { mailing_list, sync }))
}

/// GET /mailing-lists/{id}/audit — differences from a fresh resolution.
#[tracing::instrument(skip(state))]
pub async fn audit<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<MembershipDrift>, ApiError> {
    let list_id = parse_id(&id, "mailing list")?;
    let drift = state
        .sync
        .audit(list_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Mailing list {id} not found")))?;
    Ok(Json(drift))
}

/// POST /mailing-lists/rebuild — recompute every list from scratch.
#[tracing::instrument(skip(state))]
pub async fn rebuild<S: EntityStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<SyncReport>, ApiError> {
    Ok(Json(state.sync.rebuild_all().await?))
}

async fn load<S: EntityStore>(
    state: &AppState<S>,
    list_id: MailingListId,
) -> Result<MailingList, ApiError> {
    state
        .store()
        .get_mailing_list(list_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Mailing list {list_id} not found")))
}
