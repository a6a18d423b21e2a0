//! Admin moderation handlers
//!
//! Every route requires a token belonging to an admin user; the check itself
//! lives in the messaging service so socket and HTTP paths agree.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{error::Result, models::*, AppState};

use super::{ok, ApiJson, ApiPath, ApiQuery, AuthUser};

pub async fn list_by_label(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    ApiQuery(params): ApiQuery<LabelFilterParams>,
) -> Result<Json<Value>> {
    let page = state.messaging.filter_by_label(&admin, params).await?;
    Ok(ok("Messages retrieved", page))
}

pub async fn get_record(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    ApiPath(message_id): ApiPath<String>,
) -> Result<Json<Value>> {
    let record = state.messaging.moderation_record(&admin, &message_id).await?;
    Ok(ok("Moderation record retrieved", record))
}

pub async fn add_label(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<LabelRequest>,
) -> Result<Json<Value>> {
    let labels = state.messaging.add_label(&admin, &message_id, req).await?;
    tracing::info!(message_id = %message_id, admin = %admin.id, "Label added");
    Ok(ok("Label added", json!({ "messageId": message_id, "adminLabels": labels })))
}

pub async fn remove_label(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    ApiPath((message_id, label)): ApiPath<(String, String)>,
) -> Result<Json<Value>> {
    let labels = state.messaging.remove_label(&admin, &message_id, &label).await?;
    Ok(ok("Label removed", json!({ "messageId": message_id, "adminLabels": labels })))
}

pub async fn add_note(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<NoteRequest>,
) -> Result<Json<Value>> {
    let note = state.messaging.add_note(&admin, &message_id, req).await?;
    Ok(ok("Note added", note))
}
