//! Message handlers

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::{
    error::{AppError, Result},
    messaging::{AudioUpload, FileUpload, UploadedPart},
    models::*,
    AppState,
};

use super::{ok, ApiJson, ApiPath, ApiQuery, AuthUser};

fn multipart_error(e: impl std::fmt::Display) -> AppError {
    AppError::validation(format!("Failed to read multipart: {}", e))
}

async fn read_text(field: Field<'_>) -> Result<Option<String>> {
    let text = field.text().await.map_err(multipart_error)?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

async fn read_file(field: Field<'_>, max_size: usize) -> Result<UploadedPart> {
    let filename = field.file_name().unwrap_or("unnamed").to_string();
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    let data = field.bytes().await.map_err(multipart_error)?;
    if data.len() > max_size {
        return Err(AppError::FileTooLarge);
    }

    Ok(UploadedPart { filename, mime_type, data })
}

pub async fn conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiQuery(params): ApiQuery<ConversationParams>,
) -> Result<Json<Value>> {
    let page = state.messaging.conversations(&user.id, params).await?;
    Ok(ok("Conversations retrieved", page))
}

pub async fn history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath((chat_type, chat_id)): ApiPath<(ChatType, String)>,
    ApiQuery(params): ApiQuery<HistoryParams>,
) -> Result<Json<Value>> {
    let page = state.messaging.history(&user.id, chat_type, &chat_id, params).await?;
    Ok(ok("Messages retrieved", page))
}

pub async fn send(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<Json<Value>> {
    let message = state.messaging.send_message(&user, req).await?;
    Ok(ok("Message sent", message))
}

/// Multipart fields: `recipientId` | `eventId`, optional `body` and
/// `replyTo`, and one or more `files`.
pub async fn send_with_files(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    let max_size = state.config.limits.max_file_size_bytes();
    let mut upload = FileUpload::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "recipientId" => upload.recipient_id = read_text(field).await?,
            "eventId" => upload.event_id = read_text(field).await?,
            "body" => upload.body = read_text(field).await?,
            "replyTo" => upload.reply_to = read_text(field).await?,
            "files" | "file" => upload.files.push(read_file(field, max_size).await?),
            _ => {}
        }
    }

    let message = state.messaging.send_with_files(&user, upload).await?;
    Ok(ok("Message sent", message))
}

/// Multipart fields: `recipientId` | `eventId`, `audio`, optional
/// `duration` (seconds), `waveform` (JSON array) and `replyTo`.
pub async fn send_audio(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Value>> {
    let max_size = state.config.limits.max_file_size_bytes();
    let mut upload = AudioUpload::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "recipientId" => upload.recipient_id = read_text(field).await?,
            "eventId" => upload.event_id = read_text(field).await?,
            "replyTo" => upload.reply_to = read_text(field).await?,
            "duration" => {
                upload.duration = match read_text(field).await? {
                    Some(raw) => Some(
                        raw.parse::<f64>()
                            .map_err(|_| AppError::validation("duration must be a number"))?,
                    ),
                    None => None,
                };
            }
            "waveform" => {
                upload.waveform = match read_text(field).await? {
                    Some(raw) => Some(
                        serde_json::from_str::<Vec<f32>>(&raw)
                            .map_err(|_| AppError::validation("waveform must be a JSON array of numbers"))?,
                    ),
                    None => None,
                };
            }
            "audio" | "file" => upload.file = Some(read_file(field, max_size).await?),
            _ => {}
        }
    }

    let message = state.messaging.send_audio(&user, upload).await?;
    Ok(ok("Voice message sent", message))
}

pub async fn react(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<ReactRequest>,
) -> Result<Json<Value>> {
    let reactions = state.messaging.react(&user.id, &message_id, &req.emoji).await?;
    Ok(ok("Reaction added", json!({ "messageId": message_id, "reactions": reactions })))
}

pub async fn unreact(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(message_id): ApiPath<String>,
) -> Result<Json<Value>> {
    let reactions = state.messaging.unreact(&user.id, &message_id).await?;
    Ok(ok("Reaction removed", json!({ "messageId": message_id, "reactions": reactions })))
}

pub async fn reply(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<ReplyRequest>,
) -> Result<Json<Value>> {
    let message = state.messaging.reply(&user, &message_id, req).await?;
    Ok(ok("Reply sent", message))
}

pub async fn forward(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<ForwardRequest>,
) -> Result<Json<Value>> {
    let outcome = state.messaging.forward(&user, &message_id, req).await?;
    let summary = format!("Message forwarded to {} chat(s)", outcome.forwarded);
    Ok(ok(&summary, outcome))
}

pub async fn star(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(message_id): ApiPath<String>,
) -> Result<Json<Value>> {
    let outcome = state.messaging.toggle_star(&user.id, &message_id).await?;
    let summary = if outcome.starred { "Message starred" } else { "Message unstarred" };
    Ok(ok(summary, outcome))
}

/// Body is optional; without it the message is removed for the caller only.
/// A body that is present must be a valid `DeleteRequest`.
pub async fn delete(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(message_id): ApiPath<String>,
    body: Bytes,
) -> Result<Json<Value>> {
    let for_everyone = if body.iter().all(u8::is_ascii_whitespace) {
        false
    } else {
        serde_json::from_slice::<DeleteRequest>(&body)
            .map_err(|e| AppError::validation(format!("Invalid delete request: {}", e)))?
            .delete_for_everyone
    };
    state.messaging.delete(&user.id, &message_id, for_everyone).await?;
    Ok(ok(
        "Message deleted",
        json!({ "messageId": message_id, "deletedForEveryone": for_everyone }),
    ))
}

pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiJson(req): ApiJson<MarkReadRequest>,
) -> Result<Json<Value>> {
    let ids = state.messaging.mark_as_read(&user.id, req).await?;
    Ok(ok("Messages marked as read", json!({ "count": ids.len(), "messageIds": ids })))
}

pub async fn search(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> Result<Json<Value>> {
    let messages = state.messaging.search(&user.id, params).await?;
    Ok(ok("Search results", json!({ "count": messages.len(), "messages": messages })))
}

pub async fn starred(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> Result<Json<Value>> {
    let page = state.messaging.starred(&user.id, params).await?;
    Ok(ok("Starred messages retrieved", page))
}

pub async fn online(
    State(state): State<AppState>,
    _auth: AuthUser,
    ApiQuery(params): ApiQuery<OnlineParams>,
) -> Result<Json<Value>> {
    let statuses = state.messaging.online_status(params);
    Ok(ok("Online status retrieved", statuses))
}

pub async fn stats(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<Json<Value>> {
    let stats = state.messaging.stats(&user.id).await?;
    Ok(ok("Message stats retrieved", stats))
}

pub async fn report(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiPath(message_id): ApiPath<String>,
    ApiJson(req): ApiJson<ReportRequest>,
) -> Result<Json<Value>> {
    let report_count = state.messaging.report(&user, &message_id, req).await?;
    Ok(ok("Message reported", json!({ "messageId": message_id, "reportCount": report_count })))
}
