//! Creating messages: send, uploads, reply, forward and the socket relay

use std::collections::HashSet;

use bytes::Bytes;
use chrono::Utc;

use super::MessagingService;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::presence::ConnectionId;
use crate::uploads::{StoredFile, UploadCategory};
use crate::websocket::RoomAddress;

/// One file part of a multipart request
#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub filename: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Parsed `send-with-files` form
#[derive(Debug, Clone, Default)]
pub struct FileUpload {
    pub recipient_id: Option<String>,
    pub event_id: Option<String>,
    pub body: Option<String>,
    pub reply_to: Option<String>,
    pub files: Vec<UploadedPart>,
}

/// Parsed `send-audio` form
#[derive(Debug, Clone, Default)]
pub struct AudioUpload {
    pub recipient_id: Option<String>,
    pub event_id: Option<String>,
    pub reply_to: Option<String>,
    pub duration: Option<f64>,
    pub waveform: Option<Vec<f32>>,
    pub file: Option<UploadedPart>,
}

/// No attachments is text, one is that attachment's kind, several is `multiple`
fn infer_kind(attachments: &[Attachment]) -> MessageKind {
    match attachments {
        [] => MessageKind::Text,
        [single] => single.kind.into(),
        _ => MessageKind::Multiple,
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(REPLY_SNIPPET_CHARS).collect()
}

impl MessagingService {
    // ========================================================================
    // Send
    // ========================================================================

    pub async fn send_message(&self, sender: &User, req: SendMessageRequest) -> Result<MessageView> {
        let target = ChatTarget::from_parts(req.recipient_id.as_deref(), req.event_id.as_deref())?;
        self.check_attachment_refs(&req.attachments)?;

        let kind = match req.message_type {
            Some(kind) if kind.is_server_generated() => {
                return Err(AppError::validation(format!("Messages of type {} cannot be sent", kind)));
            }
            Some(kind) => kind,
            None => infer_kind(&req.attachments),
        };

        self.create_and_publish(
            sender,
            target,
            req.body.unwrap_or_default(),
            kind,
            req.attachments,
            req.reply_to.as_deref(),
        )
        .await
    }

    /// Store the uploaded files, then create one message referencing all of
    /// them. Files are removed again if the message cannot be created.
    pub async fn send_with_files(&self, sender: &User, upload: FileUpload) -> Result<MessageView> {
        let target = ChatTarget::from_parts(upload.recipient_id.as_deref(), upload.event_id.as_deref())?;
        if upload.files.is_empty() {
            return Err(AppError::validation("At least one file is required"));
        }
        if upload.files.len() > self.limits.max_attachments {
            return Err(AppError::validation(format!(
                "At most {} attachments per message",
                self.limits.max_attachments
            )));
        }
        self.check_target(&sender.id, &target).await?;

        let mut stored: Vec<StoredFile> = Vec::with_capacity(upload.files.len());
        for part in &upload.files {
            match self
                .uploads
                .store(UploadCategory::Messages, &part.filename, &part.mime_type, &part.data)
                .await
            {
                Ok(file) => stored.push(file),
                Err(e) => {
                    self.uploads.discard(&stored).await;
                    return Err(e);
                }
            }
        }

        let attachments: Vec<Attachment> = stored
            .iter()
            .map(|file| Attachment {
                kind: AttachmentKind::from_mime(&file.mime_type),
                url: file.url.clone(),
                filename: file.filename.clone(),
                size: file.size,
                mime_type: file.mime_type.clone(),
                duration: None,
                waveform: None,
                thumbnail: None,
            })
            .collect();
        let kind = infer_kind(&attachments);

        let result = self
            .create_and_publish(
                sender,
                target,
                upload.body.unwrap_or_default(),
                kind,
                attachments,
                upload.reply_to.as_deref(),
            )
            .await;

        if result.is_err() {
            self.uploads.discard(&stored).await;
        }
        result
    }

    /// Voice recording: a single audio file stored under `voice/`
    pub async fn send_audio(&self, sender: &User, upload: AudioUpload) -> Result<MessageView> {
        let target = ChatTarget::from_parts(upload.recipient_id.as_deref(), upload.event_id.as_deref())?;
        let part = upload
            .file
            .ok_or_else(|| AppError::validation("An audio file is required"))?;
        if !part.mime_type.starts_with("audio/") && !part.mime_type.starts_with("video/webm") {
            return Err(AppError::validation("Voice messages must be audio"));
        }
        self.check_target(&sender.id, &target).await?;

        let file = self
            .uploads
            .store(UploadCategory::Voice, &part.filename, &part.mime_type, &part.data)
            .await?;

        let attachment = Attachment {
            kind: AttachmentKind::Voice,
            url: file.url.clone(),
            filename: file.filename.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            duration: upload.duration.filter(|d| d.is_finite() && *d >= 0.0),
            waveform: upload.waveform,
            thumbnail: None,
        };

        let result = self
            .create_and_publish(
                sender,
                target,
                String::new(),
                MessageKind::Voice,
                vec![attachment],
                upload.reply_to.as_deref(),
            )
            .await;

        if result.is_err() {
            self.uploads.discard(std::slice::from_ref(&file)).await;
        }
        result
    }

    // ========================================================================
    // Reply
    // ========================================================================

    /// Reply in the original's conversation. Group replies stay in the event;
    /// direct replies go to the other side of the original exchange.
    pub async fn reply(&self, sender: &User, original_id: &str, req: ReplyRequest) -> Result<MessageView> {
        self.check_attachment_refs(&req.attachments)?;
        let original = self.accessible_message(original_id, &sender.id).await?;

        let target = match (&original.event_id, &original.recipient_id) {
            (Some(event_id), _) => ChatTarget::Event(event_id.clone()),
            (None, _) if original.sender_id != sender.id => ChatTarget::Individual(original.sender_id.clone()),
            (None, Some(recipient_id)) => ChatTarget::Individual(recipient_id.clone()),
            (None, None) => return Err(AppError::validation("Cannot determine where to send this reply")),
        };

        let kind = infer_kind(&req.attachments);
        self.create_and_publish(
            sender,
            target,
            req.body.unwrap_or_default(),
            kind,
            req.attachments,
            Some(original_id),
        )
        .await
    }

    /// Client-supplied attachments may only point at previously uploaded files
    fn check_attachment_refs(&self, attachments: &[Attachment]) -> Result<()> {
        match attachments.iter().find(|a| !self.uploads.is_upload_url(&a.url)) {
            Some(bad) => Err(AppError::validation(format!("Attachment URL {} is not an upload", bad.url))),
            None => Ok(()),
        }
    }

    async fn reply_ref(&self, sender_id: &str, original_id: &str) -> Result<ReplyRef> {
        let original = self.accessible_message(original_id, sender_id).await?;
        let sender_name = self
            .storage
            .get_user(&original.sender_id)
            .await?
            .map(|u| u.name)
            .unwrap_or_else(|| "Unknown".to_string());

        Ok(ReplyRef {
            message_id: original.id,
            snippet: snippet(&original.body),
            sender_name,
        })
    }

    async fn create_and_publish(
        &self,
        sender: &User,
        target: ChatTarget,
        body: String,
        kind: MessageKind,
        attachments: Vec<Attachment>,
        reply_to: Option<&str>,
    ) -> Result<MessageView> {
        if attachments.len() > self.limits.max_attachments {
            return Err(AppError::validation(format!(
                "At most {} attachments per message",
                self.limits.max_attachments
            )));
        }
        self.check_target(&sender.id, &target).await?;

        let mut draft = MessageDraft::new(&sender.id, &target, body, kind);
        draft.attachments = attachments;
        if let Some(original_id) = reply_to.filter(|id| !id.is_empty()) {
            draft.reply_to = Some(self.reply_ref(&sender.id, original_id).await?);
        }

        let message = self.storage.create_message(draft).await?;
        let view = self.storage.view(message).await?;
        self.publish(&view);
        Ok(view)
    }

    // ========================================================================
    // Forward
    // ========================================================================

    /// Copy a message to each target independently. Failing targets are
    /// reported and do not undo the others.
    pub async fn forward(&self, sender: &User, message_id: &str, req: ForwardRequest) -> Result<ForwardOutcome> {
        let original = self.accessible_message(message_id, &sender.id).await?;
        if original.kind.is_server_generated() {
            return Err(AppError::validation("This message cannot be forwarded"));
        }

        let mut seen = HashSet::new();
        let targets: Vec<ChatTarget> = req
            .recipients
            .into_iter()
            .filter(|id| !id.is_empty())
            .map(ChatTarget::Individual)
            .chain(req.events.into_iter().filter(|id| !id.is_empty()).map(ChatTarget::Event))
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if targets.is_empty() {
            return Err(AppError::validation("At least one recipient or event is required"));
        }

        // Every copy points at the root of the lineage, not at an intermediate copy
        let lineage = original.forwarded_from.clone().unwrap_or_else(|| ForwardRef {
            message_id: original.id.clone(),
            original_sender: original.sender_id.clone(),
            forwarded_at: Utc::now(),
        });

        let mut created_ids = Vec::new();
        let mut failures = Vec::new();
        for target in targets {
            match self.forward_copy(sender, &original, &lineage, &target).await {
                Ok(message) => created_ids.push(message.id),
                Err(e) => failures.push(ForwardFailure {
                    target,
                    reason: e.public_message(),
                }),
            }
        }

        let mut messages = Vec::new();
        if !created_ids.is_empty() {
            self.storage
                .increment_forward_count(&lineage.message_id, created_ids.len() as i64)
                .await?;

            let created = self.storage.find_messages(&created_ids).await?;
            messages = self.storage.views(created).await?;
            for view in &messages {
                self.publish(view);
            }
        }

        tracing::info!(
            message_id = %message_id,
            forwarded = messages.len(),
            failed = failures.len(),
            "Forward fan-out finished"
        );

        Ok(ForwardOutcome {
            forwarded: messages.len(),
            messages,
            failures,
        })
    }

    async fn forward_copy(
        &self,
        sender: &User,
        original: &Message,
        lineage: &ForwardRef,
        target: &ChatTarget,
    ) -> Result<Message> {
        self.check_target(&sender.id, target).await?;

        let mut draft = MessageDraft::new(&sender.id, target, original.body.clone(), original.kind);
        draft.attachments = original.attachments.clone();
        draft.forwarded_from = Some(ForwardRef {
            message_id: lineage.message_id.clone(),
            original_sender: lineage.original_sender.clone(),
            forwarded_at: Utc::now(),
        });
        draft.forward_count = original.forward_count;

        self.storage.create_message(draft).await
    }

    /// Socket nudge for a forward already persisted over HTTP. Re-emits the
    /// stored copy to its room; receivers must tolerate the duplicate.
    /// Failures are reported to the acting connection only.
    pub async fn relay_forwarded(&self, sender_id: &str, conn: ConnectionId, message_id: &str, target: ChatTarget) {
        if let Err(e) = self.try_relay_forwarded(sender_id, message_id, &target).await {
            self.gateway.send_to(
                conn,
                WsServerMessage::ForwardError(ForwardError {
                    message_id: message_id.to_string(),
                    message: e.public_message(),
                }),
            );
        }
    }

    async fn try_relay_forwarded(&self, sender_id: &str, message_id: &str, target: &ChatTarget) -> Result<()> {
        let message = self
            .storage
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("Message not found"))?;

        if message.sender_id != sender_id {
            return Err(AppError::forbidden("Only the sender can relay this message"));
        }
        if message.target().as_ref() != Some(target) {
            return Err(AppError::validation("Message is not addressed to this chat"));
        }

        let view = self.storage.view(message).await?;
        self.gateway.emit(
            &RoomAddress::from(target),
            WsServerMessage::NewMessage(Box::new(view)),
        );
        Ok(())
    }
}
