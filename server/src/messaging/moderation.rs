//! User reports and admin-only moderation

use super::MessagingService;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::storage::{MessageQuery, MessageScope};
use crate::websocket::RoomAddress;

impl MessagingService {
    /// Any participant may report someone else's message, once. Admins are
    /// told through the admin room; the reporter gets the running count.
    pub async fn report(&self, user: &User, message_id: &str, req: ReportRequest) -> Result<usize> {
        let message = self.accessible_message(message_id, &user.id).await?;
        if message.sender_id == user.id {
            return Err(AppError::validation("You cannot report your own message"));
        }

        let reason = req.reason.trim();
        let report_count = self.storage.add_report(&message.id, &user.id, reason).await?;
        tracing::info!(message_id = %message.id, reporter = %user.id, report_count, "Message reported");

        self.gateway.emit(
            &RoomAddress::Admin,
            WsServerMessage::MessageReported(ReportNotice {
                message_id: message.id,
                reporter_id: user.id.clone(),
                reason: reason.to_string(),
                report_count,
            }),
        );
        Ok(report_count)
    }

    async fn existing_message(&self, message_id: &str) -> Result<Message> {
        self.storage
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("Message not found"))
    }

    pub async fn add_label(&self, admin: &User, message_id: &str, req: LabelRequest) -> Result<Vec<AdminLabel>> {
        Self::ensure_admin(admin)?;
        let message = self.existing_message(message_id).await?;
        let category = req.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
        self.storage
            .add_label(&message.id, req.label.trim(), category, &admin.id)
            .await
    }

    pub async fn remove_label(&self, admin: &User, message_id: &str, label: &str) -> Result<Vec<AdminLabel>> {
        Self::ensure_admin(admin)?;
        let message = self.existing_message(message_id).await?;
        self.storage.remove_label(&message.id, label).await
    }

    pub async fn add_note(&self, admin: &User, message_id: &str, req: NoteRequest) -> Result<InternalNote> {
        Self::ensure_admin(admin)?;
        let message = self.existing_message(message_id).await?;
        self.storage.add_note(&message.id, &admin.id, req.note.trim()).await
    }

    pub async fn moderation_record(&self, admin: &User, message_id: &str) -> Result<ModerationRecord> {
        Self::ensure_admin(admin)?;
        let message = self.existing_message(message_id).await?;

        Ok(ModerationRecord {
            admin_labels: self.storage.labels_for(&message.id).await?,
            internal_notes: self.storage.notes_for(&message.id).await?,
            reports: self.storage.reports_for(&message.id).await?,
            message: self.storage.view(message).await?,
        })
    }

    /// Messages carrying a label and/or category, newest first, across all chats
    pub async fn filter_by_label(&self, admin: &User, params: LabelFilterParams) -> Result<HistoryPage> {
        Self::ensure_admin(admin)?;

        let label = params.label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        let category = params.category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if label.is_none() && category.is_none() {
            return Err(AppError::validation("label or category is required"));
        }

        let window = self.limits.page_window(params.page, params.limit);
        let mut query = MessageQuery::new(MessageScope::All).page(window.limit + 1, window.offset());
        query.label = label;
        query.category = category;

        let mut messages = self.storage.find_many(&query).await?;
        let has_more = messages.len() > window.limit as usize;
        messages.truncate(window.limit as usize);

        Ok(HistoryPage {
            messages: self.storage.views(messages).await?,
            pagination: Pagination {
                page: window.page,
                limit: window.limit,
                total: None,
                has_more,
            },
        })
    }
}
