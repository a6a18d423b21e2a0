//! Message Store: durable CRUD and query surface for direct and group messages
//!
//! A message row is immutable in sender, kind and attachments. Everything that
//! changes after creation (receipts, reactions, stars, per-user deletions)
//! lives in side tables keyed by `(message_id, user_id)`, so concurrent updates
//! from different users are independent single-row writes.

use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::Storage;
use crate::error::{AppError, Result};
use crate::models::*;

pub(super) const MESSAGE_COLUMNS: &str = "m.seq, m.id, m.sender_id, m.recipient_id, m.event_id, m.body, m.kind, \
     m.reply_to_id, m.reply_snippet, m.reply_sender_name, \
     m.forwarded_from_id, m.forwarded_from_sender, m.forwarded_at, m.forward_count, \
     m.status, m.sent_at, m.delivered_at, m.read_at, m.is_read, m.call_summary, m.created_at";

#[derive(Debug, sqlx::FromRow)]
pub(super) struct MessageRow {
    #[allow(dead_code)]
    seq: i64,
    id: String,
    sender_id: String,
    recipient_id: Option<String>,
    event_id: Option<String>,
    body: String,
    kind: String,
    reply_to_id: Option<String>,
    reply_snippet: Option<String>,
    reply_sender_name: Option<String>,
    forwarded_from_id: Option<String>,
    forwarded_from_sender: Option<String>,
    forwarded_at: Option<i64>,
    forward_count: i64,
    status: String,
    sent_at: i64,
    delivered_at: Option<i64>,
    read_at: Option<i64>,
    is_read: bool,
    call_summary: Option<String>,
    created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct AttachmentRow {
    message_id: String,
    kind: String,
    url: String,
    filename: String,
    size: i64,
    mime_type: String,
    duration: Option<f64>,
    waveform: Option<String>,
    thumbnail: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReactionRow {
    message_id: String,
    user_id: String,
    emoji: String,
    reacted_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MarkRow {
    message_id: String,
    user_id: String,
    at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ReceiptRow {
    message_id: String,
    user_id: String,
    kind: String,
    at: i64,
}

/// Which conversation(s) a query is restricted to
#[derive(Debug, Clone)]
pub enum MessageScope {
    /// Messages between two users, either direction
    Direct { user_id: String, other_id: String },
    /// Messages in one event room
    Event(String),
    /// Every direct message involving the user plus every message in the given events
    Inbox { user_id: String, event_ids: Vec<String> },
    /// No conversation restriction (moderation queries only)
    All,
}

#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub scope: MessageScope,
    /// Hide messages this user soft-deleted
    pub viewer: Option<String>,
    /// Case-insensitive substring match on body
    pub text: Option<String>,
    pub starred_by: Option<String>,
    pub label: Option<String>,
    pub category: Option<String>,
    /// Only messages created strictly before this instant (unix millis)
    pub before: Option<i64>,
    pub limit: u32,
    pub offset: u32,
}

impl MessageQuery {
    pub fn new(scope: MessageScope) -> Self {
        Self {
            scope,
            viewer: None,
            text: None,
            starred_by: None,
            label: None,
            category: None,
            before: None,
            limit: 50,
            offset: 0,
        }
    }

    pub fn viewer(mut self, user_id: impl Into<String>) -> Self {
        self.viewer = Some(user_id.into());
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let reply_to = match (self.reply_to_id, self.reply_snippet, self.reply_sender_name) {
            (Some(message_id), snippet, sender_name) => Some(ReplyRef {
                message_id,
                snippet: snippet.unwrap_or_default(),
                sender_name: sender_name.unwrap_or_default(),
            }),
            _ => None,
        };

        let forwarded_from = match (self.forwarded_from_id, self.forwarded_from_sender) {
            (Some(message_id), Some(original_sender)) => Some(ForwardRef {
                message_id,
                original_sender,
                forwarded_at: from_millis(self.forwarded_at.unwrap_or(self.created_at)),
            }),
            _ => None,
        };

        let call = match self.call_summary {
            Some(raw) => Some(
                serde_json::from_str::<CallSummary>(&raw)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("Corrupt call summary: {}", e)))?,
            ),
            None => None,
        };

        Ok(Message {
            id: self.id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            event_id: self.event_id,
            body: self.body,
            kind: self.kind.parse()?,
            attachments: Vec::new(),
            reply_to,
            forwarded_from,
            forward_count: self.forward_count,
            status: self.status.parse()?,
            sent_at: from_millis(self.sent_at),
            delivered_at: self.delivered_at.map(from_millis),
            read_at: self.read_at.map(from_millis),
            is_read: self.is_read,
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            reactions: Vec::new(),
            starred_by: Vec::new(),
            deleted_for: Vec::new(),
            call,
            created_at: from_millis(self.created_at),
        })
    }
}

fn push_id_list<'a>(qb: &mut QueryBuilder<'a, Sqlite>, ids: &'a [String]) {
    qb.push("(");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(id.as_str());
    }
    list.push_unseparated(")");
}

impl Storage {
    // ========================================================================
    // Create
    // ========================================================================

    /// Persist a new message. The store assigns id and creation time, which
    /// define the total order of messages within a conversation.
    pub async fn create_message(&self, draft: MessageDraft) -> Result<Message> {
        draft.validate()?;

        let id = Uuid::new_v4().to_string();
        let now = now_millis();
        let call_summary = match &draft.call {
            Some(call) => Some(
                serde_json::to_string(call)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode call summary: {}", e)))?,
            ),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages
             (id, sender_id, recipient_id, event_id, body, kind,
              reply_to_id, reply_snippet, reply_sender_name,
              forwarded_from_id, forwarded_from_sender, forwarded_at, forward_count,
              status, sent_at, is_read, call_summary, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'sent', ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(&draft.sender_id)
        .bind(&draft.recipient_id)
        .bind(&draft.event_id)
        .bind(&draft.body)
        .bind(draft.kind.as_str())
        .bind(draft.reply_to.as_ref().map(|r| r.message_id.as_str()))
        .bind(draft.reply_to.as_ref().map(|r| r.snippet.as_str()))
        .bind(draft.reply_to.as_ref().map(|r| r.sender_name.as_str()))
        .bind(draft.forwarded_from.as_ref().map(|f| f.message_id.as_str()))
        .bind(draft.forwarded_from.as_ref().map(|f| f.original_sender.as_str()))
        .bind(draft.forwarded_from.as_ref().map(|f| f.forwarded_at.timestamp_millis()))
        .bind(draft.forward_count)
        .bind(now)
        .bind(&call_summary)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (position, attachment) in draft.attachments.iter().enumerate() {
            let waveform = match &attachment.waveform {
                Some(w) => Some(
                    serde_json::to_string(w)
                        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode waveform: {}", e)))?,
                ),
                None => None,
            };

            sqlx::query(
                "INSERT INTO message_attachments
                 (message_id, position, kind, url, filename, size, mime_type, duration, waveform, thumbnail)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(attachment.kind.as_str())
            .bind(&attachment.url)
            .bind(&attachment.filename)
            .bind(attachment.size)
            .bind(&attachment.mime_type)
            .bind(attachment.duration)
            .bind(&waveform)
            .bind(&attachment.thumbnail)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(message_id = %id, sender = %draft.sender_id, kind = %draft.kind, "Message stored");

        self.find_message(&id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Message {} missing after insert", id)))
    }

    // ========================================================================
    // Read
    // ========================================================================

    pub async fn find_message(&self, message_id: &str) -> Result<Option<Message>> {
        let sql = format!("SELECT {} FROM messages m WHERE m.id = ?", MESSAGE_COLUMNS);
        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Load messages by id, preserving the order of `ids`. Unknown ids are skipped.
    pub async fn find_messages(&self, ids: &[String]) -> Result<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM messages m WHERE m.id IN ", MESSAGE_COLUMNS));
        push_id_list(&mut qb, ids);
        let rows = qb.build_query_as::<MessageRow>().fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, Message> = self
            .hydrate(rows)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Filtered, paginated message listing, newest first
    pub async fn find_many(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM messages m WHERE 1 = 1", MESSAGE_COLUMNS));

        match &query.scope {
            MessageScope::Direct { user_id, other_id } => {
                qb.push(" AND m.event_id IS NULL AND ((m.sender_id = ")
                    .push_bind(user_id.as_str())
                    .push(" AND m.recipient_id = ")
                    .push_bind(other_id.as_str())
                    .push(") OR (m.sender_id = ")
                    .push_bind(other_id.as_str())
                    .push(" AND m.recipient_id = ")
                    .push_bind(user_id.as_str())
                    .push("))");
            }
            MessageScope::Event(event_id) => {
                qb.push(" AND m.event_id = ").push_bind(event_id.as_str());
            }
            MessageScope::Inbox { user_id, event_ids } => {
                qb.push(" AND ((m.event_id IS NULL AND (m.sender_id = ")
                    .push_bind(user_id.as_str())
                    .push(" OR m.recipient_id = ")
                    .push_bind(user_id.as_str())
                    .push("))");
                if !event_ids.is_empty() {
                    qb.push(" OR m.event_id IN ");
                    push_id_list(&mut qb, event_ids);
                }
                qb.push(")");
            }
            MessageScope::All => {}
        }

        if let Some(viewer) = &query.viewer {
            qb.push(" AND NOT EXISTS (SELECT 1 FROM message_deletions d WHERE d.message_id = m.id AND d.user_id = ")
                .push_bind(viewer.as_str())
                .push(")");
        }

        if let Some(text) = query.text.as_deref().filter(|t| !t.is_empty()) {
            qb.push(" AND instr(lower(m.body), lower(")
                .push_bind(text)
                .push(")) > 0");
        }

        if let Some(user_id) = &query.starred_by {
            qb.push(" AND EXISTS (SELECT 1 FROM message_stars s WHERE s.message_id = m.id AND s.user_id = ")
                .push_bind(user_id.as_str())
                .push(")");
        }

        if query.label.is_some() || query.category.is_some() {
            qb.push(" AND EXISTS (SELECT 1 FROM message_labels l WHERE l.message_id = m.id");
            if let Some(label) = &query.label {
                qb.push(" AND l.label = ").push_bind(label.as_str());
            }
            if let Some(category) = &query.category {
                qb.push(" AND l.category = ").push_bind(category.as_str());
            }
            qb.push(")");
        }

        if let Some(before) = query.before {
            qb.push(" AND m.created_at < ").push_bind(before);
        }

        qb.push(" ORDER BY m.created_at DESC, m.seq DESC");

        qb.push(" LIMIT ")
            .push_bind(query.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.offset as i64);

        let rows = qb.build_query_as::<MessageRow>().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    /// Attach the per-message side tables to a batch of rows
    pub(super) async fn hydrate(&self, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut messages = rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, kind, url, filename, size, mime_type, duration, waveform, thumbnail
             FROM message_attachments WHERE message_id IN ",
        );
        push_id_list(&mut qb, &ids);
        qb.push(" ORDER BY message_id, position");
        let attachments = qb.build_query_as::<AttachmentRow>().fetch_all(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, user_id, emoji, reacted_at FROM message_reactions WHERE message_id IN ",
        );
        push_id_list(&mut qb, &ids);
        qb.push(" ORDER BY reacted_at ASC");
        let reactions = qb.build_query_as::<ReactionRow>().fetch_all(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, user_id, starred_at AS at FROM message_stars WHERE message_id IN ",
        );
        push_id_list(&mut qb, &ids);
        let stars = qb.build_query_as::<MarkRow>().fetch_all(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, user_id, deleted_at AS at FROM message_deletions WHERE message_id IN ",
        );
        push_id_list(&mut qb, &ids);
        let deletions = qb.build_query_as::<MarkRow>().fetch_all(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, user_id, kind, at FROM message_receipts WHERE message_id IN ",
        );
        push_id_list(&mut qb, &ids);
        qb.push(" ORDER BY at ASC");
        let receipts = qb.build_query_as::<ReceiptRow>().fetch_all(&self.pool).await?;

        let index: HashMap<String, usize> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();

        for row in attachments {
            if let Some(&i) = index.get(&row.message_id) {
                let waveform = row.waveform.as_deref().and_then(|w| serde_json::from_str(w).ok());
                messages[i].attachments.push(Attachment {
                    kind: row.kind.parse()?,
                    url: row.url,
                    filename: row.filename,
                    size: row.size,
                    mime_type: row.mime_type,
                    duration: row.duration,
                    waveform,
                    thumbnail: row.thumbnail,
                });
            }
        }

        for row in reactions {
            if let Some(&i) = index.get(&row.message_id) {
                messages[i].reactions.push(Reaction {
                    user_id: row.user_id,
                    emoji: row.emoji,
                    timestamp: from_millis(row.reacted_at),
                });
            }
        }

        for row in stars {
            if let Some(&i) = index.get(&row.message_id) {
                messages[i].starred_by.push(UserMark { user_id: row.user_id, timestamp: from_millis(row.at) });
            }
        }

        for row in deletions {
            if let Some(&i) = index.get(&row.message_id) {
                messages[i].deleted_for.push(UserMark { user_id: row.user_id, timestamp: from_millis(row.at) });
            }
        }

        for row in receipts {
            if let Some(&i) = index.get(&row.message_id) {
                let mark = UserMark { user_id: row.user_id, timestamp: from_millis(row.at) };
                match row.kind.as_str() {
                    "delivered" => messages[i].delivered_to.push(mark),
                    "read" => messages[i].read_by.push(mark),
                    _ => {}
                }
            }
        }

        Ok(messages)
    }

    /// Populate sender and direct-recipient identity, one user lookup per batch
    pub async fn views(&self, messages: Vec<Message>) -> Result<Vec<MessageView>> {
        let mut user_ids: Vec<String> = messages
            .iter()
            .flat_map(|m| std::iter::once(m.sender_id.clone()).chain(m.recipient_id.clone()))
            .collect();
        user_ids.sort();
        user_ids.dedup();

        let users: HashMap<String, UserSummary> = self
            .get_users(&user_ids)
            .await?
            .iter()
            .map(|u| (u.id.clone(), UserSummary::from(u)))
            .collect();

        Ok(messages
            .into_iter()
            .map(|message| MessageView {
                sender: users.get(&message.sender_id).cloned(),
                recipient: message.recipient_id.as_ref().and_then(|r| users.get(r).cloned()),
                message,
            })
            .collect())
    }

    pub async fn view(&self, message: Message) -> Result<MessageView> {
        self.views(vec![message])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Empty view batch")))
    }

    // ========================================================================
    // Delivery state
    // ========================================================================

    /// Advance the delivery state of a message on behalf of `actor_id`.
    ///
    /// Progression is monotonic: `sent` is never a target, and moving to a
    /// state at or below the current one is a no-op. For group messages only
    /// the per-user receipt sets change; the scalar status stays as sent.
    /// Returns whether anything changed.
    pub async fn update_status(&self, message_id: &str, status: DeliveryStatus, actor_id: &str) -> Result<bool> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let changed = match status {
            DeliveryStatus::Sent => false,
            DeliveryStatus::Delivered => {
                let scalar = sqlx::query(
                    "UPDATE messages SET status = 'delivered', delivered_at = ?
                     WHERE id = ? AND event_id IS NULL AND recipient_id = ? AND status = 'sent'",
                )
                .bind(now)
                .bind(message_id)
                .bind(actor_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                let receipt = insert_receipt(&mut tx, message_id, actor_id, "delivered", now).await?;
                scalar > 0 || receipt
            }
            DeliveryStatus::Read => {
                let scalar = sqlx::query(
                    "UPDATE messages
                     SET status = 'read', is_read = 1, read_at = ?, delivered_at = COALESCE(delivered_at, ?)
                     WHERE id = ? AND event_id IS NULL AND recipient_id = ? AND status <> 'read'",
                )
                .bind(now)
                .bind(now)
                .bind(message_id)
                .bind(actor_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                insert_receipt(&mut tx, message_id, actor_id, "delivered", now).await?;
                let receipt = insert_receipt(&mut tx, message_id, actor_id, "read", now).await?;
                scalar > 0 || receipt
            }
        };

        tx.commit().await?;
        Ok(changed)
    }

    /// Move every still-`sent` direct message addressed to `recipient_id` to
    /// `delivered`. Returns `(message_id, sender_id)` for each one that changed.
    pub async fn mark_pending_delivered(&self, recipient_id: &str) -> Result<Vec<(String, String)>> {
        let candidates: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, sender_id FROM messages
             WHERE recipient_id = ? AND event_id IS NULL AND status = 'sent'
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        let mut changed = Vec::new();
        for (id, sender_id) in candidates {
            if self.update_status(&id, DeliveryStatus::Delivered, recipient_id).await? {
                changed.push((id, sender_id));
            }
        }

        Ok(changed)
    }

    /// Mark unread direct messages from `other_id` to `reader_id` as read,
    /// optionally restricted to `ids`. Returns `(message_id, sender_id)` per change.
    pub async fn mark_direct_read(
        &self,
        reader_id: &str,
        other_id: &str,
        ids: Option<&[String]>,
    ) -> Result<Vec<(String, String)>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, sender_id FROM messages WHERE event_id IS NULL AND recipient_id = ");
        qb.push_bind(reader_id)
            .push(" AND sender_id = ")
            .push_bind(other_id)
            .push(" AND status <> 'read'");
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND id IN ");
            push_id_list(&mut qb, ids);
        }
        qb.push(" ORDER BY created_at ASC, seq ASC");

        let candidates: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut changed = Vec::new();
        for (id, sender_id) in candidates {
            if self.update_status(&id, DeliveryStatus::Read, reader_id).await? {
                changed.push((id, sender_id));
            }
        }

        Ok(changed)
    }

    /// Record read receipts for `reader_id` on event messages sent by others.
    /// Returns `(message_id, sender_id)` for each receipt newly recorded.
    pub async fn mark_event_read(
        &self,
        reader_id: &str,
        event_id: &str,
        ids: Option<&[String]>,
    ) -> Result<Vec<(String, String)>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT m.id, m.sender_id FROM messages m WHERE m.event_id = ");
        qb.push_bind(event_id)
            .push(" AND m.sender_id <> ")
            .push_bind(reader_id)
            .push(" AND NOT EXISTS (SELECT 1 FROM message_receipts r WHERE r.message_id = m.id AND r.kind = 'read' AND r.user_id = ")
            .push_bind(reader_id)
            .push(")");
        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND m.id IN ");
            push_id_list(&mut qb, ids);
        }
        qb.push(" ORDER BY m.created_at ASC, m.seq ASC");

        let candidates: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;

        let mut changed = Vec::new();
        for (id, sender_id) in candidates {
            if self.update_status(&id, DeliveryStatus::Read, reader_id).await? {
                changed.push((id, sender_id));
            }
        }

        Ok(changed)
    }

    // ========================================================================
    // Reactions, stars, deletion
    // ========================================================================

    /// Add a reaction, replacing any previous reaction by the same user.
    /// Returns the message's full reaction list afterwards.
    pub async fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<Vec<Reaction>> {
        sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji, reacted_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(message_id, user_id) DO UPDATE SET emoji = excluded.emoji, reacted_at = excluded.reacted_at",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        self.reactions_for(message_id).await
    }

    pub async fn remove_reaction(&self, message_id: &str, user_id: &str) -> Result<Vec<Reaction>> {
        sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND user_id = ?")
            .bind(message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.reactions_for(message_id).await
    }

    pub async fn reactions_for(&self, message_id: &str) -> Result<Vec<Reaction>> {
        let rows = sqlx::query_as::<_, ReactionRow>(
            "SELECT message_id, user_id, emoji, reacted_at FROM message_reactions
             WHERE message_id = ? ORDER BY reacted_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Reaction { user_id: r.user_id, emoji: r.emoji, timestamp: from_millis(r.reacted_at) })
            .collect())
    }

    /// Flip the star for `user_id`; returns whether the message is now starred
    pub async fn toggle_star(&self, message_id: &str, user_id: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM message_stars WHERE message_id = ? AND user_id = ?")
            .bind(message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed > 0 {
            return Ok(false);
        }

        sqlx::query("INSERT OR IGNORE INTO message_stars (message_id, user_id, starred_at) VALUES (?, ?, ?)")
            .bind(message_id)
            .bind(user_id)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    /// Hide a message from one user's view. Idempotent.
    pub async fn soft_delete_for_user(&self, message_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO message_deletions (message_id, user_id, deleted_at) VALUES (?, ?, ?)")
            .bind(message_id)
            .bind(user_id)
            .bind(now_millis())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove a message entirely. Only its sender may do this.
    pub async fn hard_delete(&self, message_id: &str, actor_id: &str) -> Result<()> {
        let message = self
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("Message not found"))?;

        if message.sender_id != actor_id {
            return Err(AppError::forbidden("Only the sender can delete a message for everyone"));
        }

        sqlx::query("DELETE FROM messages WHERE id = ? AND sender_id = ?")
            .bind(message_id)
            .bind(actor_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Forwarding
    // ========================================================================

    /// Add `count` to the shared forward counter of a lineage: the root
    /// message and every message forwarded from it.
    pub async fn increment_forward_count(&self, root_id: &str, count: i64) -> Result<()> {
        sqlx::query("UPDATE messages SET forward_count = forward_count + ? WHERE id = ? OR forwarded_from_id = ?")
            .bind(count)
            .bind(root_id)
            .bind(root_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ========================================================================
    // Counters
    // ========================================================================

    pub async fn count_sent(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE sender_id = ? AND kind <> 'system'")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_received(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE recipient_id = ? AND event_id IS NULL")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_starred(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM message_stars s
             WHERE s.user_id = ?
             AND NOT EXISTS (SELECT 1 FROM message_deletions d WHERE d.message_id = s.message_id AND d.user_id = s.user_id)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

async fn insert_receipt(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    message_id: &str,
    user_id: &str,
    kind: &str,
    at: i64,
) -> Result<bool> {
    // Receipts only come from the direct recipient or a non-sender in an event
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO message_receipts (message_id, user_id, kind, at)
         SELECT ?, ?, ?, ? WHERE EXISTS (
             SELECT 1 FROM messages
             WHERE id = ? AND sender_id <> ? AND (recipient_id = ? OR event_id IS NOT NULL)
         )",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(kind)
    .bind(at)
    .bind(message_id)
    .bind(user_id)
    .bind(user_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(inserted > 0)
}
