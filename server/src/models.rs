//! Data models for EventHub Server

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

pub const MAX_BODY_CHARS: usize = 10_000;
pub const MAX_NOTE_CHARS: usize = 2_000;
pub const MAX_REPORT_CHARS: usize = 1_000;
pub const MAX_LABEL_CHARS: usize = 64;
pub const REPLY_SNIPPET_CHARS: usize = 100;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

// ============================================================================
// Session Models
// ============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub token_hash: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub is_valid: bool,
}

// ============================================================================
// Event Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            name: event.name.clone(),
            created_at: from_millis(event.created_at),
        }
    }
}

/// An event the user actively participates in, with the time they joined
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Membership {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
    pub joined_at: i64,
}

impl Membership {
    pub fn event(&self) -> Event {
        Event {
            id: self.id.clone(),
            name: self.name.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
        }
    }
}

// ============================================================================
// Message Models
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Voice,
    Multiple,
    System,
    Call,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Audio => "audio",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
            MessageKind::Voice => "voice",
            MessageKind::Multiple => "multiple",
            MessageKind::System => "system",
            MessageKind::Call => "call",
        }
    }

    /// Kinds only the server itself may create
    pub fn is_server_generated(&self) -> bool {
        matches!(self, MessageKind::System | MessageKind::Call)
    }
}

impl FromStr for MessageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "audio" => Ok(MessageKind::Audio),
            "video" => Ok(MessageKind::Video),
            "document" => Ok(MessageKind::Document),
            "voice" => Ok(MessageKind::Voice),
            "multiple" => Ok(MessageKind::Multiple),
            "system" => Ok(MessageKind::System),
            "call" => Ok(MessageKind::Call),
            other => Err(AppError::validation(format!("Unknown message type: {}", other))),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a direct message. Ordered: a status never moves backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            other => Err(AppError::validation(format!("Unknown delivery status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Individual,
    Event,
}

impl FromStr for ChatType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(ChatType::Individual),
            "event" => Ok(ChatType::Event),
            other => Err(AppError::validation(format!("Unknown chat type: {}", other))),
        }
    }
}

/// Where a message is addressed: exactly one user or exactly one event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "chatType", content = "chatId", rename_all = "lowercase")]
pub enum ChatTarget {
    Individual(String),
    Event(String),
}

impl ChatTarget {
    pub fn new(chat_type: ChatType, chat_id: impl Into<String>) -> Self {
        match chat_type {
            ChatType::Individual => ChatTarget::Individual(chat_id.into()),
            ChatType::Event => ChatTarget::Event(chat_id.into()),
        }
    }

    /// Build a target from the two optional addressing fields of a request.
    pub fn from_parts(recipient_id: Option<&str>, event_id: Option<&str>) -> crate::error::Result<Self> {
        let recipient_id = recipient_id.filter(|s| !s.is_empty());
        let event_id = event_id.filter(|s| !s.is_empty());
        match (recipient_id, event_id) {
            (Some(r), None) => Ok(ChatTarget::Individual(r.to_string())),
            (None, Some(e)) => Ok(ChatTarget::Event(e.to_string())),
            (Some(_), Some(_)) => Err(AppError::validation(
                "Specify either recipientId or eventId, not both",
            )),
            (None, None) => Err(AppError::validation("Either recipientId or eventId is required")),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ChatTarget::Individual(id) | ChatTarget::Event(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    Document,
    Voice,
}

impl AttachmentKind {
    pub fn from_mime(mime: &str) -> Self {
        match mime.split('/').next().unwrap_or_default() {
            "image" => AttachmentKind::Image,
            "audio" => AttachmentKind::Audio,
            "video" => AttachmentKind::Video,
            _ => AttachmentKind::Document,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Audio => "audio",
            AttachmentKind::Video => "video",
            AttachmentKind::Document => "document",
            AttachmentKind::Voice => "voice",
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(AttachmentKind::Image),
            "audio" => Ok(AttachmentKind::Audio),
            "video" => Ok(AttachmentKind::Video),
            "document" => Ok(AttachmentKind::Document),
            "voice" => Ok(AttachmentKind::Voice),
            other => Err(AppError::validation(format!("Unknown attachment type: {}", other))),
        }
    }
}

impl From<AttachmentKind> for MessageKind {
    fn from(kind: AttachmentKind) -> Self {
        match kind {
            AttachmentKind::Image => MessageKind::Image,
            AttachmentKind::Audio => MessageKind::Audio,
            AttachmentKind::Video => MessageKind::Video,
            AttachmentKind::Document => MessageKind::Document,
            AttachmentKind::Voice => MessageKind::Voice,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
    pub size: i64,
    pub mime_type: String,
    /// Seconds, audio and voice only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<f32>>,
    /// Video only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Denormalized at write time; never re-joined against the original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRef {
    pub message_id: String,
    pub snippet: String,
    pub sender_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRef {
    pub message_id: String,
    pub original_sender: String,
    pub forwarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
}

/// A `(user, time)` entry; used for stars, per-user deletions and receipts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserMark {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub event_id: Option<String>,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplyRef>,
    pub forwarded_from: Option<ForwardRef>,
    pub forward_count: i64,
    pub status: DeliveryStatus,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub delivered_to: Vec<UserMark>,
    pub read_by: Vec<UserMark>,
    pub reactions: Vec<Reaction>,
    pub starred_by: Vec<UserMark>,
    pub deleted_for: Vec<UserMark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<CallSummary>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn target(&self) -> Option<ChatTarget> {
        match (&self.recipient_id, &self.event_id) {
            (Some(r), None) => Some(ChatTarget::Individual(r.clone())),
            (None, Some(e)) => Some(ChatTarget::Event(e.clone())),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        self.event_id.is_some()
    }

    /// Sender or direct recipient. Event participation is checked separately.
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id.as_deref() == Some(user_id)
    }

    pub fn is_read_by(&self, user_id: &str) -> bool {
        if self.is_group() {
            self.read_by.iter().any(|r| r.user_id == user_id)
        } else {
            self.recipient_id.as_deref() == Some(user_id) && self.is_read
        }
    }
}

/// Everything needed to create a message. Addressing is kept as the raw pair
/// so that invalid combinations are rejected by validation.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub event_id: Option<String>,
    pub body: String,
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplyRef>,
    pub forwarded_from: Option<ForwardRef>,
    pub forward_count: i64,
    pub call: Option<CallSummary>,
}

impl MessageDraft {
    pub fn new(sender_id: impl Into<String>, target: &ChatTarget, body: impl Into<String>, kind: MessageKind) -> Self {
        let (recipient_id, event_id) = match target {
            ChatTarget::Individual(id) => (Some(id.clone()), None),
            ChatTarget::Event(id) => (None, Some(id.clone())),
        };
        Self {
            sender_id: sender_id.into(),
            recipient_id,
            event_id,
            body: body.into(),
            kind,
            attachments: Vec::new(),
            reply_to: None,
            forwarded_from: None,
            forward_count: 0,
            call: None,
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.sender_id.is_empty() {
            return Err(AppError::validation("Message sender is required"));
        }

        match (&self.recipient_id, &self.event_id) {
            (Some(_), Some(_)) => {
                return Err(AppError::validation(
                    "A message cannot have both a recipient and an event",
                ));
            }
            (None, None) if self.kind != MessageKind::System => {
                return Err(AppError::validation(
                    "A message needs either a recipient or an event",
                ));
            }
            _ => {}
        }

        if self.body.chars().count() > MAX_BODY_CHARS {
            return Err(AppError::validation(format!(
                "Message body exceeds {} characters",
                MAX_BODY_CHARS
            )));
        }

        if self.body.trim().is_empty() && self.attachments.is_empty() && !self.kind.is_server_generated() {
            return Err(AppError::validation("Message must have a body or attachments"));
        }

        Ok(())
    }
}

/// Message with sender (and recipient, for direct chats) identity populated
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<UserSummary>,
    pub recipient: Option<UserSummary>,
}

// ============================================================================
// Moderation Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminLabel {
    pub label: String,
    pub category: Option<String>,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InternalNote {
    pub id: i64,
    pub author_id: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: i64,
    pub reporter_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Admin-only view of a message. Never sent to end users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRecord {
    pub message: MessageView,
    pub admin_labels: Vec<AdminLabel>,
    pub internal_notes: Vec<InternalNote>,
    pub reports: Vec<Report>,
}

// ============================================================================
// Call Models
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Audio => "audio",
            CallKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ongoing,
    Completed,
    Missed,
    Rejected,
    Cancelled,
    Failed,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Initiated | CallStatus::Ongoing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ongoing => "ongoing",
            CallStatus::Completed => "completed",
            CallStatus::Missed => "missed",
            CallStatus::Rejected => "rejected",
            CallStatus::Cancelled => "cancelled",
            CallStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallParticipant {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: String,
    pub call_type: CallKind,
    pub initiator_id: String,
    pub target: ChatTarget,
    pub status: CallStatus,
    pub participants: Vec<CallParticipant>,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
}

impl CallSession {
    pub fn duration_secs(&self) -> i64 {
        match (self.answered_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0),
            _ => 0,
        }
    }

    pub fn summary(&self) -> CallSummary {
        CallSummary {
            call_id: self.id.clone(),
            call_type: self.call_type,
            status: self.status,
            duration_secs: self.duration_secs(),
            participants: self.participants.iter().map(|p| p.user_id.clone()).collect(),
        }
    }
}

/// What a `call` message records about the session it logs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_id: String,
    pub call_type: CallKind,
    pub status: CallStatus,
    pub duration_secs: i64,
    pub participants: Vec<String>,
}

// ============================================================================
// API Request/Response Models
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: Option<String>,
    pub event_id: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "type")]
    pub message_type: Option<MessageKind>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    #[serde(default)]
    pub delete_for_everyone: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub chat_id: String,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub message_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: String,
    pub chat_id: Option<String>,
    #[serde(rename = "type")]
    pub chat_type: Option<ChatType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineParams {
    /// Comma-separated list of user ids
    pub user_ids: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelRequest {
    pub label: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelFilterParams {
    pub label: Option<String>,
    pub category: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// 1-based page and a clamped page size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub limit: u32,
}

impl PageWindow {
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<MessageView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Conversation {
    Individual {
        chat_id: String,
        user: UserSummary,
        is_online: bool,
        last_message: Option<MessageView>,
        last_activity: DateTime<Utc>,
        unread_count: i64,
    },
    Event {
        chat_id: String,
        event: EventSummary,
        participants: Vec<UserSummary>,
        participant_count: usize,
        online_count: usize,
        last_message: Option<MessageView>,
        last_activity: DateTime<Utc>,
        unread_count: i64,
    },
}

impl Conversation {
    pub fn chat_id(&self) -> &str {
        match self {
            Conversation::Individual { chat_id, .. } | Conversation::Event { chat_id, .. } => chat_id,
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        match self {
            Conversation::Individual { last_activity, .. }
            | Conversation::Event { last_activity, .. } => *last_activity,
        }
    }

    pub fn unread_count(&self) -> i64 {
        match self {
            Conversation::Individual { unread_count, .. }
            | Conversation::Event { unread_count, .. } => *unread_count,
        }
    }

    pub fn last_message(&self) -> Option<&MessageView> {
        match self {
            Conversation::Individual { last_message, .. }
            | Conversation::Event { last_message, .. } => last_message.as_ref(),
        }
    }

    /// Case-insensitive match against the other user's name/email or the event name
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        match self {
            Conversation::Individual { user, .. } => {
                user.name.to_lowercase().contains(&needle) || user.email.to_lowercase().contains(&needle)
            }
            Conversation::Event { event, .. } => event.name.to_lowercase().contains(&needle),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<Conversation>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardFailure {
    pub target: ChatTarget,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardOutcome {
    pub forwarded: usize,
    pub messages: Vec<MessageView>,
    pub failures: Vec<ForwardFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarOutcome {
    pub message_id: String,
    pub starred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatus {
    pub user_id: String,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub sent: i64,
    pub received: i64,
    pub unread: i64,
    pub starred: i64,
    pub direct_conversations: i64,
    pub event_conversations: i64,
}

// ============================================================================
// WebSocket Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub chat_id: String,
    pub chat_type: ChatType,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRelay {
    pub message_id: String,
    pub recipient_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupForwardRelay {
    pub message_id: String,
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinEvent {
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcSignal {
    pub call_id: String,
    pub to: String,
    pub signal: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub call_id: String,
    pub to: String,
    pub candidate: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiate {
    pub call_id: Option<String>,
    pub to: Option<String>,
    pub event_id: Option<String>,
    pub call_type: CallKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFailure {
    pub call_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsClientMessage {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "typing")]
    Typing(TypingSignal),

    #[serde(rename = "presence")]
    Presence { status: PresenceStatus },

    #[serde(rename = "forwardedMessage")]
    ForwardedMessage(ForwardRelay),

    #[serde(rename = "forwardedToGroup")]
    ForwardedToGroup(GroupForwardRelay),

    #[serde(rename = "joinEvent")]
    JoinEvent(JoinEvent),

    #[serde(rename = "rtc-signal")]
    RtcSignal(RtcSignal),

    #[serde(rename = "ice-candidate")]
    IceCandidate(IceCandidate),

    #[serde(rename = "call-initiate")]
    CallInitiate(CallInitiate),

    #[serde(rename = "call-accept")]
    CallAccept(CallRef),

    #[serde(rename = "call-reject")]
    CallReject(CallRef),

    #[serde(rename = "call-end")]
    CallEnd(CallRef),

    #[serde(rename = "call-failed")]
    CallFailed(CallFailure),

    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Authenticated {
    pub user_id: String,
    pub online_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusUpdate {
    pub message_ids: Vec<String>,
    pub status: DeliveryStatus,
    /// Recipients whose state changed (one for direct chats, several for events)
    pub user_ids: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRead {
    pub reader_id: String,
    pub chat_type: ChatType,
    /// Chat as seen by the receiving sender: the reader for direct chats, the event otherwise
    pub chat_id: String,
    pub message_ids: Vec<String>,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub message_id: String,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: String,
    pub deleted_for_everyone: bool,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: String,
    pub chat_type: ChatType,
    pub chat_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: String,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardError {
    pub message_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportNotice {
    pub message_id: String,
    pub reporter_id: String,
    pub reason: String,
    pub report_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    pub call_id: String,
    pub from: String,
    pub signal: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayedCandidate {
    pub call_id: String,
    pub from: String,
    pub candidate: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum WsServerMessage {
    #[serde(rename = "authenticated")]
    Authenticated(Authenticated),

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "newMessage")]
    NewMessage(Box<MessageView>),

    #[serde(rename = "messageStatus")]
    MessageStatus(MessageStatusUpdate),

    #[serde(rename = "messagesRead")]
    MessagesRead(MessagesRead),

    #[serde(rename = "messageReaction")]
    MessageReaction(ReactionUpdate),

    #[serde(rename = "messageDeleted")]
    MessageDeleted(MessageDeleted),

    #[serde(rename = "messageReported")]
    MessageReported(ReportNotice),

    #[serde(rename = "typing")]
    Typing(TypingNotice),

    #[serde(rename = "userOnline")]
    UserOnline(PresenceChange),

    #[serde(rename = "userOffline")]
    UserOffline(PresenceChange),

    #[serde(rename = "presence")]
    Presence(PresenceNotice),

    #[serde(rename = "forwardError")]
    ForwardError(ForwardError),

    #[serde(rename = "joinedEvent")]
    JoinedEvent(JoinEvent),

    #[serde(rename = "incoming-call")]
    IncomingCall(CallSession),

    #[serde(rename = "call-initiated")]
    CallInitiated(CallSession),

    #[serde(rename = "call-accepted")]
    CallAccepted(CallSession),

    #[serde(rename = "call-rejected")]
    CallRejected(CallSession),

    #[serde(rename = "call-ended")]
    CallEnded(CallSession),

    #[serde(rename = "rtc-signal")]
    RtcSignal(RelayedSignal),

    #[serde(rename = "ice-candidate")]
    IceCandidate(RelayedCandidate),

    #[serde(rename = "pong")]
    Pong,
}

impl WsServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        WsServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
