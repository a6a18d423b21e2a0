//! Messaging Service
//!
//! Every user-facing messaging operation goes through here, whether it came
//! from HTTP or from the socket. Operations check authorization and existence
//! first, persist through [`Storage`], and only then fan out through the
//! [`Gateway`]. Broadcasts never precede a successful write.

mod calls;
mod moderation;
mod queries;
mod receipts;
mod send;

pub use send::{AudioUpload, FileUpload, UploadedPart};

use std::sync::Arc;

use crate::calls::CallRegistry;
use crate::config::{LimitsConfig, RealtimeConfig};
use crate::conversations::ConversationAggregator;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::notify::OfflineNotifier;
use crate::presence::{ConnectionId, PresenceTracker};
use crate::storage::Storage;
use crate::uploads::AttachmentStore;
use crate::websocket::{Gateway, RoomAddress};

/// Cheap to clone; deferred tasks hold their own copy
#[derive(Clone)]
pub struct MessagingService {
    storage: Arc<Storage>,
    presence: Arc<dyn PresenceTracker>,
    gateway: Arc<Gateway>,
    calls: Arc<CallRegistry>,
    uploads: AttachmentStore,
    notifier: Arc<dyn OfflineNotifier>,
    conversations: Arc<ConversationAggregator>,
    limits: LimitsConfig,
    realtime: RealtimeConfig,
}

impl MessagingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<Storage>,
        presence: Arc<dyn PresenceTracker>,
        gateway: Arc<Gateway>,
        calls: Arc<CallRegistry>,
        uploads: AttachmentStore,
        notifier: Arc<dyn OfflineNotifier>,
        limits: LimitsConfig,
        realtime: RealtimeConfig,
    ) -> Self {
        let conversations = Arc::new(ConversationAggregator::new(storage.clone(), presence.clone()));
        Self {
            storage,
            presence,
            gateway,
            calls,
            uploads,
            notifier,
            conversations,
            limits,
            realtime,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn presence(&self) -> &Arc<dyn PresenceTracker> {
        &self.presence
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Attach an authenticated socket: personal room, admin room, every event
    /// room, presence, and delivery reconciliation for anything sent while away.
    pub async fn connect(
        &self,
        user: &User,
        conn: ConnectionId,
        sender: tokio::sync::mpsc::UnboundedSender<WsServerMessage>,
    ) -> Result<()> {
        self.gateway.register(conn, &user.id, sender);
        if user.is_admin {
            self.gateway.join(conn, &RoomAddress::Admin);
        }
        for event_id in self.storage.active_event_ids(&user.id).await? {
            self.gateway.join(conn, &RoomAddress::Event(event_id));
        }

        if self.presence.set_online(&user.id, conn) {
            self.gateway.broadcast_except_user(
                &user.id,
                WsServerMessage::UserOnline(PresenceChange { user_id: user.id.clone(), last_seen: None }),
            );
        }

        self.gateway.send_to(
            conn,
            WsServerMessage::Authenticated(Authenticated {
                user_id: user.id.clone(),
                online_users: self.presence.online_users(),
            }),
        );

        self.reconcile_deliveries(&user.id).await?;
        Ok(())
    }

    /// Detach a socket. Calls are abandoned and `userOffline` is broadcast
    /// only when this was the user's last connection.
    pub async fn disconnect(&self, user_id: &str, conn: ConnectionId) {
        self.gateway.unregister(conn);

        if !self.presence.set_offline(user_id, conn) {
            return;
        }

        for session in self.calls.abandon(user_id) {
            if session.status.is_terminal() {
                self.finish_call(session).await;
            }
        }

        self.gateway.broadcast_except_user(
            user_id,
            WsServerMessage::UserOffline(PresenceChange {
                user_id: user_id.to_string(),
                last_seen: self.presence.last_seen(user_id),
            }),
        );
    }

    /// Join an event room mid-session, e.g. after being added to the event
    pub async fn join_event(&self, user_id: &str, conn: ConnectionId, event_id: &str) -> Result<()> {
        if !self.storage.is_active_participant(event_id, user_id).await? {
            return Err(AppError::forbidden("Not a participant of this event"));
        }
        self.gateway.join(conn, &RoomAddress::Event(event_id.to_string()));
        self.gateway.send_to(
            conn,
            WsServerMessage::JoinedEvent(JoinEvent { event_id: event_id.to_string() }),
        );
        Ok(())
    }

    // ========================================================================
    // Shared checks
    // ========================================================================

    /// The sender may address this target: the recipient exists and is not
    /// the sender, or the sender actively participates in the event.
    async fn check_target(&self, sender_id: &str, target: &ChatTarget) -> Result<()> {
        match target {
            ChatTarget::Individual(recipient_id) => {
                if recipient_id == sender_id {
                    return Err(AppError::validation("You cannot send a message to yourself"));
                }
                if self.storage.get_active_user(recipient_id).await?.is_none() {
                    return Err(AppError::not_found("Recipient not found"));
                }
            }
            ChatTarget::Event(event_id) => {
                if self.storage.get_event(event_id).await?.is_none() {
                    return Err(AppError::not_found("Event not found"));
                }
                if !self.storage.is_active_participant(event_id, sender_id).await? {
                    return Err(AppError::forbidden("Not a participant of this event"));
                }
            }
        }
        Ok(())
    }

    /// Load a message the user is allowed to see
    async fn accessible_message(&self, message_id: &str, user_id: &str) -> Result<Message> {
        let message = self
            .storage
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found("Message not found"))?;

        let allowed = match &message.event_id {
            Some(event_id) => self.storage.is_active_participant(event_id, user_id).await?,
            None => message.involves(user_id),
        };
        if !allowed {
            return Err(AppError::forbidden("Not a participant of this conversation"));
        }

        Ok(message)
    }

    fn ensure_admin(user: &User) -> Result<()> {
        if user.is_admin {
            Ok(())
        } else {
            Err(AppError::forbidden("Admin access required"))
        }
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    /// Rooms that see events about a message. Direct messages go to both
    /// users, so the sender's other devices stay in sync.
    fn rooms_for(message: &Message) -> Vec<RoomAddress> {
        match (&message.recipient_id, &message.event_id) {
            (_, Some(event_id)) => vec![RoomAddress::Event(event_id.clone())],
            (Some(recipient_id), None) => vec![
                RoomAddress::Individual(message.sender_id.clone()),
                RoomAddress::Individual(recipient_id.clone()),
            ],
            (None, None) => vec![RoomAddress::Individual(message.sender_id.clone())],
        }
    }

    /// Broadcast a freshly persisted message and schedule its follow-ups
    fn publish(&self, view: &MessageView) {
        let message = &view.message;
        self.gateway.emit_many(
            &Self::rooms_for(message),
            WsServerMessage::NewMessage(Box::new(view.clone())),
        );
        self.schedule_delivery_check(message);
        if !message.kind.is_server_generated() {
            self.schedule_offline_notifications(view.clone());
        }
    }

    fn schedule_offline_notifications(&self, view: MessageView) {
        let service = self.clone();
        tokio::spawn(async move {
            let message = &view.message;
            let recipients = match (&message.recipient_id, &message.event_id) {
                (Some(recipient_id), None) => vec![recipient_id.clone()],
                (None, Some(event_id)) => match service.storage.participant_ids(event_id).await {
                    Ok(ids) => ids.into_iter().filter(|id| *id != message.sender_id).collect(),
                    Err(e) => {
                        tracing::warn!(message_id = %message.id, "Offline notification lookup failed: {}", e);
                        return;
                    }
                },
                _ => Vec::new(),
            };

            for user_id in recipients {
                if !service.presence.is_online(&user_id) {
                    service.notifier.notify(&user_id, &view).await;
                }
            }
        });
    }
}
