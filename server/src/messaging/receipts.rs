//! Per-user message state: delivery, read receipts, reactions, stars,
//! deletion, and the typing relay.

use std::collections::BTreeMap;

use chrono::Utc;

use super::MessagingService;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::presence::ConnectionId;
use crate::websocket::RoomAddress;

const MAX_EMOJI_CHARS: usize = 16;

/// Group `(message_id, sender_id)` pairs by sender, keeping message order
fn by_sender(changed: Vec<(String, String)>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (message_id, sender_id) in changed {
        grouped.entry(sender_id).or_default().push(message_id);
    }
    grouped
}

impl MessagingService {
    // ========================================================================
    // Delivery
    // ========================================================================

    /// Best-effort `sent -> delivered` after a short delay, only for
    /// recipients online when the check runs. Not retried; a later read
    /// supersedes it.
    pub(super) fn schedule_delivery_check(&self, message: &Message) {
        let service = self.clone();
        let message_id = message.id.clone();
        let sender_id = message.sender_id.clone();
        let target = message.target();
        let delay = self.realtime.delivery_check_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let result = match target {
                Some(ChatTarget::Individual(recipient_id)) => {
                    service.deliver_direct(&message_id, &sender_id, &recipient_id).await
                }
                Some(ChatTarget::Event(event_id)) => service.deliver_group(&message_id, &sender_id, &event_id).await,
                None => Ok(()),
            };

            if let Err(e) = result {
                tracing::warn!(message_id = %message_id, "Delivery check failed: {}", e);
            }
        });
    }

    async fn deliver_direct(&self, message_id: &str, sender_id: &str, recipient_id: &str) -> Result<()> {
        if !self.presence.is_online(recipient_id) {
            return Ok(());
        }
        if self.storage.update_status(message_id, DeliveryStatus::Delivered, recipient_id).await? {
            self.gateway.emit(
                &RoomAddress::Individual(sender_id.to_string()),
                WsServerMessage::MessageStatus(MessageStatusUpdate {
                    message_ids: vec![message_id.to_string()],
                    status: DeliveryStatus::Delivered,
                    user_ids: vec![recipient_id.to_string()],
                    at: Utc::now(),
                }),
            );
        }
        Ok(())
    }

    async fn deliver_group(&self, message_id: &str, sender_id: &str, event_id: &str) -> Result<()> {
        let mut delivered = Vec::new();
        for user_id in self.storage.participant_ids(event_id).await? {
            if user_id == sender_id || !self.presence.is_online(&user_id) {
                continue;
            }
            if self.storage.update_status(message_id, DeliveryStatus::Delivered, &user_id).await? {
                delivered.push(user_id);
            }
        }

        if !delivered.is_empty() {
            self.gateway.emit(
                &RoomAddress::Individual(sender_id.to_string()),
                WsServerMessage::MessageStatus(MessageStatusUpdate {
                    message_ids: vec![message_id.to_string()],
                    status: DeliveryStatus::Delivered,
                    user_ids: delivered,
                    at: Utc::now(),
                }),
            );
        }
        Ok(())
    }

    /// On (re)connect: everything still `sent` to this user is now delivered.
    /// Each original sender gets one `messageStatus` with all their ids.
    pub async fn reconcile_deliveries(&self, user_id: &str) -> Result<usize> {
        let changed = self.storage.mark_pending_delivered(user_id).await?;
        let total = changed.len();
        let at = Utc::now();

        for (sender_id, message_ids) in by_sender(changed) {
            self.gateway.emit(
                &RoomAddress::Individual(sender_id),
                WsServerMessage::MessageStatus(MessageStatusUpdate {
                    message_ids,
                    status: DeliveryStatus::Delivered,
                    user_ids: vec![user_id.to_string()],
                    at,
                }),
            );
        }

        if total > 0 {
            tracing::debug!(user = %user_id, count = total, "Reconciled pending deliveries");
        }
        Ok(total)
    }

    // ========================================================================
    // Read receipts
    // ========================================================================

    /// Mark a conversation (or selected ids in it) read for `reader_id`.
    /// Each distinct original sender receives exactly one `messagesRead`.
    /// Returns the ids that changed; repeating the call changes nothing.
    pub async fn mark_as_read(&self, reader_id: &str, req: MarkReadRequest) -> Result<Vec<String>> {
        let ids = req.message_ids.as_deref();
        let changed = match req.chat_type {
            ChatType::Individual => self.storage.mark_direct_read(reader_id, &req.chat_id, ids).await?,
            ChatType::Event => {
                if !self.storage.is_active_participant(&req.chat_id, reader_id).await? {
                    return Err(AppError::forbidden("Not a participant of this event"));
                }
                self.storage.mark_event_read(reader_id, &req.chat_id, ids).await?
            }
        };

        let read_ids: Vec<String> = changed.iter().map(|(id, _)| id.clone()).collect();
        let read_at = Utc::now();

        for (sender_id, message_ids) in by_sender(changed) {
            // The sender sees a direct chat under the reader's id
            let chat_id = match req.chat_type {
                ChatType::Individual => reader_id.to_string(),
                ChatType::Event => req.chat_id.clone(),
            };
            self.gateway.emit(
                &RoomAddress::Individual(sender_id),
                WsServerMessage::MessagesRead(MessagesRead {
                    reader_id: reader_id.to_string(),
                    chat_type: req.chat_type,
                    chat_id,
                    message_ids,
                    read_at,
                }),
            );
        }

        Ok(read_ids)
    }

    // ========================================================================
    // Reactions, stars, deletion
    // ========================================================================

    pub async fn react(&self, user_id: &str, message_id: &str, emoji: &str) -> Result<Vec<Reaction>> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(AppError::validation("Emoji is required"));
        }
        if emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(AppError::validation("Emoji is too long"));
        }

        let message = self.accessible_message(message_id, user_id).await?;
        let reactions = self.storage.add_reaction(&message.id, user_id, emoji).await?;
        self.broadcast_reactions(&message, &reactions);
        Ok(reactions)
    }

    pub async fn unreact(&self, user_id: &str, message_id: &str) -> Result<Vec<Reaction>> {
        let message = self.accessible_message(message_id, user_id).await?;
        let reactions = self.storage.remove_reaction(&message.id, user_id).await?;
        self.broadcast_reactions(&message, &reactions);
        Ok(reactions)
    }

    fn broadcast_reactions(&self, message: &Message, reactions: &[Reaction]) {
        self.gateway.emit_many(
            &Self::rooms_for(message),
            WsServerMessage::MessageReaction(ReactionUpdate {
                message_id: message.id.clone(),
                reactions: reactions.to_vec(),
            }),
        );
    }

    /// Personal; nothing is broadcast
    pub async fn toggle_star(&self, user_id: &str, message_id: &str) -> Result<StarOutcome> {
        let message = self.accessible_message(message_id, user_id).await?;
        let starred = self.storage.toggle_star(&message.id, user_id).await?;
        Ok(StarOutcome { message_id: message.id, starred })
    }

    /// "For everyone" removes the message for all participants and is
    /// broadcast; only the sender may do it. "For me" silently hides it from
    /// the actor's own views.
    pub async fn delete(&self, user_id: &str, message_id: &str, for_everyone: bool) -> Result<()> {
        let message = self.accessible_message(message_id, user_id).await?;

        if !for_everyone {
            return self.storage.soft_delete_for_user(&message.id, user_id).await;
        }

        self.storage.hard_delete(&message.id, user_id).await?;
        tracing::info!(message_id = %message.id, sender = %user_id, "Message deleted for everyone");

        self.gateway.emit_many(
            &Self::rooms_for(&message),
            WsServerMessage::MessageDeleted(MessageDeleted {
                message_id: message.id.clone(),
                deleted_for_everyone: true,
                sender_id: message.sender_id.clone(),
                recipient_id: message.recipient_id.clone(),
                event_id: message.event_id.clone(),
            }),
        );
        Ok(())
    }

    // ========================================================================
    // Typing
    // ========================================================================

    /// Stateless relay; the receiving client decays the indicator itself
    pub fn handle_typing(&self, user_id: &str, conn: ConnectionId, signal: TypingSignal) {
        match signal.chat_type {
            ChatType::Individual => {
                if signal.chat_id == user_id {
                    return;
                }
                self.gateway.emit(
                    &RoomAddress::Individual(signal.chat_id.clone()),
                    WsServerMessage::Typing(TypingNotice {
                        user_id: user_id.to_string(),
                        chat_type: ChatType::Individual,
                        chat_id: user_id.to_string(),
                        is_typing: signal.is_typing,
                    }),
                );
            }
            ChatType::Event => {
                let room = RoomAddress::Event(signal.chat_id.clone());
                // Event rooms are only joined after a membership check
                if !self.gateway.is_member(conn, &room) {
                    return;
                }
                self.gateway.emit_except(
                    &room,
                    conn,
                    WsServerMessage::Typing(TypingNotice {
                        user_id: user_id.to_string(),
                        chat_type: ChatType::Event,
                        chat_id: signal.chat_id,
                        is_typing: signal.is_typing,
                    }),
                );
            }
        }
    }
}
