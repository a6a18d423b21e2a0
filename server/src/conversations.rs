//! Conversation Aggregator
//!
//! Builds a user's inbox on every request from the message store and event
//! membership. Nothing here is persisted.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::models::*;
use crate::presence::PresenceTracker;
use crate::storage::Storage;

pub struct ConversationAggregator {
    storage: Arc<Storage>,
    presence: Arc<dyn PresenceTracker>,
}

impl ConversationAggregator {
    pub fn new(storage: Arc<Storage>, presence: Arc<dyn PresenceTracker>) -> Self {
        Self { storage, presence }
    }

    /// Merged individual and event conversations, newest activity first,
    /// optionally filtered by name, then paged.
    pub async fn list(&self, user_id: &str, window: PageWindow, search: Option<&str>) -> Result<ConversationPage> {
        let mut conversations = self.direct_conversations(user_id).await?;
        conversations.extend(self.event_conversations(user_id).await?);

        conversations.sort_by(compare_activity);

        if let Some(needle) = search.map(str::trim).filter(|s| !s.is_empty()) {
            conversations.retain(|c| c.matches(needle));
        }

        let total = conversations.len();
        let offset = window.offset() as usize;
        let page: Vec<Conversation> = conversations
            .into_iter()
            .skip(offset)
            .take(window.limit as usize)
            .collect();
        let has_more = offset + page.len() < total;

        Ok(ConversationPage {
            conversations: page,
            pagination: Pagination {
                page: window.page,
                limit: window.limit,
                total: Some(total),
                has_more,
            },
        })
    }

    async fn direct_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let heads = self.storage.direct_heads(user_id).await?;

        let other_ids: Vec<String> = heads.iter().map(|h| h.other_id.clone()).collect();
        let others: HashMap<String, User> = self
            .storage
            .get_users(&other_ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        let messages: Vec<Message> = heads.iter().map(|h| h.last_message.clone()).collect();
        let views = self.storage.views(messages).await?;

        let mut conversations = Vec::with_capacity(heads.len());
        for (head, view) in heads.into_iter().zip(views) {
            // Conversations with accounts that no longer exist are dropped
            let Some(other) = others.get(&head.other_id) else {
                continue;
            };
            conversations.push(Conversation::Individual {
                chat_id: head.other_id.clone(),
                user: UserSummary::from(other),
                is_online: self.presence.is_online(&head.other_id),
                last_activity: view.message.created_at,
                last_message: Some(view),
                unread_count: head.unread,
            });
        }

        Ok(conversations)
    }

    async fn event_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let heads = self.storage.event_heads(user_id).await?;
        let mut conversations = Vec::with_capacity(heads.len());

        for head in heads {
            let participant_ids = self.storage.participant_ids(&head.membership.id).await?;
            let participants: Vec<UserSummary> = self
                .storage
                .get_users(&participant_ids)
                .await?
                .iter()
                .map(UserSummary::from)
                .collect();
            let online_count = participant_ids
                .iter()
                .filter(|id| self.presence.is_online(id))
                .count();

            let last_message = match head.last_message {
                Some(message) => Some(self.storage.view(message).await?),
                None => None,
            };
            let last_activity = last_message
                .as_ref()
                .map(|v| v.message.created_at)
                .unwrap_or_else(|| from_millis(head.membership.joined_at.max(head.membership.created_at)));

            conversations.push(Conversation::Event {
                chat_id: head.membership.id.clone(),
                event: EventSummary::from(&head.membership.event()),
                participant_count: participants.len(),
                participants,
                online_count,
                last_message,
                last_activity,
                unread_count: head.unread,
            });
        }

        Ok(conversations)
    }
}

fn compare_activity(a: &Conversation, b: &Conversation) -> Ordering {
    b.last_activity()
        .cmp(&a.last_activity())
        .then_with(|| a.chat_id().cmp(b.chat_id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn event_conversation(id: &str, minutes_ago: i64) -> Conversation {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        Conversation::Event {
            chat_id: id.to_string(),
            event: EventSummary { id: id.to_string(), name: format!("Event {}", id), created_at: at },
            participants: vec![],
            participant_count: 0,
            online_count: 0,
            last_message: None,
            last_activity: at,
            unread_count: 0,
        }
    }

    #[test]
    fn test_newest_activity_sorts_first() {
        let mut list = vec![
            event_conversation("old", 30),
            event_conversation("new", 1),
            event_conversation("mid", 10),
        ];
        list.sort_by(compare_activity);

        let ids: Vec<&str> = list.iter().map(|c| c.chat_id()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_search_matches_event_name_case_insensitively() {
        let conversation = event_conversation("abc", 0);
        assert!(conversation.matches("EVENT a"));
        assert!(!conversation.matches("picnic"));
    }
}
