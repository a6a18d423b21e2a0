//! Read-only operations: inbox, history, search, starred, presence, stats

use std::collections::HashSet;

use super::MessagingService;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::storage::{MessageQuery, MessageScope};

impl MessagingService {
    pub async fn conversations(&self, user_id: &str, params: ConversationParams) -> Result<ConversationPage> {
        let window = self.limits.page_window(params.page, params.limit);
        self.conversations.list(user_id, window, params.search.as_deref()).await
    }

    /// Resolve a chat to a query scope, checking the viewer belongs to it
    async fn chat_scope(&self, user_id: &str, chat_type: ChatType, chat_id: &str) -> Result<MessageScope> {
        match chat_type {
            ChatType::Individual => {
                if self.storage.get_user(chat_id).await?.is_none() {
                    return Err(AppError::not_found("User not found"));
                }
                Ok(MessageScope::Direct {
                    user_id: user_id.to_string(),
                    other_id: chat_id.to_string(),
                })
            }
            ChatType::Event => {
                if self.storage.get_event(chat_id).await?.is_none() {
                    return Err(AppError::not_found("Event not found"));
                }
                if !self.storage.is_active_participant(chat_id, user_id).await? {
                    return Err(AppError::forbidden("Not a participant of this event"));
                }
                Ok(MessageScope::Event(chat_id.to_string()))
            }
        }
    }

    async fn inbox_scope(&self, user_id: &str) -> Result<MessageScope> {
        Ok(MessageScope::Inbox {
            user_id: user_id.to_string(),
            event_ids: self.storage.active_event_ids(user_id).await?,
        })
    }

    /// Pages walk backwards from the newest message (or from `before`); each
    /// page is returned oldest first. Reading history changes no state.
    pub async fn history(
        &self,
        user_id: &str,
        chat_type: ChatType,
        chat_id: &str,
        params: HistoryParams,
    ) -> Result<HistoryPage> {
        let scope = self.chat_scope(user_id, chat_type, chat_id).await?;
        let window = self.limits.page_window(params.page, params.limit);

        let mut query = MessageQuery::new(scope)
            .viewer(user_id)
            .page(window.limit + 1, window.offset());
        query.before = params.before.map(|t| t.timestamp_millis());

        let mut messages = self.storage.find_many(&query).await?;
        let has_more = messages.len() > window.limit as usize;
        messages.truncate(window.limit as usize);
        messages.reverse();

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

    /// Case-insensitive body search within one chat, or across every chat
    /// the user belongs to when no chat is given.
    pub async fn search(&self, user_id: &str, params: SearchParams) -> Result<Vec<MessageView>> {
        let text = params.query.trim();
        if text.is_empty() {
            return Err(AppError::validation("Search query is required"));
        }

        let scope = match (params.chat_id.as_deref().filter(|id| !id.is_empty()), params.chat_type) {
            (Some(chat_id), Some(chat_type)) => self.chat_scope(user_id, chat_type, chat_id).await?,
            (Some(_), None) => return Err(AppError::validation("type is required when chatId is given")),
            (None, _) => self.inbox_scope(user_id).await?,
        };

        let mut query = MessageQuery::new(scope)
            .viewer(user_id)
            .page(self.limits.max_page_size, 0);
        query.text = Some(text.to_string());

        let messages = self.storage.find_many(&query).await?;
        self.storage.views(messages).await
    }

    pub async fn starred(&self, user_id: &str, params: PageParams) -> Result<HistoryPage> {
        let window = self.limits.page_window(params.page, params.limit);

        let mut query = MessageQuery::new(self.inbox_scope(user_id).await?)
            .viewer(user_id)
            .page(window.limit + 1, window.offset());
        query.starred_by = Some(user_id.to_string());

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

    pub fn online_status(&self, params: OnlineParams) -> Vec<OnlineStatus> {
        let raw = params.user_ids.unwrap_or_default();
        let mut seen = HashSet::new();
        let ids: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty() && seen.insert(*id))
            .collect();

        if ids.is_empty() {
            return self
                .presence
                .online_users()
                .into_iter()
                .map(|user_id| OnlineStatus { user_id, online: true, last_seen: None })
                .collect();
        }

        ids.into_iter()
            .map(|id| {
                let online = self.presence.is_online(id);
                OnlineStatus {
                    user_id: id.to_string(),
                    online,
                    last_seen: if online { None } else { self.presence.last_seen(id) },
                }
            })
            .collect()
    }

    pub async fn stats(&self, user_id: &str) -> Result<MessageStats> {
        let memberships = self.storage.memberships(user_id).await?;

        let mut unread = self.storage.count_direct_unread(user_id).await?;
        for membership in &memberships {
            unread += self.storage.count_event_unread(&membership.id, user_id).await?;
        }

        Ok(MessageStats {
            sent: self.storage.count_sent(user_id).await?,
            received: self.storage.count_received(user_id).await?,
            unread,
            starred: self.storage.count_starred(user_id).await?,
            direct_conversations: self.storage.direct_heads(user_id).await?.len() as i64,
            event_conversations: memberships.len() as i64,
        })
    }
}
