//! Queries backing the conversation list

use std::collections::HashMap;

use super::messages::{MessageRow, MESSAGE_COLUMNS};
use super::Storage;
use crate::error::Result;
use crate::models::*;

/// Latest visible message and unread count of one direct conversation
#[derive(Debug, Clone)]
pub struct DirectHead {
    pub other_id: String,
    pub last_message: Message,
    pub unread: i64,
}

/// State of one event conversation for a given member
#[derive(Debug, Clone)]
pub struct EventHead {
    pub membership: Membership,
    pub last_message: Option<Message>,
    pub unread: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DirectHeadRow {
    other_id: String,
    last_message_id: String,
    unread: i64,
}

impl Storage {
    /// One entry per user that `user_id` has exchanged at least one visible
    /// direct message with.
    pub async fn direct_heads(&self, user_id: &str) -> Result<Vec<DirectHead>> {
        let rows = sqlx::query_as::<_, DirectHeadRow>(
            "WITH mine AS (
                 SELECT m.id, m.seq, m.created_at, m.recipient_id, m.is_read,
                        CASE WHEN m.sender_id = ?1 THEN m.recipient_id ELSE m.sender_id END AS other_id
                 FROM messages m
                 WHERE m.event_id IS NULL
                   AND (m.sender_id = ?1 OR m.recipient_id = ?1)
                   AND NOT EXISTS (
                       SELECT 1 FROM message_deletions d WHERE d.message_id = m.id AND d.user_id = ?1
                   )
             ),
             ranked AS (
                 SELECT id, other_id,
                        ROW_NUMBER() OVER (PARTITION BY other_id ORDER BY created_at DESC, seq DESC) AS rn
                 FROM mine
             )
             SELECT r.other_id AS other_id,
                    r.id AS last_message_id,
                    (SELECT COUNT(*) FROM mine u
                     WHERE u.other_id = r.other_id AND u.recipient_id = ?1 AND u.is_read = 0) AS unread
             FROM ranked r
             WHERE r.rn = 1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<String> = rows.iter().map(|r| r.last_message_id.clone()).collect();
        let mut messages: HashMap<String, Message> = self
            .find_messages(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        // A message hard-deleted between the two queries is simply skipped
        let heads = rows
            .into_iter()
            .filter_map(|row| {
                messages.remove(&row.last_message_id).map(|last_message| DirectHead {
                    other_id: row.other_id,
                    last_message,
                    unread: row.unread,
                })
            })
            .collect::<Vec<_>>();

        Ok(heads)
    }

    /// One entry per event the user actively participates in, whether or not
    /// the event has any messages yet.
    pub async fn event_heads(&self, user_id: &str) -> Result<Vec<EventHead>> {
        let memberships = self.memberships(user_id).await?;
        let mut heads = Vec::with_capacity(memberships.len());

        for membership in memberships {
            let last_message = self.latest_event_message(&membership.id, user_id).await?;
            let unread = self.count_event_unread(&membership.id, user_id).await?;
            heads.push(EventHead {
                membership,
                last_message,
                unread,
            });
        }

        Ok(heads)
    }

    async fn latest_event_message(&self, event_id: &str, viewer_id: &str) -> Result<Option<Message>> {
        let sql = format!(
            "SELECT {} FROM messages m
             WHERE m.event_id = ?
               AND NOT EXISTS (SELECT 1 FROM message_deletions d WHERE d.message_id = m.id AND d.user_id = ?)
             ORDER BY m.created_at DESC, m.seq DESC
             LIMIT 1",
            MESSAGE_COLUMNS
        );

        let row = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(event_id)
            .bind(viewer_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    pub async fn count_event_unread(&self, event_id: &str, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages m
             WHERE m.event_id = ?1 AND m.sender_id <> ?2
               AND NOT EXISTS (SELECT 1 FROM message_receipts r
                               WHERE r.message_id = m.id AND r.user_id = ?2 AND r.kind = 'read')
               AND NOT EXISTS (SELECT 1 FROM message_deletions d
                               WHERE d.message_id = m.id AND d.user_id = ?2)",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn count_direct_unread(&self, user_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages m
             WHERE m.event_id IS NULL AND m.recipient_id = ?1 AND m.is_read = 0
               AND NOT EXISTS (SELECT 1 FROM message_deletions d
                               WHERE d.message_id = m.id AND d.user_id = ?1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
