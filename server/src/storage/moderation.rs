//! Admin-only annotations on messages: labels, internal notes and user reports

use super::Storage;
use crate::error::{AppError, Result};
use crate::models::*;

#[derive(Debug, sqlx::FromRow)]
struct LabelRow {
    label: String,
    category: Option<String>,
    added_by: String,
    added_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct NoteRow {
    id: i64,
    author_id: String,
    note: String,
    created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    id: i64,
    reporter_id: String,
    reason: String,
    created_at: i64,
}

fn check_length(value: &str, max: usize, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{} is required", what)));
    }
    if value.chars().count() > max {
        return Err(AppError::validation(format!("{} exceeds {} characters", what, max)));
    }
    Ok(())
}

impl Storage {
    /// Attach a label, replacing the category if the label is already present
    pub async fn add_label(
        &self,
        message_id: &str,
        label: &str,
        category: Option<&str>,
        added_by: &str,
    ) -> Result<Vec<AdminLabel>> {
        check_length(label, MAX_LABEL_CHARS, "Label")?;
        if let Some(category) = category {
            check_length(category, MAX_LABEL_CHARS, "Category")?;
        }

        sqlx::query(
            "INSERT INTO message_labels (message_id, label, category, added_by, added_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(message_id, label) DO UPDATE SET
                 category = excluded.category, added_by = excluded.added_by, added_at = excluded.added_at",
        )
        .bind(message_id)
        .bind(label.trim())
        .bind(category.map(str::trim))
        .bind(added_by)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        self.labels_for(message_id).await
    }

    pub async fn remove_label(&self, message_id: &str, label: &str) -> Result<Vec<AdminLabel>> {
        sqlx::query("DELETE FROM message_labels WHERE message_id = ? AND label = ?")
            .bind(message_id)
            .bind(label)
            .execute(&self.pool)
            .await?;

        self.labels_for(message_id).await
    }

    pub async fn labels_for(&self, message_id: &str) -> Result<Vec<AdminLabel>> {
        let rows = sqlx::query_as::<_, LabelRow>(
            "SELECT label, category, added_by, added_at FROM message_labels
             WHERE message_id = ? ORDER BY added_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| AdminLabel {
                label: r.label,
                category: r.category,
                added_by: r.added_by,
                added_at: from_millis(r.added_at),
            })
            .collect())
    }

    pub async fn add_note(&self, message_id: &str, author_id: &str, note: &str) -> Result<InternalNote> {
        check_length(note, MAX_NOTE_CHARS, "Note")?;

        let created_at = now_millis();
        let id = sqlx::query(
            "INSERT INTO message_notes (message_id, author_id, note, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(author_id)
        .bind(note)
        .bind(created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(InternalNote {
            id,
            author_id: author_id.to_string(),
            note: note.to_string(),
            created_at: from_millis(created_at),
        })
    }

    pub async fn notes_for(&self, message_id: &str) -> Result<Vec<InternalNote>> {
        let rows = sqlx::query_as::<_, NoteRow>(
            "SELECT id, author_id, note, created_at FROM message_notes
             WHERE message_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| InternalNote {
                id: r.id,
                author_id: r.author_id,
                note: r.note,
                created_at: from_millis(r.created_at),
            })
            .collect())
    }

    /// Record a user report. A user may report a given message once; a second
    /// report is rejected. Returns the message's total report count.
    pub async fn add_report(&self, message_id: &str, reporter_id: &str, reason: &str) -> Result<usize> {
        check_length(reason, MAX_REPORT_CHARS, "Reason")?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO message_reports (message_id, reporter_id, reason, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(reporter_id)
        .bind(reason)
        .bind(now_millis())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(AppError::validation("You have already reported this message"));
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM message_reports WHERE message_id = ?")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }

    pub async fn reports_for(&self, message_id: &str) -> Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            "SELECT id, reporter_id, reason, created_at FROM message_reports
             WHERE message_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Report {
                id: r.id,
                reporter_id: r.reporter_id,
                reason: r.reason,
                created_at: from_millis(r.created_at),
            })
            .collect())
    }
}
