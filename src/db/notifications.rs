//! Notification persistence and backlog queries.

use super::{DbError, now_rfc3339, sql_id};
use crate::protocol::{NotificationPayload, UserId};
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: String,
    pub sender_id: Option<UserId>,
    pub receiver_id: UserId,
    pub alarm_type: String,
    pub title: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

impl NotificationRecord {
    pub fn new(
        sender_id: Option<UserId>,
        receiver_id: UserId,
        alarm_type: String,
        title: Option<String>,
        content: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id,
            receiver_id,
            alarm_type,
            title,
            content,
            is_read: false,
            created_at: now_rfc3339(),
        }
    }

    pub fn to_payload(&self) -> NotificationPayload {
        NotificationPayload {
            id: self.id.clone(),
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            alarm_type: self.alarm_type.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            is_read: self.is_read,
            created_at: self.created_at.clone(),
        }
    }
}

type NotificationRow = (
    String,
    Option<i64>,
    i64,
    String,
    Option<String>,
    String,
    bool,
    String,
);

pub struct NotificationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> NotificationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, n: &NotificationRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, sender_id, receiver_id, alarm_type, title, content, is_read, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&n.id)
        .bind(n.sender_id.map(sql_id).transpose()?)
        .bind(sql_id(n.receiver_id)?)
        .bind(&n.alarm_type)
        .bind(&n.title)
        .bind(&n.content)
        .bind(n.is_read)
        .bind(&n.created_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Unread notifications, newest first.
    pub async fn unread_for(
        &self,
        receiver: UserId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DbError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, sender_id, receiver_id, alarm_type, title, content, is_read, created_at
            FROM notifications
            WHERE receiver_id = ? AND is_read = 0
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(sql_id(receiver)?)
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, sender_id, receiver_id, alarm_type, title, content, is_read, created_at)| {
                    NotificationRecord {
                        id,
                        sender_id: sender_id.map(|s| s as UserId),
                        receiver_id: receiver_id as UserId,
                        alarm_type,
                        title,
                        content,
                        is_read,
                        created_at,
                    }
                },
            )
            .collect())
    }

    /// Returns `false` if `receiver` has no notification with this id.
    pub async fn mark_read(&self, id: &str, receiver: UserId) -> Result<bool, DbError> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND receiver_id = ?")
                .bind(id)
                .bind(sql_id(receiver)?)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
