//! Chat message persistence.

use super::{DbError, now_rfc3339, sql_id};
use crate::protocol::{ChatPayload, GroupId, UserId};
use sqlx::SqlitePool;

/// A chat message as stored before delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub content: String,
    pub created_at: String,
}

impl ChatMessage {
    pub fn new(
        sender_id: UserId,
        receiver_id: Option<UserId>,
        group_id: Option<GroupId>,
        content: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id,
            receiver_id,
            group_id,
            content,
            created_at: now_rfc3339(),
        }
    }

    pub fn to_payload(&self, sender_name: Option<String>) -> ChatPayload {
        ChatPayload {
            id: self.id.clone(),
            sender_id: self.sender_id,
            sender_name,
            receiver_id: self.receiver_id,
            group_id: self.group_id,
            content: self.content.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, message: &ChatMessage) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, sender_id, receiver_id, room_id, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(sql_id(message.sender_id)?)
        .bind(message.receiver_id.map(sql_id).transpose()?)
        .bind(message.group_id.map(sql_id).transpose()?)
        .bind(&message.content)
        .bind(&message.created_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn insert_direct_and_room_messages() {
        let db = Database::new(":memory:").await.unwrap();
        let room = ChatMessage::new(1, None, Some(10), "one".into());
        let direct = ChatMessage::new(1, Some(2), None, "psst".into());
        db.messages().insert(&room).await.unwrap();
        db.messages().insert(&direct).await.unwrap();

        // Ids are primary keys.
        assert!(db.messages().insert(&room).await.is_err());
    }

    #[test]
    fn payload_carries_addressing() {
        let m = ChatMessage::new(1, Some(2), None, "hi".into());
        let payload = m.to_payload(Some("alice".into()));
        assert_eq!(payload.sender_id, 1);
        assert_eq!(payload.receiver_id, Some(2));
        assert_eq!(payload.group_id, None);
        assert_eq!(payload.sender_name.as_deref(), Some("alice"));
        assert_eq!(payload.id, m.id);
    }
}
