//! Chat room membership.
//!
//! The hub keeps live group membership in memory; this table decides who is
//! allowed to join a group in the first place.

use super::{DbError, now_rfc3339, sql_id};
use crate::protocol::{GroupId, UserId};
use sqlx::SqlitePool;

pub struct RoomRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RoomRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, id: GroupId, name: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO chat_rooms (id, name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(sql_id(id)?)
        .bind(name)
        .bind(now_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_member(&self, room: GroupId, user: UserId) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO chat_room_members (room_id, user_id, joined_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(sql_id(room)?)
        .bind(sql_id(user)?)
        .bind(now_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_member(&self, room: GroupId, user: UserId) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_room_members WHERE room_id = ? AND user_id = ?",
        )
        .bind(sql_id(room)?)
        .bind(sql_id(user)?)
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }
}
