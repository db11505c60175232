//! User repository.

use super::{DbError, now_rfc3339, sql_id};
use crate::protocol::UserId;
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or rename a user.
    pub async fn upsert(&self, id: UserId, name: &str, email: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, email = excluded.email
            "#,
        )
        .bind(sql_id(id)?)
        .bind(name)
        .bind(email)
        .bind(now_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, name, email FROM users WHERE id = ?",
        )
        .bind(sql_id(id)?)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(id, name, email)| UserRecord {
            id: id as UserId,
            name,
            email,
        }))
    }
}
