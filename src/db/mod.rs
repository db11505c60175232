//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for the collaborators
//! the hub writes through to:
//! - Users (identity checks on bind)
//! - Chat rooms and their member lists (group join authorization)
//! - Chat messages (saved before delivery)
//! - Notifications (saved before delivery, replayed on identify)
//!
//! Connection handling code depends on the [`Store`] trait rather than on
//! [`Database`] directly.

mod messages;
mod notifications;
mod rooms;
mod users;

pub use messages::{ChatMessage, MessageRepository};
pub use notifications::{NotificationRecord, NotificationRepository};
pub use rooms::RoomRepository;
pub use users::{UserRecord, UserRepository};

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::SeedConfig;
use crate::protocol::{GroupId, UserId};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migration(sqlx::migrate::MigrateError),
    #[error("id {0} does not fit in an SQLite integer")]
    IdOutOfRange(u64),
}

/// Persistence operations the hub relies on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserRecord>, DbError>;

    async fn is_group_member(&self, group: GroupId, user: UserId) -> Result<bool, DbError>;

    async fn save_message(&self, message: &ChatMessage) -> Result<(), DbError>;

    async fn save_notification(&self, notification: &NotificationRecord) -> Result<(), DbError>;

    /// Unread notifications for `receiver`, newest first.
    async fn get_notifications_by_receiver(
        &self,
        receiver: UserId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DbError>;

    async fn mark_notification_read(&self, id: &str, receiver: UserId) -> Result<bool, DbError>;
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // Uniquely named shared-cache memory database per call, so parallel
            // tests never see each other's rows.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:linkhub-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true)
                .foreign_keys(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .foreign_keys(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        // WAL lets the reader side (backlog replay) proceed during writes.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Run embedded migrations.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(DbError::Migration)?;

        info!("Database migrations checked/applied");
        Ok(())
    }

    /// Insert configured users and rooms that are not present yet.
    pub async fn seed(&self, seed: &SeedConfig) -> Result<(), DbError> {
        for user in &seed.users {
            self.users().upsert(user.id, &user.name, &user.email).await?;
        }
        for room in &seed.rooms {
            let rooms = self.rooms();
            rooms.upsert(room.id, &room.name).await?;
            for member in &room.members {
                rooms.add_member(room.id, *member).await?;
            }
        }
        info!(
            users = seed.users.len(),
            rooms = seed.rooms.len(),
            "Seed data applied"
        );
        Ok(())
    }

    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    pub fn rooms(&self) -> RoomRepository<'_> {
        RoomRepository::new(&self.pool)
    }

    pub fn messages(&self) -> MessageRepository<'_> {
        MessageRepository::new(&self.pool)
    }

    pub fn notifications(&self) -> NotificationRepository<'_> {
        NotificationRepository::new(&self.pool)
    }
}

#[async_trait]
impl Store for Database {
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserRecord>, DbError> {
        self.users().find_by_id(id).await
    }

    async fn is_group_member(&self, group: GroupId, user: UserId) -> Result<bool, DbError> {
        self.rooms().is_member(group, user).await
    }

    async fn save_message(&self, message: &ChatMessage) -> Result<(), DbError> {
        self.messages().insert(message).await
    }

    async fn save_notification(&self, notification: &NotificationRecord) -> Result<(), DbError> {
        self.notifications().insert(notification).await
    }

    async fn get_notifications_by_receiver(
        &self,
        receiver: UserId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, DbError> {
        self.notifications().unread_for(receiver, limit).await
    }

    async fn mark_notification_read(&self, id: &str, receiver: UserId) -> Result<bool, DbError> {
        self.notifications().mark_read(id, receiver).await
    }
}

/// SQLite integers are signed; ids above `i64::MAX` cannot be stored.
pub(crate) fn sql_id(id: u64) -> Result<i64, DbError> {
    i64::try_from(id).map_err(|_| DbError::IdOutOfRange(id))
}

/// Current time in the format stored in every `created_at` column.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::Sqlx(err)
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err)
    }
}
