use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use procura_core::domain::actor::UserId;
use procura_core::domain::notification::{Notification, OutgoingNotification};
use procura_core::ports::Notifier;
use procura_core::ApplicationError;

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

/// Persists notifications to the `notification` table, which doubles as the
/// per-user inbox.
pub struct SqlNotificationOutbox {
    pool: DbPool,
}

impl SqlNotificationOutbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for SqlNotificationOutbox {
    async fn notify(&self, notification: &OutgoingNotification) -> Result<(), ApplicationError> {
        sqlx::query(
            "INSERT INTO notification (user_id, message, link, is_read, created_at)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&notification.user_id.0)
        .bind(&notification.message)
        .bind(&notification.link)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn inbox(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, ApplicationError> {
        let rows = sqlx::query(
            "SELECT id, user_id, message, link, is_read, created_at
             FROM notification
             WHERE user_id = ? AND (? = 0 OR is_read = 0)
             ORDER BY id DESC",
        )
        .bind(&user_id.0)
        .bind(unread_only)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(notification_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_read(
        &self,
        user_id: &UserId,
        notification_id: i64,
    ) -> Result<bool, ApplicationError> {
        let result = sqlx::query("UPDATE notification SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(notification_id)
            .bind(&user_id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        let result =
            sqlx::query("UPDATE notification SET is_read = 1 WHERE user_id = ? AND is_read = 0")
                .bind(&user_id.0)
                .execute(&self.pool)
                .await
                .map_err(RepositoryError::from)?;
        Ok(result.rows_affected())
    }

    async fn unread_count(&self, user_id: &UserId) -> Result<u64, ApplicationError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM notification WHERE user_id = ? AND is_read = 0",
        )
        .bind(&user_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .try_get::<i64, _>("count")
        .map_err(RepositoryError::from)?;
        Ok(count.max(0) as u64)
    }
}

fn notification_from_row(row: SqliteRow) -> Result<Notification, RepositoryError> {
    Ok(Notification {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        message: row.try_get("message")?,
        link: row.try_get("link")?,
        is_read: row.try_get::<i64, _>("is_read")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
