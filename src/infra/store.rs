use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::notification::{
    DeletedNotification, Metadata, Notification, NotificationPage, NotificationType, ResourceType,
};
use crate::infra::db::Db;

/// Durable home of notification records.
///
/// Every recipient-scoped method filters by `recipient` in the same statement
/// that finds or mutates the row, so a caller can never observe or touch a
/// notification addressed to somebody else.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<Notification>;

    /// Inserts all records or none of them.
    async fn create_batch(&self, notifications: &[Notification]) -> Result<Vec<Notification>>;

    async fn get(&self, id: Uuid, recipient: Uuid) -> Result<Option<Notification>>;

    /// Newest first. `page` starts at 1.
    async fn list(
        &self,
        recipient: Uuid,
        scope: Uuid,
        page: i64,
        limit: i64,
        unread_only: bool,
    ) -> Result<NotificationPage>;

    async fn count_unread(&self, recipient: Uuid, scope: Uuid) -> Result<i64>;

    /// Returns `None` when the notification does not exist for `recipient`.
    /// Marking an already-read notification keeps its original `read_at`.
    async fn mark_read(&self, id: Uuid, recipient: Uuid) -> Result<Option<Notification>>;

    async fn mark_all_read(&self, recipient: Uuid, scope: Uuid) -> Result<u64>;

    async fn delete(&self, id: Uuid, recipient: Uuid) -> Result<Option<DeletedNotification>>;

    /// Purges read notifications created more than `threshold_days` ago.
    async fn delete_older_than(&self, threshold_days: u32) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

const NOTIFICATION_COLUMNS: &str = "id, notification_type, actor_id, target_user_id, scope_id, \
     resource_type, resource_id, resource_name, metadata, is_read, read_at, created_at";

#[derive(Clone)]
pub struct PgNotificationStore {
    db: Db,
}

impl PgNotificationStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, notification: &Notification) -> Result<Notification> {
        let row = insert_query(notification)
            .fetch_one(self.db.pool())
            .await?;
        notification_from_row(&row)
    }

    async fn create_batch(&self, notifications: &[Notification]) -> Result<Vec<Notification>> {
        let mut tx = self.db.pool().begin().await?;
        let mut created = Vec::with_capacity(notifications.len());
        for notification in notifications {
            let row = insert_query(notification).fetch_one(&mut *tx).await?;
            created.push(notification_from_row(&row)?);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn get(&self, id: Uuid, recipient: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = $1 AND target_user_id = $2",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .bind(recipient)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn list(
        &self,
        recipient: Uuid,
        scope: Uuid,
        page: i64,
        limit: i64,
        unread_only: bool,
    ) -> Result<NotificationPage> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications \
             WHERE target_user_id = $1 AND scope_id = $2 \
               AND ($3 = false OR is_read = false)",
        )
        .bind(recipient)
        .bind(scope)
        .bind(unread_only)
        .fetch_one(self.db.pool())
        .await?;

        let Some(offset) = NotificationPage::offset(page, limit) else {
            return Ok(NotificationPage::beyond_end(total));
        };

        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications \
             WHERE target_user_id = $1 AND scope_id = $2 \
               AND ($3 = false OR is_read = false) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5",
            NOTIFICATION_COLUMNS
        ))
        .bind(recipient)
        .bind(scope)
        .bind(unread_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(notification_from_row(&row)?);
        }
        let has_more = offset + (items.len() as i64) < total;

        Ok(NotificationPage {
            items,
            total,
            has_more,
        })
    }

    async fn count_unread(&self, recipient: Uuid, scope: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications \
             WHERE target_user_id = $1 AND scope_id = $2 AND is_read = false",
        )
        .bind(recipient)
        .bind(scope)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    async fn mark_read(&self, id: Uuid, recipient: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "UPDATE notifications \
             SET is_read = true, read_at = COALESCE(read_at, now()) \
             WHERE id = $1 AND target_user_id = $2 \
             RETURNING {}",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .bind(recipient)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn mark_all_read(&self, recipient: Uuid, scope: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET is_read = true, read_at = now() \
             WHERE target_user_id = $1 AND scope_id = $2 AND is_read = false",
        )
        .bind(recipient)
        .bind(scope)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid, recipient: Uuid) -> Result<Option<DeletedNotification>> {
        let row = sqlx::query(
            "DELETE FROM notifications \
             WHERE id = $1 AND target_user_id = $2 \
             RETURNING scope_id, is_read",
        )
        .bind(id)
        .bind(recipient)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let is_read: bool = row.try_get("is_read")?;
        Ok(Some(DeletedNotification {
            scope_id: row.try_get("scope_id")?,
            was_unread: !is_read,
        }))
    }

    async fn delete_older_than(&self, threshold_days: u32) -> Result<u64> {
        let days = i32::try_from(threshold_days)
            .map_err(|_| anyhow!("retention window too large: {} days", threshold_days))?;
        let result = sqlx::query(
            "DELETE FROM notifications \
             WHERE is_read = true \
               AND created_at < now() - make_interval(days => $1)",
        )
        .bind(days)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await
    }
}

fn insert_query(
    notification: &Notification,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(INSERT_NOTIFICATION)
        .bind(notification.id)
        .bind(notification.notification_type.as_db())
        .bind(notification.actor_id)
        .bind(notification.target_user_id)
        .bind(notification.scope_id)
        .bind(notification.resource_type.as_db())
        .bind(notification.resource_id)
        .bind(notification.resource_name.as_deref())
        .bind(Json(&notification.metadata))
        .bind(notification.is_read)
        .bind(notification.read_at)
        .bind(notification.created_at)
}

const INSERT_NOTIFICATION: &str = "INSERT INTO notifications \
     (id, notification_type, actor_id, target_user_id, scope_id, resource_type, resource_id, \
      resource_name, metadata, is_read, read_at, created_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
     RETURNING id, notification_type, actor_id, target_user_id, scope_id, \
      resource_type, resource_id, resource_name, metadata, is_read, read_at, created_at";

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let notification_type: String = row.try_get("notification_type")?;
    let notification_type = NotificationType::from_db(&notification_type)
        .ok_or_else(|| anyhow!("unknown notification type: {}", notification_type))?;
    let resource_type: String = row.try_get("resource_type")?;
    let resource_type = ResourceType::from_db(&resource_type)
        .ok_or_else(|| anyhow!("unknown resource type: {}", resource_type))?;
    let Json(metadata): Json<Metadata> = row.try_get("metadata")?;

    Ok(Notification {
        id: row.try_get("id")?,
        notification_type,
        actor_id: row.try_get("actor_id")?,
        target_user_id: row.try_get("target_user_id")?,
        scope_id: row.try_get("scope_id")?,
        resource_type,
        resource_id: row.try_get("resource_id")?,
        resource_name: row.try_get("resource_name")?,
        metadata,
        is_read: row.try_get("is_read")?,
        read_at: row.try_get("read_at")?,
        created_at: row.try_get("created_at")?,
    })
}
