use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::notification::{
    Metadata, NewNotification, Notification, NotificationPage,
};
use crate::infra::bus::{user_channel, FanoutBus};
use crate::infra::cache::{CachedCount, UnreadCountCache};
use crate::infra::store::NotificationStore;

pub const DEFAULT_UNREAD_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

const MAX_RESOURCE_NAME_CHARS: usize = 255;
const MAX_METADATA_KEYS: usize = 64;
const MAX_METADATA_DEPTH: usize = 4;
const MAX_CLOCK_SKEW: time::Duration = time::Duration::minutes(5);

#[derive(Debug, Error)]
pub enum NotificationError {
    /// Also returned when the notification exists but belongs to someone else.
    #[error("notification not found")]
    NotFound,
    #[error("invalid notification: {0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Creates notifications and manages their read state.
///
/// Only the store write is load-bearing. Cache invalidation and the live
/// publish run after it and can fail without failing the operation.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    cache: Arc<dyn UnreadCountCache>,
    bus: Arc<dyn FanoutBus>,
    cache_ttl: Duration,
    retention_days: u32,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        cache: Arc<dyn UnreadCountCache>,
        bus: Arc<dyn FanoutBus>,
    ) -> Self {
        Self {
            store,
            cache,
            bus,
            cache_ttl: DEFAULT_UNREAD_CACHE_TTL,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub async fn create(&self, event: NewNotification) -> Result<Notification, NotificationError> {
        let now = OffsetDateTime::now_utc();
        validate(&event, now)?;

        let notification = event.into_notification(now);
        let created = self.store.create(&notification).await?;

        self.invalidate_unread(created.target_user_id, created.scope_id)
            .await;
        self.publish(&created).await;

        Ok(created)
    }

    /// Creates each event independently. Invalid events and rows the store
    /// rejects are logged and left out of the result; the call only fails
    /// when every event failed.
    ///
    /// Valid events are written in one transaction. If that fails they are
    /// retried one at a time so a single bad row cannot sink the rest.
    pub async fn create_batch(
        &self,
        events: Vec<NewNotification>,
    ) -> Result<Vec<Notification>, NotificationError> {
        let now = OffsetDateTime::now_utc();
        let total = events.len();
        let mut pending = Vec::with_capacity(total);
        let mut last_error = None;

        for (index, event) in events.into_iter().enumerate() {
            match validate(&event, now) {
                Ok(()) => pending.push(event.into_notification(now)),
                Err(err) => {
                    warn!(
                        error = %err,
                        index,
                        total,
                        user_id = %event.target_user_id,
                        "rejected notification in batch"
                    );
                    last_error = Some(err);
                }
            }
        }

        let created = if pending.is_empty() {
            Vec::new()
        } else {
            match self.store.create_batch(&pending).await {
                Ok(created) => created,
                Err(err) => {
                    warn!(error = ?err, rows = pending.len(), "batch insert failed, inserting individually");
                    let mut created = Vec::with_capacity(pending.len());
                    for notification in &pending {
                        match self.store.create(notification).await {
                            Ok(notification) => created.push(notification),
                            Err(err) => {
                                warn!(
                                    error = ?err,
                                    notification_id = %notification.id,
                                    user_id = %notification.target_user_id,
                                    "failed to create notification in batch"
                                );
                                last_error = Some(err.into());
                            }
                        }
                    }
                    created
                }
            }
        };

        for notification in &created {
            self.invalidate_unread(notification.target_user_id, notification.scope_id)
                .await;
            self.publish(notification).await;
        }

        match last_error {
            Some(err) if created.is_empty() => Err(err),
            _ => Ok(created),
        }
    }

    pub async fn get(&self, id: Uuid, recipient: Uuid) -> Result<Notification, NotificationError> {
        self.store
            .get(id, recipient)
            .await?
            .ok_or(NotificationError::NotFound)
    }

    pub async fn list(
        &self,
        recipient: Uuid,
        scope: Uuid,
        page: i64,
        limit: i64,
        unread_only: bool,
    ) -> Result<NotificationPage, NotificationError> {
        Ok(self
            .store
            .list(recipient, scope, page, limit, unread_only)
            .await?)
    }

    pub async fn mark_as_read(
        &self,
        id: Uuid,
        recipient: Uuid,
    ) -> Result<Notification, NotificationError> {
        let notification = self
            .store
            .mark_read(id, recipient)
            .await?
            .ok_or(NotificationError::NotFound)?;

        self.invalidate_unread(recipient, notification.scope_id)
            .await;
        Ok(notification)
    }

    pub async fn mark_all_as_read(
        &self,
        recipient: Uuid,
        scope: Uuid,
    ) -> Result<u64, NotificationError> {
        let updated = self.store.mark_all_read(recipient, scope).await?;
        self.invalidate_unread(recipient, scope).await;
        Ok(updated)
    }

    /// Cache-aside read. Any cache failure falls through to the store, and a
    /// recomputed count is dropped if a write invalidated the key meanwhile.
    pub async fn get_unread_count(
        &self,
        recipient: Uuid,
        scope: Uuid,
    ) -> Result<i64, NotificationError> {
        let version = match self.cache.get(recipient, scope).await {
            Ok(CachedCount::Hit(count)) => return Ok(count),
            Ok(CachedCount::Miss { version }) => Some(version),
            Err(err) => {
                warn!(error = ?err, user_id = %recipient, scope_id = %scope, "unread cache read failed");
                None
            }
        };

        let count = self.store.count_unread(recipient, scope).await?;

        if let Some(version) = version {
            match self
                .cache
                .set(recipient, scope, count, version, self.cache_ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(user_id = %recipient, scope_id = %scope, "unread count changed while computing, not cached");
                }
                Err(err) => {
                    warn!(error = ?err, user_id = %recipient, scope_id = %scope, "unread cache write failed");
                }
            }
        }
        Ok(count)
    }

    pub async fn delete(&self, id: Uuid, recipient: Uuid) -> Result<(), NotificationError> {
        let deleted = self
            .store
            .delete(id, recipient)
            .await?
            .ok_or(NotificationError::NotFound)?;

        if deleted.was_unread {
            self.invalidate_unread(recipient, deleted.scope_id).await;
        }
        Ok(())
    }

    /// Purges read notifications past the retention window.
    pub async fn cleanup_old(&self) -> Result<u64, NotificationError> {
        let deleted = self.store.delete_older_than(self.retention_days).await?;
        if deleted > 0 {
            info!(
                rows = deleted,
                retention_days = self.retention_days,
                "purged old read notifications"
            );
        }
        Ok(deleted)
    }

    async fn invalidate_unread(&self, recipient: Uuid, scope: Uuid) {
        if let Err(err) = self.cache.invalidate(recipient, scope).await {
            warn!(error = ?err, user_id = %recipient, scope_id = %scope, "failed to invalidate unread cache");
        }
    }

    /// Live delivery is best effort; this is the only place its errors are dropped.
    async fn publish(&self, notification: &Notification) {
        if let Err(err) = self.try_publish(notification).await {
            warn!(
                error = ?err,
                notification_id = %notification.id,
                user_id = %notification.target_user_id,
                "failed to publish notification"
            );
        }
    }

    async fn try_publish(&self, notification: &Notification) -> anyhow::Result<()> {
        let payload = serde_json::to_string(notification)?;
        self.bus
            .publish(&user_channel(notification.target_user_id), &payload)
            .await
    }
}

fn validate(event: &NewNotification, now: OffsetDateTime) -> Result<(), NotificationError> {
    let ids = [
        ("actorId", event.actor_id),
        ("targetUserId", event.target_user_id),
        ("scopeId", event.scope_id),
        ("resourceId", event.resource_id),
    ];
    if let Some((field, _)) = ids.iter().find(|(_, id)| id.is_nil()) {
        return Err(NotificationError::Validation(format!("{} is required", field)));
    }

    if let Some(name) = &event.resource_name {
        if name.trim().is_empty() {
            return Err(NotificationError::Validation(
                "resourceName must not be blank".into(),
            ));
        }
        if name.chars().count() > MAX_RESOURCE_NAME_CHARS {
            return Err(NotificationError::Validation(format!(
                "resourceName must be at most {} characters",
                MAX_RESOURCE_NAME_CHARS
            )));
        }
    }

    validate_metadata(&event.metadata)?;

    if let Some(occurred_at) = event.occurred_at {
        if occurred_at > now + MAX_CLOCK_SKEW {
            return Err(NotificationError::Validation(
                "occurredAt must not be in the future".into(),
            ));
        }
    }

    Ok(())
}

fn validate_metadata(metadata: &Metadata) -> Result<(), NotificationError> {
    if metadata.len() > MAX_METADATA_KEYS {
        return Err(NotificationError::Validation(format!(
            "metadata must have at most {} keys",
            MAX_METADATA_KEYS
        )));
    }
    let depth = 1 + metadata.values().map(|v| v.depth()).max().unwrap_or(0);
    if depth > MAX_METADATA_DEPTH {
        return Err(NotificationError::Validation(format!(
            "metadata must be nested at most {} levels",
            MAX_METADATA_DEPTH
        )));
    }
    Ok(())
}
