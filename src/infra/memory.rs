//! Process-local backends for tests and single-node development.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::notification::{DeletedNotification, Notification, NotificationPage};
use crate::infra::cache::{CachedCount, UnreadCountCache};
use crate::infra::store::NotificationStore;

#[derive(Clone, Default)]
pub struct MemoryNotificationStore {
    rows: Arc<Mutex<HashMap<Uuid, Notification>>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Notification>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, notification: &Notification) -> Result<Notification> {
        let mut rows = self.rows()?;
        if rows.contains_key(&notification.id) {
            return Err(anyhow!("duplicate notification id {}", notification.id));
        }
        rows.insert(notification.id, notification.clone());
        Ok(notification.clone())
    }

    async fn create_batch(&self, notifications: &[Notification]) -> Result<Vec<Notification>> {
        let mut rows = self.rows()?;
        let mut seen = HashSet::with_capacity(notifications.len());
        if let Some(dup) = notifications
            .iter()
            .find(|n| rows.contains_key(&n.id) || !seen.insert(n.id))
        {
            return Err(anyhow!("duplicate notification id {}", dup.id));
        }
        for notification in notifications {
            rows.insert(notification.id, notification.clone());
        }
        Ok(notifications.to_vec())
    }

    async fn get(&self, id: Uuid, recipient: Uuid) -> Result<Option<Notification>> {
        let rows = self.rows()?;
        Ok(rows
            .get(&id)
            .filter(|n| n.target_user_id == recipient)
            .cloned())
    }

    async fn list(
        &self,
        recipient: Uuid,
        scope: Uuid,
        page: i64,
        limit: i64,
        unread_only: bool,
    ) -> Result<NotificationPage> {
        let rows = self.rows()?;
        let mut matching: Vec<&Notification> = rows
            .values()
            .filter(|n| n.target_user_id == recipient && n.scope_id == scope)
            .filter(|n| !unread_only || !n.is_read)
            .collect();
        matching.sort_by_key(|n| Reverse((n.created_at, n.id)));

        let total = matching.len() as i64;
        let Some(offset) = NotificationPage::offset(page, limit) else {
            return Ok(NotificationPage::beyond_end(total));
        };
        let items: Vec<Notification> = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        let has_more = offset + (items.len() as i64) < total;

        Ok(NotificationPage {
            items,
            total,
            has_more,
        })
    }

    async fn count_unread(&self, recipient: Uuid, scope: Uuid) -> Result<i64> {
        let rows = self.rows()?;
        Ok(rows
            .values()
            .filter(|n| n.target_user_id == recipient && n.scope_id == scope && !n.is_read)
            .count() as i64)
    }

    async fn mark_read(&self, id: Uuid, recipient: Uuid) -> Result<Option<Notification>> {
        let mut rows = self.rows()?;
        let Some(notification) = rows
            .get_mut(&id)
            .filter(|n| n.target_user_id == recipient)
        else {
            return Ok(None);
        };
        if !notification.is_read {
            notification.is_read = true;
            notification.read_at = Some(OffsetDateTime::now_utc());
        }
        Ok(Some(notification.clone()))
    }

    async fn mark_all_read(&self, recipient: Uuid, scope: Uuid) -> Result<u64> {
        let mut rows = self.rows()?;
        let now = OffsetDateTime::now_utc();
        let mut updated = 0;
        for notification in rows.values_mut() {
            if notification.target_user_id == recipient
                && notification.scope_id == scope
                && !notification.is_read
            {
                notification.is_read = true;
                notification.read_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, id: Uuid, recipient: Uuid) -> Result<Option<DeletedNotification>> {
        let mut rows = self.rows()?;
        let owned = rows
            .get(&id)
            .map(|n| n.target_user_id == recipient)
            .unwrap_or(false);
        if !owned {
            return Ok(None);
        }
        Ok(rows.remove(&id).map(|n| DeletedNotification {
            scope_id: n.scope_id,
            was_unread: !n.is_read,
        }))
    }

    async fn delete_older_than(&self, threshold_days: u32) -> Result<u64> {
        let mut rows = self.rows()?;
        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(i64::from(threshold_days));
        let before = rows.len();
        rows.retain(|_, n| !(n.is_read && n.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.rows().map(|_| ())
    }
}

/// TTL map standing in for Redis, with the same versioned writes.
#[derive(Clone, Default)]
pub struct MemoryUnreadCache {
    inner: Arc<Mutex<CacheEntries>>,
}

#[derive(Default)]
struct CacheEntries {
    counts: HashMap<(Uuid, Uuid), (i64, Instant)>,
    versions: HashMap<(Uuid, Uuid), u64>,
}

impl MemoryUnreadCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, CacheEntries>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory cache lock poisoned"))
    }

    /// Whether a live entry exists, without touching it.
    pub fn contains(&self, recipient: Uuid, scope: Uuid) -> bool {
        self.entries()
            .map(|entries| {
                entries
                    .counts
                    .get(&(recipient, scope))
                    .map(|(_, expires_at)| *expires_at > Instant::now())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl UnreadCountCache for MemoryUnreadCache {
    async fn get(&self, recipient: Uuid, scope: Uuid) -> Result<CachedCount> {
        let mut entries = self.entries()?;
        let key = (recipient, scope);
        match entries.counts.get(&key) {
            Some((count, expires_at)) if *expires_at > Instant::now() => {
                return Ok(CachedCount::Hit(*count));
            }
            Some(_) => {
                entries.counts.remove(&key);
            }
            None => {}
        }
        let version = entries.versions.get(&key).copied().unwrap_or(0);
        Ok(CachedCount::Miss { version })
    }

    async fn set(
        &self,
        recipient: Uuid,
        scope: Uuid,
        count: i64,
        version: u64,
        ttl: Duration,
    ) -> Result<bool> {
        let mut entries = self.entries()?;
        let key = (recipient, scope);
        if entries.versions.get(&key).copied().unwrap_or(0) != version {
            return Ok(false);
        }
        entries.counts.insert(key, (count, Instant::now() + ttl));
        Ok(true)
    }

    async fn invalidate(&self, recipient: Uuid, scope: Uuid) -> Result<()> {
        let mut entries = self.entries()?;
        let key = (recipient, scope);
        *entries.versions.entry(key).or_default() += 1;
        entries.counts.remove(&key);
        Ok(())
    }
}
