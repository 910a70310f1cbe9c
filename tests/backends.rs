//! Postgres and Redis Backend Tests
//!
//! Runs against real services. Set `TEST_DATABASE_BASE_URL` (and optionally
//! `TEST_DATABASE_NAME`) for the store tests and `TEST_REDIS_URL` for the
//! cache and bus tests; each test is skipped when its service is not
//! configured. Rows are keyed by fresh recipients so runs never collide.

mod common;

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use sqlx::PgPool;
use uuid::Uuid;

use common::new_event;
use herald::domain::notification::Notification;
use herald::infra::bus::{user_channel, FanoutBus, RedisBus};
use herald::infra::cache::{CachedCount, RedisCache, RedisUnreadCache, UnreadCountCache};
use herald::infra::db::Db;
use herald::infra::store::{NotificationStore, PgNotificationStore};

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

async fn postgres_store() -> Option<PgNotificationStore> {
    let Ok(base_url) = std::env::var("TEST_DATABASE_BASE_URL") else {
        eprintln!("TEST_DATABASE_BASE_URL not set, skipping");
        return None;
    };
    let test_db = std::env::var("TEST_DATABASE_NAME").unwrap_or_else(|_| "herald_test".into());

    let admin_pool = PgPool::connect(&format!("{}/postgres", base_url))
        .await
        .expect("cannot connect to postgres admin database");
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(&test_db)
            .fetch_one(&admin_pool)
            .await
            .expect("failed to check test db existence");
    if !exists {
        // CREATE DATABASE cannot run inside a transaction
        sqlx::query(&format!("CREATE DATABASE \"{}\"", test_db))
            .execute(&admin_pool)
            .await
            .expect("failed to create test database");
    }
    admin_pool.close().await;

    let db = Db::connect_url(&format!("{}/{}", base_url, test_db), 5)
        .await
        .expect("cannot connect to test database");
    db.migrate(Path::new("migrations"))
        .await
        .expect("migrations failed");
    Some(PgNotificationStore::new(db))
}

async fn redis() -> Option<RedisCache> {
    let Ok(redis_url) = std::env::var("TEST_REDIS_URL") else {
        eprintln!("TEST_REDIS_URL not set, skipping");
        return None;
    };
    Some(
        RedisCache::connect(&redis_url)
            .await
            .expect("cannot connect to test redis"),
    )
}

fn notification(recipient: Uuid, scope: Uuid) -> Notification {
    new_event(recipient, scope).into_notification(time::OffsetDateTime::now_utc())
}

fn ids(notifications: &[Notification]) -> Vec<Uuid> {
    notifications.iter().map(|n| n.id).collect()
}

// ===========================================================================
// Postgres Store
// ===========================================================================

#[tokio::test]
async fn pg_rows_are_invisible_to_other_recipients() {
    let Some(store) = postgres_store().await else { return };
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let scope = Uuid::new_v4();
    let created = store.create(&notification(owner, scope)).await.unwrap();

    assert!(store.get(created.id, stranger).await.unwrap().is_none());
    assert!(store.mark_read(created.id, stranger).await.unwrap().is_none());
    assert!(store.delete(created.id, stranger).await.unwrap().is_none());
    assert_eq!(store.mark_all_read(stranger, scope).await.unwrap(), 0);
    assert_eq!(store.list(stranger, scope, 1, 20, false).await.unwrap().total, 0);

    let still_there = store.get(created.id, owner).await.unwrap().unwrap();
    assert!(!still_there.is_read);
    assert_eq!(store.count_unread(owner, scope).await.unwrap(), 1);
}

#[tokio::test]
async fn pg_mark_read_is_idempotent() {
    let Some(store) = postgres_store().await else { return };
    let owner = Uuid::new_v4();
    let scope = Uuid::new_v4();
    let created = store.create(&notification(owner, scope)).await.unwrap();

    let first = store.mark_read(created.id, owner).await.unwrap().unwrap();
    let second = store.mark_read(created.id, owner).await.unwrap().unwrap();

    assert!(first.is_read);
    assert!(first.read_at.is_some());
    assert_eq!(second.read_at, first.read_at);
    assert_eq!(store.count_unread(owner, scope).await.unwrap(), 0);
    assert_eq!(store.mark_all_read(owner, scope).await.unwrap(), 0);
}

#[tokio::test]
async fn pg_list_pages_newest_first() {
    let Some(store) = postgres_store().await else { return };
    let owner = Uuid::new_v4();
    let scope = Uuid::new_v4();
    let now = time::OffsetDateTime::now_utc();
    let mut created = Vec::new();
    for minutes in [3, 2, 1] {
        let mut row = notification(owner, scope);
        row.created_at = now - time::Duration::minutes(minutes);
        created.push(store.create(&row).await.unwrap());
    }

    let first = store.list(owner, scope, 1, 2, false).await.unwrap();
    assert_eq!(first.total, 3);
    assert!(first.has_more);
    assert_eq!(ids(&first.items), vec![created[2].id, created[1].id]);

    let second = store.list(owner, scope, 2, 2, false).await.unwrap();
    assert!(!second.has_more);
    assert_eq!(ids(&second.items), vec![created[0].id]);

    let beyond = store.list(owner, scope, i64::MAX, 2, false).await.unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 3);
}

#[tokio::test]
async fn pg_retention_removes_only_old_read_rows() {
    let Some(store) = postgres_store().await else { return };
    let owner = Uuid::new_v4();
    let scope = Uuid::new_v4();
    let old = time::OffsetDateTime::now_utc() - time::Duration::days(31);

    let mut old_read = notification(owner, scope);
    old_read.created_at = old;
    let old_read = store.create(&old_read).await.unwrap();
    store.mark_read(old_read.id, owner).await.unwrap();

    let mut old_unread = notification(owner, scope);
    old_unread.created_at = old;
    let old_unread = store.create(&old_unread).await.unwrap();

    let recent_read = store.create(&notification(owner, scope)).await.unwrap();
    store.mark_read(recent_read.id, owner).await.unwrap();

    assert!(store.delete_older_than(30).await.unwrap() >= 1);

    assert!(store.get(old_read.id, owner).await.unwrap().is_none());
    assert!(store.get(old_unread.id, owner).await.unwrap().is_some());
    assert!(store.get(recent_read.id, owner).await.unwrap().is_some());
}

#[tokio::test]
async fn pg_batch_is_all_or_nothing() {
    let Some(store) = postgres_store().await else { return };
    let owner = Uuid::new_v4();
    let scope = Uuid::new_v4();

    let batch = vec![notification(owner, scope), notification(owner, scope)];
    let created = store.create_batch(&batch).await.unwrap();
    assert_eq!(ids(&created), ids(&batch));
    assert_eq!(store.count_unread(owner, scope).await.unwrap(), 2);

    let fresh = notification(owner, scope);
    assert!(store
        .create_batch(&[fresh.clone(), batch[0].clone()])
        .await
        .is_err());
    assert!(store.get(fresh.id, owner).await.unwrap().is_none());
    assert_eq!(store.count_unread(owner, scope).await.unwrap(), 2);
}

// ===========================================================================
// Redis Unread Cache
// ===========================================================================

#[tokio::test]
async fn redis_cache_stores_and_invalidates() {
    let Some(redis) = redis().await else { return };
    let cache = RedisUnreadCache::new(redis);
    let recipient = Uuid::new_v4();
    let scope = Uuid::new_v4();

    let CachedCount::Miss { version } = cache.get(recipient, scope).await.unwrap() else {
        panic!("fresh key should miss");
    };
    assert!(cache
        .set(recipient, scope, 4, version, Duration::from_secs(60))
        .await
        .unwrap());
    assert_eq!(cache.get(recipient, scope).await.unwrap(), CachedCount::Hit(4));

    cache.invalidate(recipient, scope).await.unwrap();
    assert!(matches!(
        cache.get(recipient, scope).await.unwrap(),
        CachedCount::Miss { .. }
    ));
}

#[tokio::test]
async fn redis_cache_rejects_write_after_invalidation() {
    let Some(redis) = redis().await else { return };
    let cache = RedisUnreadCache::new(redis);
    let recipient = Uuid::new_v4();
    let scope = Uuid::new_v4();

    let CachedCount::Miss { version } = cache.get(recipient, scope).await.unwrap() else {
        panic!("fresh key should miss");
    };
    cache.invalidate(recipient, scope).await.unwrap();

    assert!(!cache
        .set(recipient, scope, 4, version, Duration::from_secs(60))
        .await
        .unwrap());
    assert!(matches!(
        cache.get(recipient, scope).await.unwrap(),
        CachedCount::Miss { .. }
    ));
}

// ===========================================================================
// Redis Bus
// ===========================================================================

#[tokio::test]
async fn redis_bus_fans_out_to_every_subscription() {
    let Some(redis) = redis().await else { return };
    let bus = RedisBus::new(redis);
    let channel = user_channel(Uuid::new_v4());

    let mut first = bus.subscribe(&channel).await.unwrap();
    let mut second = bus.subscribe(&channel).await.unwrap();
    let mut unrelated = bus.subscribe(&user_channel(Uuid::new_v4())).await.unwrap();

    bus.publish(&channel, "hello").await.unwrap();

    for subscription in [&mut first, &mut second] {
        let payload = tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("no message delivered");
        assert_eq!(payload.as_deref(), Some("hello"));
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(200), unrelated.next())
            .await
            .is_err()
    );
}
