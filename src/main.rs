use anyhow::anyhow;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald::app::auth::TokenVerifier;
use herald::app::notifications::NotificationService;
use herald::config::AppConfig;
use herald::infra::bus::{FanoutBus, LocalBus, RedisBus};
use herald::infra::cache::{NoopUnreadCache, RedisCache, RedisUnreadCache, UnreadCountCache};
use herald::infra::db::Db;
use herald::infra::store::{NotificationStore, PgNotificationStore};
use herald::realtime::{ConnectionRegistry, StreamGateway};
use herald::{http, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config).await?;
    if let Some(dir) = &config.migrations_dir {
        db.migrate(std::path::Path::new(dir)).await?;
    }
    let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(db));

    let (cache, bus): (Arc<dyn UnreadCountCache>, Arc<dyn FanoutBus>) = match &config.redis_url {
        Some(redis_url) => {
            let redis = RedisCache::connect(redis_url).await?;
            (
                Arc::new(RedisUnreadCache::new(redis.clone())),
                Arc::new(RedisBus::new(redis)),
            )
        }
        None => {
            tracing::warn!("REDIS_URL not set: unread counts are uncached and live delivery stays in this process");
            (Arc::new(NoopUnreadCache), Arc::new(LocalBus::default()))
        }
    };

    let notifications = NotificationService::new(store.clone(), cache, bus.clone())
        .with_cache_ttl(Duration::from_secs(config.unread_cache_ttl_seconds))
        .with_retention_days(config.notification_retention_days);

    let registry = Arc::new(ConnectionRegistry::new());
    let gateway = StreamGateway::new(bus.clone(), registry.clone())
        .with_keepalive_interval(Duration::from_secs(config.stream_keepalive_seconds))
        .with_buffer(config.stream_buffer);

    let state = AppState {
        notifications,
        gateway,
        store,
        bus,
        tokens: TokenVerifier::new(config.paseto_access_key),
        admin_token: config.admin_token.clone(),
    };

    match config.app_mode.as_str() {
        "api" => {
            let app: Router = http::router(state).layer(TraceLayer::new_for_http());
            let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
            tracing::info!("listening on {}", config.http_addr);

            // Open event streams never finish on their own; close them so the
            // server can drain.
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    let closed = registry.close_all();
                    tracing::info!(connections = closed, "closed notification streams");
                })
                .await?;
        }
        "worker" => {
            tracing::info!("starting worker mode");
            let interval = Duration::from_secs(config.cleanup_interval_seconds);
            tokio::select! {
                result = jobs::cleanup::run(state.notifications.clone(), interval) => {
                    result?;
                }
                _ = shutdown_signal() => {}
            }
        }
        other => return Err(anyhow!("unknown APP_MODE: {}", other)),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
