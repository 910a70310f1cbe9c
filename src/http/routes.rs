use axum::{routing::get, routing::post, Router};

use crate::http::{handlers, stream};
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn notifications() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/stream", get(stream::notification_stream))
        .route("/notifications/unread-count", get(handlers::unread_count))
        .route("/notifications/read-all", post(handlers::mark_all_read))
        .route(
            "/notifications/:id",
            get(handlers::get_notification).delete(handlers::delete_notification),
        )
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
}

pub fn admin() -> Router<AppState> {
    Router::new()
        .route("/admin/notifications", post(handlers::create_notifications))
        .route(
            "/admin/notifications/cleanup",
            post(handlers::cleanup_notifications),
        )
}
