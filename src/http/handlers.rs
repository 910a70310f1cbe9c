use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::notification::{NewNotification, Notification};
use crate::http::{AdminToken, AppError, AuthUser};
use crate::AppState;

const DEFAULT_PAGE_LIMIT: i64 = 20;
const MAX_PAGE_LIMIT: i64 = 100;
const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_LIMIT;
const MAX_BATCH_EVENTS: usize = 500;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    connections: usize,
    recipients: usize,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.store.ping().await.is_ok();
    let bus = state.bus.ping().await.is_ok();
    let status = if store && bus { "ok" } else { "degraded" };
    let registry = state.gateway.registry();

    Json(HealthResponse {
        status,
        connections: registry.connection_count(),
        recipients: registry.recipient_count(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub scope_id: Uuid,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    pub items: Vec<Notification>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub has_more: bool,
}

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 100"));
    }
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(AppError::bad_request("page must be at least 1"));
    }
    if page > MAX_PAGE {
        return Err(AppError::bad_request("page is out of range"));
    }

    let result = state
        .notifications
        .list(auth.user_id, query.scope_id, page, limit, query.unread_only)
        .await
        .map_err(|err| AppError::from_notification(err, "list notifications"))?;

    Ok(Json(ListResponse {
        items: result.items,
        total: result.total,
        page,
        limit,
        has_more: result.has_more,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeQuery {
    pub scope_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub scope_id: Uuid,
    pub count: i64,
}

pub async fn unread_count(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let count = state
        .notifications
        .get_unread_count(auth.user_id, query.scope_id)
        .await
        .map_err(|err| AppError::from_notification(err, "count unread notifications"))?;

    Ok(Json(UnreadCountResponse {
        scope_id: query.scope_id,
        count,
    }))
}

pub async fn get_notification(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Notification>, AppError> {
    let notification = state
        .notifications
        .get(id, auth.user_id)
        .await
        .map_err(|err| AppError::from_notification(err, "get notification"))?;

    Ok(Json(notification))
}

pub async fn mark_notification_read(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Notification>, AppError> {
    let notification = state
        .notifications
        .mark_as_read(id, auth.user_id)
        .await
        .map_err(|err| AppError::from_notification(err, "mark notification read"))?;

    Ok(Json(notification))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadRequest {
    pub scope_id: Uuid,
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

pub async fn mark_all_read(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<MarkAllReadRequest>,
) -> Result<Json<MarkAllReadResponse>, AppError> {
    let updated = state
        .notifications
        .mark_all_as_read(auth.user_id, payload.scope_id)
        .await
        .map_err(|err| AppError::from_notification(err, "mark notifications read"))?;

    Ok(Json(MarkAllReadResponse { updated }))
}

pub async fn delete_notification(
    auth: AuthUser,
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state
        .notifications
        .delete(id, auth.user_id)
        .await
        .map_err(|err| AppError::from_notification(err, "delete notification"))?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CreateNotificationsRequest {
    pub events: Vec<NewNotification>,
}

#[derive(Serialize)]
pub struct CreateNotificationsResponse {
    pub items: Vec<Notification>,
    pub failed: usize,
}

/// Ingest for producers running in other processes.
pub async fn create_notifications(
    _admin: AdminToken,
    State(state): State<AppState>,
    Json(payload): Json<CreateNotificationsRequest>,
) -> Result<(StatusCode, Json<CreateNotificationsResponse>), AppError> {
    if payload.events.is_empty() {
        return Err(AppError::bad_request("events must not be empty"));
    }
    if payload.events.len() > MAX_BATCH_EVENTS {
        return Err(AppError::bad_request("at most 500 events per request"));
    }

    let total = payload.events.len();
    let items = state
        .notifications
        .create_batch(payload.events)
        .await
        .map_err(|err| AppError::from_notification(err, "create notifications"))?;

    let failed = total - items.len();
    Ok((
        StatusCode::CREATED,
        Json(CreateNotificationsResponse { items, failed }),
    ))
}

#[derive(Serialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

pub async fn cleanup_notifications(
    _admin: AdminToken,
    State(state): State<AppState>,
) -> Result<Json<CleanupResponse>, AppError> {
    let deleted = state
        .notifications
        .cleanup_old()
        .await
        .map_err(|err| AppError::from_notification(err, "clean up notifications"))?;

    Ok(Json(CleanupResponse { deleted }))
}
