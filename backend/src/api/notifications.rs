//! Notification API endpoints. Users only ever see their own notifications.

use axum::extract::{Path, Query, State};
use serde::Serialize;
use serde_json::json;

use super::{clamp_limit, success, ApiResult};
use crate::auth::AuthUser;
use crate::models::{Notification, NotificationQuery, UnreadCount};
use crate::realtime::{ChangeEvent, Table};
use crate::AppState;

const MAX_NOTIFICATION_LIMIT: i64 = 200;

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

/// GET /api/notifications - Newest first, optionally unread only.
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Vec<Notification>> {
    let notifications = state
        .repo
        .list_notifications(
            &user.user_id,
            query.unread,
            clamp_limit(query.limit, MAX_NOTIFICATION_LIMIT),
        )
        .await?;
    success(notifications)
}

/// GET /api/notifications/unread-count - Badge counter.
pub async fn unread_count(State(state): State<AppState>, user: AuthUser) -> ApiResult<UnreadCount> {
    let count = state.repo.unread_count(&user.user_id).await?;
    success(UnreadCount { count })
}

/// POST /api/notifications/:id/read - Mark one notification read.
pub async fn mark_notification_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Notification> {
    let notification = state.repo.mark_notification_read(&user.user_id, &id).await?;
    state.feed.publish(ChangeEvent::update(
        Table::Notifications,
        &notification,
        Some(&user.user_id),
    ));
    success(notification)
}

/// POST /api/notifications/read-all - Mark every notification read.
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<MarkAllReadResponse> {
    let changed = state.repo.mark_all_read(&user.user_id).await?;
    for notification in &changed {
        state.feed.publish(ChangeEvent::update(
            Table::Notifications,
            notification,
            Some(&user.user_id),
        ));
    }
    success(MarkAllReadResponse {
        updated: changed.len() as u64,
    })
}

/// DELETE /api/notifications/:id - Delete one notification.
pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.repo.delete_notification(&user.user_id, &id).await?;
    state.feed.publish(ChangeEvent::delete(
        Table::Notifications,
        &json!({ "id": id, "userId": user.user_id }),
        Some(&user.user_id),
    ));
    success(())
}
