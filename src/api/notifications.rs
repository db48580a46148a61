//! Notification endpoints

use super::{ApiError, AppState};
use crate::auth::Claims;
use crate::models::{now_millis, Notification};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
}

/// GET /api/notifications?unread=true
///
/// Admins see every notification, drivers their own.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<NotificationQuery>, QueryRejection>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let Query(query) = query?;
    let user_id = (!claims.is_admin()).then_some(claims.sub.as_str());
    Ok(Json(state.db.list_notifications(user_id, query.unread)?))
}

/// POST /api/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let mut notification = state
        .db
        .find::<Notification>(&id)?
        .ok_or(ApiError::NotFound("Notification"))?;
    if !claims.is_admin() && notification.user_id.as_deref() != Some(claims.sub.as_str()) {
        return Err(ApiError::NotFound("Notification"));
    }

    if !notification.read {
        notification.read = true;
        notification.updated_at = now_millis();
        state.db.upsert(&notification)?;
        state.sync.publish(&notification).await;
    }
    Ok(Json(notification))
}
