//! User management endpoints (admin), plus password changes

use super::{blocking, require_admin, ApiError, AppState};
use crate::auth::user_store::{NewUser, MIN_PASSWORD_LEN};
use crate::auth::Claims;
use crate::models::{now_millis, User, UserRole};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub licence_number: Option<String>,
    pub licence_expiry: Option<NaiveDate>,
}

/// Absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<UserRole>,
    pub licence_number: Option<String>,
    pub licence_expiry: Option<NaiveDate>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::BadRequest("A valid email is required".to_string())),
    }
}

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<User>>, ApiError> {
    require_admin(&claims)?;
    Ok(Json(state.db.list::<User>()?))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    require_admin(&claims)?;
    let user = state.db.find::<User>(&id)?.ok_or(ApiError::NotFound("User"))?;
    Ok(Json(user))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    require_admin(&claims)?;
    let Json(payload) = payload?;

    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let email = check_email(&payload.email)?;
    check_password(&payload.password)?;
    if state.db.find_user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict(format!("Email already registered: {}", email)));
    }

    let store = state.users.clone();
    let new_user = NewUser {
        name: payload.name.trim().to_string(),
        email,
        password: payload.password,
        role: payload.role,
        phone: payload.phone,
        licence_number: payload.licence_number,
        licence_expiry: payload.licence_expiry,
    };
    let user = blocking(move || store.create_user(new_user)).await?;
    state.sync.publish(&user).await;

    Ok((StatusCode::CREATED, Json(user)))
}

/// PUT /api/users/:id
pub async fn update_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    require_admin(&claims)?;
    let Json(payload) = payload?;
    let mut user = state.db.find::<User>(&id)?.ok_or(ApiError::NotFound("User"))?;

    if let Some(email) = payload.email {
        let email = check_email(&email)?;
        if let Some(other) = state.db.find_user_by_email(&email)? {
            if other.id != user.id {
                return Err(ApiError::Conflict(format!("Email already registered: {}", email)));
            }
        }
        user.email = email;
    }
    if let Some(name) = payload.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("name cannot be empty".to_string()));
        }
        user.name = name.trim().to_string();
    }
    if let Some(role) = payload.role {
        if user.id == claims.sub && role != UserRole::Admin {
            return Err(ApiError::BadRequest("Cannot demote your own account".to_string()));
        }
        user.role = role;
    }
    if payload.phone.is_some() {
        user.phone = payload.phone;
    }
    if payload.licence_number.is_some() {
        user.licence_number = payload.licence_number;
    }
    if payload.licence_expiry.is_some() {
        user.licence_expiry = payload.licence_expiry;
    }
    if let Some(active) = payload.active {
        user.active = active;
    }
    user.updated_at = now_millis();

    state.db.upsert(&user)?;
    state.sync.publish(&user).await;
    Ok(Json(user))
}

/// DELETE /api/users/:id
///
/// Trucks held by the user are unassigned first.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_admin(&claims)?;
    if id == claims.sub {
        return Err(ApiError::BadRequest("Cannot delete your own account".to_string()));
    }

    for truck in state.db.trucks_for_driver(&id)? {
        if let Some(truck) = state.db.unassign_truck(&truck.id, now_millis())? {
            state.sync.publish(&truck).await;
        }
    }

    if !state.db.destroy::<User>(&id)? {
        return Err(ApiError::NotFound("User"));
    }
    state.sync.retract::<User>(&id).await;

    info!("🗑️  User deleted: {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/users/:id/password (admin, or the user themself)
pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    if !claims.is_admin() && claims.sub != id {
        return Err(ApiError::Forbidden);
    }
    let Json(payload) = payload?;
    check_password(&payload.password)?;

    let store = state.users.clone();
    let user_id = id.clone();
    let changed = blocking(move || store.change_password(&user_id, &payload.password)).await?;
    if !changed {
        return Err(ApiError::NotFound("User"));
    }

    info!("🔑 Password changed for user {}", id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_rules() {
        assert!(check_password("short").is_err());
        assert!(check_password("long enough").is_ok());
    }

    #[test]
    fn test_email_normalization() {
        assert_eq!(check_email("  Ana@Fleet.Test ").unwrap(), "ana@fleet.test");
        assert!(check_email("no-at-sign").is_err());
        assert!(check_email("@fleet.test").is_err());
        assert!(check_email("ana@localhost").is_err());
    }
}
