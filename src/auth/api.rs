//! Authentication API Endpoints
//! Login by email and password, and the current session's user

use crate::auth::{
    jwt::JwtHandler,
    models::{Claims, LoginRequest, LoginResponse},
    user_store::UserStore,
};
use crate::db::Database;
use crate::models::User;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
    pub db: Arc<Database>,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, jwt_handler: Arc<JwtHandler>, db: Arc<Database>) -> Self {
        Self {
            user_store,
            jwt_handler,
            db,
        }
    }
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthApiError> {
    let Json(payload) = payload.map_err(|e| AuthApiError::BadRequest(e.body_text()))?;
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(AuthApiError::BadRequest(
            "email and password are required".to_string(),
        ));
    }

    info!("🔐 Login attempt: {}", payload.email);

    // bcrypt is deliberately slow; keep it off the async workers
    let store = state.user_store.clone();
    let email = payload.email.clone();
    let user = tokio::task::spawn_blocking(move || store.verify_credentials(&email, &payload.password))
        .await
        .map_err(|e| AuthApiError::internal(e.into()))?
        .map_err(AuthApiError::internal)?;

    let Some(user) = user else {
        warn!("❌ Failed login attempt: {}", payload.email);
        return Err(AuthApiError::InvalidCredentials);
    };

    let (token, expires_in) = state
        .jwt_handler
        .generate_token(&user)
        .map_err(AuthApiError::internal)?;

    info!("✅ Login successful: {} ({})", user.email, user.role.as_str());

    Ok(Json(LoginResponse {
        token,
        expires_in,
        role: user.role,
        user,
    }))
}

/// Current user - GET /api/auth/me
pub async fn get_current_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<User>, AuthApiError> {
    let user = state
        .db
        .find::<User>(&claims.sub)
        .map_err(AuthApiError::internal)?
        .filter(|u| u.active)
        .ok_or(AuthApiError::UserNotFound)?;
    Ok(Json(user))
}

/// Auth API errors
#[derive(Debug)]
pub enum AuthApiError {
    BadRequest(String),
    InvalidCredentials,
    UserNotFound,
    InternalError,
}

impl AuthApiError {
    fn internal(err: anyhow::Error) -> Self {
        error!("auth request failed: {:#}", err);
        AuthApiError::InternalError
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AuthApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Invalid email or password".to_string(),
            ),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "User not found".to_string()),
            AuthApiError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user_store::NewUser;
    use crate::models::UserRole;

    fn state() -> AuthState {
        let db = Arc::new(Database::new(":memory:").unwrap());
        let users = Arc::new(UserStore::new(db.clone(), 4));
        users
            .create_user(NewUser {
                name: "Dee".to_string(),
                email: "dee@fleet.test".to_string(),
                password: "correct horse".to_string(),
                role: UserRole::Driver,
                phone: None,
                licence_number: None,
                licence_expiry: None,
            })
            .unwrap();
        AuthState::new(users, Arc::new(JwtHandler::new("test-secret".to_string(), 1)), db)
    }

    #[tokio::test]
    async fn test_login_issues_token_for_valid_credentials() {
        let state = state();
        let Json(resp) = login(
            State(state.clone()),
            Ok(Json(LoginRequest {
                email: "DEE@fleet.test".to_string(),
                password: "correct horse".to_string(),
            })),
        )
        .await
        .unwrap();

        assert_eq!(resp.role, UserRole::Driver);
        let claims = state.jwt_handler.validate_token(&resp.token).unwrap();
        assert_eq!(claims.sub, resp.user.id);
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password() {
        let err = login(
            State(state()),
            Ok(Json(LoginRequest {
                email: "dee@fleet.test".to_string(),
                password: "wrong".to_string(),
            })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthApiError::InvalidCredentials));
    }

    #[test]
    fn test_auth_api_error_responses() {
        let invalid_creds = AuthApiError::InvalidCredentials.into_response();
        assert_eq!(invalid_creds.status(), StatusCode::UNAUTHORIZED);

        let not_found = AuthApiError::UserNotFound.into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let bad = AuthApiError::BadRequest("nope".to_string()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }
}
