//! REST API
//!
//! Every write goes to the relational store first and is then published to
//! the realtime store through the sync service. Errors are JSON
//! `{"error": message}` bodies.

pub mod notifications;
pub mod records;
pub mod reports;
pub mod trucks;
pub mod users;

use crate::auth::{self, api as auth_api, AuthState, Claims, JwtHandler, UserStore};
use crate::db::{AssignmentError, Database};
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitLayer};
use crate::models::{Expense, MileageLog, Revenue, Ticket};
use crate::sync::SyncService;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRef, State,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub sync: Arc<SyncService>,
    pub users: Arc<UserStore>,
    pub jwt: Arc<JwtHandler>,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        AuthState::new(state.users.clone(), state.jwt.clone(), state.db.clone())
    }
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden,
    NotFound(&'static str),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions".to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(e) => {
                error!("request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<AssignmentError> for ApiError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::TruckNotFound => ApiError::NotFound("Truck"),
            AssignmentError::DriverNotFound => ApiError::BadRequest("Driver not found".to_string()),
            AssignmentError::NotADriver => {
                ApiError::BadRequest("User is not a driver".to_string())
            }
            AssignmentError::Database(e) => ApiError::Internal(e),
        }
    }
}

pub(crate) fn require_admin(claims: &Claims) -> Result<(), ApiError> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Run blocking work (bcrypt) on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .map_err(ApiError::Internal)
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let users = state.db.count(crate::models::EntityKind::User)?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "users": users,
    })))
}

/// Build the application router.
pub fn create_router(state: AppState, login_limiter: RateLimitLayer) -> Router {
    let auth_router = Router::new()
        .route("/api/auth/login", post(auth_api::login))
        .route_layer(middleware::from_fn_with_state(
            login_limiter,
            rate_limit_middleware,
        ))
        .with_state(AuthState::from_ref(&state));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/api/users/:id/password", put(users::change_password))
        .route("/api/trucks", get(trucks::list_trucks).post(trucks::create_truck))
        .route(
            "/api/trucks/:id",
            get(trucks::get_truck)
                .put(trucks::update_truck)
                .delete(trucks::delete_truck),
        )
        .route("/api/trucks/:id/assign", post(trucks::assign_truck))
        .route("/api/trucks/:id/unassign", post(trucks::unassign_truck))
        .merge(records::router::<Expense>("/api/expenses"))
        .merge(records::router::<Revenue>("/api/revenues"))
        .merge(records::router::<Ticket>("/api/tickets"))
        .merge(records::router::<MileageLog>("/api/mileage"))
        .route("/api/notifications", get(notifications::list_notifications))
        .route(
            "/api/notifications/:id/read",
            post(notifications::mark_read),
        )
        .route("/api/reports/summary", get(reports::summary))
        .route_layer(middleware::from_fn_with_state(
            state.jwt.clone(),
            auth::auth_middleware,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_statuses() {
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::NotFound("Truck").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("dup".into()).into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(anyhow::anyhow!("boom")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_assignment_errors_map_to_client_errors() {
        assert_eq!(
            ApiError::from(AssignmentError::NotADriver).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(AssignmentError::TruckNotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
