//! Authentication Module
//! JWT sessions, role checks and user accounts

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use models::{Claims, UserRole};
pub use user_store::UserStore;
