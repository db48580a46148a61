//! User accounts
//! Password hashing and credential checks on top of the users table

use crate::auth::models::UserRole;
use crate::db::Database;
use crate::models::{now_millis, User};
use anyhow::{Context, Result};
use bcrypt::{hash, verify};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Fields for a new account; the password is hashed on creation.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
    pub phone: Option<String>,
    pub licence_number: Option<String>,
    pub licence_expiry: Option<chrono::NaiveDate>,
}

pub struct UserStore {
    db: Arc<Database>,
    bcrypt_cost: u32,
}

impl UserStore {
    pub fn new(db: Arc<Database>, bcrypt_cost: u32) -> Self {
        Self { db, bcrypt_cost }
    }

    /// Create the bootstrap admin when no admin account exists yet.
    ///
    /// Returns the created admin so the caller can publish it. When the
    /// bootstrap account arrived through sync without a local password, the
    /// configured password is set locally instead.
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<Option<User>> {
        let admins = self
            .db
            .users_with_role(UserRole::Admin)
            .context("Failed to check for admin users")?;
        if !admins.is_empty() {
            let synced = admins
                .iter()
                .find(|a| a.email.eq_ignore_ascii_case(email) && a.password_hash.is_empty());
            if let Some(admin) = synced {
                self.change_password(&admin.id, password)?;
                info!("🔐 Local password set for synced admin {}", admin.email);
            }
            return Ok(None);
        }

        let admin = self.create_user(NewUser {
            name: "Administrator".to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: UserRole::Admin,
            phone: None,
            licence_number: None,
            licence_expiry: None,
        })?;

        info!("🔐 Default admin user created (email: {})", admin.email);
        if password == crate::config::DEFAULT_ADMIN_PASSWORD {
            warn!("⚠️  CHANGE DEFAULT ADMIN PASSWORD IN PRODUCTION!");
        }
        Ok(Some(admin))
    }

    /// Return the user when the email and password match an active account.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.db.find_user_by_email(email)? else {
            return Ok(None);
        };
        // Accounts that arrived through sync have no local password yet.
        if !user.active || user.password_hash.is_empty() {
            return Ok(None);
        }
        let valid = verify(password, &user.password_hash).context("Failed to verify password")?;
        Ok(valid.then_some(user))
    }

    pub fn create_user(&self, new_user: NewUser) -> Result<User> {
        let password_hash =
            hash(&new_user.password, self.bcrypt_cost).context("Failed to hash password")?;
        let now = now_millis();

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: new_user.name,
            email: new_user.email.trim().to_lowercase(),
            phone: new_user.phone,
            role: new_user.role,
            password_hash,
            licence_number: new_user.licence_number,
            licence_expiry: new_user.licence_expiry,
            active: true,
            created_at: now,
            updated_at: now,
        };

        if self.db.find_user_by_email(&user.email)?.is_some() {
            anyhow::bail!("Email already registered: {}", user.email);
        }
        self.db.upsert(&user).context("Failed to insert user")?;

        info!("✅ Created user: {} ({})", user.email, user.role.as_str());
        Ok(user)
    }

    pub fn change_password(&self, user_id: &str, password: &str) -> Result<bool> {
        let password_hash = hash(password, self.bcrypt_cost).context("Failed to hash password")?;
        self.db.set_password_hash(user_id, &password_hash)
    }
}
