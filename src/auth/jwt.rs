//! JWT Token Handler
//! Issues and validates HS256 session tokens

use crate::auth::models::Claims;
use crate::models::User;
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

/// JWT Handler for token operations
pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String, expiration_hours: i64) -> Self {
        Self {
            secret,
            expiration_hours: expiration_hours.max(1),
        }
    }

    /// Generate a JWT token for a user
    pub fn generate_token(&self, user: &User) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("Invalid timestamp")?
            .timestamp() as usize;

        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            exp: expiration,
        };

        debug!(
            "Generating JWT for user {} ({}), expires in {}h",
            user.email, user.id, self.expiration_hours
        );

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to generate JWT")?;

        Ok((token, expires_in))
    }

    /// Validate a JWT token and extract claims
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("Invalid or expired token")?;

        debug!("Validated JWT for user {}", decoded.claims.email);

        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;
    use crate::models::now_millis;

    fn create_test_user(role: UserRole) -> User {
        User {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Test Driver".to_string(),
            email: "driver@example.com".to_string(),
            phone: None,
            role,
            password_hash: "hash".to_string(),
            licence_number: None,
            licence_expiry: None,
            active: true,
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    #[test]
    fn test_jwt_generation_and_validation() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string(), 24);
        let user = create_test_user(UserRole::Driver);

        let (token, expires_in) = handler.generate_token(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 24 * 3600);

        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, UserRole::Driver);
    }

    #[test]
    fn test_invalid_token_rejected() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string(), 24);
        assert!(handler.validate_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1".to_string(), 24);
        let handler2 = JwtHandler::new("secret2".to_string(), 24);
        let user = create_test_user(UserRole::Admin);

        let (token, _) = handler1.generate_token(&user).unwrap();
        assert!(handler2.validate_token(&token).is_err());
    }

    #[test]
    fn test_admin_claims_survive_round_trip() {
        let handler = JwtHandler::new("test-secret-key-12345".to_string(), 8);
        let user = create_test_user(UserRole::Admin);

        let (token, expires_in) = handler.generate_token(&user).unwrap();
        let claims = handler.validate_token(&token).unwrap();

        assert_eq!(expires_in, 8 * 3600);
        assert!(claims.is_admin());
        assert!(claims.exp > Utc::now().timestamp() as usize);
    }
}
