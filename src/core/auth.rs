//! Password hashing and bearer tokens.

use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use pbkdf2::{
    Params, Pbkdf2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::{app_error::AppError, config::AuthConfig};

const PBKDF2_ROUNDS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    HospitalAdmin,
    ShopAdmin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::HospitalAdmin => "hospital_admin",
            Role::ShopAdmin => "shop_admin",
            Role::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Role::SuperAdmin),
            "hospital_admin" => Ok(Role::HospitalAdmin),
            "shop_admin" => Ok(Role::ShopAdmin),
            "user" => Ok(Role::User),
            other => Err(AppError::BadRequest(format!("{} is not a valid role", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<i32, AppError> {
        self.sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Invalid token".into()))
    }
}

pub fn issue_token(config: &AuthConfig, user_id: i32, role: Role) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(config.jwt_expire_hours)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|err| anyhow!("Failed to sign token: {}", err))
}

pub fn verify_token(config: &AuthConfig, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".into())
        }
        _ => AppError::Unauthorized("Invalid token".into()),
    })
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|err| anyhow!("Failed to encode salt: {}", err))?;
    let params = Params {
        rounds: PBKDF2_ROUNDS,
        ..Params::default()
    };
    let hash = Pbkdf2
        .hash_password_customized(password.as_bytes(), None, None, params, &salt)
        .map_err(|err| anyhow!("Failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".into(),
            jwt_expire_hours: 1,
        }
    }

    #[test]
    fn test_token_round_trip() {
        let token = issue_token(&config(), 42, Role::HospitalAdmin).unwrap();
        let claims = verify_token(&config(), &token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.role, Role::HospitalAdmin);
    }

    #[test]
    fn test_token_with_wrong_secret_is_rejected() {
        let token = issue_token(&config(), 42, Role::User).unwrap();
        let other = AuthConfig {
            jwt_secret: "other".into(),
            ..config()
        };
        assert!(matches!(
            verify_token(&other, &token),
            Err(AppError::Unauthorized(m)) if m == "Invalid token"
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let expired = AuthConfig {
            jwt_expire_hours: -2,
            ..config()
        };
        let token = issue_token(&expired, 42, Role::User).unwrap();
        assert!(matches!(
            verify_token(&config(), &token),
            Err(AppError::Unauthorized(m)) if m == "Token expired"
        ));
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        assert!(verify_token(&config(), "not-a-jwt").is_err());
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("s3cret!").unwrap();
        assert!(hash.starts_with("$pbkdf2-sha256$"));
        assert!(verify_password("s3cret!", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret!", "not-a-hash"));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("shop_admin".parse::<Role>().unwrap(), Role::ShopAdmin);
        assert_eq!(Role::SuperAdmin.as_str(), "super_admin");
        assert!("doctor".parse::<Role>().is_err());
    }
}
