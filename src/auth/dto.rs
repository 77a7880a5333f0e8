use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{errors::AuthError, password::MAX_PASSWORD_BYTES, repo_types::User};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Request body for user registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub abn: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        if !is_valid_email(&self.email) {
            return Err(AuthError::Validation("email must be an email".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "password must be longer than or equal to {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::Validation(format!(
                "password must be shorter than or equal to {MAX_PASSWORD_BYTES} bytes"
            )));
        }
        Ok(())
    }
}

/// Request body for login.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response returned after register or login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: PublicUser,
    pub token: String,
}

/// Externally visible user fields. Anything not listed here stays private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub business_name: Option<String>,
    pub abn: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        let User {
            id,
            email,
            password_hash: _,
            first_name,
            last_name,
            phone,
            business_name,
            abn,
            is_active,
            deleted_at: _,
            created_at,
            updated_at,
        } = user;
        Self {
            id,
            email,
            first_name,
            last_name,
            phone,
            business_name,
            abn,
            is_active,
            created_at,
            updated_at,
        }
    }
}
