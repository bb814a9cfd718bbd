//! Auth provider seam and the sign-out / account-deletion cache purge.
//!
//! The concrete identity backend (password, Google, Facebook) lives behind
//! [`AuthProvider`]; this module owns what must happen locally around it:
//! email syntax is validated before any network round-trip, and both
//! sign-out and account deletion purge the entire cache so the next
//! sign-in starts cold.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db;

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("not signed in")]
    NotSignedIn,
    #[error("provider rejected the credentials: {0}")]
    Rejected(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("local purge failed: {0}")]
    Purge(#[from] db::DbError),
}

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    EmailPassword { email: String, password: String },
    GoogleIdToken(String),
    FacebookAccessToken(String),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;
    async fn sign_in(&self, credentials: Credentials) -> Result<AuthUser, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    async fn delete_account(&self) -> Result<(), AuthError>;
}

// ─── Validation ──────────────────────────────────────────────────────────────

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

fn validate_email(email: &str) -> Result<(), AuthError> {
    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(AuthError::InvalidEmail(email.to_string()))
    }
}

// ─── Operations ──────────────────────────────────────────────────────────────

pub async fn sign_in(
    provider: &dyn AuthProvider,
    credentials: Credentials,
) -> Result<AuthUser, AuthError> {
    if let Credentials::EmailPassword { email, .. } = &credentials {
        validate_email(email)?;
    }
    provider.sign_in(credentials).await
}

/// Sign out and drop every cached row and cursor.
pub async fn sign_out(provider: &dyn AuthProvider, pool: &SqlitePool) -> Result<(), AuthError> {
    provider.sign_out().await?;
    db::purge_all(pool).await?;
    Ok(())
}

/// Delete the account remotely, then purge the cache. The purge runs even
/// though the remote identity is already gone; stale rows must not survive.
pub async fn delete_account(
    provider: &dyn AuthProvider,
    pool: &SqlitePool,
) -> Result<(), AuthError> {
    if provider.current_user().is_none() {
        return Err(AuthError::NotSignedIn);
    }
    provider.delete_account().await?;
    db::purge_all(pool).await?;
    Ok(())
}
