//! Password hashing, bearer tokens and the `CurrentUser` extractor.
//!
//! Tokens are opaque random strings. Only their SHA-256 digest is stored,
//! so a leaked database does not leak usable credentials.

use anyhow::{Context, Result};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use chrono::{TimeDelta, Utc};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::api::{ApiError, SharedState};
use super::db::DbHandle;
use super::models::User;
use crate::errors::CadError;

/// Matches SQLite's `datetime('now')` so expiry compares as plain text.
const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

/// Check `password` against a PHC hash string. A malformed hash never verifies.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    match PasswordHash::new(hashed) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Hash on the blocking pool; argon2 is deliberately slow.
pub async fn hash_password_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("Password hashing task panicked")?
}

pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Create and store a new token for `user_id`, returning the raw token.
pub async fn issue_token(db: &DbHandle, user_id: i64, expire_minutes: i64) -> Result<String> {
    let expires_at = TimeDelta::try_minutes(expire_minutes)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .context("Token lifetime out of range")?
        .format(SQLITE_DATETIME)
        .to_string();

    let token = generate_token();
    let digest = token_digest(&token);
    db.call(move |db| db.insert_access_token(&digest, user_id, &expires_at))
        .await?;
    Ok(token)
}

/// Resolve a login (username or email) and password to an active user.
pub async fn authenticate(db: &DbHandle, login: String, password: String) -> Result<User> {
    let credentials = db.call(move |db| db.find_credentials(&login)).await?;
    let Some(credentials) = credentials else {
        return Err(CadError::InvalidCredentials.into());
    };

    let hashed = credentials.hashed_password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hashed))
        .await
        .context("Password verification task panicked")?;
    if !valid {
        return Err(CadError::InvalidCredentials.into());
    }
    if !credentials.user.is_active {
        return Err(CadError::InactiveUser.into());
    }
    Ok(credentials.user)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn require_superuser(&self) -> Result<(), ApiError> {
        if self.0.is_superuser {
            Ok(())
        } else {
            Err(CadError::Forbidden.into())
        }
    }
}

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self, Self::Rejection> {
        let digest = bearer_token(parts)
            .map(token_digest)
            .ok_or(CadError::Unauthorized)?;

        let user = state
            .db
            .call(move |db| db.user_for_token(&digest))
            .await?
            .ok_or(CadError::Unauthorized)?;
        if !user.is_active {
            return Err(CadError::InactiveUser.into());
        }
        Ok(CurrentUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::db::CadDb;
    use axum::http::Request;

    fn parts_with(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret", "not-a-phc-string"));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_token_digest_is_stable_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        let digest = token_digest(&token);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, token_digest(&token));
        assert_ne!(digest, token_digest(&generate_token()));
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }

    #[tokio::test]
    async fn test_issue_token_resolves_to_user() {
        let db = DbHandle::new(CadDb::new_in_memory().unwrap());
        let user = db
            .call(|db| db.create_user("ada", "ada@example.com", "hash", false))
            .await
            .unwrap();
        let token = issue_token(&db, user.id, 60).await.unwrap();
        let digest = token_digest(&token);
        let found = db.call(move |db| db.user_for_token(&digest)).await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn test_issue_token_with_non_positive_lifetime_is_expired() {
        let db = DbHandle::new(CadDb::new_in_memory().unwrap());
        let user = db
            .call(|db| db.create_user("ada", "ada@example.com", "hash", false))
            .await
            .unwrap();
        let token = issue_token(&db, user.id, -1).await.unwrap();
        let digest = token_digest(&token);
        assert!(db.call(move |db| db.user_for_token(&digest)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authenticate_by_username_or_email() {
        let db = DbHandle::new(CadDb::new_in_memory().unwrap());
        let hash = hash_password("pw").unwrap();
        db.call(move |db| db.create_user("ada", "ada@example.com", &hash, false))
            .await
            .unwrap();

        let user = authenticate(&db, "ada".into(), "pw".into()).await.unwrap();
        assert_eq!(user.username, "ada");
        let user = authenticate(&db, "ada@example.com".into(), "pw".into()).await.unwrap();
        assert_eq!(user.username, "ada");

        let err = authenticate(&db, "ada".into(), "nope".into()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<CadError>(), Some(CadError::InvalidCredentials)));
        let err = authenticate(&db, "ghost".into(), "pw".into()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<CadError>(), Some(CadError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_inactive_user() {
        let db = DbHandle::new(CadDb::new_in_memory().unwrap());
        let hash = hash_password("pw").unwrap();
        let user = db
            .call(move |db| db.create_user("ada", "ada@example.com", &hash, false))
            .await
            .unwrap();
        db.call(move |db| db.set_user_active(user.id, false)).await.unwrap();

        let err = authenticate(&db, "ada".into(), "pw".into()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<CadError>(), Some(CadError::InactiveUser)));
    }
}
