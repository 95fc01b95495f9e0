//! Sign-up, sign-in and the signed-in customer's profile.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::{debug, error, info, instrument};
use validator::Validate;

use super::{session, AppState, Session};
use crate::domain::aggregates::Profile;
use crate::domain::events::{AccountEvent, DomainEvent};
use crate::store::{NewAccount, ProfileUpdate};
use crate::{Result, ShopError};

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "password hashing failed");
            ShopError::Storage(format!("password hashing failed: {e}"))
        })
}

/// `Ok(false)` on a mismatch; errors only for unreadable hashes.
pub fn verify_password(hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| ShopError::Storage(format!("invalid stored password hash: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(ShopError::Storage(format!("password verification failed: {e}"))),
    }
}

// argon2 work runs on the blocking pool
async fn hash_blocking(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ShopError::Storage(e.to_string()))?
}

async fn verify_blocking(hash: String, password: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &password))
        .await
        .map_err(|e| ShopError::Storage(e.to_string()))?
}

/// The rotated session's cookie replaces the pre-login one.
fn signed_in(fresh: Session) -> impl IntoResponse {
    ([(header::SET_COOKIE, session::set_cookie(fresh.id))], StatusCode::OK)
}

#[derive(Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(length(min = 1, max = 150))]
    pub name: String,
    #[validate(length(min = 3, max = 150))]
    pub username: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[instrument(skip_all, fields(username = %req.username))]
pub async fn sign_up(State(s): State<AppState>, session: Session, Json(req): Json<SignUpRequest>) -> Result<impl IntoResponse> {
    req.validate()?;
    if s.store.account_by_username(&req.username).await?.is_some() {
        return Err(ShopError::Conflict(format!("username {} is taken", req.username)));
    }
    let password_hash = hash_blocking(req.password).await?;
    let account = s.store.create_account(NewAccount { username: req.username, first_name: req.name, password_hash }).await?;
    let fresh = session::rotate(&s, session, account.id).await?;
    info!(account_id = account.id, "account created");
    s.events.publish(DomainEvent::Account(AccountEvent::SignedUp { account_id: account.id })).await;
    Ok(signed_in(fresh))
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
}

#[instrument(skip_all, fields(username = %req.username))]
pub async fn sign_in(State(s): State<AppState>, session: Session, Json(req): Json<SignInRequest>) -> Result<impl IntoResponse> {
    let Some(account) = s.store.account_by_username(&req.username).await? else {
        debug!("unknown username");
        return Err(ShopError::InvalidCredentials);
    };
    if !verify_blocking(account.password_hash.clone(), req.password).await? {
        return Err(ShopError::InvalidCredentials);
    }
    Ok(signed_in(session::rotate(&s, session, account.id).await?))
}

pub async fn sign_out(State(s): State<AppState>, session: Session) -> StatusCode {
    s.sessions.sign_out(session.id).await;
    StatusCode::OK
}

pub async fn get_profile(State(s): State<AppState>, session: Session) -> Result<Json<Profile>> {
    let account = session.require_account()?;
    Ok(Json(s.store.profile(account).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    #[validate(length(min = 1, max = 128))]
    pub full_name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub phone: Option<String>,
}

pub async fn update_profile(State(s): State<AppState>, session: Session, Json(req): Json<ProfileRequest>) -> Result<Json<Profile>> {
    let account = session.require_account()?;
    req.validate()?;
    let update = ProfileUpdate { full_name: req.full_name, email: req.email, phone: req.phone };
    Ok(Json(s.store.update_profile(account, update).await?))
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest {
    pub current_password: String,
    #[validate(length(min = 8, max = 128))]
    pub new_password: String,
}

#[instrument(skip_all, fields(session = %session.id))]
pub async fn change_password(State(s): State<AppState>, session: Session, Json(req): Json<PasswordRequest>) -> Result<StatusCode> {
    let id = session.require_account()?;
    req.validate()?;
    let account = s.store.account(id).await?;
    if !verify_blocking(account.password_hash, req.current_password).await? {
        return Err(ShopError::InvalidCredentials);
    }
    let hash = hash_blocking(req.new_password).await?;
    s.store.set_password(id, hash).await?;
    info!(account_id = id, "password changed");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "correct horse").unwrap());
        assert!(!verify_password(&hash, "wrong horse").unwrap());
    }

    #[test]
    fn test_unreadable_hash_is_an_error() {
        assert!(matches!(verify_password("plain-text", "x"), Err(ShopError::Storage(_))));
    }

    #[test]
    fn test_sign_up_validation() {
        let short = SignUpRequest { name: "Ann".into(), username: "ann".into(), password: "short".into() };
        assert!(short.validate().is_err());
        let ok = SignUpRequest { name: "Ann".into(), username: "ann".into(), password: "long enough".into() };
        assert!(ok.validate().is_ok());
    }
}
