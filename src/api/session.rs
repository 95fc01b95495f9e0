//! Server-side sessions keyed by the `sessionid` cookie.
//!
//! The session id doubles as the basket owner. Signing in issues a new id and
//! carries the basket over to it; signing out keeps both. Idle sessions are
//! swept and their reserved stock goes back to the catalog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tokio::{sync::RwLock, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::{Result, ShopError};

pub const SESSION_COOKIE: &str = "sessionid";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    /// Signed-in account, if any.
    pub account: Option<i64>,
}

impl Session {
    pub fn require_account(&self) -> Result<i64> { self.account.ok_or(ShopError::Unauthorized) }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    account: Option<i64>,
    last_seen: Instant,
}

#[derive(Clone, Default)]
pub struct Sessions {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl Sessions {
    /// Looks up and touches the session, starting a new one for unknown or
    /// missing ids. The flag is true when a session was created.
    pub async fn resolve(&self, id: Option<Uuid>) -> (Session, bool) {
        if let Some(id) = id {
            if let Some(entry) = self.inner.write().await.get_mut(&id) {
                entry.last_seen = Instant::now();
                return (Session { id, account: entry.account }, false);
            }
        }
        let session = self.start(None).await;
        debug!(session = %session.id, "session started");
        (session, true)
    }

    pub async fn start(&self, account: Option<i64>) -> Session {
        let id = Uuid::new_v4();
        self.inner.write().await.insert(id, Entry { account, last_seen: Instant::now() });
        Session { id, account }
    }

    pub async fn end(&self, id: Uuid) { self.inner.write().await.remove(&id); }

    pub async fn contains(&self, id: Uuid) -> bool { self.inner.read().await.contains_key(&id) }

    pub async fn sign_out(&self, id: Uuid) {
        if let Some(entry) = self.inner.write().await.get_mut(&id) {
            entry.account = None;
        }
    }

    /// Drops sessions idle for at least `idle` and returns their ids.
    pub async fn expire(&self, idle: Duration) -> Vec<Uuid> {
        let mut inner = self.inner.write().await;
        let stale: Vec<Uuid> = inner.iter().filter(|(_, e)| e.last_seen.elapsed() >= idle).map(|(id, _)| *id).collect();
        for id in &stale {
            inner.remove(id);
        }
        stale
    }
}

/// Replaces the session with a fresh id bound to `account`. The basket moves
/// to the new id and the old id stops resolving.
pub async fn rotate(state: &AppState, old: Session, account: i64) -> Result<Session> {
    // registered before the basket moves so a concurrent sweep never sees its lines as orphaned
    let fresh = state.sessions.start(Some(account)).await;
    if let Err(e) = state.store.move_basket(old.id, fresh.id).await {
        state.sessions.end(fresh.id).await;
        return Err(e);
    }
    state.sessions.end(old.id).await;
    debug!(old = %old.id, new = %fresh.id, account, "session rotated");
    Ok(fresh)
}

/// Expires idle sessions and releases every basket that no live session
/// owns. Baskets persisted before a restart are released on the first run.
pub async fn sweep(state: &AppState, idle: Duration) -> Result<usize> {
    let mut stale = state.sessions.expire(idle).await;
    for id in state.store.basket_sessions().await? {
        if !stale.contains(&id) && !state.sessions.contains(id).await {
            stale.push(id);
        }
    }
    let mut released = 0;
    for id in &stale {
        released += state.store.clear_basket(*id).await?;
    }
    if !stale.is_empty() {
        info!(sessions = stale.len(), released, "idle sessions swept");
    }
    Ok(stale.len())
}

pub fn spawn_sweeper(state: AppState, idle: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            if let Err(e) = sweep(&state, idle).await {
                warn!(error = %e, "session sweep failed");
            }
        }
    })
}

pub fn set_cookie(id: Uuid) -> String { format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax") }

fn session_cookie(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

pub async fn attach_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let (session, created) = state.sessions.resolve(session_cookie(req.headers())).await;
    req.extensions_mut().insert(session);
    let mut res = next.run(req).await;
    // a handler that rotated the session has set its own cookie
    if created && !res.headers().contains_key(header::SET_COOKIE) {
        if let Ok(value) = HeaderValue::from_str(&set_cookie(session.id)) {
            res.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    res
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = ShopError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().copied().ok_or_else(|| ShopError::Storage("session layer is not installed".into()))
    }
}
