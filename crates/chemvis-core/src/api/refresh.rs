//! Access-token refresh, coalesced across concurrent requests.
//!
//! Every request rejected while a refresh is running awaits that same refresh,
//! so there is at most one call to the refresh endpoint in flight at a time
//! and at most one writer of the new access token.

use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{CredentialStore, InvalidationReason};
use crate::models::{RefreshRequest, RefreshResponse};

use super::transport::{PendingRequest, Transport};

/// Path of the refresh endpoint, relative to the API root
pub const REFRESH_PATH: &str = "token/refresh/";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token is stored")]
    MissingCredential,

    #[error("refresh token was rejected (status {0})")]
    Rejected(u16),

    #[error("refresh endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("refresh response was invalid: {0}")]
    InvalidResponse(String),

    #[error("session ended while refreshing")]
    SessionEnded,
}

impl RefreshFailure {
    /// Why the session must be invalidated, or `None` if it already ended
    pub fn invalidation_reason(&self) -> Option<InvalidationReason> {
        match self {
            RefreshFailure::MissingCredential => Some(InvalidationReason::NoRefreshCredential),
            RefreshFailure::Rejected(_) | RefreshFailure::InvalidResponse(_) => {
                Some(InvalidationReason::RefreshRejected)
            }
            RefreshFailure::Unreachable(_) => Some(InvalidationReason::RefreshUnreachable),
            RefreshFailure::SessionEnded => None,
        }
    }
}

pub type RefreshOutcome = Result<String, RefreshFailure>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// How a rejected request gets its new access token.
pub enum RefreshTicket {
    /// Another request already stored a newer token; replay with it
    Ready(String),
    /// Await this refresh (possibly shared with other requests)
    Pending(SharedRefresh),
}

impl RefreshTicket {
    pub async fn resolve(self) -> RefreshOutcome {
        match self {
            RefreshTicket::Ready(token) => Ok(token),
            RefreshTicket::Pending(refresh) => refresh.await,
        }
    }
}

#[derive(Default)]
pub struct RefreshCoordinator {
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide how a request that was sent with `sent_with` gets a new token.
    ///
    /// Joins a running refresh if there is one. Otherwise, if the store holds a
    /// different token than the one the request was rejected with, that token
    /// is used as-is. Only when neither applies is `start` called.
    pub fn acquire<F>(
        &self,
        sent_with: Option<&str>,
        store: &CredentialStore,
        start: F,
    ) -> RefreshTicket
    where
        F: FnOnce() -> BoxFuture<'static, RefreshOutcome>,
    {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(running) = slot.as_ref() {
            if running.peek().is_none() {
                debug!("Joining refresh already in flight");
                return RefreshTicket::Pending(running.clone());
            }
        }

        if let Some(current) = store.access() {
            if sent_with != Some(current.as_str()) {
                debug!("Access token changed since request was sent, replaying without refresh");
                return RefreshTicket::Ready(current);
            }
        }

        let refresh = start().shared();
        *slot = Some(refresh.clone());
        RefreshTicket::Pending(refresh)
    }
}

/// Exchange the stored refresh token for a new access token and store it.
///
/// The refresh call itself is unauthenticated and never goes through the
/// retry pipeline. Nothing is stored if the refresh token was cleared or
/// replaced while the call was in flight.
pub async fn refresh_access_token(
    transport: Arc<dyn Transport>,
    store: CredentialStore,
) -> RefreshOutcome {
    let refresh = store.refresh().ok_or(RefreshFailure::MissingCredential)?;

    let body = serde_json::to_value(RefreshRequest { refresh: &refresh })
        .map_err(|e| RefreshFailure::InvalidResponse(e.to_string()))?;
    let request = PendingRequest::post(REFRESH_PATH).json(body);

    let response = transport
        .send(&request)
        .await
        .map_err(|e| RefreshFailure::Unreachable(e.to_string()))?;

    if !response.is_success() {
        warn!(status = %response.status, "Refresh token rejected");
        return Err(RefreshFailure::Rejected(response.status.as_u16()));
    }

    let tokens: RefreshResponse = response
        .json()
        .map_err(|e| RefreshFailure::InvalidResponse(e.to_string()))?;
    if tokens.access.is_empty() {
        return Err(RefreshFailure::InvalidResponse(
            "empty access token".to_string(),
        ));
    }

    if store.refresh().as_deref() != Some(refresh.as_str()) {
        debug!("Credentials changed during refresh, discarding new access token");
        return Err(RefreshFailure::SessionEnded);
    }

    // A storage failure must not fail the replay; the new token is still usable
    if let Err(e) = store.set_access(&tokens.access) {
        warn!(error = %e, "Failed to persist refreshed access token");
    }
    if let Some(rotated) = tokens.refresh.as_deref().filter(|r| !r.is_empty()) {
        if let Err(e) = store.set_refresh(rotated) {
            warn!(error = %e, "Failed to persist rotated refresh token");
        }
    }

    info!(rotated = tokens.refresh.is_some(), "Access token refreshed");
    Ok(tokens.access)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future;

    fn ready(outcome: RefreshOutcome) -> BoxFuture<'static, RefreshOutcome> {
        future::ready(outcome).boxed()
    }

    #[tokio::test]
    async fn test_starts_refresh_when_token_unchanged() {
        let store = CredentialStore::in_memory();
        store.set_access("old").unwrap();
        let coordinator = RefreshCoordinator::new();

        let mut started = false;
        let ticket = coordinator.acquire(Some("old"), &store, || {
            started = true;
            ready(Ok("new".to_string()))
        });
        assert!(started);
        assert_eq!(ticket.resolve().await, Ok("new".to_string()));
    }

    #[tokio::test]
    async fn test_joins_refresh_in_flight() {
        let store = CredentialStore::in_memory();
        store.set_access("old").unwrap();
        let coordinator = RefreshCoordinator::new();
        let (tx, rx) = futures::channel::oneshot::channel::<RefreshOutcome>();

        let first = coordinator.acquire(Some("old"), &store, move || {
            async move { rx.await.unwrap_or(Err(RefreshFailure::Unreachable("dropped".into()))) }
                .boxed()
        });

        let second = coordinator.acquire(Some("old"), &store, || {
            panic!("second refresh must not start while one is in flight")
        });

        tx.send(Ok("new".to_string())).unwrap();
        let (a, b) = future::join(first.resolve(), second.resolve()).await;
        assert_eq!(a, Ok("new".to_string()));
        assert_eq!(b, Ok("new".to_string()));
    }

    #[tokio::test]
    async fn test_uses_newer_stored_token() {
        let store = CredentialStore::in_memory();
        store.set_access("newer").unwrap();
        let coordinator = RefreshCoordinator::new();

        let ticket = coordinator.acquire(Some("old"), &store, || {
            panic!("no refresh needed when the store already moved on")
        });
        assert_eq!(ticket.resolve().await, Ok("newer".to_string()));
    }

    #[tokio::test]
    async fn test_completed_refresh_is_not_reused() {
        let store = CredentialStore::in_memory();
        store.set_access("t1").unwrap();
        let coordinator = RefreshCoordinator::new();

        let first = coordinator.acquire(Some("t1"), &store, || {
            ready(Err(RefreshFailure::Rejected(401)))
        });
        assert_eq!(first.resolve().await, Err(RefreshFailure::Rejected(401)));

        let mut started = false;
        let second = coordinator.acquire(Some("t1"), &store, || {
            started = true;
            ready(Ok("t2".to_string()))
        });
        assert!(started);
        assert_eq!(second.resolve().await, Ok("t2".to_string()));
    }

    #[test]
    fn test_invalidation_reasons() {
        assert_eq!(
            RefreshFailure::MissingCredential.invalidation_reason(),
            Some(InvalidationReason::NoRefreshCredential)
        );
        assert_eq!(
            RefreshFailure::Rejected(401).invalidation_reason(),
            Some(InvalidationReason::RefreshRejected)
        );
        assert_eq!(
            RefreshFailure::Unreachable("timeout".into()).invalidation_reason(),
            Some(InvalidationReason::RefreshUnreachable)
        );
        assert_eq!(RefreshFailure::SessionEnded.invalidation_reason(), None);
    }
}
