//! API client for the chemvis REST API.
//!
//! Every resource call goes through [`ApiClient::execute`]: the stored access
//! token is attached, and a 401 triggers one refresh-and-replay before the
//! session is given up on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::{self, CredentialStore, InvalidationReason, SessionEvent, SessionInfo};
use crate::models::{Dataset, DatasetRecord, LoginRequest, TokenPair};

use super::refresh::{refresh_access_token, RefreshCoordinator, RefreshOutcome};
use super::retry::{RetryCycle, Step};
use super::transport::{HttpResponse, PendingRequest, ReqwestTransport, Transport};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Path of the login endpoint, relative to the API root
pub const LOGIN_PATH: &str = "token/";

/// Capacity of the session event channel.
/// Events are rare; a slow subscriber only loses the oldest ones.
const SESSION_EVENT_CAPACITY: usize = 16;

/// Multipart field name the upload endpoint reads the CSV from
const UPLOAD_FIELD: &str = "file";

struct ClientInner {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    refresh: RefreshCoordinator,
    events: broadcast::Sender<SessionEvent>,
    next_request_id: AtomicU64,
}

/// API client for chemvis.
/// Clone is cheap - all clones share the transport, credentials and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client talking to `api_root` over HTTP
    pub fn new(api_root: &str, store: CredentialStore) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(api_root)?;
        Ok(Self::with_transport(Arc::new(transport), store))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, store: CredentialStore) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                transport,
                store,
                refresh: RefreshCoordinator::new(),
                events,
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// Receive login, refresh, logout and invalidation events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the stored access token decodes and has not expired
    pub fn is_authenticated(&self) -> bool {
        auth::is_authenticated(&self.inner.store)
    }

    /// Whether a session could be resumed, possibly after a refresh
    pub fn can_resume(&self) -> bool {
        self.is_authenticated() || self.inner.store.refresh().is_some()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        auth::current_session(&self.inner.store)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // ===== Login / Logout =====

    /// Exchange username and password for tokens and store them.
    ///
    /// Sent without credentials and outside the refresh pipeline. A rejection
    /// leaves stored credentials untouched.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionInfo, ApiError> {
        let body = serde_json::to_value(LoginRequest { username, password })
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let request = PendingRequest::post(LOGIN_PATH).json(body);

        let response = self.inner.transport.send(&request).await?;
        if matches!(response.status.as_u16(), 400 | 401) {
            debug!(status = %response.status, "Login rejected");
            return Err(ApiError::InvalidCredentials);
        }
        let response = Self::check_response(response)?;

        let tokens: TokenPair = response
            .json()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;
        if tokens.access.is_empty() || tokens.refresh.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Token response is missing access or refresh token".to_string(),
            ));
        }
        let session = SessionInfo::from_token(&tokens.access)
            .map_err(|e| ApiError::InvalidResponse(format!("Issued access token is malformed: {}", e)))?;

        if let Err(e) = self.inner.store.set_credentials(&tokens.access, &tokens.refresh) {
            warn!(error = %e, "Failed to persist credentials; session will not survive restart");
        }

        info!(user_id = ?session.user_id(), expires_at = %session.expires_at, "Logged in");
        self.emit(SessionEvent::LoggedIn);
        Ok(session)
    }

    /// Clear stored credentials. Local only; always succeeds.
    pub fn logout(&self) {
        self.inner.store.clear();
        info!("Logged out");
        self.emit(SessionEvent::LoggedOut);
    }

    // ===== Request pipeline =====

    /// Attach the stored access token to `request`, or strip any stale one.
    ///
    /// Returns the token attached. Only headers are touched.
    fn authorize(&self, request: &mut PendingRequest) -> Result<Option<String>, ApiError> {
        match self.inner.store.access() {
            Some(token) => {
                request.set_bearer(&token)?;
                Ok(Some(token))
            }
            None => {
                request.clear_bearer();
                Ok(None)
            }
        }
    }

    fn force_logout(&self, request_id: u64, reason: InvalidationReason) {
        debug!(request_id, "Replayed request rejected");
        invalidate(&self.inner.store, &self.inner.events, reason);
    }

    /// Send a request through the authentication pipeline.
    ///
    /// Non-401 responses, success or not, are returned unchanged. A 401 gets
    /// exactly one refresh-and-replay; the replay's response is returned as if
    /// it were the first. Network failures are returned as-is and never
    /// trigger a refresh.
    pub async fn execute(&self, mut request: PendingRequest) -> Result<HttpResponse, ApiError> {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut cycle = RetryCycle::new();
        let mut sent_with = self.authorize(&mut request)?;

        loop {
            debug!(request_id, method = %request.method, path = %request.path, retried = cycle.has_retried(), "Sending request");
            let response = self.inner.transport.send(&request).await?;

            match cycle.observe(response.status) {
                Step::Deliver => {
                    debug!(request_id, status = %response.status, "Response received");
                    return Ok(response);
                }
                Step::Refresh => {
                    debug!(request_id, path = %request.path, "Access token rejected, refreshing");
                    let transport = Arc::clone(&self.inner.transport);
                    let store = self.inner.store.clone();
                    let events = self.inner.events.clone();
                    let ticket = self.inner.refresh.acquire(sent_with.as_deref(), &self.inner.store, move || {
                        refresh_and_report(transport, store, events).boxed()
                    });

                    match ticket.resolve().await {
                        Ok(token) => {
                            cycle.refreshed();
                            request.set_bearer(&token)?;
                            sent_with = Some(token);
                        }
                        Err(failure) => {
                            cycle.refresh_failed();
                            debug!(request_id, error = %failure, "Refresh failed, giving up on request");
                            return Err(ApiError::RefreshFailed(failure));
                        }
                    }
                }
                Step::ForceLogout => {
                    self.force_logout(request_id, InvalidationReason::ReplayRejected);
                    return Err(ApiError::AuthenticationExpired);
                }
            }
        }
    }

    /// Map a non-success response to an error
    fn check_response(response: HttpResponse) -> Result<HttpResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.text()))
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, request: PendingRequest) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = Self::check_response(self.execute(request).await?)?;
        response
            .json()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e)))
    }

    // ===== Data Fetching Methods =====

    /// Fetch the most recently uploaded datasets
    pub async fn list_datasets(&self) -> Result<Vec<Dataset>, ApiError> {
        self.fetch_json(PendingRequest::get("datasets/")).await
    }

    /// Fetch a single dataset with its summary
    pub async fn fetch_dataset(&self, id: i64) -> Result<Dataset, ApiError> {
        self.fetch_json(PendingRequest::get(format!("datasets/{}/", id)))
            .await
    }

    /// Fetch the rows of a dataset's CSV
    pub async fn fetch_dataset_data(&self, id: i64) -> Result<Vec<DatasetRecord>, ApiError> {
        self.fetch_json(PendingRequest::get("datasets/data/").query("id", id))
            .await
    }

    /// Upload a CSV file; the server computes its summary
    pub async fn upload_dataset(&self, file_name: &str, contents: Vec<u8>) -> Result<Dataset, ApiError> {
        let request = PendingRequest::post("datasets/").file(UPLOAD_FIELD, file_name, "text/csv", contents);
        self.fetch_json(request).await
    }

    /// Download the PDF report for a dataset
    pub async fn download_report(&self, id: i64) -> Result<Vec<u8>, ApiError> {
        let request = PendingRequest::get("datasets/generate_report/").query("id", id);
        let response = Self::check_response(self.execute(request).await?)?;
        Ok(response.body)
    }
}

/// Clear credentials and tell subscribers the session is gone
fn invalidate(store: &CredentialStore, events: &broadcast::Sender<SessionEvent>, reason: InvalidationReason) {
    warn!(?reason, "Session could not be recovered, clearing credentials");
    store.clear();
    let _ = events.send(SessionEvent::Invalidated(reason));
}

/// Run one refresh and report its outcome. Shared by every request waiting
/// on it, so the event and any forced logout happen once per refresh.
async fn refresh_and_report(
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    events: broadcast::Sender<SessionEvent>,
) -> RefreshOutcome {
    let outcome = refresh_access_token(transport, store.clone()).await;
    match &outcome {
        Ok(_) => {
            let _ = events.send(SessionEvent::Refreshed);
        }
        Err(failure) => match failure.invalidation_reason() {
            Some(reason) => invalidate(&store, &events, reason),
            None => debug!(error = %failure, "Refresh abandoned"),
        },
    }
    outcome
}

// ============================================================================
// Tests
// ============================================================================
