//! REST API client module for the chemvis service.
//!
//! The API uses JWT bearer authentication. Access tokens are short-lived and
//! renewed with a refresh token when the server rejects them:
//!
//! - `transport`: request description and the HTTP seam
//! - `retry`: per-request refresh-and-replay state machine
//! - `refresh`: refresh endpoint call, coalesced across concurrent requests
//! - `client`: `ApiClient`, login/logout and the dataset endpoints

pub mod client;
pub mod error;
pub mod refresh;
pub mod retry;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use refresh::RefreshFailure;
pub use retry::{AuthState, RetryCycle, Step};
pub use transport::{HttpResponse, PendingRequest, ReqwestTransport, RequestBody, Transport, TransportError};
