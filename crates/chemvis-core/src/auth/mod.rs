//! Authentication module for credential storage and session state.
//!
//! This module provides:
//! - `CredentialStore`: the single holder of the access and refresh tokens
//! - `CredentialStorage` backends: JSON file, OS keychain, memory
//! - Session queries derived from the access token's expiry claim
//! - `SessionEvent`: notifications about login, refresh and forced logout

pub mod credentials;
pub mod events;
pub mod session;
pub mod storage;
pub mod token;

pub use credentials::CredentialStore;
pub use events::{InvalidationReason, SessionEvent};
pub use session::{current_session, is_authenticated, is_authenticated_at, SessionInfo};
pub use storage::{CredentialStorage, FileStorage, KeyringStorage, MemoryStorage, StorageError};
pub use token::{decode_claims, AccessClaims, MalformedCredential, UserId};
