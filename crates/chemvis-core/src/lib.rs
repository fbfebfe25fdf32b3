//! Core library for chemvis.
//!
//! Provides the authenticated API client, credential storage and session
//! queries, and the dataset models shared by the front ends.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{CredentialStore, SessionEvent, SessionInfo};
pub use config::Config;
