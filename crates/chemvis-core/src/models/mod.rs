//! Data models for the chemvis API.
//!
//! - `Dataset`, `DatasetSummary`, `DatasetRecord`: uploaded CSV data and its summary
//! - Token request/response bodies for login and refresh

pub mod dataset;
pub mod token;

pub use dataset::{Averages, Dataset, DatasetRecord, DatasetSummary, TypeShare};
pub use token::{LoginRequest, RefreshRequest, RefreshResponse, TokenPair};
