//! REST API client module for the Engauge dashboard.
//!
//! This module provides the `ApiClient` for listing, reading and editing
//! dashboard resources (endpoints, origins, entities, properties,
//! summaries and the settings singleton).
//!
//! Requests carry the session's in-memory bearer token. 401 and 403 are
//! reported as authentication failures; see [`ApiError::is_auth_failure`].

pub mod client;
pub mod error;

pub use client::{ApiClient, ListParams, ListResult, Pagination, TOTAL_COUNT_HEADER};
pub use error::ApiError;
