//! Session client for the Engauge analytics dashboard.
//!
//! The crate keeps the dashboard's bearer credential in memory only, renews it
//! ahead of expiry through the server's refresh-cookie endpoint, and
//! propagates logout to every other client sharing the same signal store.
//!
//! - [`Session`]: the credential, its renewal timer and the logout listener
//! - [`AuthProvider`]: login / logout / check_auth / check_error / get_permissions
//! - [`ApiClient`]: authenticated requests against `/dashboard/<resource>`
//! - [`SignalStore`]: origin-scoped key/value store carrying the logout broadcast

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod signal;

pub use api::{ApiClient, ApiError, ListParams, ListResult, Pagination};
pub use auth::{AuthError, AuthProvider, LoginCredentials, Session};
pub use config::Config;
pub use models::{Interval, Resource, Settings, StatsToggles};
pub use signal::{ContextId, FileStore, MemoryStore, SignalStore, StorageEvent};
