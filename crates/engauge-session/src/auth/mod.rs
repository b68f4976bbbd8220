//! Authentication module for the dashboard session.
//!
//! This module provides:
//! - `Session`: in-memory bearer credential with scheduled renewal
//! - `AuthProvider`: login/logout and the checks the front end routes on
//!
//! The credential is never persisted. A new process either renews through the
//! server's refresh cookie or logs in again.

pub mod error;
pub mod provider;
pub mod session;

pub use error::AuthError;
pub use provider::{AuthProvider, LoginCredentials, LOGIN_REDIRECT};
pub use session::{Session, DEFAULT_LOGOUT_SIGNAL_KEY, DEFAULT_RENEWAL_ENDPOINT, RENEWAL_MARGIN};
