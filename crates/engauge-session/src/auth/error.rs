use thiserror::Error;

/// Rejection returned by [`AuthProvider`](super::AuthProvider). Any of these
/// means the caller should route the user to the login screen.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login rejected ({status}): {reason}")]
    LoginRejected { status: u16, reason: String },

    #[error("Not authenticated - please log in")]
    NotAuthenticated,

    #[error("Authentication failure - please log in again")]
    AuthenticationFailure,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
