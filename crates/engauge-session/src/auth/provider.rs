//! Authentication policy consumed by the front end to decide whether to show
//! the login screen or the authenticated views.

use std::fmt;
use std::time::Duration;

use reqwest::header;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::session::TokenResponse;
use super::{AuthError, Session};
use crate::api::ApiError;

/// Login endpoint, relative to the base URL.
pub const LOGIN_ENDPOINT: &str = "/login";

/// Logout endpoint, relative to the base URL.
pub const LOGOUT_ENDPOINT: &str = "/logout";

/// Navigation target returned by [`AuthProvider::logout`].
pub const LOGIN_REDIRECT: &str = "/login";

/// Timeout for login and logout requests.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login, logout and session checks on top of a [`Session`].
///
/// Every operation either succeeds or returns an [`AuthError`]; an `Err` is
/// the signal to send the user back to the login screen.
#[derive(Clone, Debug)]
pub struct AuthProvider {
    session: Session,
}

impl AuthProvider {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Exchange username and password for a credential.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<(), AuthError> {
        let url = self.session.url(LOGIN_ENDPOINT);

        let response = self
            .session
            .http()
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, username = %credentials.username, "Login rejected");
            return Err(AuthError::LoginRejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(format!("Failed to parse login response: {}", e)))?;
        let (token, expires_in) = body
            .into_parts()
            .ok_or_else(|| AuthError::InvalidResponse("Login response carried no token".to_string()))?;

        self.session.set_credential(token, expires_in);
        info!(username = %credentials.username, "Logged in");
        Ok(())
    }

    /// End the session locally, then on the server. Always yields the login
    /// redirect; a failed logout request is only logged.
    pub async fn logout(&self) -> String {
        // Siblings are told before the server answers
        self.session.erase_credential();

        let url = self.session.url(LOGOUT_ENDPOINT);
        match self
            .session
            .http()
            .get(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => debug!(status = %response.status(), "Logout request completed"),
            Err(e) => warn!(error = %e, "Logout request failed"),
        }

        LOGIN_REDIRECT.to_string()
    }

    /// Succeeds if a credential is held, or if a single renewal attempt
    /// produces one.
    pub async fn check_auth(&self) -> Result<(), AuthError> {
        if self.session.is_authenticated() {
            return Ok(());
        }
        if self.session.renew().await {
            Ok(())
        } else {
            Err(AuthError::NotAuthenticated)
        }
    }

    /// Decide whether a failed request must end the session. A 401 or 403
    /// erases the credential and is rejected. A request refused for lack of a
    /// credential is rejected without an erase, so no logout is broadcast.
    pub fn check_error(&self, error: &ApiError) -> Result<(), AuthError> {
        if matches!(error, ApiError::NotAuthenticated) {
            return Err(AuthError::NotAuthenticated);
        }
        if error.is_auth_failure() {
            debug!(status = ?error.status(), "Authentication failure, erasing credential");
            self.session.erase_credential();
            return Err(AuthError::AuthenticationFailure);
        }
        Ok(())
    }

    /// There is a single permission level: being logged in.
    pub fn get_permissions(&self) -> Result<(), AuthError> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(AuthError::NotAuthenticated)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::StatusCode;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::session::{DEFAULT_LOGOUT_SIGNAL_KEY, DEFAULT_RENEWAL_ENDPOINT};
    use crate::signal::{MemoryStore, SignalStore};

    const UNREACHABLE: &str = "http://127.0.0.1:9";

    fn provider(base_url: &str) -> AuthProvider {
        let session = Session::new(base_url, Arc::new(MemoryStore::new())).unwrap();
        AuthProvider::new(session)
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials::new("admin", "hunter2")
    }

    async fn mount_login(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(LOGIN_ENDPOINT))
            .and(body_json(serde_json::json!({ "username": "admin", "password": "hunter2" })))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", credentials());
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_login_stores_token() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "token": "T", "tokenExpiry": 900 })),
        )
        .await;
        let auth = provider(&server.uri());

        auth.login(&credentials()).await.unwrap();

        assert_eq!(auth.session().credential().as_deref(), Some("T"));
        assert!(auth.session().renewal_due().unwrap() > Duration::from_secs(890));
        assert!(auth.get_permissions().is_ok());
    }

    #[tokio::test]
    async fn test_login_rejected_status() {
        let server = MockServer::start().await;
        mount_login(&server, ResponseTemplate::new(401)).await;
        let auth = provider(&server.uri());

        let err = auth.login(&credentials()).await.unwrap_err();

        assert!(matches!(err, AuthError::LoginRejected { status: 401, .. }));
        assert_eq!(auth.session().credential(), None);
    }

    #[tokio::test]
    async fn test_login_without_token_is_invalid() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "" })),
        )
        .await;
        let auth = provider(&server.uri());

        let err = auth.login(&credentials()).await.unwrap_err();

        assert!(matches!(err, AuthError::InvalidResponse(_)));
        assert_eq!(auth.session().credential(), None);
    }

    #[tokio::test]
    async fn test_login_without_expiry_renews_immediately() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "T" })),
        )
        .await;
        Mock::given(method("GET"))
            .and(path(DEFAULT_RENEWAL_ENDPOINT))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "token": "R", "tokenExpiry": 300 })),
            )
            .mount(&server)
            .await;
        let auth = provider(&server.uri());

        auth.login(&credentials()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while auth.session().credential().as_deref() != Some("R") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_check_auth_renews_with_login_cookie() {
        let server = MockServer::start().await;
        mount_login(
            &server,
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "token=refresh-cookie; Path=/")
                .set_body_json(serde_json::json!({ "token": "T", "tokenExpiry": 900 })),
        )
        .await;
        Mock::given(method("GET"))
            .and(path(DEFAULT_RENEWAL_ENDPOINT))
            .and(header("cookie", "token=refresh-cookie"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "token": "R", "tokenExpiry": 900 })),
            )
            .expect(1)
            .mount(&server)
            .await;
        let auth = provider(&server.uri());
        auth.login(&credentials()).await.unwrap();
        // Drop the in-memory credential without touching the cookie jar
        auth.session().erase_credential();

        auth.check_auth().await.unwrap();

        assert_eq!(auth.session().credential().as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn test_check_auth_with_credential_skips_renewal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEFAULT_RENEWAL_ENDPOINT))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let auth = provider(&server.uri());
        auth.session().set_credential("T", Duration::from_secs(300));

        assert!(auth.check_auth().await.is_ok());
    }

    #[tokio::test]
    async fn test_check_auth_rejects_when_renewal_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEFAULT_RENEWAL_ENDPOINT))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        let auth = provider(&server.uri());

        let err = auth.check_auth().await.unwrap_err();

        assert!(matches!(err, AuthError::NotAuthenticated));
        assert!(auth.get_permissions().is_err());
    }

    #[tokio::test]
    async fn test_logout_erases_and_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LOGOUT_ENDPOINT))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let auth = provider(&server.uri());
        auth.session().set_credential("T", Duration::from_secs(300));

        assert_eq!(auth.logout().await, LOGIN_REDIRECT);
        assert_eq!(auth.session().credential(), None);
        assert_eq!(auth.session().renewal_due(), None);
    }

    #[tokio::test]
    async fn test_logout_erases_even_if_request_fails() {
        let auth = provider(UNREACHABLE);
        auth.session().set_credential("T", Duration::from_secs(300));

        assert_eq!(auth.logout().await, LOGIN_REDIRECT);
        assert_eq!(auth.session().credential(), None);
    }

    #[tokio::test]
    async fn test_check_error_auth_failures_erase() {
        let auth = provider(UNREACHABLE);

        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            auth.session().set_credential("T", Duration::from_secs(300));
            let err = auth
                .check_error(&ApiError::from_status(status, ""))
                .unwrap_err();
            assert!(matches!(err, AuthError::AuthenticationFailure));
            assert_eq!(auth.session().credential(), None);
        }

        // Also when already logged out
        assert!(auth
            .check_error(&ApiError::from_status(StatusCode::UNAUTHORIZED, ""))
            .is_err());
    }

    #[tokio::test]
    async fn test_check_error_without_credential_keeps_siblings() {
        let store = Arc::new(MemoryStore::new());
        let auth = AuthProvider::new(Session::new(UNREACHABLE, store.clone()).unwrap());
        let sibling = Session::new(UNREACHABLE, store.clone()).unwrap();
        sibling.set_credential("valid", Duration::from_secs(300));

        let err = auth.check_error(&ApiError::NotAuthenticated).unwrap_err();

        assert!(matches!(err, AuthError::NotAuthenticated));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sibling.credential().as_deref(), Some("valid"));
        assert_eq!(store.get_item(DEFAULT_LOGOUT_SIGNAL_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_signals_siblings_before_server_answers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LOGOUT_ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;
        let store = Arc::new(MemoryStore::new());
        let auth = AuthProvider::new(Session::new(server.uri(), store.clone()).unwrap());
        let sibling = Session::new(server.uri(), store.clone()).unwrap();
        auth.session().set_credential("T", Duration::from_secs(300));
        sibling.set_credential("S", Duration::from_secs(300));

        let logout = tokio::spawn({
            let auth = auth.clone();
            async move { auth.logout().await }
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while sibling.credential().is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!logout.is_finished());
        assert_eq!(auth.session().credential(), None);
        assert_eq!(auth.session().renewal_due(), None);

        assert_eq!(logout.await.unwrap(), LOGIN_REDIRECT);
    }

    #[tokio::test]
    async fn test_check_error_other_failures_keep_session() {
        let auth = provider(UNREACHABLE);
        auth.session().set_credential("T", Duration::from_secs(300));

        for status in [
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_REQUEST,
        ] {
            assert!(auth.check_error(&ApiError::from_status(status, "")).is_ok());
        }
        assert!(auth.check_error(&ApiError::InvalidResponse("bad".into())).is_ok());
        assert_eq!(auth.session().credential().as_deref(), Some("T"));
    }
}
