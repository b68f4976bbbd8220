use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::signal::{ContextId, SignalStore, StorageEvent};

/// Renewal endpoint used until `set_renewal_endpoint` is called.
pub const DEFAULT_RENEWAL_ENDPOINT: &str = "/refresh-token";

/// Signal store key used for the logout broadcast.
pub const DEFAULT_LOGOUT_SIGNAL_KEY: &str = "ra-logout";

/// Renew this long before the credential actually expires.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(5);

/// Upper bound on a credential lifetime, so renewal deadlines stay representable.
const MAX_CREDENTIAL_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// TCP connect timeout for the shared client. Requests themselves carry no
/// overall timeout here; the mediator sets its own per request.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Body of a successful login or renewal.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    /// Seconds until the token expires
    #[serde(rename = "tokenExpiry", default)]
    pub token_expiry: Option<f64>,
}

impl TokenResponse {
    /// Non-empty token, if any. An empty string counts as missing.
    pub fn into_parts(self) -> Option<(String, Duration)> {
        let expires_in = expiry_duration(self.token_expiry);
        self.token
            .filter(|t| !t.is_empty())
            .map(|token| (token, expires_in))
    }
}

/// Convert a `tokenExpiry` value to a duration. Missing, negative or
/// non-numeric values mean "already due".
pub(crate) fn expiry_duration(secs: Option<f64>) -> Duration {
    match secs {
        Some(s) if s.is_finite() && s > 0.0 => Duration::try_from_secs_f64(s)
            .unwrap_or(MAX_CREDENTIAL_LIFETIME)
            .min(MAX_CREDENTIAL_LIFETIME),
        _ => Duration::ZERO,
    }
}

/// In-memory authenticated session for one client context.
///
/// Cloning is cheap and every clone refers to the same session. The
/// credential never leaves memory; the only thing written to the signal store
/// is a logout timestamp.
///
/// Construction spawns the logout listener, so it must happen inside a Tokio
/// runtime. Dropping the last clone stops the listener and any pending renewal.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: ContextId,
    base_url: String,
    http: Client,
    store: Arc<dyn SignalStore>,
    state: Mutex<State>,
    authenticated: watch::Sender<bool>,
    listener: JoinHandle<()>,
}

struct State {
    credential: Option<String>,
    timer: Option<RenewalTimer>,
    timer_generation: u64,
    /// Bumped by every logout, local or observed.
    logout_epoch: u64,
    renewal_endpoint: String,
    logout_signal_key: String,
}

struct RenewalTimer {
    handle: JoinHandle<()>,
    due: Instant,
    generation: u64,
}

impl State {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.listener.abort();
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_timer();
    }
}

impl Session {
    /// Create a session against `base_url` with its own cookie-enabled client.
    pub fn new(base_url: impl Into<String>, store: Arc<dyn SignalStore>) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(http, base_url, store))
    }

    /// Create a session using an existing client. The client should keep
    /// cookies, since renewal relies on the server's refresh cookie.
    pub fn with_client(
        http: Client,
        base_url: impl Into<String>,
        store: Arc<dyn SignalStore>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let events = store.subscribe();
        let (authenticated, _) = watch::channel(false);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            id: ContextId::random(),
            base_url,
            http,
            store,
            state: Mutex::new(State {
                credential: None,
                timer: None,
                timer_generation: 0,
                logout_epoch: 0,
                renewal_endpoint: DEFAULT_RENEWAL_ENDPOINT.to_string(),
                logout_signal_key: DEFAULT_LOGOUT_SIGNAL_KEY.to_string(),
            }),
            authenticated,
            listener: tokio::spawn(listen_for_logout(weak.clone(), events)),
        });

        debug!(context = %inner.id, base_url = %inner.base_url, "Session created");
        Self { inner }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a credential and schedule its renewal `RENEWAL_MARGIN` before
    /// `expires_in` runs out (immediately if it is shorter than the margin).
    /// Any previously scheduled renewal is cancelled.
    pub fn set_credential(&self, token: impl Into<String>, expires_in: Duration) {
        self.install_credential(token.into(), expires_in, None);
    }

    /// Install a credential unless a logout happened since `expected_epoch`.
    fn install_credential(
        &self,
        token: String,
        expires_in: Duration,
        expected_epoch: Option<u64>,
    ) -> bool {
        let delay = expires_in
            .min(MAX_CREDENTIAL_LIFETIME)
            .saturating_sub(RENEWAL_MARGIN);
        {
            let mut state = self.lock();
            if expected_epoch.is_some_and(|epoch| epoch != state.logout_epoch) {
                return false;
            }

            state.credential = Some(token);
            state.cancel_timer();
            state.timer_generation += 1;
            let generation = state.timer_generation;
            let handle = tokio::spawn(run_renewal_timer(
                Arc::downgrade(&self.inner),
                generation,
                delay,
            ));
            state.timer = Some(RenewalTimer {
                handle,
                due: Instant::now() + delay,
                generation,
            });
        }

        debug!(renew_in_secs = delay.as_secs(), "Credential set");
        self.publish(true);
        true
    }

    /// Current bearer token, if authenticated.
    pub fn credential(&self) -> Option<String> {
        self.lock().credential.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().credential.is_some()
    }

    /// Clear the credential, cancel renewal and broadcast logout to every
    /// other session on the signal store.
    pub fn erase_credential(&self) {
        let key = {
            let mut state = self.lock();
            state.credential = None;
            state.cancel_timer();
            state.logout_epoch += 1;
            state.logout_signal_key.clone()
        };

        let stamp = Utc::now().timestamp_millis().to_string();
        if let Err(e) = self.inner.store.set_item(self.inner.id, &key, &stamp) {
            warn!(error = ?e, key = %key, "Failed to broadcast logout signal");
        }

        debug!("Credential erased");
        self.publish(false);
    }

    pub fn set_renewal_endpoint(&self, path: impl Into<String>) {
        self.lock().renewal_endpoint = path.into();
    }

    pub fn renewal_endpoint(&self) -> String {
        self.lock().renewal_endpoint.clone()
    }

    pub fn set_logout_signal_key(&self, name: impl Into<String>) {
        self.lock().logout_signal_key = name.into();
    }

    pub fn logout_signal_key(&self) -> String {
        self.lock().logout_signal_key.clone()
    }

    /// Time left until the pending renewal fires, if one is scheduled.
    pub fn renewal_due(&self) -> Option<Duration> {
        self.lock()
            .timer
            .as_ref()
            .map(|timer| timer.due.saturating_duration_since(Instant::now()))
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.id
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Authenticated-state changes, for callers that need to react to a
    /// logout they did not initiate.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.authenticated.subscribe()
    }

    pub(crate) fn http(&self) -> &Client {
        &self.inner.http
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    fn publish(&self, authenticated: bool) {
        self.inner.authenticated.send_if_modified(|current| {
            let changed = *current != authenticated;
            *current = authenticated;
            changed
        });
    }

    /// Exchange the server-side refresh cookie for a fresh credential.
    ///
    /// Returns `true` when a new credential was installed (which also
    /// schedules the next renewal). A rejected renewal erases the session; a
    /// response without a token leaves it untouched.
    pub async fn renew(&self) -> bool {
        let (url, epoch) = {
            let state = self.lock();
            (self.url(&state.renewal_endpoint), state.logout_epoch)
        };
        debug!(url = %url, "Renewing credential");

        let response = match self
            .inner
            .http
            .get(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to renew the credential from the refresh token");
                self.erase_credential();
                return false;
            }
        };

        if response.status() != StatusCode::OK {
            warn!(
                status = %response.status(),
                "Failed to renew the credential from the refresh token"
            );
            self.erase_credential();
            return false;
        }

        let body: TokenResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to parse renewal response");
                return false;
            }
        };

        let Some((token, expires_in)) = body.into_parts() else {
            debug!("Renewal response carried no token");
            return false;
        };

        if !self.install_credential(token, expires_in, Some(epoch)) {
            debug!("Logout during renewal, discarding renewed credential");
            return false;
        }
        true
    }

    /// Take ownership of the pending timer slot if `generation` still holds it.
    fn claim_timer(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state
            .timer
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
        {
            // Detach rather than abort: the caller is that timer's own task.
            state.timer = None;
            true
        } else {
            false
        }
    }

    fn observe_storage_event(&self, event: &StorageEvent) {
        if event.source == Some(self.inner.id) {
            return;
        }

        let had_credential = {
            let mut state = self.lock();
            if event.key != state.logout_signal_key {
                return;
            }
            state.logout_epoch += 1;
            state.cancel_timer();
            state.credential.take().is_some()
        };

        if had_credential {
            info!(context = %self.inner.id, "Logout observed from another session");
        }
        self.publish(false);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Session")
            .field("context", &self.inner.id)
            .field("base_url", &self.inner.base_url)
            .field("authenticated", &state.credential.is_some())
            .field("renewal_endpoint", &state.renewal_endpoint)
            .field("logout_signal_key", &state.logout_signal_key)
            .finish()
    }
}

async fn run_renewal_timer(session: Weak<Inner>, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;

    let Some(inner) = session.upgrade() else {
        return;
    };
    let session = Session { inner };
    if session.claim_timer(generation) {
        session.renew().await;
    }
}

async fn listen_for_logout(session: Weak<Inner>, mut events: broadcast::Receiver<StorageEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = session.upgrade() else {
                    break;
                };
                Session { inner }.observe_storage_event(&event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Signal store events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
