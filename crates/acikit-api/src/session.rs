// Authenticated transport session.
//
// Owns the token lifecycle: `login()` records the token and a refresh
// deadline, every other request first checks the deadline and refreshes
// synchronously when it has passed, and a 401/403 after a successful login
// triggers exactly one re-login before the error surfaces.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::Credentials;
use crate::clock::{Clock, SystemClock};
use crate::dispatch::{ApiRequest, Dispatcher, HttpDispatcher, Method, RawResponse, Response};
use crate::error::Error;
use crate::mock::MockDispatcher;
use crate::models::{ControllerFault, Imdata, LoginGrant};
use crate::transport::TransportConfig;

const LOGIN_PATH: &str = "/api/aaaLogin.json";
const REFRESH_PATH: &str = "/api/aaaRefresh.json";
const LOGOUT_PATH: &str = "/api/aaaLogout.json";

/// Smallest guard window the session will use.
pub const MIN_REFRESH_GUARD: Duration = Duration::from_secs(10);

struct TokenState {
    token: String,
    deadline: Instant,
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Long-lived authenticated connection to one controller.
///
/// Safe to share behind an `Arc`: token state is swapped atomically and the
/// login/refresh exchange is serialized by a single async mutex.
#[derive(Debug)]
pub struct Session {
    base_url: Url,
    credentials: Credentials,
    dispatcher: Arc<dyn Dispatcher>,
    transport: TransportConfig,
    clock: Arc<dyn Clock>,
    refresh_guard: Duration,
    token: ArcSwapOption<TokenState>,
    authenticated: AtomicBool,
    auth_lock: Mutex<()>,
}

impl Session {
    /// Create a session that talks HTTP through reqwest.
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        transport: TransportConfig,
    ) -> Result<Self, Error> {
        let dispatcher = HttpDispatcher::new(base_url.clone(), &transport)?;
        Ok(Self::with_dispatcher(base_url, credentials, Arc::new(dispatcher)).transport(transport))
    }

    /// Create a session over an arbitrary dispatcher (test doubles, proxies).
    pub fn with_dispatcher(
        base_url: Url,
        credentials: Credentials,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            base_url,
            credentials,
            dispatcher,
            transport: TransportConfig::default(),
            clock: Arc::new(SystemClock),
            refresh_guard: MIN_REFRESH_GUARD,
            token: ArcSwapOption::empty(),
            authenticated: AtomicBool::new(false),
            auth_lock: Mutex::new(()),
        }
    }

    /// A session whose requests are recorded instead of sent.
    pub fn detached(base_url: Url, credentials: Credentials) -> (Self, Arc<MockDispatcher>) {
        let recorder = Arc::new(MockDispatcher::new());
        let session = Self::with_dispatcher(base_url, credentials, recorder.clone());
        (session, recorder)
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_guard(mut self, guard: Duration) -> Self {
        self.refresh_guard = guard;
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport
    }

    /// The last token received from the controller.
    pub fn token(&self) -> Option<String> {
        self.token.load().as_ref().map(|t| t.token.clone())
    }

    /// When the current token must be refreshed.
    pub fn refresh_deadline(&self) -> Option<Instant> {
        self.token.load().as_ref().map(|t| t.deadline)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Guard window applied to a given refresh timeout.
    ///
    /// Clamped to at least [`MIN_REFRESH_GUARD`] and at most a quarter of
    /// the timeout (unless that quarter is itself below the minimum).
    pub fn effective_guard(&self, refresh_timeout: Duration) -> Duration {
        let ceiling = (refresh_timeout / 4).max(MIN_REFRESH_GUARD);
        self.refresh_guard.clamp(MIN_REFRESH_GUARD, ceiling)
    }

    /// `wss://<host>/socket<token>` for the notification channel.
    pub fn websocket_url(&self) -> Result<Url, Error> {
        let token = self.token().ok_or(Error::NotLoggedIn)?;
        let scheme = if self.base_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        let host = self
            .base_url
            .host_str()
            .ok_or_else(|| Error::WebSocketConnect("controller URL has no host".into()))?;
        let raw = match self.base_url.port() {
            Some(p) => format!("{scheme}://{host}:{p}/socket{token}"),
            None => format!("{scheme}://{host}/socket{token}"),
        };
        Ok(Url::parse(&raw)?)
    }

    // ── Authentication ───────────────────────────────────────────────

    /// Authenticate and record the token plus its refresh deadline.
    pub async fn login(&self) -> Result<(), Error> {
        let _guard = self.auth_lock.lock().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<(), Error> {
        let body = match &self.credentials {
            Credentials::Password { login, password } => json!({
                "aaaUser": { "attributes": { "name": login, "pwd": password.expose_secret() } }
            }),
            Credentials::Certificate { login, .. } => json!({
                "aaaUser": { "attributes": { "name": login } }
            }),
        };

        debug!(login = self.credentials.login(), "logging in");
        let raw = self
            .send(Method::Post, LOGIN_PATH, Some(body.to_string()), false)
            .await?;
        let resp = Response::from_raw(raw);

        if !resp.is_ok() {
            self.clear_token();
            return Err(Error::Authentication {
                message: failure_message("login", &resp),
            });
        }

        let envelope = resp.envelope()?;
        match (LoginGrant::from_imdata(&envelope), &self.credentials) {
            (Ok(grant), _) => self.store_grant(&grant),
            // Signed requests authenticate on their own; a token is optional.
            (Err(_), Credentials::Certificate { .. }) => self.token.store(None),
            (Err(e), Credentials::Password { .. }) => {
                self.clear_token();
                return Err(e);
            }
        }

        self.authenticated.store(true, Ordering::Release);
        info!(login = self.credentials.login(), "login successful");
        Ok(())
    }

    /// Exchange the current token for a fresh one.
    pub async fn refresh_login(&self) -> Result<(), Error> {
        let _guard = self.auth_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<(), Error> {
        debug!("refreshing token");
        let raw = self.send(Method::Get, REFRESH_PATH, None, true).await?;
        let resp = Response::from_raw(raw);

        let grant = if resp.is_ok() {
            resp.envelope().and_then(|env| LoginGrant::from_imdata(&env))
        } else {
            Err(Error::Authentication {
                message: failure_message("refresh", &resp),
            })
        };

        match grant {
            Ok(grant) => {
                self.store_grant(&grant);
                debug!("token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                self.clear_token();
                Err(match e {
                    Error::Authentication { .. } => e,
                    other => Error::Authentication {
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// End the session on the controller and forget the token.
    pub async fn logout(&self) -> Result<(), Error> {
        let _guard = self.auth_lock.lock().await;
        let body = json!({
            "aaaUser": { "attributes": { "name": self.credentials.login() } }
        });
        let result = self
            .send(Method::Post, LOGOUT_PATH, Some(body.to_string()), true)
            .await;
        self.clear_token();
        result?;
        debug!("logout complete");
        Ok(())
    }

    fn store_grant(&self, grant: &LoginGrant) {
        let timeout = Duration::from_secs(grant.refresh_timeout_secs);
        let lead = timeout.saturating_sub(self.effective_guard(timeout));
        self.token.store(Some(Arc::new(TokenState {
            token: grant.token.clone(),
            deadline: self.clock.now() + lead,
        })));
    }

    fn clear_token(&self) {
        self.token.store(None);
        self.authenticated.store(false, Ordering::Release);
    }

    /// Make sure a usable token is held: log in when there is none, refresh
    /// when its deadline has passed. Callers that hand the token to another
    /// channel (the event socket URL) must call this first.
    pub async fn ensure_fresh(&self) -> Result<(), Error> {
        if self.token().is_none() {
            let _guard = self.auth_lock.lock().await;
            if self.token().is_none() {
                self.login_locked().await?;
            }
            return Ok(());
        }
        self.refresh_if_due().await
    }

    /// Refresh synchronously if the deadline has passed.
    async fn refresh_if_due(&self) -> Result<(), Error> {
        if !self.token_due() {
            return Ok(());
        }
        let _guard = self.auth_lock.lock().await;
        // Another task may have refreshed while we waited for the lock.
        if self.token_due() {
            self.refresh_locked().await?;
        }
        Ok(())
    }

    fn token_due(&self) -> bool {
        self.token
            .load()
            .as_ref()
            .is_some_and(|t| self.clock.now() >= t.deadline)
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub async fn get(&self, path: &str) -> Result<Response, Error> {
        self.request(Method::Get, path, None).await
    }

    pub async fn push(&self, path: &str, body: &Value) -> Result<Response, Error> {
        self.request(Method::Post, path, Some(body.to_string())).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, Error> {
        self.request(Method::Delete, path, None).await
    }

    /// `get` that also decodes the envelope and fails on non-success status.
    pub async fn get_imdata(&self, path: &str) -> Result<Imdata, Error> {
        self.get(path).await?.error_for_status()?.envelope()
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<Response, Error> {
        self.refresh_if_due().await?;

        let resp = Response::from_raw(self.send(method, path, body.clone(), true).await?);
        if !is_auth_status(resp.status) {
            return Ok(resp);
        }

        if !self.is_authenticated() {
            return Err(Error::Authentication {
                message: failure_message("request", &resp),
            });
        }

        warn!(status = resp.status, path, "request rejected, re-authenticating once");
        {
            let _guard = self.auth_lock.lock().await;
            self.login_locked().await?;
        }

        let retry = Response::from_raw(self.send(method, path, body, true).await?);
        if is_auth_status(retry.status) {
            self.clear_token();
            return Err(Error::SessionExpired);
        }
        Ok(retry)
    }

    /// Build headers and hand the request to the dispatcher.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
        with_token: bool,
    ) -> Result<RawResponse, Error> {
        let mut cookies: Vec<String> = Vec::new();
        if with_token {
            if let Some(token) = self.token() {
                cookies.push(format!("APIC-cookie={token}"));
            }
        }
        let method_name = method.to_string();
        if let Some(signed) =
            self.credentials
                .signature_cookie(&method_name, path, body.as_deref())?
        {
            cookies.push(signed);
        }

        let mut request = ApiRequest::new(method, path);
        request.body = body;
        if !cookies.is_empty() {
            request
                .headers
                .push(("Cookie".to_owned(), cookies.join("; ")));
        }
        self.dispatcher.dispatch(request).await
    }
}

fn is_auth_status(status: u16) -> bool {
    status == 401 || status == 403
}

fn failure_message(what: &str, resp: &Response) -> String {
    let detail = resp
        .envelope()
        .ok()
        .and_then(|env| ControllerFault::from_imdata(&env))
        .map_or_else(|| resp.text.chars().take(200).collect(), |f| f.text);
    format!("{what} failed (HTTP {}): {detail}", resp.status)
}
