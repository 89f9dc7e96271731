use thiserror::Error;

/// Top-level error type for the `acikit-api` crate.
///
/// Covers every failure mode of the wire layer: authentication, transport,
/// controller-reported errors, the notification socket, and payload decoding.
/// `acikit-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login or refresh rejected by the controller.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The token expired or was revoked and re-login did not help.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// A request was attempted before `login()` succeeded.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The configured private key could not be loaded or used.
    #[error("Request signing failed: {0}")]
    Signature(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    // ── Controller ──────────────────────────────────────────────────
    /// Non-success status with the controller's parsed error payload.
    #[error("Controller error (HTTP {status}): {text}")]
    Controller {
        status: u16,
        code: Option<String>,
        text: String,
    },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the controller.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The event channel is not open.
    #[error("Event channel is not open")]
    ChannelClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::SessionExpired | Self::NotLoggedIn
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::ChannelClosed => true,
            Self::Controller { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Controller { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Extract the controller error code, if available.
    pub fn controller_code(&self) -> Option<&str> {
        match self {
            Self::Controller { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
