// ── Core error types ──
//
// User-facing errors from acikit-core. Wire details (raw bodies, socket
// codes) stay in acikit-api; the `From<acikit_api::Error>` impl translates
// them into domain-appropriate variants.

use thiserror::Error;

/// A fragment or event that could not be mapped onto the object graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{class} fragment is missing mandatory attribute `{attribute}`")]
    MissingAttribute { class: String, attribute: String },

    #[error("class {0} is not registered")]
    UnknownClass(String),

    #[error("cannot parse DN {dn}: {reason}")]
    InvalidDn { dn: String, reason: String },

    #[error("an object with DN {dn} already exists")]
    Duplicate { dn: String },

    #[error("{child} cannot be placed under {parent}")]
    InvalidParent { child: String, parent: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to controller at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Controller disconnected")]
    ControllerDisconnected,

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Object not found: {identifier}")]
    NotFound { identifier: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    // ── Controller errors ────────────────────────────────────────────
    #[error("Controller rejected the request (HTTP {status}): {message}")]
    Controller {
        status: u16,
        code: Option<String>,
        message: String,
    },

    // ── Subscription errors ──────────────────────────────────────────
    #[error("Subscriptions are disabled for this controller")]
    SubscriptionsDisabled,

    #[error("Unknown or closed subscription: {url}")]
    UnknownSubscription { url: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<acikit_api::Error> for CoreError {
    fn from(err: acikit_api::Error) -> Self {
        use acikit_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            Api::NotLoggedIn => CoreError::AuthenticationFailed {
                message: "Not logged in".into(),
            },
            Api::Signature(message) => CoreError::AuthenticationFailed { message },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::ConnectionFailed {
                        url: e.url().map(ToString::to_string).unwrap_or_default(),
                        reason: e.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {reason}"),
            },
            Api::Cancelled => CoreError::Cancelled,
            Api::Controller { status: 404, text, .. } => CoreError::NotFound { identifier: text },
            Api::Controller { status, code, text } => CoreError::Controller {
                status,
                code,
                message: text,
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("notification channel: {reason}"),
            },
            Api::WebSocketClosed { .. } | Api::ChannelClosed => CoreError::ControllerDisconnected,
            Api::Deserialization { message, .. } => {
                CoreError::Schema(SchemaError::Malformed(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_404_becomes_not_found() {
        let err: CoreError = acikit_api::Error::Controller {
            status: 404,
            code: None,
            text: "uni/tn-missing".into(),
        }
        .into();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn expired_session_is_auth_failure() {
        let err: CoreError = acikit_api::Error::SessionExpired.into();
        assert!(err.is_auth());
    }

    #[test]
    fn schema_errors_pass_through() {
        let err: CoreError = SchemaError::UnknownClass("fvFoo".into()).into();
        assert_eq!(err.to_string(), "class fvFoo is not registered");
    }
}
