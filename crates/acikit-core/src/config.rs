// ── Runtime connection configuration ──
//
// These types describe *how* to connect to a fabric controller.
// They carry credential data and connection tuning, but never touch disk.
// The CLI constructs a `ControllerConfig` and hands it in.

use std::collections::BTreeMap;
use std::time::Duration;

use acikit_api::websocket::ReconnectConfig;
use acikit_api::{Credentials, RequestSigner, TlsMode, TransportConfig};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::CoreError;

/// How to authenticate with a controller.
///
/// This type carries the actual credential data; `acikit_api::Credentials`
/// is what the session holds once the key material has been parsed.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// `aaaLogin` with name and password.
    Password {
        login: String,
        password: SecretString,
    },
    /// Every request signed with the user's private key.
    Certificate {
        login: String,
        cert_name: String,
        key_pem: SecretString,
    },
}

impl AuthCredentials {
    pub fn login(&self) -> &str {
        match self {
            Self::Password { login, .. } | Self::Certificate { login, .. } => login,
        }
    }

    pub(crate) fn to_credentials(&self) -> Result<Credentials, CoreError> {
        match self {
            Self::Password { login, password } => Ok(Credentials::Password {
                login: login.clone(),
                password: password.clone(),
            }),
            Self::Certificate {
                login,
                cert_name,
                key_pem,
            } => {
                let signer = RequestSigner::from_pem(key_pem.expose_secret().as_bytes())
                    .map_err(|e| CoreError::Config {
                        message: e.to_string(),
                    })?;
                Ok(Credentials::certificate(login.clone(), cert_name.clone(), signer))
            }
        }
    }
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (`verify_ssl = false`).
    DangerAcceptInvalid,
}

/// Configuration for connecting to a single controller.
///
/// Built by the CLI, passed to `Controller` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Controller URL (e.g., `https://apic.example.com`).
    pub url: Url,
    /// Authentication method and credentials.
    pub auth: AuthCredentials,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// Disable for one-shot tools; no notification channel is opened.
    pub subscription_enabled: bool,
    /// How far ahead of token expiry to refresh.
    pub refresh_guard: Duration,
    /// Notification channel reconnect policy.
    pub reconnect: ReconnectConfig,
    /// How long the controller keeps an unrefreshed subscription.
    pub subscription_lifetime: Duration,
    /// Events buffered per subscription before the oldest is dropped.
    pub queue_capacity: usize,
    /// Proxy URL keyed by scheme (`http`, `https`, `all`).
    pub proxies: BTreeMap<String, String>,
}

/// Default per-subscription queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

impl ControllerConfig {
    pub fn new(url: Url, auth: AuthCredentials) -> Self {
        Self {
            url,
            auth,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            subscription_enabled: true,
            refresh_guard: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            subscription_lifetime: Duration::from_secs(60),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            proxies: BTreeMap::new(),
        }
    }

    /// Password-authenticated config with defaults for everything else.
    pub fn with_password(url: Url, login: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(
            url,
            AuthCredentials::Password {
                login: login.into(),
                password: SecretString::from(password.into()),
            },
        )
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: self.timeout,
            cookie_jar: None,
            proxies: self.proxies.clone(),
        }
    }
}
