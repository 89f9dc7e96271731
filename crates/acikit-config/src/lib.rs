//! Shared configuration for acikit tools.
//!
//! TOML profiles, credential resolution (flag + env + plaintext), and
//! translation to `acikit_core::ControllerConfig`. The core never reads
//! files; the binary layers its global flags on top through [`Overrides`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use acikit_core::{AuthCredentials, ControllerConfig, ReconnectConfig, TlsVerification};

/// Environment variable consulted for the password when no flag is given.
pub const PASSWORD_ENV: &str = "ACIKIT_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{0}' not found")]
    UnknownProfile(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named controller profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            verify_ssl: true,
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}
fn default_login() -> String {
    "admin".into()
}

/// A named controller profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Controller base URL (e.g., "https://apic.example.com").
    pub url: String,

    /// Login name, used for both password and certificate auth.
    #[serde(default = "default_login")]
    pub login: String,

    /// Password (plaintext; prefer `ACIKIT_PASSWORD`).
    pub password: Option<String>,

    /// Name of the user certificate registered on the controller.
    pub cert_name: Option<String>,

    /// PEM private key matching `cert_name`.
    pub key_file: Option<PathBuf>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override TLS verification.
    pub verify_ssl: Option<bool>,

    /// Override request timeout (seconds).
    pub timeout: Option<u64>,

    /// Open a notification channel on connect.
    pub subscriptions: Option<bool>,

    /// Seconds before token expiry to refresh.
    pub refresh_guard: Option<u64>,

    /// First reconnect delay (milliseconds).
    pub backoff_initial_ms: Option<u64>,

    /// Reconnect delay ceiling (seconds).
    pub backoff_max_secs: Option<u64>,

    /// Give up reconnecting after this many attempts.
    pub max_retries: Option<u32>,

    /// Proxy URL keyed by scheme (`http`, `https`, `all`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proxies: BTreeMap<String, String>,
}

impl Profile {
    pub fn uses_certificate(&self) -> bool {
        self.cert_name.is_some() && self.key_file.is_some()
    }
}

/// Per-invocation values that win over the profile.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub insecure: bool,
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "acikit", "acikit").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("acikit");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. A missing file yields the defaults.
///
/// Environment keys nest on a double underscore:
/// `ACIKIT_PROFILES__LAB__URL=https://...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ACIKIT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile resolution ──────────────────────────────────────────────

/// Resolve the active profile name: explicit choice, then config default.
pub fn active_profile_name(explicit: Option<&str>, config: &Config) -> String {
    explicit
        .map(str::to_owned)
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Look up a profile, synthesizing one when overrides carry a URL.
///
/// This lets `acikit --url ... class fvTenant` work with no config file.
pub fn select_profile(
    config: &Config,
    name: &str,
    overrides: &Overrides,
) -> Result<Profile, ConfigError> {
    match config.profiles.get(name) {
        Some(profile) => Ok(profile.clone()),
        None if overrides.url.is_some() => Ok(Profile {
            login: default_login(),
            ..Profile::default()
        }),
        None => Err(ConfigError::UnknownProfile(name.into())),
    }
}

/// Translate a profile plus overrides into a `ControllerConfig`.
///
/// This is the single boundary where config types cross into core types.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    overrides: &Overrides,
) -> Result<ControllerConfig, ConfigError> {
    // 1. Controller URL (flag > profile)
    let url_str = overrides.url.as_deref().unwrap_or(&profile.url);
    let url: url::Url = url_str.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {url_str}"),
    })?;

    // 2. Credentials
    let auth = resolve_auth(
        profile,
        profile_name,
        overrides,
        std::env::var(PASSWORD_ENV).ok(),
    )?;

    let mut config = ControllerConfig::new(url, auth);

    // 3. TLS verification
    let verify = profile.verify_ssl.unwrap_or(defaults.verify_ssl);
    config.tls = if overrides.insecure || !verify {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    // 4. Tuning
    let timeout = overrides
        .timeout
        .or(profile.timeout)
        .unwrap_or(defaults.timeout);
    config.timeout = Duration::from_secs(timeout);
    config.subscription_enabled = profile.subscriptions.unwrap_or(true);
    if let Some(guard) = profile.refresh_guard {
        config.refresh_guard = Duration::from_secs(guard);
    }
    config.reconnect = reconnect_policy(profile);
    config.proxies.clone_from(&profile.proxies);

    Ok(config)
}

fn reconnect_policy(profile: &Profile) -> ReconnectConfig {
    let mut policy = ReconnectConfig::default();
    if let Some(ms) = profile.backoff_initial_ms {
        policy.initial_delay = Duration::from_millis(ms);
    }
    if let Some(secs) = profile.backoff_max_secs {
        policy.max_delay = Duration::from_secs(secs);
    }
    policy.max_retries = profile.max_retries;
    policy
}

// ── Credential helpers ──────────────────────────────────────────────

/// Pick certificate or password auth.
///
/// Certificate auth needs both `cert_name` and `key_file`. Otherwise the
/// password comes from the flag, then `env_password`, then the profile.
fn resolve_auth(
    profile: &Profile,
    profile_name: &str,
    overrides: &Overrides,
    env_password: Option<String>,
) -> Result<AuthCredentials, ConfigError> {
    let login = overrides
        .login
        .clone()
        .unwrap_or_else(|| profile.login.clone());

    if let (Some(cert_name), Some(key_file)) = (&profile.cert_name, &profile.key_file) {
        let key_pem = std::fs::read_to_string(key_file)?;
        return Ok(AuthCredentials::Certificate {
            login,
            cert_name: cert_name.clone(),
            key_pem: SecretString::from(key_pem),
        });
    }

    let password = overrides
        .password
        .clone()
        .or(env_password)
        .or_else(|| profile.password.clone())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    Ok(AuthCredentials::Password {
        login,
        password: SecretString::from(password),
    })
}
