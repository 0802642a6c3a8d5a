use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::retry::RetryConfig;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [auth]
//                    admin_password = "..."
//
//   env var:         RELAY_AUTH__ADMIN_PASSWORD=...   (double underscore = nesting)
//
//   legacy env:      ADMIN_PASS, SECRET_KEY, PORT, DATABASE_URL, ENVIRONMENT

/// Ten years: admin sessions effectively never expire.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Named configuration presets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// host=127.0.0.1, insecure cookies
    Development,
    /// host=0.0.0.0, Secure cookies
    Production,
}

impl Profile {
    /// Reads the bare `ENVIRONMENT` value older deployments set. Anything but
    /// "production" (any case) runs as development.
    pub fn from_environment(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Profile::Production
        } else {
            Profile::Development
        }
    }
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub store: StoreFileConfig,
}

/// Admin secret and session cookie settings (`[auth]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub session_secret: Option<String>,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default)]
    pub https: bool,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            admin_password: None,
            session_secret: None,
            session_ttl_secs: default_session_ttl(),
            cookie_name: default_cookie_name(),
            https: false,
        }
    }
}

/// Listener and per-connection limits (`[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_max_login_failures")]
    pub max_login_failures: u32,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            send_channel_capacity: default_send_channel_capacity(),
            max_message_chars: default_max_message_chars(),
            max_login_failures: default_max_login_failures(),
        }
    }
}

/// Message store settings (`[store]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreFileConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for StoreFileConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}
fn default_cookie_name() -> String {
    "relay_session".to_string()
}
fn default_send_channel_capacity() -> usize {
    100
}
fn default_max_message_chars() -> usize {
    4000
}
fn default_max_login_failures() -> u32 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    50
}
fn default_acquire_timeout_secs() -> u64 {
    5
}

pub const DEFAULT_PORT: u16 = 5000;

/// Build a figment that layers: defaults → profile defaults → config.toml →
/// legacy env names → RELAY_* env vars.
///
/// The CLI profile takes priority over the profile named in config/env.
pub fn load_config(data_dir: &Path, cli_profile: Option<&Profile>) -> figment::Figment {
    let environment = std::env::var("ENVIRONMENT").ok();
    layered_config(data_dir, cli_profile, environment.as_deref())
}

/// Profile precedence: CLI, then `profile` from config.toml / `RELAY_PROFILE`,
/// then the bare `ENVIRONMENT` value.
fn layered_config(
    data_dir: &Path,
    cli_profile: Option<&Profile>,
    environment: Option<&str>,
) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    let base = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(legacy_env())
        .merge(relay_env());

    let profile: Option<Profile> = cli_profile
        .cloned()
        .or_else(|| base.extract_inner("profile").ok())
        .or_else(|| environment.map(Profile::from_environment));

    let profile_layer = profile_to_file_config(profile.as_ref());

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Serialized::defaults(profile_layer))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(legacy_env())
        .merge(relay_env())
}

fn relay_env() -> figment::providers::Env {
    figment::providers::Env::prefixed("RELAY_").split("__")
}

/// Bare environment names accepted for older deployments.
fn legacy_env() -> figment::Figment {
    use figment::{Figment, providers::Env};

    Figment::new()
        .merge(
            Env::raw()
                .only(&["ADMIN_PASS"])
                .map(|_| "auth.admin_password".into()),
        )
        .merge(
            Env::raw()
                .only(&["SECRET_KEY"])
                .map(|_| "auth.session_secret".into()),
        )
        .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
        .merge(
            Env::raw()
                .only(&["DATABASE_URL"])
                .map(|_| "store.database_url".into()),
        )
}

/// Fields not set by the profile stay at their struct defaults so figment
/// does not override explicit values from config.toml / env.
fn profile_to_file_config(profile: Option<&Profile>) -> FileConfig {
    match profile {
        Some(Profile::Development) => FileConfig {
            profile: Some(Profile::Development),
            auth: AuthFileConfig {
                https: false,
                ..Default::default()
            },
            server: ServerFileConfig {
                host: Some("127.0.0.1".to_string()),
                ..Default::default()
            },
            store: Default::default(),
        },
        Some(Profile::Production) => FileConfig {
            profile: Some(Profile::Production),
            auth: AuthFileConfig {
                https: true,
                ..Default::default()
            },
            server: ServerFileConfig {
                host: Some("0.0.0.0".to_string()),
                ..Default::default()
            },
            store: Default::default(),
        },
        None => FileConfig::default(),
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Admin authentication and session continuity settings (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Shared admin secret; `None` disables admin login entirely
    pub admin_password: Option<String>,
    /// Key for tagging session tokens; `None` means a per-process random key
    pub session_secret: Option<String>,
    pub session_ttl: Duration,
    pub cookie_name: String,
    /// Whether to set the Secure flag on the session cookie
    pub https: bool,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            admin_password: fc.admin_password.clone().filter(|p| !p.is_empty()),
            session_secret: fc.session_secret.clone().filter(|s| !s.is_empty()),
            session_ttl: Duration::from_secs(fc.session_ttl_secs),
            cookie_name: fc.cookie_name.clone(),
            https: fc.https,
        }
    }
}

/// Per-connection limits (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub send_channel_capacity: usize,
    pub max_message_chars: usize,
    pub max_login_failures: u32,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            send_channel_capacity: fc.send_channel_capacity.max(1),
            max_message_chars: fc.max_message_chars,
            max_login_failures: fc.max_login_failures,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(&ServerFileConfig::default())
    }
}

/// Store connection and retry settings (runtime view).
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub acquire_timeout: Duration,
    pub retry: RetryConfig,
}

impl StoreConfig {
    pub fn from_file(fc: &StoreFileConfig) -> Self {
        Self {
            database_url: fc.database_url.clone().filter(|u| !u.is_empty()),
            acquire_timeout: Duration::from_secs(fc.acquire_timeout_secs),
            retry: RetryConfig {
                max_retries: fc.max_retries,
                initial_backoff: Duration::from_millis(fc.initial_backoff_ms),
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Directory layout config (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl RelayConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".support-relay"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("relay.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    /// SQLite URL for the store; an explicit `database_url` wins.
    pub fn db_url(&self, store: &StoreConfig) -> String {
        store
            .database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite://{}?mode=rwc", self.db_path.display()))
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            let wal_path = self.db_path.with_extension("db-wal");
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            let shm_path = self.db_path.with_extension("db-shm");
            if shm_path.exists() {
                std::fs::remove_file(&shm_path)?;
            }
        }
        Ok(())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
