use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [connection]
//                    connect_timeout_secs = 10
//
//   env var:         BUILDCHAT_CONNECTION__CONNECT_TIMEOUT_SECS=10
//
//   (double underscore = nesting, single underscore stays within field names)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub connection: ConnectionFileConfig,
}

/// Where the assistant backend lives (`[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Defaults to `api_url` with the scheme swapped to ws/wss.
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: None,
        }
    }
}

/// Opaque bearer token (`[auth]`). Obtaining it is out of scope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub token: Option<String>,
}

/// Connection lifecycle tunables (`[connection]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Close codes that trigger an automatic reopen.
    #[serde(default = "default_retryable_close_codes")]
    pub retryable_close_codes: Vec<u16>,
    /// Consecutive automatic reopens before giving up (0 = never reopen).
    #[serde(default = "default_max_auto_reopens")]
    pub max_auto_reopens: u32,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            retryable_close_codes: default_retryable_close_codes(),
            max_auto_reopens: default_max_auto_reopens(),
        }
    }
}

fn default_api_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_retryable_close_codes() -> Vec<u16> {
    // 1002 protocol error, 1003 unsupported data
    vec![1002, 1003]
}
fn default_max_auto_reopens() -> u32 {
    5
}

/// Build a figment that layers: defaults → config.toml → BUILDCHAT_* env vars.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("BUILDCHAT_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Connection policy (runtime view).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub retryable_close_codes: Vec<u16>,
    pub max_auto_reopens: u32,
}

impl ConnectionConfig {
    pub fn from_file(fc: &ConnectionFileConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(fc.connect_timeout_secs.max(1)),
            retryable_close_codes: fc.retryable_close_codes.clone(),
            max_auto_reopens: fc.max_auto_reopens,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from_file(&ConnectionFileConfig::default())
    }
}

/// Everything the client needs, resolved.
#[derive(Clone, Debug)]
pub struct SessionSyncConfig {
    pub data_dir: PathBuf,
    pub api_url: String,
    pub ws_url: String,
    pub token: Option<String>,
    pub connection: ConnectionConfig,
}

impl SessionSyncConfig {
    pub fn from_file(data_dir: PathBuf, fc: &FileConfig) -> Self {
        let api_url = fc.server.api_url.trim_end_matches('/').to_string();
        let ws_url = fc
            .server
            .ws_url
            .as_deref()
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| ws_url_from_api(&api_url));
        Self {
            data_dir,
            api_url,
            ws_url,
            token: fc.auth.token.clone().filter(|t| !t.is_empty()),
            connection: ConnectionConfig::from_file(&fc.connection),
        }
    }

    /// Resolve the data directory (default `~/.buildchat`) and load config from it.
    pub fn load(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".buildchat"),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let fc: FileConfig = load_config(&data_dir)
            .extract()
            .context("Failed to load configuration")?;
        Ok(Self::from_file(data_dir, &fc))
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}

fn ws_url_from_api(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_url.to_string()
    }
}
