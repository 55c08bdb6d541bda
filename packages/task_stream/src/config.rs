use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::endpoints::Endpoints;
use crate::error::StreamError;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [heartbeat]
//                    interval_ms = 15000
//
//   env var:         TASKSTREAM_HEARTBEAT__INTERVAL_MS=15000   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub dispatch: DispatchFileConfig,
}

/// Where the task endpoints live (`[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// Liveness probing (`[heartbeat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatFileConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HeartbeatFileConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Reconnect policy after abnormal closure (`[reconnect]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
        }
    }
}

/// Event loop queue sizes (`[dispatch]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchFileConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

impl Default for DispatchFileConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_interval_ms() -> u64 {
    30_000
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_step_ms() -> u64 {
    1_000
}
fn default_event_capacity() -> usize {
    256
}
fn default_command_capacity() -> usize {
    64
}

/// Build a figment that layers: defaults → config.toml → TASKSTREAM_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `TASKSTREAM_SERVER__BASE_URL=https://chat.example.com`  →  `server.base_url`
///   `TASKSTREAM_RECONNECT__MAX_ATTEMPTS=3`  →  `reconnect.max_attempts = 3`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("TASKSTREAM_").split("__"))
}

/// Default config directory (`~/.taskstream`), if a home directory exists.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".taskstream"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings
    pub interval: Duration,
    /// How long a ping may go unanswered
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_file(&HeartbeatFileConfig::default())
    }
}

impl HeartbeatConfig {
    pub fn from_file(fc: &HeartbeatFileConfig) -> Self {
        Self {
            interval: Duration::from_millis(fc.interval_ms),
            timeout: Duration::from_millis(fc.timeout_ms),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Abnormal closures tolerated before a session goes stale
    pub max_attempts: u32,
    /// Linear backoff unit: attempt N waits N * backoff_step
    pub backoff_step: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_file(&ReconnectFileConfig::default())
    }
}

impl ReconnectConfig {
    pub fn from_file(fc: &ReconnectFileConfig) -> Self {
        Self {
            max_attempts: fc.max_attempts,
            backoff_step: Duration::from_millis(fc.backoff_step_ms),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Fully resolved client configuration.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub endpoints: Endpoints,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    pub event_capacity: usize,
    pub command_capacity: usize,
}

impl StreamConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self, StreamError> {
        let base = Url::parse(&fc.server.base_url)?;
        Ok(Self {
            endpoints: Endpoints::new(base)?,
            heartbeat: HeartbeatConfig::from_file(&fc.heartbeat),
            reconnect: ReconnectConfig::from_file(&fc.reconnect),
            event_capacity: fc.dispatch.event_capacity.max(1),
            command_capacity: fc.dispatch.command_capacity.max(1),
        })
    }

    /// Load from `config_dir/config.toml` and the environment. A
    /// `base_url_override` (from the command line) wins over both.
    pub fn load(config_dir: &Path, base_url_override: Option<&str>) -> Result<Self, StreamError> {
        let mut fc: FileConfig = load_config(config_dir).extract()?;
        if let Some(base_url) = base_url_override {
            fc.server.base_url = base_url.to_string();
        }
        Self::from_file(&fc)
    }
}
