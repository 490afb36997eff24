// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use crate::error::AppError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up by [`Settings::load`]
pub const DEFAULT_CONFIG_FILE: &str = "ridelink.toml";
/// Environment prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "RIDELINK_";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Listener settings
    pub server: ServerSettings,
    /// Ping/pong liveness settings
    pub heartbeat: HeartbeatSettings,
    /// Vehicle-location fan-out settings
    pub location: LocationSettings,
    /// Token verification settings
    pub auth: AuthSettings,
    /// Log output settings
    pub log: LogSettings,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Largest inbound message/frame accepted on either socket
    pub max_frame_bytes: usize,
}

/// Heartbeat settings shared by both sockets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Seconds between liveness sweeps
    pub interval_secs: u64,
}

/// Vehicle-location settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationSettings {
    /// Seconds between staleness sweeps
    pub stale_sweep_secs: u64,
    /// A position older than this many seconds is evicted
    pub stale_after_secs: u64,
    /// New connections receive broadcasts without sending `subscribe`
    pub auto_subscribe: bool,
}

/// Token verification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret shared with the REST API that issues the tokens
    pub jwt_secret: String,
    /// Clock skew tolerated on `exp`, in seconds
    pub leeway_secs: u64,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_frame_bytes: 100 * 1024 * 1024,
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            stale_sweep_secs: 10,
            stale_after_secs: 30,
            auto_subscribe: true,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Settings {
    /// Load settings from defaults, `ridelink.toml` and the environment
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load settings using a specific config file. A missing file is not an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let settings: Settings = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Provider chain, lowest precedence first
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), AppError> {
        if self.server.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "server.max_frame_bytes must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat.interval_secs == 0 {
            return Err(AppError::Config(
                "heartbeat.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.location.stale_sweep_secs == 0 {
            return Err(AppError::Config(
                "location.stale_sweep_secs must be greater than 0".to_string(),
            ));
        }
        if self.location.stale_after_secs < self.location.stale_sweep_secs {
            return Err(AppError::Config(
                "location.stale_after_secs must not be shorter than location.stale_sweep_secs"
                    .to_string(),
            ));
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(AppError::Config("auth.jwt_secret must be set".to_string()));
        }
        let level = self.log.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(AppError::Config(format!(
                "log.level must be one of {LOG_LEVELS:?}, got {}",
                self.log.level
            )));
        }
        Ok(())
    }

    /// Socket address to listen on
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid server address: {e}")))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.location.stale_sweep_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.location.stale_after_secs)
    }
}
