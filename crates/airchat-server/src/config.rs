//! Gateway configuration from `AIRCHAT_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Picture shown for users with no stored profile.
pub const DEFAULT_PICTURE: &str = "/images/defaultusericon.jpg";

/// IRC port used when a network name carries none.
pub const DEFAULT_IRC_PORT: u16 = 6667;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// HTTP/WebSocket listen address.
    pub web_addr: String,
    pub irc_port: u16,
    /// Holds `profiles.json`.
    pub data_dir: PathBuf,
    pub default_picture: String,
    /// Served as the router fallback.
    pub static_dir: PathBuf,
    /// How long logout waits for a connection's QUIT before aborting it.
    pub shutdown_grace: Duration,
    /// Shared secret the login service presents to open sessions. Unset
    /// means no session can be opened.
    pub login_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            web_addr: "0.0.0.0:8080".into(),
            irc_port: DEFAULT_IRC_PORT,
            data_dir: PathBuf::from("data"),
            default_picture: DEFAULT_PICTURE.into(),
            static_dir: PathBuf::from("public"),
            shutdown_grace: Duration::from_millis(2000),
            login_secret: None,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("AIRCHAT_WEB_ADDR") {
            config.web_addr = addr;
        }
        if let Some(port) = lookup("AIRCHAT_IRC_PORT") {
            config.irc_port = port.parse().map_err(|_| ConfigError::Invalid {
                var: "AIRCHAT_IRC_PORT",
                expected: "a port number",
                value: port.clone(),
            })?;
        }
        if let Some(dir) = lookup("AIRCHAT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(picture) = lookup("AIRCHAT_DEFAULT_PICTURE") {
            config.default_picture = picture;
        }
        if let Some(dir) = lookup("AIRCHAT_STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup("AIRCHAT_SHUTDOWN_GRACE_MS") {
            let ms: u64 = ms.parse().map_err(|_| ConfigError::Invalid {
                var: "AIRCHAT_SHUTDOWN_GRACE_MS",
                expected: "milliseconds",
                value: ms.clone(),
            })?;
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(secret) = lookup("AIRCHAT_LOGIN_SECRET") {
            config.login_secret = Some(secret).filter(|s| !s.is_empty());
        }

        Ok(config)
    }
}
