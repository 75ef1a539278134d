use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://api.hydrolinkhome.com/v1";
pub const DEFAULT_WS_BASE: &str = "wss://api.hydrolinkhome.com";
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;

/// Daemon configuration, usually read from a TOML file.
///
/// ```toml
/// [account]
/// email = "me@example.com"
/// password = "hunter2"
///
/// [polling]
/// interval_secs = 300
///
/// [mqtt]
/// host = "192.168.1.10"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub account: Credentials,
    #[serde(default)]
    pub endpoints: Endpoints,
    #[serde(default)]
    pub polling: PollSettings,
    #[serde(default)]
    pub websocket: RefreshSettings,
    #[serde(default)]
    pub mqtt: Option<MqttSettings>,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Endpoints {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_ws_base")]
    pub ws_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_base: default_ws_base(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Attempts per poll for connectivity failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Live refresh over the device WebSocket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshSettings {
    /// The web app hangs up after this many messages.
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    #[serde(default = "default_refresh_timeout_secs")]
    pub timeout_secs: u64,
}

impl RefreshSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            message_limit: default_message_limit(),
            timeout_secs: default_refresh_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttSettings {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parses without validating, so credentials can still be filled in
    /// from the command line.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn with_credentials(mut self, email: Option<String>, password: Option<String>) -> Self {
        if let Some(email) = email {
            self.account.email = email;
        }
        if let Some(password) = password {
            self.account.password = password;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.email.trim().is_empty() {
            return Err(Error::Config("account.email is required".into()));
        }
        if self.account.password.is_empty() {
            return Err(Error::Config("account.password is required".into()));
        }
        if self.polling.interval_secs == 0 {
            return Err(Error::Config("polling.interval_secs must be positive".into()));
        }
        if self.polling.retry_backoff_ms == 0 {
            return Err(Error::Config("polling.retry_backoff_ms must be positive".into()));
        }
        if self.polling.request_timeout_secs == 0 {
            return Err(Error::Config("polling.request_timeout_secs must be positive".into()));
        }
        if self.polling.retry_attempts == 0 {
            return Err(Error::Config("polling.retry_attempts must be positive".into()));
        }
        if self.websocket.timeout_secs == 0 {
            return Err(Error::Config("websocket.timeout_secs must be positive".into()));
        }
        if self.websocket.message_limit == 0 {
            return Err(Error::Config("websocket.message_limit must be positive".into()));
        }
        check_url("endpoints.api_base", &self.endpoints.api_base, &["http", "https"])?;
        check_url("endpoints.ws_base", &self.endpoints.ws_base, &["ws", "wss"])?;
        if let Some(mqtt) = &self.mqtt {
            if mqtt.host.trim().is_empty() {
                return Err(Error::Config("mqtt.host must not be empty".into()));
            }
            if mqtt.keep_alive_secs < 5 {
                return Err(Error::Config("mqtt.keep_alive_secs must be at least 5".into()));
            }
            if mqtt.topic_prefix.trim_matches('/').is_empty() {
                return Err(Error::Config("mqtt.topic_prefix must not be empty".into()));
            }
        }
        Ok(())
    }
}

fn check_url(field: &str, raw: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("{field}: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::Config(format!(
            "{field}: unsupported scheme {:?}, expected one of {schemes:?}",
            url.scheme()
        )));
    }
    Ok(())
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_ws_base() -> String {
    DEFAULT_WS_BASE.to_string()
}

fn default_interval_secs() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_message_limit() -> usize {
    17
}

fn default_refresh_timeout_secs() -> u64 {
    15
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "hydrolink".to_string()
}

fn default_topic_prefix() -> String {
    "hydrolink".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let config = Config::from_toml_str(
            r#"
            [account]
            email = "me@example.com"
            password = "secret"
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.polling.interval(), Duration::from_secs(300));
        assert_eq!(config.polling.retry_attempts, 3);
        assert_eq!(config.websocket.message_limit, 17);
        assert_eq!(config.endpoints.api_base, DEFAULT_API_BASE);
        assert!(config.mqtt.is_none());
    }

    #[test]
    fn mqtt_section_defaults() {
        let config = Config::from_toml_str(
            r#"
            [account]
            email = "me@example.com"
            password = "secret"

            [mqtt]
            host = "broker.local"
            "#,
        )
        .unwrap();

        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.topic_prefix, "hydrolink");
    }

    #[test]
    fn command_line_credentials_override_file() {
        let config = Config::from_toml_str("")
            .unwrap()
            .with_credentials(Some("cli@example.com".into()), Some("pw".into()));
        config.validate().unwrap();
        assert_eq!(config.account.email, "cli@example.com");
    }

    #[test]
    fn rejects_missing_credentials() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("email")));
    }

    #[test]
    fn rejects_zero_interval_and_bad_urls() {
        let mut config = Config::default().with_credentials(Some("a@b.c".into()), Some("x".into()));
        config.polling.interval_secs = 0;
        assert!(config.validate().is_err());

        config.polling.interval_secs = 60;
        config.endpoints.ws_base = "https://api.hydrolinkhome.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeouts_and_backoff() {
        let config = Config::from_toml_str(
            r#"
            [account]
            email = "me@example.com"
            password = "secret"

            [polling]
            request_timeout_secs = 0

            [websocket]
            timeout_secs = 0
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("request_timeout_secs")));

        let mut config = config;
        config.polling.request_timeout_secs = 10;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("websocket.timeout_secs")));

        config.websocket.timeout_secs = 15;
        config.polling.retry_backoff_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("retry_backoff_ms")));

        config.polling.retry_backoff_ms = 500;
        config.validate().unwrap();
    }

    #[test]
    fn password_is_not_debug_printed() {
        let creds = Credentials::new("me@example.com", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
