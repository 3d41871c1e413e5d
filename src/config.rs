//! TOML configuration for the feed service and client
//!
//! Threshold values are validated at load time (the `Thresholds` type rejects
//! non-monotonic bands during deserialization), so nothing downstream ever
//! re-checks them.

use crate::protocol::Thresholds;
use crate::tier::{StaticTierLimits, Tier, TierLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskfeedConfig {
    pub service: ServiceSection,
    #[serde(default)]
    pub server: ServerSection,
    /// Present only for processes embedding the feed client
    pub client: Option<ClientSection>,
    #[serde(default)]
    pub tiers: TierSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Service identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    pub description: String,
}

/// Server-side listener and heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Feed WebSocket listener address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Port for the health/stats HTTP endpoints
    #[serde(default = "default_stats_port")]
    pub stats_port: u16,
    /// Interval between server heartbeat frames
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Window after which an unacknowledged connection is evicted
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            stats_port: default_stats_port(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
        }
    }
}

impl ServerSection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Client-side connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Feed endpoint, `ws://` or `wss://`
    pub server_url: String,
    /// Environment variable holding the bearer token
    pub token_env: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Window with no inbound frame after which the connection is presumed dead
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

impl ClientSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Resolve the bearer token from the configured environment variable
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        let env_name = self
            .token_env
            .as_deref()
            .ok_or_else(|| ConfigError::InvalidConfig("client.token_env is not set".to_string()))?;
        std::env::var(env_name).map_err(|_| ConfigError::EnvVarNotFound(env_name.to_string()))
    }
}

/// Reconnect backoff settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Attempts before giving up and entering the terminal closed state
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Per-tier resource caps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierSection {
    #[serde(default = "default_standard_limits")]
    pub standard: TierLimits,
    #[serde(default = "default_premium_limits")]
    pub premium: TierLimits,
}

impl Default for TierSection {
    fn default() -> Self {
        Self {
            standard: default_standard_limits(),
            premium: default_premium_limits(),
        }
    }
}

impl TierSection {
    pub fn to_limit_source(&self) -> StaticTierLimits {
        StaticTierLimits::new(self.standard, self.premium)
    }
}

/// Defaults applied to subscribers without explicit configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DefaultsSection {
    #[serde(default)]
    pub thresholds: Thresholds,
}

/// Static token table used when the authentication collaborator is not wired
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    #[serde(default)]
    pub tokens: Vec<StaticTokenEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticTokenEntry {
    pub token: String,
    pub subscriber_id: String,
    pub tier: Tier,
    /// Omitted means the entry never expires
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:9300".to_string()
}

fn default_stats_port() -> u16 {
    8080
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_base_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    10
}

fn default_standard_limits() -> TierLimits {
    TierLimits {
        max_connections: 2,
        max_messages_per_minute: 10,
    }
}

fn default_premium_limits() -> TierLimits {
    TierLimits {
        max_connections: 10,
        max_messages_per_minute: 100,
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid service ID format: {0}")]
    InvalidServiceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RiskfeedConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RiskfeedConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_id(&self.service.id)?;

        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "server.heartbeat_timeout_secs ({}) must be >= heartbeat_interval_secs ({})",
                self.server.heartbeat_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }

        if let Some(client) = &self.client {
            if client.reconnect.max_attempts == 0 {
                return Err(ConfigError::InvalidConfig(
                    "client.reconnect.max_attempts must be greater than 0".to_string(),
                ));
            }
            if client.reconnect.base_delay_secs > client.reconnect.max_delay_secs {
                return Err(ConfigError::InvalidConfig(format!(
                    "client.reconnect.base_delay_secs ({}) must be <= max_delay_secs ({})",
                    client.reconnect.base_delay_secs, client.reconnect.max_delay_secs
                )));
            }
        }

        Ok(())
    }
}

/// Validate service ID matches [a-zA-Z0-9._-]+
fn validate_service_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ConfigError::InvalidServiceId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [service]
            id = "feed-1"
            description = "Risk alert feed"
        "#
    }

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config: RiskfeedConfig = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.heartbeat_interval_secs, 30);
        assert_eq!(config.server.heartbeat_timeout_secs, 60);
        assert_eq!(config.tiers.standard.max_messages_per_minute, 10);
        assert_eq!(config.tiers.premium.max_messages_per_minute, 100);
        assert!(config.client.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let toml_str = r#"
            [service]
            id = "feed-1"
            description = "Risk alert feed"

            [server]
            bind_addr = "127.0.0.1:9400"
            heartbeat_interval_secs = 15
            heartbeat_timeout_secs = 30

            [client]
            server_url = "ws://localhost:9400/feed"
            token_env = "FEED_TOKEN"

            [client.reconnect]
            base_delay_secs = 2
            max_delay_secs = 20
            max_attempts = 5

            [tiers.standard]
            max_connections = 3
            max_messages_per_minute = 20

            [tiers.premium]
            max_connections = 20
            max_messages_per_minute = 200

            [defaults.thresholds]
            low = 0.2
            medium = 0.5
            high = 0.9
        "#;
        let config: RiskfeedConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        let client = config.client.unwrap();
        assert_eq!(client.reconnect.max_attempts, 5);
        assert_eq!(config.defaults.thresholds.high(), 0.9);
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected_at_parse_time() {
        let toml_str = r#"
            [service]
            id = "feed-1"
            description = "Risk alert feed"

            [defaults.thresholds]
            low = 0.8
            medium = 0.5
            high = 0.9
        "#;
        assert!(toml::from_str::<RiskfeedConfig>(toml_str).is_err());
    }

    #[test]
    fn test_invalid_service_id_rejected() {
        let toml_str = r#"
            [service]
            id = "feed one"
            description = "spaces are not allowed"
        "#;
        let config: RiskfeedConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServiceId(_))
        ));
    }

    #[test]
    fn test_heartbeat_timeout_must_cover_interval() {
        let toml_str = r#"
            [service]
            id = "feed-1"
            description = "Risk alert feed"

            [server]
            heartbeat_interval_secs = 30
            heartbeat_timeout_secs = 10
        "#;
        let config: RiskfeedConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let toml_str = r#"
            [service]
            id = "feed-1"
            description = "Risk alert feed"

            [client]
            server_url = "ws://localhost:9300/feed"

            [client.reconnect]
            max_attempts = 0
        "#;
        let config: RiskfeedConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_resolve_token_from_env() {
        let client = ClientSection {
            server_url: "ws://localhost:9300/feed".to_string(),
            token_env: Some("RISKFEED_TEST_TOKEN".to_string()),
            connect_timeout_secs: default_connect_timeout(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            reconnect: ReconnectSection::default(),
        };
        std::env::set_var("RISKFEED_TEST_TOKEN", "tok-from-env");
        assert_eq!(client.resolve_token().unwrap(), "tok-from-env");
        std::env::remove_var("RISKFEED_TEST_TOKEN");
        assert!(matches!(
            client.resolve_token(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_auth_token_table_parses() {
        let toml_str = r#"
            [service]
            id = "feed-1"
            description = "Risk alert feed"

            [[auth.tokens]]
            token = "tok-abc"
            subscriber_id = "sub-1"
            tier = "premium"

            [[auth.tokens]]
            token = "tok-def"
            subscriber_id = "sub-2"
            tier = "standard"
            expires_at = "2027-01-01T00:00:00Z"
        "#;
        let config: RiskfeedConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.auth.tokens.len(), 2);
        assert_eq!(config.auth.tokens[0].tier, Tier::Premium);
        assert!(config.auth.tokens[0].expires_at.is_none());
        assert!(config.auth.tokens[1].expires_at.is_some());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("riskfeed.toml");
        std::fs::write(&path, minimal_toml()).unwrap();
        let config = RiskfeedConfig::load_from_file(&path).unwrap();
        assert_eq!(config.service.id, "feed-1");
    }
}
