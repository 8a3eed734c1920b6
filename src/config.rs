// Configuration module for Gatehouse

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::constants::{
    AGENT_RETRY_INTERVAL, DEFAULT_PENALTY_SECONDS, MQTT_RETRY_INTERVAL,
};
use crate::core::race::StartPolicy;

// =============================================================================
// CONFIGURATION STRUCTURES
// =============================================================================

/// Pub/sub broker settings and the gate topics to watch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    /// Topics the subscriber watches. Gate events arrive on the
    /// `*/start` and `*/finish` ones; the rest are presence traffic.
    #[serde(default = "default_mqtt_topics")]
    pub topics: Vec<String>,
    /// Seconds between reconnect attempts.
    #[serde(default = "default_mqtt_retry_secs")]
    pub retry_interval_secs: u64,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_client_id() -> String {
    "gatehouse-sub".to_string()
}
fn default_mqtt_topics() -> Vec<String> {
    [
        "gate/ir",
        "gate1/ir",
        "gate2/ir",
        "gate1/start",
        "gate2/start",
        "gate1/finish",
        "gate2/finish",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}
fn default_mqtt_retry_secs() -> u64 {
    MQTT_RETRY_INTERVAL.as_secs()
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            topics: default_mqtt_topics(),
            retry_interval_secs: default_mqtt_retry_secs(),
        }
    }
}

/// Point-to-point agent channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// WebSocket endpoint of the message relay, e.g. `ws://relay:8080/ws`.
    #[serde(default = "default_agent_url")]
    pub url: String,
    /// Identity announced in the hello frame.
    #[serde(default = "default_agent_client_id")]
    pub client_id: String,
    /// Seconds between reconnect attempts.
    #[serde(default = "default_agent_retry_secs")]
    pub retry_interval_secs: u64,
}

fn default_agent_url() -> String {
    "ws://localhost:8080/ws".to_string()
}
fn default_agent_client_id() -> String {
    "gatehouse".to_string()
}
fn default_agent_retry_secs() -> u64 {
    AGENT_RETRY_INTERVAL.as_secs()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            client_id: default_agent_client_id(),
            retry_interval_secs: default_agent_retry_secs(),
        }
    }
}

/// Race rules and roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceSettings {
    #[serde(default = "default_competitors")]
    pub competitors: Vec<String>,
    #[serde(default = "default_top_camera")]
    pub top_camera: String,
    /// Seconds added to the final time per penalty.
    #[serde(default = "default_penalty_seconds")]
    pub penalty_seconds: f64,
    /// What a start trigger does while a race is already running.
    #[serde(default)]
    pub start_policy: StartPolicy,
}

fn default_competitors() -> Vec<String> {
    vec!["gerald".to_string(), "mael".to_string()]
}
fn default_top_camera() -> String {
    "top_camera".to_string()
}
fn default_penalty_seconds() -> f64 {
    DEFAULT_PENALTY_SECONDS
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            competitors: default_competitors(),
            top_camera: default_top_camera(),
            penalty_seconds: default_penalty_seconds(),
            start_policy: StartPolicy::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingSettings {
    /// Log file path. Empty = stderr only.
    #[serde(default)]
    pub log_file: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub race: RaceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

// =============================================================================
// CONFIG LOADING
// =============================================================================

#[derive(Debug)]
pub enum ConfigError {
    ReadError(std::io::Error),
    ParseError(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config file: {}", e),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file is not an error:
    /// every field has a default. Called before logging is up, so outcomes
    /// are reported by the caller.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        toml::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topics.len(), 7);
        assert_eq!(config.agent.retry_interval_secs, 15);
        assert_eq!(config.race.competitors, vec!["gerald", "mael"]);
        assert_eq!(config.race.penalty_seconds, 5.0);
        assert_eq!(config.race.start_policy, StartPolicy::RejectUntilReset);
        assert!(config.logging.log_file.is_empty());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            [mqtt]
            host = "192.168.88.253"

            [race]
            penalty_seconds = 2.5
            start_policy = "allow_restart"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mqtt.host, "192.168.88.253");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.race.penalty_seconds, 2.5);
        assert_eq!(config.race.start_policy, StartPolicy::AllowRestart);
        assert_eq!(config.agent.client_id, "gatehouse");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/gatehouse.toml")).unwrap();
        assert_eq!(config.mqtt.host, "localhost");
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let toml_str = "[mqtt\nhost = 3";
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }
}
