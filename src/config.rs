use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::workflow::WorkflowSettings;

/// Runtime configuration. Bot credentials, the allow-list and the device
/// endpoint live in the snapshot file, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Snapshot file holding the reference tree
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Device retrieval limits
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Upper bound for retrieving every section once
    #[serde(default = "default_device_timeout")]
    pub timeout_secs: u64,
    /// Upper bound for a single HTTP request to the bridge
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How often to tell the caller we are still busy
    #[serde(default = "default_feedback_interval")]
    pub feedback_interval_secs: u64,
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("config.yaml")
}

fn default_heartbeat() -> u64 {
    60
}

fn default_keep_alive() -> u64 {
    30
}

fn default_client_id() -> String {
    "eta-watch".to_string()
}

fn default_device_timeout() -> u64 {
    600
}

fn default_request_timeout() -> u64 {
    30
}

fn default_feedback_interval() -> u64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            mqtt: MqttConfig::default(),
            device: DeviceConfig::default(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: default_keep_alive(),
            client_id: default_client_id(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_device_timeout(),
            request_timeout_secs: default_request_timeout(),
            feedback_interval_secs: default_feedback_interval(),
        }
    }
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            device_timeout: Duration::from_secs(self.timeout_secs),
            feedback_interval: Duration::from_secs(self.feedback_interval_secs),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!(
            snapshot = %config.snapshot_path.display(),
            broker = %config.mqtt.broker,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Reject settings that would make the bot hang or spin.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.device.timeout_secs == 0 {
            return Err("device.timeout_secs must be at least 1".into());
        }
        if self.device.request_timeout_secs == 0 {
            return Err("device.request_timeout_secs must be at least 1".into());
        }
        if self.device.feedback_interval_secs == 0 {
            return Err("device.feedback_interval_secs must be at least 1".into());
        }
        if self.heartbeat_secs == 0 {
            return Err("heartbeat_secs must be at least 1".into());
        }
        Ok(())
    }
}
