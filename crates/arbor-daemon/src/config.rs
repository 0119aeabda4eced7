//! Configuration loading and validation

use anyhow::{anyhow, Result};
use arbor_core::{control_type, ControlOptions, Topic};
use arbor_transport::{DriverConfig, DEFAULT_INBOX_CAPACITY, DEFAULT_WAIT_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: DriverSection,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSection {
    /// Name of the root node
    #[serde(default = "default_name")]
    pub name: String,
    /// Wire namespace the tree is mounted under
    #[serde(default = "default_prefix")]
    pub prefix: Topic,
    /// Transport client id (generated when absent)
    #[serde(default)]
    pub client_id: Option<String>,
    /// Retain value and metadata publishes
    #[serde(default = "default_true")]
    pub retain: bool,
    /// Wire events buffered between receive and dispatch
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    /// Longest single wait for wire input, in milliseconds
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            prefix: default_prefix(),
            client_id: None,
            retain: true,
            inbox_capacity: default_inbox_capacity(),
            wait_timeout_ms: default_wait_timeout(),
        }
    }
}

fn default_name() -> String {
    "arbor".to_string()
}

fn default_prefix() -> Topic {
    Topic::segment("devices").unwrap_or_default()
}

fn default_true() -> bool {
    true
}

fn default_inbox_capacity() -> usize {
    DEFAULT_INBOX_CAPACITY
}

fn default_wait_timeout() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

/// Application-side status device updated on a timer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Update interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    /// Name of the status device
    #[serde(default = "default_heartbeat_device")]
    pub device: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_heartbeat_interval(),
            device: default_heartbeat_device(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_device() -> String {
    "system".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Published on `meta/name`, defaults to the device name
    #[serde(default)]
    pub description: Option<String>,
    /// Create unknown controls as text controls when a write arrives for them
    #[serde(default)]
    pub auto_create: bool,
    #[serde(default, rename = "control")]
    pub controls: Vec<ControlConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Defaults to the control type's default name
    #[serde(default)]
    pub name: Option<String>,
    /// One of the built-in `meta/type` names
    #[serde(rename = "type")]
    pub control_type: String,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_true")]
    pub accepting_messages: bool,
    /// Only for `range`
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub initial: String,
    #[serde(default = "default_true")]
    pub subscribe_immediately: bool,
    #[serde(default = "default_true")]
    pub creating_in_mqtt: bool,
}

impl ControlConfig {
    /// Resolve the type name and build validated control options
    pub fn to_options(&self) -> Result<ControlOptions> {
        let control_type = control_type::lookup(&self.control_type).ok_or_else(|| {
            anyhow!(
                "Unknown control type {:?}, expected one of: {}",
                self.control_type,
                control_type::meta_types().join(", ")
            )
        })?;
        let mut options = ControlOptions::new(control_type)
            .readonly(self.readonly)
            .accepting_messages(self.accepting_messages)
            .subscribe_immediately(self.subscribe_immediately)
            .creating_in_mqtt(self.creating_in_mqtt);
        options.units = self.units.clone();
        options.description = self.description.clone();
        options.order = self.order;
        options.max_value = self.max;
        options.validate()?;
        Ok(options)
    }
}

impl Config {
    /// Convert to DriverConfig
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            prefix: self.driver.prefix.clone(),
            retain: self.driver.retain,
            inbox_capacity: self.driver.inbox_capacity,
            poll_interval: self.wait_timeout(),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.driver.wait_timeout_ms.max(1))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), devices = config.devices.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Example configuration with one device
pub fn sample_config() -> Config {
    Config {
        driver: DriverSection::default(),
        heartbeat: HeartbeatConfig::default(),
        devices: vec![DeviceConfig {
            name: "boiler".to_string(),
            description: Some("Boiler room".to_string()),
            auto_create: false,
            controls: vec![
                ControlConfig {
                    name: None,
                    control_type: "temperature".to_string(),
                    units: Some("deg C".to_string()),
                    description: None,
                    order: Some(1),
                    readonly: true,
                    accepting_messages: true,
                    max: None,
                    initial: "20".to_string(),
                    subscribe_immediately: false,
                    creating_in_mqtt: true,
                },
                ControlConfig {
                    name: Some("pump".to_string()),
                    control_type: "switch".to_string(),
                    units: None,
                    description: Some("Circulation pump".to_string()),
                    order: Some(2),
                    readonly: false,
                    accepting_messages: true,
                    max: None,
                    initial: "0".to_string(),
                    subscribe_immediately: true,
                    creating_in_mqtt: true,
                },
            ],
        }],
    }
}

/// Sample configuration rendered as TOML
pub fn default_config_toml() -> Result<String> {
    Ok(toml::to_string_pretty(&sample_config())?)
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    std::fs::write(path, default_config_toml()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.driver.prefix.to_string(), "devices");
        assert!(config.heartbeat.enabled);
    }

    #[test]
    fn test_load_devices_and_controls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[driver]
name = "lab"
prefix = "site/lab"

[[device]]
name = "bench"
description = "Test bench"

[[device.control]]
type = "range"
name = "dimmer"
max = 255
initial = "10"

[[device.control]]
type = "rel_humidity"
readonly = true
subscribe_immediately = false
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.driver.name, "lab");
        assert_eq!(config.driver.prefix, Topic::parse("site/lab").unwrap());
        assert_eq!(config.driver.wait_timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);

        let bench = &config.devices[0];
        assert_eq!(bench.controls.len(), 2);
        let dimmer = bench.controls[0].to_options().unwrap();
        assert_eq!(dimmer.max_value, Some(255));
        let humidity = bench.controls[1].to_options().unwrap();
        assert!(humidity.readonly);
        assert_eq!(humidity.control_type.default_name, "humidity");
    }

    #[test]
    fn test_bad_prefix_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[driver]\nprefix = \"a//b\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_control_options_errors() {
        let mut control = sample_config().devices[0].controls[0].clone();
        control.control_type = "thermostat".to_string();
        let err = control.to_options().unwrap_err().to_string();
        assert!(err.contains("thermostat"));

        control.control_type = "range".to_string();
        assert!(control.to_options().is_err());
    }

    #[test]
    fn test_sample_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbor.toml");
        save_default_config(&path).unwrap();
        assert_eq!(load_config(&path).unwrap(), sample_config());
    }
}
