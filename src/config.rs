//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (default `config/simdaq.toml`)
//! 2. environment variables prefixed with `SIMDAQ_`, which take precedence
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore so that keys containing
//! a single underscore stay intact:
//!
//! ```text
//! SIMDAQ_APPLICATION__LOG_LEVEL=debug
//! SIMDAQ_APPLICATION__WORKER_THREADS=4
//! ```
//!
//! # Example
//!
//! ```no_run
//! use simdaq::config::SimConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = SimConfig::load_from("config/simdaq.toml")?;
//!     println!("Application: {}", config.application.name);
//!     println!("Devices: {}", config.enabled_devices().count());
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use simdaq_devices::{
    AxisConfig, DetectorConfig, EnergySelectorConfig, PvDerivedConfig, SpectrometerConfig,
    TemperatureConfig,
};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/simdaq.toml";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "SIMDAQ_";

/// Valid values of `application.log_level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Simulated devices, built in declaration order
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Worker threads of the action executor
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Default deadline for waiting on device actions, in milliseconds
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            worker_threads: default_worker_threads(),
            action_timeout_ms: default_action_timeout(),
        }
    }
}

/// One simulated device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique device name, also the prefix of its signal names
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub device: DeviceSettings,
}

/// Device type and its type-specific settings, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceSettings {
    Detector(DetectorConfig),
    Axis(AxisConfig),
    TemperatureController(TemperatureConfig),
    Spectrometer(SpectrometerConfig),
    EnergySelector(EnergySelectorConfig),
    PvDerived(PvDerivedConfig),
    TripleAxis(TripleAxisConfig),
}

impl DeviceSettings {
    /// Name of the `type` tag
    pub fn type_name(&self) -> &'static str {
        match self {
            DeviceSettings::Detector(_) => "detector",
            DeviceSettings::Axis(_) => "axis",
            DeviceSettings::TemperatureController(_) => "temperature_controller",
            DeviceSettings::Spectrometer(_) => "spectrometer",
            DeviceSettings::EnergySelector(_) => "energy_selector",
            DeviceSettings::PvDerived(_) => "pv_derived",
            DeviceSettings::TripleAxis(_) => "triple_axis",
        }
    }

    fn failure_probability(&self) -> Option<f64> {
        match self {
            DeviceSettings::Detector(c) => Some(c.failure_probability),
            DeviceSettings::Axis(c) => Some(c.failure_probability),
            DeviceSettings::TemperatureController(c) => Some(c.failure_probability),
            DeviceSettings::Spectrometer(c) => Some(c.failure_probability),
            DeviceSettings::PvDerived(c) => Some(c.failure_probability),
            DeviceSettings::EnergySelector(_) | DeviceSettings::TripleAxis(_) => None,
        }
    }
}

/// Monochromator and analyzer of a triple-axis instrument
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripleAxisConfig {
    #[serde(default)]
    pub monochromator: EnergySelectorConfig,
    #[serde(default)]
    pub analyzer: EnergySelectorConfig,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "simdaq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_threads() -> usize {
    2
}

fn default_action_timeout() -> u64 {
    30_000
}

fn default_enabled() -> bool {
    true
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SimConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, then validate it.
    ///
    /// Environment variables (`SIMDAQ_` prefix) override file values.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::Load)?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document without touching the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(ConfigError::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - At least one worker thread
    /// - Device IDs are non-empty and unique
    /// - Failure probabilities lie in `[0, 1]`
    /// - Axis velocity and temperature ramp rates are positive
    /// - Travel limits are ordered
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.application.worker_threads == 0 {
            return Err(ConfigError::Validation(
                "worker_threads must be at least 1".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Device ID cannot be empty".to_string(),
                ));
            }
            if !ids.insert(&device.id) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate device ID: '{}'",
                    device.id
                )));
            }
            self.validate_device(device)?;
        }

        Ok(())
    }

    fn validate_device(&self, device: &DeviceDefinition) -> Result<(), ConfigError> {
        let invalid = |what: String| {
            ConfigError::Validation(format!(
                "{} '{}': {}",
                device.device.type_name(),
                device.id,
                what
            ))
        };

        if let Some(p) = device.device.failure_probability() {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(format!(
                    "failure_probability {p} must be within [0, 1]"
                )));
            }
        }

        match &device.device {
            DeviceSettings::Axis(axis) => {
                if !(axis.velocity > 0.0) {
                    return Err(invalid(format!("velocity {} must be > 0", axis.velocity)));
                }
                if !(axis.min <= axis.max) {
                    return Err(invalid(format!(
                        "limits [{}, {}] are not ordered",
                        axis.min, axis.max
                    )));
                }
            }
            DeviceSettings::TemperatureController(tc) => {
                if !(tc.heating_rate > 0.0 && tc.cooling_rate > 0.0) {
                    return Err(invalid("heating and cooling rates must be > 0".to_string()));
                }
                if !(tc.min <= tc.max) {
                    return Err(invalid(format!(
                        "limits [{}, {}] are not ordered",
                        tc.min, tc.max
                    )));
                }
            }
            DeviceSettings::Spectrometer(spec) => {
                if spec.num_pixels <= 0 {
                    return Err(invalid(format!(
                        "num_pixels {} must be > 0",
                        spec.num_pixels
                    )));
                }
            }
            DeviceSettings::PvDerived(pv) => {
                if pv.inputs.is_empty() {
                    return Err(invalid("at least one input is required".to_string()));
                }
            }
            DeviceSettings::Detector(_)
            | DeviceSettings::EnergySelector(_)
            | DeviceSettings::TripleAxis(_) => {}
        }
        Ok(())
    }

    /// Devices with `enabled = true`, in declaration order.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|d| d.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(devices: Vec<DeviceDefinition>) -> SimConfig {
        SimConfig {
            application: ApplicationConfig::default(),
            devices,
        }
    }

    fn device(id: &str, settings: DeviceSettings) -> DeviceDefinition {
        DeviceDefinition {
            id: id.to_string(),
            enabled: true,
            device: settings,
        }
    }

    #[test]
    fn test_config_validation_valid() {
        let config = config_with(vec![
            device("det", DeviceSettings::Detector(DetectorConfig::default())),
            device("x", DeviceSettings::Axis(AxisConfig::default())),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = config_with(vec![]);
        config.application.log_level = "invalid".to_string();
        let result = config.validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level"));
    }

    #[test]
    fn test_duplicate_device_ids() {
        let config = config_with(vec![
            device("det", DeviceSettings::Detector(DetectorConfig::default())),
            device("det", DeviceSettings::Detector(DetectorConfig::default())),
        ]);
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("Duplicate device ID"));
    }

    #[test]
    fn test_failure_probability_range() {
        let config = config_with(vec![device(
            "det",
            DeviceSettings::Detector(DetectorConfig {
                failure_probability: 1.5,
                ..DetectorConfig::default()
            }),
        )]);
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("failure_probability"));
    }

    #[test]
    fn test_non_positive_velocity() {
        let config = config_with(vec![device(
            "x",
            DeviceSettings::Axis(AxisConfig {
                velocity: 0.0,
                ..AxisConfig::default()
            }),
        )]);
        assert!(config.validate().unwrap_err().to_string().contains("velocity"));
    }

    #[test]
    fn test_parse_tagged_devices() {
        let config = SimConfig::from_toml_str(
            r#"
            [application]
            name = "tutorial"

            [[devices]]
            id = "det"
            type = "detector"
            gain = 2.0

            [[devices]]
            id = "mono"
            type = "energy_selector"
            prefix = "HFIR:"
            pv_a1_suffix = "mono:theta"
            pv_a2_suffix = "mono:two_theta"
            crystal = "PG002"
            sense = "-"

            [[devices]]
            id = "tc"
            type = "temperature_controller"
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.application.name, "tutorial");
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.enabled_devices().count(), 2);
        match &config.devices[0].device {
            DeviceSettings::Detector(det) => {
                assert_eq!(det.gain, 2.0);
                assert_eq!(det.exposure_time, 1.0);
            }
            other => panic!("unexpected settings: {other:?}"),
        }
        match &config.devices[1].device {
            DeviceSettings::EnergySelector(sel) => assert_eq!(sel.pv_a1_suffix, "mono:theta"),
            other => panic!("unexpected settings: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = SimConfig::from_toml_str(
            r#"
            [[devices]]
            id = "laser"
            type = "maitai"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
