//! Configuration system using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults (`Settings::default()`)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `PVDAQ_`, nested with `__`
//!
//! ```text
//! PVDAQ_APPLICATION__LOG_LEVEL=debug
//! PVDAQ_DEVICE__PORT=/dev/ttyACM1
//! PVDAQ_SWEEP__REP_NUM=10
//! ```
//!
//! # Example
//!
//! ```no_run
//! use pvdaq::config::Settings;
//!
//! let settings = Settings::load(Some("config/pvdaq.toml"))?;
//! println!("Device port: {}", settings.device.port);
//! # Ok::<(), pvdaq::error::DaqError>(())
//! ```

use crate::calibration::{Calibration, Level};
use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial device settings
    pub device: DeviceConfig,
    /// Hardware scale factors
    pub calibration: Calibration,
    /// Default sweep parameters
    pub sweep: SweepConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Serial device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port (e.g., "/dev/ttyACM0", "COM4")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Reply timeout in milliseconds
    pub timeout_ms: u64,
    /// Terminator the firmware appends to replies
    pub read_termination: String,
    /// Terminator appended to every command
    pub write_termination: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            timeout_ms: 1000,
            read_termination: "\r\n".to_string(),
            write_termination: "\n".to_string(),
        }
    }
}

/// Which front end is wired to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Solar cell behind the divider and shunt
    #[default]
    Photovoltaic,
    /// LED with a series resistor
    Diode,
}

/// Default sweep parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// First level (inclusive)
    pub start: Level,
    /// Last level (exclusive)
    pub stop: Level,
    /// Readings per channel at every level
    pub rep_num: usize,
    /// Quantity model applied to the readings
    pub model: ModelKind,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start: 0,
            stop: 1023,
            rep_num: 5,
            model: ModelKind::Photovoltaic,
        }
    }
}

impl Settings {
    /// Build the layered figment without extracting it.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("PVDAQ_").split("__"))
    }

    /// Load and validate configuration.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> AppResult<Self> {
        let settings: Self = Self::figment(path.as_ref().map(AsRef::as_ref)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Calibration constants are positive and finite
    /// - Default sweep range lies inside the output range
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.device.port.is_empty() {
            return Err(DaqError::Configuration(
                "device 'port' cannot be empty".to_string(),
            ));
        }

        let cal = &self.calibration;
        let constants = [
            ("scale_v", cal.scale_v),
            ("r_shunt", cal.r_shunt),
            ("resistance_factor", cal.resistance_factor),
            ("sentinel_resistance", cal.sentinel_resistance),
            ("r_series", cal.r_series),
            ("full_scale_voltage", cal.full_scale_voltage),
        ];
        for (name, value) in constants {
            if !value.is_finite() || value <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "calibration '{}' must be positive, got {}",
                    name, value
                )));
            }
        }
        if cal.max_level == 0 || cal.adc_levels == 0 {
            return Err(DaqError::Configuration(
                "calibration 'max_level' and 'adc_levels' must be > 0".to_string(),
            ));
        }

        let sweep = &self.sweep;
        if sweep.rep_num == 0 || sweep.start >= sweep.stop || sweep.stop > cal.max_level {
            return Err(DaqError::Configuration(format!(
                "default sweep {}..{} (rep_num {}) outside 0..={}",
                sweep.start, sweep.stop, sweep.rep_num, cal.max_level
            )));
        }

        Ok(())
    }
}
