//! Controller configuration, loaded from `kiln.toml`.
//!
//! Pin assignments and control-loop timing are deployment facts, not
//! user settings; they live here rather than in the persisted
//! `KilnSettings`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            hardware: HardwareConfig::default(),
            control: ControlConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardwareConfig {
    /// "sim" runs against the built-in plant model.
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_ssr_pin")]
    pub ssr_pin: i32,
    #[serde(default = "default_tc_cs_pin")]
    pub tc_cs_pin: i32,
    /// -1 = not fitted.
    #[serde(default = "default_unfitted_pin")]
    pub vent_pin: i32,
    /// -1 = not fitted.
    #[serde(default = "default_unfitted_pin")]
    pub alarm_pin: i32,
    #[serde(default = "default_spi_hz")]
    pub spi_hz: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            ssr_pin: default_ssr_pin(),
            tc_cs_pin: default_tc_cs_pin(),
            vent_pin: default_unfitted_pin(),
            alarm_pin: default_unfitted_pin(),
            spi_hz: default_spi_hz(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    #[serde(default = "default_sampler_period_ms")]
    pub sampler_period_ms: u64,
    #[serde(default = "default_supervisor_period_ms")]
    pub supervisor_period_ms: u64,
    #[serde(default = "default_engine_period_ms")]
    pub engine_period_ms: u64,
    /// Time-proportional SSR window.
    #[serde(default = "default_ssr_window_ms")]
    pub ssr_window_ms: u64,
    /// Ceiling used until persisted settings load.
    #[serde(default = "default_max_safe_temp_c")]
    pub default_max_safe_temp_c: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            sampler_period_ms: default_sampler_period_ms(),
            supervisor_period_ms: default_supervisor_period_ms(),
            engine_period_ms: default_engine_period_ms(),
            ssr_window_ms: default_ssr_window_ms(),
            default_max_safe_temp_c: default_max_safe_temp_c(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl KilnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.control;
        if c.sampler_period_ms == 0 || c.supervisor_period_ms == 0 || c.engine_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "control periods must be non-zero".to_string(),
            ));
        }
        if c.ssr_window_ms < c.supervisor_period_ms {
            return Err(ConfigError::Invalid(
                "ssr_window_ms must be at least the supervisor period".to_string(),
            ));
        }
        if !c.default_max_safe_temp_c.is_finite() || c.default_max_safe_temp_c <= 0.0 {
            return Err(ConfigError::Invalid(
                "default_max_safe_temp_c must be positive".to_string(),
            ));
        }
        if self.hardware.spi_hz == 0 || self.hardware.spi_hz > 5_000_000 {
            return Err(ConfigError::Invalid(
                "spi_hz must be in (0, 5 MHz]".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_driver() -> String {
    "sim".to_string()
}
fn default_ssr_pin() -> i32 {
    17
}
fn default_tc_cs_pin() -> i32 {
    10
}
fn default_unfitted_pin() -> i32 {
    -1
}
fn default_spi_hz() -> u32 {
    1_000_000
}
fn default_sampler_period_ms() -> u64 {
    250
}
fn default_supervisor_period_ms() -> u64 {
    500
}
fn default_engine_period_ms() -> u64 {
    1000
}
fn default_ssr_window_ms() -> u64 {
    2000
}
fn default_max_safe_temp_c() -> f32 {
    1300.0
}
fn default_data_dir() -> String {
    "./kiln_data".to_string()
}

pub fn load_config(path: &str) -> Result<KilnConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<KilnConfig>(&contents) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_control_cadences() {
        let config = KilnConfig::default();
        config.validate().unwrap();
        assert_eq!(config.control.sampler_period_ms, 250);
        assert_eq!(config.control.supervisor_period_ms, 500);
        assert_eq!(config.control.engine_period_ms, 1000);
        assert_eq!(config.control.ssr_window_ms, 2000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: KilnConfig = toml::from_str(
            r#"
            [hardware]
            ssr_pin = 5

            [storage]
            data_dir = "/tmp/kiln"
            "#,
        )
        .unwrap();
        assert_eq!(config.hardware.ssr_pin, 5);
        assert_eq!(config.hardware.driver, "sim");
        assert_eq!(config.storage.data_dir, "/tmp/kiln");
        assert_eq!(config.control.engine_period_ms, 1000);
    }

    #[test]
    fn validate_rejects_zero_periods_and_fast_spi() {
        let mut config = KilnConfig::default();
        config.control.engine_period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = KilnConfig::default();
        config.hardware.spi_hz = 20_000_000;
        assert!(config.validate().is_err());
    }
}
