use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    controller::homing::HomingSettings,
    models::{AxisId, AxisScale},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GimbalMode {
    /// Drive the hardware in this process.
    #[default]
    Local,
    /// Talk to a gimbal server over the network.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GimbalConfig {
    pub mode: GimbalMode,
    pub network: NetworkConfig,
    pub motion: MotionConfig,
    pub axis1: AxisConfig,
    pub axis2: AxisConfig,
    pub homing: HomingConfig,
    pub accessories: AccessoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub gimbal_host: String,
    pub command_port: u16,
    pub telemetry_port: u16,
    pub command_timeout_ms: u64,
    pub telemetry_period_ms: u64,
    pub link_loss_threshold_ms: u64,
    pub telemetry_poll_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub loop_period_us: u64,
    pub step_pulse_us: u64,
}

/// Axis tables are read as a whole; the two axes have different defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub steps_per_revolution: u32,
    pub microstep_fraction: f64,
    pub gear_ratio: f64,
    pub max_speed: f64,
    pub acceleration: f64,
    pub invert_direction: bool,
    pub step_pin: u64,
    pub dir_pin: u64,
    pub enable_pin: u64,
    pub sensor_pin: u64,
    pub sensor_active_low: bool,
    /// Step range in which the simulated reference sensor reads active.
    pub simulated_sensor_window: [i64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingConfig {
    pub max_speed: f64,
    pub acceleration: f64,
    pub homing_speed: f64,
    pub search_arc_degrees: f64,
    pub fast_path_fraction: f64,
    pub debounce_ms: u64,
    pub step_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryConfig {
    pub laser_pin: u64,
    pub water_gun_pin: u64,
    pub fan_pin: u64,
    pub max_spray_seconds: f64,
    pub fan_on_celsius: f32,
    pub fan_off_celsius: f32,
    pub thermal_zone: PathBuf,
    pub temperature_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Daily rolling JSON log files are written here when set.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            gimbal_host: "127.0.0.1".to_string(),
            command_port: 5555,
            telemetry_port: 5556,
            command_timeout_ms: 500,
            telemetry_period_ms: 500,
            link_loss_threshold_ms: 1000,
            telemetry_poll_ms: 100,
        }
    }
}

impl NetworkConfig {
    pub fn command_bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.command_port)
    }

    pub fn telemetry_bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.telemetry_port)
    }

    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.gimbal_host, self.command_port)
    }

    pub fn telemetry_addr(&self) -> String {
        format!("{}:{}", self.gimbal_host, self.telemetry_port)
    }

    /// Points the client side of this config at an already bound server.
    pub fn connect_to(&mut self, command: SocketAddr, telemetry: SocketAddr) {
        self.gimbal_host = command.ip().to_string();
        self.command_port = command.port();
        self.telemetry_port = telemetry.port();
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_millis(self.telemetry_period_ms)
    }

    pub fn link_loss_threshold(&self) -> Duration {
        Duration::from_millis(self.link_loss_threshold_ms)
    }

    pub fn telemetry_poll(&self) -> Duration {
        Duration::from_millis(self.telemetry_poll_ms)
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            loop_period_us: 1000,
            step_pulse_us: 2,
        }
    }
}

impl MotionConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_micros(self.loop_period_us)
    }

    pub fn step_pulse(&self) -> Duration {
        Duration::from_micros(self.step_pulse_us)
    }
}

impl Default for GimbalConfig {
    fn default() -> Self {
        Self {
            mode: GimbalMode::default(),
            network: NetworkConfig::default(),
            motion: MotionConfig::default(),
            axis1: AxisConfig::axis1(),
            axis2: AxisConfig::axis2(),
            homing: HomingConfig::default(),
            accessories: AccessoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AxisConfig {
    pub fn axis1() -> Self {
        Self {
            steps_per_revolution: 200,
            microstep_fraction: 0.25,
            gear_ratio: 16.0 / 80.0,
            max_speed: 8000.0,
            acceleration: 20000.0,
            invert_direction: false,
            step_pin: 19,
            dir_pin: 13,
            enable_pin: 12,
            sensor_pin: 6,
            sensor_active_low: true,
            simulated_sensor_window: [40, 60],
        }
    }

    pub fn axis2() -> Self {
        Self {
            gear_ratio: 20.0 / 80.0,
            step_pin: 18,
            dir_pin: 24,
            enable_pin: 4,
            sensor_pin: 26,
            simulated_sensor_window: [-80, -50],
            ..Self::axis1()
        }
    }

    pub fn scale(&self) -> AxisScale {
        AxisScale::new(
            self.steps_per_revolution,
            self.microstep_fraction,
            self.gear_ratio,
        )
    }
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            max_speed: 1000.0,
            acceleration: 1000.0,
            homing_speed: 500.0,
            search_arc_degrees: 175.0,
            fast_path_fraction: 0.5,
            debounce_ms: 5,
            step_period_ms: 1,
        }
    }
}

impl HomingConfig {
    pub fn settings_for(&self, axis: &AxisConfig) -> HomingSettings {
        HomingSettings {
            max_speed: self.max_speed,
            acceleration: self.acceleration,
            homing_speed: self.homing_speed,
            search_bound_steps: axis.scale().to_steps(self.search_arc_degrees).abs(),
            fast_path_fraction: self.fast_path_fraction,
            debounce: Duration::from_millis(self.debounce_ms),
            step_period: Duration::from_millis(self.step_period_ms),
        }
    }
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            laser_pin: 0,
            water_gun_pin: 1,
            fan_pin: 11,
            max_spray_seconds: 5.0,
            fan_on_celsius: 76.0,
            fan_off_celsius: 72.0,
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            temperature_window: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "gimbal".to_string(),
        }
    }
}

impl GimbalConfig {
    pub fn axis(&self, axis: AxisId) -> &AxisConfig {
        match axis {
            AxisId::One => &self.axis1,
            AxisId::Two => &self.axis2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: String| Err(ConfigError::ValidationError { message });

        for id in AxisId::ALL {
            let axis = self.axis(id);
            if axis.steps_per_revolution == 0 {
                return fail(format!("axis{}: steps_per_revolution must be positive", id));
            }
            if !(axis.microstep_fraction > 0.0 && axis.gear_ratio > 0.0) {
                return fail(format!(
                    "axis{}: microstep_fraction and gear_ratio must be positive",
                    id
                ));
            }
            if !(axis.max_speed > 0.0 && axis.acceleration > 0.0) {
                return fail(format!(
                    "axis{}: max_speed and acceleration must be positive",
                    id
                ));
            }
            let [low, high] = axis.simulated_sensor_window;
            if low > high {
                return fail(format!("axis{}: simulated_sensor_window is reversed", id));
            }
        }

        let homing = &self.homing;
        if !(homing.max_speed > 0.0 && homing.acceleration > 0.0 && homing.homing_speed > 0.0) {
            return fail("homing speeds and acceleration must be positive".to_string());
        }
        if !(homing.search_arc_degrees > 0.0 && homing.search_arc_degrees <= 360.0) {
            return fail("homing.search_arc_degrees must be in (0, 360]".to_string());
        }
        if !(homing.fast_path_fraction > 0.0 && homing.fast_path_fraction <= 1.0) {
            return fail("homing.fast_path_fraction must be in (0, 1]".to_string());
        }

        let accessories = &self.accessories;
        if accessories.fan_off_celsius >= accessories.fan_on_celsius {
            return fail("accessories.fan_off_celsius must be below fan_on_celsius".to_string());
        }
        if !(accessories.max_spray_seconds > 0.0 && accessories.max_spray_seconds.is_finite()) {
            return fail("accessories.max_spray_seconds must be positive and finite".to_string());
        }

        if self.motion.loop_period_us == 0 {
            return fail("motion.loop_period_us must be positive".to_string());
        }
        let network = &self.network;
        if network.command_port != 0 && network.command_port == network.telemetry_port {
            return fail("network.command_port and telemetry_port must differ".to_string());
        }
        if self.network.command_timeout_ms == 0 || self.network.telemetry_period_ms == 0 {
            return fail("network timeouts and periods must be positive".to_string());
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("gimbal.toml"))
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn path(&self) -> &Path {
        &self.options.config_path
    }

    pub fn load(&self) -> anyhow::Result<GimbalConfig> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if self.options.create_if_missing {
                let default_config = GimbalConfig::default();
                self.save(&default_config)
                    .context("Failed to save default config")?;
                return Ok(default_config);
            }
            return Err(ConfigError::FileNotFound {
                path: config_path.clone(),
            }
            .into());
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: GimbalConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &GimbalConfig) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

pub fn init_config() -> anyhow::Result<(ConfigManager, GimbalConfig)> {
    let manager = ConfigManager::with_options(ConfigOptions {
        create_if_missing: should_create_config(),
        ..Default::default()
    });
    let config = manager.load()?;
    Ok((manager, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &tempfile::TempDir, create_if_missing: bool) -> ConfigManager {
        ConfigManager::with_options(ConfigOptions {
            config_path: dir.path().join("nested").join("gimbal.toml"),
            create_if_missing,
        })
    }

    #[test]
    fn defaults_are_valid() {
        let config = GimbalConfig::default();
        config.validate().unwrap();

        assert_eq!(config.network.command_port, 5555);
        assert_eq!(config.network.telemetry_port, 5556);
        assert_eq!(config.axis2.gear_ratio, 0.25);
        assert_eq!(config.axis2.step_pin, 18);
    }

    #[test]
    fn missing_file_is_created_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir, true);

        let config = manager.load().unwrap();
        assert_eq!(config, GimbalConfig::default());
        assert!(manager.path().exists());

        assert_eq!(manager.load().unwrap(), config);
    }

    #[test]
    fn missing_file_is_an_error_otherwise() {
        let dir = tempfile::tempdir().unwrap();
        let err = manager_in(&dir, false).load().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gimbal.toml");
        fs::write(
            &path,
            "mode = \"remote\"\n[network]\ngimbal_host = \"10.0.0.7\"\n[homing]\nhoming_speed = 250.0\n",
        )
        .unwrap();

        let config = ConfigManager::with_options(ConfigOptions::with_path(&path))
            .load()
            .unwrap();

        assert_eq!(config.mode, GimbalMode::Remote);
        assert_eq!(config.network.command_addr(), "10.0.0.7:5555");
        assert_eq!(config.homing.homing_speed, 250.0);
        assert_eq!(config.homing.max_speed, 1000.0);
        assert_eq!(config.axis2, AxisConfig::axis2());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gimbal.toml");
        fs::write(&path, "[homing]\nfast_path_fraction = 1.5\n").unwrap();

        let err = ConfigManager::with_options(ConfigOptions::with_path(&path))
            .load()
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn shared_port_is_rejected() {
        let mut config = GimbalConfig::default();
        config.network.telemetry_port = config.network.command_port;
        assert!(config.validate().is_err());

        config.network.command_port = 0;
        config.network.telemetry_port = 0;
        config.validate().unwrap();
    }

    #[test]
    fn unbounded_spray_is_rejected() {
        let mut config = GimbalConfig::default();
        config.accessories.max_spray_seconds = f64::INFINITY;
        assert!(config.validate().is_err());

        config.accessories.max_spray_seconds = 2.5;
        config.validate().unwrap();
    }

    #[test]
    fn homing_bound_follows_axis_gearing() {
        let config = GimbalConfig::default();

        let first = config.homing.settings_for(&config.axis1);
        let second = config.homing.settings_for(&config.axis2);

        assert_eq!(first.search_bound_steps, 1944);
        assert_eq!(second.search_bound_steps, 1555);
        assert_eq!(first.debounce, Duration::from_millis(5));
    }
}
