// Loop timing, failsafe, serial and robot configuration
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::motor::RobotGeometry;

// Control loop period (100 Hz)
pub const CONTROL_PERIOD: Duration = Duration::from_millis(10);

// How often the protocol context looks at the command age
pub const FAILSAFE_CHECK_PERIOD: Duration = Duration::from_millis(100);

// Command age after which the motors are stopped
pub const FAILSAFE_TIMEOUT: Duration = Duration::from_millis(500);

// Host serial link
pub const SERIAL_BAUDRATE: u32 = 115_200;
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(10);

// Simulated plant integration step
pub const SIM_PERIOD: Duration = Duration::from_millis(1);

// Reported by GET_VERSION
pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;
pub const VERSION_PATCH: u8 = 0;

// Defaults used when no configuration file is present
pub mod defaults {
    pub const PID_KP: f32 = 1.0;
    pub const PID_KI: f32 = 0.1;
    pub const PID_KD: f32 = 0.01;
    pub const MAX_RPM: f32 = 200.0;
    pub const ENCODER_PPR: u16 = 1024;
    pub const GEAR_RATIO: f32 = 1.0;
    pub const WHEEL_DIAMETER: f32 = 0.1; // 100 mm
    pub const TRACK_WIDTH: f32 = 0.3; // 300 mm
}

/// Errors while loading, validating or persisting configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunable robot parameters (the GET_CONFIG / SET_CONFIG record)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub pid_kp: f32,
    pub pid_ki: f32,
    pub pid_kd: f32,
    pub max_rpm: f32,
    pub encoder_ppr: u16,
    pub gear_ratio: f32,
    pub wheel_diameter: f32,
    pub track_width: f32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            pid_kp: defaults::PID_KP,
            pid_ki: defaults::PID_KI,
            pid_kd: defaults::PID_KD,
            max_rpm: defaults::MAX_RPM,
            encoder_ppr: defaults::ENCODER_PPR,
            gear_ratio: defaults::GEAR_RATIO,
            wheel_diameter: defaults::WHEEL_DIAMETER,
            track_width: defaults::TRACK_WIDTH,
        }
    }
}

impl RobotConfig {
    pub fn geometry(&self) -> RobotGeometry {
        RobotGeometry {
            wheel_diameter: self.wheel_diameter,
            track_width: self.track_width,
            gear_ratio: self.gear_ratio,
            max_rpm: self.max_rpm,
        }
    }

    /// Reject values the control loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gains = [("pid_kp", self.pid_kp), ("pid_ki", self.pid_ki), ("pid_kd", self.pid_kd)];
        for (field, value) in gains {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, value, "must be finite and >= 0"));
            }
        }

        let physical = [
            ("max_rpm", self.max_rpm),
            ("gear_ratio", self.gear_ratio),
            ("wheel_diameter", self.wheel_diameter),
            ("track_width", self.track_width),
        ];
        for (field, value) in physical {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(field, value, "must be finite and > 0"));
            }
        }

        if self.encoder_ppr == 0 {
            return Err(ConfigError::Invalid {
                field: "encoder_ppr",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Load and validate a JSON configuration file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: RobotConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

fn invalid(field: &'static str, value: f32, rule: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: format!("{} ({})", rule, value),
    }
}

/// Periods of the two loops and the failsafe timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub control_period: Duration,
    pub failsafe_check_period: Duration,
    pub failsafe_timeout: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            control_period: CONTROL_PERIOD,
            failsafe_check_period: FAILSAFE_CHECK_PERIOD,
            failsafe_timeout: FAILSAFE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("diffdrive-{}-{}-{}.json", name, std::process::id(), nanos))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RobotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.encoder_ppr, 1024);
        assert_eq!(config.geometry().max_rpm, 200.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: [fn(&mut RobotConfig); 6] = [
            |c| c.wheel_diameter = 0.0,
            |c| c.track_width = -0.3,
            |c| c.max_rpm = f32::NAN,
            |c| c.gear_ratio = f32::INFINITY,
            |c| c.pid_ki = -1.0,
            |c| c.encoder_ppr = 0,
        ];
        for mutate in cases {
            let mut config = RobotConfig::default();
            mutate(&mut config);
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid { .. })),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_zero_gains_allowed() {
        let config = RobotConfig {
            pid_kp: 0.0,
            pid_ki: 0.0,
            pid_kd: 0.0,
            ..RobotConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("save");
        let config = RobotConfig {
            pid_kp: 2.5,
            max_rpm: 130.0,
            encoder_ppr: 2048,
            ..RobotConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = RobotConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let path = temp_path("partial");
        fs::write(&path, r#"{ "max_rpm": 180.0 }"#).unwrap();
        let loaded = RobotConfig::load(&path).unwrap();
        assert_eq!(loaded.max_rpm, 180.0);
        assert_eq!(loaded.pid_kp, defaults::PID_KP);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_invalid_file() {
        let path = temp_path("invalid");
        fs::write(&path, r#"{ "wheel_diameter": 0.0 }"#).unwrap();
        assert!(matches!(RobotConfig::load(&path), Err(ConfigError::Invalid { .. })));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(RobotConfig::load(&path), Err(ConfigError::Json(_))));
        let _ = fs::remove_file(&path);

        assert!(matches!(RobotConfig::load(&path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_default_timing() {
        let timing = LoopTiming::default();
        assert_eq!(timing.control_period, Duration::from_millis(10));
        assert_eq!(timing.failsafe_check_period, Duration::from_millis(100));
        assert_eq!(timing.failsafe_timeout, Duration::from_millis(500));
    }
}
