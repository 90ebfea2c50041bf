//! Driver configuration
//!
//! Timing knobs for the setup exchange and the polling loop, loaded from
//! JSON. Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

const MIN_READ_TIMEOUT_MS: u64 = 1;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// How long one polling read waits for a report (default: 100)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Deadline for a subcommand reply during setup (default: 1000)
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    /// Delay after enabling the IMU before changing report mode (default: 20)
    #[serde(default = "default_sensor_settle")]
    pub sensor_settle_ms: u64,

    /// Enable the 6-axis sensor during setup
    #[serde(default = "default_true")]
    pub enable_imu: bool,
}

fn default_read_timeout() -> u64 {
    100
}

fn default_reply_timeout() -> u64 {
    1000
}

fn default_sensor_settle() -> u64 {
    20
}

fn default_true() -> bool {
    true
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout(),
            reply_timeout_ms: default_reply_timeout(),
            sensor_settle_ms: default_sensor_settle(),
            enable_imu: default_true(),
        }
    }
}

impl DriverConfig {
    /// Never below 1 ms; a zero timeout turns polling reads non-blocking
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(MIN_READ_TIMEOUT_MS))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn sensor_settle(&self) -> Duration {
        Duration::from_millis(self.sensor_settle_ms)
    }

    /// `<config dir>/joycon-cmd/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("joycon-cmd").join("config.json"))
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DriverConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
