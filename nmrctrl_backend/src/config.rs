//! Configuration for the NMR controller
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or no file at all)
//! describes the stock bench setup:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 1000000
//!
//! [acquisition]
//! inactivity_timeout_ms = 5000
//! sample_rate_hz = 9615.0
//!
//! [toolchain]
//! compiler = ["anmr-compile", "{input}", "{output}"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub serial: SerialConfig,
    pub acquisition: AcquisitionConfig,
    pub sequence: SequenceConfig,
    pub files: FileConfig,
    pub toolchain: ToolchainConfig,
    pub logging: LoggingConfig,
}

/// Serial link to the microcontroller (8N1, RTS/DTR asserted)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port path (e.g. "/dev/ttyACM0" or "COM3")
    pub port: String,
    pub baud_rate: u32,
    /// Wait between QUERY and reading the readiness reply
    pub settle_ms: u64,
    /// Longest wait for a text reply line
    pub reply_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Acquisition ends after this long without a byte from the device
    pub inactivity_timeout_ms: u64,
    /// Poll period while the line is idle
    pub poll_interval_ms: u64,
    /// ADC sample rate assumed for the spectrum
    pub sample_rate_hz: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Pause between automatically executed steps
    pub step_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    /// Pulse program handed to the compiler
    pub program: PathBuf,
    /// Compiled image uploaded to the device
    pub image: PathBuf,
    /// Persisted ADC samples (.npy)
    pub data: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler command line; `{input}` and `{output}` are replaced by the program and image paths
    pub compiler: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 1_000_000,
            settle_ms: 1000,
            reply_timeout_ms: 1000,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 5000,
            poll_interval_ms: 100,
            sample_rate_hz: 9615.0,
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 2000,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(pulseprog_backend::DEFAULT_PROGRAM_FILE),
            image: PathBuf::from("output.bin"),
            data: PathBuf::from("adc_data.npy"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SerialConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl AcquisitionConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SequenceConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

impl ExperimentConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
