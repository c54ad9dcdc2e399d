use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::DeviceId;
use crate::codec::{check_rates, CodecType};
use crate::error::{ModemError, Result};
use crate::{DEFAULT_BAUD_RATE, DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_RATE};

/// Engine settings. `None` devices select the backend default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub input_device: Option<DeviceId>,
    pub output_device: Option<DeviceId>,
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub baud_rate: u32,
    pub codec: CodecType,
    pub input_volume: f64,
    pub output_volume: f64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            baud_rate: DEFAULT_BAUD_RATE,
            codec: CodecType::Fsk,
            input_volume: 1.0,
            output_volume: 1.0,
        }
    }
}

impl ModemConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ModemError::InvalidConfig("chunk size must be non-zero".into()));
        }
        if self.baud_rate > self.sample_rate {
            return Err(ModemError::InvalidConfig(format!(
                "baud rate {} exceeds sample rate {}",
                self.baud_rate, self.sample_rate
            )));
        }
        check_rates(self.codec, self.sample_rate, self.baud_rate)?;

        for (name, volume) in [("input", self.input_volume), ("output", self.output_volume)] {
            if !(0.0..=1.0).contains(&volume) {
                return Err(ModemError::InvalidConfig(format!(
                    "{name} volume {volume} outside 0.0..=1.0"
                )));
            }
        }
        Ok(())
    }

    /// True when switching from `self` to `other` requires rebuilding the
    /// stream and codec. Volumes alone never do.
    pub fn needs_restart(&self, other: &ModemConfig) -> bool {
        self.input_device != other.input_device
            || self.output_device != other.output_device
            || self.sample_rate != other.sample_rate
            || self.chunk_size != other.chunk_size
            || self.baud_rate != other.baud_rate
            || self.codec != other.codec
    }

    /// Load and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ModemConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
