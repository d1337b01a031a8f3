// Engine configuration - Device preferences and timing parameters
// Stored as JSON under the user's config directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::device::AudioDeviceInfo;
use crate::error::EngineError;
use crate::midi::device::MidiDeviceInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioPreferences {
    /// None = system default output
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

impl Default for AudioPreferences {
    fn default() -> Self {
        Self {
            device_index: None,
            sample_rate: 44_100,
            buffer_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiPreferences {
    /// None = first available output
    pub device_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Seeks land on the nearest beat of the tempo map
    pub snap_to_grid: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            snap_to_grid: true,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub drift_check_interval_ms: u64,
    pub drift_threshold_ms: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drift_check_interval_ms: 500,
            drift_threshold_ms: 50.0,
        }
    }
}

impl SyncConfig {
    pub fn drift_check_interval(&self) -> Duration {
        Duration::from_millis(self.drift_check_interval_ms)
    }

    /// Threshold in seconds
    pub fn drift_threshold(&self) -> f64 {
        self.drift_threshold_ms.max(0.0) / 1000.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioPreferences,
    pub midi: MidiPreferences,
    pub scheduler: SchedulerConfig,
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// `<config dir>/quickmidi/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("quickmidi").join("config.json"))
    }

    /// Read the config; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Like `load`, but a broken file is logged and replaced by the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::load(path).unwrap_or_else(|e| {
            log::warn!("Ignoring config {}: {}", path.display(), e);
            Self::default()
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        log::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Forget device indices that are no longer present
    pub fn validate_devices(&mut self, audio: &[AudioDeviceInfo], midi: &[MidiDeviceInfo]) {
        if let Some(index) = self.audio.device_index
            && !audio.iter().any(|device| device.index == index)
        {
            log::warn!("Configured audio device {} not available, using default", index);
            self.audio.device_index = None;
        }

        if let Some(index) = self.midi.device_index
            && !midi.iter().any(|device| device.index == index)
        {
            log::warn!("Configured MIDI device {} not available, using default", index);
            self.midi.device_index = None;
        }
    }
}
