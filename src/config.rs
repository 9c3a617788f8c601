//! Runtime configuration loaded from TOML
//!
//! ```toml
//! port = "Tempera"
//! channel_policy = "per_emitter"   # or { shared = 1 }
//! drain_timeout_ms = 1000
//!
//! [sequencer]
//! bpm = 120.0
//! steps_per_beat = 2
//!
//! [automation]
//! bpm = 120.0
//!
//! [controllers]
//! place_in_cell = 118
//!
//! [controllers.adsr]
//! attack = 92
//!
//! [[controllers.emitters]]   # emitter 1; later tables are emitters 2-4
//! volume = 20
//! ```

use crate::controller_map::ControllerMap;
use crate::error::Result;
use crate::pool::{ChannelPolicy, PoolConfig};
use crate::sequencer::SequencerTiming;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const PORT_ENV_VAR: &str = "TEMPERA_PORT";
pub const DEFAULT_PORT: &str = "Tempera";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperaConfig {
    /// Output port name, matched as a substring
    pub port: String,
    pub channel_policy: ChannelPolicy,
    /// 1-16, used for track, global and transport messages
    pub global_channel: u8,
    pub drain_timeout_ms: u64,
    pub note: u8,
    pub velocity: u8,
    pub sequencer: SequencerConfig,
    pub automation: AutomationConfig,
    pub controllers: ControllerMap,
}

impl Default for TemperaConfig {
    fn default() -> Self {
        Self {
            port: std::env::var(PORT_ENV_VAR).unwrap_or_else(|_| DEFAULT_PORT.to_string()),
            channel_policy: ChannelPolicy::default(),
            global_channel: 1,
            drain_timeout_ms: 1000,
            note: 60,
            velocity: 127,
            sequencer: SequencerConfig::default(),
            automation: AutomationConfig::default(),
            controllers: ControllerMap::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub bpm: Option<f64>,
    /// Seconds per step; conflicts with `bpm`
    pub step_duration: Option<f64>,
    pub steps_per_beat: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            bpm: None,
            step_duration: None,
            steps_per_beat: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub bpm: f64,
    pub tick_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            tick_ms: 16,
        }
    }
}

impl TemperaConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load `path` if given and present, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            controllers: self.controllers.clone(),
            channel_policy: self.channel_policy,
            global_channel: self.global_channel,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    pub fn sequencer_timing(&self) -> SequencerTiming {
        SequencerTiming {
            step_duration: self.sequencer.step_duration,
            bpm: self.sequencer.bpm,
            steps_per_beat: self.sequencer.steps_per_beat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_is_default() {
        let config = TemperaConfig::from_toml("").unwrap();
        assert_eq!(config.drain_timeout_ms, 1000);
        assert_eq!(config.channel_policy, ChannelPolicy::Shared(1));
        assert_eq!(config.controllers, ControllerMap::default());
        assert_eq!(config.sequencer.steps_per_beat, 1);
    }

    #[test]
    fn test_channel_policy_spellings() {
        let config = TemperaConfig::from_toml("channel_policy = \"per_emitter\"").unwrap();
        assert_eq!(config.channel_policy, ChannelPolicy::PerEmitter);

        let config = TemperaConfig::from_toml("channel_policy = { shared = 5 }").unwrap();
        assert_eq!(config.channel_policy, ChannelPolicy::Shared(5));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = \"Virtual\"\ndrain_timeout_ms = 250\n\n[sequencer]\nbpm = 90.0\nsteps_per_beat = 2\n\n[controllers]\nmodwheel = 3"
        )
        .unwrap();

        let config = TemperaConfig::load(file.path()).unwrap();
        assert_eq!(config.port, "Virtual");
        assert_eq!(config.pool_config().drain_timeout, Duration::from_millis(250));
        assert_eq!(config.controllers.modwheel, 3);

        let timing = config.sequencer_timing();
        assert_eq!(timing.bpm, Some(90.0));
        assert_eq!(timing.steps_per_beat, 2);
    }

    #[test]
    fn test_nested_controller_override() {
        let config = TemperaConfig::from_toml(
            "[controllers.adsr]\nattack = 5\n\n[[controllers.emitters]]\nvolume = 9\n",
        )
        .unwrap();
        let defaults = ControllerMap::default();
        assert_eq!(config.controllers.adsr.attack, 5);
        assert_eq!(config.controllers.adsr.decay, defaults.adsr.decay);
        assert_eq!(config.controllers.emitters[0].volume, 9);
        assert_eq!(
            config.controllers.emitters[0].grain_length_cell,
            defaults.emitters[0].grain_length_cell
        );
        assert_eq!(config.controllers.emitters[3], defaults.emitters[3]);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = TemperaConfig::load_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.note, 60);
    }

    #[test]
    fn test_malformed_config_is_error() {
        assert!(TemperaConfig::from_toml("drain_timeout_ms = \"soon\"").is_err());
    }
}
