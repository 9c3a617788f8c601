//! Automatable controls and their dotted names

use crate::controller_map::{
    AdsrParam, ChorusParam, ControllerMap, DelayParam, EmitterParam, ReverbParam,
    EMITTER_COUNT, MODULATOR_COUNT, TRACK_COUNT,
};
use crate::error::{check_range, Result, TemperaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single CC-addressed control an envelope can drive
///
/// Written as `emitter.1.volume`, `track.3.volume`,
/// `global.modulator.2.size`, `global.modwheel` or `global.reverb.mix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ControlTarget {
    Emitter { emitter: u8, param: EmitterParam },
    TrackVolume { track: u8 },
    ModulatorSize { modulator: u8 },
    Modwheel,
    Adsr(AdsrParam),
    Reverb(ReverbParam),
    Delay(DelayParam),
    Chorus(ChorusParam),
}

impl ControlTarget {
    /// Controller number for this target
    pub fn controller(&self, map: &ControllerMap) -> Result<u8> {
        match *self {
            ControlTarget::Emitter { emitter, param } => {
                Ok(map.emitter(emitter)?.controller(param))
            }
            ControlTarget::TrackVolume { track } => map.track_volume(track),
            ControlTarget::ModulatorSize { modulator } => map.modulator_size(modulator),
            ControlTarget::Modwheel => Ok(map.modwheel),
            ControlTarget::Adsr(param) => Ok(map.adsr.controller(param)),
            ControlTarget::Reverb(param) => Ok(map.reverb.controller(param)),
            ControlTarget::Delay(param) => Ok(map.delay.controller(param)),
            ControlTarget::Chorus(param) => Ok(map.chorus.controller(param)),
        }
    }

    /// Emitter whose channel carries this target, if any
    pub fn emitter(&self) -> Option<u8> {
        match *self {
            ControlTarget::Emitter { emitter, .. } => Some(emitter),
            _ => None,
        }
    }
}

fn parse_number(what: &'static str, text: &str, max: u8) -> Result<u8> {
    let value = text
        .parse::<u8>()
        .map_err(|_| TemperaError::InvalidTarget(format!("{what} '{text}' is not a number")))?;
    check_range(what, value, 1, max)
}

impl FromStr for ControlTarget {
    type Err = TemperaError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            ["emitter", n, param] => Ok(ControlTarget::Emitter {
                emitter: parse_number("emitter", n, EMITTER_COUNT)?,
                param: param.parse()?,
            }),
            ["track", n, "volume"] => Ok(ControlTarget::TrackVolume {
                track: parse_number("track", n, TRACK_COUNT)?,
            }),
            ["global", "modulator", n, "size"] => Ok(ControlTarget::ModulatorSize {
                modulator: parse_number("modulator", n, MODULATOR_COUNT)?,
            }),
            ["global", "modwheel"] => Ok(ControlTarget::Modwheel),
            ["global", "adsr", param] => Ok(ControlTarget::Adsr(param.parse()?)),
            ["global", "reverb", param] => Ok(ControlTarget::Reverb(param.parse()?)),
            ["global", "delay", param] => Ok(ControlTarget::Delay(param.parse()?)),
            ["global", "chorus", param] => Ok(ControlTarget::Chorus(param.parse()?)),
            _ => Err(TemperaError::InvalidTarget(s.to_string())),
        }
    }
}

impl fmt::Display for ControlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlTarget::Emitter { emitter, param } => write!(f, "emitter.{emitter}.{param}"),
            ControlTarget::TrackVolume { track } => write!(f, "track.{track}.volume"),
            ControlTarget::ModulatorSize { modulator } => {
                write!(f, "global.modulator.{modulator}.size")
            }
            ControlTarget::Modwheel => f.write_str("global.modwheel"),
            ControlTarget::Adsr(param) => write!(f, "global.adsr.{param}"),
            ControlTarget::Reverb(param) => write!(f, "global.reverb.{param}"),
            ControlTarget::Delay(param) => write!(f, "global.delay.{param}"),
            ControlTarget::Chorus(param) => write!(f, "global.chorus.{param}"),
        }
    }
}

impl TryFrom<String> for ControlTarget {
    type Error = TemperaError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ControlTarget> for String {
    fn from(target: ControlTarget) -> Self {
        target.to_string()
    }
}
