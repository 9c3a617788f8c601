//! Controller-number tables
//!
//! Maps every addressable Tempera parameter to the CC number it listens on.
//! The tables are configuration: the defaults below describe the layout this
//! crate ships with, and a `[controllers]` table in the config file overrides
//! any subset of them for a differently mapped unit. Missing keys, including
//! keys inside nested tables and per-emitter tables, keep their defaults.

use crate::error::{check_range, Result, TemperaError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const EMITTER_COUNT: u8 = 4;
pub const TRACK_COUNT: u8 = 8;
pub const MODULATOR_COUNT: u8 = 10;

/// CC numbers for one emitter, in the order the hardware documents them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterControllers {
    pub volume: u8,
    pub grain_length_cell: u8,
    pub grain_length_note: u8,
    pub grain_density: u8,
    pub grain_shape: u8,
    pub grain_shape_attack: u8,
    pub grain_pan: u8,
    pub grain_tune_spread: u8,
    pub octave: u8,
    pub relative_x: u8,
    pub relative_y: u8,
    pub spray_x: u8,
    pub spray_y: u8,
    pub tone_filter_width: u8,
    pub tone_filter_center: u8,
    pub effects_send: u8,
}

impl EmitterControllers {
    /// Sixteen consecutive controllers starting at `base`.
    pub const fn consecutive(base: u8) -> Self {
        Self {
            volume: base,
            grain_length_cell: base + 1,
            grain_length_note: base + 2,
            grain_density: base + 3,
            grain_shape: base + 4,
            grain_shape_attack: base + 5,
            grain_pan: base + 6,
            grain_tune_spread: base + 7,
            octave: base + 8,
            relative_x: base + 9,
            relative_y: base + 10,
            spray_x: base + 11,
            spray_y: base + 12,
            tone_filter_width: base + 13,
            tone_filter_center: base + 14,
            effects_send: base + 15,
        }
    }

    pub fn controller(&self, param: EmitterParam) -> u8 {
        match param {
            EmitterParam::Volume => self.volume,
            EmitterParam::GrainLengthCell => self.grain_length_cell,
            EmitterParam::GrainLengthNote => self.grain_length_note,
            EmitterParam::GrainDensity => self.grain_density,
            EmitterParam::GrainShape => self.grain_shape,
            EmitterParam::GrainShapeAttack => self.grain_shape_attack,
            EmitterParam::GrainPan => self.grain_pan,
            EmitterParam::GrainTuneSpread => self.grain_tune_spread,
            EmitterParam::Octave => self.octave,
            EmitterParam::RelativeX => self.relative_x,
            EmitterParam::RelativeY => self.relative_y,
            EmitterParam::SprayX => self.spray_x,
            EmitterParam::SprayY => self.spray_y,
            EmitterParam::ToneFilterWidth => self.tone_filter_width,
            EmitterParam::ToneFilterCenter => self.tone_filter_center,
            EmitterParam::EffectsSend => self.effects_send,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsrControllers {
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbControllers {
    pub size: u8,
    pub color: u8,
    pub mix: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayControllers {
    pub feedback: u8,
    pub time: u8,
    pub color: u8,
    pub mix: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusControllers {
    pub depth: u8,
    pub speed: u8,
    pub flange: u8,
    pub mix: u8,
}

/// Full controller table for one Tempera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerMap {
    /// Up to four tables, in emitter order; each overrides that emitter's defaults
    #[serde(deserialize_with = "emitter_overrides")]
    pub emitters: [EmitterControllers; EMITTER_COUNT as usize],
    pub track_volumes: [u8; TRACK_COUNT as usize],
    pub modulator_sizes: [u8; MODULATOR_COUNT as usize],
    pub modwheel: u8,
    pub adsr: AdsrControllers,
    pub reverb: ReverbControllers,
    pub delay: DelayControllers,
    pub chorus: ChorusControllers,
    pub active_emitter: u8,
    pub place_in_cell: u8,
    pub remove_from_cell: u8,
}

impl Default for AdsrControllers {
    fn default() -> Self {
        Self {
            attack: 92,
            decay: 93,
            sustain: 94,
            release: 95,
        }
    }
}

impl Default for ReverbControllers {
    fn default() -> Self {
        Self {
            size: 96,
            color: 97,
            mix: 98,
        }
    }
}

impl Default for DelayControllers {
    fn default() -> Self {
        Self {
            feedback: 99,
            time: 100,
            color: 101,
            mix: 102,
        }
    }
}

impl Default for ChorusControllers {
    fn default() -> Self {
        Self {
            depth: 103,
            speed: 104,
            flange: 105,
            mix: 106,
        }
    }
}

const DEFAULT_EMITTERS: [EmitterControllers; EMITTER_COUNT as usize] = [
    EmitterControllers::consecutive(20),
    EmitterControllers::consecutive(36),
    EmitterControllers::consecutive(52),
    EmitterControllers::consecutive(68),
];

/// Merge partial per-emitter tables over the default layout, by position.
fn emitter_overrides<'de, D>(
    deserializer: D,
) -> std::result::Result<[EmitterControllers; EMITTER_COUNT as usize], D::Error>
where
    D: Deserializer<'de>,
{
    let tables = Vec::<serde_json::Map<String, serde_json::Value>>::deserialize(deserializer)?;
    if tables.len() > DEFAULT_EMITTERS.len() {
        return Err(D::Error::custom(format!(
            "expected at most {} emitter tables, got {}",
            EMITTER_COUNT,
            tables.len()
        )));
    }

    let mut emitters = DEFAULT_EMITTERS;
    for (slot, overrides) in emitters.iter_mut().zip(tables) {
        let mut merged = match serde_json::to_value(*slot).map_err(D::Error::custom)? {
            serde_json::Value::Object(fields) => fields,
            _ => return Err(D::Error::custom("emitter controllers must be a table")),
        };
        for (key, value) in overrides {
            if !merged.contains_key(&key) {
                return Err(D::Error::custom(format!("unknown emitter controller '{key}'")));
            }
            merged.insert(key, value);
        }
        *slot = serde_json::from_value(serde_json::Value::Object(merged))
            .map_err(D::Error::custom)?;
    }
    Ok(emitters)
}

impl Default for ControllerMap {
    fn default() -> Self {
        Self {
            emitters: DEFAULT_EMITTERS,
            track_volumes: [84, 85, 86, 87, 88, 89, 90, 91],
            modulator_sizes: [107, 108, 109, 110, 111, 112, 113, 114, 115, 116],
            modwheel: 1,
            adsr: AdsrControllers::default(),
            reverb: ReverbControllers::default(),
            delay: DelayControllers::default(),
            chorus: ChorusControllers::default(),
            active_emitter: 117,
            place_in_cell: 118,
            remove_from_cell: 119,
        }
    }
}

impl ControllerMap {
    /// Controllers for emitter 1-4
    pub fn emitter(&self, emitter: u8) -> Result<&EmitterControllers> {
        check_range("emitter", emitter, 1, EMITTER_COUNT)?;
        Ok(&self.emitters[usize::from(emitter - 1)])
    }

    /// Volume controller for track 1-8
    pub fn track_volume(&self, track: u8) -> Result<u8> {
        check_range("track", track, 1, TRACK_COUNT)?;
        Ok(self.track_volumes[usize::from(track - 1)])
    }

    /// Size controller for modulator 1-10
    pub fn modulator_size(&self, modulator: u8) -> Result<u8> {
        check_range("modulator", modulator, 1, MODULATOR_COUNT)?;
        Ok(self.modulator_sizes[usize::from(modulator - 1)])
    }
}

/// Declares a parameter-name enum with its dotted-key spelling.
macro_rules! param_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $key:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn key(&self) -> &'static str {
                match self {
                    $($name::$variant => $key),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.key())
            }
        }

        impl FromStr for $name {
            type Err = TemperaError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($key => Ok($name::$variant),)+
                    other => Err(TemperaError::InvalidTarget(other.to_string())),
                }
            }
        }
    };
}

param_enum!(
    /// Per-emitter parameter names
    EmitterParam {
        Volume => "volume",
        GrainLengthCell => "grain_length_cell",
        GrainLengthNote => "grain_length_note",
        GrainDensity => "grain_density",
        GrainShape => "grain_shape",
        GrainShapeAttack => "grain_shape_attack",
        GrainPan => "grain_pan",
        GrainTuneSpread => "grain_tune_spread",
        Octave => "octave",
        RelativeX => "relative_x",
        RelativeY => "relative_y",
        SprayX => "spray_x",
        SprayY => "spray_y",
        ToneFilterWidth => "tone_filter_width",
        ToneFilterCenter => "tone_filter_center",
        EffectsSend => "effects_send",
    }
);

param_enum!(AdsrParam {
    Attack => "attack",
    Decay => "decay",
    Sustain => "sustain",
    Release => "release",
});

param_enum!(ReverbParam {
    Size => "size",
    Color => "color",
    Mix => "mix",
});

param_enum!(DelayParam {
    Feedback => "feedback",
    Time => "time",
    Color => "color",
    Mix => "mix",
});

param_enum!(ChorusParam {
    Depth => "depth",
    Speed => "speed",
    Flange => "flange",
    Mix => "mix",
});

impl AdsrControllers {
    pub fn controller(&self, param: AdsrParam) -> u8 {
        match param {
            AdsrParam::Attack => self.attack,
            AdsrParam::Decay => self.decay,
            AdsrParam::Sustain => self.sustain,
            AdsrParam::Release => self.release,
        }
    }
}

impl ReverbControllers {
    pub fn controller(&self, param: ReverbParam) -> u8 {
        match param {
            ReverbParam::Size => self.size,
            ReverbParam::Color => self.color,
            ReverbParam::Mix => self.mix,
        }
    }
}

impl DelayControllers {
    pub fn controller(&self, param: DelayParam) -> u8 {
        match param {
            DelayParam::Feedback => self.feedback,
            DelayParam::Time => self.time,
            DelayParam::Color => self.color,
            DelayParam::Mix => self.mix,
        }
    }
}

impl ChorusControllers {
    pub fn controller(&self, param: ChorusParam) -> u8 {
        match param {
            ChorusParam::Depth => self.depth,
            ChorusParam::Speed => self.speed,
            ChorusParam::Flange => self.flange,
            ChorusParam::Mix => self.mix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_controllers_are_unique_and_7bit() {
        let map = ControllerMap::default();
        let mut seen = HashSet::new();

        for emitter in 1..=EMITTER_COUNT {
            let ccs = map.emitter(emitter).unwrap();
            for param in EmitterParam::ALL {
                assert!(seen.insert(ccs.controller(*param)));
            }
        }
        for track in 1..=TRACK_COUNT {
            assert!(seen.insert(map.track_volume(track).unwrap()));
        }
        for modulator in 1..=MODULATOR_COUNT {
            assert!(seen.insert(map.modulator_size(modulator).unwrap()));
        }
        for cc in [map.modwheel, map.active_emitter, map.place_in_cell, map.remove_from_cell] {
            assert!(seen.insert(cc));
        }
        for param in AdsrParam::ALL {
            assert!(seen.insert(map.adsr.controller(*param)));
        }
        for param in ReverbParam::ALL {
            assert!(seen.insert(map.reverb.controller(*param)));
        }
        for param in DelayParam::ALL {
            assert!(seen.insert(map.delay.controller(*param)));
        }
        for param in ChorusParam::ALL {
            assert!(seen.insert(map.chorus.controller(*param)));
        }

        assert!(seen.iter().all(|cc| *cc < 128));
    }

    #[test]
    fn test_entity_bounds() {
        let map = ControllerMap::default();
        assert!(map.emitter(0).is_err());
        assert!(map.emitter(5).is_err());
        assert!(map.track_volume(9).is_err());
        assert!(map.modulator_size(0).is_err());
        assert!(map.modulator_size(11).is_err());
        assert_eq!(map.modulator_size(10).unwrap(), 116);
    }

    #[test]
    fn test_param_names_round_trip() {
        for param in EmitterParam::ALL {
            assert_eq!(param.key().parse::<EmitterParam>().unwrap(), *param);
        }
        assert!("loudness".parse::<EmitterParam>().is_err());
        assert_eq!("mix".parse::<ReverbParam>().unwrap(), ReverbParam::Mix);
    }

    #[test]
    fn test_partial_toml_override_keeps_defaults() {
        let map: ControllerMap = toml::from_str("modwheel = 7\nplace_in_cell = 30\n").unwrap();
        assert_eq!(map.modwheel, 7);
        assert_eq!(map.place_in_cell, 30);
        assert_eq!(map.remove_from_cell, ControllerMap::default().remove_from_cell);
        assert_eq!(map.emitters, ControllerMap::default().emitters);
    }

    #[test]
    fn test_partial_nested_override_keeps_sibling_defaults() {
        let map: ControllerMap = toml::from_str("[adsr]\nattack = 5\n\n[chorus]\nmix = 6\n").unwrap();
        let defaults = ControllerMap::default();
        assert_eq!(map.adsr.attack, 5);
        assert_eq!(map.adsr.decay, defaults.adsr.decay);
        assert_eq!(map.adsr.release, defaults.adsr.release);
        assert_eq!(map.chorus.mix, 6);
        assert_eq!(map.chorus.depth, defaults.chorus.depth);
        assert_eq!(map.reverb, defaults.reverb);
    }

    #[test]
    fn test_partial_emitter_tables_merge_by_position() {
        let map: ControllerMap =
            toml::from_str("[[emitters]]\nvolume = 5\n\n[[emitters]]\noctave = 6\n").unwrap();
        let defaults = ControllerMap::default();
        assert_eq!(map.emitters[0].volume, 5);
        assert_eq!(map.emitters[0].octave, defaults.emitters[0].octave);
        assert_eq!(map.emitters[1].octave, 6);
        assert_eq!(map.emitters[1].volume, defaults.emitters[1].volume);
        assert_eq!(map.emitters[2..], defaults.emitters[2..]);
    }

    #[test]
    fn test_bad_emitter_tables_are_rejected() {
        let five = "[[emitters]]\n".repeat(5);
        assert!(toml::from_str::<ControllerMap>(&five).is_err());
        assert!(toml::from_str::<ControllerMap>("[[emitters]]\nloudness = 5\n").is_err());
        assert!(toml::from_str::<ControllerMap>("[[emitters]]\nvolume = 300\n").is_err());
    }
}
