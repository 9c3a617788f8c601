//! Protocol codec
//!
//! Stateless builders turning semantic Tempera operations into MIDI messages.
//! Multi-parameter operations take a struct of optional fields and emit one
//! Control Change per field that is set, always in the struct's declared
//! field order. An all-`None` struct yields no messages.

use crate::controller_map::{
    AdsrControllers, ChorusControllers, ControllerMap, DelayControllers, EmitterControllers,
    ReverbControllers, TRACK_COUNT,
};
use crate::error::{check_range, Result};
use crate::midi_message::{self, MidiMessage};
use serde::{Deserialize, Serialize};

pub const GRID_COLUMNS: u8 = 8;
pub const CELLS_PER_COLUMN: u8 = 8;
pub const GRID_STEPS: u8 = GRID_COLUMNS * CELLS_PER_COLUMN;

/// Lowest note used by the track record toggles (track 1).
const RECORD_NOTE_BASE: u8 = 100;

/// One Control Change per `Some` entry, in slice order.
pub fn build_control_changes(params: &[(u8, Option<u8>)], channel: u8) -> Vec<MidiMessage> {
    params
        .iter()
        .filter_map(|(controller, value)| {
            value.map(|value| midi_message::control_change(*controller, value, channel))
        })
        .collect()
}

/// Flat 0-63 cell index for a 1-based column and cell.
pub fn cell_index(column: u8, cell: u8) -> Result<u8> {
    check_range("column", column, 1, GRID_COLUMNS)?;
    check_range("cell", cell, 1, CELLS_PER_COLUMN)?;
    Ok((column - 1) * CELLS_PER_COLUMN + (cell - 1))
}

/// Inverse of [`cell_index`]: column-major step 0-63 to `(column, cell)`.
pub fn cell_position(step: u8) -> Result<(u8, u8)> {
    check_range("step", step, 0, GRID_STEPS - 1)?;
    Ok((step / CELLS_PER_COLUMN + 1, step % CELLS_PER_COLUMN + 1))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrainParams {
    pub length_cell: Option<u8>,
    pub length_note: Option<u8>,
    pub density: Option<u8>,
    pub shape: Option<u8>,
    pub shape_attack: Option<u8>,
    pub pan: Option<u8>,
    pub tune_spread: Option<u8>,
}

impl GrainParams {
    pub fn messages(&self, ccs: &EmitterControllers, channel: u8) -> Vec<MidiMessage> {
        build_control_changes(
            &[
                (ccs.grain_length_cell, self.length_cell),
                (ccs.grain_length_note, self.length_note),
                (ccs.grain_density, self.density),
                (ccs.grain_shape, self.shape),
                (ccs.grain_shape_attack, self.shape_attack),
                (ccs.grain_pan, self.pan),
                (ccs.grain_tune_spread, self.tune_spread),
            ],
            channel,
        )
    }
}

/// X/Y pair used by relative position and spray.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XyParams {
    pub x: Option<u8>,
    pub y: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToneFilterParams {
    pub width: Option<u8>,
    pub center: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdsrParams {
    pub attack: Option<u8>,
    pub decay: Option<u8>,
    pub sustain: Option<u8>,
    pub release: Option<u8>,
}

impl AdsrParams {
    pub fn messages(&self, ccs: &AdsrControllers, channel: u8) -> Vec<MidiMessage> {
        build_control_changes(
            &[
                (ccs.attack, self.attack),
                (ccs.decay, self.decay),
                (ccs.sustain, self.sustain),
                (ccs.release, self.release),
            ],
            channel,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReverbParams {
    pub size: Option<u8>,
    pub color: Option<u8>,
    pub mix: Option<u8>,
}

impl ReverbParams {
    pub fn messages(&self, ccs: &ReverbControllers, channel: u8) -> Vec<MidiMessage> {
        build_control_changes(
            &[(ccs.size, self.size), (ccs.color, self.color), (ccs.mix, self.mix)],
            channel,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DelayParams {
    pub feedback: Option<u8>,
    pub time: Option<u8>,
    pub color: Option<u8>,
    pub mix: Option<u8>,
}

impl DelayParams {
    pub fn messages(&self, ccs: &DelayControllers, channel: u8) -> Vec<MidiMessage> {
        build_control_changes(
            &[
                (ccs.feedback, self.feedback),
                (ccs.time, self.time),
                (ccs.color, self.color),
                (ccs.mix, self.mix),
            ],
            channel,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChorusParams {
    pub depth: Option<u8>,
    pub speed: Option<u8>,
    pub flange: Option<u8>,
    pub mix: Option<u8>,
}

impl ChorusParams {
    pub fn messages(&self, ccs: &ChorusControllers, channel: u8) -> Vec<MidiMessage> {
        build_control_changes(
            &[
                (ccs.depth, self.depth),
                (ccs.speed, self.speed),
                (ccs.flange, self.flange),
                (ccs.mix, self.mix),
            ],
            channel,
        )
    }
}

/// Message builder for a single emitter on a fixed channel
#[derive(Debug, Clone, Copy)]
pub struct EmitterCodec<'a> {
    map: &'a ControllerMap,
    ccs: &'a EmitterControllers,
    emitter: u8,
    channel: u8,
}

impl<'a> EmitterCodec<'a> {
    pub fn new(map: &'a ControllerMap, emitter: u8, channel: u8) -> Result<Self> {
        let ccs = map.emitter(emitter)?;
        Ok(Self {
            map,
            ccs,
            emitter,
            channel,
        })
    }

    pub fn emitter(&self) -> u8 {
        self.emitter
    }

    pub fn volume(&self, value: u8) -> MidiMessage {
        midi_message::control_change(self.ccs.volume, value, self.channel)
    }

    pub fn grain(&self, params: &GrainParams) -> Vec<MidiMessage> {
        params.messages(self.ccs, self.channel)
    }

    pub fn octave(&self, value: u8) -> MidiMessage {
        midi_message::control_change(self.ccs.octave, value, self.channel)
    }

    /// Position of the emitter's placement inside its cell.
    pub fn relative_position(&self, params: &XyParams) -> Vec<MidiMessage> {
        build_control_changes(
            &[(self.ccs.relative_x, params.x), (self.ccs.relative_y, params.y)],
            self.channel,
        )
    }

    pub fn spray(&self, params: &XyParams) -> Vec<MidiMessage> {
        build_control_changes(
            &[(self.ccs.spray_x, params.x), (self.ccs.spray_y, params.y)],
            self.channel,
        )
    }

    pub fn tone_filter(&self, params: &ToneFilterParams) -> Vec<MidiMessage> {
        build_control_changes(
            &[
                (self.ccs.tone_filter_width, params.width),
                (self.ccs.tone_filter_center, params.center),
            ],
            self.channel,
        )
    }

    pub fn effects_send(&self, value: u8) -> MidiMessage {
        midi_message::control_change(self.ccs.effects_send, value, self.channel)
    }

    /// Select this emitter on the hardware (value is the zero-based emitter).
    pub fn set_active(&self) -> MidiMessage {
        midi_message::control_change(self.map.active_emitter, self.emitter - 1, self.channel)
    }

    pub fn place_in_cell(&self, column: u8, cell: u8) -> Result<MidiMessage> {
        let index = cell_index(column, cell)?;
        Ok(midi_message::control_change(
            self.map.place_in_cell,
            index,
            self.channel,
        ))
    }

    pub fn remove_from_cell(&self, column: u8, cell: u8) -> Result<MidiMessage> {
        let index = cell_index(column, cell)?;
        Ok(midi_message::control_change(
            self.map.remove_from_cell,
            index,
            self.channel,
        ))
    }
}

pub fn track_volume(map: &ControllerMap, track: u8, value: u8, channel: u8) -> Result<MidiMessage> {
    let controller = map.track_volume(track)?;
    Ok(midi_message::control_change(controller, value, channel))
}

/// Arm recording on a track: note `100 + (track - 1)` at full velocity.
pub fn record_on(track: u8, channel: u8) -> Result<MidiMessage> {
    check_range("track", track, 1, TRACK_COUNT)?;
    Ok(midi_message::note_on(RECORD_NOTE_BASE + track - 1, 127, channel))
}

pub fn record_off(track: u8, channel: u8) -> Result<MidiMessage> {
    check_range("track", track, 1, TRACK_COUNT)?;
    Ok(midi_message::note_off(RECORD_NOTE_BASE + track - 1, channel))
}

/// Message builder for instrument-wide controls
#[derive(Debug, Clone, Copy)]
pub struct GlobalCodec<'a> {
    map: &'a ControllerMap,
    channel: u8,
}

impl<'a> GlobalCodec<'a> {
    pub fn new(map: &'a ControllerMap, channel: u8) -> Self {
        Self { map, channel }
    }

    pub fn modwheel(&self, value: u8) -> MidiMessage {
        midi_message::control_change(self.map.modwheel, value, self.channel)
    }

    pub fn modulator_size(&self, modulator: u8, value: u8) -> Result<MidiMessage> {
        let controller = self.map.modulator_size(modulator)?;
        Ok(midi_message::control_change(controller, value, self.channel))
    }

    pub fn adsr(&self, params: &AdsrParams) -> Vec<MidiMessage> {
        params.messages(&self.map.adsr, self.channel)
    }

    pub fn reverb(&self, params: &ReverbParams) -> Vec<MidiMessage> {
        params.messages(&self.map.reverb, self.channel)
    }

    pub fn delay(&self, params: &DelayParams) -> Vec<MidiMessage> {
        params.messages(&self.map.delay, self.channel)
    }

    pub fn chorus(&self, params: &ChorusParams) -> Vec<MidiMessage> {
        params.messages(&self.map.chorus, self.channel)
    }

    /// Switch canvas with a Program Change.
    pub fn change_canvas(&self, program: u8) -> MidiMessage {
        midi_message::program_change(program, self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(controller: u8, value: u8, channel: u8) -> MidiMessage {
        midi_message::control_change(controller, value, channel)
    }

    #[test]
    fn test_grain_emits_in_declared_order() {
        let map = ControllerMap::default();
        let ccs = map.emitter(1).unwrap();
        // Supplied out of declared order; output follows field order.
        let params = GrainParams {
            shape: Some(80),
            density: Some(50),
            length_cell: Some(64),
            ..Default::default()
        };

        let msgs = params.messages(ccs, 0);
        assert_eq!(
            msgs,
            vec![
                cc(ccs.grain_length_cell, 64, 0),
                cc(ccs.grain_density, 50, 0),
                cc(ccs.grain_shape, 80, 0),
            ]
        );
    }

    #[test]
    fn test_empty_params_yield_no_messages() {
        let map = ControllerMap::default();
        let codec = EmitterCodec::new(&map, 2, 0).unwrap();
        assert!(codec.grain(&GrainParams::default()).is_empty());
        assert!(codec.spray(&XyParams::default()).is_empty());
        assert!(GlobalCodec::new(&map, 0).reverb(&ReverbParams::default()).is_empty());
    }

    #[test]
    fn test_every_subset_keeps_declared_order() {
        let map = ControllerMap::default();
        let adsr = &map.adsr;
        let order = [adsr.attack, adsr.decay, adsr.sustain, adsr.release];

        for mask in 0u8..16 {
            let pick = |bit: u8, value: u8| (mask & (1 << bit) != 0).then_some(value);
            let params = AdsrParams {
                attack: pick(0, 10),
                decay: pick(1, 20),
                sustain: pick(2, 30),
                release: pick(3, 40),
            };
            let msgs = params.messages(adsr, 0);
            assert_eq!(msgs.len(), mask.count_ones() as usize);

            let controllers: Vec<u8> = msgs
                .iter()
                .map(|m| match m {
                    MidiMessage::ControlChange { controller, .. } => *controller,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            let expected: Vec<u8> = (0..4u8)
                .filter(|bit| mask & (1 << *bit) != 0)
                .map(|bit| order[usize::from(bit)])
                .collect();
            assert_eq!(controllers, expected);
        }
    }

    #[test]
    fn test_cell_index_mapping() {
        assert_eq!(cell_index(1, 1).unwrap(), 0);
        assert_eq!(cell_index(1, 8).unwrap(), 7);
        assert_eq!(cell_index(2, 1).unwrap(), 8);
        assert_eq!(cell_index(3, 4).unwrap(), 19);
        assert_eq!(cell_index(8, 8).unwrap(), 63);
        assert!(cell_index(0, 1).is_err());
        assert!(cell_index(1, 9).is_err());
        assert_eq!(cell_position(19).unwrap(), (3, 4));
        assert!(cell_position(64).is_err());
    }

    #[test]
    fn test_place_and_remove() {
        let map = ControllerMap::default();
        let codec = EmitterCodec::new(&map, 3, 4).unwrap();
        assert_eq!(
            codec.place_in_cell(3, 4).unwrap(),
            cc(map.place_in_cell, 19, 4)
        );
        assert_eq!(
            codec.remove_from_cell(8, 8).unwrap(),
            cc(map.remove_from_cell, 63, 4)
        );
        assert!(codec.place_in_cell(9, 1).is_err());
        assert_eq!(codec.set_active(), cc(map.active_emitter, 2, 4));
    }

    #[test]
    fn test_invalid_emitter_rejected() {
        let map = ControllerMap::default();
        assert!(EmitterCodec::new(&map, 0, 0).is_err());
        assert!(EmitterCodec::new(&map, 5, 0).is_err());
    }

    #[test]
    fn test_track_messages() {
        let map = ControllerMap::default();
        assert_eq!(
            track_volume(&map, 3, 90, 0).unwrap(),
            cc(map.track_volumes[2], 90, 0)
        );
        assert_eq!(record_on(1, 0).unwrap().to_bytes(), vec![0x90, 100, 127]);
        assert_eq!(record_off(8, 0).unwrap().to_bytes(), vec![0x80, 107, 0]);
        assert!(record_on(9, 0).is_err());
    }

    #[test]
    fn test_global_messages() {
        let map = ControllerMap::default();
        let global = GlobalCodec::new(&map, 0);
        assert_eq!(global.change_canvas(3).to_bytes(), vec![0xC0, 3]);
        assert_eq!(
            global.modulator_size(2, 64).unwrap(),
            cc(map.modulator_sizes[1], 64, 0)
        );
        assert!(global.modulator_size(11, 64).is_err());

        let delay = global.delay(&DelayParams {
            mix: Some(60),
            feedback: Some(50),
            ..Default::default()
        });
        assert_eq!(
            delay,
            vec![cc(map.delay.feedback, 50, 0), cc(map.delay.mix, 60, 0)]
        );
    }
}
