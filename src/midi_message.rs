//! MIDI wire messages
//!
//! The handful of messages the Tempera understands, and their exact byte
//! encoding. Channels are masked to 4 bits and data bytes to 7 bits on
//! encode; out-of-range input truncates instead of failing.

use std::fmt;

pub const STATUS_NOTE_OFF: u8 = 0x80;
pub const STATUS_NOTE_ON: u8 = 0x90;
pub const STATUS_CONTROL_CHANGE: u8 = 0xB0;
pub const STATUS_PROGRAM_CHANGE: u8 = 0xC0;
pub const MIDI_CLOCK: u8 = 0xF8;
pub const MIDI_START: u8 = 0xFA;
pub const MIDI_STOP: u8 = 0xFC;

/// MIDI message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    Clock,
    Start,
    Stop,
}

impl MidiMessage {
    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![
                STATUS_CONTROL_CHANGE | (channel & 0x0F),
                controller & 0x7F,
                value & 0x7F,
            ],
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![
                STATUS_NOTE_ON | (channel & 0x0F),
                note & 0x7F,
                velocity & 0x7F,
            ],
            MidiMessage::NoteOff { channel, note } => {
                vec![STATUS_NOTE_OFF | (channel & 0x0F), note & 0x7F, 0]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![STATUS_PROGRAM_CHANGE | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::Clock => vec![MIDI_CLOCK],
            MidiMessage::Start => vec![MIDI_START],
            MidiMessage::Stop => vec![MIDI_STOP],
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Control Change on a zero-based channel.
pub fn control_change(controller: u8, value: u8, channel: u8) -> MidiMessage {
    MidiMessage::ControlChange {
        channel,
        controller,
        value,
    }
}

pub fn note_on(note: u8, velocity: u8, channel: u8) -> MidiMessage {
    MidiMessage::NoteOn {
        channel,
        note,
        velocity,
    }
}

pub fn note_off(note: u8, channel: u8) -> MidiMessage {
    MidiMessage::NoteOff { channel, note }
}

pub fn program_change(program: u8, channel: u8) -> MidiMessage {
    MidiMessage::ProgramChange { channel, program }
}

pub fn clock() -> MidiMessage {
    MidiMessage::Clock
}

pub fn start() -> MidiMessage {
    MidiMessage::Start
}

pub fn stop() -> MidiMessage {
    MidiMessage::Stop
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bytes() {
        assert_eq!(control_change(40, 100, 0).to_bytes(), vec![0xB0, 40, 100]);
        assert_eq!(note_on(60, 127, 3).to_bytes(), vec![0x93, 60, 127]);
        assert_eq!(note_off(60, 3).to_bytes(), vec![0x83, 60, 0]);
        assert_eq!(program_change(5, 0).to_bytes(), vec![0xC0, 5]);
        assert_eq!(clock().to_bytes(), vec![0xF8]);
        assert_eq!(start().to_bytes(), vec![0xFA]);
        assert_eq!(stop().to_bytes(), vec![0xFC]);
    }

    #[test]
    fn test_value_masking_truncates() {
        assert_eq!(
            control_change(40, 200, 0).to_bytes(),
            control_change(40, 200 & 0x7F, 0).to_bytes()
        );
        assert_eq!(
            note_on(200, 255, 0).to_bytes(),
            note_on(200 & 0x7F, 255 & 0x7F, 0).to_bytes()
        );
        assert_eq!(
            program_change(130, 0).to_bytes(),
            program_change(130 & 0x7F, 0).to_bytes()
        );
    }

    #[test]
    fn test_channel_masking_truncates() {
        assert_eq!(
            control_change(1, 1, 20).to_bytes(),
            control_change(1, 1, 20 & 0x0F).to_bytes()
        );
        assert_eq!(note_off(60, 20).to_bytes()[0], 0x84);
    }

    #[test]
    fn test_display_hex() {
        assert_eq!(control_change(0x10, 0x7F, 1).to_string(), "B1 10 7F");
        assert_eq!(clock().to_string(), "F8");
    }
}
