//! Envelope automation
//!
//! An [`AutomationClock`] ticks at about 60 Hz over an 8-beat cycle. Each
//! [`Automation`] lane pairs an [`Envelope`] with a [`ControlTarget`] and a
//! base value; on every tick the modulated value is sent through the pool
//! when it differs from the last one sent.

mod clock;
mod envelope;
mod lanes;
mod target;

pub use clock::{
    AutomationClock, TickCallback, BEATS_PER_CYCLE, DEFAULT_BPM, DEFAULT_TICK, MAX_BPM, MIN_BPM,
};
pub use envelope::{Envelope, EnvelopePoint, EnvelopePreset};
pub use lanes::{Automation, AutomationLane};
pub use target::ControlTarget;
