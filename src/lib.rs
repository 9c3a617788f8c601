//! # Tempera Remote - MIDI control for the Tempera granular sampler
//!
//! Tempera Remote drives a Tempera over MIDI: it places emitters in grid
//! cells, sets emitter, track and effect parameters, sequences placements
//! over the 8x8 grid and modulates controls with looping envelopes.
//!
//! ## Core Features
//!
//! - **Protocol Codec**: pure builders for every emitter, track and global message
//! - **Emitter Pool**: one ordered queue to the hardware, shared by everything
//! - **Column Sequencer**: 8 independent 8-step lanes with mute patterns
//! - **Grid Sequencer**: one 64-step lane over the whole grid
//! - **Envelope Automation**: a 60 Hz clock scaling controls over an 8-beat cycle
//!
//! ## Quick Start
//!
//! ### Sequencing the grid
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tempera::pool::{EmitterPool, PoolConfig};
//! use tempera::sequencer::{GridEngine, GridSequencer, SequencerTiming};
//!
//! # async fn demo() -> tempera::Result<()> {
//! let pool = Arc::new(EmitterPool::new(PoolConfig::default()));
//! pool.start_on_port("Tempera")?;
//!
//! let sequencer = GridSequencer::new(
//!     pool.clone(),
//!     GridEngine::new(),
//!     SequencerTiming::from_bpm(120.0, 2),
//! )?;
//! sequencer.set_pattern([(0, 1), (9, 2), (18, 3), (27, 4)].into_iter().collect())?;
//! sequencer.run(4).await?;
//! sequencer.cleanup()?;
//! pool.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Automating a control
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tempera::automation::{Automation, Envelope, EnvelopePreset};
//! use tempera::pool::{EmitterPool, PoolConfig};
//!
//! # async fn demo() -> tempera::Result<()> {
//! let pool = Arc::new(EmitterPool::new(PoolConfig::default()));
//! pool.start_on_port("Tempera")?;
//!
//! let automation = Automation::new(pool.clone(), 120.0, Duration::from_millis(16));
//! automation.set_lane(
//!     "emitter.1.volume".parse()?,
//!     Envelope::from_preset(EnvelopePreset::Triangle, false),
//!     110,
//! );
//! automation.start();
//! tokio::time::sleep(Duration::from_secs(8)).await;
//! automation.stop().await;
//! pool.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`midi_message`] / [`codec`] / [`controller_map`]: wire messages and builders
//! - [`pool`]: the dispatcher
//! - [`sequencer`]: step sequencers
//! - [`automation`]: envelopes, clock and lanes
//! - [`midi_output`]: midir and in-memory transports
//! - [`config`]: TOML configuration

pub mod automation;
pub mod codec;
mod command;
pub mod config;
pub mod controller_map;
pub mod error;
pub mod midi_message;
pub mod midi_output;
pub mod pool;
pub mod sequencer;

pub use error::{Result, TemperaError};
