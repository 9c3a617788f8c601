//! Step sequencers
//!
//! [`Sequencer`] owns the run/pause/stop loop and timing; a [`StepEngine`]
//! decides what each step places and removes on the grid. Two engines exist:
//! [`ColumnEngine`] (eight independent 8-step lanes) and [`GridEngine`]
//! (one lane over all 64 cells).
//!
//! States: Stopped -> Running <-> Paused -> Stopped. Pausing closes a gate in
//! front of the next step; the loop keeps its position and continues on
//! resume. Stopping opens the gate so a paused loop can exit.

mod column;
mod grid;

pub use column::{ColumnCommand, ColumnEngine, ColumnPattern, ColumnState};
pub use grid::{GridCommand, GridEngine, GridPattern};

use crate::error::{Result, TemperaError};
use crate::pool::EmitterPool;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const DEFAULT_STEP_DURATION: f64 = 0.5;
pub const DEFAULT_NOTE: u8 = 60;
pub const DEFAULT_VELOCITY: u8 = 127;

/// Fraction of a step the notes sound for; the rest is a gap so consecutive
/// notes on a shared channel never overlap.
const NOTE_LENGTH: f64 = 0.999;

pub type GridSequencer = Sequencer<GridEngine>;
pub type ColumnSequencer = Sequencer<ColumnEngine>;

/// Pattern logic plugged into a [`Sequencer`]
pub trait StepEngine: Send {
    /// Steps in one loop; read once at the start of `run`.
    fn total_steps(&self) -> usize;

    /// Place/remove cells for `step` and return the emitters that became
    /// active.
    fn execute_step(
        &mut self,
        step: usize,
        loop_index: usize,
        pool: &EmitterPool,
    ) -> Result<BTreeSet<u8>>;

    /// Remove every placement this engine made.
    fn cleanup(&mut self, pool: &EmitterPool) -> Result<()>;
}

/// Tempo settings; `step_duration` and `bpm` are mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerTiming {
    /// Seconds per step
    pub step_duration: Option<f64>,
    pub bpm: Option<f64>,
    pub steps_per_beat: u32,
}

impl Default for SequencerTiming {
    fn default() -> Self {
        Self {
            step_duration: None,
            bpm: None,
            steps_per_beat: 1,
        }
    }
}

impl SequencerTiming {
    pub fn from_bpm(bpm: f64, steps_per_beat: u32) -> Self {
        Self {
            bpm: Some(bpm),
            steps_per_beat,
            ..Self::default()
        }
    }

    pub fn from_step_duration(seconds: f64) -> Self {
        Self {
            step_duration: Some(seconds),
            ..Self::default()
        }
    }

    pub fn resolve(&self) -> Result<Duration> {
        match (self.step_duration, self.bpm) {
            (Some(_), Some(_)) => Err(TemperaError::ConflictingTiming),
            (None, Some(bpm)) => bpm_to_step_duration(bpm, self.steps_per_beat),
            (Some(seconds), None) => step_duration(seconds),
            (None, None) => step_duration(DEFAULT_STEP_DURATION),
        }
    }
}

fn step_duration(seconds: f64) -> Result<Duration> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(TemperaError::InvalidTiming(format!(
            "step duration must be positive, got {seconds}"
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn bpm_to_step_duration(bpm: f64, steps_per_beat: u32) -> Result<Duration> {
    if !(bpm.is_finite() && bpm > 0.0) {
        return Err(TemperaError::InvalidTiming(format!(
            "bpm must be positive, got {bpm}"
        )));
    }
    if steps_per_beat == 0 {
        return Err(TemperaError::InvalidTiming(
            "steps_per_beat must be at least 1".to_string(),
        ));
    }
    step_duration(60.0 / bpm / f64::from(steps_per_beat))
}

/// Transport snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencerState {
    pub running: bool,
    pub paused: bool,
    pub current_step: usize,
    pub loop_count: usize,
    /// 0 = loop forever
    pub target_loops: usize,
    pub step_duration: Duration,
}

/// Run loop and transport around a [`StepEngine`]
pub struct Sequencer<E: StepEngine> {
    pool: Arc<EmitterPool>,
    engine: Mutex<E>,
    state: Mutex<SequencerState>,
    /// `true` while steps may proceed
    gate: watch::Sender<bool>,
    note: u8,
    velocity: u8,
}

impl<E: StepEngine> Sequencer<E> {
    pub fn new(pool: Arc<EmitterPool>, engine: E, timing: SequencerTiming) -> Result<Self> {
        let step_duration = timing.resolve()?;
        let (gate, _) = watch::channel(true);

        Ok(Self {
            pool,
            engine: Mutex::new(engine),
            state: Mutex::new(SequencerState {
                running: false,
                paused: false,
                current_step: 0,
                loop_count: 0,
                target_loops: 0,
                step_duration,
            }),
            gate,
            note: DEFAULT_NOTE,
            velocity: DEFAULT_VELOCITY,
        })
    }

    /// Note and velocity sounded on each active step
    pub fn with_note(mut self, note: u8, velocity: u8) -> Self {
        self.note = note;
        self.velocity = velocity;
        self
    }

    pub fn pool(&self) -> &Arc<EmitterPool> {
        &self.pool
    }

    fn engine(&self) -> MutexGuard<'_, E> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SequencerState {
        self.lock_state().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    pub fn step_duration(&self) -> Duration {
        self.lock_state().step_duration
    }

    pub fn total_steps(&self) -> usize {
        self.engine().total_steps()
    }

    pub fn set_step_duration(&self, seconds: f64) -> Result<()> {
        let duration = step_duration(seconds)?;
        self.lock_state().step_duration = duration;
        Ok(())
    }

    pub fn set_bpm(&self, bpm: f64, steps_per_beat: u32) -> Result<()> {
        let duration = bpm_to_step_duration(bpm, steps_per_beat)?;
        self.lock_state().step_duration = duration;
        Ok(())
    }

    /// Change the loop target; takes effect at the next wrap.
    pub fn set_loops(&self, loops: usize) {
        self.lock_state().target_loops = loops;
    }

    pub fn pause(&self) {
        self.lock_state().paused = true;
        self.gate.send_replace(false);
        debug!("Sequencer paused");
    }

    pub fn resume(&self) {
        self.lock_state().paused = false;
        self.gate.send_replace(true);
        debug!("Sequencer resumed");
    }

    /// Stop after the current step; also releases a paused loop.
    pub fn stop(&self) {
        {
            let mut state = self.lock_state();
            state.running = false;
            state.paused = false;
        }
        self.gate.send_replace(true);
    }

    pub fn cleanup(&self) -> Result<()> {
        self.engine().cleanup(&self.pool)
    }

    /// Run for `loops` loops (0 = until stopped).
    pub async fn run(&self, loops: usize) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.running = true;
            state.target_loops = loops;
            state.loop_count = 0;
            state.current_step = 0;
        }
        // Ends the run even when this future is dropped mid-step.
        let _running = RunningGuard(self);
        let total_steps = self.total_steps();
        info!("Sequencer running: {} steps, loops={}", total_steps, loops);

        let result = self.step_loop(total_steps).await;

        match &result {
            Ok(()) => info!("Sequencer finished"),
            Err(e) => error!("Sequencer stopped on error: {}", e),
        }
        result
    }

    async fn step_loop(&self, total_steps: usize) -> Result<()> {
        let mut gate = self.gate.subscribe();

        loop {
            if gate.wait_for(|open| *open).await.is_err() {
                return Ok(());
            }

            let (step, loop_index, step_duration) = {
                let state = self.lock_state();
                if !state.running {
                    return Ok(());
                }
                (state.current_step, state.loop_count, state.step_duration)
            };

            let active = self.engine().execute_step(step, loop_index, &self.pool)?;

            if active.is_empty() {
                tokio::time::sleep(step_duration).await;
            } else {
                let emitters: Vec<u8> = active.into_iter().collect();
                self.pool
                    .play_all(
                        &emitters,
                        self.note,
                        self.velocity,
                        step_duration.mul_f64(NOTE_LENGTH),
                    )
                    .await?;
                tokio::time::sleep(step_duration.mul_f64(1.0 - NOTE_LENGTH)).await;
            }

            let mut state = self.lock_state();
            state.current_step += 1;
            if state.current_step >= total_steps {
                state.current_step = 0;
                state.loop_count += 1;

                if state.target_loops > 0 && state.loop_count >= state.target_loops {
                    state.running = false;
                    return Ok(());
                }
            }
        }
    }

    /// Wait for a spawned run. An aborted run counts as a clean stop; the
    /// run has already reset its state by the time it is cancelled.
    pub async fn join(&self, handle: JoinHandle<Result<()>>) -> Result<()> {
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                self.stop();
                Ok(())
            }
            Err(e) => {
                self.stop();
                Err(TemperaError::Midi(format!("sequencer task failed: {e}")))
            }
        }
    }
}

/// Stops the sequencer when a run ends, however it ends
struct RunningGuard<'a, E: StepEngine>(&'a Sequencer<E>);

impl<E: StepEngine> Drop for RunningGuard<'_, E> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

impl<E: StepEngine + 'static> Sequencer<E> {
    /// Run on a separate task.
    pub fn spawn(self: &Arc<Self>, loops: usize) -> JoinHandle<Result<()>> {
        let sequencer = Arc::clone(self);
        tokio::spawn(async move { sequencer.run(loops).await })
    }
}
