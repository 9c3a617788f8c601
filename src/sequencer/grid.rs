//! Single-lane sequencer over all 64 cells

use super::{Sequencer, StepEngine};
use crate::codec::{cell_position, GRID_COLUMNS};
use crate::command::{numeric_keys, parse_tagged};
use crate::controller_map::EMITTER_COUNT;
use crate::error::{check_range, Result};
use crate::pool::EmitterPool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Step (0-63, column-major) -> emitter (1-4)
pub type GridPattern = BTreeMap<u8, u8>;

#[derive(Debug, Default)]
pub struct GridEngine {
    pattern: GridPattern,
    /// Cells this engine has placed and not yet removed
    placed: BTreeMap<u8, u8>,
}

impl GridEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern(pattern: GridPattern) -> Result<Self> {
        validate(&pattern)?;
        Ok(Self {
            pattern,
            placed: BTreeMap::new(),
        })
    }

    pub fn pattern(&self) -> &GridPattern {
        &self.pattern
    }

    /// Replace the pattern, removing placements the new one drops.
    pub fn set_pattern(&mut self, pattern: GridPattern, pool: &EmitterPool) -> Result<()> {
        validate(&pattern)?;

        for (&step, &emitter) in &self.pattern {
            if !pattern.contains_key(&step) {
                let (column, cell) = cell_position(step)?;
                pool.remove_from_cell(emitter, column, cell)?;
            }
        }

        debug!("Grid pattern set: {} steps", pattern.len());
        self.pattern = pattern;
        Ok(())
    }

    pub fn clear(&mut self, pool: &EmitterPool) -> Result<()> {
        self.set_pattern(GridPattern::new(), pool)
    }
}

fn validate(pattern: &GridPattern) -> Result<()> {
    for (&step, &emitter) in pattern {
        cell_position(step)?;
        check_range("emitter", emitter, 1, EMITTER_COUNT)?;
    }
    Ok(())
}

impl StepEngine for GridEngine {
    fn total_steps(&self) -> usize {
        match self.pattern.keys().next_back() {
            Some(&last) => usize::from(last) + 1,
            None => usize::from(GRID_COLUMNS),
        }
    }

    fn execute_step(
        &mut self,
        step: usize,
        _loop_index: usize,
        pool: &EmitterPool,
    ) -> Result<BTreeSet<u8>> {
        let mut active = BTreeSet::new();
        let Ok(step) = u8::try_from(step) else {
            return Ok(active);
        };
        let (column, cell) = cell_position(step)?;

        if let Some(&emitter) = self.pattern.get(&step) {
            pool.place_in_cell(emitter, column, cell)?;
            self.placed.insert(step, emitter);
            active.insert(emitter);
        } else if let Some(emitter) = self.placed.remove(&step) {
            pool.remove_from_cell(emitter, column, cell)?;
        }

        Ok(active)
    }

    fn cleanup(&mut self, pool: &EmitterPool) -> Result<()> {
        for (step, emitter) in std::mem::take(&mut self.placed) {
            let (column, cell) = cell_position(step)?;
            pool.remove_from_cell(emitter, column, cell)?;
        }
        Ok(())
    }
}

/// Commands accepted by a grid sequencer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GridCommand {
    SetPattern {
        #[serde(deserialize_with = "numeric_keys")]
        pattern: GridPattern,
    },
    Clear,
    Cleanup,
    SetLoops { loops: usize },
    Pause,
    Resume,
    Stop,
}

impl GridCommand {
    pub const ACTIONS: &'static [&'static str] = &[
        "set_pattern",
        "clear",
        "cleanup",
        "set_loops",
        "pause",
        "resume",
        "stop",
    ];
}

impl Sequencer<GridEngine> {
    pub fn set_pattern(&self, pattern: GridPattern) -> Result<()> {
        self.engine().set_pattern(pattern, &self.pool)
    }

    pub fn clear(&self) -> Result<()> {
        self.engine().clear(&self.pool)
    }

    pub fn pattern(&self) -> GridPattern {
        self.engine().pattern().clone()
    }

    pub fn dispatch(&self, command: GridCommand) -> Result<()> {
        match command {
            GridCommand::SetPattern { pattern } => self.set_pattern(pattern)?,
            GridCommand::Clear => self.clear()?,
            GridCommand::Cleanup => self.cleanup()?,
            GridCommand::SetLoops { loops } => self.set_loops(loops),
            GridCommand::Pause => self.pause(),
            GridCommand::Resume => self.resume(),
            GridCommand::Stop => self.stop(),
        }
        Ok(())
    }

    /// Dispatch an `{"action": ..., ...}` object.
    pub fn dispatch_json(&self, value: serde_json::Value) -> Result<()> {
        let command = parse_tagged(value, "action", GridCommand::ACTIONS)?;
        self.dispatch(command)
    }
}
