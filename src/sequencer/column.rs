//! Eight independent 8-step lanes, one per grid column

use super::{Sequencer, StepEngine};
use crate::codec::{CELLS_PER_COLUMN, GRID_COLUMNS};
use crate::command::{numeric_keys, parse_tagged};
use crate::controller_map::EMITTER_COUNT;
use crate::error::{check_range, Result};
use crate::pool::EmitterPool;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Cell (1-8) -> emitter (1-4)
pub type ColumnPattern = BTreeMap<u8, u8>;

#[derive(Debug, Clone, Default)]
struct Lane {
    pattern: ColumnPattern,
    muted: bool,
    /// Indexed by loop number modulo length; `true` plays
    mute_pattern: Vec<bool>,
    placed: BTreeMap<u8, u8>,
}

impl Lane {
    fn muted_in_loop(&self, loop_index: usize) -> bool {
        if self.muted {
            return true;
        }
        if self.mute_pattern.is_empty() {
            return false;
        }
        !self.mute_pattern[loop_index % self.mute_pattern.len()]
    }
}

/// Snapshot of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnState {
    pub column: u8,
    pub pattern: ColumnPattern,
    pub muted: bool,
    pub mute_pattern: Vec<bool>,
}

#[derive(Debug, Default)]
pub struct ColumnEngine {
    lanes: [Lane; GRID_COLUMNS as usize],
}

fn lane_index(column: u8) -> Result<usize> {
    check_range("column", column, 1, GRID_COLUMNS)?;
    Ok(usize::from(column - 1))
}

impl ColumnEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a column's pattern, removing cells the new one drops.
    pub fn set_column_pattern(
        &mut self,
        column: u8,
        pattern: ColumnPattern,
        pool: &EmitterPool,
    ) -> Result<()> {
        let index = lane_index(column)?;
        for (&cell, &emitter) in &pattern {
            check_range("cell", cell, 1, CELLS_PER_COLUMN)?;
            check_range("emitter", emitter, 1, EMITTER_COUNT)?;
        }

        let lane = &mut self.lanes[index];
        for (&cell, &emitter) in &lane.pattern {
            if !pattern.contains_key(&cell) {
                pool.remove_from_cell(emitter, column, cell)?;
            }
        }

        debug!("Column {} pattern set: {} cells", column, pattern.len());
        lane.pattern = pattern;
        Ok(())
    }

    pub fn clear_column(&mut self, column: u8, pool: &EmitterPool) -> Result<()> {
        self.set_column_pattern(column, ColumnPattern::new(), pool)
    }

    pub fn mute_column(&mut self, column: u8) -> Result<()> {
        self.lanes[lane_index(column)?].muted = true;
        Ok(())
    }

    pub fn unmute_column(&mut self, column: u8) -> Result<()> {
        self.lanes[lane_index(column)?].muted = false;
        Ok(())
    }

    /// Which loops the column plays; an empty pattern plays every loop.
    pub fn set_mute_pattern(&mut self, column: u8, pattern: Vec<bool>) -> Result<()> {
        self.lanes[lane_index(column)?].mute_pattern = pattern;
        Ok(())
    }

    pub fn is_muted(&self, column: u8, loop_index: usize) -> Result<bool> {
        Ok(self.lanes[lane_index(column)?].muted_in_loop(loop_index))
    }

    pub fn column_state(&self, column: u8) -> Result<ColumnState> {
        let lane = &self.lanes[lane_index(column)?];
        Ok(ColumnState {
            column,
            pattern: lane.pattern.clone(),
            muted: lane.muted,
            mute_pattern: lane.mute_pattern.clone(),
        })
    }

    pub fn columns(&self) -> Vec<ColumnState> {
        (1..=GRID_COLUMNS)
            .filter_map(|column| self.column_state(column).ok())
            .collect()
    }
}

impl StepEngine for ColumnEngine {
    fn total_steps(&self) -> usize {
        usize::from(CELLS_PER_COLUMN)
    }

    fn execute_step(
        &mut self,
        step: usize,
        loop_index: usize,
        pool: &EmitterPool,
    ) -> Result<BTreeSet<u8>> {
        let mut active = BTreeSet::new();
        let Some(cell) = u8::try_from(step + 1)
            .ok()
            .filter(|cell| *cell <= CELLS_PER_COLUMN)
        else {
            return Ok(active);
        };

        for (column, lane) in (1..=GRID_COLUMNS).zip(self.lanes.iter_mut()) {
            if lane.muted_in_loop(loop_index) {
                if let Some(emitter) = lane.placed.remove(&cell) {
                    pool.remove_from_cell(emitter, column, cell)?;
                }
                continue;
            }

            if let Some(&emitter) = lane.pattern.get(&cell) {
                pool.place_in_cell(emitter, column, cell)?;
                lane.placed.insert(cell, emitter);
                active.insert(emitter);
            } else if let Some(emitter) = lane.placed.remove(&cell) {
                pool.remove_from_cell(emitter, column, cell)?;
            }
        }

        Ok(active)
    }

    fn cleanup(&mut self, pool: &EmitterPool) -> Result<()> {
        for (column, lane) in (1..=GRID_COLUMNS).zip(self.lanes.iter_mut()) {
            for (cell, emitter) in std::mem::take(&mut lane.placed) {
                pool.remove_from_cell(emitter, column, cell)?;
            }
        }
        Ok(())
    }
}

/// Commands accepted by a column sequencer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ColumnCommand {
    SetColumnPattern {
        column: u8,
        #[serde(deserialize_with = "numeric_keys")]
        pattern: ColumnPattern,
    },
    ClearColumn {
        column: u8,
    },
    Cleanup,
    MuteColumn {
        column: u8,
    },
    UnmuteColumn {
        column: u8,
    },
    SetMutePattern {
        column: u8,
        #[serde(deserialize_with = "play_flags")]
        pattern: Vec<bool>,
    },
    SetLoops {
        loops: usize,
    },
    Pause,
    Resume,
    Stop,
}

impl ColumnCommand {
    pub const ACTIONS: &'static [&'static str] = &[
        "set_column_pattern",
        "clear_column",
        "cleanup",
        "mute_column",
        "unmute_column",
        "set_mute_pattern",
        "set_loops",
        "pause",
        "resume",
        "stop",
    ];
}

/// Mute patterns arrive as booleans or as 0/1.
fn play_flags<'de, D>(deserializer: D) -> std::result::Result<Vec<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(Vec::<Flag>::deserialize(deserializer)?
        .into_iter()
        .map(|flag| match flag {
            Flag::Bool(play) => play,
            Flag::Int(n) => n != 0,
        })
        .collect())
}

impl Sequencer<ColumnEngine> {
    pub fn set_column_pattern(&self, column: u8, pattern: ColumnPattern) -> Result<()> {
        self.engine().set_column_pattern(column, pattern, &self.pool)
    }

    pub fn clear_column(&self, column: u8) -> Result<()> {
        self.engine().clear_column(column, &self.pool)
    }

    pub fn mute_column(&self, column: u8) -> Result<()> {
        self.engine().mute_column(column)
    }

    pub fn unmute_column(&self, column: u8) -> Result<()> {
        self.engine().unmute_column(column)
    }

    pub fn set_mute_pattern(&self, column: u8, pattern: Vec<bool>) -> Result<()> {
        self.engine().set_mute_pattern(column, pattern)
    }

    pub fn column_state(&self, column: u8) -> Result<ColumnState> {
        self.engine().column_state(column)
    }

    pub fn columns(&self) -> Vec<ColumnState> {
        self.engine().columns()
    }

    pub fn dispatch(&self, command: ColumnCommand) -> Result<()> {
        match command {
            ColumnCommand::SetColumnPattern { column, pattern } => {
                self.set_column_pattern(column, pattern)?
            }
            ColumnCommand::ClearColumn { column } => self.clear_column(column)?,
            ColumnCommand::Cleanup => self.cleanup()?,
            ColumnCommand::MuteColumn { column } => self.mute_column(column)?,
            ColumnCommand::UnmuteColumn { column } => self.unmute_column(column)?,
            ColumnCommand::SetMutePattern { column, pattern } => {
                self.set_mute_pattern(column, pattern)?
            }
            ColumnCommand::SetLoops { loops } => self.set_loops(loops),
            ColumnCommand::Pause => self.pause(),
            ColumnCommand::Resume => self.resume(),
            ColumnCommand::Stop => self.stop(),
        }
        Ok(())
    }

    /// Dispatch an `{"action": ..., ...}` object.
    pub fn dispatch_json(&self, value: serde_json::Value) -> Result<()> {
        let command = parse_tagged(value, "action", ColumnCommand::ACTIONS)?;
        self.dispatch(command)
    }
}
