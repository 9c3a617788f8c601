//! Envelope lanes driving controls through the pool

use super::clock::{AutomationClock, TickCallback};
use super::envelope::Envelope;
use super::target::ControlTarget;
use crate::error::Result;
use crate::pool::EmitterPool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Envelope plus the unmodulated control value it scales
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLane {
    pub envelope: Envelope,
    pub base: u8,
}

#[derive(Default)]
struct LaneTable {
    lanes: BTreeMap<ControlTarget, AutomationLane>,
    /// Last value sent per target since automation (re)started
    last_sent: HashMap<ControlTarget, u8>,
}

impl LaneTable {
    /// Changed values for every enabled lane, memoized as sent.
    fn changes_at(&mut self, position: f64) -> Vec<(ControlTarget, u8)> {
        let mut changes = Vec::new();
        for (target, lane) in &self.lanes {
            if !lane.envelope.enabled {
                continue;
            }
            let value = lane.envelope.apply(lane.base, position);
            if self.last_sent.get(target) != Some(&value) {
                self.last_sent.insert(*target, value);
                changes.push((*target, value));
            }
        }
        changes
    }
}

/// Automation clock wired to a set of envelope lanes
pub struct Automation {
    pool: Arc<EmitterPool>,
    clock: AutomationClock,
    table: Arc<Mutex<LaneTable>>,
}

fn lock(table: &Mutex<LaneTable>) -> MutexGuard<'_, LaneTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send_changes(pool: &EmitterPool, table: &Mutex<LaneTable>, position: f64) -> usize {
    let changes = lock(table).changes_at(position);
    for (target, value) in &changes {
        if let Err(e) = pool.set_control(target, *value) {
            warn!("Automation send to {} failed: {}", target, e);
        }
    }
    changes.len()
}

impl Automation {
    pub fn new(pool: Arc<EmitterPool>, bpm: f64, tick_interval: Duration) -> Self {
        let clock = AutomationClock::new(bpm, tick_interval);
        let table = Arc::new(Mutex::new(LaneTable::default()));

        let callback: TickCallback = {
            let pool = Arc::clone(&pool);
            let table = Arc::clone(&table);
            Arc::new(move |position| {
                send_changes(&pool, &table, position);
            })
        };
        clock.set_tick_callback(Some(callback));

        Self { pool, clock, table }
    }

    pub fn clock(&self) -> &AutomationClock {
        &self.clock
    }

    pub fn set_lane(&self, target: ControlTarget, envelope: Envelope, base: u8) {
        let mut table = lock(&self.table);
        table.lanes.insert(target, AutomationLane { envelope, base });
        table.last_sent.remove(&target);
    }

    /// Update the unmodulated value of an existing lane.
    pub fn set_base(&self, target: &ControlTarget, base: u8) -> bool {
        match lock(&self.table).lanes.get_mut(target) {
            Some(lane) => {
                lane.base = base;
                true
            }
            None => false,
        }
    }

    pub fn set_enabled(&self, target: &ControlTarget, enabled: bool) -> bool {
        match lock(&self.table).lanes.get_mut(target) {
            Some(lane) => {
                lane.envelope.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn remove_lane(&self, target: &ControlTarget) -> Option<AutomationLane> {
        let mut table = lock(&self.table);
        table.last_sent.remove(target);
        table.lanes.remove(target)
    }

    pub fn lanes(&self) -> BTreeMap<ControlTarget, AutomationLane> {
        lock(&self.table).lanes.clone()
    }

    /// Evaluate every lane at `position` now; returns how many controls were sent.
    pub fn tick(&self, position: f64) -> usize {
        send_changes(&self.pool, &self.table, position)
    }

    pub fn start(&self) {
        lock(&self.table).last_sent.clear();
        self.clock.start();
        debug!("Automation started with {} lanes", lock(&self.table).lanes.len());
    }

    pub async fn stop(&self) {
        self.clock.stop().await;
        lock(&self.table).last_sent.clear();
    }

    /// Send every lane's base value unmodulated.
    pub fn restore_bases(&self) -> Result<()> {
        let lanes = self.lanes();
        for (target, lane) in &lanes {
            self.pool.set_control(target, lane.base)?;
        }
        Ok(())
    }
}
