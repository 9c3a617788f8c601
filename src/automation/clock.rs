//! Free-running automation clock
//!
//! Tracks a normalized position over an 8-beat cycle and ticks at a fixed
//! rate, independent of any sequencer step timing.

use super::envelope::Envelope;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 300.0;
pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);
pub const BEATS_PER_CYCLE: f64 = 8.0;

/// Called with the position on every tick
pub type TickCallback = Arc<dyn Fn(f64) + Send + Sync>;

struct ClockState {
    bpm: f64,
    started_at: Instant,
    callback: Option<TickCallback>,
}

struct Shared {
    state: Mutex<ClockState>,
    position: watch::Sender<f64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) {
        let (position, callback) = {
            let state = self.lock();
            let cycle = cycle_duration(state.bpm).as_secs_f64();
            let elapsed = state.started_at.elapsed().as_secs_f64();
            ((elapsed % cycle) / cycle, state.callback.clone())
        };

        self.position.send_replace(position);
        if let Some(callback) = callback {
            callback(position);
        }
    }
}

fn cycle_duration(bpm: f64) -> Duration {
    Duration::from_secs_f64(BEATS_PER_CYCLE * 60.0 / bpm)
}

pub struct AutomationClock {
    shared: Arc<Shared>,
    tick_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for AutomationClock {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, DEFAULT_TICK)
    }
}

impl AutomationClock {
    pub fn new(bpm: f64, tick_interval: Duration) -> Self {
        let (position, _) = watch::channel(0.0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ClockState {
                    bpm: clamp_bpm(bpm),
                    started_at: Instant::now(),
                    callback: None,
                }),
                position,
            }),
            tick_interval: tick_interval.max(Duration::from_millis(1)),
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bpm(&self) -> f64 {
        self.shared.lock().bpm
    }

    /// Set the tempo, clamped to 20-300.
    pub fn set_bpm(&self, bpm: f64) {
        self.shared.lock().bpm = clamp_bpm(bpm);
    }

    pub fn cycle_duration(&self) -> Duration {
        cycle_duration(self.bpm())
    }

    pub fn set_tick_callback(&self, callback: Option<TickCallback>) {
        self.shared.lock().callback = callback;
    }

    pub fn position(&self) -> f64 {
        *self.shared.position.borrow()
    }

    /// Receiver that sees every published position, including resets.
    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.shared.position.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start ticking from position 0. No-op if already running.
    pub fn start(&self) {
        let mut task = self.task();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        self.shared.lock().started_at = Instant::now();
        self.shared.position.send_replace(0.0);

        let shared = Arc::clone(&self.shared);
        let period = self.tick_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                shared.tick();
            }
        }));
        debug!("Automation clock started at {} bpm", self.bpm());
    }

    /// Stop ticking and publish position 0.
    pub async fn stop(&self) {
        let handle = self.task().take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancellation is the expected outcome
            let _ = handle.await;
            debug!("Automation clock stopped");
        }
        self.shared.position.send_replace(0.0);
    }

    /// Restart the cycle without stopping.
    pub fn reset(&self) {
        self.shared.lock().started_at = Instant::now();
        self.shared.position.send_replace(0.0);
    }

    /// `base` scaled by `envelope` at the current position
    pub fn apply(&self, base: u8, envelope: &Envelope) -> u8 {
        envelope.apply(base, self.position())
    }
}

impl Drop for AutomationClock {
    fn drop(&mut self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
    }
}

fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return DEFAULT_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_bpm_is_clamped() {
        let clock = AutomationClock::new(5.0, DEFAULT_TICK);
        assert_eq!(clock.bpm(), MIN_BPM);
        clock.set_bpm(1000.0);
        assert_eq!(clock.bpm(), MAX_BPM);
        clock.set_bpm(f64::NAN);
        assert_eq!(clock.bpm(), DEFAULT_BPM);
        assert_eq!(clock.cycle_duration(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_follows_elapsed_time() {
        let clock = AutomationClock::default();
        clock.start();

        // 120 bpm: one cycle is 4 s.
        tokio::time::sleep(Duration::from_millis(1005)).await;
        let position = clock.position();
        assert!((0.24..=0.26).contains(&position), "position {position}");

        tokio::time::sleep(Duration::from_secs(4)).await;
        let wrapped = clock.position();
        assert!((0.24..=0.27).contains(&wrapped), "position {wrapped}");

        clock.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_runs_every_tick() {
        let clock = AutomationClock::default();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        clock.set_tick_callback(Some(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        clock.start();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        clock.stop().await;

        let count = ticks.load(Ordering::SeqCst);
        assert!((60..=64).contains(&count), "ticks {count}");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_and_notifies() {
        let clock = AutomationClock::default();
        let mut positions = clock.subscribe();

        clock.start();
        assert!(clock.is_running());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(clock.position() > 0.0);

        positions.borrow_and_update();
        clock.stop().await;
        assert!(positions.has_changed().unwrap());
        assert_eq!(*positions.borrow_and_update(), 0.0);
        assert_eq!(clock.position(), 0.0);
        assert!(!clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_reset_restarts_cycle() {
        let clock = AutomationClock::default();
        clock.start();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        clock.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(clock.position() > 0.45);

        clock.reset();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(clock.position() < 0.02);

        clock.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_uses_current_position() {
        let clock = AutomationClock::default();
        let ramp = Envelope::from_points(&[(0.0, 0.0), (1.0, 1.0)]);
        assert_eq!(clock.apply(100, &ramp), 0);

        clock.start();
        tokio::time::sleep(Duration::from_millis(2005)).await;
        let value = clock.apply(100, &ramp);
        assert!((49..=51).contains(&value), "value {value}");

        let mut disabled = ramp.clone();
        disabled.enabled = false;
        assert_eq!(clock.apply(100, &disabled), 100);
        clock.stop().await;
    }
}
