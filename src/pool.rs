//! Emitter pool: the single ordered path to the hardware
//!
//! All outgoing traffic, whether from sequencers, automation ticks or manual
//! edits, goes through one unbounded FIFO queue drained by one consumer task.
//! Enqueue order is send order. Parameter operations only enqueue and never
//! wait for the bytes to reach the device.

use crate::automation::ControlTarget;
use crate::codec::{
    self, AdsrParams, ChorusParams, DelayParams, EmitterCodec, GlobalCodec, GrainParams,
    ReverbParams, ToneFilterParams, XyParams,
};
use crate::command::parse_tagged;
use crate::controller_map::{ControllerMap, EMITTER_COUNT};
use crate::error::{check_range, Result, TemperaError};
use crate::midi_message::{self, MidiMessage};
use crate::midi_output::{MidiSink, MidirSink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SharedSink = Arc<Mutex<Option<Box<dyn MidiSink>>>>;

/// How emitters map onto MIDI channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    /// Every emitter on one channel (1-16). Playing several emitters at once
    /// sounds as a single note event.
    Shared(u8),
    /// Emitter n on channel n; each emitter gets its own note.
    PerEmitter,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        ChannelPolicy::Shared(1)
    }
}

impl ChannelPolicy {
    /// Zero-based wire channel for a validated emitter (1-4).
    pub fn channel_for(&self, emitter: u8) -> u8 {
        match self {
            ChannelPolicy::Shared(channel) => channel.saturating_sub(1),
            ChannelPolicy::PerEmitter => emitter.saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub controllers: ControllerMap,
    pub channel_policy: ChannelPolicy,
    /// 1-16, for track, global and transport messages
    pub global_channel: u8,
    /// Upper bound on the drain wait in [`EmitterPool::stop`]
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            controllers: ControllerMap::default(),
            channel_policy: ChannelPolicy::default(),
            global_channel: 1,
            drain_timeout: Duration::from_secs(1),
        }
    }
}

/// One queue entry; a batch is written back to back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchItem {
    Message(MidiMessage),
    Batch(Vec<MidiMessage>),
    Raw(Vec<u8>),
}

/// Outstanding-item counter with an idle signal
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.idle.notify_waiters();
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Commands accepted by [`EmitterPool::dispatch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PoolCommand {
    Volume { emitter: u8, value: u8 },
    Grain { emitter: u8, params: GrainParams },
    Octave { emitter: u8, value: u8 },
    RelativePosition { emitter: u8, params: XyParams },
    Spray { emitter: u8, params: XyParams },
    ToneFilter { emitter: u8, params: ToneFilterParams },
    EffectsSend { emitter: u8, value: u8 },
    SetActive { emitter: u8 },
    PlaceInCell { emitter: u8, column: u8, cell: u8 },
    RemoveFromCell { emitter: u8, column: u8, cell: u8 },
    /// `duration` in seconds
    Play {
        emitters: Vec<u8>,
        note: u8,
        velocity: u8,
        duration: f64,
    },
    TrackVolume { track: u8, value: u8 },
    Modwheel { value: u8 },
    ModulatorSize { modulator: u8, value: u8 },
    Adsr { params: AdsrParams },
    Reverb { params: ReverbParams },
    Delay { params: DelayParams },
    Chorus { params: ChorusParams },
    ChangeCanvas { program: u8 },
}

impl PoolCommand {
    pub const METHODS: &'static [&'static str] = &[
        "volume",
        "grain",
        "octave",
        "relative_position",
        "spray",
        "tone_filter",
        "effects_send",
        "set_active",
        "place_in_cell",
        "remove_from_cell",
        "play",
        "track_volume",
        "modwheel",
        "modulator_size",
        "adsr",
        "reverb",
        "delay",
        "chorus",
        "change_canvas",
    ];
}

/// Owner of the Tempera output connection
pub struct EmitterPool {
    config: PoolConfig,
    tx: mpsc::UnboundedSender<DispatchItem>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<DispatchItem>>>,
    sink: SharedSink,
    pending: Arc<Pending>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl EmitterPool {
    pub fn new(config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            sink: Arc::new(Mutex::new(None)),
            pending: Arc::new(Pending::default()),
            consumer: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Take ownership of `sink` and launch the consumer task.
    ///
    /// Items enqueued before `start` are sent first, in order. A pool starts
    /// once; after [`stop`](Self::stop) build a new one.
    pub fn start(&self, sink: Box<dyn MidiSink>) -> Result<()> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(rx) = rx else {
            let running = self
                .consumer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some();
            let reason = if running {
                "emitter pool already started"
            } else {
                "emitter pool cannot be restarted after stop"
            };
            return Err(TemperaError::Midi(reason.to_string()));
        };

        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);

        let handle = tokio::spawn(consume(rx, self.sink.clone(), self.pending.clone()));
        *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!("Emitter pool started ({:?})", self.config.channel_policy);
        Ok(())
    }

    /// Connect to the named port through midir and start.
    pub fn start_on_port(&self, port_name: &str) -> Result<()> {
        let sink = MidirSink::connect(port_name)?;
        self.start(Box::new(sink))
    }

    /// Best-effort shutdown: wait up to the drain timeout, then cancel the
    /// consumer and close the connection regardless.
    pub async fn stop(&self) {
        let timeout = self.config.drain_timeout;
        if tokio::time::timeout(timeout, self.pending.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "Dispatch queue not drained after {:?}; discarding {} item(s)",
                timeout,
                self.pending.count()
            );
        }

        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Dispatch consumer failed: {}", e),
            }
        }

        // Never started: drop whatever was queued.
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.pending.reset();

        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut sink) = sink {
            sink.close();
        }
        info!("Emitter pool stopped");
    }

    /// Wait until everything enqueued so far has been written.
    pub async fn drain(&self) {
        self.pending.wait_idle().await;
    }

    /// Number of items enqueued but not yet written
    pub fn pending(&self) -> usize {
        self.pending.count()
    }

    pub fn enqueue(&self, item: DispatchItem) {
        if let DispatchItem::Batch(messages) = &item {
            if messages.is_empty() {
                return;
            }
        }

        self.pending.add();
        if self.tx.send(item).is_err() {
            self.pending.done();
            debug!("Emitter pool stopped; dropping message");
        }
    }

    pub fn send(&self, message: MidiMessage) {
        self.enqueue(DispatchItem::Message(message));
    }

    pub fn send_batch(&self, messages: Vec<MidiMessage>) {
        self.enqueue(DispatchItem::Batch(messages));
    }

    /// Low-level escape hatch: raw bytes through the same queue.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.enqueue(DispatchItem::Raw(bytes));
    }

    fn emitter_codec(&self, emitter: u8) -> Result<EmitterCodec<'_>> {
        check_range("emitter", emitter, 1, EMITTER_COUNT)?;
        EmitterCodec::new(
            &self.config.controllers,
            emitter,
            self.config.channel_policy.channel_for(emitter),
        )
    }

    fn global_codec(&self) -> GlobalCodec<'_> {
        GlobalCodec::new(&self.config.controllers, self.global_channel())
    }

    fn global_channel(&self) -> u8 {
        self.config.global_channel.saturating_sub(1)
    }

    // --- Emitter parameters ---

    pub fn volume(&self, emitter: u8, value: u8) -> Result<()> {
        let message = self.emitter_codec(emitter)?.volume(value);
        self.send(message);
        Ok(())
    }

    pub fn grain(&self, emitter: u8, params: &GrainParams) -> Result<()> {
        let messages = self.emitter_codec(emitter)?.grain(params);
        self.send_batch(messages);
        Ok(())
    }

    pub fn octave(&self, emitter: u8, value: u8) -> Result<()> {
        let message = self.emitter_codec(emitter)?.octave(value);
        self.send(message);
        Ok(())
    }

    pub fn relative_position(&self, emitter: u8, params: &XyParams) -> Result<()> {
        let messages = self.emitter_codec(emitter)?.relative_position(params);
        self.send_batch(messages);
        Ok(())
    }

    pub fn spray(&self, emitter: u8, params: &XyParams) -> Result<()> {
        let messages = self.emitter_codec(emitter)?.spray(params);
        self.send_batch(messages);
        Ok(())
    }

    pub fn tone_filter(&self, emitter: u8, params: &ToneFilterParams) -> Result<()> {
        let messages = self.emitter_codec(emitter)?.tone_filter(params);
        self.send_batch(messages);
        Ok(())
    }

    pub fn effects_send(&self, emitter: u8, value: u8) -> Result<()> {
        let message = self.emitter_codec(emitter)?.effects_send(value);
        self.send(message);
        Ok(())
    }

    // --- Emitter placement ---

    pub fn set_active(&self, emitter: u8) -> Result<()> {
        let message = self.emitter_codec(emitter)?.set_active();
        self.send(message);
        Ok(())
    }

    pub fn place_in_cell(&self, emitter: u8, column: u8, cell: u8) -> Result<()> {
        let message = self.emitter_codec(emitter)?.place_in_cell(column, cell)?;
        self.send(message);
        Ok(())
    }

    pub fn remove_from_cell(&self, emitter: u8, column: u8, cell: u8) -> Result<()> {
        let message = self.emitter_codec(emitter)?.remove_from_cell(column, cell)?;
        self.send(message);
        Ok(())
    }

    /// Sound `note` on a set of emitters for `duration`.
    ///
    /// Suspends the caller between note-on and note-off. With a shared
    /// channel the whole set collapses into one note-on/note-off pair.
    pub async fn play_all(
        &self,
        emitters: &[u8],
        note: u8,
        velocity: u8,
        duration: Duration,
    ) -> Result<()> {
        let emitters: BTreeSet<u8> = emitters.iter().copied().collect();
        for emitter in &emitters {
            check_range("emitter", *emitter, 1, EMITTER_COUNT)?;
        }
        if emitters.is_empty() {
            return Ok(());
        }

        let channels: Vec<u8> = match self.config.channel_policy {
            policy @ ChannelPolicy::Shared(_) => vec![policy.channel_for(1)],
            policy @ ChannelPolicy::PerEmitter => {
                emitters.iter().map(|e| policy.channel_for(*e)).collect()
            }
        };

        self.send_batch(
            channels
                .iter()
                .map(|channel| midi_message::note_on(note, velocity, *channel))
                .collect(),
        );
        // Sends the note-offs even if this future is dropped mid-sleep.
        let note_off = NoteOffGuard {
            pool: self,
            messages: channels
                .iter()
                .map(|channel| midi_message::note_off(note, *channel))
                .collect(),
        };
        tokio::time::sleep(duration).await;
        drop(note_off);
        Ok(())
    }

    // --- Tracks ---

    pub fn track_volume(&self, track: u8, value: u8) -> Result<()> {
        let message =
            codec::track_volume(&self.config.controllers, track, value, self.global_channel())?;
        self.send(message);
        Ok(())
    }

    pub fn record_on(&self, track: u8) -> Result<()> {
        let message = codec::record_on(track, self.global_channel())?;
        self.send(message);
        Ok(())
    }

    pub fn record_off(&self, track: u8) -> Result<()> {
        let message = codec::record_off(track, self.global_channel())?;
        self.send(message);
        Ok(())
    }

    // --- Global controls ---

    pub fn modwheel(&self, value: u8) {
        let message = self.global_codec().modwheel(value);
        self.send(message);
    }

    pub fn modulator_size(&self, modulator: u8, value: u8) -> Result<()> {
        let message = self.global_codec().modulator_size(modulator, value)?;
        self.send(message);
        Ok(())
    }

    pub fn adsr(&self, params: &AdsrParams) {
        let messages = self.global_codec().adsr(params);
        self.send_batch(messages);
    }

    pub fn reverb(&self, params: &ReverbParams) {
        let messages = self.global_codec().reverb(params);
        self.send_batch(messages);
    }

    pub fn delay(&self, params: &DelayParams) {
        let messages = self.global_codec().delay(params);
        self.send_batch(messages);
    }

    pub fn chorus(&self, params: &ChorusParams) {
        let messages = self.global_codec().chorus(params);
        self.send_batch(messages);
    }

    pub fn change_canvas(&self, program: u8) {
        let message = self.global_codec().change_canvas(program);
        self.send(message);
    }

    /// Send a single automatable control.
    pub fn set_control(&self, target: &ControlTarget, value: u8) -> Result<()> {
        let controller = target.controller(&self.config.controllers)?;
        let channel = match target.emitter() {
            Some(emitter) => self.config.channel_policy.channel_for(emitter),
            None => self.global_channel(),
        };
        self.send(midi_message::control_change(controller, value, channel));
        Ok(())
    }

    // --- Transport ---

    pub fn clock(&self) {
        self.send(midi_message::clock());
    }

    pub fn transport_start(&self) {
        self.send(midi_message::start());
    }

    pub fn transport_stop(&self) {
        self.send(midi_message::stop());
    }

    // --- Generic dispatch ---

    pub async fn dispatch(&self, command: PoolCommand) -> Result<()> {
        match command {
            PoolCommand::Volume { emitter, value } => self.volume(emitter, value),
            PoolCommand::Grain { emitter, params } => self.grain(emitter, &params),
            PoolCommand::Octave { emitter, value } => self.octave(emitter, value),
            PoolCommand::RelativePosition { emitter, params } => {
                self.relative_position(emitter, &params)
            }
            PoolCommand::Spray { emitter, params } => self.spray(emitter, &params),
            PoolCommand::ToneFilter { emitter, params } => self.tone_filter(emitter, &params),
            PoolCommand::EffectsSend { emitter, value } => self.effects_send(emitter, value),
            PoolCommand::SetActive { emitter } => self.set_active(emitter),
            PoolCommand::PlaceInCell {
                emitter,
                column,
                cell,
            } => self.place_in_cell(emitter, column, cell),
            PoolCommand::RemoveFromCell {
                emitter,
                column,
                cell,
            } => self.remove_from_cell(emitter, column, cell),
            PoolCommand::Play {
                emitters,
                note,
                velocity,
                duration,
            } => {
                let duration = Duration::try_from_secs_f64(duration)
                    .map_err(|e| TemperaError::InvalidTiming(e.to_string()))?;
                self.play_all(&emitters, note, velocity, duration).await
            }
            PoolCommand::TrackVolume { track, value } => self.track_volume(track, value),
            PoolCommand::Modwheel { value } => {
                self.modwheel(value);
                Ok(())
            }
            PoolCommand::ModulatorSize { modulator, value } => {
                self.modulator_size(modulator, value)
            }
            PoolCommand::Adsr { params } => {
                self.adsr(&params);
                Ok(())
            }
            PoolCommand::Reverb { params } => {
                self.reverb(&params);
                Ok(())
            }
            PoolCommand::Delay { params } => {
                self.delay(&params);
                Ok(())
            }
            PoolCommand::Chorus { params } => {
                self.chorus(&params);
                Ok(())
            }
            PoolCommand::ChangeCanvas { program } => {
                self.change_canvas(program);
                Ok(())
            }
        }
    }

    /// Dispatch a `{"method": ..., ...}` object.
    pub async fn dispatch_json(&self, value: serde_json::Value) -> Result<()> {
        let command = parse_tagged(value, "method", PoolCommand::METHODS)?;
        self.dispatch(command).await
    }
}

/// Note-offs for a sounding [`EmitterPool::play_all`], enqueued on drop
struct NoteOffGuard<'a> {
    pool: &'a EmitterPool,
    messages: Vec<MidiMessage>,
}

impl Drop for NoteOffGuard<'_> {
    fn drop(&mut self) {
        self.pool.send_batch(std::mem::take(&mut self.messages));
    }
}

/// Consumer loop: one item at a time, every message of a batch before the next item
async fn consume(
    mut rx: mpsc::UnboundedReceiver<DispatchItem>,
    sink: SharedSink,
    pending: Arc<Pending>,
) {
    while let Some(item) = rx.recv().await {
        write_item(&sink, &item);
        pending.done();
    }
    debug!("Dispatch queue closed");
}

fn write_item(sink: &SharedSink, item: &DispatchItem) {
    let mut guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(sink) = guard.as_mut() else {
        return;
    };

    let mut write = |bytes: &[u8]| {
        if let Err(e) = sink.send(bytes) {
            warn!("MIDI write failed: {}", e);
        }
    };

    match item {
        DispatchItem::Message(message) => write(&message.to_bytes()),
        DispatchItem::Batch(messages) => {
            for message in messages {
                write(&message.to_bytes());
            }
        }
        DispatchItem::Raw(bytes) => write(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi_output::RecordingSink;
    use serde_json::json;

    fn started_pool(config: PoolConfig) -> (EmitterPool, RecordingSink) {
        let sink = RecordingSink::new();
        let pool = EmitterPool::new(config);
        pool.start(Box::new(sink.clone())).unwrap();
        (pool, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order_without_loss() {
        let (pool, sink) = started_pool(PoolConfig::default());

        let expected: Vec<Vec<u8>> = (0..50u8)
            .map(|i| midi_message::control_change(1, i, 0).to_bytes())
            .collect();
        for i in 0..50u8 {
            pool.send(midi_message::control_change(1, i, 0));
        }
        pool.drain().await;

        assert_eq!(sink.sent(), expected);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_producers_interleave_whole_batches() {
        let pool = Arc::new(EmitterPool::new(PoolConfig::default()));
        let sink = RecordingSink::new();
        pool.start(Box::new(sink.clone())).unwrap();

        let mut tasks = Vec::new();
        for emitter in 1..=4u8 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    pool.grain(
                        emitter,
                        &GrainParams {
                            density: Some(emitter),
                            shape: Some(emitter),
                            ..Default::default()
                        },
                    )
                    .unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        pool.drain().await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 80);
        // Each batch's density CC is immediately followed by its shape CC.
        for pair in sent.chunks(2) {
            assert_eq!(pair[0][2], pair[1][2]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_enqueued_before_start_are_sent_first() {
        let pool = EmitterPool::new(PoolConfig::default());
        pool.volume(1, 100).unwrap();

        let sink = RecordingSink::new();
        pool.start(Box::new(sink.clone())).unwrap();
        pool.volume(2, 50).unwrap();
        pool.drain().await;

        let map = ControllerMap::default();
        assert_eq!(
            sink.sent(),
            vec![
                vec![0xB0, map.emitters[0].volume, 100],
                vec![0xB0, map.emitters[1].volume, 50],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_emitter_fails_without_enqueue() {
        let (pool, sink) = started_pool(PoolConfig::default());
        assert!(pool.volume(0, 100).is_err());
        assert!(pool.volume(5, 100).is_err());
        assert!(pool.place_in_cell(1, 9, 1).is_err());
        pool.drain().await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_params_enqueue_nothing() {
        let (pool, sink) = started_pool(PoolConfig::default());
        pool.grain(1, &GrainParams::default()).unwrap();
        pool.reverb(&ReverbParams::default());
        assert_eq!(pool.pending(), 0);
        pool.drain().await;
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_all_shared_channel_collapses_to_one_pair() {
        let (pool, sink) = started_pool(PoolConfig::default());

        let started = tokio::time::Instant::now();
        pool.play_all(&[1, 2, 3, 4], 60, 127, Duration::from_millis(500))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        pool.drain().await;

        assert_eq!(sink.sent(), vec![vec![0x90, 60, 127], vec![0x80, 60, 0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_all_per_emitter_channels() {
        let (pool, sink) = started_pool(PoolConfig {
            channel_policy: ChannelPolicy::PerEmitter,
            ..Default::default()
        });

        pool.play_all(&[3, 1, 3], 64, 100, Duration::from_millis(100))
            .await
            .unwrap();
        pool.drain().await;

        assert_eq!(
            sink.sent(),
            vec![
                vec![0x90, 64, 100],
                vec![0x92, 64, 100],
                vec![0x80, 64, 0],
                vec![0x82, 64, 0],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_emitter_channel_applies_to_control_changes() {
        let (pool, sink) = started_pool(PoolConfig {
            channel_policy: ChannelPolicy::PerEmitter,
            ..Default::default()
        });
        pool.effects_send(4, 80).unwrap();
        pool.drain().await;

        let map = ControllerMap::default();
        assert_eq!(sink.sent(), vec![vec![0xB3, map.emitters[3].effects_send, 80]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_then_closes() {
        let (pool, sink) = started_pool(PoolConfig::default());
        pool.transport_start();
        pool.clock();
        pool.transport_stop();
        pool.stop().await;

        assert_eq!(sink.sent(), vec![vec![0xFA], vec![0xF8], vec![0xFC]]);
        assert!(sink.is_closed());

        // Enqueueing after stop is silently dropped.
        pool.clock();
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_times_out_without_error() {
        let pool = EmitterPool::new(PoolConfig {
            drain_timeout: Duration::from_millis(200),
            ..Default::default()
        });
        pool.clock();

        let started = tokio::time::Instant::now();
        pool.stop().await;
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_error() {
        let (pool, _sink) = started_pool(PoolConfig::default());
        match pool.start(Box::new(RecordingSink::new())) {
            Err(TemperaError::Midi(reason)) => assert!(reason.contains("already started")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_is_error() {
        let (pool, _sink) = started_pool(PoolConfig::default());
        pool.stop().await;
        match pool.start(Box::new(RecordingSink::new())) {
            Err(TemperaError::Midi(reason)) => assert!(reason.contains("cannot be restarted")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_play_all_still_sends_note_off() {
        let pool = Arc::new(EmitterPool::new(PoolConfig::default()));
        let sink = RecordingSink::new();
        pool.start(Box::new(sink.clone())).unwrap();

        let player = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            player
                .play_all(&[1], 60, 127, Duration::from_millis(500))
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        pool.drain().await;

        assert_eq!(sink.sent(), vec![vec![0x90, 60, 127], vec![0x80, 60, 0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_json() {
        let (pool, sink) = started_pool(PoolConfig::default());
        pool.dispatch_json(json!({"method": "volume", "emitter": 1, "value": 64}))
            .await
            .unwrap();
        pool.dispatch_json(json!({
            "method": "grain",
            "emitter": 2,
            "params": {"shape": 60, "density": 80}
        }))
        .await
        .unwrap();
        pool.drain().await;

        let map = ControllerMap::default();
        let e2 = &map.emitters[1];
        assert_eq!(
            sink.sent(),
            vec![
                vec![0xB0, map.emitters[0].volume, 64],
                vec![0xB0, e2.grain_density, 80],
                vec![0xB0, e2.grain_shape, 60],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_json_unknown_method() {
        let (pool, _sink) = started_pool(PoolConfig::default());
        let err = pool
            .dispatch_json(json!({"method": "explode", "emitter": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, TemperaError::UnknownAction(name) if name == "explode"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_and_global_use_global_channel() {
        let (pool, sink) = started_pool(PoolConfig {
            global_channel: 10,
            ..Default::default()
        });
        pool.track_volume(2, 90).unwrap();
        pool.change_canvas(4);
        pool.send_raw(vec![0xB9, 40, 100]);
        pool.drain().await;

        let map = ControllerMap::default();
        assert_eq!(
            sink.sent(),
            vec![
                vec![0xB9, map.track_volumes[1], 90],
                vec![0xC9, 4],
                vec![0xB9, 40, 100],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_control_routes_by_target() {
        let (pool, sink) = started_pool(PoolConfig {
            channel_policy: ChannelPolicy::PerEmitter,
            global_channel: 16,
            ..Default::default()
        });
        pool.set_control(&"emitter.3.octave".parse().unwrap(), 5)
            .unwrap();
        pool.set_control(&"global.modulator.2.size".parse().unwrap(), 70)
            .unwrap();
        pool.drain().await;

        let map = ControllerMap::default();
        assert_eq!(
            sink.sent(),
            vec![
                vec![0xB2, map.emitters[2].octave, 5],
                vec![0xBF, map.modulator_sizes[1], 70],
            ]
        );
    }
}
