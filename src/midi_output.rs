//! MIDI output transports
//!
//! The pool writes raw bytes through a [`MidiSink`]. [`MidirSink`] talks to a
//! real port through midir; [`RecordingSink`] keeps everything in memory for
//! dry runs and tests.

use crate::error::{Result, TemperaError};
use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const CLIENT_NAME: &str = "Tempera Remote";

/// Destination for encoded MIDI bytes
pub trait MidiSink: Send {
    /// Write one complete message.
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release the underlying connection. Further sends may fail.
    fn close(&mut self) {}
}

/// MIDI device info
pub struct MidiDevice {
    pub name: String,
    pub port: MidiOutputPort,
}

/// List available MIDI output devices
pub fn list_devices() -> Result<Vec<MidiDevice>> {
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| TemperaError::Midi(e.to_string()))?;

    let mut devices = Vec::new();
    for port in midi_out.ports() {
        let name = midi_out
            .port_name(&port)
            .map_err(|e| TemperaError::Midi(e.to_string()))?;
        devices.push(MidiDevice { name, port });
    }

    Ok(devices)
}

/// Names of the available output ports
pub fn list_ports() -> Result<Vec<String>> {
    Ok(list_devices()?.into_iter().map(|d| d.name).collect())
}

/// Output connection to a hardware or virtual MIDI port
pub struct MidirSink {
    port_name: String,
    connection: Option<MidiOutputConnection>,
}

impl MidirSink {
    /// Connect to the first port whose name contains `device_name`.
    pub fn connect(device_name: &str) -> Result<Self> {
        let device = list_devices()?
            .into_iter()
            .find(|d| d.name.contains(device_name))
            .ok_or_else(|| TemperaError::PortNotFound(device_name.to_string()))?;

        let midi_out =
            MidiOutput::new(CLIENT_NAME).map_err(|e| TemperaError::Midi(e.to_string()))?;
        let connection = midi_out
            .connect(&device.port, "tempera-output")
            .map_err(|e| TemperaError::Midi(e.to_string()))?;

        info!("Connected to MIDI output '{}'", device.name);
        Ok(Self {
            port_name: device.name,
            connection: Some(connection),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiSink for MidirSink {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| TemperaError::Midi("connection closed".to_string()))?;
        connection
            .send(bytes)
            .map_err(|e| TemperaError::Midi(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!("Closed MIDI output '{}'", self.port_name);
        }
    }
}

impl Drop for MidirSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-memory sink; clones share the same log
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message written so far, in write order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MidiSink for RecordingSink {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TemperaError::Midi("connection closed".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
