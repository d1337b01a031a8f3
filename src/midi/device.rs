// MIDI output devices
// Backend/port traits so the dispatcher runs against midir or a test double

use midir::{MidiOutput, MidiOutputConnection};

use crate::error::EngineError;

const CLIENT_NAME: &str = "QuickMIDI";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MidiDeviceInfo {
    pub index: usize,
    pub name: String,
}

/// An open MIDI output port
pub trait MidiPort: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), EngineError>;

    /// Close the port. Repeated calls are no-ops.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn name(&self) -> &str {
        "MIDI port"
    }
}

/// Source of MIDI output ports
pub trait MidiBackend {
    fn enumerate(&self) -> Vec<MidiDeviceInfo>;

    fn open(&self, index: usize) -> Result<Box<dyn MidiPort>, EngineError>;

    /// First available port
    fn default_device(&self) -> Option<usize> {
        self.enumerate().first().map(|device| device.index)
    }
}

/// Default backend over midir (ALSA / CoreMIDI / WinMM)
#[derive(Debug, Default, Clone, Copy)]
pub struct MidirBackend;

impl MidirBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MidiBackend for MidirBackend {
    fn enumerate(&self) -> Vec<MidiDeviceInfo> {
        let mut devices = Vec::new();

        match MidiOutput::new("QuickMIDI Scanner") {
            Ok(midi_out) => {
                for (index, port) in midi_out.ports().iter().enumerate() {
                    if let Ok(name) = midi_out.port_name(port) {
                        devices.push(MidiDeviceInfo { index, name });
                    }
                }
            }
            Err(e) => log::warn!("Unable to scan MIDI outputs: {}", e),
        }

        devices
    }

    fn open(&self, index: usize) -> Result<Box<dyn MidiPort>, EngineError> {
        let midi_out =
            MidiOutput::new(CLIENT_NAME).map_err(|e| EngineError::MidiInit(e.to_string()))?;

        let ports = midi_out.ports();
        if ports.is_empty() {
            return Err(EngineError::NoMidiDevice);
        }
        let port = ports.get(index).ok_or(EngineError::MidiPortNotFound(index))?;
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| format!("MIDI output {}", index));

        let connection = midi_out
            .connect(port, "quickmidi-out")
            .map_err(|e| EngineError::MidiConnect(e.to_string()))?;

        log::info!("MIDI output connected: {}", name);
        Ok(Box::new(MidirPort {
            connection: Some(connection),
            name,
        }))
    }
}

/// midir output connection; dropping the connection closes the port
pub struct MidirPort {
    connection: Option<MidiOutputConnection>,
    name: String,
}

impl MidiPort for MidirPort {
    fn send(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        let connection = self.connection.as_mut().ok_or(EngineError::MidiPortClosed)?;
        connection
            .send(bytes)
            .map_err(|e| EngineError::MidiSend(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            log::info!("MIDI output closed: {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MidirPort {
    fn drop(&mut self) {
        self.close();
    }
}
