// Engine error types
//
// Device failures surface here as failed initializations. The realtime callback and
// the MIDI dispatch path never return these: they degrade to silence / dropped sends.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No audio output device available")]
    NoAudioDevice,

    #[error("Audio device {0} not found")]
    AudioDeviceNotFound(usize),

    #[error("Audio configuration error: {0}")]
    AudioConfig(String),

    #[error("Unsupported sample format: {0}. Supported formats: F32, I16, U16")]
    UnsupportedSampleFormat(String),

    #[error("Error in stream creation: {0}")]
    StreamBuild(String),

    #[error("Stream control error: {0}")]
    StreamControl(String),

    #[error("Audio engine is not initialized")]
    NotInitialized,

    #[error("Failed to initialize MIDI: {0}")]
    MidiInit(String),

    #[error("No MIDI output devices available")]
    NoMidiDevice,

    #[error("Invalid MIDI device index: {0}")]
    MidiPortNotFound(usize),

    #[error("Failed to connect to MIDI device: {0}")]
    MidiConnect(String),

    #[error("Error sending MIDI message: {0}")]
    MidiSend(String),

    #[error("MIDI port is closed")]
    MidiPortClosed,

    #[error("Unsupported audio file format: {0}")]
    UnsupportedAudioFormat(String),

    #[error("Error loading audio file {path}: {reason}")]
    AudioDecode { path: PathBuf, reason: String },

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl EngineError {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EngineError::AudioDecode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
