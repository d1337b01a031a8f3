// QuickMIDI - Playback core: audio lanes, tempo-mapped MIDI scheduling, clock sync

pub mod audio;
pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod midi;
pub mod project;
pub mod sequencer;
pub mod session;
pub mod sync;

// Re-export commonly used types for convenience
pub use audio::device::{AudioBackend, CpalBackend};
pub use audio::engine::{AudioClock, AudioClockDriver, ClockHandle};
pub use audio::mixer::AudioRenderGraph;
pub use config::EngineConfig;
pub use connection::status::DeviceStatus;
pub use error::EngineError;
pub use messaging::event::PlaybackEvent;
pub use midi::device::{MidiBackend, MidiPort, MidirBackend};
pub use midi::dispatcher::MidiDispatcher;
pub use project::{Lane, LaneKind, MidiBlock, MidiMessageType, Project};
pub use sequencer::{PlaybackState, Scheduler, SongPart, TempoMap, TimeSignature, Transition};
pub use session::{PlaybackSession, SessionCore};
pub use sync::ClockSynchronizer;
