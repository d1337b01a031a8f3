// Sequencer module
// Tempo map, musical time, transport state machine and the tick-driven scheduler

pub mod scheduler;
pub mod tempo_map;
pub mod timeline;
pub mod transport;

pub use scheduler::Scheduler;
pub use tempo_map::{SongPart, TempoMap, Transition};
pub use timeline::{MusicalTime, TimeSignature};
pub use transport::{PlaybackState, Transport};
