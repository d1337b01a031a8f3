// Clock synchronization - Keeps the musical playhead on the audio clock

pub mod synchronizer;

pub use synchronizer::ClockSynchronizer;
