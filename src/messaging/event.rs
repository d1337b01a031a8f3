// Playback events - Scheduler -> UI / host

use crate::sequencer::transport::PlaybackState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    /// Playhead moved (seconds)
    PositionChanged(f64),
    /// Position reported by the audio callback (seconds)
    AudioPosition(f64),
    StateChanged(PlaybackState),
}
