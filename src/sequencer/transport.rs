// Transport - Playback state and playhead position
// Stopped -> Playing <-> Halted -> Stopped

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Halted,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }

    /// Stopped or halted
    pub fn is_idle(&self) -> bool {
        !self.is_playing()
    }
}

/// Transport controller
/// Owns the playhead (seconds) and the play/halt/stop state.
/// Each control method returns the new state when a transition happened.
#[derive(Debug, Default)]
pub struct Transport {
    state: PlaybackState,
    position: f64,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Playhead in seconds
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Set playhead, clamped to >= 0
    pub fn set_position(&mut self, seconds: f64) {
        self.position = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    }

    /// Move playhead forward by `seconds`
    pub fn advance(&mut self, seconds: f64) -> f64 {
        self.set_position(self.position + seconds);
        self.position
    }

    /// Play from the current position; no-op when already playing
    pub fn play(&mut self) -> Option<PlaybackState> {
        self.transition(PlaybackState::Playing)
    }

    /// Halt (keep current position)
    pub fn halt(&mut self) -> Option<PlaybackState> {
        if self.state.is_playing() {
            self.transition(PlaybackState::Halted)
        } else {
            None
        }
    }

    /// Stop (reset position to 0)
    pub fn stop(&mut self) -> Option<PlaybackState> {
        self.position = 0.0;
        self.transition(PlaybackState::Stopped)
    }

    fn transition(&mut self, next: PlaybackState) -> Option<PlaybackState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}
