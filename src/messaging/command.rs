// Transport commands - Session -> clock synchronizer

/// Transport operation forwarded to the audio clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    /// Start playing from the given position (seconds)
    Play(f64),
    Halt,
    Stop,
    /// Move to the given position (seconds)
    Seek(f64),
}
