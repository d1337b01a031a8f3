// Timeline - Meter and bar:beat:tick positions
// Song parts carry a time signature; positions are displayed as bar:beat:tick

use serde::{Deserialize, Serialize};
use std::fmt;

/// Meter of a song part, serialized as `{"numerator": 4, "denominator": 4}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    /// A zero numerator is raised to 1 and the denominator is rounded up to a power of two
    pub fn new(numerator: u8, denominator: u8) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1).checked_next_power_of_two().unwrap_or(128),
        }
    }

    pub fn four_four() -> Self {
        Self::new(4, 4)
    }

    pub fn three_four() -> Self {
        Self::new(3, 4)
    }

    pub fn six_eight() -> Self {
        Self::new(6, 8)
    }

    /// Number of beats per bar.
    /// Every numerator unit counts as one beat, whatever the denominator.
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator.max(1) as f64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Display position, 1-based bar and beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MusicalTime {
    pub bar: u32,
    pub beat: u8,
    /// 0..TICKS_PER_BEAT
    pub tick: u16,
}

impl MusicalTime {
    /// Ticks per beat (PPQN)
    pub const TICKS_PER_BEAT: u16 = 480;

    pub fn new(bar: u32, beat: u8, tick: u16) -> Self {
        Self { bar, beat, tick }
    }

    /// 1:01:000
    pub fn zero() -> Self {
        Self::new(1, 1, 0)
    }

    /// Build from a beat count measured from the start of a run of bars
    /// sharing `time_signature`, offset by `bars_before` complete bars.
    pub fn from_beats(beats: f64, bars_before: u32, time_signature: &TimeSignature) -> Self {
        let beats = beats.max(0.0);
        let beats_per_bar = time_signature.beats_per_bar();

        let bar_index = (beats / beats_per_bar).floor();
        let beat_in_bar = beats - bar_index * beats_per_bar;
        let beat_index = beat_in_bar.floor().min(beats_per_bar - 1.0);
        let fraction = (beat_in_bar - beat_index).clamp(0.0, 1.0);
        let tick = ((fraction * Self::TICKS_PER_BEAT as f64) as u16).min(Self::TICKS_PER_BEAT - 1);

        Self::new(
            bars_before + bar_index as u32 + 1,
            beat_index as u8 + 1,
            tick,
        )
    }
}

impl Default for MusicalTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for MusicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:{:03}", self.bar, self.beat, self.tick)
    }
}
