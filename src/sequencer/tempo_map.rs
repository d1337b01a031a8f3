// Tempo map - Song structure with per-part tempo and nonlinear tempo ramps
//
// A song is an ordered list of parts. Each part has its own time signature, BPM and
// bar count. A part either switches to its BPM instantly or ramps from the previous
// part's BPM with the convex curve `progress ^ 0.52`.
//
// Two forms of the curve are used:
// - duration and beat positions apply it per bar, to `bar / bar_count`
// - `bpm_at` applies it to the time progress `(t - start) / duration`
// Both meet the part's start and end BPM exactly at the part boundaries.

use serde::{Deserialize, Serialize};

use super::timeline::{MusicalTime, TimeSignature};

/// Exponent of the gradual transition curve
pub const GRADUAL_CURVE_EXPONENT: f64 = 0.52;

/// Accepted BPM range; values outside are clamped on write
pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 999.0;

/// Default tempo when a project has no song parts
pub const DEFAULT_BPM: f64 = 120.0;

fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() {
        bpm.clamp(MIN_BPM, MAX_BPM)
    } else {
        DEFAULT_BPM
    }
}

#[inline]
fn curve(progress: f64) -> f64 {
    progress.clamp(0.0, 1.0).powf(GRADUAL_CURVE_EXPONENT)
}

/// How a part reaches its BPM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    #[default]
    Instant,
    Gradual,
}

fn default_color() -> String {
    "#4a90d9".to_string()
}

/// One section of the song (intro, verse, chorus...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongPart {
    pub name: String,
    #[serde(default)]
    pub time_signature: TimeSignature,
    pub bpm: f64,
    pub bar_count: u32,
    #[serde(default)]
    pub transition: Transition,
    #[serde(default = "default_color")]
    pub color: String,

    // Derived by TempoMap::recompute
    #[serde(skip)]
    start_time: f64,
    #[serde(skip)]
    duration: f64,
    #[serde(skip)]
    start_bpm: f64,
    #[serde(skip)]
    ramped: bool,
}

impl SongPart {
    pub fn new(
        name: impl Into<String>,
        time_signature: TimeSignature,
        bpm: f64,
        bar_count: u32,
        transition: Transition,
    ) -> Self {
        let bpm = clamp_bpm(bpm);
        Self {
            name: name.into(),
            time_signature,
            bpm,
            bar_count,
            transition,
            color: default_color(),
            start_time: 0.0,
            duration: 0.0,
            start_bpm: bpm,
            ramped: false,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Start time in seconds (derived)
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Duration in seconds (derived)
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// BPM at the start of the part: the previous part's BPM when ramping
    pub fn start_bpm(&self) -> f64 {
        self.start_bpm
    }

    /// True when the part ramps from the previous part's tempo
    pub fn is_ramped(&self) -> bool {
        self.ramped
    }

    pub fn total_beats(&self) -> f64 {
        self.bar_count as f64 * self.time_signature.beats_per_bar()
    }

    /// Tempo of a whole bar inside a ramp (bar-index form of the curve)
    fn bar_bpm(&self, bar: u32) -> f64 {
        if !self.ramped || self.bar_count == 0 {
            return self.bpm;
        }
        let progress = bar as f64 / self.bar_count as f64;
        self.start_bpm + (self.bpm - self.start_bpm) * curve(progress)
    }

    fn bar_duration(&self, bar: u32) -> f64 {
        self.time_signature.beats_per_bar() * 60.0 / self.bar_bpm(bar)
    }

    fn compute_duration(&self) -> f64 {
        if self.ramped {
            (0..self.bar_count).map(|bar| self.bar_duration(bar)).sum()
        } else {
            self.total_beats() / self.bpm * 60.0
        }
    }

    /// Tempo at absolute time `t` (time-progress form of the curve)
    fn bpm_at(&self, t: f64) -> f64 {
        if !self.ramped {
            return self.bpm;
        }
        if t >= self.end_time() {
            return self.bpm;
        }
        if t <= self.start_time || self.duration <= 0.0 {
            return self.start_bpm;
        }
        let progress = (t - self.start_time) / self.duration;
        self.start_bpm + (self.bpm - self.start_bpm) * curve(progress)
    }

    /// Beats elapsed inside this part at absolute time `t`, in `[0, total_beats]`
    fn beats_at(&self, t: f64) -> f64 {
        let total_beats = self.total_beats();
        if t >= self.end_time() {
            return total_beats;
        }
        if t <= self.start_time {
            return 0.0;
        }

        if !self.ramped {
            return ((t - self.start_time) * self.bpm / 60.0).min(total_beats);
        }

        // Inside a ramp every bar holds exactly beats_per_bar beats
        let beats_per_bar = self.time_signature.beats_per_bar();
        let mut bar_start = self.start_time;
        for bar in 0..self.bar_count {
            let bar_duration = self.bar_duration(bar);
            let bar_end = bar_start + bar_duration;
            if t < bar_end || bar + 1 == self.bar_count {
                let within = ((t - bar_start) / bar_duration).clamp(0.0, 1.0);
                return (bar as f64 + within) * beats_per_bar;
            }
            bar_start = bar_end;
        }
        total_beats
    }

    /// Absolute time of a beat offset inside this part.
    /// The canonical beat-to-time mapping: beat 0 and `total_beats` land exactly on
    /// the part boundaries.
    fn time_at_beat(&self, beat: f64) -> f64 {
        if beat <= 0.0 {
            return self.start_time;
        }
        if beat >= self.total_beats() {
            return self.end_time();
        }

        if !self.ramped {
            return self.start_time + beat * 60.0 / self.bpm;
        }

        let beats_per_bar = self.time_signature.beats_per_bar();
        let target_bar = ((beat / beats_per_bar).floor() as u32).min(self.bar_count - 1);
        let mut bar_start = self.start_time;
        for bar in 0..target_bar {
            bar_start += self.bar_duration(bar);
        }
        let within = beat - target_bar as f64 * beats_per_bar;
        if within <= 0.0 {
            bar_start
        } else {
            bar_start + within / beats_per_bar * self.bar_duration(target_bar)
        }
    }
}

/// Ordered song parts plus the fallback tempo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TempoMapRecord")]
pub struct TempoMap {
    parts: Vec<SongPart>,
    default_bpm: f64,
}

#[derive(Deserialize)]
struct TempoMapRecord {
    #[serde(default)]
    parts: Vec<SongPart>,
    #[serde(default = "default_bpm")]
    default_bpm: f64,
}

fn default_bpm() -> f64 {
    DEFAULT_BPM
}

impl From<TempoMapRecord> for TempoMap {
    fn from(record: TempoMapRecord) -> Self {
        let mut map = TempoMap::new(record.default_bpm);
        map.set_parts(record.parts);
        map
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

impl TempoMap {
    pub fn new(default_bpm: f64) -> Self {
        Self {
            parts: Vec::new(),
            default_bpm: clamp_bpm(default_bpm),
        }
    }

    pub fn with_parts(default_bpm: f64, parts: Vec<SongPart>) -> Self {
        let mut map = Self::new(default_bpm);
        map.set_parts(parts);
        map
    }

    pub fn parts(&self) -> &[SongPart] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn default_bpm(&self) -> f64 {
        self.default_bpm
    }

    pub fn set_default_bpm(&mut self, bpm: f64) {
        self.default_bpm = clamp_bpm(bpm);
    }

    pub fn set_parts(&mut self, parts: Vec<SongPart>) {
        self.parts = parts;
        self.recompute();
    }

    pub fn push_part(&mut self, part: SongPart) {
        self.parts.push(part);
        self.recompute();
    }

    /// Insert a part; indices past the end append
    pub fn insert_part(&mut self, index: usize, part: SongPart) {
        let index = index.min(self.parts.len());
        self.parts.insert(index, part);
        self.recompute();
    }

    pub fn remove_part(&mut self, index: usize) -> Option<SongPart> {
        if index >= self.parts.len() {
            return None;
        }
        let part = self.parts.remove(index);
        self.recompute();
        Some(part)
    }

    /// Edit a part in place; start times and durations are recomputed afterwards
    pub fn update_part<F>(&mut self, index: usize, edit: F) -> bool
    where
        F: FnOnce(&mut SongPart),
    {
        let Some(part) = self.parts.get_mut(index) else {
            return false;
        };
        edit(part);
        self.recompute();
        true
    }

    /// Recompute derived start/duration for every part.
    /// Each start is the previous part's `start + duration`, so consecutive parts
    /// share their boundary value bit for bit.
    fn recompute(&mut self) {
        let mut start = 0.0;
        let mut previous_bpm: Option<f64> = None;

        for part in &mut self.parts {
            part.bpm = clamp_bpm(part.bpm);
            part.ramped = part.transition == Transition::Gradual && previous_bpm.is_some();
            part.start_bpm = match previous_bpm {
                Some(prev) if part.ramped => prev,
                _ => part.bpm,
            };
            part.start_time = start;
            part.duration = part.compute_duration().max(0.0);

            start = part.start_time + part.duration;
            previous_bpm = Some(part.bpm);
        }
    }

    pub fn total_duration(&self) -> f64 {
        self.parts.last().map(SongPart::end_time).unwrap_or(0.0)
    }

    pub fn total_beats(&self) -> f64 {
        self.parts.iter().map(SongPart::total_beats).sum()
    }

    /// Index of the part containing `t`.
    /// Parts are closed intervals and the first match wins, so an exact boundary
    /// belongs to the part that ends there.
    pub fn part_index_at(&self, t: f64) -> Option<usize> {
        let t = t.max(0.0);
        self.parts
            .iter()
            .position(|part| t >= part.start_time && t <= part.end_time())
    }

    pub fn part_at(&self, t: f64) -> Option<&SongPart> {
        self.part_index_at(t).map(|index| &self.parts[index])
    }

    /// Tempo at time `t` (seconds). Holds at the last part's BPM past the end.
    pub fn bpm_at(&self, t: f64) -> f64 {
        let Some(last) = self.parts.last() else {
            return self.default_bpm;
        };
        match self.part_at(t) {
            Some(part) => part.bpm_at(t.max(0.0)),
            None => last.bpm,
        }
    }

    /// Beats elapsed since the start of the song at time `t`
    pub fn time_to_beats(&self, t: f64) -> f64 {
        let t = t.max(0.0);
        let Some(last) = self.parts.last() else {
            return t * self.default_bpm / 60.0;
        };

        let mut beats = 0.0;
        for part in &self.parts {
            if t <= part.end_time() {
                return beats + part.beats_at(t);
            }
            beats += part.total_beats();
        }

        // Past the end the last tempo holds
        beats + (t - last.end_time()) * last.bpm / 60.0
    }

    /// Time (seconds) of a beat position counted from the start of the song
    pub fn beats_to_time(&self, beats: f64) -> f64 {
        let beats = beats.max(0.0);
        let Some(last) = self.parts.last() else {
            return beats * 60.0 / self.default_bpm;
        };

        let mut passed = 0.0;
        for part in &self.parts {
            let part_beats = part.total_beats();
            if beats <= passed + part_beats {
                return part.time_at_beat(beats - passed);
            }
            passed += part_beats;
        }

        last.end_time() + (beats - passed) * 60.0 / last.bpm
    }

    /// Snap `t` to the closest beat.
    ///
    /// Floating point round trips are not exact at part boundaries, so the search
    /// looks at the floor/ceil beats of the containing part, that part's boundaries
    /// and its neighbours' boundaries. All candidates come from the same canonical
    /// beat-to-time mapping, which makes the result a fixed point.
    pub fn nearest_beat(&self, t: f64) -> f64 {
        let t = t.max(0.0);

        let Some(last) = self.parts.last() else {
            let beat = 60.0 / self.default_bpm;
            return (t / beat).round() * beat;
        };

        let Some(index) = self.part_index_at(t) else {
            // Past the end: continue the grid at the last tempo
            let end = last.end_time();
            let beat = 60.0 / last.bpm;
            return end + ((t - end) / beat).round() * beat;
        };

        let part = &self.parts[index];
        let local = part.beats_at(t);

        let mut candidates = Vec::with_capacity(8);
        candidates.push(part.time_at_beat(local.floor()));
        candidates.push(part.time_at_beat(local.ceil()));
        candidates.push(part.start_time);
        candidates.push(part.end_time());
        if let Some(previous) = index.checked_sub(1).and_then(|i| self.parts.get(i)) {
            candidates.push(previous.start_time);
            candidates.push(previous.end_time());
        }
        if let Some(next) = self.parts.get(index + 1) {
            candidates.push(next.start_time);
            candidates.push(next.end_time());
        }

        candidates
            .into_iter()
            .min_by(|a, b| (t - a).abs().total_cmp(&(t - b).abs()))
            .unwrap_or(t)
    }

    /// Bar:beat:tick position for display
    pub fn musical_time_at(&self, t: f64) -> MusicalTime {
        let t = t.max(0.0);
        let Some(last) = self.parts.last() else {
            return MusicalTime::from_beats(
                self.time_to_beats(t),
                0,
                &TimeSignature::four_four(),
            );
        };

        let mut bars_before = 0;
        for part in &self.parts {
            if t < part.end_time() {
                return MusicalTime::from_beats(part.beats_at(t), bars_before, &part.time_signature);
            }
            bars_before += part.bar_count;
        }

        let beyond = (t - last.end_time()) * last.bpm / 60.0;
        MusicalTime::from_beats(beyond, bars_before, &last.time_signature)
    }
}
