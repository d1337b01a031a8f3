// Audio render graph - Mixes every audio lane into one stereo block
//
// Runs inside the audio callback: no allocation once the scratch buffers are sized.
// Every enabled lane's reader advances on each render, audible or not, so muting or
// soloing never desynchronizes a lane from the clock.

use crate::audio::clip::LaneReader;
use crate::project::types::{LaneId, clamp_volume};

/// Per-lane mixer state, created on attach and dropped on detach
pub struct LaneRuntimeState {
    reader: Box<dyn LaneReader>,
    pub volume: f32,
    pub muted: bool,
    pub solo: bool,
    pub enabled: bool,
}

impl LaneRuntimeState {
    pub fn reader(&self) -> &dyn LaneReader {
        self.reader.as_ref()
    }
}

pub struct AudioRenderGraph {
    lanes: Vec<(LaneId, LaneRuntimeState)>,
    mix: Vec<f32>,
    scratch: Vec<f32>,
    has_solo: bool,
}

impl AudioRenderGraph {
    /// `max_frames` is the largest block `render` will be asked for without reallocating
    pub fn new(max_frames: usize) -> Self {
        Self {
            lanes: Vec::new(),
            mix: vec![0.0; max_frames * 2],
            scratch: vec![0.0; max_frames * 2],
            has_solo: false,
        }
    }

    /// Attach a reader; an existing lane with the same id is replaced
    pub fn attach_lane(&mut self, id: LaneId, reader: Box<dyn LaneReader>, volume: f32) {
        let state = LaneRuntimeState {
            reader,
            volume: clamp_volume(volume),
            muted: false,
            solo: false,
            enabled: true,
        };

        match self.lanes.iter_mut().find(|(lane_id, _)| *lane_id == id) {
            Some((_, existing)) => *existing = state,
            None => self.lanes.push((id, state)),
        }
        self.update_solo();
    }

    pub fn detach_lane(&mut self, id: LaneId) -> bool {
        let before = self.lanes.len();
        self.lanes.retain(|(lane_id, _)| *lane_id != id);
        self.update_solo();
        self.lanes.len() != before
    }

    pub fn clear(&mut self) {
        self.lanes.clear();
        self.has_solo = false;
    }

    pub fn contains(&self, id: LaneId) -> bool {
        self.lanes.iter().any(|(lane_id, _)| *lane_id == id)
    }

    pub fn lane(&self, id: LaneId) -> Option<&LaneRuntimeState> {
        self.lanes
            .iter()
            .find(|(lane_id, _)| *lane_id == id)
            .map(|(_, state)| state)
    }

    pub fn lane_ids(&self) -> impl Iterator<Item = LaneId> + '_ {
        self.lanes.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn set_volume(&mut self, id: LaneId, volume: f32) {
        if let Some(state) = self.lane_mut(id) {
            state.volume = clamp_volume(volume);
        }
    }

    pub fn set_mute(&mut self, id: LaneId, muted: bool) {
        if let Some(state) = self.lane_mut(id) {
            state.muted = muted;
        }
    }

    pub fn set_solo(&mut self, id: LaneId, solo: bool) {
        if let Some(state) = self.lane_mut(id) {
            state.solo = solo;
        }
        self.update_solo();
    }

    /// Disabled lanes are skipped entirely, their reader does not advance
    pub fn set_enabled(&mut self, id: LaneId, enabled: bool) {
        if let Some(state) = self.lane_mut(id) {
            state.enabled = enabled;
        }
    }

    /// Move every reader to `frame`
    pub fn seek_all(&mut self, frame: u64) {
        for (_, state) in &mut self.lanes {
            state.reader.seek(frame);
        }
    }

    /// Rewind every reader
    pub fn reset_all(&mut self) {
        self.seek_all(0);
    }

    /// Seek one lane, used when a lane is attached during playback
    pub fn seek_lane(&mut self, id: LaneId, frame: u64) {
        if let Some(state) = self.lane_mut(id) {
            state.reader.seek(frame);
        }
    }

    /// Render `frame_count` frames of interleaved stereo.
    /// Hard clip to [-1, 1] only when at least one lane contributed.
    pub fn render(&mut self, frame_count: usize) -> &[f32] {
        let len = frame_count * 2;
        if self.mix.len() < len {
            // Only when the host asks for more than the configured buffer
            self.mix.resize(len, 0.0);
            self.scratch.resize(len, 0.0);
        }

        let mix = &mut self.mix[..len];
        let scratch = &mut self.scratch[..len];
        mix.fill(0.0);

        let mut contributed = false;
        for (_, state) in &mut self.lanes {
            if !state.enabled {
                continue;
            }

            state.reader.read_frames(scratch);

            if state.muted || (self.has_solo && !state.solo) {
                continue;
            }

            let volume = state.volume;
            for (out, sample) in mix.iter_mut().zip(scratch.iter()) {
                *out += sample * volume;
            }
            contributed = true;
        }

        if contributed {
            for sample in mix.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }

        &self.mix[..len]
    }

    fn lane_mut(&mut self, id: LaneId) -> Option<&mut LaneRuntimeState> {
        self.lanes
            .iter_mut()
            .find(|(lane_id, _)| *lane_id == id)
            .map(|(_, state)| state)
    }

    fn update_solo(&mut self) {
        self.has_solo = self.lanes.iter().any(|(_, state)| state.solo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::clip::AudioClip;
    use uuid::Uuid;

    fn constant(value: f32, frames: usize) -> Box<dyn LaneReader> {
        Box::new(AudioClip::from_interleaved(vec![value; frames * 2], 44_100))
    }

    #[test]
    fn test_mix_with_volume() {
        let mut graph = AudioRenderGraph::new(4);
        graph.attach_lane(Uuid::new_v4(), constant(0.5, 16), 0.5);
        graph.attach_lane(Uuid::new_v4(), constant(0.25, 16), 1.0);

        let out = graph.render(4);
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_output_is_clipped() {
        let mut graph = AudioRenderGraph::new(2);
        graph.attach_lane(Uuid::new_v4(), constant(0.8, 4), 1.0);
        graph.attach_lane(Uuid::new_v4(), constant(0.8, 4), 1.0);
        assert!(graph.render(2).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_muted_lane_keeps_advancing() {
        let mut graph = AudioRenderGraph::new(4);
        let id = Uuid::new_v4();
        graph.attach_lane(id, constant(0.5, 64), 1.0);

        graph.set_mute(id, true);
        assert!(graph.render(4).iter().all(|&s| s == 0.0));
        assert_eq!(graph.lane(id).unwrap().reader().position(), 4);

        graph.set_mute(id, false);
        graph.render(4);
        assert_eq!(graph.lane(id).unwrap().reader().position(), 8);
    }

    #[test]
    fn test_solo_suppresses_other_lanes() {
        let mut graph = AudioRenderGraph::new(2);
        let soloed = Uuid::new_v4();
        let other = Uuid::new_v4();
        graph.attach_lane(soloed, constant(0.25, 8), 1.0);
        graph.attach_lane(other, constant(0.5, 8), 1.0);
        graph.set_solo(soloed, true);

        assert!(graph.render(2).iter().all(|&s| s == 0.25));
        // Suppressed lane still advanced
        assert_eq!(graph.lane(other).unwrap().reader().position(), 2);

        graph.detach_lane(soloed);
        assert!(graph.render(2).iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_disabled_lane_does_not_advance() {
        let mut graph = AudioRenderGraph::new(2);
        let id = Uuid::new_v4();
        graph.attach_lane(id, constant(0.5, 8), 1.0);
        graph.set_enabled(id, false);
        assert!(graph.render(2).iter().all(|&s| s == 0.0));
        assert_eq!(graph.lane(id).unwrap().reader().position(), 0);
    }

    #[test]
    fn test_seek_and_reset() {
        let mut graph = AudioRenderGraph::new(2);
        let id = Uuid::new_v4();
        graph.attach_lane(id, constant(0.5, 8), 1.0);
        graph.seek_all(6);
        assert_eq!(graph.lane(id).unwrap().reader().position(), 6);

        // Past EOF: silence
        graph.render(2);
        assert!(graph.render(2).iter().all(|&s| s == 0.0));

        graph.reset_all();
        assert_eq!(graph.lane(id).unwrap().reader().position(), 0);
    }

    #[test]
    fn test_attach_replaces_same_id() {
        let mut graph = AudioRenderGraph::new(2);
        let id = Uuid::new_v4();
        graph.attach_lane(id, constant(0.5, 8), 1.0);
        graph.attach_lane(id, constant(0.25, 8), 2.0);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.lane(id).unwrap().volume, 1.0);
        assert!(graph.render(2).iter().all(|&s| s == 0.25));
    }

    #[test]
    fn test_larger_block_than_configured() {
        let mut graph = AudioRenderGraph::new(2);
        graph.attach_lane(Uuid::new_v4(), constant(0.5, 8), 1.0);
        assert_eq!(graph.render(6).len(), 12);
    }
}
