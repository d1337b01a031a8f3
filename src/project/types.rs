// Types for the performance project: lanes, MIDI blocks and the song structure

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::midi::message::MidiMessageKind;
use crate::sequencer::tempo_map::TempoMap;

/// Lane identifier
pub type LaneId = Uuid;

/// MIDI block identifier
pub type BlockId = Uuid;

fn new_id() -> Uuid {
    Uuid::new_v4()
}

fn default_volume() -> f32 {
    1.0
}

fn default_channel() -> u8 {
    1
}

fn default_block_duration() -> f64 {
    1.0
}

fn default_value2() -> u8 {
    127
}

fn default_block_name() -> String {
    "MIDI Block".to_string()
}

fn default_project_name() -> String {
    "Untitled Project".to_string()
}

/// A timeline lane: audio file playback or a list of MIDI blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    #[serde(default = "new_id")]
    pub id: LaneId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(flatten)]
    pub kind: LaneKind,
}

/// Lane payload, tagged `"type": "audio" | "midi"` in JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LaneKind {
    Audio(AudioLane),
    Midi(MidiLane),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioLane {
    #[serde(default)]
    pub audio_file_path: Option<PathBuf>,
    /// Gain in [0, 1]
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for AudioLane {
    fn default() -> Self {
        Self {
            audio_file_path: None,
            volume: default_volume(),
        }
    }
}

impl AudioLane {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            audio_file_path: path,
            volume: default_volume(),
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
    }
}

pub(crate) fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiLane {
    /// MIDI channel, 1-16
    #[serde(default = "default_channel")]
    pub midi_channel: u8,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default, alias = "midi_blocks")]
    pub blocks: Vec<MidiBlock>,
}

impl Default for MidiLane {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MidiLane {
    pub fn new(channel: u8) -> Self {
        let channel = channel.clamp(1, 16);
        Self {
            midi_channel: channel,
            channel_name: format!("Channel {}", channel),
            blocks: Vec::new(),
        }
    }

    pub fn set_midi_channel(&mut self, channel: u8, channel_name: &str) {
        self.midi_channel = channel.clamp(1, 16);
        self.channel_name = if channel_name.is_empty() {
            format!("Channel {}", self.midi_channel)
        } else {
            channel_name.to_string()
        };
    }

    /// Channel as stored, clamped to 1-16
    pub fn channel(&self) -> u8 {
        self.midi_channel.clamp(1, 16)
    }

    pub fn add_block(&mut self, block: MidiBlock) -> BlockId {
        let id = block.id;
        self.blocks.push(block);
        id
    }

    pub fn remove_block(&mut self, id: BlockId) -> Option<MidiBlock> {
        let index = self.blocks.iter().position(|block| block.id == id)?;
        Some(self.blocks.remove(index))
    }
}

impl Lane {
    pub fn audio(name: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::with_kind(name, LaneKind::Audio(AudioLane::new(path)))
    }

    pub fn midi(name: impl Into<String>, channel: u8) -> Self {
        Self::with_kind(name, LaneKind::Midi(MidiLane::new(channel)))
    }

    fn with_kind(name: impl Into<String>, kind: LaneKind) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            muted: false,
            solo: false,
            kind,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioLane> {
        match &self.kind {
            LaneKind::Audio(audio) => Some(audio),
            LaneKind::Midi(_) => None,
        }
    }

    pub fn as_midi(&self) -> Option<&MidiLane> {
        match &self.kind {
            LaneKind::Midi(midi) => Some(midi),
            LaneKind::Audio(_) => None,
        }
    }

    pub fn as_midi_mut(&mut self) -> Option<&mut MidiLane> {
        match &mut self.kind {
            LaneKind::Midi(midi) => Some(midi),
            LaneKind::Audio(_) => None,
        }
    }
}

/// Block message type, serialized with the project file tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MidiMessageType {
    #[serde(rename = "NOTE_ON")]
    NoteOn,
    #[serde(rename = "NOTE_OFF")]
    NoteOff,
    #[serde(rename = "PC")]
    ProgramChange,
    #[default]
    #[serde(rename = "CC")]
    ControlChange,
    #[serde(rename = "KEMPER_RIG_CHANGE")]
    KemperRigChange,
    #[serde(rename = "VOICELIVE3_PRESET")]
    VoiceLivePreset,
    #[serde(rename = "QUAD_CORTEX_PRESET")]
    QuadCortexPreset,
}

impl MidiMessageType {
    /// Inclusive (min, max) for value1, value2 and value3
    pub fn value_ranges(&self) -> [(u8, u8); 3] {
        match self {
            MidiMessageType::NoteOn | MidiMessageType::NoteOff => [(0, 127), (0, 127), (0, 0)],
            MidiMessageType::ProgramChange => [(0, 127), (0, 0), (0, 0)],
            MidiMessageType::ControlChange => [(0, 127), (0, 127), (0, 0)],
            MidiMessageType::KemperRigChange => [(0, 124), (1, 5), (0, 0)],
            MidiMessageType::VoiceLivePreset => [(0, 3), (0, 127), (0, 0)],
            MidiMessageType::QuadCortexPreset => [(0, 15), (0, 127), (0, 7)],
        }
    }
}

/// A timed MIDI action on a MIDI lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiBlock {
    #[serde(default = "new_id")]
    pub id: BlockId,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default = "default_block_duration")]
    pub duration: f64,
    #[serde(default)]
    pub message_type: MidiMessageType,
    #[serde(default)]
    pub value1: u8,
    #[serde(default = "default_value2")]
    pub value2: u8,
    #[serde(default)]
    pub value3: u8,
    #[serde(default = "default_block_name")]
    pub name: String,
}

impl MidiBlock {
    pub fn new(start_time: f64, duration: f64) -> Self {
        Self {
            id: new_id(),
            start_time,
            duration,
            message_type: MidiMessageType::default(),
            value1: 0,
            value2: default_value2(),
            value3: 0,
            name: default_block_name(),
        }
    }

    pub fn note(start_time: f64, duration: f64, note: u8, velocity: u8) -> Self {
        let mut block = Self::new(start_time, duration);
        block.set_message(MidiMessageType::NoteOn, note, velocity, 0);
        block
    }

    pub fn note_off(start_time: f64, duration: f64, note: u8, velocity: u8) -> Self {
        let mut block = Self::new(start_time, duration);
        block.set_message(MidiMessageType::NoteOff, note, velocity, 0);
        block
    }

    pub fn program_change(start_time: f64, duration: f64, program: u8) -> Self {
        let mut block = Self::new(start_time, duration);
        block.set_message(MidiMessageType::ProgramChange, program, 0, 0);
        block
    }

    pub fn control_change(start_time: f64, duration: f64, controller: u8, value: u8) -> Self {
        let mut block = Self::new(start_time, duration);
        block.set_message(MidiMessageType::ControlChange, controller, value, 0);
        block
    }

    pub fn kemper_rig(start_time: f64, duration: f64, bank: u8, slot: u8) -> Self {
        let mut block = Self::new(start_time, duration);
        block.set_message(MidiMessageType::KemperRigChange, bank, slot, 0);
        block
    }

    pub fn voicelive_preset(start_time: f64, duration: f64, bank: u8, patch: u8) -> Self {
        let mut block = Self::new(start_time, duration);
        block.set_message(MidiMessageType::VoiceLivePreset, bank, patch, 0);
        block
    }

    pub fn quad_cortex_preset(
        start_time: f64,
        duration: f64,
        bank: u8,
        preset: u8,
        scene: u8,
    ) -> Self {
        let mut block = Self::new(start_time, duration);
        block.set_message(MidiMessageType::QuadCortexPreset, bank, preset, scene);
        block
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set type and values; values are clamped to the type's ranges
    pub fn set_message(&mut self, message_type: MidiMessageType, value1: u8, value2: u8, value3: u8) {
        let [r1, r2, r3] = message_type.value_ranges();
        self.message_type = message_type;
        self.value1 = value1.clamp(r1.0, r1.1);
        self.value2 = value2.clamp(r2.0, r2.1);
        self.value3 = value3.clamp(r3.0, r3.1);
    }

    /// End time; a negative duration counts as zero
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration.max(0.0)
    }

    /// Typed message with values clamped to their ranges
    pub fn message(&self) -> MidiMessageKind {
        let [r1, r2, r3] = self.message_type.value_ranges();
        let v1 = self.value1.clamp(r1.0, r1.1);
        let v2 = self.value2.clamp(r2.0, r2.1);
        let v3 = self.value3.clamp(r3.0, r3.1);

        match self.message_type {
            MidiMessageType::NoteOn => MidiMessageKind::NoteOn { note: v1, velocity: v2 },
            MidiMessageType::NoteOff => MidiMessageKind::NoteOff { note: v1, velocity: v2 },
            MidiMessageType::ProgramChange => MidiMessageKind::ProgramChange { program: v1 },
            MidiMessageType::ControlChange => MidiMessageKind::ControlChange {
                controller: v1,
                value: v2,
            },
            MidiMessageType::KemperRigChange => MidiMessageKind::KemperRigChange { bank: v1, slot: v2 },
            MidiMessageType::VoiceLivePreset => MidiMessageKind::VoiceLivePreset { bank: v1, patch: v2 },
            MidiMessageType::QuadCortexPreset => MidiMessageKind::QuadCortexPreset {
                bank: v1,
                preset: v2,
                scene: v3,
            },
        }
    }
}

/// Project: what the session plays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default = "default_project_name", alias = "project_name")]
    pub name: String,
    #[serde(default)]
    pub lanes: Vec<Lane>,
    #[serde(default)]
    pub tempo_map: TempoMap,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lanes: Vec::new(),
            tempo_map: TempoMap::default(),
        }
    }

    pub fn audio_lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.iter().filter(|lane| lane.as_audio().is_some())
    }

    pub fn midi_lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.iter().filter(|lane| lane.as_midi().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_values_are_clamped() {
        let rig = MidiBlock::kemper_rig(0.0, 1.0, 200, 9);
        assert_eq!(rig.value1, 124);
        assert_eq!(rig.value2, 5);

        let qc = MidiBlock::quad_cortex_preset(0.0, 1.0, 20, 200, 9);
        assert_eq!((qc.value1, qc.value2, qc.value3), (15, 127, 7));

        let vl = MidiBlock::voicelive_preset(0.0, 1.0, 7, 12);
        assert_eq!(vl.value1, 3);
    }

    #[test]
    fn test_message_clamps_raw_values() {
        let mut block = MidiBlock::new(0.0, 1.0);
        block.message_type = MidiMessageType::KemperRigChange;
        block.value1 = 3;
        block.value2 = 0;
        assert_eq!(block.message(), MidiMessageKind::KemperRigChange { bank: 3, slot: 1 });
    }

    #[test]
    fn test_negative_duration_counts_as_zero() {
        let block = MidiBlock::new(4.0, -2.0);
        assert_eq!(block.end_time(), 4.0);
    }

    #[test]
    fn test_channel_is_clamped() {
        let mut lane = MidiLane::new(0);
        assert_eq!(lane.midi_channel, 1);
        lane.set_midi_channel(40, "");
        assert_eq!(lane.channel(), 16);
        assert_eq!(lane.channel_name, "Channel 16");
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut lane = AudioLane::default();
        lane.set_volume(1.7);
        assert_eq!(lane.volume, 1.0);
        lane.set_volume(f32::NAN);
        assert_eq!(lane.volume, 0.0);
    }

    #[test]
    fn test_lane_json_shape() {
        let json = r#"{
            "project_name": "Live set",
            "lanes": [
                {"type": "audio", "name": "Backing", "audio_file_path": "backing.wav", "volume": 0.8},
                {"type": "midi", "name": "Kemper", "midi_channel": 2,
                 "midi_blocks": [{"start_time": 1.0, "duration": 0.5, "message_type": "PC", "value1": 12}]}
            ]
        }"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.name, "Live set");
        assert_eq!(project.lanes.len(), 2);
        assert_eq!(project.audio_lanes().count(), 1);

        let midi = project.lanes[1].as_midi().unwrap();
        assert_eq!(midi.channel(), 2);
        assert_eq!(midi.blocks[0].message_type, MidiMessageType::ProgramChange);
        assert_eq!(midi.blocks[0].value2, 127);
        assert_eq!(midi.blocks[0].name, "MIDI Block");
        assert_eq!(midi.blocks[0].message(), MidiMessageKind::ProgramChange { program: 12 });
    }

    #[test]
    fn test_message_type_tags() {
        let json = serde_json::to_string(&MidiMessageType::QuadCortexPreset).unwrap();
        assert_eq!(json, "\"QUAD_CORTEX_PRESET\"");
        let parsed: MidiMessageType = serde_json::from_str("\"VOICELIVE3_PRESET\"").unwrap();
        assert_eq!(parsed, MidiMessageType::VoiceLivePreset);
    }
}
