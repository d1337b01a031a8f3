// MIDI message kinds sent by timeline blocks and their wire bytes

/// Channel voice status bytes
pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;

/// Channel mode controllers
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_RESET_ALL_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Device specific controllers
pub const CC_BANK_SELECT: u8 = 0;
pub const CC_BANK_SELECT_LSB: u8 = 32;
pub const CC_KEMPER_BANK: u8 = 47;
pub const CC_KEMPER_SLOT_BASE: u8 = 49;
pub const CC_QUAD_CORTEX_SCENE: u8 = 43;

/// A single MIDI message, up to three bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMidi {
    bytes: [u8; 3],
    len: u8,
}

impl RawMidi {
    pub fn two(status: u8, data: u8) -> Self {
        Self {
            bytes: [status, data & 0x7F, 0],
            len: 2,
        }
    }

    pub fn three(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            bytes: [status, data1 & 0x7F, data2 & 0x7F],
            len: 3,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Convert a 1-16 channel number to the 0-15 nibble
#[inline]
pub fn channel_nibble(channel: u8) -> u8 {
    channel.clamp(1, 16) - 1
}

/// Typed form of a MIDI block, matched exhaustively by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessageKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    ProgramChange { program: u8 },
    ControlChange { controller: u8, value: u8 },
    /// Kemper Profiler: bank select CC47, then CC(49 + slot) = 1
    KemperRigChange { bank: u8, slot: u8 },
    /// TC-Helicon VoiceLive 3: bank select LSB, then program change
    VoiceLivePreset { bank: u8, patch: u8 },
    /// Neural DSP Quad Cortex: bank select, program change, scene CC43
    QuadCortexPreset { bank: u8, preset: u8, scene: u8 },
}

impl MidiMessageKind {
    /// Messages emitted when the block starts, in send order.
    /// `channel` is 1-16.
    pub fn start_messages(&self, channel: u8) -> Vec<RawMidi> {
        let ch = channel_nibble(channel);
        match *self {
            MidiMessageKind::NoteOn { note, velocity } => {
                vec![RawMidi::three(NOTE_ON | ch, note, velocity)]
            }
            MidiMessageKind::NoteOff { note, velocity } => {
                vec![RawMidi::three(NOTE_OFF | ch, note, velocity)]
            }
            MidiMessageKind::ProgramChange { program } => {
                vec![RawMidi::two(PROGRAM_CHANGE | ch, program)]
            }
            MidiMessageKind::ControlChange { controller, value } => {
                vec![RawMidi::three(CONTROL_CHANGE | ch, controller, value)]
            }
            MidiMessageKind::KemperRigChange { bank, slot } => vec![
                RawMidi::three(CONTROL_CHANGE | ch, CC_KEMPER_BANK, bank),
                RawMidi::three(CONTROL_CHANGE | ch, CC_KEMPER_SLOT_BASE + slot.clamp(1, 5), 1),
            ],
            MidiMessageKind::VoiceLivePreset { bank, patch } => vec![
                RawMidi::three(CONTROL_CHANGE | ch, CC_BANK_SELECT_LSB, bank),
                RawMidi::two(PROGRAM_CHANGE | ch, patch),
            ],
            MidiMessageKind::QuadCortexPreset { bank, preset, scene } => vec![
                RawMidi::three(CONTROL_CHANGE | ch, CC_BANK_SELECT, bank),
                RawMidi::two(PROGRAM_CHANGE | ch, preset),
                RawMidi::three(CONTROL_CHANGE | ch, CC_QUAD_CORTEX_SCENE, scene),
            ],
        }
    }

    /// Note released by this message kind when its block ends
    pub fn sounding_note(&self) -> Option<u8> {
        match *self {
            MidiMessageKind::NoteOn { note, .. } => Some(note),
            _ => None,
        }
    }
}

pub fn note_off(channel: u8, note: u8) -> RawMidi {
    RawMidi::three(NOTE_OFF | channel_nibble(channel), note, 0)
}

pub fn control_change(channel: u8, controller: u8, value: u8) -> RawMidi {
    RawMidi::three(CONTROL_CHANGE | channel_nibble(channel), controller, value)
}
