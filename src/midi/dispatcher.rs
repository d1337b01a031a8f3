// MIDI dispatcher - Turns timeline blocks into MIDI output
//
// Tracks which blocks have fired and which notes are sounding so that every
// note-on gets exactly one note-off, even across stop, seek, mute and lane edits.
// Dispatch state is keyed by (lane, block): the same block id on two lanes fires twice.
// Runs on the tick thread only; a missing port drops messages, never fails.

use std::collections::{HashMap, HashSet};

use crate::error::EngineError;
use crate::midi::device::{MidiBackend, MidiPort};
use crate::midi::message::{
    self, CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF, CC_RESET_ALL_CONTROLLERS, MidiMessageKind, RawMidi,
};
use crate::project::types::{BlockId, LaneId, MidiBlock};

/// A block as placed on a particular lane
pub type DispatchKey = (LaneId, BlockId);

pub struct MidiDispatcher {
    port: Option<Box<dyn MidiPort>>,
    triggered: HashSet<DispatchKey>,
    ended: HashSet<DispatchKey>,
    /// (channel 1-16, note) -> lane and block that started it
    active_notes: HashMap<(u8, u8), DispatchKey>,
}

impl MidiDispatcher {
    pub fn new() -> Self {
        Self {
            port: None,
            triggered: HashSet::new(),
            ended: HashSet::new(),
            active_notes: HashMap::new(),
        }
    }

    /// Open `device_index` (or the first port) on `backend`, replacing any open port
    pub fn initialize(
        &mut self,
        backend: &dyn MidiBackend,
        device_index: Option<usize>,
    ) -> Result<(), EngineError> {
        self.close_port();

        let index = match device_index {
            Some(index) => index,
            None => backend.default_device().ok_or(EngineError::NoMidiDevice)?,
        };
        let port = backend.open(index)?;
        self.attach_port(port);
        Ok(())
    }

    pub fn attach_port(&mut self, port: Box<dyn MidiPort>) {
        self.close_port();
        log::info!("MIDI dispatcher using '{}'", port.name());
        self.port = Some(port);
    }

    pub fn is_connected(&self) -> bool {
        self.port.as_ref().is_some_and(|port| port.is_open())
    }

    pub fn has_triggered(&self, lane: LaneId, block: BlockId) -> bool {
        self.triggered.contains(&(lane, block))
    }

    pub fn has_ended(&self, lane: LaneId, block: BlockId) -> bool {
        self.ended.contains(&(lane, block))
    }

    pub fn active_note_count(&self) -> usize {
        self.active_notes.len()
    }

    /// True when no block has fired since the last reset
    pub fn is_clear(&self) -> bool {
        self.triggered.is_empty() && self.ended.is_empty() && self.active_notes.is_empty()
    }

    /// Fire the start of a block. The block counts as triggered even when nothing
    /// could be sent, so a missing port never causes a burst of late messages.
    pub fn process_block_start(&mut self, lane: LaneId, block: &MidiBlock, channel: u8) {
        if !self.triggered.insert((lane, block.id)) {
            return;
        }

        let channel = channel.clamp(1, 16);
        let kind = block.message();
        let mut delivered = true;
        for raw in kind.start_messages(channel) {
            delivered &= self.send(raw);
        }

        match kind {
            MidiMessageKind::NoteOn { note, .. } if delivered => {
                self.active_notes.insert((channel, note), (lane, block.id));
            }
            MidiMessageKind::NoteOff { note, .. } => {
                self.active_notes.remove(&(channel, note));
            }
            _ => {}
        }

        log::debug!("Block '{}' started on channel {}: {:?}", block.name, channel, kind);
    }

    /// Fire the end of a block: note-on blocks release their note if it is still sounding
    pub fn process_block_end(&mut self, lane: LaneId, block: &MidiBlock, channel: u8) {
        if !self.ended.insert((lane, block.id)) {
            return;
        }

        let channel = channel.clamp(1, 16);
        if let Some(note) = block.message().sounding_note()
            && self.active_notes.remove(&(channel, note)).is_some()
        {
            self.send(message::note_off(channel, note));
            log::debug!("Block '{}' released note {} on channel {}", block.name, note, channel);
        }
    }

    /// Note-off for each sounding note whose owner `silenced(channel, note, lane, block)`
    /// rejects. Fired blocks stay fired. Returns the number of notes released.
    pub fn release_where<F>(&mut self, mut silenced: F) -> usize
    where
        F: FnMut(u8, u8, LaneId, BlockId) -> bool,
    {
        let released: Vec<(u8, u8)> = self
            .active_notes
            .iter()
            .filter(|&(&(channel, note), &(lane, block))| silenced(channel, note, lane, block))
            .map(|(&key, _)| key)
            .collect();

        for &(channel, note) in &released {
            self.active_notes.remove(&(channel, note));
            self.send(message::note_off(channel, note));
        }
        released.len()
    }

    /// Note-off for every note started by `lane`
    pub fn release_lane(&mut self, lane: LaneId) -> usize {
        self.release_where(|_, _, owner, _| owner == lane)
    }

    /// Note-off for every sounding note, then forget all dispatch state.
    /// Called on stop and seek.
    pub fn reset(&mut self) {
        let sounding: Vec<(u8, u8)> = self.active_notes.keys().copied().collect();
        for (channel, note) in sounding {
            self.send(message::note_off(channel, note));
        }

        self.active_notes.clear();
        self.triggered.clear();
        self.ended.clear();
    }

    /// All notes off, all sound off and reset controllers on every channel.
    /// Sent regardless of the tracked state.
    pub fn panic(&mut self) {
        log::warn!("MIDI panic");
        for channel in 1..=16 {
            self.send(message::control_change(channel, CC_ALL_NOTES_OFF, 0));
            self.send(message::control_change(channel, CC_ALL_SOUND_OFF, 0));
            self.send(message::control_change(channel, CC_RESET_ALL_CONTROLLERS, 0));
        }
        self.active_notes.clear();
    }

    /// Silence every channel and close the port. Repeated calls are no-ops.
    pub fn close(&mut self) {
        self.close_port();
        self.active_notes.clear();
        self.triggered.clear();
        self.ended.clear();
    }

    fn close_port(&mut self) {
        let Some(mut port) = self.port.take() else {
            return;
        };
        if port.is_open() {
            for channel in 1..=16 {
                let all_notes_off = message::control_change(channel, CC_ALL_NOTES_OFF, 0);
                let all_sound_off = message::control_change(channel, CC_ALL_SOUND_OFF, 0);
                let _ = port.send(all_notes_off.as_bytes());
                let _ = port.send(all_sound_off.as_bytes());
            }
        }
        port.close();
    }

    fn send(&mut self, raw: RawMidi) -> bool {
        let Some(port) = self.port.as_mut() else {
            log::debug!("No MIDI output, dropped {:02X?}", raw.as_bytes());
            return false;
        };

        match port.send(raw.as_bytes()) {
            Ok(()) => {
                log::trace!("MIDI out {:02X?}", raw.as_bytes());
                true
            }
            Err(e) => {
                log::warn!("MIDI send failed on '{}': {}", port.name(), e);
                false
            }
        }
    }
}

impl Default for MidiDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MidiDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}
