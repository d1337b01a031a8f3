// Scheduler - Musical playhead and MIDI lane dispatch
//
// Advanced by a fixed-rate tick on a non-realtime thread. Each tick reads the tempo at
// the playhead, advances it, and fires block starts/ends on every audible MIDI lane.
// Audio lanes are not touched here: the audio clock drives them.

use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::Producer;

use crate::config::SchedulerConfig;
use crate::messaging::channels::EventProducer;
use crate::messaging::event::PlaybackEvent;
use crate::midi::dispatcher::MidiDispatcher;
use crate::project::types::{Lane, LaneId};
use crate::sequencer::tempo_map::TempoMap;
use crate::sequencer::transport::{PlaybackState, Transport};

/// The per-tick advance is normalized to this tempo: at 120 BPM the playhead moves
/// by exactly one tick interval
pub const REFERENCE_BPM: f64 = 120.0;

pub struct Scheduler {
    transport: Transport,
    tempo_map: Arc<TempoMap>,
    lanes: Arc<Vec<Lane>>,
    dispatcher: MidiDispatcher,
    tick_interval: f64,
    snap_to_grid: bool,
    events: EventProducer,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, dispatcher: MidiDispatcher, events: EventProducer) -> Self {
        Self {
            transport: Transport::new(),
            tempo_map: Arc::new(TempoMap::default()),
            lanes: Arc::new(Vec::new()),
            dispatcher,
            tick_interval: config.tick_interval().as_secs_f64(),
            snap_to_grid: config.snap_to_grid,
            events,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.transport.state()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.state().is_playing()
    }

    /// Playhead in seconds
    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_interval)
    }

    pub fn snap_to_grid(&self) -> bool {
        self.snap_to_grid
    }

    pub fn set_snap_to_grid(&mut self, snap: bool) {
        self.snap_to_grid = snap;
    }

    pub fn tempo_map(&self) -> &Arc<TempoMap> {
        &self.tempo_map
    }

    pub fn set_tempo_map(&mut self, tempo_map: Arc<TempoMap>) {
        self.tempo_map = tempo_map;
    }

    pub fn lanes(&self) -> &Arc<Vec<Lane>> {
        &self.lanes
    }

    /// Replace the lane snapshot. Notes from removed blocks or lanes that can no
    /// longer be heard are released.
    pub fn set_lanes(&mut self, lanes: Arc<Vec<Lane>>) {
        self.lanes = lanes;
        self.release_silenced();
    }

    /// Edit one lane of the snapshot (copy on write)
    pub fn update_lane<F>(&mut self, id: LaneId, edit: F) -> bool
    where
        F: FnOnce(&mut Lane),
    {
        let lanes = Arc::make_mut(&mut self.lanes);
        let found = match lanes.iter_mut().find(|lane| lane.id == id) {
            Some(lane) => {
                edit(lane);
                true
            }
            None => false,
        };
        if found {
            self.release_silenced();
        }
        found
    }

    /// Note-off for sounding notes whose block is gone, whose lane is muted or
    /// solo-suppressed, or whose block now plays a different note or channel
    fn release_silenced(&mut self) {
        if self.dispatcher.active_note_count() == 0 {
            return;
        }

        let lanes = Arc::clone(&self.lanes);
        let any_solo = lanes.iter().any(|lane| lane.solo);
        let released = self.dispatcher.release_where(|channel, note, lane_id, block_id| {
            let still_sounding = lanes.iter().any(|lane| {
                lane.id == lane_id
                    && is_audible(lane, any_solo)
                    && lane.as_midi().is_some_and(|midi| {
                        midi.channel() == channel
                            && midi.blocks.iter().any(|block| {
                                block.id == block_id
                                    && block.message().sounding_note() == Some(note)
                            })
                    })
            });
            !still_sounding
        });

        if released > 0 {
            log::debug!("Released {} note(s) after a lane change", released);
        }
    }

    pub fn dispatcher(&self) -> &MidiDispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut MidiDispatcher {
        &mut self.dispatcher
    }

    /// Start from the current position; returns false if already playing
    pub fn play(&mut self) -> bool {
        match self.transport.play() {
            Some(state) => {
                log::info!("Playback started at {:.3}s", self.transport.position());
                self.emit(PlaybackEvent::StateChanged(state));
                true
            }
            None => false,
        }
    }

    /// Pause at the current position
    pub fn halt(&mut self) -> bool {
        match self.transport.halt() {
            Some(state) => {
                log::info!("Playback halted at {:.3}s", self.transport.position());
                self.emit(PlaybackEvent::StateChanged(state));
                true
            }
            None => false,
        }
    }

    /// Stop, rewind to 0 and release every sounding note
    pub fn stop(&mut self) {
        let changed = self.transport.stop();
        self.dispatcher.reset();

        if let Some(state) = changed {
            log::info!("Playback stopped");
            self.emit(PlaybackEvent::StateChanged(state));
        }
        self.emit(PlaybackEvent::PositionChanged(0.0));
    }

    /// Move the playhead (clamped to >= 0, snapped to the nearest beat when enabled)
    /// and forget which blocks fired. Returns the position actually set.
    pub fn set_position(&mut self, position: f64) -> f64 {
        let mut position = if position.is_finite() { position.max(0.0) } else { 0.0 };
        if self.snap_to_grid {
            position = self.tempo_map.nearest_beat(position);
        }

        self.transport.set_position(position);
        self.dispatcher.reset();
        log::debug!("Seek to {:.3}s", self.transport.position());
        self.emit(PlaybackEvent::PositionChanged(self.transport.position()));
        self.transport.position()
    }

    /// Overwrite the playhead with the audio clock's position.
    /// Dispatch state is kept: blocks already fired stay fired.
    pub fn apply_clock_correction(&mut self, position: f64) {
        let previous = self.transport.position();
        self.transport.set_position(position);
        log::debug!(
            "Clock correction {:.3}s -> {:.3}s",
            previous,
            self.transport.position()
        );
        self.emit(PlaybackEvent::PositionChanged(self.transport.position()));
    }

    /// Advance one tick and dispatch lane events at the new position
    pub fn tick(&mut self) {
        if !self.transport.state().is_playing() {
            return;
        }

        let bpm = self.tempo_map.bpm_at(self.transport.position());
        let position = self
            .transport
            .advance(self.tick_interval * bpm / REFERENCE_BPM);
        self.emit(PlaybackEvent::PositionChanged(position));

        self.process_lanes(position);
    }

    /// Starts fire on audible lanes only. Ends also run on silenced lanes for blocks
    /// that already fired, so a note started before a mute is still released.
    fn process_lanes(&mut self, position: f64) {
        let lanes = Arc::clone(&self.lanes);
        let any_solo = lanes.iter().any(|lane| lane.solo);

        for lane in lanes.iter() {
            let Some(midi) = lane.as_midi() else {
                continue;
            };
            let audible = is_audible(lane, any_solo);

            let channel = midi.channel();
            for block in &midi.blocks {
                let end = block.end_time();
                if audible
                    && block.start_time <= position
                    && position < end
                    && !self.dispatcher.has_triggered(lane.id, block.id)
                {
                    self.dispatcher.process_block_start(lane.id, block, channel);
                }
                if position >= end
                    && (audible || self.dispatcher.has_triggered(lane.id, block.id))
                    && !self.dispatcher.has_ended(lane.id, block.id)
                {
                    self.dispatcher.process_block_end(lane.id, block, channel);
                }
            }
        }
    }

    pub fn panic(&mut self) {
        self.dispatcher.panic();
    }

    /// Republish a position report from the audio callback
    pub fn publish_audio_position(&mut self, position: f64) {
        self.emit(PlaybackEvent::AudioPosition(position));
    }

    fn emit(&mut self, event: PlaybackEvent) {
        if let Err(event) = self.events.try_push(event) {
            log::trace!("Event channel full, dropped {:?}", event);
        }
    }
}

/// Soloed lanes only when any lane is soloed; muted lanes never play
fn is_audible(lane: &Lane, any_solo: bool) -> bool {
    !lane.muted && (!any_solo || lane.solo)
}
