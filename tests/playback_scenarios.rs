// End-to-end playback with fake devices: MIDI bytes on the wire, audio lanes
// rendered through the clock callback, drift correction against the audio clock

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use quickmidi::audio::clip::{AudioClip, LaneReader};
use quickmidi::audio::engine::AudioClock;
use quickmidi::config::{EngineConfig, SchedulerConfig, SyncConfig};
use quickmidi::error::EngineError;
use quickmidi::messaging::channels::create_event_channel;
use quickmidi::midi::device::{MidiBackend, MidiDeviceInfo, MidiPort};
use quickmidi::{
    ClockSynchronizer, Lane, MidiBlock, MidiDispatcher, PlaybackEvent, PlaybackSession,
    PlaybackState, Scheduler, SessionCore,
};
use ringbuf::traits::Consumer;
use tempfile::TempDir;
use uuid::Uuid;

// ========== Fake MIDI ==========

#[derive(Clone, Default)]
struct Wire {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Wire {
    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

struct WirePort {
    wire: Wire,
    open: bool,
}

impl MidiPort for WirePort {
    fn send(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        if !self.open {
            return Err(EngineError::MidiPortClosed);
        }
        self.wire.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct WireBackend {
    wire: Wire,
}

impl MidiBackend for WireBackend {
    fn enumerate(&self) -> Vec<MidiDeviceInfo> {
        vec![MidiDeviceInfo {
            index: 0,
            name: "Test wire".to_string(),
        }]
    }

    fn open(&self, index: usize) -> Result<Box<dyn MidiPort>, EngineError> {
        if index != 0 {
            return Err(EngineError::MidiPortNotFound(index));
        }
        Ok(Box::new(WirePort {
            wire: self.wire.clone(),
            open: true,
        }))
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.audio.sample_rate = 8_000;
    config.audio.buffer_size = 256;
    config.scheduler.snap_to_grid = false;
    config
}

fn session_with_wire() -> (PlaybackSession, Wire) {
    let wire = Wire::default();
    let mut session = PlaybackSession::new(config());
    session
        .initialize_midi(&WireBackend { wire: wire.clone() })
        .unwrap();
    (session, wire)
}

fn midi_lane(channel: u8, blocks: Vec<MidiBlock>) -> Lane {
    let mut lane = Lane::midi("Gear", channel);
    for block in blocks {
        lane.as_midi_mut().unwrap().add_block(block);
    }
    lane
}

fn ticks(session: &PlaybackSession, count: usize) {
    for _ in 0..count {
        session.tick();
    }
}

// ========== MIDI ==========

#[test]
fn quad_cortex_preset_bytes() {
    let (mut session, wire) = session_with_wire();
    session.set_lanes(vec![midi_lane(1, vec![MidiBlock::quad_cortex_preset(0.0, 1.0, 2, 5, 3)])]);

    session.play();
    ticks(&session, 3);

    assert_eq!(
        wire.take(),
        vec![vec![0xB0, 0, 2], vec![0xC0, 5], vec![0xB0, 43, 3]]
    );
}

#[test]
fn kemper_rig_change_on_channel_three() {
    let (mut session, wire) = session_with_wire();
    session.set_lanes(vec![midi_lane(3, vec![MidiBlock::kemper_rig(0.0, 1.0, 10, 2)])]);

    session.play();
    session.tick();

    assert_eq!(wire.take(), vec![vec![0xB2, 47, 10], vec![0xB2, 51, 1]]);
}

#[test]
fn panic_sends_48_messages() {
    let (session, wire) = session_with_wire();
    session.panic();
    assert_eq!(wire.take().len(), 48);
}

#[test]
fn every_note_on_gets_exactly_one_note_off() {
    let (mut session, wire) = session_with_wire();
    session.set_lanes(vec![midi_lane(1, vec![MidiBlock::note(0.0, 0.5, 64, 100)])]);

    session.play();
    ticks(&session, 5);
    session.halt();
    ticks(&session, 5);
    session.play();
    ticks(&session, 5);
    // Back inside the block: it fires again
    session.set_position(0.1);
    ticks(&session, 40);
    session.halt();
    session.set_position(0.2);
    session.play();
    ticks(&session, 5);
    session.stop();
    ticks(&session, 5);

    let messages = wire.take();
    let mut sounding = false;
    let mut note_ons = 0;
    for message in &messages {
        match message[0] & 0xF0 {
            0x90 => {
                assert!(!sounding, "note-on while sounding: {:?}", messages);
                sounding = true;
                note_ons += 1;
            }
            0x80 => {
                assert!(sounding, "note-off without note-on: {:?}", messages);
                assert_eq!(message[1], 64);
                sounding = false;
            }
            _ => {}
        }
    }
    assert!(!sounding);
    assert_eq!(note_ons, 3);
}

#[test]
fn seek_then_position() {
    let (mut session, wire) = session_with_wire();
    session.set_lanes(vec![midi_lane(1, vec![MidiBlock::program_change(0.0, 10.0, 9)])]);

    session.play();
    session.tick();
    assert_eq!(wire.take(), vec![vec![0xC0, 9]]);

    assert_eq!(session.set_position(3.3), 3.3);
    assert_eq!(session.position(), 3.3);

    // Dispatch state was cleared, so the block fires again
    session.tick();
    assert_eq!(wire.take(), vec![vec![0xC0, 9]]);
}

#[test]
fn seek_snaps_to_the_beat_grid() {
    let mut config = config();
    config.scheduler.snap_to_grid = true;
    let session = PlaybackSession::new(config);

    // Empty tempo map: 120 BPM grid
    assert_eq!(session.set_position(1.1), 1.0);
    assert_eq!(session.set_position(1.3), 1.5);
    assert_eq!(session.set_position(-4.0), 0.0);
}

#[test]
fn muted_midi_lane_is_silent_until_unmuted() {
    let (mut session, wire) = session_with_wire();
    let lane = midi_lane(2, vec![MidiBlock::control_change(0.0, 1.0, 7, 90)]);
    let id = lane.id;
    session.set_lanes(vec![lane]);
    session.set_lane_mute(id, true);

    session.play();
    ticks(&session, 5);
    assert!(wire.take().is_empty());

    session.set_lane_mute(id, false);
    session.tick();
    assert_eq!(wire.take(), vec![vec![0xB1, 7, 90]]);
}

#[test]
fn muting_mid_note_releases_it() {
    let (mut session, wire) = session_with_wire();
    let lane = midi_lane(1, vec![MidiBlock::note(0.0, 0.2, 60, 100)]);
    let id = lane.id;
    session.set_lanes(vec![lane]);

    session.play();
    ticks(&session, 3);
    assert_eq!(wire.take(), vec![vec![0x90, 60, 100]]);

    session.set_lane_mute(id, true);
    assert_eq!(wire.take(), vec![vec![0x80, 60, 0]]);

    // Past the block end: nothing more, and unmuting does not restart it
    ticks(&session, 60);
    session.set_lane_mute(id, false);
    ticks(&session, 3);
    assert!(wire.take().is_empty());
}

#[test]
fn soloing_another_lane_releases_notes() {
    let (mut session, wire) = session_with_wire();
    let keys = midi_lane(4, vec![MidiBlock::note(0.0, 1.0, 67, 80)]);
    let pads = midi_lane(5, Vec::new());
    let pads_id = pads.id;
    session.set_lanes(vec![keys, pads]);

    session.play();
    ticks(&session, 2);
    assert_eq!(wire.take(), vec![vec![0x93, 67, 80]]);

    session.set_lane_solo(pads_id, true);
    assert_eq!(wire.take(), vec![vec![0x83, 67, 0]]);

    ticks(&session, 70);
    assert!(wire.take().is_empty());
}

#[test]
fn removing_a_lane_or_block_mid_note_releases_it() {
    let (mut session, wire) = session_with_wire();
    let held = MidiBlock::note(0.0, 0.5, 62, 90);
    let lane = midi_lane(1, vec![held.clone(), MidiBlock::note(0.0, 0.5, 65, 90)]);
    session.set_lanes(vec![lane.clone()]);

    session.play();
    session.tick();
    assert_eq!(wire.take().len(), 2);

    // The lane loses one block: only that note stops
    let mut edited = lane.clone();
    edited.as_midi_mut().unwrap().remove_block(held.id);
    session.set_lanes(vec![edited]);
    assert_eq!(wire.take(), vec![vec![0x80, 62, 0]]);

    // The lane goes away: the other note stops
    session.set_lanes(Vec::new());
    assert_eq!(wire.take(), vec![vec![0x80, 65, 0]]);

    ticks(&session, 63);
    assert!(wire.take().is_empty());
}

#[test]
fn same_block_on_two_lanes_fires_on_both() {
    let (mut session, wire) = session_with_wire();
    let block = MidiBlock::program_change(0.0, 1.0, 5);
    session.set_lanes(vec![
        midi_lane(1, vec![block.clone()]),
        midi_lane(2, vec![block]),
    ]);

    session.play();
    session.tick();
    assert_eq!(wire.take(), vec![vec![0xC0, 5], vec![0xC1, 5]]);
}

#[test]
fn shutdown_silences_gear() {
    let (mut session, wire) = session_with_wire();
    session.shutdown();

    // All notes off + all sound off on 16 channels
    let messages = wire.take();
    assert_eq!(messages.len(), 32);
    assert!(messages.iter().all(|m| m[0] & 0xF0 == 0xB0));

    session.shutdown();
    assert!(wire.take().is_empty());
}

// ========== Audio ==========

fn write_wav(dir: &TempDir, name: &str, frames: usize, value: f32) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8_000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for _ in 0..frames * 2 {
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn muted_audio_lane_stays_in_sync() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(&dir, "click.wav", 8_000, 0.5);

    let mut session = PlaybackSession::new(config());
    let lane = Lane::audio("Click", Some(path));
    let id = lane.id;
    session.set_lanes(vec![lane]);
    assert!(session.clock().has_lane(id));

    let mut callback = session.audio_callback();
    let mut out = vec![0.0f32; 512];

    session.play();
    session.set_lane_mute(id, true);
    for _ in 0..4 {
        callback.process(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }
    assert_eq!(session.clock().lane_position(id), Some(1024));

    session.set_lane_mute(id, false);
    callback.process(&mut out);
    assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    assert_eq!(session.clock().lane_position(id), Some(1280));
}

#[test]
fn seek_moves_audio_readers() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(&dir, "track.wav", 16_000, 0.25);

    let mut session = PlaybackSession::new(config());
    let lane = Lane::audio("Track", Some(path));
    let id = lane.id;
    session.set_lanes(vec![lane]);

    let mut callback = session.audio_callback();
    let mut out = vec![0.0f32; 512];

    session.play();
    session.set_position(1.5);
    assert!((session.clock().position() - 1.5).abs() < 1e-9);

    callback.process(&mut out);
    assert_eq!(session.clock().lane_position(id), Some(12_000 + 256));

    session.stop();
    callback.process(&mut out);
    assert_eq!(session.clock().lane_position(id), Some(0));
    assert_eq!(session.state(), PlaybackState::Stopped);
}

#[test]
fn unchanged_lanes_keep_their_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(&dir, "keys.wav", 8_000, 0.1);

    let mut session = PlaybackSession::new(config());
    let lane = Lane::audio("Keys", Some(path));
    let id = lane.id;
    session.set_lanes(vec![lane.clone()]);

    let mut callback = session.audio_callback();
    let mut out = vec![0.0f32; 512];
    session.play();
    callback.process(&mut out);

    // Same file: the cursor survives
    session.set_lanes(vec![lane.clone(), midi_lane(1, Vec::new())]);
    assert_eq!(session.clock().lane_position(id), Some(256));

    // Lane removed: detached
    session.set_lanes(Vec::new());
    assert!(!session.clock().has_lane(id));
}

/// Panics on every read
struct BrokenReader;

impl LaneReader for BrokenReader {
    fn read_frames(&mut self, _out: &mut [f32]) -> usize {
        panic!("broken reader");
    }
    fn seek(&mut self, _frame: u64) {}
    fn position(&self) -> u64 {
        0
    }
    fn len_frames(&self) -> u64 {
        0
    }
}

#[test]
fn render_fault_keeps_every_lane_on_the_clock() {
    let session = PlaybackSession::new(config());
    let (first, last) = (Uuid::new_v4(), Uuid::new_v4());
    let clip = || Box::new(AudioClip::from_interleaved(vec![0.2; 16_000], 8_000));
    session.clock().attach_lane(first, clip(), 1.0);
    session.clock().attach_lane(Uuid::new_v4(), Box::new(BrokenReader), 1.0);
    session.clock().attach_lane(last, clip(), 1.0);

    let mut callback = session.audio_callback();
    let mut out = vec![1.0f32; 512];
    session.play();
    for _ in 0..5 {
        callback.process(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    assert_eq!(session.clock().position(), 0.16);
    assert_eq!(session.clock().lane_position(first), Some(1280));
    assert_eq!(session.clock().lane_position(last), Some(1280));
    assert_eq!(session.clock().take_faults(), 5);
}

#[test]
fn audio_position_reports_reach_the_host() {
    let mut session = PlaybackSession::new(config());
    let mut events = session.take_events().unwrap();
    let mut callback = session.audio_callback();
    let mut out = vec![0.0f32; 512];

    session.play();
    // 8 kHz reports every 800 frames; four 256-frame buffers cross it once
    for _ in 0..4 {
        callback.process(&mut out);
    }
    session.tick();

    let reported: Vec<f64> = events
        .pop_iter()
        .filter_map(|event| match event {
            PlaybackEvent::AudioPosition(position) => Some(position),
            _ => None,
        })
        .collect();
    assert_eq!(reported, vec![0.128]);
}

// ========== Drift ==========

#[derive(Clone, Default)]
struct ScriptedClock {
    position: Arc<Mutex<f64>>,
}

impl AudioClock for ScriptedClock {
    fn start(&self, from: f64) {
        *self.position.lock().unwrap() = from;
    }
    fn pause(&self) {}
    fn stop(&self) {
        *self.position.lock().unwrap() = 0.0;
    }
    fn seek(&self, position: f64) {
        *self.position.lock().unwrap() = position;
    }
    fn position(&self) -> f64 {
        *self.position.lock().unwrap()
    }
    fn is_playing(&self) -> bool {
        true
    }
    fn is_running(&self) -> bool {
        true
    }
    fn take_faults(&self) -> u64 {
        0
    }
}

#[test]
fn audio_clock_wins_after_drift() {
    let clock = ScriptedClock::default();
    let (events, _rx) = create_event_channel(256);
    let scheduler = Scheduler::new(&SchedulerConfig::default(), MidiDispatcher::new(), events);
    let synchronizer =
        ClockSynchronizer::new(Box::new(clock.clone()), None, &SyncConfig::default());
    let mut core = SessionCore::new(scheduler, synchronizer);

    let t0 = Instant::now();
    core.play();
    core.tick(t0);
    assert!((core.scheduler().position() - 0.016).abs() < 1e-9);

    // The audio device ran ahead
    *clock.position.lock().unwrap() = 2.0;
    core.tick(t0 + Duration::from_millis(100));
    assert!(core.scheduler().position() < 0.1);

    core.tick(t0 + Duration::from_millis(600));
    assert_eq!(core.scheduler().position(), 2.0);

    // Small drift is left alone
    *clock.position.lock().unwrap() = 2.02;
    core.tick(t0 + Duration::from_millis(1200));
    assert!((core.scheduler().position() - 2.016).abs() < 1e-9);
}

#[test]
fn halted_session_is_not_corrected() {
    let clock = ScriptedClock::default();
    let (events, _rx) = create_event_channel(256);
    let scheduler = Scheduler::new(&SchedulerConfig::default(), MidiDispatcher::new(), events);
    let synchronizer =
        ClockSynchronizer::new(Box::new(clock.clone()), None, &SyncConfig::default());
    let mut core = SessionCore::new(scheduler, synchronizer);

    let t0 = Instant::now();
    core.play();
    core.tick(t0);
    core.halt();
    *clock.position.lock().unwrap() = 9.0;
    core.tick(t0 + Duration::from_secs(1));

    assert_eq!(core.scheduler().state(), PlaybackState::Halted);
    assert!((core.scheduler().position() - 0.016).abs() < 1e-9);
}
