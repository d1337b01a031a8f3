// Playback session - Owns every engine object of one performance
//
// Two threads touch a session: the realtime audio callback (through the clock driver)
// and the tick thread (through `SessionCore`). Transport commands from the host lock
// the same core, so a stop or seek and its dispatch reset never interleave with a tick.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::clip::AudioClip;
use crate::audio::device::AudioBackend;
use crate::audio::engine::{AudioClockDriver, ClockCallback, ClockHandle};
use crate::config::EngineConfig;
use crate::connection::status::{AtomicDeviceStatus, DeviceStatus};
use crate::error::EngineError;
use crate::messaging::channels::{
    EventConsumer, NotificationConsumer, NotificationProducer, create_event_channel,
    create_notification_channel,
};
use crate::messaging::command::TransportCommand;
use crate::messaging::notification::{Notification, NotificationCategory, notify};
use crate::midi::device::MidiBackend;
use crate::midi::dispatcher::MidiDispatcher;
use crate::project::types::{Lane, LaneId, LaneKind, Project};
use crate::sequencer::scheduler::Scheduler;
use crate::sequencer::tempo_map::TempoMap;
use crate::sequencer::transport::PlaybackState;
use crate::sync::synchronizer::ClockSynchronizer;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Scheduler plus synchronizer, locked together by the tick thread and the host
pub struct SessionCore {
    scheduler: Scheduler,
    synchronizer: ClockSynchronizer,
}

impl SessionCore {
    pub fn new(scheduler: Scheduler, synchronizer: ClockSynchronizer) -> Self {
        Self {
            scheduler,
            synchronizer,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn synchronizer(&self) -> &ClockSynchronizer {
        &self.synchronizer
    }

    /// Audio position reports are published, then one scheduler tick runs,
    /// then the drift check
    pub fn tick(&mut self, now: Instant) {
        if let Some(position) = self.synchronizer.drain_reports() {
            self.scheduler.publish_audio_position(position);
        }
        self.scheduler.tick();
        if !self.scheduler.is_playing() {
            return;
        }
        if let Some(position) = self.synchronizer.poll(now, self.scheduler.position()) {
            self.scheduler.apply_clock_correction(position);
        }
    }

    pub fn play(&mut self) {
        if self.scheduler.play() {
            let position = self.scheduler.position();
            self.synchronizer.forward(TransportCommand::Play(position));
        }
    }

    pub fn halt(&mut self) {
        if self.scheduler.halt() {
            self.synchronizer.forward(TransportCommand::Halt);
        }
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.synchronizer.forward(TransportCommand::Stop);
    }

    pub fn set_position(&mut self, position: f64) -> f64 {
        let position = self.scheduler.set_position(position);
        self.synchronizer.forward(TransportCommand::Seek(position));
        position
    }
}

fn lock_core(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PlaybackSession {
    config: EngineConfig,
    driver: AudioClockDriver,
    clock: ClockHandle,
    core: Arc<Mutex<SessionCore>>,
    events: Option<EventConsumer>,
    notifications_tx: Arc<Mutex<NotificationProducer>>,
    notifications_rx: Option<NotificationConsumer>,
    midi_status: AtomicDeviceStatus,
    /// Audio lanes attached to the clock, with the file they play
    loaded_files: HashMap<LaneId, PathBuf>,
    tick_thread: Option<JoinHandle<()>>,
    tick_running: Arc<AtomicBool>,
    shut_down: bool,
}

impl PlaybackSession {
    pub fn new(config: EngineConfig) -> Self {
        let mut driver =
            AudioClockDriver::new(config.audio.sample_rate, config.audio.buffer_size);
        let clock = driver.handle();

        let (events_tx, events_rx) = create_event_channel(EVENT_CHANNEL_CAPACITY);
        let (notifications_tx, notifications_rx) =
            create_notification_channel(NOTIFICATION_CHANNEL_CAPACITY);

        let scheduler = Scheduler::new(&config.scheduler, MidiDispatcher::new(), events_tx);
        let synchronizer = ClockSynchronizer::new(
            Box::new(clock.clone()),
            driver.take_position_reports(),
            &config.sync,
        );

        Self {
            config,
            driver,
            clock,
            core: Arc::new(Mutex::new(SessionCore::new(scheduler, synchronizer))),
            events: Some(events_rx),
            notifications_tx: Arc::new(Mutex::new(notifications_tx)),
            notifications_rx: Some(notifications_rx),
            midi_status: AtomicDeviceStatus::default(),
            loaded_files: HashMap::new(),
            tick_thread: None,
            tick_running: Arc::new(AtomicBool::new(false)),
            shut_down: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        lock_core(&self.core)
    }

    fn notify(&self, notification: Notification) {
        let mut tx = self
            .notifications_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        notify(&mut tx, notification);
    }

    // ========== Devices ==========

    /// Open the configured audio output (the default one if it is gone).
    /// On failure the session keeps running without audio.
    pub fn initialize_audio(&mut self, backend: &dyn AudioBackend) -> Result<(), EngineError> {
        let mut device_index = self.config.audio.device_index;
        if let Some(index) = device_index
            && !backend.enumerate().iter().any(|device| device.index == index)
        {
            log::warn!("Audio device {} not available, using default", index);
            device_index = None;
        }

        let notifications = Some(Arc::clone(&self.notifications_tx));
        match self.driver.initialize(backend, device_index, notifications) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.notify(Notification::error(
                    NotificationCategory::Audio,
                    format!("Audio output unavailable: {}", e),
                ));
                Err(e)
            }
        }
    }

    /// Open the configured MIDI output (the first port if it is gone).
    /// On failure MIDI blocks are dropped silently.
    pub fn initialize_midi(&mut self, backend: &dyn MidiBackend) -> Result<(), EngineError> {
        self.midi_status.set(DeviceStatus::Opening);

        let mut device_index = self.config.midi.device_index;
        if let Some(index) = device_index
            && !backend.enumerate().iter().any(|device| device.index == index)
        {
            log::warn!("MIDI device {} not available, using first port", index);
            device_index = None;
        }

        let result = self
            .core()
            .scheduler_mut()
            .dispatcher_mut()
            .initialize(backend, device_index);

        match result {
            Ok(()) => {
                self.midi_status.set(DeviceStatus::Ready);
                Ok(())
            }
            Err(e) => {
                log::error!("MIDI initialization failed: {}", e);
                self.midi_status.set(DeviceStatus::Failed);
                self.notify(Notification::error(
                    NotificationCategory::Midi,
                    format!("MIDI output unavailable: {}", e),
                ));
                Err(e)
            }
        }
    }

    pub fn audio_status(&self) -> DeviceStatus {
        self.driver.status()
    }

    pub fn midi_status(&self) -> DeviceStatus {
        self.midi_status.get()
    }

    /// Drives the audio clock without a device (offline rendering, tests)
    pub fn audio_callback(&self) -> ClockCallback {
        self.driver.callback()
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    // ========== Project data ==========

    /// Replace the lane snapshot. Audio lanes whose file did not change keep their
    /// reader and cursor; new or changed files are loaded and attached.
    pub fn set_lanes(&mut self, lanes: Vec<Lane>) {
        let sample_rate = self.driver.sample_rate();

        let stale: Vec<LaneId> = self
            .loaded_files
            .iter()
            .filter(|(id, path)| {
                !lanes.iter().any(|lane| {
                    lane.id == **id
                        && lane
                            .as_audio()
                            .and_then(|audio| audio.audio_file_path.as_ref())
                            == Some(*path)
                })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.clock.detach_lane(id);
            self.loaded_files.remove(&id);
        }

        for lane in &lanes {
            let LaneKind::Audio(audio) = &lane.kind else {
                continue;
            };
            let Some(path) = audio.audio_file_path.as_ref() else {
                continue;
            };

            if !self.loaded_files.contains_key(&lane.id) {
                match AudioClip::load(path, sample_rate) {
                    Ok(clip) => {
                        log::info!(
                            "Lane '{}': {} ({:.2}s)",
                            lane.name,
                            path.display(),
                            clip.metadata().duration
                        );
                        self.clock.attach_lane(lane.id, Box::new(clip), audio.volume);
                        self.loaded_files.insert(lane.id, path.clone());
                    }
                    Err(e) => {
                        log::warn!("Lane '{}' has no audio: {}", lane.name, e);
                        self.notify(Notification::warning(
                            NotificationCategory::Project,
                            format!("Could not load {}: {}", path.display(), e),
                        ));
                        continue;
                    }
                }
            }

            self.clock.set_lane_volume(lane.id, audio.volume);
            self.clock.set_lane_mute(lane.id, lane.muted);
            self.clock.set_lane_solo(lane.id, lane.solo);
        }

        self.core().scheduler_mut().set_lanes(Arc::new(lanes));
    }

    pub fn set_tempo_map(&mut self, tempo_map: TempoMap) {
        self.core().scheduler_mut().set_tempo_map(Arc::new(tempo_map));
    }

    /// Swap in a whole project: playback stops and every lane is attached from scratch
    pub fn load_project(&mut self, project: Project) {
        self.stop();
        self.clock.clear_lanes();
        self.loaded_files.clear();

        log::info!("Session project: '{}'", project.name);
        self.set_tempo_map(project.tempo_map);
        self.set_lanes(project.lanes);
    }

    pub fn lanes(&self) -> Arc<Vec<Lane>> {
        Arc::clone(self.core().scheduler().lanes())
    }

    pub fn tempo_map(&self) -> Arc<TempoMap> {
        Arc::clone(self.core().scheduler().tempo_map())
    }

    pub fn set_lane_volume(&mut self, id: LaneId, volume: f32) {
        let mut applied = None;
        self.core().scheduler_mut().update_lane(id, |lane| {
            if let LaneKind::Audio(audio) = &mut lane.kind {
                audio.set_volume(volume);
                applied = Some(audio.volume);
            }
        });
        if let Some(volume) = applied {
            self.clock.set_lane_volume(id, volume);
        }
    }

    pub fn set_lane_mute(&mut self, id: LaneId, muted: bool) {
        self.core().scheduler_mut().update_lane(id, |lane| lane.muted = muted);
        self.clock.set_lane_mute(id, muted);
    }

    pub fn set_lane_solo(&mut self, id: LaneId, solo: bool) {
        self.core().scheduler_mut().update_lane(id, |lane| lane.solo = solo);
        self.clock.set_lane_solo(id, solo);
    }

    // ========== Transport ==========

    pub fn play(&self) {
        self.core().play();
    }

    pub fn halt(&self) {
        self.core().halt();
    }

    pub fn stop(&self) {
        self.core().stop();
    }

    /// Returns the position actually set (clamped, possibly snapped)
    pub fn set_position(&self, position: f64) -> f64 {
        self.core().set_position(position)
    }

    pub fn position(&self) -> f64 {
        self.core().scheduler().position()
    }

    pub fn state(&self) -> PlaybackState {
        self.core().scheduler().state()
    }

    /// Tick once from the calling thread
    pub fn tick(&self) {
        self.core().tick(Instant::now());
    }

    pub fn panic(&self) {
        log::warn!("MIDI panic");
        self.core().scheduler_mut().panic();
    }

    /// Consumer for position/state events; handed out once
    pub fn take_events(&mut self) -> Option<EventConsumer> {
        self.events.take()
    }

    pub fn take_notifications(&mut self) -> Option<NotificationConsumer> {
        self.notifications_rx.take()
    }

    // ========== Tick loop ==========

    pub fn is_tick_loop_running(&self) -> bool {
        self.tick_thread.is_some()
    }

    /// Tick on a dedicated thread every configured interval.
    /// A late tick delays the next one by a full interval.
    pub fn start_tick_loop(&mut self) -> Result<(), EngineError> {
        if self.tick_thread.is_some() {
            return Ok(());
        }

        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.tick_running);
        let interval = self.config.scheduler.tick_interval();
        running.store(true, Ordering::Relaxed);

        let handle = thread::Builder::new()
            .name("quickmidi-tick".to_string())
            .spawn(move || tick_loop(core, running, interval));

        match handle {
            Ok(handle) => {
                log::debug!("Tick loop started ({:?})", interval);
                self.tick_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.tick_running.store(false, Ordering::Relaxed);
                Err(EngineError::Io(e))
            }
        }
    }

    pub fn stop_tick_loop(&mut self) {
        self.tick_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.tick_thread.take() {
            if handle.join().is_err() {
                log::error!("Tick thread panicked");
            }
            log::debug!("Tick loop stopped");
        }
    }

    /// Stop everything and release the devices. Repeated calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.stop_tick_loop();
        {
            let mut core = self.core();
            core.stop();
            core.scheduler_mut().dispatcher_mut().close();
        }
        self.midi_status.set(DeviceStatus::Unavailable);
        self.driver.close();
        log::info!("Session shut down");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tick_loop(core: Arc<Mutex<SessionCore>>, running: Arc<AtomicBool>, interval: Duration) {
    let mut deadline = Instant::now() + interval;

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }

        let now = Instant::now();
        lock_core(&core).tick(now);

        deadline += interval;
        let now = Instant::now();
        if deadline < now {
            deadline = now + interval;
        }
    }
}
