// Audio clock driver - Realtime callback and the authoritative playback clock
//
// The frame counter advanced by the audio callback is the master clock of a session.
// One mutex guards {current_frame, pending_seek, playing, graph}; the callback only
// ever try_locks it and outputs silence on contention.
//
// Seeks are queued and applied at the top of the next callback so the readers and
// the counter always move together.
//
// # Stream Limitations
//
// cpal streams are not Send on every platform (CoreAudio), so the driver that owns
// the stream stays on the thread that created it. Other threads use `ClockHandle`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use ringbuf::traits::Producer;

use crate::audio::clip::LaneReader;
use crate::audio::device::{AudioBackend, OutputStream, StreamRequest};
use crate::audio::mixer::AudioRenderGraph;
use crate::connection::status::{AtomicDeviceStatus, DeviceStatus};
use crate::error::EngineError;
use crate::messaging::channels::{
    NotificationProducer, PositionConsumer, PositionProducer, create_position_channel,
};
use crate::messaging::notification::{Notification, NotificationCategory};
use crate::project::types::LaneId;

/// Position reports per second sent to the scheduler thread
const REPORTS_PER_SECOND: u64 = 10;
const POSITION_CHANNEL_CAPACITY: usize = 64;

/// Transport surface of the audio clock, as seen by the synchronizer
pub trait AudioClock: Send {
    /// Queue a seek to `from` and start playing
    fn start(&self, from: f64);

    /// Stop advancing, keep the position
    fn pause(&self);

    /// Stop and rewind every lane to 0
    fn stop(&self);

    /// Queue a seek; `position()` reports the target immediately
    fn seek(&self, position: f64);

    /// Clock position in seconds
    fn position(&self) -> f64;

    fn is_playing(&self) -> bool;

    /// True while a hardware stream is delivering callbacks
    fn is_running(&self) -> bool;

    /// Realtime faults since the last call
    fn take_faults(&self) -> u64;
}

/// State shared between the callback and control threads
pub struct ClockShared {
    current_frame: u64,
    pending_seek: Option<u64>,
    playing: bool,
    graph: AudioRenderGraph,
}

/// Cloneable, Send access to the clock for non-realtime threads
#[derive(Clone)]
pub struct ClockHandle {
    shared: Arc<Mutex<ClockShared>>,
    sample_rate: u32,
    faults: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl ClockHandle {
    fn lock(&self) -> MutexGuard<'_, ClockShared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn to_frames(&self, seconds: f64) -> u64 {
        if seconds.is_finite() && seconds > 0.0 {
            (seconds * self.sample_rate as f64).round() as u64
        } else {
            0
        }
    }

    fn to_seconds(&self, frames: u64) -> f64 {
        frames as f64 / self.sample_rate as f64
    }

    /// Attach a lane reader aligned to the current clock position
    pub fn attach_lane(&self, id: LaneId, mut reader: Box<dyn LaneReader>, volume: f32) {
        let mut shared = self.lock();
        let frame = shared.pending_seek.unwrap_or(shared.current_frame);
        reader.seek(frame);
        shared.graph.attach_lane(id, reader, volume);
    }

    pub fn detach_lane(&self, id: LaneId) -> bool {
        self.lock().graph.detach_lane(id)
    }

    pub fn clear_lanes(&self) {
        self.lock().graph.clear();
    }

    pub fn has_lane(&self, id: LaneId) -> bool {
        self.lock().graph.contains(id)
    }

    pub fn lane_ids(&self) -> Vec<LaneId> {
        self.lock().graph.lane_ids().collect()
    }

    pub fn set_lane_volume(&self, id: LaneId, volume: f32) {
        self.lock().graph.set_volume(id, volume);
    }

    pub fn set_lane_mute(&self, id: LaneId, muted: bool) {
        self.lock().graph.set_mute(id, muted);
    }

    pub fn set_lane_solo(&self, id: LaneId, solo: bool) {
        self.lock().graph.set_solo(id, solo);
    }

    pub fn set_lane_enabled(&self, id: LaneId, enabled: bool) {
        self.lock().graph.set_enabled(id, enabled);
    }

    /// Reader cursor of a lane, in frames
    pub fn lane_position(&self, id: LaneId) -> Option<u64> {
        self.lock().graph.lane(id).map(|state| state.reader().position())
    }
}

impl AudioClock for ClockHandle {
    fn start(&self, from: f64) {
        let frame = self.to_frames(from);
        let mut shared = self.lock();
        shared.pending_seek = Some(frame);
        shared.playing = true;
    }

    fn pause(&self) {
        self.lock().playing = false;
    }

    fn stop(&self) {
        let mut shared = self.lock();
        shared.playing = false;
        shared.pending_seek = None;
        shared.current_frame = 0;
        shared.graph.reset_all();
    }

    fn seek(&self, position: f64) {
        let frame = self.to_frames(position);
        self.lock().pending_seek = Some(frame);
    }

    fn position(&self) -> f64 {
        let shared = self.lock();
        self.to_seconds(shared.pending_seek.unwrap_or(shared.current_frame))
    }

    fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn take_faults(&self) -> u64 {
        self.faults.swap(0, Ordering::Relaxed)
    }
}

/// The body of the realtime callback, independent of the audio backend
pub struct ClockCallback {
    shared: Arc<Mutex<ClockShared>>,
    faults: Arc<AtomicU64>,
    positions: Arc<Mutex<PositionProducer>>,
    sample_rate: u32,
    report_interval: u64,
    frames_since_report: u64,
}

impl ClockCallback {
    /// Fill `out` (interleaved stereo) and advance the clock
    pub fn process(&mut self, out: &mut [f32]) {
        // ========== SACRED ZONE ==========
        // No allocations, No I/O, No blocking locks
        // A panicking reader is caught below, but the process panic hook still runs on
        // this thread first. Hosts that care should install a quiet hook.
        let mut shared = match self.shared.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                out.fill(0.0);
                return;
            }
        };

        if let Some(frame) = shared.pending_seek.take() {
            shared.current_frame = frame;
            shared.graph.seek_all(frame);
            self.frames_since_report = 0;
        }

        if !shared.playing {
            out.fill(0.0);
            return;
        }

        let frames = out.len() / 2;
        let rendered = catch_unwind(AssertUnwindSafe(|| {
            let block = shared.graph.render(frames);
            let (head, tail) = out.split_at_mut(block.len());
            head.copy_from_slice(block);
            tail.fill(0.0);
        }));
        if rendered.is_err() {
            out.fill(0.0);
            self.faults.fetch_add(1, Ordering::Relaxed);
            // Lanes after the faulting one never advanced
            let frame = shared.current_frame + frames as u64;
            shared.graph.seek_all(frame);
        }

        shared.current_frame += frames as u64;
        let position = shared.current_frame as f64 / self.sample_rate as f64;
        drop(shared);

        self.frames_since_report += frames as u64;
        if self.frames_since_report >= self.report_interval {
            self.frames_since_report = 0;
            if let Ok(mut tx) = self.positions.try_lock() {
                let _ = tx.try_push(position);
            }
        }
        // ========== SACRED ZONE END ==========
    }
}

/// Owns the output stream and the shared clock state
pub struct AudioClockDriver {
    handle: ClockHandle,
    stream: Option<Box<dyn OutputStream>>,
    positions_tx: Arc<Mutex<PositionProducer>>,
    positions_rx: Option<PositionConsumer>,
    status: AtomicDeviceStatus,
    buffer_size: u32,
}

impl AudioClockDriver {
    pub fn new(sample_rate: u32, buffer_size: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        let shared = ClockShared {
            current_frame: 0,
            pending_seek: None,
            playing: false,
            graph: AudioRenderGraph::new(buffer_size as usize),
        };
        let (positions_tx, positions_rx) = create_position_channel(POSITION_CHANNEL_CAPACITY);

        Self {
            handle: ClockHandle {
                shared: Arc::new(Mutex::new(shared)),
                sample_rate,
                faults: Arc::new(AtomicU64::new(0)),
                running: Arc::new(AtomicBool::new(false)),
            },
            stream: None,
            positions_tx: Arc::new(Mutex::new(positions_tx)),
            positions_rx: Some(positions_rx),
            status: AtomicDeviceStatus::default(),
            buffer_size,
        }
    }

    pub fn handle(&self) -> ClockHandle {
        self.handle.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.handle.sample_rate
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.get()
    }

    pub fn status_handle(&self) -> AtomicDeviceStatus {
        self.status.clone()
    }

    /// Consumer side of the position reports; handed out once
    pub fn take_position_reports(&mut self) -> Option<PositionConsumer> {
        self.positions_rx.take()
    }

    /// A callback bound to this driver's clock. The stream gets one of these;
    /// offline renderers and tests can drive one directly.
    pub fn callback(&self) -> ClockCallback {
        let sample_rate = self.handle.sample_rate;
        ClockCallback {
            shared: Arc::clone(&self.handle.shared),
            faults: Arc::clone(&self.handle.faults),
            positions: Arc::clone(&self.positions_tx),
            sample_rate,
            report_interval: (sample_rate as u64 / REPORTS_PER_SECOND).max(1),
            frames_since_report: 0,
        }
    }

    /// Open the output device and start the callback.
    /// Any open stream is closed first, so this also recovers from a failed device.
    pub fn initialize(
        &mut self,
        backend: &dyn AudioBackend,
        device_index: Option<usize>,
        notifications: Option<Arc<Mutex<NotificationProducer>>>,
    ) -> Result<(), EngineError> {
        self.close();
        self.status.set(DeviceStatus::Opening);

        let request = StreamRequest {
            device_index,
            sample_rate: self.handle.sample_rate,
            buffer_size: self.buffer_size,
        };

        let mut callback = self.callback();
        let status = self.status.clone();
        let running = Arc::clone(&self.handle.running);
        let on_error = Box::new(move |err: String| {
            // ========== ERROR CALLBACK ==========
            // Runs outside the render path, logging is fine here
            log::error!("Audio stream error: {}", err);
            status.set(DeviceStatus::Failed);
            running.store(false, Ordering::Relaxed);

            if let Some(tx) = notifications.as_ref()
                && let Ok(mut tx) = tx.try_lock()
            {
                let notif = Notification::error(
                    NotificationCategory::Audio,
                    format!("Audio stream error: {}", err),
                );
                let _ = tx.try_push(notif);
            }
        });

        let opened = backend
            .open(request, Box::new(move |out| callback.process(out)), on_error)
            .and_then(|mut stream| stream.play().map(|_| stream));

        match opened {
            Ok(stream) => {
                self.stream = Some(stream);
                self.handle.running.store(true, Ordering::Relaxed);
                self.status.set(DeviceStatus::Ready);
                log::info!(
                    "Audio clock running: {} Hz, {} frames per buffer",
                    self.handle.sample_rate,
                    self.buffer_size
                );
                Ok(())
            }
            Err(e) => {
                self.status.set(DeviceStatus::Failed);
                log::error!("Audio initialization failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| stream.is_open())
    }

    pub fn start(&self, from: f64) {
        self.handle.start(from);
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn pause(&self) {
        self.handle.pause();
    }

    pub fn seek(&self, position: f64) {
        self.handle.seek(position);
    }

    pub fn position(&self) -> f64 {
        self.handle.position()
    }

    pub fn is_playing(&self) -> bool {
        self.handle.is_playing()
    }

    pub fn attach_lane(&self, id: LaneId, reader: Box<dyn LaneReader>, volume: f32) {
        self.handle.attach_lane(id, reader, volume);
    }

    pub fn detach_lane(&self, id: LaneId) -> bool {
        self.handle.detach_lane(id)
    }

    pub fn set_lane_volume(&self, id: LaneId, volume: f32) {
        self.handle.set_lane_volume(id, volume);
    }

    pub fn set_lane_mute(&self, id: LaneId, muted: bool) {
        self.handle.set_lane_mute(id, muted);
    }

    pub fn set_lane_solo(&self, id: LaneId, solo: bool) {
        self.handle.set_lane_solo(id, solo);
    }

    pub fn set_lane_enabled(&self, id: LaneId, enabled: bool) {
        self.handle.set_lane_enabled(id, enabled);
    }

    /// Close the stream. Repeated calls are no-ops.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.handle.running.store(false, Ordering::Relaxed);
        if self.status.get() != DeviceStatus::Failed {
            self.status.set(DeviceStatus::Unavailable);
        }
    }
}

impl Drop for AudioClockDriver {
    fn drop(&mut self) {
        self.close();
    }
}
