// Clock synchronizer - Transport forwarding and drift correction
//
// The audio clock is authoritative. The scheduler's tick-driven playhead is compared
// against it every drift interval and overwritten when they disagree by more than the
// threshold.

use std::time::{Duration, Instant};

use ringbuf::traits::Consumer;

use crate::audio::engine::AudioClock;
use crate::config::SyncConfig;
use crate::messaging::channels::PositionConsumer;
use crate::messaging::command::TransportCommand;

pub struct ClockSynchronizer {
    clock: Box<dyn AudioClock>,
    reports: Option<PositionConsumer>,
    last_reported: Option<f64>,
    drift_interval: Duration,
    threshold: f64,
    /// Armed on play, cleared on halt/stop
    last_check: Option<Instant>,
    playing: bool,
}

impl ClockSynchronizer {
    pub fn new(
        clock: Box<dyn AudioClock>,
        reports: Option<PositionConsumer>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            clock,
            reports,
            last_reported: None,
            drift_interval: config.drift_check_interval(),
            threshold: config.drift_threshold(),
            last_check: None,
            playing: false,
        }
    }

    pub fn clock(&self) -> &dyn AudioClock {
        self.clock.as_ref()
    }

    /// Latest position marshaled from the audio callback
    pub fn last_reported(&self) -> Option<f64> {
        self.last_reported
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn forward(&mut self, command: TransportCommand) {
        log::debug!("Audio clock <- {:?}", command);
        match command {
            TransportCommand::Play(position) => {
                self.clock.start(position);
                self.playing = true;
                self.last_check = None;
            }
            TransportCommand::Halt => {
                self.clock.pause();
                self.playing = false;
                self.last_check = None;
            }
            TransportCommand::Stop => {
                self.clock.stop();
                self.playing = false;
                self.last_check = None;
                self.last_reported = None;
            }
            TransportCommand::Seek(position) => {
                self.clock.seek(position);
                self.last_check = None;
            }
        }
    }

    /// Drain the position reports from the audio callback.
    /// Returns the newest one if any arrived since the last call.
    pub fn drain_reports(&mut self) -> Option<f64> {
        let reports = self.reports.as_mut()?;
        let latest = reports.pop_iter().last();
        if latest.is_some() {
            self.last_reported = latest;
        }
        latest
    }

    /// Once per drift interval while playing, return the audio position if the
    /// scheduler has drifted past the threshold
    pub fn poll(&mut self, now: Instant, scheduler_position: f64) -> Option<f64> {
        let faults = self.clock.take_faults();
        if faults > 0 {
            log::warn!("Audio callback recovered from {} render fault(s)", faults);
        }

        if !self.playing || !self.clock.is_running() {
            return None;
        }

        let Some(last_check) = self.last_check else {
            self.last_check = Some(now);
            return None;
        };
        if now.saturating_duration_since(last_check) < self.drift_interval {
            return None;
        }
        self.last_check = Some(now);

        let audio_position = self.clock.position();
        let drift = (audio_position - scheduler_position).abs();
        if drift > self.threshold {
            log::debug!(
                "Drift {:.1} ms (audio {:.3}s, scheduler {:.3}s)",
                drift * 1000.0,
                audio_position,
                scheduler_position
            );
            Some(audio_position)
        } else {
            None
        }
    }
}
