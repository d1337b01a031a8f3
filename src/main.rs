// QuickMIDI headless player
//
// Usage: quickmidi <project.json> [config.json]
// Plays the song once through the default (or configured) devices and exits.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use quickmidi::audio::device::AudioBackend;
use quickmidi::midi::device::MidiBackend;
use quickmidi::project::load_project;
use quickmidi::{
    CpalBackend, EngineConfig, MidirBackend, PlaybackEvent, PlaybackSession, PlaybackState,
};
use ringbuf::traits::Consumer;

/// Log the position at most this often
const POSITION_LOG_INTERVAL: f64 = 1.0;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(project_path) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: quickmidi <project.json> [config.json]");
        std::process::exit(2);
    };

    let config_path = args.next().map(PathBuf::from).or_else(EngineConfig::default_path);
    let mut config = match config_path.as_ref() {
        Some(path) => EngineConfig::load_or_default(path),
        None => EngineConfig::default(),
    };

    let project = match load_project(&project_path) {
        Ok(project) => project,
        Err(e) => {
            log::error!("Cannot load {}: {}", project_path.display(), e);
            std::process::exit(1);
        }
    };

    let audio_backend = CpalBackend::new();
    let midi_backend = MidirBackend::new();

    let audio_devices = audio_backend.enumerate();
    let midi_devices = midi_backend.enumerate();
    for device in &audio_devices {
        log::info!("Audio output {}: {}", device.index, device.name);
    }
    for device in &midi_devices {
        log::info!("MIDI output {}: {}", device.index, device.name);
    }
    config.validate_devices(&audio_devices, &midi_devices);

    let mut session = PlaybackSession::new(config);
    if let Err(e) = session.initialize_audio(&audio_backend) {
        log::warn!("Continuing without audio: {}", e);
    }
    if let Err(e) = session.initialize_midi(&midi_backend) {
        log::warn!("Continuing without MIDI: {}", e);
    }

    let total = project.tempo_map.total_duration();
    session.load_project(project);

    let Some(mut events) = session.take_events() else {
        log::error!("Event channel already taken");
        std::process::exit(1);
    };
    let mut notifications = session.take_notifications();

    if let Err(e) = session.start_tick_loop() {
        log::error!("Cannot start tick loop: {}", e);
        std::process::exit(1);
    }
    session.play();

    let tempo_map = session.tempo_map();
    let mut last_logged = f64::NEG_INFINITY;
    let mut position = 0.0;
    loop {
        thread::sleep(POLL_INTERVAL);

        while let Some(event) = events.try_pop() {
            match event {
                PlaybackEvent::PositionChanged(p) => position = p,
                PlaybackEvent::StateChanged(state) => log::info!("State: {:?}", state),
                PlaybackEvent::AudioPosition(p) => log::trace!("Audio clock at {:.3}s", p),
            }
        }
        if let Some(rx) = notifications.as_mut() {
            while let Some(notification) = rx.try_pop() {
                log::warn!("{}", notification);
            }
        }

        if position - last_logged >= POSITION_LOG_INTERVAL {
            last_logged = position;
            log::info!(
                "{:>8.2}s  {}  {:.1} BPM",
                position,
                tempo_map.musical_time_at(position),
                tempo_map.bpm_at(position)
            );
        }

        if session.state() != PlaybackState::Playing || (total > 0.0 && position >= total) {
            break;
        }
    }

    session.shutdown();
}
