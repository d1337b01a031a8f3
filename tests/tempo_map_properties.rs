// Tempo map properties over whole songs

use quickmidi::{SongPart, TempoMap, TimeSignature, Transition};

fn ramp_bpm(start: f64, end: f64, bar: u32, bars: u32) -> f64 {
    start + (end - start) * (bar as f64 / bars as f64).powf(0.52)
}

fn three_part_song() -> TempoMap {
    TempoMap::with_parts(
        120.0,
        vec![
            SongPart::new("A", TimeSignature::four_four(), 120.0, 8, Transition::Instant),
            SongPart::new("B", TimeSignature::four_four(), 140.0, 4, Transition::Gradual),
            SongPart::new("C", TimeSignature::three_four(), 100.0, 2, Transition::Instant),
        ],
    )
}

fn live_set() -> TempoMap {
    TempoMap::with_parts(
        100.0,
        vec![
            SongPart::new("Intro", TimeSignature::six_eight(), 72.0, 4, Transition::Gradual),
            SongPart::new("Verse", TimeSignature::four_four(), 96.0, 8, Transition::Gradual),
            SongPart::new("Break", TimeSignature::three_four(), 180.0, 3, Transition::Instant),
            SongPart::new("Outro", TimeSignature::four_four(), 60.0, 6, Transition::Gradual),
        ],
    )
}

fn sweep(map: &TempoMap, step: f64) -> impl Iterator<Item = f64> {
    let total = map.total_duration();
    (0..).map(move |i| i as f64 * step).take_while(move |t| *t < total)
}

#[test]
fn three_part_scenario() {
    let map = three_part_song();
    let b_duration: f64 = (0..4).map(|bar| 4.0 * 60.0 / ramp_bpm(120.0, 140.0, bar, 4)).sum();

    let parts = map.parts();
    assert!((parts[0].duration() - 16.0).abs() < 1e-9);
    assert!((parts[1].duration() - b_duration).abs() < 1e-9);
    assert!((parts[2].duration() - 3.6).abs() < 1e-9);

    // Boundaries belong to the part that ends there
    assert_eq!(map.bpm_at(16.0), 120.0);
    assert_eq!(map.bpm_at(parts[1].end_time()), 140.0);
    assert_eq!(map.bpm_at(parts[2].start_time() + 1e-6), 100.0);
    assert!((map.total_duration() - (16.0 + b_duration + 3.6)).abs() < 1e-9);
}

#[test]
fn bpm_is_continuous_inside_gradual_parts() {
    let map = live_set();
    for part in map.parts().iter().filter(|part| part.is_ramped()) {
        let step = part.duration() / 1000.0;
        let max_jump = (part.bpm - part.start_bpm()).abs();
        let mut previous = map.bpm_at(part.start_time() + step);
        for i in 2..1000 {
            let bpm = map.bpm_at(part.start_time() + step * i as f64);
            // Steepest at the start of the curve; well below the whole ramp per step
            assert!((bpm - previous).abs() < max_jump * 0.05);
            previous = bpm;
        }
    }
}

#[test]
fn declared_bpm_right_after_instant_transition() {
    let map = live_set();
    let break_part = &map.parts()[2];
    assert_eq!(map.bpm_at(break_part.start_time() + 1e-9), 180.0);
    assert_eq!(map.bpm_at(break_part.end_time() - 1e-9), 180.0);
}

#[test]
fn bpm_holds_past_the_end() {
    let map = live_set();
    let end = map.total_duration();
    assert_eq!(map.bpm_at(end + 30.0), 60.0);
    assert!(
        (map.time_to_beats(end + 2.0) - (map.total_beats() + 2.0)).abs() < 1e-9
    );
}

#[test]
fn nearest_beat_is_idempotent() {
    for map in [three_part_song(), live_set()] {
        for t in sweep(&map, 0.0137) {
            let snapped = map.nearest_beat(t);
            assert_eq!(map.nearest_beat(snapped), snapped, "t = {}", t);
        }
    }
}

#[test]
fn nearest_beat_is_close() {
    let map = live_set();
    let slowest_beat = 60.0 / 60.0;
    for t in sweep(&map, 0.05) {
        assert!((map.nearest_beat(t) - t).abs() <= slowest_beat / 2.0 + 1e-9);
    }
}

#[test]
fn beats_are_monotonic_and_invert() {
    let map = live_set();
    let mut previous = -1.0;
    for t in sweep(&map, 0.01) {
        let beats = map.time_to_beats(t);
        assert!(beats >= previous);
        previous = beats;

        assert!((map.beats_to_time(beats) - t).abs() < 1e-6, "t = {}", t);
    }
}

#[test]
fn editing_a_part_moves_later_parts() {
    let mut map = three_part_song();
    let c_start = map.parts()[2].start_time();

    assert!(map.update_part(0, |part| part.bar_count = 16));
    assert!((map.parts()[0].duration() - 32.0).abs() < 1e-9);
    assert!((map.parts()[2].start_time() - (c_start + 16.0)).abs() < 1e-9);

    map.remove_part(1);
    assert_eq!(map.parts()[1].start_time(), map.parts()[0].end_time());
    assert!(!map.parts()[1].is_ramped());
}

#[test]
fn tempo_map_from_json() {
    let json = r#"{
        "default_bpm": 110,
        "parts": [
            {"name": "Verse", "time_signature": {"numerator": 4, "denominator": 4},
             "bpm": 90, "bar_count": 2},
            {"name": "Chorus", "time_signature": {"numerator": 4, "denominator": 4},
             "bpm": 120, "bar_count": 2, "transition": "gradual"}
        ]
    }"#;
    let map: TempoMap = serde_json::from_str(json).unwrap();

    assert_eq!(map.default_bpm(), 110.0);
    assert!((map.parts()[0].duration() - 16.0 / 3.0).abs() < 1e-9);
    assert!(map.parts()[1].is_ramped());
    assert_eq!(map.parts()[1].start_time(), map.parts()[0].end_time());
}
