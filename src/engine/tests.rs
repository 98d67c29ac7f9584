// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::provider::{AudioSection, Instrument, MemoryProvider, ProviderId};

const RATE: u32 = 48000;

/// A looped DC section.
fn dc(value: f32) -> AudioSection {
    AudioSection::mono(RATE, vec![value; 4800])
        .and_then(|section| section.with_loop(0, 4800))
        .unwrap()
}

fn steady(value: f32) -> MemoryProvider {
    MemoryProvider::new()
        .with_attack(0, dc(value))
        .with_velocity_sensitive(false)
}

fn setup(windchests: usize) -> EngineSetup {
    let mut setup = EngineSetup::new(RATE, 256, windchests);
    setup.settings.interpolation = InterpolationType::Linear;
    setup
}

fn engine(setup: &EngineSetup, providers: Vec<MemoryProvider>) -> (SoundEngine, Vec<ProviderId>) {
    let mut instrument = Instrument::new();
    let ids = providers.into_iter().map(|p| instrument.add(p)).collect();
    (SoundEngine::new(setup, Arc::new(instrument)).unwrap(), ids)
}

fn start(engine: &SoundEngine, provider: ProviderId, group: i32) -> SamplerHandle {
    engine
        .start_sample(provider, group, 0, 127, Duration::ZERO)
        .unwrap()
        .unwrap()
}

/// Renders `frames` stereo frames of output 0.
fn render(engine: &SoundEngine, frames: usize) -> Vec<f32> {
    let mut buffer = vec![0.0; frames * 2];
    engine.get_samples(&mut buffer, frames);
    buffer
}

fn left(buffer: &[f32]) -> Vec<f32> {
    buffer.iter().step_by(2).copied().collect()
}

#[test]
fn test_get_samples_renders_exact_frame_count() {
    let (engine, ids) = engine(&setup(1), vec![steady(0.5)]);
    start(&engine, ids[0], 1);

    let mut buffer = vec![9.0; 2200];
    engine.get_samples(&mut buffer, 1000);
    assert_eq!(engine.current_time(), 1000);
    assert!(buffer[..2000].iter().all(|s| *s == 0.5));
    assert!(buffer[2000..].iter().all(|s| *s == 9.0));
}

#[test]
fn test_stop_before_onset_is_silent() {
    let (engine, ids) = engine(&setup(1), vec![steady(1.0)]);
    let handle = engine
        .start_sample(ids[0], 1, 0, 127, Duration::from_millis(100))
        .unwrap()
        .unwrap();
    assert_eq!(engine.voice_state(handle), Some(VoiceState::Starting));
    engine.stop_sample(ids[0], handle);

    let out = render(&engine, 9600);
    assert!(out.iter().all(|s| *s == 0.0));
    assert_eq!(engine.active_voices(), 0);
    assert_eq!(engine.voice_state(handle), None);
}

#[test]
fn test_polyphony_stays_within_hard_limit() {
    let mut setup = setup(1);
    setup.hard_polyphony = 8;
    let (engine, ids) = engine(&setup, vec![steady(0.01)]);

    for _ in 0..40 {
        for _ in 0..3 {
            engine
                .start_sample(ids[0], 1, 0, 100, Duration::ZERO)
                .unwrap();
        }
        let mut buffer = vec![0.0; 512];
        let info = engine.get_samples(&mut buffer, 256);
        assert!(info.current_polyphony <= 8);
        assert!(engine.active_voices() <= 8);
    }
}

#[test]
fn test_release_envelope_is_monotonic() {
    let (engine, ids) = engine(&setup(1), vec![steady(1.0).with_midi_key(60)]);
    let handle = start(&engine, ids[0], 1);
    render(&engine, 2048);
    engine.stop_sample(ids[0], handle);

    let out = left(&render(&engine, 9600));
    assert_eq!(out[0], 1.0);
    for pair in out.windows(2) {
        assert!(pair[1] <= pair[0], "{} rose to {}", pair[0], pair[1]);
    }
    assert_eq!(*out.last().unwrap(), 0.0);
    assert_eq!(engine.active_voices(), 0);
}

#[test]
fn test_switch_crossfade_has_no_step() {
    let (engine, ids) = engine(&setup(1), vec![steady(1.0), steady(0.5)]);
    let handle = start(&engine, ids[0], 1);
    let before = left(&render(&engine, 512));
    engine.switch_sample(ids[1], handle).unwrap();
    let after = left(&render(&engine, 4800));

    // 30 ms crossfade from 1.0 to 0.5.
    let step = 0.5 / 1440.0 + 1e-4;
    let mut previous = *before.last().unwrap();
    for sample in &after {
        assert!((sample - previous).abs() <= step, "{previous} -> {sample}");
        previous = *sample;
    }
    assert!((after.last().unwrap() - 0.5).abs() < 1e-4);
    assert!(engine.voice_state(handle).is_some_and(VoiceState::is_held));
    assert_eq!(engine.active_voices(), 1);
}

#[test]
fn test_fifth_start_steals_the_quietest_voice() {
    let mut setup = setup(1);
    setup.hard_polyphony = 4;
    let provider = MemoryProvider::new().with_attack(0, dc(0.1));
    let (engine, ids) = engine(&setup, vec![provider]);

    let handles: Vec<_> = [100, 40, 80, 60]
        .into_iter()
        .map(|velocity| {
            engine
                .start_sample(ids[0], 1, 0, velocity, Duration::ZERO)
                .unwrap()
                .unwrap()
        })
        .collect();
    render(&engine, 256);
    assert_eq!(engine.active_voices(), 4);

    let quietest = handles[1];
    let fifth = start(&engine, ids[0], 1);
    assert_eq!(fifth.index(), quietest.index());
    assert_eq!(engine.voice_state(fifth), Some(VoiceState::Starting));

    render(&engine, 256);
    assert_eq!(engine.voice_state(quietest), Some(VoiceState::ForcedRelease));
    assert_eq!(engine.active_voices(), 4);
    for handle in [handles[0], handles[2], handles[3]] {
        assert_eq!(engine.voice_state(handle), Some(VoiceState::Sustaining));
    }

    render(&engine, 2048);
    assert_eq!(engine.voice_state(quietest), None);
    assert_eq!(engine.voice_state(fifth), Some(VoiceState::Sustaining));
    assert_eq!(engine.active_voices(), 4);
}

#[test]
fn test_two_audio_groups_at_half_gain_stay_in_range() {
    let mut setup = setup(1);
    setup.audio_groups = 2;
    setup.outputs = vec![AudioOutputSetup {
        scale_factors: vec![vec![0.5, 0.0, 0.5, 0.0], vec![0.0, 0.5, 0.0, 0.5]],
    }];
    let (engine, ids) = engine(&setup, vec![steady(1.0)]);
    for audio_group in 0..2 {
        engine
            .start_sample(ids[0], 1, audio_group, 127, Duration::ZERO)
            .unwrap();
    }

    let mut buffer = vec![0.0; 2048];
    let info = engine.get_samples(&mut buffer, 1024);
    assert!(buffer.iter().all(|s| s.abs() <= 1.0));
    assert_eq!(info.meter_left, 1.0);
    assert_eq!(info.meter_right, 1.0);
    assert_eq!(info.current_polyphony, 2);
}

#[test]
fn test_silence_in_silence_out() {
    let mut setup = setup(2);
    setup.reverb = Some(ReverbSetup::default());
    let (engine, ids) = engine(&setup, vec![steady(0.0)]);
    for group in 0..3 {
        start(&engine, ids[0], group);
    }

    let out = render(&engine, 4096);
    assert!(out.iter().all(|s| *s == 0.0));
    assert_eq!(engine.meter().meter_left, 0.0);
}

#[test]
fn test_tremulant_modulates_only_its_windchest() {
    let mut setup = setup(0);
    setup.tremulants = vec![TremulantSetup::default()];
    setup.windchests = vec![
        WindchestSetup {
            volume_db: 0.0,
            tremulants: vec![0],
        },
        WindchestSetup::default(),
    ];
    setup.audio_groups = 2;
    setup.outputs = vec![AudioOutputSetup {
        scale_factors: vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 0.0, 1.0, 0.0]],
    }];
    let (engine, ids) = engine(&setup, vec![steady(0.5)]);
    engine
        .start_sample(ids[0], 1, 0, 127, Duration::ZERO)
        .unwrap();
    engine
        .start_sample(ids[0], 2, 1, 127, Duration::ZERO)
        .unwrap();
    engine.set_tremulant(0, true).unwrap();

    let out = render(&engine, RATE as usize / 2);
    let modulated = left(&out);
    let (low, high) = modulated
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    assert!(high - low > 0.05, "tremulant range {low}..{high}");
    assert!(out.iter().skip(1).step_by(2).all(|s| *s == 0.5));
    assert_eq!(engine.tremulant_state(0), Some(TremulantState::Steady));

    assert!(matches!(
        engine.start_sample(ids[0], -2, 0, 127, Duration::ZERO),
        Err(EngineError::UnknownGroup(-2))
    ));
    assert!(matches!(
        engine.set_tremulant(1, true),
        Err(EngineError::UnknownTremulant(1))
    ));
}

#[test]
fn test_tremulant_group_voices_follow_the_tremulant() {
    let mut setup = setup(1);
    setup.tremulants = vec![TremulantSetup::default()];
    let (engine, ids) = engine(&setup, vec![steady(0.5)]);
    start(&engine, ids[0], -1);
    engine.set_tremulant(0, true).unwrap();

    let out = left(&render(&engine, RATE as usize / 2));
    assert!(out.iter().any(|s| (s - 0.5).abs() > 0.02));
}

#[test]
fn test_one_shot_ignores_stop() {
    let section = AudioSection::mono(RATE, vec![0.25; 4800]).unwrap();
    let provider = MemoryProvider::new()
        .with_attack(0, section)
        .with_velocity_sensitive(false)
        .with_one_shot(true);
    let (engine, ids) = engine(&setup(1), vec![provider]);
    let handle = start(&engine, ids[0], 1);
    engine.stop_sample(ids[0], handle);

    let out = left(&render(&engine, 2400));
    assert!(out.iter().all(|s| *s == 0.25));
    assert_eq!(engine.voice_state(handle), Some(VoiceState::Sustaining));

    render(&engine, 4800);
    assert_eq!(engine.voice_state(handle), None);
    assert_eq!(engine.active_voices(), 0);
}

#[test]
fn test_stale_handle_is_ignored() {
    let mut setup = setup(1);
    setup.hard_polyphony = 1;
    let (engine, ids) = engine(&setup, vec![steady(1.0)]);

    let old = start(&engine, ids[0], 1);
    render(&engine, 512);
    engine.stop_sample(ids[0], old);
    render(&engine, 9600);
    assert_eq!(engine.voice_state(old), None);

    let new = start(&engine, ids[0], 1);
    assert_eq!(new.index(), old.index());
    assert_ne!(new.generation(), old.generation());

    engine.stop_sample(ids[0], old);
    engine.update_velocity(old, 1);
    let out = left(&render(&engine, 2048));
    assert!(out.iter().all(|s| *s == 1.0));
    assert_eq!(engine.voice_state(new), Some(VoiceState::Sustaining));
}

#[test]
fn test_update_velocity_ramps_level() {
    let provider = MemoryProvider::new().with_attack(0, dc(1.0));
    let (engine, ids) = engine(&setup(1), vec![provider]);
    let handle = start(&engine, ids[0], 1);
    render(&engine, 256);
    engine.update_velocity(handle, 0);

    let out = left(&render(&engine, 960));
    // 10 ms ramp.
    assert!(out[0] > 0.9);
    assert!(out[479] < out[0]);
    assert_eq!(*out.last().unwrap(), 0.0);
    assert_eq!(engine.voice_state(handle), Some(VoiceState::Sustaining));
}

#[test]
fn test_short_notes_release_quieter() {
    let release = AudioSection::mono(RATE, vec![1.0; RATE as usize * 2]).unwrap();
    let provider = steady(1.0).with_release(None, release);

    let level_after = |held: usize| {
        let (engine, ids) = engine(&setup(1), vec![provider.clone()]);
        let handle = start(&engine, ids[0], 1);
        render(&engine, held);
        engine.stop_sample(ids[0], handle);
        let out = left(&render(&engine, 1920));
        *out.last().unwrap()
    };

    let short = level_after(4800);
    let long = level_after(RATE as usize * 2);
    assert!(short < 0.7, "short release level {short}");
    assert!(long > 0.95, "long release level {long}");
}

#[test]
fn test_unscaled_release_keeps_level() {
    let release = AudioSection::mono(RATE, vec![1.0; RATE as usize]).unwrap();
    let mut setup = setup(1);
    setup.settings.scaled_releases = false;
    let (engine, ids) = engine(&setup, vec![steady(1.0).with_release(None, release)]);
    let handle = start(&engine, ids[0], 1);
    render(&engine, 4800);
    engine.stop_sample(ids[0], handle);

    let out = left(&render(&engine, 1920));
    assert!((out.last().unwrap() - 1.0).abs() < 1e-4);
    assert_eq!(engine.voice_state(handle), None);
    assert_eq!(engine.active_voices(), 1, "the release tail holds a slot");
}

#[test]
fn test_stop_all_silences_everything() {
    let (engine, ids) = engine(&setup(2), vec![steady(0.2)]);
    for group in 1..=2 {
        start(&engine, ids[0], group);
    }
    render(&engine, 512);
    engine.stop_all();

    let out = render(&engine, 4800);
    assert_eq!(out[out.len() - 1], 0.0);
    assert_eq!(engine.active_voices(), 0);
}

#[test]
fn test_windchest_volume_scales_voices() {
    let (engine, ids) = engine(&setup(2), vec![steady(1.0)]);
    engine.set_windchest_volume(0, -6.0).unwrap();
    start(&engine, ids[0], 1);

    let out = left(&render(&engine, 256));
    assert!((out[100] - 0.501).abs() < 0.01);
    assert!(matches!(
        engine.set_windchest_volume(2, 0.0),
        Err(EngineError::UnknownWindchest(2))
    ));
    assert!(engine.set_windchest_volume(0, 100.0).is_err());
}

#[test]
fn test_control_errors() {
    let (engine, ids) = engine(&setup(1), vec![steady(1.0)]);
    assert!(matches!(
        engine.start_sample(ProviderId(9), 1, 0, 127, Duration::ZERO),
        Err(EngineError::UnknownProvider(_))
    ));
    assert!(matches!(
        engine.start_sample(ids[0], 1, 3, 127, Duration::ZERO),
        Err(EngineError::UnknownAudioGroup(3))
    ));
    assert!(matches!(engine.start_sample(ids[0], 1, 0, 0, Duration::ZERO), Ok(None)));
    assert!(engine.set_volume(50).is_err());
    assert!(engine.set_polyphony_soft_limit(0).is_err());
    assert!(engine.set_release_length(Duration::from_secs(120)).is_err());

    let mut buffer = vec![1.0; 64];
    engine.begin_period(32);
    assert_eq!(engine.get_audio_output(1, &mut buffer), 0);
    assert_eq!(engine.get_audio_output(0, &mut buffer), 32);
    engine.finish_period();
}

#[test]
fn test_settings_round_trip() {
    let (engine, _) = engine(&setup(1), vec![]);
    engine.set_volume(-6).unwrap();
    engine.set_steal_policy(StealPolicy::OldestFirst);
    engine.set_release_fade(FadeShape::Exponential);
    engine.set_randomize_speaking(true);
    engine.set_polyphony_soft_limit(100).unwrap();

    let settings = engine.settings();
    assert_eq!(settings.volume_db, -6);
    assert_eq!(settings.steal_policy, StealPolicy::OldestFirst);
    assert_eq!(settings.release_fade, FadeShape::Exponential);
    assert!(settings.randomize_speaking);
    assert_eq!(settings.polyphony_soft_limit, Some(100));
}

#[test]
fn test_work_items_processed_individually() {
    let (engine, ids) = engine(&setup(1), vec![steady(0.5)]);
    start(&engine, ids[0], 1);

    engine.begin_period(128);
    for index in 0..engine.work_item_count() {
        assert!(engine.process_work_item(index), "item {index}");
    }
    assert!(!engine.process_work_item(0), "items run once per period");
    let mut buffer = vec![0.0; 256];
    assert_eq!(engine.get_audio_output(0, &mut buffer), 128);
    engine.finish_period();
    assert!(buffer.iter().all(|s| *s == 0.5));
}

#[test]
fn test_cancelled_parked_onset_handle_stays_stale() {
    let mut setup = setup(1);
    setup.hard_polyphony = 1;
    let (engine, ids) = engine(&setup, vec![steady(1.0)]);

    start(&engine, ids[0], 1);
    render(&engine, 256);
    let parked = start(&engine, ids[0], 1);
    assert_eq!(engine.voice_state(parked), Some(VoiceState::Starting));

    engine.stop_all();
    assert_eq!(engine.voice_state(parked), None);
    render(&engine, 4800);
    assert_eq!(engine.active_voices(), 0);

    let next = start(&engine, ids[0], 1);
    assert_eq!(next.index(), parked.index());
    assert_ne!(next, parked);

    engine.stop_sample(ids[0], parked);
    engine.update_velocity(parked, 0);
    let out = left(&render(&engine, 2048));
    assert!(out[1024..].iter().all(|s| *s == 1.0));
    assert_eq!(engine.voice_state(next), Some(VoiceState::Sustaining));
    assert_eq!(engine.voice_state(parked), None);
}

/// A unit sine with a period of 96 frames.
fn sine(frames: usize) -> AudioSection {
    let data = (0..frames)
        .map(|i| (i as f32 * std::f32::consts::TAU / 96.0).sin())
        .collect();
    AudioSection::mono(RATE, data).unwrap().with_period(96.0)
}

/// Smallest per-cycle peak over the first 20 ms after a stop mid-cycle.
fn release_crossfade_peak(aligned: bool) -> f32 {
    let mut setup = setup(1);
    setup.settings.scaled_releases = false;
    setup.settings.release_alignment = aligned;
    let provider = MemoryProvider::new()
        .with_attack(0, sine(9600).with_loop(0, 9600).unwrap())
        .with_release(None, sine(RATE as usize))
        .with_velocity_sensitive(false);
    let (engine, ids) = engine(&setup, vec![provider]);

    let handle = start(&engine, ids[0], 1);
    render(&engine, 4830);
    engine.stop_sample(ids[0], handle);

    left(&render(&engine, 960))
        .chunks(96)
        .map(|cycle| cycle.iter().fold(0.0f32, |peak, s| peak.max(s.abs())))
        .fold(f32::INFINITY, f32::min)
}

#[test]
fn test_release_alignment_keeps_phase() {
    let aligned = release_crossfade_peak(true);
    let unaligned = release_crossfade_peak(false);
    assert!(aligned > 0.99, "aligned peak {aligned}");
    assert!(unaligned < 0.9, "unaligned peak {unaligned}");
}

/// An engine holding a note with a long flat release, stopped by the caller.
fn held_release(
    settings: impl FnOnce(&mut EngineSettings),
) -> (SoundEngine, ProviderId, SamplerHandle) {
    let release = AudioSection::mono(RATE, vec![1.0; RATE as usize * 2]).unwrap();
    let mut setup = setup(1);
    setup.settings.scaled_releases = false;
    settings(&mut setup.settings);
    let (engine, ids) = engine(&setup, vec![steady(1.0).with_release(None, release)]);
    let handle = start(&engine, ids[0], 1);
    render(&engine, 4800);
    (engine, ids[0], handle)
}

#[test]
fn test_release_length_shortens_tails() {
    let (engine, id, handle) = held_release(|settings| {
        settings.release_length = Duration::from_millis(100);
    });
    engine.stop_sample(id, handle);

    let out = left(&render(&engine, 9600));
    // Half way through a 100 ms linear decay.
    assert!(out[2400] < 0.75, "level {}", out[2400]);
    assert_eq!(*out.last().unwrap(), 0.0);
    assert_eq!(engine.active_voices(), 0);
}

#[test]
fn test_exponential_release_is_monotonic() {
    let (engine, id, handle) = held_release(|settings| {
        settings.release_length = Duration::from_millis(200);
        settings.release_fade = FadeShape::Exponential;
    });
    engine.stop_sample(id, handle);

    let out = left(&render(&engine, 19200));
    assert!((out[0] - 1.0).abs() < 1e-4);
    for pair in out.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-6, "{} rose to {}", pair[0], pair[1]);
    }
    // Exponential decays fall fast early on.
    assert!(out[4800] < 0.1, "level {}", out[4800]);
    assert_eq!(*out.last().unwrap(), 0.0);
    assert_eq!(engine.active_voices(), 0);
}

#[test]
fn test_randomized_speaking_stays_within_hard_limit() {
    let mut setup = setup(1);
    setup.hard_polyphony = 8;
    setup.settings.randomize_speaking = true;
    let (engine, ids) = engine(&setup, vec![steady(0.01)]);

    for _ in 0..40 {
        for _ in 0..3 {
            engine
                .start_sample(ids[0], 1, 0, 100, Duration::ZERO)
                .unwrap();
        }
        let mut buffer = vec![0.0; 512];
        let info = engine.get_samples(&mut buffer, 256);
        assert!(info.current_polyphony <= 8);
        assert!(engine.active_voices() <= 8);
    }
}

#[test]
fn test_randomized_stop_before_onset_is_silent() {
    let mut setup = setup(1);
    setup.settings.randomize_speaking = true;
    let (engine, ids) = engine(&setup, vec![steady(1.0)]);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            engine
                .start_sample(ids[0], 1, 0, 127, Duration::from_millis(50))
                .unwrap()
                .unwrap()
        })
        .collect();
    for handle in &handles {
        engine.stop_sample(ids[0], *handle);
    }

    let out = render(&engine, 9600);
    assert!(out.iter().all(|s| *s == 0.0));
    assert_eq!(engine.active_voices(), 0);
}
