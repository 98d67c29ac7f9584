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

//! Synthetic pipe tones for demos, benches and tests.

use std::f64::consts::TAU;
use std::time::Duration;

use super::{AudioSection, MemoryProvider, ProviderError};

/// Minimum length of a sustain loop.
const MIN_LOOP: Duration = Duration::from_millis(250);

/// Peak level of a generated tone.
const TONE_LEVEL: f64 = 0.5;

/// Frequency of a MIDI key in equal temperament at A440.
pub fn key_frequency(midi_key: u8) -> f64 {
    440.0 * 2f64.powf((midi_key as f64 - 69.0) / 12.0)
}

/// An additive pipe tone with a short speech transient, a sustain loop that
/// holds an exact number of periods, and a decaying release.
#[derive(Clone, Debug)]
pub struct OrganTone {
    sample_rate: u32,
    frequency: f64,
    harmonics: Vec<f32>,
    speech: Duration,
    release: Duration,
}

impl OrganTone {
    pub fn new(sample_rate: u32, frequency: f64) -> Self {
        Self {
            sample_rate,
            frequency,
            harmonics: vec![1.0],
            speech: Duration::from_millis(40),
            release: Duration::from_millis(600),
        }
    }

    /// Relative amplitudes of the fundamental and its overtones.
    pub fn with_harmonics(mut self, harmonics: &[f32]) -> Self {
        if !harmonics.is_empty() {
            self.harmonics = harmonics.to_vec();
        }
        self
    }

    pub fn with_speech(mut self, speech: Duration) -> Self {
        self.speech = speech;
        self
    }

    pub fn with_release(mut self, release: Duration) -> Self {
        self.release = release;
        self
    }

    /// Loop length in frames and the frequency adjusted so the loop holds a
    /// whole number of periods.
    fn sustain_loop(&self) -> (usize, f64) {
        let rate = self.sample_rate as f64;
        let period = rate / self.frequency;
        let cycles = (MIN_LOOP.as_secs_f64() * rate / period).ceil().max(1.0);
        let frames = (cycles * period).round().max(1.0);
        (frames as usize, cycles * rate / frames)
    }

    fn wave(&self, frequency: f64, frame: usize) -> f32 {
        let phase = frequency * frame as f64 / self.sample_rate as f64;
        let norm: f32 = self.harmonics.iter().map(|h| h.abs()).sum::<f32>().max(f32::EPSILON);
        let value: f64 = self
            .harmonics
            .iter()
            .enumerate()
            .map(|(k, amplitude)| *amplitude as f64 * (TAU * (k + 1) as f64 * phase).sin())
            .sum();
        (value * TONE_LEVEL / norm as f64) as f32
    }

    /// Attack section: speech transient followed by the sustain loop.
    pub fn attack(&self) -> Result<AudioSection, ProviderError> {
        let (loop_frames, frequency) = self.sustain_loop();
        let speech = (self.speech.as_secs_f64() * self.sample_rate as f64) as usize;
        let data = (0..speech + loop_frames)
            .map(|frame| {
                let envelope = if frame < speech {
                    frame as f32 / speech as f32
                } else {
                    1.0
                };
                self.wave(frequency, frame) * envelope
            })
            .collect();
        Ok(AudioSection::mono(self.sample_rate, data)?
            .with_loop(speech, speech + loop_frames)?
            .with_period(self.sample_rate as f32 / frequency as f32))
    }

    /// Release section: the sustained wave decaying to silence.
    pub fn release_section(&self) -> Result<AudioSection, ProviderError> {
        let (_, frequency) = self.sustain_loop();
        let frames = ((self.release.as_secs_f64() * self.sample_rate as f64) as usize).max(1);
        let data = (0..frames)
            .map(|frame| {
                let envelope = (-5.0 * frame as f64 / frames as f64).exp() as f32;
                self.wave(frequency, frame) * envelope
            })
            .collect();
        Ok(AudioSection::mono(self.sample_rate, data)?
            .with_period(self.sample_rate as f32 / frequency as f32))
    }

    /// A complete pipe with attack and release.
    pub fn pipe(&self, midi_key: u8) -> Result<MemoryProvider, ProviderError> {
        Ok(MemoryProvider::new()
            .with_attack(1, self.attack()?)
            .with_release(None, self.release_section()?)
            .with_midi_key(midi_key)
            .with_velocity_sensitive(false))
    }
}
