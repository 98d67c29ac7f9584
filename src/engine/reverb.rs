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

//! Output reverb: parallel damped comb filters into series allpass filters,
//! one independent line per output channel.

use super::ReverbSetup;

/// Delay lengths at 44.1 kHz.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];

/// Extra delay for odd channels so left and right decorrelate.
const STEREO_SPREAD: usize = 23;

const INPUT_GAIN: f32 = 0.015;
const ALLPASS_FEEDBACK: f32 = 0.5;

#[derive(Debug)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp: f32,
    store: f32,
}

impl Comb {
    fn new(size: usize, feedback: f32, damp: f32) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback,
            damp,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.store = output * (1.0 - self.damp) + self.store * self.damp;
        self.buffer[self.index] = input + self.store * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

#[derive(Debug)]
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        self.buffer[self.index] = input + delayed * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        delayed - input
    }
}

#[derive(Debug)]
struct ReverbLine {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl ReverbLine {
    fn new(sample_rate: u32, spread: usize, feedback: f32, damp: f32) -> Self {
        let scale = sample_rate as f64 / 44100.0;
        let size = |tuning: usize| (tuning as f64 * scale) as usize + spread;
        Self {
            combs: COMB_TUNING
                .iter()
                .map(|t| Comb::new(size(*t), feedback, damp))
                .collect(),
            allpasses: ALLPASS_TUNING.iter().map(|t| Allpass::new(size(*t))).collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let input = input * INPUT_GAIN;
        let mut out: f32 = self.combs.iter_mut().map(|comb| comb.process(input)).sum();
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }
}

/// Reverb state of one audio output. All delay memory is allocated up
/// front.
#[derive(Debug)]
pub(crate) struct Reverb {
    lines: Vec<ReverbLine>,
    wet: f32,
    dry: f32,
}

impl Reverb {
    pub fn new(setup: &ReverbSetup, sample_rate: u32, channels: usize) -> Self {
        let feedback = setup.room_size.clamp(0.0, 1.0) * 0.28 + 0.7;
        let damp = setup.damping.clamp(0.0, 1.0);
        Self {
            lines: (0..channels)
                .map(|channel| {
                    ReverbLine::new(sample_rate, (channel % 2) * STEREO_SPREAD, feedback, damp)
                })
                .collect(),
            wet: setup.wet,
            dry: setup.dry,
        }
    }

    /// Processes `frames` interleaved frames in place.
    pub fn process(&mut self, buffer: &mut [f32], frames: usize) {
        let channels = self.lines.len();
        for frame in buffer.chunks_exact_mut(channels).take(frames) {
            for (sample, line) in frame.iter_mut().zip(&mut self.lines) {
                let wet = line.process(*sample);
                *sample = *sample * self.dry + wet * self.wet;
            }
        }
    }
}
