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

//! Output groups and audio outputs.

use parking_lot::{Mutex, RwLock};

use super::reverb::Reverb;
use super::{AudioOutputSetup, MeterInfo, ReverbSetup, SoundEngine};

/// Sum of every sampler group's slice for one audio group.
pub(crate) struct OutputGroup {
    buffer: RwLock<Vec<f32>>,
}

impl OutputGroup {
    pub fn new(max_frames: usize) -> Self {
        Self {
            buffer: RwLock::new(vec![0.0; max_frames * 2]),
        }
    }
}

/// A multichannel output: the routing matrix plus its own reverb.
pub(crate) struct AudioOutput {
    channels: usize,
    /// `[channel][audio_group * 2 + side]`, flattened.
    scale_factors: Vec<f32>,
    reverb: Mutex<Option<Reverb>>,
}

impl AudioOutput {
    pub fn new(setup: &AudioOutputSetup, reverb: Option<&ReverbSetup>, sample_rate: u32) -> Self {
        let channels = setup.channels();
        Self {
            channels,
            scale_factors: setup.scale_factors.iter().flatten().copied().collect(),
            reverb: Mutex::new(reverb.map(|reverb| Reverb::new(reverb, sample_rate, channels))),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl SoundEngine {
    pub(super) fn process_output_group(&self, audio_group: usize) {
        let frames = self.period_frames();
        let stride = self.max_frames * 2;
        let start = audio_group * stride;

        let mut buffer = self.output_groups[audio_group].buffer.write();
        let out = &mut buffer[..frames * 2];
        out.fill(0.0);
        for group in self.groups.iter() {
            let render = group.render.read();
            if render.silent {
                continue;
            }
            for (dst, src) in out.iter_mut().zip(&render.buffer[start..start + frames * 2]) {
                *dst += *src;
            }
        }
    }

    /// Mixes the current period into `buffer` as interleaved frames of the
    /// output's channels. Finishes any outstanding work of the period first.
    /// Returns the number of frames written; an unknown output writes
    /// nothing.
    pub fn get_audio_output(&self, output: usize, buffer: &mut [f32]) -> usize {
        let Some(audio_output) = self.outputs.get(output) else {
            return 0;
        };
        self.run_worker();

        let channels = audio_output.channels;
        let frames = self.period_frames().min(buffer.len() / channels);
        let buffer = &mut buffer[..frames * channels];
        buffer.fill(0.0);

        let groups = self.audio_groups * 2;
        for (audio_group, output_group) in self.output_groups.iter().enumerate() {
            let source = output_group.buffer.read();
            for channel in 0..channels {
                let factors = &audio_output.scale_factors[channel * groups + audio_group * 2..][..2];
                let (left, right) = (factors[0], factors[1]);
                if left == 0.0 && right == 0.0 {
                    continue;
                }
                for (frame, pair) in source[..frames * 2].chunks_exact(2).enumerate() {
                    buffer[frame * channels + channel] += pair[0] * left + pair[1] * right;
                }
            }
        }

        if let Some(reverb) = audio_output.reverb.lock().as_mut() {
            reverb.process(buffer, frames);
        }
        self.meter.accumulate(buffer, channels, frames);
        frames
    }

    /// Renders `frames` frames of output 0 into `buffer`, splitting them into
    /// periods no longer than the configured buffer size.
    pub fn get_samples(&self, buffer: &mut [f32], frames: usize) -> MeterInfo {
        self.render_frames(buffer, frames, |_| {})
    }

    /// Drives whole periods, calling `workers` after each period starts so
    /// other threads can share the work.
    pub(crate) fn render_frames(
        &self,
        buffer: &mut [f32],
        frames: usize,
        mut workers: impl FnMut(&SoundEngine),
    ) -> MeterInfo {
        let channels = self.outputs[0].channels;
        let frames = frames.min(buffer.len() / channels);
        let mut meter: Option<MeterInfo> = None;
        let mut done = 0;
        while done < frames {
            let period = self.begin_period(frames - done);
            workers(self);
            self.get_audio_output(0, &mut buffer[done * channels..]);
            let info = self.finish_period();
            meter = Some(meter.map_or(info, |previous| previous.merge(info)));
            done += period;
        }
        meter.unwrap_or_else(|| self.meter.snapshot())
    }
}
