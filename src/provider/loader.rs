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

//! Loading of WAV files into audio sections.
//!
//! Sections are loaded entirely into memory and converted to the engine's
//! sample rate up front so voices only ever resample for pitch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, info};

use super::{AudioSection, ProviderError};

/// Input frames handed to the resampler per call.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Loads and caches sections by path.
pub struct SectionLoader {
    cache: HashMap<PathBuf, AudioSection>,
    /// Rate every loaded section is converted to.
    target_sample_rate: u32,
}

impl SectionLoader {
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            cache: HashMap::new(),
            target_sample_rate,
        }
    }

    /// Loads a WAV file, returning the cached section when it was loaded
    /// before.
    pub fn load(&mut self, path: &Path) -> Result<AudioSection, ProviderError> {
        if let Some(section) = self.cache.get(path) {
            debug!(path = ?path, "Using cached section");
            return Ok(section.clone());
        }

        info!(path = ?path, "Loading section into memory");
        let (source_rate, channels) = read_wav(path)?;

        let channels = if source_rate != self.target_sample_rate {
            info!(
                source_rate,
                target_rate = self.target_sample_rate,
                "Resampling section"
            );
            resample(&channels, source_rate, self.target_sample_rate)?
        } else {
            channels
        };

        let mut channels = channels.into_iter();
        let section = match (channels.next(), channels.next()) {
            (Some(left), Some(right)) => AudioSection::stereo(self.target_sample_rate, left, right)?,
            (Some(mono), None) => AudioSection::mono(self.target_sample_rate, mono)?,
            _ => return Err(ProviderError::EmptySection),
        };

        info!(
            path = ?path,
            stereo = section.is_stereo(),
            duration_ms = Duration::from_secs_f64(
                section.frames() as f64 / self.target_sample_rate as f64
            )
            .as_millis(),
            memory_kb = section.memory_usage() / 1024,
            "Section loaded"
        );

        self.cache.insert(path.to_path_buf(), section.clone());
        Ok(section)
    }

    /// Total bytes held by cached sections.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.values().map(AudioSection::memory_usage).sum()
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }
}

/// Reads a mono or stereo WAV file into planar f32 channels.
pub fn read_wav(path: &Path) -> Result<(u32, Vec<Vec<f32>>), ProviderError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.channels > 2 {
        return Err(ProviderError::UnsupportedChannels(spec.channels));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channel_count = spec.channels as usize;
    let channels = (0..channel_count)
        .map(|channel| {
            interleaved
                .iter()
                .skip(channel)
                .step_by(channel_count)
                .copied()
                .collect()
        })
        .collect();
    Ok((spec.sample_rate, channels))
}

/// Converts planar channels between sample rates with a sinc resampler.
fn resample(
    channels: &[Vec<f32>],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let failed = |e: &dyn std::fmt::Display| {
        ProviderError::ResamplingFailed(source_rate, target_rate, e.to_string())
    };

    let ratio = target_rate as f64 / source_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, params, INPUT_BLOCK_SIZE, channels.len())
            .map_err(|e| failed(&e))?;

    let source_frames = channels.first().map_or(0, Vec::len);
    let expected = (source_frames as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels.len()];

    let mut position = 0;
    while position + resampler.input_frames_next() <= source_frames {
        let frames = resampler.input_frames_next();
        let block: Vec<&[f32]> = channels
            .iter()
            .map(|c| &c[position..position + frames])
            .collect();
        append(
            &mut output,
            resampler
                .process(block.as_slice(), None)
                .map_err(|e| failed(&e))?,
        );
        position += frames;
    }
    if position < source_frames {
        let block: Vec<&[f32]> = channels.iter().map(|c| &c[position..]).collect();
        append(
            &mut output,
            resampler
                .process_partial(Some(block.as_slice()), None)
                .map_err(|e| failed(&e))?,
        );
    }
    // Flush until the delayed tail is out.
    while output.first().map_or(0, Vec::len) < expected + delay {
        let block = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| failed(&e))?;
        if block.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut output, block);
    }

    Ok(output
        .into_iter()
        .map(|channel| channel.into_iter().skip(delay).take(expected).collect())
        .collect())
}

fn append(output: &mut [Vec<f32>], block: Vec<Vec<f32>>) {
    for (dst, src) in output.iter_mut().zip(block) {
        dst.extend_from_slice(&src);
    }
}
