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

use super::ProviderError;

/// A half-open frame range `[start, end)` that playback repeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: usize,
    pub end: usize,
}

impl LoopRegion {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// One contiguous piece of sampled audio: an attack with an optional sustain
/// loop, or a release tail.
#[derive(Clone, Debug)]
pub struct AudioSection {
    sample_rate: u32,
    /// Planar data, one or two channels of equal length.
    channels: Vec<Vec<f32>>,
    loop_region: Option<LoopRegion>,
    period_frames: Option<f32>,
}

impl AudioSection {
    pub fn mono(sample_rate: u32, data: Vec<f32>) -> Result<Self, ProviderError> {
        if data.is_empty() {
            return Err(ProviderError::EmptySection);
        }
        Ok(Self {
            sample_rate,
            channels: vec![data],
            loop_region: None,
            period_frames: None,
        })
    }

    pub fn stereo(sample_rate: u32, left: Vec<f32>, right: Vec<f32>) -> Result<Self, ProviderError> {
        if left.len() != right.len() {
            return Err(ProviderError::ChannelLengthMismatch(left.len(), right.len()));
        }
        if left.is_empty() {
            return Err(ProviderError::EmptySection);
        }
        Ok(Self {
            sample_rate,
            channels: vec![left, right],
            loop_region: None,
            period_frames: None,
        })
    }

    /// Repeats `[start, end)` for as long as the section plays.
    pub fn with_loop(mut self, start: usize, end: usize) -> Result<Self, ProviderError> {
        let frames = self.frames();
        if start >= end || end > frames {
            return Err(ProviderError::InvalidLoop { start, end, frames });
        }
        self.loop_region = Some(LoopRegion { start, end });
        Ok(self)
    }

    /// Sets the length in frames of one waveform period, used to phase-align
    /// releases.
    pub fn with_period(mut self, period_frames: f32) -> Self {
        self.period_frames = (period_frames > 0.0).then_some(period_frames);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_stereo(&self) -> bool {
        self.channels.len() > 1
    }

    /// Data of the left and right channel. Mono sections return the same
    /// data for both.
    pub fn channels(&self) -> (&[f32], &[f32]) {
        let left = &self.channels[0];
        let right = self.channels.get(1).unwrap_or(left);
        (left, right)
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }

    pub fn period_frames(&self) -> Option<f32> {
        self.period_frames
    }

    /// Bytes of sample data held by the section.
    pub fn memory_usage(&self) -> usize {
        self.channels.iter().map(|c| c.len() * std::mem::size_of::<f32>()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_reads_same_channel_twice() {
        let section = AudioSection::mono(48000, vec![0.5; 10]).unwrap();
        let (left, right) = section.channels();
        assert_eq!(left, right);
        assert!(!section.is_stereo());
        assert_eq!(section.memory_usage(), 40);
    }

    #[test]
    fn test_invalid_sections_are_rejected() {
        assert!(matches!(
            AudioSection::mono(48000, vec![]),
            Err(ProviderError::EmptySection)
        ));
        assert!(matches!(
            AudioSection::stereo(48000, vec![0.0; 4], vec![0.0; 5]),
            Err(ProviderError::ChannelLengthMismatch(4, 5))
        ));
        let section = AudioSection::mono(48000, vec![0.0; 8]).unwrap();
        assert!(section.clone().with_loop(4, 9).is_err());
        assert!(section.clone().with_loop(4, 4).is_err());
        assert_eq!(
            section.with_loop(2, 8).unwrap().loop_region(),
            Some(LoopRegion { start: 2, end: 8 })
        );
    }
}
