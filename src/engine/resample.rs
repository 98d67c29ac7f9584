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

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::provider::LoopRegion;

/// Interpolation used when a voice reads between sample frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationType {
    Linear,
    #[default]
    Polyphase,
}

impl InterpolationType {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => InterpolationType::Linear,
            _ => InterpolationType::Polyphase,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            InterpolationType::Linear => 0,
            InterpolationType::Polyphase => 1,
        }
    }
}

/// Fractional positions are quantised to this many phases.
const SUBSAMPLE_STEPS: usize = 512;

/// Taps of the windowed-sinc kernel.
const POLYPHASE_POINTS: usize = 8;

/// Index of the tap that sits on the integer part of the read position.
const POLYPHASE_CENTER: isize = (POLYPHASE_POINTS as isize / 2) - 1;

/// Interpolation tables for every supported type, built once at setup.
pub(crate) struct ResamplerCoefs {
    linear: Vec<[f32; 2]>,
    polyphase: Vec<[f32; POLYPHASE_POINTS]>,
}

impl ResamplerCoefs {
    pub fn new() -> Self {
        let linear = (0..SUBSAMPLE_STEPS)
            .map(|phase| {
                let frac = phase as f32 / SUBSAMPLE_STEPS as f32;
                [1.0 - frac, frac]
            })
            .collect();

        let polyphase = (0..SUBSAMPLE_STEPS)
            .map(|phase| {
                let frac = phase as f64 / SUBSAMPLE_STEPS as f64;
                let mut taps = [0.0f64; POLYPHASE_POINTS];
                for (tap, value) in taps.iter_mut().enumerate() {
                    let x = (tap as isize - POLYPHASE_CENTER) as f64 - frac;
                    *value = sinc(x) * blackman(x, POLYPHASE_POINTS as f64 / 2.0);
                }
                // Unity gain at DC for every phase.
                let sum: f64 = taps.iter().sum();
                let mut out = [0.0f32; POLYPHASE_POINTS];
                for (dst, src) in out.iter_mut().zip(taps) {
                    *dst = (src / sum) as f32;
                }
                out
            })
            .collect();

        Self { linear, polyphase }
    }

    /// Reads `data` at a fractional `position`. Positions outside the data
    /// read as silence unless a loop region wraps them. Once `looped`, taps
    /// left of the loop start read the end of the loop.
    #[inline]
    pub fn read(
        &self,
        kind: InterpolationType,
        data: &[f32],
        position: f64,
        region: Option<LoopRegion>,
        looped: bool,
    ) -> f32 {
        let base = position.floor();
        let phase = (((position - base) * SUBSAMPLE_STEPS as f64) as usize).min(SUBSAMPLE_STEPS - 1);
        let base = base as isize;
        match kind {
            InterpolationType::Linear => {
                let coefs = &self.linear[phase];
                fetch(data, base, region, looped) * coefs[0]
                    + fetch(data, base + 1, region, looped) * coefs[1]
            }
            InterpolationType::Polyphase => {
                let coefs = &self.polyphase[phase];
                let first = base - POLYPHASE_CENTER;
                coefs
                    .iter()
                    .enumerate()
                    .map(|(tap, coef)| fetch(data, first + tap as isize, region, looped) * coef)
                    .sum()
            }
        }
    }
}

#[inline]
fn fetch(data: &[f32], index: isize, region: Option<LoopRegion>, looped: bool) -> f32 {
    let index = match region {
        Some(region) if !region.is_empty() => {
            let (start, end) = (region.start as isize, region.end as isize);
            let len = end - start;
            if index >= end {
                start + (index - end) % len
            } else if looped && index < start {
                end - 1 - (start - 1 - index) % len
            } else {
                index
            }
        }
        _ => index,
    };
    if index < 0 {
        return 0.0;
    }
    data.get(index as usize).copied().unwrap_or(0.0)
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn blackman(x: f64, half_width: f64) -> f64 {
    if x.abs() >= half_width {
        return 0.0;
    }
    let t = PI * x / half_width;
    0.42 + 0.5 * t.cos() + 0.08 * (2.0 * t).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_positions_are_exact() {
        let coefs = ResamplerCoefs::new();
        let data: Vec<f32> = (0..32).map(|i| (i as f32 * 0.37).sin()).collect();
        for kind in [InterpolationType::Linear, InterpolationType::Polyphase] {
            for i in 4..28 {
                let value = coefs.read(kind, &data, i as f64, None, false);
                assert!((value - data[i]).abs() < 1e-4, "{kind:?} at {i}");
            }
        }
    }

    #[test]
    fn test_linear_midpoint() {
        let coefs = ResamplerCoefs::new();
        let data = [0.0, 1.0, 0.0];
        let value = coefs.read(InterpolationType::Linear, &data, 0.5, None, false);
        assert!((value - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dc_is_preserved() {
        let coefs = ResamplerCoefs::new();
        let data = vec![1.0f32; 64];
        for step in 0..40 {
            let position = 10.0 + step as f64 * 0.37;
            let value = coefs.read(InterpolationType::Polyphase, &data, position, None, false);
            assert!((value - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_reads_past_end_are_silent() {
        let coefs = ResamplerCoefs::new();
        let data = vec![1.0f32; 16];
        for kind in [InterpolationType::Linear, InterpolationType::Polyphase] {
            assert_eq!(coefs.read(kind, &data, 40.0, None, false), 0.0);
        }
    }

    #[test]
    fn test_reads_wrap_inside_loop() {
        let coefs = ResamplerCoefs::new();
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let region = Some(LoopRegion { start: 4, end: 8 });
        // Frame 9 wraps to frame 5.
        let value = coefs.read(InterpolationType::Linear, &data, 9.0, region, true);
        assert!((value - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_looped_taps_before_loop_start_read_loop_end() {
        let coefs = ResamplerCoefs::new();
        // A ramp whose loop 8..16 is preceded by unrelated audio.
        let mut data = vec![-5.0f32; 8];
        data.extend((0..8).map(|i| i as f32));
        let region = Some(LoopRegion { start: 8, end: 16 });

        // Frame 7 lies before the loop: audio ahead of it on the first pass,
        // the last loop frame afterwards.
        assert_eq!(fetch(&data, 7, region, false), -5.0);
        assert_eq!(fetch(&data, 7, region, true), 7.0);
        assert_eq!(fetch(&data, 5, region, true), 5.0);

        // Halfway between the loop end and its start.
        let value = coefs.read(InterpolationType::Linear, &data, 7.5, region, true);
        assert!((value - 3.5).abs() < 1e-6);
    }
}
