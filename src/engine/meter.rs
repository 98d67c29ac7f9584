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

use std::sync::atomic::{AtomicUsize, Ordering};

use super::settings::AtomicF32;

/// Polyphony and peak levels of the last finished period.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterInfo {
    /// Sampler slots in use.
    pub current_polyphony: usize,
    pub meter_left: f32,
    pub meter_right: f32,
}

impl MeterInfo {
    /// Combines two snapshots, keeping the highest peaks and the polyphony of
    /// `later`.
    pub fn merge(self, later: MeterInfo) -> MeterInfo {
        MeterInfo {
            current_polyphony: later.current_polyphony,
            meter_left: self.meter_left.max(later.meter_left),
            meter_right: self.meter_right.max(later.meter_right),
        }
    }
}

/// Peaks accumulate while outputs are mixed and are published once per
/// period.
#[derive(Debug)]
pub(crate) struct Meter {
    peak_left: AtomicF32,
    peak_right: AtomicF32,
    polyphony: AtomicUsize,
    left: AtomicF32,
    right: AtomicF32,
}

impl Meter {
    pub fn new() -> Self {
        Self {
            peak_left: AtomicF32::new(0.0),
            peak_right: AtomicF32::new(0.0),
            polyphony: AtomicUsize::new(0),
            left: AtomicF32::new(0.0),
            right: AtomicF32::new(0.0),
        }
    }

    /// Records the peaks of `frames` interleaved frames. Even channels count
    /// as left and odd channels as right; mono feeds both.
    pub fn accumulate(&self, buffer: &[f32], channels: usize, frames: usize) {
        let mut left = 0.0f32;
        let mut right = 0.0f32;
        for frame in buffer.chunks_exact(channels).take(frames) {
            for (channel, sample) in frame.iter().enumerate() {
                if channel % 2 == 0 {
                    left = left.max(sample.abs());
                } else {
                    right = right.max(sample.abs());
                }
            }
        }
        if channels == 1 {
            right = left;
        }
        self.peak_left.fetch_max(left);
        self.peak_right.fetch_max(right);
    }

    /// Publishes the accumulated peaks and starts a new period.
    pub fn publish(&self, polyphony: usize) -> MeterInfo {
        let info = MeterInfo {
            current_polyphony: polyphony,
            meter_left: self.peak_left.swap(0.0),
            meter_right: self.peak_right.swap(0.0),
        };
        self.left.store(info.meter_left);
        self.right.store(info.meter_right);
        self.polyphony.store(polyphony, Ordering::Release);
        info
    }

    pub fn snapshot(&self) -> MeterInfo {
        MeterInfo {
            current_polyphony: self.polyphony.load(Ordering::Acquire),
            meter_left: self.left.load(),
            meter_right: self.right.load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_by_side() {
        let meter = Meter::new();
        meter.accumulate(&[0.1, -0.5, 0.3, 0.2], 2, 2);
        meter.accumulate(&[-0.4, 0.0], 2, 1);
        let info = meter.publish(3);
        assert_eq!(info.current_polyphony, 3);
        assert_eq!(info.meter_left, 0.4);
        assert_eq!(info.meter_right, 0.5);
        assert_eq!(meter.snapshot(), info);

        let next = meter.publish(0);
        assert_eq!(next.meter_left, 0.0);
    }

    #[test]
    fn test_mono_feeds_both_sides() {
        let meter = Meter::new();
        meter.accumulate(&[0.25, -0.75], 1, 2);
        let info = meter.publish(1);
        assert_eq!(info.meter_left, 0.75);
        assert_eq!(info.meter_right, 0.75);
    }
}
