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

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use super::{EngineSettings, FadeShape, InterpolationType, StealPolicy};

/// Converts decibels to a linear gain.
pub(crate) fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// An f32 stored in an atomic.
#[derive(Debug)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Raises the stored value to `value` if larger. Only valid for
    /// non-negative values, whose bit patterns order like the floats.
    pub fn fetch_max(&self, value: f32) {
        self.0.fetch_max(value.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn swap(&self, value: f32) -> f32 {
        f32::from_bits(self.0.swap(value.to_bits(), Ordering::Relaxed))
    }
}

/// Settings shared between the control and the render threads. Writes take
/// effect at the next period.
#[derive(Debug)]
pub(crate) struct SharedSettings {
    volume_db: AtomicI32,
    gain: AtomicF32,
    soft_limit: AtomicUsize,
    limiting: AtomicBool,
    steal_policy: AtomicU8,
    scaled_releases: AtomicBool,
    release_alignment: AtomicBool,
    randomize: AtomicBool,
    release_length_ms: AtomicU32,
    release_fade: AtomicU8,
    interpolation: AtomicU8,
}

impl SharedSettings {
    pub fn new(settings: &EngineSettings, hard_polyphony: usize) -> Self {
        Self {
            volume_db: AtomicI32::new(settings.volume_db),
            gain: AtomicF32::new(db_to_gain(settings.volume_db as f32)),
            soft_limit: AtomicUsize::new(settings.polyphony_soft_limit.unwrap_or(hard_polyphony)),
            limiting: AtomicBool::new(settings.polyphony_limiting),
            steal_policy: AtomicU8::new(settings.steal_policy.as_u8()),
            scaled_releases: AtomicBool::new(settings.scaled_releases),
            release_alignment: AtomicBool::new(settings.release_alignment),
            randomize: AtomicBool::new(settings.randomize_speaking),
            release_length_ms: AtomicU32::new(settings.release_length.as_millis() as u32),
            release_fade: AtomicU8::new(settings.release_fade.as_u8()),
            interpolation: AtomicU8::new(settings.interpolation.as_u8()),
        }
    }

    pub fn volume_db(&self) -> i32 {
        self.volume_db.load(Ordering::Relaxed)
    }

    pub fn set_volume_db(&self, volume_db: i32) {
        self.volume_db.store(volume_db, Ordering::Relaxed);
        self.gain.store(db_to_gain(volume_db as f32));
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    pub fn soft_limit(&self) -> usize {
        self.soft_limit.load(Ordering::Relaxed)
    }

    pub fn set_soft_limit(&self, limit: usize) {
        self.soft_limit.store(limit, Ordering::Relaxed);
    }

    pub fn limiting(&self) -> bool {
        self.limiting.load(Ordering::Relaxed)
    }

    pub fn set_limiting(&self, enabled: bool) {
        self.limiting.store(enabled, Ordering::Relaxed);
    }

    pub fn steal_policy(&self) -> StealPolicy {
        StealPolicy::from_u8(self.steal_policy.load(Ordering::Relaxed))
    }

    pub fn set_steal_policy(&self, policy: StealPolicy) {
        self.steal_policy.store(policy.as_u8(), Ordering::Relaxed);
    }

    pub fn scaled_releases(&self) -> bool {
        self.scaled_releases.load(Ordering::Relaxed)
    }

    pub fn set_scaled_releases(&self, enabled: bool) {
        self.scaled_releases.store(enabled, Ordering::Relaxed);
    }

    pub fn release_alignment(&self) -> bool {
        self.release_alignment.load(Ordering::Relaxed)
    }

    pub fn set_release_alignment(&self, enabled: bool) {
        self.release_alignment.store(enabled, Ordering::Relaxed);
    }

    pub fn randomize(&self) -> bool {
        self.randomize.load(Ordering::Relaxed)
    }

    pub fn set_randomize(&self, enabled: bool) {
        self.randomize.store(enabled, Ordering::Relaxed);
    }

    pub fn release_length(&self) -> Duration {
        Duration::from_millis(self.release_length_ms.load(Ordering::Relaxed) as u64)
    }

    pub fn set_release_length(&self, length: Duration) {
        self.release_length_ms
            .store(length.as_millis() as u32, Ordering::Relaxed);
    }

    pub fn release_fade(&self) -> FadeShape {
        FadeShape::from_u8(self.release_fade.load(Ordering::Relaxed))
    }

    pub fn set_release_fade(&self, shape: FadeShape) {
        self.release_fade.store(shape.as_u8(), Ordering::Relaxed);
    }

    pub fn interpolation(&self) -> InterpolationType {
        InterpolationType::from_u8(self.interpolation.load(Ordering::Relaxed))
    }

    pub fn set_interpolation(&self, interpolation: InterpolationType) {
        self.interpolation
            .store(interpolation.as_u8(), Ordering::Relaxed);
    }

    /// Snapshot of the current values.
    pub fn snapshot(&self) -> EngineSettings {
        EngineSettings {
            volume_db: self.volume_db(),
            polyphony_soft_limit: Some(self.soft_limit()),
            polyphony_limiting: self.limiting(),
            steal_policy: self.steal_policy(),
            scaled_releases: self.scaled_releases(),
            release_alignment: self.release_alignment(),
            randomize_speaking: self.randomize(),
            release_length: self.release_length(),
            release_fade: self.release_fade(),
            interpolation: self.interpolation(),
        }
    }
}
