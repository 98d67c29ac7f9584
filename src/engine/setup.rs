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

//! Everything an engine is built from.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{EngineError, FadeShape, InterpolationType};

/// Lowest accepted engine volume in dB.
pub const MIN_VOLUME_DB: i32 = -120;

/// Highest accepted engine volume in dB.
pub const MAX_VOLUME_DB: i32 = 20;

/// Longest accepted release length.
pub const MAX_RELEASE_LENGTH: Duration = Duration::from_secs(60);

/// How a victim is chosen when polyphony limiting needs a voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StealPolicy {
    /// Lowest published amplitude first, then releasing before sustaining
    /// voices, then the oldest onset.
    #[default]
    QuietestFirst,
    /// Releasing voices first, then by amplitude, then the oldest onset.
    ReleasesFirst,
    /// The oldest onset regardless of level.
    OldestFirst,
}

impl StealPolicy {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => StealPolicy::ReleasesFirst,
            2 => StealPolicy::OldestFirst,
            _ => StealPolicy::QuietestFirst,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            StealPolicy::QuietestFirst => 0,
            StealPolicy::ReleasesFirst => 1,
            StealPolicy::OldestFirst => 2,
        }
    }
}

/// Settings that can also be changed while the engine runs.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub volume_db: i32,
    /// Slots in use at which new onsets start stealing. None means the hard
    /// polyphony.
    pub polyphony_soft_limit: Option<usize>,
    pub polyphony_limiting: bool,
    pub steal_policy: StealPolicy,
    pub scaled_releases: bool,
    pub release_alignment: bool,
    pub randomize_speaking: bool,
    /// When non-zero every release tail decays over this length.
    pub release_length: Duration,
    pub release_fade: FadeShape,
    pub interpolation: InterpolationType,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            volume_db: 0,
            polyphony_soft_limit: None,
            polyphony_limiting: true,
            steal_policy: StealPolicy::default(),
            scaled_releases: true,
            release_alignment: true,
            randomize_speaking: false,
            release_length: Duration::ZERO,
            release_fade: FadeShape::default(),
            interpolation: InterpolationType::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindchestSetup {
    pub volume_db: f32,
    /// Indices of the tremulants modulating this windchest.
    pub tremulants: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TremulantSetup {
    pub period: Duration,
    /// Peak relative amplitude change, 0.0 to 1.0.
    pub amplitude_depth: f32,
    /// Peak pitch change in cents.
    pub pitch_depth_cents: f32,
    pub start_time: Duration,
    pub stop_time: Duration,
}

impl Default for TremulantSetup {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(200),
            amplitude_depth: 0.15,
            pitch_depth_cents: 4.0,
            start_time: Duration::from_millis(100),
            stop_time: Duration::from_millis(150),
        }
    }
}

/// Channel layout of one audio output.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioOutputSetup {
    /// `scale_factors[channel][audio_group * 2 + side]`, side 0 left, 1 right.
    pub scale_factors: Vec<Vec<f32>>,
}

impl AudioOutputSetup {
    /// A stereo output taking every audio group's left side on channel 0 and
    /// right side on channel 1.
    pub fn stereo(audio_groups: usize) -> Self {
        let mut left = vec![0.0; audio_groups * 2];
        let mut right = vec![0.0; audio_groups * 2];
        for group in 0..audio_groups {
            left[group * 2] = 1.0;
            right[group * 2 + 1] = 1.0;
        }
        Self {
            scale_factors: vec![left, right],
        }
    }

    pub fn channels(&self) -> usize {
        self.scale_factors.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReverbSetup {
    /// 0.0 to 1.0.
    pub room_size: f32,
    /// 0.0 to 1.0.
    pub damping: f32,
    pub wet: f32,
    pub dry: f32,
}

impl Default for ReverbSetup {
    fn default() -> Self {
        Self {
            room_size: 0.7,
            damping: 0.4,
            wet: 0.25,
            dry: 1.0,
        }
    }
}

/// The complete layout of an engine.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSetup {
    pub sample_rate: u32,
    /// Largest period the engine renders in one go.
    pub samples_per_buffer: usize,
    pub hard_polyphony: usize,
    pub windchests: Vec<WindchestSetup>,
    pub tremulants: Vec<TremulantSetup>,
    pub audio_groups: usize,
    /// Release groups beyond the one at group id 0.
    pub extra_release_groups: usize,
    pub outputs: Vec<AudioOutputSetup>,
    pub reverb: Option<ReverbSetup>,
    pub settings: EngineSettings,
}

impl EngineSetup {
    /// A stereo engine with plain windchests and a single output.
    pub fn new(sample_rate: u32, samples_per_buffer: usize, windchests: usize) -> Self {
        Self {
            sample_rate,
            samples_per_buffer,
            hard_polyphony: 256,
            windchests: vec![WindchestSetup::default(); windchests],
            tremulants: Vec::new(),
            audio_groups: 1,
            extra_release_groups: 0,
            outputs: vec![AudioOutputSetup::stereo(1)],
            reverb: None,
            settings: EngineSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: String| Err(EngineError::InvalidSetup(reason));

        if self.sample_rate == 0 {
            return invalid("sample rate must be non-zero".into());
        }
        if self.samples_per_buffer == 0 {
            return invalid("samples per buffer must be non-zero".into());
        }
        if self.hard_polyphony == 0 || self.hard_polyphony > u32::MAX as usize {
            return invalid(format!("hard polyphony {} is out of range", self.hard_polyphony));
        }
        if self.audio_groups == 0 {
            return invalid("at least one audio group is required".into());
        }
        if self.outputs.is_empty() {
            return invalid("at least one audio output is required".into());
        }
        for (index, windchest) in self.windchests.iter().enumerate() {
            if let Some(tremulant) = windchest
                .tremulants
                .iter()
                .find(|t| **t >= self.tremulants.len())
            {
                return invalid(format!(
                    "windchest {} refers to unknown tremulant {tremulant}",
                    index + 1
                ));
            }
        }
        for (index, tremulant) in self.tremulants.iter().enumerate() {
            if tremulant.period.is_zero() {
                return invalid(format!("tremulant {index} has a zero period"));
            }
            if !(0.0..=1.0).contains(&tremulant.amplitude_depth) {
                return invalid(format!("tremulant {index} amplitude depth must be 0 to 1"));
            }
        }
        for (index, output) in self.outputs.iter().enumerate() {
            if output.scale_factors.is_empty() {
                return invalid(format!("audio output {index} has no channels"));
            }
            if let Some(channel) = output
                .scale_factors
                .iter()
                .position(|factors| factors.len() != self.audio_groups * 2)
            {
                return invalid(format!(
                    "audio output {index} channel {channel} needs {} scale factors",
                    self.audio_groups * 2
                ));
            }
        }
        if let Some(limit) = self.settings.polyphony_soft_limit {
            if limit == 0 || limit > self.hard_polyphony {
                return invalid(format!(
                    "polyphony soft limit {limit} must be between 1 and {}",
                    self.hard_polyphony
                ));
            }
        }
        if !(MIN_VOLUME_DB..=MAX_VOLUME_DB).contains(&self.settings.volume_db) {
            return invalid(format!("volume {} dB is out of range", self.settings.volume_db));
        }
        if self.settings.release_length > MAX_RELEASE_LENGTH {
            return invalid("release length is longer than 60s".into());
        }
        Ok(())
    }
}
