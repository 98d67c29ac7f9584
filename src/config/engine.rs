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

use serde::{Deserialize, Serialize};

use super::{parse_duration, ConfigError};
use crate::engine::{
    EngineSettings, FadeShape, InterpolationType, ReverbSetup, StealPolicy, TremulantSetup,
    WindchestSetup,
};

const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_BUFFER_SIZE: usize = 256;
const DEFAULT_POLYPHONY: usize = 256;

/// A YAML representation of the engine settings.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Engine {
    /// Engine sample rate in Hz (default: 48000).
    sample_rate: Option<u32>,

    /// Largest period rendered in one go, in frames (default: 256).
    buffer_size: Option<usize>,

    /// Hard polyphony: the number of sampler slots (default: 256).
    polyphony: Option<usize>,

    /// Slots in use at which new notes start stealing (default: polyphony).
    soft_limit: Option<usize>,

    /// Whether polyphony limiting steals voices (default: true).
    limiting: Option<bool>,

    steal_policy: Option<StealPolicy>,

    interpolation: Option<InterpolationType>,

    /// Master volume in dB (default: 0).
    volume: Option<i32>,

    scaled_releases: Option<bool>,

    release_alignment: Option<bool>,

    /// Humanise onsets with small random timing, level and pitch offsets.
    randomize: Option<bool>,

    /// Fixed length for every release tail, e.g. "2s". Zero means the
    /// natural length.
    release_length: Option<String>,

    release_fade: Option<FadeShape>,

    /// Release groups beyond the main one, to spread tails over more work
    /// items (default: 0).
    release_groups: Option<usize>,

    /// Render helper threads. Defaults to one per core less the caller.
    render_threads: Option<usize>,
}

impl Engine {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    pub fn polyphony(&self) -> usize {
        self.polyphony.unwrap_or(DEFAULT_POLYPHONY)
    }

    pub fn release_groups(&self) -> usize {
        self.release_groups.unwrap_or(0)
    }

    pub fn render_threads(&self) -> Option<usize> {
        self.render_threads
    }

    /// Resolves the runtime settings, filling in defaults.
    pub fn settings(&self) -> Result<EngineSettings, ConfigError> {
        let defaults = EngineSettings::default();
        Ok(EngineSettings {
            volume_db: self.volume.unwrap_or(defaults.volume_db),
            polyphony_soft_limit: self.soft_limit,
            polyphony_limiting: self.limiting.unwrap_or(defaults.polyphony_limiting),
            steal_policy: self.steal_policy.unwrap_or(defaults.steal_policy),
            scaled_releases: self.scaled_releases.unwrap_or(defaults.scaled_releases),
            release_alignment: self.release_alignment.unwrap_or(defaults.release_alignment),
            randomize_speaking: self.randomize.unwrap_or(defaults.randomize_speaking),
            release_length: parse_duration(
                "engine.release_length",
                self.release_length.as_deref(),
                defaults.release_length,
            )?,
            release_fade: self.release_fade.unwrap_or(defaults.release_fade),
            interpolation: self.interpolation.unwrap_or(defaults.interpolation),
        })
    }
}

/// A YAML representation of a tremulant.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Tremulant {
    name: String,

    /// Length of one modulation cycle (default: 200ms).
    period: Option<String>,

    /// Peak relative level change, 0 to 1 (default: 0.15).
    amplitude_depth: Option<f32>,

    /// Peak pitch change in cents (default: 4).
    pitch_depth: Option<f32>,

    start_time: Option<String>,

    stop_time: Option<String>,
}

impl Tremulant {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn to_setup(&self) -> Result<TremulantSetup, ConfigError> {
        let defaults = TremulantSetup::default();
        let field = |name: &str| format!("tremulant {}.{name}", self.name);
        Ok(TremulantSetup {
            period: parse_duration(&field("period"), self.period.as_deref(), defaults.period)?,
            amplitude_depth: self.amplitude_depth.unwrap_or(defaults.amplitude_depth),
            pitch_depth_cents: self.pitch_depth.unwrap_or(defaults.pitch_depth_cents),
            start_time: parse_duration(
                &field("start_time"),
                self.start_time.as_deref(),
                defaults.start_time,
            )?,
            stop_time: parse_duration(
                &field("stop_time"),
                self.stop_time.as_deref(),
                defaults.stop_time,
            )?,
        })
    }
}

/// A YAML representation of a windchest.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Windchest {
    name: String,

    /// Volume in dB (default: 0).
    volume: Option<f32>,

    /// Names of the tremulants acting on this windchest.
    #[serde(default)]
    tremulants: Vec<String>,
}

impl Windchest {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves tremulant names against the configured tremulants.
    pub fn to_setup(&self, tremulants: &[Tremulant]) -> Result<WindchestSetup, ConfigError> {
        let tremulants = self
            .tremulants
            .iter()
            .map(|name| {
                tremulants
                    .iter()
                    .position(|tremulant| tremulant.name == *name)
                    .ok_or_else(|| ConfigError::UnknownTremulant(name.clone()))
            })
            .collect::<Result<Vec<usize>, ConfigError>>()?;
        Ok(WindchestSetup {
            volume_db: self.volume.unwrap_or(0.0),
            tremulants,
        })
    }
}

/// A YAML representation of the reverb applied to every output.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Reverb {
    room_size: Option<f32>,
    damping: Option<f32>,
    wet: Option<f32>,
    dry: Option<f32>,
}

impl Reverb {
    pub fn to_setup(&self) -> Result<ReverbSetup, ConfigError> {
        let defaults = ReverbSetup::default();
        let setup = ReverbSetup {
            room_size: self.room_size.unwrap_or(defaults.room_size),
            damping: self.damping.unwrap_or(defaults.damping),
            wet: self.wet.unwrap_or(defaults.wet),
            dry: self.dry.unwrap_or(defaults.dry),
        };
        for (name, value) in [("room_size", setup.room_size), ("damping", setup.damping)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "reverb {name} must be between 0 and 1, got {value}"
                )));
            }
        }
        Ok(setup)
    }
}
