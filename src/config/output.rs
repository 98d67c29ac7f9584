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

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{parse_duration, ConfigError};
use crate::engine::AudioOutputSetup;

/// Volumes at or below this many dB mute a route.
pub const MUTE_DB: f32 = -121.0;

/// Highest route volume in dB.
const MAX_ROUTE_DB: f32 = 40.0;

const DEFAULT_LATENCY: Duration = Duration::from_millis(50);

/// A YAML representation of an audio output.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Output {
    name: String,

    /// Target device latency, e.g. "20ms" (default: 50ms).
    latency: Option<String>,

    /// One entry per output channel.
    channels: Vec<Channel>,
}

/// The audio groups mixed into one output channel.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Channel {
    #[serde(default)]
    groups: Vec<GroupRoute>,
}

/// How much of an audio group's left and right side a channel takes.
/// A side that is not given is muted.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GroupRoute {
    name: String,
    left: Option<f32>,
    right: Option<f32>,
}

impl Output {
    /// A stereo output taking the left side of every group on channel 0 and
    /// the right side on channel 1.
    pub fn stereo(name: &str, audio_groups: &[String]) -> Self {
        let route = |left: Option<f32>, right: Option<f32>| Channel {
            groups: audio_groups
                .iter()
                .map(|name| GroupRoute {
                    name: name.clone(),
                    left,
                    right,
                })
                .collect(),
        };
        Output {
            name: name.to_string(),
            latency: None,
            channels: vec![route(Some(0.0), None), route(None, Some(0.0))],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn latency(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            &format!("output {}.latency", self.name),
            self.latency.as_deref(),
            DEFAULT_LATENCY,
        )
    }

    /// Builds the scale factor matrix, resolving group names against
    /// `audio_groups`.
    pub fn to_setup(&self, audio_groups: &[String]) -> Result<AudioOutputSetup, ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "output {} has no channels",
                self.name
            )));
        }
        let scale_factors = self
            .channels
            .iter()
            .map(|channel| {
                let mut factors = vec![0.0; audio_groups.len() * 2];
                for route in &channel.groups {
                    let group = audio_groups
                        .iter()
                        .position(|name| *name == route.name)
                        .ok_or_else(|| ConfigError::UnknownAudioGroup(route.name.clone()))?;
                    factors[group * 2] += route_gain(route.left)?;
                    factors[group * 2 + 1] += route_gain(route.right)?;
                }
                Ok(factors)
            })
            .collect::<Result<Vec<Vec<f32>>, ConfigError>>()?;
        Ok(AudioOutputSetup { scale_factors })
    }
}

fn route_gain(volume_db: Option<f32>) -> Result<f32, ConfigError> {
    match volume_db {
        None => Ok(0.0),
        Some(db) if db <= MUTE_DB => Ok(0.0),
        Some(db) if db > MAX_ROUTE_DB || db.is_nan() => Err(ConfigError::Invalid(format!(
            "route volume {db} dB is above {MAX_ROUTE_DB} dB"
        ))),
        Some(db) => Ok(10f32.powf(db / 20.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> Vec<String> {
        vec!["front".to_string(), "rear".to_string()]
    }

    #[test]
    fn test_stereo_output() {
        let output = Output::stereo("main", &groups());
        let setup = output.to_setup(&groups()).unwrap();
        assert_eq!(setup.scale_factors, AudioOutputSetup::stereo(2).scale_factors);
        assert_eq!(output.latency().unwrap(), Duration::from_millis(50));
    }

    #[test]
    fn test_routes_and_mute() {
        let output = Output {
            name: "surround".to_string(),
            latency: Some("20ms".to_string()),
            channels: vec![Channel {
                groups: vec![
                    GroupRoute {
                        name: "rear".to_string(),
                        left: Some(-6.0),
                        right: Some(-121.0),
                    },
                    GroupRoute {
                        name: "front".to_string(),
                        left: Some(-200.0),
                        right: Some(0.0),
                    },
                ],
            }],
        };
        let setup = output.to_setup(&groups()).unwrap();
        let factors = &setup.scale_factors[0];
        assert_eq!(factors[0], 0.0);
        assert_eq!(factors[1], 1.0);
        assert!((factors[2] - 0.501).abs() < 0.001);
        assert_eq!(factors[3], 0.0);
        assert_eq!(output.latency().unwrap(), Duration::from_millis(20));
    }

    #[test]
    fn test_unknown_group() {
        let output = Output::stereo("main", &["organ".to_string()]);
        assert!(matches!(
            output.to_setup(&groups()),
            Err(ConfigError::UnknownAudioGroup(name)) if name == "organ"
        ));
    }

    #[test]
    fn test_route_volume_too_high() {
        assert!(route_gain(Some(41.0)).is_err());
        assert_eq!(route_gain(None).unwrap(), 0.0);
    }
}
