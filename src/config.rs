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

//! YAML configuration of an engine layout.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use duration_string::DurationString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::EngineSetup;

mod engine;
mod error;
mod output;

pub use engine::{Engine, Reverb, Tremulant, Windchest};
pub use error::ConfigError;
pub use output::{Output, MUTE_DB};

/// Name of the audio group used when none are configured.
const DEFAULT_AUDIO_GROUP: &str = "default";

/// The complete configuration file.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EngineConfig {
    #[serde(default)]
    engine: Engine,

    #[serde(default)]
    tremulants: Vec<Tremulant>,

    #[serde(default)]
    windchests: Vec<Windchest>,

    /// Names of the audio groups. Defaults to a single group.
    #[serde(default)]
    audio_groups: Vec<String>,

    /// Defaults to one stereo output taking every group.
    #[serde(default)]
    outputs: Vec<Output>,

    reverb: Option<Reverb>,
}

impl EngineConfig {
    /// Loads a configuration file. Values can be overridden from the
    /// environment, e.g. WINDCHEST_ENGINE__SAMPLE_RATE=44100.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading engine config");
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("WINDCHEST").separator("__"))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        Ok(config.with_defaults())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        Ok(config.with_defaults())
    }

    fn with_defaults(mut self) -> Self {
        if self.audio_groups.is_empty() {
            self.audio_groups.push(DEFAULT_AUDIO_GROUP.to_string());
        }
        if self.outputs.is_empty() {
            self.outputs.push(Output::stereo("default", &self.audio_groups));
        }
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn tremulants(&self) -> &[Tremulant] {
        &self.tremulants
    }

    pub fn windchests(&self) -> &[Windchest] {
        &self.windchests
    }

    pub fn audio_groups(&self) -> &[String] {
        &self.audio_groups
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Resolves names and defaults into a validated engine setup.
    pub fn to_setup(&self) -> Result<EngineSetup, ConfigError> {
        check_unique("tremulant", self.tremulants.iter().map(Tremulant::name))?;
        check_unique("windchest", self.windchests.iter().map(Windchest::name))?;
        check_unique("audio group", self.audio_groups.iter().map(String::as_str))?;
        check_unique("output", self.outputs.iter().map(Output::name))?;

        let mut setup = EngineSetup::new(self.engine.sample_rate(), self.engine.buffer_size(), 0);
        setup.hard_polyphony = self.engine.polyphony();
        setup.tremulants = self
            .tremulants
            .iter()
            .map(Tremulant::to_setup)
            .collect::<Result<_, _>>()?;
        setup.windchests = self
            .windchests
            .iter()
            .map(|windchest| windchest.to_setup(&self.tremulants))
            .collect::<Result<_, _>>()?;
        setup.audio_groups = self.audio_groups.len();
        setup.extra_release_groups = self.engine.release_groups();
        setup.outputs = self
            .outputs
            .iter()
            .map(|output| output.to_setup(&self.audio_groups))
            .collect::<Result<_, _>>()?;
        setup.reverb = self.reverb.as_ref().map(Reverb::to_setup).transpose()?;
        setup.settings = self.engine.settings()?;

        setup.validate()?;
        Ok(setup)
    }
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if seen.contains(&name) {
            return Err(ConfigError::Invalid(format!("duplicate {kind} name '{name}'")));
        }
        seen.push(name);
    }
    Ok(())
}

/// Parses an optional duration string such as "150ms". A bare "0" is zero.
pub(crate) fn parse_duration(
    field: &str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) if value.trim() == "0" => Ok(Duration::ZERO),
        Some(value) => DurationString::from_string(value.to_string())
            .map(Into::into)
            .map_err(|e| ConfigError::InvalidDuration {
                field: field.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::engine::{FadeShape, InterpolationType, StealPolicy};

    const ORGAN: &str = r#"
        engine:
          sample_rate: 44100
          buffer_size: 128
          polyphony: 64
          soft_limit: 48
          steal_policy: releases-first
          interpolation: linear
          volume: -6
          release_length: 2s
          release_fade: exponential
          release_groups: 2
        tremulants:
          - name: main
            period: 250ms
            amplitude_depth: 0.2
        windchests:
          - name: great
            tremulants: [main]
          - name: swell
            volume: -3
        audio_groups: [front, rear]
        outputs:
          - name: main
            latency: 20ms
            channels:
              - groups:
                  - name: front
                    left: 0
                  - name: rear
                    left: -6
              - groups:
                  - name: front
                    right: 0
        reverb:
          room_size: 0.5
    "#;

    #[test]
    fn test_full_config() {
        let config = EngineConfig::from_yaml(ORGAN).unwrap();
        let setup = config.to_setup().unwrap();

        assert_eq!(setup.sample_rate, 44100);
        assert_eq!(setup.samples_per_buffer, 128);
        assert_eq!(setup.hard_polyphony, 64);
        assert_eq!(setup.extra_release_groups, 2);
        assert_eq!(setup.tremulants.len(), 1);
        assert_eq!(setup.tremulants[0].period, Duration::from_millis(250));
        assert_eq!(setup.tremulants[0].amplitude_depth, 0.2);
        assert_eq!(setup.windchests[0].tremulants, vec![0]);
        assert_eq!(setup.windchests[1].volume_db, -3.0);
        assert_eq!(setup.audio_groups, 2);
        assert_eq!(setup.outputs[0].channels(), 2);
        assert_eq!(setup.outputs[0].scale_factors[1], vec![0.0, 1.0, 0.0, 0.0]);
        assert_eq!(setup.reverb.as_ref().map(|r| r.room_size), Some(0.5));

        let settings = &setup.settings;
        assert_eq!(settings.polyphony_soft_limit, Some(48));
        assert_eq!(settings.steal_policy, StealPolicy::ReleasesFirst);
        assert_eq!(settings.interpolation, InterpolationType::Linear);
        assert_eq!(settings.volume_db, -6);
        assert_eq!(settings.release_length, Duration::from_secs(2));
        assert_eq!(settings.release_fade, FadeShape::Exponential);
        assert_eq!(config.outputs()[0].latency().unwrap(), Duration::from_millis(20));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = EngineConfig::from_yaml("windchests:\n  - name: great\n").unwrap();
        assert_eq!(config.audio_groups(), ["default".to_string()]);
        assert_eq!(config.outputs().len(), 1);

        let setup = config.to_setup().unwrap();
        assert_eq!(setup.sample_rate, 48000);
        assert_eq!(setup.samples_per_buffer, 256);
        assert_eq!(setup.hard_polyphony, 256);
        assert_eq!(setup.outputs[0], crate::engine::AudioOutputSetup::stereo(1));
        assert!(setup.reverb.is_none());
    }

    #[test]
    fn test_unknown_tremulant() {
        let yaml = "windchests:\n  - name: great\n    tremulants: [missing]\n";
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.to_setup(),
            Err(ConfigError::UnknownTremulant(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_bad_duration() {
        let yaml = "tremulants:\n  - name: main\n    period: soon\n";
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.to_setup(),
            Err(ConfigError::InvalidDuration { field, .. }) if field == "tremulant main.period"
        ));
    }

    #[test]
    fn test_duplicate_names() {
        let yaml = "windchests:\n  - name: great\n  - name: great\n";
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.to_setup(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_engine_values() {
        let yaml = "engine:\n  polyphony: 8\n  soft_limit: 16\n";
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.to_setup(), Err(ConfigError::Engine(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organ.yaml");
        fs::write(&path, ORGAN).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.windchests().len(), 2);
        assert_eq!(config.engine().render_threads(), None);
        assert!(EngineConfig::load(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("x", Some("0"), Duration::MAX).unwrap(), Duration::ZERO);
        assert_eq!(
            parse_duration("x", Some("1500ms"), Duration::ZERO).unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(parse_duration("x", None, Duration::from_secs(1)).unwrap(), Duration::from_secs(1));
    }
}
