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

//! A small synthetic organ and a score to play on it, used by the CLI and
//! the benches.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{SamplerHandle, SoundEngine};
use crate::provider::loader::SectionLoader;
use crate::provider::synth::{key_frequency, OrganTone};
use crate::provider::{Instrument, MemoryProvider, ProviderError, ProviderId};

/// Lowest key of every demo rank.
pub const LOWEST_KEY: u8 = 36;

/// Highest key of every demo rank.
pub const HIGHEST_KEY: u8 = 84;

/// Keys played by a rank, mapped to their providers.
#[derive(Clone, Debug)]
pub struct Rank {
    pub name: String,
    /// Group id the rank plays in.
    pub group: i32,
    providers: Vec<ProviderId>,
    /// True when every key plays the same provider.
    single: bool,
}

impl Rank {
    pub fn provider(&self, key: u8) -> Option<ProviderId> {
        if self.single {
            return self.providers.first().copied();
        }
        let index = key.checked_sub(LOWEST_KEY)? as usize;
        self.providers.get(index).copied()
    }
}

/// The demo instrument: one additive rank per windchest, plus an optional
/// rank playing a WAV file.
pub struct DemoOrgan {
    pub instrument: Instrument,
    pub ranks: Vec<Rank>,
}

const VOICINGS: [(&str, &[f32]); 3] = [
    ("principal", &[1.0, 0.5, 0.35, 0.15, 0.1]),
    ("flute", &[1.0, 0.12, 0.05]),
    ("string", &[0.6, 0.5, 0.45, 0.4, 0.3, 0.25, 0.2]),
];

impl DemoOrgan {
    /// Builds a rank for each of `windchests` windchests (at least one).
    /// With `sample`, a rank playing that WAV file is added on the first
    /// windchest.
    pub fn new(
        sample_rate: u32,
        windchests: usize,
        sample: Option<&Path>,
    ) -> Result<Self, ProviderError> {
        let mut instrument = Instrument::new();
        let mut ranks = Vec::new();

        for windchest in 0..windchests.max(1) {
            let (name, harmonics) = VOICINGS[windchest % VOICINGS.len()];
            let providers = (LOWEST_KEY..=HIGHEST_KEY)
                .map(|key| {
                    let tone = OrganTone::new(sample_rate, key_frequency(key))
                        .with_harmonics(harmonics)
                        .with_release(Duration::from_millis(400));
                    Ok(instrument.add(tone.pipe(key)?))
                })
                .collect::<Result<Vec<_>, ProviderError>>()?;
            ranks.push(Rank {
                name: name.to_string(),
                group: windchests.min(windchest + 1) as i32,
                providers,
                single: false,
            });
        }

        if let Some(path) = sample {
            let section = SectionLoader::new(sample_rate).load(path)?;
            let provider = MemoryProvider::new().with_attack(1, section);
            ranks.push(Rank {
                name: "sample".to_string(),
                group: windchests.min(1) as i32,
                providers: vec![instrument.add(provider)],
                single: true,
            });
        }

        debug!(ranks = ranks.len(), providers = instrument.len(), "Demo organ built");
        Ok(Self { instrument, ranks })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Action {
    NoteOn { rank: usize, key: u8, velocity: u8 },
    NoteOff { rank: usize, key: u8 },
    Tremulant { index: usize, enabled: bool },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreEvent {
    pub at: Duration,
    pub action: Action,
}

/// Time-ordered events.
#[derive(Clone, Debug, Default)]
pub struct Score {
    events: Vec<ScoreEvent>,
}

/// Chords of the demo progression, as offsets from middle C.
const PROGRESSION: [[i8; 4]; 4] = [[-12, 0, 4, 7], [-7, 2, 5, 9], [-15, 0, 5, 9], [-17, 2, 5, 11]];

impl Score {
    pub fn new(mut events: Vec<ScoreEvent>) -> Self {
        events.sort_by_key(|event| event.at);
        Self { events }
    }

    /// A chord progression on every rank lasting `length`, with a running
    /// scale on top and the first tremulant coming on halfway.
    pub fn demo(length: Duration, ranks: usize, tremulants: usize) -> Self {
        let chord = Duration::from_millis(1500);
        let step = Duration::from_millis(125);
        let mut events = Vec::new();

        let mut at = Duration::ZERO;
        let mut index = 0;
        while at + chord <= length {
            let keys = PROGRESSION[index % PROGRESSION.len()];
            for rank in 0..ranks {
                for offset in keys {
                    let key = (60 + offset as i16) as u8;
                    events.push(ScoreEvent {
                        at,
                        action: Action::NoteOn { rank, key, velocity: 96 },
                    });
                    events.push(ScoreEvent {
                        at: at + chord - Duration::from_millis(20),
                        action: Action::NoteOff { rank, key },
                    });
                }
            }
            for (n, key) in [72u8, 74, 76, 77, 79, 77, 76, 74].into_iter().enumerate() {
                let start = at + step * n as u32;
                events.push(ScoreEvent {
                    at: start,
                    action: Action::NoteOn { rank: 0, key, velocity: 80 },
                });
                events.push(ScoreEvent {
                    at: start + step - Duration::from_millis(10),
                    action: Action::NoteOff { rank: 0, key },
                });
            }
            at += chord;
            index += 1;
        }

        if tremulants > 0 {
            events.push(ScoreEvent {
                at: length / 2,
                action: Action::Tremulant { index: 0, enabled: true },
            });
        }
        Self::new(events)
    }

    pub fn events(&self) -> &[ScoreEvent] {
        &self.events
    }

    /// Time of the last event.
    pub fn length(&self) -> Duration {
        self.events.last().map_or(Duration::ZERO, |event| event.at)
    }
}

/// Applies a score to an engine as engine time passes.
pub struct ScorePlayer {
    score: Score,
    ranks: Vec<Rank>,
    next: usize,
    sounding: HashMap<(usize, u8), (ProviderId, SamplerHandle)>,
}

impl ScorePlayer {
    pub fn new(score: Score, ranks: Vec<Rank>) -> Self {
        Self {
            score,
            ranks,
            next: 0,
            sounding: HashMap::new(),
        }
    }

    /// Sends every event due before the end of the next `frames` frames.
    /// Events are offset into the period with their exact delay.
    pub fn apply(&mut self, engine: &SoundEngine, frames: usize) {
        let rate = engine.sample_rate() as f64;
        let now = Duration::from_secs_f64(engine.current_time() as f64 / rate);
        let end = now + Duration::from_secs_f64(frames as f64 / rate);

        while let Some(event) = self.score.events.get(self.next) {
            if event.at >= end {
                break;
            }
            let delay = event.at.saturating_sub(now);
            self.perform(engine, event.action, delay);
            self.next += 1;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.score.events.len()
    }

    fn perform(&mut self, engine: &SoundEngine, action: Action, delay: Duration) {
        match action {
            Action::NoteOn { rank, key, velocity } => {
                let Some((provider, group)) = self
                    .ranks
                    .get(rank)
                    .and_then(|r| r.provider(key).map(|p| (p, r.group)))
                else {
                    return;
                };
                match engine.start_sample(provider, group, 0, velocity, delay) {
                    Ok(Some(handle)) => {
                        if let Some((old_provider, old)) =
                            self.sounding.insert((rank, key), (provider, handle))
                        {
                            engine.stop_sample(old_provider, old);
                        }
                    }
                    Ok(None) => debug!(rank, key, "Note dropped"),
                    Err(e) => warn!(err = %e, rank, key, "Failed to start note"),
                }
            }
            Action::NoteOff { rank, key } => {
                if let Some((provider, handle)) = self.sounding.remove(&(rank, key)) {
                    engine.stop_sample(provider, handle);
                }
            }
            Action::Tremulant { index, enabled } => {
                if let Err(e) = engine.set_tremulant(index, enabled) {
                    warn!(err = %e, index, "Failed to switch tremulant");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{EngineSetup, TremulantSetup, WindchestSetup};

    #[test]
    fn test_demo_organ_ranks() {
        let organ = DemoOrgan::new(48000, 2, None).unwrap();
        assert_eq!(organ.ranks.len(), 2);
        assert_eq!(organ.ranks[0].group, 1);
        assert_eq!(organ.ranks[1].group, 2);
        let keys = (HIGHEST_KEY - LOWEST_KEY + 1) as usize;
        assert_eq!(organ.instrument.len(), keys * 2);
        assert!(organ.ranks[0].provider(LOWEST_KEY).is_some());
        assert!(organ.ranks[0].provider(HIGHEST_KEY + 1).is_none());
        assert!(organ.ranks[0].provider(LOWEST_KEY - 1).is_none());
    }

    #[test]
    fn test_demo_score_is_ordered() {
        let score = Score::demo(Duration::from_secs(6), 2, 1);
        assert!(!score.events().is_empty());
        assert!(score.events().windows(2).all(|w| w[0].at <= w[1].at));
        assert!(score.length() <= Duration::from_secs(6));
        assert!(score.events().iter().any(|e| matches!(
            e.action,
            Action::Tremulant { index: 0, enabled: true }
        )));
    }

    #[test]
    fn test_player_drives_engine() {
        let organ = DemoOrgan::new(48000, 1, None).unwrap();
        let mut setup = EngineSetup::new(48000, 256, 0);
        setup.tremulants = vec![TremulantSetup::default()];
        setup.windchests = vec![WindchestSetup {
            volume_db: 0.0,
            tremulants: vec![0],
        }];
        let engine = SoundEngine::new(&setup, Arc::new(organ.instrument)).unwrap();
        let score = Score::demo(Duration::from_secs(3), 1, 1);
        let mut player = ScorePlayer::new(score, organ.ranks);

        let mut buffer = vec![0.0; 512];
        let mut peak = 0.0f32;
        while !player.is_finished() {
            player.apply(&engine, 256);
            let info = engine.get_samples(&mut buffer, 256);
            peak = peak.max(info.meter_left);
        }
        assert!(peak > 0.1);
        assert!(player.sounding.is_empty());

        let mut silent_after = false;
        for _ in 0..400 {
            engine.get_samples(&mut buffer, 256);
            if engine.active_voices() == 0 {
                silent_after = true;
                break;
            }
        }
        assert!(silent_after);
    }
}
