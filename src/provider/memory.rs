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

use super::{AudioSection, SectionId, SoundProvider};

/// A provider whose sections are held in memory.
///
/// Attacks are layered by minimum velocity; releases are chosen by the
/// shortest maximum hold time that covers how long the attack sounded.
#[derive(Clone, Debug)]
pub struct MemoryProvider {
    sections: Vec<AudioSection>,
    /// (minimum velocity, section), sorted by velocity.
    attacks: Vec<(u8, SectionId)>,
    /// (maximum hold time, section), sorted with unbounded entries last.
    releases: Vec<(Option<Duration>, SectionId)>,
    gain: f32,
    tuning: f32,
    one_shot: bool,
    midi_key: u8,
    velocity_sensitive: bool,
    attack_ramp: Duration,
    release_crossfade: Duration,
    switch_crossfade: Duration,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
            attacks: Vec::new(),
            releases: Vec::new(),
            gain: 1.0,
            tuning: 1.0,
            one_shot: false,
            midi_key: 60,
            velocity_sensitive: true,
            attack_ramp: Duration::ZERO,
            release_crossfade: Duration::from_millis(20),
            switch_crossfade: Duration::from_millis(30),
        }
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attack played for velocities of at least `min_velocity`.
    pub fn with_attack(mut self, min_velocity: u8, section: AudioSection) -> Self {
        let id = self.push_section(section);
        self.attacks.push((min_velocity, id));
        self.attacks.sort_by_key(|(velocity, _)| *velocity);
        self
    }

    /// Adds a release played when the attack was held for at most
    /// `max_held`, or for any length when None.
    pub fn with_release(mut self, max_held: Option<Duration>, section: AudioSection) -> Self {
        let id = self.push_section(section);
        self.releases.push((max_held, id));
        self.releases
            .sort_by_key(|(held, _)| held.unwrap_or(Duration::MAX));
        self
    }

    pub fn with_gain_db(mut self, gain_db: f32) -> Self {
        self.gain = 10f32.powf(gain_db / 20.0);
        self
    }

    pub fn with_tuning_cents(mut self, cents: f32) -> Self {
        self.tuning = 2f32.powf(cents / 1200.0);
        self
    }

    pub fn with_one_shot(mut self, one_shot: bool) -> Self {
        self.one_shot = one_shot;
        self
    }

    pub fn with_midi_key(mut self, midi_key: u8) -> Self {
        self.midi_key = midi_key;
        self
    }

    /// Disables velocity scaling so every onset plays at full level.
    pub fn with_velocity_sensitive(mut self, velocity_sensitive: bool) -> Self {
        self.velocity_sensitive = velocity_sensitive;
        self
    }

    pub fn with_attack_ramp(mut self, ramp: Duration) -> Self {
        self.attack_ramp = ramp;
        self
    }

    pub fn with_release_crossfade(mut self, crossfade: Duration) -> Self {
        self.release_crossfade = crossfade;
        self
    }

    pub fn with_switch_crossfade(mut self, crossfade: Duration) -> Self {
        self.switch_crossfade = crossfade;
        self
    }

    /// Bytes of sample data held by this provider.
    pub fn memory_usage(&self) -> usize {
        self.sections.iter().map(AudioSection::memory_usage).sum()
    }

    fn push_section(&mut self, section: AudioSection) -> SectionId {
        self.sections.push(section);
        SectionId(self.sections.len() as u16 - 1)
    }
}

impl SoundProvider for MemoryProvider {
    fn attack(&self, velocity: u8) -> Option<SectionId> {
        if velocity == 0 {
            return None;
        }
        self.attacks
            .iter()
            .rev()
            .find(|(min_velocity, _)| *min_velocity <= velocity)
            .or_else(|| self.attacks.first())
            .map(|(_, id)| *id)
    }

    fn release(&self, held: Duration) -> Option<SectionId> {
        self.releases
            .iter()
            .find(|(max_held, _)| max_held.map_or(true, |max| held <= max))
            .map(|(_, id)| *id)
    }

    fn section(&self, id: SectionId) -> Option<&AudioSection> {
        self.sections.get(id.0 as usize)
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn tuning(&self) -> f32 {
        self.tuning
    }

    fn velocity_volume(&self, velocity: u8) -> f32 {
        if self.velocity_sensitive {
            velocity.min(127) as f32 / 127.0
        } else {
            1.0
        }
    }

    fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    fn midi_key(&self) -> u8 {
        self.midi_key
    }

    fn attack_ramp(&self) -> Duration {
        self.attack_ramp
    }

    fn release_crossfade(&self) -> Duration {
        self.release_crossfade
    }

    fn switch_crossfade(&self) -> Duration {
        self.switch_crossfade
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(value: f32) -> AudioSection {
        AudioSection::mono(48000, vec![value; 16]).unwrap()
    }

    #[test]
    fn test_attack_velocity_layers() {
        let provider = MemoryProvider::new()
            .with_attack(64, section(0.2))
            .with_attack(1, section(0.1));

        let soft = provider.attack(10).unwrap();
        let loud = provider.attack(100).unwrap();
        assert_eq!(provider.section(soft).unwrap().channels().0[0], 0.1);
        assert_eq!(provider.section(loud).unwrap().channels().0[0], 0.2);
        assert!(provider.attack(0).is_none());
        assert!(MemoryProvider::new().attack(100).is_none());
    }

    #[test]
    fn test_release_by_hold_time() {
        let provider = MemoryProvider::new()
            .with_attack(1, section(1.0))
            .with_release(None, section(0.3))
            .with_release(Some(Duration::from_millis(200)), section(0.4));

        let short = provider.release(Duration::from_millis(50)).unwrap();
        let long = provider.release(Duration::from_secs(3)).unwrap();
        assert_eq!(provider.section(short).unwrap().channels().0[0], 0.4);
        assert_eq!(provider.section(long).unwrap().channels().0[0], 0.3);
    }

    #[test]
    fn test_gain_and_tuning() {
        let provider = MemoryProvider::new()
            .with_gain_db(-6.0)
            .with_tuning_cents(1200.0)
            .with_velocity_sensitive(false);
        assert!((provider.gain() - 0.501).abs() < 1e-3);
        assert!((provider.tuning() - 2.0).abs() < 1e-5);
        assert_eq!(provider.velocity_volume(1), 1.0);
    }
}
