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

//! Sound providers: the sampled data and playback parameters of a pipe.
//!
//! The engine never owns providers. Voices refer to them by [`ProviderId`]
//! into an [`Instrument`] table that is shared with the engine through an
//! `Arc`.

use std::fmt;
use std::time::Duration;

mod error;
pub mod loader;
mod memory;
mod section;
pub mod synth;

pub use error::ProviderError;
pub use memory::MemoryProvider;
pub use section::{AudioSection, LoopRegion};

/// Index of a provider within an [`Instrument`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(pub u32);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of an audio section within a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SectionId(pub u16);

/// Everything the engine needs to know to play one pipe.
///
/// Methods are called from render threads when a release or switch is
/// processed, so implementations must not allocate or block.
pub trait SoundProvider: Send + Sync {
    /// The attack section to start for `velocity`, or None when the pipe has
    /// nothing to play.
    fn attack(&self, velocity: u8) -> Option<SectionId>;

    /// The release section to play after the attack was held for `held`.
    fn release(&self, held: Duration) -> Option<SectionId>;

    /// Looks up a section returned by [`attack`](Self::attack) or
    /// [`release`](Self::release).
    fn section(&self, id: SectionId) -> Option<&AudioSection>;

    /// Linear gain applied to everything the pipe plays.
    fn gain(&self) -> f32 {
        1.0
    }

    /// Pitch ratio applied on top of the section's sample rate conversion.
    fn tuning(&self) -> f32 {
        1.0
    }

    /// Level for a given velocity.
    fn velocity_volume(&self, velocity: u8) -> f32 {
        velocity as f32 / 127.0
    }

    /// One-shot pipes play to the end of their attack and ignore stops.
    fn is_one_shot(&self) -> bool {
        false
    }

    /// MIDI key of the pipe. Lower pipes fade out more slowly when they have
    /// no release section.
    fn midi_key(&self) -> u8 {
        60
    }

    /// Fade-in applied to the attack.
    fn attack_ramp(&self) -> Duration {
        Duration::ZERO
    }

    /// Crossfade between the attack and its release section.
    fn release_crossfade(&self) -> Duration {
        Duration::from_millis(20)
    }

    /// Crossfade used when a sounding voice switches to another provider.
    fn switch_crossfade(&self) -> Duration {
        Duration::from_millis(30)
    }
}

/// The table of providers an engine plays from.
#[derive(Default)]
pub struct Instrument {
    providers: Vec<Box<dyn SoundProvider>>,
}

impl Instrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a provider and returns its id.
    pub fn add(&mut self, provider: impl SoundProvider + 'static) -> ProviderId {
        self.providers.push(Box::new(provider));
        ProviderId(self.providers.len() as u32 - 1)
    }

    pub fn get(&self, id: ProviderId) -> Option<&dyn SoundProvider> {
        self.providers.get(id.0 as usize).map(|provider| provider.as_ref())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProviderId> {
        (0..self.providers.len() as u32).map(ProviderId)
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("providers", &self.providers.len())
            .finish()
    }
}
