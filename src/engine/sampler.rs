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

//! Sampler slots and the voices they hold.
//!
//! A slot is owned by the render threads while its voice sounds. The control
//! thread talks to it only through atomics tagged with the slot generation,
//! so a request made with a stale handle never matches and is ignored.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use super::fader::Fader;
use super::resample::{InterpolationType, ResamplerCoefs};
use super::settings::AtomicF32;
use super::StealPolicy;
use crate::provider::{AudioSection, ProviderId, SectionId};

/// Lifecycle of a voice as seen from the control thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    /// Allocated, waiting for its onset or still ramping in.
    Starting,
    Sustaining,
    /// Stopped by the player; its release is sounding.
    Releasing,
    /// Cut by polyphony limiting.
    ForcedRelease,
    Stopped,
}

impl VoiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => VoiceState::Starting,
            1 => VoiceState::Sustaining,
            2 => VoiceState::Releasing,
            3 => VoiceState::ForcedRelease,
            _ => VoiceState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            VoiceState::Starting => 0,
            VoiceState::Sustaining => 1,
            VoiceState::Releasing => 2,
            VoiceState::ForcedRelease => 3,
            VoiceState::Stopped => 4,
        }
    }

    /// True while the player still holds the voice.
    pub fn is_held(self) -> bool {
        matches!(self, VoiceState::Starting | VoiceState::Sustaining)
    }
}

/// Refers to one sounding voice. Handles go stale when the voice finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SamplerHandle {
    index: u32,
    generation: u32,
}

impl SamplerHandle {
    /// Handle of an onset waiting for the slot at `index`.
    pub(crate) fn parked(index: usize, generation: u32) -> Self {
        Self {
            index: index as u32,
            generation,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// The generation following `generation`. Zero is never used so it can mean
/// "no request".
pub(crate) fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

/// Per-onset humanisation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Speaking {
    pub jitter: u64,
    pub amplitude: f32,
    pub pitch: f64,
}

impl Speaking {
    pub const STEADY: Speaking = Speaking {
        jitter: 0,
        amplitude: 1.0,
        pitch: 1.0,
    };

    /// Up to 2 ms of onset jitter, 3% of amplitude variance and a cent of
    /// pitch drift.
    pub fn random(sample_rate: u32) -> Self {
        let mut rng = rand::thread_rng();
        let max_jitter = (sample_rate as u64 * 2) / 1000;
        Speaking {
            jitter: rng.gen_range(0..=max_jitter),
            amplitude: 1.0 + rng.gen_range(-0.03f32..=0.03),
            pitch: 2f64.powf(rng.gen_range(-1.0f64..=1.0) / 1200.0),
        }
    }
}

/// A validated request to start a voice, either immediately or once a stolen
/// slot frees up.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Onset {
    pub provider: ProviderId,
    pub section: SectionId,
    pub group: usize,
    pub audio_group: usize,
    pub windchest: Option<usize>,
    pub velocity: u8,
    pub start_at: u64,
    pub seq: u64,
    pub speaking: Speaking,
}

/// Render-side state of a voice.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Voice {
    pub provider: ProviderId,
    pub section: SectionId,
    pub audio_group: usize,
    pub windchest: Option<usize>,
    pub velocity: u8,
    pub speaking: Speaking,
    /// Read position in section frames.
    pub position: f64,
    /// Set once the position has wrapped around the section's loop.
    pub looped: bool,
    /// Section frames advanced per output frame, before tremulant pitch.
    pub increment: f64,
    pub fader: Fader,
    /// Linear gain of the provider.
    pub volume: f32,
    /// Engine frame of the onset.
    pub start_at: u64,
    pub started: bool,
    /// Engine frame up to which the voice has already been mixed.
    pub rendered_until: u64,
    pub state: VoiceState,
    /// Release and crossfade tails never release again.
    pub is_tail: bool,
    /// Provider to switch to once the current sound has faded out.
    pub pending_switch: Option<ProviderId>,
}

impl Voice {
    pub const IDLE: Voice = Voice {
        provider: ProviderId(0),
        section: SectionId(0),
        audio_group: 0,
        windchest: None,
        velocity: 0,
        speaking: Speaking::STEADY,
        position: 0.0,
        looped: false,
        increment: 1.0,
        fader: Fader::SILENT,
        volume: 0.0,
        start_at: 0,
        started: false,
        rendered_until: 0,
        state: VoiceState::Stopped,
        is_tail: false,
        pending_switch: None,
    };

    /// Mixes output frames `first..frames` into `out` (interleaved stereo).
    /// Returns false once the voice has run out of data or faded to silence.
    pub fn render(
        &mut self,
        section: &AudioSection,
        out: &mut [f32],
        first: usize,
        frames: usize,
        ctx: &VoiceContext<'_>,
        gain: f32,
    ) -> bool {
        let (left, right) = section.channels();
        let stereo = section.is_stereo();
        let region = section.loop_region();
        let end = section.frames() as f64;
        let gain = gain * self.volume;

        for frame in first..frames {
            let modulation = ctx.amplitude.map_or(1.0, |m| m[frame]);
            let level = self.fader.next_gain() * gain * modulation;
            let l = ctx.coefs.read(ctx.interpolation, left, self.position, region, self.looped);
            let r = if stereo {
                ctx.coefs.read(ctx.interpolation, right, self.position, region, self.looped)
            } else {
                l
            };
            out[frame * 2] += l * level;
            out[frame * 2 + 1] += r * level;

            let pitch = ctx.pitch.map_or(1.0, |m| m[frame] as f64);
            self.position += self.increment * pitch;
            match region {
                Some(region) if self.position >= region.end as f64 => {
                    self.position -= region.len() as f64;
                    self.looped = true;
                }
                None if self.position >= end => return false,
                _ => {}
            }
            if self.fader.is_silent() {
                return false;
            }
        }
        true
    }
}

/// What a group hands every voice it renders in a period.
#[derive(Clone, Copy)]
pub(crate) struct VoiceContext<'a> {
    pub coefs: &'a ResamplerCoefs,
    pub interpolation: InterpolationType,
    /// Per-frame tremulant amplitude factor.
    pub amplitude: Option<&'a [f32]>,
    /// Per-frame tremulant pitch factor.
    pub pitch: Option<&'a [f32]>,
    /// Engine gain.
    pub gain: f32,
}

/// A lock-free view of a slot used to pick steal victims.
#[derive(Clone, Copy, Debug)]
pub(crate) struct VoiceSnapshot {
    pub index: usize,
    pub generation: u32,
    pub state: VoiceState,
    pub amplitude: f32,
    pub seq: u64,
}

impl StealPolicy {
    /// Orders two candidates; the lesser one is stolen first.
    pub(crate) fn compare(self, a: &VoiceSnapshot, b: &VoiceSnapshot) -> CmpOrdering {
        let held = |s: &VoiceSnapshot| s.state.is_held();
        match self {
            StealPolicy::QuietestFirst => a
                .amplitude
                .total_cmp(&b.amplitude)
                .then(held(a).cmp(&held(b)))
                .then(a.seq.cmp(&b.seq)),
            StealPolicy::ReleasesFirst => held(a)
                .cmp(&held(b))
                .then(a.amplitude.total_cmp(&b.amplitude))
                .then(a.seq.cmp(&b.seq)),
            StealPolicy::OldestFirst => a.seq.cmp(&b.seq),
        }
    }
}

pub(crate) struct SamplerSlot {
    generation: AtomicU32,
    stop: AtomicU32,
    cut: AtomicU32,
    /// generation << 32 | velocity
    velocity: AtomicU64,
    /// generation << 32 | provider
    switch: AtomicU64,
    amplitude: AtomicF32,
    state: AtomicU8,
    seq: AtomicU64,
    parked: AtomicBool,
    /// A parked onset was cancelled, so its generation is never handed out.
    retired: AtomicBool,
    pub voice: Mutex<Voice>,
    /// Onset waiting for this slot's voice to finish.
    pub successor: Mutex<Option<Onset>>,
}

impl SamplerSlot {
    pub fn new() -> Self {
        Self {
            generation: AtomicU32::new(1),
            stop: AtomicU32::new(0),
            cut: AtomicU32::new(0),
            velocity: AtomicU64::new(0),
            switch: AtomicU64::new(0),
            amplitude: AtomicF32::new(0.0),
            state: AtomicU8::new(VoiceState::Stopped.as_u8()),
            seq: AtomicU64::new(0),
            parked: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            voice: Mutex::new(Voice::IDLE),
            successor: Mutex::new(None),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn handle(&self, index: usize) -> SamplerHandle {
        SamplerHandle {
            index: index as u32,
            generation: self.generation(),
        }
    }

    /// Moves the slot to its next generation, invalidating every handle and
    /// pending request. Must be called with the successor lock held.
    pub fn advance_generation(&self) -> u32 {
        let mut next = next_generation(self.generation());
        if self.retired.swap(false, Ordering::AcqRel) {
            next = next_generation(next);
        }
        self.generation.store(next, Ordering::Release);
        self.parked.store(false, Ordering::Release);
        next
    }

    pub fn request_stop(&self, generation: u32) {
        self.stop.store(generation, Ordering::Release);
    }

    pub fn request_cut(&self, generation: u32) {
        self.cut.store(generation, Ordering::Release);
    }

    pub fn request_velocity(&self, generation: u32, velocity: u8) {
        self.velocity
            .store(((generation as u64) << 32) | velocity as u64, Ordering::Release);
    }

    pub fn request_switch(&self, generation: u32, provider: ProviderId) {
        self.switch
            .store(((generation as u64) << 32) | provider.0 as u64, Ordering::Release);
    }

    pub fn take_stop(&self, generation: u32) -> bool {
        self.stop
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn take_cut(&self, generation: u32) -> bool {
        self.cut
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn cut_requested(&self, generation: u32) -> bool {
        self.cut.load(Ordering::Acquire) == generation
    }

    pub fn take_velocity(&self, generation: u32) -> Option<u8> {
        take_tagged(&self.velocity, generation).map(|value| value as u8)
    }

    pub fn take_switch(&self, generation: u32) -> Option<ProviderId> {
        take_tagged(&self.switch, generation).map(ProviderId)
    }

    pub fn set_parked(&self) {
        self.parked.store(true, Ordering::Release);
    }

    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    /// Drops the parked onset, if any. The handle returned for it stays
    /// stale after the slot moves on.
    pub fn cancel_successor(&self) -> bool {
        let mut successor = self.successor.lock();
        if successor.take().is_none() {
            return false;
        }
        self.parked.store(false, Ordering::Release);
        self.retired.store(true, Ordering::Release);
        true
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn set_seq(&self, seq: u64) {
        self.seq.store(seq, Ordering::Relaxed);
    }

    /// Publishes what the control thread may read without locking.
    pub fn publish(&self, state: VoiceState, amplitude: f32) {
        self.amplitude.store(amplitude);
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn state(&self) -> VoiceState {
        VoiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude.load()
    }

    pub fn snapshot(&self, index: usize) -> VoiceSnapshot {
        VoiceSnapshot {
            index,
            generation: self.generation(),
            state: self.state(),
            amplitude: self.amplitude(),
            seq: self.seq.load(Ordering::Relaxed),
        }
    }
}

fn take_tagged(cell: &AtomicU64, generation: u32) -> Option<u32> {
    let value = cell.load(Ordering::Acquire);
    if value == 0 || (value >> 32) as u32 != generation {
        return None;
    }
    cell.compare_exchange(value, 0, Ordering::AcqRel, Ordering::Relaxed)
        .ok()
        .map(|value| value as u32)
}
