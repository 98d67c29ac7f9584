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

//! The sound engine.
//!
//! Voices live in a fixed pool of sampler slots and are rendered in sampler
//! groups: one per tremulant, one per windchest and one or more release
//! groups that hold release tails. Group ids follow the instrument's view:
//! negative ids are tremulants (`-1` is tremulant 0), `0` is the main release
//! group, `1..=W` are the windchests and higher ids are extra release groups.
//!
//! A render cycle is `begin_period`, any number of threads calling
//! `run_worker`, `get_audio_output` for every output and `finish_period`.
//! `get_samples` does all of it for output 0.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

mod error;
mod fader;
mod group;
mod meter;
mod output;
mod pool;
mod resample;
mod reverb;
mod sampler;
mod scheduler;
mod settings;
mod setup;
mod tremulant;

#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use fader::FadeShape;
pub use meter::MeterInfo;
pub use resample::InterpolationType;
pub use sampler::{SamplerHandle, VoiceState};
pub use setup::{
    AudioOutputSetup, EngineSettings, EngineSetup, ReverbSetup, StealPolicy, TremulantSetup,
    WindchestSetup, MAX_RELEASE_LENGTH, MAX_VOLUME_DB, MIN_VOLUME_DB,
};
pub use tremulant::TremulantState;

use group::{GroupKind, SamplerGroup};
use meter::Meter;
use output::{AudioOutput, OutputGroup};
use pool::SamplerPool;
use resample::ResamplerCoefs;
use sampler::{next_generation, Onset, SamplerSlot, Speaking, VoiceSnapshot};
use scheduler::WorkSchedule;
use settings::{db_to_gain, AtomicF32, SharedSettings};
use tremulant::Tremulant;

use crate::provider::{Instrument, ProviderId};

/// Lowest windchest volume in dB.
const MIN_WINDCHEST_DB: f32 = -120.0;

/// Highest windchest volume in dB.
const MAX_WINDCHEST_DB: f32 = 40.0;

/// Gain shared by every voice of one windchest group.
pub(crate) struct Windchest {
    /// Linear gain applied while mixing.
    gain: AtomicF32,
    /// The volume as last set, in dB.
    volume_db: AtomicF32,
    /// Tremulants modulating this windchest.
    tremulants: Vec<usize>,
}

/// A polyphonic sampler: sampler slots, the groups that mix them, and the
/// outputs they feed. Control calls may come from any thread while render
/// workers process the current period.
pub struct SoundEngine {
    /// Providers that voices play from.
    instrument: Arc<Instrument>,
    sample_rate: u32,
    /// Largest period in frames.
    max_frames: usize,
    audio_groups: usize,
    /// Free sampler slots.
    pool: SamplerPool,
    /// One per unit of hard polyphony.
    slots: Box<[SamplerSlot]>,
    /// Tremulant groups, the first release group, windchests, then the
    /// extra release groups.
    groups: Box<[SamplerGroup]>,
    /// Indices into `groups` that take detached release tails.
    release_groups: Box<[usize]>,
    /// Round robin position over `release_groups`.
    next_release_group: AtomicUsize,
    windchests: Box<[Windchest]>,
    tremulants: Box<[Tremulant]>,
    /// One mix bus per audio group.
    output_groups: Box<[OutputGroup]>,
    outputs: Box<[AudioOutput]>,
    /// Work item states of the current period.
    schedule: WorkSchedule,
    coefs: ResamplerCoefs,
    settings: SharedSettings,
    /// Engine time in frames at the start of the current period.
    clock: AtomicU64,
    /// Length of the current period, zero between periods.
    period_frames: AtomicUsize,
    /// Onset counter used to order voices by age.
    onset_seq: AtomicU64,
    meter: Meter,
}

impl SoundEngine {
    /// Builds an engine playing from `instrument`. Everything the render path
    /// needs is allocated here.
    pub fn new(setup: &EngineSetup, instrument: Arc<Instrument>) -> Result<Self, EngineError> {
        setup.validate()?;

        let capacity = setup.hard_polyphony;
        let tremulant_count = setup.tremulants.len();
        let windchest_count = setup.windchests.len();

        let mut kinds: Vec<GroupKind> = (0..tremulant_count).map(GroupKind::Tremulant).collect();
        kinds.push(GroupKind::Release);
        kinds.extend((0..windchest_count).map(GroupKind::Windchest));
        kinds.extend((0..setup.extra_release_groups).map(|_| GroupKind::Release));

        let release_groups: Vec<usize> = kinds
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind == GroupKind::Release)
            .map(|(index, _)| index)
            .collect();

        let groups = kinds
            .iter()
            .map(|kind| SamplerGroup::new(*kind, capacity, setup.audio_groups, setup.samples_per_buffer))
            .collect();

        let windchest_tremulants: Vec<Vec<usize>> =
            setup.windchests.iter().map(|w| w.tremulants.clone()).collect();
        let schedule = WorkSchedule::new(
            tremulant_count,
            &kinds,
            &windchest_tremulants,
            setup.audio_groups,
        );

        let windchests = setup
            .windchests
            .iter()
            .map(|windchest| Windchest {
                gain: AtomicF32::new(db_to_gain(windchest.volume_db)),
                volume_db: AtomicF32::new(windchest.volume_db),
                tremulants: windchest.tremulants.clone(),
            })
            .collect();

        let tremulants = setup
            .tremulants
            .iter()
            .map(|tremulant| Tremulant::new(tremulant, setup.sample_rate, setup.samples_per_buffer))
            .collect();

        let outputs = setup
            .outputs
            .iter()
            .map(|output| AudioOutput::new(output, setup.reverb.as_ref(), setup.sample_rate))
            .collect();

        info!(
            sample_rate = setup.sample_rate,
            samples_per_buffer = setup.samples_per_buffer,
            polyphony = capacity,
            windchests = windchest_count,
            tremulants = tremulant_count,
            audio_groups = setup.audio_groups,
            outputs = setup.outputs.len(),
            providers = instrument.len(),
            "Sound engine configured"
        );

        Ok(Self {
            instrument,
            sample_rate: setup.sample_rate,
            max_frames: setup.samples_per_buffer,
            audio_groups: setup.audio_groups,
            pool: SamplerPool::new(capacity),
            slots: (0..capacity).map(|_| SamplerSlot::new()).collect(),
            groups,
            release_groups: release_groups.into_boxed_slice(),
            next_release_group: AtomicUsize::new(0),
            windchests,
            tremulants,
            output_groups: (0..setup.audio_groups)
                .map(|_| OutputGroup::new(setup.samples_per_buffer))
                .collect(),
            outputs,
            schedule,
            coefs: ResamplerCoefs::new(),
            settings: SharedSettings::new(&setup.settings, capacity),
            clock: AtomicU64::new(0),
            period_frames: AtomicUsize::new(0),
            onset_seq: AtomicU64::new(0),
            meter: Meter::new(),
        })
    }

    /// Starts a voice of `provider` in the group `group_id`, mixed into
    /// `audio_group`, after `delay`.
    ///
    /// Returns `Ok(None)` when the onset is dropped because the provider has
    /// nothing to play or no slot can be found.
    pub fn start_sample(
        &self,
        provider: ProviderId,
        group_id: i32,
        audio_group: usize,
        velocity: u8,
        delay: Duration,
    ) -> Result<Option<SamplerHandle>, EngineError> {
        let pipe = self
            .instrument
            .get(provider)
            .ok_or(EngineError::UnknownProvider(provider))?;
        let group = self
            .group_index(group_id)
            .ok_or(EngineError::UnknownGroup(group_id))?;
        if audio_group >= self.audio_groups {
            return Err(EngineError::UnknownAudioGroup(audio_group));
        }

        let Some(section) = pipe
            .attack(velocity)
            .filter(|section| pipe.section(*section).is_some())
        else {
            debug!(provider = %provider, velocity, "Provider has no attack, onset dropped");
            return Ok(None);
        };

        let speaking = if self.settings.randomize() {
            Speaking::random(self.sample_rate)
        } else {
            Speaking::STEADY
        };
        let onset = Onset {
            provider,
            section,
            group,
            audio_group,
            windchest: self.windchest_of(group),
            velocity,
            start_at: self.current_time() + self.frames_of(delay) as u64 + speaking.jitter,
            seq: self.next_seq(),
            speaking,
        };

        let handle = if self.settings.limiting() && self.pool.used() >= self.settings.soft_limit() {
            self.start_with_steal(onset)
        } else {
            self.start_in_free_slot(onset)
        };
        if handle.is_none() {
            debug!(provider = %provider, "Polyphony exhausted, onset dropped");
        }
        Ok(handle)
    }

    /// Releases a voice at the next period. Stale handles and one-shot
    /// providers are ignored.
    pub fn stop_sample(&self, provider: ProviderId, handle: SamplerHandle) {
        if self
            .instrument
            .get(provider)
            .is_some_and(|pipe| pipe.is_one_shot())
        {
            return;
        }
        if let Some(slot) = self.slots.get(handle.index()) {
            slot.request_stop(handle.generation());
        }
    }

    /// Crossfades a sounding voice to `provider`. The handle stays valid.
    pub fn switch_sample(&self, provider: ProviderId, handle: SamplerHandle) -> Result<(), EngineError> {
        if self.instrument.get(provider).is_none() {
            return Err(EngineError::UnknownProvider(provider));
        }
        if let Some(slot) = self.slots.get(handle.index()) {
            slot.request_switch(handle.generation(), provider);
        }
        Ok(())
    }

    /// Smoothly changes the level of a voice to match `velocity`.
    pub fn update_velocity(&self, handle: SamplerHandle, velocity: u8) {
        if let Some(slot) = self.slots.get(handle.index()) {
            slot.request_velocity(handle.generation(), velocity);
        }
    }

    /// Fades out every voice.
    pub fn stop_all(&self) {
        let mut count = 0;
        for slot in self.slots.iter() {
            slot.cancel_successor();
            if slot.state() != VoiceState::Stopped {
                slot.request_cut(slot.generation());
                count += 1;
            }
        }
        info!(voices = count, "Stopping all voices");
    }

    /// State of the voice behind `handle`, or None once it is stale.
    pub fn voice_state(&self, handle: SamplerHandle) -> Option<VoiceState> {
        let slot = self.slots.get(handle.index())?;
        let generation = slot.generation();
        if generation == handle.generation() {
            Some(slot.state())
        } else if next_generation(generation) == handle.generation() && slot.is_parked() {
            Some(VoiceState::Starting)
        } else {
            None
        }
    }

    /// Level of the voice behind `handle` as of the last period.
    pub fn voice_amplitude(&self, handle: SamplerHandle) -> Option<f32> {
        let slot = self.slots.get(handle.index())?;
        (slot.generation() == handle.generation()).then(|| slot.amplitude())
    }

    fn start_in_free_slot(&self, onset: Onset) -> Option<SamplerHandle> {
        let index = self.pool.allocate()?;
        let handle = self.slots[index as usize].handle(index as usize);
        self.start_onset(index, onset);
        Some(handle)
    }

    /// Forces the least audible voice out. The onset takes a free slot when
    /// one is left, otherwise it waits on the victim's slot.
    fn start_with_steal(&self, onset: Onset) -> Option<SamplerHandle> {
        let Some(victim) = self.choose_victim() else {
            return self.start_in_free_slot(onset);
        };
        let slot = &self.slots[victim.index];

        if let Some(handle) = self.start_in_free_slot(onset) {
            slot.request_cut(victim.generation);
            debug!(victim = victim.index, amplitude = victim.amplitude, "Voice stolen");
            return Some(handle);
        }

        let mut successor = slot.successor.lock();
        if slot.generation() != victim.generation || successor.is_some() {
            return None;
        }
        *successor = Some(onset);
        slot.set_parked();
        drop(successor);
        slot.request_cut(victim.generation);
        debug!(
            victim = victim.index,
            amplitude = victim.amplitude,
            "Voice stolen, onset waits for its slot"
        );
        Some(SamplerHandle::parked(victim.index, next_generation(victim.generation)))
    }

    fn choose_victim(&self) -> Option<VoiceSnapshot> {
        let policy = self.settings.steal_policy();
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (slot, slot.snapshot(index)))
            .filter(|(slot, snapshot)| {
                !matches!(snapshot.state, VoiceState::Stopped | VoiceState::ForcedRelease)
                    && !slot.is_parked()
                    && !slot.is_retired()
                    && !slot.cut_requested(snapshot.generation)
            })
            .map(|(_, snapshot)| snapshot)
            .min_by(|a, b| policy.compare(a, b))
    }

    /// Starts a period of `frames` frames, clamped to the configured buffer
    /// size. Returns the period length. No worker may be running.
    pub fn begin_period(&self, frames: usize) -> usize {
        let frames = frames.min(self.max_frames);
        self.period_frames.store(frames, Ordering::Release);
        if frames > 0 {
            self.schedule.reset();
        }
        frames
    }

    /// Advances the clock past the current period and publishes the meter.
    pub fn finish_period(&self) -> MeterInfo {
        let frames = self.period_frames.swap(0, Ordering::AcqRel);
        self.clock.fetch_add(frames as u64, Ordering::AcqRel);
        self.meter.publish(self.pool.used())
    }

    /// Engine time in frames.
    pub fn current_time(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn meter(&self) -> MeterInfo {
        self.meter.snapshot()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.max_frames
    }

    pub fn hard_polyphony(&self) -> usize {
        self.pool.capacity()
    }

    /// Sampler slots currently in use.
    pub fn active_voices(&self) -> usize {
        self.pool.used()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn output_channels(&self, output: usize) -> Option<usize> {
        self.outputs.get(output).map(AudioOutput::channels)
    }

    pub fn instrument(&self) -> &Arc<Instrument> {
        &self.instrument
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings.snapshot()
    }

    pub fn set_volume(&self, volume_db: i32) -> Result<(), EngineError> {
        if !(MIN_VOLUME_DB..=MAX_VOLUME_DB).contains(&volume_db) {
            return Err(out_of_range("volume", volume_db));
        }
        self.settings.set_volume_db(volume_db);
        Ok(())
    }

    pub fn set_polyphony_soft_limit(&self, limit: usize) -> Result<(), EngineError> {
        if limit == 0 || limit > self.pool.capacity() {
            return Err(out_of_range("polyphony soft limit", limit));
        }
        self.settings.set_soft_limit(limit);
        Ok(())
    }

    pub fn set_polyphony_limiting(&self, enabled: bool) {
        self.settings.set_limiting(enabled);
    }

    pub fn set_steal_policy(&self, policy: StealPolicy) {
        self.settings.set_steal_policy(policy);
    }

    pub fn set_scaled_releases(&self, enabled: bool) {
        self.settings.set_scaled_releases(enabled);
    }

    pub fn set_release_alignment(&self, enabled: bool) {
        self.settings.set_release_alignment(enabled);
    }

    pub fn set_randomize_speaking(&self, enabled: bool) {
        self.settings.set_randomize(enabled);
    }

    pub fn set_release_length(&self, length: Duration) -> Result<(), EngineError> {
        if length > MAX_RELEASE_LENGTH {
            return Err(out_of_range("release length", format!("{length:?}")));
        }
        self.settings.set_release_length(length);
        Ok(())
    }

    pub fn set_release_fade(&self, shape: FadeShape) {
        self.settings.set_release_fade(shape);
    }

    pub fn set_interpolation(&self, interpolation: InterpolationType) {
        self.settings.set_interpolation(interpolation);
    }

    /// Sets the volume of a windchest, by its 0-based index.
    pub fn set_windchest_volume(&self, windchest: usize, volume_db: f32) -> Result<(), EngineError> {
        let chest = self
            .windchests
            .get(windchest)
            .ok_or(EngineError::UnknownWindchest(windchest))?;
        if !(MIN_WINDCHEST_DB..=MAX_WINDCHEST_DB).contains(&volume_db) {
            return Err(out_of_range("windchest volume", volume_db));
        }
        chest.volume_db.store(volume_db);
        chest.gain.store(db_to_gain(volume_db));
        Ok(())
    }

    pub fn windchest_volume(&self, windchest: usize) -> Option<f32> {
        self.windchests.get(windchest).map(|chest| chest.volume_db.load())
    }

    /// Turns a tremulant on or off from the next period.
    pub fn set_tremulant(&self, tremulant: usize, enabled: bool) -> Result<(), EngineError> {
        let tremulant_ref = self
            .tremulants
            .get(tremulant)
            .ok_or(EngineError::UnknownTremulant(tremulant))?;
        tremulant_ref.set_enabled(enabled);
        debug!(tremulant, enabled, "Tremulant switched");
        Ok(())
    }

    pub fn tremulant_state(&self, tremulant: usize) -> Option<TremulantState> {
        self.tremulants
            .get(tremulant)
            .map(|tremulant| tremulant.modulator.lock().state())
    }

    /// Maps an instrument group id to a group index.
    fn group_index(&self, id: i32) -> Option<usize> {
        let tremulants = self.tremulants.len();
        let index = if id < 0 {
            let tremulant = id.unsigned_abs() as usize - 1;
            (tremulant < tremulants).then_some(tremulant)?
        } else {
            tremulants + id as usize
        };
        (index < self.groups.len()).then_some(index)
    }

    fn windchest_of(&self, group: usize) -> Option<usize> {
        match self.groups[group].kind {
            GroupKind::Windchest(windchest) => Some(windchest),
            _ => None,
        }
    }

    fn windchest_gain(&self, windchest: Option<usize>) -> f32 {
        windchest.map_or(1.0, |windchest| self.windchests[windchest].gain.load())
    }

    fn next_release_group(&self) -> usize {
        let next = self.next_release_group.fetch_add(1, Ordering::Relaxed);
        self.release_groups[next % self.release_groups.len()]
    }

    fn next_seq(&self) -> u64 {
        self.onset_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn period_frames(&self) -> usize {
        self.period_frames.load(Ordering::Acquire)
    }

    fn frames_of(&self, duration: Duration) -> u32 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u32
    }

    fn duration_of(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

fn out_of_range(name: &'static str, value: impl ToString) -> EngineError {
    EngineError::OutOfRange {
        name,
        value: value.to_string(),
    }
}

impl fmt::Debug for SoundEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundEngine")
            .field("sample_rate", &self.sample_rate)
            .field("samples_per_buffer", &self.max_frames)
            .field("active_voices", &self.pool.used())
            .field("hard_polyphony", &self.pool.capacity())
            .field("groups", &self.groups.len())
            .field("outputs", &self.outputs.len())
            .field("current_time", &self.current_time())
            .finish()
    }
}
