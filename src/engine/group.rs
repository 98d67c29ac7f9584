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

//! Sampler groups and the per-period voice processing.

use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::fader::{Fader, FadeShape};
use super::sampler::{Onset, Voice, VoiceContext, VoiceState};
use super::SoundEngine;
use crate::provider::{AudioSection, ProviderId, SectionId, SoundProvider};

/// Length of the fade applied to voices cut by polyphony limiting.
const FORCED_FADE: Duration = Duration::from_millis(20);

/// Release decay used while the pool is under pressure.
const PRESSURE_RELEASE: Duration = Duration::from_millis(100);

/// Smoothing of velocity changes.
const VELOCITY_RAMP: Duration = Duration::from_millis(10);

/// Hold time below which scaled releases are quieter.
const SCALED_RELEASE_HOLD: Duration = Duration::from_secs(1);

/// Hold time below which scaled releases also decay faster.
const SHORT_NOTE: Duration = Duration::from_millis(256);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GroupKind {
    Tremulant(usize),
    Windchest(usize),
    Release,
}

/// The voices one work item renders together.
pub(crate) struct SamplerGroup {
    pub kind: GroupKind,
    /// Structural list: pushes from any thread, swapped out while rendering.
    voices: Mutex<Vec<u32>>,
    pub render: RwLock<GroupRender>,
}

/// State owned by whichever thread processes the group.
pub(crate) struct GroupRender {
    /// `audio_groups × max_frames × 2` interleaved stereo samples.
    pub buffer: Vec<f32>,
    /// True when nothing was rendered this period.
    pub silent: bool,
    processing: Vec<u32>,
    amplitude: Vec<f32>,
    pitch: Vec<f32>,
}

impl SamplerGroup {
    pub fn new(kind: GroupKind, capacity: usize, audio_groups: usize, max_frames: usize) -> Self {
        Self {
            kind,
            voices: Mutex::new(Vec::with_capacity(capacity)),
            render: RwLock::new(GroupRender {
                buffer: vec![0.0; audio_groups * max_frames * 2],
                silent: true,
                processing: Vec::with_capacity(capacity),
                amplitude: vec![1.0; max_frames],
                pitch: vec![1.0; max_frames],
            }),
        }
    }

    /// Adds a voice; it is rendered from the next pass on.
    pub fn add_voice(&self, index: u32) {
        self.voices.lock().push(index);
    }

    pub fn voice_count(&self) -> usize {
        self.voices.lock().len()
    }
}

/// The period being rendered.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Period {
    pub now: u64,
    pub frames: usize,
}

impl Period {
    fn end(&self) -> u64 {
        self.now + self.frames as u64
    }
}

impl SoundEngine {
    pub(super) fn process_tremulant(&self, index: usize) {
        let tremulant = &self.tremulants[index];
        let enabled = tremulant.is_enabled();
        tremulant.modulator.lock().process(enabled, self.period_frames());
    }

    pub(super) fn process_group(&self, index: usize) {
        let group = &self.groups[index];
        let period = Period {
            now: self.current_time(),
            frames: self.period_frames(),
        };
        let stride = self.max_frames * 2;

        let mut guard = group.render.write();
        let render = &mut *guard;
        for audio_group in 0..self.audio_groups {
            let start = audio_group * stride;
            render.buffer[start..start + period.frames * 2].fill(0.0);
        }

        std::mem::swap(&mut *group.voices.lock(), &mut render.processing);
        render.silent = render.processing.is_empty();
        if render.silent {
            return;
        }

        let modulated = self.prepare_modulation(group.kind, period.frames, render);
        let GroupRender {
            buffer,
            processing,
            amplitude,
            pitch,
            ..
        } = render;
        let ctx = VoiceContext {
            coefs: &self.coefs,
            interpolation: self.settings.interpolation(),
            amplitude: modulated.then_some(&amplitude[..period.frames]),
            pitch: modulated.then_some(&pitch[..period.frames]),
            gain: self.settings.gain(),
        };

        processing.retain(|index| self.process_voice(*index, buffer, &ctx, period));
        group.voices.lock().extend_from_slice(processing);
        processing.clear();
    }

    /// Combines the group's tremulants into the render scratch buffers.
    /// Returns false when no tremulant is active.
    fn prepare_modulation(&self, kind: GroupKind, frames: usize, render: &mut GroupRender) -> bool {
        let tremulants: &[usize] = match &kind {
            GroupKind::Tremulant(tremulant) => std::slice::from_ref(tremulant),
            GroupKind::Windchest(windchest) => &self.windchests[*windchest].tremulants,
            GroupKind::Release => &[],
        };

        let mut active = false;
        for tremulant in tremulants {
            let modulator = self.tremulants[*tremulant].modulator.lock();
            if !modulator.is_active() {
                continue;
            }
            let amplitude = &modulator.amplitude()[..frames];
            let pitch = &modulator.pitch()[..frames];
            if active {
                for (dst, src) in render.amplitude.iter_mut().zip(amplitude) {
                    *dst *= src;
                }
                for (dst, src) in render.pitch.iter_mut().zip(pitch) {
                    *dst *= src;
                }
            } else {
                render.amplitude[..frames].copy_from_slice(amplitude);
                render.pitch[..frames].copy_from_slice(pitch);
                active = true;
            }
        }
        active
    }

    /// Applies pending requests to a voice and renders it. Returns false when
    /// the voice finished and its slot was handed back.
    fn process_voice(&self, index: u32, buffer: &mut [f32], ctx: &VoiceContext<'_>, period: Period) -> bool {
        let slot = &self.slots[index as usize];
        let generation = slot.generation();
        let mut voice = slot.voice.lock();

        let mut alive = self.apply_requests(index, generation, &mut voice, buffer, ctx, period)
            && self.render_voice(&mut voice, buffer, ctx, period);
        if !alive && voice.pending_switch.is_some() {
            alive = self.restart_switched(&mut voice);
        }

        if alive {
            slot.publish(voice.state, voice.fader.gain() * voice.volume);
            true
        } else {
            voice.state = VoiceState::Stopped;
            drop(voice);
            self.finish_slot(index);
            false
        }
    }

    fn apply_requests(
        &self,
        index: u32,
        generation: u32,
        voice: &mut Voice,
        buffer: &mut [f32],
        ctx: &VoiceContext<'_>,
        period: Period,
    ) -> bool {
        let slot = &self.slots[index as usize];

        if slot.take_cut(generation) {
            // A cut before the onset is due drops the voice silently.
            if !voice.started && voice.start_at >= period.end() {
                return false;
            }
            voice.fader.hold();
            voice.fader.start_decay(self.frames_of(FORCED_FADE), FadeShape::Linear);
            voice.state = VoiceState::ForcedRelease;
            voice.pending_switch = None;
        }

        if slot.take_stop(generation) {
            if !voice.started {
                return false;
            }
            self.release_voice(voice, buffer, ctx, period);
        }

        if let Some(velocity) = slot.take_velocity(generation) {
            if voice.state.is_held() {
                if let Some(provider) = self.instrument.get(voice.provider) {
                    voice.velocity = velocity;
                    let level = provider.velocity_volume(velocity) * voice.speaking.amplitude;
                    voice.fader.ramp_to(level, self.frames_of(VELOCITY_RAMP));
                }
            }
        }

        if let Some(provider) = slot.take_switch(generation) {
            if voice.state.is_held() {
                self.switch_voice(voice, provider, buffer, ctx, period);
            }
        }
        true
    }

    /// Mixes the part of the period a voice has not rendered yet.
    fn render_voice(&self, voice: &mut Voice, buffer: &mut [f32], ctx: &VoiceContext<'_>, period: Period) -> bool {
        if voice.start_at >= period.end() {
            return true;
        }
        let first = voice
            .start_at
            .max(voice.rendered_until)
            .saturating_sub(period.now) as usize;
        if first >= period.frames {
            return true;
        }
        let Some(section) = self.section(voice.provider, voice.section) else {
            return false;
        };

        let stride = self.max_frames * 2;
        let start = voice.audio_group * stride;
        let out = &mut buffer[start..start + period.frames * 2];
        let gain = ctx.gain * self.windchest_gain(voice.windchest);

        voice.started = true;
        let alive = voice.render(section, out, first, period.frames, ctx, gain);
        voice.rendered_until = period.end();
        if voice.state == VoiceState::Starting && !voice.fader.is_ramping() {
            voice.state = VoiceState::Sustaining;
        }
        alive
    }

    /// Moves a held voice into its release: starts the release tail in a
    /// release group and fades the attack out under it.
    fn release_voice(&self, voice: &mut Voice, buffer: &mut [f32], ctx: &VoiceContext<'_>, period: Period) {
        if !voice.state.is_held() {
            return;
        }
        let Some(provider) = self.instrument.get(voice.provider) else {
            return;
        };
        if provider.is_one_shot() {
            return;
        }

        let held = self.duration_of(period.now.saturating_sub(voice.start_at));
        voice.fader.hold();
        voice.state = VoiceState::Releasing;
        voice.pending_switch = None;

        let tail = if voice.is_tail {
            None
        } else {
            provider.release(held)
        };
        let tail_started = tail.is_some_and(|section| {
            self.start_release_tail(voice, provider, section, held, buffer, ctx, period)
        });

        if tail_started {
            voice
                .fader
                .start_decay(self.frames_of(provider.release_crossfade()), FadeShape::Linear);
        } else {
            let length = match self.settings.release_length() {
                length if length.is_zero() => release_fade(provider.midi_key()),
                length => length,
            };
            voice
                .fader
                .start_decay(self.frames_of(length), self.settings.release_fade());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn start_release_tail(
        &self,
        attack: &Voice,
        provider: &dyn SoundProvider,
        section_id: SectionId,
        held: Duration,
        buffer: &mut [f32],
        ctx: &VoiceContext<'_>,
        period: Period,
    ) -> bool {
        let Some(section) = provider.section(section_id) else {
            return false;
        };
        let Some(index) = self.pool.allocate() else {
            return false;
        };

        let shape = self.settings.release_fade();
        let mut fader = Fader::attacking(
            attack.fader.level(),
            self.frames_of(provider.release_crossfade()),
        );
        if self.settings.scaled_releases() && held < SCALED_RELEASE_HOLD {
            fader.scale(0.5 + 0.5 * held.as_secs_f32() / SCALED_RELEASE_HOLD.as_secs_f32());
            if held < SHORT_NOTE {
                fader.start_decay(self.frames_of(SHORT_NOTE + held), shape);
            }
        }
        let release_length = self.settings.release_length();
        if !release_length.is_zero() {
            fader.start_decay(self.frames_of(release_length), shape);
        }
        if self.settings.limiting() && self.pool.used() >= self.settings.soft_limit() {
            fader.start_decay(self.frames_of(PRESSURE_RELEASE), shape);
        }

        let mut tail = Voice {
            section: section_id,
            position: self.release_position(attack, section, period),
            looped: false,
            increment: self.increment(section, provider, attack.speaking.pitch),
            fader,
            start_at: period.now,
            started: false,
            rendered_until: 0,
            state: VoiceState::Releasing,
            is_tail: true,
            pending_switch: None,
            ..*attack
        };

        // The tail sounds from this period on, outside the tremulant.
        let plain = VoiceContext {
            amplitude: None,
            pitch: None,
            ..*ctx
        };
        let alive = self.render_voice(&mut tail, buffer, &plain, period);

        let slot = &self.slots[index as usize];
        slot.set_seq(self.next_seq());
        slot.publish(VoiceState::Releasing, tail.fader.gain() * tail.volume);
        *slot.voice.lock() = tail;
        if alive {
            self.groups[self.next_release_group()].add_voice(index);
        } else {
            self.finish_slot(index);
        }
        true
    }

    /// Starting offset of a release tail: the attack's phase within one
    /// waveform period.
    fn release_position(&self, attack: &Voice, section: &AudioSection, period: Period) -> f64 {
        if !self.settings.release_alignment() {
            return 0.0;
        }
        let Some(period_frames) = section.period_frames() else {
            return 0.0;
        };
        let elapsed = period.now.saturating_sub(attack.start_at) as f64 * attack.increment;
        elapsed % period_frames as f64
    }

    /// Crossfades a voice to another provider. With a free slot the old sound
    /// keeps fading out in a tail voice; otherwise the voice fades out and
    /// restarts with the new sound.
    fn switch_voice(
        &self,
        voice: &mut Voice,
        provider_id: ProviderId,
        buffer: &mut [f32],
        ctx: &VoiceContext<'_>,
        period: Period,
    ) {
        let Some(provider) = self.instrument.get(provider_id) else {
            return;
        };
        let Some(attack) = provider.attack(voice.velocity) else {
            return;
        };
        let Some(section) = provider.section(attack) else {
            return;
        };
        let crossfade = self.frames_of(provider.switch_crossfade());

        if !voice.started {
            self.replace_sound(voice, provider_id, provider, attack, section, self.frames_of(provider.attack_ramp()));
            return;
        }

        let Some(index) = self.pool.allocate() else {
            voice.fader.hold();
            voice.fader.start_decay(crossfade, FadeShape::Linear);
            voice.pending_switch = Some(provider_id);
            return;
        };

        let mut tail = *voice;
        tail.fader.hold();
        tail.fader.start_decay(crossfade, FadeShape::Linear);
        tail.state = VoiceState::Releasing;
        tail.is_tail = true;
        let alive = self.render_voice(&mut tail, buffer, ctx, period);

        let slot = &self.slots[index as usize];
        slot.set_seq(self.next_seq());
        slot.publish(VoiceState::Releasing, tail.fader.gain() * tail.volume);
        *slot.voice.lock() = tail;
        if alive {
            let group = self.group_of(voice);
            self.groups[group].add_voice(index);
        } else {
            self.finish_slot(index);
        }

        self.replace_sound(voice, provider_id, provider, attack, section, crossfade);
    }

    /// Restarts a voice whose switch fade-out has finished.
    fn restart_switched(&self, voice: &mut Voice) -> bool {
        let Some(provider_id) = voice.pending_switch.take() else {
            return false;
        };
        let Some(provider) = self.instrument.get(provider_id) else {
            return false;
        };
        let Some((attack, section)) = provider
            .attack(voice.velocity)
            .and_then(|attack| provider.section(attack).map(|section| (attack, section)))
        else {
            return false;
        };
        let crossfade = self.frames_of(provider.switch_crossfade());
        self.replace_sound(voice, provider_id, provider, attack, section, crossfade);
        true
    }

    fn replace_sound(
        &self,
        voice: &mut Voice,
        provider_id: ProviderId,
        provider: &dyn SoundProvider,
        attack: SectionId,
        section: &AudioSection,
        fade_in: u32,
    ) {
        let level = provider.velocity_volume(voice.velocity) * voice.speaking.amplitude;
        voice.provider = provider_id;
        voice.section = attack;
        voice.position = 0.0;
        voice.looped = false;
        voice.increment = self.increment(section, provider, voice.speaking.pitch);
        voice.volume = provider.gain();
        voice.fader = Fader::attacking(level, fade_in);
        voice.state = VoiceState::Starting;
    }

    /// Hands a finished slot to its parked successor or back to the pool.
    pub(super) fn finish_slot(&self, index: u32) {
        let slot = &self.slots[index as usize];
        let mut successor = slot.successor.lock();
        slot.advance_generation();
        slot.publish(VoiceState::Stopped, 0.0);
        let onset = successor.take();
        drop(successor);

        match onset {
            Some(onset) => self.start_onset(index, onset),
            None => self.pool.release(index),
        }
    }

    /// Initialises a slot's voice for an onset and queues it on its group.
    pub(super) fn start_onset(&self, index: u32, onset: Onset) {
        let slot = &self.slots[index as usize];
        let Some(provider) = self.instrument.get(onset.provider) else {
            self.pool.release(index);
            return;
        };
        let Some(section) = provider.section(onset.section) else {
            self.pool.release(index);
            return;
        };

        let level = provider.velocity_volume(onset.velocity) * onset.speaking.amplitude;
        let ramp = self.frames_of(provider.attack_ramp());
        let voice = Voice {
            provider: onset.provider,
            section: onset.section,
            audio_group: onset.audio_group,
            windchest: onset.windchest,
            velocity: onset.velocity,
            speaking: onset.speaking,
            position: 0.0,
            looped: false,
            increment: self.increment(section, provider, onset.speaking.pitch),
            fader: Fader::attacking(level, ramp),
            volume: provider.gain(),
            start_at: onset.start_at,
            started: false,
            rendered_until: 0,
            state: VoiceState::Starting,
            is_tail: false,
            pending_switch: None,
        };

        *slot.voice.lock() = voice;
        slot.set_seq(onset.seq);
        slot.publish(VoiceState::Starting, level * provider.gain());
        self.groups[onset.group].add_voice(index);
    }

    fn section(&self, provider: ProviderId, section: SectionId) -> Option<&AudioSection> {
        self.instrument.get(provider)?.section(section)
    }

    /// Section frames per output frame.
    fn increment(&self, section: &AudioSection, provider: &dyn SoundProvider, drift: f64) -> f64 {
        section.sample_rate() as f64 / self.sample_rate as f64 * provider.tuning() as f64 * drift
    }

    /// The group a held voice renders in.
    fn group_of(&self, voice: &Voice) -> usize {
        voice
            .windchest
            .map_or(self.tremulants.len(), |windchest| self.tremulants.len() + 1 + windchest)
    }
}

/// Fade-out of an attack without a release section. Lower pipes fade more
/// slowly.
fn release_fade(midi_key: u8) -> Duration {
    let depth = 1.0 - midi_key.min(127) as f64 / 127.0;
    Duration::from_micros((30_000.0 + 70_000.0 * depth).round() as u64)
}
