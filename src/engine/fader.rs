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

//! Per-voice gain envelope.
//!
//! A fader is the product of two parts: a ramp that moves linearly toward a
//! target level (attack, crossfade in, velocity changes) and a decay that only
//! ever falls (release, crossfade out, forced cut). Once the decay reaches
//! zero the voice is silent and can be reclaimed.

use serde::{Deserialize, Serialize};

/// Shape of a release decay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FadeShape {
    #[default]
    Linear,
    Exponential,
}

impl FadeShape {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => FadeShape::Exponential,
            _ => FadeShape::Linear,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            FadeShape::Linear => 0,
            FadeShape::Exponential => 1,
        }
    }
}

/// Decay level below which an exponential fade counts as silent (-80 dB).
const SILENCE_FLOOR: f32 = 1.0e-4;

#[derive(Clone, Copy, Debug)]
pub(crate) struct Fader {
    level: f32,
    target: f32,
    ramp_step: f32,
    decay: f32,
    decay_step: f32,
    decay_shape: FadeShape,
    decaying: bool,
}

impl Fader {
    pub const SILENT: Fader = Fader {
        level: 0.0,
        target: 0.0,
        ramp_step: 0.0,
        decay: 0.0,
        decay_step: 0.0,
        decay_shape: FadeShape::Linear,
        decaying: true,
    };

    /// A fader held at `level`.
    pub fn constant(level: f32) -> Self {
        Self {
            level,
            target: level,
            ramp_step: 0.0,
            decay: 1.0,
            decay_step: 0.0,
            decay_shape: FadeShape::Linear,
            decaying: false,
        }
    }

    /// A fader rising from silence to `level` over `frames`.
    pub fn attacking(level: f32, frames: u32) -> Self {
        let mut fader = Self::constant(0.0);
        fader.ramp_to(level, frames);
        fader
    }

    /// Moves the ramp linearly to `target` over `frames`.
    pub fn ramp_to(&mut self, target: f32, frames: u32) {
        self.target = target;
        if frames == 0 {
            self.level = target;
            self.ramp_step = 0.0;
        } else {
            self.ramp_step = (target - self.level) / frames as f32;
        }
    }

    /// Freezes the ramp at its current level.
    pub fn hold(&mut self) {
        self.target = self.level;
        self.ramp_step = 0.0;
    }

    /// Starts a decay to silence over `frames`. A decay already in progress is
    /// only replaced when the new one reaches silence sooner.
    pub fn start_decay(&mut self, frames: u32, shape: FadeShape) {
        if frames == 0 || self.decay <= 0.0 {
            self.decay = 0.0;
            self.decaying = true;
            return;
        }
        if self.decaying && self.remaining_decay_frames() <= frames as f32 {
            return;
        }
        match shape {
            FadeShape::Linear => self.decay_step = self.decay / frames as f32,
            FadeShape::Exponential => {
                if self.decay <= SILENCE_FLOOR {
                    self.decay = 0.0;
                } else {
                    self.decay_step = (SILENCE_FLOOR / self.decay).powf(1.0 / frames as f32);
                }
            }
        }
        self.decay_shape = shape;
        self.decaying = true;
    }

    /// Frames left until the current decay reaches silence.
    fn remaining_decay_frames(&self) -> f32 {
        if self.decay <= 0.0 {
            return 0.0;
        }
        match self.decay_shape {
            FadeShape::Linear if self.decay_step > 0.0 => self.decay / self.decay_step,
            FadeShape::Exponential if self.decay_step > 0.0 && self.decay_step < 1.0 => {
                (SILENCE_FLOOR / self.decay).ln() / self.decay_step.ln()
            }
            _ => f32::INFINITY,
        }
    }

    /// Returns the gain for the current frame and advances by one frame.
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        let gain = self.level * self.decay;
        if self.ramp_step != 0.0 {
            self.level += self.ramp_step;
            if (self.ramp_step > 0.0 && self.level >= self.target)
                || (self.ramp_step < 0.0 && self.level <= self.target)
            {
                self.level = self.target;
                self.ramp_step = 0.0;
            }
        }
        if self.decaying && self.decay > 0.0 {
            match self.decay_shape {
                FadeShape::Linear => self.decay = (self.decay - self.decay_step).max(0.0),
                FadeShape::Exponential => {
                    self.decay *= self.decay_step;
                    if self.decay < SILENCE_FLOOR {
                        self.decay = 0.0;
                    }
                }
            }
        }
        gain
    }

    /// Gain of the next frame without advancing.
    pub fn gain(&self) -> f32 {
        self.level * self.decay
    }

    /// Ramp level, ignoring the decay.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Scales both the level and the ramp target.
    pub fn scale(&mut self, factor: f32) {
        self.level *= factor;
        self.target *= factor;
        self.ramp_step *= factor;
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp_step != 0.0
    }

    pub fn is_silent(&self) -> bool {
        self.decaying && self.decay <= 0.0
    }
}
