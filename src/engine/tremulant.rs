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

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::TremulantSetup;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TremulantState {
    Off,
    /// Depth ramping in.
    Starting,
    Steady,
    /// Depth ramping out.
    Stopping,
}

/// A tremulant: the control flag plus the modulator the render threads run.
pub(crate) struct Tremulant {
    enabled: AtomicBool,
    pub modulator: Mutex<TremulantModulator>,
}

impl Tremulant {
    pub fn new(setup: &TremulantSetup, sample_rate: u32, max_frames: usize) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            modulator: Mutex::new(TremulantModulator::new(setup, sample_rate, max_frames)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Produces per-frame amplitude and pitch factors for one period.
pub(crate) struct TremulantModulator {
    state: TremulantState,
    depth: f32,
    depth_in: f32,
    depth_out: f32,
    phase: f32,
    phase_step: f32,
    amplitude_depth: f32,
    pitch_depth_cents: f32,
    amplitude: Vec<f32>,
    pitch: Vec<f32>,
}

impl TremulantModulator {
    pub fn new(setup: &TremulantSetup, sample_rate: u32, max_frames: usize) -> Self {
        let frames = |seconds: f32| (seconds * sample_rate as f32).max(1.0);
        Self {
            state: TremulantState::Off,
            depth: 0.0,
            depth_in: 1.0 / frames(setup.start_time.as_secs_f32()),
            depth_out: 1.0 / frames(setup.stop_time.as_secs_f32()),
            phase: 0.0,
            phase_step: 1.0 / frames(setup.period.as_secs_f32()),
            amplitude_depth: setup.amplitude_depth,
            pitch_depth_cents: setup.pitch_depth_cents,
            amplitude: vec![1.0; max_frames],
            pitch: vec![1.0; max_frames],
        }
    }

    pub fn state(&self) -> TremulantState {
        self.state
    }

    /// True when the modulation differs from unity this period.
    pub fn is_active(&self) -> bool {
        self.state != TremulantState::Off
    }

    pub fn amplitude(&self) -> &[f32] {
        &self.amplitude
    }

    pub fn pitch(&self) -> &[f32] {
        &self.pitch
    }

    /// Advances the state machine and fills `frames` factors.
    pub fn process(&mut self, enabled: bool, frames: usize) {
        self.state = match (self.state, enabled) {
            (TremulantState::Off | TremulantState::Stopping, true) => TremulantState::Starting,
            (TremulantState::Starting | TremulantState::Steady, false) => TremulantState::Stopping,
            (state, _) => state,
        };

        if self.state == TremulantState::Off {
            self.amplitude[..frames].fill(1.0);
            self.pitch[..frames].fill(1.0);
            return;
        }

        for frame in 0..frames {
            match self.state {
                TremulantState::Starting => {
                    self.depth += self.depth_in;
                    if self.depth >= 1.0 {
                        self.depth = 1.0;
                        self.state = TremulantState::Steady;
                    }
                }
                TremulantState::Stopping => {
                    self.depth -= self.depth_out;
                    if self.depth <= 0.0 {
                        self.depth = 0.0;
                        self.state = TremulantState::Off;
                    }
                }
                TremulantState::Steady | TremulantState::Off => {}
            }

            let wave = (self.phase * TAU).sin() * self.depth;
            self.amplitude[frame] = 1.0 + self.amplitude_depth * wave;
            self.pitch[frame] = (self.pitch_depth_cents * wave / 1200.0).exp2();

            self.phase += self.phase_step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }

        if self.state == TremulantState::Off {
            self.phase = 0.0;
        }
    }
}
