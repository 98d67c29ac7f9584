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

use crate::provider::ProviderId;

/// Errors reported at the control boundary of the engine. The render path
/// never produces errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid engine setup: {0}")]
    InvalidSetup(String),

    #[error("Unknown sound provider {0}")]
    UnknownProvider(ProviderId),

    #[error("Unknown sampler group {0}")]
    UnknownGroup(i32),

    #[error("Unknown audio group {0}")]
    UnknownAudioGroup(usize),

    #[error("Unknown audio output {0}")]
    UnknownOutput(usize),

    #[error("Unknown windchest {0}")]
    UnknownWindchest(usize),

    #[error("Unknown tremulant {0}")]
    UnknownTremulant(usize),

    #[error("{name} out of range: {value}")]
    OutOfRange { name: &'static str, value: String },

    #[error("Failed to build render pool: {0}")]
    RenderPool(#[from] rayon::ThreadPoolBuildError),
}
