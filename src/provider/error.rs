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

/// Error types for building and loading sound providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Section has no audio data")]
    EmptySection,

    #[error("Stereo channels differ in length: {0} and {1} frames")]
    ChannelLengthMismatch(usize, usize),

    #[error("Unsupported channel count {0}, expected mono or stereo")]
    UnsupportedChannels(u16),

    #[error("Invalid loop {start}..{end} for a section of {frames} frames")]
    InvalidLoop {
        start: usize,
        end: usize,
        frames: usize,
    },

    #[error("Resampling failed: {0}Hz -> {1}Hz: {2}")]
    ResamplingFailed(u32, u32, String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}
