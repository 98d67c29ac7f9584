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

//! A real-time polyphonic pipe sampler and mixing engine.
//!
//! The [`engine::SoundEngine`] renders sampled pipes held in an
//! [`provider::Instrument`] into any number of audio outputs. A control thread
//! starts, stops and switches voices while one or more render threads process
//! each period through [`engine::SoundEngine::run_worker`] or a
//! [`render::RenderPool`].

pub mod audio;
pub mod config;
pub mod demo;
pub mod engine;
pub mod provider;
pub mod render;
