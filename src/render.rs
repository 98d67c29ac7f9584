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

//! Worker threads sharing the per-period work of an engine.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::audio::thread_priority::{configure_thread_priority, render_thread_priority, rt_audio_enabled};
use crate::engine::{EngineError, MeterInfo, SoundEngine};

/// A dedicated rayon pool whose threads join the caller in every period.
pub struct RenderPool {
    pool: ThreadPool,
    threads: usize,
}

impl RenderPool {
    /// Creates a pool of `threads` helpers, or one per core less the caller
    /// when None.
    pub fn new(threads: Option<usize>) -> Result<Self, EngineError> {
        let threads = threads
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
            .max(1);
        let priority = render_thread_priority();
        let rt_audio = rt_audio_enabled();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("windchest-render-{i}"))
            .start_handler(move |_| configure_thread_priority(priority, rt_audio, "render"))
            .build()?;
        info!(threads, "Render pool started");
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Processes the current period on every pool thread and the caller.
    /// Returns once all work items are done.
    pub fn run(&self, engine: &SoundEngine) {
        self.pool.in_place_scope(|scope| {
            scope.spawn_broadcast(|_, _| engine.run_worker());
            engine.run_worker();
        });
    }

    /// Like `SoundEngine::get_samples`, with the pool sharing each period.
    pub fn get_samples(&self, engine: &SoundEngine, buffer: &mut [f32], frames: usize) -> MeterInfo {
        engine.render_frames(buffer, frames, |engine| self.run(engine))
    }
}
