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

use crossbeam_channel::{Receiver, Sender};

/// Fixed-capacity free list of sampler slot indices.
///
/// The queue is filled with every index at construction, so handing out and
/// reclaiming a slot never allocates and never blocks.
pub(crate) struct SamplerPool {
    free_tx: Sender<u32>,
    free_rx: Receiver<u32>,
    capacity: usize,
}

impl SamplerPool {
    /// Creates a pool holding `capacity` slots. The capacity must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity.max(1));
        for index in 0..capacity as u32 {
            // The channel is sized for every index.
            let _ = free_tx.try_send(index);
        }
        Self {
            free_tx,
            free_rx,
            capacity,
        }
    }

    /// Takes a free slot, or None when every slot is in use.
    pub fn allocate(&self) -> Option<u32> {
        self.free_rx.try_recv().ok()
    }

    /// Returns a slot to the pool.
    pub fn release(&self, index: u32) {
        let returned = self.free_tx.try_send(index);
        debug_assert!(returned.is_ok(), "slot {index} released twice");
    }

    /// Number of slots currently handed out.
    pub fn used(&self) -> usize {
        self.capacity.saturating_sub(self.free_rx.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
