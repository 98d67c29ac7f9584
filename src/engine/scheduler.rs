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

//! Per-period work distribution.
//!
//! Every period runs the same list of items: tremulant modulators, then
//! sampler groups, then output groups. Any number of threads claim items
//! through one shared cyclic counter. An item whose dependencies are not done
//! yet, or that another thread already claimed, is skipped and picked up again
//! on a later lap.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use super::group::GroupKind;
use super::SoundEngine;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkKind {
    Tremulant(usize),
    Group(usize),
    Output(usize),
}

#[derive(Debug)]
struct WorkItem {
    kind: WorkKind,
    /// Items that must be done before this one may run.
    depends_on: Vec<usize>,
    state: AtomicU8,
}

#[derive(Debug)]
pub(crate) struct WorkSchedule {
    items: Vec<WorkItem>,
    next: AtomicUsize,
    remaining: AtomicUsize,
}

impl WorkSchedule {
    pub fn new(tremulants: usize, groups: &[GroupKind], windchest_tremulants: &[Vec<usize>], outputs: usize) -> Self {
        let group_item = |group: usize| tremulants + group;
        let mut items = Vec::with_capacity(tremulants + groups.len() + outputs);

        for tremulant in 0..tremulants {
            items.push(WorkItem::new(WorkKind::Tremulant(tremulant), Vec::new()));
        }
        for (index, kind) in groups.iter().enumerate() {
            let depends_on = match kind {
                GroupKind::Tremulant(tremulant) => vec![*tremulant],
                GroupKind::Windchest(windchest) => windchest_tremulants[*windchest].clone(),
                GroupKind::Release => Vec::new(),
            };
            items.push(WorkItem::new(WorkKind::Group(index), depends_on));
        }
        let all_groups: Vec<usize> = (0..groups.len()).map(group_item).collect();
        for output in 0..outputs {
            items.push(WorkItem::new(WorkKind::Output(output), all_groups.clone()));
        }

        Self {
            items,
            next: AtomicUsize::new(0),
            remaining: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Marks every item pending. No worker may be running.
    pub fn reset(&self) {
        for item in &self.items {
            item.state.store(PENDING, Ordering::Relaxed);
        }
        self.next.store(0, Ordering::Relaxed);
        self.remaining.store(self.items.len(), Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.items.len()
    }

    fn is_ready(&self, index: usize) -> bool {
        self.items[index]
            .depends_on
            .iter()
            .all(|dep| self.items[*dep].state.load(Ordering::Acquire) == DONE)
    }

    /// Claims an item when it is pending and its dependencies are done.
    fn try_claim(&self, index: usize) -> bool {
        let item = &self.items[index];
        item.state.load(Ordering::Acquire) == PENDING
            && self.is_ready(index)
            && item
                .state
                .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    fn complete(&self, index: usize) {
        self.items[index].state.store(DONE, Ordering::Release);
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }

    fn kind(&self, index: usize) -> WorkKind {
        self.items[index].kind
    }
}

impl WorkItem {
    fn new(kind: WorkKind, depends_on: Vec<usize>) -> Self {
        Self {
            kind,
            depends_on,
            state: AtomicU8::new(DONE),
        }
    }
}

impl SoundEngine {
    /// Claims and processes work items until the period is complete. Safe to
    /// call from any number of threads at once.
    pub fn run_worker(&self) {
        if self.schedule.len() == 0 {
            return;
        }
        while !self.schedule.is_finished() {
            let index = self.schedule.next_index();
            if self.schedule.try_claim(index) {
                self.execute(index);
                self.schedule.complete(index);
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Processes one specific item if it can run now. Returns false when it
    /// is not ready, already claimed or out of range.
    pub fn process_work_item(&self, index: usize) -> bool {
        if index >= self.schedule.len() || !self.schedule.try_claim(index) {
            return false;
        }
        self.execute(index);
        self.schedule.complete(index);
        true
    }

    /// Number of work items in every period.
    pub fn work_item_count(&self) -> usize {
        self.schedule.len()
    }

    fn execute(&self, index: usize) {
        match self.schedule.kind(index) {
            WorkKind::Tremulant(tremulant) => self.process_tremulant(tremulant),
            WorkKind::Group(group) => self.process_group(group),
            WorkKind::Output(audio_group) => self.process_output_group(audio_group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> WorkSchedule {
        let groups = [
            GroupKind::Tremulant(0),
            GroupKind::Release,
            GroupKind::Windchest(0),
            GroupKind::Windchest(1),
        ];
        WorkSchedule::new(1, &groups, &[vec![0], vec![]], 2)
    }

    #[test]
    fn test_layout_and_dependencies() {
        let schedule = schedule();
        assert_eq!(schedule.len(), 7);
        assert_eq!(schedule.kind(0), WorkKind::Tremulant(0));
        assert_eq!(schedule.kind(1), WorkKind::Group(0));
        assert_eq!(schedule.kind(5), WorkKind::Output(0));
        assert_eq!(schedule.items[1].depends_on, vec![0]);
        assert_eq!(schedule.items[3].depends_on, vec![0]);
        assert!(schedule.items[4].depends_on.is_empty());
        assert_eq!(schedule.items[6].depends_on, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_claims_respect_dependencies() {
        let schedule = schedule();
        schedule.reset();
        assert!(!schedule.is_finished());

        // The windchest with a tremulant waits for the modulator.
        assert!(!schedule.try_claim(3));
        assert!(schedule.try_claim(4));
        assert!(!schedule.try_claim(4), "already claimed");
        assert!(schedule.try_claim(0));
        schedule.complete(0);
        assert!(schedule.try_claim(3));
    }

    #[test]
    fn test_in_order_single_thread_schedule() {
        let schedule = schedule();
        schedule.reset();
        for index in 0..schedule.len() {
            assert!(schedule.try_claim(index), "item {index}");
            schedule.complete(index);
        }
        assert!(schedule.is_finished());
    }
}
