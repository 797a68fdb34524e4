// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Processes waiting for other processes to terminate.

use abi::ProcessId;

use crate::task::ProcessTable;
use crate::telemetry::Telemetry;

/// `waiter` is blocked until `target` terminates.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WaitEntry {
    pub waiter: ProcessId,
    pub target: ProcessId,
}

#[derive(Clone, Debug, Default)]
pub struct WaitRegistry {
    entries: Vec<WaitEntry>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `waiter` waits on `target`. The caller has already
    /// blocked `waiter`.
    pub fn insert(&mut self, waiter: ProcessId, target: ProcessId) {
        self.entries.push(WaitEntry { waiter, target });
    }

    /// Drops every entry waiting on `target` and makes each of those waiters
    /// ready again. Returns the woken waiters in the order they started
    /// waiting.
    pub fn resolve(
        &mut self,
        target: ProcessId,
        table: &mut ProcessTable,
        telemetry: &mut Telemetry,
    ) -> Vec<ProcessId> {
        let mut woken = Vec::new();
        self.entries.retain(|e| {
            if e.target == target {
                woken.push(e.waiter);
                false
            } else {
                true
            }
        });
        for &w in &woken {
            table.wake(w, telemetry);
        }
        woken
    }

    /// Forgets everything `waiter` was waiting on, for when the waiter
    /// itself goes away.
    pub fn forget_waiter(&mut self, waiter: ProcessId) {
        self.entries.retain(|e| e.waiter != waiter);
    }

    pub fn waiters_on(
        &self,
        target: ProcessId,
    ) -> impl Iterator<Item = ProcessId> + '_ {
        self.entries
            .iter()
            .filter(move |e| e.target == target)
            .map(|e| e.waiter)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaitEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ProcessMemory;
    use abi::{Pendency, ProcessState};

    fn setup(n: usize) -> (ProcessTable, Telemetry) {
        let mut t = ProcessTable::new(5);
        for _ in 0..n {
            let p = t.create(ProcessMemory::Physical);
            t.insert(p);
        }
        (t, Telemetry::new())
    }

    #[test]
    fn resolve_wakes_only_waiters_on_target() {
        let (mut t, mut tel) = setup(4);
        let mut w = WaitRegistry::new();
        for (waiter, target) in [(1, 4), (2, 3), (3, 4)] {
            t.block(ProcessId(waiter), Pendency::None, &mut tel);
            w.insert(ProcessId(waiter), ProcessId(target));
        }

        let woken = w.resolve(ProcessId(4), &mut t, &mut tel);
        assert_eq!(woken, [ProcessId(1), ProcessId(3)]);
        assert_eq!(w.len(), 1);
        assert_eq!(w.waiters_on(ProcessId(4)).count(), 0);
        assert_eq!(t.find(ProcessId(1)).unwrap().state(), ProcessState::Ready);
        assert_eq!(t.find(ProcessId(2)).unwrap().state(), ProcessState::Blocked);
        assert_eq!(t.find(ProcessId(3)).unwrap().state(), ProcessState::Ready);
    }

    #[test]
    fn resolve_tolerates_departed_waiter() {
        let (mut t, mut tel) = setup(2);
        let mut w = WaitRegistry::new();
        w.insert(ProcessId(1), ProcessId(2));
        t.remove(ProcessId(1));
        assert_eq!(w.resolve(ProcessId(2), &mut t, &mut tel), [ProcessId(1)]);
        assert!(w.is_empty());
    }

    #[test]
    fn forget_waiter_drops_its_entries() {
        let mut w = WaitRegistry::new();
        w.insert(ProcessId(1), ProcessId(2));
        w.insert(ProcessId(3), ProcessId(2));
        w.forget_waiter(ProcessId(1));
        assert_eq!(w.waiters_on(ProcessId(2)).collect::<Vec<_>>(), [ProcessId(3)]);
    }
}
