// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of processes and the process table.

use abi::{Pendency, ProcessId, ProcessState};
use indexmap::IndexMap;

use crate::arch::SavedState;
use crate::config::Policy;
use crate::paging::{DiskRegion, PageTable};
use crate::telemetry::Telemetry;

/// Priority every process starts with. Lower values run first.
pub const INITIAL_PRIORITY: f32 = 0.5;

/// Where a process's program image lives.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessMemory {
    /// Loaded at its own address; no translation.
    Physical,
    /// Kept in the backing store and paged in through `table`. The image's
    /// first word sits at virtual address `origin`.
    Paged {
        region: DiskRegion,
        origin: abi::Word,
        table: PageTable,
    },
}

/// Internal representation of a process.
///
/// The fields of this struct are private to this module so that the table
/// can keep its invariants: a pendency implies `Blocked`, and `Running`
/// coincides with the table's running reference.
#[derive(Clone, Debug)]
pub struct Process {
    id: ProcessId,
    /// Saved machine state of the user program.
    save: SavedState,
    /// Timer ticks left before the process may be preempted.
    quantum: u32,
    /// Timer ticks consumed since the process was last dispatched.
    exec_time: u32,
    priority: f32,
    state: ProcessState,
    pending: Pendency,
    memory: ProcessMemory,
}

impl Process {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn save(&self) -> &SavedState {
        &self.save
    }

    pub fn save_mut(&mut self) -> &mut SavedState {
        &mut self.save
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn exec_time(&self) -> u32 {
        self.exec_time
    }

    pub fn priority(&self) -> f32 {
        self.priority
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pending(&self) -> Pendency {
        self.pending
    }

    pub fn memory(&self) -> &ProcessMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut ProcessMemory {
        &mut self.memory
    }

    pub fn page_table(&self) -> Option<&PageTable> {
        match &self.memory {
            ProcessMemory::Physical => None,
            ProcessMemory::Paged { table, .. } => Some(table),
        }
    }

    /// Ready or running.
    pub fn is_runnable(&self) -> bool {
        self.state != ProcessState::Blocked
    }

    /// Accounts one timer tick against a running process.
    pub fn tick(&mut self) {
        self.quantum = self.quantum.saturating_sub(1);
        self.exec_time = self.exec_time.saturating_add(1);
    }

    /// Folds the share of the quantum used since dispatch into the priority.
    fn age(&mut self, quantum: u32) {
        let used = self.exec_time as f32 / quantum.max(1) as f32;
        self.priority = (self.priority + used) / 2.0;
    }

    fn set_state(&mut self, state: ProcessState, telemetry: &mut Telemetry) {
        if self.state != state {
            self.state = state;
            telemetry.state_entered(self.id, state);
        }
    }
}

/// Owner of every live process.
///
/// Processes are kept in an insertion-ordered map keyed by id; the order is
/// the scheduling order. The running process is designated by id and looked
/// up on every use.
#[derive(Clone, Debug)]
pub struct ProcessTable {
    procs: IndexMap<ProcessId, Process>,
    running: Option<ProcessId>,
    next_id: ProcessId,
    quantum: u32,
}

impl ProcessTable {
    pub fn new(quantum: u32) -> Self {
        Self {
            procs: IndexMap::new(),
            running: None,
            next_id: ProcessId::FIRST,
            quantum: quantum.max(1),
        }
    }

    /// Length of a fresh quantum, in timer ticks.
    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    /// Makes a new ready process with the next id. It is not part of the
    /// table until it is passed to `insert`.
    pub fn create(&mut self, memory: ProcessMemory) -> Process {
        let id = self.next_id;
        self.next_id = id.next();
        Process {
            id,
            save: SavedState::default(),
            quantum: self.quantum,
            exec_time: 0,
            priority: INITIAL_PRIORITY,
            state: ProcessState::Ready,
            pending: Pendency::None,
            memory,
        }
    }

    /// Appends `p` to the end of the scheduling order.
    pub fn insert(&mut self, mut p: Process) {
        // Only `set_running` may hand out the running state.
        if p.state == ProcessState::Running {
            p.state = ProcessState::Ready;
        }
        self.procs.insert(p.id, p);
    }

    /// Detaches process `id`, clearing the running reference if it pointed
    /// there. Does nothing if there is no such process.
    ///
    /// Waiters on `id` are the caller's business; see `WaitRegistry::resolve`.
    pub fn remove(&mut self, id: ProcessId) -> Option<Process> {
        let p = self.procs.shift_remove(&id)?;
        if self.running == Some(id) {
            self.running = None;
        }
        Some(p)
    }

    pub fn find(&self, id: ProcessId) -> Option<&Process> {
        self.procs.get(&id)
    }

    pub fn find_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.procs.get_mut(&id)
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.procs.contains_key(&id)
    }

    pub fn running(&self) -> Option<ProcessId> {
        self.running
    }

    pub fn running_process(&self) -> Option<&Process> {
        self.running.and_then(|id| self.procs.get(&id))
    }

    pub fn running_process_mut(&mut self) -> Option<&mut Process> {
        let id = self.running?;
        self.procs.get_mut(&id)
    }

    /// Designates the running process.
    ///
    /// A new target gets a fresh quantum and its execution time is reset;
    /// the previous running process, if still running, goes back to ready.
    /// A target that is missing or blocked is refused and the running
    /// reference is left alone. Naming the process that already runs only
    /// renews its quantum.
    pub fn set_running(
        &mut self,
        target: Option<ProcessId>,
        telemetry: &mut Telemetry,
    ) {
        if let Some(id) = target {
            match self.procs.get(&id) {
                Some(p) if p.is_runnable() => (),
                _ => return,
            }
            if self.running == Some(id) {
                // Already running: just renew it, no state change.
                if let Some(p) = self.procs.get_mut(&id) {
                    p.quantum = self.quantum;
                    p.exec_time = 0;
                }
                return;
            }
        }

        if let Some(prev) = self.running.take() {
            if let Some(p) = self.procs.get_mut(&prev) {
                if p.state == ProcessState::Running {
                    p.set_state(ProcessState::Ready, telemetry);
                }
            }
        }

        if let Some(id) = target {
            if let Some(p) = self.procs.get_mut(&id) {
                p.quantum = self.quantum;
                p.exec_time = 0;
                p.set_state(ProcessState::Running, telemetry);
                self.running = Some(id);
            }
        }
    }

    /// Blocks process `id`, recording what it is waiting for. The priority is
    /// aged as of this moment, so processes that give up the CPU early end
    /// up with lower values.
    pub fn block(
        &mut self,
        id: ProcessId,
        pending: Pendency,
        telemetry: &mut Telemetry,
    ) {
        let quantum = self.quantum;
        let Some(p) = self.procs.get_mut(&id) else {
            return;
        };
        p.age(quantum);
        p.pending = pending;
        p.set_state(ProcessState::Blocked, telemetry);
        if self.running == Some(id) {
            self.running = None;
        }
    }

    /// Makes a blocked process ready again and clears its pendency. Does
    /// nothing to a process that isn't blocked.
    pub fn wake(&mut self, id: ProcessId, telemetry: &mut Telemetry) {
        if let Some(p) = self.procs.get_mut(&id) {
            if p.state == ProcessState::Blocked {
                p.pending = Pendency::None;
                p.set_state(ProcessState::Ready, telemetry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Processes in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = &Process> + '_ {
        self.procs.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.procs.keys().copied()
    }

    /// Processes with an outstanding device operation, in table order.
    pub fn pending_io(&self) -> Vec<(ProcessId, Pendency)> {
        self.procs
            .values()
            .filter(|p| p.pending != Pendency::None)
            .map(|p| (p.id, p.pending))
            .collect()
    }

    /// True when nothing is ready or running. An empty table is idle.
    pub fn is_idle(&self) -> bool {
        self.procs.values().all(|p| !p.is_runnable())
    }

    /// Charges one unit of time to every process, in its current state.
    pub fn account_time(&self, telemetry: &mut Telemetry) {
        for p in self.procs.values() {
            telemetry.time_in_state(p.id, p.state);
        }
    }

    /// Runs `policy` once. Called at the end of every interrupt cycle.
    pub fn schedule(&mut self, policy: Policy, telemetry: &mut Telemetry) {
        match policy {
            Policy::Standard => self.standard(telemetry),
            Policy::Preemptive => self.preemptive(telemetry),
            Policy::Priority => self.priority(telemetry),
        }
    }

    /// The running process if its quantum has run out.
    fn expired(&self) -> Option<ProcessId> {
        self.running_process()
            .filter(|p| p.quantum == 0)
            .map(|p| p.id)
    }

    /// Runs the first runnable process in table order. If that is the
    /// current process and its quantum ran out, it simply gets a new one.
    pub fn standard(&mut self, telemetry: &mut Telemetry) {
        let Some(first) = self.procs.values().find(|p| p.is_runnable()) else {
            return;
        };
        let first = first.id;

        if self.running == Some(first) {
            if let Some(p) = self.procs.get_mut(&first) {
                if p.quantum == 0 {
                    p.quantum = self.quantum;
                    p.exec_time = 0;
                }
            }
        } else {
            self.set_running(Some(first), telemetry);
        }
    }

    /// Round robin: an expired running process is moved to the back of the
    /// table, then `standard` picks the next one.
    pub fn preemptive(&mut self, telemetry: &mut Telemetry) {
        if let Some(id) = self.expired() {
            if let Some(p) = self.procs.shift_remove(&id) {
                self.procs.insert(id, p);
            }
            telemetry.preempted(id);
        }
        self.standard(telemetry);
    }

    /// An expired running process is aged; then the table is sorted by
    /// ascending priority, keeping the existing order among equals, and
    /// `standard` picks the first runnable process.
    pub fn priority(&mut self, telemetry: &mut Telemetry) {
        if let Some(id) = self.expired() {
            let quantum = self.quantum;
            if let Some(p) = self.procs.get_mut(&id) {
                p.age(quantum);
            }
            telemetry.preempted(id);
        }
        // IndexMap::sort_by is a stable sort.
        self.procs
            .sort_by(|_, a, _, b| a.priority.total_cmp(&b.priority));
        self.standard(telemetry);
    }
}
