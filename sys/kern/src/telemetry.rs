// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Accounting of what the kernel did during a run.
//!
//! The core only ever adds to these counters. At the end of a run they are
//! summarized into a [`Report`].

use std::collections::BTreeMap;
use std::fmt;

use abi::{InterruptCause, ProcessId, ProcessState, Sysnum};
use enum_map::EnumMap;
use serde::Serialize;

use crate::time::Timestamp;

/// Per-process counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProcessStats {
    pub created_at: Timestamp,
    pub terminated_at: Option<Timestamp>,
    pub preemptions: u32,
    /// Number of times the process entered each state.
    pub entries: EnumMap<ProcessState, u32>,
    /// Interrupt cycles spent in each state.
    pub time_in: EnumMap<ProcessState, u32>,
}

impl ProcessStats {
    /// Creation to termination. `None` while the process is alive.
    pub fn turnaround(&self) -> Option<u64> {
        self.terminated_at.map(|t| t.since(self.created_at))
    }

    /// Mean time spent ready per entry into the ready state.
    pub fn mean_response(&self) -> f32 {
        let n = self.entries[ProcessState::Ready];
        if n == 0 {
            0.0
        } else {
            self.time_in[ProcessState::Ready] as f32 / n as f32
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Telemetry {
    processes_created: u32,
    idle_time: u32,
    preemptions: u32,
    syscalls: EnumMap<Sysnum, u32>,
    interrupts: EnumMap<InterruptCause, u32>,
    processes: BTreeMap<ProcessId, ProcessStats>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_created(&mut self, pid: ProcessId, now: Timestamp) {
        self.processes_created += 1;
        let stats = self.processes.entry(pid).or_default();
        stats.created_at = now;
        // Every process is born ready.
        stats.entries[ProcessState::Ready] += 1;
    }

    pub fn process_terminated(&mut self, pid: ProcessId, now: Timestamp) {
        if let Some(stats) = self.processes.get_mut(&pid) {
            stats.terminated_at = Some(now);
        }
    }

    pub fn state_entered(&mut self, pid: ProcessId, state: ProcessState) {
        if let Some(stats) = self.processes.get_mut(&pid) {
            stats.entries[state] += 1;
        }
    }

    pub fn preempted(&mut self, pid: ProcessId) {
        self.preemptions += 1;
        if let Some(stats) = self.processes.get_mut(&pid) {
            stats.preemptions += 1;
        }
    }

    pub fn syscall(&mut self, nr: Sysnum) {
        self.syscalls[nr] += 1;
    }

    pub fn interrupt(&mut self, cause: InterruptCause) {
        self.interrupts[cause] += 1;
    }

    pub fn idle_tick(&mut self) {
        self.idle_time += 1;
    }

    pub fn time_in_state(&mut self, pid: ProcessId, state: ProcessState) {
        if let Some(stats) = self.processes.get_mut(&pid) {
            stats.time_in[state] += 1;
        }
    }

    pub fn processes_created(&self) -> u32 {
        self.processes_created
    }

    pub fn idle_time(&self) -> u32 {
        self.idle_time
    }

    pub fn preemptions(&self) -> u32 {
        self.preemptions
    }

    pub fn syscall_count(&self, nr: Sysnum) -> u32 {
        self.syscalls[nr]
    }

    pub fn interrupt_count(&self, cause: InterruptCause) -> u32 {
        self.interrupts[cause]
    }

    pub fn process(&self, pid: ProcessId) -> Option<&ProcessStats> {
        self.processes.get(&pid)
    }

    pub fn report(&self, total_time: Timestamp) -> Report {
        Report {
            processes_created: self.processes_created,
            total_time,
            idle_time: self.idle_time,
            syscalls: self.syscalls,
            interrupts: self.interrupts,
            preemptions: self.preemptions,
            processes: self
                .processes
                .iter()
                .map(|(&pid, stats)| ProcessReport {
                    pid,
                    turnaround: stats.turnaround(),
                    preemptions: stats.preemptions,
                    entries: stats.entries,
                    time_in: stats.time_in,
                    mean_response: stats.mean_response(),
                })
                .collect(),
        }
    }
}

/// End-of-run summary.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub processes_created: u32,
    pub total_time: Timestamp,
    pub idle_time: u32,
    pub syscalls: EnumMap<Sysnum, u32>,
    pub interrupts: EnumMap<InterruptCause, u32>,
    pub preemptions: u32,
    pub processes: Vec<ProcessReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessReport {
    pub pid: ProcessId,
    pub turnaround: Option<u64>,
    pub preemptions: u32,
    pub entries: EnumMap<ProcessState, u32>,
    pub time_in: EnumMap<ProcessState, u32>,
    pub mean_response: f32,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "processes created: {}", self.processes_created)?;
        writeln!(f, "total time: {}", u64::from(self.total_time))?;
        writeln!(f, "idle time: {}", self.idle_time)?;
        for (nr, n) in &self.syscalls {
            writeln!(f, "syscall {nr:?}: {n}")?;
        }
        for (cause, n) in &self.interrupts {
            writeln!(f, "interrupt {cause:?}: {n}")?;
        }
        writeln!(f, "preemptions: {}", self.preemptions)?;
        for p in &self.processes {
            writeln!(f)?;
            match p.turnaround {
                Some(t) => writeln!(f, "pid {} turnaround: {t}", p.pid)?,
                None => writeln!(f, "pid {} turnaround: (still running)", p.pid)?,
            }
            writeln!(f, "pid {} preemptions: {}", p.pid, p.preemptions)?;
            for (state, n) in &p.entries {
                writeln!(
                    f,
                    "pid {} {state:?}: entered {n}, time {}",
                    p.pid, p.time_in[state]
                )?;
            }
            writeln!(f, "pid {} mean response: {:.2}", p.pid, p.mean_response)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_response_divides_ready_time_by_entries() {
        let mut t = Telemetry::new();
        let p = ProcessId(1);
        t.process_created(p, Timestamp::from(10u64));
        t.state_entered(p, ProcessState::Ready);
        for _ in 0..6 {
            t.time_in_state(p, ProcessState::Ready);
        }
        let s = t.process(p).unwrap();
        assert_eq!(s.entries[ProcessState::Ready], 2);
        assert_eq!(s.mean_response(), 3.0);
    }

    #[test]
    fn never_ready_has_zero_mean_response() {
        let s = ProcessStats::default();
        assert_eq!(s.mean_response(), 0.0);
    }

    #[test]
    fn turnaround_needs_termination() {
        let mut t = Telemetry::new();
        let p = ProcessId(3);
        t.process_created(p, Timestamp::from(100u64));
        assert_eq!(t.process(p).unwrap().turnaround(), None);
        t.process_terminated(p, Timestamp::from(250u64));
        assert_eq!(t.process(p).unwrap().turnaround(), Some(150));
    }

    #[test]
    fn preemptions_count_globally_and_per_process() {
        let mut t = Telemetry::new();
        t.process_created(ProcessId(1), Timestamp::default());
        t.process_created(ProcessId(2), Timestamp::default());
        t.preempted(ProcessId(1));
        t.preempted(ProcessId(1));
        t.preempted(ProcessId(2));
        assert_eq!(t.preemptions(), 3);
        assert_eq!(t.process(ProcessId(1)).unwrap().preemptions, 2);
    }

    #[test]
    fn report_lists_every_process() {
        let mut t = Telemetry::new();
        t.process_created(ProcessId(1), Timestamp::default());
        t.process_created(ProcessId(2), Timestamp::default());
        t.syscall(Sysnum::Write);
        t.idle_tick();

        let r = t.report(Timestamp::from(500u64));
        assert_eq!(r.processes_created, 2);
        assert_eq!(r.idle_time, 1);
        assert_eq!(r.syscalls[Sysnum::Write], 1);
        assert_eq!(r.processes.len(), 2);

        let text = r.to_string();
        assert!(text.contains("total time: 500"), "{text}");
        assert!(text.contains("pid 2 turnaround"), "{text}");
    }
}
