// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use abi::{Pendency, ProcessId, ProcessState, Register, Sysnum, Word};
use kern::arch::SavedState;
use kern::config::{KernelConfig, Policy};
use kern::sim::{SimLoader, SimMachine};
use kern::task::{ProcessMemory, ProcessTable};
use kern::telemetry::Telemetry;
use kern::{Dispatch, Kernel};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use proptest_derive::Arbitrary;

const NAME_ADDR: Word = 300;

#[derive(Copy, Clone, Debug, Arbitrary)]
enum TestPolicy {
    Standard,
    Preemptive,
    Priority,
}

impl From<TestPolicy> for Policy {
    fn from(p: TestPolicy) -> Self {
        match p {
            TestPolicy::Standard => Policy::Standard,
            TestPolicy::Preemptive => Policy::Preemptive,
            TestPolicy::Priority => Policy::Priority,
        }
    }
}

/// One thing the outside world can do between interrupt cycles.
#[derive(Clone, Debug, Arbitrary)]
enum Op {
    Tick,
    Read,
    Write(#[proptest(strategy = "0..256i32")] Word),
    Create,
    Kill(#[proptest(strategy = "0..8i32")] Word),
    Wait(#[proptest(strategy = "0..8i32")] Word),
    Input {
        #[proptest(strategy = "1..8u32")]
        pid: u32,
        ready: bool,
    },
    Output {
        #[proptest(strategy = "1..8u32")]
        pid: u32,
        ready: bool,
    },
}

struct Rig {
    k: Kernel,
    m: SimMachine,
    l: SimLoader,
}

impl Rig {
    fn boot(policy: Policy, quantum: u32) -> Self {
        let mut l = SimLoader::new()
            .with("trata_int.maq", 10, vec![1, 2, 3])
            .with("init.maq", 100, vec![1; 4])
            .with("p1.maq", 200, vec![2; 4]);
        let mut m = SimMachine::new(1000);
        m.write_str(NAME_ADDR, "p1.maq").unwrap();
        let mut k = Kernel::new(KernelConfig {
            policy,
            quantum,
            ..KernelConfig::default()
        });
        k.startup(&mut m, &mut l);
        assert_eq!(k.handle_interrupt(&mut m, &mut l, 0), Dispatch::Resume);
        Self { k, m, l }
    }

    fn syscall(&mut self, nr: Sysnum, x: Word) {
        // The CPU only traps from a running process.
        if self.k.table().running().is_none() {
            return;
        }
        self.m.set_register(Register::A, nr as Word);
        self.m.set_register(Register::X, x);
        self.k.handle_interrupt(&mut self.m, &mut self.l, 2);
    }

    fn apply(&mut self, op: &Op) {
        let devs = self.k.config().devices;
        match *op {
            Op::Tick => {
                self.k.handle_interrupt(&mut self.m, &mut self.l, 3);
            }
            Op::Read => self.syscall(Sysnum::Read, 0),
            Op::Write(v) => self.syscall(Sysnum::Write, v),
            Op::Create => self.syscall(Sysnum::CreateProcess, NAME_ADDR),
            Op::Kill(pid) => self.syscall(Sysnum::KillProcess, pid),
            Op::Wait(pid) => self.syscall(Sysnum::WaitProcess, pid),
            Op::Input { pid, ready } => {
                let pid = ProcessId(pid);
                self.m.set_device(devs.input_ready(pid), Word::from(ready));
                self.m.set_device(devs.input_data(pid), 7);
            }
            Op::Output { pid, ready } => {
                let pid = ProcessId(pid);
                self.m.set_device(devs.output_ready(pid), Word::from(ready));
            }
        }
    }
}

fn check_invariants(k: &Kernel) -> Result<(), TestCaseError> {
    let table = k.table();
    prop_assert_eq!(k.internal_error(), None);

    let running: Vec<_> = table
        .iter()
        .filter(|p| p.state() == ProcessState::Running)
        .map(|p| p.id())
        .collect();
    prop_assert!(running.len() <= 1, "several running: {running:?}");
    prop_assert_eq!(running.first().copied(), table.running());

    for p in table.iter() {
        prop_assert!(
            p.quantum() <= table.quantum(),
            "pid {} has quantum {}",
            p.id(),
            p.quantum()
        );
        if p.pending() != Pendency::None {
            prop_assert_eq!(p.state(), ProcessState::Blocked);
        }
    }

    for e in k.waits().iter() {
        let waiter = table.find(e.waiter);
        prop_assert!(waiter.is_some(), "dangling waiter {}", e.waiter);
        prop_assert_eq!(waiter.map(|p| p.state()), Some(ProcessState::Blocked));
        prop_assert!(table.contains(e.target), "dangling target {}", e.target);
    }
    Ok(())
}

proptest! {
    #[test]
    fn kernel_invariants_hold(
        policy in any::<TestPolicy>(),
        quantum in 1..8u32,
        ops in proptest::collection::vec(any::<Op>(), 0..200),
    ) {
        let mut r = Rig::boot(policy.into(), quantum);
        check_invariants(&r.k)?;
        for op in &ops {
            r.apply(op);
            check_invariants(&r.k)?;
        }
    }

    #[test]
    fn priority_grows_while_quantum_is_used_up(
        quantum in 1..10u32,
        rounds in 1..20usize,
    ) {
        let mut t = ProcessTable::new(quantum);
        let mut tel = Telemetry::new();
        let p = t.create(ProcessMemory::Physical);
        let pid = p.id();
        t.insert(p);
        t.schedule(Policy::Priority, &mut tel);
        prop_assert_eq!(t.running(), Some(pid));

        let mut last = t.find(pid).unwrap().priority();
        for _ in 0..rounds {
            for _ in 0..quantum {
                t.running_process_mut().unwrap().tick();
            }
            t.schedule(Policy::Priority, &mut tel);
            let now = t.find(pid).unwrap().priority();
            prop_assert!(now > last, "{now} after {last}");
            prop_assert_eq!(t.running(), Some(pid));
            prop_assert_eq!(t.find(pid).unwrap().quantum(), quantum);
            last = now;
        }
    }

    #[test]
    fn save_area_round_trips(regs in any::<[i32; 6]>()) {
        let mut m = SimMachine::new(16);
        let mut s = SavedState::default();
        for (r, v) in Register::ALL.into_iter().zip(regs) {
            s.set(r, v);
        }
        s.restore(&mut m).unwrap();
        let back = SavedState::capture(&m).unwrap();
        for r in Register::ALL {
            prop_assert_eq!(back.get(r), s.get(r));
        }
        prop_assert_eq!(&m.memory()[..6], &regs[..]);
    }
}
