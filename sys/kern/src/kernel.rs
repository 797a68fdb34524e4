// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The interrupt dispatcher.
//!
//! After startup the only way into the kernel is [`Kernel::handle_interrupt`],
//! which the CPU calls from its interrupt handler. Each call runs one full
//! cycle, always in this order:
//!
//! 1. save the interrupted process's registers,
//! 2. handle the interrupt cause,
//! 3. complete any device transfers that have become possible, and account
//!    time,
//! 4. run the scheduling policy,
//! 5. restore the chosen process's registers, or tell the CPU to halt.
//!
//! Any `KernelFault` raised along the way ends the cycle early and is latched
//! as the internal error. The latch is sticky: every later cycle halts.

use abi::{
    CpuFault, InterruptCause, Pendency, ProcessId, Register, Sysnum, Word,
};
use ringbuf::{ringbuf_entry, Ringbuf};

use crate::arch::{Loader, Machine};
use crate::config::KernelConfig;
use crate::err::{KernelFault, UserError};
use crate::paging::{BackingStore, FrameAllocator};
use crate::task::{ProcessMemory, ProcessTable};
use crate::telemetry::{Report, Telemetry};
use crate::time::Timestamp;
use crate::wait::WaitRegistry;

/// Number of trace entries retained.
pub const TRACE_DEPTH: usize = 64;

/// Kernel events recorded in the trace ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    Startup,
    Interrupt(InterruptCause),
    Boot(ProcessId),
    Syscall(ProcessId, Sysnum),
    Blocked(ProcessId, Pendency),
    Waiting { waiter: ProcessId, target: ProcessId },
    Resolved(ProcessId),
    Created(ProcessId),
    LoadFailed(ProcessId),
    Terminated(ProcessId),
    PageFault { pid: ProcessId, page: u32, frame: u32 },
    Switch {
        from: Option<ProcessId>,
        to: Option<ProcessId>,
    },
    Fault(KernelFault),
    Report,
    Halt,
}

/// What the CPU should do when the kernel returns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// Return from the interrupt into the process whose registers are now in
    /// the save area.
    Resume,
    /// Stop until the next interrupt.
    Halt,
}

impl Dispatch {
    /// Value the interrupt handler expects back in its accumulator.
    pub fn as_word(self) -> Word {
        match self {
            Self::Resume => 0,
            Self::Halt => 1,
        }
    }
}

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) table: ProcessTable,
    pub(crate) waits: WaitRegistry,
    pub(crate) telemetry: Telemetry,
    pub(crate) frames: FrameAllocator,
    pub(crate) disk: BackingStore,
    pub(crate) trace: Ringbuf<Trace, TRACE_DEPTH>,
    pub(crate) booted: bool,
    internal_error: Option<KernelFault>,
    report: Option<Report>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            table: ProcessTable::new(config.quantum),
            waits: WaitRegistry::new(),
            telemetry: Telemetry::new(),
            frames: FrameAllocator::new(config.first_free_frame()),
            disk: BackingStore::new(config.disk_size),
            trace: Ringbuf::new(Trace::None),
            booted: false,
            internal_error: None,
            report: None,
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn waits(&self) -> &WaitRegistry {
        &self.waits
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn disk(&self) -> &BackingStore {
        &self.disk
    }

    /// The fault that stopped the kernel, if one has.
    pub fn internal_error(&self) -> Option<KernelFault> {
        self.internal_error
    }

    /// End-of-run summary, produced once the last process is gone.
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    /// Runs one interrupt cycle. `raw_cause` is the interrupt number the CPU
    /// passed in.
    pub fn handle_interrupt(
        &mut self,
        m: &mut impl Machine,
        loader: &mut impl Loader,
        raw_cause: Word,
    ) -> Dispatch {
        let cause = InterruptCause::from(raw_cause);
        self.telemetry.interrupt(cause);
        ringbuf_entry!(self.trace, Trace::Interrupt(cause));

        if self.internal_error.is_none() {
            if let Err(fault) = self.cycle(m, loader, cause, raw_cause) {
                self.fail(fault);
            }
        }

        self.dispatch(m)
    }

    fn cycle(
        &mut self,
        m: &mut impl Machine,
        loader: &mut impl Loader,
        cause: InterruptCause,
        raw_cause: Word,
    ) -> Result<(), KernelFault> {
        self.save_context(&*m)?;

        match cause {
            InterruptCause::Reset => self.reset(m, loader)?,
            InterruptCause::Syscall => crate::syscalls::syscall_entry(self, m, loader)?,
            InterruptCause::CpuError => self.cpu_error(m)?,
            InterruptCause::Timer => self.timer(m)?,
            InterruptCause::Unknown => {
                return Err(KernelFault::UnknownInterrupt(raw_cause))
            }
        }

        self.resolve_pendencies(m)?;
        self.account();

        let before = self.table.running();
        self.table.schedule(self.config.policy, &mut self.telemetry);
        let after = self.table.running();
        if before != after {
            ringbuf_entry!(self.trace, Trace::Switch { from: before, to: after });
        }
        Ok(())
    }

    /// Latches `fault` as the internal error. The first fault wins.
    pub(crate) fn fail(&mut self, fault: KernelFault) {
        ringbuf_entry!(self.trace, Trace::Fault(fault));
        if self.internal_error.is_none() {
            self.internal_error = Some(fault);
        }
    }

    fn save_context(&mut self, m: &impl Machine) -> Result<(), KernelFault> {
        if let Some(p) = self.table.running_process_mut() {
            *p.save_mut() = crate::arch::SavedState::capture(m)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, m: &mut impl Machine) -> Dispatch {
        if self.internal_error.is_some() {
            ringbuf_entry!(self.trace, Trace::Halt);
            return Dispatch::Halt;
        }

        let restored = match self.table.running_process() {
            Some(p) => {
                let r = p.save().restore(m);
                if r.is_ok() {
                    m.install_page_table(p.page_table());
                }
                Some(r)
            }
            None => None,
        };

        match restored {
            Some(Ok(())) => Dispatch::Resume,
            Some(Err(e)) => {
                self.fail(e.into());
                ringbuf_entry!(self.trace, Trace::Halt);
                Dispatch::Halt
            }
            None => {
                ringbuf_entry!(self.trace, Trace::Halt);
                Dispatch::Halt
            }
        }
    }

    fn cpu_error(&mut self, m: &mut impl Machine) -> Result<(), KernelFault> {
        let code = m.read_word(Register::Error.address())?;
        match CpuFault::try_from(code) {
            Ok(CpuFault::MissingPage) => {
                let p = self
                    .table
                    .running_process()
                    .ok_or(KernelFault::NoRunningProcess)?;
                let (pid, vaddr) = (p.id(), p.save().complement());
                self.fault_in(m, pid, vaddr)?;
                Ok(())
            }
            _ => Err(KernelFault::UnhandledCpuFault(code)),
        }
    }

    fn timer(&mut self, m: &mut impl Machine) -> Result<(), KernelFault> {
        let devs = self.config.devices;
        m.write_device(devs.clock_interrupt(), 0)?;
        m.write_device(devs.clock_timer(), self.config.timer_interval)?;

        if let Some(p) = self.table.running_process_mut() {
            p.tick();
        }

        if self.booted && self.table.is_empty() && self.report.is_none() {
            let now = self.now(m)?;
            self.report = Some(self.telemetry.report(now));
            ringbuf_entry!(self.trace, Trace::Report);
        }
        Ok(())
    }

    /// Reads the instruction clock.
    pub(crate) fn now(
        &self,
        m: &mut impl Machine,
    ) -> Result<Timestamp, KernelFault> {
        let t = m.read_device(self.config.devices.clock_instructions())?;
        Ok(Timestamp::from(t))
    }

    fn resolve_pendencies(
        &mut self,
        m: &mut impl Machine,
    ) -> Result<(), KernelFault> {
        for (pid, pending) in self.table.pending_io() {
            if self.transfer(m, pid, pending)? {
                self.table.wake(pid, &mut self.telemetry);
                ringbuf_entry!(self.trace, Trace::Resolved(pid));
            }
        }
        Ok(())
    }

    /// Attempts the device transfer described by `pending` on behalf of
    /// `pid`. Returns `Ok(false)` if the device isn't ready, in which case
    /// nothing has been touched.
    ///
    /// A read leaves the data in the accumulator. A write takes its data from
    /// the index register and leaves 0 in the accumulator.
    pub(crate) fn transfer(
        &mut self,
        m: &mut impl Machine,
        pid: ProcessId,
        pending: Pendency,
    ) -> Result<bool, KernelFault> {
        let devs = self.config.devices;
        let ready = match pending {
            Pendency::None => return Ok(false),
            Pendency::Read => devs.input_ready(pid),
            Pendency::Write => devs.output_ready(pid),
        };
        if m.read_device(ready)? == 0 {
            return Ok(false);
        }
        let Some(p) = self.table.find_mut(pid) else {
            return Ok(false);
        };

        match pending {
            Pendency::Read => {
                let data = m.read_device(devs.input_data(pid))?;
                p.save_mut().set_accumulator(data);
            }
            Pendency::Write => {
                m.write_device(devs.output_data(pid), p.save().index())?;
                p.save_mut().set_accumulator(0);
            }
            Pendency::None => (),
        }
        Ok(true)
    }

    fn account(&mut self) {
        if self.table.is_idle() {
            self.telemetry.idle_tick();
        }
        self.table.account_time(&mut self.telemetry);
    }

    /// Removes `pid` from the system: drops it from the table, wakes
    /// everything waiting on it and then timestamps its end. Unknown ids are
    /// ignored.
    ///
    /// The record is gone even if reading the clock fails.
    pub(crate) fn terminate(
        &mut self,
        m: &mut impl Machine,
        pid: ProcessId,
    ) -> Result<(), KernelFault> {
        if self.table.remove(pid).is_none() {
            return Ok(());
        }
        self.waits.forget_waiter(pid);
        let woken = self.waits.resolve(pid, &mut self.table, &mut self.telemetry);
        ringbuf_entry!(self.trace, Trace::Terminated(pid));
        for w in woken {
            ringbuf_entry!(self.trace, Trace::Resolved(w));
        }

        let now = self.now(m)?;
        self.telemetry.process_terminated(pid, now);
        Ok(())
    }

    /// Services a missing-page fault for `pid` at `vaddr`: takes a fresh
    /// frame, fills it from the backing store and maps it. Returns the frame.
    pub(crate) fn fault_in(
        &mut self,
        m: &mut impl Machine,
        pid: ProcessId,
        vaddr: Word,
    ) -> Result<u32, KernelFault> {
        let page_size = self.config.page_size.max(1);
        let v = u32::try_from(vaddr).map_err(|_| KernelFault::Memory(vaddr))?;
        let page = v / page_size;
        let frame_count =
            u32::try_from(m.memory_size() / page_size as usize).unwrap_or(u32::MAX);

        let p = self
            .table
            .find_mut(pid)
            .ok_or(KernelFault::NoRunningProcess)?;
        let ProcessMemory::Paged {
            region,
            origin,
            table,
        } = p.memory_mut()
        else {
            return Err(KernelFault::UnhandledCpuFault(
                CpuFault::MissingPage as Word,
            ));
        };

        let frame = self
            .frames
            .allocate(frame_count)
            .ok_or(KernelFault::OutOfFrames)?;
        table.map(page, frame);

        for off in 0..page_size {
            // Virtual address `origin` holds the first word of the image.
            let va = i64::from(page) * i64::from(page_size) + i64::from(off);
            let value = usize::try_from(va - i64::from(*origin))
                .map(|o| self.disk.read(*region, o))
                .unwrap_or(0);
            let pa = u64::from(frame) * u64::from(page_size) + u64::from(off);
            let addr = Word::try_from(pa).map_err(|_| KernelFault::OutOfFrames)?;
            m.write_word(addr, value)?;
        }

        ringbuf_entry!(self.trace, Trace::PageFault { pid, page, frame });
        Ok(frame)
    }

    /// Reads one word of `pid`'s address space, paging it in if needed.
    /// Addresses the process cannot reach fail with `UserError::FAILED`.
    pub(crate) fn read_user(
        &mut self,
        m: &mut impl Machine,
        pid: ProcessId,
        vaddr: Word,
    ) -> Result<Word, UserError> {
        let page_size = self.config.page_size.max(1);
        let p = self.table.find(pid).ok_or(UserError::FAILED)?;
        let addr = match p.page_table() {
            None => vaddr,
            Some(t) => match t.translate(vaddr, page_size) {
                Some(a) => a,
                None => {
                    if vaddr < 0 {
                        return Err(UserError::FAILED);
                    }
                    self.fault_in(m, pid, vaddr)?;
                    self.table
                        .find(pid)
                        .and_then(|p| p.page_table())
                        .and_then(|t| t.translate(vaddr, page_size))
                        .ok_or(UserError::FAILED)?
                }
            },
        };
        m.read_word(addr).map_err(|_| UserError::FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimLoader, SimMachine};

    fn booted() -> (Kernel, SimMachine) {
        let mut l = SimLoader::new()
            .with("trata_int.maq", 10, vec![1])
            .with("init.maq", 100, vec![2]);
        let mut m = SimMachine::new(200);
        let mut k = Kernel::new(KernelConfig::default());
        k.startup(&mut m, &mut l);
        assert_eq!(k.handle_interrupt(&mut m, &mut l, 0), Dispatch::Resume);
        (k, m)
    }

    #[test]
    fn dispatch_words() {
        assert_eq!(Dispatch::Resume.as_word(), 0);
        assert_eq!(Dispatch::Halt.as_word(), 1);
    }

    #[test]
    fn transfer_without_pendency_touches_nothing() {
        let (mut k, mut m) = booted();
        let pid = ProcessId(1);
        let devs = k.config.devices;
        m.set_device(devs.input_ready(pid), 1);
        m.set_device(devs.output_ready(pid), 1);
        let before = *k.table.find(pid).unwrap().save();
        let writes = m.device_writes().len();

        assert_eq!(k.transfer(&mut m, pid, Pendency::None), Ok(false));
        assert_eq!(*k.table.find(pid).unwrap().save(), before);
        assert_eq!(m.device_writes().len(), writes);
    }

    #[test]
    fn first_fault_wins() {
        let (mut k, _) = booted();
        k.fail(KernelFault::OutOfFrames);
        k.fail(KernelFault::BootLoad);
        assert_eq!(k.internal_error(), Some(KernelFault::OutOfFrames));
    }

    #[test]
    fn terminate_ignores_unknown_pid() {
        let (mut k, mut m) = booted();
        assert_eq!(k.terminate(&mut m, ProcessId(9)), Ok(()));
        assert_eq!(k.table().len(), 1);
    }
}
