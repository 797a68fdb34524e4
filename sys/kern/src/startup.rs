// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup, boot of the first process, and program loading.

use abi::{PrivilegeMode, Word};
use ringbuf::ringbuf_entry;

use crate::arch::{HwError, Loader, Machine, Program};
use crate::config::MemoryModel;
use crate::err::KernelFault;
use crate::kernel::{Kernel, Trace};
use crate::paging::PageTable;
use crate::task::ProcessMemory;

impl Kernel {
    /// Prepares the machine before the CPU leaves reset: loads the interrupt
    /// handler into physical memory and arms the timer.
    ///
    /// A failure here is latched as the internal error, so the reset
    /// interrupt that follows halts straight away.
    pub fn startup(&mut self, m: &mut impl Machine, loader: &mut impl Loader) {
        ringbuf_entry!(self.trace, Trace::Startup);
        if let Err(fault) = self.try_startup(m, loader) {
            self.fail(fault);
        }
    }

    fn try_startup(
        &mut self,
        m: &mut impl Machine,
        loader: &mut impl Loader,
    ) -> Result<(), KernelFault> {
        let handler = loader
            .load(&self.config.handler_program)
            .ok_or(KernelFault::BootLoad)?;
        if handler.load_address != self.config.handler_address {
            return Err(KernelFault::BootLoad);
        }
        load_physical(m, &handler)?;

        m.write_device(
            self.config.devices.clock_timer(),
            self.config.timer_interval,
        )?;
        Ok(())
    }

    /// Handles the reset interrupt: creates the first process from the boot
    /// program and makes it the running process.
    pub(crate) fn reset(
        &mut self,
        m: &mut impl Machine,
        loader: &mut impl Loader,
    ) -> Result<(), KernelFault> {
        if self.booted {
            return Err(KernelFault::UnexpectedReset);
        }
        self.booted = true;

        let name = self.config.boot_program.clone();
        let (memory, pc) = self
            .load_program(m, loader, &name)
            .ok_or(KernelFault::BootLoad)?;
        let now = self.now(m)?;

        let mut p = self.table.create(memory);
        p.save_mut().set_pc(pc);
        p.save_mut().set_mode(PrivilegeMode::User);
        let pid = p.id();
        self.table.insert(p);
        self.telemetry.process_created(pid, now);
        self.table.set_running(Some(pid), &mut self.telemetry);

        ringbuf_entry!(self.trace, Trace::Boot(pid));
        Ok(())
    }

    /// Loads program `name` according to the configured memory model.
    /// Returns the new process's memory and its starting program counter, or
    /// `None` if the program can't be found or doesn't fit.
    pub(crate) fn load_program(
        &mut self,
        m: &mut impl Machine,
        loader: &mut impl Loader,
        name: &str,
    ) -> Option<(ProcessMemory, Word)> {
        let program = loader.load(name)?;
        match self.config.memory {
            MemoryModel::Physical => {
                load_physical(m, &program).ok()?;
                Some((ProcessMemory::Physical, program.load_address))
            }
            MemoryModel::Paged => {
                let region = self.disk.store(&program.words)?;
                let memory = ProcessMemory::Paged {
                    region,
                    origin: program.load_address,
                    table: PageTable::new(),
                };
                Some((memory, program.load_address))
            }
        }
    }
}

/// Copies `program` into physical memory at its own load address.
fn load_physical(m: &mut impl Machine, program: &Program) -> Result<(), HwError> {
    let mut addr = program.load_address;
    for &w in &program.words {
        m.write_word(addr, w)?;
        addr = addr.checked_add(1).ok_or(HwError::BadAddress(addr))?;
    }
    Ok(())
}
