// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Syscall implementation.
//!
//! # Syscall implementations
//!
//! Syscalls are implemented by functions with the signature:
//!
//! ```ignore
//! fn syscall(k: &mut Kernel, m: &mut impl Machine, caller: ProcessId) -> Result<(), UserError>;
//! ```
//!
//! `caller` is the running process that trapped. Its syscall number is in
//! its saved accumulator and its argument, if any, in its saved index
//! register. On return, `Ok` means the handler has already left whatever
//! result belongs in the caller's registers, while a `UserError` either
//! becomes a -1 result for the caller or takes the kernel down. A common
//! wrapper applies that last step.

use abi::{Pendency, PrivilegeMode, ProcessId, Sysnum, Word};
use ringbuf::ringbuf_entry;

use crate::arch::{Loader, Machine};
use crate::err::{KernelFault, UserError};
use crate::kernel::{Kernel, Trace};
use crate::umem::copy_cstr;

/// Entry point from the dispatcher for a syscall interrupt.
///
/// An unknown syscall number removes the caller and then takes the kernel
/// down.
pub(crate) fn syscall_entry(
    k: &mut Kernel,
    m: &mut impl Machine,
    loader: &mut impl Loader,
) -> Result<(), KernelFault> {
    let p = k
        .table
        .running_process()
        .ok_or(KernelFault::NoRunningProcess)?;
    let (caller, nr) = (p.id(), p.save().accumulator());

    let Ok(sysnum) = Sysnum::try_from(nr) else {
        // The bad syscall is what stopped us, even if removing the caller
        // also fails.
        let removed = k.terminate(m, caller);
        k.fail(KernelFault::UnknownSyscall(nr));
        return removed.and(Err(KernelFault::UnknownSyscall(nr)));
    };
    k.telemetry.syscall(sysnum);
    ringbuf_entry!(k.trace, Trace::Syscall(caller, sysnum));

    let res = match sysnum {
        Sysnum::Read => read(k, m, caller),
        Sysnum::Write => write(k, m, caller),
        Sysnum::CreateProcess => create_process(k, m, loader, caller),
        Sysnum::KillProcess => kill_process(k, m, caller),
        Sysnum::WaitProcess => wait_process(k, caller),
    };
    match res {
        Ok(()) => Ok(()),
        Err(UserError::Recoverable(code)) => {
            set_result(k, caller, code);
            Ok(())
        }
        Err(UserError::Unrecoverable(fault)) => Err(fault),
    }
}

fn set_result(k: &mut Kernel, pid: ProcessId, value: Word) {
    if let Some(p) = k.table.find_mut(pid) {
        p.save_mut().set_accumulator(value);
    }
}

fn arg(k: &Kernel, pid: ProcessId) -> Word {
    k.table
        .find(pid)
        .map(|p| p.save().index())
        .unwrap_or_default()
}

/// Reads one value from the caller's terminal into its accumulator, blocking
/// the caller if no input is available yet.
fn read(
    k: &mut Kernel,
    m: &mut impl Machine,
    caller: ProcessId,
) -> Result<(), UserError> {
    device_op(k, m, caller, Pendency::Read)
}

/// Writes the caller's index register to its terminal, blocking the caller
/// if the terminal is busy.
fn write(
    k: &mut Kernel,
    m: &mut impl Machine,
    caller: ProcessId,
) -> Result<(), UserError> {
    device_op(k, m, caller, Pendency::Write)
}

fn device_op(
    k: &mut Kernel,
    m: &mut impl Machine,
    caller: ProcessId,
    op: Pendency,
) -> Result<(), UserError> {
    if !k.transfer(m, caller, op)? {
        k.table.block(caller, op, &mut k.telemetry);
        ringbuf_entry!(k.trace, Trace::Blocked(caller, op));
    }
    Ok(())
}

/// Starts a process running the program whose name is at the address in the
/// caller's index register. The caller gets the new pid, or -1.
fn create_process(
    k: &mut Kernel,
    m: &mut impl Machine,
    loader: &mut impl Loader,
    caller: ProcessId,
) -> Result<(), UserError> {
    let name_addr = arg(k, caller);
    let max_len = k.config.name_max_len;
    let name = copy_cstr(name_addr, max_len, |a| k.read_user(m, caller, a))?;

    let Some((memory, pc)) = k.load_program(m, loader, &name) else {
        ringbuf_entry!(k.trace, Trace::LoadFailed(caller));
        return Err(UserError::FAILED);
    };
    let now = k.now(m)?;

    let mut p = k.table.create(memory);
    p.save_mut().set_pc(pc);
    p.save_mut().set_mode(PrivilegeMode::User);
    let pid = p.id();
    k.table.insert(p);
    k.telemetry.process_created(pid, now);

    set_result(k, caller, pid.as_word());
    ringbuf_entry!(k.trace, Trace::Created(pid));
    Ok(())
}

/// Terminates the process named in the caller's index register, or the
/// caller itself for 0. A pid that doesn't exist is ignored.
fn kill_process(
    k: &mut Kernel,
    m: &mut impl Machine,
    caller: ProcessId,
) -> Result<(), UserError> {
    let target = match arg(k, caller) {
        0 => Some(caller),
        x => ProcessId::from_word(x),
    };
    if let Some(target) = target {
        k.terminate(m, target)?;
    }
    Ok(())
}

/// Blocks the caller until the process named in its index register
/// terminates. Waiting on a process that doesn't exist, or on oneself,
/// returns at once.
fn wait_process(k: &mut Kernel, caller: ProcessId) -> Result<(), UserError> {
    let target = ProcessId::from_word(arg(k, caller))
        .filter(|&t| t != caller && k.table.contains(t));
    if let Some(target) = target {
        k.waits.insert(caller, target);
        k.table.block(caller, Pendency::None, &mut k.telemetry);
        ringbuf_entry!(k.trace, Trace::Waiting { waiter: caller, target });
    }
    Ok(())
}
