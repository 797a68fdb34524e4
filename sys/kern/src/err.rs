// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Kernel code spends a lot of its length deciding what a failure means. The
//! split here keeps that out of the main paths: anything that goes wrong is
//! expressed as a `KernelFault` or `UserError` and propagated with `?`, and
//! the dispatcher decides at one place what to do with it.

use abi::{DeviceId, Word};

use crate::arch::HwError;

/// A failure the kernel cannot recover from.
///
/// Once one of these reaches the dispatcher it is latched as the internal
/// error and every later dispatch halts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernelFault {
    /// A device register could not be accessed.
    Device(DeviceId),
    /// A physical memory access failed.
    Memory(Word),
    /// The interrupt cause was not one the kernel handles.
    UnknownInterrupt(Word),
    /// The CPU reported an error the kernel cannot handle in place.
    UnhandledCpuFault(Word),
    /// A process issued a syscall number the kernel doesn't know.
    UnknownSyscall(Word),
    /// The interrupt handler or the first process could not be loaded.
    BootLoad,
    /// A second reset arrived after boot.
    UnexpectedReset,
    /// No physical frame is left for a page fault.
    OutOfFrames,
    /// An interrupt that needs a running process arrived with none.
    NoRunningProcess,
}

impl From<HwError> for KernelFault {
    fn from(e: HwError) -> Self {
        match e {
            HwError::BadAddress(a) => Self::Memory(a),
            HwError::BadDevice(d) => Self::Device(d),
        }
    }
}

/// An error committed by user code when interacting with a syscall.
///
/// This is used internally as the returned error type for syscall
/// implementations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserError {
    /// A recoverable error. The code (always -1 today) is written to the
    /// caller's accumulator and the caller carries on.
    Recoverable(Word),
    /// A failure that takes the whole kernel down.
    Unrecoverable(KernelFault),
}

impl UserError {
    /// The generic "that didn't work" result handed back to a caller.
    pub const FAILED: Self = Self::Recoverable(-1);
}

/// Convenience conversion from `KernelFault`.
impl From<KernelFault> for UserError {
    fn from(f: KernelFault) -> Self {
        Self::Unrecoverable(f)
    }
}

/// Convenience conversion from `HwError` (by way of `KernelFault`).
impl From<HwError> for UserError {
    fn from(e: HwError) -> Self {
        Self::Unrecoverable(e.into())
    }
}
