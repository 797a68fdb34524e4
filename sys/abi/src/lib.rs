// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and the simulated
//! machine it runs on.
//!
//! Everything the CPU, the device subsystem and user programs agree on with
//! the kernel lives here: the word type, the register save area, interrupt
//! causes, CPU fault codes, syscall numbers and process identity. There is no
//! policy in this crate.

#![no_std]

use enum_map::Enum;
use serde::{Deserialize, Serialize};

/// Machine word. Registers, memory cells and device registers all hold one.
pub type Word = i32;

/// Names a particular process.
///
/// Process ids are handed out in increasing order starting from 1 and are
/// never reused within a run. The value 0 is reserved: in the kill-process
/// syscall it means "the caller".
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Id of the first process created by the kernel.
    pub const FIRST: Self = Self(1);

    /// Interprets a word passed by user code as a process id. Returns `None`
    /// for the reserved value 0 and for negative words.
    pub fn from_word(w: Word) -> Option<Self> {
        match u32::try_from(w) {
            Ok(0) | Err(_) => None,
            Ok(v) => Some(Self(v)),
        }
    }

    /// Representation handed back to user code.
    pub fn as_word(self) -> Word {
        Word::try_from(self.0).unwrap_or(Word::MAX)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a process.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Enum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Waiting on a device or on another process; not eligible to run.
    Blocked,
    /// Eligible to run.
    Ready,
    /// Currently designated to run. At most one process is in this state.
    Running,
}

/// A process's outstanding device operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pendency {
    None,
    Read,
    Write,
}

/// Enumeration of syscall numbers.
///
/// The number is passed in the accumulator at a syscall interrupt; the
/// argument, if any, travels in the index register.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Enum, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum Sysnum {
    Read = 1,
    Write = 2,
    CreateProcess = 7,
    KillProcess = 8,
    WaitProcess = 9,
}

/// Decodes the raw accumulator contents at a syscall interrupt. Anything that
/// isn't one of the five known numbers is rejected.
impl core::convert::TryFrom<Word> for Sysnum {
    type Error = ();

    fn try_from(x: Word) -> Result<Self, Self::Error> {
        match x {
            1 => Ok(Self::Read),
            2 => Ok(Self::Write),
            7 => Ok(Self::CreateProcess),
            8 => Ok(Self::KillProcess),
            9 => Ok(Self::WaitProcess),
            _ => Err(()),
        }
    }
}

/// Reason the CPU entered the kernel.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Enum, Serialize, Deserialize,
)]
pub enum InterruptCause {
    /// Raised exactly once, when the CPU comes out of reset.
    Reset,
    /// The CPU detected an error while executing user code.
    CpuError,
    /// A user program asked for a kernel service.
    Syscall,
    /// The interval timer expired.
    Timer,
    /// Anything else. The kernel does not know how to handle these.
    Unknown,
}

impl From<Word> for InterruptCause {
    fn from(x: Word) -> Self {
        match x {
            0 => Self::Reset,
            1 => Self::CpuError,
            2 => Self::Syscall,
            3 => Self::Timer,
            _ => Self::Unknown,
        }
    }
}

/// Fault codes the CPU leaves in the error slot of the save area.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum CpuFault {
    Ok = 0,
    InvalidAddress = 1,
    InvalidOpcode = 2,
    PrivilegedInstruction = 3,
    /// The MMU found no frame for the page being accessed. The faulting
    /// virtual address is in the complement slot.
    MissingPage = 4,
}

impl core::convert::TryFrom<Word> for CpuFault {
    type Error = ();

    fn try_from(x: Word) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Ok),
            1 => Ok(Self::InvalidAddress),
            2 => Ok(Self::InvalidOpcode),
            3 => Ok(Self::PrivilegedInstruction),
            4 => Ok(Self::MissingPage),
            _ => Err(()),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(i32)]
pub enum PrivilegeMode {
    Supervisor = 0,
    User = 1,
}

impl core::convert::TryFrom<Word> for PrivilegeMode {
    type Error = ();

    fn try_from(x: Word) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Supervisor),
            1 => Ok(Self::User),
            _ => Err(()),
        }
    }
}

/// The registers the CPU persists on interrupt entry and reloads on return.
///
/// The discriminant is the register's address in the save area at the bottom
/// of physical memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Register {
    Pc = 0,
    A = 1,
    X = 2,
    Error = 3,
    Complement = 4,
    Mode = 5,
}

impl Register {
    /// Every saved register, in save-area order.
    pub const ALL: [Self; 6] = [
        Self::Pc,
        Self::A,
        Self::X,
        Self::Error,
        Self::Complement,
        Self::Mode,
    ];

    /// Address of this register's slot in the save area.
    pub const fn address(self) -> Word {
        self as Word
    }
}

/// Identifies a device register in the I/O subsystem.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct DeviceId(pub Word);
