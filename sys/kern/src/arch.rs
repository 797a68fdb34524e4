// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The contract between the kernel and the simulated machine.
//!
//! The kernel never touches CPU, memory or device state directly. Everything
//! goes through [`Machine`], which models physical memory (including the
//! register save area at its bottom), the device registers, and the MMU's
//! page-table base. Programs come from a [`Loader`].

use abi::{DeviceId, PrivilegeMode, Register, Word};

use crate::paging::PageTable;

/// Hard failure reported by the machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HwError {
    /// Physical address outside of memory.
    BadAddress(Word),
    /// No such device, or the device refused the access.
    BadDevice(DeviceId),
}

pub trait Machine {
    /// Size of physical memory, in words.
    fn memory_size(&self) -> usize;

    fn read_word(&self, addr: Word) -> Result<Word, HwError>;

    fn write_word(&mut self, addr: Word, value: Word) -> Result<(), HwError>;

    fn read_device(&mut self, dev: DeviceId) -> Result<Word, HwError>;

    fn write_device(&mut self, dev: DeviceId, value: Word) -> Result<(), HwError>;

    /// Points the MMU at `table`, or turns translation off for `None`.
    fn install_page_table(&mut self, table: Option<&PageTable>);
}

/// An executable image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Program {
    /// Address the image was linked to run at.
    pub load_address: Word,
    pub words: Vec<Word>,
}

pub trait Loader {
    /// Looks up the program called `name`. `None` if there is no such program
    /// or it could not be read.
    fn load(&mut self, name: &str) -> Option<Program>;
}

/// Register state of a process, as persisted in the save area across an
/// interrupt.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SavedState {
    pc: Word,
    a: Word,
    x: Word,
    error: Word,
    complement: Word,
    mode: Word,
}

impl SavedState {
    pub fn get(&self, r: Register) -> Word {
        match r {
            Register::Pc => self.pc,
            Register::A => self.a,
            Register::X => self.x,
            Register::Error => self.error,
            Register::Complement => self.complement,
            Register::Mode => self.mode,
        }
    }

    pub fn set(&mut self, r: Register, value: Word) {
        let slot = match r {
            Register::Pc => &mut self.pc,
            Register::A => &mut self.a,
            Register::X => &mut self.x,
            Register::Error => &mut self.error,
            Register::Complement => &mut self.complement,
            Register::Mode => &mut self.mode,
        };
        *slot = value;
    }

    /// Copies the live register file out of the machine's save area.
    pub fn capture(m: &impl Machine) -> Result<Self, HwError> {
        let mut s = Self::default();
        for r in Register::ALL {
            s.set(r, m.read_word(r.address())?);
        }
        Ok(s)
    }

    /// Writes this state into the machine's save area, to be reloaded when
    /// the CPU returns from the interrupt.
    pub fn restore(&self, m: &mut impl Machine) -> Result<(), HwError> {
        for r in Register::ALL {
            m.write_word(r.address(), self.get(r))?;
        }
        Ok(())
    }

    pub fn pc(&self) -> Word {
        self.pc
    }

    pub fn set_pc(&mut self, pc: Word) {
        self.pc = pc;
    }

    /// Syscall number on entry; result on return.
    pub fn accumulator(&self) -> Word {
        self.a
    }

    pub fn set_accumulator(&mut self, v: Word) {
        self.a = v;
    }

    /// Syscall argument.
    pub fn index(&self) -> Word {
        self.x
    }

    pub fn error(&self) -> Word {
        self.error
    }

    pub fn complement(&self) -> Word {
        self.complement
    }

    /// Decoded privilege mode. `None` if the saved word is not a mode the
    /// CPU knows about.
    pub fn mode(&self) -> Option<PrivilegeMode> {
        PrivilegeMode::try_from(self.mode).ok()
    }

    pub fn set_mode(&mut self, mode: PrivilegeMode) {
        self.mode = mode as Word;
    }
}
