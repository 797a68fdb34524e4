// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory machine, for running the kernel on the host.
//!
//! [`SimMachine`] stands in for the CPU, memory and devices. It does not
//! execute instructions; the host plays the CPU by editing registers in the
//! save area and raising interrupts. Device registers are plain cells that
//! read as zero until set.

use std::collections::{BTreeMap, BTreeSet};

use abi::{DeviceId, Register, Word};

use crate::arch::{HwError, Loader, Machine, Program, SavedState};
use crate::paging::PageTable;

#[derive(Clone, Debug)]
pub struct SimMachine {
    memory: Vec<Word>,
    devices: BTreeMap<DeviceId, Word>,
    broken: BTreeSet<DeviceId>,
    device_writes: Vec<(DeviceId, Word)>,
    page_table: Option<PageTable>,
}

impl SimMachine {
    pub fn new(memory_size: usize) -> Self {
        Self {
            memory: vec![0; memory_size],
            devices: BTreeMap::new(),
            broken: BTreeSet::new(),
            device_writes: Vec::new(),
            page_table: None,
        }
    }

    pub fn set_device(&mut self, dev: DeviceId, value: Word) {
        self.devices.insert(dev, value);
    }

    pub fn device(&self, dev: DeviceId) -> Word {
        self.devices.get(&dev).copied().unwrap_or_default()
    }

    /// Makes every later access to `dev` fail.
    pub fn break_device(&mut self, dev: DeviceId) {
        self.broken.insert(dev);
    }

    /// Every device write so far, oldest first.
    pub fn device_writes(&self) -> &[(DeviceId, Word)] {
        &self.device_writes
    }

    pub fn writes_to(&self, dev: DeviceId) -> impl Iterator<Item = Word> + '_ {
        self.device_writes
            .iter()
            .filter(move |(d, _)| *d == dev)
            .map(|&(_, v)| v)
    }

    pub fn register(&self, r: Register) -> Word {
        self.read_word(r.address()).unwrap_or_default()
    }

    pub fn set_register(&mut self, r: Register, value: Word) {
        if let Some(cell) = usize::try_from(r.address())
            .ok()
            .and_then(|a| self.memory.get_mut(a))
        {
            *cell = value;
        }
    }

    /// The register file as the CPU would reload it.
    pub fn registers(&self) -> SavedState {
        SavedState::capture(self).unwrap_or_default()
    }

    pub fn memory(&self) -> &[Word] {
        &self.memory
    }

    /// Stores a NUL-terminated string one character per word.
    pub fn write_str(&mut self, addr: Word, s: &str) -> Result<(), HwError> {
        let mut a = addr;
        for w in s.bytes().map(Word::from).chain([0]) {
            self.write_word(a, w)?;
            a += 1;
        }
        Ok(())
    }

    pub fn page_table(&self) -> Option<&PageTable> {
        self.page_table.as_ref()
    }

    /// Reads `vaddr` the way the CPU would: through the installed page table,
    /// or untranslated if there is none. `None` if the page is unmapped.
    pub fn read_virtual(&self, vaddr: Word, page_size: u32) -> Option<Word> {
        let addr = match &self.page_table {
            None => vaddr,
            Some(t) => t.translate(vaddr, page_size)?,
        };
        self.read_word(addr).ok()
    }
}

impl Machine for SimMachine {
    fn memory_size(&self) -> usize {
        self.memory.len()
    }

    fn read_word(&self, addr: Word) -> Result<Word, HwError> {
        usize::try_from(addr)
            .ok()
            .and_then(|a| self.memory.get(a))
            .copied()
            .ok_or(HwError::BadAddress(addr))
    }

    fn write_word(&mut self, addr: Word, value: Word) -> Result<(), HwError> {
        let cell = usize::try_from(addr)
            .ok()
            .and_then(|a| self.memory.get_mut(a))
            .ok_or(HwError::BadAddress(addr))?;
        *cell = value;
        Ok(())
    }

    fn read_device(&mut self, dev: DeviceId) -> Result<Word, HwError> {
        if self.broken.contains(&dev) {
            return Err(HwError::BadDevice(dev));
        }
        Ok(self.device(dev))
    }

    fn write_device(&mut self, dev: DeviceId, value: Word) -> Result<(), HwError> {
        if self.broken.contains(&dev) {
            return Err(HwError::BadDevice(dev));
        }
        self.devices.insert(dev, value);
        self.device_writes.push((dev, value));
        Ok(())
    }

    fn install_page_table(&mut self, table: Option<&PageTable>) {
        self.page_table = table.cloned();
    }
}

/// A loader backed by a map of named programs.
#[derive(Clone, Debug, Default)]
pub struct SimLoader {
    programs: BTreeMap<String, Program>,
}

impl SimLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, load_address: Word, words: Vec<Word>) {
        self.programs.insert(
            name.to_string(),
            Program {
                load_address,
                words,
            },
        );
    }

    pub fn with(mut self, name: &str, load_address: Word, words: Vec<Word>) -> Self {
        self.insert(name, load_address, words);
        self
    }
}

impl Loader for SimLoader {
    fn load(&mut self, name: &str) -> Option<Program> {
        self.programs.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_area_round_trip_is_identity() {
        let mut m = SimMachine::new(16);
        let mut s = SavedState::default();
        for (i, r) in Register::ALL.into_iter().enumerate() {
            s.set(r, 100 + i as Word);
        }
        s.restore(&mut m).unwrap();
        assert_eq!(SavedState::capture(&m).unwrap(), s);
        assert_eq!(m.register(Register::Complement), 104);
    }

    #[test]
    fn broken_device_fails_both_ways() {
        let mut m = SimMachine::new(8);
        m.break_device(DeviceId(3));
        assert_eq!(m.read_device(DeviceId(3)), Err(HwError::BadDevice(DeviceId(3))));
        assert!(m.write_device(DeviceId(3), 1).is_err());
        assert_eq!(m.read_device(DeviceId(4)), Ok(0));
    }

    #[test]
    fn out_of_range_memory_fails() {
        let mut m = SimMachine::new(4);
        assert_eq!(m.read_word(4), Err(HwError::BadAddress(4)));
        assert_eq!(m.write_word(-1, 0), Err(HwError::BadAddress(-1)));
    }
}
