// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel configuration.
//!
//! A kernel session takes its shape from a `KernelConfig`, normally read from
//! a TOML file:
//!
//! ```toml
//! quantum = 5
//! policy = "preemptive"
//! memory = "paged"
//!
//! [devices]
//! stride = 4
//! ```
//!
//! Every key is optional; omitted keys take the defaults below.

use std::path::Path;

use abi::{DeviceId, ProcessId, Word};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Scheduling policy run at the end of every interrupt cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Run the first ready process in table order; never preempt.
    Standard,
    /// Round robin: a process whose quantum expires goes to the back.
    Preemptive,
    /// Lowest priority value first, with priorities aged on expiry and on
    /// blocking.
    Priority,
}

/// How program images reach physical memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryModel {
    /// Programs are copied to their own load address and run untranslated.
    Physical,
    /// Programs live in the backing store and are paged in on demand.
    Paged,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct KernelConfig {
    /// Timer ticks a process may run before it is eligible for preemption.
    pub quantum: u32,
    /// Instructions between timer interrupts.
    pub timer_interval: Word,
    pub policy: Policy,
    pub memory: MemoryModel,
    /// Words per page, in the paged model.
    pub page_size: u32,
    /// Words of backing store, in the paged model.
    pub disk_size: usize,
    /// Longest program name create-process accepts, including the NUL.
    pub name_max_len: usize,
    pub boot_program: String,
    pub handler_program: String,
    /// Where the interrupt handler must be loaded.
    pub handler_address: Word,
    pub devices: DeviceLayout,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            quantum: 5,
            timer_interval: 50,
            policy: Policy::Priority,
            memory: MemoryModel::Physical,
            page_size: 10,
            disk_size: 1000,
            name_max_len: 100,
            boot_program: "init.maq".to_string(),
            handler_program: "trata_int.maq".to_string(),
            handler_address: 10,
            devices: DeviceLayout::default(),
        }
    }
}

impl KernelConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quantum == 0 {
            bail!("quantum must be at least 1");
        }
        if self.page_size == 0 {
            bail!("page-size must be at least 1");
        }
        if self.name_max_len == 0 {
            bail!("name-max-len must be at least 1");
        }
        if self.timer_interval <= 0 {
            bail!("timer-interval must be positive");
        }
        Ok(())
    }

    /// First frame past the save area and the interrupt handler, which
    /// occupy the bottom hundred words of memory.
    pub fn first_free_frame(&self) -> u32 {
        99 / self.page_size.max(1) + 1
    }
}

/// Where each device register lives.
///
/// Every process owns a terminal. Terminal registers for process `pid` sit
/// at `stride * pid + base` for the per-register base offsets below. The
/// clock registers are shared and sit above any terminal a run will reach.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct DeviceLayout {
    pub stride: Word,
    pub input_data: Word,
    pub input_ready: Word,
    pub output_data: Word,
    pub output_ready: Word,
    /// Count of instructions executed since reset.
    pub clock_instructions: Word,
    /// Nonzero while a timer interrupt is pending; written 0 to acknowledge.
    pub clock_interrupt: Word,
    /// Countdown to the next timer interrupt.
    pub clock_timer: Word,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            stride: 4,
            input_data: 0,
            input_ready: 1,
            output_data: 2,
            output_ready: 3,
            clock_instructions: 1000,
            clock_interrupt: 1002,
            clock_timer: 1003,
        }
    }
}

impl DeviceLayout {
    fn terminal(&self, pid: ProcessId, base: Word) -> DeviceId {
        DeviceId(
            self.stride
                .wrapping_mul(pid.as_word())
                .wrapping_add(base),
        )
    }

    pub fn input_ready(&self, pid: ProcessId) -> DeviceId {
        self.terminal(pid, self.input_ready)
    }

    pub fn input_data(&self, pid: ProcessId) -> DeviceId {
        self.terminal(pid, self.input_data)
    }

    pub fn output_ready(&self, pid: ProcessId) -> DeviceId {
        self.terminal(pid, self.output_ready)
    }

    pub fn output_data(&self, pid: ProcessId) -> DeviceId {
        self.terminal(pid, self.output_data)
    }

    pub fn clock_instructions(&self) -> DeviceId {
        DeviceId(self.clock_instructions)
    }

    pub fn clock_interrupt(&self) -> DeviceId {
        DeviceId(self.clock_interrupt)
    }

    pub fn clock_timer(&self) -> DeviceId {
        DeviceId(self.clock_timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = KernelConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, KernelConfig::default());
        assert_eq!(cfg.quantum, 5);
        assert_eq!(cfg.first_free_frame(), 10);
    }

    #[test]
    fn kebab_case_keys() {
        let cfg = KernelConfig::from_toml_str(
            r#"
            quantum = 3
            timer-interval = 20
            policy = "preemptive"
            memory = "paged"
            boot-program = "shell.maq"

            [devices]
            stride = 8
            clock-timer = 40
            "#,
        )
        .unwrap();
        assert_eq!(cfg.quantum, 3);
        assert_eq!(cfg.timer_interval, 20);
        assert_eq!(cfg.policy, Policy::Preemptive);
        assert_eq!(cfg.memory, MemoryModel::Paged);
        assert_eq!(cfg.boot_program, "shell.maq");
        assert_eq!(cfg.devices.stride, 8);
        assert_eq!(cfg.devices.clock_timer, 40);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.devices.input_ready, 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(KernelConfig::from_toml_str("quantom = 5").is_err());
        assert!(KernelConfig::from_toml_str("[devices]\nprinter = 3").is_err());
    }

    #[test]
    fn zero_quantum_is_rejected() {
        let e = KernelConfig::from_toml_str("quantum = 0").unwrap_err();
        assert!(e.to_string().contains("quantum"), "{e}");
    }

    #[test]
    fn terminal_registers_follow_stride() {
        let d = DeviceLayout::default();
        let p = ProcessId(2);
        assert_eq!(d.input_data(p), DeviceId(8));
        assert_eq!(d.input_ready(p), DeviceId(9));
        assert_eq!(d.output_data(p), DeviceId(10));
        assert_eq!(d.output_ready(p), DeviceId(11));
    }
}
