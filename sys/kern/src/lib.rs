// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulator kernel.
//!
//! This is the core of a small operating system that runs on a simulated,
//! interrupt-driven, single-CPU machine. It keeps a table of processes,
//! schedules them under one of three policies, services five syscalls,
//! blocks processes on their terminals and on each other, and optionally
//! demand-pages program images in from a backing store.
//!
//! The machine itself (CPU, memory, MMU and devices) is outside the kernel
//! and is reached only through the traits in [`arch`]. [`sim`] provides an
//! in-memory implementation for running on the host.
//!
//! # Design principles
//!
//! 1. One entry point. After [`Kernel::startup`], everything happens inside
//!    [`Kernel::handle_interrupt`], which runs to completion.
//! 2. No hidden state. Ids, telemetry and the trace all belong to the
//!    `Kernel` value; there are no globals.
//! 3. Processes are referred to by id, never by reference, outside of the
//!    table that owns them.
//! 4. A preference for simple and clear algorithms over fast and clever
//!    algorithms.

pub mod arch;
pub mod config;
pub mod err;
pub mod kernel;
pub mod paging;
pub mod sim;
mod startup;
mod syscalls;
pub mod task;
pub mod telemetry;
pub mod time;
pub mod umem;
pub mod wait;

pub use kernel::{Dispatch, Kernel, Trace};
