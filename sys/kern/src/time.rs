// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of kernel time.

use abi::Word;
use serde::Serialize;

/// In-kernel timestamp representation.
///
/// This is measured in executed instructions, as counted by the machine's
/// instruction clock.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Ticks elapsed from `earlier` to `self`, or zero if the clock appears
    /// to have gone backwards.
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<u64> for Timestamp {
    fn from(v: u64) -> Self {
        Timestamp(v)
    }
}

/// Clock device readings are words; a negative reading is treated as zero.
impl From<Word> for Timestamp {
    fn from(v: Word) -> Self {
        Self::from(u64::from(v.max(0).unsigned_abs()))
    }
}

impl From<Timestamp> for u64 {
    fn from(v: Timestamp) -> Self {
        v.0
    }
}
