// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for safely reading untrusted user memory.
//!
//! A process hands the kernel an address and claims there is a string there.
//! That is only an allegation: the address may be unmapped, out of range, or
//! point at something that isn't text. Nothing here trusts it.

use abi::Word;

use crate::err::UserError;

/// Copies a NUL-terminated string starting at user address `base`.
///
/// `read` fetches one word of the caller's address space. Each word holds one
/// character, which must be in `0..=255`. The terminator must appear within
/// `max_len` words (counting the terminator), or the copy fails with
/// `UserError::FAILED`. Errors from `read` are passed through.
pub fn copy_cstr(
    base: Word,
    max_len: usize,
    mut read: impl FnMut(Word) -> Result<Word, UserError>,
) -> Result<String, UserError> {
    let mut s = String::new();
    let mut addr = base;
    for _ in 0..max_len {
        let w = read(addr)?;
        if w == 0 {
            return Ok(s);
        }
        let c = u8::try_from(w).map_err(|_| UserError::FAILED)?;
        s.push(char::from(c));
        addr = addr.checked_add(1).ok_or(UserError::FAILED)?;
    }
    Err(UserError::FAILED)
}
