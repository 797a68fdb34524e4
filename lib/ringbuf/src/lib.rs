// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing kernel events.
//!
//! A [`Ringbuf`] keeps the most recent `N` events recorded into it, each
//! tagged with the source line that recorded it. When an event is recorded
//! with the same line and payload as the most recent entry, the entry's
//! `count` is bumped instead of consuming a new slot, so a burst of identical
//! events (say, a timer firing while nothing is runnable) costs one entry.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`.
//!
//! ## Recording entries
//!
//! The buffer is an ordinary value owned by whoever does the tracing. The
//! [`ringbuf_entry!`] macro fills in the line number:
//!
//! ```ignore
//! let mut trace = Ringbuf::<u32, 16>::new(0);
//! ringbuf_entry!(trace, isr.bits());
//! ```
//!
//! Entries are read back oldest first with [`Ringbuf::iter`].

#![cfg_attr(not(test), no_std)]

/// Inserts data into a ring buffer, tagging it with the current line.
///
/// `ringbuf_entry!(buf, expr)` records `expr` into `buf`, which must be a
/// place expression of type `Ringbuf<T, N>`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload first so it may freely borrow what it likes
        // before the buffer is borrowed mutably.
        let p = $payload;
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Makes an empty ring buffer with every slot holding `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // If this is the first time this ringbuf has been poked, last will be
        // None. Treating None as an out-of-range index means we neither add
        // to the count of an existing entry nor skip slot 0.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // Advance last, wrapping at the end of the buffer. usize::MAX wraps
        // to zero, which is where the first entry belongs.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // Zero-capacity buffer; nothing can be recorded.
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Most recently recorded entry, if anything has been recorded.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Iterates over recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        self.buffer[start.min(N)..]
            .iter()
            .chain(self.buffer[..start.min(N)].iter())
            .filter(|ent| ent.count != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// Returns `true` if any retained entry carries a payload matching `f`.
    pub fn contains(&self, f: impl Fn(&T) -> bool) -> bool {
        self.iter().any(|ent| f(&ent.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_payload_bumps_count() {
        let mut buf = Ringbuf::<u8, 4>::new(0);
        buf.entry(10, 7);
        buf.entry(10, 7);
        buf.entry(10, 7);

        let entries: Vec<_> = buf.iter().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 3);
        assert_eq!(entries[0].payload, 7);
    }

    #[test]
    fn same_payload_from_another_line_is_new_entry() {
        let mut buf = Ringbuf::<u8, 4>::new(0);
        buf.entry(10, 7);
        buf.entry(11, 7);
        assert_eq!(buf.iter().count(), 2);
    }

    #[test]
    fn wraps_and_iterates_oldest_first() {
        let mut buf = Ringbuf::<u8, 3>::new(0);
        for p in 1..=5 {
            buf.entry(1, p);
        }
        let payloads: Vec<u8> = buf.iter().map(|e| e.payload).collect();
        assert_eq!(payloads, [3, 4, 5]);
        assert_eq!(buf.last().map(|e| e.payload), Some(5));
        // Slot 0 has been written twice.
        assert!(buf.iter().any(|e| e.generation == 2));
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        let buf = Ringbuf::<u8, 3>::new(0);
        assert!(buf.is_empty());
        assert_eq!(buf.iter().count(), 0);
        assert!(buf.last().is_none());
    }

    #[test]
    fn macro_records_line() {
        let mut buf = Ringbuf::<u8, 2>::new(0);
        ringbuf_entry!(buf, 9);
        let line = line!() as u16 - 1;
        assert_eq!(buf.last().map(|e| e.line), Some(line));
        assert!(buf.contains(|p| *p == 9));
    }
}
