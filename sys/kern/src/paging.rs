// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Demand paging support.
//!
//! In the paged memory model a program is not copied into physical memory
//! when it is loaded. Its image goes into the kernel's [`BackingStore`] and
//! the process starts with an empty [`PageTable`]. The first touch of each
//! page raises a missing-page fault, at which point the kernel takes a frame
//! from the [`FrameAllocator`], copies the page in from the backing store and
//! maps it.
//!
//! The frame allocator only ever moves forward. Frames belonging to a
//! terminated process are not returned, so a long enough run will exhaust
//! physical memory. That is a known limitation of this kernel.

use std::collections::BTreeMap;

use abi::Word;

/// Mapping from virtual page number to physical frame number for one
/// process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PageTable {
    frames: BTreeMap<u32, u32>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&mut self, page: u32, frame: u32) {
        self.frames.insert(page, frame);
    }

    pub fn frame(&self, page: u32) -> Option<u32> {
        self.frames.get(&page).copied()
    }

    /// Translates a virtual address to a physical one. `None` if the address
    /// is negative or its page is unmapped.
    pub fn translate(&self, vaddr: Word, page_size: u32) -> Option<Word> {
        let v = u32::try_from(vaddr).ok()?;
        let frame = self.frame(v / page_size)?;
        let phys = frame.checked_mul(page_size)?.checked_add(v % page_size)?;
        Word::try_from(phys).ok()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterates over `(page, frame)` pairs in page order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.frames.iter().map(|(&p, &f)| (p, f))
    }
}

/// Hands out physical frames in increasing order, never reclaiming them.
#[derive(Clone, Debug)]
pub struct FrameAllocator {
    next: u32,
}

impl FrameAllocator {
    /// `first` is the lowest frame not occupied by the save area and the
    /// interrupt handler.
    pub fn new(first: u32) -> Self {
        Self { next: first }
    }

    /// Allocates a frame below `frame_count`, or returns `None` once memory
    /// is exhausted.
    pub fn allocate(&mut self, frame_count: u32) -> Option<u32> {
        if self.next >= frame_count {
            return None;
        }
        let f = self.next;
        self.next += 1;
        Some(f)
    }

    /// The frame the next allocation would return.
    pub fn next_free(&self) -> u32 {
        self.next
    }
}

/// Location of a program image in the backing store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DiskRegion {
    pub base: usize,
    pub len: usize,
}

/// Kernel-owned store that holds program images for the paged model.
///
/// Space is allocated monotonically, like frames.
#[derive(Clone, Debug)]
pub struct BackingStore {
    words: Vec<Word>,
    next_free: usize,
}

impl BackingStore {
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![0; size],
            next_free: 0,
        }
    }

    /// Copies `image` into fresh space. `None` if it doesn't fit.
    pub fn store(&mut self, image: &[Word]) -> Option<DiskRegion> {
        let base = self.next_free;
        let end = base.checked_add(image.len())?;
        self.words.get_mut(base..end)?.copy_from_slice(image);
        self.next_free = end;
        Some(DiskRegion {
            base,
            len: image.len(),
        })
    }

    /// Word `offset` of the image in `region`. Offsets past the end of the
    /// image read as zero, which is what a process sees in its data and
    /// stack pages.
    pub fn read(&self, region: DiskRegion, offset: usize) -> Word {
        if offset >= region.len {
            return 0;
        }
        self.words
            .get(region.base + offset)
            .copied()
            .unwrap_or_default()
    }

    pub fn used(&self) -> usize {
        self.next_free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_uses_frame_and_offset() {
        let mut t = PageTable::new();
        t.map(2, 11);
        assert_eq!(t.translate(25, 10), Some(115));
        assert_eq!(t.translate(20, 10), Some(110));
        assert_eq!(t.translate(19, 10), None, "page 1 is unmapped");
        assert_eq!(t.translate(-1, 10), None);
    }

    #[test]
    fn page_table_iterates_in_page_order() {
        let mut t = PageTable::new();
        t.map(7, 12);
        t.map(0, 10);
        t.map(3, 11);
        assert_eq!(t.iter().collect::<Vec<_>>(), [(0, 10), (3, 11), (7, 12)]);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn frames_are_monotonic_and_bounded() {
        let mut fa = FrameAllocator::new(10);
        assert_eq!(fa.allocate(12), Some(10));
        assert_eq!(fa.allocate(12), Some(11));
        assert_eq!(fa.allocate(12), None);
        assert_eq!(fa.next_free(), 12);
    }

    #[test]
    fn backing_store_places_images_back_to_back() {
        let mut bs = BackingStore::new(8);
        let a = bs.store(&[1, 2, 3]).unwrap();
        let b = bs.store(&[4, 5]).unwrap();
        assert_eq!(a, DiskRegion { base: 0, len: 3 });
        assert_eq!(b, DiskRegion { base: 3, len: 2 });
        assert_eq!(bs.read(b, 1), 5);
        assert_eq!(bs.read(b, 2), 0, "past the image reads as zero");
        assert!(bs.store(&[0; 4]).is_none(), "only 3 words left");
        assert_eq!(bs.used(), 5);
    }
}
