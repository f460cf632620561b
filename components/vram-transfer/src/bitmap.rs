// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Occupancy tracking for the tail pool and the palette slots.
//! Bit `i` of byte `i / 8` (LSB first) is block `i`; a set bit is in use.

use common::numutil::NumExt;

/// Number of standard OBJ palette slots per screen.
pub const NUM_SLOTS: usize = 16;

/// One bit per fixed-size block of an arena.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BlockBitmap {
    bits: Vec<u8>,
    len: usize,
}

impl BlockBitmap {
    /// A bitmap of `len` free blocks.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_set(&self, block: usize) -> bool {
        assert!(block < self.len, "Block {block} outside of bitmap ({})", self.len);
        self.bits[block / 8].is_bit((block % 8).u16())
    }

    /// Are all blocks in `start..start + count` inside the bitmap and free?
    pub fn is_free(&self, start: usize, count: usize) -> bool {
        start + count <= self.len && (start..start + count).all(|b| !self.is_set(b))
    }

    fn set(&mut self, block: usize, state: bool) {
        let byte = &mut self.bits[block / 8];
        *byte = byte.set_bit((block % 8).u16(), state);
    }

    /// Mark a run as used. Every block must be in range and free.
    pub fn reserve(&mut self, start: usize, count: usize) {
        assert!(
            start + count <= self.len,
            "Reserving blocks {start}..{} past end of bitmap ({})",
            start + count,
            self.len
        );
        for block in start..start + count {
            assert!(!self.is_set(block), "Block {block} reserved twice");
            self.set(block, true);
        }
    }

    /// Mark a run as free. Every block must be in range and in use.
    pub fn clear(&mut self, start: usize, count: usize) {
        assert!(
            start + count <= self.len,
            "Clearing blocks {start}..{} past end of bitmap ({})",
            start + count,
            self.len
        );
        for block in start..start + count {
            assert!(self.is_set(block), "Block {block} cleared while free");
            self.set(block, false);
        }
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(0);
    }

    /// Lowest start index of `count` consecutive free blocks.
    /// Runs ending exactly at the end of the bitmap are accepted.
    pub fn find_first_free_run(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return Some(0);
        }
        let mut run = 0;
        for block in 0..self.len {
            if self.is_set(block) {
                run = 0;
            } else {
                run += 1;
                if run == count {
                    return Some(block + 1 - count);
                }
            }
        }
        None
    }

    /// Number of blocks in use.
    pub fn count_reserved(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones().us()).sum()
    }

    /// Length of the longest run of free blocks.
    pub fn largest_free_run(&self) -> usize {
        let (mut best, mut run) = (0, 0);
        for block in 0..self.len {
            if self.is_set(block) {
                run = 0;
            } else {
                run += 1;
                best = best.max(run);
            }
        }
        best
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

/// Occupancy of the 16 palette slots of one screen.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SlotMask(u16);

impl SlotMask {
    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_set(self, slot: usize) -> bool {
        self.0.is_bit(slot.u16())
    }

    fn range(start: usize, count: usize) -> u16 {
        assert!(
            start + count <= NUM_SLOTS,
            "Palette slots {start}..{} out of range",
            start + count
        );
        u16::low_mask(count.u32())
            .checked_shl(start.u32())
            .unwrap_or(0)
    }

    /// Set every slot contained in `mask`.
    pub fn mark(&mut self, mask: u16) {
        self.0 |= mask;
    }

    pub fn reserve(&mut self, start: usize, count: usize) {
        let range = Self::range(start, count);
        if self.0 & range != 0 {
            log::warn!(
                "Palette slots {start}..{} overlap reserved mask 0x{:04X}",
                start + count,
                self.0
            );
        }
        self.0 |= range;
    }

    pub fn clear(&mut self, start: usize, count: usize) {
        self.0 &= !Self::range(start, count);
    }

    pub fn clear_all(&mut self) {
        self.0 = 0;
    }

    /// Lowest start slot of `count` consecutive free slots.
    pub fn find_first_free_run(self, count: usize) -> Option<usize> {
        if count > NUM_SLOTS {
            return None;
        }
        (0..=NUM_SLOTS - count).find(|start| self.0 & Self::range(*start, count) == 0)
    }
}
