// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use common::numutil::NumExt;

use crate::hw::registers::ObjCharMode;

/// Bytes of one 8x8 4bpp tile, the smallest unit OBJ VRAM is addressed in.
pub const CHAR_UNIT: u32 = 32;

/// Granularity of the tail pool of one screen.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BlockSize {
    units: u32,
}

impl BlockSize {
    pub fn from_mode(mode: ObjCharMode) -> Self {
        Self {
            units: mode.block_units(),
        }
    }

    /// Number of 32-byte units per block.
    pub fn units(self) -> u32 {
        self.units
    }

    pub fn bytes(self) -> u32 {
        self.units * CHAR_UNIT
    }

    pub fn blocks_to_bytes(self, blocks: usize) -> u32 {
        blocks.u32() * self.bytes()
    }

    /// Blocks needed to hold `bytes`, rounding up.
    pub fn bytes_to_blocks_ceil(self, bytes: u32) -> usize {
        bytes.div_ceil(self.bytes()).us()
    }

    /// Whole blocks contained in `bytes`, rounding down.
    pub fn bytes_to_blocks_floor(self, bytes: u32) -> usize {
        (bytes / self.bytes()).us()
    }

    /// Round `bytes` up to whole blocks, `None` past the address space.
    pub fn align_up(self, bytes: u32) -> Option<u32> {
        bytes.checked_align_up(self.bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_conversions() {
        let size = BlockSize::from_mode(ObjCharMode::OneDim128K);
        assert_eq!(size.bytes(), 128);
        assert_eq!(size.bytes_to_blocks_ceil(129), 2);
        assert_eq!(size.bytes_to_blocks_ceil(128), 1);
        assert_eq!(size.bytes_to_blocks_ceil(0), 0);
        assert_eq!(size.bytes_to_blocks_floor(255), 1);
        assert_eq!(size.blocks_to_bytes(3), 384);
        assert_eq!(size.align_up(1), Some(128));
        assert_eq!(size.align_up(u32::MAX), None);
    }
}
