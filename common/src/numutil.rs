// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use std::ops::BitAnd;

/// Trait for common number operations.
pub trait NumExt: BitAnd<Output = Self> + Copy + PartialEq + Default {
    /// Get the state of the given bit. Returns 0/1.
    fn bit(self, bit: u16) -> Self;
    /// Is the given bit set?
    fn is_bit(&self, bit: u16) -> bool;
    /// Set the given bit.
    fn set_bit(self, bit: u16, state: bool) -> Self;
    /// Convert to u16
    fn u16(self) -> u16;
    /// Convert to u32
    fn u32(self) -> u32;
    /// Convert to usize
    fn us(self) -> usize;

    /// Get bits in a certain range
    fn bits(self, start: Self, len: Self) -> Self;
    /// A mask with the lowest `len` bits set, saturating at the full width.
    fn low_mask(len: u32) -> Self;

    /// Round up to the next multiple of `to`, `None` on overflow.
    /// `to` must not be zero.
    fn checked_align_up(self, to: Self) -> Option<Self>;
}

macro_rules! num_ext_impl {
    ($ty:ident) => {
        impl NumExt for $ty {
            #[inline(always)]
            fn bit(self, bit: u16) -> $ty {
                ((self >> bit) & 1)
            }

            #[inline(always)]
            fn is_bit(&self, bit: u16) -> bool {
                (self & (1 << bit)) != 0
            }

            #[inline(always)]
            fn set_bit(self, bit: u16, state: bool) -> $ty {
                (self & ((1 << bit) ^ Self::MAX)) | ((state as $ty) << bit)
            }

            #[inline(always)]
            fn u16(self) -> u16 {
                self as u16
            }

            #[inline(always)]
            fn u32(self) -> u32 {
                self as u32
            }

            #[inline(always)]
            fn us(self) -> usize {
                self as usize
            }

            #[inline(always)]
            fn bits(self, start: $ty, len: $ty) -> $ty {
                (self >> start) & ((1 << len) - 1)
            }

            #[inline(always)]
            fn low_mask(len: u32) -> $ty {
                match (1 as $ty).checked_shl(len) {
                    Some(top) => top.wrapping_sub(1),
                    None => Self::MAX,
                }
            }

            #[inline(always)]
            fn checked_align_up(self, to: $ty) -> Option<$ty> {
                self.div_ceil(to).checked_mul(to)
            }
        }
    };
}

num_ext_impl!(u8);
num_ext_impl!(u16);
num_ext_impl!(u32);
num_ext_impl!(usize);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bits() {
        assert_eq!(0b1010u8.bit(1), 1);
        assert!(!0b1010u8.is_bit(2));
        assert_eq!(0u16.set_bit(15, true), 0x8000);
        assert_eq!(0xFFu16.set_bit(0, false), 0xFE);
        assert_eq!(0xABCDu16.bits(4, 8), 0xBC);
    }

    #[test]
    fn test_masks() {
        assert_eq!(u16::low_mask(0), 0);
        assert_eq!(u16::low_mask(3), 0b111);
        assert_eq!(u16::low_mask(16), 0xFFFF);
        assert_eq!(u16::low_mask(40), 0xFFFF);
    }

    #[test]
    fn test_align() {
        assert_eq!(33u32.checked_align_up(32), Some(64));
        assert_eq!(64u32.checked_align_up(32), Some(64));
        assert_eq!(0u32.checked_align_up(128), Some(0));
        assert_eq!(u32::MAX.checked_align_up(32), None);
        assert_eq!(200usize.checked_align_up(64), Some(256));
    }
}
