// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use arrayvec::ArrayVec;
use common::{numutil::NumExt, KB};
use modular_bitfield::{bitfield, specifiers::*};

use crate::Screen;

pub const A: usize = 0;
pub const B: usize = 1;
pub const C: usize = 2;
pub const D: usize = 3;
pub const E: usize = 4;
pub const F: usize = 5;
pub const G: usize = 6;
pub const H: usize = 7;
pub const I: usize = 8;

const BANK_SIZES: [u32; 9] = [
    128 * KB,
    128 * KB,
    128 * KB,
    128 * KB,
    64 * KB,
    16 * KB,
    16 * KB,
    32 * KB,
    16 * KB,
];

/// Only the first 8K of a bank mapped as OBJ extended palette are used.
pub const OBJ_EXT_PALETTE_SIZE: u32 = 8 * KB;

#[bitfield]
#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VramCtrl {
    mst: B3,
    ofs: B2,
    #[skip]
    __: B2,
    enable: bool,
}

impl VramCtrl {
    /// Enabled control value with the given MST and OFS.
    pub fn mapped(mst: u8, ofs: u8) -> Self {
        Self::new()
            .with_mst(mst)
            .with_ofs(ofs)
            .with_enable(true)
    }
}

/// The nine VRAM banks, limited to the mappings sprites care about:
/// OBJ character memory and OBJ extended palettes of both engines.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ObjVram {
    pub ctrls: [VramCtrl; 9],
    pub v: [Box<[u8]>; 9],
}

impl ObjVram {
    pub fn update_ctrl(&mut self, r: usize, new: u8) {
        let new: VramCtrl = new.into();
        if self.ctrls[r] != new {
            log::trace!("VRAM bank {r} control changed to 0x{:02X}", u8::from(new));
        }
        self.ctrls[r] = new;
    }

    /// Where a bank shows up in OBJ character space, if at all.
    fn obj_offset_for(r: usize, ctrl: VramCtrl) -> Option<(Screen, u32)> {
        if !ctrl.enable() {
            return None;
        }
        let ofs = ctrl.ofs().u32();
        Some(match (r, ctrl.mst()) {
            // OBJ A
            (A | B, 2) => (Screen::Main, ofs.bit(0) * 0x2_0000),
            (E, 2) => (Screen::Main, 0),
            (F | G, 2) => (Screen::Main, (0x4000 * ofs.bit(0)) + (0x1_0000 * ofs.bit(1))),

            // OBJ B
            (D, 4) | (I, 2) => (Screen::Sub, 0),

            _ => return None,
        })
    }

    fn ext_palette_for(r: usize, ctrl: VramCtrl) -> Option<Screen> {
        if !ctrl.enable() {
            return None;
        }
        match (r, ctrl.mst()) {
            (F | G, 5) => Some(Screen::Main),
            (I, 3) => Some(Screen::Sub),
            _ => None,
        }
    }

    /// Banks mapped as OBJ character memory, as (bank, offset) sorted by
    /// offset.
    pub fn obj_segments(&self, screen: Screen) -> ArrayVec<(usize, u32), 9> {
        let mut segments: ArrayVec<(usize, u32), 9> = (A..=I)
            .filter_map(|r| match Self::obj_offset_for(r, self.ctrls[r]) {
                Some((s, offset)) if s == screen => Some((r, offset)),
                _ => None,
            })
            .collect();
        segments.sort_by_key(|(_, offset)| *offset);
        segments
    }

    /// Size of OBJ character memory that is contiguously mapped from
    /// offset 0. Gaps end the usable range.
    pub fn obj_capacity(&self, screen: Screen) -> u32 {
        let mut end = 0;
        for (r, offset) in self.obj_segments(screen) {
            if offset > end {
                break;
            }
            end = end.max(offset + BANK_SIZES[r]);
        }
        end
    }

    fn ext_palette_bank(&self, screen: Screen) -> Option<usize> {
        (A..=I).find(|r| Self::ext_palette_for(*r, self.ctrls[*r]) == Some(screen))
    }

    /// Size of the OBJ extended palette area, 0 if no bank provides it.
    pub fn ext_palette_capacity(&self, screen: Screen) -> u32 {
        match self.ext_palette_bank(screen) {
            Some(_) => OBJ_EXT_PALETTE_SIZE,
            None => 0,
        }
    }

    fn find_obj(&self, screen: Screen, addr: u32) -> Option<(usize, usize)> {
        self.obj_segments(screen)
            .into_iter()
            .find(|(r, offset)| (*offset..*offset + BANK_SIZES[*r]).contains(&addr))
            .map(|(r, offset)| (r, (addr - offset).us()))
    }

    pub fn write_obj(&mut self, screen: Screen, offset: u32, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let addr = offset + done.u32();
            let Some((bank, start)) = self.find_obj(screen, addr) else {
                log::error!("Write to unmapped {screen:?} OBJ VRAM at 0x{addr:X}");
                return;
            };
            let dest = &mut self.v[bank][start..];
            let len = dest.len().min(data.len() - done);
            dest[..len].copy_from_slice(&data[done..done + len]);
            done += len;
        }
    }

    pub fn read_obj(&self, screen: Screen, offset: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let addr = offset + out.len().u32();
            let Some((bank, start)) = self.find_obj(screen, addr) else {
                log::error!("Read from unmapped {screen:?} OBJ VRAM at 0x{addr:X}");
                out.resize(len, 0);
                break;
            };
            let src = &self.v[bank][start..];
            let take = src.len().min(len - out.len());
            out.extend_from_slice(&src[..take]);
        }
        out
    }

    pub fn write_ext_palette(&mut self, screen: Screen, offset: u32, data: &[u8]) {
        let end = offset.us() + data.len();
        match self.ext_palette_bank(screen) {
            Some(bank) if end <= OBJ_EXT_PALETTE_SIZE.us() => {
                self.v[bank][offset.us()..end].copy_from_slice(data)
            }
            _ => log::error!("Write to unmapped {screen:?} OBJ extended palette at 0x{offset:X}"),
        }
    }

    pub fn read_ext_palette(&self, screen: Screen, offset: u32, len: usize) -> Option<&[u8]> {
        let bank = self.ext_palette_bank(screen)?;
        self.v[bank].get(offset.us()..offset.us() + len)
    }
}

impl Default for ObjVram {
    fn default() -> Self {
        Self {
            ctrls: [VramCtrl::default(); 9],
            v: BANK_SIZES.map(|size| vec![0; size.us()].into_boxed_slice()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn map(vram: &mut ObjVram, r: usize, mst: u8, ofs: u8) {
        vram.update_ctrl(r, VramCtrl::mapped(mst, ofs).into());
    }

    #[test]
    fn test_main_capacities() {
        let cases: [(&[(usize, u8, u8)], u32); 8] = [
            (&[], 0),
            (&[(G, 2, 0)], 16),
            (&[(F, 2, 0), (G, 2, 1)], 32),
            (&[(E, 2, 0)], 64),
            (&[(E, 2, 0), (F, 2, 2)], 80),
            (&[(E, 2, 0), (F, 2, 2), (G, 2, 3)], 96),
            (&[(B, 2, 0)], 128),
            (&[(A, 2, 0), (B, 2, 1)], 256),
        ];
        for (banks, kb) in cases {
            let mut vram = ObjVram::default();
            for (r, mst, ofs) in banks {
                map(&mut vram, *r, *mst, *ofs);
            }
            assert_eq!(vram.obj_capacity(Screen::Main), kb * KB, "{banks:?}");
        }
    }

    #[test]
    fn test_sub_capacities() {
        let mut vram = ObjVram::default();
        map(&mut vram, I, 2, 0);
        assert_eq!(vram.obj_capacity(Screen::Sub), 16 * KB);
        assert_eq!(vram.obj_capacity(Screen::Main), 0);
        map(&mut vram, I, 0, 0);
        map(&mut vram, D, 4, 0);
        assert_eq!(vram.obj_capacity(Screen::Sub), 128 * KB);
    }

    #[test]
    fn test_gap_ends_capacity() {
        let mut vram = ObjVram::default();
        map(&mut vram, B, 2, 1);
        assert_eq!(vram.obj_capacity(Screen::Main), 0);
    }

    #[test]
    fn test_ext_palette() {
        let mut vram = ObjVram::default();
        assert_eq!(vram.ext_palette_capacity(Screen::Main), 0);
        map(&mut vram, F, 5, 0);
        map(&mut vram, I, 3, 0);
        assert_eq!(vram.ext_palette_capacity(Screen::Main), 8 * KB);
        assert_eq!(vram.ext_palette_capacity(Screen::Sub), 8 * KB);

        vram.write_ext_palette(Screen::Sub, 0x200, &[1, 2]);
        assert_eq!(vram.read_ext_palette(Screen::Sub, 0x200, 2), Some(&[1, 2][..]));
        assert_eq!(vram.v[I][0x200], 1);
    }

    #[test]
    fn test_write_across_banks() {
        let mut vram = ObjVram::default();
        map(&mut vram, E, 2, 0);
        map(&mut vram, F, 2, 2);
        vram.write_obj(Screen::Main, 0xFFFE, &[1, 2, 3, 4]);
        assert_eq!(vram.v[E][0xFFFE..], [1, 2]);
        assert_eq!(vram.v[F][..2], [3, 4]);
        assert_eq!(vram.read_obj(Screen::Main, 0xFFFE, 4), [1, 2, 3, 4]);
    }

    #[test]
    fn test_unmapped_write_ignored() {
        let mut vram = ObjVram::default();
        vram.write_obj(Screen::Sub, 0, &[1; 4]);
        assert!(vram.v.iter().all(|bank| bank.iter().all(|b| *b == 0)));
        assert_eq!(vram.read_obj(Screen::Sub, 0, 2), [0, 0]);
    }
}
