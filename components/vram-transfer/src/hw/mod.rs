// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use common::numutil::NumExt;

use self::{
    registers::{DisplayControl, ObjCharMode},
    vram::ObjVram,
};
use crate::{
    queue::{TransferDest, VramSink},
    Screen,
};

pub mod registers;
pub mod vram;

/// Size of the standard OBJ palette of one engine.
pub const OBJ_PALETTE_SIZE: usize = 0x200;

/// What the allocators need to know about the 2D engines.
pub trait ObjVramHardware {
    /// Tile mapping mode currently configured in DISPCNT.
    fn obj_char_mode(&self, screen: Screen) -> ObjCharMode;
    fn set_obj_char_mode(&mut self, screen: Screen, mode: ObjCharMode);
    /// Bytes of OBJ character memory currently mapped.
    fn obj_vram_size(&self, screen: Screen) -> u32;
    /// Bytes of OBJ extended palette memory currently mapped.
    fn obj_ext_palette_size(&self, screen: Screen) -> u32;
}

/// OBJ related state of both 2D engines.
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Gpu2d {
    pub dispcnt: [DisplayControl; 2],
    pub vram: ObjVram,
    pub palette: [Box<[u8]>; 2],
}

impl Gpu2d {
    pub fn read_palette(&self, screen: Screen, offset: usize, len: usize) -> Option<&[u8]> {
        self.palette[screen.idx()].get(offset..offset + len)
    }
}

impl Default for Gpu2d {
    fn default() -> Self {
        Self {
            dispcnt: [DisplayControl::new(); 2],
            vram: ObjVram::default(),
            palette: [
                vec![0; OBJ_PALETTE_SIZE].into_boxed_slice(),
                vec![0; OBJ_PALETTE_SIZE].into_boxed_slice(),
            ],
        }
    }
}

impl ObjVramHardware for Gpu2d {
    fn obj_char_mode(&self, screen: Screen) -> ObjCharMode {
        self.dispcnt[screen.idx()].obj_char_mode()
    }

    fn set_obj_char_mode(&mut self, screen: Screen, mode: ObjCharMode) {
        self.dispcnt[screen.idx()].set_obj_char_mode(mode);
    }

    fn obj_vram_size(&self, screen: Screen) -> u32 {
        self.vram.obj_capacity(screen)
    }

    fn obj_ext_palette_size(&self, screen: Screen) -> u32 {
        self.vram.ext_palette_capacity(screen)
    }
}

impl VramSink for Gpu2d {
    fn write(&mut self, dest: TransferDest, offset: u32, data: &[u8]) {
        match dest {
            TransferDest::ObjChar(screen) => self.vram.write_obj(screen, offset, data),
            TransferDest::ObjExtPltt(screen) => self.vram.write_ext_palette(screen, offset, data),
            TransferDest::ObjPltt(screen) => {
                let start = offset.us();
                match self.palette[screen.idx()].get_mut(start..start + data.len()) {
                    Some(dest) => dest.copy_from_slice(data),
                    None => log::error!(
                        "Write of 0x{:X} bytes past {screen:?} OBJ palette at 0x{offset:X}",
                        data.len()
                    ),
                }
            }
        }
    }
}

/// Hardware stand-in with fixed sizes, for setups that do not model
/// bank mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FixedObjHardware {
    pub modes: [ObjCharMode; 2],
    pub vram_size: [u32; 2],
    pub ext_palette_size: [u32; 2],
}

impl FixedObjHardware {
    /// Same mode and VRAM size on both screens, no extended palettes.
    pub fn uniform(mode: ObjCharMode, vram_size: u32) -> Self {
        Self {
            modes: [mode; 2],
            vram_size: [vram_size; 2],
            ext_palette_size: [0; 2],
        }
    }
}

impl ObjVramHardware for FixedObjHardware {
    fn obj_char_mode(&self, screen: Screen) -> ObjCharMode {
        self.modes[screen.idx()]
    }

    fn set_obj_char_mode(&mut self, screen: Screen, mode: ObjCharMode) {
        self.modes[screen.idx()] = mode;
    }

    fn obj_vram_size(&self, screen: Screen) -> u32 {
        self.vram_size[screen.idx()]
    }

    fn obj_ext_palette_size(&self, screen: Screen) -> u32 {
        self.ext_palette_size[screen.idx()]
    }
}
