// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use modular_bitfield::{bitfield, specifiers::*, BitfieldSpecifier};

use crate::blocks::CHAR_UNIT;

/// DISPCNT of one 2D engine. Only the OBJ related fields are
/// interpreted here, the rest is carried so the register round-trips.
#[bitfield]
#[repr(u32)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DisplayControl {
    pub bg_mode: B3,
    pub bg0_is_3d: bool,
    pub tile_obj_mode: CharacterMappingMode,
    pub bitmap_obj_256dot: bool,
    pub bitmap_obj_mode: CharacterMappingMode,
    pub forced_blank_enable: bool,
    pub bg_en: B4,
    pub obj_en: bool,
    pub win0_en: bool,
    pub win1_en: bool,
    pub winobj_en: bool,

    pub display_mode: B2,
    pub vram_block: B2,
    pub tile_obj_1d_boundary: B2,
    pub bitmap_obj_1d_boundary: B1,
    pub hblank_oam_free: bool,
    pub character_base_block: B3,
    pub screen_base_block: B3,
    pub bg_ext_pal_enable: bool,
    pub obj_ext_pal_enable: bool,
}

impl DisplayControl {
    /// Tile OBJ mapping mode as selected by the mapping and boundary bits.
    pub fn obj_char_mode(&self) -> ObjCharMode {
        match self.tile_obj_mode() {
            CharacterMappingMode::TwoDim => ObjCharMode::TwoDim,
            CharacterMappingMode::OneDim => match self.tile_obj_1d_boundary() {
                0 => ObjCharMode::OneDim32K,
                1 => ObjCharMode::OneDim64K,
                2 => ObjCharMode::OneDim128K,
                _ => ObjCharMode::OneDim256K,
            },
        }
    }

    pub fn set_obj_char_mode(&mut self, mode: ObjCharMode) {
        let (mapping, boundary) = match mode {
            ObjCharMode::TwoDim => (CharacterMappingMode::TwoDim, 0),
            ObjCharMode::OneDim32K => (CharacterMappingMode::OneDim, 0),
            ObjCharMode::OneDim64K => (CharacterMappingMode::OneDim, 1),
            ObjCharMode::OneDim128K => (CharacterMappingMode::OneDim, 2),
            ObjCharMode::OneDim256K => (CharacterMappingMode::OneDim, 3),
        };
        self.set_tile_obj_mode(mapping);
        self.set_tile_obj_1d_boundary(boundary);
    }
}

#[derive(BitfieldSpecifier, Debug, Copy, Clone, PartialEq, Eq)]
#[bits = 1]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CharacterMappingMode {
    TwoDim = 0,
    OneDim = 1,
}

/// How tile numbers of OBJ attributes map to VRAM addresses.
/// In 1D modes one tile number step covers `block_units` 32-byte units,
/// which is what lets larger boundaries address more VRAM.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ObjCharMode {
    #[default]
    TwoDim,
    OneDim32K,
    OneDim64K,
    OneDim128K,
    OneDim256K,
}

impl ObjCharMode {
    pub const ALL: [ObjCharMode; 5] = [
        ObjCharMode::TwoDim,
        ObjCharMode::OneDim32K,
        ObjCharMode::OneDim64K,
        ObjCharMode::OneDim128K,
        ObjCharMode::OneDim256K,
    ];

    /// Number of 32-byte units one tile number step covers.
    pub fn block_units(self) -> u32 {
        match self {
            ObjCharMode::TwoDim | ObjCharMode::OneDim32K => 1,
            ObjCharMode::OneDim64K => 2,
            ObjCharMode::OneDim128K => 4,
            ObjCharMode::OneDim256K => 8,
        }
    }

    /// Size of one tile number step in bytes.
    pub fn boundary_bytes(self) -> u32 {
        self.block_units() * CHAR_UNIT
    }
}
