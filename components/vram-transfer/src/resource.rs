// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Graphics resources handed to the allocators and the proxies handed
//! back to the renderer.

use std::sync::Arc;

use common::{numutil::NumExt, HeapId};

use crate::{
    heap::{HeapBlock, ScratchHeap},
    hw::registers::ObjCharMode,
    Screen,
};

/// Account one bookkeeping table on a scratch heap.
/// Running out of heap while setting up an allocator is unrecoverable.
pub(crate) fn alloc_table(heaps: &mut impl ScratchHeap, heap: HeapId, size: usize) -> HeapBlock {
    match heaps.alloc(heap, size) {
        Some(block) => block,
        None => panic!("Heap {heap:?} cannot fit a {size} byte transfer table"),
    }
}

/// Sprite tile data. Cheap to clone; the bytes are shared.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CharacterData {
    raw: Arc<[u8]>,
    mapping: ObjCharMode,
    vram_transfer: bool,
}

impl CharacterData {
    pub fn new(raw: impl Into<Arc<[u8]>>, mapping: ObjCharMode) -> Self {
        Self {
            raw: raw.into(),
            mapping,
            vram_transfer: false,
        }
    }

    /// Data of a sprite whose frames are streamed into a reserved range
    /// each frame instead of being copied once.
    pub fn for_vram_transfer(raw: impl Into<Arc<[u8]>>, mapping: ObjCharMode) -> Self {
        Self {
            vram_transfer: true,
            ..Self::new(raw, mapping)
        }
    }

    pub fn raw(&self) -> &Arc<[u8]> {
        &self.raw
    }

    pub fn len(&self) -> u32 {
        self.raw.len().u32()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn mapping(&self) -> ObjCharMode {
        self.mapping
    }

    pub fn is_vram_transfer(&self) -> bool {
        self.vram_transfer
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PaletteFormat {
    /// 16 colours, one 32 byte slot each.
    Pltt16,
    /// 256 colours, addressed without a slot offset.
    Pltt256,
}

/// Palette colours, optionally meant for the extended palette area.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PaletteData {
    raw: Arc<[u8]>,
    format: PaletteFormat,
    extended: bool,
}

impl PaletteData {
    pub fn new(raw: impl Into<Arc<[u8]>>, format: PaletteFormat) -> Self {
        Self {
            raw: raw.into(),
            format,
            extended: false,
        }
    }

    pub fn extended(raw: impl Into<Arc<[u8]>>, format: PaletteFormat) -> Self {
        Self {
            extended: true,
            ..Self::new(raw, format)
        }
    }

    pub fn raw(&self) -> &Arc<[u8]> {
        &self.raw
    }

    pub fn format(&self) -> PaletteFormat {
        self.format
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

/// Where a sprite's tiles ended up, per screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ImageProxy {
    location: [Option<u32>; 2],
    size: [u32; 2],
    mapping: [ObjCharMode; 2],
    vram_transfer: bool,
    ext_palette: bool,
}

impl ImageProxy {
    /// Byte offset into OBJ VRAM of the given screen, if placed there.
    pub fn location(&self, screen: Screen) -> Option<u32> {
        self.location[screen.idx()]
    }

    /// Bytes of VRAM the image may use on the given screen, starting at
    /// its location. 0 where it is not placed.
    pub fn size(&self, screen: Screen) -> u32 {
        self.size[screen.idx()]
    }

    /// Tile number the OBJ attributes need to reference the image.
    pub fn tile_number(&self, screen: Screen) -> Option<u32> {
        let boundary = self.mapping[screen.idx()].boundary_bytes();
        self.location(screen).map(|loc| loc / boundary)
    }

    pub fn mapping(&self, screen: Screen) -> ObjCharMode {
        self.mapping[screen.idx()]
    }

    /// Is this image fed by the cell transfer streamer?
    pub fn is_vram_transfer(&self) -> bool {
        self.vram_transfer
    }

    pub fn uses_ext_palette(&self) -> bool {
        self.ext_palette
    }

    pub fn set_ext_palette(&mut self, ext: bool) {
        self.ext_palette = ext;
    }

    /// Place the image at `location` with room for `size` bytes, or take
    /// it off the screen with `None`.
    pub(crate) fn set_range(&mut self, screen: Screen, range: Option<(u32, u32)>) {
        self.location[screen.idx()] = range.map(|(location, _)| location);
        self.size[screen.idx()] = range.map_or(0, |(_, size)| size);
    }

    pub(crate) fn set_mapping(&mut self, screen: Screen, mapping: ObjCharMode) {
        self.mapping[screen.idx()] = mapping;
    }

    pub(crate) fn set_vram_transfer(&mut self, vram_transfer: bool) {
        self.vram_transfer = vram_transfer;
    }

    pub(crate) fn is_placed(&self) -> bool {
        self.location.iter().any(Option::is_some)
    }
}

/// Where a palette ended up, per screen.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PaletteProxy {
    location: [Option<u32>; 2],
    format: PaletteFormat,
    extended: bool,
}

impl PaletteProxy {
    pub(crate) fn new(format: PaletteFormat, extended: bool) -> Self {
        Self {
            location: [None; 2],
            format,
            extended,
        }
    }

    /// Byte offset into the base or extended palette area.
    pub fn location(&self, screen: Screen) -> Option<u32> {
        self.location[screen.idx()]
    }

    pub fn format(&self) -> PaletteFormat {
        self.format
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub(crate) fn set_location(&mut self, screen: Screen, location: Option<u32>) {
        self.location[screen.idx()] = location;
    }
}
