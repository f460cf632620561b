// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Allocators that decide where sprite tiles and palettes live in the
//! OBJ VRAM of the two NDS 2D engines, plus the per-frame queue that
//! carries the actual bytes over.
//!
//! - [char_transfer] places character (tile) data, either by bumping a
//!   front cursor or in a block-granular pool at the end of VRAM.
//! - [pltt_transfer] places palettes in the 16 standard slots or the
//!   extended palette area.
//! - [queue] collects copies during a frame and flushes them in order.
//! - [cell_transfer] streams animation frames of VRAM-transfer sprites.
//! - [hw] models the registers that decide capacities and tile mapping.

use std::fmt;

pub mod bitmap;
pub mod blocks;
pub mod cell_transfer;
pub mod char_transfer;
pub mod heap;
pub mod hw;
pub mod pltt_transfer;
pub mod queue;
pub mod resource;

pub use char_transfer::{CharTransfer, CharTransferTaskTemplate, CharTransferTemplate};
pub use cell_transfer::CellTransferStates;
pub use pltt_transfer::{PlttTransfer, PlttTransferTaskTemplate};
pub use queue::VramTransferQueue;

/// One of the two 2D engines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Screen {
    Main = 0,
    Sub = 1,
}

impl Screen {
    pub const BOTH: [Screen; 2] = [Screen::Main, Screen::Sub];

    /// Index into per-screen arrays.
    #[inline]
    pub fn idx(self) -> usize {
        self as usize
    }

    /// The VRAM type containing only this screen.
    #[inline]
    pub fn vram_type(self) -> VramType {
        match self {
            Screen::Main => VramType::MAIN,
            Screen::Sub => VramType::SUB,
        }
    }
}

bitflags::bitflags! {
    /// Which engines a resource is placed for.
    #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
    pub struct VramType: u8 {
        const MAIN = 1 << 0;
        const SUB = 1 << 1;
        const BOTH = Self::MAIN.bits | Self::SUB.bits;
    }
}

impl VramType {
    /// All screens contained in this type, main first.
    pub fn screens(self) -> impl Iterator<Item = Screen> {
        Screen::BOTH
            .into_iter()
            .filter(move |screen| self.contains(screen.vram_type()))
    }
}

/// Recoverable failures of the allocators.
/// Violated preconditions (double frees, unknown resource IDs, duplicate
/// requests) are programming errors and panic instead.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The front region or tail pool of this screen cannot fit the request.
    OutOfVramSpace { screen: Screen },
    /// None of the 16 palette slots of this screen form a long enough run.
    OutOfSlots { screen: Screen },
    /// Every task slot of the allocator is in use.
    NoFreeTask,
    /// No VRAM bank is mapped as extended OBJ palette for this screen.
    ExtendedPaletteUnavailable { screen: Screen },
    /// The task exists but holds no VRAM range that could be duplicated.
    TaskNotPlaced { resource_id: u32 },
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::OutOfVramSpace { screen } => {
                write!(f, "out of OBJ VRAM space on the {screen:?} screen")
            }
            TransferError::OutOfSlots { screen } => {
                write!(f, "no free palette slots on the {screen:?} screen")
            }
            TransferError::NoFreeTask => write!(f, "all transfer tasks are in use"),
            TransferError::ExtendedPaletteUnavailable { screen } => {
                write!(f, "no extended OBJ palette mapped on the {screen:?} screen")
            }
            TransferError::TaskNotPlaced { resource_id } => {
                write!(f, "resource {resource_id} has no VRAM range to copy")
            }
        }
    }
}

impl std::error::Error for TransferError {}

pub type TransferResult<T> = Result<T, TransferError>;
