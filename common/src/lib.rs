// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Shared helpers for the VRAM transfer crates: number utilities and
//! the configuration used to size the allocators.

pub mod config;
pub mod numutil;
#[cfg(feature = "serde")]
pub mod serialize;

pub use config::{HeapId, TransferConfig};

/// One kibibyte.
pub const KB: u32 = 1024;
