// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use crate::KB;

/// Scratch heaps the allocators can place their bookkeeping in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde_config", derive(serde::Deserialize, serde::Serialize))]
pub enum HeapId {
    #[default]
    System,
    Application,
    Field,
    Battle,
}

/// Configuration used when initializing the transfer allocators.
/// These options don't change at runtime; changing them requires
/// tearing the allocators down and initializing them again.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde_config", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde_config", serde(default))]
pub struct TransferConfig {
    /// Maximum number of live character transfer tasks.
    pub char_tasks: usize,
    /// Bytes at the end of main OBJ VRAM managed by the tail block pool.
    pub char_tail_main: u32,
    /// Bytes at the end of sub OBJ VRAM managed by the tail block pool.
    pub char_tail_sub: u32,
    /// Maximum number of live palette transfer tasks.
    pub pltt_tasks: usize,
    /// Maximum number of pending copies per frame.
    pub queue_capacity: usize,
    /// Maximum number of animated cells streaming through the queue.
    pub cell_states: usize,
    /// Heap all bookkeeping is taken from.
    pub heap: HeapId,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            char_tasks: 48,
            char_tail_main: 16 * KB,
            char_tail_sub: 16 * KB,
            pltt_tasks: 16,
            queue_capacity: 48,
            cell_states: 32,
            heap: HeapId::System,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.char_tail_main, 0x4000);
        assert_eq!(config.char_tail_sub, 0x4000);
        assert_eq!(config.pltt_tasks, 16);
        assert_eq!(config.heap, HeapId::System);
    }
}
