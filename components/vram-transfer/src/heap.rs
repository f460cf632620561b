// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Budget accounting for the bookkeeping memory of the allocators.
//! The allocators own their tables as regular Rust values; a scratch heap
//! only decides whether the game could afford them on the console.

use common::HeapId;

/// Handle to one accounted allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HeapBlock {
    index: usize,
    generation: u32,
}

pub trait ScratchHeap {
    /// Account `size` bytes on the given heap, or `None` if it is full
    /// or does not exist.
    fn alloc(&mut self, heap: HeapId, size: usize) -> Option<HeapBlock>;
    /// Give back a block. Freeing a block twice is a programming error.
    fn free(&mut self, block: HeapBlock);
}

#[derive(Debug, Clone)]
struct Region {
    id: HeapId,
    size: usize,
    used: usize,
}

#[derive(Debug, Clone)]
struct Allocation {
    region: usize,
    size: usize,
    live: bool,
    generation: u32,
}

/// A set of fixed-size heaps, tracking how much of each is in use.
#[derive(Debug, Clone, Default)]
pub struct HeapRegions {
    regions: Vec<Region>,
    allocations: Vec<Allocation>,
}

impl HeapRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, id: HeapId, size: usize) -> Self {
        assert!(
            self.regions.iter().all(|r| r.id != id),
            "Heap {id:?} created twice"
        );
        self.regions.push(Region { id, size, used: 0 });
        self
    }

    /// Bytes currently accounted on the given heap.
    pub fn used(&self, id: HeapId) -> usize {
        self.regions
            .iter()
            .find(|r| r.id == id)
            .map_or(0, |r| r.used)
    }

    /// Number of blocks not yet freed, over all heaps.
    pub fn live_blocks(&self) -> usize {
        self.allocations.iter().filter(|a| a.live).count()
    }
}

impl ScratchHeap for HeapRegions {
    fn alloc(&mut self, heap: HeapId, size: usize) -> Option<HeapBlock> {
        let Some(region_idx) = self.regions.iter().position(|r| r.id == heap) else {
            log::error!("Allocation of {size} bytes from unknown heap {heap:?}");
            return None;
        };
        let region = &mut self.regions[region_idx];
        if region.used + size > region.size {
            log::warn!(
                "Heap {heap:?} exhausted: {size} bytes requested, {} of {} in use",
                region.used,
                region.size
            );
            return None;
        }
        region.used += size;

        let reuse = self.allocations.iter().position(|a| !a.live);
        let index = match reuse {
            Some(index) => {
                let slot = &mut self.allocations[index];
                slot.region = region_idx;
                slot.size = size;
                slot.live = true;
                slot.generation += 1;
                index
            }
            None => {
                self.allocations.push(Allocation {
                    region: region_idx,
                    size,
                    live: true,
                    generation: 0,
                });
                self.allocations.len() - 1
            }
        };
        Some(HeapBlock {
            index,
            generation: self.allocations[index].generation,
        })
    }

    fn free(&mut self, block: HeapBlock) {
        let alloc = self
            .allocations
            .get_mut(block.index)
            .filter(|a| a.live && a.generation == block.generation);
        let Some(alloc) = alloc else {
            panic!("Heap block {block:?} freed twice or never allocated");
        };
        alloc.live = false;
        self.regions[alloc.region].used -= alloc.size;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_basic() {
        let mut heaps = HeapRegions::new().with_region(HeapId::Field, 100);
        let a = heaps.alloc(HeapId::Field, 60).unwrap();
        assert!(heaps.alloc(HeapId::Field, 50).is_none());
        let b = heaps.alloc(HeapId::Field, 40).unwrap();
        assert_eq!(heaps.used(HeapId::Field), 100);
        heaps.free(a);
        assert_eq!(heaps.used(HeapId::Field), 40);
        heaps.free(b);
        assert_eq!(heaps.live_blocks(), 0);
    }

    #[test]
    fn test_unknown_heap() {
        let mut heaps = HeapRegions::new().with_region(HeapId::Field, 100);
        assert!(heaps.alloc(HeapId::Battle, 1).is_none());
    }

    #[test]
    #[should_panic]
    fn test_stale_handle() {
        let mut heaps = HeapRegions::new().with_region(HeapId::System, 100);
        let a = heaps.alloc(HeapId::System, 10).unwrap();
        heaps.free(a);
        let _b = heaps.alloc(HeapId::System, 10).unwrap();
        heaps.free(a);
    }
}
