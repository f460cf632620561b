// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use std::{ops::Range, sync::Arc};

use common::{numutil::NumExt, HeapId};

use crate::{
    heap::{HeapBlock, ScratchHeap},
    resource::alloc_table,
    Screen,
};

/// Memory area a queued copy lands in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TransferDest {
    ObjChar(Screen),
    ObjPltt(Screen),
    ObjExtPltt(Screen),
}

/// Receiver of queued copies, usually the 2D engines.
pub trait VramSink {
    fn write(&mut self, dest: TransferDest, offset: u32, data: &[u8]);
}

/// One pending copy. The source bytes are shared with the resource that
/// requested it and stay alive until the queue is flushed.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TransferEntry {
    pub dest: TransferDest,
    pub offset: u32,
    pub source: Arc<[u8]>,
    pub range: Range<usize>,
}

impl TransferEntry {
    pub fn bytes(&self) -> &[u8] {
        &self.source[self.range.clone()]
    }
}

/// Bounded per-frame list of copies into VRAM.
/// Copies are applied in request order during [VramTransferQueue::process],
/// which runs once per frame while the engines do not read VRAM.
#[derive(Debug)]
pub struct VramTransferQueue {
    entries: Vec<TransferEntry>,
    capacity: usize,
    table: HeapBlock,
}

impl VramTransferQueue {
    pub fn new(capacity: usize, heap: HeapId, heaps: &mut impl ScratchHeap) -> Self {
        let table = alloc_table(
            heaps,
            heap,
            capacity * std::mem::size_of::<TransferEntry>(),
        );
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            table,
        }
    }

    /// Queue a copy of all of `source`.
    pub fn request(&mut self, dest: TransferDest, offset: u32, source: &Arc<[u8]>) {
        self.request_range(dest, offset, source, 0..source.len());
    }

    /// Queue a copy of `source[range]` to `offset` in `dest`.
    /// Overflowing the queue is a programming error: the frame would
    /// silently show stale graphics otherwise.
    pub fn request_range(
        &mut self,
        dest: TransferDest,
        offset: u32,
        source: &Arc<[u8]>,
        range: Range<usize>,
    ) {
        assert!(
            range.start <= range.end && range.end <= source.len(),
            "Transfer range {range:?} outside of {} byte source",
            source.len()
        );
        assert!(
            self.entries.len() < self.capacity,
            "VRAM transfer queue full ({} entries)",
            self.capacity
        );
        log::trace!(
            "Queued 0x{:X} bytes to {dest:?} at 0x{offset:X}",
            range.len()
        );
        self.entries.push(TransferEntry {
            dest,
            offset,
            source: Arc::clone(source),
            range,
        });
    }

    /// Apply all pending copies in request order and empty the queue.
    pub fn process(&mut self, sink: &mut impl VramSink) {
        if self.entries.is_empty() {
            return;
        }
        let bytes: usize = self.entries.iter().map(|e| e.range.len()).sum();
        log::debug!(
            "Flushing {} VRAM transfers (0x{:X} bytes)",
            self.entries.len(),
            bytes
        );
        for entry in self.entries.drain(..) {
            sink.write(entry.dest, entry.offset, entry.bytes());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pending(&self) -> &[TransferEntry] {
        &self.entries
    }

    /// Bytes of all pending copies.
    pub fn pending_bytes(&self) -> u32 {
        self.entries.iter().map(|e| e.range.len().u32()).sum()
    }

    /// Drop pending copies and give the table back to its heap.
    pub fn free(self, heaps: &mut impl ScratchHeap) {
        if !self.entries.is_empty() {
            log::warn!("Dropping {} unflushed VRAM transfers", self.entries.len());
        }
        heaps.free(self.table);
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::heap::HeapRegions;

    /// Sink that records every write.
    #[derive(Default)]
    pub struct RecordingSink(pub Vec<(TransferDest, u32, Vec<u8>)>);

    impl VramSink for RecordingSink {
        fn write(&mut self, dest: TransferDest, offset: u32, data: &[u8]) {
            self.0.push((dest, offset, data.to_vec()));
        }
    }

    pub fn heaps() -> HeapRegions {
        HeapRegions::new().with_region(HeapId::System, 0x10_0000)
    }

    #[test]
    fn test_basic() {
        let mut heaps = heaps();
        let mut queue = VramTransferQueue::new(4, HeapId::System, &mut heaps);
        let a: Arc<[u8]> = Arc::from(&[1u8, 2, 3, 4][..]);
        let b: Arc<[u8]> = Arc::from(&[9u8; 8][..]);
        queue.request(TransferDest::ObjChar(Screen::Main), 0x20, &a);
        queue.request_range(TransferDest::ObjPltt(Screen::Sub), 0x40, &b, 2..4);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_bytes(), 6);

        let mut sink = RecordingSink::default();
        queue.process(&mut sink);
        assert!(queue.is_empty());
        assert_eq!(
            sink.0,
            [
                (TransferDest::ObjChar(Screen::Main), 0x20, vec![1, 2, 3, 4]),
                (TransferDest::ObjPltt(Screen::Sub), 0x40, vec![9, 9]),
            ]
        );

        queue.process(&mut sink);
        assert_eq!(sink.0.len(), 2);
        queue.free(&mut heaps);
        assert_eq!(heaps.live_blocks(), 0);
    }

    #[test]
    fn test_source_outlives_owner() {
        let mut heaps = heaps();
        let mut queue = VramTransferQueue::new(1, HeapId::System, &mut heaps);
        let data: Arc<[u8]> = Arc::from(vec![5u8; 16]);
        queue.request(TransferDest::ObjChar(Screen::Sub), 0, &data);
        drop(data);
        let mut sink = RecordingSink::default();
        queue.process(&mut sink);
        assert_eq!(sink.0[0].2, vec![5; 16]);
    }

    #[test]
    fn test_exact_capacity() {
        let mut heaps = heaps();
        let mut queue = VramTransferQueue::new(2, HeapId::System, &mut heaps);
        let data: Arc<[u8]> = Arc::from(vec![0u8; 4]);
        queue.request(TransferDest::ObjChar(Screen::Main), 0, &data);
        queue.request(TransferDest::ObjChar(Screen::Main), 4, &data);
        assert_eq!(queue.len(), queue.capacity());
    }

    #[test]
    #[should_panic]
    fn test_overflow() {
        let mut heaps = heaps();
        let mut queue = VramTransferQueue::new(2, HeapId::System, &mut heaps);
        let data: Arc<[u8]> = Arc::from(vec![0u8; 4]);
        for i in 0..3 {
            queue.request(TransferDest::ObjChar(Screen::Main), i * 4, &data);
        }
    }

    #[test]
    #[should_panic]
    fn test_range_outside_source() {
        let mut heaps = heaps();
        let mut queue = VramTransferQueue::new(2, HeapId::System, &mut heaps);
        let data: Arc<[u8]> = Arc::from(vec![0u8; 4]);
        queue.request_range(TransferDest::ObjChar(Screen::Main), 0, &data, 2..6);
    }
}
