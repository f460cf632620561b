// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use std::ops::Range;

use common::{numutil::NumExt, HeapId};

use crate::{
    heap::{HeapBlock, ScratchHeap},
    queue::{TransferDest, VramTransferQueue},
    resource::{alloc_table, CharacterData, ImageProxy},
    Screen,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CellTransferHandle(usize);

#[derive(Debug, Clone)]
struct CellTransferState {
    data: CharacterData,
    location: [Option<u32>; 2],
    /// Bytes the image may use at `location`.
    room: [u32; 2],
    wanted: Option<Range<usize>>,
    shown: Option<Range<usize>>,
}

/// Streams animation frames of VRAM-transfer sprites into the range their
/// character task holds. Only frames that changed since the last update
/// are copied.
#[derive(Debug)]
pub struct CellTransferStates {
    states: Vec<Option<CellTransferState>>,
    table: HeapBlock,
}

impl CellTransferState {
    fn bind(&mut self, proxy: &ImageProxy) {
        self.location = Screen::BOTH.map(|s| proxy.location(s));
        self.room = Screen::BOTH.map(|s| proxy.size(s));
    }

    /// Smallest range the frame has to fit on every placed screen.
    fn min_room(&self) -> Option<u32> {
        Screen::BOTH
            .into_iter()
            .filter(|s| self.location[s.idx()].is_some())
            .map(|s| self.room[s.idx()])
            .min()
    }
}

impl CellTransferStates {
    pub fn new(capacity: usize, heap: HeapId, heaps: &mut impl ScratchHeap) -> Self {
        let table = alloc_table(
            heaps,
            heap,
            capacity * std::mem::size_of::<CellTransferState>(),
        );
        Self {
            states: vec![None; capacity],
            table,
        }
    }

    /// Start streaming `data` into the VRAM `proxy` points at.
    /// Returns `None` if every state is in use.
    pub fn register(&mut self, proxy: &ImageProxy, data: CharacterData) -> Option<CellTransferHandle> {
        assert!(
            data.is_vram_transfer(),
            "Cell transfer registered for character data that is copied once"
        );
        if !proxy.is_placed() {
            log::warn!("Cell transfer registered for an image without VRAM");
        }
        let Some(slot) = self.states.iter().position(Option::is_none) else {
            log::warn!("All {} cell transfer states in use", self.states.len());
            return None;
        };
        let mut state = CellTransferState {
            data,
            location: [None; 2],
            room: [0; 2],
            wanted: None,
            shown: None,
        };
        state.bind(proxy);
        self.states[slot] = Some(state);
        Some(CellTransferHandle(slot))
    }

    fn state(&mut self, handle: CellTransferHandle) -> &mut CellTransferState {
        match self.states.get_mut(handle.0).and_then(Option::as_mut) {
            Some(state) => state,
            None => panic!("Unknown cell transfer state {handle:?}"),
        }
    }

    /// Follow the image to a new range, e.g. after it was resized.
    /// The current frame is copied again on the next update. A frame that
    /// no longer fits the new range is dropped.
    pub fn rebind(&mut self, handle: CellTransferHandle, proxy: &ImageProxy) {
        let state = self.state(handle);
        state.bind(proxy);
        state.shown = None;
        let room = state.min_room().unwrap_or(0).us();
        if state.wanted.as_ref().is_some_and(|frame| frame.len() > room) {
            log::warn!("Cell frame no longer fits the 0x{room:X} byte range, dropping it");
            state.wanted = None;
        }
    }

    /// Show the bytes `frame` of the registered data from the next update on.
    /// The frame must fit the VRAM range of the image on every screen.
    pub fn request_frame(&mut self, handle: CellTransferHandle, frame: Range<usize>) {
        let state = self.state(handle);
        assert!(
            frame.start <= frame.end && frame.end <= state.data.raw().len(),
            "Cell frame {frame:?} outside of {} byte data",
            state.data.raw().len()
        );
        if let Some(room) = state.min_room() {
            assert!(
                frame.len() <= room.us(),
                "Cell frame {frame:?} does not fit the 0x{room:X} byte VRAM range"
            );
        }
        state.wanted = Some(frame);
    }

    /// Queue copies of every frame that changed since the last update.
    pub fn update(&mut self, queue: &mut VramTransferQueue) {
        for state in self.states.iter_mut().flatten() {
            let Some(frame) = &state.wanted else {
                continue;
            };
            if state.shown.as_ref() == Some(frame) {
                continue;
            }
            for screen in Screen::BOTH {
                if let Some(location) = state.location[screen.idx()] {
                    queue.request_range(
                        TransferDest::ObjChar(screen),
                        location,
                        state.data.raw(),
                        frame.clone(),
                    );
                }
            }
            state.shown = Some(frame.clone());
        }
    }

    pub fn unregister(&mut self, handle: CellTransferHandle) {
        if self.states.get_mut(handle.0).and_then(Option::take).is_none() {
            panic!("Cell transfer state {handle:?} unregistered twice");
        }
    }

    pub fn live_states(&self) -> usize {
        self.states.iter().flatten().count()
    }

    pub fn free(self, heaps: &mut impl ScratchHeap) {
        heaps.free(self.table);
    }
}
