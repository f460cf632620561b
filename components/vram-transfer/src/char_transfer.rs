// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Placement of sprite character data in OBJ VRAM.
//!
//! Every screen's OBJ VRAM is split in two regions:
//! ```text
//! 0                         tail_base                   vram_size
//! | front: bump allocated   | tail: block pool, bitmap  |
//! ```
//! Front allocations are only given back all at once by
//! [CharTransfer::clear_buffers]. Tail allocations can be freed one by one
//! and are placed first-fit.

use arrayvec::ArrayVec;
use common::{HeapId, TransferConfig};

use crate::{
    bitmap::BlockBitmap,
    blocks::BlockSize,
    heap::{HeapBlock, ScratchHeap},
    hw::{registers::ObjCharMode, ObjVramHardware},
    queue::{TransferDest, VramTransferQueue},
    resource::{alloc_table, CharacterData, ImageProxy},
    Screen, TransferError, TransferResult, VramType,
};

/// Sizing of a character allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CharTransferTemplate {
    pub max_tasks: usize,
    /// Bytes at the end of main OBJ VRAM managed by the tail pool.
    pub size_main: u32,
    /// Bytes at the end of sub OBJ VRAM managed by the tail pool.
    pub size_sub: u32,
    pub heap: HeapId,
}

impl CharTransferTemplate {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            max_tasks: config.char_tasks,
            size_main: config.char_tail_main,
            size_sub: config.char_tail_sub,
            heap: config.heap,
        }
    }
}

/// One placement request.
#[derive(Debug, Clone, PartialEq)]
pub struct CharTransferTaskTemplate {
    pub data: CharacterData,
    pub vram_type: VramType,
    pub resource_id: u32,
    /// Place in the tail pool instead of the front region.
    pub at_end: bool,
}

/// A raw range handed out by [CharTransfer::alloc_range].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CharTransferAllocation {
    pub vram_type: VramType,
    pub at_end: bool,
    /// Absolute VRAM byte offset per screen.
    pub offset: [u32; 2],
    /// Bytes per screen, rounded up to whole blocks.
    pub size: [u32; 2],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TaskState {
    #[default]
    Empty,
    Reserving,
    /// Registered, but holds no VRAM yet.
    WaitingForVram,
    /// Holds a range; the bytes are not queued yet.
    Placed,
    /// Holds a range and the copy into it is queued.
    Copied,
}

/// Refers to a task created by [CharTransfer::copy_task].
/// Goes stale once the copy is deleted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    slot: usize,
    generation: u32,
}

/// Occupancy summary of one screen.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArenaStats {
    pub vram_size: u32,
    pub tail_base: u32,
    pub front_offset: u32,
    pub tail_blocks: usize,
    pub reserved_blocks: usize,
    pub largest_free_run: usize,
}

#[derive(Debug, Clone)]
struct CharTransferTask {
    state: TaskState,
    generation: u32,
    resource_id: u32,
    copy: bool,
    data: Option<CharacterData>,
    vram_type: VramType,
    at_end: bool,
    use_hw_mapping: bool,
    has_range: bool,
    proxy: ImageProxy,
}

impl CharTransferTask {
    fn empty(generation: u32) -> Self {
        Self {
            state: TaskState::Empty,
            generation,
            resource_id: 0,
            copy: false,
            data: None,
            vram_type: VramType::empty(),
            at_end: false,
            use_hw_mapping: false,
            has_range: false,
            proxy: ImageProxy::default(),
        }
    }

    fn is_live(&self) -> bool {
        self.state != TaskState::Empty
    }

    fn holds_vram(&self) -> bool {
        matches!(self.state, TaskState::Placed | TaskState::Copied)
    }

    fn is_vram_transfer(&self) -> bool {
        self.data.as_ref().is_some_and(CharacterData::is_vram_transfer)
    }

    /// Queue the first `len` bytes of the data to every placed screen.
    fn enqueue_copy(&mut self, queue: &mut VramTransferQueue, len: usize) {
        let Some(data) = &self.data else {
            return;
        };
        let len = len.min(data.raw().len());
        for screen in self.vram_type.screens() {
            if let Some(location) = self.proxy.location(screen) {
                queue.request_range(TransferDest::ObjChar(screen), location, data.raw(), 0..len);
            }
        }
        self.state = TaskState::Copied;
    }

    /// Set the new tail ranges. Streamed data waits for the cell
    /// transfer layer, everything else is queued right away.
    fn adopt_tail(&mut self, ranges: &[Option<TailRange>; 2], len: usize, queue: &mut VramTransferQueue) {
        for screen in Screen::BOTH {
            self.proxy
                .set_range(screen, ranges[screen.idx()].map(|r| (r.addr, r.bytes)));
        }
        self.has_range = true;
        self.state = TaskState::Placed;
        if !self.is_vram_transfer() {
            self.enqueue_copy(queue, len);
        }
    }
}

/// A run of tail blocks found for a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct TailRange {
    start: usize,
    count: usize,
    /// Absolute VRAM offset.
    addr: u32,
    bytes: u32,
}

/// A front placement: where it starts and where the cursor goes after it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct FrontRange {
    start: u32,
    next: u32,
}

#[derive(Debug, Clone)]
struct Arena {
    vram_size: u32,
    tail_base: u32,
    front_offset: u32,
    block_size: BlockSize,
    /// Tail blocks the template asked for. The pool shrinks below this
    /// while the mapped VRAM is smaller.
    max_tail_blocks: usize,
    tail: BlockBitmap,
}

impl Arena {
    fn new(tail_bytes: u32, mode: ObjCharMode) -> Self {
        let block_size = BlockSize::from_mode(mode);
        let max_tail_blocks = block_size.bytes_to_blocks_floor(tail_bytes);
        Self {
            vram_size: 0,
            tail_base: 0,
            front_offset: 0,
            block_size,
            max_tail_blocks,
            tail: BlockBitmap::new(max_tail_blocks),
        }
    }

    fn tail_bytes(&self) -> u32 {
        self.block_size.blocks_to_bytes(self.tail.len())
    }

    /// Must only be called with an empty tail pool.
    fn update_capacity(&mut self, screen: Screen, vram_size: u32) {
        let blocks = self
            .max_tail_blocks
            .min(self.block_size.bytes_to_blocks_floor(vram_size));
        if blocks < self.max_tail_blocks {
            log::warn!(
                "Tail pool of {} blocks does not fit {screen:?} OBJ VRAM (0x{vram_size:X} bytes), using {blocks}",
                self.max_tail_blocks
            );
        }
        if blocks != self.tail.len() {
            self.tail = BlockBitmap::new(blocks);
        }
        self.vram_size = vram_size;
        self.tail_base = vram_size - self.tail_bytes();
    }

    /// Room for `size` bytes at the cursor, with the start aligned to `align`.
    fn find_front(&self, size: u32, align: BlockSize) -> Option<FrontRange> {
        let start = align.align_up(self.front_offset)?;
        let end = start.checked_add(size).filter(|end| *end <= self.tail_base)?;
        let next = align.align_up(end)?.min(self.tail_base);
        Some(FrontRange { start, next })
    }

    fn find_tail(&self, size: u32) -> Option<TailRange> {
        let bytes = self.block_size.align_up(size)?;
        let count = self.block_size.bytes_to_blocks_floor(bytes);
        let start = self.tail.find_first_free_run(count)?;
        Some(TailRange {
            start,
            count,
            addr: self.tail_base + self.block_size.blocks_to_bytes(start),
            bytes,
        })
    }

    fn clear_tail(&mut self, addr: u32, bytes: u32) {
        assert!(
            addr >= self.tail_base,
            "Clearing 0x{addr:X} which is below the tail pool at 0x{:X}",
            self.tail_base
        );
        let start = self.block_size.bytes_to_blocks_floor(addr - self.tail_base);
        let count = self.block_size.bytes_to_blocks_floor(bytes);
        self.tail.clear(start, count);
    }

    fn stats(&self) -> ArenaStats {
        ArenaStats {
            vram_size: self.vram_size,
            tail_base: self.tail_base,
            front_offset: self.front_offset,
            tail_blocks: self.tail.len(),
            reserved_blocks: self.tail.count_reserved(),
            largest_free_run: self.tail.largest_free_run(),
        }
    }
}

/// Live state of an initialized [CharTransfer].
/// Can be detached and reinstalled with [CharTransfer::pop_manager] and
/// [CharTransfer::push_manager].
#[derive(Debug)]
pub struct CharTransferManager {
    tasks: Vec<CharTransferTask>,
    arenas: [Arena; 2],
    tables: ArrayVec<HeapBlock, 3>,
}

impl CharTransferManager {
    fn slot_of(&self, resource_id: u32) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.is_live() && !t.copy && t.resource_id == resource_id)
    }

    fn expect_slot(&self, resource_id: u32) -> usize {
        match self.slot_of(resource_id) {
            Some(slot) => slot,
            None => panic!("Unknown character resource {resource_id}"),
        }
    }

    fn free_slot(&self) -> TransferResult<usize> {
        match self.tasks.iter().position(|t| !t.is_live()) {
            Some(slot) => Ok(slot),
            None => {
                log::error!("All {} character transfer tasks in use", self.tasks.len());
                Err(TransferError::NoFreeTask)
            }
        }
    }

    fn copy_slot(&self, handle: TaskHandle) -> usize {
        let task = self.tasks.get(handle.slot);
        match task {
            Some(t) if t.is_live() && t.copy && t.generation == handle.generation => handle.slot,
            _ => panic!("Stale or unknown character task copy {handle:?}"),
        }
    }

    /// Front ranges for every screen of `vram_type`, without moving the
    /// cursors. Either every screen has room or nothing is returned.
    fn front_ranges(
        &self,
        vram_type: VramType,
        size: u32,
        align: [BlockSize; 2],
    ) -> TransferResult<[Option<FrontRange>; 2]> {
        let mut out = [None; 2];
        for screen in vram_type.screens() {
            let arena = &self.arenas[screen.idx()];
            match arena.find_front(size, align[screen.idx()]) {
                Some(range) => out[screen.idx()] = Some(range),
                None => {
                    log::warn!(
                        "{screen:?} front region full: 0x{size:X} bytes at 0x{:X}, limit 0x{:X}",
                        arena.front_offset,
                        arena.tail_base
                    );
                    return Err(TransferError::OutOfVramSpace { screen });
                }
            }
        }
        Ok(out)
    }

    fn commit_front(&mut self, ranges: &[Option<FrontRange>; 2]) {
        for screen in Screen::BOTH {
            if let Some(range) = ranges[screen.idx()] {
                self.arenas[screen.idx()].front_offset = range.next;
            }
        }
    }

    fn block_sizes(&self) -> [BlockSize; 2] {
        Screen::BOTH.map(|screen| self.arenas[screen.idx()].block_size)
    }

    /// Tail ranges of `size[screen]` bytes for every screen of `vram_type`,
    /// without reserving. Either every screen has room or nothing is
    /// returned.
    fn tail_ranges(&self, vram_type: VramType, size: [u32; 2]) -> TransferResult<[Option<TailRange>; 2]> {
        let mut out = [None; 2];
        for screen in vram_type.screens() {
            let arena = &self.arenas[screen.idx()];
            let size = size[screen.idx()];
            match arena.find_tail(size) {
                Some(range) => out[screen.idx()] = Some(range),
                None => {
                    log::warn!(
                        "{screen:?} tail pool has no run for 0x{size:X} bytes (largest free run {} blocks)",
                        arena.tail.largest_free_run()
                    );
                    return Err(TransferError::OutOfVramSpace { screen });
                }
            }
        }
        Ok(out)
    }

    fn commit_tail(&mut self, ranges: &[Option<TailRange>; 2]) {
        for screen in Screen::BOTH {
            if let Some(range) = ranges[screen.idx()] {
                log::trace!(
                    "{screen:?} tail blocks {}..{} reserved",
                    range.start,
                    range.start + range.count
                );
                self.arenas[screen.idx()].tail.reserve(range.start, range.count);
            }
        }
    }

    fn clear_task_range(&mut self, slot: usize) {
        let task = &mut self.tasks[slot];
        if !task.has_range {
            return;
        }
        for screen in task.vram_type.screens() {
            if let Some(addr) = task.proxy.location(screen) {
                log::trace!("{screen:?} tail range at 0x{addr:X} freed");
                self.arenas[screen.idx()].clear_tail(addr, task.proxy.size(screen));
            }
        }
        task.has_range = false;
    }

    fn reset_slot(&mut self, slot: usize) {
        self.clear_task_range(slot);
        let generation = self.tasks[slot].generation.wrapping_add(1);
        self.tasks[slot] = CharTransferTask::empty(generation);
    }
}

/// Allocator for sprite character data on both screens.
/// Must be initialized before use; using it uninitialized panics.
#[derive(Debug, Default)]
pub struct CharTransfer {
    manager: Option<CharTransferManager>,
}

impl CharTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.manager.is_some()
    }

    fn m(&self) -> &CharTransferManager {
        match &self.manager {
            Some(m) => m,
            None => panic!("Character transfer used before initialization"),
        }
    }

    fn m_mut(&mut self) -> &mut CharTransferManager {
        match &mut self.manager {
            Some(m) => m,
            None => panic!("Character transfer used before initialization"),
        }
    }

    /// Number of 32-byte units per tail block in the given mode.
    pub fn block_size(mode: ObjCharMode) -> u32 {
        mode.block_units()
    }

    /// Initialize with the mapping modes currently set in hardware.
    pub fn init(
        &mut self,
        template: &CharTransferTemplate,
        hw: &mut impl ObjVramHardware,
        heaps: &mut impl ScratchHeap,
    ) {
        let modes = [
            hw.obj_char_mode(Screen::Main),
            hw.obj_char_mode(Screen::Sub),
        ];
        self.init_with_modes(template, modes, hw, heaps);
    }

    /// Initialize with the given mapping modes and write them to hardware.
    /// Does nothing if already initialized.
    pub fn init_with_modes(
        &mut self,
        template: &CharTransferTemplate,
        modes: [ObjCharMode; 2],
        hw: &mut impl ObjVramHardware,
        heaps: &mut impl ScratchHeap,
    ) {
        if self.manager.is_some() {
            log::debug!("Character transfer already initialized, ignoring");
            return;
        }

        for screen in Screen::BOTH {
            hw.set_obj_char_mode(screen, modes[screen.idx()]);
        }
        let arenas = [
            Arena::new(template.size_main, modes[0]),
            Arena::new(template.size_sub, modes[1]),
        ];

        let mut tables = ArrayVec::new();
        tables.push(alloc_table(
            heaps,
            template.heap,
            template.max_tasks * std::mem::size_of::<CharTransferTask>(),
        ));
        for arena in arenas.iter().filter(|a| !a.tail.is_empty()) {
            tables.push(alloc_table(heaps, template.heap, arena.tail.as_bytes().len()));
        }

        log::debug!(
            "Character transfer initialized: {} tasks, tail blocks {}/{}",
            template.max_tasks,
            arenas[0].tail.len(),
            arenas[1].tail.len()
        );
        self.manager = Some(CharTransferManager {
            tasks: (0..template.max_tasks)
                .map(|_| CharTransferTask::empty(0))
                .collect(),
            arenas,
            tables,
        });
        self.clear_buffers(hw);
    }

    /// Release all tasks and give the tables back to the heap.
    pub fn free(&mut self, heaps: &mut impl ScratchHeap) {
        self.reset_all_tasks();
        let Some(manager) = self.manager.take() else {
            unreachable!("reset_all_tasks checks initialization");
        };
        for table in manager.tables {
            heaps.free(table);
        }
    }

    /// Reset both front cursors and tail pools and re-read VRAM sizes.
    /// Task metadata is left alone: callers wanting a clean slate call
    /// [Self::reset_all_tasks] first.
    pub fn clear_buffers(&mut self, hw: &impl ObjVramHardware) {
        let m = self.m_mut();
        for screen in Screen::BOTH {
            let arena = &mut m.arenas[screen.idx()];
            arena.front_offset = 0;
            arena.tail.clear_all();
            arena.update_capacity(screen, hw.obj_vram_size(screen));
        }
        let live = m.tasks.iter().filter(|t| t.holds_vram()).count();
        if live != 0 {
            log::warn!("Character buffers cleared while {live} tasks still hold VRAM");
        }
    }

    /// Mark an absolute VRAM range as used in the tail pool. Every block
    /// the range touches is reserved; parts outside of the pool are ignored.
    pub fn reserve_vram_range(&mut self, offset: u32, size: u32, screen: Screen) {
        let arena = &mut self.m_mut().arenas[screen.idx()];
        let (offset, size) = match offset.checked_sub(arena.tail_base) {
            Some(offset) => (offset, size),
            None => (0, size.saturating_sub(arena.tail_base - offset)),
        };
        if size == 0 {
            return;
        }
        let start = arena.block_size.bytes_to_blocks_floor(offset);
        let end = arena
            .block_size
            .bytes_to_blocks_ceil(offset.saturating_add(size))
            .min(arena.tail.len());
        if start < end {
            arena.tail.reserve(start, end - start);
        }
    }

    pub fn request(
        &mut self,
        template: CharTransferTaskTemplate,
        queue: &mut VramTransferQueue,
    ) -> TransferResult<()> {
        self.submit(template, None, queue)
    }

    /// Like [Self::request], but the image is mapped with the modes the
    /// hardware uses right now instead of the ones stored in the data.
    pub fn request_with_hardware_mapping_type(
        &mut self,
        template: CharTransferTaskTemplate,
        hw: &impl ObjVramHardware,
        queue: &mut VramTransferQueue,
    ) -> TransferResult<()> {
        let live = [
            hw.obj_char_mode(Screen::Main),
            hw.obj_char_mode(Screen::Sub),
        ];
        self.submit(template, Some(live), queue)
    }

    fn submit(
        &mut self,
        template: CharTransferTaskTemplate,
        live_modes: Option<[ObjCharMode; 2]>,
        queue: &mut VramTransferQueue,
    ) -> TransferResult<()> {
        let m = self.m_mut();
        let CharTransferTaskTemplate {
            data,
            vram_type,
            resource_id,
            at_end,
        } = template;
        assert!(
            m.slot_of(resource_id).is_none(),
            "Character resource {resource_id} requested twice"
        );
        let slot = m.free_slot()?;

        let modes = live_modes.unwrap_or([data.mapping(); 2]);
        let mut task = CharTransferTask {
            state: TaskState::Reserving,
            resource_id,
            vram_type,
            at_end,
            use_hw_mapping: live_modes.is_some(),
            ..CharTransferTask::empty(m.tasks[slot].generation)
        };
        for screen in Screen::BOTH {
            task.proxy.set_mapping(screen, modes[screen.idx()]);
        }
        task.proxy.set_vram_transfer(data.is_vram_transfer());

        let size = data.len();
        let vram_transfer = data.is_vram_transfer();
        task.data = Some(data);

        if vram_transfer {
            log::trace!("Character resource {resource_id} waiting for VRAM");
            task.state = TaskState::WaitingForVram;
        } else if !at_end {
            let align = if task.use_hw_mapping {
                modes.map(BlockSize::from_mode)
            } else {
                m.block_sizes()
            };
            let ranges = m.front_ranges(vram_type, size, align)?;
            m.commit_front(&ranges);
            for screen in vram_type.screens() {
                if let Some(range) = ranges[screen.idx()] {
                    task.proxy
                        .set_range(screen, Some((range.start, range.next - range.start)));
                    log::trace!(
                        "Character resource {resource_id} placed at {screen:?} front 0x{:X}",
                        range.start
                    );
                }
            }
            task.state = TaskState::Placed;
            task.enqueue_copy(queue, size as usize);
        } else {
            let ranges = m.tail_ranges(vram_type, [size; 2])?;
            m.commit_tail(&ranges);
            task.adopt_tail(&ranges, size as usize, queue);
        }

        m.tasks[slot] = task;
        Ok(())
    }

    pub fn has_task(&self, resource_id: u32) -> bool {
        self.m().slot_of(resource_id).is_some()
    }

    /// State of the task for `resource_id`, [TaskState::Empty] if there is none.
    pub fn task_state(&self, resource_id: u32) -> TaskState {
        let m = self.m();
        m.slot_of(resource_id)
            .map_or(TaskState::Empty, |slot| m.tasks[slot].state)
    }

    /// Queue new bytes into the range the task already holds.
    pub fn replace_char_data(
        &mut self,
        resource_id: u32,
        data: CharacterData,
        queue: &mut VramTransferQueue,
    ) {
        let m = self.m_mut();
        let slot = m.expect_slot(resource_id);
        let task = &mut m.tasks[slot];
        assert!(
            task.holds_vram(),
            "Character resource {resource_id} replaced while in state {:?}",
            task.state
        );
        for screen in task.vram_type.screens() {
            let footprint = task.proxy.size(screen);
            assert!(
                data.len() <= footprint,
                "0x{:X} bytes do not fit the 0x{footprint:X} byte range of resource {resource_id}",
                data.len()
            );
        }
        let len = data.raw().len();
        task.data = Some(data);
        task.enqueue_copy(queue, len);
    }

    /// Delete the task and every copy made from it.
    pub fn reset_task(&mut self, resource_id: u32) {
        let m = self.m_mut();
        let slot = m.expect_slot(resource_id);
        let copies: Vec<usize> = (0..m.tasks.len())
            .filter(|i| {
                let t = &m.tasks[*i];
                t.is_live() && t.copy && t.resource_id == resource_id
            })
            .collect();
        for copy in copies {
            m.reset_slot(copy);
        }
        m.reset_slot(slot);
    }

    pub fn reset_all_tasks(&mut self) {
        let m = self.m_mut();
        for slot in 0..m.tasks.len() {
            if m.tasks[slot].is_live() {
                m.reset_slot(slot);
            }
        }
    }

    /// Free the task's tail range, if any, and forget the task.
    /// Copies made from it stay alive.
    pub fn delete_task(&mut self, resource_id: u32) {
        let m = self.m_mut();
        let slot = m.expect_slot(resource_id);
        m.reset_slot(slot);
    }

    /// Give up the task's VRAM but keep it registered, waiting for a new
    /// range from [Self::resize_range].
    pub fn release_range(&mut self, resource_id: u32) {
        let m = self.m_mut();
        let slot = m.expect_slot(resource_id);
        m.clear_task_range(slot);
        let task = &mut m.tasks[slot];
        for screen in Screen::BOTH {
            task.proxy.set_range(screen, None);
        }
        task.state = TaskState::WaitingForVram;
    }

    /// The task's image proxy, or `None` while it holds no VRAM.
    pub fn image_proxy(&self, resource_id: u32) -> Option<&ImageProxy> {
        let m = self.m();
        let task = &m.tasks[m.expect_slot(resource_id)];
        task.holds_vram().then_some(&task.proxy)
    }

    /// Free the task's tail range, if any, and search a new one of `size`
    /// bytes. On failure the task stays registered without VRAM.
    pub fn resize_range(
        &mut self,
        resource_id: u32,
        size: u32,
        queue: &mut VramTransferQueue,
    ) -> TransferResult<&ImageProxy> {
        self.release_range(resource_id);
        let m = self.m_mut();
        let slot = m.expect_slot(resource_id);
        let ranges = m.tail_ranges(m.tasks[slot].vram_type, [size; 2])?;
        m.commit_tail(&ranges);
        let task = &mut m.tasks[slot];
        task.adopt_tail(&ranges, size as usize, queue);
        Ok(&task.proxy)
    }

    /// Place a second instance of the task's data in its own tail range,
    /// with its own lifetime.
    pub fn copy_task(
        &mut self,
        resource_id: u32,
        queue: &mut VramTransferQueue,
    ) -> TransferResult<TaskHandle> {
        let m = self.m_mut();
        let src_slot = m.expect_slot(resource_id);
        let src = &m.tasks[src_slot];
        if !src.holds_vram() {
            return Err(TransferError::TaskNotPlaced { resource_id });
        }
        let size = Screen::BOTH.map(|screen| src.proxy.size(screen));

        let slot = m.free_slot()?;
        let ranges = m.tail_ranges(m.tasks[src_slot].vram_type, size)?;
        m.commit_tail(&ranges);

        let generation = m.tasks[slot].generation;
        let mut task = CharTransferTask {
            copy: true,
            generation,
            ..m.tasks[src_slot].clone()
        };
        let len = task.data.as_ref().map_or(0, |d| d.raw().len());
        task.adopt_tail(&ranges, len, queue);
        m.tasks[slot] = task;
        Ok(TaskHandle { slot, generation })
    }

    pub fn copy_proxy(&self, handle: TaskHandle) -> &ImageProxy {
        let m = self.m();
        &m.tasks[m.copy_slot(handle)].proxy
    }

    pub fn delete_copy(&mut self, handle: TaskHandle) {
        let m = self.m_mut();
        let slot = m.copy_slot(handle);
        m.reset_slot(slot);
    }

    /// Reserve a raw range not tied to a task or a copy.
    pub fn alloc_range(
        &mut self,
        size: u32,
        at_end: bool,
        vram_type: VramType,
    ) -> TransferResult<CharTransferAllocation> {
        let m = self.m_mut();
        let mut allocation = CharTransferAllocation {
            vram_type,
            at_end,
            offset: [0; 2],
            size: [0; 2],
        };
        if at_end {
            let ranges = m.tail_ranges(vram_type, [size; 2])?;
            m.commit_tail(&ranges);
            for (i, range) in ranges.iter().enumerate() {
                if let Some(range) = range {
                    allocation.offset[i] = range.addr;
                    allocation.size[i] = range.bytes;
                }
            }
        } else {
            let ranges = m.front_ranges(vram_type, size, m.block_sizes())?;
            m.commit_front(&ranges);
            for (i, range) in ranges.iter().enumerate() {
                if let Some(range) = range {
                    allocation.offset[i] = range.start;
                    allocation.size[i] = range.next - range.start;
                }
            }
        }
        Ok(allocation)
    }

    /// Give back a range from [Self::alloc_range]. Front ranges are only
    /// reclaimed by [Self::clear_buffers].
    pub fn clear_range(&mut self, allocation: &CharTransferAllocation) {
        if !allocation.at_end {
            return;
        }
        let m = self.m_mut();
        for screen in allocation.vram_type.screens() {
            m.arenas[screen.idx()].clear_tail(allocation.offset[screen.idx()], allocation.size[screen.idx()]);
        }
    }

    /// Detach the live state, leaving this allocator uninitialized.
    pub fn pop_manager(&mut self) -> CharTransferManager {
        match self.manager.take() {
            Some(m) => m,
            None => panic!("No character transfer manager to pop"),
        }
    }

    pub fn push_manager(&mut self, manager: CharTransferManager) {
        assert!(
            self.manager.is_none(),
            "Character transfer manager pushed while another is installed"
        );
        self.manager = Some(manager);
    }

    pub fn stats(&self, screen: Screen) -> ArenaStats {
        self.m().arenas[screen.idx()].stats()
    }

    pub fn tail_bitmap(&self, screen: Screen) -> &BlockBitmap {
        &self.m().arenas[screen.idx()].tail
    }

    /// Number of tasks in use, copies included.
    pub fn live_tasks(&self) -> usize {
        self.m().tasks.iter().filter(|t| t.is_live()).count()
    }

    pub fn capacity(&self) -> usize {
        self.m().tasks.len()
    }
}
