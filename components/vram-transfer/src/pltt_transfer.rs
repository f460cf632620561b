// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Placement of sprite palettes.
//!
//! Each screen has 16 standard OBJ palettes of 32 bytes, tracked in a
//! [SlotMask], and optionally 16 extended palettes of 512 bytes when a bank
//! is mapped for them. Palettes can be placed by bumping a front offset
//! through either area, or first-fit in the free standard slots.

use common::{numutil::NumExt, HeapId};

use crate::{
    bitmap::{SlotMask, NUM_SLOTS},
    heap::{HeapBlock, ScratchHeap},
    hw::ObjVramHardware,
    queue::{TransferDest, VramTransferQueue},
    resource::{alloc_table, ImageProxy, PaletteData, PaletteFormat, PaletteProxy},
    Screen, TransferError, TransferResult, VramType,
};

/// Bytes of one standard 16-colour palette.
pub const PALETTE_SIZE: u32 = 32;
/// Bytes of one extended 256-colour palette.
pub const PALETTE_SIZE_EXT: u32 = 512;
/// Bytes of the whole standard palette area.
pub const PLTT_RANGE_SIZE: u32 = PALETTE_SIZE * NUM_SLOTS as u32;
/// Bytes of the whole extended palette area, when mapped.
pub const PLTT_EXT_RANGE_SIZE: u32 = PALETTE_SIZE_EXT * NUM_SLOTS as u32;

#[derive(Debug, Clone, PartialEq)]
pub struct PlttTransferTaskTemplate {
    pub data: PaletteData,
    pub vram_type: VramType,
    pub resource_id: u32,
    pub num_palettes: u32,
}

#[derive(Debug, Clone)]
struct PlttTransferTask {
    resource_id: u32,
    data: PaletteData,
    vram_type: VramType,
    num_palettes: u32,
    proxy: PaletteProxy,
    /// Whether the task's palettes are marked in the slot masks.
    holds_slots: bool,
}

impl PlttTransferTask {
    fn palette_size(&self) -> u32 {
        if self.data.is_extended() {
            PALETTE_SIZE_EXT
        } else {
            PALETTE_SIZE
        }
    }

    /// `None` if the palette count does not fit the address space.
    fn byte_size(&self) -> Option<u32> {
        self.num_palettes.checked_mul(self.palette_size())
    }

    fn dest(&self, screen: Screen) -> TransferDest {
        if self.data.is_extended() {
            TransferDest::ObjExtPltt(screen)
        } else {
            TransferDest::ObjPltt(screen)
        }
    }

    fn enqueue_copy(&self, queue: &mut VramTransferQueue) {
        let raw = self.data.raw().len();
        let len = self.byte_size().map_or(raw, |size| size.us().min(raw));
        for screen in self.vram_type.screens() {
            if let Some(location) = self.proxy.location(screen) {
                queue.request_range(self.dest(screen), location, self.data.raw(), 0..len);
            }
        }
    }
}

#[derive(Debug)]
struct PlttTransferManager {
    tasks: Vec<Option<PlttTransferTask>>,
    offset: [u32; 2],
    ext_offset: [u32; 2],
    ext_size: [u32; 2],
    slots: [SlotMask; 2],
    table: HeapBlock,
}

impl PlttTransferManager {
    fn slot_of(&self, resource_id: u32) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.as_ref().is_some_and(|t| t.resource_id == resource_id))
    }

    fn expect_task(&self, resource_id: u32) -> &PlttTransferTask {
        match self.slot_of(resource_id).and_then(|s| self.tasks[s].as_ref()) {
            Some(task) => task,
            None => panic!("Unknown palette resource {resource_id}"),
        }
    }

    fn free_slot(&self) -> TransferResult<usize> {
        match self.tasks.iter().position(Option::is_none) {
            Some(slot) => Ok(slot),
            None => {
                log::error!("All {} palette transfer tasks in use", self.tasks.len());
                Err(TransferError::NoFreeTask)
            }
        }
    }

    fn reserve_slots(&mut self, task: &PlttTransferTask) {
        for screen in task.vram_type.screens() {
            if let Some(location) = task.proxy.location(screen) {
                self.slots[screen.idx()]
                    .reserve((location / PALETTE_SIZE).us(), task.num_palettes.us());
            }
        }
    }

    fn clear_slots(&mut self, task: &PlttTransferTask) {
        if !task.holds_slots {
            return;
        }
        for screen in task.vram_type.screens() {
            if let Some(location) = task.proxy.location(screen) {
                self.slots[screen.idx()]
                    .clear((location / PALETTE_SIZE).us(), task.num_palettes.us());
            }
        }
    }

    fn reset_slot(&mut self, slot: usize) {
        if let Some(task) = self.tasks[slot].take() {
            log::trace!("Palette resource {} released", task.resource_id);
            self.clear_slots(&task);
        }
    }

    fn new_task(&self, template: PlttTransferTaskTemplate) -> TransferResult<(usize, PlttTransferTask)> {
        assert!(
            self.slot_of(template.resource_id).is_none(),
            "Palette resource {} requested twice",
            template.resource_id
        );
        let slot = self.free_slot()?;
        let proxy = PaletteProxy::new(template.data.format(), template.data.is_extended());
        Ok((
            slot,
            PlttTransferTask {
                resource_id: template.resource_id,
                data: template.data,
                vram_type: template.vram_type,
                num_palettes: template.num_palettes,
                proxy,
                holds_slots: false,
            },
        ))
    }
}

/// Allocator for sprite palettes on both screens.
#[derive(Debug, Default)]
pub struct PlttTransfer {
    manager: Option<PlttTransferManager>,
}

impl PlttTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.manager.is_some()
    }

    fn m(&self) -> &PlttTransferManager {
        match &self.manager {
            Some(m) => m,
            None => panic!("Palette transfer used before initialization"),
        }
    }

    fn m_mut(&mut self) -> &mut PlttTransferManager {
        match &mut self.manager {
            Some(m) => m,
            None => panic!("Palette transfer used before initialization"),
        }
    }

    /// Set up `capacity` tasks. Does nothing if already initialized.
    pub fn init(
        &mut self,
        capacity: usize,
        heap: HeapId,
        heaps: &mut impl ScratchHeap,
        hw: &impl ObjVramHardware,
    ) {
        if self.manager.is_some() {
            log::debug!("Palette transfer already initialized, ignoring");
            return;
        }
        let table = alloc_table(
            heaps,
            heap,
            capacity * std::mem::size_of::<PlttTransferTask>(),
        );
        self.manager = Some(PlttTransferManager {
            tasks: vec![None; capacity],
            offset: [0; 2],
            ext_offset: [0; 2],
            ext_size: [0; 2],
            slots: [SlotMask::default(); 2],
            table,
        });
        self.clear(hw);
    }

    /// Release all tasks. Does nothing if not initialized.
    pub fn free(&mut self, heaps: &mut impl ScratchHeap) {
        if self.manager.is_none() {
            return;
        }
        self.reset_all_tasks();
        if let Some(manager) = self.manager.take() {
            heaps.free(manager.table);
        }
    }

    /// Reset the front offsets and slot masks and re-read the extended
    /// palette capacity.
    pub fn clear(&mut self, hw: &impl ObjVramHardware) {
        let m = self.m_mut();
        m.offset = [0; 2];
        m.ext_offset = [0; 2];
        for screen in Screen::BOTH {
            let mapped = hw.obj_ext_palette_size(screen);
            m.ext_size[screen.idx()] = if mapped >= PLTT_EXT_RANGE_SIZE {
                PLTT_EXT_RANGE_SIZE
            } else {
                0
            };
            m.slots[screen.idx()].clear_all();
        }
    }

    /// Mark standard slots as used by something outside this allocator.
    pub fn mark_reserved_slots(&mut self, mask: u16, vram_type: VramType) {
        let m = self.m_mut();
        for screen in vram_type.screens() {
            m.slots[screen.idx()].mark(mask);
        }
    }

    /// Place the palettes at the front offset of the standard or, for
    /// extended data, the extended area.
    pub fn request_whole_range(
        &mut self,
        template: PlttTransferTaskTemplate,
        queue: &mut VramTransferQueue,
    ) -> TransferResult<()> {
        let m = self.m_mut();
        let (slot, mut task) = m.new_task(template)?;
        let extended = task.data.is_extended();
        // No palette area comes close to u32::MAX bytes
        let size = task.byte_size().unwrap_or(u32::MAX);

        for screen in task.vram_type.screens() {
            let (offset, limit) = if extended {
                (m.ext_offset[screen.idx()], m.ext_size[screen.idx()])
            } else {
                (m.offset[screen.idx()], PLTT_RANGE_SIZE)
            };
            if extended && limit == 0 {
                log::warn!("No extended OBJ palette mapped on {screen:?}");
                return Err(TransferError::ExtendedPaletteUnavailable { screen });
            }
            if offset.checked_add(size).map_or(true, |end| end > limit) {
                log::warn!(
                    "{screen:?} palette area full: 0x{size:X} bytes at 0x{offset:X}, limit 0x{limit:X}"
                );
                return Err(TransferError::OutOfVramSpace { screen });
            }
            task.proxy.set_location(screen, Some(offset));
        }

        for screen in task.vram_type.screens() {
            if extended {
                m.ext_offset[screen.idx()] += size;
            } else {
                m.offset[screen.idx()] += size;
            }
        }
        if !extended {
            m.reserve_slots(&task);
            task.holds_slots = true;
        }
        task.enqueue_copy(queue);
        log::trace!("Palette resource {} placed at front", task.resource_id);
        m.tasks[slot] = Some(task);
        Ok(())
    }

    /// Place the palettes first-fit in the free standard slots.
    pub fn request_free_space(
        &mut self,
        template: PlttTransferTaskTemplate,
        queue: &mut VramTransferQueue,
    ) -> TransferResult<()> {
        assert!(
            !template.data.is_extended(),
            "Extended palette {} can only be placed with request_whole_range",
            template.resource_id
        );
        let m = self.m_mut();
        let (slot, mut task) = m.new_task(template)?;

        for screen in task.vram_type.screens() {
            match m.slots[screen.idx()].find_first_free_run(task.num_palettes.us()) {
                Some(start) => task.proxy.set_location(screen, Some(start.u32() * PALETTE_SIZE)),
                None => {
                    log::warn!(
                        "No run of {} free palette slots on {screen:?} (mask 0x{:04X})",
                        task.num_palettes,
                        m.slots[screen.idx()].bits()
                    );
                    return Err(TransferError::OutOfSlots { screen });
                }
            }
        }

        m.reserve_slots(&task);
        task.holds_slots = true;
        task.enqueue_copy(queue);
        log::trace!("Palette resource {} placed in free slots", task.resource_id);
        m.tasks[slot] = Some(task);
        Ok(())
    }

    /// Queue new colours into the palettes the task already holds.
    pub fn replace_pltt_data(
        &mut self,
        resource_id: u32,
        data: PaletteData,
        queue: &mut VramTransferQueue,
    ) {
        let m = self.m_mut();
        let Some(task) = m.slot_of(resource_id).and_then(|s| m.tasks[s].as_mut()) else {
            panic!("Unknown palette resource {resource_id}");
        };
        assert_eq!(
            data.is_extended(),
            task.data.is_extended(),
            "Palette resource {resource_id} replaced with data for the other palette area"
        );
        task.data = data;
        task.enqueue_copy(queue);
    }

    pub fn has_task(&self, resource_id: u32) -> bool {
        self.m().slot_of(resource_id).is_some()
    }

    pub fn reset_task(&mut self, resource_id: u32) {
        let m = self.m_mut();
        match m.slot_of(resource_id) {
            Some(slot) => m.reset_slot(slot),
            None => panic!("Unknown palette resource {resource_id}"),
        }
    }

    pub fn reset_all_tasks(&mut self) {
        let m = self.m_mut();
        for slot in 0..m.tasks.len() {
            m.reset_slot(slot);
        }
    }

    pub fn palette_proxy(&self, resource_id: u32) -> &PaletteProxy {
        &self.m().expect_task(resource_id).proxy
    }

    /// Flag `image` to use extended palettes if this palette is one, and
    /// return the palette's proxy.
    pub fn toggle_ext_palette(&self, resource_id: u32, image: &mut ImageProxy) -> &PaletteProxy {
        let task = self.m().expect_task(resource_id);
        if task.data.is_extended() {
            image.set_ext_palette(true);
        }
        &task.proxy
    }

    /// Palette number the OBJ attributes need to reference the proxy.
    pub fn pltt_offset(proxy: &PaletteProxy, screen: Screen) -> u32 {
        let size = if proxy.is_extended() {
            PALETTE_SIZE_EXT
        } else if proxy.format() == PaletteFormat::Pltt256 {
            return 0;
        } else {
            PALETTE_SIZE
        };
        proxy.location(screen).map_or(0, |loc| loc / size)
    }

    pub fn slot_mask(&self, screen: Screen) -> SlotMask {
        self.m().slots[screen.idx()]
    }

    /// Bytes of extended palette area usable on the given screen.
    pub fn ext_capacity(&self, screen: Screen) -> u32 {
        self.m().ext_size[screen.idx()]
    }

    pub fn live_tasks(&self) -> usize {
        self.m().tasks.iter().filter(|t| t.is_some()).count()
    }
}
