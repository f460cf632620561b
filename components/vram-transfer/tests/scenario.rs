// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use common::HeapId;
use vram_transfer::{
    char_transfer::TaskState,
    heap::HeapRegions,
    hw::{
        registers::ObjCharMode,
        vram::{VramCtrl, E, F, I},
        FixedObjHardware, Gpu2d, ObjVramHardware,
    },
    pltt_transfer::PLTT_EXT_RANGE_SIZE,
    queue::{TransferDest, VramSink},
    resource::{CharacterData, PaletteData, PaletteFormat},
    CellTransferStates, CharTransfer, CharTransferTaskTemplate, CharTransferTemplate,
    PlttTransfer, PlttTransferTaskTemplate, Screen, TransferError, VramTransferQueue, VramType,
};

#[derive(Default)]
struct RecordingSink(Vec<(TransferDest, u32, Vec<u8>)>);

impl VramSink for RecordingSink {
    fn write(&mut self, dest: TransferDest, offset: u32, data: &[u8]) {
        self.0.push((dest, offset, data.to_vec()));
    }
}

fn heaps() -> HeapRegions {
    HeapRegions::new().with_region(HeapId::Field, 0x10_0000)
}

fn char_task(id: u32, size: usize) -> CharTransferTaskTemplate {
    CharTransferTaskTemplate {
        data: CharacterData::new(vec![id as u8; size], ObjCharMode::OneDim32K),
        vram_type: VramType::MAIN,
        resource_id: id,
        at_end: true,
    }
}

#[test]
fn fragmented_tail_pool() {
    let mut hw = FixedObjHardware::uniform(ObjCharMode::OneDim32K, 4096);
    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(16, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 8,
        size_main: 4096,
        size_sub: 0,
        heap: HeapId::Field,
    };
    chars.init(&template, &mut hw, &mut heaps);
    assert_eq!(chars.tail_bitmap(Screen::Main).len(), 128);

    chars.request(char_task(1, 1024), &mut queue).unwrap();
    assert_eq!(chars.image_proxy(1).unwrap().location(Screen::Main), Some(0));
    chars.request(char_task(2, 512), &mut queue).unwrap();
    assert_eq!(chars.image_proxy(2).unwrap().location(Screen::Main), Some(32 * 32));

    chars.delete_task(1);
    let bitmap = chars.tail_bitmap(Screen::Main);
    assert!(bitmap.is_free(0, 32));
    assert!((32..48).all(|b| bitmap.is_set(b)));

    // 64 blocks do not fit in front of B, so they go right behind it
    chars.request(char_task(3, 2048), &mut queue).unwrap();
    assert_eq!(chars.image_proxy(3).unwrap().location(Screen::Main), Some(48 * 32));
    assert_eq!(chars.tail_bitmap(Screen::Main).largest_free_run(), 32);

    let before = chars.tail_bitmap(Screen::Main).clone();
    assert_eq!(
        chars.request(char_task(4, 96 * 32), &mut queue),
        Err(TransferError::OutOfVramSpace {
            screen: Screen::Main
        })
    );
    assert_eq!(chars.tail_bitmap(Screen::Main), &before);
    assert!(!chars.has_task(4));
}

#[test]
fn delete_then_request_reuses_range() {
    let mut hw = FixedObjHardware::uniform(ObjCharMode::OneDim64K, 0x8000);
    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(16, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 4,
        size_main: 0x800,
        size_sub: 0x800,
        heap: HeapId::Field,
    };
    chars.init(&template, &mut hw, &mut heaps);

    chars.request(char_task(1, 0x200), &mut queue).unwrap();
    let first = chars.image_proxy(1).unwrap().location(Screen::Main);
    chars.delete_task(1);
    chars.request(char_task(2, 0x200), &mut queue).unwrap();
    assert_eq!(chars.image_proxy(2).unwrap().location(Screen::Main), first);

    // The later copy into the reused range wins
    let mut sink = RecordingSink::default();
    queue.process(&mut sink);
    assert_eq!(sink.0.len(), 2);
    assert_eq!(sink.0[0].1, sink.0[1].1);
    assert_eq!(sink.0.last().map(|(_, _, d)| d[0]), Some(2));
}

#[test]
fn front_cursor_survives_mode_change() {
    let mut hw = FixedObjHardware::uniform(ObjCharMode::OneDim32K, 0x8000);
    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(16, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 8,
        size_main: 0x1000,
        size_sub: 0x1000,
        heap: HeapId::Field,
    };
    chars.init(&template, &mut hw, &mut heaps);

    let front = |id, size| CharTransferTaskTemplate {
        at_end: false,
        ..char_task(id, size)
    };
    chars.request(front(1, 0x20), &mut queue).unwrap();
    hw.set_obj_char_mode(Screen::Main, ObjCharMode::OneDim256K);
    chars
        .request_with_hardware_mapping_type(front(2, 0x20), &hw, &mut queue)
        .unwrap();
    hw.set_obj_char_mode(Screen::Main, ObjCharMode::OneDim64K);
    chars
        .request_with_hardware_mapping_type(front(3, 0x20), &hw, &mut queue)
        .unwrap();
    chars.request(front(4, 0x20), &mut queue).unwrap();

    let locations: Vec<u32> = (1..=4)
        .filter_map(|id| chars.image_proxy(id).unwrap().location(Screen::Main))
        .collect();
    // Hardware mapped images start on a boundary of the live mode
    assert_eq!(locations, [0, 0x100, 0x200, 0x240]);
    assert!(locations.windows(2).all(|w| w[0] + 0x20 <= w[1]));
    assert_eq!(chars.stats(Screen::Main).front_offset, 0x260);
    // Earlier placements keep the mode they were made with
    assert_eq!(chars.image_proxy(1).unwrap().mapping(Screen::Main), ObjCharMode::OneDim32K);
    assert_eq!(chars.image_proxy(2).unwrap().mapping(Screen::Main), ObjCharMode::OneDim256K);
    assert_eq!(chars.image_proxy(1).unwrap().tile_number(Screen::Main), Some(0));
    assert_eq!(chars.image_proxy(2).unwrap().tile_number(Screen::Main), Some(1));
    assert_eq!(chars.image_proxy(3).unwrap().tile_number(Screen::Main), Some(8));
}

#[test]
fn streamed_sprite_through_gpu() {
    let mut gpu = Gpu2d::default();
    gpu.vram.update_ctrl(E, VramCtrl::mapped(2, 0).into());
    gpu.vram.update_ctrl(I, VramCtrl::mapped(2, 0).into());
    gpu.vram.update_ctrl(F, VramCtrl::mapped(5, 0).into());
    assert_eq!(gpu.obj_vram_size(Screen::Main), 0x1_0000);
    assert_eq!(gpu.obj_vram_size(Screen::Sub), 0x4000);

    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(32, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 8,
        size_main: 0x4000,
        size_sub: 0x2000,
        heap: HeapId::Field,
    };
    chars.init_with_modes(&template, [ObjCharMode::OneDim128K; 2], &mut gpu, &mut heaps);
    assert_eq!(gpu.obj_char_mode(Screen::Sub), ObjCharMode::OneDim128K);
    let mut pltt = PlttTransfer::new();
    pltt.init(8, HeapId::Field, &mut heaps, &gpu);
    assert_eq!(pltt.ext_capacity(Screen::Main), PLTT_EXT_RANGE_SIZE);
    let mut cells = CellTransferStates::new(4, HeapId::Field, &mut heaps);

    // A walking sprite with four frames of 0x200 bytes
    let frames: Vec<u8> = (0..4u8).flat_map(|f| [f + 1; 0x200]).collect();
    let data = CharacterData::for_vram_transfer(frames, ObjCharMode::OneDim128K);
    chars
        .request(
            CharTransferTaskTemplate {
                data: data.clone(),
                vram_type: VramType::BOTH,
                resource_id: 10,
                at_end: true,
            },
            &mut queue,
        )
        .unwrap();
    assert_eq!(chars.task_state(10), TaskState::WaitingForVram);
    let proxy = chars.resize_range(10, 0x200, &mut queue).unwrap().clone();
    assert_eq!(proxy.location(Screen::Main), Some(0xC000));
    assert_eq!(proxy.location(Screen::Sub), Some(0x2000));
    let cell = cells.register(&proxy, data).unwrap();

    pltt.request_whole_range(
        PlttTransferTaskTemplate {
            data: PaletteData::extended(vec![0x7F; 0x200], PaletteFormat::Pltt256),
            vram_type: VramType::MAIN,
            resource_id: 10,
            num_palettes: 1,
        },
        &mut queue,
    )
    .unwrap();
    let mut image = proxy.clone();
    pltt.toggle_ext_palette(10, &mut image);
    assert!(image.uses_ext_palette());

    cells.request_frame(cell, 0x400..0x600);
    cells.update(&mut queue);
    queue.process(&mut gpu);
    assert_eq!(gpu.vram.read_obj(Screen::Main, 0xC000, 0x200), vec![3; 0x200]);
    assert_eq!(gpu.vram.read_obj(Screen::Sub, 0x2000, 0x200), vec![3; 0x200]);
    assert_eq!(
        gpu.vram.read_ext_palette(Screen::Main, 0, 0x200),
        Some(&[0x7F; 0x200][..])
    );

    cells.request_frame(cell, 0x600..0x800);
    cells.update(&mut queue);
    queue.process(&mut gpu);
    assert_eq!(gpu.vram.read_obj(Screen::Main, 0xC000, 4), vec![4; 4]);

    cells.unregister(cell);
    cells.free(&mut heaps);
    chars.free(&mut heaps);
    pltt.free(&mut heaps);
    queue.free(&mut heaps);
    assert_eq!(heaps.live_blocks(), 0);
    assert_eq!(heaps.used(HeapId::Field), 0);
}

#[test]
fn both_screens_fail_together() {
    let mut hw = FixedObjHardware::uniform(ObjCharMode::OneDim32K, 0x2000);
    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(16, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 8,
        size_main: 0x400,
        size_sub: 0x400,
        heap: HeapId::Field,
    };
    chars.init(&template, &mut hw, &mut heaps);

    let sub_filler = CharTransferTaskTemplate {
        vram_type: VramType::SUB,
        ..char_task(1, 0x300)
    };
    chars.request(sub_filler, &mut queue).unwrap();
    let main_before = chars.tail_bitmap(Screen::Main).clone();

    let both = CharTransferTaskTemplate {
        vram_type: VramType::BOTH,
        ..char_task(2, 0x200)
    };
    assert_eq!(
        chars.request(both, &mut queue),
        Err(TransferError::OutOfVramSpace { screen: Screen::Sub })
    );
    assert_eq!(chars.tail_bitmap(Screen::Main), &main_before);
    assert_eq!(queue.len(), 1);
}

#[test]
fn reserved_partial_blocks_stay_out_of_reach() {
    let mut hw = FixedObjHardware::uniform(ObjCharMode::OneDim32K, 0x4000);
    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(16, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 8,
        size_main: 0x1000,
        size_sub: 0,
        heap: HeapId::Field,
    };
    chars.init(&template, &mut hw, &mut heaps);

    chars.reserve_vram_range(0x3000, 0x10, Screen::Main);
    chars.reserve_vram_range(0x3050, 0x20, Screen::Main);
    for id in 1..=3 {
        chars.request(char_task(id, 0x20), &mut queue).unwrap();
    }
    let placed: Vec<u32> = (1..=3)
        .filter_map(|id| chars.image_proxy(id).unwrap().location(Screen::Main))
        .collect();
    assert_eq!(placed, [0x3020, 0x3080, 0x30A0]);
    assert!(placed
        .iter()
        .all(|p| !(0x3000..0x3010).contains(p) && !(0x3040..0x3080).contains(p)));
}

#[test]
#[should_panic]
fn shrunk_stream_rejects_large_frames() {
    let mut hw = FixedObjHardware::uniform(ObjCharMode::OneDim32K, 0x4000);
    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(16, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 8,
        size_main: 0x1000,
        size_sub: 0,
        heap: HeapId::Field,
    };
    chars.init(&template, &mut hw, &mut heaps);
    let mut cells = CellTransferStates::new(2, HeapId::Field, &mut heaps);

    let data = CharacterData::for_vram_transfer(vec![5; 0x400], ObjCharMode::OneDim32K);
    chars
        .request(
            CharTransferTaskTemplate {
                data: data.clone(),
                vram_type: VramType::MAIN,
                resource_id: 1,
                at_end: true,
            },
            &mut queue,
        )
        .unwrap();
    let proxy = chars.resize_range(1, 0x40, &mut queue).unwrap().clone();
    assert_eq!(proxy.size(Screen::Main), 0x40);
    chars.request(char_task(2, 0x40), &mut queue).unwrap();
    assert_eq!(chars.image_proxy(2).unwrap().location(Screen::Main), Some(0x3040));

    let cell = cells.register(&proxy, data).unwrap();
    cells.request_frame(cell, 0..0x200);
}

#[test]
fn oversized_requests_fail_cleanly() {
    let mut hw = FixedObjHardware::uniform(ObjCharMode::OneDim64K, 0x4000);
    let mut heaps = heaps();
    let mut queue = VramTransferQueue::new(16, HeapId::Field, &mut heaps);
    let mut chars = CharTransfer::new();
    let template = CharTransferTemplate {
        max_tasks: 8,
        size_main: 0x1000,
        size_sub: 0x1000,
        heap: HeapId::Field,
    };
    chars.init(&template, &mut hw, &mut heaps);
    let mut pltt = PlttTransfer::new();
    pltt.init(4, HeapId::Field, &mut heaps, &hw);

    for at_end in [false, true] {
        assert_eq!(
            chars.alloc_range(u32::MAX, at_end, VramType::BOTH),
            Err(TransferError::OutOfVramSpace {
                screen: Screen::Main
            })
        );
    }
    let huge = PlttTransferTaskTemplate {
        data: PaletteData::new(vec![0; 32], PaletteFormat::Pltt16),
        vram_type: VramType::MAIN,
        resource_id: 1,
        num_palettes: u32::MAX,
    };
    assert_eq!(
        pltt.request_whole_range(huge, &mut queue),
        Err(TransferError::OutOfVramSpace {
            screen: Screen::Main
        })
    );
    assert!(!pltt.has_task(1));
    assert_eq!(chars.stats(Screen::Main).front_offset, 0);
    assert_eq!(chars.tail_bitmap(Screen::Main).count_reserved(), 0);
    assert!(queue.is_empty());
}
