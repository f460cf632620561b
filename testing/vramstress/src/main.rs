// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use std::{fs, path::PathBuf};

use anyhow::{ensure, Context};
use clap::Parser;
use common::{
    serialize::{load_config, save_config},
    TransferConfig,
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use vram_transfer::{
    cell_transfer::CellTransferHandle,
    heap::HeapRegions,
    hw::{
        registers::ObjCharMode,
        vram::{VramCtrl, A, B, D, F, I},
        Gpu2d,
    },
    resource::{CharacterData, PaletteData, PaletteFormat},
    CellTransferStates, CharTransfer, CharTransferTaskTemplate, CharTransferTemplate,
    PlttTransfer, PlttTransferTaskTemplate, Screen, TransferError, VramTransferQueue, VramType,
};

/// Replays a randomized sprite load/unload workload against the VRAM
/// allocators and reports how they hold up
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of frames to simulate
    #[arg(short, long, default_value_t = 3600)]
    frames: u32,
    /// Seed of the workload
    #[arg(short, long, default_value_t = 0)]
    seed: u64,
    /// Allocator operations per frame
    #[arg(short, long, default_value_t = 6)]
    ops: u32,
    /// Frames between scene changes, which tear down all VRAM
    #[arg(long, default_value_t = 900)]
    scene_length: u32,
    /// Load the allocator config from a file written with --write-config
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write the config in use to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Stats {
    char_placed: u32,
    pltt_placed: u32,
    copies: u32,
    resizes: u32,
    deletes: u32,
    out_of_space: u32,
    out_of_slots: u32,
    no_task: u32,
    early_flushes: u32,
    scene_changes: u32,
    bytes: u64,
    worst_free_run: Option<usize>,
}

impl Stats {
    fn failed(&mut self, err: TransferError) {
        log::debug!("Request failed: {err}");
        match err {
            TransferError::OutOfVramSpace { .. } => self.out_of_space += 1,
            TransferError::OutOfSlots { .. } => self.out_of_slots += 1,
            TransferError::NoFreeTask => self.no_task += 1,
            _ => (),
        }
    }
}

/// A sprite the workload currently has loaded.
struct Sprite {
    id: u32,
    data: CharacterData,
    frame_size: usize,
    frames: usize,
    cell: Option<CellTransferHandle>,
}

struct World {
    gpu: Gpu2d,
    heaps: HeapRegions,
    queue: VramTransferQueue,
    chars: CharTransfer,
    pltt: PlttTransfer,
    cells: CellTransferStates,
    sprites: Vec<Sprite>,
    palettes: Vec<u32>,
    next_id: u32,
    rng: StdRng,
    stats: Stats,
}

impl World {
    fn new(config: &TransferConfig, seed: u64) -> Self {
        let mut gpu = Gpu2d::default();
        gpu.vram.update_ctrl(A, VramCtrl::mapped(2, 0).into());
        gpu.vram.update_ctrl(B, VramCtrl::mapped(2, 1).into());
        gpu.vram.update_ctrl(D, VramCtrl::mapped(4, 0).into());
        gpu.vram.update_ctrl(F, VramCtrl::mapped(5, 0).into());
        gpu.vram.update_ctrl(I, VramCtrl::mapped(3, 0).into());

        let mut heaps = HeapRegions::new().with_region(config.heap, 0x4_0000);
        let queue = VramTransferQueue::new(config.queue_capacity, config.heap, &mut heaps);
        let mut chars = CharTransfer::new();
        chars.init_with_modes(
            &CharTransferTemplate::from_config(config),
            [ObjCharMode::OneDim128K, ObjCharMode::OneDim32K],
            &mut gpu,
            &mut heaps,
        );
        let mut pltt = PlttTransfer::new();
        pltt.init(config.pltt_tasks, config.heap, &mut heaps, &gpu);
        let cells = CellTransferStates::new(config.cell_states, config.heap, &mut heaps);

        Self {
            gpu,
            heaps,
            queue,
            chars,
            pltt,
            cells,
            sprites: Vec::new(),
            palettes: Vec::new(),
            next_id: 0,
            rng: StdRng::seed_from_u64(seed),
            stats: Stats::default(),
        }
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Keep room for the copies of one more operation.
    fn make_room(&mut self) {
        if self.queue.capacity() - self.queue.len() < 4 {
            self.stats.early_flushes += 1;
            self.flush();
        }
    }

    fn flush(&mut self) {
        self.stats.bytes += u64::from(self.queue.pending_bytes());
        self.queue.process(&mut self.gpu);
    }

    fn random_vram_type(&mut self) -> VramType {
        *[VramType::MAIN, VramType::MAIN, VramType::SUB, VramType::BOTH]
            .choose(&mut self.rng)
            .unwrap_or(&VramType::MAIN)
    }

    fn load_sprite(&mut self) {
        let id = self.next_id();
        let streamed = self.rng.gen_bool(0.25);
        let frame_size = self.rng.gen_range(1..=16) * 0x80;
        let frames = if streamed { self.rng.gen_range(2..6) } else { 1 };
        let raw = vec![id as u8; frame_size * frames];
        let data = if streamed {
            CharacterData::for_vram_transfer(raw, ObjCharMode::OneDim32K)
        } else {
            CharacterData::new(raw, ObjCharMode::OneDim32K)
        };
        let template = CharTransferTaskTemplate {
            data: data.clone(),
            vram_type: self.random_vram_type(),
            resource_id: id,
            at_end: streamed || self.rng.gen_bool(0.8),
        };
        match self.chars.request(template, &mut self.queue) {
            Ok(()) => {
                self.stats.char_placed += 1;
                self.sprites.push(Sprite {
                    id,
                    data,
                    frame_size,
                    frames,
                    cell: None,
                });
            }
            Err(err) => self.stats.failed(err),
        }
    }

    fn unload_sprite(&mut self) {
        if self.sprites.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..self.sprites.len());
        let sprite = self.sprites.swap_remove(idx);
        if let Some(cell) = sprite.cell {
            self.cells.unregister(cell);
        }
        self.chars.reset_task(sprite.id);
        self.stats.deletes += 1;
    }

    /// Give a streamed sprite VRAM for one frame and start animating it.
    fn place_streamed(&mut self) {
        if 2 * (self.cells.live_states() + 1) > self.queue.capacity() {
            return;
        }
        let Some(idx) = self
            .sprites
            .iter()
            .position(|s| s.data.is_vram_transfer() && s.cell.is_none())
        else {
            return;
        };
        let (id, frame_size) = (self.sprites[idx].id, self.sprites[idx].frame_size);
        match self.chars.resize_range(id, frame_size as u32, &mut self.queue) {
            Ok(proxy) => {
                self.stats.resizes += 1;
                let data = self.sprites[idx].data.clone();
                self.sprites[idx].cell = self.cells.register(proxy, data);
            }
            Err(err) => self.stats.failed(err),
        }
    }

    fn copy_sprite(&mut self) {
        let Some(sprite) = self.sprites.iter().rev().find(|s| !s.data.is_vram_transfer()) else {
            return;
        };
        match self.chars.copy_task(sprite.id, &mut self.queue) {
            Ok(_) => self.stats.copies += 1,
            Err(err) => self.stats.failed(err),
        }
    }

    fn load_palette(&mut self) {
        let id = self.next_id();
        let num_palettes = self.rng.gen_range(1..=3);
        let template = PlttTransferTaskTemplate {
            data: PaletteData::new(vec![id as u8; num_palettes * 32], PaletteFormat::Pltt16),
            vram_type: self.random_vram_type(),
            resource_id: id,
            num_palettes: num_palettes as u32,
        };
        match self.pltt.request_free_space(template, &mut self.queue) {
            Ok(()) => {
                self.stats.pltt_placed += 1;
                self.palettes.push(id);
            }
            Err(err) => self.stats.failed(err),
        }
    }

    fn unload_palette(&mut self) {
        if self.palettes.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..self.palettes.len());
        self.pltt.reset_task(self.palettes.swap_remove(idx));
    }

    fn animate(&mut self) {
        for sprite in &self.sprites {
            if let Some(cell) = sprite.cell {
                let frame = self.rng.gen_range(0..sprite.frames);
                let start = frame * sprite.frame_size;
                self.cells.request_frame(cell, start..start + sprite.frame_size);
            }
        }
    }

    fn change_scene(&mut self) {
        for cell in self.sprites.drain(..).filter_map(|s| s.cell) {
            self.cells.unregister(cell);
        }
        self.palettes.clear();
        self.chars.reset_all_tasks();
        self.chars.clear_buffers(&self.gpu);
        self.pltt.reset_all_tasks();
        self.pltt.clear(&self.gpu);
        self.stats.scene_changes += 1;
    }

    fn frame(&mut self, ops: u32) {
        for _ in 0..ops {
            self.make_room();
            match self.rng.gen_range(0..10) {
                0..=3 => self.load_sprite(),
                4..=5 => self.unload_sprite(),
                6 => self.place_streamed(),
                7 => self.copy_sprite(),
                8 => self.load_palette(),
                _ => self.unload_palette(),
            }
        }
        self.animate();
        if self.queue.len() + 2 * self.cells.live_states() > self.queue.capacity() {
            self.stats.early_flushes += 1;
            self.flush();
        }
        self.cells.update(&mut self.queue);
        self.flush();

        let run = self.chars.stats(Screen::Main).largest_free_run;
        self.stats.worst_free_run = Some(self.stats.worst_free_run.map_or(run, |w| w.min(run)));
    }

    fn shutdown(mut self) -> (Stats, usize) {
        self.change_scene();
        self.chars.free(&mut self.heaps);
        self.pltt.free(&mut self.heaps);
        self.cells.free(&mut self.heaps);
        self.queue.free(&mut self.heaps);
        (self.stats, self.heaps.live_blocks())
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            load_config(&bytes).with_context(|| format!("parsing {}", path.display()))?
        }
        None => TransferConfig::default(),
    };
    if let Some(path) = &args.write_config {
        fs::write(path, save_config(&config)?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote config to {}", path.display());
        return Ok(());
    }
    ensure!(
        config.queue_capacity >= 8,
        "queue capacity {} is too small for the workload",
        config.queue_capacity
    );
    ensure!(args.scene_length > 0, "scene length must not be 0");

    let mut world = World::new(&config, args.seed);
    for frame in 0..args.frames {
        if frame != 0 && frame % args.scene_length == 0 {
            log::info!("Scene change at frame {frame}");
            world.change_scene();
        }
        world.frame(args.ops);
    }
    let (stats, leaked) = world.shutdown();

    println!("Simulated {} frames with seed {}", args.frames, args.seed);
    println!("{stats:#?}");
    ensure!(leaked == 0, "{leaked} heap blocks leaked");
    Ok(())
}
