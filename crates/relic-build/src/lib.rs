//! Build engine: applies chunk snapshots into a region's live voxels.
//!
//! Two phases per chunk: comparison runs wherever the task was scheduled
//! (snapshots are immutable, so workers are safe), while the actual world
//! writes are staged through a channel and applied by one job on the main
//! context a couple of ticks later.
#![forbid(unsafe_code)]

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use relic_blocks::Block;
use relic_geom::{ChunkCoord, ChunkSection};
use relic_region::RegionHandle;
use relic_task::{Affinity, ChunkedTask, IterBox, IterHandler, Pace, Sched, TaskCtl, TaskFuture, project};
use relic_world::{ChunkBuf, World, WorldSet};

/// Ticks between a chunk's iteration finishing and its staged edits being
/// applied on the main context.
pub const FLUSH_DELAY_TICKS: u64 = 2;

/// One staged world mutation, produced off-thread and applied on the main
/// context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingEdit {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub block: Block,
}

pub struct Builder {
    sched: Sched,
    worlds: Arc<WorldSet>,
}

impl Builder {
    pub fn new(sched: Sched, worlds: Arc<WorldSet>) -> Self {
        Self { sched, worlds }
    }

    /// Rewrites every voxel of `region` that differs from the given chunk
    /// snapshots. Returns an immediately-failed future when a build is
    /// already running on the region or its bounds are undefined; chunks
    /// that cannot be resolved are skipped with a diagnostic and do not
    /// abort their siblings. Cancellation mid-build leaves earlier chunks'
    /// edits applied.
    pub fn build(
        &self,
        region: &Arc<RegionHandle>,
        pace: Pace,
        snapshots: Vec<Arc<ChunkBuf>>,
    ) -> TaskFuture {
        if !region.flags.try_begin_build() {
            return TaskFuture::failed(format!(
                "build already in progress for region {:?}",
                region.name()
            ));
        }
        let bounds = region.bounds_snapshot();
        if !bounds.is_defined() {
            region.flags.end_build();
            return TaskFuture::failed(format!("region {:?} has no bounds", region.name()));
        }
        let Some(world_name) = bounds.world().map(str::to_string) else {
            region.flags.end_build();
            return TaskFuture::failed(format!("region {:?} is not anchored to a world", region.name()));
        };
        let Some(world) = self.worlds.get(&world_name) else {
            region.flags.end_build();
            return TaskFuture::failed(format!("world {world_name:?} is not available"));
        };

        let mut futures = Vec::new();
        for target in snapshots {
            let coord = target.coord;
            let Some(section) = ChunkSection::from_bounds(&bounds, coord) else {
                log::debug!(
                    "build {:?}: snapshot chunk ({}, {}) outside region, skipped",
                    region.name(),
                    coord.cx,
                    coord.cz
                );
                continue;
            };
            let Some(live) = world.chunk_snapshot(coord) else {
                log::warn!(
                    "build {:?}: chunk ({}, {}) unavailable in world {world_name:?}, skipped",
                    region.name(),
                    coord.cx,
                    coord.cz
                );
                continue;
            };
            // Sized to the section so a fully mismatched chunk can never
            // block the producing worker.
            let (tx, rx) = bounded(section.block_volume() as usize);
            let handler = DiffHandler {
                target,
                live,
                world: world.clone(),
                sched: self.sched.clone(),
                coord,
                tx: Some(tx),
                rx: Some(rx),
                staged: 0,
            };
            let fut = ChunkedTask::new(IterBox::from_section(&section), Affinity::Worker, handler)
                .run(&self.sched, pace);
            futures.push(fut);
        }

        let agg = project(&futures);
        let flags_region = region.clone();
        agg.on_done(move |_, _| flags_region.flags.end_build());
        agg
    }
}

struct DiffHandler {
    target: Arc<ChunkBuf>,
    live: Arc<ChunkBuf>,
    world: Arc<World>,
    sched: Sched,
    coord: ChunkCoord,
    tx: Option<Sender<PendingEdit>>,
    rx: Option<Receiver<PendingEdit>>,
    staged: usize,
}

impl IterHandler for DiffHandler {
    fn on_item(&mut self, _ctl: &TaskCtl, x: i32, y: i32, z: i32) {
        let (Some(want), Some(have)) = (self.target.get_world(x, y, z), self.live.get_world(x, y, z))
        else {
            return;
        };
        if want != have {
            if let Some(tx) = &self.tx {
                let _ = tx.send(PendingEdit {
                    x,
                    y,
                    z,
                    block: want,
                });
                self.staged += 1;
            }
        }
    }

    fn on_pre_complete(&mut self, _ctl: &TaskCtl) {
        self.tx = None;
        let Some(rx) = self.rx.take() else { return };
        let world = self.world.clone();
        let coord = self.coord;
        let staged = self.staged;
        self.sched.run_main_after(FLUSH_DELAY_TICKS, move || {
            let mut applied = 0usize;
            while let Ok(edit) = rx.try_recv() {
                if world.set_block(edit.x, edit.y, edit.z, edit.block) {
                    applied += 1;
                }
            }
            world.refresh_chunk(coord);
            log::debug!(
                "build flush chunk ({}, {}): applied {applied}/{staged} staged edits",
                coord.cx,
                coord.cz
            );
        });
    }
}
