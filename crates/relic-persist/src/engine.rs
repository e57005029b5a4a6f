//! Save/restore/delete of region voxel state, chunk by chunk.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use relic_blocks::{Block, BlockRegistry};
use relic_geom::{ChunkCoord, ChunkSection};
use relic_region::{PersistOp, RegionHandle};
use relic_task::{
    Affinity, ChunkedTask, IterBox, IterHandler, Pace, Sched, TaskCtl, TaskFuture, project,
};
use relic_world::{BlockEntityState, ChunkBuf, EntityState, World, WorldSet};

use crate::RegionFileError;
use crate::codec::{CodecRead, HeaderBody, RegionFile, RegionFileHeader, VoxelRecord};
use crate::slot::Slot;

/// Ticks between a chunk's records being staged and the main-context apply.
pub const FLUSH_DELAY_TICKS: u64 = 2;

/// How restore treats records: apply everything, or only voxels whose
/// recorded state differs from the live chunk snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    AllBlocks,
    Mismatched,
}

/// One staged restore mutation.
#[derive(Clone, Copy, Debug)]
struct RestoreEdit {
    x: i32,
    y: i32,
    z: i32,
    block: Block,
    light: u8,
}

/// Persistence engine over per-chunk region files under
/// `<root>/<module>/<region>/<slot>/`. The snapshot slot is an explicit
/// parameter on every call; nothing here holds a current-slot field.
pub struct RegionStore {
    sched: Sched,
    worlds: Arc<WorldSet>,
    registry: Arc<BlockRegistry>,
    root: PathBuf,
}

impl RegionStore {
    pub fn new(
        sched: Sched,
        worlds: Arc<WorldSet>,
        registry: Arc<BlockRegistry>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sched,
            worlds,
            registry,
            root: root.into(),
        }
    }

    pub fn slot_dir(&self, region: &Arc<RegionHandle>, slot: &Slot) -> PathBuf {
        let (module, name) = region.key();
        self.root.join(module).join(name).join(slot.as_str())
    }

    fn chunk_file(dir: &Path, coord: ChunkCoord) -> PathBuf {
        dir.join(format!("c.{}.{}.rgn", coord.cx, coord.cz))
    }

    fn resolve_world(&self, region: &Arc<RegionHandle>) -> Result<Arc<World>, String> {
        let name = region
            .world()
            .ok_or_else(|| format!("region {:?} is not anchored to a world", region.name()))?;
        self.worlds
            .get(&name)
            .ok_or_else(|| format!("world {name:?} is not available"))
    }

    /// Writes one region file per covered chunk from the current live world
    /// state (a full all-blocks dump of each section). Fails fast without
    /// touching disk when the region covers no chunks or another
    /// save/restore is in flight.
    pub fn save_data(&self, region: &Arc<RegionHandle>, slot: &Slot) -> TaskFuture {
        if !region.flags.try_begin_persist(PersistOp::Save) {
            return TaskFuture::failed(format!(
                "region {:?}: a save or restore is already in progress",
                region.name()
            ));
        }
        let reject = |msg: String| {
            region.flags.end_persist();
            TaskFuture::failed(msg)
        };
        let chunks = region.chunk_coords();
        if chunks.is_empty() {
            return reject(format!("region {:?} covers no chunks", region.name()));
        }
        let world = match self.resolve_world(region) {
            Ok(w) => w,
            Err(msg) => return reject(msg),
        };
        let dir = self.slot_dir(region, slot);
        if let Err(e) = fs::create_dir_all(&dir) {
            return reject(format!("create {dir:?}: {e}"));
        }

        let region_name = region.name();
        let mut futures = Vec::new();
        for coord in chunks {
            let Some(section) = region.section_for(coord) else {
                continue;
            };
            let Some(live) = world.chunk_snapshot(coord) else {
                log::warn!(
                    "save {region_name:?}: chunk ({}, {}) unavailable, skipped",
                    coord.cx,
                    coord.cz
                );
                continue;
            };
            let handler = SaveHandler {
                live,
                world: world.clone(),
                registry: self.registry.clone(),
                section,
                path: Self::chunk_file(&dir, coord),
                region_name: region_name.clone(),
                records: Vec::with_capacity(section.block_volume() as usize),
            };
            let fut = ChunkedTask::new(IterBox::from_section(&section), Affinity::Worker, handler)
                .run(&self.sched, Pace::Queued);
            futures.push(fut);
        }

        let agg = project(&futures);
        let r = region.clone();
        agg.on_done(move |_, _| r.flags.end_persist());
        agg
    }

    /// True iff a readable region file header exists for every expected
    /// chunk under the slot.
    pub fn can_restore(&self, region: &Arc<RegionHandle>, slot: &Slot) -> bool {
        let chunks = region.chunk_coords();
        if chunks.is_empty() {
            return false;
        }
        let dir = self.slot_dir(region, slot);
        Self::files_readable(&dir, &chunks)
    }

    fn files_readable(dir: &Path, chunks: &[ChunkCoord]) -> bool {
        chunks.iter().all(|&coord| {
            File::open(Self::chunk_file(dir, coord))
                .ok()
                .map(BufReader::new)
                .and_then(|mut r| RegionFileHeader::decode(&mut r).ok())
                .is_some()
        })
    }

    /// Applies the slot's saved voxel state back into the live world.
    /// Transient entities inside the region's chunks are removed first;
    /// saved entities come back with the blocks. Corruption in one chunk's
    /// file fails that chunk (and the aggregate) but does not roll back
    /// siblings that already applied.
    pub fn restore_data(
        &self,
        region: &Arc<RegionHandle>,
        slot: &Slot,
        pace: Pace,
        mode: ApplyMode,
    ) -> TaskFuture {
        if !region.flags.try_begin_persist(PersistOp::Restore) {
            return TaskFuture::failed(format!(
                "region {:?}: a save or restore is already in progress",
                region.name()
            ));
        }
        let reject = |msg: String| {
            region.flags.end_persist();
            TaskFuture::failed(msg)
        };
        let chunks = region.chunk_coords();
        if chunks.is_empty() {
            return reject(format!("region {:?} covers no chunks", region.name()));
        }
        let world = match self.resolve_world(region) {
            Ok(w) => w,
            Err(msg) => return reject(msg),
        };
        let dir = self.slot_dir(region, slot);
        if !Self::files_readable(&dir, &chunks) {
            return reject(format!(
                "region {:?}: no restorable data in slot {:?}",
                region.name(),
                slot.as_str()
            ));
        }

        // Entry points run on the main context, so the sweep is safe here.
        for &coord in &chunks {
            let removed = world.remove_entities_where(coord, |e| e.kind.is_transient());
            if removed > 0 {
                log::debug!(
                    "restore {:?}: removed {removed} transient entities from chunk ({}, {})",
                    region.name(),
                    coord.cx,
                    coord.cz
                );
            }
        }

        let mut futures = Vec::new();
        for coord in chunks {
            let Some(expected) = region.section_for(coord) else {
                continue;
            };
            let fut = match self.load_chunk_file(&dir, coord, &expected) {
                Ok(file) => {
                    let Some(live) = world.chunk_snapshot(coord) else {
                        log::warn!(
                            "restore {:?}: chunk ({}, {}) unavailable, skipped",
                            region.name(),
                            coord.cx,
                            coord.cz
                        );
                        continue;
                    };
                    let (tx, rx) = bounded(file.records.len().max(1));
                    let handler = RestoreHandler {
                        records: file.records,
                        idx: 0,
                        live,
                        mode,
                        registry: self.registry.clone(),
                        world: world.clone(),
                        sched: self.sched.clone(),
                        coord,
                        tx: Some(tx),
                        rx: Some(rx),
                        staged: 0,
                        unknown: 0,
                        block_entities: file.block_entities,
                        entities: file.entities,
                    };
                    ChunkedTask::new(IterBox::from_section(&expected), Affinity::Worker, handler)
                        .run(&self.sched, pace)
                }
                Err(e) => TaskFuture::failed(format!(
                    "restore {:?} chunk ({}, {}): {e}",
                    region.name(),
                    coord.cx,
                    coord.cz
                )),
            };
            futures.push(fut);
        }

        let agg = project(&futures);
        let r = region.clone();
        agg.on_done(move |_, _| r.flags.end_persist());
        agg
    }

    /// Strict per-file load: unknown version and header-volume disagreement
    /// with the freshly computed section are fatal before any record is
    /// read.
    fn load_chunk_file(
        &self,
        dir: &Path,
        coord: ChunkCoord,
        expected: &ChunkSection,
    ) -> Result<RegionFile, RegionFileError> {
        let path = Self::chunk_file(dir, coord);
        let mut r = BufReader::new(File::open(&path)?);
        let header = RegionFileHeader::decode(&mut r)?;
        let expected_volume = expected.block_volume();
        if header.volume != expected_volume {
            return Err(RegionFileError::VolumeMismatch {
                expected: expected_volume,
                found: header.volume,
            });
        }
        RegionFile::decode_body(header, &mut r)
    }

    /// Removes the backing files of exactly this slot. Synchronous: no
    /// iteration is involved, just local filesystem cleanup.
    pub fn delete_data(
        &self,
        region: &Arc<RegionHandle>,
        slot: &Slot,
    ) -> Result<usize, RegionFileError> {
        let dir = self.slot_dir(region, slot);
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0usize;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "rgn") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        let _ = fs::remove_dir(&dir);
        Ok(removed)
    }
}

struct SaveHandler {
    live: Arc<ChunkBuf>,
    world: Arc<World>,
    registry: Arc<BlockRegistry>,
    section: ChunkSection,
    path: PathBuf,
    region_name: String,
    records: Vec<VoxelRecord>,
}

impl SaveHandler {
    fn write_file(&mut self) -> Result<(), RegionFileError> {
        let block_entities = self.world.block_entities_in_section(&self.section);
        let entities: Vec<EntityState> = self
            .world
            .entities_in_chunk(self.section.coord)
            .into_iter()
            .filter(|e| e.kind.is_transient())
            .filter(|e| {
                self.section
                    .contains(e.x.floor() as i32, e.y.floor() as i32, e.z.floor() as i32)
            })
            .collect();
        let file = RegionFile {
            header: RegionFileHeader {
                region: self.region_name.clone(),
                world: self.world.name.clone(),
                body: HeaderBody::Section(self.section),
                volume: self.records.len() as i64,
            },
            records: std::mem::take(&mut self.records),
            block_entities,
            entities,
        };
        let mut w = BufWriter::new(File::create(&self.path)?);
        file.encode(&mut w)?;
        w.flush()?;
        Ok(())
    }
}

impl IterHandler for SaveHandler {
    fn on_item(&mut self, _ctl: &TaskCtl, x: i32, y: i32, z: i32) {
        let block = self.live.get_world(x, y, z).unwrap_or(Block::AIR);
        let light = self.live.light_world(x, y, z).unwrap_or(0);
        let type_name = self.registry.name_of(block.id).unwrap_or("air").to_string();
        self.records.push(VoxelRecord {
            x,
            y,
            z,
            type_name,
            data: block.state as i16,
            light,
        });
    }

    fn on_pre_complete(&mut self, ctl: &TaskCtl) {
        if let Err(e) = self.write_file() {
            ctl.fail(format!("write {:?}: {e}", self.path));
        }
    }
}

struct RestoreHandler {
    records: Vec<VoxelRecord>,
    idx: usize,
    live: Arc<ChunkBuf>,
    mode: ApplyMode,
    registry: Arc<BlockRegistry>,
    world: Arc<World>,
    sched: Sched,
    coord: ChunkCoord,
    tx: Option<Sender<RestoreEdit>>,
    rx: Option<Receiver<RestoreEdit>>,
    staged: usize,
    unknown: usize,
    block_entities: Vec<BlockEntityState>,
    entities: Vec<EntityState>,
}

impl IterHandler for RestoreHandler {
    fn on_item(&mut self, ctl: &TaskCtl, x: i32, y: i32, z: i32) {
        let i = self.idx;
        self.idx += 1;
        let Some(rec) = self.records.get(i) else {
            ctl.fail(format!(
                "chunk ({}, {}): record stream ended at index {i}",
                self.coord.cx, self.coord.cz
            ));
            return;
        };
        if (rec.x, rec.y, rec.z) != (x, y, z) {
            ctl.fail(format!(
                "chunk ({}, {}): record {i} is for ({}, {}, {}), expected ({x}, {y}, {z})",
                self.coord.cx, self.coord.cz, rec.x, rec.y, rec.z
            ));
            return;
        }
        let Some(id) = self.registry.id_by_name(&rec.type_name) else {
            self.unknown += 1;
            return;
        };
        let want = Block::new(id, rec.data as u16);
        let apply = match self.mode {
            ApplyMode::AllBlocks => true,
            ApplyMode::Mismatched => {
                self.live.get_world(x, y, z).unwrap_or(Block::AIR) != want
            }
        };
        if apply {
            if let Some(tx) = &self.tx {
                let _ = tx.send(RestoreEdit {
                    x,
                    y,
                    z,
                    block: want,
                    light: rec.light,
                });
                self.staged += 1;
            }
        }
    }

    fn on_pre_complete(&mut self, _ctl: &TaskCtl) {
        if self.unknown > 0 {
            log::warn!(
                "restore chunk ({}, {}): skipped {} records with unknown block types",
                self.coord.cx,
                self.coord.cz,
                self.unknown
            );
        }
        self.tx = None;
        let Some(rx) = self.rx.take() else { return };
        let world = self.world.clone();
        let coord = self.coord;
        let staged = self.staged;
        let block_entities = std::mem::take(&mut self.block_entities);
        let entities = std::mem::take(&mut self.entities);
        self.sched.run_main_after(FLUSH_DELAY_TICKS, move || {
            let mut applied = 0usize;
            while let Ok(edit) = rx.try_recv() {
                if world.set_block(edit.x, edit.y, edit.z, edit.block) {
                    world.set_light(edit.x, edit.y, edit.z, edit.light);
                    applied += 1;
                }
            }
            for be in block_entities {
                world.set_block_entity(be);
            }
            for e in entities {
                world.spawn_entity(e);
            }
            world.refresh_chunk(coord);
            log::debug!(
                "restore flush chunk ({}, {}): applied {applied}/{staged} staged voxels",
                coord.cx,
                coord.cz
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relic_blocks::BlockRegistry;
    use relic_geom::Point;
    use relic_region::RegionContext;
    use relic_task::TaskStatus;
    use relic_world::{EntityKind, FlatParams};

    struct Fixture {
        sched: Sched,
        world: Arc<World>,
        _ctx: RegionContext,
        region: Arc<RegionHandle>,
        reg: Arc<BlockRegistry>,
        store: RegionStore,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let sched = Sched::with_workers(2);
        let reg = Arc::new(BlockRegistry::builtin());
        let world = Arc::new(World::new("w", 72));
        world.generate_flat(
            &reg,
            -1,
            -1,
            1,
            1,
            &FlatParams {
                thickness: 8,
                material: "stone".into(),
            },
        );
        let worlds = Arc::new(WorldSet::new());
        worlds.insert(world.clone());
        let ctx = RegionContext::new();
        let region = ctx.create_region("arena", "Keep").unwrap();
        ctx.set_region_corners(
            &region,
            Point::new("w", -4.0, 2.0, -4.0),
            Point::new("w", 19.0, 9.0, 19.0),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = RegionStore::new(sched.clone(), worlds, reg.clone(), dir.path());
        Fixture {
            sched,
            world,
            _ctx: ctx,
            region,
            reg,
            store,
            _dir: dir,
        }
    }

    fn wait(f: &Fixture, fut: &TaskFuture) -> TaskStatus {
        assert!(f.sched.drive_until(5000, || fut.status().is_terminal()));
        fut.status()
    }

    /// Restore flushes land a couple of ticks after the future settles.
    fn wait_flush(f: &Fixture, coord: ChunkCoord, prev: u64) {
        assert!(f
            .sched
            .drive_until(5000, || f.world.refresh_count(coord) > prev));
    }

    #[test]
    fn round_trip_applies_nothing_then_exactly_one_voxel() {
        let f = fixture();
        let slot = Slot::default_slot();
        assert!(!f.store.can_restore(&f.region, &slot));
        let saved = f.store.save_data(&f.region, &slot);
        assert_eq!(wait(&f, &saved), TaskStatus::Success);
        assert!(f.store.can_restore(&f.region, &slot));
        assert!(!f.region.flags.is_saving());

        // untouched world: a mismatched restore stages zero edits
        let baseline = f.world.edit_count();
        let coord = ChunkCoord::new(0, 0);
        let refreshes = f.world.refresh_count(coord);
        let restored = f
            .store
            .restore_data(&f.region, &slot, Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(wait(&f, &restored), TaskStatus::Success);
        wait_flush(&f, coord, refreshes);
        assert_eq!(f.world.edit_count(), baseline);

        // vandalize one voxel; restore puts back exactly that one
        let brick = f.reg.block_by_name("brick", 0).unwrap();
        let stone = f.reg.block_by_name("stone", 0).unwrap();
        f.world.set_block(5, 4, 5, brick);
        let baseline = f.world.edit_count();
        let refreshes = f.world.refresh_count(coord);
        let restored = f
            .store
            .restore_data(&f.region, &slot, Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(wait(&f, &restored), TaskStatus::Success);
        wait_flush(&f, coord, refreshes);
        assert_eq!(f.world.block_at(5, 4, 5), Some(stone));
        assert_eq!(f.world.edit_count(), baseline + 1);
        assert!(!f.region.flags.is_restoring());
    }

    #[test]
    fn corrupted_volume_fails_and_clears_flag() {
        let f = fixture();
        let slot = Slot::default_slot();
        assert_eq!(wait(&f, &f.store.save_data(&f.region, &slot)), TaskStatus::Success);

        // rewrite one chunk file with a lying volume field
        let dir = f.store.slot_dir(&f.region, &slot);
        let path = RegionStore::chunk_file(&dir, ChunkCoord::new(0, 0));
        let mut file = RegionFile::decode(&mut BufReader::new(File::open(&path).unwrap())).unwrap();
        file.header.volume += 1;
        let mut w = BufWriter::new(File::create(&path).unwrap());
        file.encode(&mut w).unwrap();
        w.flush().unwrap();

        let restored = f
            .store
            .restore_data(&f.region, &slot, Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(wait(&f, &restored), TaskStatus::Failed);
        assert!(restored.message().unwrap().contains("volume mismatch"));
        assert!(!f.region.flags.is_restoring());
        // the region stays usable: a fresh attempt is not rejected for overlap
        let again = f
            .store
            .restore_data(&f.region, &slot, Pace::Queued, ApplyMode::Mismatched);
        assert!(!again.message().unwrap_or_default().contains("already in progress"));
        wait(&f, &again);
    }

    #[test]
    fn overlapping_operations_reject_immediately() {
        let f = fixture();
        let slot = Slot::default_slot();
        // hold the persist cell the way an in-flight save would
        assert!(f.region.flags.try_begin_persist(PersistOp::Save));
        let second = f.store.save_data(&f.region, &slot);
        assert_eq!(second.status(), TaskStatus::Failed);
        assert!(second.message().unwrap().contains("already in progress"));
        let third = f
            .store
            .restore_data(&f.region, &slot, Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(third.status(), TaskStatus::Failed);
        f.region.flags.end_persist();
        // once the cell clears, exactly one new save wins it again
        let real = f.store.save_data(&f.region, &slot);
        assert_eq!(wait(&f, &real), TaskStatus::Success);
        assert!(!f.region.flags.is_saving());
    }

    #[test]
    fn empty_region_and_missing_slot_fail_fast() {
        let f = fixture();
        let ctx = RegionContext::new();
        let bare = ctx.create_region("arena", "bare").unwrap();
        let fut = f.store.save_data(&bare, &Slot::default_slot());
        assert_eq!(fut.status(), TaskStatus::Failed);
        assert!(fut.message().unwrap().contains("covers no chunks"));
        assert!(!bare.flags.is_saving());

        let fut = f
            .store
            .restore_data(&f.region, &Slot::named("ghost"), Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(fut.status(), TaskStatus::Failed);
        assert!(fut.message().unwrap().contains("no restorable data"));
        assert!(!f.region.flags.is_restoring());
    }

    #[test]
    fn named_slots_are_independent() {
        let f = fixture();
        let (a, b) = (Slot::named("A"), Slot::named("B"));
        let stone = f.reg.block_by_name("stone", 0).unwrap();
        let sand = f.reg.block_by_name("sand", 0).unwrap();

        assert_eq!(wait(&f, &f.store.save_data(&f.region, &a)), TaskStatus::Success);
        f.world.set_block(3, 5, 3, sand);
        assert_eq!(wait(&f, &f.store.save_data(&f.region, &b)), TaskStatus::Success);

        let coord = ChunkCoord::new(0, 0);
        let refreshes = f.world.refresh_count(coord);
        let restored = f
            .store
            .restore_data(&f.region, &a, Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(wait(&f, &restored), TaskStatus::Success);
        wait_flush(&f, coord, refreshes);
        assert_eq!(f.world.block_at(3, 5, 3), Some(stone));

        let refreshes = f.world.refresh_count(coord);
        let restored = f
            .store
            .restore_data(&f.region, &b, Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(wait(&f, &restored), TaskStatus::Success);
        wait_flush(&f, coord, refreshes);
        assert_eq!(f.world.block_at(3, 5, 3), Some(sand));

        assert!(f.store.delete_data(&f.region, &a).unwrap() > 0);
        assert!(!f.store.can_restore(&f.region, &a));
        assert!(f.store.can_restore(&f.region, &b));
    }

    #[test]
    fn entities_sweep_and_come_back_from_the_file() {
        let f = fixture();
        let slot = Slot::default_slot();
        let coord = ChunkCoord::new(0, 0);
        f.world.spawn_entity(EntityState {
            kind: EntityKind::Furniture,
            x: 2.5,
            y: 5.0,
            z: 2.5,
            yaw: 180.0,
            tag: "painting".into(),
        });
        f.world.spawn_entity(EntityState {
            kind: EntityKind::Marker,
            x: 3.5,
            y: 5.0,
            z: 3.5,
            yaw: 0.0,
            tag: "spawn".into(),
        });
        f.world.set_block_entity(BlockEntityState {
            x: 2,
            y: 4,
            z: 2,
            kind: "chest".into(),
            payload: "loot".into(),
        });
        assert_eq!(wait(&f, &f.store.save_data(&f.region, &slot)), TaskStatus::Success);

        // a mob wanders in after the save
        f.world.spawn_entity(EntityState {
            kind: EntityKind::Monster,
            x: 6.5,
            y: 5.0,
            z: 6.5,
            yaw: 0.0,
            tag: "creep".into(),
        });

        let refreshes = f.world.refresh_count(coord);
        let restored = f
            .store
            .restore_data(&f.region, &slot, Pace::Queued, ApplyMode::Mismatched);
        assert_eq!(wait(&f, &restored), TaskStatus::Success);
        wait_flush(&f, coord, refreshes);

        let entities = f.world.entities_in_chunk(coord);
        let kinds: Vec<EntityKind> = entities.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EntityKind::Marker));
        assert!(kinds.contains(&EntityKind::Furniture));
        assert!(!kinds.contains(&EntityKind::Monster));
        assert_eq!(
            f.world.block_entity_at(2, 4, 2).unwrap().payload,
            "loot"
        );
    }
}
