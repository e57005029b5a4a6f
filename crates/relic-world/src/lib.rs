//! In-memory voxel worlds: chunk buffers, snapshots, and entity stores.
#![forbid(unsafe_code)]

mod chunk;
mod entity;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use hashbrown::HashMap;
use relic_blocks::{Block, BlockRegistry};
use relic_geom::{CHUNK_SIZE, ChunkCoord, ChunkSection};

pub use chunk::ChunkBuf;
pub use entity::{BlockEntityState, EntityKind, EntityState};

/// Flat-fill parameters for demo/test worlds: `thickness` layers of
/// `material` from y=0 upward, air above.
#[derive(Clone, Debug)]
pub struct FlatParams {
    pub thickness: i32,
    pub material: String,
}

/// One named world. Mutation is expected only from the main simulation
/// context; background workers read through [`World::chunk_snapshot`]
/// clones. That protocol is a caller contract, not a runtime check.
pub struct World {
    pub name: String,
    pub height: usize,
    chunks: RwLock<HashMap<ChunkCoord, ChunkBuf>>,
    entities: RwLock<HashMap<ChunkCoord, Vec<EntityState>>>,
    block_entities: RwLock<HashMap<(i32, i32, i32), BlockEntityState>>,
    refresh: RwLock<HashMap<ChunkCoord, u64>>,
    edits: AtomicU64,
}

impl World {
    pub fn new(name: impl Into<String>, height: usize) -> Self {
        Self {
            name: name.into(),
            height,
            chunks: RwLock::new(HashMap::new()),
            entities: RwLock::new(HashMap::new()),
            block_entities: RwLock::new(HashMap::new()),
            refresh: RwLock::new(HashMap::new()),
            edits: AtomicU64::new(0),
        }
    }

    /// Fills a rectangle of chunks with a flat floor.
    pub fn generate_flat(
        &self,
        reg: &BlockRegistry,
        cx0: i32,
        cz0: i32,
        cx1: i32,
        cz1: i32,
        params: &FlatParams,
    ) {
        let floor = reg
            .block_by_name(&params.material, 0)
            .unwrap_or(Block::AIR);
        let top = (params.thickness.max(0) as usize).min(self.height);
        let mut chunks = self.chunks.write().unwrap();
        for cx in cx0..=cx1 {
            for cz in cz0..=cz1 {
                let coord = ChunkCoord::new(cx, cz);
                let mut buf = ChunkBuf::new_air(coord, self.height);
                for y in 0..top {
                    for lz in 0..CHUNK_SIZE as usize {
                        for lx in 0..CHUNK_SIZE as usize {
                            let idx = buf.idx(lx, y, lz);
                            buf.blocks[idx] = floor;
                        }
                    }
                }
                chunks.insert(coord, buf);
            }
        }
        log::debug!(
            "world {:?}: flat-filled chunks ({cx0}, {cz0})..({cx1}, {cz1}) with {:?} x{}",
            self.name,
            params.material,
            params.thickness
        );
    }

    #[inline]
    pub fn has_chunk(&self, coord: ChunkCoord) -> bool {
        self.chunks.read().unwrap().contains_key(&coord)
    }

    pub fn chunk_coords(&self) -> Vec<ChunkCoord> {
        let mut v: Vec<ChunkCoord> = self.chunks.read().unwrap().keys().copied().collect();
        v.sort();
        v
    }

    /// Point-in-time immutable copy of one chunk. `None` when the chunk was
    /// never generated.
    pub fn chunk_snapshot(&self, coord: ChunkCoord) -> Option<Arc<ChunkBuf>> {
        self.chunks
            .read()
            .unwrap()
            .get(&coord)
            .map(|buf| Arc::new(buf.clone()))
    }

    pub fn block_at(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        let coord = ChunkCoord::of_block(wx, wz);
        self.chunks
            .read()
            .unwrap()
            .get(&coord)
            .and_then(|b| b.get_world(wx, wy, wz))
    }

    pub fn light_at(&self, wx: i32, wy: i32, wz: i32) -> Option<u8> {
        let coord = ChunkCoord::of_block(wx, wz);
        self.chunks
            .read()
            .unwrap()
            .get(&coord)
            .and_then(|b| b.light_world(wx, wy, wz))
    }

    /// Writes one voxel, creating an air chunk when the column was never
    /// generated. False only when `wy` is outside the world's height.
    pub fn set_block(&self, wx: i32, wy: i32, wz: i32, b: Block) -> bool {
        if wy < 0 || wy >= self.height as i32 {
            return false;
        }
        let coord = ChunkCoord::of_block(wx, wz);
        let mut chunks = self.chunks.write().unwrap();
        let buf = chunks
            .entry(coord)
            .or_insert_with(|| ChunkBuf::new_air(coord, self.height));
        let ok = buf.set_world(wx, wy, wz, b);
        if ok {
            self.edits.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Total successful block writes; lets callers observe how many voxels
    /// an operation actually touched.
    pub fn edit_count(&self) -> u64 {
        self.edits.load(Ordering::Relaxed)
    }

    pub fn set_light(&self, wx: i32, wy: i32, wz: i32, packed: u8) -> bool {
        if wy < 0 || wy >= self.height as i32 {
            return false;
        }
        let coord = ChunkCoord::of_block(wx, wz);
        let mut chunks = self.chunks.write().unwrap();
        let buf = chunks
            .entry(coord)
            .or_insert_with(|| ChunkBuf::new_air(coord, self.height));
        buf.set_light_world(wx, wy, wz, packed)
    }

    /// Stands in for a render/visibility refresh: bumps the chunk's counter
    /// so interested code can observe that it changed.
    pub fn refresh_chunk(&self, coord: ChunkCoord) {
        let mut map = self.refresh.write().unwrap();
        *map.entry(coord).or_insert(0) += 1;
    }

    pub fn refresh_count(&self, coord: ChunkCoord) -> u64 {
        self.refresh.read().unwrap().get(&coord).copied().unwrap_or(0)
    }

    pub fn spawn_entity(&self, e: EntityState) {
        let coord = e.chunk();
        self.entities.write().unwrap().entry(coord).or_default().push(e);
    }

    pub fn entities_in_chunk(&self, coord: ChunkCoord) -> Vec<EntityState> {
        self.entities
            .read()
            .unwrap()
            .get(&coord)
            .cloned()
            .unwrap_or_default()
    }

    /// Removes entities in one chunk matching the predicate, returning how
    /// many went away.
    pub fn remove_entities_where<F>(&self, coord: ChunkCoord, pred: F) -> usize
    where
        F: Fn(&EntityState) -> bool,
    {
        let mut map = self.entities.write().unwrap();
        let Some(list) = map.get_mut(&coord) else {
            return 0;
        };
        let before = list.len();
        list.retain(|e| !pred(e));
        before - list.len()
    }

    pub fn set_block_entity(&self, be: BlockEntityState) {
        self.block_entities
            .write()
            .unwrap()
            .insert((be.x, be.y, be.z), be);
    }

    pub fn block_entity_at(&self, x: i32, y: i32, z: i32) -> Option<BlockEntityState> {
        self.block_entities.read().unwrap().get(&(x, y, z)).cloned()
    }

    pub fn block_entities_in_section(&self, section: &ChunkSection) -> Vec<BlockEntityState> {
        let mut out: Vec<BlockEntityState> = self
            .block_entities
            .read()
            .unwrap()
            .values()
            .filter(|be| section.contains(be.x, be.y, be.z))
            .cloned()
            .collect();
        out.sort_by_key(|be| (be.y, be.x, be.z));
        out
    }
}

/// Named-world lookup used by engines that resolve worlds from persisted
/// names; a missing name is a per-chunk skip, not a crash.
#[derive(Default)]
pub struct WorldSet {
    worlds: RwLock<HashMap<String, Arc<World>>>,
}

impl WorldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, world: Arc<World>) {
        self.worlds
            .write()
            .unwrap()
            .insert(world.name.clone(), world);
    }

    pub fn get(&self, name: &str) -> Option<Arc<World>> {
        self.worlds.read().unwrap().get(name).cloned()
    }
}
