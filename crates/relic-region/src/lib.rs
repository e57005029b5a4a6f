//! Region entities, their owning context, and persisted settings.
#![forbid(unsafe_code)]

mod settings;
mod spatial;

pub use settings::SettingsNode;
pub use spatial::{RegionKey, SpatialIndex};

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use relic_geom::{BoundsError, ChunkCoord, ChunkSection, Point, RegionBounds};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionError {
    /// The region was disposed; bound-mutating operations are invalid.
    Disposed,
    DuplicateName { module: String, name: String },
    Bounds(BoundsError),
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::Disposed => write!(f, "region is disposed"),
            RegionError::DuplicateName { module, name } => {
                write!(f, "region {name:?} already exists in module {module:?}")
            }
            RegionError::Bounds(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RegionError {}

impl From<BoundsError> for RegionError {
    fn from(e: BoundsError) -> Self {
        RegionError::Bounds(e)
    }
}

const PERSIST_IDLE: u8 = 0;
const PERSIST_SAVING: u8 = 1;
const PERSIST_RESTORING: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOp {
    Save,
    Restore,
}

/// Per-region operation guards. Entry is a compare-exchange, so overlapping
/// requests see exactly one winner; saving and restoring share one cell and
/// exclude each other.
#[derive(Default)]
pub struct OpFlags {
    building: AtomicBool,
    persist: AtomicU8,
}

impl OpFlags {
    #[inline]
    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::Acquire)
    }

    pub fn try_begin_build(&self) -> bool {
        self.building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_build(&self) {
        self.building.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_saving(&self) -> bool {
        self.persist.load(Ordering::Acquire) == PERSIST_SAVING
    }

    #[inline]
    pub fn is_restoring(&self) -> bool {
        self.persist.load(Ordering::Acquire) == PERSIST_RESTORING
    }

    pub fn try_begin_persist(&self, op: PersistOp) -> bool {
        let target = match op {
            PersistOp::Save => PERSIST_SAVING,
            PersistOp::Restore => PERSIST_RESTORING,
        };
        self.persist
            .compare_exchange(PERSIST_IDLE, target, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_persist(&self) {
        self.persist.store(PERSIST_IDLE, Ordering::Release);
    }
}

/// Guarded region state. Mutations flow through [`RegionContext`] so the
/// spatial index stays in step with the bounds.
pub struct Region {
    pub name: String,
    pub module: String,
    pub owner: Option<Uuid>,
    pub enter_priority: i32,
    pub leave_priority: i32,
    pub metadata: HashMap<String, String>,
    pub handlers: Vec<String>,
    pub listening: bool,
    pub disposed: bool,
    pub bounds: RegionBounds,
    pub node: Option<SettingsNode>,
}

impl Region {
    fn new(module: String, name: String, node: Option<SettingsNode>) -> Self {
        let mut region = Self {
            name,
            module,
            owner: None,
            enter_priority: 0,
            leave_priority: 0,
            metadata: HashMap::new(),
            handlers: Vec::new(),
            listening: false,
            disposed: false,
            bounds: RegionBounds::new(),
            node,
        };
        region.load_from_node();
        region
    }

    fn load_from_node(&mut self) {
        let Some(node) = &self.node else { return };
        self.owner = node.get_uuid("owner");
        if let Some(p) = node.get_i64("priority.enter") {
            self.enter_priority = p as i32;
        }
        if let Some(p) = node.get_i64("priority.leave") {
            self.leave_priority = p as i32;
        }
        if let (Some(p1), Some(p2)) = (node.get_point("bounds.p1"), node.get_point("bounds.p2")) {
            if let Err(e) = self.bounds.set_corners(p1, p2) {
                log::warn!(
                    "region {}/{}: ignoring persisted bounds: {e}",
                    self.module,
                    self.name
                );
            }
        }
    }

    /// Writes the persisted fields back into the settings node.
    pub fn store_to_node(&mut self) {
        let (p1, p2) = match (self.bounds.low().cloned(), self.bounds.high().cloned()) {
            (Some(p1), Some(p2)) => (Some(p1), Some(p2)),
            _ => (None, None),
        };
        let owner = self.owner;
        let (enter, leave) = (self.enter_priority, self.leave_priority);
        let Some(node) = &mut self.node else { return };
        match (p1, p2) {
            (Some(p1), Some(p2)) => {
                node.set_point("bounds.p1", &p1);
                node.set_point("bounds.p2", &p2);
            }
            _ => {
                node.remove("bounds");
            }
        }
        match owner {
            Some(id) => node.set_uuid("owner", id),
            None => node.remove("owner"),
        }
        node.set("priority.enter", toml::Value::Integer(enter as i64));
        node.set("priority.leave", toml::Value::Integer(leave as i64));
    }
}

/// Shared handle: guarded state plus lock-free operation flags, which the
/// build and persistence engines settle from worker callbacks.
pub struct RegionHandle {
    state: Mutex<Region>,
    pub flags: OpFlags,
}

impl std::fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionHandle")
            .field("key", &self.key())
            .finish_non_exhaustive()
    }
}

impl RegionHandle {
    fn new(region: Region) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(region),
            flags: OpFlags::default(),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&Region) -> R) -> R {
        f(&self.state.lock().unwrap())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Region) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn key(&self) -> RegionKey {
        self.with(|r| (r.module.to_lowercase(), r.name.to_lowercase()))
    }

    pub fn name(&self) -> String {
        self.with(|r| r.name.clone())
    }

    pub fn module(&self) -> String {
        self.with(|r| r.module.clone())
    }

    pub fn world(&self) -> Option<String> {
        self.with(|r| r.bounds.world().map(str::to_string))
    }

    pub fn is_disposed(&self) -> bool {
        self.with(|r| r.disposed)
    }

    /// Clone of the current bounds, safe to carry onto workers.
    pub fn bounds_snapshot(&self) -> RegionBounds {
        self.with(|r| r.bounds.clone())
    }

    pub fn chunk_coords(&self) -> Vec<ChunkCoord> {
        self.with_mut(|r| r.bounds.chunk_coords())
    }

    pub fn section_for(&self, coord: ChunkCoord) -> Option<ChunkSection> {
        self.with(|r| ChunkSection::from_bounds(&r.bounds, coord))
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.with_mut(|r| {
            r.metadata.insert(key.into(), value.into());
        });
    }

    pub fn metadata(&self, key: &str) -> Option<String> {
        self.with(|r| r.metadata.get(key).cloned())
    }
}

/// The explicit engine context: owns every region of a running engine and
/// the spatial index they register into. Replaces any notion of global
/// registries; construct one, pass it around, tear it down.
#[derive(Default)]
pub struct RegionContext {
    regions: Mutex<HashMap<RegionKey, Arc<RegionHandle>>>,
    pub spatial: SpatialIndex,
}

impl RegionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_region(
        &self,
        module: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Arc<RegionHandle>, RegionError> {
        self.create_region_with_node(module, name, None)
    }

    /// Creates a region, loading bounds/owner/priorities from the node when
    /// one is given. Bounds loaded this way register immediately.
    pub fn create_region_with_node(
        &self,
        module: impl Into<String>,
        name: impl Into<String>,
        node: Option<SettingsNode>,
    ) -> Result<Arc<RegionHandle>, RegionError> {
        let module = module.into();
        let name = name.into();
        let key = (module.to_lowercase(), name.to_lowercase());
        let handle = {
            let mut map = self.regions.lock().unwrap();
            if map.contains_key(&key) {
                return Err(RegionError::DuplicateName { module, name });
            }
            let handle = RegionHandle::new(Region::new(module, name, node));
            map.insert(key, handle.clone());
            handle
        };
        self.sync_spatial(&handle);
        Ok(handle)
    }

    /// Case-insensitive lookup.
    pub fn lookup(&self, module: &str, name: &str) -> Option<Arc<RegionHandle>> {
        self.regions
            .lock()
            .unwrap()
            .get(&(module.to_lowercase(), name.to_lowercase()))
            .cloned()
    }

    /// Sets a region's corners and keeps the spatial index in step.
    pub fn set_region_corners(
        &self,
        region: &Arc<RegionHandle>,
        p1: Point,
        p2: Point,
    ) -> Result<(), RegionError> {
        region.with_mut(|r| {
            if r.disposed {
                return Err(RegionError::Disposed);
            }
            r.bounds.set_corners(p1, p2)?;
            r.store_to_node();
            Ok(())
        })?;
        self.sync_spatial(region);
        Ok(())
    }

    fn sync_spatial(&self, region: &Arc<RegionHandle>) {
        let key = region.key();
        let entry = region.with(|r| {
            let world = r.bounds.world()?.to_string();
            Some((
                world,
                (
                    r.bounds.start_x()?,
                    r.bounds.start_y()?,
                    r.bounds.start_z()?,
                    r.bounds.end_x()?,
                    r.bounds.end_y()?,
                    r.bounds.end_z()?,
                ),
            ))
        });
        match entry {
            Some((world, block_box)) => self.spatial.register(key, &world, block_box),
            None => self.spatial.unregister(&key),
        }
    }

    /// Unregisters and marks the region disposed. False when it already
    /// was; the dispose itself happens exactly once.
    pub fn dispose(&self, region: &Arc<RegionHandle>) -> bool {
        let first = region.with_mut(|r| {
            if r.disposed {
                false
            } else {
                r.disposed = true;
                true
            }
        });
        if first {
            let key = region.key();
            self.spatial.unregister(&key);
            self.regions.lock().unwrap().remove(&key);
        }
        first
    }

    /// Disposes everything. The context is reusable afterwards but empty.
    pub fn teardown(&self) {
        let all: Vec<Arc<RegionHandle>> =
            self.regions.lock().unwrap().values().cloned().collect();
        for region in all {
            self.dispose(&region);
        }
        self.spatial.clear();
    }

    pub fn regions_at(&self, world: &str, x: i32, y: i32, z: i32) -> Vec<Arc<RegionHandle>> {
        self.resolve(self.spatial.keys_at(world, x, y, z))
    }

    pub fn regions_in_chunk(&self, world: &str, cx: i32, cz: i32) -> Vec<Arc<RegionHandle>> {
        self.resolve(self.spatial.keys_in_chunk(world, cx, cz))
    }

    fn resolve(&self, keys: Vec<RegionKey>) -> Vec<Arc<RegionHandle>> {
        let map = self.regions.lock().unwrap();
        keys.into_iter().filter_map(|k| map.get(&k).cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_region() -> (RegionContext, Arc<RegionHandle>) {
        let ctx = RegionContext::new();
        let region = ctx.create_region("arena", "Lobby").unwrap();
        ctx.set_region_corners(
            &region,
            Point::new("w", 0.0, 0.0, 0.0),
            Point::new("w", 31.0, 15.0, 31.0),
        )
        .unwrap();
        (ctx, region)
    }

    #[test]
    fn names_are_case_insensitive_and_unique() {
        let ctx = RegionContext::new();
        ctx.create_region("arena", "Lobby").unwrap();
        let err = ctx.create_region("Arena", "LOBBY").unwrap_err();
        assert!(matches!(err, RegionError::DuplicateName { .. }));
        assert!(ctx.lookup("ARENA", "lobby").is_some());
    }

    #[test]
    fn corners_register_and_move_in_spatial_index() {
        let (ctx, region) = ctx_with_region();
        assert_eq!(ctx.regions_at("w", 10, 5, 10).len(), 1);
        ctx.set_region_corners(
            &region,
            Point::new("w", 100.0, 0.0, 100.0),
            Point::new("w", 120.0, 10.0, 120.0),
        )
        .unwrap();
        assert!(ctx.regions_at("w", 10, 5, 10).is_empty());
        assert_eq!(ctx.regions_at("w", 110, 5, 110).len(), 1);
    }

    #[test]
    fn dispose_is_terminal_and_once() {
        let (ctx, region) = ctx_with_region();
        assert!(ctx.dispose(&region));
        assert!(!ctx.dispose(&region));
        assert!(ctx.regions_at("w", 10, 5, 10).is_empty());
        assert!(ctx.lookup("arena", "lobby").is_none());
        let err = ctx
            .set_region_corners(
                &region,
                Point::new("w", 0.0, 0.0, 0.0),
                Point::new("w", 1.0, 1.0, 1.0),
            )
            .unwrap_err();
        assert_eq!(err, RegionError::Disposed);
    }

    #[test]
    fn node_round_trips_region_fields() {
        let ctx = RegionContext::new();
        let region = ctx.create_region("arena", "vault").unwrap();
        region.with_mut(|r| {
            r.node = Some(SettingsNode::new());
            r.owner = Some(Uuid::from_u128(7));
            r.enter_priority = 2;
            r.leave_priority = -1;
        });
        ctx.set_region_corners(
            &region,
            Point::new("w", 3.0, 4.0, 5.0),
            Point::new("w", 6.0, 7.0, 8.0),
        )
        .unwrap();
        let toml_str = region.with_mut(|r| {
            r.store_to_node();
            r.node.as_ref().unwrap().to_toml_string()
        });

        let ctx2 = RegionContext::new();
        let node = SettingsNode::from_toml_str(&toml_str).unwrap();
        let revived = ctx2
            .create_region_with_node("arena", "vault", Some(node))
            .unwrap();
        revived.with(|r| {
            assert_eq!(r.owner, Some(Uuid::from_u128(7)));
            assert_eq!(r.enter_priority, 2);
            assert_eq!(r.leave_priority, -1);
            assert!(r.bounds.contains(4, 5, 6));
        });
        // bounds from the node registered on creation
        assert_eq!(ctx2.regions_at("w", 4, 5, 6).len(), 1);
    }

    #[test]
    fn persist_flags_exclude_overlap() {
        let flags = OpFlags::default();
        assert!(flags.try_begin_persist(PersistOp::Save));
        assert!(!flags.try_begin_persist(PersistOp::Save));
        assert!(!flags.try_begin_persist(PersistOp::Restore));
        assert!(flags.is_saving());
        assert!(!flags.is_restoring());
        flags.end_persist();
        assert!(flags.try_begin_persist(PersistOp::Restore));
        assert!(flags.is_restoring());
    }
}
