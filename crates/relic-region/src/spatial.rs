use std::sync::Mutex;

use hashbrown::HashMap;
use relic_geom::CHUNK_SIZE;

/// (module, region-name) lookup key, both lowercased.
pub type RegionKey = (String, String);

#[derive(Clone, Debug)]
struct Entry {
    key: RegionKey,
    x0: i32,
    y0: i32,
    z0: i32,
    x1: i32,
    y1: i32,
    z1: i32,
}

impl Entry {
    #[inline]
    fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1 && z >= self.z0 && z <= self.z1
    }

    #[inline]
    fn intersects_chunk(&self, cx: i32, cz: i32) -> bool {
        cx >= self.x0.div_euclid(CHUNK_SIZE)
            && cx <= self.x1.div_euclid(CHUNK_SIZE)
            && cz >= self.z0.div_euclid(CHUNK_SIZE)
            && cz <= self.z1.div_euclid(CHUNK_SIZE)
    }
}

/// Per-world index of region bounds answering point containment and chunk
/// intersection. Owned by the engine context; regions register here when
/// their bounds become defined and unregister on dispose.
#[derive(Default)]
pub struct SpatialIndex {
    by_world: Mutex<HashMap<String, Vec<Entry>>>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or moves a region's bounds. One entry per key.
    pub fn register(
        &self,
        key: RegionKey,
        world: &str,
        block_box: (i32, i32, i32, i32, i32, i32),
    ) {
        let (x0, y0, z0, x1, y1, z1) = block_box;
        let mut map = self.by_world.lock().unwrap();
        for list in map.values_mut() {
            list.retain(|e| e.key != key);
        }
        map.entry(world.to_string()).or_default().push(Entry {
            key,
            x0,
            y0,
            z0,
            x1,
            y1,
            z1,
        });
    }

    pub fn unregister(&self, key: &RegionKey) {
        let mut map = self.by_world.lock().unwrap();
        for list in map.values_mut() {
            list.retain(|e| &e.key != key);
        }
    }

    pub fn keys_at(&self, world: &str, x: i32, y: i32, z: i32) -> Vec<RegionKey> {
        self.by_world
            .lock()
            .unwrap()
            .get(world)
            .map(|list| {
                list.iter()
                    .filter(|e| e.contains(x, y, z))
                    .map(|e| e.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn keys_in_chunk(&self, world: &str, cx: i32, cz: i32) -> Vec<RegionKey> {
        self.by_world
            .lock()
            .unwrap()
            .get(world)
            .map(|list| {
                list.iter()
                    .filter(|e| e.intersects_chunk(cx, cz))
                    .map(|e| e.key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.by_world.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.by_world.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> RegionKey {
        ("mod".to_string(), name.to_string())
    }

    #[test]
    fn reregister_moves_between_worlds() {
        let idx = SpatialIndex::new();
        idx.register(key("a"), "alpha", (0, 0, 0, 15, 15, 15));
        assert_eq!(idx.keys_at("alpha", 8, 8, 8), vec![key("a")]);
        idx.register(key("a"), "beta", (0, 0, 0, 15, 15, 15));
        assert!(idx.keys_at("alpha", 8, 8, 8).is_empty());
        assert_eq!(idx.keys_at("beta", 8, 8, 8), vec![key("a")]);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn chunk_query_uses_span() {
        let idx = SpatialIndex::new();
        idx.register(key("a"), "w", (10, 0, 10, 40, 8, 40));
        assert_eq!(idx.keys_in_chunk("w", 0, 0), vec![key("a")]);
        assert_eq!(idx.keys_in_chunk("w", 2, 2), vec![key("a")]);
        assert!(idx.keys_in_chunk("w", 3, 0).is_empty());
    }
}
