use relic_geom::ChunkCoord;

/// Coarse entity classes, enough to decide what survives a region restore.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Item,
    Monster,
    Animal,
    Furniture,
    Marker,
}

impl EntityKind {
    /// Transient entities are swept out of a region before its blocks are
    /// restored so they do not persist across resets.
    #[inline]
    pub fn is_transient(self) -> bool {
        !matches!(self, EntityKind::Marker)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Item => "item",
            EntityKind::Monster => "monster",
            EntityKind::Animal => "animal",
            EntityKind::Furniture => "furniture",
            EntityKind::Marker => "marker",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "item" => EntityKind::Item,
            "monster" => EntityKind::Monster,
            "animal" => EntityKind::Animal,
            "furniture" => EntityKind::Furniture,
            "marker" => EntityKind::Marker,
            _ => return None,
        })
    }
}

/// A freestanding entity, addressed by its continuous position.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityState {
    pub kind: EntityKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub tag: String,
}

impl EntityState {
    #[inline]
    pub fn chunk(&self) -> ChunkCoord {
        ChunkCoord::of_block(self.x.floor() as i32, self.z.floor() as i32)
    }
}

/// A block-attached entity (chest contents, sign text, ...), addressed by
/// its voxel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEntityState {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub kind: String,
    pub payload: String,
}
