//! Region bounds, chunk coordinates, and section clipping (no engine deps).
#![forbid(unsafe_code)]

use core::fmt;

/// Horizontal edge length of one chunk tile, in blocks.
pub const CHUNK_SIZE: i32 = 16;

/// A world-space corner point. `world` is `None` only for points that have
/// not been anchored to a named world yet; two corners of the same bounds
/// must agree on it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Point {
    pub world: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: Some(world.into()),
            x,
            y,
            z,
        }
    }

    pub const fn world_less(x: f64, y: f64, z: f64) -> Self {
        Self {
            world: None,
            x,
            y,
            z,
        }
    }

    #[inline]
    pub fn block_x(&self) -> i32 {
        self.x.floor() as i32
    }

    #[inline]
    pub fn block_y(&self) -> i32 {
        self.y.floor() as i32
    }

    #[inline]
    pub fn block_z(&self) -> i32 {
        self.z.floor() as i32
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundsError {
    /// The two corners name different worlds.
    WorldMismatch { first: String, second: String },
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsError::WorldMismatch { first, second } => {
                write!(f, "corner worlds differ: {first:?} vs {second:?}")
            }
        }
    }
}

impl std::error::Error for BoundsError {}

/// Degenerate-axis classification of a cuboid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Point,
    Line,
    Plane,
    Cuboid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub cx: i32,
    pub cz: i32,
}

impl ChunkCoord {
    #[inline]
    pub const fn new(cx: i32, cz: i32) -> Self {
        Self { cx, cz }
    }

    /// Chunk tile containing the given block column.
    #[inline]
    pub fn of_block(x: i32, z: i32) -> Self {
        Self {
            cx: x.div_euclid(CHUNK_SIZE),
            cz: z.div_euclid(CHUNK_SIZE),
        }
    }
}

/// Cuboid bounds over two normalized corner points, with cached derivations.
/// Undefined (no corners set) is a valid, inert state: queries return `None`
/// or empty results and nothing registers anywhere.
#[derive(Clone, Debug, Default)]
pub struct RegionBounds {
    lo: Option<Point>,
    hi: Option<Point>,
    chunk_cache: Option<Vec<ChunkCoord>>,
}

impl RegionBounds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes the two corners (per-axis min/max), rejecting mismatched
    /// worlds, and recomputes all derived fields. Any cached chunk list is
    /// invalidated.
    pub fn set_corners(&mut self, p1: Point, p2: Point) -> Result<(), BoundsError> {
        match (&p1.world, &p2.world) {
            (Some(a), Some(b)) if a != b => {
                return Err(BoundsError::WorldMismatch {
                    first: a.clone(),
                    second: b.clone(),
                });
            }
            _ => {}
        }
        let world = p1.world.clone().or_else(|| p2.world.clone());
        let lo = Point {
            world: world.clone(),
            x: p1.x.min(p2.x),
            y: p1.y.min(p2.y),
            z: p1.z.min(p2.z),
        };
        let hi = Point {
            world,
            x: p1.x.max(p2.x),
            y: p1.y.max(p2.y),
            z: p1.z.max(p2.z),
        };
        self.lo = Some(lo);
        self.hi = Some(hi);
        self.chunk_cache = None;
        Ok(())
    }

    /// Returns to the undefined state.
    pub fn clear(&mut self) {
        self.lo = None;
        self.hi = None;
        self.chunk_cache = None;
    }

    #[inline]
    pub fn is_defined(&self) -> bool {
        self.lo.is_some()
    }

    #[inline]
    pub fn world(&self) -> Option<&str> {
        self.lo.as_ref().and_then(|p| p.world.as_deref())
    }

    #[inline]
    pub fn low(&self) -> Option<&Point> {
        self.lo.as_ref()
    }

    #[inline]
    pub fn high(&self) -> Option<&Point> {
        self.hi.as_ref()
    }

    fn block_box(&self) -> Option<(i32, i32, i32, i32, i32, i32)> {
        let lo = self.lo.as_ref()?;
        let hi = self.hi.as_ref()?;
        Some((
            lo.block_x(),
            lo.block_y(),
            lo.block_z(),
            hi.block_x(),
            hi.block_y(),
            hi.block_z(),
        ))
    }

    #[inline]
    pub fn start_x(&self) -> Option<i32> {
        self.lo.as_ref().map(Point::block_x)
    }

    #[inline]
    pub fn start_y(&self) -> Option<i32> {
        self.lo.as_ref().map(Point::block_y)
    }

    #[inline]
    pub fn start_z(&self) -> Option<i32> {
        self.lo.as_ref().map(Point::block_z)
    }

    #[inline]
    pub fn end_x(&self) -> Option<i32> {
        self.hi.as_ref().map(Point::block_x)
    }

    #[inline]
    pub fn end_y(&self) -> Option<i32> {
        self.hi.as_ref().map(Point::block_y)
    }

    #[inline]
    pub fn end_z(&self) -> Option<i32> {
        self.hi.as_ref().map(Point::block_z)
    }

    /// Exclusive width along x (`end - start`). Zero for a one-block axis.
    #[inline]
    pub fn span_x(&self) -> Option<i32> {
        self.block_box().map(|(x0, _, _, x1, _, _)| x1 - x0)
    }

    #[inline]
    pub fn span_y(&self) -> Option<i32> {
        self.block_box().map(|(_, y0, _, _, y1, _)| y1 - y0)
    }

    #[inline]
    pub fn span_z(&self) -> Option<i32> {
        self.block_box().map(|(_, _, z0, _, _, z1)| z1 - z0)
    }

    /// Inclusive block width along x. One for a one-block axis.
    #[inline]
    pub fn block_width_x(&self) -> Option<i32> {
        self.span_x().map(|s| s + 1)
    }

    #[inline]
    pub fn block_width_y(&self) -> Option<i32> {
        self.span_y().map(|s| s + 1)
    }

    #[inline]
    pub fn block_width_z(&self) -> Option<i32> {
        self.span_z().map(|s| s + 1)
    }

    /// Total block count: the product of the inclusive widths. This is the
    /// single volume convention used everywhere, including the file header.
    pub fn block_volume(&self) -> Option<u64> {
        let (x0, y0, z0, x1, y1, z1) = self.block_box()?;
        let w = (x1 - x0 + 1) as u64;
        let h = (y1 - y0 + 1) as u64;
        let d = (z1 - z0 + 1) as u64;
        Some(w * h * d)
    }

    #[inline]
    pub fn chunk_start_x(&self) -> Option<i32> {
        self.start_x().map(|x| x.div_euclid(CHUNK_SIZE))
    }

    #[inline]
    pub fn chunk_end_x(&self) -> Option<i32> {
        self.end_x().map(|x| x.div_euclid(CHUNK_SIZE))
    }

    #[inline]
    pub fn chunk_start_z(&self) -> Option<i32> {
        self.start_z().map(|z| z.div_euclid(CHUNK_SIZE))
    }

    #[inline]
    pub fn chunk_end_z(&self) -> Option<i32> {
        self.end_z().map(|z| z.div_euclid(CHUNK_SIZE))
    }

    #[inline]
    pub fn chunk_width_x(&self) -> Option<i32> {
        Some(self.chunk_end_x()? - self.chunk_start_x()? + 1)
    }

    #[inline]
    pub fn chunk_width_z(&self) -> Option<i32> {
        Some(self.chunk_end_z()? - self.chunk_start_z()? + 1)
    }

    /// Covered chunk tiles. Computed on first access after a corner change,
    /// then served from cache; callers get their own copy.
    pub fn chunk_coords(&mut self) -> Vec<ChunkCoord> {
        if !self.is_defined() {
            return Vec::new();
        }
        if self.chunk_cache.is_none() {
            let (cx0, cx1) = (self.chunk_start_x().unwrap(), self.chunk_end_x().unwrap());
            let (cz0, cz1) = (self.chunk_start_z().unwrap(), self.chunk_end_z().unwrap());
            let mut out =
                Vec::with_capacity(((cx1 - cx0 + 1) as usize) * ((cz1 - cz0 + 1) as usize));
            for cx in cx0..=cx1 {
                for cz in cz0..=cz1 {
                    out.push(ChunkCoord::new(cx, cz));
                }
            }
            self.chunk_cache = Some(out);
        }
        self.chunk_cache.clone().unwrap_or_default()
    }

    /// Inclusive containment test.
    pub fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        match self.block_box() {
            Some((x0, y0, z0, x1, y1, z1)) => {
                x >= x0 && x <= x1 && y >= y0 && y <= y1 && z >= z0 && z <= z1
            }
            None => false,
        }
    }

    /// Chunk-span overlap test.
    pub fn intersects_chunk(&self, cx: i32, cz: i32) -> bool {
        match (
            self.chunk_start_x(),
            self.chunk_end_x(),
            self.chunk_start_z(),
            self.chunk_end_z(),
        ) {
            (Some(cx0), Some(cx1), Some(cz0), Some(cz1)) => {
                cx >= cx0 && cx <= cx1 && cz >= cz0 && cz <= cz1
            }
            _ => false,
        }
    }

    /// Classification by the number of one-block axes.
    pub fn shape(&self) -> Option<Shape> {
        let (x0, y0, z0, x1, y1, z1) = self.block_box()?;
        let flat = [x1 == x0, y1 == y0, z1 == z0]
            .iter()
            .filter(|f| **f)
            .count();
        Some(match flat {
            3 => Shape::Point,
            2 => Shape::Line,
            1 => Shape::Plane,
            _ => Shape::Cuboid,
        })
    }

    pub fn center(&self) -> Option<Point> {
        let lo = self.lo.as_ref()?;
        let hi = self.hi.as_ref()?;
        Some(Point {
            world: lo.world.clone(),
            x: (lo.x + hi.x) / 2.0,
            y: (lo.y + hi.y) / 2.0,
            z: (lo.z + hi.z) / 2.0,
        })
    }
}

/// The intersection of region bounds with one chunk tile: an inclusive voxel
/// box clipped to that chunk's columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSection {
    pub coord: ChunkCoord,
    pub x0: i32,
    pub y0: i32,
    pub z0: i32,
    pub x1: i32,
    pub y1: i32,
    pub z1: i32,
}

impl ChunkSection {
    pub fn from_bounds(bounds: &RegionBounds, coord: ChunkCoord) -> Option<Self> {
        let lo = bounds.low()?;
        let hi = bounds.high()?;
        Self::clip(
            (
                lo.block_x(),
                lo.block_y(),
                lo.block_z(),
                hi.block_x(),
                hi.block_y(),
                hi.block_z(),
            ),
            coord,
        )
    }

    /// Clips an inclusive block box to one chunk tile. `None` when the box
    /// misses the chunk entirely.
    pub fn clip(block_box: (i32, i32, i32, i32, i32, i32), coord: ChunkCoord) -> Option<Self> {
        let (x0, y0, z0, x1, y1, z1) = block_box;
        let bx = coord.cx * CHUNK_SIZE;
        let bz = coord.cz * CHUNK_SIZE;
        let cx0 = x0.max(bx);
        let cx1 = x1.min(bx + CHUNK_SIZE - 1);
        let cz0 = z0.max(bz);
        let cz1 = z1.min(bz + CHUNK_SIZE - 1);
        if cx0 > cx1 || cz0 > cz1 || y0 > y1 {
            return None;
        }
        Some(Self {
            coord,
            x0: cx0,
            y0,
            z0: cz0,
            x1: cx1,
            y1,
            z1: cz1,
        })
    }

    /// Block count of the section, same inclusive convention as
    /// [`RegionBounds::block_volume`].
    pub fn block_volume(&self) -> i64 {
        let w = (self.x1 - self.x0 + 1) as i64;
        let h = (self.y1 - self.y0 + 1) as i64;
        let d = (self.z1 - self.z0 + 1) as i64;
        w * h * d
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1 && z >= self.z0 && z <= self.z1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bounds(p1: Point, p2: Point) -> RegionBounds {
        let mut b = RegionBounds::new();
        b.set_corners(p1, p2).expect("set corners");
        b
    }

    #[test]
    fn world_mismatch_rejected() {
        let mut b = RegionBounds::new();
        let err = b
            .set_corners(
                Point::new("alpha", 0.0, 0.0, 0.0),
                Point::new("beta", 1.0, 1.0, 1.0),
            )
            .unwrap_err();
        assert!(matches!(err, BoundsError::WorldMismatch { .. }));
        assert!(!b.is_defined());
    }

    #[test]
    fn one_anchored_corner_is_enough() {
        let b = bounds(
            Point::new("w", 0.0, 0.0, 0.0),
            Point::world_less(3.0, 3.0, 3.0),
        );
        assert_eq!(b.world(), Some("w"));
    }

    #[test]
    fn volume_is_inclusive_block_count() {
        let b = bounds(Point::new("w", 0.0, 0.0, 0.0), Point::new("w", 1.0, 2.0, 3.0));
        assert_eq!(b.block_volume(), Some(2 * 3 * 4));
        assert_eq!(b.span_x(), Some(1));
        assert_eq!(b.block_width_x(), Some(2));
    }

    #[test]
    fn chunk_coords_cache_survives_reads_and_resets_on_change() {
        let mut b = bounds(
            Point::new("w", 0.0, 0.0, 0.0),
            Point::new("w", 20.0, 5.0, 20.0),
        );
        let first = b.chunk_coords();
        assert_eq!(first.len(), 4);
        // unrelated read-only query
        assert!(b.contains(10, 3, 10));
        assert_eq!(b.chunk_coords(), first);
        b.set_corners(
            Point::new("w", 0.0, 0.0, 0.0),
            Point::new("w", 40.0, 5.0, 8.0),
        )
        .unwrap();
        let second = b.chunk_coords();
        assert_ne!(second, first);
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn shape_degenerates_per_axis() {
        let p = |x: f64, y: f64, z: f64| Point::new("w", x, y, z);
        assert_eq!(bounds(p(1.0, 2.0, 3.0), p(1.0, 2.0, 3.0)).shape(), Some(Shape::Point));
        assert_eq!(bounds(p(0.0, 2.0, 3.0), p(9.0, 2.0, 3.0)).shape(), Some(Shape::Line));
        assert_eq!(bounds(p(0.0, 2.0, 0.0), p(9.0, 2.0, 9.0)).shape(), Some(Shape::Plane));
        assert_eq!(bounds(p(0.0, 0.0, 0.0), p(9.0, 9.0, 9.0)).shape(), Some(Shape::Cuboid));
    }

    #[test]
    fn negative_coords_map_to_chunks() {
        let b = bounds(
            Point::new("w", -1.0, 0.0, -1.0),
            Point::new("w", 1.0, 0.0, 1.0),
        );
        assert_eq!(b.chunk_start_x(), Some(-1));
        assert_eq!(b.chunk_end_x(), Some(0));
        assert!(b.intersects_chunk(-1, -1));
        assert!(b.intersects_chunk(0, 0));
        assert!(!b.intersects_chunk(1, 0));
    }

    #[test]
    fn section_clips_to_chunk() {
        let b = bounds(
            Point::new("w", 5.0, 10.0, 5.0),
            Point::new("w", 20.0, 12.0, 20.0),
        );
        let s = ChunkSection::from_bounds(&b, ChunkCoord::new(0, 0)).unwrap();
        assert_eq!((s.x0, s.x1, s.z0, s.z1), (5, 15, 5, 15));
        assert_eq!((s.y0, s.y1), (10, 12));
        assert_eq!(s.block_volume(), 11 * 3 * 11);
        let s1 = ChunkSection::from_bounds(&b, ChunkCoord::new(1, 0)).unwrap();
        assert_eq!((s1.x0, s1.x1), (16, 20));
        assert!(ChunkSection::from_bounds(&b, ChunkCoord::new(2, 0)).is_none());
    }

    #[test]
    fn section_volumes_sum_to_region_volume() {
        let mut b = bounds(
            Point::new("w", -7.0, 3.0, 2.0),
            Point::new("w", 25.0, 9.0, 37.0),
        );
        let total: i64 = b
            .chunk_coords()
            .into_iter()
            .filter_map(|c| ChunkSection::from_bounds(&b, c))
            .map(|s| s.block_volume())
            .sum();
        assert_eq!(total as u64, b.block_volume().unwrap());
    }

    proptest! {
        #[test]
        fn volume_is_corner_order_independent(
            x1 in -200.0f64..200.0, y1 in -64.0f64..256.0, z1 in -200.0f64..200.0,
            x2 in -200.0f64..200.0, y2 in -64.0f64..256.0, z2 in -200.0f64..200.0,
        ) {
            let a = bounds(Point::new("w", x1, y1, z1), Point::new("w", x2, y2, z2));
            let b = bounds(Point::new("w", x2, y2, z2), Point::new("w", x1, y1, z1));
            prop_assert_eq!(a.block_volume(), b.block_volume());
            prop_assert_eq!(a.start_x(), b.start_x());
            prop_assert_eq!(a.end_z(), b.end_z());
        }

        #[test]
        fn contains_matches_block_box(
            x in -40i32..40, y in -10i32..20, z in -40i32..40,
        ) {
            let b = bounds(Point::new("w", -16.0, 0.0, -16.0), Point::new("w", 15.0, 7.0, 15.0));
            let expect = (-16..=15).contains(&x) && (0..=7).contains(&y) && (-16..=15).contains(&z);
            prop_assert_eq!(b.contains(x, y, z), expect);
        }
    }
}
