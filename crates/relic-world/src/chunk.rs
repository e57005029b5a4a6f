use relic_blocks::Block;
use relic_geom::{CHUNK_SIZE, ChunkCoord};

const SX: usize = CHUNK_SIZE as usize;
const SZ: usize = CHUNK_SIZE as usize;

/// One chunk column: a 16x16 tile spanning the world's full height, with a
/// block and a packed light byte per voxel. Snapshots handed out by the
/// world are plain clones of this, so readers on any thread see a frozen
/// point in time.
#[derive(Clone, Debug)]
pub struct ChunkBuf {
    pub coord: ChunkCoord,
    pub sy: usize,
    pub blocks: Vec<Block>,
    pub light: Vec<u8>,
}

impl ChunkBuf {
    pub fn new_air(coord: ChunkCoord, sy: usize) -> Self {
        Self {
            coord,
            sy,
            blocks: vec![Block::AIR; SX * sy * SZ],
            light: vec![0; SX * sy * SZ],
        }
    }

    #[inline]
    pub fn idx(&self, lx: usize, y: usize, lz: usize) -> usize {
        (y * SZ + lz) * SX + lx
    }

    #[inline]
    pub fn base_x(&self) -> i32 {
        self.coord.cx * CHUNK_SIZE
    }

    #[inline]
    pub fn base_z(&self) -> i32 {
        self.coord.cz * CHUNK_SIZE
    }

    #[inline]
    pub fn get_local(&self, lx: usize, y: usize, lz: usize) -> Block {
        self.blocks[self.idx(lx, y, lz)]
    }

    #[inline]
    pub fn contains_world(&self, wx: i32, wy: i32, wz: i32) -> bool {
        if wy < 0 || wy >= self.sy as i32 {
            return false;
        }
        let bx = self.base_x();
        let bz = self.base_z();
        wx >= bx && wx < bx + CHUNK_SIZE && wz >= bz && wz < bz + CHUNK_SIZE
    }

    #[inline]
    pub fn get_world(&self, wx: i32, wy: i32, wz: i32) -> Option<Block> {
        if !self.contains_world(wx, wy, wz) {
            return None;
        }
        let lx = (wx - self.base_x()) as usize;
        let lz = (wz - self.base_z()) as usize;
        Some(self.get_local(lx, wy as usize, lz))
    }

    #[inline]
    pub fn light_world(&self, wx: i32, wy: i32, wz: i32) -> Option<u8> {
        if !self.contains_world(wx, wy, wz) {
            return None;
        }
        let lx = (wx - self.base_x()) as usize;
        let lz = (wz - self.base_z()) as usize;
        Some(self.light[self.idx(lx, wy as usize, lz)])
    }

    pub fn set_world(&mut self, wx: i32, wy: i32, wz: i32, b: Block) -> bool {
        if !self.contains_world(wx, wy, wz) {
            return false;
        }
        let lx = (wx - self.base_x()) as usize;
        let lz = (wz - self.base_z()) as usize;
        let idx = self.idx(lx, wy as usize, lz);
        self.blocks[idx] = b;
        true
    }

    pub fn set_light_world(&mut self, wx: i32, wy: i32, wz: i32, packed: u8) -> bool {
        if !self.contains_world(wx, wy, wz) {
            return false;
        }
        let lx = (wx - self.base_x()) as usize;
        let lz = (wz - self.base_z()) as usize;
        let idx = self.idx(lx, wy as usize, lz);
        self.light[idx] = packed;
        true
    }

    #[inline]
    pub fn has_non_air(&self) -> bool {
        self.blocks.iter().any(|b| *b != Block::AIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_coords_map_into_negative_chunks() {
        let mut buf = ChunkBuf::new_air(ChunkCoord::new(-1, -1), 8);
        assert!(buf.contains_world(-16, 0, -1));
        assert!(!buf.contains_world(0, 0, -1));
        assert!(buf.set_world(-9, 3, -5, Block::new(2, 0)));
        assert_eq!(buf.get_world(-9, 3, -5), Some(Block::new(2, 0)));
    }

    #[test]
    fn out_of_height_reads_are_none() {
        let buf = ChunkBuf::new_air(ChunkCoord::new(0, 0), 8);
        assert_eq!(buf.get_world(0, 8, 0), None);
        assert_eq!(buf.get_world(0, -1, 0), None);
    }
}
