//! Versioned region-file persistence: codec, engine, and snapshot slots.
#![forbid(unsafe_code)]

pub mod codec;
mod engine;
mod slot;

use thiserror::Error;

pub use codec::{
    CodecRead, CodecWrite, FORMAT_V1, FORMAT_V2, HeaderBody, RegionFile, RegionFileHeader,
    VoxelRecord,
};
pub use engine::{ApplyMode, FLUSH_DELAY_TICKS, RegionStore};
pub use slot::{Slot, SlotView};

/// Failure classes of region-file reading and writing. Version and volume
/// problems are corruption guards: fatal for the file, never retried.
#[derive(Debug, Error)]
pub enum RegionFileError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported region file version {found}")]
    UnsupportedVersion { found: i32 },
    #[error("volume mismatch: header says {found}, expected {expected}")]
    VolumeMismatch { expected: i64, found: i64 },
    #[error("malformed region file: {0}")]
    Malformed(String),
}
