//! Block, material-name registry, and light packing.
#![forbid(unsafe_code)]

pub mod registry;
pub mod types;

pub use registry::BlockRegistry;
pub use types::{Block, BlockId, pack_light, unpack_light};
