//! Futures, schedulers, and the chunked 3D iteration engine.
#![forbid(unsafe_code)]

mod chunked;
mod future;
mod sched;

pub use chunked::{Affinity, ChunkedTask, DEFAULT_SEGMENT, IterBox, IterHandler, Pace};
pub use future::{TaskCtl, TaskFuture, TaskStatus, project};
pub use sched::{Job, Sched, TickQueue, WorkerPool};
