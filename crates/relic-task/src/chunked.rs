use relic_geom::ChunkSection;

use crate::future::{TaskCtl, TaskFuture, TaskStatus};
use crate::sched::Sched;

/// Default per-segment voxel budget: one 16x16x16 slab.
pub const DEFAULT_SEGMENT: usize = 4096;

/// Which context a task's item callbacks must run on. The engine never
/// decides this; the task declares it and the pace wires segments onto the
/// matching executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Affinity {
    Main,
    Worker,
}

/// Execution strategy, from least to most invasive: `Queued` dispatches
/// segments to the declared executor and yields between them; `Steady` runs
/// the segmented loop synchronously to completion; `Eager` additionally
/// bypasses segmentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pace {
    Queued,
    Steady,
    Eager,
}

/// Extension points of one chunked iteration. `on_item` runs once per voxel
/// in order; a terminal mark via the [`TaskCtl`] stops further items but
/// preserves anything the handler already staged. `on_pre_complete` runs
/// only when iteration finished still pending; `on_end` always runs last.
pub trait IterHandler: Send + 'static {
    fn on_begin(&mut self, _ctl: &TaskCtl) {}
    fn on_item(&mut self, ctl: &TaskCtl, x: i32, y: i32, z: i32);
    fn on_pre_complete(&mut self, _ctl: &TaskCtl) {}
    fn on_end(&mut self, _ctl: &TaskCtl, _status: TaskStatus) {}
}

/// Inclusive 3D iteration box. Order is fixed: y outermost, then x, z
/// innermost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IterBox {
    pub x0: i32,
    pub y0: i32,
    pub z0: i32,
    pub x1: i32,
    pub y1: i32,
    pub z1: i32,
}

impl IterBox {
    pub fn new(x0: i32, y0: i32, z0: i32, x1: i32, y1: i32, z1: i32) -> Self {
        Self {
            x0,
            y0,
            z0,
            x1,
            y1,
            z1,
        }
    }

    pub fn from_section(s: &ChunkSection) -> Self {
        Self::new(s.x0, s.y0, s.z0, s.x1, s.y1, s.z1)
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let w = (self.x1 - self.x0 + 1) as u64;
        let h = (self.y1 - self.y0 + 1) as u64;
        let d = (self.z1 - self.z0 + 1) as u64;
        w * h * d
    }

    pub fn is_empty(&self) -> bool {
        self.x1 < self.x0 || self.y1 < self.y0 || self.z1 < self.z0
    }
}

struct Cursor {
    x: i32,
    y: i32,
    z: i32,
    done: bool,
}

impl Cursor {
    fn start(b: &IterBox) -> Self {
        Self {
            x: b.x0,
            y: b.y0,
            z: b.z0,
            done: b.is_empty(),
        }
    }

    fn next(&mut self, b: &IterBox) -> Option<(i32, i32, i32)> {
        if self.done {
            return None;
        }
        let out = (self.x, self.y, self.z);
        self.z += 1;
        if self.z > b.z1 {
            self.z = b.z0;
            self.x += 1;
            if self.x > b.x1 {
                self.x = b.x0;
                self.y += 1;
                if self.y > b.y1 {
                    self.done = true;
                }
            }
        }
        Some(out)
    }
}

/// One bounded 3D iteration, split into segments, reporting through a
/// [`TaskFuture`].
pub struct ChunkedTask<H: IterHandler> {
    bounds: IterBox,
    affinity: Affinity,
    segment: usize,
    handler: H,
}

impl<H: IterHandler> ChunkedTask<H> {
    pub fn new(bounds: IterBox, affinity: Affinity, handler: H) -> Self {
        Self {
            bounds,
            affinity,
            segment: DEFAULT_SEGMENT,
            handler,
        }
    }

    pub fn with_segment(mut self, segment: usize) -> Self {
        self.segment = segment.max(1);
        self
    }

    pub fn run(self, sched: &Sched, pace: Pace) -> TaskFuture {
        let (fut, ctl) = TaskFuture::new();
        let mut run = TaskRun {
            bounds: self.bounds,
            affinity: self.affinity,
            segment: self.segment,
            handler: self.handler,
            cursor: Cursor::start(&self.bounds),
            began: false,
            ctl,
        };
        match pace {
            Pace::Eager => {
                run.begin();
                run.run_items(None);
                run.finish();
            }
            Pace::Steady => {
                run.begin();
                while !run.exhausted() {
                    let budget = run.segment;
                    run.run_items(Some(budget));
                }
                run.finish();
            }
            Pace::Queued => {
                run.dispatch(sched.clone());
            }
        }
        fut
    }
}

struct TaskRun<H: IterHandler> {
    bounds: IterBox,
    affinity: Affinity,
    segment: usize,
    handler: H,
    cursor: Cursor,
    began: bool,
    ctl: TaskCtl,
}

impl<H: IterHandler> TaskRun<H> {
    fn begin(&mut self) {
        if !self.began {
            self.began = true;
            self.handler.on_begin(&self.ctl);
        }
    }

    /// True once there is nothing further to do: all voxels visited or the
    /// task went terminal.
    fn exhausted(&self) -> bool {
        self.cursor.done || self.ctl.status().is_terminal()
    }

    fn run_items(&mut self, budget: Option<usize>) {
        let mut left = budget.unwrap_or(usize::MAX);
        while left > 0 && !self.ctl.status().is_terminal() {
            let Some((x, y, z)) = self.cursor.next(&self.bounds) else {
                return;
            };
            self.handler.on_item(&self.ctl, x, y, z);
            left -= 1;
        }
    }

    fn finish(mut self) {
        if self.ctl.status() == TaskStatus::Pending {
            self.handler.on_pre_complete(&self.ctl);
        }
        if self.ctl.status() == TaskStatus::Pending {
            self.ctl.succeed();
        }
        let status = self.ctl.status();
        self.handler.on_end(&self.ctl, status);
    }

    /// Queued stepping: run one segment on the declared executor, then
    /// reschedule the remainder.
    fn dispatch(self, sched: Sched) {
        let affinity = self.affinity;
        let next = sched.clone();
        let step = move || self.step(next);
        match affinity {
            Affinity::Worker => sched.run_worker(step),
            Affinity::Main => sched.run_main_after(1, step),
        }
    }

    fn step(mut self, sched: Sched) {
        self.begin();
        let budget = self.segment;
        self.run_items(Some(budget));
        if self.exhausted() {
            self.finish();
        } else {
            self.dispatch(sched);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Collect {
        seen: Arc<Mutex<Vec<(i32, i32, i32)>>>,
        pre: Arc<AtomicUsize>,
        end: Arc<AtomicUsize>,
        cancel_after: Option<usize>,
    }

    impl IterHandler for Collect {
        fn on_item(&mut self, ctl: &TaskCtl, x: i32, y: i32, z: i32) {
            let mut seen = self.seen.lock().unwrap();
            seen.push((x, y, z));
            if let Some(n) = self.cancel_after {
                if seen.len() >= n {
                    ctl.cancel("enough");
                }
            }
        }

        fn on_pre_complete(&mut self, _ctl: &TaskCtl) {
            self.pre.fetch_add(1, Ordering::SeqCst);
        }

        fn on_end(&mut self, _ctl: &TaskCtl, _status: TaskStatus) {
            self.end.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collector(cancel_after: Option<usize>) -> (Collect, Arc<Mutex<Vec<(i32, i32, i32)>>>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pre = Arc::new(AtomicUsize::new(0));
        let end = Arc::new(AtomicUsize::new(0));
        (
            Collect {
                seen: seen.clone(),
                pre: pre.clone(),
                end: end.clone(),
                cancel_after,
            },
            seen,
            pre,
            end,
        )
    }

    #[test]
    fn visits_every_voxel_in_fixed_order() {
        let sched = Sched::with_workers(1);
        let (h, seen, pre, end) = collector(None);
        let bounds = IterBox::new(0, 0, 0, 1, 1, 1);
        let fut = ChunkedTask::new(bounds, Affinity::Main, h).run(&sched, Pace::Eager);
        assert_eq!(fut.status(), TaskStatus::Success);
        let got = seen.lock().unwrap().clone();
        assert_eq!(
            got,
            vec![
                (0, 0, 0),
                (0, 0, 1),
                (1, 0, 0),
                (1, 0, 1),
                (0, 1, 0),
                (0, 1, 1),
                (1, 1, 0),
                (1, 1, 1),
            ]
        );
        assert_eq!(pre.load(Ordering::SeqCst), 1);
        assert_eq!(end.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn steady_pace_matches_eager_output() {
        let sched = Sched::with_workers(1);
        let bounds = IterBox::new(0, 0, 0, 4, 2, 4);
        let (h1, seen1, _, _) = collector(None);
        ChunkedTask::new(bounds, Affinity::Main, h1).run(&sched, Pace::Eager);
        let (h2, seen2, _, _) = collector(None);
        ChunkedTask::new(bounds, Affinity::Main, h2)
            .with_segment(7)
            .run(&sched, Pace::Steady);
        assert_eq!(*seen1.lock().unwrap(), *seen2.lock().unwrap());
    }

    #[test]
    fn queued_main_affinity_runs_on_pump() {
        let sched = Sched::with_workers(1);
        let bounds = IterBox::new(0, 0, 0, 3, 3, 3);
        let (h, seen, _, _) = collector(None);
        let fut = ChunkedTask::new(bounds, Affinity::Main, h)
            .with_segment(16)
            .run(&sched, Pace::Queued);
        assert_eq!(fut.status(), TaskStatus::Pending);
        assert!(sched.drive_until(64, || fut.status().is_terminal()));
        assert_eq!(fut.status(), TaskStatus::Success);
        assert_eq!(seen.lock().unwrap().len(), 64);
    }

    #[test]
    fn queued_worker_affinity_completes() {
        let sched = Sched::with_workers(2);
        let bounds = IterBox::new(0, 0, 0, 7, 7, 7);
        let (h, seen, _, _) = collector(None);
        let fut = ChunkedTask::new(bounds, Affinity::Worker, h)
            .with_segment(100)
            .run(&sched, Pace::Queued);
        assert!(sched.drive_until(1000, || fut.status().is_terminal()));
        assert_eq!(fut.status(), TaskStatus::Success);
        assert_eq!(seen.lock().unwrap().len(), 512);
    }

    #[test]
    fn cancel_stops_items_and_skips_pre_complete() {
        let sched = Sched::with_workers(1);
        let bounds = IterBox::new(0, 0, 0, 9, 9, 9);
        let (h, seen, pre, end) = collector(Some(10));
        let fut = ChunkedTask::new(bounds, Affinity::Main, h).run(&sched, Pace::Eager);
        assert_eq!(fut.status(), TaskStatus::Cancelled);
        assert_eq!(fut.message().as_deref(), Some("enough"));
        // staged items survive, iteration stopped where marked
        assert_eq!(seen.lock().unwrap().len(), 10);
        assert_eq!(pre.load(Ordering::SeqCst), 0);
        assert_eq!(end.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_box_succeeds_without_items() {
        let sched = Sched::with_workers(1);
        let bounds = IterBox::new(5, 5, 5, 4, 5, 5);
        let (h, seen, pre, _) = collector(None);
        let fut = ChunkedTask::new(bounds, Affinity::Main, h).run(&sched, Pace::Eager);
        assert_eq!(fut.status(), TaskStatus::Success);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(pre.load(Ordering::SeqCst), 1);
    }
}
