use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use rayon::{ThreadPool, ThreadPoolBuilder};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Tick-bucketed queue for the main simulation context. All live-world
/// mutation jobs land here; whoever owns the simulation loop calls
/// [`TickQueue::pump`] once per tick.
pub struct TickQueue {
    inner: Mutex<TickState>,
}

struct TickState {
    now: u64,
    by_tick: BTreeMap<u64, VecDeque<Job>>,
}

impl Default for TickQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::new(TickState {
                now: 0,
                by_tick: BTreeMap::new(),
            }),
        }
    }
}

impl TickQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.inner.lock().unwrap().now
    }

    pub fn run_after(&self, delay: u64, job: impl FnOnce() + Send + 'static) {
        let mut g = self.inner.lock().unwrap();
        let at = g.now + delay;
        g.by_tick.entry(at).or_default().push_back(Box::new(job));
    }

    pub fn run_now(&self, job: impl FnOnce() + Send + 'static) {
        self.run_after(0, job);
    }

    /// Runs every job due at the current tick (including ones they enqueue
    /// for this same tick), then advances. Returns how many jobs ran.
    pub fn pump(&self) -> usize {
        let mut ran = 0usize;
        loop {
            let job = {
                let mut g = self.inner.lock().unwrap();
                let now = g.now;
                match g.by_tick.get_mut(&now).and_then(VecDeque::pop_front) {
                    Some(job) => Some(job),
                    None => {
                        g.by_tick.remove(&now);
                        g.now += 1;
                        None
                    }
                }
            };
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

/// Background workers: a crossbeam channel drained by a named rayon pool.
pub struct WorkerPool {
    tx: Sender<Job>,
    _pool: Arc<ThreadPool>,
    pub workers: usize,
}

impl WorkerPool {
    /// `workers == 0` sizes from available parallelism, keeping one core
    /// for the main context.
    pub fn new(name: &str, workers: usize) -> Self {
        let workers = if workers == 0 {
            thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(2)
                .max(1)
        } else {
            workers
        };
        let (tx, rx) = unbounded::<Job>();
        let label = name.to_string();
        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(move |i| format!("{label}-{i}"))
                .build()
                .expect("worker pool"),
        );
        for _ in 0..workers {
            let rx = rx.clone();
            pool.spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            });
        }
        Self {
            tx,
            _pool: pool,
            workers,
        }
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(job));
    }
}

/// The two execution contexts engines schedule onto.
#[derive(Clone)]
pub struct Sched {
    pub main: Arc<TickQueue>,
    pub workers: Arc<WorkerPool>,
}

impl Sched {
    pub fn new() -> Self {
        Self::with_workers(0)
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            main: Arc::new(TickQueue::new()),
            workers: Arc::new(WorkerPool::new("relic-worker", workers)),
        }
    }

    pub fn run_main_after(&self, delay: u64, job: impl FnOnce() + Send + 'static) {
        self.main.run_after(delay, job);
    }

    pub fn run_worker(&self, job: impl FnOnce() + Send + 'static) {
        self.workers.submit(job);
    }

    /// Pumps the main queue until `done()` holds or `max_ticks` pass.
    /// Returns whether the condition was reached. Demo/test driver.
    pub fn drive_until(&self, max_ticks: u64, done: impl Fn() -> bool) -> bool {
        for _ in 0..max_ticks {
            if done() {
                return true;
            }
            self.main.pump();
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }
}

impl Default for Sched {
    fn default() -> Self {
        Self::new()
    }
}
