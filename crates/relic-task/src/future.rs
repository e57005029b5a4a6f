use std::sync::{Arc, Mutex};

/// Terminal states carry an optional human-readable message; asynchronous
/// outcomes are always reported this way, never by unwinding across the
/// task boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Success,
    Cancelled,
    Failed,
}

impl TaskStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, TaskStatus::Success)
    }
}

type DoneFn = Box<dyn FnOnce(TaskStatus, Option<&str>) + Send>;

struct Inner {
    status: TaskStatus,
    message: Option<String>,
    subscribers: Vec<DoneFn>,
}

/// Completion handle observers hold. Cloning shares the same settlement.
#[derive(Clone)]
pub struct TaskFuture {
    inner: Arc<Mutex<Inner>>,
}

/// Settling side of a [`TaskFuture`]. The first settle wins; later calls
/// are ignored.
#[derive(Clone)]
pub struct TaskCtl {
    inner: Arc<Mutex<Inner>>,
}

impl TaskFuture {
    pub fn new() -> (TaskFuture, TaskCtl) {
        let inner = Arc::new(Mutex::new(Inner {
            status: TaskStatus::Pending,
            message: None,
            subscribers: Vec::new(),
        }));
        (
            TaskFuture {
                inner: inner.clone(),
            },
            TaskCtl { inner },
        )
    }

    /// An already-failed future, for precondition rejections that never
    /// start a task.
    pub fn failed(message: impl Into<String>) -> TaskFuture {
        let (fut, ctl) = TaskFuture::new();
        ctl.fail(message);
        fut
    }

    pub fn succeeded() -> TaskFuture {
        let (fut, ctl) = TaskFuture::new();
        ctl.succeed();
        fut
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().unwrap().status
    }

    pub fn message(&self) -> Option<String> {
        self.inner.lock().unwrap().message.clone()
    }

    /// Fires on any terminal status. Subscribing after settlement fires
    /// immediately.
    pub fn on_done<F>(&self, f: F)
    where
        F: FnOnce(TaskStatus, Option<&str>) + Send + 'static,
    {
        let mut f = Some(f);
        let settled = {
            let mut g = self.inner.lock().unwrap();
            if g.status.is_terminal() {
                Some((g.status, g.message.clone()))
            } else {
                g.subscribers.push(Box::new(f.take().unwrap()));
                None
            }
        };
        if let (Some((status, msg)), Some(f)) = (settled, f.take()) {
            f(status, msg.as_deref());
        }
    }

    pub fn on_success<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_done(move |status, _| {
            if status.is_success() {
                f();
            }
        });
    }

    pub fn on_failure<F>(&self, f: F)
    where
        F: FnOnce(TaskStatus, Option<&str>) + Send + 'static,
    {
        self.on_done(move |status, msg| {
            if !status.is_success() {
                f(status, msg);
            }
        });
    }
}

impl TaskCtl {
    pub fn status(&self) -> TaskStatus {
        self.inner.lock().unwrap().status
    }

    /// Low-level settle. Returns false when the future was already terminal.
    pub fn settle(&self, status: TaskStatus, message: Option<String>) -> bool {
        debug_assert!(status.is_terminal());
        let subscribers = {
            let mut g = self.inner.lock().unwrap();
            if g.status.is_terminal() {
                return false;
            }
            g.status = status;
            g.message = message.clone();
            std::mem::take(&mut g.subscribers)
        };
        for sub in subscribers {
            sub(status, message.as_deref());
        }
        true
    }

    pub fn succeed(&self) -> bool {
        self.settle(TaskStatus::Success, None)
    }

    /// Cooperative cancellation. Work already staged by the task is NOT
    /// rolled back; only further iteration stops.
    pub fn cancel(&self, message: impl Into<String>) -> bool {
        self.settle(TaskStatus::Cancelled, Some(message.into()))
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.settle(TaskStatus::Failed, Some(message.into()))
    }
}

/// Aggregates child futures into one: terminal once every child is,
/// successful only when all children succeeded. The first non-success
/// child's status and message win.
pub fn project(children: &[TaskFuture]) -> TaskFuture {
    let (fut, ctl) = TaskFuture::new();
    if children.is_empty() {
        ctl.succeed();
        return fut;
    }
    struct Agg {
        remaining: usize,
        worst: Option<(TaskStatus, Option<String>)>,
    }
    let agg = Arc::new(Mutex::new(Agg {
        remaining: children.len(),
        worst: None,
    }));
    for child in children {
        let agg = agg.clone();
        let ctl = ctl.clone();
        child.on_done(move |status, msg| {
            let mut g = agg.lock().unwrap();
            if !status.is_success() && g.worst.is_none() {
                g.worst = Some((status, msg.map(str::to_string)));
            }
            g.remaining -= 1;
            let finished = g.remaining == 0;
            let worst = if finished { g.worst.take() } else { None };
            drop(g);
            if finished {
                match worst {
                    None => {
                        ctl.succeed();
                    }
                    Some((status, msg)) => {
                        ctl.settle(status, msg);
                    }
                }
            }
        });
    }
    fut
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_settle_wins() {
        let (fut, ctl) = TaskFuture::new();
        assert!(ctl.fail("boom"));
        assert!(!ctl.succeed());
        assert_eq!(fut.status(), TaskStatus::Failed);
        assert_eq!(fut.message().as_deref(), Some("boom"));
    }

    #[test]
    fn late_subscription_fires_immediately() {
        let fut = TaskFuture::failed("nope");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        fut.on_failure(move |status, msg| {
            assert_eq!(status, TaskStatus::Failed);
            assert_eq!(msg, Some("nope"));
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn success_subscribers_skip_failures() {
        let (fut, ctl) = TaskFuture::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        fut.on_success(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        ctl.cancel("stop");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn project_waits_for_all_children() {
        let (a, actl) = TaskFuture::new();
        let (b, bctl) = TaskFuture::new();
        let agg = project(&[a, b]);
        actl.succeed();
        assert_eq!(agg.status(), TaskStatus::Pending);
        bctl.succeed();
        assert_eq!(agg.status(), TaskStatus::Success);
    }

    #[test]
    fn project_reports_first_non_success() {
        let (a, actl) = TaskFuture::new();
        let (b, bctl) = TaskFuture::new();
        let agg = project(&[a, b]);
        actl.cancel("first out");
        bctl.fail("second out");
        assert_eq!(agg.status(), TaskStatus::Cancelled);
        assert_eq!(agg.message().as_deref(), Some("first out"));
    }

    #[test]
    fn project_of_nothing_succeeds() {
        assert_eq!(project(&[]).status(), TaskStatus::Success);
    }
}
