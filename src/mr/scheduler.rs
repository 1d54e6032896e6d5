//! Priority queue + worker stack (component A) wired into the readiness
//! condition variable the dispatcher fibers wait on (component F).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::mr::task::TaskId;
use crate::mr::worker_info::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    priority: i8,
    task_id: TaskId,
}

struct Inner {
    queue: BinaryHeap<Reverse<QueueEntry>>,
    idle_workers: Vec<WorkerId>,
}

impl Inner {
    fn has_ready_task(&self) -> bool {
        !self.queue.is_empty() && !self.idle_workers.is_empty()
    }
}

/// Owns the ready-task queue and the idle-worker stack behind one mutex,
/// with a `Notify` standing in for the condition variable spec.md §4.F
/// and §5 describe: producers notify only after the lock that guards the
/// predicate is released, and a shutdown broadcast wakes every waiter.
pub struct Scheduler {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: BinaryHeap::new(),
                idle_workers: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn add_task(&self, task_id: TaskId, priority: i8) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.queue.push(Reverse(QueueEntry { priority, task_id }));
        }
        self.notify.notify_waiters();
    }

    /// Most recently freed worker goes on top, so it is dispatched first
    /// (LIFO, favors warm remote-side caches per spec.md §4.A).
    pub fn add_worker(&self, worker_id: WorkerId) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.idle_workers.push(worker_id);
        }
        self.notify.notify_waiters();
    }

    pub fn has_ready_task(&self) -> bool {
        self.inner.lock().unwrap().has_ready_task()
    }

    /// Pops one task and one worker under the lock. Returns `None` if the
    /// queue or the worker stack emptied between the caller's readiness
    /// check and this call (another dispatcher may have won the race).
    pub fn next_task(&self) -> Option<(TaskId, WorkerId)> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.has_ready_task() {
            return None;
        }
        let Reverse(entry) = inner.queue.pop().expect("queue checked nonempty");
        let worker_id = inner
            .idle_workers
            .pop()
            .expect("worker stack checked nonempty");
        Some((entry.task_id, worker_id))
    }

    /// Waits until `hasReadyTask()` holds or `done` is set, whichever first.
    ///
    /// `Notify::notified()` does not register the waiter until its future
    /// is first polled, and `notify_waiters()` wakes only waiters already
    /// registered at the time it is called -- it stores no permit. Pinning
    /// the `Notified` future and calling `enable()` on it registers the
    /// waiter immediately, before the predicate is checked, so a
    /// broadcast landing between the check and the await is never lost.
    pub async fn wait_for_ready(&self, done: &AtomicBool) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if done.load(Ordering::Acquire) {
                return false;
            }
            if self.has_ready_task() {
                return true;
            }
            notified.await;
        }
    }

    /// Broadcasts to every waiting dispatcher fiber so shutdown latency is
    /// bounded by a single wakeup (spec.md §4.F / §5).
    pub fn shutdown(&self) {
        self.notify.notify_waiters();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_tasks_dispatch_before_reduce_tasks() {
        let s = Scheduler::new();
        s.add_task(10, 1); // reduce
        s.add_task(11, 1); // reduce
        s.add_task(0, 0); // map
        s.add_worker(1);
        s.add_worker(2);
        s.add_worker(3);

        let (t1, _) = s.next_task().unwrap();
        assert_eq!(t1, 0, "map task must dispatch first");
        let (t2, _) = s.next_task().unwrap();
        assert!(t2 == 10 || t2 == 11);
        let (t3, _) = s.next_task().unwrap();
        assert!(t3 == 10 || t3 == 11);
        assert_ne!(t2, t3);
    }

    #[test]
    fn no_ready_task_without_both_task_and_worker() {
        let s = Scheduler::new();
        assert!(!s.has_ready_task());
        s.add_task(0, 0);
        assert!(!s.has_ready_task());
        s.add_worker(1);
        assert!(s.has_ready_task());
        assert!(s.next_task().is_some());
        assert!(!s.has_ready_task());
    }

    #[test]
    fn worker_stack_is_lifo() {
        let s = Scheduler::new();
        s.add_task(0, 0);
        s.add_task(1, 0);
        s.add_worker(1);
        s.add_worker(2);
        let (_, w) = s.next_task().unwrap();
        assert_eq!(w, 2, "most recently freed worker dispatches first");
    }

    #[tokio::test]
    async fn wait_for_ready_wakes_on_add_task() {
        let s = std::sync::Arc::new(Scheduler::new());
        s.add_worker(1);
        let done = std::sync::Arc::new(AtomicBool::new(false));

        let waiter = {
            let s = s.clone();
            let done = done.clone();
            tokio::spawn(async move { s.wait_for_ready(&done).await })
        };
        tokio::task::yield_now().await;
        s.add_task(5, 0);

        let ready = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("dispatcher should wake up promptly")
            .unwrap();
        assert!(ready);
    }

    #[tokio::test]
    async fn wait_for_ready_returns_false_on_shutdown() {
        let s = std::sync::Arc::new(Scheduler::new());
        let done = std::sync::Arc::new(AtomicBool::new(false));

        let waiter = {
            let s = s.clone();
            let done = done.clone();
            tokio::spawn(async move { s.wait_for_ready(&done).await })
        };
        tokio::task::yield_now().await;
        done.store(true, Ordering::Release);
        s.shutdown();

        let ready = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("shutdown must wake waiters")
            .unwrap();
        assert!(!ready);
    }
}
