//! Workers Manager (component E): liveness probing and the active-count
//! invariant (spec.md §4.E).
//!
//! Open Question 2 flags a source variant where the active-count
//! decrement for a condemned worker is not atomic with the liveness
//! transition. Here both live behind the same lock, acquired once, so the
//! transition is always atomic.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use futures::future::join_all;

use crate::mr::rpc;
use crate::mr::worker_info::{Liveness, WorkerId, WorkerRecord};

struct Inner {
    workers: HashMap<WorkerId, WorkerRecord>,
    active_count: i32,
}

pub struct WorkersManager {
    inner: Mutex<Inner>,
}

impl WorkersManager {
    pub fn new(workers: Vec<WorkerRecord>) -> Self {
        let active_count = workers.len() as i32;
        let workers = workers.into_iter().map(|w| (w.id, w)).collect();
        Self {
            inner: Mutex::new(Inner {
                workers,
                active_count,
            }),
        }
    }

    pub fn active_workers(&self) -> i32 {
        self.inner.lock().unwrap().active_count
    }

    pub fn address(&self, worker_id: WorkerId) -> Option<SocketAddr> {
        self.inner
            .lock()
            .unwrap()
            .workers
            .get(&worker_id)
            .map(|w| w.address)
    }

    pub fn all_ids(&self) -> Vec<WorkerId> {
        self.inner.lock().unwrap().workers.keys().copied().collect()
    }

    /// Whether `worker_id` is known and not (yet) condemned. Used to keep
    /// data published about a worker's output (e.g. mapper placement)
    /// from outliving the liveness transition that invalidates it.
    pub fn is_alive(&self, worker_id: WorkerId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .workers
            .get(&worker_id)
            .is_some_and(|w| w.liveness != Liveness::Dead)
    }

    pub fn non_dead_addresses(&self) -> Vec<SocketAddr> {
        self.inner
            .lock()
            .unwrap()
            .workers
            .values()
            .filter(|w| w.liveness != Liveness::Dead)
            .map(|w| w.address)
            .collect()
    }

    /// Transitions `worker_id` to dead, exactly once. The active-count
    /// decrement happens under the same lock acquisition as the liveness
    /// write, so the two can never be observed out of sync.
    pub fn report_failed_worker(&self, worker_id: WorkerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(worker) = inner.workers.get_mut(&worker_id) {
            if worker.liveness != Liveness::Dead {
                worker.liveness = Liveness::Dead;
                inner.active_count -= 1;
            }
        }
    }

    /// Fans out one-shot status probes to every non-dead worker (200ms
    /// deadline each), then condemns anyone who failed to answer, and
    /// recomputes the active count by scanning. Returns a snapshot of
    /// every worker's post-sweep liveness.
    pub async fn updated_workers_status(&self) -> HashMap<WorkerId, Liveness> {
        let targets: Vec<(WorkerId, SocketAddr)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .workers
                .values()
                .filter(|w| w.liveness != Liveness::Dead)
                .map(|w| (w.id, w.address))
                .collect()
        };

        let probes = join_all(targets.into_iter().map(|(id, addr)| async move {
            let alive = rpc::probe_status(addr).await;
            (id, alive)
        }))
        .await;

        let mut inner = self.inner.lock().unwrap();
        for (id, alive) in probes {
            if !alive {
                if let Some(worker) = inner.workers.get_mut(&id) {
                    if worker.liveness != Liveness::Dead {
                        worker.liveness = Liveness::Dead;
                    }
                }
            }
        }
        inner.active_count = inner
            .workers
            .values()
            .filter(|w| w.liveness == Liveness::Healthy)
            .count() as i32;

        inner.workers.iter().map(|(id, w)| (*id, w.liveness)).collect()
    }
}
