//! Coordinator control loop (component G): dispatch fibers, periodic
//! health sweep, rescheduling, termination, data-source propagation
//! (spec.md §4.G).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::mr::retry::Backoff;
use crate::mr::rpc;
use crate::mr::scheduler::Scheduler;
use crate::mr::task::{TaskId, TaskStatus};
use crate::mr::tasks_manager::TasksManager;
use crate::mr::worker_info::{WorkerId, WorkerRecord};
use crate::mr::workers_manager::WorkersManager;

/// Dispatcher fibers sleep on the scheduler's condvar or the RPC round
/// trip; at most this many run concurrently (spec.md §2: "min(20, W)").
const MAX_DISPATCHERS: usize = 20;
/// Supervisor sweep cadence (spec.md §4.G).
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

pub struct Coordinator {
    tasks: Arc<TasksManager>,
    workers: Arc<WorkersManager>,
    scheduler: Arc<Scheduler>,
    input_file: String,
    map_n: i32,
    done: Arc<AtomicBool>,
}

impl Coordinator {
    /// Builds the job: handshakes with every address (dropping unreachable
    /// ones), builds the M+R task set, and seeds the scheduler with all
    /// tasks and all reachable workers. Fails if no worker answers the
    /// handshake (spec.md §7: "no workers reachable").
    ///
    /// `map_n` is always 1 for the `mrcoordinator` binary (one input file,
    /// spec.md §6); it is a parameter here rather than hard-coded so the
    /// scheduling/recovery engine stays testable against multi-mapper
    /// scenarios (spec.md §8 S2/S3) without going through the CLI.
    pub async fn new(
        input_file: String,
        map_n: i32,
        reduce_n: i32,
        addresses: Vec<SocketAddr>,
    ) -> anyhow::Result<Self> {
        let mut reachable = Vec::new();
        for addr in addresses {
            if handshake(addr).await {
                reachable.push(addr);
            } else {
                tracing::warn!(%addr, "worker unreachable at startup, dropping");
            }
        }
        anyhow::ensure!(!reachable.is_empty(), "no workers reachable");

        let workers: Vec<WorkerRecord> = reachable
            .into_iter()
            .enumerate()
            .map(|(i, addr)| WorkerRecord::new(i as WorkerId, addr))
            .collect();
        tracing::info!(count = workers.len(), "workers connected");

        let tasks = Arc::new(TasksManager::new(map_n, reduce_n));
        let workers = Arc::new(WorkersManager::new(workers));
        let scheduler = Arc::new(Scheduler::new());

        for task_id in 0..(map_n + reduce_n) as TaskId {
            let task = tasks.task(task_id);
            scheduler.add_task(task.id, task.kind.priority());
        }
        for worker_id in workers.all_ids() {
            scheduler.add_worker(worker_id);
        }

        Ok(Self {
            tasks,
            workers,
            scheduler,
            input_file,
            map_n,
            done: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs until every reduce task is done (success) or every worker is
    /// condemned (fatal abort, per spec.md §7).
    pub async fn run(self) -> anyhow::Result<()> {
        let this = Arc::new(self);
        let dispatcher_n = std::cmp::min(MAX_DISPATCHERS, this.workers.active_workers() as usize);
        tracing::info!(dispatcher_n, "launching dispatcher fibers");

        let mut dispatchers = Vec::with_capacity(dispatcher_n);
        for _ in 0..dispatcher_n {
            let this = this.clone();
            dispatchers.push(tokio::spawn(async move { this.dispatcher_loop().await }));
        }

        let result = this.supervisor_loop().await;
        this.scheduler.shutdown();
        for handle in dispatchers {
            let _ = handle.await;
        }
        result
    }

    async fn dispatcher_loop(self: Arc<Self>) {
        loop {
            if !self.scheduler.wait_for_ready(&self.done).await {
                return;
            }
            let Some((task_id, worker_id)) = self.scheduler.next_task() else {
                continue;
            };
            self.tasks.assign_worker_to_task(worker_id, task_id);
            let task = self.tasks.task(task_id);

            let Some(address) = self.workers.address(worker_id) else {
                continue;
            };

            let client = match rpc::dial_with_timeout(address, rpc::TASK_DEADLINE).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(worker_id, %address, error = %e, "dial failed, condemning worker");
                    self.workers.report_failed_worker(worker_id);
                    // Spec.md §4.G step 4: do not re-enqueue the worker or
                    // the task here; the next sweep reconciles.
                    continue;
                }
            };

            match rpc::dispatch_task(&client, &task, &self.input_file).await {
                Ok(outcome) => {
                    tracing::info!(task_id, worker_id, ?outcome, "task completed");
                    self.tasks.update_task_status(outcome, task_id);
                    // The worker stays eligible regardless of the task's
                    // own outcome (spec.md §4.G step 8).
                    self.scheduler.add_worker(worker_id);
                }
                Err(e) => {
                    tracing::warn!(task_id, worker_id, error = %e, "transport error, condemning worker");
                    self.workers.report_failed_worker(worker_id);
                }
            }
        }
    }

    async fn supervisor_loop(&self) -> anyhow::Result<()> {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;

            if self.workers.active_workers() == 0 {
                anyhow::bail!("no workers left");
            }

            let worker_snapshot = self.workers.updated_workers_status().await;
            let task_snapshot = self.tasks.updated_tasks_status(&worker_snapshot);

            for (&task_id, &status) in &task_snapshot {
                if status == TaskStatus::Failed {
                    let task = self.tasks.task(task_id);
                    tracing::info!(task_id, "re-enqueuing task after worker loss");
                    self.scheduler.add_task(task_id, task.kind.priority());
                }
            }

            if self.tasks.reduce_tasks_left() == 0 {
                tracing::info!("all reduce tasks done, job finished");
                self.done.store(true, Ordering::Release);
                return Ok(());
            }

            self.propagate_sources().await;
        }
    }

    /// Broadcasts the current mapper-placement map to every non-dead
    /// worker (spec.md §4.G "data-source propagation"). Errors are
    /// silently tolerated: the next sweep retries.
    ///
    /// A partition whose producing worker has since been condemned is
    /// published as the empty sentinel rather than that worker's (now
    /// unreachable) address: `completed_map_assignments` already excludes
    /// a completed map task once `updated_tasks_status` has reconciled its
    /// worker's death (it resets the task for re-execution), but checking
    /// liveness here too means a reducer never gets pointed at a dead host
    /// even within the same sweep's ordering.
    async fn propagate_sources(&self) {
        let assignments = self.tasks.completed_map_assignments();
        let mut hosts: HashMap<i32, String> = HashMap::with_capacity(self.map_n as usize);
        for idx in 0..self.map_n {
            let host = assignments
                .get(&idx)
                .filter(|&&worker_id| self.workers.is_alive(worker_id))
                .and_then(|&worker_id| self.workers.address(worker_id))
                .map(|addr| rpc::http_address(addr).to_string())
                .unwrap_or_default();
            hosts.insert(idx, host);
        }

        let targets = self.workers.non_dead_addresses();
        let broadcasts = targets
            .into_iter()
            .map(|addr| rpc::push_sources(addr, self.input_file.clone(), hosts.clone()));
        join_all(broadcasts).await;
    }
}

/// Worker handshake (spec.md §3 "Lifecycle"): retries with exponential
/// backoff, initial delay 1ms, doubling, at most 17 attempts.
async fn handshake(address: SocketAddr) -> bool {
    let mut backoff = Backoff::new();
    loop {
        if rpc::dial(address).await.is_ok() {
            return true;
        }
        if backoff.attempts_exhausted() {
            return false;
        }
        backoff.wait().await;
    }
}
