//! Tasks Manager (component D): owns the task state machine and resolves
//! worker loss into task failure (spec.md §4.D).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::mr::rpc::TaskOutcome;
use crate::mr::task::{Task, TaskId, TaskKind, TaskStatus, SENTINEL_NONE};
use crate::mr::worker_info::{Liveness, WorkerId};

struct Inner {
    tasks: HashMap<TaskId, Task>,
    worker_to_tasks: HashMap<WorkerId, HashSet<TaskId>>,
    reduce_tasks_left: i32,
}

pub struct TasksManager {
    inner: Mutex<Inner>,
}

impl TasksManager {
    pub fn new(map_n: i32, reduce_n: i32) -> Self {
        let tasks = Task::build_all(map_n, reduce_n)
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                tasks,
                worker_to_tasks: HashMap::new(),
                reduce_tasks_left: reduce_n,
            }),
        }
    }

    /// Precondition: `task_id` exists and is idle. Violating it is a
    /// programmer error (spec.md §4.D), so this panics rather than
    /// returning a recoverable error.
    pub fn assign_worker_to_task(&self, worker_id: WorkerId, task_id: TaskId) {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(&task_id)
            .unwrap_or_else(|| panic!("assignWorkerToTask: task {task_id} does not exist"));
        assert_eq!(
            task.status,
            TaskStatus::Idle,
            "assignWorkerToTask: task {task_id} is not idle"
        );
        task.status = TaskStatus::InProgress;
        task.assignment = worker_id;
        inner
            .worker_to_tasks
            .entry(worker_id)
            .or_default()
            .insert(task_id);
    }

    pub fn task(&self, task_id: TaskId) -> Task {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .get(&task_id)
            .unwrap_or_else(|| panic!("task {task_id} does not exist"))
            .clone()
    }

    pub fn reduce_tasks_left(&self) -> i32 {
        self.inner.lock().unwrap().reduce_tasks_left
    }

    /// On `Success`, the task becomes `Done` (terminal) and, if it is a
    /// reduce task, the outstanding-reducer counter drops by one. On
    /// `Failed`, it is detached from its worker's reverse index and
    /// becomes `Failed` (picked back up by `updated_tasks_status`).
    pub fn update_task_status(&self, outcome: TaskOutcome, task_id: TaskId) {
        let mut inner = self.inner.lock().unwrap();
        match outcome {
            TaskOutcome::Success => {
                let task = inner
                    .tasks
                    .get_mut(&task_id)
                    .unwrap_or_else(|| panic!("task {task_id} does not exist"));
                task.status = TaskStatus::Done;
                if task.kind == TaskKind::Reduce {
                    inner.reduce_tasks_left -= 1;
                }
            }
            TaskOutcome::Failed => {
                let worker_id = {
                    let task = inner
                        .tasks
                        .get_mut(&task_id)
                        .unwrap_or_else(|| panic!("task {task_id} does not exist"));
                    let worker_id = task.assignment;
                    task.status = TaskStatus::Failed;
                    task.assignment = SENTINEL_NONE;
                    worker_id
                };
                if worker_id != SENTINEL_NONE {
                    if let Some(set) = inner.worker_to_tasks.get_mut(&worker_id) {
                        set.remove(&task_id);
                    }
                }
            }
        }
    }

    /// The central reconciliation operation (spec.md §4.D). For every
    /// worker reported non-healthy, every task still `InProgress` on it
    /// transitions to `Failed`. A completed *map* task assigned to that
    /// worker is invalidated the same way: its partition lives only on
    /// the producing worker's local disk, so once that worker is
    /// condemned the partition is unrecoverable and the task must be
    /// redone -- this is what spec.md §8 S2 describes ("sets the map-0
    /// task to failed") even though map-0 had already finished. A
    /// completed *reduce* task is left untouched: it has already
    /// contributed to `reduceTasksLeft` and has no further producer-side
    /// dependency. Then takes a snapshot of every task's status and, as a
    /// side effect, resets every `Failed` task back to `Idle` so the
    /// scheduler may re-enqueue it. The returned snapshot retains the
    /// pre-reset `Failed` value so the caller knows which tasks to
    /// re-enqueue.
    pub fn updated_tasks_status(
        &self,
        worker_statuses: &HashMap<WorkerId, Liveness>,
    ) -> HashMap<TaskId, TaskStatus> {
        let mut inner = self.inner.lock().unwrap();

        for (&worker_id, &liveness) in worker_statuses {
            if liveness != Liveness::Dead {
                continue;
            }
            let assigned: Vec<TaskId> = inner
                .worker_to_tasks
                .get(&worker_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for task_id in assigned {
                let mut detach = false;
                if let Some(task) = inner.tasks.get_mut(&task_id) {
                    let invalidate = match task.status {
                        TaskStatus::InProgress => true,
                        TaskStatus::Done if task.kind == TaskKind::Map => true,
                        _ => false,
                    };
                    if invalidate {
                        task.status = TaskStatus::Failed;
                        task.assignment = SENTINEL_NONE;
                        detach = true;
                    }
                }
                if detach {
                    if let Some(set) = inner.worker_to_tasks.get_mut(&worker_id) {
                        set.remove(&task_id);
                    }
                }
            }
        }

        let mut snapshot = HashMap::with_capacity(inner.tasks.len());
        for task in inner.tasks.values_mut() {
            snapshot.insert(task.id, task.status);
            if task.status == TaskStatus::Failed {
                task.status = TaskStatus::Idle;
            }
        }

        inner.reduce_tasks_left = inner
            .tasks
            .values()
            .filter(|t| t.kind == TaskKind::Reduce && t.status != TaskStatus::Done)
            .count() as i32;

        snapshot
    }

    /// For each map-task index, the worker that completed it, used by the
    /// data-source propagation routine (component G) to build the
    /// partitionIndex -> host map. Absent entries mean "not yet completed".
    pub fn completed_map_assignments(&self) -> HashMap<i32, WorkerId> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .values()
            .filter(|t| t.kind == TaskKind::Map && t.status == TaskStatus::Done)
            .map(|t| (t.index, t.assignment))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_implies_no_assignment() {
        let tm = TasksManager::new(2, 1);
        let t = tm.task(0);
        assert_eq!(t.status, TaskStatus::Idle);
        assert_eq!(t.assignment, SENTINEL_NONE);
    }

    #[test]
    fn assign_then_success_marks_done_and_decrements_reduce_left() {
        let tm = TasksManager::new(1, 1);
        // task id 1 is the sole reduce task (map_n=1)
        tm.assign_worker_to_task(7, 1);
        assert_eq!(tm.reduce_tasks_left(), 1);
        tm.update_task_status(TaskOutcome::Success, 1);
        assert_eq!(tm.task(1).status, TaskStatus::Done);
        assert_eq!(tm.reduce_tasks_left(), 0);
    }

    #[test]
    #[should_panic(expected = "is not idle")]
    fn assigning_non_idle_task_is_fatal() {
        let tm = TasksManager::new(1, 0);
        tm.assign_worker_to_task(1, 0);
        tm.assign_worker_to_task(2, 0);
    }

    #[test]
    fn worker_death_fails_in_progress_tasks_and_resets_to_idle() {
        let tm = TasksManager::new(2, 1);
        tm.assign_worker_to_task(1, 0); // map 0 -> worker 1, in progress

        let mut statuses = HashMap::new();
        statuses.insert(1, Liveness::Dead);
        let snapshot = tm.updated_tasks_status(&statuses);

        assert_eq!(snapshot[&0], TaskStatus::Failed);
        // side effect: failed task 0 was reset back to idle for re-enqueue
        let t0 = tm.task(0);
        assert_eq!(t0.status, TaskStatus::Idle);
        assert_eq!(t0.assignment, SENTINEL_NONE);
    }

    #[test]
    fn worker_death_invalidates_a_completed_map_task_for_re_execution() {
        // The producing worker's local disk is what holds a completed map
        // task's partitions; once it is condemned, that partition is gone
        // and the task must be redone (spec.md §8 S2).
        let tm = TasksManager::new(2, 1);
        tm.assign_worker_to_task(1, 0); // map 0 -> worker 1
        tm.update_task_status(TaskOutcome::Success, 0); // map 0 done

        let statuses = HashMap::from([(1, Liveness::Dead)]);
        let snapshot = tm.updated_tasks_status(&statuses);

        assert_eq!(snapshot[&0], TaskStatus::Failed);
        let t0 = tm.task(0);
        assert_eq!(t0.status, TaskStatus::Idle);
        assert_eq!(t0.assignment, SENTINEL_NONE);
    }

    #[test]
    fn worker_death_leaves_a_completed_reduce_task_done() {
        // A finished reduce task has already contributed to
        // `reduceTasksLeft` and has no further dependency on its worker.
        let tm = TasksManager::new(0, 1);
        tm.assign_worker_to_task(1, 0); // reduce 0 -> worker 1
        tm.update_task_status(TaskOutcome::Success, 0); // reduce 0 done

        let statuses = HashMap::from([(1, Liveness::Dead)]);
        let snapshot = tm.updated_tasks_status(&statuses);

        assert_eq!(snapshot[&0], TaskStatus::Done);
        let t0 = tm.task(0);
        assert_eq!(t0.status, TaskStatus::Done);
        assert_eq!(t0.assignment, 1);
    }

    #[test]
    fn reduce_tasks_left_matches_cardinality_after_reconciliation() {
        let tm = TasksManager::new(1, 2);
        tm.assign_worker_to_task(1, 1);
        tm.assign_worker_to_task(1, 2);
        tm.update_task_status(TaskOutcome::Success, 1);
        let statuses = HashMap::from([(1, Liveness::Dead)]);
        tm.updated_tasks_status(&statuses);
        assert_eq!(tm.reduce_tasks_left(), 1);
    }

    #[test]
    fn success_is_not_double_counted_on_repeated_reconciliation() {
        let tm = TasksManager::new(0, 1);
        tm.assign_worker_to_task(1, 0);
        tm.update_task_status(TaskOutcome::Success, 0);
        assert_eq!(tm.reduce_tasks_left(), 0);
        tm.updated_tasks_status(&HashMap::new());
        tm.updated_tasks_status(&HashMap::new());
        assert_eq!(tm.reduce_tasks_left(), 0);
    }
}
