//! Task identity and state (spec.md §3, component B).

/// Task identifiers form a contiguous range 0..map_n+reduce_n-1: map tasks
/// occupy 0..map_n-1, reduce tasks occupy map_n..map_n+reduce_n-1.
pub type TaskId = i64;

/// Marks an idle task, or a just-reset one, as having no assigned worker.
pub const SENTINEL_NONE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    /// Ascending priority: map tasks (0) leave the queue before reduce tasks (1).
    pub fn priority(self) -> i8 {
        match self {
            TaskKind::Map => 0,
            TaskKind::Reduce => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Idle,
    InProgress,
    Done,
    Failed,
}

/// Immutable identity plus mutable status/assignment, as spec.md §3 describes.
/// `index` is the task's position within its own kind (0..map_n-1 for map
/// tasks, 0..reduce_n-1 for reduce tasks) and also the partitioning key.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub index: i32,
    pub mapper_cnt: i32,
    pub reducer_cnt: i32,
    pub status: TaskStatus,
    pub assignment: TaskId,
}

impl Task {
    pub fn new(id: TaskId, kind: TaskKind, index: i32, mapper_cnt: i32, reducer_cnt: i32) -> Self {
        Self {
            id,
            kind,
            index,
            mapper_cnt,
            reducer_cnt,
            status: TaskStatus::Idle,
            assignment: SENTINEL_NONE,
        }
    }

    /// Builds the full map_n + reduce_n task set in identifier order, per
    /// the contiguous-range invariant of spec.md §3.
    pub fn build_all(map_n: i32, reduce_n: i32) -> Vec<Task> {
        let mut tasks = Vec::with_capacity((map_n + reduce_n) as usize);
        for idx in 0..map_n {
            tasks.push(Task::new(idx as TaskId, TaskKind::Map, idx, map_n, reduce_n));
        }
        for idx in 0..reduce_n {
            tasks.push(Task::new(
                (map_n + idx) as TaskId,
                TaskKind::Reduce,
                idx,
                map_n,
                reduce_n,
            ));
        }
        tasks
    }
}
