//! Worker-side shared `tsk2host` map (spec.md §4.H, Design Notes §9).
//!
//! Updated exclusively by `UpdateSources` RPCs from the coordinator and read
//! by every reduce task's provisioner under one mutex, kept co-located here
//! rather than exposed to readers per the Design Notes' "shared mutable
//! maps" guidance.

use std::collections::HashMap;
use std::sync::Mutex;

/// The empty string is the "currently unknown" sentinel spec.md §4.H
/// defines; any non-empty value is authoritative for the current round.
const UNKNOWN_HOST: &str = "";

struct Inner {
    /// file -> (mapperIdx -> host)
    by_file: HashMap<String, HashMap<i32, String>>,
}

pub struct SourceMap {
    inner: Mutex<Inner>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_file: HashMap::new(),
            }),
        }
    }

    /// Applied by `UpdateSources`: replaces the known host for each
    /// `(file, mapperIdx)` pair in `hosts`, sentinel included.
    pub fn update(&self, file: &str, hosts: HashMap<i32, String>) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.by_file.entry(file.to_string()).or_default();
        for (idx, host) in hosts {
            entry.insert(idx, host);
        }
    }

    /// The current host for `(file, mapperIdx)`, or `None` if nothing has
    /// ever been reported or the last report was the unknown sentinel.
    pub fn host(&self, file: &str, mapper_idx: i32) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_file
            .get(file)?
            .get(&mapper_idx)
            .filter(|h| !h.is_empty())
            .cloned()
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        Self::new()
    }
}
