//! Worker identity and liveness (spec.md §3, component C).

use std::net::SocketAddr;

pub type WorkerId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    Dead,
}

/// Immutable identifier + address, mutable liveness. Liveness is monotone:
/// once `Dead`, a worker is condemned for the rest of the job.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub address: SocketAddr,
    pub liveness: Liveness,
}

impl WorkerRecord {
    pub fn new(id: WorkerId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            liveness: Liveness::Healthy,
        }
    }
}
