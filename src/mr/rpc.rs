//! The stable RPC surface (spec.md §6) and the service-dispatch stub
//! (component I) that maps a task's kind to the concrete remote call.
//!
//! REDESIGN FLAG: spec.md's Design Notes call out the original's
//! string-labelled remote-method dispatch as something to re-architect.
//! Here the task kind is a closed two-variant enum and `dispatch_task`
//! pattern-matches on it directly -- no reflection, no method-name strings.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tarpc::{client, context, tokio_serde::formats::Json};

use crate::mr::task::{Task, TaskKind};

#[tarpc::service]
pub trait MapReduceService {
    /// Execute the map task at `req.idx` over `req.file`.
    async fn map(req: TaskRequest) -> TaskOutcome;
    /// Execute the reduce task at `req.idx`, provisioning partitions first.
    async fn reduce(req: TaskRequest) -> TaskOutcome;
    /// Liveness probe; an error (including timeout) condemns the worker.
    async fn status();
    /// Push the current mapper-placement map for `req.file`.
    async fn update_sources(req: UpdateSourcesRequest);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub idx: i32,
    pub mapper_cnt: i32,
    pub reducer_cnt: i32,
    pub file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success,
    Failed,
}

/// partitionIdx -> host address, with the empty string as the "currently
/// unknown" sentinel (spec.md §4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSourcesRequest {
    pub file: String,
    pub hosts: HashMap<i32, String>,
}

/// Dials a fresh connection to `address`; dispatch never pools clients
/// (Design Notes §9) so failures are observable per-worker, not per-socket.
pub async fn dial(address: SocketAddr) -> anyhow::Result<MapReduceServiceClient> {
    let transport = tarpc::serde_transport::tcp::connect(address, Json::default).await?;
    Ok(MapReduceServiceClient::new(client::Config::default(), transport).spawn())
}

/// Dials with an overall timeout, used for the task-dispatch round trip
/// (spec.md §4.G step 4: "dial...with deadline = 10 minutes").
pub async fn dial_with_timeout(
    address: SocketAddr,
    timeout: Duration,
) -> anyhow::Result<MapReduceServiceClient> {
    match tokio::time::timeout(timeout, dial(address)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("dial to {address} timed out")),
    }
}

fn context_with_deadline(timeout: Duration) -> context::Context {
    let mut ctx = context::current();
    ctx.deadline = std::time::SystemTime::now() + timeout;
    ctx
}

/// The 10 minute per-call deadline for `Map`/`Reduce` (spec.md §6).
pub const TASK_DEADLINE: Duration = Duration::from_secs(600);
/// The 200ms per-call deadline for `Status`/`UpdateSources` (spec.md §6).
pub const PROBE_DEADLINE: Duration = Duration::from_millis(200);

/// Service Dispatch Stub (component I): matches the task's kind to its
/// remote method and issues the call under the task deadline.
pub async fn dispatch_task(
    client: &MapReduceServiceClient,
    task: &Task,
    file: &str,
) -> anyhow::Result<TaskOutcome> {
    let ctx = context_with_deadline(TASK_DEADLINE);
    let req = TaskRequest {
        idx: task.index,
        mapper_cnt: task.mapper_cnt,
        reducer_cnt: task.reducer_cnt,
        file: file.to_string(),
    };
    let outcome = match task.kind {
        TaskKind::Map => client.map(ctx, req).await,
        TaskKind::Reduce => client.reduce(ctx, req).await,
    };
    outcome.map_err(Into::into)
}

/// The worker's HTTP data-transfer endpoint (spec.md §6) listens one port
/// above its RPC address, since the two protocols can't share a listener.
/// Both the coordinator (publishing source hosts) and the worker binary
/// (binding the HTTP server) derive it from the same RPC address this way.
pub fn http_address(rpc_address: SocketAddr) -> SocketAddr {
    let mut addr = rpc_address;
    addr.set_port(addr.port() + 1);
    addr
}

/// One-shot liveness probe with the 200ms status deadline (component E).
pub async fn probe_status(address: SocketAddr) -> bool {
    let probe = async {
        let client = dial(address).await?;
        client
            .status(context_with_deadline(PROBE_DEADLINE))
            .await
            .map_err(anyhow::Error::from)
    };
    match tokio::time::timeout(PROBE_DEADLINE, probe).await {
        Ok(Ok(())) => true,
        _ => false,
    }
}

/// Broadcasts the current mapper-placement map to one worker, 200ms
/// deadline, errors silently tolerated by the caller (component G).
pub async fn push_sources(address: SocketAddr, file: String, hosts: HashMap<i32, String>) {
    let attempt = async {
        let client = dial(address).await?;
        client
            .update_sources(
                context_with_deadline(PROBE_DEADLINE),
                UpdateSourcesRequest { file, hosts },
            )
            .await
            .map_err(anyhow::Error::from)
    };
    let _ = tokio::time::timeout(PROBE_DEADLINE, attempt).await;
}
