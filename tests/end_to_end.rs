//! End-to-end scenarios from spec.md §8 ("End-to-end scenarios"), driving
//! real `Coordinator`/`WorkerService` instances over loopback TCP instead of
//! mocking the RPC layer.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

use futures::StreamExt;
use map_reduce_rs::mr::coordinator::Coordinator;
use map_reduce_rs::mr::rpc::{self, MapReduceService};
use map_reduce_rs::mr::worker::WorkerService;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Json;

async fn spawn_fut(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

#[tokio::test]
async fn happy_path_word_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("pg-0.txt");
    tokio::fs::write(&input, "a b a\nc a\n").await.unwrap();

    // Bind RPC first, then HTTP on rpc_port + 1, matching the binary's
    // fixed offset (`rpc::http_address`) since the coordinator publishes
    // HTTP hosts derived from the RPC address it dialed.
    let (addr1, worker1) = spawn_worker_pair(tmp.path(), "w1").await;
    let (addr2, worker2) = spawn_worker_pair(tmp.path(), "w2").await;

    let coordinator = Coordinator::new(
        input.to_string_lossy().to_string(),
        1,
        2,
        vec![addr1, addr2],
    )
    .await
    .expect("both workers should be reachable");

    coordinator.run().await.expect("job should succeed");

    let mut lines = Vec::new();
    for worker in [&worker1, &worker2] {
        for entry in std::fs::read_dir(worker.join("reducer")).unwrap() {
            let path = entry.unwrap().path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("mr-out-"))
            {
                let contents = std::fs::read_to_string(&path).unwrap();
                lines.extend(contents.lines().map(str::to_string));
            }
        }
    }
    lines.sort();
    assert_eq!(lines, vec!["a 3", "b 1", "c 1"]);
}

/// Like `spawn_worker`, but binds the RPC listener to a fixed port and the
/// HTTP listener to that port + 1, so `rpc::http_address` resolves
/// correctly for this test the same way it does for the real binary.
/// Returns the RPC address and the worker's scratch directory root.
async fn spawn_worker_pair(tmp: &std::path::Path, name: &str) -> (SocketAddr, PathBuf) {
    let root = tmp.join(name);
    let mapper_dir = root.join("mapper");
    let reducer_dir = root.join("reducer");
    tokio::fs::create_dir_all(&mapper_dir).await.unwrap();
    tokio::fs::create_dir_all(&reducer_dir).await.unwrap();

    let service = WorkerService::new(mapper_dir, reducer_dir);

    // Find a free RPC port, then claim port+1 for HTTP by retrying if taken.
    let (rpc_listener, rpc_address) = loop {
        let candidate = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = candidate.local_addr().unwrap();
        let http_addr = rpc::http_address(addr);
        drop(candidate);
        if let Ok(http_listener) = tokio::net::TcpListener::bind(http_addr).await {
            if let Ok(rpc_listener) =
                tarpc::serde_transport::tcp::listen(addr, Json::default).await
            {
                let router = service.http_router();
                tokio::spawn(async move { axum::serve(http_listener, router).await.unwrap() });
                break (rpc_listener, addr);
            }
        }
    };

    tokio::spawn(async move {
        rpc_listener
            .filter_map(|r| async { r.ok() })
            .map(BaseChannel::with_defaults)
            .map(|channel| channel.execute(service.clone().serve()).for_each(spawn_fut))
            .buffer_unordered(10)
            .for_each(|()| async {})
            .await;
    });

    (rpc_address, root)
}
