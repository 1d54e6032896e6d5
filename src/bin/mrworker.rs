use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use futures::StreamExt;
use map_reduce_rs::mr::rpc::{self, MapReduceService};
use map_reduce_rs::mr::worker::WorkerService;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Json;

/// Worker binary: exposes the `MapReduceService` RPC surface and the
/// `/data/*` HTTP transfer endpoint (spec.md §6).
#[derive(Parser, Debug)]
#[command(name = "mrworker")]
struct Args {
    /// RPC listen address. Port must be an integer in [10, 20000].
    #[arg(long)]
    address: String,
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let address: SocketAddr = args
        .address
        .parse()
        .unwrap_or_else(|e| panic!("invalid address {:?}: {e}", args.address));

    if !(10..=20000).contains(&address.port()) {
        tracing::error!(port = address.port(), "port must be in [10, 20000]");
        std::process::exit(1);
    }

    let data_root = PathBuf::from(format!("mr-data-{}", address.port()));
    let mapper_dir = data_root.join("mapper");
    let reducer_dir = data_root.join("reducer");
    tokio::fs::create_dir_all(&mapper_dir).await?;
    tokio::fs::create_dir_all(&reducer_dir).await?;

    let service = WorkerService::new(mapper_dir, reducer_dir);

    let http_address = rpc::http_address(address);
    let http_listener = tokio::net::TcpListener::bind(http_address).await?;
    let router = service.http_router();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, router).await {
            tracing::error!(error = %e, "http server exited");
        }
    });
    tracing::info!(%http_address, "http transfer endpoint listening");

    let rpc_transport = tarpc::serde_transport::tcp::listen(address, Json::default).await?;
    tracing::info!(%address, "rpc server listening");

    rpc_transport
        .filter_map(|r| async { r.ok() })
        .map(BaseChannel::with_defaults)
        .map(|channel| channel.execute(service.clone().serve()).for_each(spawn))
        .buffer_unordered(10)
        .for_each(|()| async {})
        .await;

    Ok(())
}
