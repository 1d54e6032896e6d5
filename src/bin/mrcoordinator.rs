use std::net::SocketAddr;

use clap::Parser;
use map_reduce_rs::mr::coordinator::Coordinator;

/// Coordinator binary: drives a fixed fleet of workers through the
/// map/reduce phases of one job (spec.md §6).
#[derive(Parser, Debug)]
#[command(name = "mrcoordinator")]
struct Args {
    /// Comma-separated worker addresses, e.g. 127.0.0.1:9001,127.0.0.1:9002
    #[arg(long)]
    workers: String,

    /// Number of reduce tasks.
    #[arg(long)]
    reducer_tasks: i32,

    /// The single input file for this job. Mapper count is always 1 per
    /// invocation (spec.md §6).
    #[arg(long, default_value = "pg-0.txt")]
    input_file: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let addresses: Vec<SocketAddr> = args
        .workers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<SocketAddr>()
                .unwrap_or_else(|e| panic!("invalid worker address {s:?}: {e}"))
        })
        .collect();

    tracing::info!(
        workers = addresses.len(),
        reducer_tasks = args.reducer_tasks,
        input_file = %args.input_file,
        "starting coordinator"
    );

    let coordinator = match Coordinator::new(args.input_file, 1, args.reducer_tasks, addresses).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "coordinator startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = coordinator.run().await {
        tracing::error!(error = %e, "job aborted");
        std::process::exit(1);
    }

    tracing::info!("job finished successfully");
    Ok(())
}
