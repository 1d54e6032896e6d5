//! Worker-side RPC service (component I's remote end) plus the map/reduce
//! task execution it dispatches to, and the HTTP collaborator the data
//! provisioner (component H) pulls partitions from.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::Path as AxumPath;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tarpc::context;
use tokio::io::AsyncWriteExt;

use crate::mr::function::{wc, KeyValue};
use crate::mr::provisioner;
use crate::mr::rpc::{MapReduceService, TaskOutcome, TaskRequest, UpdateSourcesRequest};
use crate::mr::source_map::SourceMap;

/// Everything one worker process needs to execute map/reduce tasks and
/// answer `UpdateSources`. Cheaply `Clone`: the directories are plain
/// `PathBuf`s and the source map is shared behind an `Arc`, matching what
/// `tarpc`'s per-connection service cloning requires.
#[derive(Clone)]
pub struct WorkerService {
    pub mapper_dir: PathBuf,
    pub reducer_dir: PathBuf,
    source_map: Arc<SourceMap>,
}

impl WorkerService {
    pub fn new(mapper_dir: PathBuf, reducer_dir: PathBuf) -> Self {
        Self {
            mapper_dir,
            reducer_dir,
            source_map: Arc::new(SourceMap::new()),
        }
    }

    /// The HTTP collaborator spec.md §1 excludes from the core but §4.H and
    /// §6 require on the other end of the provisioner's GETs. Rejects any
    /// requested name containing `/` or `..` so a request can't escape
    /// `mapper_dir`.
    pub fn http_router(&self) -> Router {
        let mapper_dir = self.mapper_dir.clone();
        Router::new().route(
            "/data/:name",
            get(move |AxumPath(name): AxumPath<String>| {
                let mapper_dir = mapper_dir.clone();
                async move { serve_partition(mapper_dir, name).await }
            }),
        )
    }

    async fn do_map(&self, req: &TaskRequest) -> anyhow::Result<()> {
        if req.reducer_cnt == 0 {
            // S4 (spec.md §8): a zero-reducer job has nothing to partition
            // into; the map task succeeds trivially and the job terminates
            // after the map phase alone.
            return Ok(());
        }

        let contents = tokio::fs::read_to_string(&req.file).await?;
        let records = wc::map(&contents);

        let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); req.reducer_cnt as usize];
        for kv in records {
            let bucket = (hash_key(&kv.key) % req.reducer_cnt as u64) as usize;
            buckets[bucket].push(kv);
        }

        let basename = basename(&req.file);
        tokio::fs::create_dir_all(&self.mapper_dir).await?;
        for (reducer_idx, mut bucket) in buckets.into_iter().enumerate() {
            bucket.sort_by(|a, b| a.key.cmp(&b.key));
            let path = self
                .mapper_dir
                .join(format!("{basename}.{}.{reducer_idx}", req.idx));
            let mut file = tokio::fs::File::create(&path).await?;
            for kv in &bucket {
                file.write_all(format!("{} {}\n", kv.key, kv.value).as_bytes())
                    .await?;
            }
        }
        Ok(())
    }

    async fn do_reduce(&self, req: &TaskRequest) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.reducer_dir).await?;
        let paths = provisioner::fetch(
            &req.file,
            req.idx,
            req.mapper_cnt,
            &self.source_map,
            &self.reducer_dir,
        )
        .await?;

        let mut streams = Vec::with_capacity(paths.len());
        for path in &paths {
            streams.push(read_sorted_records(path).await?);
        }
        let merged = merge_ascending(streams);

        let out_path = self.reducer_dir.join(format!("mr-out-{}.txt", req.idx));
        let mut out = tokio::fs::File::create(&out_path).await?;
        let mut i = 0;
        while i < merged.len() {
            let key = &merged[i].key;
            let mut values = Vec::new();
            let mut j = i;
            while j < merged.len() && &merged[j].key == key {
                values.push(merged[j].value.as_str());
                j += 1;
            }
            let result = wc::reduce(key, &values);
            out.write_all(format!("{key} {result}\n").as_bytes()).await?;
            i = j;
        }
        tracing::info!(reduce_idx = req.idx, out = %out_path.display(), "reduce task wrote output");
        Ok(())
    }
}

#[tarpc::server]
impl MapReduceService for WorkerService {
    async fn map(self, _: context::Context, req: TaskRequest) -> TaskOutcome {
        match self.do_map(&req).await {
            Ok(()) => {
                tracing::info!(map_idx = req.idx, "map task finished");
                TaskOutcome::Success
            }
            Err(e) => {
                tracing::warn!(map_idx = req.idx, error = %e, "map task failed");
                TaskOutcome::Failed
            }
        }
    }

    async fn reduce(self, _: context::Context, req: TaskRequest) -> TaskOutcome {
        match self.do_reduce(&req).await {
            Ok(()) => TaskOutcome::Success,
            Err(e) => {
                tracing::warn!(reduce_idx = req.idx, error = %e, "reduce task failed");
                TaskOutcome::Failed
            }
        }
    }

    async fn status(self, _: context::Context) {}

    async fn update_sources(self, _: context::Context, req: UpdateSourcesRequest) {
        tracing::debug!(file = %req.file, "received source update");
        self.source_map.update(&req.file, req.hosts);
    }
}

async fn serve_partition(mapper_dir: PathBuf, name: String) -> Result<Vec<u8>, StatusCode> {
    if name.contains('/') || name.contains("..") {
        return Err(StatusCode::NOT_FOUND);
    }
    match tokio::fs::read(mapper_dir.join(&name)).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn basename(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string())
}

async fn read_sorted_records(path: &Path) -> anyhow::Result<Vec<KeyValue>> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents
        .lines()
        .filter(|l| !l.is_empty())
        .map(|line| {
            let (key, value) = line
                .split_once(' ')
                .unwrap_or_else(|| panic!("malformed intermediate record: {line:?}"));
            KeyValue::new(key.to_string(), value.to_string())
        })
        .collect())
}

/// K-way merge across already key-ascending-sorted streams, picking the
/// smallest head key at each step (Open Question 1: the original's
/// largest-head-key pick was a bug relative to §6's ascending-sort
/// invariant; this merges ascending instead).
fn merge_ascending(streams: Vec<Vec<KeyValue>>) -> Vec<KeyValue> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    let mut positions = vec![0usize; streams.len()];
    let mut heap: BinaryHeap<Reverse<(String, usize)>> = BinaryHeap::new();
    for (i, stream) in streams.iter().enumerate() {
        if let Some(kv) = stream.first() {
            heap.push(Reverse((kv.key.clone(), i)));
        }
    }

    let mut merged = Vec::new();
    while let Some(Reverse((_, i))) = heap.pop() {
        let pos = positions[i];
        merged.push(streams[i][pos].clone());
        positions[i] += 1;
        if let Some(kv) = streams[i].get(positions[i]) {
            heap.push(Reverse((kv.key.clone(), i)));
        }
    }
    merged
}
