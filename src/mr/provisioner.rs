//! Worker-side data provisioner (component H): pulls a reduce task's M
//! mapper partitions over HTTP, tolerating late source updates and
//! partial failure (spec.md §4.H).

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::mr::retry::Backoff;
use crate::mr::source_map::SourceMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceStatus {
    Idle,
    Done,
    Failed,
}

struct Source {
    status: SourceStatus,
    host: Option<String>,
    local_path: Option<PathBuf>,
}

/// Fetches all `mapper_cnt` partitions for `(file, reducer_idx)`, returning
/// one local path per mapper index in fetch order. Fails the whole reduce
/// task only once the 17-attempt host-discovery retry is exhausted with
/// partitions still missing (spec.md §4.H).
pub async fn fetch(
    file: &str,
    reducer_idx: i32,
    mapper_cnt: i32,
    source_map: &SourceMap,
    reducer_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let basename = basename(file);
    let mut sources: Vec<Source> = (0..mapper_cnt)
        .map(|idx| Source {
            status: SourceStatus::Idle,
            host: source_map.host(file, idx),
            local_path: None,
        })
        .collect();

    let mut queue: VecDeque<i32> = (0..mapper_cnt)
        .filter(|&idx| sources[idx as usize].host.is_some())
        .collect();

    let mut done_count = 0usize;

    loop {
        while let Some(idx) = queue.pop_front() {
            let source = &mut sources[idx as usize];
            let host = source.host.clone().expect("queued source has a host");
            match fetch_one(&host, &basename, idx, reducer_idx, reducer_dir).await {
                Ok(path) => {
                    source.status = SourceStatus::Done;
                    source.local_path = Some(path);
                    done_count += 1;
                }
                Err(_) => {
                    source.status = SourceStatus::Failed;
                }
            }
        }

        if done_count == mapper_cnt as usize {
            break;
        }

        let mut backoff = Backoff::new();
        loop {
            let mut discovered = false;
            for idx in 0..mapper_cnt {
                let source = &mut sources[idx as usize];
                if source.status == SourceStatus::Done {
                    continue;
                }
                if let Some(new_host) = source_map.host(file, idx) {
                    if source.host.as_deref() != Some(new_host.as_str()) {
                        source.host = Some(new_host);
                        source.status = SourceStatus::Idle;
                        queue.push_back(idx);
                        discovered = true;
                    }
                }
            }
            if discovered {
                break;
            }
            if backoff.attempts_exhausted() {
                anyhow::bail!(
                    "provisioner for {file} reducer {reducer_idx}: \
                     retries exhausted with {} of {mapper_cnt} partitions still missing",
                    mapper_cnt as usize - done_count
                );
            }
            backoff.wait().await;
        }
    }

    Ok(sources
        .into_iter()
        .map(|s| s.local_path.expect("all sources done"))
        .collect())
}

async fn fetch_one(
    host: &str,
    basename: &str,
    mapper_idx: i32,
    reducer_idx: i32,
    reducer_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let url = format!("http://{host}/data/{basename}.{mapper_idx}.{reducer_idx}");
    let local_path = reducer_dir.join(format!("{basename}.{reducer_idx}.{mapper_idx}"));

    let result = async {
        let response = reqwest::get(&url).await?.error_for_status()?;
        let bytes = response.bytes().await?;
        tokio::fs::write(&local_path, &bytes).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&local_path).await;
        return Err(e);
    }
    Ok(local_path)
}

fn basename(file: &str) -> String {
    Path::new(file)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_directory() {
        assert_eq!(basename("inputs/pg-0.txt"), "pg-0.txt");
        assert_eq!(basename("pg-0.txt"), "pg-0.txt");
    }

    #[tokio::test(start_paused = true)]
    async fn fails_when_no_host_ever_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let source_map = SourceMap::new();
        // mapper_cnt=1, but no UpdateSources ever reports a host for idx 0.
        let result = fetch("pg-0.txt", 0, 1, &source_map, dir.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fetches_from_local_http_server() {
        use axum::{routing::get, Router};
        use std::net::SocketAddr;

        let src_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(src_dir.path().join("pg-0.txt.0.0"), b"a 1\nb 1\n")
            .await
            .unwrap();

        let dir = src_dir.path().to_path_buf();
        let app = Router::new().route(
            "/data/:name",
            get(move |axum::extract::Path(name): axum::extract::Path<String>| {
                let dir = dir.clone();
                async move {
                    match tokio::fs::read(dir.join(&name)).await {
                        Ok(bytes) => bytes,
                        Err(_) => Vec::new(),
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let source_map = SourceMap::new();
        source_map.update("pg-0.txt", std::collections::HashMap::from([(0, addr.to_string())]));

        let out_dir = tempfile::tempdir().unwrap();
        let paths = fetch("pg-0.txt", 0, 1, &source_map, out_dir.path())
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);
        let contents = tokio::fs::read_to_string(&paths[0]).await.unwrap();
        assert_eq!(contents, "a 1\nb 1\n");
    }
}
