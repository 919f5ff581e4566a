//! End-to-end snapshot run: scan the site, create a build, upload what
//! the server is missing, snapshot every page, finalize.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use snapgate_client::{
    BuildEnvironment, BuildService, Resource, ResourceUploader, SnapshotOptions, SnapshotService,
    Transport,
};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::classifier;
use crate::error::RunnerError;
use crate::types::{MAX_WORKERS, ProgressEvent, RunReport, SnapshotConfig};
use crate::uploader::{UploadCoordinator, UploadResources};

const EVENT_BUFFER: usize = 256;

/// Drives a full snapshot run against the remote service.
pub struct SnapshotRunner {
    builds: Arc<BuildService>,
    snapshots: Arc<SnapshotService>,
    coordinator: Arc<UploadCoordinator>,
    config: SnapshotConfig,
    events_tx: mpsc::Sender<ProgressEvent>,
    events_rx: Option<mpsc::Receiver<ProgressEvent>>,
}

impl SnapshotRunner {
    pub fn new(transport: Arc<Transport>, mut config: SnapshotConfig) -> Self {
        config.workers = config.workers.clamp(1, MAX_WORKERS);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let uploader: Arc<dyn UploadResources> =
            Arc::new(ResourceUploader::new(Arc::clone(&transport)));
        let coordinator = Arc::new(UploadCoordinator::new(
            uploader,
            config.workers,
            events_tx.clone(),
        ));
        Self {
            builds: Arc::new(BuildService::new(Arc::clone(&transport))),
            snapshots: Arc::new(SnapshotService::new(transport)),
            coordinator,
            config,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Hands out the progress event stream. Callable once; without a
    /// listener events are silently dropped.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ProgressEvent>> {
        self.events_rx.take()
    }

    /// Runs the whole pipeline for the site under `root_dir`.
    ///
    /// A failed snapshot branch does not stop the other branches, but it
    /// leaves the build unfinalized and is reflected in the report.
    pub async fn run(
        &self,
        root_dir: &Path,
        environment: &BuildEnvironment,
    ) -> Result<RunReport, RunnerError> {
        let inventory = classifier::classify(root_dir, &self.config)?;
        if inventory.root_resources.is_empty() {
            return Err(RunnerError::NoRootResources);
        }
        let total = match self.config.snapshot_limit {
            Some(limit) => inventory.root_resources.len().min(limit),
            None => inventory.root_resources.len(),
        };
        info!(
            pages = inventory.root_resources.len(),
            assets = inventory.build_resources.len(),
            snapshots = total,
            "scan complete"
        );

        let build = self
            .builds
            .create_build(environment, Some(&inventory.build_resources))
            .await?;
        let _ = self.events_tx.try_send(ProgressEvent::BuildCreated {
            build_id: build.id.clone(),
            web_url: build.web_url.clone(),
        });

        // Snapshot drains resolve against the same pool as the build
        // drain: a page and an asset can share bytes.
        let pool: Arc<Vec<Resource>> = Arc::new(
            inventory
                .root_resources
                .iter()
                .chain(inventory.build_resources.iter())
                .cloned()
                .collect(),
        );

        self.coordinator
            .upload_missing(&build.id, &build.missing_resources, &pool)
            .await?;

        let failed = Arc::new(AtomicBool::new(false));
        let permits = Arc::new(Semaphore::new(self.config.workers));
        let options = SnapshotOptions {
            widths: self.config.widths.clone(),
            enable_javascript: self.config.enable_javascript,
            ..SnapshotOptions::default()
        };

        let mut branches = Vec::new();
        for (index, root) in inventory
            .root_resources
            .into_iter()
            .take(total)
            .enumerate()
        {
            let snapshots = Arc::clone(&self.snapshots);
            let coordinator = Arc::clone(&self.coordinator);
            let permits = Arc::clone(&permits);
            let pool = Arc::clone(&pool);
            let failed = Arc::clone(&failed);
            let events = self.events_tx.clone();
            let options = options.clone();
            let build_id = build.id.clone();

            branches.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await?;
                let url = root.resource_url.clone();
                let _ = events.try_send(ProgressEvent::SnapshotStarted {
                    url: url.clone(),
                    index: index + 1,
                    total,
                });
                let outcome =
                    snapshot_root(&snapshots, &coordinator, &build_id, root, &pool, &options).await;
                if let Err(error) = outcome {
                    error!(%url, %error, "snapshot failed");
                    let _ = events.try_send(ProgressEvent::SnapshotFailed {
                        url,
                        error: error.to_string(),
                    });
                    failed.store(true, Ordering::SeqCst);
                }
                Ok::<(), RunnerError>(())
            }));
        }
        for branch in branches {
            branch.await??;
        }

        let failed = failed.load(Ordering::SeqCst);
        if failed {
            warn!(build_id = %build.id, "snapshot errors occurred, leaving the build unfinalized");
        } else {
            self.builds.finalize_build(&build.id).await?;
            let _ = self.events_tx.try_send(ProgressEvent::BuildFinalized {
                web_url: build.web_url.clone(),
            });
            info!(build_id = %build.id, "build finalized");
        }

        Ok(RunReport {
            build_id: build.id,
            web_url: build.web_url,
            total_snapshots: total,
            failed,
        })
    }
}

/// One snapshot branch: register the page, upload whatever the server
/// has not seen, then finalize.
async fn snapshot_root(
    snapshots: &SnapshotService,
    coordinator: &UploadCoordinator,
    build_id: &str,
    root: Resource,
    pool: &[Resource],
    options: &SnapshotOptions,
) -> Result<(), RunnerError> {
    let snapshot = snapshots
        .create_snapshot(build_id, std::slice::from_ref(&root), options)
        .await?;
    coordinator
        .upload_missing(build_id, &snapshot.missing_resources, pool)
        .await?;
    snapshots.finalize_snapshot(&snapshot.id).await?;
    debug!(snapshot_id = %snapshot.id, "snapshot finalized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapgate_client::{RetryPolicy, checksum_bytes};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Reads one full HTTP request (headers plus declared body).
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            match stream.read(&mut tmp).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        let header = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                        let content_length = header
                            .lines()
                            .find_map(|line| line.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() - (pos + 4) >= content_length {
                            break;
                        }
                    }
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Mock server answering a fixed script of responses, one request
    /// per connection, capturing every request it sees.
    async fn scripted_api(
        responses: Vec<(u16, String)>,
    ) -> (String, Arc<Mutex<Vec<String>>>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let captured = Arc::new(Mutex::new(Vec::new()));

        let captured_srv = captured.clone();
        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let request = read_request(&mut stream).await;
                captured_srv.lock().unwrap().push(request);

                let resp = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, captured, handle)
    }

    fn runner(url: &str, config: SnapshotConfig) -> SnapshotRunner {
        let transport = Transport::new("tok", url, "test")
            .unwrap()
            .with_policy(RetryPolicy::immediate(1));
        SnapshotRunner::new(Arc::new(transport), config)
    }

    fn request_paths(captured: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        captured
            .lock()
            .unwrap()
            .iter()
            .map(|request| {
                let line = request.lines().next().unwrap_or("");
                line.split_whitespace().nth(1).unwrap_or("").to_string()
            })
            .collect()
    }

    fn write_file(root: &Path, rel: &str, contents: &[u8]) -> PathBuf {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn missing_refs(missing: &[&str]) -> Vec<serde_json::Value> {
        missing
            .iter()
            .map(|sha| serde_json::json!({"type": "resources", "id": sha}))
            .collect()
    }

    fn build_created(id: &str, missing: &[&str]) -> String {
        serde_json::json!({
            "data": {
                "id": id,
                "attributes": {"web-url": format!("https://app.example/builds/{id}")},
                "relationships": {"missing-resources": {"data": missing_refs(missing)}}
            }
        })
        .to_string()
    }

    fn snapshot_created(id: &str, missing: &[&str]) -> String {
        serde_json::json!({
            "data": {
                "id": id,
                "relationships": {"missing-resources": {"data": missing_refs(missing)}}
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn full_run_uploads_missing_and_finalizes() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.html", b"<html>a</html>");
        write_file(dir.path(), "b.html", b"<html>b</html>");
        write_file(dir.path(), "css/base.css", b"body {}");
        write_file(dir.path(), "images/huge.png", &vec![0u8; 16 * 1024 * 1024]);

        let sha_css = checksum_bytes(b"body {}");
        let sha_a = checksum_bytes(b"<html>a</html>");

        let (url, captured, _server) = scripted_api(vec![
            (201, build_created("b1", &[&sha_css])),
            (201, "{}".to_string()),
            (201, snapshot_created("s1", &[&sha_a])),
            (201, "{}".to_string()),
            (200, "{}".to_string()),
            (201, snapshot_created("s2", &[])),
            (200, "{}".to_string()),
            (200, "{}".to_string()),
        ])
        .await;

        let mut runner = runner(
            &url,
            SnapshotConfig {
                workers: 1,
                ..SnapshotConfig::default()
            },
        );
        let mut events = runner.take_events().unwrap();
        let report = runner
            .run(dir.path(), &BuildEnvironment::default())
            .await
            .unwrap();

        assert_eq!(report.build_id, "b1");
        assert_eq!(report.web_url.as_deref(), Some("https://app.example/builds/b1"));
        assert_eq!(report.total_snapshots, 2);
        assert!(!report.failed);

        assert_eq!(
            request_paths(&captured),
            [
                "/builds/",
                "/builds/b1/resources/",
                "/builds/b1/snapshots/",
                "/builds/b1/resources/",
                "/snapshots/s1/finalize",
                "/builds/b1/snapshots/",
                "/snapshots/s2/finalize",
                "/builds/b1/finalize",
            ],
        );

        // The build-level upload carried the stylesheet bytes, and the
        // oversized image never entered the build's resource list.
        let requests = captured.lock().unwrap();
        assert!(!requests[0].contains("huge.png"));
        assert!(requests[1].contains(&sha_css));
        assert!(requests[1].contains("Ym9keSB7fQ=="));
        drop(requests);

        let mut saw_created = false;
        let mut saw_finalized = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ProgressEvent::BuildCreated { build_id, .. } => {
                    assert_eq!(build_id, "b1");
                    saw_created = true;
                }
                ProgressEvent::BuildFinalized { web_url } => {
                    assert!(web_url.is_some());
                    saw_finalized = true;
                }
                _ => {}
            }
        }
        assert!(saw_created);
        assert!(saw_finalized);
    }

    #[tokio::test]
    async fn failed_snapshot_leaves_build_unfinalized() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "only.html", b"<html/>");

        let (url, captured, _server) = scripted_api(vec![
            (201, build_created("b1", &[])),
            (400, r#"{"errors":[{"detail":"bad request"}]}"#.to_string()),
        ])
        .await;

        let mut runner = runner(
            &url,
            SnapshotConfig {
                workers: 1,
                ..SnapshotConfig::default()
            },
        );
        let mut events = runner.take_events().unwrap();
        let report = runner
            .run(dir.path(), &BuildEnvironment::default())
            .await
            .unwrap();

        assert!(report.failed);
        assert_eq!(report.total_snapshots, 1);
        // No finalize call after the branch failure.
        assert_eq!(
            request_paths(&captured),
            ["/builds/", "/builds/b1/snapshots/"],
        );

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::SnapshotFailed { url, .. } = event {
                assert_eq!(url, "/only.html");
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn no_pages_is_an_error_before_any_request() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "css/base.css", b"body {}");

        // Unroutable endpoint: the error must come from the scan.
        let runner = runner("http://127.0.0.1:1", SnapshotConfig::default());
        let error = runner
            .run(dir.path(), &BuildEnvironment::default())
            .await
            .unwrap_err();

        assert!(matches!(error, RunnerError::NoRootResources));
    }

    #[tokio::test]
    async fn snapshot_limit_caps_the_branches() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.html", b"<html>a</html>");
        write_file(dir.path(), "b.html", b"<html>b</html>");
        write_file(dir.path(), "c.html", b"<html>c</html>");

        let (url, captured, _server) = scripted_api(vec![
            (201, build_created("b1", &[])),
            (201, snapshot_created("s1", &[])),
            (200, "{}".to_string()),
            (200, "{}".to_string()),
        ])
        .await;

        let runner = runner(
            &url,
            SnapshotConfig {
                workers: 1,
                snapshot_limit: Some(1),
                ..SnapshotConfig::default()
            },
        );
        let report = runner
            .run(dir.path(), &BuildEnvironment::default())
            .await
            .unwrap();

        assert_eq!(report.total_snapshots, 1);
        assert!(!report.failed);
        assert_eq!(
            request_paths(&captured),
            [
                "/builds/",
                "/builds/b1/snapshots/",
                "/snapshots/s1/finalize",
                "/builds/b1/finalize",
            ],
        );
    }
}
