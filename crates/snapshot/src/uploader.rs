//! Drains a server-declared missing resource list with a bounded pool
//! of concurrent uploads.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use snapgate_client::{ClientError, Resource, ResourceUploader};
use tokio::sync::{Semaphore, mpsc};
use tracing::warn;

use crate::error::RunnerError;
use crate::types::ProgressEvent;

/// Abstract upload sink for resource bytes.
///
/// Implemented by [`ResourceUploader`] for the real service. Using a
/// trait keeps the drain logic decoupled from HTTP and testable with mocks.
pub trait UploadResources: Send + Sync {
    /// Uploads one resource's bytes into the given build.
    fn upload(
        &self,
        build_id: String,
        content: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ClientError>> + Send + '_>>;
}

impl UploadResources for ResourceUploader {
    fn upload(
        &self,
        build_id: String,
        content: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ClientError>> + Send + '_>> {
        Box::pin(async move { self.upload_resource(&build_id, &content).await })
    }
}

/// Uploads exactly the resources a build or snapshot reported missing.
///
/// One coordinator is shared by every stage of a run, so its permit
/// count caps uploads globally no matter how many snapshot branches
/// are draining their own missing lists at once.
pub struct UploadCoordinator {
    uploader: Arc<dyn UploadResources>,
    permits: Arc<Semaphore>,
    events: mpsc::Sender<ProgressEvent>,
}

impl UploadCoordinator {
    pub fn new(
        uploader: Arc<dyn UploadResources>,
        workers: usize,
        events: mpsc::Sender<ProgressEvent>,
    ) -> Self {
        Self {
            uploader,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            events,
        }
    }

    /// Resolves each missing hash against the candidate pool and uploads
    /// its bytes, reading from memory when present and from disk
    /// otherwise. Returns the number of resources uploaded once every
    /// worker has settled.
    ///
    /// Hashes the server asks for that no pool entry carries are logged
    /// and skipped. The first worker error is returned, but only after
    /// the remaining workers finish.
    pub async fn upload_missing(
        &self,
        build_id: &str,
        missing: &[String],
        pool: &[Resource],
    ) -> Result<usize, RunnerError> {
        let total = missing.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::new();

        for sha in missing {
            let Some(resource) = pool.iter().find(|candidate| candidate.sha == *sha) else {
                warn!(%sha, "server reported a missing hash with no local resource");
                continue;
            };

            let uploader = Arc::clone(&self.uploader);
            let permits = Arc::clone(&self.permits);
            let events = self.events.clone();
            let completed = Arc::clone(&completed);
            let build_id = build_id.to_string();
            let url = resource.resource_url.clone();
            let content = resource.content.clone();
            let path = resource.path.clone();

            workers.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await?;
                let bytes = match (content, path) {
                    (Some(bytes), _) => bytes,
                    (None, Some(path)) => tokio::fs::read(&path).await?,
                    (None, None) => {
                        warn!(%url, "resource has neither content nor a file path");
                        return Ok(());
                    }
                };
                uploader.upload(build_id, bytes).await?;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = events.try_send(ProgressEvent::ResourceUploaded {
                    url,
                    completed: done,
                    total,
                });
                Ok::<(), RunnerError>(())
            }));
        }

        let mut first_error = None;
        for worker in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) if first_error.is_none() => first_error = Some(error),
                Ok(Err(_)) => {}
                Err(join_error) if first_error.is_none() => {
                    first_error = Some(RunnerError::Task(join_error));
                }
                Err(_) => {}
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(completed.load(Ordering::SeqCst)),
        }
    }
}
