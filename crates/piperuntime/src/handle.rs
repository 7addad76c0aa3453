use pipecore::{FlowError, Pipeline, PipelineStatus, StatusReport, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared handle to a pipeline.
///
/// Every read and write of state and ledger goes through this lock, so a
/// node's merged outputs are fully visible before any dependent step reads
/// them, and the persistence hook (run under the write lock) never sees two
/// steps' updates interleaved.
///
/// A second lock serializes whole runs: at most one `run` drives a given
/// pipeline at a time.
#[derive(Clone)]
pub struct PipelineHandle {
    id: Arc<str>,
    inner: Arc<RwLock<Pipeline>>,
    run_lock: Arc<Mutex<()>>,
}

impl PipelineHandle {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            id: Arc::from(pipeline.id()),
            inner: Arc::new(RwLock::new(pipeline)),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Pipeline> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Pipeline> {
        self.inner.write().await
    }

    /// Waits until no other run holds this pipeline, then claims it until
    /// the guard drops.
    pub async fn lock_run(&self) -> OwnedMutexGuard<()> {
        self.run_lock.clone().lock_owned().await
    }

    /// True while some run holds the pipeline.
    pub fn is_run_active(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    pub async fn status(&self) -> PipelineStatus {
        self.inner.read().await.status()
    }

    pub async fn is_paused(&self) -> bool {
        self.status().await.is_paused()
    }

    /// Stop scheduling new steps; in-flight steps finish normally.
    pub async fn pause(&self) -> Result<(), FlowError> {
        self.inner.write().await.pause()?;
        tracing::info!(pipeline = %self.id, "pipeline paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), FlowError> {
        self.inner.write().await.resume()?;
        tracing::info!(pipeline = %self.id, "pipeline resumed");
        Ok(())
    }

    pub async fn inject_user_input(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        tracing::debug!(pipeline = %self.id, %key, "user input injected");
        self.inner.write().await.inject_user_input(key, value);
    }

    pub async fn export_status(&self) -> StatusReport {
        self.inner.read().await.export_status()
    }

    /// Owned copy of the pipeline as it is right now.
    pub async fn snapshot(&self) -> Pipeline {
        self.inner.read().await.clone()
    }
}
