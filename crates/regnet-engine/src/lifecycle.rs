//! Sandbox lifecycle management.
//!
//! [`LifecycleManager`] wraps a [`SandboxEngine`] with the operations the
//! orchestrator needs: single-sandbox create/stop/remove, and filtered bulk
//! stop and restart that fan out one task per matching sandbox.
//!
//! Bulk operations never fail because one sandbox failed. Per-sandbox
//! errors are collected into a [`BatchReport`]; only a listing failure or
//! the caller's deadline turn into an `Err`.

use crate::engine::{SandboxEngine, SandboxId, SandboxSpec, SandboxSummary};
use crate::error::{EngineError, Result};
use crate::filter::NameFilter;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::Instrument;

/// Default grace period before a stopping sandbox is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

// ============================================================================
// Statistics
// ============================================================================

/// Lifecycle counters for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct LifecycleStats {
    /// Sandboxes created and started.
    pub created: AtomicU64,
    /// Sandboxes removed.
    pub removed: AtomicU64,
    /// Per-sandbox tasks spawned by bulk operations.
    pub tasks_spawned: AtomicU64,
}

impl LifecycleStats {
    /// Get the number of sandboxes created.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Get the number of sandboxes removed.
    pub fn removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }

    /// Get the number of fan-out tasks spawned.
    pub fn tasks_spawned(&self) -> u64 {
        self.tasks_spawned.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Batch results
// ============================================================================

/// Outcome of a bulk operation.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Names of sandboxes the operation succeeded on.
    pub succeeded: Vec<String>,
    /// Sandboxes the operation failed on, with their error.
    pub failed: Vec<(String, EngineError)>,
}

impl BatchReport {
    /// Number of sandboxes the operation touched.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// True when no sandbox failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Consume the report, returning the first failure if any.
    pub fn into_result(self) -> Result<()> {
        match self.failed.into_iter().next() {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkOp {
    StopAndRemove,
    Restart,
}

impl BulkOp {
    fn name(self) -> &'static str {
        match self {
            BulkOp::StopAndRemove => "stop_and_remove",
            BulkOp::Restart => "restart",
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Lifecycle operations over a shared [`SandboxEngine`].
#[derive(Clone)]
pub struct LifecycleManager {
    engine: Arc<dyn SandboxEngine>,
    stop_grace: Duration,
    stats: Arc<LifecycleStats>,
}

impl LifecycleManager {
    /// Create a manager using [`DEFAULT_STOP_GRACE`].
    pub fn new(engine: Arc<dyn SandboxEngine>) -> Self {
        Self {
            engine,
            stop_grace: DEFAULT_STOP_GRACE,
            stats: Arc::new(LifecycleStats::default()),
        }
    }

    /// Override the stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// The grace period used for stop and restart.
    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Lifecycle counters.
    pub fn stats(&self) -> &LifecycleStats {
        &self.stats
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<dyn SandboxEngine> {
        &self.engine
    }

    /// Create and start one sandbox.
    ///
    /// Fails with [`EngineError::AlreadyExists`] if the name is taken.
    pub async fn create_and_start(&self, spec: &SandboxSpec) -> Result<SandboxId> {
        let start = Instant::now();
        let id = self.engine.create(spec).await?;
        self.engine.start(&id).await?;
        self.stats.created.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            sandbox = %spec.name,
            image = %spec.image,
            ports = spec.port_bindings.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sandbox started"
        );
        Ok(id)
    }

    /// Gracefully stop one sandbox.
    pub async fn stop(&self, id: &str) -> Result<()> {
        tracing::info!(sandbox = %id, grace_secs = self.stop_grace.as_secs(), "Stopping sandbox");
        self.engine.stop(id, self.stop_grace).await
    }

    /// Restart one sandbox.
    pub async fn restart(&self, id: &str) -> Result<()> {
        tracing::info!(sandbox = %id, "Restarting sandbox");
        self.engine.restart(id, self.stop_grace).await
    }

    /// Remove one sandbox.
    pub async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.engine.remove(id, force).await?;
        self.stats.removed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Resume if paused, stop if running, then remove.
    ///
    /// A sandbox that no longer exists is not an error, but is not
    /// counted in [`LifecycleStats::removed`].
    pub async fn stop_and_remove(&self, id: &str) -> Result<()> {
        if stop_and_remove(self.engine.as_ref(), id, self.stop_grace).await? {
            self.stats.removed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// List sandboxes matching `filter`.
    pub async fn find(&self, filter: &NameFilter) -> Result<Vec<SandboxSummary>> {
        self.engine.list(filter).await
    }

    /// Upload a tar archive into `dest` inside a sandbox.
    pub async fn copy_archive(&self, id: &str, dest: &str, archive: Bytes) -> Result<()> {
        tracing::debug!(sandbox = %id, dest = %dest, size_bytes = archive.len(), "Uploading archive");
        self.engine.copy_archive(id, dest, archive).await
    }

    /// Build an image, streaming progress lines.
    pub fn build_image(
        &self,
        context: Bytes,
        dockerfile: &str,
        tag: &str,
    ) -> BoxStream<'_, Result<String>> {
        self.engine.build_image(context, dockerfile, tag)
    }

    /// Stop and remove every sandbox matching `filter`, concurrently.
    ///
    /// With no matches this returns immediately without spawning work. With
    /// `suppress_logs`, per-sandbox progress is logged at debug level.
    pub async fn stop_all_matching(
        &self,
        filter: &NameFilter,
        suppress_logs: bool,
        deadline: Duration,
    ) -> Result<BatchReport> {
        self.fan_out(BulkOp::StopAndRemove, filter, suppress_logs, deadline)
            .await
    }

    /// Restart every sandbox matching `filter`, concurrently.
    ///
    /// Individual restart failures are logged and reported, not returned.
    pub async fn restart_all_matching(
        &self,
        filter: &NameFilter,
        deadline: Duration,
    ) -> Result<BatchReport> {
        self.fan_out(BulkOp::Restart, filter, false, deadline).await
    }

    async fn fan_out(
        &self,
        op: BulkOp,
        filter: &NameFilter,
        suppress_logs: bool,
        deadline: Duration,
    ) -> Result<BatchReport> {
        let matches = self.engine.list(filter).await?;
        if matches.is_empty() {
            tracing::debug!(filter = %filter, op = op.name(), "No sandboxes matched");
            return Ok(BatchReport::default());
        }

        let mut tasks = JoinSet::new();
        for sandbox in matches {
            let engine = Arc::clone(&self.engine);
            let grace = self.stop_grace;
            self.stats.tasks_spawned.fetch_add(1, Ordering::Relaxed);

            tasks.spawn(async move {
                if suppress_logs {
                    tracing::debug!(sandbox = %sandbox.name, op = op.name(), "Bulk operation");
                } else {
                    tracing::info!(sandbox = %sandbox.name, op = op.name(), "Bulk operation");
                }
                let result = match op {
                    BulkOp::StopAndRemove => {
                        stop_and_remove(engine.as_ref(), &sandbox.id, grace).await
                    }
                    BulkOp::Restart => engine.restart(&sandbox.id, grace).await.map(|()| false),
                };
                (sandbox.name, result)
            }
            .in_current_span());
        }

        let collect = async {
            let mut report = BatchReport::default();
            let mut removed = 0u64;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(was_removed))) => {
                        removed += u64::from(was_removed);
                        report.succeeded.push(name);
                    }
                    Ok((name, Err(error))) => {
                        tracing::warn!(sandbox = %name, op = op.name(), error = %error, "Bulk operation failed");
                        report.failed.push((name, error));
                    }
                    Err(join_error) => {
                        tracing::error!(op = op.name(), error = %join_error, "Bulk task aborted");
                        report.failed.push((
                            String::new(),
                            EngineError::Operation {
                                operation: op.name(),
                                target: filter.to_string(),
                                message: join_error.to_string(),
                            },
                        ));
                    }
                }
            }
            (report, removed)
        };

        match tokio::time::timeout(deadline, collect).await {
            Ok((report, removed)) => {
                self.stats.removed.fetch_add(removed, Ordering::Relaxed);
                tracing::info!(
                    op = op.name(),
                    succeeded = report.succeeded.len(),
                    failed = report.failed.len(),
                    "Bulk operation finished"
                );
                Ok(report)
            }
            Err(_) => {
                // Dropping the JoinSet aborts whatever is still running.
                tracing::error!(op = op.name(), deadline_secs = deadline.as_secs(), "Bulk operation deadline exceeded");
                Err(EngineError::Deadline(deadline))
            }
        }
    }
}

/// Returns whether this call removed the sandbox.
async fn stop_and_remove(engine: &dyn SandboxEngine, id: &str, grace: Duration) -> Result<bool> {
    let status = match engine.inspect(id).await {
        Ok(status) => status,
        Err(EngineError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };

    if status.paused {
        engine.resume(id).await?;
    }
    if status.running {
        engine.stop(id, grace).await?;
    }
    match engine.remove(id, true).await {
        Ok(()) => Ok(true),
        Err(EngineError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
