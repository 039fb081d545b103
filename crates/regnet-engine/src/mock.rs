//! In-memory engine that records every call.
//!
//! Sandbox ids are the sandbox names, so recorded calls read naturally in
//! assertions.

use crate::engine::{SandboxEngine, SandboxId, SandboxSpec, SandboxStatus, SandboxSummary};
use crate::error::{EngineError, Result};
use crate::filter::NameFilter;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// One call made against a [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Ping,
    Create { name: String, image: String },
    Start(String),
    Stop(String),
    Restart(String),
    Remove(String),
    Resume(String),
    Inspect(String),
    List(String),
    CopyArchive { id: String, dest: String },
    BuildImage { tag: String },
}

impl EngineCall {
    /// Name of the operation, as accepted by [`MockEngine::fail_on`].
    pub fn op(&self) -> &'static str {
        match self {
            EngineCall::Ping => "ping",
            EngineCall::Create { .. } => "create",
            EngineCall::Start(_) => "start",
            EngineCall::Stop(_) => "stop",
            EngineCall::Restart(_) => "restart",
            EngineCall::Remove(_) => "remove",
            EngineCall::Resume(_) => "resume",
            EngineCall::Inspect(_) => "inspect",
            EngineCall::List(_) => "list",
            EngineCall::CopyArchive { .. } => "copy_archive",
            EngineCall::BuildImage { .. } => "build_image",
        }
    }
}

#[derive(Debug, Clone)]
struct MockSandbox {
    status: SandboxStatus,
}

/// A [`SandboxEngine`] holding sandboxes in memory.
#[derive(Debug, Default)]
pub struct MockEngine {
    sandboxes: Mutex<BTreeMap<String, MockSandbox>>,
    calls: Mutex<Vec<EngineCall>>,
    uploads: Mutex<Vec<(String, String, Bytes)>>,
    failures: Mutex<HashSet<(&'static str, String)>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    auto_remove: Mutex<HashSet<String>>,
    build_output: Mutex<Vec<String>>,
}

impl MockEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a sandbox, as if left over from an earlier run.
    pub fn insert(&self, name: &str, running: bool, paused: bool) {
        self.lock_sandboxes().insert(
            name.to_owned(),
            MockSandbox {
                status: SandboxStatus { running, paused },
            },
        );
    }

    /// Make `op` (see [`EngineCall::op`]) fail for `target`.
    pub fn fail_on(&self, op: &'static str, target: &str) {
        lock(&self.failures).insert((op, target.to_owned()));
    }

    /// Delay every `op` call by `delay` before it takes effect.
    pub fn delay(&self, op: &'static str, delay: Duration) {
        lock(&self.delays).insert(op, delay);
    }

    /// Drop `name` as soon as it is stopped, like a sandbox created with
    /// auto-removal.
    pub fn remove_on_stop(&self, name: &str) {
        lock(&self.auto_remove).insert(name.to_owned());
    }

    /// Lines yielded by `build_image`.
    pub fn set_build_output(&self, lines: Vec<String>) {
        *lock(&self.build_output) = lines;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.calls).clone()
    }

    /// Calls made so far, excluding read-only ones (`inspect`, `list`, `ping`).
    pub fn mutations(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, EngineCall::Inspect(_) | EngineCall::List(_) | EngineCall::Ping))
            .collect()
    }

    /// Archives uploaded so far as `(id, dest, archive)`.
    pub fn uploads(&self) -> Vec<(String, String, Bytes)> {
        lock(&self.uploads).clone()
    }

    /// Names of existing sandboxes.
    pub fn names(&self) -> Vec<String> {
        self.lock_sandboxes().keys().cloned().collect()
    }

    /// Status of one sandbox.
    pub fn status(&self, name: &str) -> Option<SandboxStatus> {
        self.lock_sandboxes().get(name).map(|s| s.status)
    }

    fn lock_sandboxes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MockSandbox>> {
        lock(&self.sandboxes)
    }

    async fn record(&self, call: EngineCall, target: &str) -> Result<()> {
        let op = call.op();
        lock(&self.calls).push(call);

        let delay = lock(&self.delays).get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.failures).contains(&(op, target.to_owned())) {
            return Err(EngineError::Operation {
                operation: op,
                target: target.to_owned(),
                message: "injected failure".to_owned(),
            });
        }
        Ok(())
    }

    fn with_sandbox<T>(&self, id: &str, f: impl FnOnce(&mut MockSandbox) -> T) -> Result<T> {
        self.lock_sandboxes()
            .get_mut(id)
            .map(f)
            .ok_or_else(|| EngineError::NotFound(id.to_owned()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SandboxEngine for MockEngine {
    async fn ping(&self) -> Result<()> {
        self.record(EngineCall::Ping, "").await
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId> {
        self.record(
            EngineCall::Create {
                name: spec.name.clone(),
                image: spec.image.clone(),
            },
            &spec.name,
        )
        .await?;

        let mut sandboxes = self.lock_sandboxes();
        if sandboxes.contains_key(&spec.name) {
            return Err(EngineError::AlreadyExists(spec.name.clone()));
        }
        sandboxes.insert(
            spec.name.clone(),
            MockSandbox {
                status: SandboxStatus::default(),
            },
        );
        Ok(spec.name.clone())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record(EngineCall::Start(id.to_owned()), id).await?;
        self.with_sandbox(id, |s| s.status.running = true)
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        self.record(EngineCall::Stop(id.to_owned()), id).await?;
        self.with_sandbox(id, |s| s.status = SandboxStatus::default())?;
        if lock(&self.auto_remove).contains(id) {
            self.lock_sandboxes().remove(id);
        }
        Ok(())
    }

    async fn restart(&self, id: &str, _grace: Duration) -> Result<()> {
        self.record(EngineCall::Restart(id.to_owned()), id).await?;
        self.with_sandbox(id, |s| {
            s.status = SandboxStatus {
                running: true,
                paused: false,
            }
        })
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.record(EngineCall::Remove(id.to_owned()), id).await?;
        let running = self.with_sandbox(id, |s| s.status.running)?;
        if running && !force {
            return Err(EngineError::Operation {
                operation: "remove",
                target: id.to_owned(),
                message: "sandbox is running".to_owned(),
            });
        }
        self.lock_sandboxes().remove(id);
        Ok(())
    }

    async fn resume(&self, id: &str) -> Result<()> {
        self.record(EngineCall::Resume(id.to_owned()), id).await?;
        self.with_sandbox(id, |s| s.status.paused = false)
    }

    async fn inspect(&self, id: &str) -> Result<SandboxStatus> {
        self.record(EngineCall::Inspect(id.to_owned()), id).await?;
        self.with_sandbox(id, |s| s.status)
    }

    async fn list(&self, filter: &NameFilter) -> Result<Vec<SandboxSummary>> {
        self.record(EngineCall::List(filter.to_string()), filter.as_str())
            .await?;
        Ok(self
            .lock_sandboxes()
            .iter()
            .filter(|(name, _)| filter.matches(name))
            .map(|(name, sandbox)| SandboxSummary {
                id: name.clone(),
                name: name.clone(),
                status: sandbox.status,
            })
            .collect())
    }

    async fn copy_archive(&self, id: &str, dest: &str, archive: Bytes) -> Result<()> {
        self.record(
            EngineCall::CopyArchive {
                id: id.to_owned(),
                dest: dest.to_owned(),
            },
            id,
        )
        .await?;
        self.with_sandbox(id, |_| ())?;
        lock(&self.uploads).push((id.to_owned(), dest.to_owned(), archive));
        Ok(())
    }

    fn build_image(
        &self,
        _context: Bytes,
        _dockerfile: &str,
        tag: &str,
    ) -> BoxStream<'_, Result<String>> {
        lock(&self.calls).push(EngineCall::BuildImage {
            tag: tag.to_owned(),
        });
        let mut items: Vec<Result<String>> =
            lock(&self.build_output).iter().cloned().map(Ok).collect();
        if lock(&self.failures).contains(&("build_image", tag.to_owned())) {
            items.push(Err(EngineError::Build("injected failure".to_owned())));
        }
        stream::iter(items).boxed()
    }
}
