//! The sandbox engine seam.
//!
//! Everything above this trait is engine-agnostic. [`DockerEngine`] talks to
//! a real container daemon; tests drive the same code paths through
//! [`MockEngine`].
//!
//! [`DockerEngine`]: crate::DockerEngine
//! [`MockEngine`]: crate::MockEngine

use crate::error::Result;
use crate::filter::NameFilter;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;

/// Identifier assigned to a sandbox by the engine.
pub type SandboxId = String;

/// One host-to-sandbox TCP port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortBinding {
    /// Port inside the sandbox.
    pub sandbox_port: u16,
    /// Port published on the host.
    pub host_port: u16,
}

impl PortBinding {
    /// Map `sandbox_port` to `host_port`.
    pub fn new(sandbox_port: u16, host_port: u16) -> Self {
        Self {
            sandbox_port,
            host_port,
        }
    }
}

/// Everything needed to create one sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    /// Image reference (`repo:tag`).
    pub image: String,
    /// Sandbox name, unique per engine.
    pub name: String,
    /// Published ports.
    pub port_bindings: Vec<PortBinding>,
    /// Labels attached at creation.
    pub labels: HashMap<String, String>,
}

impl SandboxSpec {
    /// Create a spec with no ports and no labels.
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Publish `sandbox_port` on `host_port`.
    pub fn port(mut self, sandbox_port: u16, host_port: u16) -> Self {
        self.port_bindings
            .push(PortBinding::new(sandbox_port, host_port));
        self
    }

    /// Attach a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Run state of a sandbox as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SandboxStatus {
    /// The sandbox process is running (paused sandboxes are running too).
    pub running: bool,
    /// The sandbox is frozen.
    pub paused: bool,
}

/// A sandbox returned from [`SandboxEngine::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSummary {
    /// Engine id.
    pub id: SandboxId,
    /// Name without the leading `/`.
    pub name: String,
    /// Last known state.
    pub status: SandboxStatus,
}

/// Operations regnet needs from a container engine.
///
/// Implementations must be safe to call concurrently for different
/// sandboxes; callers never issue conflicting calls for the same one.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Check that the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Create a sandbox. Fails with `AlreadyExists` on a name conflict.
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId>;

    /// Start a created sandbox.
    async fn start(&self, id: &str) -> Result<()>;

    /// Request a graceful stop, killing the sandbox after `grace`.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Stop then start a sandbox, killing it after `grace` if needed.
    async fn restart(&self, id: &str, grace: Duration) -> Result<()>;

    /// Remove a sandbox. With `force`, a running sandbox is killed first.
    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Resume a paused sandbox.
    async fn resume(&self, id: &str) -> Result<()>;

    /// Current run state.
    async fn inspect(&self, id: &str) -> Result<SandboxStatus>;

    /// All sandboxes, running or not, whose name passes `filter`.
    async fn list(&self, filter: &NameFilter) -> Result<Vec<SandboxSummary>>;

    /// Extract a tar archive into `dest` inside the sandbox.
    async fn copy_archive(&self, id: &str, dest: &str, archive: Bytes) -> Result<()>;

    /// Build an image from a tar build context, streaming progress lines.
    ///
    /// A build error is yielded as the last item of the stream.
    fn build_image(
        &self,
        context: Bytes,
        dockerfile: &str,
        tag: &str,
    ) -> BoxStream<'_, Result<String>>;
}
