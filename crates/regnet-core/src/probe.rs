//! Readiness probing.
//!
//! A probe runs in its own task and checks every target once per round.
//! A round passes only if every target passes in that same round; there is
//! no credit carried between rounds. The task stops when a round passes,
//! when its handle is cancelled or dropped, or when the parent
//! cancellation token fires.

use crate::error::{CoreError, Result};
use crate::exec::CommandRunner;
use crate::topology::Node;
use crate::wallet::WalletDescriptor;
use futures::future::join_all;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Something whose liveness can be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Run the liveness command with `cli` inside the sandbox.
    Sandbox { name: String, cli: String },
    /// Open a TCP connection to a wallet running outside the environment.
    External { name: String, addr: SocketAddrV4 },
}

impl ProbeTarget {
    /// Probe a sandboxed node through its CLI.
    pub fn node(node: &Node) -> Self {
        ProbeTarget::Sandbox {
            name: node.sandbox_name.clone(),
            cli: node.cli.clone(),
        }
    }

    /// Probe an external wallet's RPC port.
    pub fn external_wallet(wallet: &WalletDescriptor) -> Self {
        ProbeTarget::External {
            name: wallet.kind.ticker().to_owned(),
            addr: SocketAddrV4::new(wallet.ip, wallet.rpc_port),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        match self {
            ProbeTarget::Sandbox { name, .. } | ProbeTarget::External { name, .. } => name,
        }
    }
}

/// Polls targets until all of them respond in one round.
#[derive(Clone)]
pub struct ReadinessProber {
    runner: Arc<dyn CommandRunner>,
    command: String,
    interval: Duration,
}

impl ReadinessProber {
    /// Create a prober running `command` every `interval`.
    pub fn new(runner: Arc<dyn CommandRunner>, command: impl Into<String>, interval: Duration) -> Self {
        Self {
            runner,
            command: command.into(),
            interval,
        }
    }

    /// Start polling in the background.
    ///
    /// The returned handle owns the task; dropping it stops polling.
    pub fn spawn(&self, targets: Vec<ProbeTarget>, parent: &CancellationToken) -> ProbeHandle {
        let cancel = parent.child_token();
        let rounds = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(
            Self::poll_loop(self.clone(), targets, cancel.clone(), Arc::clone(&rounds))
                .in_current_span(),
        );

        ProbeHandle {
            cancel,
            task: Some(task),
            rounds,
        }
    }

    /// Block until every target is ready, `timeout` elapses, or `cancel` fires.
    ///
    /// An empty target set is ready immediately and spawns nothing.
    pub async fn await_ready(
        &self,
        targets: Vec<ProbeTarget>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }
        tracing::info!(
            targets = targets.len(),
            timeout_secs = timeout.as_secs(),
            "Waiting for nodes to be ready"
        );
        self.spawn(targets, cancel).wait(timeout).await
    }

    /// Returns true when a round passed, false when cancelled.
    async fn poll_loop(
        self,
        targets: Vec<ProbeTarget>,
        cancel: CancellationToken,
        rounds: Arc<AtomicU64>,
    ) -> bool {
        let start = Instant::now();
        loop {
            let round = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                round = self.round(&targets) => round,
            };
            let n = rounds.fetch_add(1, Ordering::Relaxed) + 1;

            if round.is_empty() {
                tracing::info!(
                    rounds = n,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "All nodes ready"
                );
                return true;
            }
            tracing::debug!(round = n, not_ready = ?round, "Readiness round failed");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Probe every target concurrently; returns the names that failed.
    async fn round<'a>(&self, targets: &'a [ProbeTarget]) -> Vec<&'a str> {
        let checks = targets.iter().map(|target| async move {
            let ok = match target {
                ProbeTarget::Sandbox { name, cli } => {
                    self.runner.run(name, cli, &self.command).await.is_ok()
                }
                ProbeTarget::External { addr, .. } => {
                    matches!(
                        tokio::time::timeout(self.interval, TcpStream::connect(addr)).await,
                        Ok(Ok(_))
                    )
                }
            };
            (target.name(), ok)
        });

        join_all(checks)
            .await
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

/// Handle to a running probe.
pub struct ProbeHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<bool>>,
    rounds: Arc<AtomicU64>,
}

impl ProbeHandle {
    /// Stop polling.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Rounds completed so far.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Wait for the probe to pass, up to `timeout`.
    ///
    /// On timeout the polling task is stopped and awaited before the
    /// [`CoreError::Timeout`] is returned.
    pub async fn wait(mut self, timeout: Duration) -> Result<()> {
        let Some(mut task) = self.task.take() else {
            return Err(CoreError::Cancelled);
        };

        tokio::select! {
            joined = &mut task => match joined {
                Ok(true) => Ok(()),
                Ok(false) => Err(CoreError::Cancelled),
                Err(e) => Err(CoreError::Io(std::io::Error::other(e))),
            },
            _ = tokio::time::sleep(timeout) => {
                self.cancel.cancel();
                let _ = task.await;
                tracing::warn!(rounds = self.rounds(), timeout_secs = timeout.as_secs(), "Readiness probe timed out");
                Err(CoreError::Timeout(timeout))
            }
        }
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
