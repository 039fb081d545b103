//! The bootstrap orchestrator.
//!
//! [`Orchestrator::start`] takes an environment from nothing to a funded,
//! activated network:
//!
//! ```text
//! NotStarted → ImagesBuilding → ContainersStarting → AwaitingReadiness
//!   → Bootstrapping(1..10) → AwaitingRestartReadiness → Activating → Ready
//! ```
//!
//! Phases run strictly in order and the first failure aborts the run,
//! wrapped with the failing phase. Nothing is rolled back; call
//! [`Orchestrator::stop`] to tear down.
//!
//! Cancellation is checked before every engine call, remote command and
//! phase, and interrupts settle delays and readiness waits. A call already
//! in flight finishes; nothing new starts after cancellation is observed.

use crate::config::EnvironmentConfig;
use crate::emitter;
use crate::error::{CoreError, Result};
use crate::exec::CommandRunner;
use crate::phase::{BootstrapState, Phase};
use crate::probe::{ProbeTarget, ReadinessProber};
use crate::registration::{CollateralOutput, ServiceNodeRegistration};
use crate::topology::Node;
use bytes::Bytes;
use futures::StreamExt;
use regnet_engine::{bundle, EngineError, LifecycleManager, NameFilter, SandboxId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// An image to build before any sandbox is created.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Tar build context.
    pub context: Bytes,
    /// Dockerfile path inside the context.
    pub dockerfile: String,
    /// Tag for the built image.
    pub tag: String,
}

/// Drives one environment through its lifecycle.
pub struct Orchestrator {
    config: Arc<EnvironmentConfig>,
    lifecycle: LifecycleManager,
    runner: Arc<dyn CommandRunner>,
    prober: ReadinessProber,
    state: watch::Sender<BootstrapState>,
    /// Sandbox name -> engine id, for sandboxes created by this run.
    sandboxes: Mutex<HashMap<String, SandboxId>>,
}

impl Orchestrator {
    /// Create an orchestrator for `config`.
    pub fn new(
        config: EnvironmentConfig,
        lifecycle: LifecycleManager,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let lifecycle = lifecycle.with_stop_grace(config.timings.stop_grace);
        let prober = ReadinessProber::new(
            Arc::clone(&runner),
            config.chain.readiness_command.clone(),
            config.timings.poll_interval,
        );
        let (state, _) = watch::channel(BootstrapState::NotStarted);

        Self {
            config: Arc::new(config),
            lifecycle,
            runner,
            prober,
            state,
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    /// The run configuration.
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> BootstrapState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    /// Build (optionally), start and bootstrap the environment.
    pub async fn start(&self, build: Option<BuildRequest>, cancel: &CancellationToken) -> Result<()> {
        let span = tracing::info_span!("start", run_id = %self.config.run_id);
        let started = Instant::now();

        match self.run(build, cancel).instrument(span).await {
            Ok(()) => {
                self.transition(BootstrapState::Ready);
                tracing::info!(
                    elapsed_secs = started.elapsed().as_secs(),
                    "Environment ready"
                );
                Ok(())
            }
            Err(e) => {
                self.transition(BootstrapState::Failed);
                if e.is_cancelled() {
                    tracing::warn!("Environment start cancelled");
                } else {
                    tracing::error!(error = %e, "Environment start failed");
                }
                Err(e)
            }
        }
    }

    /// Stop and remove every sandbox of this environment.
    ///
    /// Every sandbox is attempted even if some fail; the first failure is
    /// returned. With nothing to remove this is a no-op.
    pub async fn stop(&self) -> Result<()> {
        self.transition(BootstrapState::Stopped);
        let filter = self.config.all_filter()?;

        let report = self
            .lifecycle
            .stop_all_matching(&filter, false, self.config.timings.fan_out_deadline)
            .await?;
        self.lock_sandboxes().clear();

        if report.total() == 0 {
            tracing::info!("No environment sandboxes to remove");
        }
        report.into_result().map_err(CoreError::from)
    }

    // ========================================================================
    // Stages
    // ========================================================================

    async fn run(&self, build: Option<BuildRequest>, cancel: &CancellationToken) -> Result<()> {
        if let Some(build) = build {
            checkpoint(cancel)?;
            self.transition(BootstrapState::ImagesBuilding);
            self.build_image(&build, cancel).await?;
        }

        checkpoint(cancel)?;
        self.write_summary().await?;

        self.transition(BootstrapState::ContainersStarting);
        self.remove_stale(cancel).await?;
        self.start_sandboxes(cancel).await?;

        checkpoint(cancel)?;
        self.transition(BootstrapState::AwaitingReadiness);
        let chain_nodes: Vec<ProbeTarget> = self
            .config
            .topology
            .nodes()
            .iter()
            .map(ProbeTarget::node)
            .collect();
        self.prober
            .await_ready(chain_nodes, self.config.timings.readiness_timeout, cancel)
            .await?;

        self.bootstrap(cancel).await
    }

    async fn build_image(&self, build: &BuildRequest, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(tag = %build.tag, context_bytes = build.context.len(), "Building image, please wait...");
        let started = Instant::now();

        let mut progress =
            self.lifecycle
                .build_image(build.context.clone(), &build.dockerfile, &build.tag);
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                item = progress.next() => item,
            };
            match item {
                Some(Ok(line)) => tracing::info!(target: "regnet::build", "{line}"),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        tracing::info!(tag = %build.tag, elapsed_secs = started.elapsed().as_secs(), "Image built");
        Ok(())
    }

    async fn write_summary(&self) -> Result<()> {
        let path = self.config.summary_path();
        tokio::fs::create_dir_all(&self.config.config_path).await?;

        let body = emitter::chain_config(&self.config.topology, &self.config.chain, None, None);
        let contents = format!(
            "# regnet environment summary, generated {}\n{body}",
            chrono::Utc::now().to_rfc3339()
        );
        tokio::fs::write(&path, contents).await?;

        tracing::debug!(path = %path.display(), "Environment summary written");
        Ok(())
    }

    /// Best effort: leftovers from an earlier run never abort the start.
    async fn remove_stale(&self, cancel: &CancellationToken) -> Result<()> {
        checkpoint(cancel)?;
        tracing::info!("Removing previous environment sandboxes...");

        let filter = self.config.all_filter()?;
        match self
            .lifecycle
            .stop_all_matching(&filter, true, self.config.timings.fan_out_deadline)
            .await
        {
            Ok(report) if !report.is_clean() => {
                tracing::warn!(failed = report.failed.len(), "Some stale sandboxes could not be removed");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to remove stale sandboxes"),
        }
        Ok(())
    }

    async fn start_sandboxes(&self, cancel: &CancellationToken) -> Result<()> {
        let topology = &self.config.topology;
        for node in topology.sandboxed() {
            checkpoint(cancel)?;
            let spec = node.sandbox_spec(&self.config.default_image);
            let id = self.lifecycle.create_and_start(&spec).await?;
            self.lock_sandboxes().insert(node.sandbox_name.clone(), id);

            match node.debug_port {
                Some(debug_port) => tracing::info!(
                    sandbox = %node.sandbox_name,
                    port = node.port,
                    rpc_port = node.rpc_port,
                    debug_port,
                    "Node running"
                ),
                None => tracing::info!(
                    sandbox = %node.sandbox_name,
                    port = node.port,
                    rpc_port = node.rpc_port,
                    "Node running"
                ),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Bootstrap phases
    // ========================================================================

    async fn bootstrap(&self, cancel: &CancellationToken) -> Result<()> {
        self.enter(Phase::SeedFunding, cancel)?;
        self.seed_funding(cancel).await.map_err(|e| e.during(Phase::SeedFunding))?;

        self.enter(Phase::AliasFunding, cancel)?;
        self.alias_funding(cancel).await.map_err(|e| e.during(Phase::AliasFunding))?;

        self.enter(Phase::CollateralDistribution, cancel)?;
        self.distribute_collateral(cancel)
            .await
            .map_err(|e| e.during(Phase::CollateralDistribution))?;

        self.enter(Phase::InputFragmentation, cancel)?;
        self.fragment_inputs(cancel)
            .await
            .map_err(|e| e.during(Phase::InputFragmentation))?;

        self.enter(Phase::ChainFinalization, cancel)?;
        self.finalize_chain(cancel)
            .await
            .map_err(|e| e.during(Phase::ChainFinalization))?;

        self.enter(Phase::KeyGeneration, cancel)?;
        let keys = self
            .generate_keys(cancel)
            .await
            .map_err(|e| e.during(Phase::KeyGeneration))?;

        self.enter(Phase::CollateralDiscovery, cancel)?;
        let outputs = self
            .discover_collateral(cancel)
            .await
            .map_err(|e| e.during(Phase::CollateralDiscovery))?;

        self.enter(Phase::RegistrationAssembly, cancel)?;
        let service_nodes: Vec<&Node> = self.config.topology.service_nodes().collect();
        let registrations = ServiceNodeRegistration::pair(
            &service_nodes,
            &keys,
            &outputs,
            self.config.topology.host_ip(),
        )
        .map_err(|e| e.during(Phase::RegistrationAssembly))?;

        self.enter(Phase::ConfigurationFanOut, cancel)?;
        self.fan_out_configuration(&registrations, cancel)
            .await
            .map_err(|e| e.during(Phase::ConfigurationFanOut))?;

        self.enter(Phase::ControlledRestart, cancel)?;
        self.controlled_restart(cancel)
            .await
            .map_err(|e| e.during(Phase::ControlledRestart))?;

        checkpoint(cancel)?;
        self.transition(BootstrapState::Activating);
        tracing::info!(phase = %Phase::Activation, "Bootstrap phase");
        self.activate(cancel).await.map_err(|e| e.during(Phase::Activation))
    }

    async fn seed_funding(&self, cancel: &CancellationToken) -> Result<()> {
        let funding = &self.config.funding;
        let activator = self.config.topology.activator();
        let batch = vec![
            format!("importprivkey {} {}", funding.seed_key, funding.seed_label),
            format!("setgenerate true {}", funding.initial_blocks),
        ];

        let output = self.batch(activator, &batch, cancel).await?;
        if output.trim().is_empty() {
            return Err(CoreError::Command {
                sandbox: activator.sandbox_name.clone(),
                exe: activator.cli.clone(),
                args: batch.join(" && "),
                message: "unexpected empty output".into(),
            });
        }
        Ok(())
    }

    async fn alias_funding(&self, cancel: &CancellationToken) -> Result<()> {
        let batch: Vec<String> = self
            .config
            .topology
            .service_nodes()
            .filter_map(|node| {
                node.alias()
                    .map(|alias| format!("importprivkey {} {}", alias.private_key, node.short_name))
            })
            .collect();
        self.batch(self.config.topology.activator(), &batch, cancel)
            .await
            .map(drop)
    }

    async fn distribute_collateral(&self, cancel: &CancellationToken) -> Result<()> {
        let amount = self.config.funding.collateral_amount;
        let batch: Vec<String> = self
            .config
            .topology
            .service_nodes()
            .filter_map(|node| node.alias())
            .map(|alias| format!("sendtoaddress {} {amount}", alias.address))
            .collect();
        self.batch(self.config.topology.activator(), &batch, cancel)
            .await
            .map(drop)
    }

    async fn fragment_inputs(&self, cancel: &CancellationToken) -> Result<()> {
        let funding = &self.config.funding;
        let send = format!(
            "sendtoaddress {} {}",
            funding.seed_address, funding.fragment_amount
        );
        let batch = vec![send; funding.fragment_count as usize];
        self.batch(self.config.topology.activator(), &batch, cancel)
            .await
            .map(drop)
    }

    async fn finalize_chain(&self, cancel: &CancellationToken) -> Result<()> {
        let command = format!("setgenerate true {}", self.config.funding.final_blocks);
        self.command(self.config.topology.activator(), &command, cancel)
            .await
            .map(drop)
    }

    /// One key per service node, in topology order.
    async fn generate_keys(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for node in self.config.topology.service_nodes() {
            let output = self
                .command(node, &self.config.chain.keygen_command, cancel)
                .await?;
            let key = output.trim();
            if key.is_empty() {
                return Err(CoreError::Command {
                    sandbox: node.sandbox_name.clone(),
                    exe: node.cli.clone(),
                    args: self.config.chain.keygen_command.clone(),
                    message: "unexpected empty output".into(),
                });
            }
            keys.push(key.to_owned());
        }
        Ok(keys)
    }

    async fn discover_collateral(&self, cancel: &CancellationToken) -> Result<Vec<CollateralOutput>> {
        let raw = self
            .command(
                self.config.topology.activator(),
                &self.config.chain.outputs_command,
                cancel,
            )
            .await?;
        let outputs = CollateralOutput::parse_list(&raw)?;

        let expected = self.config.topology.service_nodes().count();
        if outputs.len() != expected {
            return Err(CoreError::Parse(format!(
                "discovered {} collateral outputs for {expected} service nodes",
                outputs.len()
            )));
        }
        Ok(outputs)
    }

    async fn fan_out_configuration(
        &self,
        registrations: &[ServiceNodeRegistration],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let topology = &self.config.topology;
        let chain = &self.config.chain;

        let registry = single_file(&chain.registry_file, emitter::registry(registrations))?;
        let bridge = single_file(&chain.bridge_file, emitter::bridge_config(topology.wallets()))?;

        let activator = topology.activator();
        self.upload(activator, &chain.network_dir, registry.clone(), cancel)
            .await?;
        let conf = emitter::chain_config(topology, chain, Some(activator.id), None);
        self.upload(activator, &chain.config_dir, single_file(&chain.conf_file, conf)?, cancel)
            .await?;

        for (node, registration) in topology.service_nodes().zip(registrations) {
            let conf = emitter::chain_config(topology, chain, Some(node.id), Some(&registration.key));
            self.upload(node, &chain.config_dir, single_file(&chain.conf_file, conf)?, cancel)
                .await?;
            self.upload(node, &chain.network_dir, registry.clone(), cancel)
                .await?;
            self.upload(node, &chain.data_dir, bridge.clone(), cancel)
                .await?;
        }
        Ok(())
    }

    /// Activator down, service nodes restarted, activator restarted last.
    async fn controlled_restart(&self, cancel: &CancellationToken) -> Result<()> {
        let activator = self.config.topology.activator();

        checkpoint(cancel)?;
        self.lifecycle.stop(&self.sandbox_id(activator)).await?;

        let topology = &self.config.topology;
        let service_nodes: Vec<&Node> = topology.service_nodes().collect();
        checkpoint(cancel)?;
        self.restart_matching(&self.config.service_node_filter()?, &service_nodes)
            .await?;
        checkpoint(cancel)?;
        self.restart_matching(&self.config.activator_filter()?, &[activator])
            .await?;

        checkpoint(cancel)?;
        self.transition(BootstrapState::AwaitingRestartReadiness);
        let targets: Vec<ProbeTarget> = topology
            .sandboxed()
            .map(ProbeTarget::node)
            .chain(topology.external_wallets().map(ProbeTarget::external_wallet))
            .collect();
        self.prober
            .await_ready(targets, self.config.timings.readiness_timeout, cancel)
            .await
    }

    async fn activate(&self, cancel: &CancellationToken) -> Result<()> {
        let activator = self.config.topology.activator();
        let start_all = &self.config.chain.start_all_command;
        let timings = &self.config.timings;

        self.command(activator, start_all, cancel).await?;
        settle(timings.activation_settle, cancel).await?;

        checkpoint(cancel)?;
        self.restart_matching(&self.config.activator_filter()?, &[activator])
            .await?;
        self.prober
            .await_ready(vec![ProbeTarget::node(activator)], timings.readiness_timeout, cancel)
            .await?;

        settle(timings.restart_settle, cancel).await?;
        self.command(activator, start_all, cancel).await.map(drop)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn enter(&self, phase: Phase, cancel: &CancellationToken) -> Result<()> {
        checkpoint(cancel)?;
        self.transition(BootstrapState::Bootstrapping(phase));
        tracing::info!(phase = %phase, "Bootstrap phase");
        Ok(())
    }

    fn transition(&self, next: BootstrapState) {
        let current = self.state();
        if current.can_advance_to(next) {
            self.state.send_replace(next);
            tracing::debug!(from = %current, to = %next, "State transition");
        } else {
            tracing::warn!(from = %current, to = %next, "Ignoring backward state transition");
        }
    }

    async fn command(&self, node: &Node, args: &str, cancel: &CancellationToken) -> Result<String> {
        checkpoint(cancel)?;
        let output = self.runner.run(&node.sandbox_name, &node.cli, args).await?;
        tracing::debug!(sandbox = %node.sandbox_name, output = %output.trim(), "Command output");
        Ok(output)
    }

    /// A batch is one unit of in-flight work.
    async fn batch(&self, node: &Node, batch: &[String], cancel: &CancellationToken) -> Result<String> {
        if batch.is_empty() {
            return Ok(String::new());
        }
        checkpoint(cancel)?;
        let output = self
            .runner
            .run_batch(&node.sandbox_name, &node.cli, batch)
            .await?;
        tracing::debug!(sandbox = %node.sandbox_name, commands = batch.len(), "Batch completed");
        Ok(output)
    }

    async fn upload(
        &self,
        node: &Node,
        dest: &str,
        archive: Bytes,
        cancel: &CancellationToken,
    ) -> Result<()> {
        checkpoint(cancel)?;
        self.lifecycle
            .copy_archive(&self.sandbox_id(node), dest, archive)
            .await?;
        Ok(())
    }

    /// Per-sandbox failures are logged. A missed deadline fails, and so
    /// does a filter that did not select every node in `expected`.
    async fn restart_matching(&self, filter: &NameFilter, expected: &[&Node]) -> Result<()> {
        let report = self
            .lifecycle
            .restart_all_matching(filter, self.config.timings.fan_out_deadline)
            .await?;
        for (name, error) in &report.failed {
            tracing::error!(sandbox = %name, error = %error, "Restart failed");
        }

        let selected = |name: &str| {
            report.succeeded.iter().any(|n| n == name)
                || report.failed.iter().any(|(n, _)| n == name)
        };
        if let Some(missed) = expected.iter().find(|node| !selected(&node.sandbox_name)) {
            return Err(EngineError::Operation {
                operation: "restart",
                target: missed.sandbox_name.clone(),
                message: format!("not selected by filter {filter}"),
            }
            .into());
        }
        Ok(())
    }

    fn sandbox_id(&self, node: &Node) -> SandboxId {
        self.lock_sandboxes()
            .get(&node.sandbox_name)
            .cloned()
            .unwrap_or_else(|| node.sandbox_name.clone())
    }

    fn lock_sandboxes(&self) -> std::sync::MutexGuard<'_, HashMap<String, SandboxId>> {
        self.sandboxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    Ok(())
}

async fn settle(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn single_file(name: &str, contents: String) -> Result<Bytes> {
    let mut files = BTreeMap::new();
    files.insert(name, contents);
    Ok(bundle(&files)?)
}
