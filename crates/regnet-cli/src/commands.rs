//! `up` and `down`.

use crate::codebase::{self, Codebase, DOCKERFILE_NAME};
use crate::config::RegnetConfig;
use anyhow::Context;
use regnet_core::{
    BuildRequest, ChainSettings, DockerExecRunner, EnvironmentConfig, Orchestrator, Timings,
    Topology, WalletDescriptor, DEFAULT_IMAGE, DEFAULT_PREFIX,
};
use regnet_engine::{DockerEngine, LifecycleManager, SandboxEngine};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Arguments of `regnet up`.
#[derive(Debug, clap::Args)]
pub struct UpArgs {
    /// Path to the chain codebase
    pub codebase: PathBuf,

    /// Test wallet (repeatable)
    #[arg(short, long = "wallet", value_name = "TICKER,address,rpcuser,rpcpass[,ipv4]")]
    pub wallets: Vec<String>,

    /// Use a prebuilt chain image instead of building the codebase
    #[arg(long, value_name = "IMAGE")]
    pub image: Option<String>,
}

/// Build, start and bootstrap the local environment.
pub async fn up(config: &RegnetConfig, args: UpArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    config.validate()?;
    let codebase = Codebase::open(&args.codebase)?;
    let host_ip = config
        .resolve_host_ip()
        .context("failed to detect host address, set REGNET_HOST_IP")?;

    if args.wallets.is_empty() {
        tracing::warn!("No wallets specified. Use --wallet TICKER,address,rpcuser,rpcpass[,ipv4]");
    }
    let wallets = args
        .wallets
        .iter()
        .map(|w| WalletDescriptor::parse(w, host_ip))
        .collect::<Result<Vec<_>, _>>()?;
    let tickers: Vec<&str> = wallets.iter().map(|w| w.kind.ticker()).collect();

    let chain = ChainSettings::default();
    let (image, build) = match args.image {
        Some(image) => {
            tracing::info!(image = %image, "Using prebuilt image");
            (image, None)
        }
        None => {
            let build = prepare_build(config, &codebase, &chain).await?;
            (DEFAULT_IMAGE.to_owned(), Some(build))
        }
    };

    let environment = environment(config, host_ip, &chain, wallets, &image)?;
    let orchestrator = Orchestrator::new(environment, connect().await?, Arc::new(DockerExecRunner::new()));

    orchestrator.start(build, cancel).await?;

    let environment = orchestrator.config();
    for node in environment.topology.sandboxed() {
        tracing::info!(
            "Sample rpc call {}: docker exec {} {} {}",
            node.short_name,
            node.sandbox_name,
            node.cli,
            environment.chain.readiness_command
        );
    }
    tracing::info!(path = %environment.summary_path().display(), "Environment summary written");
    if !tickers.is_empty() {
        tracing::info!(wallets = %tickers.join(","), "Wallets enabled");
    }
    tracing::info!("Successfully started localenv");
    Ok(())
}

/// Stop the local environment and restore the codebase.
pub async fn down(config: &RegnetConfig, path: PathBuf, cancel: &CancellationToken) -> anyhow::Result<()> {
    let codebase = Codebase::open(path)?;

    if let Some(patch) = &config.genesis_patch {
        if let Err(e) = codebase.revert_patch(patch).await {
            tracing::error!(error = %e, "Failed to remove genesis patch");
        }
    }
    if let Err(e) = codebase.remove_dockerfile().await {
        tracing::error!(error = %e, "Failed to remove Dockerfile");
    }

    // Teardown only needs the sandbox prefix; any address will do offline.
    let host_ip = config.resolve_host_ip().unwrap_or(Ipv4Addr::LOCALHOST);
    let chain = ChainSettings::default();
    let environment = environment(config, host_ip, &chain, Vec::new(), DEFAULT_IMAGE)?;
    let orchestrator = Orchestrator::new(environment, connect().await?, Arc::new(DockerExecRunner::new()));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            anyhow::bail!("terminated before resource clean up");
        }
        result = orchestrator.stop() => result?,
    }

    tracing::info!("Successfully shutdown localenv");
    Ok(())
}

async fn prepare_build(
    config: &RegnetConfig,
    codebase: &Codebase,
    chain: &ChainSettings,
) -> anyhow::Result<BuildRequest> {
    codebase.check_cli(&chain.cli)?;

    if let Some(patch) = &config.genesis_patch {
        codebase.apply_patch(patch).await?;
    }

    let wallet_data = match &config.wallet_data {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read wallet data {}", path.display()))?,
        ),
        None => None,
    };

    let dockerfile = codebase::dockerfile(chain, wallet_data.is_some());
    codebase.write_dockerfile(&dockerfile).await?;

    let context = {
        let codebase = codebase.clone();
        let chain = chain.clone();
        tokio::task::spawn_blocking(move || codebase.build_context(&chain, &dockerfile, wallet_data))
            .await??
    };

    Ok(BuildRequest {
        context,
        dockerfile: DOCKERFILE_NAME.to_owned(),
        tag: DEFAULT_IMAGE.to_owned(),
    })
}

fn environment(
    config: &RegnetConfig,
    host_ip: Ipv4Addr,
    chain: &ChainSettings,
    wallets: Vec<WalletDescriptor>,
    image: &str,
) -> anyhow::Result<EnvironmentConfig> {
    let topology = Topology::default_localenv(DEFAULT_PREFIX, host_ip, chain, wallets)?;
    let environment = EnvironmentConfig::builder()
        .config_path(config.localenv_dir())
        .prefix(DEFAULT_PREFIX)
        .default_image(image)
        .topology(topology)
        .chain(chain.clone())
        .timings(Timings {
            readiness_timeout: config.ready_timeout,
            ..Timings::default()
        })
        .build()?;

    tracing::debug!(
        run_id = %environment.run_id,
        host_ip = %host_ip,
        nodes = environment.topology.nodes().len(),
        wallets = environment.topology.wallets().len(),
        "Environment configured"
    );
    Ok(environment)
}

/// Connect to the container engine and check it answers.
async fn connect() -> anyhow::Result<LifecycleManager> {
    let engine = DockerEngine::connect()?;
    engine.ping().await.context("container engine is not reachable")?;
    Ok(LifecycleManager::new(Arc::new(engine)))
}
