//! # regnet-core
//!
//! Topology model and bootstrap orchestration for ephemeral regnet test
//! networks.
//!
//! A run brings up one activator, a set of service nodes and optional
//! wallet sandboxes, then drives the activator through funding, key
//! generation, registration, configuration fan-out, a controlled restart
//! and activation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Orchestrator                        │
//! │  start(): build → sandboxes → readiness → phases 1..11   │
//! │  stop():  stop_all_matching(prefix)                      │
//! └───────┬──────────────────┬──────────────────┬────────────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//! ┌───────────────┐  ┌───────────────┐  ┌─────────────────┐
//! │LifecycleManager│ │ CommandRunner │  │ReadinessProber  │
//! │(regnet-engine) │ │ (docker exec) │  │ (all-ready      │
//! └───────────────┘  └───────────────┘  │  rounds)        │
//!                                       └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use regnet_core::{ChainSettings, DockerExecRunner, EnvironmentConfig, Orchestrator, Topology};
//! use regnet_engine::{DockerEngine, LifecycleManager};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> regnet_core::Result<()> {
//! let chain = ChainSettings::default();
//! let topology = Topology::default_localenv("regnet-localenv-", regnet_core::local_ip()?, &chain, vec![])?;
//! let config = EnvironmentConfig::builder()
//!     .config_path("/home/me/.regnet/localenv")
//!     .topology(topology)
//!     .chain(chain)
//!     .build()?;
//!
//! let lifecycle = LifecycleManager::new(Arc::new(DockerEngine::connect()?));
//! let orchestrator = Orchestrator::new(config, lifecycle, Arc::new(DockerExecRunner::new()));
//!
//! let cancel = CancellationToken::new();
//! orchestrator.start(None, &cancel).await?;
//! // ... use the network ...
//! orchestrator.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Bootstrap**: Eleven ordered phases, each failure tagged with its phase
//! - **Readiness**: Concurrent probing until one round sees every node ready
//! - **Cancellation**: Observed before every side effect
//! - **Wallets**: 17 wallet profiles, sandboxed or bring-your-own

mod config;
mod emitter;
mod error;
mod exec;
mod orchestrator;
mod phase;
mod probe;
mod registration;
mod topology;
mod wallet;

pub use config::{
    ChainSettings, EnvironmentConfig, EnvironmentConfigBuilder, FundingPlan, Timings,
    DEFAULT_IMAGE, DEFAULT_PREFIX,
};
pub use emitter::{bridge_config, chain_config, registry};
pub use error::{CoreError, Result};
pub use exec::{CommandRunner, DockerExecRunner, ExecOutput};
pub use orchestrator::{BuildRequest, Orchestrator};
pub use phase::{BootstrapState, Phase};
pub use probe::{ProbeHandle, ProbeTarget, ReadinessProber};
pub use registration::{CollateralOutput, ServiceNodeRegistration};
pub use topology::{
    local_ip, AliasIdentity, Node, NodeRole, Topology, ACTIVATOR_STEM, SERVICE_NODE_STEM,
};
pub use wallet::{BridgeParams, WalletDescriptor, WalletKind, WalletProfile};
