//! # regnet-engine
//!
//! Container sandbox layer for regnet test networks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    LifecycleManager                      │
//! │  create_and_start / stop / stop_and_remove               │
//! │  stop_all_matching / restart_all_matching (fan-out)      │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │ Arc<dyn SandboxEngine>
//!              ┌──────────────┴──────────────┐
//!              ▼                             ▼
//!     ┌─────────────────┐          ┌─────────────────┐
//!     │  DockerEngine   │          │   MockEngine    │
//!     │   (bollard)     │          │  (test-util)    │
//!     └─────────────────┘          └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use regnet_engine::{DockerEngine, LifecycleManager, NameFilter, SandboxSpec};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> regnet_engine::Result<()> {
//! let manager = LifecycleManager::new(Arc::new(DockerEngine::connect()?));
//!
//! let spec = SandboxSpec::new("chain:latest", "regnet-localenv-act1").port(41476, 41477);
//! manager.create_and_start(&spec).await?;
//!
//! let everything = NameFilter::prefixed("regnet-localenv-", "")?;
//! manager
//!     .stop_all_matching(&everything, false, Duration::from_secs(180))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod docker;
mod engine;
mod error;
mod filter;
mod lifecycle;
#[cfg(any(test, feature = "test-util"))]
mod mock;

pub use archive::{bundle, BuildContext};
pub use docker::{DockerEngine, MANAGED_LABEL};
pub use engine::{PortBinding, SandboxEngine, SandboxId, SandboxSpec, SandboxStatus, SandboxSummary};
pub use error::{EngineError, Result};
pub use filter::NameFilter;
pub use lifecycle::{BatchReport, LifecycleManager, LifecycleStats, DEFAULT_STOP_GRACE};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{EngineCall, MockEngine};
