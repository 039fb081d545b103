//! Run-scoped configuration.

use crate::error::{CoreError, Result};
use crate::topology::{Topology, ACTIVATOR_STEM, SERVICE_NODE_STEM};
use regnet_engine::NameFilter;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Default sandbox name prefix.
pub const DEFAULT_PREFIX: &str = "regnet-localenv-";

/// Default image built from a local codebase.
pub const DEFAULT_IMAGE: &str = "regnet/chain:localenv";

/// File layout, credentials and RPC vocabulary of the chain under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSettings {
    /// CLI used for every remote command.
    pub cli: String,
    /// Chain configuration file name.
    pub conf_file: String,
    /// Directory holding `conf_file` inside a sandbox.
    pub config_dir: String,
    /// Chain data directory inside a sandbox.
    pub data_dir: String,
    /// Network-specific data directory inside a sandbox.
    pub network_dir: String,
    /// Service-node registry file name.
    pub registry_file: String,
    /// Bridge configuration file name.
    pub bridge_file: String,
    /// RPC user baked into the image.
    pub rpc_user: String,
    /// RPC password baked into the image.
    pub rpc_password: String,
    /// P2P port inside a sandbox.
    pub p2p_port: u16,
    /// RPC port inside a sandbox.
    pub rpc_port: u16,
    /// Debugger port inside a sandbox.
    pub debug_port: u16,
    /// Liveness command.
    pub readiness_command: String,
    /// Generates a service-node key.
    pub keygen_command: String,
    /// Lists collateral outputs as JSON.
    pub outputs_command: String,
    /// Starts every registered service node.
    pub start_all_command: String,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            cli: "blocknetdx-cli".into(),
            conf_file: "blocknetdx.conf".into(),
            config_dir: "/opt/blockchain/config/".into(),
            data_dir: "/opt/blockchain/regnet/".into(),
            network_dir: "/opt/blockchain/regnet/testnet4/".into(),
            registry_file: "servicenode.conf".into(),
            bridge_file: "xbridge.conf".into(),
            rpc_user: "regnet".into(),
            rpc_password: "test".into(),
            p2p_port: 41476,
            rpc_port: 41419,
            debug_port: 41475,
            readiness_command: "getinfo".into(),
            keygen_command: "servicenode genkey".into(),
            outputs_command: "servicenode outputs".into(),
            start_all_command: "servicenode start-all".into(),
        }
    }
}

/// Every wait, grace period and deadline of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Maximum wait for a readiness probe (default: 45s).
    pub readiness_timeout: Duration,
    /// Delay between readiness rounds (default: 2s).
    pub poll_interval: Duration,
    /// Grace period before a stopping sandbox is killed (default: 30s).
    pub stop_grace: Duration,
    /// Pause after the first activation (default: 10s).
    pub activation_settle: Duration,
    /// Pause before the repeated activation (default: 5s).
    pub restart_settle: Duration,
    /// Deadline for each bulk stop or restart (default: 180s).
    pub fan_out_deadline: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(45),
            poll_interval: Duration::from_secs(2),
            stop_grace: Duration::from_secs(30),
            activation_settle: Duration::from_secs(10),
            restart_settle: Duration::from_secs(5),
            fan_out_deadline: Duration::from_secs(180),
        }
    }
}

/// Funding parameters of the bootstrap.
///
/// The amounts and counts are protocol parameters of the chain under test
/// and are used as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPlan {
    /// Well-known activator key.
    pub seed_key: String,
    /// Address of `seed_key`.
    pub seed_address: String,
    /// Wallet label `seed_key` is imported under.
    pub seed_label: String,
    /// Proof-of-work blocks mined first.
    pub initial_blocks: u32,
    /// Coins sent to each service-node alias.
    pub collateral_amount: u64,
    /// Number of self-sends splitting the activator's funds.
    pub fragment_count: u32,
    /// Amount of each self-send.
    pub fragment_amount: u64,
    /// Proof-of-work blocks mined to mature the sends.
    pub final_blocks: u32,
}

impl Default for FundingPlan {
    fn default() -> Self {
        Self {
            seed_key: "cQiWHyehhhsRFYadBpj5wQRU9HU23GtHSjyPY2hBLccHWeNq6iTY".into(),
            seed_address: "y5zBd8oLQSnTjChTUCfRieTAp5Z31bRwEV".into(),
            seed_label: "coin".into(),
            initial_blocks: 25,
            collateral_amount: 5000,
            fragment_count: 75,
            fragment_amount: 2500,
            final_blocks: 25,
        }
    }
}

/// Everything one run needs, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Local directory holding the environment summary file.
    pub config_path: PathBuf,
    /// Sandbox name prefix.
    pub prefix: String,
    /// Image for chain nodes.
    pub default_image: String,
    /// Nodes and wallets.
    pub topology: Topology,
    /// Chain layout and RPC vocabulary.
    pub chain: ChainSettings,
    /// Waits and deadlines.
    pub timings: Timings,
    /// Funding parameters.
    pub funding: FundingPlan,
    /// Identifier attached to this run's logs.
    pub run_id: Uuid,
}

impl EnvironmentConfig {
    /// Create a new config builder.
    pub fn builder() -> EnvironmentConfigBuilder {
        EnvironmentConfigBuilder::default()
    }

    /// Filter selecting every sandbox of this environment.
    pub fn all_filter(&self) -> Result<NameFilter> {
        self.role_filter("")
    }

    /// Filter selecting sandboxes whose short name starts with `stem`.
    pub fn role_filter(&self, stem: &str) -> Result<NameFilter> {
        Ok(NameFilter::prefixed(&self.prefix, stem)?)
    }

    /// Filter selecting the service nodes.
    pub fn service_node_filter(&self) -> Result<NameFilter> {
        self.role_filter(SERVICE_NODE_STEM)
    }

    /// Filter selecting the activator.
    pub fn activator_filter(&self) -> Result<NameFilter> {
        self.role_filter(ACTIVATOR_STEM)
    }

    /// Path of the rendered environment summary.
    pub fn summary_path(&self) -> PathBuf {
        self.config_path.join(&self.chain.conf_file)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() || self.prefix.chars().any(char::is_whitespace) {
            return Err(CoreError::Validation(format!(
                "invalid sandbox prefix {:?}",
                self.prefix
            )));
        }
        if self.default_image.is_empty() {
            return Err(CoreError::Validation("default_image is required".into()));
        }
        if self.timings.poll_interval.is_zero() {
            return Err(CoreError::Validation("poll_interval must be > 0".into()));
        }
        if self.timings.readiness_timeout < self.timings.poll_interval {
            return Err(CoreError::Validation(
                "readiness_timeout must be at least one poll_interval".into(),
            ));
        }
        for node in self.topology.sandboxed() {
            if !node.sandbox_name.starts_with(&self.prefix) {
                return Err(CoreError::Validation(format!(
                    "sandbox {} does not carry prefix {}",
                    node.sandbox_name, self.prefix
                )));
            }
        }
        self.topology.validate()
    }
}

/// Builder for EnvironmentConfig.
#[derive(Debug, Default)]
pub struct EnvironmentConfigBuilder {
    config_path: Option<PathBuf>,
    prefix: Option<String>,
    default_image: Option<String>,
    topology: Option<Topology>,
    chain: ChainSettings,
    timings: Timings,
    funding: FundingPlan,
}

impl EnvironmentConfigBuilder {
    /// Set the local config directory.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set the sandbox name prefix (default: [`DEFAULT_PREFIX`]).
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the chain node image (default: [`DEFAULT_IMAGE`]).
    pub fn default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = Some(image.into());
        self
    }

    /// Set the topology.
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Set the chain settings.
    pub fn chain(mut self, chain: ChainSettings) -> Self {
        self.chain = chain;
        self
    }

    /// Set the timings.
    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Set the funding plan.
    pub fn funding(mut self, funding: FundingPlan) -> Self {
        self.funding = funding;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<EnvironmentConfig> {
        let config = EnvironmentConfig {
            config_path: self
                .config_path
                .ok_or_else(|| CoreError::Validation("config_path is required".into()))?,
            prefix: self.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_owned()),
            default_image: self
                .default_image
                .unwrap_or_else(|| DEFAULT_IMAGE.to_owned()),
            topology: self
                .topology
                .ok_or_else(|| CoreError::Validation("topology is required".into()))?,
            chain: self.chain,
            timings: self.timings,
            funding: self.funding,
            run_id: Uuid::new_v4(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn topology(prefix: &str) -> Topology {
        Topology::default_localenv(prefix, Ipv4Addr::LOCALHOST, &ChainSettings::default(), vec![])
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let timings = Timings::default();
        assert_eq!(timings.readiness_timeout, Duration::from_secs(45));
        assert_eq!(timings.poll_interval, Duration::from_secs(2));
        assert_eq!(timings.stop_grace, Duration::from_secs(30));

        let funding = FundingPlan::default();
        assert_eq!(funding.fragment_count, 75);
        assert_eq!(funding.collateral_amount, 5000);
    }

    #[test]
    fn test_builder() {
        let config = EnvironmentConfig::builder()
            .config_path("/tmp/regnet")
            .topology(topology(DEFAULT_PREFIX))
            .build()
            .unwrap();

        assert_eq!(config.prefix, DEFAULT_PREFIX);
        assert_eq!(config.default_image, DEFAULT_IMAGE);
        assert_eq!(config.summary_path(), PathBuf::from("/tmp/regnet/blocknetdx.conf"));

        let sn = config.service_node_filter().unwrap();
        assert!(sn.matches("/regnet-localenv-sn1"));
        assert!(!sn.matches("/regnet-localenv-activator"));
        assert!(config.activator_filter().unwrap().matches("/regnet-localenv-activator"));
    }

    #[test]
    fn test_builder_validation_missing_topology() {
        let result = EnvironmentConfig::builder().config_path("/tmp/regnet").build();
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_builder_validation_prefix_mismatch() {
        let result = EnvironmentConfig::builder()
            .config_path("/tmp/regnet")
            .prefix("other-")
            .topology(topology(DEFAULT_PREFIX))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_validation_timings() {
        let result = EnvironmentConfig::builder()
            .config_path("/tmp/regnet")
            .topology(topology(DEFAULT_PREFIX))
            .timings(Timings {
                readiness_timeout: Duration::from_secs(1),
                ..Timings::default()
            })
            .build();
        assert!(result.is_err());
    }
}
