//! Configuration for the regnet binary.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the regnet binary.
#[derive(Debug, Clone)]
pub struct RegnetConfig {
    /// Directory for regnet state (environment summaries).
    pub home: PathBuf,

    /// Host address advertised to nodes. Detected when unset.
    pub host_ip: Option<Ipv4Addr>,

    /// How long to wait for nodes to answer (default: 45s).
    pub ready_timeout: Duration,

    /// Genesis patch applied to the codebase before building.
    pub genesis_patch: Option<PathBuf>,

    /// Wallet file baked into the chain image.
    pub wallet_data: Option<PathBuf>,

    /// Debug logging.
    pub debug: bool,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("genesis patch not found: {0}")]
    MissingPatch(PathBuf),

    #[error("wallet data not found: {0}")]
    MissingWalletData(PathBuf),

    #[error("ready timeout must be > 0")]
    ZeroTimeout,
}

impl Default for RegnetConfig {
    fn default() -> Self {
        Self {
            home: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".regnet"),
            host_ip: None,
            ready_timeout: Duration::from_secs(45),
            genesis_patch: None,
            wallet_data: None,
            debug: false,
        }
    }
}

impl RegnetConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `REGNET_HOME` | `$HOME/.regnet` |
    /// | `REGNET_HOST_IP` | auto-detected outbound IPv4 |
    /// | `REGNET_READY_TIMEOUT_SECS` | `45` |
    /// | `REGNET_GENESIS_PATCH` | unset |
    /// | `REGNET_WALLET_DATA` | unset |
    /// | `REGNET_DEBUG` | `false` |
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        Self {
            home: var("REGNET_HOME")
                .map(PathBuf::from)
                .unwrap_or(default.home),
            host_ip: var("REGNET_HOST_IP").and_then(|v| v.trim().parse().ok()),
            ready_timeout: var("REGNET_READY_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.ready_timeout),
            genesis_patch: var("REGNET_GENESIS_PATCH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            wallet_data: var("REGNET_WALLET_DATA")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            debug: var("REGNET_DEBUG")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(default.debug),
        }
    }

    /// Directory holding the local environment's summary file.
    pub fn localenv_dir(&self) -> PathBuf {
        self.home.join("localenv")
    }

    /// The configured host address, or the detected outbound one.
    pub fn resolve_host_ip(&self) -> std::io::Result<Ipv4Addr> {
        match self.host_ip {
            Some(ip) => Ok(ip),
            None => regnet_core::local_ip(),
        }
    }

    /// Validate that all configured paths exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ready_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        if let Some(patch) = &self.genesis_patch {
            if !patch.exists() {
                return Err(ConfigError::MissingPatch(patch.clone()));
            }
        }

        if let Some(wallet_data) = &self.wallet_data {
            if !wallet_data.exists() {
                return Err(ConfigError::MissingWalletData(wallet_data.clone()));
            }
        }

        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if let Some(patch) = &self.genesis_patch {
            if !patch.exists() {
                tracing::warn!("Genesis patch not found: {:?}", patch);
            }
        }

        if let Some(wallet_data) = &self.wallet_data {
            if !wallet_data.exists() {
                tracing::warn!("Wallet data not found: {:?}", wallet_data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> RegnetConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RegnetConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = from(&[]);
        assert!(config.home.ends_with(".regnet"));
        assert_eq!(config.host_ip, None);
        assert_eq!(config.ready_timeout, Duration::from_secs(45));
        assert!(config.genesis_patch.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn test_from_vars() {
        let config = from(&[
            ("REGNET_HOME", "/tmp/regnet"),
            ("REGNET_HOST_IP", "10.1.2.3"),
            ("REGNET_READY_TIMEOUT_SECS", "90"),
            ("REGNET_GENESIS_PATCH", "/tmp/genesis.patch"),
            ("REGNET_DEBUG", "1"),
        ]);
        assert_eq!(config.localenv_dir(), PathBuf::from("/tmp/regnet/localenv"));
        assert_eq!(config.host_ip, Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(config.resolve_host_ip().unwrap(), Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(config.ready_timeout, Duration::from_secs(90));
        assert_eq!(config.genesis_patch, Some(PathBuf::from("/tmp/genesis.patch")));
        assert!(config.debug);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = from(&[
            ("REGNET_HOST_IP", "not-an-ip"),
            ("REGNET_READY_TIMEOUT_SECS", "soon"),
            ("REGNET_DEBUG", "false"),
        ]);
        assert_eq!(config.host_ip, None);
        assert_eq!(config.ready_timeout, Duration::from_secs(45));
        assert!(!config.debug);
    }

    #[test]
    fn test_validate_missing_patch() {
        let config = from(&[("REGNET_GENESIS_PATCH", "/nonexistent/genesis.patch")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingPatch(_))
        ));
    }
}
