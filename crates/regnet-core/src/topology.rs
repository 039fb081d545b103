//! Static description of the test network.
//!
//! A [`Topology`] is built once per run and never mutated afterwards. Node
//! sandbox names are `prefix + short_name`, and role filters rely on short
//! names starting with [`ACTIVATOR_STEM`] or [`SERVICE_NODE_STEM`].

use crate::config::ChainSettings;
use crate::error::{CoreError, Result};
use crate::wallet::{WalletDescriptor, WalletKind};
use regnet_engine::{PortBinding, SandboxSpec};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

/// Short-name prefix shared by activator nodes.
pub const ACTIVATOR_STEM: &str = "act";

/// Short-name prefix shared by service nodes.
pub const SERVICE_NODE_STEM: &str = "sn";

/// Funded identity backing a service node's collateral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasIdentity {
    /// Alias address receiving the collateral.
    pub address: String,
    /// Private key imported on the activator.
    pub private_key: String,
}

impl AliasIdentity {
    pub fn new(address: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            private_key: private_key.into(),
        }
    }
}

/// What a node does in the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    /// Mines, stakes and activates service nodes.
    Activator,
    /// Registered service node with a collateral alias.
    ServiceNode(AliasIdentity),
    /// Sandboxed coin wallet.
    Wallet(WalletKind),
}

/// One provisioned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Unique id within the topology.
    pub id: u32,
    /// Short name, also the alias in the service-node registry.
    pub short_name: String,
    /// Sandbox name (`prefix + short_name`).
    pub sandbox_name: String,
    /// Host P2P port.
    pub port: u16,
    /// Host RPC port.
    pub rpc_port: u16,
    /// Host debugger port.
    pub debug_port: Option<u16>,
    /// Node role.
    pub role: NodeRole,
    /// CLI used for remote commands.
    pub cli: String,
    /// Image override; `None` uses the environment's default image.
    pub image: Option<String>,
    /// Published port mappings.
    pub bindings: Vec<PortBinding>,
}

impl Node {
    /// A chain node publishing the chain's in-sandbox ports on the given host ports.
    #[allow(clippy::too_many_arguments)]
    pub fn chain(
        id: u32,
        short_name: &str,
        prefix: &str,
        port: u16,
        rpc_port: u16,
        debug_port: Option<u16>,
        role: NodeRole,
        chain: &ChainSettings,
    ) -> Self {
        let mut bindings = vec![
            PortBinding::new(chain.p2p_port, port),
            PortBinding::new(chain.rpc_port, rpc_port),
        ];
        if let Some(debug_port) = debug_port {
            bindings.push(PortBinding::new(chain.debug_port, debug_port));
        }
        Self {
            id,
            short_name: short_name.to_owned(),
            sandbox_name: format!("{prefix}{short_name}"),
            port,
            rpc_port,
            debug_port,
            role,
            cli: chain.cli.clone(),
            image: None,
            bindings,
        }
    }

    /// A sandboxed wallet node. Ports are published one-to-one.
    ///
    /// Returns `None` for wallets that cannot be sandboxed (bring-your-own,
    /// or coins without an image or CLI).
    pub fn for_wallet(wallet: &WalletDescriptor, prefix: &str) -> Option<Self> {
        if wallet.bring_own {
            return None;
        }
        let image = wallet.image.clone()?;
        let cli = wallet.cli()?;

        let mut bindings = Vec::new();
        if let Some(port) = wallet.port {
            bindings.push(PortBinding::new(port, port));
        }
        bindings.push(PortBinding::new(wallet.rpc_port, wallet.rpc_port));

        let short_name = wallet.kind.ticker().to_owned();
        Some(Self {
            id: u32::from(wallet.port.unwrap_or(wallet.rpc_port)),
            sandbox_name: format!("{prefix}{short_name}"),
            short_name,
            port: wallet.port.unwrap_or(wallet.rpc_port),
            rpc_port: wallet.rpc_port,
            debug_port: None,
            role: NodeRole::Wallet(wallet.kind),
            cli: cli.to_owned(),
            image: Some(image),
            bindings,
        })
    }

    pub fn is_activator(&self) -> bool {
        matches!(self.role, NodeRole::Activator)
    }

    pub fn is_service_node(&self) -> bool {
        matches!(self.role, NodeRole::ServiceNode(_))
    }

    /// Collateral alias, for service nodes.
    pub fn alias(&self) -> Option<&AliasIdentity> {
        match &self.role {
            NodeRole::ServiceNode(alias) => Some(alias),
            _ => None,
        }
    }

    /// Host-reachable P2P address.
    pub fn address(&self, host_ip: Ipv4Addr) -> SocketAddrV4 {
        SocketAddrV4::new(host_ip, self.port)
    }

    /// Sandbox spec for this node, falling back to `default_image`.
    pub fn sandbox_spec(&self, default_image: &str) -> SandboxSpec {
        SandboxSpec {
            image: self
                .image
                .clone()
                .unwrap_or_else(|| default_image.to_owned()),
            name: self.sandbox_name.clone(),
            port_bindings: self.bindings.clone(),
            labels: [("io.regnet.node".to_owned(), self.short_name.clone())]
                .into_iter()
                .collect(),
        }
    }
}

/// All nodes and wallets of one environment.
#[derive(Debug, Clone)]
pub struct Topology {
    host_ip: Ipv4Addr,
    nodes: Vec<Node>,
    wallets: Vec<WalletDescriptor>,
    wallet_nodes: Vec<Node>,
}

impl Topology {
    /// Build and validate a topology.
    ///
    /// `nodes` are the chain nodes; a sandbox node is derived for every
    /// wallet that is not bring-your-own.
    pub fn new(
        host_ip: Ipv4Addr,
        prefix: &str,
        nodes: Vec<Node>,
        wallets: Vec<WalletDescriptor>,
    ) -> Result<Self> {
        let mut wallet_nodes = Vec::new();
        for wallet in wallets.iter().filter(|w| !w.bring_own) {
            let node = Node::for_wallet(wallet, prefix).ok_or_else(|| {
                CoreError::Validation(format!(
                    "wallet {} has no sandbox image; supply the IPv4 address of a running wallet",
                    wallet.kind
                ))
            })?;
            wallet_nodes.push(node);
        }

        let topology = Self {
            host_ip,
            nodes,
            wallets,
            wallet_nodes,
        };
        topology.validate()?;
        Ok(topology)
    }

    /// One activator and two service nodes on the default local ports.
    pub fn default_localenv(
        prefix: &str,
        host_ip: Ipv4Addr,
        chain: &ChainSettings,
        wallets: Vec<WalletDescriptor>,
    ) -> Result<Self> {
        let nodes = vec![
            Node::chain(0, "activator", prefix, 41477, 41427, Some(41487), NodeRole::Activator, chain),
            Node::chain(
                1,
                "sn1",
                prefix,
                41478,
                41428,
                Some(41488),
                NodeRole::ServiceNode(AliasIdentity::new(
                    "y3DT9bZ69AjvdQFzYTCSpFgT9wJcRpHi7T",
                    "cRdLcWroNyJPJ1BH4Q24pamDQtE3JNdm7tGQoD6mm9brqpYuX1dC",
                )),
                chain,
            ),
            Node::chain(
                2,
                "sn2",
                prefix,
                41479,
                41429,
                Some(41489),
                NodeRole::ServiceNode(AliasIdentity::new(
                    "yF2E6wPBc1YosrGUMhgoet5zPat1A4Z87d",
                    "cMn9aiQGBYqeRzRuTFAModv459UQNxGsXkgPSRQ1W7XwGdGCp1JB",
                )),
                chain,
            ),
        ];
        Self::new(host_ip, prefix, nodes, wallets)
    }

    /// Check the invariants every run relies on.
    pub fn validate(&self) -> Result<()> {
        let activators = self.nodes.iter().filter(|n| n.is_activator()).count();
        if activators != 1 {
            return Err(CoreError::Validation(format!(
                "expected exactly one activator, found {activators}"
            )));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        for node in self.sandboxed() {
            if !ids.insert(node.id) {
                return Err(CoreError::Validation(format!("duplicate node id {}", node.id)));
            }
            if !names.insert(node.sandbox_name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate sandbox name {}",
                    node.sandbox_name
                )));
            }
            for binding in &node.bindings {
                if !ports.insert(binding.host_port) {
                    return Err(CoreError::Validation(format!(
                        "host port {} used twice",
                        binding.host_port
                    )));
                }
            }
        }

        for node in &self.nodes {
            let stem_ok = match node.role {
                NodeRole::Activator => has_stem(&node.short_name, ACTIVATOR_STEM),
                NodeRole::ServiceNode(_) => has_stem(&node.short_name, SERVICE_NODE_STEM),
                NodeRole::Wallet(_) => {
                    return Err(CoreError::Validation(format!(
                        "{} is a wallet node; pass wallets as descriptors",
                        node.short_name
                    )))
                }
            };
            if !stem_ok {
                return Err(CoreError::Validation(format!(
                    "node name {} does not match its role",
                    node.short_name
                )));
            }
        }
        for node in &self.wallet_nodes {
            if node.short_name.starts_with(ACTIVATOR_STEM)
                || node.short_name.starts_with(SERVICE_NODE_STEM)
            {
                return Err(CoreError::Validation(format!(
                    "wallet node name {} collides with a role filter",
                    node.short_name
                )));
            }
        }

        let mut kinds = HashSet::new();
        for wallet in &self.wallets {
            if !kinds.insert(wallet.kind) {
                return Err(CoreError::Validation(format!(
                    "wallet {} specified twice",
                    wallet.kind
                )));
            }
        }
        Ok(())
    }

    /// Host address other nodes use to reach published ports.
    pub fn host_ip(&self) -> Ipv4Addr {
        self.host_ip
    }

    /// The activator node.
    pub fn activator(&self) -> &Node {
        // validate() guarantees exactly one
        &self.nodes[self.nodes.iter().position(Node::is_activator).unwrap_or(0)]
    }

    /// Service nodes in topology order.
    pub fn service_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_service_node())
    }

    /// Chain nodes (activator and service nodes).
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Sandboxed wallet nodes.
    pub fn wallet_nodes(&self) -> &[Node] {
        &self.wallet_nodes
    }

    /// Every node that gets a sandbox.
    pub fn sandboxed(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().chain(self.wallet_nodes.iter())
    }

    /// All wallets, sandboxed or not.
    pub fn wallets(&self) -> &[WalletDescriptor] {
        &self.wallets
    }

    /// Wallets running outside the environment.
    pub fn external_wallets(&self) -> impl Iterator<Item = &WalletDescriptor> {
        self.wallets.iter().filter(|w| w.bring_own)
    }
}

/// Role filters select `stem` plus at least one more character.
fn has_stem(short_name: &str, stem: &str) -> bool {
    short_name.len() > stem.len() && short_name.starts_with(stem)
}

/// Outbound IPv4 address of this host.
///
/// Connecting a UDP socket sends no packets; it only selects a route.
pub fn local_ip() -> std::io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
    match socket.local_addr()?.ip() {
        std::net::IpAddr::V4(ip) => Ok(ip),
        std::net::IpAddr::V6(ip) => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("no IPv4 route, got {ip}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 1, 2, 3);
    const PREFIX: &str = "regnet-localenv-";

    fn chain() -> ChainSettings {
        ChainSettings::default()
    }

    #[test]
    fn test_default_localenv() {
        let topology = Topology::default_localenv(PREFIX, HOST, &chain(), vec![]).unwrap();

        assert_eq!(topology.activator().sandbox_name, "regnet-localenv-activator");
        let sns: Vec<_> = topology.service_nodes().map(|n| n.short_name.as_str()).collect();
        assert_eq!(sns, vec!["sn1", "sn2"]);
        assert!(!topology.activator().is_service_node());
        assert_eq!(
            topology.activator().bindings,
            vec![
                PortBinding::new(41476, 41477),
                PortBinding::new(41419, 41427),
                PortBinding::new(41475, 41487),
            ]
        );
    }

    #[test]
    fn test_wallet_nodes_only_for_sandboxed_wallets() {
        let sys = WalletDescriptor::new(WalletKind::Sys, "a", HOST, "u", "p");
        let mut ltc = WalletDescriptor::new(WalletKind::Ltc, "b", HOST, "u", "p");
        ltc.bring_own = true;

        let topology = Topology::default_localenv(PREFIX, HOST, &chain(), vec![sys, ltc]).unwrap();

        assert_eq!(topology.wallet_nodes().len(), 1);
        let node = &topology.wallet_nodes()[0];
        assert_eq!(node.sandbox_name, "regnet-localenv-SYS");
        assert_eq!(node.cli, "syscoin-cli");
        assert_eq!(topology.external_wallets().count(), 1);
        assert_eq!(topology.sandboxed().count(), 4);
    }

    #[test]
    fn test_wallet_without_image_rejected() {
        let btc = WalletDescriptor::new(WalletKind::Btc, "a", HOST, "u", "p");
        let result = Topology::default_localenv(PREFIX, HOST, &chain(), vec![btc]);
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_duplicate_ports_rejected() {
        let chain = chain();
        let nodes = vec![
            Node::chain(0, "act1", PREFIX, 1000, 1001, None, NodeRole::Activator, &chain),
            Node::chain(
                1,
                "sn1",
                PREFIX,
                1000,
                1002,
                None,
                NodeRole::ServiceNode(AliasIdentity::new("a", "k")),
                &chain,
            ),
        ];
        assert!(Topology::new(HOST, PREFIX, nodes, vec![]).is_err());
    }

    #[test]
    fn test_activator_count_and_stems() {
        let chain = chain();
        let no_activator = vec![Node::chain(
            1,
            "sn1",
            PREFIX,
            1000,
            1001,
            None,
            NodeRole::ServiceNode(AliasIdentity::new("a", "k")),
            &chain,
        )];
        assert!(Topology::new(HOST, PREFIX, no_activator, vec![]).is_err());

        let bad_stem = vec![Node::chain(0, "miner", PREFIX, 1000, 1001, None, NodeRole::Activator, &chain)];
        assert!(Topology::new(HOST, PREFIX, bad_stem, vec![]).is_err());
    }

    #[test]
    fn test_bare_stem_names_rejected() {
        let chain = chain();
        let sn = |name: &str| {
            Node::chain(
                1,
                name,
                PREFIX,
                2000,
                2001,
                None,
                NodeRole::ServiceNode(AliasIdentity::new("a", "k")),
                &chain,
            )
        };
        let act = |name: &str| Node::chain(0, name, PREFIX, 1000, 1001, None, NodeRole::Activator, &chain);

        let bare_activator = Topology::new(HOST, PREFIX, vec![act("act"), sn("sn1")], vec![]);
        assert!(matches!(bare_activator, Err(CoreError::Validation(_))));

        let bare_service_node = Topology::new(HOST, PREFIX, vec![act("act1"), sn("sn")], vec![]);
        assert!(matches!(bare_service_node, Err(CoreError::Validation(_))));

        assert!(Topology::new(HOST, PREFIX, vec![act("act1"), sn("sn1")], vec![]).is_ok());
    }

    #[test]
    fn test_duplicate_wallet_rejected() {
        let mut a = WalletDescriptor::new(WalletKind::Ltc, "a", HOST, "u", "p");
        a.bring_own = true;
        let b = a.clone();
        assert!(Topology::default_localenv(PREFIX, HOST, &chain(), vec![a, b]).is_err());
    }
}
