//! Supported coin wallets and wallet descriptors.
//!
//! Every supported coin is a [`WalletKind`] variant. Its fixed metadata
//! (ports, image, CLI, bridge parameters) lives in one [`WalletProfile`]
//! table entry, looked up with [`WalletKind::profile`].

use crate::error::{CoreError, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Parameters the bridge configuration needs for one coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeParams {
    pub address_prefix: u8,
    pub script_prefix: u8,
    pub secret_prefix: u8,
    pub tx_version: u8,
    pub min_tx_fee: u64,
    pub block_time: u32,
    pub fee_per_byte: u32,
    pub get_new_key_supported: bool,
    pub import_with_no_scan_supported: bool,
}

/// Fixed metadata for one supported coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletProfile {
    /// Display title in the bridge configuration.
    pub title: &'static str,
    /// P2P port, when the coin's wallet image publishes one.
    pub p2p_port: Option<u16>,
    /// RPC port.
    pub rpc_port: u16,
    /// Image repository and default tag, when a wallet image exists.
    pub image: Option<(&'static str, &'static str)>,
    /// Wallet CLI used for readiness probing inside a sandbox.
    pub cli: Option<&'static str>,
    /// Bridge configuration parameters.
    pub bridge: BridgeParams,
}

macro_rules! bridge {
    ($addr:expr, $script:expr, $secret:expr, tx $tx:expr, fee $fee:expr, block $block:expr, per_byte $pb:expr, new_key $nk:expr, no_scan $ns:expr) => {
        BridgeParams {
            address_prefix: $addr,
            script_prefix: $script,
            secret_prefix: $secret,
            tx_version: $tx,
            min_tx_fee: $fee,
            block_time: $block,
            fee_per_byte: $pb,
            get_new_key_supported: $nk,
            import_with_no_scan_supported: $ns,
        }
    };
}

/// A supported coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WalletKind {
    Btc,
    Ltc,
    Sys,
    Dash,
    Dgb,
    Dyn,
    Doge,
    Pivx,
    Via,
    Vtc,
    Mue,
    Nmc,
    Qtum,
    Lbc,
    Mona,
    Block,
    Fair,
}

impl WalletKind {
    /// Every supported coin.
    pub const ALL: [WalletKind; 17] = [
        WalletKind::Btc,
        WalletKind::Ltc,
        WalletKind::Sys,
        WalletKind::Dash,
        WalletKind::Dgb,
        WalletKind::Dyn,
        WalletKind::Doge,
        WalletKind::Pivx,
        WalletKind::Via,
        WalletKind::Vtc,
        WalletKind::Mue,
        WalletKind::Nmc,
        WalletKind::Qtum,
        WalletKind::Lbc,
        WalletKind::Mona,
        WalletKind::Block,
        WalletKind::Fair,
    ];

    /// Upper-case ticker symbol.
    pub fn ticker(self) -> &'static str {
        match self {
            WalletKind::Btc => "BTC",
            WalletKind::Ltc => "LTC",
            WalletKind::Sys => "SYS",
            WalletKind::Dash => "DASH",
            WalletKind::Dgb => "DGB",
            WalletKind::Dyn => "DYN",
            WalletKind::Doge => "DOGE",
            WalletKind::Pivx => "PIVX",
            WalletKind::Via => "VIA",
            WalletKind::Vtc => "VTC",
            WalletKind::Mue => "MUE",
            WalletKind::Nmc => "NMC",
            WalletKind::Qtum => "QTUM",
            WalletKind::Lbc => "LBC",
            WalletKind::Mona => "MONA",
            WalletKind::Block => "BLOCK",
            WalletKind::Fair => "FAIR",
        }
    }

    /// Fixed metadata for this coin.
    pub fn profile(self) -> &'static WalletProfile {
        &PROFILES[self as usize]
    }

    /// Image reference with the default tag, if the coin has an image.
    pub fn default_image(self) -> Option<String> {
        self.profile()
            .image
            .map(|(repo, tag)| format!("{repo}:{tag}"))
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

impl FromStr for WalletKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        WalletKind::ALL
            .into_iter()
            .find(|kind| kind.ticker().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::Validation(format!("unsupported wallet {s}")))
    }
}

// Indexed by `WalletKind as usize`; order must match the enum.
static PROFILES: [WalletProfile; 17] = [
    WalletProfile {
        title: "Bitcoin",
        p2p_port: Some(8333),
        rpc_port: 8332,
        image: None,
        cli: None,
        bridge: bridge!(0, 5, 128, tx 2, fee 27000, block 600, per_byte 105, new_key false, no_scan false),
    },
    WalletProfile {
        title: "Litecoin",
        p2p_port: Some(9333),
        rpc_port: 9332,
        image: Some(("blocknetdx/litecoin", "latest")),
        cli: Some("litecoin-cli"),
        bridge: bridge!(48, 5, 176, tx 1, fee 60000, block 60, per_byte 110, new_key false, no_scan true),
    },
    WalletProfile {
        title: "SysCoin2",
        p2p_port: Some(8369),
        rpc_port: 8370,
        image: Some(("blocknetdx/syscoin2", "2.1.6-snap500644")),
        cli: Some("syscoin-cli"),
        bridge: bridge!(0, 5, 128, tx 1, fee 60000, block 60, per_byte 100, new_key false, no_scan false),
    },
    WalletProfile {
        title: "Dash",
        p2p_port: None,
        rpc_port: 9998,
        image: None,
        cli: None,
        bridge: bridge!(76, 16, 204, tx 1, fee 15000, block 150, per_byte 15, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Digibyte",
        p2p_port: None,
        rpc_port: 14022,
        image: None,
        cli: None,
        bridge: bridge!(30, 5, 128, tx 1, fee 100000, block 60, per_byte 100, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Dynamic",
        p2p_port: None,
        rpc_port: 31350,
        image: None,
        cli: None,
        bridge: bridge!(30, 10, 140, tx 1, fee 40000, block 128, per_byte 80, new_key false, no_scan false),
    },
    WalletProfile {
        title: "Dogecoin",
        p2p_port: None,
        rpc_port: 22555,
        image: None,
        cli: None,
        bridge: bridge!(30, 22, 158, tx 1, fee 100000000, block 60, per_byte 100000, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Pivx",
        p2p_port: None,
        rpc_port: 51473,
        image: None,
        cli: None,
        bridge: bridge!(30, 13, 212, tx 1, fee 100000, block 60, per_byte 110, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Viacoin",
        p2p_port: None,
        rpc_port: 5222,
        image: None,
        cli: None,
        bridge: bridge!(71, 33, 199, tx 1, fee 60000, block 24, per_byte 110, new_key false, no_scan false),
    },
    WalletProfile {
        title: "Vertcoin",
        p2p_port: None,
        rpc_port: 5888,
        image: None,
        cli: None,
        bridge: bridge!(71, 5, 199, tx 1, fee 100000, block 150, per_byte 200, new_key false, no_scan false),
    },
    WalletProfile {
        title: "MonetaryUnit",
        p2p_port: None,
        rpc_port: 29683,
        image: None,
        cli: None,
        bridge: bridge!(16, 76, 126, tx 1, fee 100000, block 40, per_byte 300, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Namecoin",
        p2p_port: None,
        rpc_port: 8336,
        image: None,
        cli: None,
        bridge: bridge!(52, 13, 180, tx 1, fee 100000, block 600, per_byte 100, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Qtum",
        p2p_port: None,
        rpc_port: 3889,
        image: None,
        cli: None,
        bridge: bridge!(58, 50, 128, tx 1, fee 20000, block 150, per_byte 20, new_key false, no_scan true),
    },
    WalletProfile {
        title: "LBRY Credits",
        p2p_port: None,
        rpc_port: 9245,
        image: None,
        cli: None,
        bridge: bridge!(85, 122, 28, tx 1, fee 200000, block 150, per_byte 200, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Monacoin",
        p2p_port: Some(9401),
        rpc_port: 9402,
        image: Some(("blocknetdx/monacoin", "0.14.2-snap1193272")),
        cli: Some("monacoin-cli"),
        bridge: bridge!(50, 55, 176, tx 1, fee 200000, block 90, per_byte 200, new_key false, no_scan true),
    },
    WalletProfile {
        title: "Blocknet",
        p2p_port: Some(41412),
        rpc_port: 41414,
        image: Some(("blocknetdx/servicenode", "latest")),
        cli: Some("blocknetdx-cli"),
        bridge: bridge!(26, 28, 154, tx 1, fee 0, block 60, per_byte 20, new_key true, no_scan true),
    },
    WalletProfile {
        title: "Faircoin",
        p2p_port: None,
        rpc_port: 40405,
        image: None,
        cli: None,
        bridge: bridge!(95, 36, 223, tx 1, fee 30000, block 210, per_byte 30, new_key true, no_scan true),
    },
];

/// One wallet participating in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletDescriptor {
    /// Which coin.
    pub kind: WalletKind,
    /// Wallet address used by the bridge.
    pub address: String,
    /// Host the wallet's RPC is reachable on.
    pub ip: Ipv4Addr,
    /// P2P port.
    pub port: Option<u16>,
    /// RPC port.
    pub rpc_port: u16,
    /// RPC user name.
    pub rpc_user: String,
    /// RPC password.
    pub rpc_pass: String,
    /// Already running elsewhere; no sandbox is created for it.
    pub bring_own: bool,
    /// Image the wallet sandbox is created from.
    pub image: Option<String>,
}

impl WalletDescriptor {
    /// A wallet with the coin's default ports and image, hosted at `ip`.
    pub fn new(
        kind: WalletKind,
        address: impl Into<String>,
        ip: Ipv4Addr,
        rpc_user: impl Into<String>,
        rpc_pass: impl Into<String>,
    ) -> Self {
        let profile = kind.profile();
        Self {
            kind,
            address: address.into(),
            ip,
            port: profile.p2p_port,
            rpc_port: profile.rpc_port,
            rpc_user: rpc_user.into(),
            rpc_pass: rpc_pass.into(),
            bring_own: false,
            image: kind.default_image(),
        }
    }

    /// Parse `TICKER,address,rpcuser,rpcpass[,ipv4]`.
    ///
    /// Spaces anywhere in the input are ignored. A well-formed IPv4 fifth
    /// field marks the wallet as bring-your-own at that address; anything
    /// else there is ignored with a warning and the wallet is hosted at
    /// `host_ip`.
    pub fn parse(input: &str, host_ip: Ipv4Addr) -> Result<Self> {
        let compact: String = input.chars().filter(|c| *c != ' ').collect();
        let fields: Vec<&str> = compact.split(',').collect();
        if fields.len() < 4 {
            return Err(CoreError::Validation(format!(
                "incorrect wallet format {input:?}, expected TICKER,address,rpcuser,rpcpassword[,ipv4]"
            )));
        }

        let kind: WalletKind = fields[0].parse()?;
        let mut wallet = Self::new(kind, fields[1], host_ip, fields[2], fields[3]);

        if let Some(ip) = fields.get(4) {
            match ip.parse::<Ipv4Addr>() {
                Ok(ip) => {
                    wallet.ip = ip;
                    wallet.bring_own = true;
                }
                Err(_) => {
                    tracing::warn!(wallet = %kind, ip = %ip, "Wallet IPv4 address is malformed, ignoring");
                }
            }
        }
        Ok(wallet)
    }

    /// CLI for in-sandbox probing.
    pub fn cli(&self) -> Option<&'static str> {
        self.kind.profile().cli
    }
}
