//! Configuration text rendered from the topology and bootstrap results.

use crate::config::ChainSettings;
use crate::registration::ServiceNodeRegistration;
use crate::topology::Topology;
use crate::wallet::WalletDescriptor;

/// Render the chain configuration for one node.
///
/// `current` is the id of the node the file is for; it gets a `connect`
/// entry for every other chain node and none for itself. `None` renders the
/// environment summary, which connects to every node. With a service-node
/// key the node runs as a service node, otherwise it stakes.
pub fn chain_config(
    topology: &Topology,
    chain: &ChainSettings,
    current: Option<u32>,
    service_key: Option<&str>,
) -> String {
    let host_ip = topology.host_ip();
    let mut out = format!(
        "datadir={datadir}\n\
         testnet=1\n\
         dbcache=256\n\
         maxmempool=512\n\
         \n\
         port={port}\n\
         rpcport={rpcport}\n\
         \n\
         listen=1\n\
         server=1\n\
         logtimestamps=1\n\
         logips=1\n\
         \n\
         rpcuser={user}\n\
         rpcpassword={password}\n\
         rpcallowip=0.0.0.0/0\n\
         rpctimeout=15\n\
         rpcclienttimeout=15\n\
         \n\
         whitelist=0.0.0.0/0\n",
        datadir = chain.data_dir.trim_end_matches('/'),
        port = chain.p2p_port,
        rpcport = chain.rpc_port,
        user = chain.rpc_user,
        password = chain.rpc_password,
    );

    let mut this = None;
    for node in topology.nodes() {
        if Some(node.id) == current {
            this = Some(node);
            continue;
        }
        out.push_str(&format!("connect={}\n", node.address(host_ip)));
    }

    match (service_key, this) {
        (Some(key), Some(node)) => out.push_str(&format!(
            "\nstaking=0\n\
             enableexchange=1\n\
             servicenode=1\n\
             servicenodeaddr={}\n\
             servicenodeprivkey={}\n",
            node.address(host_ip),
            key
        )),
        _ => out.push_str("staking=1\n"),
    }
    out
}

/// Render the service-node registry, one line per registration.
pub fn registry(registrations: &[ServiceNodeRegistration]) -> String {
    registrations
        .iter()
        .map(|r| {
            format!(
                "{} {} {} {} {}\n",
                r.alias, r.address, r.key, r.collateral_tx, r.collateral_index
            )
        })
        .collect()
}

/// Render the cross-chain bridge configuration for `wallets`.
pub fn bridge_config(wallets: &[WalletDescriptor]) -> String {
    let tickers: Vec<&str> = wallets.iter().map(|w| w.kind.ticker()).collect();
    let mut out = format!(
        "[Main]\n\
         ExchangeWallets={}\n\
         FullLog=true\n\
         LogPath=/var/log/xbridge.log\n\
         ExchangeTax=300\n\
         \n\
         [RPC]\n\
         Enable=false\n\
         UserName=\n\
         Password=\n\
         UseSSL=false\n\
         Port=9898\n\
         \n",
        tickers.join(",")
    );

    for wallet in wallets {
        let profile = wallet.kind.profile();
        let bridge = profile.bridge;
        out.push_str(&format!(
            "[{ticker}]\n\
             Title={title}\n\
             Address={address}\n\
             Ip={ip}\n\
             Port={port}\n\
             Username={user}\n\
             Password={pass}\n\
             AddressPrefix={addr_prefix}\n\
             ScriptPrefix={script_prefix}\n\
             SecretPrefix={secret_prefix}\n\
             COIN=100000000\n\
             MinimumAmount=0\n\
             TxVersion={tx_version}\n\
             DustAmount=0\n\
             CreateTxMethod=BTC\n\
             MinTxFee={min_fee}\n\
             BlockTime={block_time}\n\
             GetNewKeySupported={new_key}\n\
             ImportWithNoScanSupported={no_scan}\n\
             FeePerByte={fee_per_byte}\n\
             Confirmations=0\n\
             \n",
            ticker = wallet.kind.ticker(),
            title = profile.title,
            address = wallet.address,
            ip = wallet.ip,
            port = wallet.rpc_port,
            user = wallet.rpc_user,
            pass = wallet.rpc_pass,
            addr_prefix = bridge.address_prefix,
            script_prefix = bridge.script_prefix,
            secret_prefix = bridge.secret_prefix,
            tx_version = bridge.tx_version,
            min_fee = bridge.min_tx_fee,
            block_time = bridge.block_time,
            new_key = bridge.get_new_key_supported,
            no_scan = bridge.import_with_no_scan_supported,
            fee_per_byte = bridge.fee_per_byte,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::WalletKind;
    use std::net::{Ipv4Addr, SocketAddrV4};

    const HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 7);

    fn topology() -> Topology {
        Topology::default_localenv("regnet-localenv-", HOST, &ChainSettings::default(), vec![])
            .unwrap()
    }

    fn connects(conf: &str) -> Vec<&str> {
        conf.lines().filter(|l| l.starts_with("connect=")).collect()
    }

    #[test]
    fn test_chain_config_never_connects_to_self() {
        let topology = topology();
        let chain = ChainSettings::default();

        for node in topology.nodes() {
            let conf = chain_config(&topology, &chain, Some(node.id), None);
            let entries = connects(&conf);

            assert_eq!(entries.len(), 2, "node {}", node.short_name);
            assert!(!entries.contains(&format!("connect={}", node.address(HOST)).as_str()));
            for other in topology.nodes().iter().filter(|n| n.id != node.id) {
                assert!(entries.contains(&format!("connect={}", other.address(HOST)).as_str()));
            }
        }
    }

    #[test]
    fn test_chain_config_service_node_section() {
        let topology = topology();
        let chain = ChainSettings::default();

        let conf = chain_config(&topology, &chain, Some(1), Some("snkey1"));
        assert!(conf.contains("servicenode=1\n"));
        assert!(conf.contains("servicenodeprivkey=snkey1\n"));
        assert!(conf.contains("servicenodeaddr=192.168.0.7:41478\n"));
        assert!(conf.contains("staking=0\n"));
        assert!(conf.contains("datadir=/opt/blockchain/regnet\n"));

        let activator = chain_config(&topology, &chain, Some(0), None);
        assert!(activator.contains("staking=1\n"));
        assert!(!activator.contains("servicenode=1"));
    }

    #[test]
    fn test_summary_connects_to_all() {
        let topology = topology();
        let conf = chain_config(&topology, &ChainSettings::default(), None, None);
        assert_eq!(connects(&conf).len(), 3);
    }

    #[test]
    fn test_registry_lines() {
        let regs = vec![ServiceNodeRegistration {
            alias: "sn1".into(),
            address: SocketAddrV4::new(HOST, 41478),
            key: "key1".into(),
            collateral_tx: "tx1".into(),
            collateral_index: 1,
        }];
        assert_eq!(registry(&regs), "sn1 192.168.0.7:41478 key1 tx1 1\n");
    }

    #[test]
    fn test_bridge_config() {
        let sys = WalletDescriptor::new(WalletKind::Sys, "sysaddr", HOST, "u", "p");
        let block = WalletDescriptor::new(WalletKind::Block, "blockaddr", HOST, "u2", "p2");

        let conf = bridge_config(&[sys, block]);

        assert!(conf.starts_with("[Main]\nExchangeWallets=SYS,BLOCK\n"));
        assert!(conf.contains("[SYS]\nTitle=SysCoin2\nAddress=sysaddr\nIp=192.168.0.7\nPort=8370\n"));
        assert!(conf.contains("[BLOCK]\nTitle=Blocknet\n"));
        assert!(conf.contains("GetNewKeySupported=true\n"));
        assert_eq!(conf.matches("COIN=100000000").count(), 2);
    }
}
