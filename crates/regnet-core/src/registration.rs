//! Service-node registrations assembled during bootstrap.

use crate::error::{CoreError, Result};
use crate::topology::Node;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};

/// One collateral output reported by the activator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollateralOutput {
    /// Transaction id.
    #[serde(rename = "txhash")]
    pub tx_id: String,
    /// Output index within the transaction.
    #[serde(rename = "outputidx")]
    pub index: u32,
}

impl CollateralOutput {
    /// Decode the activator's JSON output list.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        serde_json::from_str(raw.trim())
            .map_err(|e| CoreError::Parse(format!("collateral outputs: {e}")))
    }
}

/// Everything the registry needs to know about one service node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNodeRegistration {
    /// Node short name.
    pub alias: String,
    /// Host-reachable P2P address.
    pub address: SocketAddrV4,
    /// Generated service-node key.
    pub key: String,
    /// Collateral transaction id.
    pub collateral_tx: String,
    /// Collateral output index.
    pub collateral_index: u32,
}

impl ServiceNodeRegistration {
    /// Pair the i-th service node with the i-th key and the i-th output.
    ///
    /// All three sequences must have the same length and the same order.
    pub fn pair(
        service_nodes: &[&Node],
        keys: &[String],
        outputs: &[CollateralOutput],
        host_ip: Ipv4Addr,
    ) -> Result<Vec<Self>> {
        if keys.len() != service_nodes.len() {
            return Err(CoreError::Parse(format!(
                "generated {} keys for {} service nodes",
                keys.len(),
                service_nodes.len()
            )));
        }
        if outputs.len() != service_nodes.len() {
            return Err(CoreError::Parse(format!(
                "discovered {} collateral outputs for {} service nodes",
                outputs.len(),
                service_nodes.len()
            )));
        }

        Ok(service_nodes
            .iter()
            .zip(keys)
            .zip(outputs)
            .map(|((node, key), output)| Self {
                alias: node.short_name.clone(),
                address: node.address(host_ip),
                key: key.clone(),
                collateral_tx: output.tx_id.clone(),
                collateral_index: output.index,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainSettings;
    use crate::topology::{AliasIdentity, NodeRole};

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn service_nodes(n: u32) -> Vec<Node> {
        (1..=n)
            .map(|i| {
                Node::chain(
                    i,
                    &format!("sn{i}"),
                    "p-",
                    40000 + i as u16,
                    41000 + i as u16,
                    None,
                    NodeRole::ServiceNode(AliasIdentity::new(format!("addr{i}"), format!("k{i}"))),
                    &ChainSettings::default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_outputs() {
        let raw = r#"[{"txhash":"aa","outputidx":1},{"txhash":"bb","outputidx":0}]"#;
        let outputs = CollateralOutput::parse_list(raw).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].tx_id, "bb");
        assert_eq!(outputs[0].index, 1);
    }

    #[test]
    fn test_parse_outputs_malformed() {
        assert!(matches!(CollateralOutput::parse_list("error: wallet locked"), Err(CoreError::Parse(_))));
    }

    #[test]
    fn test_pair_preserves_order() {
        for n in 1..=5 {
            let nodes = service_nodes(n);
            let refs: Vec<&Node> = nodes.iter().collect();
            let keys: Vec<String> = (1..=n).map(|i| format!("key{i}")).collect();
            let outputs: Vec<CollateralOutput> = (1..=n)
                .map(|i| CollateralOutput {
                    tx_id: format!("tx{i}"),
                    index: i,
                })
                .collect();

            let regs = ServiceNodeRegistration::pair(&refs, &keys, &outputs, HOST).unwrap();

            assert_eq!(regs.len(), n as usize);
            for (i, reg) in regs.iter().enumerate() {
                let i = i + 1;
                assert_eq!(reg.alias, format!("sn{i}"));
                assert_eq!(reg.key, format!("key{i}"));
                assert_eq!(reg.collateral_tx, format!("tx{i}"));
                assert_eq!(reg.collateral_index as usize, i);
                assert_eq!(reg.address, SocketAddrV4::new(HOST, 40000 + i as u16));
            }
        }
    }

    #[test]
    fn test_pair_length_mismatch() {
        let nodes = service_nodes(2);
        let refs: Vec<&Node> = nodes.iter().collect();
        let keys = vec!["k1".to_owned(), "k2".to_owned()];
        let outputs = vec![CollateralOutput {
            tx_id: "tx".into(),
            index: 0,
        }];

        let result = ServiceNodeRegistration::pair(&refs, &keys, &outputs, HOST);
        assert!(matches!(result, Err(CoreError::Parse(_))));
    }
}
