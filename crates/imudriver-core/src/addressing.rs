//! Device addressing
//!
//! Maps logical sensor nodes to the small integer addresses the dongle uses
//! on the shared bus. Resolved once at startup; a bad name or address is a
//! configuration error, never a request-time one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("unknown sensor node: {0}")]
    UnknownNode(String),

    #[error("node {0} is not part of the configured topology")]
    NodeNotInTopology(NodeName),

    #[error("invalid wire address {address:?} for node {node}")]
    InvalidAddress { node: NodeName, address: String },
}

/// A body segment carrying one sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeName {
    Forearm,
    Arm,
    Trunk,
}

impl NodeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeName::Forearm => "forearm",
            NodeName::Arm => "arm",
            NodeName::Trunk => "trunk",
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeName {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forearm" => Ok(NodeName::Forearm),
            "arm" => Ok(NodeName::Arm),
            "trunk" => Ok(NodeName::Trunk),
            _ => Err(AddressError::UnknownNode(s.to_string())),
        }
    }
}

/// Which sensors are wired up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Legacy single sensor strapped to the arm
    #[default]
    SingleNode,
    /// Forearm, arm and trunk sensors
    ThreeNode,
}

impl Topology {
    /// Nodes in chain order, distal to proximal
    pub fn nodes(&self) -> &'static [NodeName] {
        match self {
            Topology::SingleNode => &[NodeName::Arm],
            Topology::ThreeNode => &[NodeName::Forearm, NodeName::Arm, NodeName::Trunk],
        }
    }

    /// Node addressed by single-node operations
    pub fn primary(&self) -> NodeName {
        NodeName::Arm
    }

    fn default_address(node: NodeName) -> &'static str {
        match node {
            NodeName::Arm => "0",
            NodeName::Forearm => "1",
            NodeName::Trunk => "2",
        }
    }
}

/// A node together with its wire address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub node: NodeName,
    pub address: String,
}

impl NodeAddress {
    pub fn new(node: NodeName, address: impl Into<String>) -> Self {
        Self {
            node,
            address: address.into(),
        }
    }
}

/// Resolved node → address table for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMap {
    topology: Topology,
    addresses: BTreeMap<NodeName, String>,
}

impl AddressMap {
    /// Build the table from the topology defaults plus per-deployment
    /// overrides keyed by node name.
    pub fn new(topology: Topology, overrides: &BTreeMap<String, String>) -> Result<Self, AddressError> {
        let mut addresses: BTreeMap<NodeName, String> = topology
            .nodes()
            .iter()
            .map(|&node| (node, Topology::default_address(node).to_string()))
            .collect();

        for (name, address) in overrides {
            let node: NodeName = name.parse()?;
            let slot = addresses
                .get_mut(&node)
                .ok_or(AddressError::NodeNotInTopology(node))?;
            *slot = address.trim().to_string();
        }

        for (&node, address) in &addresses {
            if address.is_empty() || !address.bytes().all(|b| b.is_ascii_digit()) {
                return Err(AddressError::InvalidAddress {
                    node,
                    address: address.clone(),
                });
            }
        }

        Ok(Self {
            topology,
            addresses,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn address_of(&self, node: NodeName) -> Result<&str, AddressError> {
        self.addresses
            .get(&node)
            .map(String::as_str)
            .ok_or(AddressError::NodeNotInTopology(node))
    }

    /// Resolve a node by its configured name
    pub fn lookup(&self, name: &str) -> Result<NodeAddress, AddressError> {
        self.resolve(name.parse()?)
    }

    pub fn resolve(&self, node: NodeName) -> Result<NodeAddress, AddressError> {
        Ok(NodeAddress::new(node, self.address_of(node)?))
    }

    pub fn primary(&self) -> NodeAddress {
        let node = self.topology.primary();
        NodeAddress::new(node, self.addresses[&node].clone())
    }

    /// All nodes in chain order; adjacent entries are the joints reported
    /// while streaming (forearm/arm, arm/trunk).
    pub fn chain(&self) -> Vec<NodeAddress> {
        self.topology
            .nodes()
            .iter()
            .map(|&node| NodeAddress::new(node, self.addresses[&node].clone()))
            .collect()
    }

    /// Tare order: primary first, then the remaining nodes in chain order
    pub fn tare_targets(&self) -> Vec<NodeAddress> {
        let primary = self.primary();
        let mut targets = vec![primary.clone()];
        targets.extend(self.chain().into_iter().filter(|n| n.node != primary.node));
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_node_defaults() {
        let map = AddressMap::new(Topology::SingleNode, &BTreeMap::new()).unwrap();
        assert_eq!(map.address_of(NodeName::Arm), Ok("0"));
        assert_eq!(
            map.address_of(NodeName::Trunk),
            Err(AddressError::NodeNotInTopology(NodeName::Trunk))
        );
        assert_eq!(map.chain(), vec![NodeAddress::new(NodeName::Arm, "0")]);
    }

    #[test]
    fn test_three_node_chain_order() {
        let map = AddressMap::new(Topology::ThreeNode, &BTreeMap::new()).unwrap();
        assert_eq!(
            map.chain(),
            vec![
                NodeAddress::new(NodeName::Forearm, "1"),
                NodeAddress::new(NodeName::Arm, "0"),
                NodeAddress::new(NodeName::Trunk, "2"),
            ]
        );
        assert_eq!(
            map.tare_targets(),
            vec![
                NodeAddress::new(NodeName::Arm, "0"),
                NodeAddress::new(NodeName::Forearm, "1"),
                NodeAddress::new(NodeName::Trunk, "2"),
            ]
        );
    }

    #[test]
    fn test_overrides() {
        let overrides = BTreeMap::from([("Trunk".to_string(), "7".to_string())]);
        let map = AddressMap::new(Topology::ThreeNode, &overrides).unwrap();
        assert_eq!(map.lookup("trunk").unwrap().address, "7");
    }

    #[test]
    fn test_unknown_node_name() {
        let overrides = BTreeMap::from([("leg".to_string(), "3".to_string())]);
        assert_eq!(
            AddressMap::new(Topology::ThreeNode, &overrides),
            Err(AddressError::UnknownNode("leg".to_string()))
        );
    }

    #[test]
    fn test_override_outside_topology() {
        let overrides = BTreeMap::from([("forearm".to_string(), "1".to_string())]);
        assert_eq!(
            AddressMap::new(Topology::SingleNode, &overrides),
            Err(AddressError::NodeNotInTopology(NodeName::Forearm))
        );
    }

    #[test]
    fn test_address_must_be_numeric() {
        let overrides = BTreeMap::from([("arm".to_string(), "0,1".to_string())]);
        assert!(matches!(
            AddressMap::new(Topology::SingleNode, &overrides),
            Err(AddressError::InvalidAddress { .. })
        ));
    }
}
