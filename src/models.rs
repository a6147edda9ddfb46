//! Data models for controller discovery payloads.
//!
//! These mirror the JSON the controller returns for the network topology and
//! the switch inventory. They are decoded once at the fetch boundary and turned
//! into the crate's own [`Node`](crate::node::Node) registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Response of `network-topology:network-topology`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkTopologyResponse {
    #[serde(rename = "network-topology")]
    pub network_topology: NetworkTopology,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct NetworkTopology {
    #[serde(default)]
    pub topology: Vec<TopologyData>,
}

/// One discovered topology: nodes (hosts included) and directed link records.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TopologyData {
    #[serde(rename = "topology-id", default)]
    pub topology_id: Option<String>,
    #[serde(default)]
    pub node: Vec<TopologyNode>,
    #[serde(default)]
    pub link: Vec<TopologyLink>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyNode {
    #[serde(rename = "node-id")]
    pub node_id: String,
    #[serde(rename = "host-tracker-service:addresses", default)]
    pub addresses: Vec<HostAddress>,
    #[serde(rename = "host-tracker-service:attachment-points", default)]
    pub attachment_points: Vec<AttachmentPoint>,
    #[serde(rename = "termination-point", default)]
    pub termination_points: Vec<TerminationPoint>,
}

impl TopologyNode {
    /// Host entries are recognised by their id naming convention.
    pub fn is_host(&self) -> bool {
        self.node_id.contains("host")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostAddress {
    #[serde(default)]
    pub ip: Option<String>,
    pub mac: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AttachmentPoint {
    #[serde(rename = "tp-id", default)]
    pub tp_id: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TerminationPoint {
    #[serde(rename = "tp-id")]
    pub tp_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyLink {
    #[serde(rename = "link-id", default)]
    pub link_id: Option<String>,
    pub source: LinkSource,
    pub destination: LinkDestination,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LinkSource {
    #[serde(rename = "source-node")]
    pub node: String,
    #[serde(rename = "source-tp")]
    pub tp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LinkDestination {
    #[serde(rename = "dest-node")]
    pub node: String,
    #[serde(rename = "dest-tp")]
    pub tp: String,
}

/// Response of `opendaylight-inventory:nodes`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryResponse {
    pub nodes: InventoryNodes,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct InventoryNodes {
    #[serde(default)]
    pub node: Vec<Value>,
}

/// A switch as reported by the inventory.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryNode {
    pub id: String,
    #[serde(rename = "flow-node-inventory:description", default)]
    pub description: Option<String>,
    #[serde(rename = "flow-node-inventory:ip-address", default)]
    pub ip_address: Option<String>,
    #[serde(rename = "node-connector", default)]
    pub connectors: Vec<NodeConnector>,
    /// Kept raw; tables are decoded on demand.
    #[serde(rename = "flow-node-inventory:table", default)]
    pub tables: Vec<Value>,
}

/// Port handle used by output actions. Usually numeric, `LOCAL` for the
/// switch-internal port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortNumber {
    Number(u32),
    Named(String),
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortNumber::Number(n) => write!(f, "{n}"),
            PortNumber::Named(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConnector {
    pub id: String,
    #[serde(rename = "flow-node-inventory:port-number", default)]
    pub port_number: Option<PortNumber>,
    #[serde(rename = "flow-node-inventory:hardware-address", default)]
    pub hardware_address: Option<String>,
    #[serde(rename = "flow-node-inventory:name", default)]
    pub name: Option<String>,
    #[serde(rename = "flow-node-inventory:state", default)]
    pub state: BTreeMap<String, Value>,
    #[serde(
        rename = "opendaylight-port-statistics:flow-capable-node-connector-statistics",
        default
    )]
    pub statistics: Option<PortStatistics>,
}

impl NodeConnector {
    /// Names of the state flags that are set, comma separated.
    pub fn active_state(&self) -> String {
        self.state
            .iter()
            .filter(|(_, v)| v.as_bool().unwrap_or(false))
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionCounters {
    #[serde(default)]
    pub received: u64,
    #[serde(default)]
    pub transmitted: u64,
}

/// Port counters.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PortStatistics {
    #[serde(default)]
    pub packets: Option<DirectionCounters>,
    #[serde(default)]
    pub bytes: Option<DirectionCounters>,
    #[serde(default)]
    pub receive_drops: Option<u64>,
    #[serde(default)]
    pub transmit_drops: Option<u64>,
    #[serde(default)]
    pub receive_errors: Option<u64>,
    #[serde(default)]
    pub transmit_errors: Option<u64>,
}
