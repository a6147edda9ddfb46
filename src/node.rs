//! Hosts, switches and their ports.
//!
//! Nodes own their ports. Relations between ports (the peer across a link) and
//! from a port back to its node are stored as ids and resolved through the
//! [`Registry`](crate::registry::Registry), so the object graph has no cycles
//! and a whole registry can be swapped in one step.

use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::SdnError;
use crate::flow::Table;
use crate::models::{InventoryNode, NodeConnector, PortNumber, PortStatistics, TopologyNode};

/// Address of a port: owning node id plus port id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub node: String,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub id: String,
    pub port_number: Option<PortNumber>,
    pub name: String,
    pub mac: Option<String>,
    /// Active state flags, comma separated.
    pub state: String,
    pub statistics: Option<PortStatistics>,
    /// Id of the owning node.
    pub owner: String,
    /// Port at the other end of a discovered link.
    pub peer: Option<PortRef>,
}

impl Port {
    pub fn port_ref(&self) -> PortRef {
        PortRef {
            node: self.owner.clone(),
            port: self.id.clone(),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }

    fn from_connector(owner: &str, conn: NodeConnector) -> Self {
        let state = conn.active_state();
        Self {
            name: conn.name.unwrap_or_else(|| conn.id.clone()),
            id: conn.id,
            port_number: conn.port_number,
            mac: conn.hardware_address,
            state,
            statistics: conn.statistics,
            owner: owner.to_string(),
            peer: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Host,
    Switch,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Host => write!(f, "host"),
            NodeType::Switch => write!(f, "switch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Host { mac: String },
    /// Raw inventory table entries, decoded on each access.
    Switch { tables: Vec<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub ip: Option<String>,
    pub ports: BTreeMap<String, Port>,
    pub kind: NodeKind,
}

impl Node {
    /// Builds a host from a topology node entry.
    ///
    /// Only the first address and attachment point are used; more than one
    /// address is logged as a warning.
    pub fn host(data: &TopologyNode) -> Result<Self, SdnError> {
        if !data.is_host() {
            return Err(SdnError::Structural(format!(
                "{} is not a host entry",
                data.node_id
            )));
        }
        let id = data.node_id.clone();
        let address = data.addresses.first().ok_or_else(|| {
            SdnError::Structural(format!("host {id} has no tracked address"))
        })?;
        if data.addresses.len() > 1 {
            warn!(
                "Host {} is attached at {} addresses, using the first",
                id,
                data.addresses.len()
            );
        }
        let port_id = data
            .termination_points
            .first()
            .map(|tp| tp.tp_id.clone())
            .ok_or_else(|| SdnError::Structural(format!("host {id} has no termination point")))?;
        let active = data
            .attachment_points
            .first()
            .map(|ap| ap.active)
            .unwrap_or(false);

        let suffix: String = {
            let chars: Vec<char> = id.chars().collect();
            chars[chars.len().saturating_sub(2)..].iter().collect()
        };
        let name = format!("h{suffix}");
        let port = Port {
            id: port_id.clone(),
            port_number: Some(PortNumber::Number(0)),
            name: format!("{name}:unk"),
            mac: Some(address.mac.clone()),
            state: if active { "active" } else { "inactive" }.to_string(),
            statistics: None,
            owner: id.clone(),
            peer: None,
        };
        Ok(Self {
            id,
            name,
            ip: address.ip.clone(),
            ports: BTreeMap::from([(port_id, port)]),
            kind: NodeKind::Host {
                mac: address.mac.clone(),
            },
        })
    }

    /// Builds a switch from a decoded inventory entry.
    pub fn switch(data: InventoryNode) -> Self {
        let id = data.id;
        let name = data.description.unwrap_or_else(|| {
            debug!("Switch {} has no description, naming it by id", id);
            id.clone()
        });
        let ports = data
            .connectors
            .into_iter()
            .map(|conn| (conn.id.clone(), Port::from_connector(&id, conn)))
            .collect();
        Self {
            name,
            ip: data.ip_address,
            ports,
            kind: NodeKind::Switch {
                tables: data.tables,
            },
            id,
        }
    }

    /// Builds a switch from a raw inventory entry.
    pub fn switch_from_value(value: &Value) -> Result<Self, SdnError> {
        let data: InventoryNode = serde_json::from_value(value.clone())
            .map_err(|e| SdnError::Structural(format!("switch entry: {e}")))?;
        Ok(Self::switch(data))
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Host { .. } => NodeType::Host,
            NodeKind::Switch { .. } => NodeType::Switch,
        }
    }

    pub fn is_host(&self) -> bool {
        self.node_type() == NodeType::Host
    }

    pub fn is_switch(&self) -> bool {
        self.node_type() == NodeType::Switch
    }

    /// MAC address of a host.
    pub fn mac(&self) -> Option<&str> {
        match self.kind {
            NodeKind::Host { ref mac } => Some(mac.as_str()),
            NodeKind::Switch { .. } => None,
        }
    }

    /// All flow tables of a switch, decoded from the raw payload. Hosts have none.
    pub fn tables(&self) -> BTreeMap<u8, Table> {
        let raw = match self.kind {
            NodeKind::Switch { ref tables } => tables,
            NodeKind::Host { .. } => return BTreeMap::new(),
        };
        raw.iter()
            .filter_map(|value| match Table::from_value(value) {
                Ok(table) => Some((table.id, table)),
                Err(e) => {
                    warn!("Skipping table on {}: {}", self.id, e);
                    None
                }
            })
            .collect()
    }

    /// Tables that carry a flow list.
    pub fn active_tables(&self) -> BTreeMap<u8, Table> {
        self.tables()
            .into_iter()
            .filter(|(_, table)| table.is_active())
            .collect()
    }

    pub fn table(&self, table_id: u8) -> Option<Table> {
        self.tables().remove(&table_id)
    }

    /// First port whose peer belongs to `peer_node_id`.
    pub fn port_facing(&self, peer_node_id: &str) -> Option<&Port> {
        self.ports
            .values()
            .find(|p| p.peer.as_ref().is_some_and(|peer| peer.node == peer_node_id))
    }

    /// Ids of the nodes this node is linked to, one entry per linked port.
    pub fn peer_ids(&self) -> impl Iterator<Item = &str> {
        self.ports
            .values()
            .filter_map(|p| p.peer.as_ref().map(|peer| peer.node.as_str()))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = self.node_type().to_string().to_uppercase();
        let ports = self.ports.values().map(|p| p.name.as_str()).sorted().join(", ");
        write!(
            f,
            "{:>6} [{}]: [ID = {:>5}] [IPv4 = {}] Ports: [{}]",
            type_name,
            self.name,
            self.id,
            self.ip.as_deref().unwrap_or("-"),
            ports
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host_entry(id: &str, addresses: Value) -> TopologyNode {
        serde_json::from_value(json!({
            "node-id": id,
            "host-tracker-service:addresses": addresses,
            "host-tracker-service:attachment-points": [{"tp-id": "openflow:1:1", "active": true}],
            "termination-point": [{"tp-id": id}]
        }))
        .unwrap()
    }

    mod host_tests {
        use super::*;

        #[test]
        fn test_host_name_and_single_port() {
            let data = host_entry(
                "host:00:00:00:00:00:07",
                json!([{"ip": "10.0.0.7", "mac": "00:00:00:00:00:07"}]),
            );
            let host = Node::host(&data).unwrap();
            assert_eq!(host.name, "h07");
            assert_eq!(host.mac(), Some("00:00:00:00:00:07"));
            assert_eq!(host.ip.as_deref(), Some("10.0.0.7"));
            assert_eq!(host.ports.len(), 1);
            let port = host.ports.values().next().unwrap();
            assert_eq!(port.name, "h07:unk");
            assert_eq!(port.state, "active");
            assert_eq!(port.port_number, Some(PortNumber::Number(0)));
            assert!(host.tables().is_empty());
        }

        #[test]
        fn test_host_with_many_addresses_uses_first() {
            let data = host_entry(
                "host:00:00:00:00:00:01",
                json!([
                    {"ip": "10.0.0.1", "mac": "00:00:00:00:00:01"},
                    {"ip": "10.0.0.99", "mac": "00:00:00:00:00:99"}
                ]),
            );
            let host = Node::host(&data).unwrap();
            assert_eq!(host.ip.as_deref(), Some("10.0.0.1"));
        }

        #[test]
        fn test_host_without_address_is_structural() {
            let data = host_entry("host:00:00:00:00:00:01", json!([]));
            assert!(matches!(Node::host(&data), Err(SdnError::Structural(_))));
        }
    }

    mod switch_tests {
        use super::*;

        fn switch_value() -> Value {
            json!({
                "id": "openflow:1",
                "flow-node-inventory:description": "s1",
                "flow-node-inventory:ip-address": "10.10.0.1",
                "node-connector": [
                    {"id": "openflow:1:1", "flow-node-inventory:port-number": 1,
                     "flow-node-inventory:name": "s1-eth1",
                     "flow-node-inventory:hardware-address": "aa:bb:cc:00:00:01",
                     "flow-node-inventory:state": {"live": true, "blocked": false}},
                    {"id": "openflow:1:LOCAL", "flow-node-inventory:port-number": "LOCAL",
                     "flow-node-inventory:name": "s1"}
                ],
                "flow-node-inventory:table": [
                    {"id": 0, "flow": [{"id": "f1", "match": {}}]},
                    {"id": 1}
                ]
            })
        }

        #[test]
        fn test_switch_ports_and_tables() {
            let switch = Node::switch_from_value(&switch_value()).unwrap();
            assert!(switch.is_switch());
            assert_eq!(switch.name, "s1");
            assert_eq!(switch.ports["openflow:1:1"].state, "live");
            assert_eq!(switch.ports["openflow:1:1"].owner, "openflow:1");
            assert_eq!(
                switch.ports["openflow:1:LOCAL"].port_number,
                Some(PortNumber::Named("LOCAL".into()))
            );
            assert_eq!(switch.tables().len(), 2);
            assert_eq!(switch.active_tables().keys().copied().collect::<Vec<_>>(), vec![0]);
            assert!(switch.table(0).unwrap().flow("f1").is_some());
            assert!(switch.table(9).is_none());
        }

        #[test]
        fn test_switch_summary() {
            let switch = Node::switch_from_value(&switch_value()).unwrap();
            assert_eq!(
                switch.to_string(),
                "SWITCH [s1]: [ID = openflow:1] [IPv4 = 10.10.0.1] Ports: [s1, s1-eth1]"
            );
        }

        #[test]
        fn test_switch_without_id_is_structural() {
            let err = Node::switch_from_value(&json!({"node-connector": []})).unwrap_err();
            assert!(matches!(err, SdnError::Structural(_)));
        }
    }
}
