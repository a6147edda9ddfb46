//! Node registry built from one discovery snapshot.

use itertools::Itertools;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

use crate::error::SdnError;
use crate::models::TopologyData;
use crate::node::{Node, Port, PortRef};

/// All nodes of a topology, keyed by id, plus the display-name index.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    nodes: BTreeMap<String, Node>,
    names: HashMap<String, String>,
}

impl Registry {
    /// Builds the registry from a topology record and the switch inventory.
    ///
    /// Fails on a link that references an unknown node or port, or on two
    /// nodes sharing a display name: the discovery data is inconsistent and no
    /// partial registry is produced.
    pub fn build(topology: &TopologyData, switches: &[Value]) -> Result<Self, SdnError> {
        let mut nodes = BTreeMap::new();
        for entry in topology.node.iter().filter(|n| n.is_host()) {
            let host = Node::host(entry)?;
            nodes.insert(host.id.clone(), host);
        }
        for value in switches {
            let switch = Node::switch_from_value(value)?;
            nodes.insert(switch.id.clone(), switch);
        }

        let mut registry = Self {
            nodes,
            names: HashMap::new(),
        };
        for link in &topology.link {
            let source = PortRef {
                node: link.source.node.clone(),
                port: link.source.tp.clone(),
            };
            let destination = PortRef {
                node: link.destination.node.clone(),
                port: link.destination.tp.clone(),
            };
            registry.set_peer(&source, &destination)?;
            registry.set_peer(&destination, &source)?;
        }

        for node in registry.nodes.values() {
            if let Some(previous) = registry.names.insert(node.name.clone(), node.id.clone()) {
                warn!("Nodes {} and {} share the name {}", previous, node.id, node.name);
                return Err(SdnError::Structural(format!(
                    "nodes {} and {} share the name {}",
                    previous, node.id, node.name
                )));
            }
        }
        debug!(
            "Registry built with {} nodes and {} links",
            registry.nodes.len(),
            topology.link.len()
        );
        Ok(registry)
    }

    fn set_peer(&mut self, at: &PortRef, peer: &PortRef) -> Result<(), SdnError> {
        if !self.nodes.contains_key(&peer.node) {
            return Err(SdnError::Structural(format!(
                "link references unknown node {}",
                peer.node
            )));
        }
        let node = self.nodes.get_mut(&at.node).ok_or_else(|| {
            SdnError::Structural(format!("link references unknown node {}", at.node))
        })?;
        let port = node.ports.get_mut(&at.port).ok_or_else(|| {
            SdnError::Structural(format!(
                "link references unknown port {} on {}",
                at.port, at.node
            ))
        })?;
        port.peer = Some(peer.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.id_of(name).and_then(|id| self.node(id))
    }

    /// Ids for the given names, `None` where a name is unknown.
    pub fn resolve_ids<S: AsRef<str>>(&self, names: &[S]) -> Vec<Option<&str>> {
        names.iter().map(|n| self.id_of(n.as_ref())).collect()
    }

    /// Nodes for the given names, `None` where a name is unknown.
    pub fn resolve_nodes<S: AsRef<str>>(&self, names: &[S]) -> Vec<Option<&Node>> {
        names.iter().map(|n| self.node_by_name(n.as_ref())).collect()
    }

    pub fn port(&self, at: &PortRef) -> Option<&Port> {
        self.node(&at.node).and_then(|n| n.ports.get(&at.port))
    }

    pub fn peer_of(&self, port: &Port) -> Option<&Port> {
        port.peer.as_ref().and_then(|p| self.port(p))
    }

    /// Port of `node_id` that links to `peer_node_id`.
    pub fn port_facing(&self, node_id: &str, peer_node_id: &str) -> Option<&Port> {
        self.node(node_id).and_then(|n| n.port_facing(peer_node_id))
    }

    /// Linked node-name pairs, one per linked port (both directions appear).
    pub fn links(&self) -> Vec<(&str, &str)> {
        self.nodes
            .values()
            .flat_map(move |node| {
                node.peer_ids()
                    .filter_map(move |peer| self.node(peer))
                    .map(move |peer| (node.name.as_str(), peer.name.as_str()))
            })
            .collect()
    }

    /// All ports of all nodes.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.nodes.values().flat_map(|n| n.ports.values())
    }

    /// Port table with a header row, rows sorted by port name.
    pub fn render_ports<'a>(&'a self, ports: impl IntoIterator<Item = &'a Port>) -> String {
        let mut out =
            String::from("         #      |   Name    |        MAC        |    Peer    |    State   ");
        for port in ports.into_iter().sorted_by(|a, b| a.name.cmp(&b.name)) {
            out.push_str(&format!("\n   {}", PortRow { registry: self, port }));
        }
        out
    }
}

struct PortRow<'a> {
    registry: &'a Registry,
    port: &'a Port,
}

impl fmt::Display for PortRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let number = self
            .port
            .port_number
            .as_ref()
            .map_or_else(|| "unk".to_string(), |n| n.to_string());
        let peer = self
            .registry
            .peer_of(self.port)
            .map_or("None", |p| p.name.as_str());
        write!(
            f,
            "[{:^9}] : {:<10}: {} : {:>10} : {}",
            number,
            self.port.name,
            self.port.mac.as_deref().unwrap_or("None"),
            peer,
            self.port.state
        )
    }
}

/// Small discovery payloads shared by the crate's tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    pub fn host(n: u8) -> Value {
        let id = format!("host:00:00:00:00:00:{n:02}");
        json!({
            "node-id": id,
            "host-tracker-service:addresses": [{"ip": format!("10.0.0.{n}"), "mac": format!("00:00:00:00:00:{n:02}")}],
            "host-tracker-service:attachment-points": [{"tp-id": "x", "active": true}],
            "termination-point": [{"tp-id": id}]
        })
    }

    pub fn switch(n: u8, ports: u8) -> Value {
        let connectors: Vec<Value> = (1..=ports)
            .map(|p| {
                json!({
                    "id": format!("openflow:{n}:{p}"),
                    "flow-node-inventory:port-number": p,
                    "flow-node-inventory:name": format!("s{n}-eth{p}"),
                    "flow-node-inventory:hardware-address": format!("aa:00:00:00:{n:02}:{p:02}"),
                    "flow-node-inventory:state": {"live": true}
                })
            })
            .collect();
        json!({
            "id": format!("openflow:{n}"),
            "flow-node-inventory:description": format!("s{n}"),
            "flow-node-inventory:ip-address": "127.0.0.1",
            "node-connector": connectors,
            "flow-node-inventory:table": [
                {"id": 0, "flow": [{"id": "hello", "priority": 100, "match": {}}]},
                {"id": 1}
            ]
        })
    }

    pub fn link(src: &str, src_tp: &str, dst: &str, dst_tp: &str) -> Value {
        json!({
            "link-id": src_tp,
            "source": {"source-node": src, "source-tp": src_tp},
            "destination": {"dest-node": dst, "dest-tp": dst_tp}
        })
    }

    /// h01 - s1 - s2 - h02, plus s1 - s3 - s2.
    ///
    /// Ports: s1:1 -> h01, s1:2 -> s2, s1:3 -> s3; s2:1 -> h02, s2:2 -> s1,
    /// s2:3 -> s3; s3:1 -> s1, s3:2 -> s2.
    pub fn topology() -> (TopologyData, Vec<Value>) {
        let h1 = "host:00:00:00:00:00:01";
        let h2 = "host:00:00:00:00:00:02";
        let topology: TopologyData = serde_json::from_value(json!({
            "topology-id": "flow:1",
            "node": [
                {"node-id": "openflow:1"}, {"node-id": "openflow:2"}, {"node-id": "openflow:3"},
                host(1), host(2)
            ],
            "link": [
                link("openflow:1", "openflow:1:1", h1, h1),
                link(h1, h1, "openflow:1", "openflow:1:1"),
                link("openflow:2", "openflow:2:1", h2, h2),
                link(h2, h2, "openflow:2", "openflow:2:1"),
                link("openflow:1", "openflow:1:2", "openflow:2", "openflow:2:2"),
                link("openflow:2", "openflow:2:2", "openflow:1", "openflow:1:2"),
                link("openflow:1", "openflow:1:3", "openflow:3", "openflow:3:1"),
                link("openflow:3", "openflow:3:1", "openflow:1", "openflow:1:3"),
                link("openflow:3", "openflow:3:2", "openflow:2", "openflow:2:3"),
                link("openflow:2", "openflow:2:3", "openflow:3", "openflow:3:2")
            ]
        }))
        .unwrap();
        (topology, vec![switch(1, 3), switch(2, 3), switch(3, 2)])
    }

    pub fn registry() -> Registry {
        let (topology, switches) = topology();
        Registry::build(&topology, &switches).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod build_tests {
        use super::*;

        #[test]
        fn test_peers_are_set_symmetrically() {
            let registry = fixtures::registry();
            assert_eq!(registry.len(), 5);
            let s1_2 = registry
                .port(&PortRef {
                    node: "openflow:1".into(),
                    port: "openflow:1:2".into(),
                })
                .unwrap();
            let peer = registry.peer_of(s1_2).unwrap();
            assert_eq!(peer.id, "openflow:2:2");
            assert_eq!(registry.peer_of(peer).unwrap().id, "openflow:1:2");
        }

        #[test]
        fn test_dangling_link_aborts_build() {
            let (mut topology, switches) = fixtures::topology();
            topology.link.push(
                serde_json::from_value(fixtures::link(
                    "openflow:1",
                    "openflow:1:1",
                    "openflow:9",
                    "openflow:9:1",
                ))
                .unwrap(),
            );
            let err = Registry::build(&topology, &switches).unwrap_err();
            assert!(matches!(err, SdnError::Structural(ref m) if m.contains("openflow:9")));
        }

        #[test]
        fn test_link_to_unknown_port_aborts_build() {
            let (mut topology, switches) = fixtures::topology();
            topology.link.push(
                serde_json::from_value(fixtures::link(
                    "openflow:1",
                    "openflow:1:7",
                    "openflow:2",
                    "openflow:2:1",
                ))
                .unwrap(),
            );
            assert!(Registry::build(&topology, &switches).is_err());
        }

        #[test]
        fn test_shared_display_name_aborts_build() {
            let (mut topology, switches) = fixtures::topology();
            // Same last two MAC characters as h01.
            let mut twin = fixtures::host(1);
            twin["node-id"] = json!("host:00:00:00:00:01:01");
            twin["termination-point"] = json!([{"tp-id": "host:00:00:00:00:01:01"}]);
            twin["host-tracker-service:addresses"][0]["mac"] = json!("00:00:00:00:01:01");
            topology.node.push(serde_json::from_value(twin).unwrap());

            let err = Registry::build(&topology, &switches).unwrap_err();
            assert!(matches!(err, SdnError::Structural(ref m) if m.contains("h01")));
        }

        #[test]
        fn test_non_host_topology_nodes_are_ignored() {
            let topology: TopologyData = serde_json::from_value(json!({
                "node": [{"node-id": "openflow:1"}]
            }))
            .unwrap();
            let registry = Registry::build(&topology, &[]).unwrap();
            assert!(registry.is_empty());
        }
    }

    mod lookup_tests {
        use super::*;

        #[test]
        fn test_resolve_preserves_positions() {
            let registry = fixtures::registry();
            let ids = registry.resolve_ids(&["s2", "nope", "h01"]);
            assert_eq!(
                ids,
                vec![Some("openflow:2"), None, Some("host:00:00:00:00:00:01")]
            );
            let nodes = registry.resolve_nodes(&["h02", "x"]);
            assert_eq!(nodes[0].map(|n| n.name.as_str()), Some("h02"));
            assert!(nodes[1].is_none());
        }

        #[test]
        fn test_port_facing_peer() {
            let registry = fixtures::registry();
            let port = registry.port_facing("openflow:1", "openflow:3").unwrap();
            assert_eq!(port.id, "openflow:1:3");
            assert!(registry.port_facing("openflow:1", "openflow:9").is_none());
            assert!(registry.port_facing("openflow:9", "openflow:1").is_none());
        }

        #[test]
        fn test_links_by_name() {
            let registry = fixtures::registry();
            let links = registry.links();
            assert_eq!(links.len(), 10);
            assert!(links.contains(&("s1", "h01")));
            assert!(links.contains(&("h01", "s1")));
        }

        #[test]
        fn test_port_table_rendering() {
            let registry = fixtures::registry();
            let host = registry.node_by_name("h01").unwrap();
            let rendered = registry.render_ports(host.ports.values());
            let row = rendered.lines().nth(1).unwrap();
            assert_eq!(
                row,
                "   [    0    ] : h01:unk   : 00:00:00:00:00:01 :    s1-eth1 : active"
            );
        }
    }
}
