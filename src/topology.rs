//! Versioned topology snapshots and the read-only query surface.
//!
//! A [`Snapshot`] bundles one registry with its weighted graph. The
//! [`TopologyStore`] holds the current snapshot and replaces it wholesale: a
//! refresh builds the new registry and graph before taking the write lock, so
//! readers see either the old snapshot or the new one.

use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::controller::Controller;
use crate::discovery::{fetch_switches, fetch_topology};
use crate::error::SdnError;
use crate::flow::{Flow, Table};
use crate::graph::NetworkGraph;
use crate::node::{Node, Port};
use crate::path::{PathConstraints, WeightedPath};
use crate::registry::Registry;

/// One immutable view of the network.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub version: u64,
    pub registry: Arc<Registry>,
    pub graph: NetworkGraph,
}

/// A single object returned by [`Snapshot::get_object`].
#[derive(Debug, Clone)]
pub enum Object<'a> {
    Topology(&'a Snapshot),
    Node(&'a Node),
    Port(&'a Port),
    Table(Table),
    Flow(Flow),
}

impl fmt::Display for Object<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Topology(snapshot) => snapshot.graph.fmt(f),
            Object::Node(node) => node.fmt(f),
            Object::Port(port) => write!(
                f,
                "{:>6} [{}]: [ID = {}] [MAC = {}] [State = {}]",
                "PORT",
                port.name,
                port.id,
                port.mac.as_deref().unwrap_or("None"),
                port.state
            ),
            Object::Table(table) => table.fmt(f),
            Object::Flow(flow) => flow.fmt(f),
        }
    }
}

/// Which objects [`Snapshot::get_objects`] lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind<'a> {
    Nodes,
    Hosts,
    Switches,
    /// Ports of every node, or of one node.
    Ports {
        node: Option<&'a str>,
        live_only: bool,
    },
    /// Active tables of a switch.
    Tables { node: Option<&'a str> },
    Flows {
        node: Option<&'a str>,
        table: Option<u8>,
    },
}

impl<'a> ObjectKind<'a> {
    /// Picks the kind from a loose level keyword (`topo`, `node`, `host`,
    /// `switch`, `port`, `table`, `flow`). Unrecognised levels list flows,
    /// which is empty unless a node and table are given.
    pub fn from_level(level: &str, node: Option<&'a str>, table: Option<u8>) -> Self {
        let level = level.to_lowercase();
        if level.contains("topo") || level.contains("node") {
            ObjectKind::Nodes
        } else if level.contains("host") {
            ObjectKind::Hosts
        } else if level.contains("switch") {
            ObjectKind::Switches
        } else if level.contains("port") {
            ObjectKind::Ports {
                node,
                live_only: level.contains("live"),
            }
        } else if level.contains("table") {
            ObjectKind::Tables { node }
        } else {
            ObjectKind::Flows { node, table }
        }
    }
}

impl Snapshot {
    pub fn new(version: u64, registry: Registry) -> Self {
        let graph = NetworkGraph::from_registry(&registry);
        Self {
            version,
            registry: Arc::new(registry),
            graph,
        }
    }

    /// Node by id, falling back to display name.
    pub fn node(&self, key: &str) -> Option<&Node> {
        self.registry
            .node(key)
            .or_else(|| self.registry.node_by_name(key))
    }

    pub fn find_shortest_path(
        &self,
        source: &str,
        target: &str,
        constraints: &PathConstraints,
    ) -> Option<WeightedPath> {
        self.graph.find_shortest_path(source, target, constraints)
    }

    pub fn is_valid_path<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.graph.is_valid_path(path)
    }

    /// Shortest path for every unordered host pair, keyed by name pair.
    pub fn hosts_shortest_paths(&self) -> BTreeMap<(String, String), WeightedPath> {
        let unconstrained = PathConstraints::default();
        self.registry
            .nodes()
            .filter(|n| n.is_host())
            .map(|n| n.name.as_str())
            .sorted()
            .tuple_combinations()
            .filter_map(|(a, b)| {
                self.graph
                    .find_shortest_path(a, b, &unconstrained)
                    .map(|path| ((a.to_string(), b.to_string()), path))
            })
            .collect()
    }

    /// The deepest object the ids reach. A missing or unknown id stops the
    /// descent at the enclosing object: topology, node, then table.
    pub fn get_object(&self, node: Option<&str>, table: Option<u8>, flow: Option<&str>) -> Object<'_> {
        let Some(node) = node.and_then(|key| self.node(key)) else {
            return Object::Topology(self);
        };
        let Some(table) = table.and_then(|id| node.table(id)) else {
            return Object::Node(node);
        };
        match flow.and_then(|id| table.flow(id)) {
            Some(flow) => Object::Flow(flow),
            None => Object::Table(table),
        }
    }

    /// Objects of one kind. Unknown nodes or tables give an empty list.
    pub fn get_objects(&self, kind: ObjectKind<'_>, sorted: bool) -> Vec<Object<'_>> {
        let mut objects: Vec<(String, Object<'_>)> = match kind {
            ObjectKind::Nodes => self.nodes_where(|_| true),
            ObjectKind::Hosts => self.nodes_where(Node::is_host),
            ObjectKind::Switches => self.nodes_where(Node::is_switch),
            ObjectKind::Ports { node, live_only } => {
                let ports: Vec<&Port> = match node {
                    Some(key) => self
                        .node(key)
                        .map(|n| n.ports.values().collect())
                        .unwrap_or_default(),
                    None => self.registry.ports().collect(),
                };
                ports
                    .into_iter()
                    .filter(|p| !live_only || p.is_linked())
                    .map(|p| (p.name.clone(), Object::Port(p)))
                    .collect()
            }
            ObjectKind::Tables { node } => node
                .and_then(|key| self.node(key))
                .map(|n| {
                    n.active_tables()
                        .into_values()
                        .map(|t| (t.name.clone(), Object::Table(t)))
                        .collect()
                })
                .unwrap_or_default(),
            ObjectKind::Flows { node, table } => node
                .and_then(|key| self.node(key))
                .zip(table)
                .and_then(|(n, id)| n.table(id))
                .map(|t| {
                    t.flows()
                        .into_values()
                        .map(|f| (f.display_name().to_string(), Object::Flow(f)))
                        .collect()
                })
                .unwrap_or_default(),
        };
        if sorted {
            objects.sort_by(|a, b| a.0.cmp(&b.0));
        }
        objects.into_iter().map(|(_, object)| object).collect()
    }

    fn nodes_where(&self, keep: impl Fn(&Node) -> bool) -> Vec<(String, Object<'_>)> {
        self.registry
            .nodes()
            .filter(|n| keep(n))
            .map(|n| (n.name.clone(), Object::Node(n)))
            .collect()
    }

    /// Multi-line text for a list of objects. Port lists get the port table
    /// with peers resolved.
    pub fn render_objects(&self, objects: &[Object<'_>]) -> String {
        let ports: Vec<&Port> = objects
            .iter()
            .filter_map(|o| match o {
                Object::Port(p) => Some(*p),
                _ => None,
            })
            .collect();
        if !objects.is_empty() && ports.len() == objects.len() {
            return self.registry.render_ports(ports);
        }
        objects.iter().map(|o| o.to_string()).join("\n")
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.graph.fmt(f)
    }
}

/// Holder of the current snapshot.
#[derive(Debug, Default)]
pub struct TopologyStore {
    current: RwLock<Arc<Snapshot>>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Publishes a snapshot built from `registry`, with default weights.
    pub async fn publish(&self, registry: Registry) -> Arc<Snapshot> {
        let graph = NetworkGraph::from_registry(&registry);
        let registry = Arc::new(registry);
        let mut current = self.current.write().await;
        let next = Arc::new(Snapshot {
            version: current.version + 1,
            registry,
            graph,
        });
        *current = Arc::clone(&next);
        next
    }

    /// Re-discovers the network. On failure the current snapshot stays.
    pub async fn refresh(&self, controller: &dyn Controller) -> Result<Arc<Snapshot>, SdnError> {
        let topology = fetch_topology(controller).await?;
        let switches = fetch_switches(controller).await?;
        let registry = Registry::build(&topology, &switches)?;
        let snapshot = self.publish(registry).await;
        info!(
            "Topology refreshed to version {}: {} nodes, {} links",
            snapshot.version,
            snapshot.graph.node_count(),
            snapshot.graph.edge_count()
        );
        Ok(snapshot)
    }

    pub async fn set_weight(&self, a: &str, b: &str, weight: u64) -> Result<Arc<Snapshot>, SdnError> {
        self.set_weights(&[(a, b, weight)]).await
    }

    /// Applies a weight batch to a copy of the graph and publishes it. A
    /// missing edge fails the whole batch and publishes nothing.
    pub async fn set_weights<S: AsRef<str>>(
        &self,
        batch: &[(S, S, u64)],
    ) -> Result<Arc<Snapshot>, SdnError> {
        let mut current = self.current.write().await;
        let mut graph = current.graph.clone();
        graph.set_weights(batch)?;
        let next = Arc::new(Snapshot {
            version: current.version + 1,
            registry: Arc::clone(&current.registry),
            graph,
        });
        *current = Arc::clone(&next);
        debug!("Applied {} weights, version {}", batch.len(), next.version);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::recording::RecordingController;
    use crate::discovery::{INVENTORY_PATH, TOPOLOGY_PATH};
    use crate::registry::fixtures;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        Snapshot::new(1, fixtures::registry())
    }

    mod object_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_get_object_falls_back_to_enclosing() {
            let snap = snapshot();
            assert!(matches!(snap.get_object(None, Some(0), None), Object::Topology(_)));
            assert!(matches!(snap.get_object(Some("nope"), None, None), Object::Topology(_)));
            assert!(matches!(
                snap.get_object(Some("openflow:1"), None, None),
                Object::Node(n) if n.name == "s1"
            ));
            assert!(matches!(
                snap.get_object(Some("s1"), Some(7), None),
                Object::Node(n) if n.id == "openflow:1"
            ));
            assert!(matches!(
                snap.get_object(Some("h01"), Some(0), None),
                Object::Node(n) if n.is_host()
            ));
            assert!(matches!(
                snap.get_object(Some("s1"), Some(0), Some("missing")),
                Object::Table(ref t) if t.id == 0
            ));
            assert!(matches!(
                snap.get_object(Some("s1"), Some(0), Some("hello")),
                Object::Flow(ref f) if f.id == "hello"
            ));
        }

        #[test]
        fn test_get_objects_by_kind() {
            let snap = snapshot();
            assert_eq!(snap.get_objects(ObjectKind::Nodes, false).len(), 5);
            let hosts = snap.get_objects(ObjectKind::Hosts, true);
            let names: Vec<String> = hosts
                .iter()
                .filter_map(|o| match o {
                    Object::Node(n) => Some(n.name.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(names, vec!["h01", "h02"]);
            assert_eq!(snap.get_objects(ObjectKind::Switches, false).len(), 3);

            let all_ports = ObjectKind::Ports {
                node: None,
                live_only: false,
            };
            assert_eq!(snap.get_objects(all_ports, false).len(), 10);
            let s1_ports = ObjectKind::Ports {
                node: Some("s1"),
                live_only: true,
            };
            assert_eq!(snap.get_objects(s1_ports, false).len(), 3);

            let tables = snap.get_objects(ObjectKind::Tables { node: Some("s1") }, true);
            assert_eq!(tables.len(), 1);
            let flows = ObjectKind::Flows {
                node: Some("openflow:2"),
                table: Some(0),
            };
            assert_eq!(snap.get_objects(flows, true).len(), 1);
        }

        #[test]
        fn test_unknown_scope_is_empty() {
            let snap = snapshot();
            assert!(snap
                .get_objects(ObjectKind::Tables { node: Some("h01") }, false)
                .is_empty());
            assert!(snap
                .get_objects(ObjectKind::Tables { node: None }, false)
                .is_empty());
            let flows = ObjectKind::Flows {
                node: Some("s1"),
                table: Some(9),
            };
            assert!(snap.get_objects(flows, false).is_empty());
        }

        #[test]
        fn test_level_keywords() {
            assert_eq!(ObjectKind::from_level("topo", None, None), ObjectKind::Nodes);
            assert_eq!(ObjectKind::from_level("Hosts", None, None), ObjectKind::Hosts);
            assert_eq!(
                ObjectKind::from_level("live-ports", Some("s1"), None),
                ObjectKind::Ports {
                    node: Some("s1"),
                    live_only: true
                }
            );
            assert_eq!(
                ObjectKind::from_level("flows", Some("s1"), Some(0)),
                ObjectKind::Flows {
                    node: Some("s1"),
                    table: Some(0)
                }
            );
        }

        #[test]
        fn test_render_port_list_uses_port_table() {
            let snap = snapshot();
            let ports = snap.get_objects(
                ObjectKind::Ports {
                    node: Some("s3"),
                    live_only: false,
                },
                true,
            );
            let text = snap.render_objects(&ports);
            assert_eq!(text.lines().count(), 3);
            assert!(text.lines().nth(1).unwrap().contains("s3-eth1"));
            assert!(text.lines().nth(1).unwrap().contains("s1-eth3"));
        }
    }

    mod path_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_hosts_shortest_paths() {
            let paths = snapshot().hosts_shortest_paths();
            assert_eq!(paths.len(), 1);
            let path = &paths[&("h01".to_string(), "h02".to_string())];
            assert_eq!(path.nodes, vec!["h01", "s1", "s2", "h02"]);
            assert_eq!(path.cost, 3);
        }
    }

    mod store_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        fn controller() -> RecordingController {
            let (topology, switches) = fixtures::topology();
            RecordingController::default()
                .with_response(
                    TOPOLOGY_PATH,
                    json!({"network-topology": {"topology": [serde_json::to_value(&topology).unwrap()]}}),
                )
                .with_response(INVENTORY_PATH, json!({"nodes": {"node": switches}}))
        }

        #[tokio::test]
        async fn test_refresh_publishes_new_version() {
            let store = TopologyStore::new();
            assert_eq!(store.snapshot().await.version, 0);
            let snap = store.refresh(&controller()).await.unwrap();
            assert_eq!(snap.version, 1);
            assert_eq!(snap.registry.len(), 5);
            assert_eq!(store.snapshot().await.graph.edge_count(), 5);
        }

        #[tokio::test]
        async fn test_failed_refresh_keeps_previous_snapshot() {
            let store = TopologyStore::new();
            store.refresh(&controller()).await.unwrap();
            let broken = RecordingController::default()
                .with_response(TOPOLOGY_PATH, json!({"network-topology": {"topology": []}}));
            assert!(store.refresh(&broken).await.is_err());
            let snap = store.snapshot().await;
            assert_eq!(snap.version, 1);
            assert_eq!(snap.registry.len(), 5);
        }

        #[tokio::test]
        async fn test_weights_publish_copy_and_old_readers_keep_theirs() {
            let store = TopologyStore::new();
            store.refresh(&controller()).await.unwrap();
            let before = store.snapshot().await;

            let after = store.set_weight("s1", "s2", 10).await.unwrap();
            assert_eq!(after.version, 2);
            assert_eq!(after.graph.weight("s1", "s2"), Some(10));
            assert_eq!(before.graph.weight("s1", "s2"), Some(1));

            let path = after
                .find_shortest_path("h01", "h02", &PathConstraints::default())
                .unwrap();
            assert_eq!(path.nodes, vec!["h01", "s1", "s3", "s2", "h02"]);

            let err = store.set_weights(&[("s1", "s3", 4), ("h01", "h02", 1)]).await;
            assert!(matches!(err, Err(SdnError::NoSuchEdge(..))));
            let current = store.snapshot().await;
            assert_eq!(current.version, 2);
            assert_eq!(current.graph.weight("s1", "s3"), Some(1));
        }

        #[tokio::test]
        async fn test_refresh_resets_weights() {
            let store = TopologyStore::new();
            let controller = controller();
            store.refresh(&controller).await.unwrap();
            store.set_weight("s1", "s2", 10).await.unwrap();
            let snap = store.refresh(&controller).await.unwrap();
            assert_eq!(snap.version, 3);
            assert_eq!(snap.graph.weight("s1", "s2"), Some(1));
        }
    }
}
