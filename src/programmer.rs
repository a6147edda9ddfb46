//! Writing flow entries to switches.
//!
//! [`FlowProgrammer`] owns the mutation surface: single flows through the
//! config datastore or the `sal-flow` RPCs, flow deletion, and turning a host
//! to host path into forwarding entries on every switch along it.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::Controller;
use crate::discovery::{inventory_path, Datastore};
use crate::error::SdnError;
use crate::flow::{basic_flow, drop_flow, lldp_flow, Flow, FLOW_STATISTICS_KEY};
use crate::node::Node;
use crate::topology::Snapshot;

const ADD_FLOW_RPC: &str = "/restconf/operations/sal-flow:add-flow";
const REMOVE_FLOW_RPC: &str = "/restconf/operations/sal-flow:remove-flow";

/// Id given to flows created by [`FlowProgrammer::set_drop_flow`].
pub const DROP_FLOW_ID: &str = "drop";
/// Id given to flows created by [`FlowProgrammer::set_lldp_flow_in_switch`].
pub const LLDP_FLOW_ID: &str = "hello";

/// Instance identifier the RPCs use to address a switch.
fn node_ref(node_id: &str) -> String {
    format!(
        "/opendaylight-inventory:nodes/opendaylight-inventory:node[opendaylight-inventory:id='{node_id}']"
    )
}

/// A flow entry bound for one table of one switch.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowWrite {
    pub node_id: String,
    pub table: u8,
    pub flow: Flow,
}

impl FlowWrite {
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.node_id, self.table, self.flow.id)
    }
}

/// Outcome of a completed path installation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InstallReport {
    pub path: Vec<String>,
    /// Labels of the writes, in the order they were issued.
    pub written: Vec<String>,
}

/// Validates a host to host path and derives its flow entries.
///
/// Nothing is written here. Two entries per interior switch, forward then
/// backward, in path order: forward matches source MAC to destination MAC and
/// outputs towards the next hop; backward mirrors it towards the previous hop.
pub fn plan_path<S: AsRef<str>>(
    snapshot: &Snapshot,
    names: &[S],
    table: u8,
    priority: u16,
) -> Result<Vec<FlowWrite>, SdnError> {
    if names.len() < 2 {
        return Err(SdnError::InvalidPath(
            "a path needs at least two nodes".into(),
        ));
    }
    let nodes = snapshot
        .registry
        .resolve_nodes(names)
        .into_iter()
        .zip(names)
        .map(|(node, name)| {
            node.ok_or_else(|| SdnError::InvalidPath(format!("unknown node {}", name.as_ref())))
        })
        .collect::<Result<Vec<&Node>, _>>()?;

    let (first, last) = (nodes[0], nodes[nodes.len() - 1]);
    let (src_mac, dest_mac) = match (first.mac(), last.mac()) {
        (Some(src), Some(dest)) => (src, dest),
        (None, _) => return Err(SdnError::NotAHost(first.name.clone())),
        (_, None) => return Err(SdnError::NotAHost(last.name.clone())),
    };
    if !snapshot.is_valid_path(names) {
        return Err(SdnError::InvalidPath(format!(
            "{} is not connected",
            names.iter().map(|n| n.as_ref()).collect::<Vec<&str>>().join(" -> ")
        )));
    }

    let forward_id = format!("{}-{}-go", first.name, last.name);
    let backward_id = format!("{}-{}-back", first.name, last.name);
    let mut writes = Vec::with_capacity(2 * (nodes.len() - 2));
    for hop in nodes.windows(3) {
        let (prev, node, next) = (hop[0], hop[1], hop[2]);
        if !node.is_switch() {
            return Err(SdnError::InvalidPath(format!(
                "interior node {} is not a switch",
                node.name
            )));
        }
        let facing = |peer: &Node| {
            snapshot
                .registry
                .port_facing(&node.id, &peer.id)
                .and_then(|port| port.port_number.as_ref())
                .ok_or_else(|| SdnError::UnresolvedPort {
                    node: node.name.clone(),
                    peer: peer.name.clone(),
                })
        };
        let port_prev = facing(prev)?;
        let port_next = facing(next)?;

        writes.push(FlowWrite {
            node_id: node.id.clone(),
            table,
            flow: basic_flow(&forward_id, src_mac, dest_mac, port_next, None, priority),
        });
        writes.push(FlowWrite {
            node_id: node.id.clone(),
            table,
            flow: basic_flow(&backward_id, dest_mac, src_mac, port_prev, None, priority),
        });
    }
    Ok(writes)
}

/// Which flows of a switch a deletion targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowScope {
    Flow { table: u8, id: String },
    Table(u8),
    /// Every active table of the switch.
    All,
}

impl FlowScope {
    /// A flow id only means something inside a table, so a flow without a
    /// table is rejected rather than widened to the whole switch.
    pub fn new(table: Option<u8>, flow: Option<&str>) -> Result<Self, SdnError> {
        match (table, flow) {
            (Some(table), Some(id)) => Ok(FlowScope::Flow {
                table,
                id: id.to_string(),
            }),
            (Some(table), None) => Ok(FlowScope::Table(table)),
            (None, None) => Ok(FlowScope::All),
            (None, Some(id)) => Err(SdnError::FlowWithoutTable(id.to_string())),
        }
    }
}

/// Resolves a drop-flow endpoint: a host name becomes its MAC, anything else
/// is taken as a literal MAC address.
pub fn endpoint_mac<'a>(snapshot: &'a Snapshot, endpoint: &'a str) -> &'a str {
    snapshot
        .node(endpoint)
        .and_then(Node::mac)
        .unwrap_or(endpoint)
}

pub struct FlowProgrammer {
    controller: Arc<dyn Controller>,
}

impl FlowProgrammer {
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        Self { controller }
    }

    /// Stores a flow in the config datastore; the controller pushes it to the switch.
    pub async fn set_flow(&self, node_id: &str, table: u8, flow: &Flow) -> Result<(), SdnError> {
        let path = format!(
            "/restconf/config/opendaylight-inventory:nodes/node/{node_id}/flow-node-inventory:table/{table}/flow/{}",
            flow.id
        );
        let body = json!({ "flow-node-inventory:flow": [flow.to_payload(table)?] });
        self.controller.put(&path, &body).await
    }

    /// Adds a flow straight to the switch through the `add-flow` RPC. The id is
    /// left out so the switch gets a new entry instead of the datastore one.
    pub async fn set_flow_in_switch(&self, node_id: &str, table: u8, flow: &Flow) -> Result<(), SdnError> {
        let mut input = flow.to_payload(table)?;
        if let Value::Object(ref mut map) = input {
            map.remove("id");
            map.insert("node".into(), Value::from(node_ref(node_id)));
        }
        self.controller
            .post(ADD_FLOW_RPC, &json!({ "input": input }))
            .await
    }

    pub async fn set_drop_flow(
        &self,
        node_id: &str,
        table: u8,
        src_mac: Option<&str>,
        dest_mac: Option<&str>,
        priority: u16,
    ) -> Result<(), SdnError> {
        let flow = drop_flow(DROP_FLOW_ID, src_mac, dest_mac, None, priority);
        self.set_flow(node_id, table, &flow).await
    }

    /// Installs the LLDP capture entry directly on the switch.
    pub async fn set_lldp_flow_in_switch(&self, node_id: &str, table: u8) -> Result<(), SdnError> {
        self.set_flow_in_switch(node_id, table, &lldp_flow(LLDP_FLOW_ID))
            .await
    }

    /// Deletes one flow, or a whole table when `flow_id` is `None`, from the
    /// config datastore.
    pub async fn delete_flows(&self, node_id: &str, table: u8, flow_id: Option<&str>) -> Result<(), SdnError> {
        let path = inventory_path(Datastore::Config, Some(node_id), Some(table), flow_id);
        self.controller.delete(&path).await
    }

    /// Clears every active table of the switch. Returns the tables cleared.
    pub async fn delete_all_flows(&self, snapshot: &Snapshot, node_id: &str) -> Result<Vec<u8>, SdnError> {
        let node = snapshot
            .registry
            .node(node_id)
            .filter(|n| n.is_switch())
            .ok_or_else(|| SdnError::UnknownSwitch(node_id.to_string()))?;
        let tables: Vec<u8> = node.active_tables().into_keys().collect();
        for &table in &tables {
            self.delete_flows(node_id, table, None).await?;
        }
        info!("Cleared {} tables on {}", tables.len(), node_id);
        Ok(tables)
    }

    /// Removes flows directly on switches with the `remove-flow` RPC, once per
    /// (node, table) pair. Without a flow every entry of the table goes and
    /// `strict` is ignored.
    pub async fn delete_flows_in_switch<S: AsRef<str>>(
        &self,
        node_ids: &[S],
        tables: &[u8],
        flow: Option<&Flow>,
        strict: bool,
    ) -> Result<(), SdnError> {
        let mut template = match flow {
            Some(flow) => {
                let mut value = serde_json::to_value(flow)?;
                if let Value::Object(ref mut map) = value {
                    map.remove("id");
                    map.remove(FLOW_STATISTICS_KEY);
                    map.insert("strict".into(), Value::Bool(strict));
                }
                value
            }
            None => json!({ "strict": false }),
        };
        for node_id in node_ids {
            for &table in tables {
                if let Value::Object(ref mut map) = template {
                    map.insert("table_id".into(), Value::from(table));
                    map.insert("node".into(), Value::from(node_ref(node_id.as_ref())));
                }
                debug!("Removing flows on {} table {}", node_id.as_ref(), table);
                self.controller
                    .post(REMOVE_FLOW_RPC, &json!({ "input": template }))
                    .await?;
            }
        }
        Ok(())
    }

    /// Deletes the flows in `scope` from the config datastore. Returns the
    /// tables touched.
    pub async fn delete_scoped(
        &self,
        snapshot: &Snapshot,
        node_id: &str,
        scope: &FlowScope,
    ) -> Result<Vec<u8>, SdnError> {
        match scope {
            FlowScope::Flow { table, id } => {
                self.delete_flows(node_id, *table, Some(id)).await?;
                Ok(vec![*table])
            }
            FlowScope::Table(table) => {
                self.delete_flows(node_id, *table, None).await?;
                Ok(vec![*table])
            }
            FlowScope::All => self.delete_all_flows(snapshot, node_id).await,
        }
    }

    /// Removes the flows in `scope` directly on the switch. A single flow is
    /// looked up in the snapshot so the RPC can carry its match.
    pub async fn delete_scoped_in_switch(
        &self,
        snapshot: &Snapshot,
        node_id: &str,
        scope: &FlowScope,
        strict: bool,
    ) -> Result<Vec<u8>, SdnError> {
        let node = snapshot
            .registry
            .node(node_id)
            .filter(|n| n.is_switch())
            .ok_or_else(|| SdnError::UnknownSwitch(node_id.to_string()))?;
        let (tables, flow) = match scope {
            FlowScope::Flow { table, id } => {
                let flow = node
                    .table(*table)
                    .and_then(|t| t.flow(id))
                    .ok_or_else(|| SdnError::NotFound(format!("{node_id}/{table}/{id}")))?;
                (vec![*table], Some(flow))
            }
            FlowScope::Table(table) => (vec![*table], None),
            FlowScope::All => (node.active_tables().into_keys().collect(), None),
        };
        self.delete_flows_in_switch(&[node_id], &tables, flow.as_ref(), strict)
            .await?;
        Ok(tables)
    }

    /// Clears the active tables of every switch directly and puts the LLDP
    /// capture entry back in table 0, so discovery keeps working. Returns the
    /// ids of the switches reset.
    pub async fn reset_switches(&self, snapshot: &Snapshot) -> Result<Vec<String>, SdnError> {
        let mut reset = Vec::new();
        for node in snapshot.registry.nodes().filter(|n| n.is_switch()) {
            let tables: Vec<u8> = node.active_tables().into_keys().collect();
            if let Err(e) = self
                .delete_flows_in_switch(&[node.id.as_str()], &tables, None, false)
                .await
            {
                warn!("Failed to clear tables on {} [{}]: {}", node.name, node.id, e);
            }
            self.set_lldp_flow_in_switch(&node.id, 0).await?;
            info!("Reset switch {} [{}]", node.name, node.id);
            reset.push(node.id.clone());
        }
        Ok(reset)
    }

    /// Installs forwarding for a host to host path.
    ///
    /// The whole path is validated and compiled before the first write. Writes
    /// go one at a time in path order; `cancel` is checked before each one.
    /// Nothing is rolled back: on failure or cancellation the error carries the
    /// writes that already went through.
    pub async fn install_path<S: AsRef<str>>(
        &self,
        snapshot: &Snapshot,
        names: &[S],
        table: u8,
        priority: u16,
        cancel: &CancellationToken,
    ) -> Result<InstallReport, SdnError> {
        let writes = plan_path(snapshot, names, table, priority)?;
        let path: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let mut completed = Vec::with_capacity(writes.len());

        for write in &writes {
            if cancel.is_cancelled() {
                warn!(
                    "Install of {:?} cancelled after {} of {} writes",
                    path,
                    completed.len(),
                    writes.len()
                );
                return Err(SdnError::Cancelled { completed });
            }
            if let Err(e) = self.set_flow(&write.node_id, write.table, &write.flow).await {
                error!("Writing {} failed: {}", write.label(), e);
                return Err(SdnError::PartialInstall {
                    completed,
                    source: Box::new(e),
                });
            }
            completed.push(write.label());
        }

        info!("Installed {:?} with {} flows", path, completed.len());
        Ok(InstallReport {
            path,
            written: completed,
        })
    }
}
