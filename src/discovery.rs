//! Fetching and decoding controller objects.
//!
//! Every payload is tagged with its kind here, at the fetch boundary, so the
//! rest of the crate works with [`Fetched`] and [`LiveObject`] values instead
//! of raw JSON.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::controller::Controller;
use crate::error::SdnError;
use crate::flow::{Flow, Table};
use crate::models::{NetworkTopologyResponse, TopologyData};
use crate::node::{Node, Port};

pub const TOPOLOGY_PATH: &str = "/restconf/operational/network-topology:network-topology/";
pub const INVENTORY_PATH: &str = "/restconf/operational/opendaylight-inventory:nodes/";

const NODE_KEY: &str = "node";
const TABLE_KEY: &str = "flow-node-inventory:table";
const FLOW_KEY: &str = "flow-node-inventory:flow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Datastore {
    #[default]
    Operational,
    Config,
}

impl Datastore {
    pub fn as_str(self) -> &'static str {
        match self {
            Datastore::Operational => "operational",
            Datastore::Config => "config",
        }
    }
}

impl FromStr for Datastore {
    type Err = std::convert::Infallible;

    /// Anything mentioning "conf" selects the config datastore.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.contains("conf") {
            Datastore::Config
        } else {
            Datastore::Operational
        })
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `/restconf/{datastore}/opendaylight-inventory:nodes[/node/{n}[/table/{t}[/flow/{f}]]]`
pub fn inventory_path(
    datastore: Datastore,
    node: Option<&str>,
    table: Option<u8>,
    flow: Option<&str>,
) -> String {
    let mut path = format!("/restconf/{datastore}/opendaylight-inventory:nodes");
    let Some(node) = node else {
        return path;
    };
    path.push_str(&format!("/node/{node}"));
    if let Some(table) = table {
        path.push_str(&format!("/table/{table}"));
        if let Some(flow) = flow {
            path.push_str(&format!("/flow/{flow}"));
        }
    }
    path
}

/// What to list from the operational datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing<'a> {
    Topology,
    Switches,
    Ports { node: &'a str },
    Tables { node: &'a str },
    Flows { node: &'a str, table: u8 },
}

/// A decoded object list, tagged by kind.
#[derive(Debug, Clone)]
pub enum Fetched {
    Topology(Vec<TopologyData>),
    Switches(Vec<Node>),
    Ports(Vec<Port>),
    Tables(Vec<Table>),
    Flows(Vec<Flow>),
}

impl Fetched {
    pub fn len(&self) -> usize {
        match self {
            Fetched::Topology(v) => v.len(),
            Fetched::Switches(v) => v.len(),
            Fetched::Ports(v) => v.len(),
            Fetched::Tables(v) => v.len(),
            Fetched::Flows(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single object read live from a datastore.
#[derive(Debug, Clone)]
pub enum LiveObject {
    Switch(Node),
    Table(Table),
    Flow(Flow),
}

impl fmt::Display for LiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveObject::Switch(node) => node.fmt(f),
            LiveObject::Table(table) => table.fmt(f),
            LiveObject::Flow(flow) => flow.fmt(f),
        }
    }
}

/// First entry under `key`. RESTCONF wraps single objects in a one-element list.
fn first_entry(mut body: Value, key: &str) -> Result<Value, SdnError> {
    match body.get_mut(key).map(Value::take) {
        Some(Value::Array(items)) => items
            .into_iter()
            .next()
            .ok_or_else(|| SdnError::InvalidApiResponse(format!("empty '{key}' list"))),
        Some(obj @ Value::Object(_)) => Ok(obj),
        _ => Err(SdnError::InvalidApiResponse(format!("missing '{key}'"))),
    }
}

/// All topologies known to the controller.
pub async fn fetch_topologies(controller: &dyn Controller) -> Result<Vec<TopologyData>, SdnError> {
    let body = controller.get(TOPOLOGY_PATH).await?;
    let response: NetworkTopologyResponse = serde_json::from_value(body)?;
    Ok(response.network_topology.topology)
}

/// The first topology, which carries hosts and links.
pub async fn fetch_topology(controller: &dyn Controller) -> Result<TopologyData, SdnError> {
    fetch_topologies(controller)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| SdnError::InvalidApiResponse("controller reports no topology".into()))
}

/// Raw inventory entries for every switch.
pub async fn fetch_switches(controller: &dyn Controller) -> Result<Vec<Value>, SdnError> {
    let mut body = controller.get(INVENTORY_PATH).await?;
    let nodes = body
        .get_mut("nodes")
        .ok_or_else(|| SdnError::InvalidApiResponse("missing 'nodes'".into()))?;
    match nodes.get_mut(NODE_KEY).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        None => Ok(Vec::new()),
        Some(other) => Err(SdnError::InvalidApiResponse(format!(
            "'node' is not a list: {other}"
        ))),
    }
}

async fn fetch_switch(controller: &dyn Controller, node: &str) -> Result<Node, SdnError> {
    let path = inventory_path(Datastore::Operational, Some(node), None, None);
    let entry = first_entry(controller.get(&path).await?, NODE_KEY)?;
    Node::switch_from_value(&entry)
}

async fn fetch_table(
    controller: &dyn Controller,
    datastore: Datastore,
    node: &str,
    table: u8,
) -> Result<Table, SdnError> {
    let path = inventory_path(datastore, Some(node), Some(table), None);
    Table::from_value(&first_entry(controller.get(&path).await?, TABLE_KEY)?)
}

/// Lists objects of one kind. A node or table the controller does not know
/// gives an empty list.
pub async fn fetch_objects(
    controller: &dyn Controller,
    listing: Listing<'_>,
) -> Result<Fetched, SdnError> {
    let fetched = match listing {
        Listing::Topology => Fetched::Topology(fetch_topologies(controller).await?),
        Listing::Switches => Fetched::Switches(
            fetch_switches(controller)
                .await?
                .iter()
                .map(Node::switch_from_value)
                .collect::<Result<_, _>>()?,
        ),
        Listing::Ports { node } => Fetched::Ports(match fetch_switch(controller, node).await {
            Ok(switch) => switch.ports.into_values().collect(),
            Err(SdnError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        }),
        Listing::Tables { node } => Fetched::Tables(match fetch_switch(controller, node).await {
            Ok(switch) => switch.tables().into_values().collect(),
            Err(SdnError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        }),
        Listing::Flows { node, table } => {
            Fetched::Flows(match fetch_table(controller, Datastore::Operational, node, table).await {
                Ok(table) => table.flows().into_values().collect(),
                Err(SdnError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            })
        }
    };
    debug!("Fetched {} objects for {:?}", fetched.len(), listing);
    Ok(fetched)
}

/// Reads one switch, table or flow, picking the kind from which ids are given.
/// `None` when the controller does not have it.
pub async fn fetch_object(
    controller: &dyn Controller,
    node: &str,
    table: Option<u8>,
    flow: Option<&str>,
    datastore: Datastore,
) -> Result<Option<LiveObject>, SdnError> {
    let path = inventory_path(datastore, Some(node), table, flow);
    let body = match controller.get(&path).await {
        Ok(body) => body,
        Err(SdnError::NotFound(_)) => {
            debug!("No object at {}", path);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let object = match (table, flow) {
        (None, _) => LiveObject::Switch(Node::switch_from_value(&first_entry(body, NODE_KEY)?)?),
        (Some(_), None) => LiveObject::Table(Table::from_value(&first_entry(body, TABLE_KEY)?)?),
        (Some(_), Some(_)) => {
            let entry = first_entry(body, FLOW_KEY)?;
            match serde_json::from_value(entry) {
                Ok(flow) => LiveObject::Flow(flow),
                Err(e) => {
                    warn!("Undecodable flow at {}: {}", path, e);
                    return Err(SdnError::JsonParse(e));
                }
            }
        }
    };
    Ok(Some(object))
}
