use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::borrow::Cow;
use std::sync::Arc;
use tera::Context;
use tracing::{error, info};

use sdnctl::discovery::{fetch_object, fetch_objects, Datastore, Fetched, Listing};
use sdnctl::path::PathConstraints;
use sdnctl::programmer::{endpoint_mac, FlowScope, InstallReport};
use sdnctl::topology::{ObjectKind, Snapshot};
use sdnctl::SdnError;

use crate::state::AppState;

/// Query parameters for the cached object views.
#[derive(Debug, Deserialize)]
pub struct ObjectQuery {
    /// List objects of this level instead of fetching a single one.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub node: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub table: Option<u8>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub flow: Option<String>,
    #[serde(default)]
    pub sorted: bool,
}

/// Query parameters for objects read straight from the controller.
#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub node: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub table: Option<u8>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub flow: Option<String>,
    /// `operational` (default) or `config`.
    #[serde(default, deserialize_with = "blank_as_none")]
    pub datastore: Option<String>,
}

/// Query parameters for path search. Through and block lists are comma separated.
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub src: String,
    pub dst: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub through: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub block: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub cutoff: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub table: u8,
    #[serde(default = "default_priority")]
    pub priority: u16,
}

fn default_priority() -> u16 {
    5
}

#[derive(Debug, Deserialize)]
pub struct WeightUpdate {
    pub a: String,
    pub b: String,
    pub weight: u64,
}

/// Body of a drop-flow request. `src` and `dest` are host names or MACs.
#[derive(Debug, Deserialize)]
pub struct DropRequest {
    pub node: String,
    #[serde(default)]
    pub table: u8,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub src: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub dest: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u16,
}

/// Query parameters for flow deletion.
#[derive(Debug, Deserialize)]
pub struct FlowDeleteQuery {
    pub node: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub table: Option<u8>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub flow: Option<String>,
    /// Remove directly on the switch instead of in the config datastore.
    #[serde(default)]
    pub in_switch: bool,
    #[serde(default)]
    pub strict: bool,
}

/// Query values left blank (`?table=`) count as absent.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Option::<String>::deserialize(deserializer)?
        .filter(|raw| !raw.is_empty())
        .map(|raw| raw.parse::<T>().map_err(serde::de::Error::custom))
        .transpose()
}

fn render_page(tera: &tera::Tera, page: &str, context: &Context) -> Result<Html<String>, StatusCode> {
    match tera.render(page, context) {
        Ok(html) => Ok(Html(html)),
        Err(e) => {
            error!("Rendering {} failed: {}", page, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Shortens long node ids for table cells, keeping whole characters.
fn clip_id(id: &str, width: usize) -> Cow<'_, str> {
    match id.char_indices().nth(width) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &id[..cut])),
        None => Cow::Borrowed(id),
    }
}

fn split_names(list: Option<&str>) -> Vec<String> {
    list.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Maps a level keyword to a controller listing. Node-scoped levels need a
/// node, flows also need a table.
fn live_listing<'a>(level: &str, node: Option<&'a str>, table: Option<u8>) -> Option<Listing<'a>> {
    let level = level.to_lowercase();
    if level.contains("topo") {
        return Some(Listing::Topology);
    }
    if level.contains("switch") || level.contains("node") {
        return Some(Listing::Switches);
    }
    let node = node?;
    if level.contains("port") || level.contains("connector") {
        Some(Listing::Ports { node })
    } else if level.contains("table") {
        Some(Listing::Tables { node })
    } else if level.contains("flow") {
        Some(Listing::Flows { node, table: table? })
    } else {
        None
    }
}

fn render_fetched(fetched: &Fetched) -> String {
    match fetched {
        Fetched::Topology(topologies) => topologies
            .iter()
            .map(|t| {
                format!(
                    "TOPOLOGY [{}]: {} nodes, {} links",
                    t.topology_id.as_deref().unwrap_or("-"),
                    t.node.len(),
                    t.link.len()
                )
            })
            .join("\n"),
        Fetched::Switches(nodes) => nodes.iter().join("\n"),
        Fetched::Ports(ports) => ports
            .iter()
            .map(|p| {
                format!(
                    "{:>6} [{}]: [ID = {}] [State = {}]",
                    "PORT", p.name, p.id, p.state
                )
            })
            .join("\n"),
        Fetched::Tables(tables) => tables.iter().join("\n"),
        Fetched::Flows(flows) => flows.iter().join("\n"),
    }
}

/// Error returned by the JSON API.
pub struct ApiError(SdnError);

impl From<SdnError> for ApiError {
    fn from(err: SdnError) -> Self {
        Self(err)
    }
}

fn status_for(err: &SdnError) -> StatusCode {
    match err {
        SdnError::InvalidPath(_)
        | SdnError::NotAHost(_)
        | SdnError::UnresolvedPort { .. }
        | SdnError::WeightOutOfRange { .. }
        | SdnError::FlowWithoutTable(_) => StatusCode::BAD_REQUEST,
        SdnError::NoSuchEdge(..) | SdnError::UnknownSwitch(_) | SdnError::NotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SdnError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SdnError::PartialInstall { .. }
        | SdnError::HttpRequest(_)
        | SdnError::UnexpectedStatus { .. }
        | SdnError::InvalidApiResponse(_)
        | SdnError::Structural(_)
        | SdnError::JsonParse(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = json!({
            "error": self.0.to_string(),
            "completed": self.0.completed_writes(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct NodeRow {
    name: String,
    id: String,
    ip: String,
    mac: String,
    ports: usize,
}

#[derive(Debug, Serialize)]
struct EdgeRow<'a> {
    a: &'a str,
    b: &'a str,
    weight: u64,
}

#[derive(Debug, Serialize)]
struct PathRow {
    hosts: String,
    cost: u64,
    path: String,
}

fn dashboard_context(snapshot: &Snapshot) -> Context {
    let rows = |hosts: bool| -> Vec<NodeRow> {
        snapshot
            .registry
            .nodes()
            .filter(|n| n.is_host() == hosts)
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .map(|n| NodeRow {
                name: n.name.clone(),
                id: clip_id(&n.id, 24).into_owned(),
                ip: n.ip.clone().unwrap_or_else(|| "-".into()),
                mac: n.mac().unwrap_or("-").to_string(),
                ports: n.ports.len(),
            })
            .collect()
    };
    let edges: Vec<EdgeRow> = snapshot
        .graph
        .edges()
        .into_iter()
        .map(|(a, b, weight)| EdgeRow { a, b, weight })
        .collect();
    let paths: Vec<PathRow> = snapshot
        .hosts_shortest_paths()
        .into_iter()
        .map(|((a, b), path)| PathRow {
            hosts: format!("{a} <-> {b}"),
            cost: path.cost,
            path: path.nodes.join(" -> "),
        })
        .collect();

    let mut context = Context::new();
    context.insert("version", &snapshot.version);
    context.insert("hosts", &rows(true));
    context.insert("switches", &rows(false));
    context.insert("edges", &edges);
    context.insert("paths", &paths);
    context.insert("node_count", &snapshot.graph.node_count());
    context.insert("edge_count", &snapshot.graph.edge_count());
    context
}

/// GET / - Dashboard with the current topology.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.snapshot().await;
    render_page(&state.tera, "dashboard.html", &dashboard_context(&snapshot))
}

/// GET /api/objects - Text view of cached objects.
pub async fn objects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ObjectQuery>,
) -> String {
    let snapshot = state.store.snapshot().await;
    match query.level.as_deref() {
        Some(level) => {
            let kind = ObjectKind::from_level(level, query.node.as_deref(), query.table);
            let objects = snapshot.get_objects(kind, query.sorted);
            snapshot.render_objects(&objects)
        }
        None => snapshot
            .get_object(query.node.as_deref(), query.table, query.flow.as_deref())
            .to_string(),
    }
}

/// GET /api/live - Text view of objects read from the controller.
pub async fn live_objects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LiveQuery>,
) -> Result<Response, ApiError> {
    let controller = state.controller.as_ref();
    if let Some(level) = query.level.as_deref() {
        let Some(listing) = live_listing(level, query.node.as_deref(), query.table) else {
            return Ok((StatusCode::BAD_REQUEST, "level needs a node (and a table for flows)").into_response());
        };
        let fetched = fetch_objects(controller, listing).await?;
        return Ok(render_fetched(&fetched).into_response());
    }

    let Some(node) = query.node.as_deref() else {
        return Ok((StatusCode::BAD_REQUEST, "node is required").into_response());
    };
    let datastore: Datastore = query
        .datastore
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or_default();
    match fetch_object(controller, node, query.table, query.flow.as_deref(), datastore).await? {
        Some(object) => Ok(object.to_string().into_response()),
        None => Ok((StatusCode::NOT_FOUND, "not found").into_response()),
    }
}

/// GET /api/path - Constrained shortest path on the current snapshot.
pub async fn find_path(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PathQuery>,
) -> Response {
    let snapshot = state.store.snapshot().await;
    let constraints = PathConstraints {
        throughs: split_names(query.through.as_deref()),
        blocks: split_names(query.block.as_deref()),
        cutoff: query.cutoff,
    };
    match snapshot.find_shortest_path(&query.src, &query.dst, &constraints) {
        Some(path) => Json(path).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "path": null }))).into_response(),
    }
}

/// POST /api/path - Install forwarding flows along a path.
pub async fn install_path(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InstallRequest>,
) -> Result<Json<InstallReport>, ApiError> {
    let snapshot = state.store.snapshot().await;
    let cancel = state.shutdown.child_token();
    let report = state
        .programmer
        .install_path(&snapshot, request.nodes.as_slice(), request.table, request.priority, &cancel)
        .await?;
    Ok(Json(report))
}

/// POST /api/weights - Set edge weights as one batch.
pub async fn set_weights(
    State(state): State<Arc<AppState>>,
    Json(updates): Json<Vec<WeightUpdate>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let batch: Vec<(&str, &str, u64)> = updates
        .iter()
        .map(|u| (u.a.as_str(), u.b.as_str(), u.weight))
        .collect();
    let snapshot = state.store.set_weights(batch.as_slice()).await?;
    Ok(Json(json!({ "version": snapshot.version })))
}

/// DELETE /api/flows - Remove flows from the config datastore or the switch.
///
/// Without a table every active table goes; a flow id needs its table.
pub async fn delete_flows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowDeleteQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let scope = FlowScope::new(query.table, query.flow.as_deref())?;
    let snapshot = state.store.snapshot().await;
    let node = snapshot
        .node(&query.node)
        .filter(|n| n.is_switch())
        .ok_or_else(|| SdnError::UnknownSwitch(query.node.clone()))?;

    let tables = if query.in_switch {
        state
            .programmer
            .delete_scoped_in_switch(&snapshot, &node.id, &scope, query.strict)
            .await?
    } else {
        state.programmer.delete_scoped(&snapshot, &node.id, &scope).await?
    };
    info!("Deleted flows on {} tables {:?}", node.id, tables);
    Ok(Json(json!({ "node": node.id, "tables": tables })))
}

/// POST /api/flows/drop - Store a drop entry for traffic between two endpoints.
pub async fn drop_flow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DropRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.store.snapshot().await;
    let node = snapshot
        .node(&request.node)
        .filter(|n| n.is_switch())
        .ok_or_else(|| SdnError::UnknownSwitch(request.node.clone()))?;
    let src = request.src.as_deref().map(|e| endpoint_mac(&snapshot, e));
    let dest = request.dest.as_deref().map(|e| endpoint_mac(&snapshot, e));
    state
        .programmer
        .set_drop_flow(&node.id, request.table, src, dest, request.priority)
        .await?;
    Ok(Json(json!({ "node": node.id, "table": request.table, "src": src, "dest": dest })))
}

/// POST /api/reset - Clear every switch and reinstall LLDP capture.
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.store.snapshot().await;
    let switches = state.programmer.reset_switches(&snapshot).await?;
    Ok(Json(json!({ "switches": switches })))
}

/// POST /api/refresh - Re-discover the topology now.
pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.store.refresh(state.controller.as_ref()).await?;
    Ok(Json(json!({
        "version": snapshot.version,
        "nodes": snapshot.graph.node_count(),
        "links": snapshot.graph.edge_count(),
    })))
}
