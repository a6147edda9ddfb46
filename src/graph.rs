//! Weighted undirected graph over node names.
//!
//! Vertices are node display names, edges are discovered links, and every edge
//! starts at [`DEFAULT_WEIGHT`]. The graph is always rebuilt from a
//! [`Registry`]; only edge weights change afterwards.

use itertools::Itertools;
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::fmt;

use crate::error::SdnError;
use crate::registry::Registry;

pub const DEFAULT_WEIGHT: u64 = 1;
/// Largest accepted edge weight. Path costs stay far below `u64::MAX` for any
/// simple path.
pub const MAX_WEIGHT: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Default)]
pub struct NetworkGraph {
    pub(crate) graph: UnGraph<String, u64>,
    pub(crate) indices: HashMap<String, NodeIndex>,
}

impl NetworkGraph {
    /// One vertex per registry node, one edge per linked node pair.
    pub fn from_registry(registry: &Registry) -> Self {
        let mut graph = Self::default();
        for node in registry.nodes() {
            graph.vertex(&node.name);
        }
        for (a, b) in registry.links() {
            graph.add_edge(a, b);
        }
        graph
    }

    /// Builds a graph from name pairs, all at the default weight.
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut graph = Self::default();
        for (a, b) in edges {
            graph.add_edge(a, b);
        }
        graph
    }

    fn vertex(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.indices.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.indices.insert(name.to_string(), idx);
        idx
    }

    fn add_edge(&mut self, a: &str, b: &str) {
        let (ia, ib) = (self.vertex(a), self.vertex(b));
        if self.graph.find_edge(ia, ib).is_none() {
            self.graph.add_edge(ia, ib, DEFAULT_WEIGHT);
        }
    }

    pub(crate) fn index(&self, name: &str) -> Option<NodeIndex> {
        self.indices.get(name).copied()
    }

    pub(crate) fn name(&self, idx: NodeIndex) -> &str {
        &self.graph[idx]
    }

    fn edge(&self, a: &str, b: &str) -> Option<EdgeIndex> {
        self.graph.find_edge(self.index(a)?, self.index(b)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn weight(&self, a: &str, b: &str) -> Option<u64> {
        self.edge(a, b).map(|e| self.graph[e])
    }

    /// Resolves the edge for a weight update, rejecting weights above [`MAX_WEIGHT`].
    fn weighted_edge(&self, a: &str, b: &str, weight: u64) -> Result<EdgeIndex, SdnError> {
        if weight > MAX_WEIGHT {
            return Err(SdnError::WeightOutOfRange {
                a: a.to_string(),
                b: b.to_string(),
                weight,
            });
        }
        self.edge(a, b)
            .ok_or_else(|| SdnError::NoSuchEdge(a.to_string(), b.to_string()))
    }

    /// Sets the weight of an existing edge; a missing edge is an error.
    pub fn set_weight(&mut self, a: &str, b: &str, weight: u64) -> Result<(), SdnError> {
        let edge = self.weighted_edge(a, b, weight)?;
        self.graph[edge] = weight;
        Ok(())
    }

    /// Applies a batch of weights. Every entry is checked before any weight
    /// changes, so a batch with a missing edge or an oversized weight leaves
    /// the graph untouched.
    pub fn set_weights<S: AsRef<str>>(&mut self, batch: &[(S, S, u64)]) -> Result<(), SdnError> {
        let edges = batch
            .iter()
            .map(|(a, b, w)| self.weighted_edge(a.as_ref(), b.as_ref(), *w).map(|e| (e, *w)))
            .collect::<Result<Vec<_>, _>>()?;
        for (edge, weight) in edges {
            self.graph[edge] = weight;
        }
        Ok(())
    }

    /// True when every consecutive pair is joined by an edge. An empty path is
    /// invalid; a single node is valid if it is in the graph.
    pub fn is_valid_path<S: AsRef<str>>(&self, path: &[S]) -> bool {
        match path {
            [] => false,
            [only] => self.contains(only.as_ref()),
            _ => path
                .iter()
                .tuple_windows()
                .all(|(a, b)| self.edge(a.as_ref(), b.as_ref()).is_some()),
        }
    }

    /// Total weight along a path, `None` if a hop has no edge.
    pub fn path_weight<S: AsRef<str>>(&self, path: &[S]) -> Option<u64> {
        if !self.is_valid_path(path) {
            return None;
        }
        path.iter()
            .tuple_windows()
            .map(|(a, b)| self.weight(a.as_ref(), b.as_ref()))
            .sum()
    }

    /// Edges as `(a, b, weight)` with `a <= b`, sorted.
    pub fn edges(&self) -> Vec<(&str, &str, u64)> {
        self.graph
            .edge_references()
            .map(|e| {
                let (a, b) = (self.name(e.source()), self.name(e.target()));
                let (a, b) = if a <= b { (a, b) } else { (b, a) };
                (a, b, *e.weight())
            })
            .sorted()
            .collect()
    }
}

impl fmt::Display for NetworkGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "======== Network Graph ========")?;
        for (a, b, w) in self.edges() {
            writeln!(f, "{a:<5} <--> {b:>5} [weight: {w}]")?;
        }
        write!(
            f,
            ":: Total: {} Nodes, {} Edges.",
            self.node_count(),
            self.edge_count()
        )
    }
}
