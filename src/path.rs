//! Constrained shortest-path search.
//!
//! [`ShortestSimplePaths`] yields the simple paths between two nodes in
//! non-decreasing total weight (Yen's algorithm, one A* spur search per
//! deviation point). [`NetworkGraph::find_shortest_path`] walks that order and
//! returns the first path that satisfies the through/block/cutoff constraints.
//!
//! Weights are unsigned, so every spur path costs at least as much as the
//! accepted path it deviates from and the yielded order never decreases. The
//! cutoff check relies on that: the first over-cutoff candidate ends the search.

use itertools::Itertools;
use petgraph::algo::astar;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

use crate::graph::NetworkGraph;

/// A path by node name with its total edge weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightedPath {
    pub cost: u64,
    pub nodes: Vec<String>,
}

impl WeightedPath {
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n == name)
    }
}

impl fmt::Display for WeightedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] (cost {})", self.nodes.join(" -> "), self.cost)
    }
}

/// Required-through nodes, forbidden nodes and a maximum total weight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathConstraints {
    pub throughs: Vec<String>,
    pub blocks: Vec<String>,
    pub cutoff: Option<u64>,
}

impl PathConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn through(mut self, name: impl Into<String>) -> Self {
        self.throughs.push(name.into());
        self
    }

    pub fn block(mut self, name: impl Into<String>) -> Self {
        self.blocks.push(name.into());
        self
    }

    /// Maximum accepted total weight. Zero is a real limit.
    pub fn cutoff(mut self, cutoff: u64) -> Self {
        self.cutoff = Some(cutoff);
        self
    }
}

/// Simple paths from `source` to `target`, cheapest first.
pub struct ShortestSimplePaths<'g> {
    graph: &'g NetworkGraph,
    source: NodeIndex,
    target: NodeIndex,
    excluded: HashSet<NodeIndex>,
    accepted: Vec<Vec<NodeIndex>>,
    candidates: BTreeSet<(u64, Vec<NodeIndex>)>,
    primed: bool,
}

impl<'g> ShortestSimplePaths<'g> {
    /// `None` when either endpoint is not in the graph.
    pub fn new(graph: &'g NetworkGraph, source: &str, target: &str) -> Option<Self> {
        Some(Self {
            source: graph.index(source)?,
            target: graph.index(target)?,
            graph,
            excluded: HashSet::new(),
            accepted: Vec::new(),
            candidates: BTreeSet::new(),
            primed: false,
        })
    }

    /// Never route through the named nodes. Unknown names are ignored.
    pub fn excluding<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.excluded
            .extend(names.iter().filter_map(|n| self.graph.index(n.as_ref())));
        self
    }

    fn edge(&self, a: NodeIndex, b: NodeIndex) -> Option<EdgeIndex> {
        self.graph.graph.find_edge(a, b)
    }

    fn cost_of(&self, path: &[NodeIndex]) -> u64 {
        path.iter()
            .tuple_windows()
            .filter_map(|(&a, &b)| self.edge(a, b))
            .map(|e| self.graph.graph[e])
            .fold(0, u64::saturating_add)
    }

    /// Cheapest path from `from` to the target avoiding the given nodes and edges.
    fn search(
        &self,
        from: NodeIndex,
        removed_nodes: &HashSet<NodeIndex>,
        removed_edges: &HashSet<EdgeIndex>,
    ) -> Option<(u64, Vec<NodeIndex>)> {
        let filtered = EdgeFiltered::from_fn(&self.graph.graph, |e| {
            !removed_edges.contains(&e.id())
                && !removed_nodes.contains(&e.source())
                && !removed_nodes.contains(&e.target())
        });
        astar(&filtered, from, |n| n == self.target, |e| *e.weight(), |_| 0)
    }

    /// Queues every deviation of the most recently accepted path.
    fn branch_from_last(&mut self) {
        let Some(last) = self.accepted.last().cloned() else {
            return;
        };
        for i in 0..last.len().saturating_sub(1) {
            let spur = last[i];
            let root = &last[..=i];

            let removed_edges: HashSet<EdgeIndex> = self
                .accepted
                .iter()
                .filter(|p| p.len() > i + 1 && p[..=i] == *root)
                .filter_map(|p| self.edge(p[i], p[i + 1]))
                .collect();
            let mut removed_nodes = self.excluded.clone();
            removed_nodes.extend(root[..i].iter().copied());

            if let Some((spur_cost, spur_path)) = self.search(spur, &removed_nodes, &removed_edges)
            {
                let cost = self.cost_of(root).saturating_add(spur_cost);
                let mut path = root[..i].to_vec();
                path.extend(spur_path);
                self.candidates.insert((cost, path));
            }
        }
    }

    fn named(&self, cost: u64, path: &[NodeIndex]) -> WeightedPath {
        WeightedPath {
            cost,
            nodes: path.iter().map(|&n| self.graph.name(n).to_string()).collect(),
        }
    }
}

impl Iterator for ShortestSimplePaths<'_> {
    type Item = WeightedPath;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.primed {
            self.primed = true;
            if self.excluded.contains(&self.source) || self.excluded.contains(&self.target) {
                return None;
            }
            if let Some(first) = self.search(self.source, &self.excluded, &HashSet::new()) {
                self.candidates.insert(first);
            }
        } else {
            self.branch_from_last();
        }
        let (cost, path) = self.candidates.pop_first()?;
        let item = self.named(cost, &path);
        self.accepted.push(path);
        Some(item)
    }
}

impl NetworkGraph {
    /// Simple paths between two named nodes, cheapest first. `None` when a
    /// name is not in the graph.
    pub fn shortest_simple_paths(&self, source: &str, target: &str) -> Option<ShortestSimplePaths<'_>> {
        ShortestSimplePaths::new(self, source, target)
    }

    /// Cheapest simple path that visits every through node, avoids every
    /// blocked node and does not exceed the cutoff.
    ///
    /// Blocked nodes are removed from the search up front. Enumeration stops at
    /// the first candidate over the cutoff, since every later one costs at
    /// least as much.
    pub fn find_shortest_path(
        &self,
        source: &str,
        target: &str,
        constraints: &PathConstraints,
    ) -> Option<WeightedPath> {
        let PathConstraints {
            throughs,
            blocks,
            cutoff,
        } = constraints;

        if throughs.iter().any(|t| blocks.contains(t) || !self.contains(t)) {
            debug!("Through nodes {:?} cannot be satisfied", throughs);
            return None;
        }
        if blocks.iter().any(|b| b == source || b == target) {
            return None;
        }

        let paths = self.shortest_simple_paths(source, target)?.excluding(blocks);
        for path in paths {
            if cutoff.is_some_and(|c| path.cost > c) {
                debug!("Candidate {} exceeds cutoff {:?}, giving up", path, cutoff);
                return None;
            }
            if throughs.iter().all(|t| path.contains(t)) {
                return Some(path);
            }
            debug!("Candidate {} misses a through node", path);
        }
        None
    }
}
