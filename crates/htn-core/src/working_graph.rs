// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutable adjacency store over grammar handles used during reduction.
use std::collections::{BTreeMap, BTreeSet};

use crate::action_graph::ActionGraph;
use crate::grammar::Grammar;
use crate::ident::NodeId;

/// Directed graph of grammar handles with probability-weighted edges.
///
/// Adjacency is held in ordered maps so every scan the engines perform is
/// deterministic. A reverse index keeps predecessor queries and cascading
/// removal proportional to the node's degree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkingGraph {
    nodes: BTreeSet<NodeId>,
    /// Source node to (target node, probability).
    edges_from: BTreeMap<NodeId, BTreeMap<NodeId, f64>>,
    /// Reverse adjacency: target node to its sources.
    edges_to: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

/// A working graph freshly derived from an action graph.
#[derive(Clone, Debug)]
pub struct SeededGraph {
    /// Arena holding one Primitive per action node.
    pub grammar: Grammar,
    /// Adjacency over those primitives.
    pub graph: WorkingGraph,
    /// Handle of the Primitive seeded from the root action node.
    pub start: Option<NodeId>,
}

impl WorkingGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one Primitive per action node, named `"{id} - {action}"`, and
    /// copies every edge with its probability.
    pub fn seed(actions: &ActionGraph) -> SeededGraph {
        let mut grammar = Grammar::new();
        let mut graph = Self::new();
        let handles: Vec<NodeId> = actions
            .nodes()
            .iter()
            .map(|n| {
                let id = grammar.add_primitive(
                    n.label(),
                    n.action.clone(),
                    n.prestate.clone(),
                    n.poststate.clone(),
                );
                graph.insert_node(id);
                id
            })
            .collect();
        for edge in actions.edges() {
            if let (Some(from), Some(to)) = (handles.get(edge.from), handles.get(edge.to)) {
                graph.insert_edge(*from, *to, edge.probability);
            }
        }
        let start = actions.start().and_then(|s| handles.get(s).copied());
        SeededGraph {
            grammar,
            graph,
            start,
        }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges_from.values().map(BTreeMap::len).sum()
    }

    /// Whether `id` is a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    /// Live nodes in handle order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// All edges as `(from, to, probability)` in deterministic order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, f64)> + '_ {
        self.edges_from
            .iter()
            .flat_map(|(from, out)| out.iter().map(move |(to, p)| (*from, *to, *p)))
    }

    /// Adds an isolated node; returns `false` when it was already present.
    pub fn insert_node(&mut self, id: NodeId) -> bool {
        self.nodes.insert(id)
    }

    /// Inserts or overwrites the edge `from -> to`, adding missing endpoints.
    pub fn insert_edge(&mut self, from: NodeId, to: NodeId, probability: f64) {
        self.nodes.insert(from);
        self.nodes.insert(to);
        self.edges_from
            .entry(from)
            .or_default()
            .insert(to, probability);
        self.edges_to.entry(to).or_default().insert(from);
    }

    /// Adds `probability` onto an existing edge or creates it.
    pub fn accumulate_edge(&mut self, from: NodeId, to: NodeId, probability: f64) {
        let total = self.probability(from, to).unwrap_or(0.0) + probability;
        self.insert_edge(from, to, total);
    }

    /// Removes a node together with every incident edge.
    ///
    /// Returns `false` when the node was not present.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if !self.nodes.remove(&id) {
            return false;
        }
        if let Some(out) = self.edges_from.remove(&id) {
            for to in out.keys() {
                if let Some(inc) = self.edges_to.get_mut(to) {
                    inc.remove(&id);
                    if inc.is_empty() {
                        self.edges_to.remove(to);
                    }
                }
            }
        }
        if let Some(inc) = self.edges_to.remove(&id) {
            for from in inc {
                if let Some(out) = self.edges_from.get_mut(&from) {
                    out.remove(&id);
                    if out.is_empty() {
                        self.edges_from.remove(&from);
                    }
                }
            }
        }
        true
    }

    /// Probability stored on `from -> to`.
    pub fn probability(&self, from: NodeId, to: NodeId) -> Option<f64> {
        self.edges_from.get(&from)?.get(&to).copied()
    }

    /// Successors of `id` with edge probabilities, in handle order.
    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.edges_from
            .get(&id)
            .into_iter()
            .flat_map(|out| out.iter().map(|(to, p)| (*to, *p)))
    }

    /// Predecessors of `id`, in handle order.
    pub fn predecessors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges_to.get(&id).into_iter().flatten().copied()
    }

    /// Number of outgoing edges.
    pub fn out_degree(&self, id: NodeId) -> usize {
        self.edges_from.get(&id).map_or(0, BTreeMap::len)
    }

    /// Number of incoming edges.
    pub fn in_degree(&self, id: NodeId) -> usize {
        self.edges_to.get(&id).map_or(0, BTreeSet::len)
    }

    /// Nodes without predecessors.
    pub fn sources(&self) -> Vec<NodeId> {
        self.nodes().filter(|n| self.in_degree(*n) == 0).collect()
    }

    /// Nodes without successors.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.nodes().filter(|n| self.out_degree(*n) == 0).collect()
    }

    /// Nodes reachable from `start` (inclusive), never entering `excluded`.
    ///
    /// When `start == excluded` the result is empty.
    pub fn reachable_from(&self, start: NodeId, excluded: Option<NodeId>) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        if Some(start) == excluded || !self.contains(start) {
            return seen;
        }
        let mut stack = vec![start];
        seen.insert(start);
        while let Some(n) = stack.pop() {
            for (next, _) in self.successors(n) {
                if Some(next) != excluded && seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Whether a path `from ->* to` exists avoiding `excluded`.
    pub fn reaches(&self, from: NodeId, to: NodeId, excluded: Option<NodeId>) -> bool {
        if Some(to) == excluded {
            return false;
        }
        self.reachable_from(from, excluded).contains(&to)
    }
}
