// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Detection and repair of regions that series/parallel merging cannot reduce.
//!
//! A region is the part of the graph between a branch point and the least
//! common successor (LCS) of some of its siblings. When paths out of
//! different siblings share interior nodes, no merge rule applies. The
//! restructurer duplicates the interior once per sibling lane so that lanes
//! only meet at the branch and at the rejoin node, which makes the region
//! series/parallel reducible again.
//!
//! When a sibling is itself the graph's sink the lanes run open to the end
//! and each lane gets its own copy of the sink. Acyclic graphs with no valid
//! region fall back to splitting one shared node per parent, so every
//! single-source acyclic graph eventually reduces.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::grammar::{Grammar, GrammarError};
use crate::ident::NodeId;
use crate::working_graph::WorkingGraph;

/// Longest-path levels and parent sets computed from a start node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Layering {
    levels: BTreeMap<NodeId, usize>,
    parents: BTreeMap<NodeId, BTreeSet<NodeId>>,
    acyclic: bool,
}

impl Layering {
    /// Layers every node reachable from `start`.
    ///
    /// A node's level is one more than the largest level among its reachable
    /// predecessors. Nodes on cycles cannot be layered that way and fall back
    /// to their breadth-first distance from `start`.
    pub fn compute(graph: &WorkingGraph, start: NodeId) -> Self {
        let reachable = graph.reachable_from(start, None);
        let mut parents: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        let mut pending: BTreeMap<NodeId, usize> = BTreeMap::new();
        for n in &reachable {
            let ps: BTreeSet<NodeId> = graph
                .predecessors(*n)
                .filter(|p| reachable.contains(p))
                .collect();
            pending.insert(*n, ps.len());
            parents.insert(*n, ps);
        }

        let mut levels: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut ready: VecDeque<NodeId> = pending
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        for n in &ready {
            levels.insert(*n, 0);
        }
        while let Some(n) = ready.pop_front() {
            let here = levels.get(&n).copied().unwrap_or(0);
            for (next, _) in graph.successors(n) {
                let Some(left) = pending.get_mut(&next) else {
                    continue;
                };
                let level = levels.entry(next).or_insert(0);
                *level = (*level).max(here + 1);
                *left = left.saturating_sub(1);
                if *left == 0 {
                    ready.push_back(next);
                }
            }
        }

        // Cycle members never drained; use BFS distance for them.
        let acyclic = levels.len() == reachable.len();
        if !acyclic {
            let mut dist: BTreeMap<NodeId, usize> = BTreeMap::new();
            let mut queue = VecDeque::from([start]);
            dist.insert(start, 0);
            while let Some(n) = queue.pop_front() {
                let d = dist.get(&n).copied().unwrap_or(0);
                for (next, _) in graph.successors(n) {
                    if !dist.contains_key(&next) {
                        dist.insert(next, d + 1);
                        queue.push_back(next);
                    }
                }
            }
            for n in &reachable {
                if pending.get(n).is_some_and(|left| *left > 0) {
                    levels.insert(*n, dist.get(n).copied().unwrap_or(0));
                }
            }
        }

        Self {
            levels,
            parents,
            acyclic,
        }
    }

    /// Whether every reachable node was layered without the BFS fallback.
    pub fn is_acyclic(&self) -> bool {
        self.acyclic
    }

    /// Level of `id`, `None` when unreachable from the start node.
    pub fn level(&self, id: NodeId) -> Option<usize> {
        self.levels.get(&id).copied()
    }

    /// Reachable predecessors of `id`.
    pub fn parents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.parents.get(&id).into_iter().flatten().copied()
    }

    /// Nodes with two or more reachable predecessors.
    pub fn multi_parent(&self) -> Vec<NodeId> {
        self.parents
            .iter()
            .filter(|(_, ps)| ps.len() > 1)
            .map(|(n, _)| *n)
            .collect()
    }
}

/// Least common successor of siblings `a` and `b`.
///
/// Candidates are nodes other than the siblings, reachable from both, whose
/// removal cuts `terminal` off from each of them. When one sibling reaches the
/// other the rejoin therefore lies past it. The candidate with the lowest level
/// wins; equal levels resolve to the lowest handle. `None` when either sibling
/// is the terminal itself.
pub fn least_common_successor(
    graph: &WorkingGraph,
    layering: &Layering,
    a: NodeId,
    b: NodeId,
    terminal: NodeId,
) -> Option<NodeId> {
    let from_a = graph.reachable_from(a, None);
    let from_b = graph.reachable_from(b, None);
    from_a
        .intersection(&from_b)
        .copied()
        .filter(|c| *c != a && *c != b)
        .filter(|c| !graph.reaches(a, terminal, Some(*c)) && !graph.reaches(b, terminal, Some(*c)))
        .min_by_key(|c| (layering.level(*c).unwrap_or(usize::MAX), *c))
}

/// Single-entry/single-exit region eligible for lane duplication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// Branch point shared by every sibling.
    pub branch: NodeId,
    /// Least common successor where the lanes rejoin; `None` when the lanes
    /// run open to the sink and the sink is copied into each of them.
    pub rejoin: Option<NodeId>,
    /// Branch successors whose paths form the lanes, in handle order.
    pub siblings: Vec<NodeId>,
    /// Every node after the branch and before the rejoin, siblings included.
    pub interior: BTreeSet<NodeId>,
}

impl Region {
    /// Interior node count; smaller regions are repaired first.
    pub fn size(&self) -> usize {
        self.interior.len()
    }

    /// Nodes on the lane starting at `sibling`.
    pub fn lane(&self, graph: &WorkingGraph, sibling: NodeId) -> BTreeSet<NodeId> {
        graph
            .reachable_from(sibling, self.rejoin)
            .intersection(&self.interior)
            .copied()
            .collect()
    }
}

/// Result of one successful restructuring step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expansion {
    /// Region that was expanded.
    pub region: Region,
    /// Copied node handles per lane, lane order following `region.siblings`.
    pub lanes: Vec<Vec<NodeId>>,
    /// Total number of nodes created.
    pub duplicated: usize,
}

/// Last-resort repair: one copy of a shared node per parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSplit {
    /// Node that was removed.
    pub node: NodeId,
    /// Copies in parent handle order; copy `k` keeps only parent `k`.
    pub copies: Vec<NodeId>,
}

/// One restructuring step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Repair {
    /// A region was split into disjoint lanes.
    Expanded(Expansion),
    /// No region qualified; a multi-parent node was split instead.
    Split(NodeSplit),
}

impl Repair {
    /// Nodes created by the step.
    pub fn duplicated(&self) -> usize {
        match self {
            Self::Expanded(e) => e.duplicated,
            Self::Split(s) => s.copies.len(),
        }
    }
}

/// Finds the smallest valid irreducible region and splits it into lanes.
#[derive(Clone, Debug, Default)]
pub struct Restructurer {
    expansions: usize,
    splits: usize,
}

impl Restructurer {
    /// Creates a restructurer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of expansions applied so far.
    pub fn expansions(&self) -> usize {
        self.expansions
    }

    /// Number of node splits applied so far.
    pub fn splits(&self) -> usize {
        self.splits
    }

    /// Valid regions of `graph`, in `(branch, rejoin)` order.
    ///
    /// Returns nothing unless the graph has exactly one source and one sink.
    pub fn find_regions(&self, graph: &WorkingGraph) -> Vec<Region> {
        let (Some(start), Some(terminal)) = (single(graph.sources()), single(graph.sinks())) else {
            return Vec::new();
        };
        let layering = Layering::compute(graph, start);

        let mut groups: BTreeMap<(NodeId, Option<NodeId>), BTreeSet<NodeId>> = BTreeMap::new();
        for branch in graph.nodes() {
            let succs: Vec<NodeId> = graph.successors(branch).map(|(n, _)| n).collect();
            if succs.len() < 2 {
                continue;
            }
            for (i, a) in succs.iter().enumerate() {
                for b in &succs[i + 1..] {
                    let rejoin = if *a == terminal || *b == terminal {
                        None
                    } else {
                        match least_common_successor(graph, &layering, *a, *b, terminal) {
                            Some(r) if r != branch => Some(r),
                            _ => continue,
                        }
                    };
                    let group = groups.entry((branch, rejoin)).or_default();
                    group.insert(*a);
                    group.insert(*b);
                }
            }
        }

        groups
            .into_iter()
            .filter_map(|((branch, rejoin), siblings)| {
                check_region(graph, branch, rejoin, terminal, siblings.into_iter().collect())
            })
            .collect()
    }

    /// Expands the smallest valid region. Without one, splits the lowest
    /// shared node of an acyclic single-source graph. `None` when neither
    /// applies.
    pub fn restructure(
        &mut self,
        grammar: &mut Grammar,
        graph: &mut WorkingGraph,
    ) -> Result<Option<Repair>, GrammarError> {
        if let Some(region) = self
            .find_regions(graph)
            .into_iter()
            .min_by_key(Region::size)
        {
            let expansion = expand(grammar, graph, region)?;
            self.expansions += 1;
            debug!(
                branch = %expansion.region.branch,
                rejoin = ?expansion.region.rejoin,
                lanes = expansion.lanes.len(),
                duplicated = expansion.duplicated,
                "expanded irreducible region"
            );
            return Ok(Some(Repair::Expanded(expansion)));
        }
        let Some(split) = split_shared_node(grammar, graph)? else {
            return Ok(None);
        };
        self.splits += 1;
        debug!(node = %split.node, copies = split.copies.len(), "split shared node");
        Ok(Some(Repair::Split(split)))
    }
}

fn single(nodes: Vec<NodeId>) -> Option<NodeId> {
    match nodes.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Validates the region spanned by `siblings` between `branch` and `rejoin`.
///
/// An open region (`rejoin == None`) ends at `terminal`, which then belongs to
/// the interior.
fn check_region(
    graph: &WorkingGraph,
    branch: NodeId,
    rejoin: Option<NodeId>,
    terminal: NodeId,
    siblings: Vec<NodeId>,
) -> Option<Region> {
    if siblings.len() < 2 {
        return None;
    }
    let exit = rejoin.unwrap_or(terminal);
    let lanes: Vec<BTreeSet<NodeId>> = siblings
        .iter()
        .map(|s| graph.reachable_from(*s, rejoin))
        .collect();
    let interior: BTreeSet<NodeId> = lanes.iter().flatten().copied().collect();

    if interior.contains(&branch) {
        return None;
    }
    for n in &interior {
        if (graph.out_degree(*n) == 0 && *n != exit) || !graph.reaches(*n, exit, Some(branch)) {
            return None;
        }
        for p in graph.predecessors(*n) {
            if p == branch {
                if !siblings.contains(n) {
                    return None;
                }
            } else if !interior.contains(&p) {
                return None;
            }
        }
    }

    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    let shared = lanes
        .iter()
        .flat_map(|lane| lane.iter().copied())
        .any(|n| !seen.insert(n));
    if !shared {
        return None;
    }

    Some(Region {
        branch,
        rejoin,
        siblings,
        interior,
    })
}

/// Duplicates the region once per sibling lane and removes the originals.
fn expand(
    grammar: &mut Grammar,
    graph: &mut WorkingGraph,
    region: Region,
) -> Result<Expansion, GrammarError> {
    let mut lanes = Vec::with_capacity(region.siblings.len());
    let mut new_edges: Vec<(NodeId, NodeId, f64)> = Vec::new();
    for (k, sibling) in region.siblings.iter().enumerate() {
        let suffix = format!("-{}", k + 1);
        let lane = region.lane(graph, *sibling);
        let mut copies: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        for n in &lane {
            copies.insert(*n, grammar.deep_copy(*n, &suffix)?);
        }
        if let (Some(entry), Some(p)) = (
            copies.get(sibling),
            graph.probability(region.branch, *sibling),
        ) {
            new_edges.push((region.branch, *entry, p));
        }
        for (orig, copy) in &copies {
            for (next, p) in graph.successors(*orig) {
                if let Some(rejoin) = region.rejoin.filter(|r| *r == next) {
                    new_edges.push((*copy, rejoin, p));
                } else if let Some(target) = copies.get(&next) {
                    new_edges.push((*copy, *target, p));
                }
            }
        }
        lanes.push(copies.into_values().collect::<Vec<_>>());
    }

    for n in &region.interior {
        graph.remove_node(*n);
    }
    for (from, to, p) in new_edges {
        graph.insert_edge(from, to, p);
    }
    let duplicated = lanes.iter().map(Vec::len).sum();
    Ok(Expansion {
        region,
        lanes,
        duplicated,
    })
}

/// Splits the lowest multi-parent node into one copy per parent.
///
/// Copies keep every outgoing edge of the original. Only acyclic graphs with
/// one source qualify; there the step always exists until the graph is a tree.
fn split_shared_node(
    grammar: &mut Grammar,
    graph: &mut WorkingGraph,
) -> Result<Option<NodeSplit>, GrammarError> {
    let Some(start) = single(graph.sources()) else {
        return Ok(None);
    };
    let layering = Layering::compute(graph, start);
    if !layering.is_acyclic() {
        return Ok(None);
    }
    let Some(node) = layering
        .multi_parent()
        .into_iter()
        .min_by_key(|n| (layering.level(*n).unwrap_or(usize::MAX), *n))
    else {
        return Ok(None);
    };

    let outgoing: Vec<(NodeId, f64)> = graph.successors(node).collect();
    let mut copies = Vec::new();
    let mut new_edges: Vec<(NodeId, NodeId, f64)> = Vec::new();
    for (k, parent) in layering.parents(node).enumerate() {
        let copy = grammar.deep_copy(node, &format!("-{}", k + 1))?;
        new_edges.push((parent, copy, graph.probability(parent, node).unwrap_or(0.0)));
        new_edges.extend(outgoing.iter().map(|(s, p)| (copy, *s, *p)));
        copies.push(copy);
    }
    graph.remove_node(node);
    for (from, to, p) in new_edges {
        graph.insert_edge(from, to, p);
    }
    Ok(Some(NodeSplit { node, copies }))
}
