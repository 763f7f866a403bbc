// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Series/parallel reduction of a working graph into a single grammar root.
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::grammar::{Grammar, GrammarError, NodeKind};
use crate::ident::NodeId;
use crate::oracle::{EquivalenceOracle, OracleFallback, OracleGate};
use crate::restructure::Restructurer;
use crate::working_graph::WorkingGraph;

/// Display name of the synthetic Choice produced by a stall.
pub const RESIDUAL_NAME: &str = "Residual";

/// Errors returned by [`Reducer::reduce`].
#[derive(Debug, Error, PartialEq)]
pub enum ReduceError {
    /// There is nothing to reduce.
    #[error("working graph is empty")]
    EmptyGraph,
    /// The working graph and arena disagree.
    #[error("reduction invariant violated: {0}")]
    Invariant(&'static str),
    /// A grammar operation failed.
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

/// Limits on a single reduction run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReductionBudget {
    /// Maximum number of merge rounds.
    pub max_rounds: usize,
    /// Wall-clock limit; `None` disables it.
    pub max_duration: Option<Duration>,
}

impl Default for ReductionBudget {
    fn default() -> Self {
        Self {
            max_rounds: 10_000,
            max_duration: None,
        }
    }
}

/// Why a reduction ended without a single canonical root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StallReason {
    /// No merge applied and no region could be restructured.
    NoProgress,
    /// The round or time budget ran out.
    BudgetExhausted,
}

/// Terminal state of a reduction run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReductionStatus {
    /// The graph collapsed to one node.
    Complete,
    /// Remaining nodes were wrapped in a uniform residual Choice.
    Stalled {
        /// Cause of the stall.
        reason: StallReason,
        /// Number of top-level nodes wrapped by the residual Choice.
        remaining: usize,
    },
}

/// Counters collected during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReductionStats {
    /// Rounds started.
    pub rounds: usize,
    /// Series merges applied.
    pub series_merges: usize,
    /// Parallel merges applied.
    pub parallel_merges: usize,
    /// Parallel members collapsed as semantically equivalent.
    pub semantic_merges: usize,
    /// Oracle queries answered by the fallback.
    pub oracle_fallbacks: usize,
    /// Restructuring expansions applied.
    pub expansions: usize,
    /// Shared nodes split per parent when no region qualified.
    pub splits: usize,
    /// Nodes created by restructuring.
    pub duplicated_nodes: usize,
}

/// Outcome of [`Reducer::reduce`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reduction {
    /// Surviving grammar root.
    pub root: NodeId,
    /// Whether the root is canonical or a stall residual.
    pub status: ReductionStatus,
    /// Run counters.
    pub stats: ReductionStats,
}

impl Reduction {
    /// `true` when the graph reduced without a stall.
    pub fn is_canonical(&self) -> bool {
        matches!(self.status, ReductionStatus::Complete)
    }
}

/// Result of one parallel pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ParallelOutcome {
    merged: usize,
    collapsed: usize,
}

impl ParallelOutcome {
    fn progressed(&self) -> bool {
        self.merged + self.collapsed > 0
    }
}

/// Rewrites a working graph to a fixpoint using series and parallel merges,
/// falling back to restructuring when neither applies.
///
/// `S{n}` and `C{n}` name counters belong to the instance, so names are
/// unique per reducer, not per process.
#[derive(Debug)]
pub struct Reducer {
    budget: ReductionBudget,
    oracle: OracleGate,
    restructurer: Restructurer,
    next_sequence: u32,
    next_choice: u32,
}

impl Default for Reducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reducer {
    /// Reducer with the default budget and no equivalence oracle.
    pub fn new() -> Self {
        Self {
            budget: ReductionBudget::default(),
            oracle: OracleGate::disabled(),
            restructurer: Restructurer::new(),
            next_sequence: 0,
            next_choice: 0,
        }
    }

    /// Replaces the run budget.
    pub fn with_budget(mut self, budget: ReductionBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Installs an equivalence oracle consulted before parallel merges.
    pub fn with_oracle(
        mut self,
        oracle: Box<dyn EquivalenceOracle>,
        fallback: OracleFallback,
    ) -> Self {
        self.oracle = OracleGate::new(oracle, fallback);
        self
    }

    /// Active budget.
    pub fn budget(&self) -> ReductionBudget {
        self.budget
    }

    /// Reduces `graph` in place until one node remains or progress stalls.
    ///
    /// A stalled run still succeeds: the remaining top-level nodes are
    /// wrapped in a uniform Choice named [`RESIDUAL_NAME`] and the status
    /// records the reason.
    pub fn reduce(
        &mut self,
        grammar: &mut Grammar,
        graph: &mut WorkingGraph,
    ) -> Result<Reduction, ReduceError> {
        if graph.is_empty() {
            return Err(ReduceError::EmptyGraph);
        }
        let started = Instant::now();
        let fallbacks_before = self.oracle.degraded();
        let expansions_before = self.restructurer.expansions();
        let splits_before = self.restructurer.splits();
        let mut stats = ReductionStats::default();

        let status = loop {
            if graph.len() == 1 {
                break ReductionStatus::Complete;
            }
            let out_of_time = self
                .budget
                .max_duration
                .is_some_and(|limit| started.elapsed() >= limit);
            if stats.rounds >= self.budget.max_rounds || out_of_time {
                break stall(grammar, graph, StallReason::BudgetExhausted)?;
            }
            stats.rounds += 1;

            let series = self.series_pass(grammar, graph)?;
            let parallel = self.parallel_pass(grammar, graph)?;
            stats.series_merges += series;
            stats.parallel_merges += parallel.merged;
            stats.semantic_merges += parallel.collapsed;
            debug!(
                round = stats.rounds,
                series,
                parallel = parallel.merged,
                collapsed = parallel.collapsed,
                nodes = graph.len(),
                "reduction round"
            );
            if series > 0 || parallel.progressed() {
                continue;
            }

            match self.restructurer.restructure(grammar, graph)? {
                Some(repair) => stats.duplicated_nodes += repair.duplicated(),
                None => break stall(grammar, graph, StallReason::NoProgress)?,
            }
        };

        stats.expansions = self.restructurer.expansions() - expansions_before;
        stats.splits = self.restructurer.splits() - splits_before;
        stats.oracle_fallbacks = self.oracle.degraded() - fallbacks_before;
        let root = graph
            .nodes()
            .next()
            .ok_or(ReduceError::Invariant("reduction left no root"))?;
        match status {
            ReductionStatus::Complete => info!(
                rounds = stats.rounds,
                expansions = stats.expansions,
                %root,
                "reduction complete"
            ),
            ReductionStatus::Stalled { reason, remaining } => warn!(
                ?reason,
                remaining,
                rounds = stats.rounds,
                "reduction stalled; wrapped remaining nodes in a residual choice"
            ),
        }
        Ok(Reduction {
            root,
            status,
            stats,
        })
    }

    /// Applies every disjoint series merge currently available.
    fn series_pass(
        &mut self,
        grammar: &mut Grammar,
        graph: &mut WorkingGraph,
    ) -> Result<usize, ReduceError> {
        let mut used: BTreeSet<NodeId> = BTreeSet::new();
        let mut pairs: Vec<(NodeId, NodeId)> = Vec::new();
        for u in graph.nodes() {
            if used.contains(&u) || graph.out_degree(u) != 1 {
                continue;
            }
            let Some((v, _)) = graph.successors(u).next() else {
                continue;
            };
            if v == u || used.contains(&v) || graph.in_degree(v) != 1 {
                continue;
            }
            used.insert(u);
            used.insert(v);
            pairs.push((u, v));
        }

        for (u, v) in &pairs {
            let (u, v) = (*u, *v);
            let incoming: Vec<(NodeId, f64)> = graph
                .predecessors(u)
                .map(|p| (p, graph.probability(p, u).unwrap_or(0.0)))
                .collect();
            let outgoing: Vec<(NodeId, f64)> = graph.successors(v).collect();
            let merged = self.merge_series(grammar, u, v)?;
            let remap = |n: NodeId| if n == u || n == v { merged } else { n };
            graph.remove_node(u);
            graph.remove_node(v);
            graph.insert_node(merged);
            for (p, prob) in incoming {
                graph.insert_edge(remap(p), merged, prob);
            }
            for (s, prob) in outgoing {
                graph.insert_edge(merged, remap(s), prob);
            }
        }
        Ok(pairs.len())
    }

    /// Concatenates `u` then `v`, extending an existing Sequence when possible.
    fn merge_series(
        &mut self,
        grammar: &mut Grammar,
        u: NodeId,
        v: NodeId,
    ) -> Result<NodeId, ReduceError> {
        let (u_kind, u_pre) = {
            let n = grammar.node(u)?;
            (n.kind(), n.prestate().to_owned())
        };
        let (v_kind, v_post, v_children) = {
            let n = grammar.node(v)?;
            (n.kind(), n.poststate().to_owned(), n.children().to_vec())
        };
        match (u_kind, v_kind) {
            (NodeKind::Sequence, NodeKind::Sequence) => {
                let node = grammar.node_mut(u)?;
                for child in v_children {
                    node.add_child(child)?;
                }
                node.set_poststate(v_post);
                Ok(u)
            }
            (_, NodeKind::Sequence) => {
                let node = grammar.node_mut(v)?;
                node.prepend_child(u)?;
                node.set_prestate(u_pre);
                Ok(v)
            }
            (NodeKind::Sequence, _) => {
                let node = grammar.node_mut(u)?;
                node.add_child(v)?;
                node.set_poststate(v_post);
                Ok(u)
            }
            _ => {
                let name = format!("S{}", self.next_sequence);
                self.next_sequence += 1;
                Ok(grammar.add_sequence(name, vec![u, v], u_pre, v_post)?)
            }
        }
    }

    /// Merges every group of 2+ nodes sharing one predecessor and one successor.
    ///
    /// Sinks with the same single predecessor form a group too; duplicated
    /// sinks appear once restructuring copies the terminal into lanes.
    fn parallel_pass(
        &mut self,
        grammar: &mut Grammar,
        graph: &mut WorkingGraph,
    ) -> Result<ParallelOutcome, ReduceError> {
        let mut groups: BTreeMap<(NodeId, Option<NodeId>), Vec<NodeId>> = BTreeMap::new();
        for n in graph.nodes() {
            if graph.in_degree(n) != 1 || graph.out_degree(n) > 1 {
                continue;
            }
            let Some(p) = graph.predecessors(n).next() else {
                continue;
            };
            let s = graph.successors(n).next().map(|(s, _)| s);
            if p == n || s == Some(n) {
                continue;
            }
            groups.entry((p, s)).or_default().push(n);
        }

        let mut outcome = ParallelOutcome::default();
        for ((p, s), members) in groups {
            if members.len() < 2 {
                continue;
            }
            let members = self.collapse_equivalent(grammar, graph, p, members, &mut outcome)?;
            if members.len() < 2 {
                continue;
            }
            self.merge_parallel(grammar, graph, p, s, &members)?;
            outcome.merged += 1;
        }
        Ok(outcome)
    }

    /// Folds oracle-equivalent Primitive members into the first of their class.
    fn collapse_equivalent(
        &mut self,
        grammar: &Grammar,
        graph: &mut WorkingGraph,
        pred: NodeId,
        members: Vec<NodeId>,
        outcome: &mut ParallelOutcome,
    ) -> Result<Vec<NodeId>, ReduceError> {
        if !self.oracle.is_enabled() {
            return Ok(members);
        }
        let mut kept: Vec<NodeId> = Vec::with_capacity(members.len());
        for m in members {
            let Some(action) = grammar.node(m)?.action() else {
                kept.push(m);
                continue;
            };
            let mut target = None;
            for k in &kept {
                if let Some(other) = grammar.node(*k)?.action() {
                    if self.oracle.equivalent(other, action) {
                        target = Some(*k);
                        break;
                    }
                }
            }
            match target {
                Some(k) => {
                    let p = graph.probability(pred, m).unwrap_or(0.0);
                    graph.accumulate_edge(pred, k, p);
                    graph.remove_node(m);
                    outcome.collapsed += 1;
                    debug!(kept = %k, dropped = %m, "collapsed equivalent primitives");
                }
                None => kept.push(m),
            }
        }
        Ok(kept)
    }

    fn merge_parallel(
        &mut self,
        grammar: &mut Grammar,
        graph: &mut WorkingGraph,
        pred: NodeId,
        succ: Option<NodeId>,
        members: &[NodeId],
    ) -> Result<NodeId, ReduceError> {
        let probs: Vec<f64> = members
            .iter()
            .map(|m| graph.probability(pred, *m).unwrap_or(0.0))
            .collect();
        let total: f64 = probs.iter().sum();

        let mut base = None;
        for m in members {
            if grammar.node(*m)?.kind() == NodeKind::Choice {
                base = Some(*m);
                break;
            }
        }
        let choice = match base {
            Some(base) => {
                for (m, q) in members.iter().zip(&probs) {
                    if *m == base {
                        let node = grammar.node_mut(base)?;
                        node.normalize_weights();
                        node.scale_weights(*q);
                        continue;
                    }
                    let member = grammar.node(*m)?;
                    if member.kind() == NodeKind::Choice {
                        let flat: Vec<(NodeId, f64)> = member
                            .children()
                            .iter()
                            .copied()
                            .zip(member.selection_weights())
                            .collect();
                        for (child, w) in flat {
                            grammar.add_weighted_child(base, child, w * q)?;
                        }
                    } else {
                        grammar.add_weighted_child(base, *m, *q)?;
                    }
                }
                base
            }
            None => {
                let (pre, post) = choice_states(grammar, pred, succ, members)?;
                let name = format!("C{}", self.next_choice);
                self.next_choice += 1;
                grammar.add_choice(name, members.to_vec(), probs, pre, post)?
            }
        };

        for m in members {
            if *m != choice {
                graph.remove_node(*m);
            }
        }
        graph.insert_edge(pred, choice, total);
        if let Some(succ) = succ {
            graph.insert_edge(choice, succ, 1.0);
        }
        Ok(choice)
    }
}

/// Boundary states for a new Choice.
///
/// Prefers the states that line up with the surrounding nodes when any
/// alternative agrees with them, otherwise takes the first alternative's.
fn choice_states(
    grammar: &Grammar,
    pred: NodeId,
    succ: Option<NodeId>,
    members: &[NodeId],
) -> Result<(String, String), ReduceError> {
    let first = members
        .first()
        .ok_or(ReduceError::Invariant("parallel group without members"))?;
    let want_pre = grammar.node(pred)?.poststate().to_owned();
    let want_post = match succ {
        Some(succ) => Some(grammar.node(succ)?.prestate().to_owned()),
        None => None,
    };
    let mut pre = grammar.node(*first)?.prestate().to_owned();
    let mut post = grammar.node(*first)?.poststate().to_owned();
    for m in members {
        let node = grammar.node(*m)?;
        if node.prestate() == want_pre {
            pre.clone_from(&want_pre);
        }
        if let Some(want) = want_post.as_deref().filter(|w| node.poststate() == *w) {
            post = want.to_owned();
        }
    }
    Ok((pre, post))
}

/// Wraps every remaining top-level node in a uniform residual Choice.
fn stall(
    grammar: &mut Grammar,
    graph: &mut WorkingGraph,
    reason: StallReason,
) -> Result<ReductionStatus, ReduceError> {
    let remaining: Vec<NodeId> = graph.nodes().collect();
    let first = *remaining
        .first()
        .ok_or(ReduceError::Invariant("stall on empty graph"))?;
    let (pre, post) = {
        let n = grammar.node(first)?;
        (n.prestate().to_owned(), n.poststate().to_owned())
    };
    let weights = vec![1.0; remaining.len()];
    let residual = grammar.add_choice(RESIDUAL_NAME, remaining.clone(), weights, pre, post)?;
    for n in &remaining {
        graph.remove_node(*n);
    }
    graph.insert_node(residual);
    Ok(ReductionStatus::Stalled {
        reason,
        remaining: remaining.len(),
    })
}
