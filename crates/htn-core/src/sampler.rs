// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Weighted random walks over a finished grammar.
use crate::action_graph::Sentinels;
use crate::grammar::{Grammar, GrammarError, NodeBody};
use crate::ident::NodeId;
use crate::prng::Prng;

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource {
    /// Next uniform draw in `[0, 1)`.
    fn next_unit(&mut self) -> f64;
}

impl RandomSource for Prng {
    fn next_unit(&mut self) -> f64 {
        self.next_f64()
    }
}

/// Inverse-CDF selection over normalized `weights` for a draw `u`.
///
/// Returns the first index whose cumulative weight exceeds `u`, the last
/// index when rounding leaves none, and `None` for an empty slice.
pub fn pick_index(weights: &[f64], u: f64) -> Option<usize> {
    let mut acc = 0.0;
    for (i, w) in weights.iter().enumerate() {
        acc += w;
        if acc > u {
            return Some(i);
        }
    }
    weights.len().checked_sub(1)
}

/// Generates concrete plans by walking a grammar from a root.
///
/// Sequences expand every child in order; Choices expand exactly one child
/// selected by weight. A Choice without children contributes nothing.
#[derive(Debug)]
pub struct Sampler<'g, R> {
    grammar: &'g Grammar,
    rng: R,
}

impl<'g, R: RandomSource> Sampler<'g, R> {
    /// Sampler over `grammar` drawing from `rng`.
    pub fn new(grammar: &'g Grammar, rng: R) -> Self {
        Self { grammar, rng }
    }

    /// Primitive handles visited by one walk from `root`, in execution order.
    pub fn walk(&mut self, root: NodeId) -> Result<Vec<NodeId>, GrammarError> {
        let mut plan = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.grammar.node(id)?;
            match node.body() {
                NodeBody::Primitive { .. } => plan.push(id),
                NodeBody::Sequence { children } => stack.extend(children.iter().rev().copied()),
                NodeBody::Choice { children, .. } => {
                    let weights = node.selection_weights();
                    if let Some(i) = pick_index(&weights, self.rng.next_unit()) {
                        stack.push(children[i]);
                    }
                }
            }
        }
        Ok(plan)
    }

    /// Action labels of one walk, with boundary actions removed.
    pub fn sample_actions(
        &mut self,
        root: NodeId,
        sentinels: &Sentinels,
    ) -> Result<Vec<String>, GrammarError> {
        let plan = self.walk(root)?;
        let mut actions = Vec::with_capacity(plan.len());
        for id in plan {
            if let Some(action) = self.grammar.node(id)?.action() {
                if !sentinels.is_sentinel_action(action) {
                    actions.push(action.to_owned());
                }
            }
        }
        Ok(actions)
    }
}
