// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end pipeline: demonstrations to a reduced grammar.
use thiserror::Error;
use tracing::info;

use crate::action_graph::{ActionGraph, FormatError, Sentinels};
use crate::export::ExportTree;
use crate::grammar::{Grammar, GrammarError};
use crate::oracle::{EquivalenceOracle, OracleFallback};
use crate::reduce::{ReduceError, Reducer, Reduction, ReductionBudget};
use crate::working_graph::WorkingGraph;

/// Failure of [`learn`].
#[derive(Debug, Error, PartialEq)]
pub enum LearnError {
    /// The demonstrations were malformed.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// Reduction failed.
    #[error(transparent)]
    Reduce(#[from] ReduceError),
}

/// Knobs for one learning run.
#[derive(Default)]
pub struct LearnOptions {
    /// Boundary labels expected in every demonstration.
    pub sentinels: Sentinels,
    /// Round/time budget for the reducer.
    pub budget: ReductionBudget,
    /// Optional equivalence oracle and its failure fallback.
    pub oracle: Option<(Box<dyn EquivalenceOracle>, OracleFallback)>,
}

impl std::fmt::Debug for LearnOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnOptions")
            .field("sentinels", &self.sentinels)
            .field("budget", &self.budget)
            .field("oracle", &self.oracle.as_ref().map(|(_, fallback)| fallback))
            .finish()
    }
}

/// Grammar learned from a corpus, with the action graph it came from.
#[derive(Debug)]
pub struct LearnedGrammar {
    /// Arena holding every node created during the run.
    pub grammar: Grammar,
    /// Reduction outcome; `reduction.root` is the grammar root.
    pub reduction: Reduction,
    /// Aggregated action graph the reduction started from.
    pub actions: ActionGraph,
    /// Boundary labels used for the run.
    pub sentinels: Sentinels,
}

impl LearnedGrammar {
    /// Text rendering of the root subtree.
    pub fn render(&self) -> Result<String, GrammarError> {
        self.grammar.render(self.reduction.root)
    }

    /// Export tree of the root subtree.
    pub fn export(&self) -> Result<ExportTree, GrammarError> {
        ExportTree::from_grammar(&self.grammar, self.reduction.root, &self.sentinels)
    }
}

/// Validates `demos`, builds the action graph and reduces it to one root.
pub fn learn(demos: &[Vec<String>], options: LearnOptions) -> Result<LearnedGrammar, LearnError> {
    let actions = ActionGraph::from_demonstrations(demos, &options.sentinels)?;
    let seeded = WorkingGraph::seed(&actions);
    let mut grammar = seeded.grammar;
    let mut graph = seeded.graph;
    info!(
        demonstrations = demos.len(),
        nodes = graph.len(),
        edges = graph.edge_count(),
        "built action graph"
    );

    let mut reducer = Reducer::new().with_budget(options.budget);
    if let Some((oracle, fallback)) = options.oracle {
        reducer = reducer.with_oracle(oracle, fallback);
    }
    let reduction = reducer.reduce(&mut grammar, &mut graph)?;
    Ok(LearnedGrammar {
        grammar,
        reduction,
        actions,
        sentinels: options.sentinels,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn malformed_corpus_fails_before_reduction() {
        let err = learn(&[], LearnOptions::default()).unwrap_err();
        assert_eq!(err, LearnError::Format(FormatError::Empty));
    }

    #[test]
    fn linear_demo_renders_flat_sequence() {
        let demo: Vec<String> = [
            "init_state", "init_action", "s0", "pick", "s1", "place", "term_state", "term_action",
        ]
        .iter()
        .map(|t| (*t).to_owned())
        .collect();
        let learned = learn(&[demo], LearnOptions::default()).unwrap();
        assert!(learned.reduction.is_canonical());
        let text = learned.render().unwrap();
        assert_eq!(
            text,
            "S0 (sequence)\n  => 0 - init_action [init_action]\n  => 1 - pick [pick]\n  => 2 - place [place]\n  => 3 - term_action [term_action]"
        );
    }
}
