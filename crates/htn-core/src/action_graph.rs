// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Demonstration validation, transition statistics and action-graph unfolding.
//!
//! A demonstration alternates state and action tokens:
//! `[init_state, init_action, s0, a0, ..., term_state, term_action]`. Every
//! action is followed by the state it produced and the next action taken,
//! which yields `(pre-state, action, post-state, next-action)` quadruples.
//! Aggregating the quadruples per action gives a [`TransitionTable`]; unfolding
//! that table from the initial `(state, action)` pair gives the
//! [`ActionGraph`] the reducer consumes.
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Boundary labels framing every demonstration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sentinels {
    /// First token of every demonstration.
    pub init_state: String,
    /// Second token of every demonstration.
    pub init_action: String,
    /// Second-to-last token of every demonstration.
    pub term_state: String,
    /// Last token of every demonstration.
    pub term_action: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            init_state: "init_state".to_owned(),
            init_action: "init_action".to_owned(),
            term_state: "term_state".to_owned(),
            term_action: "term_action".to_owned(),
        }
    }
}

impl Sentinels {
    /// Whether `action` is one of the two boundary actions.
    pub fn is_sentinel_action(&self, action: &str) -> bool {
        action == self.init_action || action == self.term_action
    }
}

/// Malformed demonstration corpus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// No demonstrations were supplied.
    #[error("no demonstrations supplied")]
    Empty,
    /// Demonstrations alternate state/action and must have even length.
    #[error("demonstration {index} has odd length {len}")]
    OddLength {
        /// Demonstration index.
        index: usize,
        /// Token count.
        len: usize,
    },
    /// Fewer than the four sentinel tokens.
    #[error("demonstration {index} has {len} tokens; at least 4 are required")]
    TooShort {
        /// Demonstration index.
        index: usize,
        /// Token count.
        len: usize,
    },
    /// A boundary token does not match the configured sentinel.
    #[error("demonstration {index} position {position}: expected {expected:?}, found {found:?}")]
    MissingSentinel {
        /// Demonstration index.
        index: usize,
        /// Token position.
        position: usize,
        /// Configured sentinel.
        expected: String,
        /// Token actually present.
        found: String,
    },
}

/// Checks shape and sentinels of every demonstration, failing on the first defect.
pub fn validate_demonstrations(
    demos: &[Vec<String>],
    sentinels: &Sentinels,
) -> Result<(), FormatError> {
    if demos.is_empty() {
        return Err(FormatError::Empty);
    }
    for (index, demo) in demos.iter().enumerate() {
        let len = demo.len();
        if len < 4 {
            return Err(FormatError::TooShort { index, len });
        }
        if len % 2 != 0 {
            return Err(FormatError::OddLength { index, len });
        }
        let expected = [
            (0, &sentinels.init_state),
            (1, &sentinels.init_action),
            (len - 2, &sentinels.term_state),
            (len - 1, &sentinels.term_action),
        ];
        for (position, want) in expected {
            if demo[position] != *want {
                return Err(FormatError::MissingSentinel {
                    index,
                    position,
                    expected: want.clone(),
                    found: demo[position].clone(),
                });
            }
        }
    }
    Ok(())
}

/// What followed one occurrence of an action.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transition {
    /// State observed before the action.
    pub prestate: String,
    /// State produced by the action.
    pub poststate: String,
    /// Action taken next.
    pub next_action: String,
}

/// Per-action transition probabilities aggregated over a corpus.
///
/// Actions and their transitions keep first-observed order so that unfolding
/// is reproducible for a given corpus.
#[derive(Clone, Debug, Default)]
pub struct TransitionTable {
    order: Vec<String>,
    rows: FxHashMap<String, Vec<(Transition, f64)>>,
}

impl TransitionTable {
    /// Validates `demos` and aggregates their transitions.
    pub fn from_demonstrations(
        demos: &[Vec<String>],
        sentinels: &Sentinels,
    ) -> Result<Self, FormatError> {
        validate_demonstrations(demos, sentinels)?;
        let mut table = Self::default();
        for demo in demos {
            for quad in demo.windows(4).step_by(2) {
                let transition = Transition {
                    prestate: quad[0].clone(),
                    poststate: quad[2].clone(),
                    next_action: quad[3].clone(),
                };
                table.bump(&quad[1], transition);
            }
        }
        // The terminal action never has successors.
        table.row_mut(&sentinels.term_action);
        for row in table.rows.values_mut() {
            let total: f64 = row.iter().map(|(_, c)| *c).sum();
            if total > 0.0 {
                for (_, c) in row.iter_mut() {
                    *c /= total;
                }
            }
        }
        Ok(table)
    }

    fn row_mut(&mut self, action: &str) -> &mut Vec<(Transition, f64)> {
        if !self.rows.contains_key(action) {
            self.order.push(action.to_owned());
        }
        self.rows.entry(action.to_owned()).or_default()
    }

    fn bump(&mut self, action: &str, transition: Transition) {
        let row = self.row_mut(action);
        match row.iter().position(|(t, _)| *t == transition) {
            Some(at) => row[at].1 += 1.0,
            None => row.push((transition, 1.0)),
        }
    }

    /// Actions in first-observed order.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Normalized transitions observed after `action`.
    pub fn transitions(&self, action: &str) -> &[(Transition, f64)] {
        self.rows.get(action).map_or(&[], Vec::as_slice)
    }

    /// Probability of one specific transition after `action`.
    pub fn probability(&self, action: &str, transition: &Transition) -> Option<f64> {
        self.transitions(action)
            .iter()
            .find(|(t, _)| t == transition)
            .map(|(_, p)| *p)
    }
}

/// A `(state, action)` occurrence discovered while unfolding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionNode {
    /// Sequential discovery index.
    pub id: usize,
    /// Action label.
    pub action: String,
    /// State in which the action was discovered.
    pub prestate: String,
    /// State carried by the first outgoing edge; empty for the terminal.
    pub poststate: String,
}

impl ActionNode {
    /// Display label, `"{id} - {action}"`.
    pub fn label(&self) -> String {
        format!("{} - {}", self.id, self.action)
    }
}

/// Directed transition between two action nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionEdge {
    /// Source node id.
    pub from: usize,
    /// Target node id.
    pub to: usize,
    /// Post-state of the source action.
    pub state: String,
    /// Transition probability from the source action.
    pub probability: f64,
}

/// Probabilistic directed graph of action occurrences.
#[derive(Clone, Debug, Default)]
pub struct ActionGraph {
    nodes: Vec<ActionNode>,
    edges: Vec<ActionEdge>,
}

impl ActionGraph {
    /// Validates, aggregates and unfolds `demos` in one step.
    pub fn from_demonstrations(
        demos: &[Vec<String>],
        sentinels: &Sentinels,
    ) -> Result<Self, FormatError> {
        let table = TransitionTable::from_demonstrations(demos, sentinels)?;
        Ok(Self::unfold(&table, &sentinels.init_state, &sentinels.init_action))
    }

    /// Depth-first unfolding of `table` from `(root_state, root_action)`.
    ///
    /// Each unseen `(state, action)` pair receives the next sequential id.
    /// A transition only applies from a node whose state equals the
    /// transition's pre-state.
    pub fn unfold(table: &TransitionTable, root_state: &str, root_action: &str) -> Self {
        let mut graph = Self::default();
        let mut seen: FxHashMap<(String, String), usize> = FxHashMap::default();
        let root = graph.discover(&mut seen, root_state, root_action);
        // Each frame is (node id, index of the next transition to inspect).
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            let action = graph.nodes[node].action.clone();
            let state = graph.nodes[node].prestate.clone();
            let row = table.transitions(&action);
            let Some((transition, probability)) = row.get(cursor) else {
                stack.pop();
                continue;
            };
            frame.1 += 1;
            if transition.prestate != state {
                continue;
            }
            let key = (transition.poststate.clone(), transition.next_action.clone());
            let (target, fresh) = match seen.get(&key) {
                Some(existing) => (*existing, false),
                None => (
                    graph.discover(&mut seen, &transition.poststate, &transition.next_action),
                    true,
                ),
            };
            if graph.nodes[node].poststate.is_empty() {
                graph.nodes[node].poststate.clone_from(&transition.poststate);
            }
            graph.edges.push(ActionEdge {
                from: node,
                to: target,
                state: transition.poststate.clone(),
                probability: *probability,
            });
            if fresh {
                stack.push((target, 0));
            }
        }
        graph
    }

    fn discover(
        &mut self,
        seen: &mut FxHashMap<(String, String), usize>,
        state: &str,
        action: &str,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(ActionNode {
            id,
            action: action.to_owned(),
            prestate: state.to_owned(),
            poststate: String::new(),
        });
        seen.insert((state.to_owned(), action.to_owned()), id);
        id
    }

    /// Nodes in discovery order.
    pub fn nodes(&self) -> &[ActionNode] {
        &self.nodes
    }

    /// Edges in discovery order.
    pub fn edges(&self) -> &[ActionEdge] {
        &self.edges
    }

    /// Id of the root node, `None` for an empty graph.
    pub fn start(&self) -> Option<usize> {
        self.nodes.first().map(|n| n.id)
    }

}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn demo(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| (*t).to_owned()).collect()
    }

    fn diamond() -> Vec<Vec<String>> {
        vec![
            demo(&["init_state", "init_action", "s0", "a", "s1", "c", "term_state", "term_action"]),
            demo(&["init_state", "init_action", "s0", "a", "s2", "d", "term_state", "term_action"]),
            demo(&["init_state", "init_action", "s5", "b", "s2", "d", "term_state", "term_action"]),
        ]
    }

    #[test]
    fn validation_reports_each_defect() {
        let s = Sentinels::default();
        assert_eq!(validate_demonstrations(&[], &s), Err(FormatError::Empty));
        assert_eq!(
            validate_demonstrations(&[demo(&["init_state", "init_action"])], &s),
            Err(FormatError::TooShort { index: 0, len: 2 })
        );
        assert_eq!(
            validate_demonstrations(
                &[demo(&["init_state", "init_action", "x", "term_state", "term_action"])],
                &s
            ),
            Err(FormatError::OddLength { index: 0, len: 5 })
        );
        let err = validate_demonstrations(
            &[demo(&["init_state", "init_action", "term_state", "oops"])],
            &s,
        )
        .unwrap_err();
        assert_eq!(
            err,
            FormatError::MissingSentinel {
                index: 0,
                position: 3,
                expected: "term_action".to_owned(),
                found: "oops".to_owned(),
            }
        );
    }

    #[test]
    fn transition_probabilities_are_per_action() {
        let table = TransitionTable::from_demonstrations(&diamond(), &Sentinels::default()).unwrap();
        let first = Transition {
            prestate: "init_state".into(),
            poststate: "s0".into(),
            next_action: "a".into(),
        };
        let p = table.probability("init_action", &first).unwrap();
        assert!((p - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(table.transitions("a").len(), 2);
        assert!(table.transitions("term_action").is_empty());
        let actions: Vec<_> = table.actions().collect();
        assert_eq!(actions, ["init_action", "a", "c", "d", "b", "term_action"]);
    }

    #[test]
    fn unfolding_merges_shared_state_action_pairs() {
        let graph = ActionGraph::from_demonstrations(&diamond(), &Sentinels::default()).unwrap();
        let labels: Vec<_> = graph.nodes().iter().map(ActionNode::label).collect();
        assert_eq!(
            labels,
            ["0 - init_action", "1 - a", "2 - c", "3 - term_action", "4 - d", "5 - b"]
        );
        assert_eq!(graph.start(), Some(0));
        assert!(graph.edges().iter().all(|e| e.from != 3));
        // `d` is reached from both `a` and `b` because both arrive in `s2`.
        let into_d: Vec<_> = graph.edges().iter().filter(|e| e.to == 4).map(|e| e.from).collect();
        assert_eq!(into_d, vec![1, 5]);
        let a = &graph.nodes()[1];
        assert_eq!(a.prestate, "s0");
        assert_eq!(a.poststate, "s1");
        assert!(graph.nodes()[3].poststate.is_empty());
    }

    #[test]
    fn same_action_in_different_states_is_distinct() {
        let demos = vec![demo(&[
            "init_state", "init_action", "s0", "a", "s1", "a", "term_state", "term_action",
        ])];
        let graph = ActionGraph::from_demonstrations(&demos, &Sentinels::default()).unwrap();
        let actions: Vec<_> = graph.nodes().iter().map(|n| n.action.as_str()).collect();
        assert_eq!(actions, ["init_action", "a", "a", "term_action"]);
    }

    #[test]
    fn custom_sentinels_are_honoured() {
        let s = Sentinels {
            init_state: "S".into(),
            init_action: "begin".into(),
            term_state: "T".into(),
            term_action: "end".into(),
        };
        let demos = vec![demo(&["S", "begin", "x", "go", "T", "end"])];
        let graph = ActionGraph::from_demonstrations(&demos, &s).unwrap();
        assert_eq!(graph.nodes().len(), 3);
        assert!(s.is_sentinel_action("end"));
        assert!(!s.is_sentinel_action("go"));
    }
}
