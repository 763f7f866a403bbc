// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Inspection of finished grammars.
//!
//! Everything here reads the arena and never mutates it. Language
//! enumeration is exponential in the number of nested choices and takes an
//! explicit limit; membership ([`accepts`]) is polynomial and is what
//! coverage reports use.
use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::grammar::{Grammar, GrammarError, NodeBody};
use crate::ident::NodeId;

/// Errors raised by grammar analysis.
#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    /// The grammar describes more plans than the caller allowed.
    #[error("language exceeds {limit} plans")]
    LanguageTooLarge {
        /// Caller-supplied bound.
        limit: usize,
    },
    /// A handle in the subtree is invalid.
    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

/// Structural counters over one subtree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GrammarStats {
    /// Primitive leaves.
    pub primitives: usize,
    /// Sequence nodes.
    pub sequences: usize,
    /// Choice nodes.
    pub choices: usize,
    /// Parent-to-child links.
    pub edges: usize,
    /// Nesting depth; a lone leaf has depth 1.
    pub depth: usize,
}

impl GrammarStats {
    /// Total node count.
    pub fn nodes(&self) -> usize {
        self.primitives + self.sequences + self.choices
    }
}

/// Counts node kinds, links and depth below `root`.
pub fn stats(grammar: &Grammar, root: NodeId) -> Result<GrammarStats, GrammarError> {
    let mut out = GrammarStats::default();
    let mut stack = vec![(root, 1usize)];
    while let Some((id, depth)) = stack.pop() {
        let node = grammar.node(id)?;
        out.depth = out.depth.max(depth);
        out.edges += node.children().len();
        match node.body() {
            NodeBody::Primitive { .. } => out.primitives += 1,
            NodeBody::Sequence { .. } => out.sequences += 1,
            NodeBody::Choice { .. } => out.choices += 1,
        }
        stack.extend(node.children().iter().map(|c| (*c, depth + 1)));
    }
    Ok(out)
}

/// Length of the longest plan the subtree can produce.
pub fn longest_walk(grammar: &Grammar, root: NodeId) -> Result<usize, GrammarError> {
    let mut longest: BTreeMap<NodeId, usize> = BTreeMap::new();
    for id in grammar.postorder(root)? {
        let node = grammar.node(id)?;
        let kids = node.children().iter().map(|c| longest.get(c).copied().unwrap_or(0));
        let len = match node.body() {
            NodeBody::Primitive { .. } => 1,
            NodeBody::Sequence { .. } => kids.sum(),
            NodeBody::Choice { .. } => kids.max().unwrap_or(0),
        };
        longest.insert(id, len);
    }
    Ok(longest.get(&root).copied().unwrap_or(0))
}

/// Every action sequence the subtree can produce, boundary actions included.
///
/// Fails with [`AnalysisError::LanguageTooLarge`] as soon as any intermediate
/// set exceeds `limit`.
pub fn language(
    grammar: &Grammar,
    root: NodeId,
    limit: usize,
) -> Result<BTreeSet<Vec<String>>, AnalysisError> {
    let mut sets: BTreeMap<NodeId, BTreeSet<Vec<String>>> = BTreeMap::new();
    for id in grammar.postorder(root)? {
        let node = grammar.node(id)?;
        let set = match node.body() {
            NodeBody::Primitive { action } => BTreeSet::from([vec![action.clone()]]),
            NodeBody::Sequence { children } => {
                let mut acc: BTreeSet<Vec<String>> = BTreeSet::from([Vec::new()]);
                for c in children {
                    let part = sets.get(c).cloned().unwrap_or_default();
                    let mut next = BTreeSet::new();
                    for prefix in &acc {
                        for suffix in &part {
                            let mut plan = prefix.clone();
                            plan.extend(suffix.iter().cloned());
                            next.insert(plan);
                            if next.len() > limit {
                                return Err(AnalysisError::LanguageTooLarge { limit });
                            }
                        }
                    }
                    acc = next;
                }
                acc
            }
            NodeBody::Choice { children, .. } => {
                let mut acc = BTreeSet::new();
                for c in children {
                    acc.extend(sets.get(c).into_iter().flatten().cloned());
                    if acc.len() > limit {
                        return Err(AnalysisError::LanguageTooLarge { limit });
                    }
                }
                acc
            }
        };
        sets.insert(id, set);
    }
    Ok(sets.remove(&root).unwrap_or_default())
}

/// Whether the subtree can produce exactly `actions`.
pub fn accepts<S: AsRef<str>>(
    grammar: &Grammar,
    root: NodeId,
    actions: &[S],
) -> Result<bool, GrammarError> {
    let ends = advance(grammar, root, &BTreeSet::from([0]), actions)?;
    Ok(ends.contains(&actions.len()))
}

/// Positions reachable after matching `id` starting from any of `from`.
fn advance<S: AsRef<str>>(
    grammar: &Grammar,
    id: NodeId,
    from: &BTreeSet<usize>,
    actions: &[S],
) -> Result<BTreeSet<usize>, GrammarError> {
    if from.is_empty() {
        return Ok(BTreeSet::new());
    }
    match grammar.node(id)?.body() {
        NodeBody::Primitive { action } => Ok(from
            .iter()
            .filter(|p| actions.get(**p).is_some_and(|a| a.as_ref() == action.as_str()))
            .map(|p| p + 1)
            .collect()),
        NodeBody::Sequence { children } => {
            let mut at = from.clone();
            for c in children {
                at = advance(grammar, *c, &at, actions)?;
            }
            Ok(at)
        }
        NodeBody::Choice { children, .. } => {
            let mut out = BTreeSet::new();
            for c in children {
                out.extend(advance(grammar, *c, from, actions)?);
            }
            Ok(out)
        }
    }
}

/// Action tokens of a demonstration (every odd position).
pub fn demonstration_actions(demo: &[String]) -> Vec<&str> {
    demo.iter().skip(1).step_by(2).map(String::as_str).collect()
}

/// Held-out demonstrations the grammar can or cannot reproduce.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverageReport {
    /// Demonstrations checked.
    pub total: usize,
    /// Demonstrations whose action sequence is in the language.
    pub accepted: usize,
    /// Indices of demonstrations that were not accepted.
    pub rejected: Vec<usize>,
}

impl CoverageReport {
    /// Fraction accepted; `0.0` when nothing was checked.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.accepted as f64 / self.total as f64
        }
    }
}

/// Checks each demonstration's action sequence against the grammar.
pub fn coverage(
    grammar: &Grammar,
    root: NodeId,
    demos: &[Vec<String>],
) -> Result<CoverageReport, GrammarError> {
    let mut report = CoverageReport::default();
    for (index, demo) in demos.iter().enumerate() {
        report.total += 1;
        if accepts(grammar, root, demonstration_actions(demo).as_slice())? {
            report.accepted += 1;
        } else {
            report.rejected.push(index);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    /// S0[a, C0(b, S1[c, d]), e]
    fn sample() -> (Grammar, NodeId) {
        let mut g = Grammar::new();
        let a = g.add_primitive("a", "a", "", "");
        let b = g.add_primitive("b", "b", "", "");
        let c = g.add_primitive("c", "c", "", "");
        let d = g.add_primitive("d", "d", "", "");
        let e = g.add_primitive("e", "e", "", "");
        let s1 = g.add_sequence("S1", vec![c, d], "", "").unwrap();
        let c0 = g.add_choice("C0", vec![b, s1], vec![0.5, 0.5], "", "").unwrap();
        let root = g.add_sequence("S0", vec![a, c0, e], "", "").unwrap();
        (g, root)
    }

    #[test]
    fn stats_count_kinds_and_depth() {
        let (g, root) = sample();
        let s = stats(&g, root).unwrap();
        assert_eq!(s.primitives, 5);
        assert_eq!(s.sequences, 2);
        assert_eq!(s.choices, 1);
        assert_eq!(s.edges, 7);
        assert_eq!(s.depth, 4);
        assert_eq!(s.nodes(), 8);
    }

    #[test]
    fn longest_walk_takes_widest_alternative() {
        let (g, root) = sample();
        assert_eq!(longest_walk(&g, root).unwrap(), 4);
    }

    #[test]
    fn language_enumerates_every_plan() {
        let (g, root) = sample();
        let lang = language(&g, root, 10).unwrap();
        let want: BTreeSet<Vec<String>> = [vec!["a", "b", "e"], vec!["a", "c", "d", "e"]]
            .into_iter()
            .map(|p| p.into_iter().map(str::to_owned).collect())
            .collect();
        assert_eq!(lang, want);
        assert_eq!(
            language(&g, root, 1),
            Err(AnalysisError::LanguageTooLarge { limit: 1 })
        );
    }

    #[test]
    fn unknown_root_surfaces_the_grammar_error() {
        let (g, _) = sample();
        let stray = NodeId(99);
        assert_eq!(
            language(&g, stray, 10),
            Err(AnalysisError::Grammar(GrammarError::UnknownNode(stray)))
        );
    }

    #[test]
    fn membership_uses_position_sets() {
        let (g, root) = sample();
        assert!(accepts(&g, root, &["a", "b", "e"]).unwrap());
        assert!(accepts(&g, root, &["a", "c", "d", "e"]).unwrap());
        assert!(!accepts(&g, root, &["a", "c", "e"]).unwrap());
        assert!(!accepts(&g, root, &["a", "b", "e", "e"]).unwrap());
        assert!(!accepts::<&str>(&g, root, &[]).unwrap());
    }

    #[test]
    fn coverage_reports_rejected_indices() {
        let (g, root) = sample();
        let demo = |tokens: &[&str]| tokens.iter().map(|t| (*t).to_owned()).collect::<Vec<_>>();
        let demos = vec![
            demo(&["x", "a", "y", "b", "z", "e"]),
            demo(&["x", "a", "y", "q", "z", "e"]),
        ];
        let report = coverage(&g, root, &demos).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, vec![1]);
        assert!((report.ratio() - 0.5).abs() < f64::EPSILON);
        assert!(CoverageReport::default().ratio().abs() < f64::EPSILON);
    }
}
