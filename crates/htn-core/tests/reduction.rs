// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

use std::collections::BTreeSet;

use htn_core::analysis::{accepts, demonstration_actions, language};
use htn_core::{
    learn, EquivalenceOracle, FormatError, Grammar, LearnError, LearnOptions, NodeId, NodeKind,
    OracleError, OracleFallback, ReductionBudget, ReductionStatus, StallReason,
};

fn demo(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| (*t).to_owned()).collect()
}

fn two_way() -> Vec<Vec<String>> {
    vec![
        demo(&[
            "init_state", "init_action", "s0", "a", "s1", "b", "s2", "d", "term_state", "term_action",
        ]),
        demo(&[
            "init_state", "init_action", "s0", "a", "s1", "c", "s2", "d", "term_state", "term_action",
        ]),
    ]
}

fn tangled() -> Vec<Vec<String>> {
    vec![
        demo(&["init_state", "init_action", "s0", "a", "s1", "c", "term_state", "term_action"]),
        demo(&["init_state", "init_action", "s0", "a", "s2", "d", "term_state", "term_action"]),
        demo(&["init_state", "init_action", "s5", "b", "s2", "d", "term_state", "term_action"]),
    ]
}

fn optional_step() -> Vec<Vec<String>> {
    vec![
        demo(&[
            "init_state", "init_action", "s0", "a", "s1", "b", "s2", "c", "term_state", "term_action",
        ]),
        demo(&["init_state", "init_action", "s0", "a", "s2", "c", "term_state", "term_action"]),
    ]
}

fn assert_sequence_states(grammar: &Grammar, root: NodeId) {
    for id in grammar.preorder(root).expect("preorder") {
        let node = grammar.node(id).expect("node");
        if node.kind() != NodeKind::Sequence {
            continue;
        }
        for pair in node.children().windows(2) {
            let left = grammar.node(pair[0]).expect("left");
            let right = grammar.node(pair[1]).expect("right");
            assert_eq!(
                left.poststate(),
                right.prestate(),
                "{} -> {} inside {}",
                left.name(),
                right.name(),
                node.name()
            );
        }
    }
}

#[test]
fn linear_demonstration_reduces_to_one_sequence() {
    let demos = vec![demo(&[
        "init_state", "init_action", "s0", "open", "s1", "pour", "s2", "close", "term_state",
        "term_action",
    ])];
    let learned = learn(&demos, LearnOptions::default()).expect("learn");
    assert!(learned.reduction.is_canonical());
    let root = learned.grammar.node(learned.reduction.root).expect("root");
    assert_eq!(root.kind(), NodeKind::Sequence);
    let actions: Vec<_> = root
        .children()
        .iter()
        .map(|c| learned.grammar.node(*c).expect("child").action().expect("primitive"))
        .collect();
    assert_eq!(actions, ["init_action", "open", "pour", "close", "term_action"]);
    assert_sequence_states(&learned.grammar, learned.reduction.root);
}

#[test]
fn one_differing_action_becomes_even_choice() {
    let learned = learn(&two_way(), LearnOptions::default()).expect("learn");
    assert!(learned.reduction.is_canonical());
    assert_eq!(learned.reduction.stats.expansions, 0);
    let g = &learned.grammar;
    let root = g.node(learned.reduction.root).expect("root");
    assert_eq!(root.kind(), NodeKind::Sequence);
    assert_eq!(root.children().len(), 5);
    let choice = g.node(root.children()[2]).expect("choice");
    assert_eq!(choice.kind(), NodeKind::Choice);
    assert_eq!(choice.selection_weights(), vec![0.5, 0.5]);
    let alternatives: Vec<_> = choice
        .children()
        .iter()
        .map(|c| g.node(*c).expect("alt").action().expect("primitive"))
        .collect();
    assert_eq!(alternatives, ["b", "c"]);
    assert_sequence_states(g, learned.reduction.root);
}

#[test]
fn tangled_branches_need_exactly_one_expansion() {
    let demos = tangled();
    let learned = learn(&demos, LearnOptions::default()).expect("learn");
    assert!(learned.reduction.is_canonical());
    assert_eq!(learned.reduction.stats.expansions, 1);
    assert_eq!(learned.reduction.stats.duplicated_nodes, 5);

    let lang = language(&learned.grammar, learned.reduction.root, 64).expect("language");
    let want: BTreeSet<Vec<String>> = demos
        .iter()
        .map(|d| demonstration_actions(d).into_iter().map(str::to_owned).collect())
        .collect();
    assert_eq!(lang, want);

    let root = learned.grammar.node(learned.reduction.root).expect("root");
    let outer = learned.grammar.node(root.children()[1]).expect("outer choice");
    assert_eq!(outer.kind(), NodeKind::Choice);
    let mut weights = outer.selection_weights();
    weights.sort_by(f64::total_cmp);
    assert!((weights[0] - 1.0 / 3.0).abs() < 1e-9);
    assert!((weights[1] - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn optional_step_is_learned_as_a_skippable_branch() {
    let demos = optional_step();
    let learned = learn(&demos, LearnOptions::default()).expect("learn");
    assert!(learned.reduction.is_canonical(), "{:?}", learned.reduction.status);
    assert_eq!(learned.reduction.stats.expansions, 1);
    assert_eq!(learned.reduction.stats.splits, 0);

    let lang = language(&learned.grammar, learned.reduction.root, 64).expect("language");
    let want: BTreeSet<Vec<String>> = demos
        .iter()
        .map(|d| demonstration_actions(d).into_iter().map(str::to_owned).collect())
        .collect();
    assert_eq!(lang, want);
}

#[test]
fn learned_grammar_accepts_its_training_set() {
    for demos in [two_way(), tangled(), optional_step()] {
        let learned = learn(&demos, LearnOptions::default()).expect("learn");
        for d in &demos {
            assert!(accepts(
                &learned.grammar,
                learned.reduction.root,
                demonstration_actions(d).as_slice()
            )
            .expect("accepts"));
        }
    }
}

#[test]
fn malformed_demonstrations_are_rejected() {
    let odd = vec![demo(&["init_state", "init_action", "s0", "term_state", "term_action"])];
    assert_eq!(
        learn(&odd, LearnOptions::default()).expect_err("odd"),
        LearnError::Format(FormatError::OddLength { index: 0, len: 5 })
    );
    let wrong = vec![two_way()[0].clone(), demo(&["x", "init_action", "term_state", "term_action"])];
    assert!(matches!(
        learn(&wrong, LearnOptions::default()),
        Err(LearnError::Format(FormatError::MissingSentinel {
            index: 1,
            position: 0,
            ..
        }))
    ));
}

#[test]
fn exhausted_budget_degrades_to_residual_choice() {
    let options = LearnOptions {
        budget: ReductionBudget {
            max_rounds: 1,
            max_duration: None,
        },
        ..LearnOptions::default()
    };
    let learned = learn(&tangled(), options).expect("learn");
    assert!(matches!(
        learned.reduction.status,
        ReductionStatus::Stalled {
            reason: StallReason::BudgetExhausted,
            ..
        }
    ));
    let root = learned.grammar.node(learned.reduction.root).expect("root");
    assert_eq!(root.kind(), NodeKind::Choice);
    let w = root.selection_weights();
    assert!(w.iter().all(|x| (x - w[0]).abs() < 1e-12));
}

struct Offline;

impl EquivalenceOracle for Offline {
    fn equivalent(&mut self, _a: &str, _b: &str) -> Result<bool, OracleError> {
        Err(OracleError::Unavailable("no route".into()))
    }
}

#[test]
fn failing_oracle_falls_back_to_similarity() {
    let demos = vec![
        demo(&[
            "init_state", "init_action", "s0", "grasp_cup", "s1", "lift", "term_state",
            "term_action",
        ]),
        demo(&[
            "init_state", "init_action", "s0", "grasp_cap", "s1", "lift", "term_state",
            "term_action",
        ]),
    ];
    let options = LearnOptions {
        oracle: Some((Box::new(Offline), OracleFallback::Similarity(0.85))),
        ..LearnOptions::default()
    };
    let learned = learn(&demos, options).expect("learn");
    assert!(learned.reduction.is_canonical());
    assert_eq!(learned.reduction.stats.semantic_merges, 1);
    assert_eq!(learned.reduction.stats.oracle_fallbacks, 1);
    assert_eq!(learned.reduction.stats.parallel_merges, 0);

    let options = LearnOptions {
        oracle: Some((Box::new(Offline), OracleFallback::NotEquivalent)),
        ..LearnOptions::default()
    };
    let learned = learn(&demos, options).expect("learn");
    assert_eq!(learned.reduction.stats.semantic_merges, 0);
    assert_eq!(learned.reduction.stats.parallel_merges, 1);
}

#[test]
fn reducing_a_reduced_graph_is_a_no_op() {
    let learned = learn(&two_way(), LearnOptions::default()).expect("learn");
    let mut grammar = learned.grammar.clone();
    let mut graph = htn_core::WorkingGraph::new();
    graph.insert_node(learned.reduction.root);
    let before = grammar.len();
    let again = htn_core::Reducer::new()
        .reduce(&mut grammar, &mut graph)
        .expect("reduce");
    assert_eq!(again.root, learned.reduction.root);
    assert!(again.is_canonical());
    assert_eq!(again.stats.rounds, 0);
    assert_eq!(grammar.len(), before);
}
