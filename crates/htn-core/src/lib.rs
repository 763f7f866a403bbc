// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! htn-core: learns hierarchical task grammars from demonstrated action traces.
//!
//! Demonstrations are aggregated into a probabilistic [`ActionGraph`], seeded
//! into a [`WorkingGraph`] of grammar handles, and rewritten by the
//! [`Reducer`] (series/parallel merges to a fixpoint) with the
//! [`Restructurer`] repairing irreducible regions by lane duplication. The
//! surviving root describes every weighted execution as a tree of
//! Primitive/Sequence/Choice nodes, which can be sampled with a [`Sampler`],
//! analysed, or frozen into an [`ExportTree`].
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cast_precision_loss
)]

mod action_graph;
/// Grammar inspection: statistics, walk bounds, language and membership.
pub mod analysis;
mod export;
mod grammar;
mod ident;
mod learn;
mod oracle;
mod prng;
mod reduce;
mod restructure;
mod sampler;
mod working_graph;

/// Demonstration validation, transition statistics and action graph unfolding.
pub use action_graph::{
    validate_demonstrations, ActionEdge, ActionGraph, ActionNode, FormatError, Sentinels,
    Transition, TransitionTable,
};
/// Parent-linked export tree handed to external collaborators.
pub use export::{ExportKind, ExportNode, ExportTree};
/// Grammar node model and arena.
pub use grammar::{Grammar, GrammarError, GrammarNode, NodeBody, NodeKind};
/// Opaque grammar node handle.
pub use ident::NodeId;
/// End-to-end pipeline from demonstrations to a reduced grammar.
pub use learn::{learn, LearnError, LearnOptions, LearnedGrammar};
/// Semantic-equivalence oracle port and local adapters.
pub use oracle::{
    similarity_ratio, CachedOracle, EquivalenceOracle, OracleError, OracleFallback,
    SimilarityOracle, DEFAULT_SIMILARITY_THRESHOLD,
};
/// Deterministic pseudo-random source used by the sampler.
pub use prng::Prng;
/// Series/parallel reduction engine.
pub use reduce::{
    ReduceError, Reducer, Reduction, ReductionBudget, ReductionStats, ReductionStatus,
    StallReason, RESIDUAL_NAME,
};
/// Irreducible-region detection and lane expansion.
pub use restructure::{
    least_common_successor, Expansion, Layering, NodeSplit, Region, Repair, Restructurer,
};
/// Weighted random walks over a finished grammar.
pub use sampler::{pick_index, RandomSource, Sampler};
/// Mutable adjacency store used during reduction.
pub use working_graph::{SeededGraph, WorkingGraph};
