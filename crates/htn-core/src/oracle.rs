// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Semantic-equivalence oracle port and local adapters.
//!
//! The reducer asks the oracle whether two parallel primitives perform the
//! same operation under different labels. Oracles may be remote and
//! unreliable, so the reducer never sees their errors: failures degrade to an
//! [`OracleFallback`] decision and are logged.
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

/// Default similarity threshold used by the local fallback.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Failure reported by an oracle implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The backing service could not be reached.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    /// The backing service answered with something that is not a verdict.
    #[error("oracle returned an unusable answer: {0}")]
    Malformed(String),
}

/// Decides whether two action labels denote the same operation.
pub trait EquivalenceOracle {
    /// Returns `true` when `a` and `b` are interchangeable.
    fn equivalent(&mut self, a: &str, b: &str) -> Result<bool, OracleError>;
}

/// Verdict used when the oracle fails.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OracleFallback {
    /// Treat the pair as distinct.
    NotEquivalent,
    /// Equivalent when [`similarity_ratio`] exceeds the threshold.
    Similarity(f64),
}

impl Default for OracleFallback {
    fn default() -> Self {
        Self::Similarity(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl OracleFallback {
    /// Applies the fallback rule to a pair of labels.
    pub fn decide(self, a: &str, b: &str) -> bool {
        match self {
            Self::NotEquivalent => false,
            Self::Similarity(threshold) => similarity_ratio(a, b) > threshold,
        }
    }
}

/// Normalized longest-common-subsequence ratio of two labels in `[0, 1]`.
///
/// `2 * lcs / (len(a) + len(b))`, measured in chars. Two empty labels score 1.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                row[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    (2 * prev[b.len()]) as f64 / total as f64
}

/// Local heuristic oracle: equal labels, or similarity above a threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarityOracle {
    threshold: f64,
}

impl SimilarityOracle {
    /// Oracle accepting pairs whose ratio strictly exceeds `threshold`.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Configured threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for SimilarityOracle {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl EquivalenceOracle for SimilarityOracle {
    fn equivalent(&mut self, a: &str, b: &str) -> Result<bool, OracleError> {
        Ok(a == b || similarity_ratio(a, b) > self.threshold)
    }
}

/// Memoizing wrapper; `(a, b)` and `(b, a)` share one entry.
///
/// Only successful verdicts are cached, so a transient failure is retried on
/// the next query.
#[derive(Debug)]
pub struct CachedOracle<O> {
    inner: O,
    cache: FxHashMap<(String, String), bool>,
}

impl<O: EquivalenceOracle> CachedOracle<O> {
    /// Wraps `inner` with an empty cache.
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache: FxHashMap::default(),
        }
    }

    /// Number of memoized verdicts.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Returns the wrapped oracle.
    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: EquivalenceOracle> EquivalenceOracle for CachedOracle<O> {
    fn equivalent(&mut self, a: &str, b: &str) -> Result<bool, OracleError> {
        let key = if a <= b {
            (a.to_owned(), b.to_owned())
        } else {
            (b.to_owned(), a.to_owned())
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(*hit);
        }
        let verdict = self.inner.equivalent(a, b)?;
        self.cache.insert(key, verdict);
        Ok(verdict)
    }
}

/// Reducer-side wrapper: never fails, never called when absent.
pub(crate) struct OracleGate {
    oracle: Option<Box<dyn EquivalenceOracle>>,
    fallback: OracleFallback,
    degraded: usize,
}

impl std::fmt::Debug for OracleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleGate")
            .field("configured", &self.oracle.is_some())
            .field("fallback", &self.fallback)
            .field("degraded", &self.degraded)
            .finish()
    }
}

impl OracleGate {
    pub(crate) fn disabled() -> Self {
        Self {
            oracle: None,
            fallback: OracleFallback::NotEquivalent,
            degraded: 0,
        }
    }

    pub(crate) fn new(oracle: Box<dyn EquivalenceOracle>, fallback: OracleFallback) -> Self {
        Self {
            oracle: Some(oracle),
            fallback,
            degraded: 0,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.oracle.is_some()
    }

    /// Number of queries answered by the fallback.
    pub(crate) fn degraded(&self) -> usize {
        self.degraded
    }

    pub(crate) fn equivalent(&mut self, a: &str, b: &str) -> bool {
        let Some(oracle) = self.oracle.as_mut() else {
            return false;
        };
        if a == b {
            return true;
        }
        match oracle.equivalent(a, b) {
            Ok(verdict) => verdict,
            Err(err) => {
                self.degraded += 1;
                warn!(?err, a, b, "equivalence oracle failed; using fallback");
                self.fallback.decide(a, b)
            }
        }
    }
}
