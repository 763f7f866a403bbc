// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved pipeline preferences (sentinels, budget, sampler, oracle fallback).

use std::time::Duration;

use htn_core::{OracleFallback, ReductionBudget, Sentinels, DEFAULT_SIMILARITY_THRESHOLD};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Saved preferences for a learning run. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct HtnPrefs {
    /// Boundary labels.
    pub sentinels: SentinelPrefs,
    /// Reducer limits.
    pub reduction: ReductionPrefs,
    /// Sampler seed and draw count.
    pub sampler: SamplerPrefs,
    /// Verdict applied when an oracle fails.
    pub oracle_fallback: FallbackPrefs,
}

impl HtnPrefs {
    /// Sentinel labels as the core type.
    pub fn sentinels(&self) -> Sentinels {
        Sentinels {
            init_state: self.sentinels.init_state.clone(),
            init_action: self.sentinels.init_action.clone(),
            term_state: self.sentinels.term_state.clone(),
            term_action: self.sentinels.term_action.clone(),
        }
    }

    /// Reduction budget as the core type.
    pub fn budget(&self) -> ReductionBudget {
        ReductionBudget {
            max_rounds: self.reduction.max_rounds,
            max_duration: self.reduction.max_duration_ms.map(Duration::from_millis),
        }
    }

    /// Rejects values the learner cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let labels = [
            ("init_state", &self.sentinels.init_state),
            ("init_action", &self.sentinels.init_action),
            ("term_state", &self.sentinels.term_state),
            ("term_action", &self.sentinels.term_action),
        ];
        if let Some((name, _)) = labels.iter().find(|(_, label)| label.is_empty()) {
            return Err(ConfigError::EmptySentinel(*name));
        }
        if self.reduction.max_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if let FallbackPrefs::Similarity { threshold } = self.oracle_fallback {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::ThresholdOutOfRange(threshold));
            }
        }
        Ok(())
    }

    /// Oracle fallback as the core type.
    pub fn fallback(&self) -> OracleFallback {
        match self.oracle_fallback {
            FallbackPrefs::NotEquivalent => OracleFallback::NotEquivalent,
            FallbackPrefs::Similarity { threshold } => OracleFallback::Similarity(threshold),
        }
    }
}

/// Sentinel labels expected at both ends of every demonstration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SentinelPrefs {
    /// First token.
    pub init_state: String,
    /// Second token.
    pub init_action: String,
    /// Second-to-last token.
    pub term_state: String,
    /// Last token.
    pub term_action: String,
}

impl Default for SentinelPrefs {
    fn default() -> Self {
        let s = Sentinels::default();
        Self {
            init_state: s.init_state,
            init_action: s.init_action,
            term_state: s.term_state,
            term_action: s.term_action,
        }
    }
}

/// Round and wall-clock limits for the reducer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReductionPrefs {
    /// Maximum merge rounds.
    pub max_rounds: usize,
    /// Wall-clock limit in milliseconds; `None` disables it.
    pub max_duration_ms: Option<u64>,
}

impl Default for ReductionPrefs {
    fn default() -> Self {
        Self {
            max_rounds: ReductionBudget::default().max_rounds,
            max_duration_ms: None,
        }
    }
}

/// Sampler defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SamplerPrefs {
    /// Seed for the deterministic PRNG.
    pub seed: u64,
    /// Plans drawn per `sample` invocation.
    pub count: usize,
}

impl Default for SamplerPrefs {
    fn default() -> Self {
        Self { seed: 0, count: 5 }
    }
}

/// Serialized form of the oracle fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FallbackPrefs {
    /// Treat failed comparisons as distinct.
    NotEquivalent,
    /// Compare labels locally.
    Similarity {
        /// Ratio above which two labels are equivalent.
        threshold: f64,
    },
}

impl Default for FallbackPrefs {
    fn default() -> Self {
        Self::Similarity {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}
