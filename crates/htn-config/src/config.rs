// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Preference loading and saving over a pluggable store.
//!
//! [`PrefsService`] owns the JSON encoding and validation of [`HtnPrefs`];
//! a [`PrefsStore`] only moves bytes. Nothing invalid is handed to the
//! learner and nothing invalid is written back.

use thiserror::Error;
use tracing::debug;

use crate::prefs::HtnPrefs;

/// Where the saved preference blob lives.
pub trait PrefsStore {
    /// Saved bytes, or `None` when nothing has been saved yet.
    fn read(&self) -> Result<Option<Vec<u8>>, ConfigError>;
    /// Replaces the saved bytes.
    fn write(&self, data: &[u8]) -> Result<(), ConfigError>;
}

/// Failures while loading, validating or saving preferences.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the backing file failed.
    #[error("prefs i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The saved blob is not a valid prefs document.
    #[error("prefs are not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A similarity threshold outside `[0, 1]`.
    #[error("similarity threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f64),
    /// A zero round budget would stall every reduction before it starts.
    #[error("reduction.max_rounds must be at least 1")]
    ZeroRounds,
    /// A sentinel label is empty.
    #[error("sentinel {0} is empty")]
    EmptySentinel(&'static str),
    /// No platform config directory could be resolved.
    #[error("could not resolve a config directory for htn")]
    NoConfigDir,
}

/// Loads and saves validated [`HtnPrefs`] through a [`PrefsStore`].
#[derive(Debug, Clone)]
pub struct PrefsService<S> {
    store: S,
}

impl<S: PrefsStore> PrefsService<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Saved prefs, or the defaults when nothing (or an empty file) is saved.
    pub fn load(&self) -> Result<HtnPrefs, ConfigError> {
        let prefs = match self.store.read()? {
            Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            _ => {
                debug!("no saved prefs; using defaults");
                HtnPrefs::default()
            }
        };
        prefs.validate()?;
        Ok(prefs)
    }

    /// Validates and writes `prefs` as pretty JSON.
    pub fn save(&self, prefs: &HtnPrefs) -> Result<(), ConfigError> {
        prefs.validate()?;
        let data = serde_json::to_vec_pretty(prefs)?;
        self.store.write(&data)
    }
}
