// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved preferences for the htn tools: sentinels, reducer budget, sampler
//! defaults and oracle fallback. [`PrefsService`] validates every value it
//! loads or saves; storage sits behind [`PrefsStore`] so tests can swap it.

pub mod config;
pub mod fs;
pub mod prefs;

pub use config::{ConfigError, PrefsService, PrefsStore};
pub use fs::{FsPrefsStore, PREFS_FILE};
pub use prefs::{FallbackPrefs, HtnPrefs, ReductionPrefs, SamplerPrefs, SentinelPrefs};
