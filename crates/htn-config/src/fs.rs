// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `prefs.json` on disk, under the platform config dir or an explicit one.

use directories::ProjectDirs;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, PrefsStore};

/// File name of the saved preferences inside the config directory.
pub const PREFS_FILE: &str = "prefs.json";

/// Keeps the prefs blob in `<dir>/prefs.json`.
#[derive(Debug, Clone)]
pub struct FsPrefsStore {
    dir: PathBuf,
}

impl FsPrefsStore {
    /// Store under the user config directory (e.g., `~/.config/htn`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj =
            ProjectDirs::from("dev", "flyingrobots", "htn").ok_or(ConfigError::NoConfigDir)?;
        Self::at(proj.config_dir())
    }

    /// Store under `dir`, creating it if needed.
    pub fn at(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Full path of the prefs file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(PREFS_FILE)
    }
}

impl PrefsStore for FsPrefsStore {
    fn read(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        match fs::read(self.path()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(), data)?;
        Ok(())
    }
}
