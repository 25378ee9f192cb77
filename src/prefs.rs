//! # Saved Preferences
//!
//! A flat JSON record in the per-user config directory
//! (`%APPDATA%\bat2exe\config\preferences.json` on Windows). It remembers the choices of
//! the last `convert` so the next run can omit them.
//!
//! The file is not versioned: unknown keys are ignored and missing keys take their
//! defaults, so older and newer builds can share it.

use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use crate::config::ConversionConfig;

pub const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub console: bool,
    pub center_window: bool,
    pub admin_required: bool,
    pub keep_temp_files: bool,
    pub output_name: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub batch_file: Option<PathBuf>,
    pub icon_file: Option<PathBuf>,
    pub compiler: Option<PathBuf>,
    pub compile_timeout_secs: Option<u64>,
}

impl Preferences {
    /// Where preferences live for the current user, if a home directory can be resolved.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bat2exe").map(|dirs| dirs.config_dir().join(PREFERENCES_FILE))
    }

    /// Reads preferences, falling back to defaults when the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preferences at {:?}, using defaults", path);
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read preferences {:?}: {}", path, e);
                return Self::default();
            }
        };

        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring malformed preferences {:?}: {}", path, e);
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating preferences directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing preferences {:?}", path))?;
        debug!("Saved preferences to {:?}", path);
        Ok(())
    }

    /// Copies the user-facing choices of a conversion into the record.
    ///
    /// A compiler override is only kept once it has produced a working build.
    pub fn remember(&mut self, config: &ConversionConfig, succeeded: bool) {
        self.console = config.console;
        self.center_window = config.center_window;
        self.admin_required = config.admin_required;
        self.keep_temp_files = config.keep_temp_files;
        self.output_name = Some(config.output_name.clone());
        self.output_dir = Some(config.output_dir.clone());
        self.batch_file = Some(config.batch_file.clone());
        self.icon_file = config.icon_file.clone();
        if succeeded {
            self.compiler = config.compiler.clone();
        }
        self.compile_timeout_secs = Some(config.compile_timeout.as_secs());
    }
}
