//! # Conversion Configuration
//!
//! The single record describing one conversion run. It is built from CLI arguments
//! (with gaps filled from saved preferences), validated once, handed to the worker,
//! and dropped when the run ends.

use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{ConvertError, Result};

/// Default compiler timeout.
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Output directory used when neither the user nor the preferences name one.
pub const DEFAULT_OUTPUT_DIR: &str = "dist";

/// Characters Windows refuses in file names.
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Device names Windows reserves regardless of extension.
const RESERVED_NAMES: &[&str] = &["CON", "PRN", "AUX", "NUL"];

#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub batch_file: PathBuf,
    pub icon_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub output_name: String,

    /// Carried through to preferences; the launcher always shows a normal cmd window.
    pub console: bool,
    /// Carried through to preferences; not used by the generated launcher.
    pub center_window: bool,
    /// Embed an elevation check and a `requireAdministrator` manifest.
    pub admin_required: bool,
    /// Leave the scratch directory (source, manifest) on disk after the run.
    pub keep_temp_files: bool,

    /// Explicit `csc.exe`. When `None` the compiler is searched for.
    pub compiler: Option<PathBuf>,
    pub compile_timeout: Duration,
    /// Parent of the per-run scratch directory. Defaults to the OS temp dir.
    pub work_dir: Option<PathBuf>,
    pub normalize_line_endings: bool,
    /// Also write the generated source here (debugging aid, never cleaned up).
    pub emit_source: Option<PathBuf>,
    pub skip_prerequisites: bool,
}

impl ConversionConfig {
    pub fn new(batch_file: impl Into<PathBuf>, output_name: impl Into<String>) -> Self {
        Self {
            batch_file: batch_file.into(),
            icon_file: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_name: output_name.into(),
            console: false,
            center_window: false,
            admin_required: false,
            keep_temp_files: false,
            compiler: None,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            work_dir: None,
            normalize_line_endings: true,
            emit_source: None,
            skip_prerequisites: false,
        }
    }

    /// `<output_dir>/<output_name>.exe`
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.exe", self.output_name))
    }

    /// Checks the user-supplied fields and normalises the output name.
    ///
    /// A trailing `.exe` on the name is dropped (any case), so `demo.exe` and
    /// `demo` produce the same artifact.
    pub fn validate(mut self) -> Result<Self> {
        if self.batch_file.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig("no batch file selected".into()));
        }

        let mut name = self.output_name.trim().to_string();
        if name
            .get(name.len().saturating_sub(4)..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".exe"))
        {
            name.truncate(name.len() - 4);
        }
        validate_output_name(&name)?;
        self.output_name = name;

        if self.output_dir.as_os_str().is_empty() {
            self.output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        }

        if self.compile_timeout.is_zero() {
            return Err(ConvertError::InvalidConfig("compile timeout must be greater than zero".into()));
        }

        Ok(self)
    }

    /// The icon to embed, if one was given and it actually exists.
    pub fn usable_icon(&self) -> Option<&Path> {
        self.icon_file.as_deref().filter(|p| p.is_file())
    }
}

fn validate_output_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConvertError::InvalidConfig("an output name for the executable is required".into()));
    }
    if let Some(bad) = name.chars().find(|c| INVALID_NAME_CHARS.contains(c) || c.is_control()) {
        return Err(ConvertError::InvalidConfig(format!(
            "output name {:?} contains the invalid character {:?}",
            name, bad
        )));
    }
    if is_reserved_device_name(name) {
        return Err(ConvertError::InvalidConfig(format!(
            "output name {:?} is a reserved Windows device name",
            name
        )));
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Err(ConvertError::InvalidConfig(format!(
            "output name {:?} must not end with a dot or space",
            name
        )));
    }
    Ok(())
}

/// `CON`, `nul.tar`, `COM1` and friends; the part before the first dot decides.
fn is_reserved_device_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).trim_end().to_ascii_uppercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        return true;
    }
    match stem.strip_prefix("COM").or_else(|| stem.strip_prefix("LPT")) {
        Some(digit) => matches!(digit.as_bytes(), [b'1'..=b'9']),
        None => false,
    }
}
