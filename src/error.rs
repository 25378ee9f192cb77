//! # Conversion Errors
//!
//! Every way a conversion run can fail. The worker catches all of these at the top
//! of the run and reports the `Display` text as the single human-readable failure reason.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("batch file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("cannot read batch file {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("generated C# source is invalid: {0}")]
    InvalidSource(String),

    #[error("cannot save generated source to {path}: {source}")]
    SourceCopyFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("C# compiler (csc.exe) not found: {0}")]
    CompilerNotFound(String),

    #[error("compilation failed ({}): {diagnostics}", exit_label(.code))]
    CompilerFailed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("compilation timed out after {0:?}")]
    CompilerTimeout(Duration),

    #[error("output executable was not produced: {0}")]
    OutputMissing(PathBuf),

    #[error("output executable is empty: {0}")]
    OutputEmpty(PathBuf),

    #[error("no write permission in output directory {path}: {source}{hint}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
        hint: &'static str,
    },

    #[error(".NET Framework 4.0 or later is required: {0}")]
    MissingPrerequisite(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a conversion is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "terminated by signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
