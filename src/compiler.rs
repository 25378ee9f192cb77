//! # Compiler Invoker
//!
//! Finds `csc.exe`, builds its command line, and runs it under a hard timeout.
//!
//! ## Lookup Order
//!
//! 1.  **Explicit path**: `--compiler` (or the saved preference). Must exist, no fallback.
//! 2.  **Search path**: `csc` on `PATH` (via `which`, so `PATHEXT` applies on Windows).
//! 3.  **Fixed locations**: `%SystemRoot%\Microsoft.NET\Framework64\v4.0.30319` then `...\Framework\v4.0.30319`.
//! 4.  **Any v4 install**: other `v4*` directories under the same two roots, newest name first.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use walkdir::WalkDir;
use crate::error::{ConvertError, Result};
use crate::system::SystemOps;

pub const COMPILER_NAME: &str = "csc";
pub const COMPILER_FILE: &str = "csc.exe";

/// The framework directory every .NET 4.x install ships `csc.exe` in.
pub const FRAMEWORK_V4_DIR: &str = "v4.0.30319";

/// Assemblies the launcher template needs.
pub const REFERENCES: &[&str] = &[
    "System.dll",
    "System.Windows.Forms.dll",
    "System.Drawing.dll",
    "System.Core.dll",
];

/// Everything needed for one compiler invocation.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub compiler: PathBuf,
    pub source: PathBuf,
    pub output: PathBuf,
    pub manifest: Option<PathBuf>,
    pub icon: Option<PathBuf>,
}

/// Captured output of a finished compiler run.
#[derive(Debug, Clone)]
pub struct CompilerOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CompilerOutput {
    /// `warning CSxxxx` lines from either stream.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.stdout
            .lines()
            .chain(self.stderr.lines())
            .map(str::trim)
            .filter(|line| line.contains("warning CS"))
    }
}

/// Locates the C# compiler.
///
/// # Errors
/// `CompilerNotFound` when an explicit path does not exist, or when no strategy finds one.
pub fn locate_compiler(explicit: Option<&Path>, system: &impl SystemOps) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            debug!("Using configured compiler {:?}", path);
            return Ok(path.to_path_buf());
        }
        return Err(ConvertError::CompilerNotFound(format!(
            "{} does not exist",
            path.display()
        )));
    }

    if let Some(search_path) = system.compiler_search_path() {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if let Ok(found) = which::which_in(COMPILER_NAME, Some(search_path), cwd) {
            debug!("Found compiler on search path: {:?}", found);
            return Ok(found);
        }
    }

    let roots = system.framework_roots();
    for root in &roots {
        let candidate = root.join(FRAMEWORK_V4_DIR).join(COMPILER_FILE);
        if candidate.is_file() {
            debug!("Found compiler at fixed location {:?}", candidate);
            return Ok(candidate);
        }
    }

    for root in &roots {
        if let Some(found) = scan_framework_root(root) {
            debug!("Found compiler under framework root: {:?}", found);
            return Ok(found);
        }
    }

    Err(ConvertError::CompilerNotFound(format!(
        "not on PATH and not under {}; enable \".NET Framework 4.8 Advanced Services\" in Windows Features",
        roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(" or ")
    )))
}

/// Looks one level below a framework root for `v4*` directories holding `csc.exe`.
fn scan_framework_root(root: &Path) -> Option<PathBuf> {
    let mut versions: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| e.file_name().to_string_lossy().to_lowercase().starts_with("v4"))
        .map(|e| e.into_path())
        .collect();

    versions.sort();
    versions
        .into_iter()
        .rev()
        .map(|dir| dir.join(COMPILER_FILE))
        .find(|csc| csc.is_file())
}

/// Builds the argument list (everything after the compiler path).
///
/// Layout: fixed switches, references, `[/win32manifest]`, `/out`, source, `[/win32icon]`.
pub fn build_compiler_args(request: &CompileRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "/nologo",
        "/target:winexe",
        "/platform:anycpu",
        "/optimize+",
        "/debug-",
    ]
    .iter()
    .map(OsString::from)
    .collect();

    args.extend(REFERENCES.iter().map(|r| OsString::from(format!("/reference:{}", r))));

    if let Some(manifest) = &request.manifest {
        args.push(path_flag("/win32manifest:", manifest));
    }
    args.push(path_flag("/out:", &request.output));
    args.push(request.source.clone().into_os_string());
    if let Some(icon) = &request.icon {
        args.push(path_flag("/win32icon:", icon));
    }

    args
}

fn path_flag(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(path.as_os_str());
    arg
}

/// Runs the compiler with a restricted environment and a hard timeout.
///
/// # Errors
/// * `CompilerTimeout` - the process did not finish within `limit`; it has been killed.
/// * `CompilerFailed` - non-zero exit; carries stderr, else stdout, else the exit code.
/// * `CompilerNotFound` - the executable vanished between lookup and spawn.
pub async fn run_compiler(
    request: &CompileRequest,
    env: &[(String, OsString)],
    limit: Duration,
) -> Result<CompilerOutput> {
    let args = build_compiler_args(request);
    debug!(
        "Running compiler: {} {}",
        request.compiler.display(),
        args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
    );

    let mut cmd = Command::new(&request.compiler);
    cmd.args(&args)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(windows::Win32::System::Threading::CREATE_NO_WINDOW.0);

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConvertError::CompilerNotFound(format!(
            "{} could not be started: {}",
            request.compiler.display(),
            e
        )),
        _ => ConvertError::Io(e),
    })?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let waited = tokio::time::timeout(limit, async {
        let (status, stdout, stderr) =
            tokio::join!(child.wait(), drain(stdout_pipe), drain(stderr_pipe));
        status.map(|s| (s, stdout, stderr))
    })
    .await;

    let (status, stdout, stderr) = match waited {
        Ok(result) => result?,
        Err(_) => {
            warn!("Compiler still running after {:?}, killing it", limit);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill compiler process: {}", e);
            }
            return Err(ConvertError::CompilerTimeout(limit));
        }
    };

    debug!("Compiler stdout: {}", stdout);
    debug!("Compiler stderr: {}", stderr);

    if !status.success() {
        let diagnostics = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            "the compiler produced no diagnostics".to_string()
        };
        return Err(ConvertError::CompilerFailed { code: status.code(), diagnostics });
    }

    info!("Compilation finished");
    Ok(CompilerOutput { stdout, stderr })
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Checks the artifact the compiler was asked to produce.
///
/// # Returns
/// The file size in bytes.
pub fn verify_artifact(path: &Path) -> Result<u64> {
    let meta = match std::fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Err(ConvertError::OutputMissing(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::OutputMissing(path.to_path_buf()));
        }
        Err(e) => return Err(ConvertError::Io(e)),
    };

    if meta.len() == 0 {
        return Err(ConvertError::OutputEmpty(path.to_path_buf()));
    }
    Ok(meta.len())
}

/// Runs `csc /help` to confirm the compiler actually starts.
///
/// # Returns
/// The first non-empty line of its output (the version banner).
pub async fn probe_compiler(compiler: &Path, env: &[(String, OsString)], limit: Duration) -> Result<String> {
    let mut cmd = Command::new(compiler);
    cmd.arg("/help")
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(windows::Win32::System::Threading::CREATE_NO_WINDOW.0);

    let output = tokio::time::timeout(limit, cmd.output())
        .await
        .map_err(|_| ConvertError::CompilerTimeout(limit))??;

    let text = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(ConvertError::CompilerFailed {
            code: output.status.code(),
            diagnostics: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default().to_string())
}
