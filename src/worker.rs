//! # Conversion Worker
//!
//! Runs one batch-to-exe conversion as a tokio task and reports back over a channel.
//!
//! ## Steps
//!
//! | Progress | Step                                               |
//! |----------|----------------------------------------------------|
//! | 5        | Check the .NET Framework prerequisite.             |
//! | 10       | Locate `csc.exe`.                                  |
//! | 20       | Read the batch file.                               |
//! | 40       | Generate the launcher source into a scratch dir.   |
//! | 60       | Prepare (and probe) the output directory.          |
//! | 80       | Compile and verify the executable.                 |
//! | 100      | Done.                                              |
//!
//! The receiver sees `Progress`/`Status` events in order, then exactly one terminal
//! event (`Finished` or `Failed`). Temp files are cleaned up before the terminal event
//! is sent, whatever the outcome. The compiler writes to a hidden staging file next to
//! `<name>.exe`; only a verified build is renamed over it, so a failed run leaves neither a
//! half-built artifact nor a damaged previous build.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;
use crate::compiler::{locate_compiler, run_compiler, verify_artifact, CompileRequest};
use crate::config::ConversionConfig;
use crate::elevation::permission_hint;
use crate::error::{ConvertError, Result};
use crate::escape::{decode_lossy, normalize_line_endings};
use crate::invariant_ppt::assert_invariant;
use crate::system::SystemOps;
use crate::template::{generate_source, SourceOptions, ELEVATION_MANIFEST};
use crate::tempfiles::TempFileManager;

/// Name of the generated source inside the scratch directory.
pub const SOURCE_FILE_NAME: &str = "launcher.cs";
/// Name of the elevation manifest inside the scratch directory.
pub const MANIFEST_FILE_NAME: &str = "app.manifest";
/// File written and removed again to prove the output directory is writable.
const WRITE_PROBE_NAME: &str = "bat2exe-write-test.tmp";

/// Notifications from a running conversion.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Percentage, monotonically increasing.
    Progress(u8),
    Status(String),
    Finished(ConversionReport),
    Failed(ConvertError),
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::Finished(_) | WorkerEvent::Failed(_))
    }
}

/// What a successful conversion produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub output: PathBuf,
    pub size: u64,
    pub compiler: PathBuf,
    /// Scratch paths left on disk because retention was requested.
    pub retained: Vec<PathBuf>,
}

/// Clears the dispatcher's busy flag when dropped.
#[derive(Debug)]
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ConversionWorker<S: SystemOps> {
    config: ConversionConfig,
    system: Arc<S>,
    events: UnboundedSender<WorkerEvent>,
    temp: TempFileManager,
    busy: Option<BusyGuard>,
    last_progress: u8,
    terminal_sent: bool,
    /// Compiler output not yet moved over the final executable.
    staged_output: Option<PathBuf>,
}

impl<S: SystemOps> ConversionWorker<S> {
    pub fn new(config: ConversionConfig, system: Arc<S>, events: UnboundedSender<WorkerEvent>) -> Self {
        let temp = TempFileManager::new(config.keep_temp_files);
        Self {
            config,
            system,
            events,
            temp,
            busy: None,
            last_progress: 0,
            terminal_sent: false,
            staged_output: None,
        }
    }

    /// Runs the conversion to completion. Never fails: the outcome is the terminal event.
    pub async fn run(mut self) {
        info!("Starting conversion of {}", self.config.batch_file.display());

        let outcome = self.convert().await;
        if outcome.is_err() {
            self.discard_partial_output();
        }
        let cleanup = self.temp.cleanup();
        if !cleanup.failed.is_empty() {
            warn!("{} temporary path(s) could not be removed", cleanup.failed.len());
        }

        // Free the dispatcher before the caller learns the run is over.
        self.busy.take();

        match outcome {
            Ok(mut report) => {
                report.retained = cleanup.kept;
                self.progress(100);
                self.status("Conversion complete!");
                info!("Created {} ({} bytes)", report.output.display(), report.size);
                self.emit(WorkerEvent::Finished(report));
            }
            Err(e) => {
                debug!("Conversion failed: {}", e);
                self.emit(WorkerEvent::Failed(e));
            }
        }
    }

    async fn convert(&mut self) -> Result<ConversionReport> {
        self.step(5, "Checking prerequisites...");
        self.check_prerequisites()?;

        self.step(10, "Locating C# compiler...");
        let compiler = locate_compiler(self.config.compiler.as_deref(), &*self.system)?;
        info!("Using compiler: {}", compiler.display());

        self.step(20, "Reading batch file...");
        let batch_text = read_batch_file(&self.config.batch_file)?;

        self.step(40, "Generating C# source...");
        let text = if self.config.normalize_line_endings {
            normalize_line_endings(&batch_text)
        } else {
            Cow::Borrowed(batch_text.as_str())
        };
        let options = SourceOptions {
            admin_required: self.config.admin_required,
            ..Default::default()
        };
        let source = generate_source(&text, &options)?;

        let base = self.config.work_dir.clone().unwrap_or_else(std::env::temp_dir);
        let scratch = self.temp.create_scratch_dir(&base)?;
        let source_path = scratch.join(SOURCE_FILE_NAME);
        // csc reads BOM-less files in the ANSI code page; the BOM keeps non-ASCII text intact.
        self.temp.write_file(&source_path, format!("\u{FEFF}{}", source))?;
        debug!("Wrote launcher source to {:?}", source_path);

        if let Some(copy) = &self.config.emit_source {
            fs::write(copy, &source).map_err(|e| ConvertError::SourceCopyFailed {
                path: copy.clone(),
                source: e,
            })?;
            info!("Generated source saved to {}", copy.display());
        }

        let manifest = if self.config.admin_required {
            let path = scratch.join(MANIFEST_FILE_NAME);
            self.temp.write_file(&path, ELEVATION_MANIFEST)?;
            Some(path)
        } else {
            None
        };

        self.step(60, "Preparing output directory...");
        prepare_output_dir(&self.config.output_dir)?;
        let output = self.config.output_path();
        let icon = self.config.usable_icon().map(Path::to_path_buf);
        if let (None, Some(wanted)) = (&icon, &self.config.icon_file) {
            warn!("Icon {} not found, building without an icon", wanted.display());
        }

        self.step(80, "Compiling executable...");
        let staged = staging_path(&output);
        let request = CompileRequest {
            compiler: compiler.clone(),
            source: source_path,
            output: staged.clone(),
            manifest,
            icon,
        };
        self.staged_output = Some(staged.clone());
        let compiled = run_compiler(&request, &self.system.compiler_env(), self.config.compile_timeout).await?;
        for warning in compiled.warnings() {
            warn!("{}", warning);
        }
        let size = verify_artifact(&staged).map_err(|e| match e {
            ConvertError::OutputMissing(_) => ConvertError::OutputMissing(output.clone()),
            ConvertError::OutputEmpty(_) => ConvertError::OutputEmpty(output.clone()),
            e => e,
        })?;

        // Same directory, so this replaces a previous build in one step.
        fs::rename(&staged, &output)?;
        self.staged_output = None;

        Ok(ConversionReport { output, size, compiler, retained: Vec::new() })
    }

    fn check_prerequisites(&self) -> Result<()> {
        if self.config.skip_prerequisites {
            debug!("Skipping .NET Framework check");
            return Ok(());
        }

        match self.system.framework_version() {
            Ok(info) if matches!(info.major(), Some(m) if m >= 4) => {
                info!(".NET Framework {} found", info.version);
                Ok(())
            }
            Ok(info) => Err(ConvertError::MissingPrerequisite(format!(
                "found unsupported version {}",
                info.version
            ))),
            Err(e) => Err(ConvertError::MissingPrerequisite(e.to_string())),
        }
    }

    /// Removes the staged build of a failed run. The previous `<name>.exe`, if any, is left alone.
    fn discard_partial_output(&mut self) {
        let Some(staged) = self.staged_output.take() else {
            return;
        };
        match fs::remove_file(&staged) {
            Ok(()) => info!("Removed incomplete output {}", staged.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to remove incomplete output {}: {}", staged.display(), e),
        }
    }

    fn step(&mut self, percent: u8, message: &str) {
        self.status(message);
        self.progress(percent);
    }

    fn progress(&mut self, percent: u8) {
        assert_invariant(percent >= self.last_progress, "Progress never goes backwards", Some("Worker"));
        self.last_progress = percent;
        self.emit(WorkerEvent::Progress(percent));
    }

    fn status(&mut self, message: &str) {
        debug!("{}", message);
        self.emit(WorkerEvent::Status(message.to_string()));
    }

    fn emit(&mut self, event: WorkerEvent) {
        assert_invariant(!self.terminal_sent, "Worker emits exactly one terminal event", Some("Worker"));
        self.terminal_sent |= event.is_terminal();
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped; conversion continues unobserved");
        }
    }
}

/// Hidden sibling of `output` the compiler writes to before the build is verified.
fn staging_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    output.with_file_name(format!(".{}.{}.partial.exe", stem, Uuid::new_v4().simple()))
}

/// Reads the batch file as UTF-8, replacing undecodable bytes.
fn read_batch_file(path: &Path) -> Result<String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConvertError::SourceMissing(path.to_path_buf()));
        }
        Err(e) => {
            return Err(ConvertError::SourceUnreadable { path: path.to_path_buf(), source: e });
        }
    };

    let text = decode_lossy(&bytes);
    if let Cow::Owned(_) = text {
        warn!("{} is not valid UTF-8; invalid bytes were replaced", path.display());
    }
    if text.trim().is_empty() {
        warn!("{} is empty; the executable will do nothing", path.display());
    }
    Ok(text.into_owned())
}

/// Creates the output directory and proves it is writable.
fn prepare_output_dir(dir: &Path) -> Result<()> {
    let not_writable = |source: io::Error| ConvertError::OutputNotWritable {
        path: dir.to_path_buf(),
        source,
        hint: permission_hint(),
    };

    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(WRITE_PROBE_NAME);
    fs::write(&probe, b"test").map_err(not_writable)?;
    fs::remove_file(&probe).map_err(not_writable)?;
    Ok(())
}

/// Guarantees at most one conversion in flight.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    busy: Arc<AtomicBool>,
}

/// A started conversion: its event stream and the task driving it.
pub struct RunHandle {
    pub events: UnboundedReceiver<WorkerEvent>,
    pub task: JoinHandle<()>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Spawns a worker for `config` on the current tokio runtime.
    ///
    /// # Errors
    /// `AlreadyRunning` while a previous conversion has not yet sent its terminal event.
    pub fn start<S: SystemOps + 'static>(&self, config: ConversionConfig, system: Arc<S>) -> Result<RunHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConvertError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut worker = ConversionWorker::new(config, system, tx);
        worker.busy = Some(BusyGuard(self.busy.clone()));
        let task = tokio::spawn(worker.run());

        Ok(RunHandle { events: rx, task })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use serial_test::serial;
    use crate::invariant_ppt::contract_test;
    use crate::system::MockSystem;
    use crate::testutil::{fake_compiler, was_invoked, WRITES_EMPTY_OUTPUT, WRITES_OUTPUT};

    struct Sandbox {
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    impl Sandbox {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            fs::create_dir_all(root.join("work")).unwrap();
            fs::create_dir_all(root.join("bin")).unwrap();
            Self { _dir: dir, root }
        }

        fn bin(&self) -> PathBuf {
            self.root.join("bin")
        }

        fn dist(&self) -> PathBuf {
            self.root.join("dist")
        }

        fn work_entries(&self) -> usize {
            fs::read_dir(self.root.join("work")).unwrap().count()
        }

        fn dist_files(&self) -> Vec<PathBuf> {
            match fs::read_dir(self.dist()) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }

        fn config(&self, compiler_body: &str) -> ConversionConfig {
            let batch = self.root.join("hello.bat");
            fs::write(&batch, "@echo hi").unwrap();
            let mut config = ConversionConfig::new(batch, "demo");
            config.output_dir = self.dist();
            config.work_dir = Some(self.root.join("work"));
            config.compiler = Some(fake_compiler(&self.bin(), compiler_body));
            config
        }
    }

    async fn run_to_end(config: ConversionConfig, system: MockSystem) -> Vec<WorkerEvent> {
        let dispatcher = Dispatcher::new();
        let mut handle = dispatcher.start(config, Arc::new(system)).unwrap();
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        handle.task.await.unwrap();
        assert!(!dispatcher.is_busy());
        events
    }

    fn terminal(events: &[WorkerEvent]) -> &WorkerEvent {
        let terminals: Vec<&WorkerEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1, "expected exactly one terminal event: {:?}", events);
        assert!(events.last().unwrap().is_terminal(), "terminal event must come last");
        terminals[0]
    }

    fn failure(events: &[WorkerEvent]) -> &ConvertError {
        match terminal(events) {
            WorkerEvent::Failed(e) => e,
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    #[serial]
    async fn converts_hello_world_end_to_end() {
        let sandbox = Sandbox::new();
        let config = sandbox.config(&format!("cp \"$src\" \"$here/seen.cs\"\n{}", WRITES_OUTPUT));

        let events = run_to_end(config, MockSystem::with_framework()).await;

        let report = match terminal(&events) {
            WorkerEvent::Finished(report) => report.clone(),
            other => panic!("conversion failed: {:?}", other),
        };
        assert_eq!(report.output, sandbox.dist().join("demo.exe"));
        assert!(report.size > 0);
        assert!(report.retained.is_empty());
        assert_eq!(sandbox.dist_files(), vec![sandbox.dist().join("demo.exe")]);
        assert_eq!(sandbox.work_entries(), 0, "scratch files survived the run");

        let progress: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![5, 10, 20, 40, 60, 80, 100]);

        let seen = fs::read_to_string(sandbox.bin().join("seen.cs")).unwrap();
        assert!(seen.starts_with('\u{FEFF}'));
        assert!(seen.contains("BatchContent = \"@echo hi\";"));
        assert!(!seen.contains("runas"));

        contract_test(
            "end-to-end conversion",
            &[
                "Escaped literal has no raw line break or delimiter",
                "Progress never goes backwards",
                "Worker emits exactly one terminal event",
                "Removed temp paths no longer exist",
            ],
        );
    }

    #[tokio::test]
    #[serial]
    async fn line_endings_are_normalized_before_embedding() {
        let sandbox = Sandbox::new();
        let config = sandbox.config(&format!("cp \"$src\" \"$here/seen.cs\"\n{}", WRITES_OUTPUT));
        fs::write(&config.batch_file, b"@echo off\necho \xFFdone\n").unwrap();

        let events = run_to_end(config, MockSystem::with_framework()).await;
        assert!(matches!(terminal(&events), WorkerEvent::Finished(_)));

        let seen = fs::read_to_string(sandbox.bin().join("seen.cs")).unwrap();
        assert!(seen.contains("BatchContent = \"@echo off\\r\\necho \u{FFFD}done\\r\\n\";"));
    }

    #[tokio::test]
    #[serial]
    async fn missing_source_fails_before_compiling() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        config.batch_file = sandbox.root.join("missing.bat");

        let events = run_to_end(config, MockSystem::with_framework()).await;

        assert!(matches!(failure(&events), ConvertError::SourceMissing(_)));
        assert!(!was_invoked(&sandbox.bin()));
        assert!(sandbox.dist_files().is_empty());
        assert_eq!(sandbox.work_entries(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn bad_compiler_path_is_not_found() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        config.compiler = Some(sandbox.root.join("no-such-dir").join("csc.exe"));

        let events = run_to_end(config, MockSystem::with_framework()).await;

        let err = failure(&events);
        assert!(matches!(err, ConvertError::CompilerNotFound(_)));
        assert!(err.to_string().contains("compiler (csc.exe) not found"));
        assert!(sandbox.dist_files().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn timeout_fails_and_leaves_no_artifact() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config("printf 'MZ' > \"$out\"\nexec sleep 60");
        config.compile_timeout = Duration::from_millis(500);

        let events = run_to_end(config, MockSystem::with_framework()).await;

        let err = failure(&events);
        assert!(matches!(err, ConvertError::CompilerTimeout(_)));
        assert!(err.to_string().contains("timed out"));
        assert!(sandbox.dist_files().is_empty(), "partial output left behind");
        assert_eq!(sandbox.work_entries(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn zero_byte_output_is_a_failure() {
        let sandbox = Sandbox::new();
        let config = sandbox.config(WRITES_EMPTY_OUTPUT);

        let events = run_to_end(config, MockSystem::with_framework()).await;

        assert!(matches!(failure(&events), ConvertError::OutputEmpty(_)));
        assert!(sandbox.dist_files().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn compiler_error_is_reported_verbatim() {
        let sandbox = Sandbox::new();
        let config = sandbox.config("echo 'error CS0246: type not found' >&2\nexit 1");

        let events = run_to_end(config, MockSystem::with_framework()).await;

        let err = failure(&events);
        assert!(err.to_string().contains("CS0246"), "{}", err);
    }

    #[tokio::test]
    #[serial]
    async fn failed_rebuild_keeps_the_previous_executable() {
        let sandbox = Sandbox::new();
        let previous = sandbox.dist().join("demo.exe");
        fs::create_dir_all(sandbox.dist()).unwrap();
        fs::write(&previous, b"MZ-previous-good-build").unwrap();
        let config = sandbox.config("printf 'MZ-half' > \"$out\"\necho 'error CS1002: ; expected' >&2\nexit 1");

        let events = run_to_end(config, MockSystem::with_framework()).await;

        assert!(matches!(failure(&events), ConvertError::CompilerFailed { .. }));
        assert_eq!(fs::read(&previous).unwrap(), b"MZ-previous-good-build");
        assert_eq!(sandbox.dist_files(), vec![previous], "staged build left behind");
    }

    #[tokio::test]
    #[serial]
    async fn successful_rebuild_replaces_the_previous_executable() {
        let sandbox = Sandbox::new();
        let previous = sandbox.dist().join("demo.exe");
        fs::create_dir_all(sandbox.dist()).unwrap();
        fs::write(&previous, b"MZ-old").unwrap();
        let config = sandbox.config(WRITES_OUTPUT);

        let events = run_to_end(config, MockSystem::with_framework()).await;

        assert!(matches!(terminal(&events), WorkerEvent::Finished(_)));
        assert_eq!(fs::read(&previous).unwrap(), b"MZ-fake-launcher");
        assert_eq!(sandbox.dist_files(), vec![previous]);

        let args = fs::read_to_string(sandbox.bin().join("args.txt")).unwrap();
        let out_arg = args.lines().find(|a| a.starts_with("/out:")).unwrap();
        assert!(out_arg.ends_with(".partial.exe"), "compiler must write to a staging file: {}", out_arg);
    }

    #[tokio::test]
    #[serial]
    async fn empty_build_reports_the_final_path() {
        let sandbox = Sandbox::new();
        let config = sandbox.config(WRITES_EMPTY_OUTPUT);

        let events = run_to_end(config, MockSystem::with_framework()).await;

        match failure(&events) {
            ConvertError::OutputEmpty(path) => assert_eq!(path, &sandbox.dist().join("demo.exe")),
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[tokio::test]
    #[serial]
    async fn keep_temp_files_retains_scratch_dir() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        config.keep_temp_files = true;
        config.admin_required = true;

        let events = run_to_end(config, MockSystem::with_framework()).await;

        let report = match terminal(&events) {
            WorkerEvent::Finished(report) => report,
            other => panic!("conversion failed: {:?}", other),
        };
        assert_eq!(report.retained.len(), 3);
        assert_eq!(sandbox.work_entries(), 1);
        let scratch = fs::read_dir(sandbox.root.join("work")).unwrap().next().unwrap().unwrap().path();
        assert!(scratch.join(SOURCE_FILE_NAME).is_file());
        assert!(scratch.join(MANIFEST_FILE_NAME).is_file());
    }

    #[tokio::test]
    #[serial]
    async fn admin_and_icon_reach_the_compiler() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        let icon = sandbox.root.join("app.ico");
        fs::write(&icon, b"\x00\x00\x01\x00").unwrap();
        config.icon_file = Some(icon.clone());
        config.admin_required = true;

        let events = run_to_end(config, MockSystem::with_framework()).await;
        assert!(matches!(terminal(&events), WorkerEvent::Finished(_)));

        let args = fs::read_to_string(sandbox.bin().join("args.txt")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert!(args.iter().any(|a| a.starts_with("/win32manifest:") && a.ends_with(MANIFEST_FILE_NAME)));
        assert_eq!(args.last().unwrap().to_string(), format!("/win32icon:{}", icon.display()));
    }

    #[tokio::test]
    #[serial]
    async fn missing_icon_is_skipped() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        config.icon_file = Some(sandbox.root.join("nope.ico"));

        let events = run_to_end(config, MockSystem::with_framework()).await;
        assert!(matches!(terminal(&events), WorkerEvent::Finished(_)));

        let args = fs::read_to_string(sandbox.bin().join("args.txt")).unwrap();
        assert!(!args.contains("/win32icon:"));
    }

    #[tokio::test]
    #[serial]
    async fn missing_framework_stops_the_run() {
        let sandbox = Sandbox::new();
        let config = sandbox.config(WRITES_OUTPUT);
        let system = MockSystem { framework: None, ..MockSystem::with_framework() };

        let events = run_to_end(config, system).await;

        assert!(matches!(failure(&events), ConvertError::MissingPrerequisite(_)));
        assert!(!was_invoked(&sandbox.bin()));
    }

    #[tokio::test]
    #[serial]
    async fn prerequisite_check_can_be_skipped() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        config.skip_prerequisites = true;
        let system = MockSystem { framework: None, ..MockSystem::with_framework() };

        let events = run_to_end(config, system).await;
        assert!(matches!(terminal(&events), WorkerEvent::Finished(_)));
    }

    #[tokio::test]
    #[serial]
    async fn unwritable_output_dir_is_reported() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        let blocker = sandbox.root.join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        config.output_dir = blocker.join("dist");

        let events = run_to_end(config, MockSystem::with_framework()).await;

        assert!(matches!(failure(&events), ConvertError::OutputNotWritable { .. }));
        assert!(!was_invoked(&sandbox.bin()));
        assert_eq!(sandbox.work_entries(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn emit_source_writes_a_debug_copy() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        let copy = sandbox.root.join("debug_launcher.cs");
        config.emit_source = Some(copy.clone());

        let events = run_to_end(config, MockSystem::with_framework()).await;
        assert!(matches!(terminal(&events), WorkerEvent::Finished(_)));
        assert!(fs::read_to_string(&copy).unwrap().contains("namespace BatchLauncher"));
    }

    #[tokio::test]
    #[serial]
    async fn emit_source_failure_names_the_copy() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config(WRITES_OUTPUT);
        let copy = sandbox.root.join("no-such-dir").join("debug_launcher.cs");
        config.emit_source = Some(copy.clone());

        let events = run_to_end(config, MockSystem::with_framework()).await;

        let err = failure(&events);
        assert!(matches!(err, ConvertError::SourceCopyFailed { .. }));
        assert!(err.to_string().contains(&copy.display().to_string()), "{}", err);
        assert!(!was_invoked(&sandbox.bin()));
        assert_eq!(sandbox.work_entries(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn only_one_conversion_at_a_time() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.config("exec sleep 60");
        config.compile_timeout = Duration::from_millis(500);
        let system = Arc::new(MockSystem::with_framework());

        let dispatcher = Dispatcher::new();
        let mut first = dispatcher.start(config.clone(), system.clone()).unwrap();
        assert!(dispatcher.is_busy());
        assert!(matches!(
            dispatcher.start(config.clone(), system.clone()),
            Err(ConvertError::AlreadyRunning)
        ));

        while let Some(event) = first.events.recv().await {
            if event.is_terminal() {
                assert!(!dispatcher.is_busy(), "busy flag must clear before the terminal event");
            }
        }
        first.task.await.unwrap();

        let second = dispatcher.start(config, system).unwrap();
        second.task.await.unwrap();
    }
}
