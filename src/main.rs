//! # bat2exe: The Main Entry Point
//!
//! This module handles Command Line Interface (CLI) parsing, logging initialization,
//! and dispatching commands. It plays the part a GUI front-end would: it collects the
//! user's choices, starts one conversion, and renders the worker's progress events.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use log::{debug, error, info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

mod compiler;
mod config;
mod elevation;
mod error;
mod escape;
mod invariant_ppt;
mod prefs;
mod system;
mod template;
mod tempfiles;
#[cfg(all(test, unix))]
mod testutil;
mod worker;

use config::ConversionConfig;
use prefs::Preferences;
use system::{HostSystem, SystemOps};
use worker::{Dispatcher, WorkerEvent};

/// The primary Command Line Interface (CLI) configuration.
#[derive(Parser)]
#[command(name = "bat2exe")]
#[command(about = "Convert batch scripts into standalone Windows executables", long_about = None)]
struct Cli {
    /// The sub-command to execute (convert, doctor, prefs).
    #[command(subcommand)]
    command: Option<Commands>,

    /// Turn on verbose logging.
    ///
    /// - `-v`: Debug
    /// - `-vv`: Trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a .bat file into an .exe.
    ///
    /// Options left out fall back to the ones saved by the previous conversion.
    Convert(ConvertArgs),
    /// Check that the .NET Framework and the C# compiler are usable.
    Doctor {
        /// Check this csc.exe instead of searching for one.
        #[arg(long)]
        compiler: Option<PathBuf>,
    },
    /// Show the saved preferences.
    Prefs {
        /// Delete the saved preferences.
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Args, Debug, Default)]
struct ConvertArgs {
    /// The batch file to convert.
    batch_file: Option<PathBuf>,

    /// Icon (.ico) to embed in the executable.
    #[arg(short, long)]
    icon: Option<PathBuf>,
    /// Build without an icon (forgets a saved one).
    #[arg(long, conflicts_with = "icon")]
    no_icon: bool,

    /// Directory the executable is written to [default: dist].
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Base name of the executable (without .exe).
    #[arg(short, long)]
    name: Option<String>,

    /// Remember "show console" for this conversion.
    #[arg(long, overrides_with = "no_console")]
    console: bool,
    #[arg(long, overrides_with = "console", hide = true)]
    no_console: bool,

    /// Remember "center window" for this conversion.
    #[arg(long, overrides_with = "no_center")]
    center: bool,
    #[arg(long, overrides_with = "center", hide = true)]
    no_center: bool,

    /// Make the executable require administrator privileges.
    #[arg(long, overrides_with = "no_admin")]
    admin: bool,
    /// Do not require administrator privileges (overrides a saved --admin).
    #[arg(long, overrides_with = "admin")]
    no_admin: bool,

    /// Keep the generated source and manifest after the run.
    #[arg(long, overrides_with = "no_keep_temp")]
    keep_temp: bool,
    #[arg(long, overrides_with = "keep_temp", hide = true)]
    no_keep_temp: bool,

    /// Path to csc.exe (skips the search).
    #[arg(long)]
    compiler: Option<PathBuf>,
    /// Search for csc.exe (forgets a saved --compiler).
    #[arg(long, conflicts_with = "compiler")]
    no_compiler: bool,

    /// Compiler timeout in seconds [default: 30].
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Also write the generated C# source to this file.
    #[arg(long, value_name = "PATH")]
    emit_source: Option<PathBuf>,

    /// Where the per-run scratch directory is created [default: system temp].
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Embed the script's line endings as-is instead of converting them to CRLF.
    #[arg(long)]
    keep_line_endings: bool,

    /// Skip the .NET Framework registry check.
    #[arg(long)]
    skip_prerequisites: bool,

    /// Do not update the saved preferences.
    #[arg(long)]
    no_save: bool,
}

/// Resolves an `--x` / `--no-x` pair against the saved value.
fn resolve_flag(on: bool, off: bool, saved: bool) -> bool {
    if on {
        true
    } else if off {
        false
    } else {
        saved
    }
}

/// Resolves an optional path against the saved value; `--no-x` clears it.
fn resolve_path(given: Option<PathBuf>, cleared: bool, saved: &Option<PathBuf>) -> Option<PathBuf> {
    if cleared {
        None
    } else {
        given.or_else(|| saved.clone())
    }
}

/// Merges CLI arguments with saved preferences into a validated config.
///
/// Explicit arguments always win; the output name and batch file have no built-in default.
fn build_config(args: ConvertArgs, prefs: &Preferences) -> Result<ConversionConfig> {
    let batch_file = args
        .batch_file
        .or_else(|| prefs.batch_file.clone())
        .context("no batch file given")?;
    let output_name = args
        .name
        .or_else(|| prefs.output_name.clone())
        .context("an output name is required (--name)")?;

    let mut config = ConversionConfig::new(batch_file, output_name);
    if let Some(dir) = args.output_dir.or_else(|| prefs.output_dir.clone()) {
        config.output_dir = dir;
    }
    config.icon_file = resolve_path(args.icon, args.no_icon, &prefs.icon_file);
    config.console = resolve_flag(args.console, args.no_console, prefs.console);
    config.center_window = resolve_flag(args.center, args.no_center, prefs.center_window);
    config.admin_required = resolve_flag(args.admin, args.no_admin, prefs.admin_required);
    config.keep_temp_files = resolve_flag(args.keep_temp, args.no_keep_temp, prefs.keep_temp_files);
    config.compiler = resolve_path(args.compiler, args.no_compiler, &prefs.compiler);
    if let Some(secs) = args.timeout.or(prefs.compile_timeout_secs) {
        config.compile_timeout = Duration::from_secs(secs);
    }
    config.emit_source = args.emit_source;
    config.work_dir = args.work_dir;
    config.normalize_line_endings = !args.keep_line_endings;
    config.skip_prerequisites = args.skip_prerequisites;

    Ok(config.validate()?)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "bat2exe")
}

/// Terminal logging, plus a per-run log file for conversions.
fn init_logging(level: LevelFilter, log_to_file: bool) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    let mut log_path = None;
    if log_to_file {
        if let Some(dirs) = project_dirs() {
            let log_dir = dirs.data_local_dir().join("logs");
            let path = log_dir.join(format!("convert_{}.log", Local::now().format("%Y%m%d_%H%M%S")));
            if let Ok(file) = fs::create_dir_all(&log_dir).and_then(|_| File::create(&path)) {
                loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
                log_path = Some(path);
            }
        }
    }

    // A logger failure must not stop the conversion.
    let _ = CombinedLogger::init(loggers);
    if let Some(path) = log_path {
        debug!("Logging to {:?}", path);
    }
}

async fn convert(args: ConvertArgs) -> Result<()> {
    let prefs_path = Preferences::default_path();
    let mut prefs = prefs_path.as_deref().map(Preferences::load).unwrap_or_default();
    let no_save = args.no_save;

    let config = build_config(args, &prefs)?;
    info!(
        "Converting {} -> {}",
        config.batch_file.display(),
        config.output_path().display()
    );

    let dispatcher = Dispatcher::new();
    let mut run = dispatcher.start(config.clone(), Arc::new(HostSystem))?;

    let mut outcome = None;
    while let Some(event) = run.events.recv().await {
        match event {
            WorkerEvent::Status(message) => info!("{}", message),
            WorkerEvent::Progress(percent) => debug!("[{:>3}%]", percent),
            WorkerEvent::Finished(report) => outcome = Some(Ok(report)),
            WorkerEvent::Failed(e) => outcome = Some(Err(e)),
        }
    }
    run.task.await.context("conversion task panicked")?;

    if !no_save {
        if let Some(path) = &prefs_path {
            prefs.remember(&config, matches!(outcome, Some(Ok(_))));
            if let Err(e) = prefs.save(path) {
                warn!("Could not save preferences: {:#}", e);
            }
        }
    }

    match outcome {
        Some(Ok(report)) => {
            debug!("Compiled with {}", report.compiler.display());
            println!("Created {} ({} bytes)", report.output.display(), report.size);
            for path in &report.retained {
                println!("Kept {}", path.display());
            }
            Ok(())
        }
        Some(Err(e)) => Err(e).context("conversion failed"),
        None => bail!("the conversion ended without reporting a result"),
    }
}

/// Prints an environment report. Returns `false` if a conversion would fail.
async fn doctor(compiler: Option<PathBuf>) -> Result<bool> {
    let system = HostSystem;
    let mut healthy = true;

    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                   bat2exe Environment Report");
    println!("═══════════════════════════════════════════════════════════════");
    println!();

    // 1. .NET Framework
    match system.framework_version() {
        Ok(info) if matches!(info.major(), Some(m) if m >= 4) => {
            let release = info.release.map(|r| format!(" (release {})", r)).unwrap_or_default();
            println!("1. .NET Framework:  ✓ {}{}", info.version, release);
        }
        Ok(info) => {
            healthy = false;
            println!("1. .NET Framework:  ⚠ unsupported version {}", info.version);
        }
        Err(e) => {
            healthy = false;
            println!("1. .NET Framework:  ⚠ not found ({})", e);
            println!("   Install .NET Framework 4.8: https://dotnet.microsoft.com/download/dotnet-framework");
        }
    }

    // 2. Compiler
    match compiler::locate_compiler(compiler.as_deref(), &system) {
        Ok(csc) => {
            println!("2. C# compiler:     ✓ {}", csc.display());
            match compiler::probe_compiler(&csc, &system.compiler_env(), Duration::from_secs(10)).await {
                Ok(banner) if !banner.is_empty() => println!("   {}", banner),
                Ok(_) => {}
                Err(e) => {
                    healthy = false;
                    println!("   ⚠ found but does not run: {}", e);
                }
            }
        }
        Err(e) => {
            healthy = false;
            println!("2. C# compiler:     ⚠ {}", e);
        }
    }

    // 3. Template self-check
    let sample = "@echo off\r\necho \"100% $done\"\\\t\r\n";
    let generated = template::generate_source(sample, &template::SourceOptions::default());
    let round_trip = escape::unescape_literal(&escape::escape_literal(sample)).ok();
    if generated.is_ok() && round_trip.as_deref() == Some(sample) {
        println!("3. Launcher template: ✓ generates and escapes correctly");
    } else {
        healthy = false;
        println!("3. Launcher template: ⚠ self-check failed");
    }

    // 4. Privileges
    if elevation::is_elevated() {
        println!("4. Privileges:      running as Administrator");
    } else {
        println!("4. Privileges:      standard user (fine unless the output folder is protected)");
    }

    // 5. Preferences
    match Preferences::default_path() {
        Some(path) => println!("5. Preferences:     {}", path.display()),
        None => println!("5. Preferences:     no home directory, preferences disabled"),
    }

    println!();
    println!("───────────────────────────────────────────────────────────────");
    if healthy {
        println!("✓ Ready to convert.");
    } else {
        println!("Fix the issues above before running 'bat2exe convert'.");
    }
    println!();

    Ok(healthy)
}

fn show_prefs(reset: bool) -> Result<()> {
    let path = Preferences::default_path().context("no home directory, preferences are disabled")?;

    if reset {
        match fs::remove_file(&path) {
            Ok(()) => info!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => info!("No saved preferences"),
            Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
        }
        return Ok(());
    }

    print_prefs(&path, &Preferences::load(&path))
}

fn print_prefs(path: &Path, prefs: &Preferences) -> Result<()> {
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(prefs)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Determine log level based on verbosity flag
    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let result = match cli.command {
        Some(Commands::Convert(args)) => {
            init_logging(log_level, true);
            convert(args).await
        }
        Some(Commands::Doctor { compiler }) => {
            init_logging(log_level, false);
            match doctor(compiler).await {
                Ok(true) => Ok(()),
                Ok(false) => std::process::exit(1),
                Err(e) => Err(e),
            }
        }
        Some(Commands::Prefs { reset }) => {
            init_logging(log_level, false);
            show_prefs(reset)
        }
        None => {
            // Default behavior if no command: print the help message
            use clap::CommandFactory;
            let _ = Cli::command().print_help();
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
