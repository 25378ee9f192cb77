//! # Launcher Source Generator
//!
//! Produces the C# program that becomes the final executable. At run time that program:
//!
//! 1. optionally checks for Administrator rights and relaunches itself with `runas`,
//! 2. writes the embedded batch text to `%TEMP%\batch_<guid>.bat` using IBM437
//!    (falling back to Windows-1252, then the system default code page),
//! 3. runs it with `cmd.exe /C` in a normal window and waits for it,
//! 4. deletes the temp file after a short delay and exits with the script's exit code.
//!
//! Template placeholders are written `$NAME$`. The batch text goes in last and,
//! once escaped, cannot contain a `$`, so it can never be mistaken for a placeholder.

use crate::error::{ConvertError, Result};
use crate::escape::{escape_literal, TEMPLATE_DELIMITER};

/// Manifest embedded with `/win32manifest` when the executable must run elevated.
pub const ELEVATION_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <assemblyIdentity version="1.0.0.0" name="BatchLauncher.app"/>
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v2">
    <security>
      <requestedPrivileges xmlns="urn:schemas-microsoft-com:asm.v3">
        <requestedExecutionLevel level="requireAdministrator" uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
</assembly>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    pub admin_required: bool,
    /// File name prefix of the runtime temp `.bat`.
    pub temp_prefix: String,
    /// Pause before the runtime temp `.bat` is deleted.
    pub delete_delay_ms: u32,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            admin_required: false,
            temp_prefix: "batch_".to_string(),
            delete_delay_ms: 1000,
        }
    }
}

const LAUNCHER_TEMPLATE: &str = r#"using System;
using System.Diagnostics;
using System.IO;
using System.Security.Principal;
using System.Text;
using System.Threading;
using System.Windows.Forms;

namespace BatchLauncher
{
    internal sealed class LauncherConfig
    {
        public const string BatFilePrefix = "$TEMP_PREFIX$";
        public const int DeleteDelayMs = $DELETE_DELAY_MS$;
        public const string BatchContent = "$BATCH_CONTENT$";
    }

    internal sealed class BatchRunner : IDisposable
    {
        private readonly string _tempBatFile;
        private bool _disposed;

        public BatchRunner()
        {
            _tempBatFile = Path.Combine(
                Path.GetTempPath(),
                string.Format("{0}{1}.bat", LauncherConfig.BatFilePrefix, Guid.NewGuid().ToString("N"))
            );
        }

        public int Run()
        {
            ThrowIfDisposed();
            WriteBatchFile();
            return ExecuteBatchFile();
        }

        private static Encoding PickEncoding()
        {
            try
            {
                return Encoding.GetEncoding("IBM437");
            }
            catch (ArgumentException)
            {
                try
                {
                    return Encoding.GetEncoding("Windows-1252");
                }
                catch (ArgumentException)
                {
                    return Encoding.Default;
                }
            }
        }

        private void WriteBatchFile()
        {
            using (var writer = new StreamWriter(_tempBatFile, false, PickEncoding()))
            {
                writer.Write(LauncherConfig.BatchContent);
                writer.Flush();
            }
        }

        private int ExecuteBatchFile()
        {
            var startInfo = new ProcessStartInfo
            {
                FileName = "cmd.exe",
                Arguments = string.Format("/C \"{0}\"", _tempBatFile),
                UseShellExecute = true,
                WorkingDirectory = Application.StartupPath,
                WindowStyle = ProcessWindowStyle.Normal,
                CreateNoWindow = false
            };

            using (var process = Process.Start(startInfo))
            {
                if (process == null)
                {
                    throw new InvalidOperationException("cmd.exe could not be started.");
                }
                process.WaitForExit();
                return process.ExitCode;
            }
        }

        private void DeleteBatchFile()
        {
            if (!File.Exists(_tempBatFile))
            {
                return;
            }
            try
            {
                Thread.Sleep(LauncherConfig.DeleteDelayMs);
                File.Delete(_tempBatFile);
            }
            catch (Exception)
            {
                // The file lives in %TEMP%; a leftover is harmless.
            }
        }

        private void ThrowIfDisposed()
        {
            if (_disposed)
            {
                throw new ObjectDisposedException("BatchRunner");
            }
        }

        public void Dispose()
        {
            if (!_disposed)
            {
                DeleteBatchFile();
                _disposed = true;
            }
        }
    }
$ELEVATION_CLASS$
    public static class Program
    {
        private static void ShowError(string message, string title)
        {
            MessageBox.Show(message, title, MessageBoxButtons.OK, MessageBoxIcon.Error);
        }

        [STAThread]
        public static int Main()
        {
            try
            {
$ELEVATION_CHECK$
                Application.EnableVisualStyles();
                Application.SetCompatibleTextRenderingDefault(false);

                using (var runner = new BatchRunner())
                {
                    return runner.Run();
                }
            }
            catch (UnauthorizedAccessException ex)
            {
                ShowError(string.Format("Permission error:\n\n{0}", ex.Message), "Error");
            }
            catch (IOException ex)
            {
                ShowError(string.Format("I/O error:\n\n{0}", ex.Message), "Error");
            }
            catch (Exception ex)
            {
                ShowError(string.Format("Unexpected error:\n\n{0}", ex.Message), "Error");
            }
            return 1;
        }
    }
}
"#;

const ELEVATION_CLASS: &str = r#"
    internal static class Elevation
    {
        public static bool IsAdministrator()
        {
            using (var identity = WindowsIdentity.GetCurrent())
            {
                return new WindowsPrincipal(identity).IsInRole(WindowsBuiltInRole.Administrator);
            }
        }

        public static bool RelaunchElevated()
        {
            var startInfo = new ProcessStartInfo
            {
                UseShellExecute = true,
                WorkingDirectory = Environment.CurrentDirectory,
                FileName = Application.ExecutablePath,
                Verb = "runas"
            };
            try
            {
                Process.Start(startInfo);
                return true;
            }
            catch (System.ComponentModel.Win32Exception)
            {
                return false;
            }
        }
    }
"#;

const ELEVATION_CHECK: &str = r#"                if (!Elevation.IsAdministrator())
                {
                    if (Elevation.RelaunchElevated())
                    {
                        return 0;
                    }
                    ShowError("This program requires administrator privileges to run.", "Privilege Error");
                    return 1;
                }
"#;

/// Builds the complete launcher source for `batch_text`.
///
/// The text is escaped here; callers pass it exactly as it should be written
/// to the runtime `.bat` file (already line-ending normalised if desired).
///
/// # Errors
/// `InvalidSource` if the substituted template is blank or still contains a placeholder.
pub fn generate_source(batch_text: &str, options: &SourceOptions) -> Result<String> {
    let (elevation_class, elevation_check) = if options.admin_required {
        (ELEVATION_CLASS, ELEVATION_CHECK)
    } else {
        ("", "")
    };

    let source = LAUNCHER_TEMPLATE
        .replace("$ELEVATION_CLASS$", elevation_class)
        .replace("$ELEVATION_CHECK$", elevation_check)
        .replace("$TEMP_PREFIX$", &escape_literal(&options.temp_prefix))
        .replace("$DELETE_DELAY_MS$", &options.delete_delay_ms.to_string())
        .replace("$BATCH_CONTENT$", &escape_literal(batch_text));

    if source.trim().is_empty() {
        return Err(ConvertError::InvalidSource("the generated template is empty".into()));
    }
    if let Some(name) = leftover_placeholder(&source) {
        return Err(ConvertError::InvalidSource(format!("placeholder `{}` was not substituted", name)));
    }

    Ok(source)
}

fn leftover_placeholder(source: &str) -> Option<&str> {
    let start = source.find(TEMPLATE_DELIMITER)?;
    let rest = &source[start + 1..];
    let end = rest.find(TEMPLATE_DELIMITER).unwrap_or(rest.len());
    Some(&rest[..end])
}
