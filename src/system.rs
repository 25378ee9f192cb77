use std::ffi::OsString;
use std::path::PathBuf;
use anyhow::Result;

/// Environment variables the compiler is allowed to see.
pub const COMPILER_ENV_VARS: &[&str] = &["PATH", "SystemRoot", "TEMP", "TMP"];

/// Registry key holding the .NET Framework 4.x install details.
pub const NDP_V4_FULL_KEY: &str = r"SOFTWARE\Microsoft\NET Framework Setup\NDP\v4\Full";

/// An installed .NET Framework 4.x, as read from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkInfo {
    /// Dotted version string, e.g. `4.8.09037`.
    pub version: String,
    /// `Release` DWORD, when present (528040 and up is 4.8).
    pub release: Option<u32>,
}

impl FrameworkInfo {
    pub fn major(&self) -> Option<u32> {
        self.version.split('.').next()?.parse().ok()
    }
}

/// Abstraction for the host lookups a conversion depends on (Registry, environment).
/// This allows the whole conversion to run in tests against a `MockSystem`.
pub trait SystemOps: Send + Sync {
    /// Read the installed .NET Framework 4.x version from the Registry.
    fn framework_version(&self) -> Result<FrameworkInfo>;

    /// The search path used to find `csc` by name.
    fn compiler_search_path(&self) -> Option<OsString>;

    /// Framework install roots (`...\Microsoft.NET\Framework64`, `...\Framework`), most preferred first.
    fn framework_roots(&self) -> Vec<PathBuf>;

    /// The restricted environment handed to the compiler.
    fn compiler_env(&self) -> Vec<(String, OsString)>;
}

/// The real host (Production).
pub struct HostSystem;

impl SystemOps for HostSystem {
    #[cfg(windows)]
    fn framework_version(&self) -> Result<FrameworkInfo> {
        use windows_registry::LOCAL_MACHINE;

        let key = LOCAL_MACHINE.open(NDP_V4_FULL_KEY)?;
        let version = key.get_string("Version")?;
        let release = key.get_u32("Release").ok();
        Ok(FrameworkInfo { version, release })
    }

    #[cfg(not(windows))]
    fn framework_version(&self) -> Result<FrameworkInfo> {
        anyhow::bail!("the .NET Framework registry is only available on Windows")
    }

    fn compiler_search_path(&self) -> Option<OsString> {
        std::env::var_os("PATH")
    }

    fn framework_roots(&self) -> Vec<PathBuf> {
        let system_root = std::env::var_os("SystemRoot")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
        let dotnet = system_root.join("Microsoft.NET");
        vec![dotnet.join("Framework64"), dotnet.join("Framework")]
    }

    fn compiler_env(&self) -> Vec<(String, OsString)> {
        COMPILER_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var_os(name).map(|v| (name.to_string(), v)))
            .collect()
    }
}

/// A Mock System for Testing.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockSystem {
    pub framework: Option<FrameworkInfo>,
    pub search_path: Option<OsString>,
    pub roots: Vec<PathBuf>,
    pub env: Vec<(String, OsString)>,
}

#[cfg(test)]
impl MockSystem {
    /// A host with .NET 4.8 installed, no search path, and the real `PATH` passed to the compiler.
    pub fn with_framework() -> Self {
        Self {
            framework: Some(FrameworkInfo { version: "4.8.09037".to_string(), release: Some(528040) }),
            env: std::env::var_os("PATH")
                .map(|p| vec![("PATH".to_string(), p)])
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
impl SystemOps for MockSystem {
    fn framework_version(&self) -> Result<FrameworkInfo> {
        self.framework
            .clone()
            .ok_or_else(|| anyhow::anyhow!("NDP\\v4\\Full not found in mock registry"))
    }

    fn compiler_search_path(&self) -> Option<OsString> {
        self.search_path.clone()
    }

    fn framework_roots(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }

    fn compiler_env(&self) -> Vec<(String, OsString)> {
        self.env.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_major_version() {
        let info = FrameworkInfo { version: "4.8.09037".into(), release: None };
        assert_eq!(info.major(), Some(4));
        let bogus = FrameworkInfo { version: "".into(), release: None };
        assert_eq!(bogus.major(), None);
    }

    #[test]
    fn host_roots_point_at_microsoft_net() {
        let roots = HostSystem.framework_roots();
        assert_eq!(roots.len(), 2);
        assert!(roots[0].ends_with("Framework64"));
        assert!(roots[1].ends_with("Framework"));
    }

    #[test]
    fn host_env_is_restricted() {
        for (name, _) in HostSystem.compiler_env() {
            assert!(COMPILER_ENV_VARS.contains(&name.as_str()));
        }
    }
}
