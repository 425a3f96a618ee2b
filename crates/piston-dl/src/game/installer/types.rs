use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Content category handled by one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Assets,
    Libraries,
    Client,
    Runtime,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Client,
        Section::Libraries,
        Section::Assets,
        Section::Runtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Assets => "assets",
            Section::Libraries => "libraries",
            Section::Client => "client",
            Section::Runtime => "runtime",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native archive extraction request attached to a library task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSpec {
    pub target: PathBuf,
    pub exclude: Vec<String>,
}

/// One file to fetch. Created by the planner, consumed by the engine.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub section: Section,
    pub id: String,
    pub url: String,
    pub destination: PathBuf,
    /// Declared size in bytes, 0 when the manifest does not say
    pub size: u64,
    pub sha1: Option<String>,
    /// Failed attempts so far
    pub attempts: u32,
    pub executable: bool,
    pub extract: Option<ExtractSpec>,
    /// Bytes of this file already reported as progress
    pub(crate) credited: u64,
}

/// Lifecycle and progress notifications emitted by a `DownloadEngine`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Start {
        section: Section,
    },
    Paused {
        section: Section,
    },
    Resumed {
        section: Section,
    },
    Stopped {
        section: Section,
    },
    /// Emitted once per run; `failed` counts files given up on
    Done {
        section: Section,
        failed: usize,
    },
    FileStart {
        section: Section,
        id: String,
        size: u64,
    },
    FileEnd {
        section: Section,
        id: String,
    },
    Bytes {
        section: Section,
        delta: u64,
        downloaded: u64,
        total: u64,
    },
    SectionError {
        section: Section,
        id: String,
        error: String,
    },
    ForceInstallChanged {
        section: Section,
        force: bool,
    },
}

/// Observer registered on an engine
pub trait EngineListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

impl<F> EngineListener for F
where
    F: Fn(&EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) {
        self(event)
    }
}

/// On-disk layout rooted at the launcher data directory
#[derive(Debug, Clone)]
pub struct InstallPaths {
    root: PathBuf,
}

impl InstallPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join("assets")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.assets_dir().join("objects")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.assets_dir().join("indexes")
    }

    /// Flat pre-1.6 resources directory
    pub fn resources_dir(&self) -> PathBuf {
        self.root.join("resources")
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join("libraries")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn version_json(&self, version_id: &str) -> PathBuf {
        self.versions_dir()
            .join(version_id)
            .join(format!("{}.json", version_id))
    }

    pub fn client_jar(&self, version_id: &str) -> PathBuf {
        self.versions_dir()
            .join(version_id)
            .join(format!("{}.jar", version_id))
    }

    pub fn natives_dir(&self, version_id: &str) -> PathBuf {
        self.root.join("natives").join(version_id)
    }

    /// `runtime/java-<component>`; components already prefixed with
    /// `java-` (e.g. "java-runtime-gamma") are used as is.
    pub fn runtime_dir(&self, component: &str) -> PathBuf {
        let name = if component.starts_with("java-") {
            component.to_string()
        } else {
            format!("java-{}", component)
        };
        self.root.join("runtime").join(name)
    }

    /// Content-addressed location of an asset object
    pub fn object_path(&self, hash: &str) -> PathBuf {
        self.objects_dir().join(&hash[..2.min(hash.len())]).join(hash)
    }
}

/// Operating system types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    Windows,
    WindowsArm64,
    MacOS,
    MacOSArm64,
    Linux,
    LinuxArm32,
    LinuxArm64,
}

impl OsType {
    /// Detect the current OS
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            if cfg!(target_arch = "aarch64") {
                OsType::WindowsArm64
            } else {
                OsType::Windows
            }
        } else if cfg!(target_os = "macos") {
            if cfg!(target_arch = "aarch64") {
                OsType::MacOSArm64
            } else {
                OsType::MacOS
            }
        } else if cfg!(target_arch = "aarch64") {
            OsType::LinuxArm64
        } else if cfg!(target_arch = "arm") {
            OsType::LinuxArm32
        } else {
            OsType::Linux
        }
    }

    /// Get the OS name as a string (for rule matching)
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Windows | OsType::WindowsArm64 => "windows",
            OsType::Linux | OsType::LinuxArm32 | OsType::LinuxArm64 => "linux",
            OsType::MacOS | OsType::MacOSArm64 => "osx",
        }
    }
}

/// Architecture types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X64,
    X86,
    Arm64,
    Arm32,
}

impl Arch {
    /// Detect the current architecture
    pub fn current() -> Self {
        if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else if cfg!(target_arch = "arm") {
            Arch::Arm32
        } else if cfg!(target_arch = "x86") {
            Arch::X86
        } else {
            Arch::X64
        }
    }

    /// Name used by `os.arch` in library rules
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X64 => "x86_64",
            Arch::X86 => "x86",
            Arch::Arm64 => "arm64",
            Arch::Arm32 => "arm32",
        }
    }

    /// Replacement for `${arch}` in native classifiers
    pub fn bits(&self) -> &'static str {
        match self {
            Arch::X64 | Arch::Arm64 => "64",
            Arch::X86 | Arch::Arm32 => "32",
        }
    }
}

/// Host description used when evaluating manifest rules
#[derive(Debug, Clone)]
pub struct Platform {
    pub os: OsType,
    pub arch: Arch,
    pub os_version: Option<String>,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            os: OsType::current(),
            arch: Arch::current(),
            os_version: crate::utils::platform::os_version(),
        }
    }

    pub fn new(os: OsType, arch: Arch) -> Self {
        Self {
            os,
            arch,
            os_version: None,
        }
    }

    /// Key of the Mojang Java runtime manifest for this host
    pub fn runtime_key(&self) -> Option<&'static str> {
        match (self.os, self.arch) {
            (OsType::Windows, Arch::X86) => Some("windows-x86"),
            (OsType::Windows, _) => Some("windows-x64"),
            (OsType::WindowsArm64, _) => Some("windows-arm64"),
            (OsType::MacOS, _) => Some("mac-os"),
            (OsType::MacOSArm64, _) => Some("mac-os-arm64"),
            (OsType::Linux, Arch::X86) => Some("linux-i386"),
            (OsType::Linux, _) => Some("linux"),
            (OsType::LinuxArm32, _) | (OsType::LinuxArm64, _) => None,
        }
    }
}
