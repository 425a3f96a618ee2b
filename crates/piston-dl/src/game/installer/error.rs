use std::path::PathBuf;

/// Network-level failure of a single fetch after its retry budget is spent
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request to {url} failed: {cause}")]
    Transport { url: String, cause: String },

    #[error("Transfer of {url} was cancelled")]
    Cancelled { url: String },
}

impl FetchError {
    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            cause: err.to_string(),
        }
    }
}

/// Errors produced while resolving, planning or downloading a version
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Version {id} not found in the version catalogue")]
    VersionNotFound { id: String },

    #[error("Version inheritance cycle: {}", chain.join(" -> "))]
    ManifestCycle { chain: Vec<String> },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Integrity check failed for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Download engine is already running")]
    AlreadyRunning,

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Post-processing of {id} failed: {source}")]
    PostProcess {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type InstallResult<T> = Result<T, InstallError>;

impl InstallError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InstallError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(what: impl Into<String>, source: serde_json::Error) -> Self {
        InstallError::Json {
            what: what.into(),
            source,
        }
    }

    /// Transient failures worth another attempt. A bad download is retried,
    /// it does not necessarily mean the remote copy is corrupt.
    pub fn is_retryable(&self) -> bool {
        match self {
            InstallError::Fetch(FetchError::Cancelled { .. }) => false,
            InstallError::Fetch(_) | InstallError::Integrity { .. } | InstallError::Io { .. } => {
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InstallError::Fetch(FetchError::Cancelled { .. }))
    }
}
