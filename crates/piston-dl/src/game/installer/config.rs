//! Centralized engine settings.
//! Defaults mirror the official launcher endpoints; every value can be
//! overridden through `EngineConfig`, either in code or from a JSON file.

use super::error::{InstallError, InstallResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// URL Constants
pub const VANILLA_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
pub const RESOURCES_URL: &str = "https://resources.download.minecraft.net/";
pub const LIBRARIES_URL: &str = "https://libraries.minecraft.net/";
pub const JAVA_RUNTIME_MANIFEST_URL: &str = "https://piston-meta.mojang.com/v1/products/java-runtime/2ec0cc96c44e5a76b9c8b7c39df7210883d12871/all.json";

pub const REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_FETCH_RETRIES: u32 = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of files downloading at once per engine
    pub concurrency: usize,
    /// Engine-level retries per file (task is re-queued at the back)
    pub max_retries: u32,
    /// Fetch-level retries per request, independent of `max_retries`
    pub fetch_retries: u32,
    /// Base delay between fetch retries; attempt `n` waits `n * delay`
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Hash files already on disk instead of trusting their size
    pub verify_hashes: bool,
    pub user_agent: String,
    pub manifest_url: String,
    pub resources_url: String,
    pub libraries_url: String,
    pub runtime_manifest_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            fetch_retries: DEFAULT_FETCH_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            verify_hashes: false,
            user_agent: format!("piston-dl/{}", env!("CARGO_PKG_VERSION")),
            manifest_url: VANILLA_MANIFEST_URL.to_string(),
            resources_url: RESOURCES_URL.to_string(),
            libraries_url: LIBRARIES_URL.to_string(),
            runtime_manifest_url: JAVA_RUNTIME_MANIFEST_URL.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load settings from a JSON file. Missing keys fall back to defaults.
    pub fn from_json_file(path: &Path) -> InstallResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| InstallError::io(path, e))?;
        let config: EngineConfig = serde_json::from_str(&data)
            .map_err(|e| InstallError::json(format!("engine config {:?}", path), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> InstallResult<()> {
        if self.concurrency < 1 {
            return Err(InstallError::Configuration(format!(
                "concurrency must be at least 1, got {}",
                self.concurrency
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(InstallError::Configuration(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        for (name, url) in [
            ("manifestUrl", &self.manifest_url),
            ("resourcesUrl", &self.resources_url),
            ("librariesUrl", &self.libraries_url),
            ("runtimeManifestUrl", &self.runtime_manifest_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(InstallError::Configuration(format!(
                    "{} must be an http(s) URL, got {:?}",
                    name, url
                )));
            }
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Join a base URL and a relative path with exactly one slash between them
pub(crate) fn join_url(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{}{}", base, rel)
    } else {
        format!("{}/{}", base, rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = EngineConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(InstallError::Configuration(_))
        ));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "concurrency": 3, "verifyHashes": true }"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.concurrency, 3);
        assert!(config.verify_hashes);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.manifest_url, VANILLA_MANIFEST_URL);
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("https://a.net/", "x/y"), "https://a.net/x/y");
        assert_eq!(join_url("https://a.net", "/x/y"), "https://a.net/x/y");
    }
}
