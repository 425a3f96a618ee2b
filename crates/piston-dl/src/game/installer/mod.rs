pub mod config;
pub mod core;
pub mod error;
pub mod manifest;
pub mod sections;
pub mod types;

pub use config::EngineConfig;
pub use self::core::engine::{
    DownloadEngine, EngineSnapshot, EngineStatus, FileFailure, ListenerId, RunReport, RunStatus,
};
pub use self::core::fetcher::ContentFetcher;
pub use self::core::limiter::TaskLimiter;
pub use self::core::planner::{DownloadPlan, DownloadPlanner, FileCandidate};
pub use self::core::resolver::{ManifestResolver, ResolvedVersion};
pub use self::core::traits::PlanSource;
pub use error::{FetchError, InstallError, InstallResult};
pub use types::{EngineEvent, EngineListener, InstallPaths, Platform, Section};

use sections::{AssetsSource, ClientSource, LibrariesSource, RuntimeSource};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Everything the four section engines of one version share: the
/// on-disk layout, the HTTP client and the resolved version, which is
/// computed once and reused by every section.
pub struct VersionContext {
    pub version_id: String,
    pub paths: InstallPaths,
    pub platform: Platform,
    pub config: EngineConfig,
    pub fetcher: ContentFetcher,
    pub resolver: ManifestResolver,
    resolved: OnceCell<Arc<ResolvedVersion>>,
}

impl VersionContext {
    pub fn new(
        version_id: impl Into<String>,
        root: impl Into<PathBuf>,
        config: EngineConfig,
    ) -> InstallResult<Arc<Self>> {
        Self::with_platform(version_id, root, Platform::current(), config)
    }

    pub fn with_platform(
        version_id: impl Into<String>,
        root: impl Into<PathBuf>,
        platform: Platform,
        config: EngineConfig,
    ) -> InstallResult<Arc<Self>> {
        config.validate()?;
        let paths = InstallPaths::new(root);
        let fetcher = ContentFetcher::new(&config)?;
        let resolver = ManifestResolver::new(
            fetcher.clone(),
            paths.clone(),
            config.manifest_url.clone(),
            config.runtime_manifest_url.clone(),
        );

        Ok(Arc::new(Self {
            version_id: version_id.into(),
            paths,
            platform,
            config,
            fetcher,
            resolver,
            resolved: OnceCell::new(),
        }))
    }

    /// The merged version, resolved on first use
    pub async fn resolved(&self) -> InstallResult<Arc<ResolvedVersion>> {
        self.resolved
            .get_or_try_init(|| async {
                let resolved = self.resolver.resolve(&self.version_id).await?;
                Ok::<_, InstallError>(Arc::new(resolved))
            })
            .await
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn set_resolved(&self, version: ResolvedVersion) {
        let _ = self.resolved.set(Arc::new(version));
    }
}

/// Engine for one section of `ctx`
pub fn engine_for(ctx: &Arc<VersionContext>, section: Section) -> InstallResult<DownloadEngine> {
    let source: Arc<dyn PlanSource> = match section {
        Section::Assets => Arc::new(AssetsSource::new(ctx.clone())),
        Section::Libraries => Arc::new(LibrariesSource::new(ctx.clone())),
        Section::Client => Arc::new(ClientSource::new(ctx.clone())),
        Section::Runtime => Arc::new(RuntimeSource::new(ctx.clone())),
    };
    DownloadEngine::new(source, ctx.fetcher.clone(), &ctx.config)
}

/// Resolve `version_id` and download all of its sections into `root`,
/// the four engines running side by side.
///
/// Resolution errors are returned before anything is downloaded. Per-file
/// failures are reported in each section's `RunReport`.
pub async fn download_version(
    version_id: &str,
    root: impl Into<PathBuf>,
    config: EngineConfig,
    listener: Arc<dyn EngineListener>,
) -> InstallResult<Vec<RunReport>> {
    let ctx = VersionContext::new(version_id, root, config)?;
    let resolved = ctx.resolved().await?;
    log::info!(
        "Downloading {} into {:?} ({} libraries)",
        resolved.id,
        ctx.paths.root(),
        resolved.libraries.len()
    );

    let engines = Section::ALL
        .iter()
        .map(|section| engine_for(&ctx, *section))
        .collect::<InstallResult<Vec<_>>>()?;
    for engine in &engines {
        engine.subscribe(listener.clone());
    }

    futures::future::join_all(engines.iter().map(|engine| engine.start()))
        .await
        .into_iter()
        .collect()
}
