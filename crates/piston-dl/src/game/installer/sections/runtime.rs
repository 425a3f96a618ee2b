use crate::game::installer::core::planner::{is_safe_relative, DownloadPlan, FileCandidate};
use crate::game::installer::core::traits::PlanSource;
use crate::game::installer::error::{InstallError, InstallResult};
use crate::game::installer::manifest::{RuntimeEntry, RuntimeManifest};
use crate::game::installer::types::{DownloadTask, Section};
use crate::game::installer::VersionContext;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Files of the managed Java runtime the version asks for
pub struct RuntimeSource {
    ctx: Arc<VersionContext>,
    manifest: OnceCell<Option<Arc<RuntimeManifest>>>,
}

impl RuntimeSource {
    pub fn new(ctx: Arc<VersionContext>) -> Self {
        Self {
            ctx,
            manifest: OnceCell::new(),
        }
    }

    async fn component(&self) -> InstallResult<String> {
        Ok(self.ctx.resolved().await?.java_component.clone())
    }

    async fn manifest(&self) -> InstallResult<Option<Arc<RuntimeManifest>>> {
        self.manifest
            .get_or_try_init(|| async {
                let component = self.component().await?;
                let manifest = self
                    .ctx
                    .resolver
                    .runtime_files(&component, &self.ctx.platform)
                    .await?;
                Ok::<_, InstallError>(manifest.map(Arc::new))
            })
            .await
            .cloned()
    }

    async fn collect(&self) -> InstallResult<Vec<FileCandidate>> {
        let Some(manifest) = self.manifest().await? else {
            return Ok(Vec::new());
        };
        let root = self.ctx.paths.runtime_dir(&self.component().await?);

        let mut candidates = Vec::new();
        for (path, entry) in &manifest.files {
            let RuntimeEntry::File {
                downloads,
                executable,
            } = entry
            else {
                continue;
            };
            if !is_safe_relative(path) {
                log::warn!("Skipping runtime file with unsafe path {:?}", path);
                continue;
            }

            let mut candidate = FileCandidate::new(
                path.clone(),
                downloads.raw.url.clone(),
                root.join(path),
            )
            .with_size(downloads.raw.size.unwrap_or(0))
            .with_sha1(downloads.raw.sha1.clone());
            candidate.executable = *executable;
            candidates.push(candidate);
        }

        log::debug!("Runtime {:?} has {} files", root, candidates.len());
        Ok(candidates)
    }

    /// Create the directories and links the manifest lists
    async fn materialize(&self) -> InstallResult<()> {
        let Some(manifest) = self.manifest().await? else {
            return Ok(());
        };
        let root = self.ctx.paths.runtime_dir(&self.component().await?);

        for (path, entry) in &manifest.files {
            if !is_safe_relative(path) {
                continue;
            }
            let location = root.join(path);
            match entry {
                RuntimeEntry::Directory => {
                    tokio::fs::create_dir_all(&location)
                        .await
                        .map_err(|e| InstallError::io(&location, e))?;
                }
                RuntimeEntry::Link { target } => link(&location, target).await?,
                RuntimeEntry::File { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn link(location: &Path, target: &str) -> InstallResult<()> {
    if tokio::fs::symlink_metadata(location).await.is_ok() {
        return Ok(());
    }
    if let Some(parent) = location.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| InstallError::io(parent, e))?;
    }
    tokio::fs::symlink(target, location)
        .await
        .map_err(|e| InstallError::io(location, e))
}

#[cfg(not(unix))]
async fn link(location: &Path, target: &str) -> InstallResult<()> {
    log::debug!("Skipping runtime link {:?} -> {}", location, target);
    Ok(())
}

impl PlanSource for RuntimeSource {
    fn section(&self) -> Section {
        Section::Runtime
    }

    fn candidates(&self) -> BoxFuture<'_, InstallResult<Vec<FileCandidate>>> {
        Box::pin(self.collect())
    }

    fn after_download<'a>(&'a self, task: &'a DownloadTask) -> BoxFuture<'a, InstallResult<()>> {
        Box::pin(async move {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if task.executable {
                    let perms = std::fs::Permissions::from_mode(0o755);
                    tokio::fs::set_permissions(&task.destination, perms)
                        .await
                        .map_err(|e| InstallError::io(&task.destination, e))?;
                }
            }
            #[cfg(not(unix))]
            let _ = task;
            Ok(())
        })
    }

    fn finish<'a>(&'a self, _plan: &'a DownloadPlan) -> BoxFuture<'a, InstallResult<()>> {
        Box::pin(self.materialize())
    }
}
