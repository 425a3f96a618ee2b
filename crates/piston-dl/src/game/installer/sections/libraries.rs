use crate::game::installer::config::join_url;
use crate::game::installer::core::extract::{ArchiveExtractor, ZipExtractor};
use crate::game::installer::core::planner::{
    is_safe_relative, resolve_native_classifier, rules_allow, DownloadPlan, FileCandidate,
};
use crate::game::installer::core::traits::PlanSource;
use crate::game::installer::error::{InstallError, InstallResult};
use crate::game::installer::manifest::{maven_to_path, Artifact, Library};
use crate::game::installer::types::{DownloadTask, ExtractSpec, Section};
use crate::game::installer::VersionContext;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Library jars and native archives allowed on this platform.
/// Natives are unpacked into `natives/<version>` once downloaded.
pub struct LibrariesSource {
    ctx: Arc<VersionContext>,
    extractor: Arc<dyn ArchiveExtractor>,
}

impl LibrariesSource {
    pub fn new(ctx: Arc<VersionContext>) -> Self {
        Self::with_extractor(ctx, Arc::new(ZipExtractor))
    }

    pub fn with_extractor(ctx: Arc<VersionContext>, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        Self { ctx, extractor }
    }

    async fn collect(&self) -> InstallResult<Vec<FileCandidate>> {
        let version = self.ctx.resolved().await?;
        let platform = &self.ctx.platform;
        let features = HashMap::new();
        let natives_dir = self.ctx.paths.natives_dir(&version.id);

        let mut candidates = Vec::new();
        for lib in &version.libraries {
            if let Some(rules) = &lib.rules {
                if !rules_allow(rules, platform, &features) {
                    log::debug!("Skipping library {} (rules disallow this platform)", lib.name);
                    continue;
                }
            }

            let main = lib.downloads.as_ref().and_then(|d| d.artifact.as_ref());
            match main {
                Some(artifact) => self.push_artifact(&mut candidates, lib, &lib.name, artifact),
                // Plain maven entry (loader profiles) without a downloads block
                None if lib.downloads.is_none() && lib.natives.is_none() => {
                    self.push_maven(&mut candidates, lib, &lib.name)
                }
                None => {}
            }

            let Some(classifier) = resolve_native_classifier(lib, platform) else {
                continue;
            };
            let native_id = format!("{}:{}", lib.name, classifier);
            let before = candidates.len();

            let classified = lib
                .downloads
                .as_ref()
                .and_then(|d| d.classifiers.as_ref())
                .and_then(|c| c.get(&classifier));
            match classified {
                Some(artifact) => self.push_artifact(&mut candidates, lib, &native_id, artifact),
                None if lib.downloads.is_none() => self.push_maven(&mut candidates, lib, &native_id),
                None => log::warn!("{} has no download for native {}", lib.name, classifier),
            }

            if candidates.len() > before {
                if let Some(native) = candidates.last_mut() {
                    native.extract = Some(ExtractSpec {
                        target: natives_dir.clone(),
                        exclude: lib
                            .extract
                            .as_ref()
                            .map(|e| e.exclude.clone())
                            .unwrap_or_default(),
                    });
                }
            }
        }

        Ok(candidates)
    }

    fn push_artifact(
        &self,
        out: &mut Vec<FileCandidate>,
        lib: &Library,
        coords: &str,
        artifact: &Artifact,
    ) {
        let path = match &artifact.path {
            Some(path) => path.clone(),
            None => match maven_to_path(coords) {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("Skipping library {}: {}", lib.name, e);
                    return;
                }
            },
        };
        let url = match artifact.url.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                url.to_string()
            }
            // Empty URLs mark files generated locally by loader installers
            Some("") => {
                log::debug!("Library {} has no download URL, skipping", coords);
                return;
            }
            Some(relative) => join_url(self.maven_base(lib), relative),
            None => join_url(self.maven_base(lib), &path),
        };

        self.push(out, coords, url, &path, artifact.size.unwrap_or(0), artifact.sha1.clone());
    }

    fn push_maven(&self, out: &mut Vec<FileCandidate>, lib: &Library, coords: &str) {
        match maven_to_path(coords) {
            Ok(path) => {
                let url = join_url(self.maven_base(lib), &path);
                self.push(out, coords, url, &path, 0, None);
            }
            Err(e) => log::warn!("Skipping library {}: {}", lib.name, e),
        }
    }

    fn push(
        &self,
        out: &mut Vec<FileCandidate>,
        id: &str,
        url: String,
        path: &str,
        size: u64,
        sha1: Option<String>,
    ) {
        if !is_safe_relative(path) {
            log::warn!("Skipping library {} with unsafe path {:?}", id, path);
            return;
        }
        out.push(
            FileCandidate::new(id, url, self.ctx.paths.libraries_dir().join(path))
                .with_size(size)
                .with_sha1(sha1),
        );
    }

    /// Unpack one native archive on the blocking pool. With `only_if_stale`
    /// an archive whose files are all in place is left alone.
    async fn unpack(
        &self,
        id: &str,
        archive: PathBuf,
        spec: ExtractSpec,
        only_if_stale: bool,
    ) -> InstallResult<bool> {
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            if only_if_stale && extractor.is_extracted(&archive, &spec.target, &spec.exclude)? {
                return Ok(false);
            }
            log::debug!("Extracting natives from {:?} into {:?}", archive, spec.target);
            extractor.extract(&archive, &spec.target, &spec.exclude)?;
            Ok(true)
        })
        .await
        .map_err(|e| InstallError::PostProcess {
            id: id.to_string(),
            source: anyhow::anyhow!("extraction task failed: {}", e),
        })?
        .map_err(|source| InstallError::PostProcess {
            id: id.to_string(),
            source,
        })
    }

    /// Natives that were already downloaded still have to be unpacked for
    /// this version, e.g. a jar shared with another version or a deleted
    /// natives directory.
    async fn unpack_present(&self) -> InstallResult<()> {
        let mut unpacked = 0;
        for candidate in self.collect().await? {
            let Some(spec) = candidate.extract else {
                continue;
            };
            // Files that failed to download are already reported
            if !tokio::fs::try_exists(&candidate.destination)
                .await
                .unwrap_or(false)
            {
                continue;
            }
            if self
                .unpack(&candidate.id, candidate.destination, spec, true)
                .await?
            {
                unpacked += 1;
            }
        }
        if unpacked > 0 {
            log::info!("Unpacked {} native archives already on disk", unpacked);
        }
        Ok(())
    }

    fn maven_base<'a>(&'a self, lib: &'a Library) -> &'a str {
        lib.url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(self.ctx.config.libraries_url.as_str())
    }
}

impl PlanSource for LibrariesSource {
    fn section(&self) -> Section {
        Section::Libraries
    }

    fn candidates(&self) -> BoxFuture<'_, InstallResult<Vec<FileCandidate>>> {
        Box::pin(self.collect())
    }

    fn after_download<'a>(&'a self, task: &'a DownloadTask) -> BoxFuture<'a, InstallResult<()>> {
        Box::pin(async move {
            let Some(spec) = task.extract.clone() else {
                return Ok(());
            };
            self.unpack(&task.id, task.destination.clone(), spec, false)
                .await
                .map(|_| ())
        })
    }

    fn finish<'a>(&'a self, _plan: &'a DownloadPlan) -> BoxFuture<'a, InstallResult<()>> {
        Box::pin(self.unpack_present())
    }
}
