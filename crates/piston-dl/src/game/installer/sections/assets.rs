use crate::game::installer::config::join_url;
use crate::game::installer::core::planner::{is_safe_relative, AssetLayout, FileCandidate};
use crate::game::installer::core::traits::PlanSource;
use crate::game::installer::error::{InstallError, InstallResult};
use crate::game::installer::manifest::{AssetIndexDocument, AssetIndexRef};
use crate::game::installer::types::Section;
use crate::game::installer::VersionContext;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Asset index plus every object it lists
pub struct AssetsSource {
    ctx: Arc<VersionContext>,
    index: OnceCell<Arc<AssetIndexDocument>>,
}

impl AssetsSource {
    pub fn new(ctx: Arc<VersionContext>) -> Self {
        Self {
            ctx,
            index: OnceCell::new(),
        }
    }

    async fn index(&self, index_ref: &AssetIndexRef) -> InstallResult<Arc<AssetIndexDocument>> {
        self.index
            .get_or_try_init(|| async {
                let document = self.ctx.resolver.asset_index(index_ref).await?;
                log::info!(
                    "Asset index {} lists {} objects",
                    index_ref.id,
                    document.objects.len()
                );
                Ok::<_, InstallError>(Arc::new(document))
            })
            .await
            .cloned()
    }

    async fn collect(&self) -> InstallResult<Vec<FileCandidate>> {
        let version = self.ctx.resolved().await?;
        let Some(index_ref) = &version.asset_index else {
            log::warn!("{} declares no asset index, nothing to download", version.id);
            return Ok(Vec::new());
        };

        // The vanilla root of the chain decides how old the client is
        let base_id = version.chain.last().unwrap_or(&version.id);
        let layout = AssetLayout::for_version(version.version_type.as_deref(), base_id);
        let index = self.index(index_ref).await?;
        let paths = &self.ctx.paths;

        let mut candidates = Vec::with_capacity(index.objects.len() + 1);
        candidates.push(
            FileCandidate::new(
                format!("{}.json", index_ref.id),
                index_ref.url.clone(),
                paths.indexes_dir().join(format!("{}.json", index_ref.id)),
            )
            .with_size(index_ref.size)
            .with_sha1(index_ref.sha1.clone()),
        );

        for (name, object) in &index.objects {
            let hash = &object.hash;
            if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                log::warn!("Skipping asset {} with malformed hash {:?}", name, hash);
                continue;
            }

            let destination = match layout {
                AssetLayout::Hashed => paths.object_path(hash),
                AssetLayout::LegacyResources => {
                    if !is_safe_relative(name) {
                        log::warn!("Skipping asset with unsafe name {:?}", name);
                        continue;
                    }
                    paths.resources_dir().join(name)
                }
            };

            candidates.push(
                FileCandidate::new(
                    name.clone(),
                    join_url(
                        &self.ctx.config.resources_url,
                        &format!("{}/{}", &hash[..2], hash),
                    ),
                    destination,
                )
                .with_size(object.size)
                .with_sha1(Some(hash.clone())),
            );
        }

        Ok(candidates)
    }
}

impl PlanSource for AssetsSource {
    fn section(&self) -> Section {
        Section::Assets
    }

    fn candidates(&self) -> BoxFuture<'_, InstallResult<Vec<FileCandidate>>> {
        Box::pin(self.collect())
    }
}
