use crate::game::installer::core::planner::FileCandidate;
use crate::game::installer::core::traits::PlanSource;
use crate::game::installer::error::InstallResult;
use crate::game::installer::types::Section;
use crate::game::installer::VersionContext;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Version documents of the chain and the client jar
pub struct ClientSource {
    ctx: Arc<VersionContext>,
}

impl ClientSource {
    pub fn new(ctx: Arc<VersionContext>) -> Self {
        Self { ctx }
    }

    async fn collect(&self) -> InstallResult<Vec<FileCandidate>> {
        let version = self.ctx.resolved().await?;
        let paths = &self.ctx.paths;
        let mut candidates = Vec::new();

        for source in &version.sources {
            candidates.push(
                FileCandidate::new(
                    format!("{}.json", source.id),
                    source.url.clone(),
                    paths.version_json(&source.id),
                )
                .with_size(source.size)
                .with_sha1(source.sha1.clone()),
            );
        }

        match &version.client {
            Some(client) => {
                // Loader profiles run on the jar of the vanilla version they extend
                let jar_owner = version.chain.last().unwrap_or(&version.id);
                candidates.push(
                    FileCandidate::new(
                        format!("{}.jar", jar_owner),
                        client.url.clone(),
                        paths.client_jar(jar_owner),
                    )
                    .with_size(client.size.unwrap_or(0))
                    .with_sha1(client.sha1.clone()),
                );
            }
            None => log::warn!("{} has no client download", version.id),
        }

        Ok(candidates)
    }
}

impl PlanSource for ClientSource {
    fn section(&self) -> Section {
        Section::Client
    }

    fn candidates(&self) -> BoxFuture<'_, InstallResult<Vec<FileCandidate>>> {
        Box::pin(self.collect())
    }
}
