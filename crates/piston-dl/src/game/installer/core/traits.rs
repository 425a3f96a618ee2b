use crate::game::installer::core::planner::{DownloadPlan, FileCandidate};
use crate::game::installer::error::InstallResult;
use crate::game::installer::types::{DownloadTask, Section};
use futures::future::BoxFuture;

/// Supplies one section's file list and post-processing to a `DownloadEngine`.
/// Each content category (assets, libraries, client, runtime) implements
/// its own source; the engine itself is generic.
pub trait PlanSource: Send + Sync {
    fn section(&self) -> Section;

    /// Every file this section needs, in download order. Resolution
    /// failures surface here and abort the run.
    fn candidates(&self) -> BoxFuture<'_, InstallResult<Vec<FileCandidate>>>;

    /// Runs after a file has been written and verified
    fn after_download<'a>(&'a self, _task: &'a DownloadTask) -> BoxFuture<'a, InstallResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Runs once after every task settled, before `Done`
    fn finish<'a>(&'a self, _plan: &'a DownloadPlan) -> BoxFuture<'a, InstallResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
