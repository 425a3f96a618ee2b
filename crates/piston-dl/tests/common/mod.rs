#![allow(dead_code)]

use futures::future::BoxFuture;
use piston_dl::game::installer::{
    EngineConfig, EngineEvent, FileCandidate, InstallResult, PlanSource, Section,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::MockServer;

/// Plan source over a fixed file list
pub struct StaticFiles {
    pub section: Section,
    pub files: Vec<FileCandidate>,
}

impl PlanSource for StaticFiles {
    fn section(&self) -> Section {
        self.section
    }

    fn candidates(&self) -> BoxFuture<'_, InstallResult<Vec<FileCandidate>>> {
        let files = self.files.clone();
        Box::pin(async move { Ok(files) })
    }
}

/// Every endpoint pointed at `server`, no retry delay
pub fn config(server: &MockServer) -> EngineConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let base = server.uri();
    EngineConfig {
        concurrency: 4,
        max_retries: 0,
        fetch_retries: 0,
        retry_delay_ms: 0,
        request_timeout_secs: 10,
        manifest_url: format!("{}/mc/game/version_manifest_v2.json", base),
        resources_url: format!("{}/resources", base),
        libraries_url: format!("{}/libraries", base),
        runtime_manifest_url: format!("{}/runtime/all.json", base),
        ..Default::default()
    }
}

pub fn drain(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn requests_to(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == path)
        .count()
}

pub async fn total_requests(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

/// Poll until the server has seen at least `n` requests
pub async fn wait_for_requests(server: &MockServer, n: usize) {
    for _ in 0..200 {
        if total_requests(server).await >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never received {} requests", n);
}
