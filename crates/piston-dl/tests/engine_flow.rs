mod common;

use common::{config, drain, requests_to, total_requests, wait_for_requests, StaticFiles};
use piston_dl::game::installer::{
    ContentFetcher, DownloadEngine, EngineConfig, EngineEvent, EngineStatus, FileCandidate,
    RunStatus, Section,
};
use piston_dl::utils::hash::sha1_hex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine(files: Vec<FileCandidate>, config: &EngineConfig) -> DownloadEngine {
    let fetcher = ContentFetcher::new(config).unwrap();
    let source = Arc::new(StaticFiles {
        section: Section::Assets,
        files,
    });
    DownloadEngine::new(source, fetcher, config).unwrap()
}

fn candidate(server: &MockServer, dir: &Path, name: &str, size: u64) -> FileCandidate {
    FileCandidate::new(name, format!("{}/{}", server.uri(), name), dir.join(name)).with_size(size)
}

async fn serve(server: &MockServer, name: &str, body: Vec<u8>, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body).set_delay(delay))
        .mount(server)
        .await;
}

fn bytes_sum(events: &[EngineEvent]) -> u64 {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Bytes { delta, .. } => Some(*delta),
            _ => None,
        })
        .sum()
}

fn count<F: Fn(&EngineEvent) -> bool>(events: &[EngineEvent], f: F) -> usize {
    events.iter().filter(|e| f(e)).count()
}

#[tokio::test]
async fn present_files_are_credited_and_only_missing_ones_fetched() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), vec![1u8; 10]).unwrap();
    std::fs::write(dir.path().join("b"), vec![2u8; 20]).unwrap();
    serve(&server, "c", vec![3u8; 30], Duration::ZERO).await;

    let config = config(&server);
    let engine = engine(
        vec![
            candidate(&server, dir.path(), "a", 10),
            candidate(&server, dir.path(), "b", 20),
            candidate(&server, dir.path(), "c", 30),
        ],
        &config,
    );
    let mut rx = engine.subscribe_channel();

    assert_eq!(engine.total_bytes().await.unwrap(), 60);

    let report = engine.start().await.unwrap();
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.total_bytes, 60);
    assert_eq!(report.downloaded_bytes, 60);
    assert_eq!(report.planned_files, 1);
    assert_eq!(report.satisfied_files, 2);

    let events = drain(&mut rx);
    assert_eq!(bytes_sum(&events), 60);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::Done { failed: 0, .. })),
        1
    );
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::FileStart { .. })),
        1
    );
    assert!(events.contains(&EngineEvent::FileEnd {
        section: Section::Assets,
        id: "c".into()
    }));

    // Progress never goes backwards and never passes the total
    let mut last = 0;
    for event in &events {
        if let EngineEvent::Bytes {
            downloaded, total, ..
        } = event
        {
            assert!(*downloaded >= last);
            assert!(*downloaded <= *total);
            last = *downloaded;
        }
    }

    assert_eq!(total_requests(&server).await, 1);
    assert_eq!(std::fs::read(dir.path().join("c")).unwrap(), vec![3u8; 30]);
    assert_eq!(engine.status(), EngineStatus::Done);
}

#[tokio::test]
async fn planning_is_idempotent_and_force_covers_everything() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    for name in ["x", "y", "z"] {
        std::fs::write(dir.path().join(name), vec![0u8; 8]).unwrap();
        serve(&server, name, vec![9u8; 8], Duration::ZERO).await;
    }

    let config = config(&server);
    let files: Vec<_> = ["x", "y", "z"]
        .iter()
        .map(|n| candidate(&server, dir.path(), n, 8))
        .collect();
    let engine = engine(files, &config);

    assert_eq!(engine.total_bytes().await.unwrap(), 24);
    assert_eq!(engine.total_bytes().await.unwrap(), 24);

    let report = engine.start().await.unwrap();
    assert_eq!(report.planned_files, 0);
    assert_eq!(report.downloaded_bytes, 24);
    assert_eq!(total_requests(&server).await, 0);

    let mut rx = engine.subscribe_channel();
    engine.set_force_install(true);
    let report = engine.start().await.unwrap();
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.planned_files, 3);
    assert_eq!(report.total_bytes, 24);
    assert_eq!(total_requests(&server).await, 3);
    assert_eq!(std::fs::read(dir.path().join("y")).unwrap(), vec![9u8; 8]);

    let events = drain(&mut rx);
    assert_eq!(
        events.first(),
        Some(&EngineEvent::ForceInstallChanged {
            section: Section::Assets,
            force: true
        })
    );
}

#[tokio::test]
async fn stop_discards_queued_tasks() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let names = ["f1", "f2", "f3", "f4", "f5", "f6"];
    for name in names {
        serve(&server, name, vec![7u8; 16], Duration::from_millis(500)).await;
    }

    let config = EngineConfig {
        concurrency: 2,
        ..config(&server)
    };
    let engine = engine(
        names
            .iter()
            .map(|n| candidate(&server, dir.path(), n, 16))
            .collect(),
        &config,
    );
    let mut rx = engine.subscribe_channel();

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    wait_for_requests(&server, 2).await;
    engine.stop();
    engine.stop();

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::Stopped);
    assert_eq!(engine.status(), EngineStatus::Stopped);
    assert_eq!(total_requests(&server).await, 2);
    for name in names {
        assert!(!dir.path().join(name).exists(), "{} was written", name);
        assert!(!dir.path().join(format!("{}.part", name)).exists());
    }

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::Stopped { .. })),
        1
    );
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::Done { .. })), 0);
}

#[tokio::test]
async fn pause_holds_new_transfers_until_resume() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let names = ["p1", "p2", "p3", "p4"];
    for name in names {
        serve(&server, name, vec![5u8; 12], Duration::from_millis(200)).await;
    }

    let config = EngineConfig {
        concurrency: 1,
        ..config(&server)
    };
    let engine = engine(
        names
            .iter()
            .map(|n| candidate(&server, dir.path(), n, 12))
            .collect(),
        &config,
    );
    let mut rx = engine.subscribe_channel();

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });

    wait_for_requests(&server, 1).await;
    assert!(engine.pause());
    assert!(!engine.pause());

    // The in-flight transfer completes, nothing new starts
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(total_requests(&server).await, 1);
    assert_eq!(engine.status(), EngineStatus::Paused);
    assert!(dir.path().join("p1").exists());

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status, EngineStatus::Paused);
    assert_eq!(snapshot.total_bytes, 48);
    assert_eq!(snapshot.downloaded_bytes, 12);

    assert!(engine.resume());
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(total_requests(&server).await, 4);
    for name in names {
        assert!(dir.path().join(name).exists());
    }

    let events = drain(&mut rx);
    let paused_at = events
        .iter()
        .position(|e| matches!(e, EngineEvent::Paused { .. }))
        .unwrap();
    let resumed_at = events
        .iter()
        .position(|e| matches!(e, EngineEvent::Resumed { .. }))
        .unwrap();
    assert!(paused_at < resumed_at);
    // No file starts between pause and resume
    assert!(!events[paused_at..resumed_at]
        .iter()
        .any(|e| matches!(e, EngineEvent::FileStart { .. })));
}

#[tokio::test]
async fn exhausted_retries_skip_the_file_and_finish_degraded() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    serve(&server, "good", vec![1u8; 4], Duration::ZERO).await;

    let config = EngineConfig {
        max_retries: 2,
        fetch_retries: 0,
        ..config(&server)
    };
    let engine = engine(
        vec![
            candidate(&server, dir.path(), "bad", 4),
            candidate(&server, dir.path(), "good", 4),
        ],
        &config,
    );
    let mut rx = engine.subscribe_channel();

    let report = engine.start().await.unwrap();
    assert_eq!(report.status, RunStatus::DoneWithErrors);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, "bad");
    assert_eq!(report.failures[0].attempts, 3);
    assert!(report.failures[0].error.contains("500"));
    assert_eq!(requests_to(&server, "/bad").await, 3);
    assert!(dir.path().join("good").exists());
    assert!(!dir.path().join("bad").exists());

    let events = drain(&mut rx);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::SectionError { id, .. } if id == "bad")),
        1
    );
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::Done { failed: 1, .. })),
        1
    );
    assert!(bytes_sum(&events) <= report.total_bytes);
}

#[tokio::test]
async fn fetch_level_retry_recovers_transient_errors() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, "flaky", vec![4u8; 6], Duration::ZERO).await;

    let config = EngineConfig {
        fetch_retries: 1,
        ..config(&server)
    };
    let engine = engine(vec![candidate(&server, dir.path(), "flaky", 6)], &config);

    let report = engine.start().await.unwrap();
    assert_eq!(report.status, RunStatus::Done);
    assert!(report.failures.is_empty());
    assert_eq!(requests_to(&server, "/flaky").await, 2);
    assert_eq!(std::fs::read(dir.path().join("flaky")).unwrap(), vec![4u8; 6]);
}

#[tokio::test]
async fn corrupt_download_is_rejected() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "obj", b"tampered".to_vec(), Duration::ZERO).await;

    let config = config(&server);
    let file = candidate(&server, dir.path(), "obj", 8).with_sha1(Some(sha1_hex(b"original")));
    let engine = engine(vec![file], &config);

    let report = engine.start().await.unwrap();
    assert_eq!(report.status, RunStatus::DoneWithErrors);
    assert!(report.failures[0].error.contains("Integrity check failed"));
    assert!(!dir.path().join("obj").exists());
    assert!(!dir.path().join("obj.part").exists());
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "slow", vec![0u8; 4], Duration::from_millis(300)).await;

    let config = config(&server);
    let engine = engine(vec![candidate(&server, dir.path(), "slow", 4)], &config);

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    wait_for_requests(&server, 1).await;

    assert!(matches!(
        engine.start().await,
        Err(piston_dl::InstallError::AlreadyRunning)
    ));
    assert_eq!(handle.await.unwrap().unwrap().status, RunStatus::Done);
}

#[tokio::test]
async fn restart_waits_for_the_stopped_run_to_unwind() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "slow", vec![1u8; 10], Duration::from_millis(600)).await;

    let config = config(&server);
    let engine = engine(vec![candidate(&server, dir.path(), "slow", 10)], &config);
    let mut rx = engine.subscribe_channel();

    let runner = engine.clone();
    let first = tokio::spawn(async move { runner.start().await });
    wait_for_requests(&server, 1).await;

    engine.stop();
    assert!(matches!(
        engine.start().await,
        Err(piston_dl::InstallError::AlreadyRunning)
    ));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::Stopped);
    assert_eq!(engine.status(), EngineStatus::Stopped);
    assert!(!dir.path().join("slow").exists());
    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::Done { .. })), 0);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::FileEnd { .. })),
        0
    );

    let report = engine.start().await.unwrap();
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.total_bytes, 10);
    assert_eq!(report.downloaded_bytes, 10);

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, EngineEvent::Done { .. })), 1);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::FileEnd { .. })),
        1
    );
    for event in &events {
        if let EngineEvent::Bytes {
            downloaded, total, ..
        } = event
        {
            assert!(downloaded <= total);
        }
    }
}

#[tokio::test]
async fn stop_interrupts_a_stalled_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    serve(&server, "stalled", vec![0u8; 4], Duration::from_secs(10)).await;

    let config = EngineConfig {
        request_timeout_secs: 60,
        ..config(&server)
    };
    let engine = engine(vec![candidate(&server, dir.path(), "stalled", 4)], &config);

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    wait_for_requests(&server, 1).await;

    let stopped_at = Instant::now();
    engine.stop();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not end after stop")
        .unwrap()
        .unwrap();

    assert_eq!(report.status, RunStatus::Stopped);
    assert!(stopped_at.elapsed() < Duration::from_secs(2));
    assert!(!dir.path().join("stalled").exists());
    assert!(!dir.path().join("stalled.part").exists());
}

#[tokio::test]
async fn stop_interrupts_retry_backoff() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = EngineConfig {
        fetch_retries: 3,
        retry_delay_ms: 20_000,
        ..config(&server)
    };
    let engine = engine(vec![candidate(&server, dir.path(), "bad", 4)], &config);

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    wait_for_requests(&server, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.stop();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not end after stop")
        .unwrap()
        .unwrap();

    assert_eq!(report.status, RunStatus::Stopped);
    assert!(report.failures.is_empty());
    assert_eq!(requests_to(&server, "/bad").await, 1);
}

#[tokio::test]
async fn pause_holds_fetch_level_retries() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/bad"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let config = EngineConfig {
        concurrency: 1,
        fetch_retries: 3,
        ..config(&server)
    };
    let engine = engine(vec![candidate(&server, dir.path(), "bad", 4)], &config);

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.start().await });
    wait_for_requests(&server, 1).await;
    assert!(engine.pause());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(requests_to(&server, "/bad").await, 1);

    assert!(engine.resume());
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::DoneWithErrors);
    assert_eq!(requests_to(&server, "/bad").await, 4);
}

#[tokio::test]
async fn failed_files_report_their_partial_progress() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    // Six bytes of a declared ten, and not the expected content
    serve(&server, "short", b"broken".to_vec(), Duration::ZERO).await;
    serve(&server, "ok", vec![2u8; 5], Duration::ZERO).await;

    let config = EngineConfig {
        max_retries: 1,
        ..config(&server)
    };
    let short = candidate(&server, dir.path(), "short", 10)
        .with_sha1(Some(sha1_hex(b"0123456789")));
    let engine = engine(
        vec![short, candidate(&server, dir.path(), "ok", 5)],
        &config,
    );

    let report = engine.start().await.unwrap();
    assert_eq!(report.status, RunStatus::DoneWithErrors);
    assert_eq!(requests_to(&server, "/short").await, 2);

    let failure = &report.failures[0];
    assert_eq!(failure.id, "short");
    assert_eq!(failure.size, 10);
    assert_eq!(failure.credited_bytes, 6);

    assert_eq!(report.total_bytes, 15);
    assert_eq!(report.downloaded_bytes, 11);
    assert_eq!(report.failed_bytes(), 10);
    assert_eq!(
        report.completed_bytes(),
        report.total_bytes - report.failed_bytes()
    );
}
