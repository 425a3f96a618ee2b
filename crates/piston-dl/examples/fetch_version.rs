use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use piston_dl::game::installer::{download_version, EngineConfig, EngineEvent, EngineListener};

struct ConsoleListener;

impl EngineListener for ConsoleListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Start { section } => println!("[{}] start", section),
            EngineEvent::Paused { section } => println!("[{}] paused", section),
            EngineEvent::Resumed { section } => println!("[{}] resumed", section),
            EngineEvent::Stopped { section } => println!("[{}] stopped", section),
            EngineEvent::Done { section, failed } => {
                println!("[{}] done ({} failed)", section, failed)
            }
            EngineEvent::FileStart { .. } | EngineEvent::FileEnd { .. } => {}
            EngineEvent::Bytes {
                section,
                downloaded,
                total,
                ..
            } => {
                if *total > 0 {
                    println!(
                        "[{}] {}/{} bytes ({:.1}%)",
                        section,
                        downloaded,
                        total,
                        *downloaded as f64 * 100.0 / *total as f64
                    );
                }
            }
            EngineEvent::SectionError { section, id, error } => {
                println!("[{}] FAILED {}: {}", section, id, error)
            }
            EngineEvent::ForceInstallChanged { section, force } => {
                println!("[{}] force install = {}", section, force)
            }
        }
    }
}

/// Usage: fetch_version [version] [target dir] [engine config json]
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let version = args.next().unwrap_or_else(|| "1.20.1".to_string());
    let root = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("piston-dl"));
    let config = match args.next() {
        Some(path) => EngineConfig::from_json_file(&PathBuf::from(path))?,
        None => EngineConfig::default(),
    };

    println!("Downloading {} into {}", version, root.display());
    let reports = download_version(&version, &root, config, Arc::new(ConsoleListener)).await?;

    let mut failed = false;
    for report in &reports {
        println!(
            "{:>9}: {:?}, {} downloaded, {} already present, {}/{} bytes",
            report.section.as_str(),
            report.status,
            report.planned_files,
            report.satisfied_files,
            report.downloaded_bytes,
            report.total_bytes
        );
        for failure in &report.failures {
            failed = true;
            println!("           {} ({} attempts): {}", failure.id, failure.attempts, failure.error);
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
