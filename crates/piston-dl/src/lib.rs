//! Download engine for Minecraft game content.
//!
//! Resolves a version through the Mojang catalogue, plans which client,
//! library, asset and Java runtime files are missing locally and downloads
//! them under bounded concurrency with pause/resume/stop support.

pub mod game;
pub mod utils;

pub use game::installer::{
    download_version, DownloadEngine, EngineConfig, EngineEvent, EngineListener, InstallError,
    RunReport, Section, VersionContext,
};
