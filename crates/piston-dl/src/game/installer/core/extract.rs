use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

/// Unpacks a downloaded archive. Called from a blocking thread.
pub trait ArchiveExtractor: Send + Sync {
    fn extract(&self, archive: &Path, target: &Path, exclude: &[String]) -> Result<()>;

    /// Whether `target` already holds every extracted file of `archive`
    fn is_extracted(&self, _archive: &Path, _target: &Path, _exclude: &[String]) -> Result<bool> {
        Ok(false)
    }
}

fn is_excluded(name: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|e| name.starts_with(e.as_str()))
}

/// Default extractor for native jars
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path, target: &Path, exclude: &[String]) -> Result<()> {
        let file = File::open(archive).with_context(|| format!("opening {:?}", archive))?;
        let mut zip = zip::ZipArchive::new(file)
            .with_context(|| format!("reading zip archive {:?}", archive))?;

        std::fs::create_dir_all(target)?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let name = entry.name().to_string();

            // Skip excluded paths (usually META-INF/)
            if is_excluded(&name, exclude) {
                continue;
            }
            if entry.is_dir() {
                continue;
            }

            let Some(relative) = entry.enclosed_name() else {
                log::warn!("Skipping unsafe archive entry {:?} in {:?}", name, archive);
                continue;
            };
            let out_path = target.join(relative);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut out = File::create(&out_path)
                .with_context(|| format!("creating {:?}", out_path))?;
            std::io::copy(&mut entry, &mut out)?;
        }

        log::debug!("Extracted {:?} into {:?}", archive, target);
        Ok(())
    }

    /// Every non-excluded entry exists under `target` with its uncompressed size
    fn is_extracted(&self, archive: &Path, target: &Path, exclude: &[String]) -> Result<bool> {
        let file = File::open(archive).with_context(|| format!("opening {:?}", archive))?;
        let mut zip = zip::ZipArchive::new(file)
            .with_context(|| format!("reading zip archive {:?}", archive))?;

        for i in 0..zip.len() {
            let entry = zip.by_index(i)?;
            if entry.is_dir() || is_excluded(entry.name(), exclude) {
                continue;
            }
            let Some(relative) = entry.enclosed_name() else {
                continue;
            };
            match std::fs::metadata(target.join(relative)) {
                Ok(metadata) if metadata.len() == entry.size() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}
