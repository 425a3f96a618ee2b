use crate::game::installer::manifest::{Library, Rule, RuleAction};
use crate::game::installer::types::{DownloadTask, ExtractSpec, Platform, Section};
use crate::utils::hash::{calculate_sha1_async, digest_matches};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

/// A file a section wants on disk, before the presence diff
#[derive(Debug, Clone)]
pub struct FileCandidate {
    pub id: String,
    pub url: String,
    pub destination: PathBuf,
    /// Declared size, 0 when unknown
    pub size: u64,
    pub sha1: Option<String>,
    pub executable: bool,
    pub extract: Option<ExtractSpec>,
}

impl FileCandidate {
    pub fn new(id: impl Into<String>, url: impl Into<String>, destination: PathBuf) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            destination,
            size: 0,
            sha1: None,
            executable: false,
            extract: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_sha1(mut self, sha1: Option<String>) -> Self {
        self.sha1 = sha1;
        self
    }

    fn into_task(self, section: Section) -> DownloadTask {
        DownloadTask {
            section,
            id: self.id,
            url: self.url,
            destination: self.destination,
            size: self.size,
            sha1: self.sha1,
            attempts: 0,
            executable: self.executable,
            extract: self.extract,
            credited: 0,
        }
    }
}

/// What a section still has to download
#[derive(Debug, Clone)]
pub struct DownloadPlan {
    pub section: Section,
    /// Missing files, in candidate order
    pub tasks: Vec<DownloadTask>,
    /// Declared size of every applicable file, present or not
    pub total_bytes: u64,
    /// Bytes already on disk with the expected identity
    pub satisfied_bytes: u64,
    pub satisfied_files: usize,
}

impl DownloadPlan {
    pub fn empty(section: Section) -> Self {
        Self {
            section,
            tasks: Vec::new(),
            total_bytes: 0,
            satisfied_bytes: 0,
            satisfied_files: 0,
        }
    }
}

/// Diffs required files against the disk
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadPlanner {
    verify_hashes: bool,
}

impl DownloadPlanner {
    pub fn new(verify_hashes: bool) -> Self {
        Self { verify_hashes }
    }

    /// Build the plan for `section`. With `force` every candidate becomes a
    /// task. Only reads the filesystem, so planning twice without downloading
    /// in between yields the same plan.
    pub async fn plan(
        &self,
        section: Section,
        candidates: Vec<FileCandidate>,
        force: bool,
    ) -> DownloadPlan {
        let mut plan = DownloadPlan::empty(section);
        let mut seen = HashSet::new();

        for candidate in candidates {
            if !seen.insert(candidate.destination.clone()) {
                log::debug!(
                    "[{}] Skipping duplicate destination {:?}",
                    section,
                    candidate.destination
                );
                continue;
            }

            plan.total_bytes += candidate.size;

            if !force && self.is_present(&candidate).await {
                plan.satisfied_bytes += candidate.size;
                plan.satisfied_files += 1;
                continue;
            }

            plan.tasks.push(candidate.into_task(section));
        }

        log::debug!(
            "[{}] Planned {} downloads, {} files already present ({} / {} bytes)",
            section,
            plan.tasks.len(),
            plan.satisfied_files,
            plan.satisfied_bytes,
            plan.total_bytes
        );
        plan
    }

    async fn is_present(&self, candidate: &FileCandidate) -> bool {
        let metadata = match tokio::fs::metadata(&candidate.destination).await {
            Ok(m) if m.is_file() => m,
            _ => return false,
        };

        if candidate.size > 0 && metadata.len() != candidate.size {
            log::debug!(
                "Size mismatch for {:?}: {} on disk, {} expected",
                candidate.destination,
                metadata.len(),
                candidate.size
            );
            return false;
        }

        if self.verify_hashes {
            if let Some(expected) = &candidate.sha1 {
                return match calculate_sha1_async(&candidate.destination).await {
                    Ok(actual) => digest_matches(&actual, expected),
                    Err(e) => {
                        log::warn!("Failed to hash {:?}: {}", candidate.destination, e);
                        false
                    }
                };
            }
        }

        true
    }
}

/// Where asset objects are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetLayout {
    /// `assets/objects/<xx>/<hash>`
    Hashed,
    /// `resources/<asset name>`, read by pre-1.6 clients
    LegacyResources,
}

impl AssetLayout {
    /// Alpha and beta builds and releases before 1.6 read loose resources.
    /// Ids that don't parse as `major[.minor...]` use the hashed store.
    pub fn for_version(version_type: Option<&str>, version_id: &str) -> Self {
        if matches!(version_type, Some("old_alpha") | Some("old_beta")) {
            return AssetLayout::LegacyResources;
        }

        let mut parts = version_id.split('.');
        let major = parts.next().and_then(|p| p.parse::<u32>().ok());
        let Some(major) = major else {
            return AssetLayout::Hashed;
        };
        let minor = match parts.next() {
            Some(p) => match p.parse::<u32>() {
                Ok(minor) => minor,
                Err(_) => return AssetLayout::Hashed,
            },
            None => 0,
        };

        if major < 1 || (major == 1 && minor < 6) {
            AssetLayout::LegacyResources
        } else {
            AssetLayout::Hashed
        }
    }
}

/// Evaluate Mojang library rules for `platform`.
///
/// No rules means allowed. Otherwise the library starts disallowed and the
/// last matching rule decides. Features absent from `features` count as off.
pub fn rules_allow(rules: &[Rule], platform: &Platform, features: &HashMap<String, bool>) -> bool {
    if rules.is_empty() {
        return true;
    }

    let mut allowed = false;
    for rule in rules {
        if rule_matches(rule, platform, features) {
            allowed = rule.action == RuleAction::Allow;
        }
    }
    allowed
}

fn rule_matches(rule: &Rule, platform: &Platform, features: &HashMap<String, bool>) -> bool {
    if let Some(os) = &rule.os {
        if let Some(name) = &os.name {
            if name != platform.os.as_str() {
                return false;
            }
        }
        if let Some(arch) = &os.arch {
            if arch != platform.arch.as_str() {
                return false;
            }
        }
        if let Some(pattern) = &os.version {
            let host = platform.os_version.as_deref().unwrap_or_default();
            match Regex::new(pattern) {
                Ok(re) if re.is_match(host) => {}
                Ok(_) => return false,
                Err(e) => {
                    log::warn!("Ignoring rule with invalid os.version regex {:?}: {}", pattern, e);
                    return false;
                }
            }
        }
    }

    if let Some(required) = &rule.features {
        for (feature, wanted) in required {
            if features.get(feature).copied().unwrap_or(false) != *wanted {
                return false;
            }
        }
    }

    true
}

/// Native classifier of `lib` for this host with `${arch}` filled in
pub fn resolve_native_classifier(lib: &Library, platform: &Platform) -> Option<String> {
    lib.natives
        .as_ref()?
        .get(platform.os.as_str())
        .map(|classifier| classifier.replace("${arch}", platform.arch.bits()))
}

/// A manifest-supplied relative path that stays inside its root
pub fn is_safe_relative(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
