//! Serde models for the remote documents: version catalogue, version JSON
//! (with `inheritsFrom`), asset index and Java runtime manifests.

use super::error::{InstallError, InstallResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Top-level version catalogue (`version_manifest_v2.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionCatalogue {
    #[serde(default)]
    pub latest: LatestVersions,
    pub versions: Vec<CatalogueEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestVersions {
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub release_time: Option<String>,
}

impl VersionCatalogue {
    pub fn find(&self, id: &str) -> Option<&CatalogueEntry> {
        self.versions.iter().find(|v| v.id == id)
    }
}

/// Version detail document (`versions/<id>/<id>.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDocument {
    /// Version ID (e.g., "1.20.1" or "fabric-loader-0.15.7-1.20.1")
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,

    /// Parent version to inherit from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherits_from: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Arguments>,

    /// Legacy arguments (pre-1.13)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minecraft_arguments: Option<String>,

    #[serde(default)]
    pub libraries: Vec<Library>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_index: Option<AssetIndexRef>,

    /// Assets version (legacy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<HashMap<String, DownloadInfo>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_version: Option<JavaVersionRef>,

    /// Version type (release, snapshot, old_beta, old_alpha)
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    pub version_type: Option<String>,
}

/// Game and JVM arguments. Entries are kept as raw JSON: this crate only
/// carries them through the inheritance merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<serde_json::Value>,

    #[serde(default)]
    pub jvm: Vec<serde_json::Value>,
}

/// Rule for conditional libraries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub action: RuleAction,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<OsRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<HashMap<String, bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Regular expression matched against the host OS version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Library {
    /// Maven coordinates
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<LibraryDownloads>,

    /// Custom Maven repository URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,

    /// Native classifiers by OS name, may contain `${arch}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natives: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractRules>,
}

impl Library {
    /// Identity used when a child version overrides a parent library:
    /// `group:artifact[:classifier]`, version excluded.
    pub fn merge_key(&self) -> String {
        let parts: Vec<&str> = self.name.split(':').collect();
        match parts.as_slice() {
            [group, artifact, _version, classifier, ..] => {
                format!("{}:{}:{}", group, artifact, classifier)
            }
            [group, artifact, ..] => format!("{}:{}", group, artifact),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDownloads {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifiers: Option<HashMap<String, Artifact>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractRules {
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Asset index reference inside a version document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub total_size: u64,
    pub url: String,
}

/// A downloadable file: client jar, runtime file, runtime manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersionRef {
    #[serde(default = "default_java_component")]
    pub component: String,
    #[serde(default)]
    pub major_version: Option<u32>,
}

/// Versions without a `javaVersion` run on the legacy Java 8 runtime
pub(crate) fn default_java_component() -> String {
    "jre-legacy".to_string()
}

/// Asset index document (`assets/indexes/<id>.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetIndexDocument {
    /// Ordered by asset name so planning is deterministic
    pub objects: BTreeMap<String, AssetObject>,
    #[serde(default)]
    pub map_to_resources: bool,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetObject {
    pub hash: String,
    pub size: u64,
}

/// `all.json`: platform -> component -> releases
pub type RuntimeCatalogue = HashMap<String, HashMap<String, Vec<RuntimeRelease>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeRelease {
    pub manifest: DownloadInfo,
    #[serde(default)]
    pub version: Option<RuntimeVersionName>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeVersionName {
    pub name: String,
}

/// File listing of one Java runtime component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeManifest {
    pub files: BTreeMap<String, RuntimeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeEntry {
    File {
        downloads: RuntimeDownloads,
        #[serde(default)]
        executable: bool,
    },
    Directory,
    Link {
        target: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDownloads {
    pub raw: DownloadInfo,
    #[serde(default)]
    pub lzma: Option<DownloadInfo>,
}

/// Convert Maven coordinates to relative path string
/// Format: group:artifact:version[:classifier][@extension]
/// Example: "com.google.guava:guava:21.0" -> "com/google/guava/guava/21.0/guava-21.0.jar"
pub fn maven_to_path(coords: &str) -> InstallResult<String> {
    let parts: Vec<&str> = coords.split(':').collect();

    if parts.len() < 3 || parts[..3].iter().any(|p| p.is_empty()) {
        return Err(InstallError::InvalidManifest(format!(
            "invalid Maven coordinates: {}",
            coords
        )));
    }

    let group = parts[0].replace('.', "/");
    let artifact = parts[1];
    let mut version = parts[2];
    let mut extension = "jar";
    let mut classifier = None;

    if parts.len() == 3 {
        if let Some((v, ext)) = version.split_once('@') {
            version = v;
            extension = ext;
        }
    } else if let Some((clf, ext)) = parts[3].split_once('@') {
        classifier = Some(clf);
        extension = ext;
    } else {
        classifier = Some(parts[3]);
    }

    let filename = match classifier {
        Some(clf) => format!("{}-{}-{}.{}", artifact, version, clf, extension),
        None => format!("{}-{}.{}", artifact, version, extension),
    };

    Ok(format!("{}/{}/{}/{}", group, artifact, version, filename))
}
