use crate::game::installer::core::fetcher::ContentFetcher;
use crate::game::installer::error::{InstallError, InstallResult};
use crate::game::installer::manifest::{
    default_java_component, Arguments, AssetIndexDocument, AssetIndexRef, DownloadInfo, Library,
    RuntimeCatalogue, RuntimeManifest, VersionCatalogue, VersionDocument,
};
use crate::game::installer::types::{InstallPaths, Platform};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Catalogue location of one version document in the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    pub id: String,
    pub url: String,
    pub sha1: Option<String>,
    pub size: u64,
}

/// A version with its whole `inheritsFrom` chain folded in. Immutable.
#[derive(Debug, Clone)]
pub struct ResolvedVersion {
    pub id: String,
    pub version_type: Option<String>,
    pub main_class: Option<String>,
    pub libraries: Vec<Library>,
    pub asset_index: Option<AssetIndexRef>,
    pub assets: Option<String>,
    pub client: Option<DownloadInfo>,
    pub java_component: String,
    pub java_major: Option<u32>,
    pub arguments: Option<Arguments>,
    pub minecraft_arguments: Option<String>,
    /// Documents of the chain that came from the catalogue, leaf first.
    /// Local-only profiles have no entry.
    pub sources: Vec<DocumentSource>,
    /// Leaf first, root last
    pub chain: Vec<String>,
}

impl ResolvedVersion {
    fn from_document(
        doc: VersionDocument,
        sources: Vec<DocumentSource>,
        chain: Vec<String>,
    ) -> Self {
        let client = doc
            .downloads
            .as_ref()
            .and_then(|d| d.get("client"))
            .cloned();
        let (java_component, java_major) = match doc.java_version {
            Some(java) => (java.component, java.major_version),
            None => (default_java_component(), None),
        };

        Self {
            id: doc.id,
            version_type: doc.version_type,
            main_class: doc.main_class,
            libraries: doc.libraries,
            asset_index: doc.asset_index,
            assets: doc.assets,
            client,
            java_component,
            java_major,
            arguments: doc.arguments,
            minecraft_arguments: doc.minecraft_arguments,
            sources,
            chain,
        }
    }
}

/// Turns a version id into a fully merged `ResolvedVersion` and fetches the
/// secondary documents (asset index, runtime file list) it points at.
///
/// The version catalogue is fetched once per resolver and shared.
pub struct ManifestResolver {
    fetcher: ContentFetcher,
    paths: InstallPaths,
    manifest_url: String,
    runtime_manifest_url: String,
    catalogue: OnceCell<Arc<VersionCatalogue>>,
}

impl ManifestResolver {
    pub fn new(
        fetcher: ContentFetcher,
        paths: InstallPaths,
        manifest_url: impl Into<String>,
        runtime_manifest_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            paths,
            manifest_url: manifest_url.into(),
            runtime_manifest_url: runtime_manifest_url.into(),
            catalogue: OnceCell::new(),
        }
    }

    /// The version catalogue, fetched on first use
    pub async fn catalogue(&self) -> InstallResult<Arc<VersionCatalogue>> {
        self.catalogue
            .get_or_try_init(|| async {
                log::info!("Fetching version catalogue from {}", self.manifest_url);
                let catalogue: VersionCatalogue =
                    self.fetcher.fetch_json(&self.manifest_url).await?;
                log::debug!("Catalogue lists {} versions", catalogue.versions.len());
                Ok::<_, InstallError>(Arc::new(catalogue))
            })
            .await
            .cloned()
    }

    /// Resolve `version_id` and every ancestor it inherits from
    pub async fn resolve(&self, version_id: &str) -> InstallResult<ResolvedVersion> {
        let mut chain: Vec<String> = Vec::new();
        let mut documents = Vec::new();
        let mut sources = Vec::new();
        let mut next = Some(version_id.to_string());

        while let Some(current) = next.take() {
            if chain.contains(&current) {
                chain.push(current);
                log::error!("Inheritance cycle detected: {}", chain.join(" -> "));
                return Err(InstallError::ManifestCycle { chain });
            }
            chain.push(current.clone());

            let (document, source) = self.load_document(&current).await?;
            sources.extend(source);
            if let Some(parent) = &document.inherits_from {
                log::debug!("{} inherits from {}", current, parent);
            }
            next = document.inherits_from.clone();
            documents.push(document);
        }

        let merged = documents
            .into_iter()
            .rev()
            .reduce(merge_documents)
            .ok_or_else(|| InstallError::VersionNotFound {
                id: version_id.to_string(),
            })?;

        log::info!(
            "Resolved {} ({} libraries, chain: {})",
            version_id,
            merged.libraries.len(),
            chain.join(" -> ")
        );
        Ok(ResolvedVersion::from_document(merged, sources, chain))
    }

    async fn load_document(
        &self,
        id: &str,
    ) -> InstallResult<(VersionDocument, Option<DocumentSource>)> {
        let local_path = self.paths.version_json(id);

        let entry = match self.catalogue().await {
            Ok(catalogue) => catalogue.find(id).cloned(),
            Err(e) if local_path.exists() => {
                log::warn!(
                    "Version catalogue unavailable ({}), using local profile for {}",
                    e,
                    id
                );
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(entry) = entry {
            let bytes = self
                .fetcher
                .fetch_bytes(&entry.url, None, entry.sha1.as_deref())
                .await?;
            let mut document: VersionDocument = serde_json::from_slice(&bytes)
                .map_err(|e| InstallError::json(format!("version document {}", id), e))?;
            if document.version_type.is_none() {
                document.version_type = Some(entry.version_type.clone());
            }
            let source = DocumentSource {
                id: entry.id,
                url: entry.url,
                sha1: entry.sha1,
                size: bytes.len() as u64,
            };
            return Ok((document, Some(source)));
        }

        if local_path.exists() {
            log::debug!("Loading local version profile {:?}", local_path);
            let data = tokio::fs::read(&local_path)
                .await
                .map_err(|e| InstallError::io(&local_path, e))?;
            let document: VersionDocument = serde_json::from_slice(&data)
                .map_err(|e| InstallError::json(format!("{:?}", local_path), e))?;
            return Ok((document, None));
        }

        Err(InstallError::VersionNotFound { id: id.to_string() })
    }

    /// Load the asset index: the local copy when its size matches,
    /// otherwise the remote one (verified against its SHA-1).
    pub async fn asset_index(&self, index: &AssetIndexRef) -> InstallResult<AssetIndexDocument> {
        let local_path = self.paths.indexes_dir().join(format!("{}.json", index.id));

        if let Ok(data) = tokio::fs::read(&local_path).await {
            if index.size == 0 || data.len() as u64 == index.size {
                match serde_json::from_slice(&data) {
                    Ok(document) => {
                        log::debug!("Using local asset index {:?}", local_path);
                        return Ok(document);
                    }
                    Err(e) => log::warn!("Local asset index {:?} is unreadable: {}", local_path, e),
                }
            }
        }

        log::info!("Fetching asset index {} from {}", index.id, index.url);
        let bytes = self
            .fetcher
            .fetch_bytes(&index.url, None, index.sha1.as_deref())
            .await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| InstallError::json(format!("asset index {}", index.id), e))
    }

    /// File listing of a Java runtime component for `platform`.
    /// `None` when Mojang ships no such runtime for this host.
    pub async fn runtime_files(
        &self,
        component: &str,
        platform: &Platform,
    ) -> InstallResult<Option<RuntimeManifest>> {
        let Some(key) = platform.runtime_key() else {
            log::warn!(
                "No managed Java runtime for {} / {}",
                platform.os.as_str(),
                platform.arch.as_str()
            );
            return Ok(None);
        };

        let runtimes: RuntimeCatalogue = self.fetcher.fetch_json(&self.runtime_manifest_url).await?;
        let release = runtimes
            .get(key)
            .and_then(|components| components.get(component))
            .and_then(|releases| releases.first());

        let Some(release) = release else {
            log::warn!("Runtime {} is not available for {}", component, key);
            return Ok(None);
        };

        if let Some(version) = &release.version {
            log::info!("Java runtime {} for {}: {}", component, key, version.name);
        }

        let bytes = self
            .fetcher
            .fetch_bytes(&release.manifest.url, None, release.manifest.sha1.as_deref())
            .await?;
        let manifest = serde_json::from_slice(&bytes)
            .map_err(|e| InstallError::json(format!("runtime manifest {}", component), e))?;
        Ok(Some(manifest))
    }
}

/// Fold `child` on top of `parent`.
///
/// Child scalars win when present. Libraries with the same
/// `group:artifact[:classifier]` are replaced in the parent's slot, new ones
/// are appended. Argument lists are concatenated parent first.
pub fn merge_documents(mut parent: VersionDocument, child: VersionDocument) -> VersionDocument {
    parent.id = child.id;

    if child.main_class.is_some() {
        parent.main_class = child.main_class;
    }

    if let Some(child_args) = child.arguments {
        match parent.arguments.as_mut() {
            Some(parent_args) => {
                parent_args.game.extend(child_args.game);
                parent_args.jvm.extend(child_args.jvm);
            }
            None => parent.arguments = Some(child_args),
        }
    }

    if child.minecraft_arguments.is_some() {
        parent.minecraft_arguments = child.minecraft_arguments;
    }

    let mut slots: HashMap<String, usize> = parent
        .libraries
        .iter()
        .enumerate()
        .map(|(i, lib)| (lib.merge_key(), i))
        .collect();
    for lib in child.libraries {
        let key = lib.merge_key();
        match slots.get(&key) {
            Some(&i) => parent.libraries[i] = lib,
            None => {
                slots.insert(key, parent.libraries.len());
                parent.libraries.push(lib);
            }
        }
    }

    if child.asset_index.is_some() {
        parent.asset_index = child.asset_index;
    }
    if child.assets.is_some() {
        parent.assets = child.assets;
    }
    if child.downloads.is_some() {
        parent.downloads = child.downloads;
    }
    if child.java_version.is_some() {
        parent.java_version = child.java_version;
    }
    if child.version_type.is_some() {
        parent.version_type = child.version_type;
    }

    parent.inherits_from = None;
    parent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::manifest::JavaVersionRef;

    fn lib(name: &str) -> Library {
        Library {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn child_library_replaces_parent_in_place() {
        let parent = VersionDocument {
            id: "1.20.1".into(),
            main_class: Some("net.minecraft.client.main.Main".into()),
            libraries: vec![lib("org.ow2.asm:asm:9.3"), lib("com.mojang:brigadier:1.1.8")],
            version_type: Some("release".into()),
            ..Default::default()
        };
        let child = VersionDocument {
            id: "fabric-loader-0.15.7-1.20.1".into(),
            inherits_from: Some("1.20.1".into()),
            main_class: Some("net.fabricmc.loader.impl.launch.knot.KnotClient".into()),
            libraries: vec![lib("org.ow2.asm:asm:9.6"), lib("net.fabricmc:fabric-loader:0.15.7")],
            ..Default::default()
        };

        let merged = merge_documents(parent, child);
        let names: Vec<&str> = merged.libraries.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "org.ow2.asm:asm:9.6",
                "com.mojang:brigadier:1.1.8",
                "net.fabricmc:fabric-loader:0.15.7"
            ]
        );
        assert_eq!(merged.id, "fabric-loader-0.15.7-1.20.1");
        assert_eq!(
            merged.main_class.as_deref(),
            Some("net.fabricmc.loader.impl.launch.knot.KnotClient")
        );
        assert_eq!(merged.version_type.as_deref(), Some("release"));
        assert!(merged.inherits_from.is_none());
    }

    #[test]
    fn parent_scalars_survive_when_child_is_silent() {
        let parent = VersionDocument {
            id: "1.12.2".into(),
            minecraft_arguments: Some("--username ${auth_player_name}".into()),
            java_version: Some(JavaVersionRef {
                component: "jre-legacy".into(),
                major_version: Some(8),
            }),
            ..Default::default()
        };
        let child = VersionDocument {
            id: "custom".into(),
            arguments: Some(Arguments {
                game: vec![serde_json::json!("--demo")],
                jvm: vec![],
            }),
            ..Default::default()
        };

        let merged = merge_documents(parent, child);
        assert_eq!(
            merged.minecraft_arguments.as_deref(),
            Some("--username ${auth_player_name}")
        );
        assert_eq!(merged.java_version.unwrap().major_version, Some(8));
        assert_eq!(merged.arguments.unwrap().game.len(), 1);
    }

    #[test]
    fn resolved_version_defaults_to_legacy_runtime() {
        let resolved = ResolvedVersion::from_document(
            VersionDocument {
                id: "b1.7.3".into(),
                ..Default::default()
            },
            Vec::new(),
            vec!["b1.7.3".into()],
        );
        assert_eq!(resolved.java_component, "jre-legacy");
        assert!(resolved.client.is_none());
    }
}
