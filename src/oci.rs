//! # OCI Layout Structure Resolver
//!
//! Parses an OCI image layout (`oci-layout`, `index.json`,
//! `blobs/<algorithm>/<hash>`) and migrates its blobs into the local
//! repository. Unlike a Docker-save tree, blobs carry no companion
//! metadata files; manifests, configs, and layer tarballs all live in one
//! flat content-addressed space and are disambiguated only by
//! dereferencing from the index/manifest graph.
//!
//! Index entries of manifest media type resolve directly; entries of index
//! media type are nested indices, descended recursively with an explicit
//! depth guard. Blob contents are verified against their content-addressed
//! names before use.
//!
//! Ancestry records are written with bare hash components so downstream
//! legacy-format consumers see familiar flat ids.

use crate::constants::{
    ANCESTRY_FILE, CONTAINER_JSON_LINK, MAX_INDEX_DEPTH, OCI_BLOBS_DIR,
    OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE, OCI_INDEX_FILE, OCI_LAYOUT_FILE,
    OCI_REF_NAME_ANNOTATION,
};
use crate::error::{Error, Result};
use crate::loader::{begin_tag_load, move_layer_to_v1repo};
use crate::repository::Repository;
use crate::unique::Unique;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// Structure types
// =============================================================================

/// Parsed `index.json` (or a nested index blob).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OciIndex {
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: u32,
    #[serde(default)]
    pub manifests: Vec<OciDescriptor>,
}

/// One descriptor of an index's `manifests` array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OciDescriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub annotations: Option<HashMap<String, String>>,
}

/// A content-addressed blob discovered under `blobs/<algorithm>/`.
#[derive(Debug, Clone)]
pub struct OciBlob {
    /// Path to the blob file.
    pub path: PathBuf,
    /// Digest algorithm (the subdirectory name).
    pub algorithm: String,
    /// Bare hash component (the file name).
    pub hash: String,
}

/// In-memory description of one OCI layout, built per load and discarded.
#[derive(Debug, Default)]
pub struct OciStructure {
    /// Raw parsed `oci-layout` marker.
    pub layout: Value,
    /// Parsed top-level index.
    pub index: OciIndex,
    /// `"<algorithm>:<hash>"` -> blob record.
    pub repolayers: HashMap<String, OciBlob>,
    /// `imagerepo:tag` -> dereferenced per-tag manifest JSON.
    pub manifests: HashMap<String, Value>,
}

// =============================================================================
// Structure resolution
// =============================================================================

/// Reads the layout markers and walks `blobs/` once.
///
/// Both `oci-layout` and `index.json` must parse; absence of either means
/// the directory is not an OCI layout. Every regular file under an
/// algorithm subdirectory is recorded as a blob keyed `"algo:hash"`.
pub fn load_structure(imagedir: &Path) -> Result<OciStructure> {
    let layout_path = imagedir.join(OCI_LAYOUT_FILE);
    let index_path = imagedir.join(OCI_INDEX_FILE);
    if !layout_path.is_file() || !index_path.is_file() {
        return Err(Error::InvalidStructure {
            format: "OCI",
            reason: "missing oci-layout or index.json".to_string(),
        });
    }
    let layout: Value = serde_json::from_reader(File::open(&layout_path)?)?;
    let index: OciIndex = serde_json::from_reader(File::open(&index_path)?)?;

    let mut repolayers = HashMap::new();
    let blobs_dir = imagedir.join(OCI_BLOBS_DIR);
    if blobs_dir.is_dir() {
        for algo_entry in fs::read_dir(&blobs_dir)? {
            let algo_entry = algo_entry?;
            if !algo_entry.path().is_dir() {
                continue;
            }
            let algorithm = algo_entry.file_name().to_string_lossy().to_string();
            for blob_entry in fs::read_dir(algo_entry.path())? {
                let blob_entry = blob_entry?;
                if !blob_entry.path().is_file() {
                    continue;
                }
                let hash = blob_entry.file_name().to_string_lossy().to_string();
                repolayers.insert(
                    format!("{algorithm}:{hash}"),
                    OciBlob {
                        path: blob_entry.path(),
                        algorithm: algorithm.clone(),
                        hash,
                    },
                );
            }
        }
    }

    Ok(OciStructure {
        layout,
        index,
        repolayers,
        manifests: HashMap::new(),
    })
}

/// Looks up the pre-resolved manifest for `imagetag` and returns the
/// config digest plus layer digests reversed to newest-first migration
/// order. Returns empty values when no manifest is resolved for the tag.
pub fn get_from_manifest(structure: &OciStructure, imagetag: &str) -> (String, Vec<String>) {
    let Some(manifest) = structure.manifests.get(imagetag) else {
        return (String::new(), Vec::new());
    };
    let config = manifest
        .pointer("/config/digest")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut layers: Vec<String> = manifest
        .get("layers")
        .and_then(Value::as_array)
        .map(|layers| {
            layers
                .iter()
                .filter_map(|l| l.get("digest"))
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    layers.reverse();
    (config, layers)
}

/// Reads a blob by its `"algo:hash"` key, verifying sha256 content.
fn read_blob(structure: &OciStructure, digest: &str) -> Result<Vec<u8>> {
    let blob = structure.repolayers.get(digest).ok_or_else(|| {
        Error::InvalidStructure {
            format: "OCI",
            reason: format!("blob '{digest}' referenced but not present"),
        }
    })?;
    let data = fs::read(&blob.path)?;
    if blob.algorithm == "sha256" {
        let computed = hex::encode(Sha256::digest(&data));
        if computed != blob.hash {
            return Err(Error::DigestMismatch {
                digest: digest.to_string(),
                computed,
            });
        }
    }
    Ok(data)
}

/// Derives `(imagerepo, tag)` from a descriptor's ref.name annotation,
/// synthesizing the missing parts.
fn resolve_ref_name(descriptor: &OciDescriptor) -> (String, String) {
    let unique = Unique::new();
    match descriptor
        .annotations
        .as_ref()
        .and_then(|a| a.get(OCI_REF_NAME_ANNOTATION))
    {
        Some(refname) => match refname.split_once(':') {
            Some((imagerepo, tag)) => (imagerepo.to_string(), tag.to_string()),
            None => (unique.imagename(), refname.clone()),
        },
        None => (unique.imagename(), unique.imagetag()),
    }
}

// =============================================================================
// Loader
// =============================================================================

/// Loads OCI layouts into a repository.
pub struct OciLoader<'r> {
    repo: &'r mut dyn Repository,
    override_imagerepo: Option<String>,
}

impl<'r> OciLoader<'r> {
    /// Creates a loader against the given repository.
    pub fn new(repo: &'r mut dyn Repository) -> Self {
        Self {
            repo,
            override_imagerepo: None,
        }
    }

    /// Loads every manifest referenced (directly or through nested
    /// indices) by an extracted OCI layout.
    ///
    /// `imagerepo` forces all manifests into one target repository,
    /// overriding any ref.name annotations. A manifest that fails to load
    /// is reported and skipped. Returns the `imagerepo:tag` names loaded.
    pub fn load(&mut self, imagedir: &Path, imagerepo: Option<&str>) -> Result<Vec<String>> {
        self.override_imagerepo = imagerepo.map(str::to_string);
        let mut structure = load_structure(imagedir)?;
        self.load_repositories(&mut structure)
    }

    fn load_repositories(&mut self, structure: &mut OciStructure) -> Result<Vec<String>> {
        let descriptors = structure.index.manifests.clone();
        self.load_index(structure, &descriptors, 0)
    }

    /// Resolves one level of index descriptors; nested indices recurse
    /// with a depth guard (index graphs are assumed acyclic, the guard
    /// turns malformed nesting into a clean failure).
    fn load_index(
        &mut self,
        structure: &mut OciStructure,
        descriptors: &[OciDescriptor],
        depth: usize,
    ) -> Result<Vec<String>> {
        if depth >= MAX_INDEX_DEPTH {
            return Err(Error::IndexTooDeep {
                limit: MAX_INDEX_DEPTH,
            });
        }
        let mut loaded = Vec::new();
        for descriptor in descriptors {
            match descriptor.media_type.as_str() {
                OCI_IMAGE_MANIFEST_MEDIA_TYPE => {
                    match self.load_manifest(structure, descriptor) {
                        Ok(mut tags) => loaded.append(&mut tags),
                        Err(e) => {
                            warn!(digest = descriptor.digest.as_str(), error = %e, "manifest load failed")
                        }
                    }
                }
                OCI_IMAGE_INDEX_MEDIA_TYPE => {
                    let nested = read_blob(structure, &descriptor.digest)
                        .and_then(|data| Ok(serde_json::from_slice::<OciIndex>(&data)?));
                    match nested {
                        Ok(index) => {
                            match self.load_index(structure, &index.manifests, depth + 1) {
                                Ok(mut tags) => loaded.append(&mut tags),
                                Err(e) => {
                                    warn!(digest = descriptor.digest.as_str(), error = %e, "nested index failed")
                                }
                            }
                        }
                        Err(e) => {
                            warn!(digest = descriptor.digest.as_str(), error = %e, "nested index unreadable")
                        }
                    }
                }
                other => debug!(media_type = other, "skipping descriptor"),
            }
        }
        Ok(loaded)
    }

    /// Dereferences one manifest descriptor, stores its JSON under the
    /// resolved `imagerepo:tag`, and loads that tag.
    ///
    /// The override repository takes precedence over anything discovered
    /// in the ref.name annotation, so the manifest map is keyed with the
    /// final names.
    fn load_manifest(
        &mut self,
        structure: &mut OciStructure,
        descriptor: &OciDescriptor,
    ) -> Result<Vec<String>> {
        let (mut imagerepo, tag) = resolve_ref_name(descriptor);
        if let Some(override_repo) = &self.override_imagerepo {
            imagerepo = override_repo.clone();
        }
        let data = read_blob(structure, &descriptor.digest)?;
        let manifest: Value = serde_json::from_slice(&data)?;
        structure
            .manifests
            .insert(format!("{imagerepo}:{tag}"), manifest);
        self.load_image(structure, &imagerepo, &tag)
    }

    /// Loads one tag: bookkeeping via the common engine, then the
    /// OCI-specific migration.
    fn load_image(
        &mut self,
        structure: &OciStructure,
        imagerepo: &str,
        tag: &str,
    ) -> Result<Vec<String>> {
        begin_tag_load(self.repo, imagerepo, tag)?;
        self.load_image_step2(structure, imagerepo, tag)
    }

    /// Migrates the config and every layer of one tag and writes its
    /// ancestry (bare hashes, newest first). Any single failure aborts
    /// the tag with no ancestry committed.
    fn load_image_step2(
        &mut self,
        structure: &OciStructure,
        imagerepo: &str,
        tag: &str,
    ) -> Result<Vec<String>> {
        let imagetag = format!("{imagerepo}:{tag}");
        let (config_key, layer_keys) = get_from_manifest(structure, &imagetag);
        if config_key.is_empty() && layer_keys.is_empty() {
            return Err(Error::ManifestEntryNotFound { imagetag });
        }

        if !config_key.is_empty() {
            let blob = structure.repolayers.get(&config_key).ok_or_else(|| {
                Error::InvalidStructure {
                    format: "OCI",
                    reason: format!("config blob '{config_key}' not present"),
                }
            })?;
            move_layer_to_v1repo(self.repo, &blob.path, &config_key, Some(CONTAINER_JSON_LINK))?;
        }

        let mut ancestry = Vec::new();
        for key in &layer_keys {
            debug!(layer_id = key.as_str(), "adding layer");
            let blob = structure.repolayers.get(key).ok_or_else(|| {
                Error::InvalidStructure {
                    format: "OCI",
                    reason: format!("layer blob '{key}' not present"),
                }
            })?;
            move_layer_to_v1repo(self.repo, &blob.path, key, None)?;
            ancestry.push(blob.hash.clone());
        }

        if !self.repo.save_json(ANCESTRY_FILE, &json!(ancestry)) {
            return Err(Error::RepositoryFailed("save_json(ancestry)".to_string()));
        }
        info!(imagetag = imagetag.as_str(), layers = ancestry.len(), "loaded image");
        Ok(vec![imagetag])
    }
}
