//! # Docker-Save Structure Resolver
//!
//! Parses a Docker-save directory tree and migrates its layers into the
//! local repository. Two format generations are handled in one pass:
//!
//! - **Legacy v1**: a top-level `repositories` file plus per-layer
//!   directories named by 64-hex-char id, each holding `json`, `VERSION`,
//!   and the layer's data tarball. No index file exists; the tree is
//!   recognized purely by the directory-naming convention.
//! - **Manifest v2 export**: a `manifest.json` array of
//!   `{RepoTags, Layers, Config}` entries on top of the same per-layer
//!   directories, with stray top-level config JSON files.
//!
//! Resolution prefers the manifest when an entry matches and falls back to
//! reconstructing the parent-pointer chain. The symmetric `save` path
//! re-materializes both generations at once (manifest plus `repositories`)
//! so any consumer of the format can read the result.

use crate::constants::{
    ANCESTRY_FILE, CONTAINER_JSON_LINK, DEFAULT_TAG, DOCKER_LAYER_JSON_FILE,
    DOCKER_LAYER_VERSION, DOCKER_LAYER_VERSION_FILE, DOCKER_MANIFEST_FILE,
    DOCKER_REPOSITORIES_FILE, TMP_FILE_PREFIX, V1_LAYER_ID_LEN,
};
use crate::error::{Error, Result};
use crate::loader::{begin_tag_load, move_layer_to_v1repo};
use crate::repository::Repository;
use crate::unique::Unique;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// Structure types
// =============================================================================

/// One entry of a `manifest.json` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path to the image config JSON, relative to the tree root.
    #[serde(rename = "Config", default)]
    pub config: String,
    /// `imagerepo:tag` references; `null` for untagged entries.
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    /// Layer tarball paths, oldest-first on disk.
    #[serde(rename = "Layers", default)]
    pub layers: Vec<String>,
}

/// Everything discovered about one per-layer directory.
#[derive(Debug, Default)]
pub struct LayerRecord {
    /// Parsed layer metadata (`json` file), may carry a `parent` id.
    pub json: Option<Value>,
    /// Path to the `json` file.
    pub json_path: Option<PathBuf>,
    /// Path to the layer's data tarball.
    pub layer_path: Option<PathBuf>,
    /// Content of the `VERSION` marker.
    pub version: Option<String>,
}

/// A stray top-level config JSON not tied to a 64-hex layer directory.
#[derive(Debug)]
pub struct ConfigRecord {
    pub json: Value,
    pub json_path: PathBuf,
}

/// In-memory description of one Docker-save tree, built by one directory
/// pass and discarded after the load.
#[derive(Debug, Default)]
pub struct DockerStructure {
    /// Legacy `repositories` mapping: repo -> tag -> top layer id.
    pub repositories: Option<Value>,
    /// Parsed `manifest.json`, empty for the oldest format variant.
    pub manifest: Vec<ManifestEntry>,
    /// Layer key (64-hex id) -> discovered layer files.
    pub repolayers: HashMap<String, LayerRecord>,
    /// Config file name -> stray top-level config.
    pub repoconfigs: HashMap<String, ConfigRecord>,
}

// =============================================================================
// Structure resolution (pure, repository-free)
// =============================================================================

fn is_v1_layer_id(name: &str) -> bool {
    name.len() == V1_LAYER_ID_LEN && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// Walks a Docker-save tree once and records every discovered layer,
/// manifest, and config.
///
/// A valid tree is recognized purely by the 64-hex-char directory-naming
/// convention; `manifest.json` may be absent in the oldest variant.
/// Directories matching neither convention are kept as empty placeholder
/// records so callers can treat them as harmless no-op layers.
pub fn load_structure(imagedir: &Path) -> Result<DockerStructure> {
    let mut structure = DockerStructure::default();

    for entry in fs::read_dir(imagedir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if path.is_file() {
            if name == DOCKER_REPOSITORIES_FILE {
                structure.repositories = Some(read_json(&path)?);
            } else if name == DOCKER_MANIFEST_FILE {
                structure.manifest = serde_json::from_reader(File::open(&path)?)?;
            } else if name.ends_with(".json") {
                structure.repoconfigs.insert(
                    name,
                    ConfigRecord {
                        json: read_json(&path)?,
                        json_path: path,
                    },
                );
            } else {
                debug!(file = %path.display(), "ignoring top-level file");
            }
        } else if path.is_dir() {
            if is_v1_layer_id(&name) {
                let record = load_layer_dir(&path)?;
                structure.repolayers.insert(name, record);
            } else {
                load_stray_dir(&path, &name, &mut structure)?;
            }
        }
    }
    Ok(structure)
}

/// Classifies the contents of one 64-hex layer directory.
fn load_layer_dir(dir: &Path) -> Result<LayerRecord> {
    let mut record = LayerRecord::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name == DOCKER_LAYER_VERSION_FILE {
            let raw = fs::read_to_string(&path)?;
            record.version = Some(raw.trim().trim_matches('"').to_string());
        } else if name == DOCKER_LAYER_JSON_FILE {
            record.json = Some(read_json(&path)?);
            record.json_path = Some(path);
        } else if record.layer_path.is_none() {
            record.layer_path = Some(path);
        } else {
            warn!(file = %path.display(), "unknown file in layer");
        }
    }
    Ok(record)
}

/// Handles a directory whose name is not a 64-hex layer id: config JSON
/// files inside are recorded; anything else becomes an empty placeholder.
fn load_stray_dir(dir: &Path, name: &str, structure: &mut DockerStructure) -> Result<()> {
    let mut found_config = false;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let fname = entry.file_name().to_string_lossy().to_string();
        if path.is_file() && fname.ends_with(".json") {
            structure.repoconfigs.insert(
                fname,
                ConfigRecord {
                    json: read_json(&path)?,
                    json_path: path,
                },
            );
            found_config = true;
        }
    }
    if !found_config {
        warn!(dir = %dir.display(), "unknown file in layer");
        structure.repolayers.insert(name.to_string(), LayerRecord::default());
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_reader(File::open(path)?)?)
}

/// Finds the most-derived layer: the one no other layer names as parent.
///
/// A top-layer id handed down by the legacy `repositories` file is used
/// directly. A well-formed save has exactly one qualifying layer; when the
/// tree is malformed and several qualify, any one is acceptable.
pub fn find_top_layer_id(structure: &DockerStructure, my_layer_id: Option<&str>) -> Option<String> {
    if let Some(id) = my_layer_id {
        return Some(id.to_string());
    }
    let parents: HashSet<&str> = structure
        .repolayers
        .values()
        .filter_map(|r| r.json.as_ref())
        .filter_map(|j| j.get("parent"))
        .filter_map(Value::as_str)
        .collect();
    structure
        .repolayers
        .iter()
        .find(|(id, record)| record.json.is_some() && !parents.contains(id.as_str()))
        .map(|(id, _)| id.clone())
}

/// Linearizes the ancestry chain starting at `top_layer_id`, head first.
///
/// Follows `parent` references until a layer has none or its declared
/// parent is not a string. Already-visited keys are never re-visited, so a
/// cyclic or self-referential chain terminates after one pass.
pub fn sorted_layers(structure: &DockerStructure, top_layer_id: &str) -> Vec<String> {
    let mut chain: Vec<String> = Vec::new();
    let mut next = Some(top_layer_id.to_string());
    while let Some(id) = next.take() {
        if chain.iter().any(|seen| seen == &id) {
            warn!(layer_id = id.as_str(), "cyclic parent chain, stopping");
            break;
        }
        next = structure
            .repolayers
            .get(&id)
            .and_then(|r| r.json.as_ref())
            .and_then(|j| j.get("parent"))
            .and_then(Value::as_str)
            .map(str::to_string);
        chain.push(id);
    }
    chain
}

/// Looks up the manifest entry whose `RepoTags` contains `imagetag`
/// (case-insensitively) and returns its config path plus layers reversed
/// to newest-first migration order. Returns empty values when no entry
/// matches.
pub fn get_from_manifest(structure: &DockerStructure, imagetag: &str) -> (String, Vec<String>) {
    for entry in &structure.manifest {
        let Some(tags) = &entry.repo_tags else {
            continue;
        };
        if tags.iter().any(|t| t.eq_ignore_ascii_case(imagetag)) {
            let layers = entry.layers.iter().rev().cloned().collect();
            return (entry.config.clone(), layers);
        }
    }
    (String::new(), Vec::new())
}

// =============================================================================
// Loader
// =============================================================================

/// Loads Docker-save trees into a repository and saves tags back out.
pub struct DockerLoader<'r> {
    repo: &'r mut dyn Repository,
    override_imagerepo: Option<String>,
}

impl<'r> DockerLoader<'r> {
    /// Creates a loader against the given repository.
    pub fn new(repo: &'r mut dyn Repository) -> Self {
        Self {
            repo,
            override_imagerepo: None,
        }
    }

    /// Loads every tag found in an extracted Docker-save tree.
    ///
    /// `imagerepo` overrides the target repository for all loaded tags.
    /// A tag that fails to load is reported and skipped; tags already
    /// committed stay committed. Returns the `imagerepo:tag` names loaded.
    pub fn load(&mut self, imagedir: &Path, imagerepo: Option<&str>) -> Result<Vec<String>> {
        self.override_imagerepo = imagerepo.map(str::to_string);
        let structure = load_structure(imagedir)?;
        if structure.repolayers.is_empty() && structure.manifest.is_empty() {
            return Err(Error::InvalidStructure {
                format: "Docker",
                reason: "no layer directories or manifest found".to_string(),
            });
        }
        self.load_repositories(&structure)
    }

    /// Drives one `load_image` per discovered tag: manifest entries first,
    /// then legacy `repositories` entries not already attempted, then a
    /// synthesized name when the tree names no tag at all.
    fn load_repositories(&mut self, structure: &DockerStructure) -> Result<Vec<String>> {
        let mut loaded = Vec::new();
        let mut attempted: HashSet<String> = HashSet::new();

        for entry in &structure.manifest {
            let Some(tags) = &entry.repo_tags else {
                debug!("skipping untagged manifest entry");
                continue;
            };
            for repotag in tags {
                let (imagerepo, tag) = split_imagetag(repotag);
                if !attempted.insert(format!("{imagerepo}:{tag}")) {
                    continue;
                }
                match self.load_image(structure, &imagerepo, &tag) {
                    Ok(mut tags) => loaded.append(&mut tags),
                    Err(e) => warn!(imagetag = repotag.as_str(), error = %e, "tag load failed"),
                }
            }
        }

        if let Some(Value::Object(repos)) = &structure.repositories {
            for (imagerepo, tags) in repos {
                let Value::Object(tags) = tags else { continue };
                for tag in tags.keys() {
                    if !attempted.insert(format!("{imagerepo}:{tag}")) {
                        continue;
                    }
                    match self.load_image(structure, imagerepo, tag) {
                        Ok(mut tags) => loaded.append(&mut tags),
                        Err(e) => {
                            warn!(imagerepo, tag, error = %e, "tag load failed")
                        }
                    }
                }
            }
        }

        if attempted.is_empty() {
            // oldest saves carry neither manifest nor repositories
            let imagerepo = self
                .override_imagerepo
                .clone()
                .unwrap_or_else(|| Unique::new().imagename());
            match self.load_image(structure, &imagerepo, DEFAULT_TAG) {
                Ok(mut tags) => loaded.append(&mut tags),
                Err(e) => warn!(imagerepo, error = %e, "tag load failed"),
            }
        }
        Ok(loaded)
    }

    /// Loads one tag: bookkeeping via the common engine, then the
    /// Docker-specific discovery and migration.
    fn load_image(
        &mut self,
        structure: &DockerStructure,
        imagerepo: &str,
        tag: &str,
    ) -> Result<Vec<String>> {
        // manifest entries keep their original names even when the target
        // repository is overridden
        let source_imagetag = format!("{imagerepo}:{tag}");
        let imagerepo = self
            .override_imagerepo
            .clone()
            .unwrap_or_else(|| imagerepo.to_string());
        begin_tag_load(self.repo, &imagerepo, tag)?;
        self.load_image_step2(structure, &source_imagetag, &imagerepo, tag)
    }

    /// Migrates every layer (and config) of one tag and writes its
    /// ancestry. Any single failure aborts the tag with no ancestry
    /// committed.
    fn load_image_step2(
        &mut self,
        structure: &DockerStructure,
        source_imagetag: &str,
        imagerepo: &str,
        tag: &str,
    ) -> Result<Vec<String>> {
        let (config_file, manifest_layers) = get_from_manifest(structure, source_imagetag);

        let layer_keys: Vec<String> = if !manifest_layers.is_empty() {
            manifest_layers
                .iter()
                .map(|l| l.trim_end_matches("/layer.tar").to_string())
                .collect()
        } else {
            let source_repo = source_imagetag
                .strip_suffix(&format!(":{tag}"))
                .unwrap_or(source_imagetag);
            let hint = structure
                .repositories
                .as_ref()
                .and_then(|r| r.get(source_repo))
                .and_then(|tags| tags.get(tag))
                .and_then(Value::as_str);
            let top = find_top_layer_id(structure, hint).ok_or_else(|| Error::InvalidStructure {
                format: "Docker",
                reason: "no top layer found".to_string(),
            })?;
            sorted_layers(structure, &top)
        };

        check_chain_versions(structure, &layer_keys)?;

        for key in &layer_keys {
            debug!(layer_id = key.as_str(), "adding layer");
            let record = structure.repolayers.get(key).ok_or_else(|| {
                Error::InvalidStructure {
                    format: "Docker",
                    reason: format!("layer '{key}' referenced but not discovered"),
                }
            })?;
            if let Some(json_path) = &record.json_path {
                move_layer_to_v1repo(self.repo, json_path, key, None)?;
            }
            let layer_path = record.layer_path.as_ref().ok_or_else(|| {
                Error::InvalidStructure {
                    format: "Docker",
                    reason: format!("layer '{key}' has no data tarball"),
                }
            })?;
            move_layer_to_v1repo(self.repo, layer_path, key, None)?;
        }

        if !config_file.is_empty() {
            self.migrate_config(structure, &config_file)?;
        }

        if !self.repo.save_json(ANCESTRY_FILE, &json!(layer_keys)) {
            return Err(Error::RepositoryFailed("save_json(ancestry)".to_string()));
        }
        let imagetag = format!("{imagerepo}:{tag}");
        info!(imagetag = imagetag.as_str(), layers = layer_keys.len(), "loaded image");
        Ok(vec![imagetag])
    }

    fn migrate_config(&mut self, structure: &DockerStructure, config_file: &str) -> Result<()> {
        let config_name = Path::new(config_file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| config_file.to_string());
        let config_id = config_name.trim_end_matches(".json").to_string();
        match structure.repoconfigs.get(&config_name) {
            Some(config) => move_layer_to_v1repo(
                self.repo,
                &config.json_path,
                &config_id,
                Some(CONTAINER_JSON_LINK),
            ),
            None => {
                warn!(config = config_file, "manifest config not found in tree");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Save path
    // =========================================================================

    /// Saves the given `(imagerepo, tag)` pairs into one Docker-save
    /// tarball. A failure for any pair aborts the whole save; partial
    /// archives are never written over `imagefile`.
    pub fn save(&mut self, imagetag_list: &[(String, String)], imagefile: &Path) -> Result<()> {
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{TMP_FILE_PREFIX}-save-"))
            .tempdir()?;
        let mut manifest: Vec<ManifestEntry> = Vec::new();
        let mut repositories = serde_json::Map::new();

        for (imagerepo, tag) in imagetag_list {
            self.save_image(imagerepo, tag, tmp.path(), &mut manifest, &mut repositories)?;
        }

        fs::write(
            tmp.path().join(DOCKER_MANIFEST_FILE),
            serde_json::to_vec(&manifest)?,
        )?;
        fs::write(
            tmp.path().join(DOCKER_REPOSITORIES_FILE),
            serde_json::to_vec(&Value::Object(repositories))?,
        )?;

        let file = File::create(imagefile)?;
        let mut builder = tar::Builder::new(file);
        builder.append_dir_all("", tmp.path())?;
        builder.finish()?;
        info!(imagefile = %imagefile.display(), images = imagetag_list.len(), "saved images");
        Ok(())
    }

    /// Re-materializes one tag as per-layer directories plus manifest and
    /// `repositories` entries inside the staging tree.
    fn save_image(
        &mut self,
        imagerepo: &str,
        tag: &str,
        dest: &Path,
        manifest: &mut Vec<ManifestEntry>,
        repositories: &mut serde_json::Map<String, Value>,
    ) -> Result<()> {
        if !self.repo.cd_imagerepo(imagerepo, tag) {
            return Err(Error::TagNotFound {
                imagerepo: imagerepo.to_string(),
                tag: tag.to_string(),
            });
        }
        let (container_json, layer_files) =
            self.repo.get_image_attributes().ok_or_else(|| {
                Error::RepositoryFailed(format!("get_image_attributes({imagerepo}:{tag})"))
            })?;
        if layer_files.is_empty() {
            return Err(Error::InvalidStructure {
                format: "Docker",
                reason: format!("image {imagerepo}:{tag} has no layers"),
            });
        }

        let mut parent: Option<String> = None;
        let mut layer_paths = Vec::new();
        let mut top_layer_id = String::new();
        for layer_file in &layer_files {
            let layer_id = layer_file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| Error::UnrecognizedLayerFile(layer_file.clone()))?;
            let layer_dir = dest.join(&layer_id);
            fs::create_dir_all(&layer_dir)?;
            fs::write(
                layer_dir.join(DOCKER_LAYER_VERSION_FILE),
                DOCKER_LAYER_VERSION,
            )?;
            let mut layer_json = json!({ "id": layer_id });
            if let Some(parent_id) = &parent {
                layer_json["parent"] = json!(parent_id);
            }
            fs::write(
                layer_dir.join(DOCKER_LAYER_JSON_FILE),
                serde_json::to_vec(&layer_json)?,
            )?;
            let tarball = layer_dir.join("layer.tar");
            if !tarball.exists() {
                // layers shared between tags are materialized once
                fs::copy(layer_file, &tarball)?;
            }
            layer_paths.push(format!("{layer_id}/layer.tar"));
            parent = Some(layer_id.clone());
            top_layer_id = layer_id;
        }

        let config_bytes = serde_json::to_vec(&container_json)?;
        let config_name = format!("{}.json", hex::encode(Sha256::digest(&config_bytes)));
        fs::write(dest.join(&config_name), &config_bytes)?;

        manifest.push(ManifestEntry {
            config: config_name,
            repo_tags: Some(vec![format!("{imagerepo}:{tag}")]),
            layers: layer_paths,
        });
        let repo_entry = repositories
            .entry(imagerepo.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(tags) = repo_entry {
            tags.insert(tag.to_string(), json!(top_layer_id));
        }
        Ok(())
    }
}

/// Splits `imagerepo:tag`, tolerating registry hosts with ports; a missing
/// tag defaults to `latest`.
pub(crate) fn split_imagetag(imagetag: &str) -> (String, String) {
    match imagetag.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') && !repo.is_empty() => {
            (repo.to_string(), tag.to_string())
        }
        _ => (imagetag.to_string(), DEFAULT_TAG.to_string()),
    }
}

fn check_chain_versions(structure: &DockerStructure, layer_keys: &[String]) -> Result<()> {
    let mut expected: Option<&str> = None;
    for key in layer_keys {
        let Some(version) = structure
            .repolayers
            .get(key)
            .and_then(|r| r.version.as_deref())
        else {
            continue;
        };
        match expected {
            None => expected = Some(version),
            Some(e) if e != version => {
                return Err(Error::VersionMismatch {
                    expected: e.to_string(),
                    found: version.to_string(),
                })
            }
            _ => {}
        }
    }
    Ok(())
}
