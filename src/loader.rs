//! # Common Load/Import Engine
//!
//! Format-agnostic operations shared by the Docker and OCI resolvers:
//!
//! - **Layer migration**: moving a discovered blob into the repository's
//!   flat v1-style layer directory ([`move_layer_to_v1repo`])
//! - **Archive extraction**: ownership-insensitive untar of saved images
//!   and exported containers ([`untar_saved_container`])
//! - **Metadata synthesis**: minimal legacy v1 configs for bare tarball
//!   imports ([`create_container_meta`])
//! - **Tag bookkeeping**: the shared create-tag/stamp-version half of a
//!   load ([`begin_tag_load`]); layer discovery differs completely between
//!   formats and stays with the resolvers
//! - **Import paths**: bare tarball to image ([`import_toimage`]), bare
//!   tarball to container ([`import_tocontainer`]), exported container to
//!   container ([`import_clone`]), container to container
//!   ([`clone_container`])
//!
//! ## Atomicity
//!
//! Migration failure of any single layer aborts the whole tag's load; the
//! ancestry record is only written after every layer landed. Partial
//! images are never committed to the repository.

use crate::constants::{
    ANCESTRY_FILE, CLONED_IMAGEREPO, CREATED_TIMESTAMP_FORMAT, DOCKER_MANIFEST_FILE,
    IMPORTED_IMAGEREPO, OCI_LAYOUT_FILE, REPO_VERSION_V1,
};
use crate::error::{Error, Result};
use crate::platform::{host_arch, host_os};
use crate::repository::Repository;
use crate::unique::Unique;
use flate2::read::GzDecoder;
use serde_json::{json, Value};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path};
use tar::Archive;
use tracing::{debug, info, warn};

// =============================================================================
// Format detection
// =============================================================================

/// Interchange format found in an extracted image directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Docker-save tree (`manifest.json` and/or legacy layer directories).
    Docker,
    /// OCI image layout (`oci-layout` + `index.json` + `blobs/`).
    Oci,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Docker => write!(f, "Docker"),
            ImageFormat::Oci => write!(f, "OCI"),
        }
    }
}

/// Sniffs which interchange format a directory contains.
///
/// The `oci-layout` marker wins over `manifest.json`; a directory with
/// neither is unrecognized. Pure inspection, no side effects.
pub fn get_imagedir_type(dir: &Path) -> Option<ImageFormat> {
    if dir.join(OCI_LAYOUT_FILE).is_file() {
        Some(ImageFormat::Oci)
    } else if dir.join(DOCKER_MANIFEST_FILE).is_file() {
        Some(ImageFormat::Docker)
    } else {
        None
    }
}

// =============================================================================
// Layer migration
// =============================================================================

/// Moves a layer or config blob into the repository's flat layer store.
///
/// The target name is decided by file shape, tried in order:
/// 1. file name ending in `json` -> `<layer_id>.json`
/// 2. file name ending in `layer.tar` -> `<layer_id>.layer`
/// 3. `layer_id` of the form `algo:hash` -> `<hash>.layer`
///
/// Anything else is an unrecognized shape. The move itself is a strategy
/// sequence: atomic rename first, full copy when rename fails (cross-device
/// or permissions). On success the file is registered with the repository.
pub fn move_layer_to_v1repo(
    repo: &mut dyn Repository,
    filepath: &Path,
    layer_id: &str,
    linkname: Option<&str>,
) -> Result<()> {
    let filename = filepath
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::UnrecognizedLayerFile(filepath.to_path_buf()))?;

    let layersdir = repo.layersdir();
    let target = if filename.ends_with("json") {
        layersdir.join(format!("{layer_id}.json"))
    } else if filename.ends_with("layer.tar") {
        layersdir.join(format!("{layer_id}.layer"))
    } else if let Some((_algorithm, hash)) = layer_id.split_once(':') {
        layersdir.join(format!("{hash}.layer"))
    } else {
        return Err(Error::UnrecognizedLayerFile(filepath.to_path_buf()));
    };

    place_file(filepath, &target).map_err(|e| Error::LayerMigrationFailed {
        layer_id: layer_id.to_string(),
        reason: e.to_string(),
    })?;

    if !repo.add_image_layer(&target, linkname) {
        return Err(Error::LayerMigrationFailed {
            layer_id: layer_id.to_string(),
            reason: "repository refused to register layer".to_string(),
        });
    }
    debug!(layer_id, target = %target.display(), "migrated layer");
    Ok(())
}

/// Rename-then-copy placement strategy.
fn place_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(
                src = %src.display(),
                dst = %dst.display(),
                error = %e,
                "rename failed, falling back to copy"
            );
            fs::copy(src, dst).map(|_| ())
        }
    }
}

// =============================================================================
// Archive extraction
// =============================================================================

/// Extracts a saved image or container archive into `destdir`.
///
/// Extraction never fails on host privilege mismatches: ownership and
/// xattrs are not restored, existing files are overwritten. Gzip input is
/// detected by magic bytes. Entries escaping the destination are rejected.
pub fn untar_saved_container(tarfile: &Path, destdir: &Path) -> Result<()> {
    if !tarfile.is_file() {
        return Err(Error::TarFileNotFound(tarfile.to_path_buf()));
    }
    let file = File::open(tarfile)?;
    let mut reader = BufReader::new(file);
    let gzipped = reader
        .fill_buf()
        .map(|buf| buf.starts_with(&[0x1f, 0x8b]))
        .unwrap_or(false);

    let result = if gzipped {
        apply_archive(GzDecoder::new(reader), destdir)
    } else {
        apply_archive(reader, destdir)
    };
    result.map_err(|e| match e {
        Error::PathTraversal { path } => Error::PathTraversal { path },
        other => Error::ExtractionFailed {
            path: tarfile.to_path_buf(),
            reason: other.to_string(),
        },
    })
}

fn apply_archive(reader: impl Read, destdir: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_permissions(false);
    archive.set_unpack_xattrs(false);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;
        // `..` must be a path component to count as traversal; file names
        // merely containing dots are legitimate
        if path.is_absolute() || path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Error::PathTraversal {
                path: path.to_string_lossy().into_owned(),
            });
        }
        entry.unpack_in(destdir)?;
    }
    Ok(())
}

// =============================================================================
// Metadata synthesis
// =============================================================================

/// Synthesizes a minimal legacy Docker v1 image config.
///
/// Used only on the import path, where a bare tarball carries no config at
/// all. The shape mirrors what the v1 registry format expects: empty
/// `container_config` and `config` blocks, host architecture and OS, and a
/// nanosecond-padded creation timestamp.
pub fn create_container_meta(layer_id: &str, comment: &str, size: u64) -> Value {
    json!({
        "id": layer_id,
        "comment": comment,
        "created": chrono::Utc::now().format(CREATED_TIMESTAMP_FORMAT).to_string(),
        "architecture": host_arch(),
        "os": host_os(),
        "container_config": empty_config_block(),
        "config": empty_config_block(),
        "size": size,
    })
}

fn empty_config_block() -> Value {
    json!({
        "Hostname": "",
        "Domainname": "",
        "User": "",
        "Memory": 0,
        "MemorySwap": 0,
        "CpuShares": 0,
        "Cpuset": "",
        "AttachStdin": false,
        "AttachStdout": false,
        "AttachStderr": false,
        "PortSpecs": null,
        "ExposedPorts": null,
        "Tty": false,
        "OpenStdin": false,
        "StdinOnce": false,
        "Env": null,
        "Cmd": null,
        "Image": "",
        "Volumes": null,
        "WorkingDir": "",
        "Entrypoint": null,
        "NetworkDisabled": false,
        "MacAddress": "",
        "OnBuild": null,
        "Labels": null,
    })
}

// =============================================================================
// Tag bookkeeping
// =============================================================================

/// Shared first half of a tag load: existence precondition, repo and tag
/// scaffolding, `v1` version stamp.
///
/// The format resolvers perform the second half (layer discovery and
/// migration), which is where the two formats diverge completely.
pub(crate) fn begin_tag_load(
    repo: &mut dyn Repository,
    imagerepo: &str,
    tag: &str,
) -> Result<()> {
    if repo.cd_imagerepo(imagerepo, tag) {
        return Err(Error::TagAlreadyExists {
            imagerepo: imagerepo.to_string(),
            tag: tag.to_string(),
        });
    }
    if repo.setup_imagerepo(imagerepo).is_none() {
        return Err(Error::RepositoryFailed(format!(
            "setup_imagerepo({imagerepo})"
        )));
    }
    if repo.setup_tag(tag).is_none() {
        return Err(Error::TagSetupFailed {
            imagerepo: imagerepo.to_string(),
            tag: tag.to_string(),
        });
    }
    if !repo.set_version(REPO_VERSION_V1) {
        return Err(Error::RepositoryFailed("set_version(v1)".to_string()));
    }
    Ok(())
}

// =============================================================================
// Import paths
// =============================================================================

/// Imports a bare tarball (no embedded metadata) as a one-layer image.
///
/// Generates a fresh v1 layer id, moves (or copies, with
/// `move_tarball = false`) the tarball into layer storage, synthesizes a
/// config, and writes a single-entry ancestry. A missing repository name
/// defaults to `IMPORTED`. Returns the new layer id.
pub fn import_toimage(
    repo: &mut dyn Repository,
    tarfile: &Path,
    imagerepo: Option<&str>,
    tag: &str,
    move_tarball: bool,
) -> Result<String> {
    if !tarfile.is_file() {
        return Err(Error::TarFileNotFound(tarfile.to_path_buf()));
    }
    let imagerepo = imagerepo.unwrap_or(IMPORTED_IMAGEREPO);
    begin_tag_load(repo, imagerepo, tag)?;

    let layer_id = Unique::new().layer_v1();
    let layersdir = repo.layersdir();
    let layer_file = layersdir.join(format!("{layer_id}.layer"));
    let json_file = layersdir.join(format!("{layer_id}.json"));

    let placed = if move_tarball {
        place_file(tarfile, &layer_file)
    } else {
        fs::copy(tarfile, &layer_file).map(|_| ())
    };
    placed.map_err(|e| Error::LayerMigrationFailed {
        layer_id: layer_id.clone(),
        reason: e.to_string(),
    })?;

    if !repo.add_image_layer(&layer_file, None) {
        return Err(Error::RepositoryFailed("add_image_layer".to_string()));
    }
    if !repo.save_json(ANCESTRY_FILE, &json!([layer_id])) {
        return Err(Error::RepositoryFailed("save_json(ancestry)".to_string()));
    }

    let size = fs::metadata(&layer_file).map(|m| m.len()).unwrap_or(0);
    let container_json = create_container_meta(&layer_id, "imported", size);
    if !repo.save_json(&json_file.to_string_lossy(), &container_json) {
        return Err(Error::RepositoryFailed("save_json(layer json)".to_string()));
    }
    if !repo.add_image_layer(&json_file, None) {
        return Err(Error::RepositoryFailed("add_image_layer".to_string()));
    }

    info!(imagerepo, tag, layer_id, "imported tarball as image");
    Ok(layer_id)
}

/// Imports a bare tarball directly as a ready-to-run container.
///
/// No image is created; the tarball becomes the container's root
/// filesystem and a synthesized config its `container.json`. A missing
/// repository name defaults to `IMPORTED`. Returns the new container id.
pub fn import_tocontainer(
    repo: &mut dyn Repository,
    tarfile: &Path,
    imagerepo: Option<&str>,
    tag: &str,
    container_name: Option<&str>,
) -> Result<String> {
    if !tarfile.is_file() {
        return Err(Error::TarFileNotFound(tarfile.to_path_buf()));
    }
    let imagerepo = imagerepo.unwrap_or(IMPORTED_IMAGEREPO);
    check_container_name(repo, container_name)?;

    let unique = Unique::new();
    let basename = tarfile
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let container_id = unique.uuid(&basename);

    let cdir = repo
        .setup_container(imagerepo, tag, &container_id)
        .ok_or_else(|| Error::ContainerCreateFailed {
            id: container_id.clone(),
            reason: "setup_container failed".to_string(),
        })?;

    let rootdir = cdir.join("ROOT");
    fs::create_dir_all(&rootdir)?;
    untar_saved_container(tarfile, &rootdir)?;

    let size = fs::metadata(tarfile).map(|m| m.len()).unwrap_or(0);
    let container_json = create_container_meta(&unique.layer_v1(), "imported", size);
    let json_path = cdir.join("container.json");
    if !repo.save_json(&json_path.to_string_lossy(), &container_json) {
        return Err(Error::ContainerCreateFailed {
            id: container_id,
            reason: "failed to write container.json".to_string(),
        });
    }

    apply_container_name(repo, &container_id, container_name);
    info!(container_id, "imported tarball as container");
    Ok(container_id)
}

/// Re-instantiates a previously exported container tarball.
///
/// The archive already contains the container tree (`ROOT/` plus
/// `container.json`); it is extracted as-is under a fresh container id.
pub fn import_clone(
    repo: &mut dyn Repository,
    tarfile: &Path,
    container_name: Option<&str>,
) -> Result<String> {
    if !tarfile.is_file() {
        return Err(Error::TarFileNotFound(tarfile.to_path_buf()));
    }
    check_container_name(repo, container_name)?;

    let basename = tarfile
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let container_id = Unique::new().uuid(&basename);

    let cdir = repo
        .setup_container(CLONED_IMAGEREPO, crate::constants::DEFAULT_TAG, &container_id)
        .ok_or_else(|| Error::ContainerCreateFailed {
            id: container_id.clone(),
            reason: "setup_container failed".to_string(),
        })?;
    untar_saved_container(tarfile, &cdir)?;

    apply_container_name(repo, &container_id, container_name);
    info!(container_id, "imported exported container");
    Ok(container_id)
}

/// Duplicates an existing container under a fresh id.
///
/// The source's execution-mode setting travels with the copied tree;
/// filesystem-based modes (`F*`) are re-applied so mode-specific binary
/// bindings are regenerated for the new container id.
pub fn clone_container(
    repo: &mut dyn Repository,
    source_id: &str,
    container_name: Option<&str>,
) -> Result<String> {
    let src_dir = repo
        .get_container_dir(source_id)
        .ok_or_else(|| Error::ContainerNotFound(source_id.to_string()))?;
    check_container_name(repo, container_name)?;

    let dest_id = Unique::new().uuid(source_id);
    let dest_dir = repo
        .setup_container(CLONED_IMAGEREPO, crate::constants::DEFAULT_TAG, &dest_id)
        .ok_or_else(|| Error::ContainerCreateFailed {
            id: dest_id.clone(),
            reason: "setup_container failed".to_string(),
        })?;
    copy_tree(&src_dir, &dest_dir)?;

    apply_container_name(repo, &dest_id, container_name);

    if let Some(mode) = repo.get_execmode(source_id) {
        if mode.starts_with('F') && !repo.set_execmode(&dest_id, &mode) {
            warn!(dest_id, mode, "failed to re-apply execution mode to clone");
        }
    }

    info!(source_id, dest_id, "cloned container");
    Ok(dest_id)
}

fn check_container_name(repo: &mut dyn Repository, name: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        if repo.get_container_id(name).is_some() {
            return Err(Error::ContainerNameExists(name.to_string()));
        }
    }
    Ok(())
}

fn apply_container_name(repo: &mut dyn Repository, container_id: &str, name: Option<&str>) {
    if let Some(name) = name {
        if !repo.set_container_name(container_id, name) {
            warn!(container_id, name, "failed to set container name");
        }
    }
}

/// Recursive directory copy, following the source tree only.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let ftype = entry.file_type()?;
        if ftype.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if ftype.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
