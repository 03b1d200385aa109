//! # Local File API Facade
//!
//! Entry point for everything file-based: detects which interchange
//! format an archive contains and routes to the matching resolver, plus
//! the symmetric `save` path (Docker format only) and the import/clone
//! operations of the common engine.
//!
//! ```rust,ignore
//! use stevedore::{LocalFileApi, Repository};
//!
//! let mut api = LocalFileApi::new(&mut repo);
//! let tags = api.load(Path::new("busybox.tar"), None)?;
//! println!("loaded: {tags:?}");
//! ```

use crate::constants::TMP_FILE_PREFIX;
use crate::docker::DockerLoader;
use crate::error::{Error, Result};
use crate::loader::{self, get_imagedir_type, untar_saved_container, ImageFormat};
use crate::oci::OciLoader;
use crate::repository::Repository;
use std::path::Path;
use tracing::{debug, info};

/// Facade over the load/save/import pipeline for one repository.
pub struct LocalFileApi<'r> {
    repo: &'r mut dyn Repository,
}

impl<'r> LocalFileApi<'r> {
    /// Creates the facade against the given repository.
    pub fn new(repo: &'r mut dyn Repository) -> Self {
        Self { repo }
    }

    /// Loads a saved-image archive (Docker-save tarball or tarred OCI
    /// layout) into the repository.
    ///
    /// The archive is extracted into a scratch directory which is removed
    /// on every exit path. Returns the `imagerepo:tag` names loaded.
    pub fn load(&mut self, imagefile: &Path, imagerepo: Option<&str>) -> Result<Vec<String>> {
        if !imagefile.is_file() {
            return Err(Error::ImageFileNotFound(imagefile.to_path_buf()));
        }
        // scratch dir is dropped (and removed) on success and failure alike
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{TMP_FILE_PREFIX}-load-"))
            .tempdir()?;
        untar_saved_container(imagefile, tmp.path())?;

        match get_imagedir_type(tmp.path()) {
            Some(ImageFormat::Oci) => {
                debug!(imagefile = %imagefile.display(), "detected OCI layout");
                OciLoader::new(&mut *self.repo).load(tmp.path(), imagerepo)
            }
            Some(ImageFormat::Docker) => {
                debug!(imagefile = %imagefile.display(), "detected Docker-save tree");
                DockerLoader::new(&mut *self.repo).load(tmp.path(), imagerepo)
            }
            None => Err(Error::UnrecognizedFormat(imagefile.to_path_buf())),
        }
    }

    /// Saves the given `(imagerepo, tag)` pairs into one Docker-save
    /// tarball. Docker format only; a single failed image aborts the
    /// whole save.
    pub fn save(&mut self, imagetag_list: &[(String, String)], imagefile: &Path) -> Result<()> {
        DockerLoader::new(&mut *self.repo).save(imagetag_list, imagefile)?;
        info!(imagefile = %imagefile.display(), "save complete");
        Ok(())
    }

    /// Imports a bare tarball as a one-layer image. See
    /// [`loader::import_toimage`].
    pub fn import_toimage(
        &mut self,
        tarfile: &Path,
        imagerepo: Option<&str>,
        tag: &str,
        move_tarball: bool,
    ) -> Result<String> {
        loader::import_toimage(&mut *self.repo, tarfile, imagerepo, tag, move_tarball)
    }

    /// Imports a bare tarball directly as a container. See
    /// [`loader::import_tocontainer`].
    pub fn import_tocontainer(
        &mut self,
        tarfile: &Path,
        imagerepo: Option<&str>,
        tag: &str,
        container_name: Option<&str>,
    ) -> Result<String> {
        loader::import_tocontainer(&mut *self.repo, tarfile, imagerepo, tag, container_name)
    }

    /// Re-instantiates an exported container tarball. See
    /// [`loader::import_clone`].
    pub fn import_clone(&mut self, tarfile: &Path, container_name: Option<&str>) -> Result<String> {
        loader::import_clone(&mut *self.repo, tarfile, container_name)
    }

    /// Duplicates an existing container. See [`loader::clone_container`].
    pub fn clone_container(
        &mut self,
        source_id: &str,
        container_name: Option<&str>,
    ) -> Result<String> {
        loader::clone_container(&mut *self.repo, source_id, container_name)
    }
}
