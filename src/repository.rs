//! Local image repository collaborator interface.
//!
//! The persistent repository (directory layout, tag and container
//! bookkeeping, protection flags) is an external collaborator. The loader
//! only consumes the operations below; it never walks or mutates the
//! repository tree directly except through them.
//!
//! ## Statefulness
//!
//! The repository keeps a notion of the *current* repo:tag, established by
//! [`Repository::cd_imagerepo`] or [`Repository::setup_tag`]. Operations
//! such as [`Repository::save_json`] and [`Repository::add_image_layer`]
//! act relative to it. The loader is single-threaded per invocation and
//! drives these calls in sequence; concurrent loads against one repository
//! require external serialization (the exists-check and the subsequent
//! create are two separate calls).
//!
//! ## Failure convention
//!
//! Operations report failure through `bool` / `Option` returns rather than
//! errors; the collaborator's layout is opaque here and the loader maps
//! failures onto its own [`Error`](crate::error::Error) variants.

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Operations the loader requires from the local image repository.
pub trait Repository {
    /// Makes `imagerepo:tag` the current tag. Returns `false` when the tag
    /// does not exist (the loader uses this as its existence probe).
    fn cd_imagerepo(&mut self, imagerepo: &str, tag: &str) -> bool;

    /// Creates the repository scaffolding for `imagerepo` and makes it
    /// current. Returns `None` on failure.
    fn setup_imagerepo(&mut self, imagerepo: &str) -> Option<bool>;

    /// Creates `tag` under the current repository and makes it current.
    /// Returns the tag directory, or `None` on failure.
    fn setup_tag(&mut self, tag: &str) -> Option<PathBuf>;

    /// Stamps the storage version on the current tag.
    fn set_version(&mut self, version: &str) -> bool;

    /// Registers a layer file (already placed in [`Repository::layersdir`])
    /// with the current tag. `linkname` gives the file an additional
    /// tag-scoped name, e.g. `container.json` for an image config.
    fn add_image_layer(&mut self, filename: &Path, linkname: Option<&str>) -> bool;

    /// Writes a JSON document. A bare `name` is scoped to the current tag;
    /// a name containing a path separator is treated as a full path.
    fn save_json(&mut self, name: &str, obj: &Value) -> bool;

    /// Reads a JSON document previously written with [`Repository::save_json`].
    fn load_json(&mut self, name: &str) -> Option<Value>;

    /// Directory holding the flat `<layer_id>.layer` / `<layer_id>.json`
    /// content files.
    fn layersdir(&self) -> PathBuf;

    /// Returns the current tag's image config and its layer data files
    /// ordered oldest-first. Used by the `save` path.
    fn get_image_attributes(&mut self) -> Option<(Value, Vec<PathBuf>)>;

    // =========================================================================
    // Container bookkeeping (import / clone paths)
    // =========================================================================

    /// Resolves a container name alias to a container id.
    fn get_container_id(&mut self, container_name: &str) -> Option<String>;

    /// Creates the directory tree for a new container instantiated from
    /// `imagerepo:tag`. Returns the container directory.
    fn setup_container(&mut self, imagerepo: &str, tag: &str, container_id: &str)
        -> Option<PathBuf>;

    /// Returns an existing container's directory.
    fn get_container_dir(&mut self, container_id: &str) -> Option<PathBuf>;

    /// Associates a name alias with a container id.
    fn set_container_name(&mut self, container_id: &str, container_name: &str) -> bool;

    /// Returns the container's execution mode (e.g. `P1`, `F3`), if set.
    fn get_execmode(&mut self, container_id: &str) -> Option<String>;

    /// Applies an execution mode to a container, regenerating any
    /// mode-specific bindings for that container id.
    fn set_execmode(&mut self, container_id: &str, mode: &str) -> bool;
}
