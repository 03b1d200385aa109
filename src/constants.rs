//! # Loader Constants
//!
//! Format marker filenames, identifier lengths, and defensive bounds used
//! throughout the load/import pipeline. These constants are the single
//! source of truth for the on-disk conventions of both supported formats.
//!
//! ## Cross-References
//!
//! - [`crate::docker`]: Uses the Docker-save marker files and layer id length
//! - [`crate::oci`]: Uses the OCI marker files, media types, and depth guard
//! - [`crate::unique`]: Uses the identifier lengths

// =============================================================================
// Docker-save format markers
// =============================================================================

/// Manifest file present in newer Docker-save trees.
pub const DOCKER_MANIFEST_FILE: &str = "manifest.json";

/// Legacy repositories file mapping repo -> tag -> top layer id.
pub const DOCKER_REPOSITORIES_FILE: &str = "repositories";

/// Version marker written into each per-layer directory.
pub const DOCKER_LAYER_VERSION_FILE: &str = "VERSION";

/// Per-layer metadata file inside a 64-hex layer directory.
pub const DOCKER_LAYER_JSON_FILE: &str = "json";

/// Layer version written by the `save` path.
pub const DOCKER_LAYER_VERSION: &str = "1.0";

// =============================================================================
// OCI layout format markers
// =============================================================================

/// Layout-version marker file; its presence identifies an OCI layout.
pub const OCI_LAYOUT_FILE: &str = "oci-layout";

/// Top-level index of an OCI layout.
pub const OCI_INDEX_FILE: &str = "index.json";

/// Directory holding content-addressed blobs, one subdirectory per algorithm.
pub const OCI_BLOBS_DIR: &str = "blobs";

/// Media type of a resolvable image manifest.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of a nested image index.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation carrying the `repo:tag` reference of an index entry.
pub const OCI_REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Maximum nesting depth when resolving indices that reference indices.
///
/// The OCI spec assumes index graphs form a DAG and real layouts nest one
/// or two levels at most. The guard turns a malformed self-referential
/// layout into a clean per-branch failure instead of unbounded recursion.
pub const MAX_INDEX_DEPTH: usize = 8;

// =============================================================================
// Repository conventions
// =============================================================================

/// Repository storage version stamped on every loaded tag.
pub const REPO_VERSION_V1: &str = "v1";

/// Link name under which an image config is registered for a tag.
pub const CONTAINER_JSON_LINK: &str = "container.json";

/// Name of the ancestry record written per tag (layer ids, newest first).
pub const ANCESTRY_FILE: &str = "ancestry";

// =============================================================================
// Identifier lengths
// =============================================================================

/// Length of a legacy v1 layer id (SHA-256 shaped, hex).
pub const V1_LAYER_ID_LEN: usize = 64;

/// Length of a synthesized image repository name (hex).
pub const IMAGE_NAME_LEN: usize = 16;

/// Length of a synthesized image tag (hex).
pub const IMAGE_TAG_LEN: usize = 10;

/// Prefix for uniquely named temporary files and directories.
pub const TMP_FILE_PREFIX: &str = "stevedore";

// =============================================================================
// Synthesized metadata
// =============================================================================

/// Creation timestamp format of synthesized legacy v1 configs.
pub const CREATED_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000000000Z";

/// Placeholder repository name for containers imported without one.
pub const IMPORTED_IMAGEREPO: &str = "IMPORTED";

/// Placeholder repository name for cloned containers.
pub const CLONED_IMAGEREPO: &str = "CLONE";

/// Default tag used when the caller supplies none.
pub const DEFAULT_TAG: &str = "latest";
