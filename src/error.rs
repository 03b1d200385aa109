//! Error types for the image load/import pipeline.

use std::path::PathBuf;

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, importing, or saving images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Format / Structure Errors
    // =========================================================================
    /// Image archive file does not exist.
    #[error("image file not found: {0}")]
    ImageFileNotFound(PathBuf),

    /// Extracted directory matches neither supported format.
    #[error("unrecognized image format in {0}")]
    UnrecognizedFormat(PathBuf),

    /// Directory tree violates the expected format structure.
    #[error("invalid {format} structure: {reason}")]
    InvalidStructure {
        format: &'static str,
        reason: String,
    },

    /// No manifest entry matches the requested image tag.
    #[error("no manifest entry for '{imagetag}'")]
    ManifestEntryNotFound { imagetag: String },

    /// Layers in one ancestry chain declare different versions.
    #[error("layer version mismatch in chain: expected '{expected}', found '{found}'")]
    VersionMismatch { expected: String, found: String },

    /// Nested OCI index recursion exceeded the depth guard.
    #[error("nested image index exceeds maximum depth of {limit}")]
    IndexTooDeep { limit: usize },

    /// Blob content does not match its content-addressed name.
    #[error("digest mismatch for blob {digest}: computed {computed}")]
    DigestMismatch { digest: String, computed: String },

    // =========================================================================
    // Migration / Repository Errors
    // =========================================================================
    /// Target tag is already present in the repository.
    #[error("tag already exists: {imagerepo}:{tag}")]
    TagAlreadyExists { imagerepo: String, tag: String },

    /// Requested tag is not present in the repository.
    #[error("tag not found: {imagerepo}:{tag}")]
    TagNotFound { imagerepo: String, tag: String },

    /// Repository could not create the tag scaffolding.
    #[error("failed to set up tag '{imagerepo}:{tag}'")]
    TagSetupFailed { imagerepo: String, tag: String },

    /// Moving a layer or config blob into the repository failed.
    #[error("failed to migrate layer '{layer_id}': {reason}")]
    LayerMigrationFailed { layer_id: String, reason: String },

    /// File name and layer id match none of the recognized shapes.
    #[error("unrecognized layer file shape: {0}")]
    UnrecognizedLayerFile(PathBuf),

    /// A repository collaborator operation reported failure.
    #[error("repository operation failed: {0}")]
    RepositoryFailed(String),

    // =========================================================================
    // Import / Container Errors
    // =========================================================================
    /// Tarball to import does not exist.
    #[error("tar file not found: {0}")]
    TarFileNotFound(PathBuf),

    /// Requested container name is already taken.
    #[error("container name already exists: {0}")]
    ContainerNameExists(String),

    /// Source container for a clone does not exist.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Container scaffolding could not be created.
    #[error("failed to create container '{id}': {reason}")]
    ContainerCreateFailed { id: String, reason: String },

    // =========================================================================
    // Extraction Errors
    // =========================================================================
    /// Archive extraction failed.
    #[error("failed to extract archive {path}: {reason}")]
    ExtractionFailed { path: PathBuf, reason: String },

    /// Archive entry attempts to escape the destination directory.
    #[error("path traversal detected in archive: {path}")]
    PathTraversal { path: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse or serialize error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
