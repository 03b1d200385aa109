//! # stevedore
//!
//! **Daemon-less loader for container image interchange formats**
//!
//! This crate loads, imports, and re-materializes container images stored
//! in the two on-disk interchange formats — Docker-save tarballs and OCI
//! image layouts — into a local content-addressed v1-style repository,
//! without depending on a container runtime daemon.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         LocalFileApi                                │
//! │        load(file) ── save(tags, file) ── import_*() / clone         │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │   archive ─► untar ─► scratch dir ─► format sniff                   │
//! │                                        │                            │
//! │          ┌─────────────────────────────┼──────────────────────┐     │
//! │          ▼                             ▼                      │     │
//! │  ┌───────────────────┐        ┌──────────────────┐            │     │
//! │  │   DockerLoader    │        │    OciLoader     │            │     │
//! │  │ repositories /    │        │ index.json /     │            │     │
//! │  │ manifest.json /   │        │ nested indices / │            │     │
//! │  │ parent chains     │        │ blobs/algo/hash  │            │     │
//! │  └─────────┬─────────┘        └────────┬─────────┘            │     │
//! │            └──────────────┬────────────┘                      │     │
//! │                           ▼                                   │     │
//! │               Common Load/Import Engine                       │     │
//! │   layer migration │ tag bookkeeping │ metadata synthesis      │     │
//! ├───────────────────────────┼───────────────────────────────────┤     │
//! │                           ▼                                         │
//! │              Repository (external collaborator)                     │
//! │   flat <id>.layer / <id>.json files │ ancestry │ containers         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Layer-Graph Linearization
//!
//! The core problem is reconstructing a single linear ancestry from two
//! divergent schemas:
//!
//! - **Docker-save**: per-layer directories named by 64-hex-char id, each
//!   layer's `json` possibly naming a `parent`. The chain is linearized by
//!   following parent pointers from the most-derived layer, with cyclic or
//!   missing parents terminating the chain instead of looping.
//! - **OCI**: an index (possibly nesting further indices) dereferences
//!   manifests out of a flat content-addressed blob space; each manifest
//!   lists its layers oldest-first and is consumed newest-first.
//!
//! Both resolvers feed the same migration path: every discovered layer and
//! config blob is moved into the repository's flat v1 layer store and a
//! head-first `ancestry` record is written — only after every layer of a
//! tag landed, so partial images are never committed.
//!
//! # Failure Model
//!
//! Per-tag atomicity: a failed layer migration, version mismatch, or
//! structural defect aborts that tag's load with nothing committed for it,
//! while tags already committed in the same multi-tag operation stay
//! committed. Precondition failures (missing archive, tag already exists,
//! container name taken) are detected before any mutation.
//!
//! # Example
//!
//! ```rust,ignore
//! use stevedore::{LocalFileApi, Repository};
//! use std::path::Path;
//!
//! let mut api = LocalFileApi::new(&mut repo);
//!
//! // Load a docker-save tarball
//! let tags = api.load(Path::new("busybox.tar"), None)?;
//!
//! // Import a bare rootfs tarball as a one-layer image
//! let layer_id = api.import_toimage(Path::new("rootfs.tar"), Some("myrepo"), "latest", false)?;
//!
//! // Save it back out as a Docker-save tarball
//! api.save(&[("myrepo".into(), "latest".into())], Path::new("out.tar"))?;
//! ```

pub mod api;
pub mod constants;
pub mod docker;
pub mod error;
pub mod loader;
pub mod oci;
pub mod platform;
pub mod repository;
pub mod unique;

// Re-exports
pub use api::LocalFileApi;
pub use constants::*;
pub use docker::{DockerLoader, DockerStructure, ManifestEntry};
pub use error::{Error, Result};
pub use loader::{
    clone_container, create_container_meta, get_imagedir_type, import_clone, import_tocontainer,
    import_toimage, move_layer_to_v1repo, untar_saved_container, ImageFormat,
};
pub use oci::{OciDescriptor, OciIndex, OciLoader, OciStructure};
pub use repository::Repository;
pub use unique::Unique;
