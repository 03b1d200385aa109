//! Unique identifier generation for synthesized entities.
//!
//! Both format resolvers and the common engine need opaque unique tokens
//! whenever the source format lacks a native identifier: layer ids for bare
//! tarball imports, repository names and tags for anonymous OCI manifests,
//! container ids, and collision-free temporary file names.
//!
//! The generated values are identifiers, not content hashes. Callers only
//! rely on length and charset, never on any relation to file contents.

use crate::constants::{IMAGE_NAME_LEN, IMAGE_TAG_LEN, TMP_FILE_PREFIX, V1_LAYER_ID_LEN};
use rand::Rng;
use uuid::Uuid;

const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Generator for random and name-derived identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unique;

impl Unique {
    /// Creates a generator.
    pub fn new() -> Self {
        Self
    }

    /// Returns a 36-character hyphenated UUID string derived from `name`.
    ///
    /// Composes a v3 (name-based) UUID over a fresh v4 namespace, mixing in
    /// the current time so repeated calls with the same name differ.
    pub fn uuid(&self, name: &str) -> String {
        let namespace = Uuid::new_v4();
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        Uuid::new_v3(&namespace, format!("{name}{now}").as_bytes()).to_string()
    }

    /// Returns a random 16-hex-character image repository name.
    pub fn imagename(&self) -> String {
        random_hex(IMAGE_NAME_LEN)
    }

    /// Returns a random 10-hex-character image tag.
    pub fn imagetag(&self) -> String {
        random_hex(IMAGE_TAG_LEN)
    }

    /// Returns a random 64-hex-character legacy v1 layer id.
    ///
    /// SHA-256 shaped so downstream legacy-format consumers accept it, but
    /// it is a random token, not a digest of anything.
    pub fn layer_v1(&self) -> String {
        random_hex(V1_LAYER_ID_LEN)
    }

    /// Returns a temporary file name unique across concurrent processes.
    ///
    /// Shape: `<prefix>-<pid>-<uuid>-<suffix>`. The pid distinguishes
    /// processes on one host, the uuid distinguishes calls within one.
    pub fn filename(&self, suffix: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            TMP_FILE_PREFIX,
            std::process::id(),
            self.uuid(suffix),
            suffix
        )
    }
}

/// Returns `len` random lowercase hex characters.
fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX_CHARS[rng.gen_range(0..HEX_CHARS.len())] as char)
        .collect()
}
