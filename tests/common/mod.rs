//! Shared test double: a tempdir-backed `Repository` implementation.
//!
//! Mirrors the collaborating repository's contract closely enough for the
//! loader paths under test: a current repo:tag selected by `cd_imagerepo`
//! / `setup_tag`, a flat layer directory, tag-scoped JSON documents, and
//! simple container bookkeeping. It also counts mutating calls so tests
//! can assert that precondition failures touch nothing.

#![allow(dead_code)]

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use stevedore::Repository;
use tempfile::TempDir;

pub struct TempRepository {
    _tmp: TempDir,
    base: PathBuf,
    cur_repo: Option<String>,
    cur_tagdir: Option<PathBuf>,
    names: HashMap<String, String>,
    /// Layer files registered via `add_image_layer`, in call order.
    pub layers_added: Vec<PathBuf>,
    /// Count of mutating operations (everything except reads/probes).
    pub mutations: usize,
}

impl TempRepository {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().to_path_buf();
        fs::create_dir_all(base.join("layers")).unwrap();
        fs::create_dir_all(base.join("repos")).unwrap();
        fs::create_dir_all(base.join("containers")).unwrap();
        Self {
            _tmp: tmp,
            base,
            cur_repo: None,
            cur_tagdir: None,
            names: HashMap::new(),
            layers_added: Vec::new(),
            mutations: 0,
        }
    }

    fn repo_dir(&self, imagerepo: &str) -> PathBuf {
        self.base
            .join("repos")
            .join(imagerepo.replace(['/', ':'], "_"))
    }

    pub fn tag_dir(&self, imagerepo: &str, tag: &str) -> PathBuf {
        self.repo_dir(imagerepo).join(tag)
    }

    pub fn has_tag(&self, imagerepo: &str, tag: &str) -> bool {
        self.tag_dir(imagerepo, tag).is_dir()
    }

    /// Reads the ancestry record written for a tag, if any.
    pub fn ancestry(&self, imagerepo: &str, tag: &str) -> Option<Vec<String>> {
        let raw = fs::read(self.tag_dir(imagerepo, tag).join("ancestry")).ok()?;
        let value: Value = serde_json::from_slice(&raw).ok()?;
        Some(
            value
                .as_array()?
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn container_dir(&self, container_id: &str) -> PathBuf {
        self.base.join("containers").join(container_id)
    }
}

impl Repository for TempRepository {
    fn cd_imagerepo(&mut self, imagerepo: &str, tag: &str) -> bool {
        let dir = self.tag_dir(imagerepo, tag);
        if dir.is_dir() {
            self.cur_repo = Some(imagerepo.to_string());
            self.cur_tagdir = Some(dir);
            true
        } else {
            false
        }
    }

    fn setup_imagerepo(&mut self, imagerepo: &str) -> Option<bool> {
        self.mutations += 1;
        let dir = self.repo_dir(imagerepo);
        let created = !dir.is_dir();
        fs::create_dir_all(&dir).ok()?;
        self.cur_repo = Some(imagerepo.to_string());
        Some(created)
    }

    fn setup_tag(&mut self, tag: &str) -> Option<PathBuf> {
        self.mutations += 1;
        let repo = self.cur_repo.clone()?;
        let dir = self.tag_dir(&repo, tag);
        fs::create_dir_all(&dir).ok()?;
        self.cur_tagdir = Some(dir.clone());
        Some(dir)
    }

    fn set_version(&mut self, version: &str) -> bool {
        self.mutations += 1;
        match &self.cur_tagdir {
            Some(dir) => fs::write(dir.join("version"), version).is_ok(),
            None => false,
        }
    }

    fn add_image_layer(&mut self, filename: &Path, linkname: Option<&str>) -> bool {
        self.mutations += 1;
        if !filename.is_file() {
            return false;
        }
        if let (Some(dir), Some(link)) = (&self.cur_tagdir, linkname) {
            if fs::copy(filename, dir.join(link)).is_err() {
                return false;
            }
        }
        self.layers_added.push(filename.to_path_buf());
        true
    }

    fn save_json(&mut self, name: &str, obj: &Value) -> bool {
        self.mutations += 1;
        let path = if name.contains('/') {
            PathBuf::from(name)
        } else {
            match &self.cur_tagdir {
                Some(dir) => dir.join(name),
                None => return false,
            }
        };
        serde_json::to_vec(obj)
            .ok()
            .and_then(|bytes| fs::write(path, bytes).ok())
            .is_some()
    }

    fn load_json(&mut self, name: &str) -> Option<Value> {
        let path = if name.contains('/') {
            PathBuf::from(name)
        } else {
            self.cur_tagdir.as_ref()?.join(name)
        };
        serde_json::from_slice(&fs::read(path).ok()?).ok()
    }

    fn layersdir(&self) -> PathBuf {
        self.base.join("layers")
    }

    fn get_image_attributes(&mut self) -> Option<(Value, Vec<PathBuf>)> {
        let tagdir = self.cur_tagdir.clone()?;
        let ancestry: Value = serde_json::from_slice(&fs::read(tagdir.join("ancestry")).ok()?).ok()?;
        let ids: Vec<String> = ancestry
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();

        let container_json = self
            .load_json("container.json")
            .or_else(|| {
                let top = ids.first()?;
                let path = self.layersdir().join(format!("{top}.json"));
                serde_json::from_slice(&fs::read(path).ok()?).ok()
            })
            .unwrap_or_else(|| serde_json::json!({}));

        // ancestry is newest-first; attributes are consumed oldest-first
        let files = ids
            .iter()
            .rev()
            .map(|id| self.layersdir().join(format!("{id}.layer")))
            .collect();
        Some((container_json, files))
    }

    fn get_container_id(&mut self, container_name: &str) -> Option<String> {
        self.names.get(container_name).cloned()
    }

    fn setup_container(
        &mut self,
        imagerepo: &str,
        tag: &str,
        container_id: &str,
    ) -> Option<PathBuf> {
        self.mutations += 1;
        let dir = self.container_dir(container_id);
        fs::create_dir_all(&dir).ok()?;
        fs::write(dir.join("imagerepo.name"), format!("{imagerepo}:{tag}")).ok()?;
        Some(dir)
    }

    fn get_container_dir(&mut self, container_id: &str) -> Option<PathBuf> {
        let dir = self.container_dir(container_id);
        dir.is_dir().then_some(dir)
    }

    fn set_container_name(&mut self, container_id: &str, container_name: &str) -> bool {
        self.mutations += 1;
        self.names
            .insert(container_name.to_string(), container_id.to_string());
        true
    }

    fn get_execmode(&mut self, container_id: &str) -> Option<String> {
        fs::read_to_string(self.container_dir(container_id).join("execmode")).ok()
    }

    fn set_execmode(&mut self, container_id: &str, mode: &str) -> bool {
        self.mutations += 1;
        fs::write(self.container_dir(container_id).join("execmode"), mode).is_ok()
    }
}
