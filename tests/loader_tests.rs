//! Tests for the common load/import engine.
//!
//! Validates format sniffing, layer migration naming rules, archive
//! extraction, and the bare-tarball import and clone paths.

mod common;

use common::TempRepository;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use stevedore::{
    clone_container, get_imagedir_type, import_clone, import_tocontainer, import_toimage,
    move_layer_to_v1repo, untar_saved_container, Error, ImageFormat, Repository,
};
use tempfile::TempDir;

fn make_tarball(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (entry_name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry_name, *data).unwrap();
    }
    builder.finish().unwrap();
    path
}

fn make_gzipped_tarball(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let plain = make_tarball(dir, "plain.tar", entries);
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(&fs::read(&plain).unwrap()).unwrap();
    encoder.finish().unwrap();
    path
}

// =============================================================================
// Format Detection Tests
// =============================================================================

#[test]
fn test_imagedir_type_detects_oci() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("oci-layout"), "{}").unwrap();
    assert_eq!(get_imagedir_type(temp_dir.path()), Some(ImageFormat::Oci));
}

#[test]
fn test_imagedir_type_detects_docker() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("manifest.json"), "[]").unwrap();
    assert_eq!(get_imagedir_type(temp_dir.path()), Some(ImageFormat::Docker));
}

#[test]
fn test_imagedir_type_prefers_oci_over_docker() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("oci-layout"), "{}").unwrap();
    fs::write(temp_dir.path().join("manifest.json"), "[]").unwrap();
    assert_eq!(get_imagedir_type(temp_dir.path()), Some(ImageFormat::Oci));
}

#[test]
fn test_imagedir_type_rejects_empty_dir() {
    let temp_dir = TempDir::new().unwrap();
    assert_eq!(get_imagedir_type(temp_dir.path()), None);
}

// =============================================================================
// Layer Migration Tests
// =============================================================================

fn repo_with_tag() -> TempRepository {
    let mut repo = TempRepository::new();
    repo.setup_imagerepo("myrepo").unwrap();
    repo.setup_tag("latest").unwrap();
    repo
}

#[test]
fn test_migrate_json_file_gets_json_suffix() {
    let mut repo = repo_with_tag();
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("json");
    fs::write(&src, "{}").unwrap();

    move_layer_to_v1repo(&mut repo, &src, "lay1", None).unwrap();

    assert!(repo.layersdir().join("lay1.json").is_file());
    assert_eq!(repo.layers_added.len(), 1);
}

#[test]
fn test_migrate_tarball_gets_layer_suffix() {
    let mut repo = repo_with_tag();
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("layer.tar");
    fs::write(&src, "data").unwrap();

    move_layer_to_v1repo(&mut repo, &src, "lay1", None).unwrap();

    assert!(repo.layersdir().join("lay1.layer").is_file());
}

#[test]
fn test_migrate_digest_named_blob() {
    let mut repo = repo_with_tag();
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("blobdata");
    fs::write(&src, "data").unwrap();

    move_layer_to_v1repo(&mut repo, &src, "sha256:abc123", None).unwrap();

    assert!(repo.layersdir().join("abc123.layer").is_file());
}

#[test]
fn test_migrate_unrecognized_shape_fails() {
    let mut repo = repo_with_tag();
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("blobdata");
    fs::write(&src, "data").unwrap();

    let result = move_layer_to_v1repo(&mut repo, &src, "noalgo", None);

    assert!(matches!(result, Err(Error::UnrecognizedLayerFile(_))));
    assert!(repo.layers_added.is_empty());
}

#[test]
fn test_migrate_removes_source_on_rename() {
    let mut repo = repo_with_tag();
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("layer.tar");
    fs::write(&src, "data").unwrap();

    move_layer_to_v1repo(&mut repo, &src, "lay1", None).unwrap();

    assert!(!src.exists(), "source should move, not copy");
}

#[cfg(unix)]
#[test]
fn test_migrate_falls_back_to_copy_when_rename_fails() {
    use std::os::unix::fs::PermissionsExt;

    let mut repo = repo_with_tag();
    let temp_dir = TempDir::new().unwrap();
    let srcdir = temp_dir.path().join("sealed");
    fs::create_dir(&srcdir).unwrap();
    let src = srcdir.join("layer.tar");
    fs::write(&src, "data").unwrap();
    // a read-only parent makes rename fail while the file stays readable
    fs::set_permissions(&srcdir, fs::Permissions::from_mode(0o555)).unwrap();

    let result = move_layer_to_v1repo(&mut repo, &src, "lay1", None);

    fs::set_permissions(&srcdir, fs::Permissions::from_mode(0o755)).unwrap();
    result.unwrap();
    assert!(repo.layersdir().join("lay1.layer").is_file());
    assert_eq!(repo.layers_added.len(), 1, "copied layer must be registered");
    assert!(src.is_file(), "copy fallback leaves the source in place");
}

#[test]
fn test_migrate_with_linkname_registers_link() {
    let mut repo = repo_with_tag();
    let temp_dir = TempDir::new().unwrap();
    let src = temp_dir.path().join("config.json");
    fs::write(&src, r#"{"architecture":"amd64"}"#).unwrap();

    move_layer_to_v1repo(&mut repo, &src, "cfg1", Some("container.json")).unwrap();

    assert!(repo.tag_dir("myrepo", "latest").join("container.json").is_file());
}

// =============================================================================
// Archive Extraction Tests
// =============================================================================

#[test]
fn test_untar_extracts_entries() {
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(
        temp_dir.path(),
        "image.tar",
        &[("a.txt", b"alpha"), ("sub/b.txt", b"beta")],
    );
    let dest = temp_dir.path().join("out");
    fs::create_dir(&dest).unwrap();

    untar_saved_container(&tarball, &dest).unwrap();

    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(dest.join("sub/b.txt")).unwrap(), b"beta");
}

#[test]
fn test_untar_detects_gzip_by_magic() {
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_gzipped_tarball(temp_dir.path(), "image.tgz", &[("a.txt", b"alpha")]);
    let dest = temp_dir.path().join("out");
    fs::create_dir(&dest).unwrap();

    untar_saved_container(&tarball, &dest).unwrap();

    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
}

#[test]
fn test_untar_allows_dotted_file_names() {
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "image.tar", &[("a..b/c..d.txt", b"dots")]);
    let dest = temp_dir.path().join("out");
    fs::create_dir(&dest).unwrap();

    untar_saved_container(&tarball, &dest).unwrap();

    assert_eq!(fs::read(dest.join("a..b/c..d.txt")).unwrap(), b"dots");
}

#[test]
fn test_untar_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let result = untar_saved_container(&temp_dir.path().join("absent.tar"), temp_dir.path());
    assert!(matches!(result, Err(Error::TarFileNotFound(_))));
}

#[test]
fn test_untar_garbage_input_fails() {
    let temp_dir = TempDir::new().unwrap();
    let garbage = temp_dir.path().join("bad.tar");
    fs::write(&garbage, b"this is not a tar archive at all").unwrap();
    let dest = temp_dir.path().join("out");
    fs::create_dir(&dest).unwrap();

    let result = untar_saved_container(&garbage, &dest);

    assert!(matches!(result, Err(Error::ExtractionFailed { .. })));
}

// =============================================================================
// Import-to-Image Tests
// =============================================================================

#[test]
fn test_import_toimage_creates_single_layer_image() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "rootfs.tar", &[("bin/sh", b"#!")]);

    let layer_id = import_toimage(&mut repo, &tarball, Some("imported"), "latest", false).unwrap();

    assert_eq!(layer_id.len(), 64);
    assert!(repo.has_tag("imported", "latest"));
    assert_eq!(
        repo.ancestry("imported", "latest").unwrap(),
        vec![layer_id.clone()]
    );
    assert!(repo.layersdir().join(format!("{layer_id}.layer")).is_file());
    assert!(repo.layersdir().join(format!("{layer_id}.json")).is_file());
    // copy mode leaves the source in place
    assert!(tarball.is_file());
}

#[test]
fn test_import_toimage_defaults_to_imported_repo() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "rootfs.tar", &[("f", b"x")]);

    let layer_id = import_toimage(&mut repo, &tarball, None, "latest", false).unwrap();

    assert!(repo.has_tag("IMPORTED", "latest"));
    assert_eq!(repo.ancestry("IMPORTED", "latest").unwrap(), vec![layer_id]);
}

#[test]
fn test_import_toimage_move_consumes_source() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "rootfs.tar", &[("etc/os", b"x")]);

    import_toimage(&mut repo, &tarball, Some("imported"), "latest", true).unwrap();

    assert!(!tarball.exists());
}

#[test]
fn test_import_toimage_missing_tarball_touches_nothing() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();

    let result = import_toimage(
        &mut repo,
        &temp_dir.path().join("absent.tar"),
        Some("imported"),
        "latest",
        false,
    );

    assert!(matches!(result, Err(Error::TarFileNotFound(_))));
    assert_eq!(repo.mutations, 0, "no repository state should change");
}

#[test]
fn test_import_toimage_existing_tag_fails() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "rootfs.tar", &[("f", b"x")]);

    import_toimage(&mut repo, &tarball, Some("imported"), "latest", false).unwrap();
    let second = make_tarball(temp_dir.path(), "other.tar", &[("g", b"y")]);
    let result = import_toimage(&mut repo, &second, Some("imported"), "latest", false);

    assert!(matches!(result, Err(Error::TagAlreadyExists { .. })));
}

#[test]
fn test_import_toimage_config_has_v1_shape() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "rootfs.tar", &[("f", b"xy")]);

    let layer_id = import_toimage(&mut repo, &tarball, Some("imported"), "latest", false).unwrap();

    let raw = fs::read(repo.layersdir().join(format!("{layer_id}.json"))).unwrap();
    let config: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(config["id"], layer_id.as_str());
    assert_eq!(config["comment"], "imported");
    assert!(config["architecture"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(config["os"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(config["container_config"].is_object());
}

// =============================================================================
// Import-to-Container Tests
// =============================================================================

#[test]
fn test_import_tocontainer_extracts_rootfs() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "rootfs.tar", &[("etc/hostname", b"box")]);

    let container_id =
        import_tocontainer(&mut repo, &tarball, Some("imported"), "latest", Some("mybox")).unwrap();

    let cdir = repo.container_dir(&container_id);
    assert_eq!(fs::read(cdir.join("ROOT/etc/hostname")).unwrap(), b"box");
    assert!(cdir.join("container.json").is_file());
    assert_eq!(repo.get_container_id("mybox").unwrap(), container_id);
}

#[test]
fn test_import_tocontainer_rejects_taken_name() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(temp_dir.path(), "rootfs.tar", &[("f", b"x")]);

    import_tocontainer(&mut repo, &tarball, Some("imported"), "latest", Some("mybox")).unwrap();
    let result = import_tocontainer(&mut repo, &tarball, Some("imported"), "latest", Some("mybox"));

    assert!(matches!(result, Err(Error::ContainerNameExists(_))));
}

// =============================================================================
// Clone Tests
// =============================================================================

#[test]
fn test_import_clone_restores_exported_tree() {
    let mut repo = TempRepository::new();
    let temp_dir = TempDir::new().unwrap();
    let tarball = make_tarball(
        temp_dir.path(),
        "exported.tar",
        &[("container.json", b"{}"), ("ROOT/etc/passwd", b"root")],
    );

    let container_id = import_clone(&mut repo, &tarball, None).unwrap();

    let cdir = repo.container_dir(&container_id);
    assert!(cdir.join("container.json").is_file());
    assert_eq!(fs::read(cdir.join("ROOT/etc/passwd")).unwrap(), b"root");
}

#[test]
fn test_clone_container_copies_tree() {
    let mut repo = TempRepository::new();
    let src_id = "src-container";
    let src_dir = repo.setup_container("myrepo", "latest", src_id).unwrap();
    fs::create_dir_all(src_dir.join("ROOT/etc")).unwrap();
    fs::write(src_dir.join("ROOT/etc/passwd"), b"root").unwrap();
    fs::write(src_dir.join("container.json"), b"{}").unwrap();

    let dest_id = clone_container(&mut repo, src_id, Some("copy")).unwrap();

    let dest_dir = repo.container_dir(&dest_id);
    assert_ne!(dest_id, src_id);
    assert_eq!(fs::read(dest_dir.join("ROOT/etc/passwd")).unwrap(), b"root");
    assert_eq!(repo.get_container_id("copy").unwrap(), dest_id);
}

#[test]
fn test_clone_container_reapplies_fs_execmode() {
    let mut repo = TempRepository::new();
    let src_id = "src-container";
    repo.setup_container("myrepo", "latest", src_id).unwrap();
    repo.set_execmode(src_id, "F3");

    let dest_id = clone_container(&mut repo, src_id, None).unwrap();

    assert_eq!(repo.get_execmode(&dest_id).unwrap(), "F3");
}

#[test]
fn test_clone_container_missing_source_fails() {
    let mut repo = TempRepository::new();
    let result = clone_container(&mut repo, "no-such-id", None);
    assert!(matches!(result, Err(Error::ContainerNotFound(_))));
}
