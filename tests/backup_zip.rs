#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn read_manifest(bundle: &Path) -> serde_json::Value {
    let f = File::open(bundle).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    serde_json::from_str(&manifest).expect("manifest json")
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("gradebook-backup-src");
    let workspace2 = temp_dir("gradebook-backup-dst");
    let out_dir = temp_dir("gradebook-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("gradebook.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.gbbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let manifest = read_manifest(&bundle_path);
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT_V1);
    assert_eq!(manifest["dbSha256"], export.db_sha256.as_str());
    assert_eq!(manifest["appVersion"], env!("CARGO_PKG_VERSION"));
    let exported_at = manifest["exportedAt"].as_str().expect("exportedAt");
    assert!(chrono::DateTime::parse_from_rfc3339(exported_at).is_ok());
    {
        let f = File::open(&bundle_path).expect("open bundle");
        let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
        archive
            .by_name("db/gradebook.sqlite3")
            .expect("database entry in bundle");
    }

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("gradebook.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_rejected_and_target_left_alone() {
    let out_dir = temp_dir("gradebook-backup-tamper");
    let workspace = temp_dir("gradebook-backup-tamper-dst");
    std::fs::write(workspace.join("gradebook.sqlite3"), b"keep-me").expect("write existing db");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(
            serde_json::json!({
                "format": backup::BUNDLE_FORMAT_V1,
                "version": 1,
                "dbSha256": "0000000000000000000000000000000000000000000000000000000000000000"
            })
            .to_string()
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/gradebook.sqlite3", opts).expect("db entry");
        zip.write_all(b"swapped").expect("write db");
        zip.finish().expect("finish zip");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("checksum mismatch");
    assert!(e.to_string().contains("checksum"));
    let kept = std::fs::read(workspace.join("gradebook.sqlite3")).expect("read kept db");
    assert_eq!(kept, b"keep-me");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn legacy_sqlite_import_is_supported() {
    let out_dir = temp_dir("gradebook-backup-legacy");
    let workspace = temp_dir("gradebook-backup-legacy-dst");

    let legacy_file = out_dir.join("legacy.sqlite3");
    let bytes = b"legacy-sqlite-copy";
    std::fs::write(&legacy_file, bytes).expect("write legacy sqlite file");

    let import =
        backup::import_workspace_bundle(&legacy_file, &workspace).expect("import legacy sqlite");
    assert_eq!(import.bundle_format_detected, "legacy-sqlite3");

    let restored = std::fs::read(workspace.join("gradebook.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_bundle_format_is_rejected() {
    let out_dir = temp_dir("gradebook-backup-format");
    let workspace = temp_dir("gradebook-backup-format-dst");

    let bundle_path = out_dir.join("foreign.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest entry");
        zip.write_all(br#"{"format":"someone-else-v9","version":9}"#)
            .expect("write manifest");
        zip.start_file("db/gradebook.sqlite3", opts).expect("db entry");
        zip.write_all(b"payload").expect("write db");
        zip.finish().expect("finish zip");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("foreign format");
    assert!(e.to_string().contains("unsupported bundle format"));
    assert!(!workspace.join("gradebook.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
