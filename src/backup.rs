//! Workspace bundles: a zip holding the SQLite file plus a manifest that
//! pins its SHA-256. A bare SQLite file is also accepted on import.

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DB_FILE_NAME: &str = "gradebook.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradebook.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
const RAW_SQLITE_FORMAT: &str = "legacy-sqlite3";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
pub const BUNDLE_FORMAT_V1: &str = "gradebook-workspace-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    version: u32,
    #[serde(default)]
    app_version: String,
    #[serde(default)]
    exported_at: String,
    #[serde(default)]
    db_sha256: String,
}

impl Manifest {
    fn for_db(db_sha256: String) -> Self {
        Manifest {
            format: BUNDLE_FORMAT_V1.to_string(),
            version: 1,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            db_sha256,
        }
    }

    fn verify(&self, db_bytes: &[u8]) -> anyhow::Result<()> {
        if self.format != BUNDLE_FORMAT_V1 {
            bail!("unsupported bundle format: {}", self.format);
        }
        let expected = self.db_sha256.to_ascii_lowercase();
        let actual = sha256_hex(db_bytes);
        if expected != actual {
            bail!(
                "database checksum mismatch: manifest {}, bundle {}",
                expected,
                actual
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn write_entry(zip: &mut ZipWriter<File>, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start bundle entry {}", name))?;
    zip.write_all(bytes)
        .with_context(|| format!("failed to write bundle entry {}", name))
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    archive
        .by_name(name)
        .with_context(|| format!("bundle missing {}", name))?
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to extract {}", name))?;
    Ok(bytes)
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!("workspace database not found: {}", db_path.display()));
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.display()))?;
    let manifest = Manifest::for_db(sha256_hex(&db_bytes));

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create bundle {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);

    let entries: [(&str, Vec<u8>); 3] = [
        (MANIFEST_ENTRY, serde_json::to_vec_pretty(&manifest)?),
        (DB_ENTRY, db_bytes),
        (
            META_WORKSPACE_ENTRY,
            serde_json::to_vec_pretty(&serde_json::json!({
                "sourceWorkspace": workspace_path.to_string_lossy(),
                "exportedAt": manifest.exported_at,
            }))?,
        ),
    ];
    for (name, bytes) in &entries {
        write_entry(&mut zip, name, bytes)?;
    }
    zip.finish().context("failed to finalize bundle")?;
    tracing::info!(out = %out_path.display(), sha256 = %manifest.db_sha256, "workspace bundle exported");

    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: entries.len(),
        db_sha256: manifest.db_sha256,
    })
}

/// Restores a bundle (or a raw SQLite file) into `workspace_path`. The
/// existing database is only replaced once the incoming bytes verify.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let (db_bytes, format) = if starts_with_zip_magic(in_path)? {
        let file = File::open(in_path)
            .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
        let mut archive = ZipArchive::new(file).context("invalid zip archive")?;
        let manifest: Manifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
            .context("manifest.json is invalid")?;
        let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
        manifest.verify(&db_bytes)?;
        (db_bytes, manifest.format)
    } else {
        let db_bytes = std::fs::read(in_path)
            .with_context(|| format!("failed to read raw sqlite backup {}", in_path.display()))?;
        (db_bytes, RAW_SQLITE_FORMAT.to_string())
    };

    replace_database(workspace_path, &db_bytes)?;
    tracing::info!(workspace = %workspace_path.display(), format = %format, "workspace bundle imported");
    Ok(ImportSummary {
        bundle_format_detected: format,
    })
}

/// Writes next to the target and renames over it.
fn replace_database(workspace_path: &Path, db_bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.display()))?;
    let dst = workspace_path.join(DB_FILE_NAME);
    let staged = workspace_path.join(format!("{}.importing", DB_FILE_NAME));

    let mut out = File::create(&staged)
        .with_context(|| format!("failed to create {}", staged.display()))?;
    out.write_all(db_bytes)
        .and_then(|_| out.sync_all())
        .context("failed to write imported database")?;
    drop(out);

    if dst.exists() {
        std::fs::remove_file(&dst)
            .with_context(|| format!("failed to remove existing database {}", dst.display()))?;
    }
    std::fs::rename(&staged, &dst)
        .with_context(|| format!("failed to move imported database to {}", dst.display()))
}

fn starts_with_zip_magic(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;
    let mut sig = [0u8; 4];
    match f.read_exact(&mut sig) {
        Ok(()) => Ok(sig == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("failed to read file signature"),
    }
}
