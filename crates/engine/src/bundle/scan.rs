//! Bundle file discovery and backup
//!
//! Scanning returns the regular files of valid bundle format in canonical
//! order; files failing the format check are logged and skipped. After a
//! successful pass, processed files are renamed into a sibling `backup/`
//! directory and recorded in the data directory's bundle log; rename
//! failures are logged per file and never abort the build.

use super::{BundleFile, BundleName};
use crate::directory::Directory;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use vireo_core::EngineResult;

/// Name of the processed-bundle directory next to the bundle files.
pub const BUNDLE_BACKUP_DIR: &str = "backup";

/// Scan a directory for bundle files, in canonical processing order.
///
/// Filesystem errors abort the scan; invalid file names are skipped with a
/// warning.
pub fn scan_bundle_dir(dir: &Path) -> EngineResult<Vec<BundleFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        match BundleName::parse(&file_name) {
            Ok(name) => {
                let size = entry.metadata()?.len();
                files.push(BundleFile {
                    path: entry.path(),
                    name,
                    size,
                });
            }
            Err(e) => {
                warn!(
                    target: "vireo::worker",
                    file = %file_name,
                    error = %e,
                    "skipping file with invalid bundle name"
                );
            }
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Total size of the given bundle files, in MiB (rounded down).
pub fn total_size_mb(files: &[BundleFile]) -> u64 {
    files.iter().map(|f| f.size).sum::<u64>() / (1024 * 1024)
}

/// Move processed bundle files into `dir/backup/`, appending each absorbed
/// name to `current`'s bundle log when provided.
pub fn backup_bundle_files(dir: &Path, files: &[BundleFile], current: Option<&Directory>) {
    let backup_dir = dir.join(BUNDLE_BACKUP_DIR);
    if let Err(e) = fs::create_dir_all(&backup_dir) {
        warn!(
            target: "vireo::worker",
            error = %e,
            "cannot create bundle backup directory"
        );
        return;
    }

    info!(
        target: "vireo::worker",
        count = files.len(),
        dir = %backup_dir.display(),
        "moving processed bundle files to backup"
    );

    for file in files {
        let target = backup_dir.join(file.name.as_str());
        match fs::rename(&file.path, &target) {
            Ok(()) => {
                if let Some(current) = current {
                    if let Err(e) = current.append_bundle(file.name.as_str()) {
                        warn!(
                            target: "vireo::worker",
                            file = %file.name.as_str(),
                            error = %e,
                            "failed to append bundle log entry"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "vireo::worker",
                    file = %file.name.as_str(),
                    error = %e,
                    "failed to move bundle file to backup"
                );
            }
        }
    }
}
