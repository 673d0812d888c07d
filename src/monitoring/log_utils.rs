use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

use super::LOG_FILE_NAME;

/// Total log size above which a warning is emitted (50MB)
const MAX_LOG_SIZE: u64 = 50 * 1024 * 1024;

/// Number of daily log files kept by [`rotate_logs`]
pub const MAX_LOG_FILES: usize = 7;

fn list_log_files(log_dir: &Path) -> anyhow::Result<Vec<(PathBuf, fs::Metadata)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        let is_log = path.is_file()
            && path
                .file_name()
                .map_or(false, |name| name.to_string_lossy().starts_with(LOG_FILE_NAME));
        if is_log {
            let metadata = fs::metadata(&path)?;
            files.push((path, metadata));
        }
    }
    Ok(files)
}

/// Creates the log directory if needed and reports its total size.
pub fn check_log_directory(log_dir: &str) -> anyhow::Result<u64> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        fs::create_dir_all(log_path)?;
        info!(target: "log_management", "Created log directory: {}", log_dir);
        return Ok(0);
    }

    let files = list_log_files(log_path)?;
    let total_size: u64 = files.iter().map(|(_, meta)| meta.len()).sum();

    if total_size > MAX_LOG_SIZE {
        warn!(
            target: "log_management",
            total_size_mb = total_size / (1024 * 1024),
            max_size_mb = MAX_LOG_SIZE / (1024 * 1024),
            "Log directory size exceeds recommended maximum"
        );
    } else {
        info!(
            target: "log_management",
            total_size_mb = total_size / (1024 * 1024),
            log_count = files.len(),
            "Log directory size within limits"
        );
    }

    Ok(total_size)
}

/// Removes the oldest daily log files beyond `keep`. Returns how many were removed.
pub fn rotate_logs(log_dir: &str, keep: usize) -> anyhow::Result<usize> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        return Ok(0);
    }

    let mut files = Vec::new();
    for (path, meta) in list_log_files(log_path)? {
        let modified = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        files.push((path, modified));
    }

    // Newest first
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in files.iter().skip(keep) {
        info!(target: "log_management", path = %path.display(), "Removing old log file");
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(target: "log_management", path = %path.display(), error = %e, "Failed to remove old log file"),
        }
    }

    Ok(removed)
}
