use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::models::LocalToolFile;
use crate::services::path_resolver::PathResolver;
use crate::utils::shell;

/// Manages downloaded tool files on disk. All operations degrade to a
/// boolean or an empty listing on I/O trouble; nothing here is fatal.
#[derive(Clone)]
pub struct ToolFileStore {
    paths: PathResolver,
}

impl ToolFileStore {
    pub fn new(paths: PathResolver) -> Self {
        ToolFileStore { paths }
    }

    fn tool_file_in(dir: &Path, tool_id: &str) -> Option<String> {
        let prefix = format!("{}.", tool_id);
        let entries = fs::read_dir(dir).ok()?;
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && !name.ends_with(".part") {
                return Some(name);
            }
        }
        None
    }

    /// Whether the tool's payload file exists. With an extension the exact
    /// filename is checked; without one, any `<toolId>.<ext>` file counts.
    pub fn check_file_exists(&self, tool_id: &str, extension: Option<&str>) -> bool {
        let dir = self.paths.base_path().join(tool_id);
        match extension {
            Some(ext) => dir.join(format!("{}.{}", tool_id, ext)).is_file(),
            None => Self::tool_file_in(&dir, tool_id).is_some(),
        }
    }

    /// Opens the tool's directory in the file manager, but only when a
    /// payload file is actually present.
    pub fn open_tool_folder(&self, tool_id: &str) -> bool {
        let dir = self.paths.base_path().join(tool_id);
        if Self::tool_file_in(&dir, tool_id).is_none() {
            warn!("No downloaded file for tool {}, not opening folder", tool_id);
            return false;
        }
        shell::open_path(&dir)
    }

    /// Removes the tool's whole directory, payload and version sidecar
    /// alike. Used before re-downloading on update.
    pub fn delete_tool(&self, tool_id: &str) -> bool {
        let dir = self.paths.base_path().join(tool_id);
        if !dir.exists() {
            return false;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!("Deleted tool directory {}", dir.display());
                true
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", dir.display(), e);
                false
            }
        }
    }

    /// Removes a single payload file, then the directory if nothing else is
    /// left in it. Other files for the same tool stay untouched.
    pub fn delete_tool_file(&self, tool_id: &str, extension: &str) -> bool {
        let dir = self.paths.base_path().join(tool_id);
        let file = dir.join(format!("{}.{}", tool_id, extension));
        if !file.is_file() {
            return false;
        }
        if let Err(e) = fs::remove_file(&file) {
            warn!("Failed to delete {}: {}", file.display(), e);
            return false;
        }
        // Best effort: only succeeds when the directory is now empty.
        fs::remove_dir(&dir).ok();
        debug!("Deleted {}", file.display());
        true
    }

    /// Lists every downloaded tool file. Tool subdirectories are scanned
    /// for `<toolId>.<ext>` payloads; loose files directly under the base
    /// directory are kept for installs made by older releases.
    pub fn list(&self) -> Vec<LocalToolFile> {
        let base = self.paths.base_path();
        let mut files = Vec::new();
        let entries = match fs::read_dir(&base) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {}: {}", base.display(), e);
                return files;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if let Some(filename) = Self::tool_file_in(&path, &name) {
                    let extension = filename
                        .rsplit('.')
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    files.push(LocalToolFile {
                        filename,
                        tool_id: name,
                        extension,
                    });
                }
            } else if path.is_file() && name.contains('.') && !name.ends_with(".part") {
                // Legacy layout: files dropped straight into the base dir.
                let (stem, extension) = match name.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_string()),
                    _ => continue,
                };
                files.push(LocalToolFile {
                    filename: name,
                    tool_id: stem,
                    extension,
                });
            }
        }
        files
    }
}
