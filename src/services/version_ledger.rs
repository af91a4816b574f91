use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::models::{ToolVersionInfo, API_VERSION};
use crate::services::path_resolver::PathResolver;
use crate::utils::file::write_atomic;

const SIDECAR_FILE: &str = "info.json";

/// Tracks which version of each tool is installed, one `info.json` sidecar
/// per tool directory. Sidecars are patched in place rather than replaced
/// so fields written by other launcher versions survive.
#[derive(Clone)]
pub struct VersionLedger {
    paths: PathResolver,
}

impl VersionLedger {
    pub fn new(paths: PathResolver) -> Self {
        VersionLedger { paths }
    }

    fn sidecar_path(&self, tool_id: &str) -> std::path::PathBuf {
        self.paths.base_path().join(tool_id).join(SIDECAR_FILE)
    }

    /// Records that `version` of a tool was just installed. Existing sidecar
    /// fields the ledger does not know about are preserved.
    pub fn write(&self, tool_id: &str, tool_name: &str, version: &str) -> Result<ToolVersionInfo> {
        let info = ToolVersionInfo {
            tool_id: tool_id.to_string(),
            version: version.to_string(),
            tool_name: tool_name.to_string(),
            download_date: Utc::now(),
            api_version: API_VERSION.to_string(),
        };

        let path = self.paths.tool_dir(tool_id).join(SIDECAR_FILE);
        let mut existing: Value = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let patch = serde_json::to_value(&info)?;
        if let (Some(target), Some(fields)) = (existing.as_object_mut(), patch.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        } else {
            existing = patch;
        }

        let contents = serde_json::to_string_pretty(&existing)?;
        write_atomic(&path, contents.as_bytes())?;
        debug!("Recorded version {} for tool {}", version, tool_id);
        Ok(info)
    }

    /// Reads the version record for one tool. Missing or unparseable
    /// sidecars read as "no record".
    pub fn read(&self, tool_id: &str) -> Option<ToolVersionInfo> {
        let path = self.sidecar_path(tool_id);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Skipping malformed sidecar {}: {}", path.display(), e);
                None
            }
        }
    }

    /// All readable version records, keyed by tool id.
    pub fn list_all(&self) -> HashMap<String, ToolVersionInfo> {
        let mut records = HashMap::new();
        let base = self.paths.base_path();
        let entries = match fs::read_dir(&base) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {}: {}", base.display(), e);
                return records;
            }
        };
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let tool_id = entry.file_name().to_string_lossy().to_string();
            if let Some(info) = self.read(&tool_id) {
                records.insert(tool_id, info);
            }
        }
        records
    }

    /// Whether the remote catalog carries a newer version than the local
    /// record. No local record means no update prompt.
    pub fn needs_update(&self, tool_id: &str, remote_version: &str) -> bool {
        match self.read(tool_id) {
            Some(info) => compare_versions(remote_version, &info.version) == Ordering::Greater,
            None => false,
        }
    }
}

/// Compares dotted numeric version strings segment by segment. Missing
/// trailing segments and unparseable segments count as zero, so
/// `"2.0" == "2.0.0"` and `"1.10.0" > "1.9.0"`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|seg| seg.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let left = parse(a);
    let right = parse(b);
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_ledger() -> (PathBuf, VersionLedger) {
        let home = std::env::temp_dir().join(format!("adofai-ledger-{}", Uuid::new_v4()));
        fs::create_dir_all(&home).unwrap();
        let ledger = VersionLedger::new(PathResolver::new(home.clone()));
        (home, ledger)
    }

    #[test]
    fn write_then_read_roundtrip() {
        let (home, ledger) = temp_ledger();

        ledger.write("42", "Converter", "1.2.0").unwrap();
        let info = ledger.read("42").unwrap();
        assert_eq!(info.tool_id, "42");
        assert_eq!(info.tool_name, "Converter");
        assert_eq!(info.version, "1.2.0");
        assert_eq!(info.api_version, API_VERSION);

        fs::remove_dir_all(&home).ok();
    }

    #[test]
    fn write_preserves_unknown_sidecar_fields() {
        let (home, ledger) = temp_ledger();

        let dir = home.join("Downloads").join("ADOFAI-Tools").join("7");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(SIDECAR_FILE),
            r#"{"toolId":"7","version":"0.9","toolName":"Old","downloadDate":"2024-01-01T00:00:00Z","apiVersion":"1.0","pinned":true}"#,
        )
        .unwrap();

        ledger.write("7", "Old", "1.0").unwrap();

        let raw = fs::read_to_string(dir.join(SIDECAR_FILE)).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.get("version").and_then(Value::as_str), Some("1.0"));
        assert_eq!(value.get("pinned").and_then(Value::as_bool), Some(true));

        fs::remove_dir_all(&home).ok();
    }

    #[test]
    fn list_all_skips_broken_sidecars() {
        let (home, ledger) = temp_ledger();

        ledger.write("1", "First", "1.0").unwrap();
        let broken = home.join("Downloads").join("ADOFAI-Tools").join("2");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join(SIDECAR_FILE), "{oops").unwrap();

        let records = ledger.list_all();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key("1"));

        fs::remove_dir_all(&home).ok();
    }

    #[test]
    fn version_comparison_is_numeric_per_segment() {
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.3"), Ordering::Less);
        assert_eq!(compare_versions("1.2.3", "1.2"), Ordering::Greater);
        assert_eq!(compare_versions("abc", "0.0.1"), Ordering::Less);
    }

    #[test]
    fn needs_update_requires_local_record() {
        let (home, ledger) = temp_ledger();

        assert!(!ledger.needs_update("42", "9.9.9"));
        ledger.write("42", "Converter", "1.0.0").unwrap();
        assert!(ledger.needs_update("42", "1.0.1"));
        assert!(!ledger.needs_update("42", "1.0.0"));

        fs::remove_dir_all(&home).ok();
    }
}
