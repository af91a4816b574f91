use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{LauncherError, Result};
use crate::utils::file::write_atomic;

const CONFIG_FILE_NAME: &str = ".adofai-tools-config.json";
const DOWNLOAD_PATH_KEY: &str = "downloadPath";
const DEFAULT_DIR_NAME: &str = "ADOFAI-Tools";

/// Resolves where tool files live on disk. A custom base directory can be
/// persisted in a dotfile in the user's home directory; otherwise everything
/// lands under `<home>/Downloads/ADOFAI-Tools`.
#[derive(Clone)]
pub struct PathResolver {
    home_dir: PathBuf,
    custom_path: Arc<Mutex<Option<PathBuf>>>,
}

impl PathResolver {
    /// Builds a resolver rooted at `home_dir` and loads any previously
    /// persisted custom download path. A missing or unreadable config file
    /// is treated as "no custom path".
    pub fn new(home_dir: PathBuf) -> Self {
        let resolver = PathResolver {
            home_dir,
            custom_path: Arc::new(Mutex::new(None)),
        };
        if let Some(path) = resolver.load_persisted_path() {
            debug!("Loaded custom download path: {}", path.display());
            if let Ok(mut guard) = resolver.custom_path.lock() {
                *guard = Some(path);
            }
        }
        resolver
    }

    fn config_path(&self) -> PathBuf {
        self.home_dir.join(CONFIG_FILE_NAME)
    }

    fn load_persisted_path(&self) -> Option<PathBuf> {
        let raw = fs::read_to_string(self.config_path()).ok()?;
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring malformed launcher config: {}", e);
                return None;
            }
        };
        value
            .get(DOWNLOAD_PATH_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    }

    fn read_config(&self) -> Value {
        fs::read_to_string(self.config_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }

    fn write_config(&self, config: &Value) -> Result<()> {
        let contents = serde_json::to_string_pretty(config)?;
        write_atomic(&self.config_path(), contents.as_bytes())?;
        Ok(())
    }

    fn default_base(&self) -> PathBuf {
        self.home_dir.join("Downloads").join(DEFAULT_DIR_NAME)
    }

    /// Current in-memory custom path, if one is set.
    pub fn custom_path(&self) -> Option<PathBuf> {
        self.custom_path.lock().ok().and_then(|guard| guard.clone())
    }

    /// The directory all tool subdirectories live under. A custom path is
    /// honored only while its parent directory still exists; otherwise the
    /// default location is used and created on demand.
    pub fn base_path(&self) -> PathBuf {
        if let Some(custom) = self.custom_path() {
            if custom.parent().map(Path::exists).unwrap_or(false) {
                return custom;
            }
            warn!(
                "Custom download path {} is no longer reachable, using default",
                custom.display()
            );
        }
        let base = self.default_base();
        if let Err(e) = fs::create_dir_all(&base) {
            warn!("Failed to create download directory {}: {}", base.display(), e);
        }
        base
    }

    /// Dedicated directory for one tool, created on demand. Falls back to
    /// the base directory when creation fails so callers always get a
    /// usable path.
    pub fn tool_dir(&self, tool_id: &str) -> PathBuf {
        let base = self.base_path();
        let dir = base.join(tool_id);
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create tool directory {}: {}", dir.display(), e);
            return base;
        }
        dir
    }

    /// Persists a new custom download path, or resets to the default when
    /// `path` is empty. The in-memory path is only updated after the config
    /// file has been written, so a failed persist leaves resolution
    /// unchanged. Returns the base path now in effect.
    pub fn set_path(&self, path: &str) -> Result<PathBuf> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return self.reset_path();
        }

        let new_path = PathBuf::from(trimmed);
        fs::create_dir_all(&new_path).map_err(|e| {
            LauncherError::Config(format!(
                "Cannot use download path {}: {}",
                new_path.display(),
                e
            ))
        })?;

        let mut config = self.read_config();
        if let Some(map) = config.as_object_mut() {
            map.insert(
                DOWNLOAD_PATH_KEY.to_string(),
                Value::String(trimmed.to_string()),
            );
        }
        self.write_config(&config)?;

        if let Ok(mut guard) = self.custom_path.lock() {
            *guard = Some(new_path.clone());
        }
        debug!("Download path set to {}", new_path.display());
        Ok(new_path)
    }

    /// Removes any persisted custom path and falls back to the default
    /// location. Keeps unrelated config keys intact.
    pub fn reset_path(&self) -> Result<PathBuf> {
        let mut config = self.read_config();
        if let Some(map) = config.as_object_mut() {
            map.remove(DOWNLOAD_PATH_KEY);
        }
        self.write_config(&config)?;

        if let Ok(mut guard) = self.custom_path.lock() {
            *guard = None;
        }
        debug!("Download path reset to default");
        Ok(self.base_path())
    }
}
