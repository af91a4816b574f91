use std::path::Path;

use tracing::warn;

/// Reveals a directory or file in the platform file manager. Failures are
/// logged and reported as `false` rather than surfaced as errors.
pub fn open_path(path: &Path) -> bool {
    match open::that(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to open {}: {}", path.display(), e);
            false
        }
    }
}

/// Opens a URL in the default browser.
pub fn open_url(url: &str) -> bool {
    match open::that(url) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to open {}: {}", url, e);
            false
        }
    }
}
