use std::fs;
use std::path::Path;

use crate::data_loaders::config::default_config_text;
use crate::{info, warn, DEBUG_NAME};

/// Writes a documented default `config.yaml` when none exists yet.
/// Returns true when a new file was created.
pub fn scaffold_config(path: &Path) -> bool {
    if path.exists() { return false; }

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("[{}] Failed to create {}: {e}", DEBUG_NAME, dir.display());
            return false;
        }
    }

    match fs::write(path, default_config_text()) {
        Ok(_) => {
            info!("[{}] Created {}", DEBUG_NAME, path.display());
            true
        }
        Err(e) => {
            warn!("[{}] Failed to create {}: {e}", DEBUG_NAME, path.display());
            false
        }
    }
}
