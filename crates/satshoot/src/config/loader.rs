//! Reading and writing the JSON config file

use super::types::SyncConfig;
use crate::error::{Result, SyncError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_DIR: &str = "satshoot";
const CONFIG_FILE: &str = "config.json";

/// `<config dir>/satshoot/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load config from `path`; a missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<SyncConfig> {
    let path = path.as_ref();
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(SyncConfig::default());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
}

/// Write config to `path`, creating parent directories.
pub fn save_config(path: impl AsRef<Path>, config: &SyncConfig) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
