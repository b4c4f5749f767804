//! Storage layer
//!
//! Verification history lives in SQLite; capture snapshots and the
//! configuration file live in per-user directories.

pub mod history;

use anyhow::Result;
use std::path::PathBuf;

pub use history::{HistoryRecord, HistoryStore, VerifyResult};

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "spraycheck", "SprayCheck")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "spraycheck", "SprayCheck")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Get the directory where capture snapshots are saved
pub fn get_captures_dir() -> Result<PathBuf> {
    let dir = get_data_dir()?.join("captures");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Default path of the history database
pub fn default_history_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("history.db"))
}
