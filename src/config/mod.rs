//! Application Configuration
//!
//! User settings and preferences stored in TOML format. Every component
//! receives its settings struct explicitly at construction; nothing reads
//! process-wide state.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::capture::CaptureSettings;
use crate::compare::CompareSettings;
use crate::vision::{OcrSettings, RegionFilterSettings};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera acquisition settings
    pub capture: CaptureSettings,
    /// Region filtering bounds
    pub regions: RegionFilterSettings,
    /// OCR confidence policy
    pub ocr: OcrSettings,
    /// Comparison policy
    pub compare: CompareSettings,
    /// Storage settings
    pub storage: StorageSettings,
}

/// Storage-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Save a snapshot of each live-mode verification to the captures dir
    pub save_captures: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            save_captures: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
