//! User settings for running notebook programs.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/lpprogram/settings.json
//! - Linux: ~/.config/lpprogram/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\lpprogram\settings.json

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Connection file of the kernel programs run on
    #[serde(default)]
    pub connection_file: Option<PathBuf>,

    /// Seconds to wait for a program to finish
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_file: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lpprogram")
        .join("settings.json")
}

/// Load settings from `path`, returning defaults if the file is missing or invalid
pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    match std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
    {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Ignoring unreadable settings at {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Load settings from the user's config directory
pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
