use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variables checked for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Non-secret overrides kept in `settings.json` under the data dir.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SettingsFile {
    pub model: Option<String>,
    pub api_base_url: Option<String>,
}

/// Resolved runtime configuration.
#[derive(Clone)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub api_base_url: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl Settings {
    /// Environment wins over the file; the key has no file fallback.
    pub fn resolve(file: SettingsFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|name| non_empty(*name))
            .ok_or_else(|| anyhow!("API_KEY environment variable not set"))?;

        let model = non_empty("GEMINI_MODEL")
            .or(file.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_base_url = non_empty("GEMINI_API_BASE_URL")
            .or(file.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        Ok(Self {
            api_key,
            model,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env(data_dir: &Path) -> Result<Self> {
        Self::resolve(load_settings_from_dir(data_dir), |k| std::env::var(k).ok())
    }
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn load_settings_from_dir(data_dir: &Path) -> SettingsFile {
    let path = settings_path(data_dir);
    if let Ok(bytes) = fs::read(&path) {
        match serde_json::from_slice::<SettingsFile>(&bytes) {
            Ok(s) => return s,
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "ignoring invalid settings file"),
        }
    }
    SettingsFile::default()
}

pub fn save_settings_to_dir(data_dir: &Path, s: &SettingsFile) -> Result<()> {
    let path = settings_path(data_dir);
    let json = serde_json::to_vec_pretty(s)?;
    fs::write(path, json).context("write settings")?;
    Ok(())
}

/// Writes an empty overrides file on first start so it can be edited by hand.
pub fn ensure_settings_file(data_dir: &Path) -> Result<()> {
    if settings_path(data_dir).exists() {
        return Ok(());
    }
    save_settings_to_dir(data_dir, &SettingsFile::default())
}
