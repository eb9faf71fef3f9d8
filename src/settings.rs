use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, Result};

/// How a product's natural key is matched against persisted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ProductIdentity {
    /// Product name only. Same-named products in different stores collapse
    /// onto one surrogate key.
    Name,
    /// Product name scoped by owning store.
    #[default]
    NameAndStore,
}

/// What to do when a foreign key cannot be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReferencePolicy {
    /// Store NULL and keep the row.
    #[default]
    Lenient,
    /// Fail the file.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    pub product_identity: ProductIdentity,
    pub reference_policy: ReferencePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub product_identity: ProductIdentity,
    #[serde(default)]
    pub reference_policy: ReferencePolicy,
    #[serde(default)]
    pub allow_failures: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database() -> String {
    default_data_dir()
        .join("salesload.db")
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: default_database(),
            product_identity: ProductIdentity::default(),
            reference_policy: ReferencePolicy::default(),
            allow_failures: false,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            product_identity: self.product_identity,
            reference_policy: self.reference_policy,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("salesload")
}

pub fn settings_path() -> PathBuf {
    std::env::var_os("SALESLOAD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("settings.json"))
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("salesload")
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| LoadError::Settings(format!("{}: {e}", path.display())))
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(&settings_path())
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| LoadError::Settings(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
