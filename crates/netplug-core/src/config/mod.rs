//! # Loader configuration
//!
//! Which plugin library to open, where else to look for it, and whether the
//! collective family is wanted. Read from a JSON, TOML or YAML file (format
//! chosen by extension) and then overridden from the environment.
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::kernel::constants::{ENV_COLLNET_ENABLE, ENV_NET_PLUGIN, LOG_TARGET_LOADER, PLUGIN_DISABLED};

#[cfg(test)]
mod tests;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} configuration: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("Unsupported configuration format for {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "JSON",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "YAML",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "TOML",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

/// Settings for [`PluginLoader`](crate::plugin_system::PluginLoader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Plugin library name or path. `None` selects the default library;
    /// `"none"` disables plugin loading.
    pub plugin: Option<String>,

    /// Directories tried before the system loader's search path.
    pub search_paths: Vec<PathBuf>,

    /// Whether the collective family is resolved at all.
    pub collective_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            plugin: None,
            search_paths: Vec::new(),
            collective_enabled: true,
        }
    }
}

impl LoaderConfig {
    /// Read a configuration file, choosing the format by extension.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let text = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(target: LOG_TARGET_LOADER, "Read {} configuration from {}", format.name(), path.display());
        Self::parse(&text, format)
    }

    /// Deserialize from string based on format
    pub fn parse(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            format: format.name(),
            message,
        };
        match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| parse_error(e.to_string())),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| parse_error(e.to_string())),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Apply `NETPLUG_NET_PLUGIN` and `NETPLUG_COLLNET_ENABLE` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(plugin) = lookup(ENV_NET_PLUGIN) {
            let plugin = plugin.trim();
            if !plugin.is_empty() {
                debug!(target: LOG_TARGET_LOADER, "{} set to {}", ENV_NET_PLUGIN, plugin);
                self.plugin = Some(plugin.to_string());
            }
        }
        if let Some(value) = lookup(ENV_COLLNET_ENABLE) {
            self.collective_enabled = parse_flag(&value).ok_or_else(|| ConfigError::InvalidValue {
                key: ENV_COLLNET_ENABLE.to_string(),
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    /// Whether plugin loading has been switched off with `none`.
    pub fn is_disabled(&self) -> bool {
        self.plugin
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(PLUGIN_DISABLED))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
