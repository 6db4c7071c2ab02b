use crate::engine::OpenRequest;
use crate::store::{StoreNormalizer, CANONICAL_STORE_NAME};
use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct UnistoreConfig {
    /// Path to the directory holding the store files
    pub data_dir: String,

    /// Name of the store to open; legacy names resolve to the canonical store
    pub store_name: String,
}

const EMPTY_CONFIG: &str = r#"### unistore configuration file

### directory for store files
# data_dir = "~/.unistore"

### store to open; names used by older releases are accepted
# store_name = "unistore"
"#;

fn home_dir() -> Result<String> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow!("Could not find home directory"))?
        .to_str()
        .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
        .to_owned())
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> Result<String> {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            Ok(format!("{}{}", home_dir()?, rest))
        }
        _ => Ok(path.to_string()),
    }
}

fn normalize_store_name(name: &str) -> String {
    StoreNormalizer::default()
        .normalize(OpenRequest::unversioned(name))
        .name
}

impl Default for UnistoreConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.unistore", home_dir),
            store_name: CANONICAL_STORE_NAME.to_string(),
        }
    }
}

impl UnistoreConfig {
    /// Load the configuration from `path` (or `~/.unistore/unistore.toml`) and
    /// `UNISTORE_*` environment variables.
    ///
    /// A missing configuration file is created from a commented template.
    pub fn new(path: &Option<String>) -> Result<UnistoreConfig> {
        let mut builder = Config::builder();

        let unistore_dir = format!("{}/.unistore", home_dir()?);

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    builder = builder.add_source(config::File::from(path));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(unistore_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create unistore directory: {}", e))?;
                let p = format!("{}/unistore.toml", unistore_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // E.g., `UNISTORE_DATA_DIR=/tmp/store unistore status`
        builder = builder.add_source(config::Environment::with_prefix("UNISTORE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config, &unistore_dir)
    }

    fn from_map(config: &HashMap<String, String>, default_dir: &str) -> Result<UnistoreConfig> {
        let data_dir = match config.get("data_dir").map(|s| s.trim()) {
            Some(p) if !p.is_empty() => expand_home(p)?,
            _ => default_dir.to_string(),
        };

        let store_name = match config.get("store_name").map(|s| s.trim()) {
            Some(name) if !name.is_empty() => normalize_store_name(name),
            _ => CANONICAL_STORE_NAME.to_string(),
        };

        Ok(UnistoreConfig {
            data_dir,
            store_name,
        })
    }

    /// Path of the SQLite file backing the configured store
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}.sqlite3", data_dir, self.store_name)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("Store Name:         {}", self.store_name),
            format!("SQLite Path:        {}", self.sqlite_path()),
        ];

        if let Ok(meta) = std::fs::metadata(self.sqlite_path()) {
            lines.push(format!("SQLite Size:        {}", format_size(meta.len())));
        }

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.unistore/unistore.toml", home_dir)
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
