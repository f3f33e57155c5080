use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILENAME: &str = "gqlmeta.toml";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080";
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
pub const DEFAULT_METADATA_FILENAME: &str = "metadata.yaml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub paths: PathsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ServerSection {
    pub endpoint: Option<String>,
    pub admin_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PathsSection {
    pub migrations_dir: Option<String>,
    pub metadata_file: Option<String>,
}

impl ProjectConfig {
    /// Configured endpoint, ignoring blank values.
    pub fn endpoint(&self) -> Option<&str> {
        non_blank(self.server.endpoint.as_deref())
    }

    pub fn admin_secret(&self) -> Option<&str> {
        non_blank(self.server.admin_secret.as_deref())
    }

    pub fn migrations_dir(&self) -> Option<&str> {
        non_blank(self.paths.migrations_dir.as_deref())
    }

    pub fn metadata_file(&self) -> Option<&str> {
        non_blank(self.paths.metadata_file.as_deref())
    }
}

/// Load and parse a ProjectConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ProjectConfig> {
    if !config_path.exists() {
        return Ok(ProjectConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ProjectConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
