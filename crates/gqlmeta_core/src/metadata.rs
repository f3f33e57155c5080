use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

/// Metadata operations a command can run against the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataAction {
    /// Write the engine's metadata to the local metadata file.
    Export,
    /// Clear all metadata on the engine.
    Reset,
    /// Ask the engine to reload metadata from its catalog.
    Reload,
    /// Replace the engine's metadata with the local metadata file.
    Apply,
}

impl MetadataAction {
    pub const ALL: [MetadataAction; 4] = [Self::Export, Self::Reset, Self::Reload, Self::Apply];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Reset => "reset",
            Self::Reload => "reload",
            Self::Apply => "apply",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unsupported metadata action: {value} (expected export|reset|reload|apply)"
                )
            })
    }
}

impl fmt::Display for MetadataAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of the local metadata file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    Json,
    Yaml,
}

impl MetadataFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|value| value.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }

    pub fn encode(self, metadata: &Value) -> Result<String> {
        match self {
            Self::Json => {
                let mut rendered = serde_json::to_string_pretty(metadata)
                    .context("failed to serialize metadata as JSON")?;
                rendered.push('\n');
                Ok(rendered)
            }
            Self::Yaml => {
                serde_yaml::to_string(metadata).context("failed to serialize metadata as YAML")
            }
        }
    }

    pub fn decode(self, content: &str) -> Result<Value> {
        match self {
            Self::Json => serde_json::from_str(content).context("failed to parse metadata JSON"),
            Self::Yaml => serde_yaml::from_str(content).context("failed to parse metadata YAML"),
        }
    }
}

/// Engine-side metadata operations available on a driver handle.
pub trait MetadataApi {
    fn export_metadata(&mut self) -> Result<Value>;
    fn replace_metadata(&mut self, metadata: &Value) -> Result<()>;
    fn clear_metadata(&mut self) -> Result<()>;
    fn reload_metadata(&mut self) -> Result<()>;
}

/// Perform `action` through `api`, reading or writing `metadata_file` as needed.
pub fn execute_metadata<A>(action: MetadataAction, api: &mut A, metadata_file: &Path) -> Result<()>
where
    A: MetadataApi + ?Sized,
{
    match action {
        MetadataAction::Export => export_to_file(api, metadata_file),
        MetadataAction::Reset => {
            api.clear_metadata()?;
            info!(action = %action, "metadata cleared");
            Ok(())
        }
        MetadataAction::Reload => {
            api.reload_metadata()?;
            info!(action = %action, "metadata reloaded");
            Ok(())
        }
        MetadataAction::Apply => apply_from_file(api, metadata_file),
    }
}

fn export_to_file<A>(api: &mut A, metadata_file: &Path) -> Result<()>
where
    A: MetadataApi + ?Sized,
{
    let metadata = api.export_metadata()?;
    if !metadata.is_object() {
        bail!("engine returned metadata that is not an object");
    }
    let rendered = MetadataFormat::from_path(metadata_file).encode(&metadata)?;

    if let Some(parent) = metadata_file.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(metadata_file, &rendered)
        .with_context(|| format!("failed to write {}", metadata_file.display()))?;

    info!(
        path = %metadata_file.display(),
        bytes = rendered.len(),
        digest = %compute_hash(&rendered),
        "metadata exported"
    );
    Ok(())
}

fn apply_from_file<A>(api: &mut A, metadata_file: &Path) -> Result<()>
where
    A: MetadataApi + ?Sized,
{
    let content = fs::read_to_string(metadata_file)
        .with_context(|| format!("failed to read {}", metadata_file.display()))?;
    let metadata = MetadataFormat::from_path(metadata_file)
        .decode(&content)
        .with_context(|| format!("invalid metadata file {}", metadata_file.display()))?;
    if !metadata.is_object() {
        bail!(
            "metadata file {} must contain an object",
            metadata_file.display()
        );
    }
    api.replace_metadata(&metadata)?;
    info!(
        path = %metadata_file.display(),
        digest = %compute_hash(&content),
        "metadata applied"
    );
    Ok(())
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
