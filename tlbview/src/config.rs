//! Configuration types for `tlbview.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use uguid::Guid;

use crate::builder::BuildOptions;
use crate::render::RenderConfig;

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Name overlay (TOML) applied after every input is decoded.
    #[serde(default)]
    pub overlay: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub type_library: Vec<TypeLibraryConfig>,
    #[serde(default)]
    pub proxy: Vec<ProxyConfig>,
    /// Extra IID → interface name entries for the renderer's cache.
    #[serde(default)]
    pub iid_names: BTreeMap<String, String>,
}

/// Output file settings.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output file path (e.g. `MyLib.idl`).
    #[serde(default = "default_output_file")]
    pub file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file: default_output_file(),
        }
    }
}

fn default_output_file() -> PathBuf {
    PathBuf::from("output.idl")
}

#[derive(Debug, Default, Deserialize)]
pub struct BuildConfig {
    /// Fail on the first type that does not decode completely.
    #[serde(default)]
    pub strict: bool,
}

impl From<&BuildConfig> for BuildOptions {
    fn from(cfg: &BuildConfig) -> Self {
        BuildOptions { strict: cfg.strict }
    }
}

/// A flattened type-library image (`TLIB`).
#[derive(Debug, Deserialize)]
pub struct TypeLibraryConfig {
    pub path: PathBuf,
}

/// A proxy procedure table (`NDRP`) for one interface.
///
/// ```toml
/// [[proxy]]
/// path = "proxies/ifoo.ndrp"
/// iid = "12345678-1234-1234-1234-1234567890AB"
/// name = "IFoo"
/// ```
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub path: PathBuf,
    pub iid: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Parse a GUID written in registry form, with or without braces.
pub fn parse_guid(text: &str) -> anyhow::Result<Guid> {
    let trimmed = text.trim().trim_start_matches('{').trim_end_matches('}');
    trimmed
        .parse::<Guid>()
        .map_err(|e| anyhow::anyhow!("invalid GUID `{text}`: {e}"))
}

/// Resolve a path from the config relative to the config file's directory.
/// Absolute paths are returned as-is.
pub fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Load and parse a `tlbview.toml` configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
    Ok(config)
}
