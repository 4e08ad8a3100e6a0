//! Optional JSON configuration file.

use crate::engine::DEFAULT_CONVERTER;
use crate::model::{MeshFormat, OutputPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Converter argv template with `{input}` and `{output}` placeholders.
    pub converter: Vec<String>,
    pub canonical_format: MeshFormat,
    pub output: OutputPolicy,
    /// Engine markers layered over the process environment.
    pub environment: HashMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            converter: DEFAULT_CONVERTER.iter().map(|s| s.to_string()).collect(),
            canonical_format: MeshFormat::Med,
            output: OutputPolicy::Discard,
            environment: HashMap::new(),
            timeout: None,
        }
    }
}

/// `<config dir>/mesh-boolean/config.json`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mesh-boolean").join("config.json"))
}

impl Config {
    /// Load `path`, or the default location when `None`. A missing default
    /// file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg = Self::from_json(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Config = serde_json::from_str(text)?;
        if cfg.converter.is_empty() {
            anyhow::bail!("converter template is empty");
        }
        Ok(cfg)
    }
}
