//! Filesystem layout for loaders and savers
//!
//! Paths are passed explicitly to every component that touches the disk.

use std::path::{Path, PathBuf};

use burn_nodes_core::{NodeError, NodeResult};
use serde::{Deserialize, Serialize};

/// Search and output directories
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodePaths {
    pub models_dir: PathBuf,
    /// Model architecture configs (`.yaml`)
    pub configs_dir: PathBuf,
    /// Full checkpoints (`.ckpt`, `.safetensors`)
    pub checkpoints_dir: PathBuf,
    /// Standalone VAE weights
    pub vae_dir: PathBuf,
    /// Images selectable by the image loader
    pub input_dir: PathBuf,
    /// Destination of saved images
    pub output_dir: PathBuf,
}

/// On-disk form; every field is optional and falls back to the root layout
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct NodePathsFile {
    root: Option<PathBuf>,
    models_dir: Option<PathBuf>,
    configs_dir: Option<PathBuf>,
    checkpoints_dir: Option<PathBuf>,
    vae_dir: Option<PathBuf>,
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

impl NodePaths {
    /// Conventional layout under `root`
    ///
    /// ```text
    /// <root>/models/configs
    /// <root>/models/checkpoints
    /// <root>/models/vae
    /// <root>/input
    /// <root>/output
    /// ```
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let models_dir = root.join("models");
        Self {
            configs_dir: models_dir.join("configs"),
            checkpoints_dir: models_dir.join("checkpoints"),
            vae_dir: models_dir.join("vae"),
            input_dir: root.join("input"),
            output_dir: root.join("output"),
            models_dir,
        }
    }

    /// Parse a JSON layout file; `root` defaults to the current directory
    pub fn from_json_file(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| NodeError::io(path, e))?;
        Self::from_json_str(&content)
            .map_err(|e| NodeError::configuration(format!("{}: {e}", path.display())))
    }

    pub fn from_json_str(content: &str) -> NodeResult<Self> {
        let file: NodePathsFile = serde_json::from_str(content)
            .map_err(|e| NodeError::configuration(format!("invalid path config: {e}")))?;

        let root = file.root.unwrap_or_else(|| PathBuf::from("."));
        let defaults = Self::from_root(&root);
        let models_dir = file.models_dir.unwrap_or(defaults.models_dir);
        Ok(Self {
            configs_dir: file.configs_dir.unwrap_or_else(|| models_dir.join("configs")),
            checkpoints_dir: file
                .checkpoints_dir
                .unwrap_or_else(|| models_dir.join("checkpoints")),
            vae_dir: file.vae_dir.unwrap_or_else(|| models_dir.join("vae")),
            input_dir: file.input_dir.unwrap_or(defaults.input_dir),
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            models_dir,
        })
    }
}

impl Default for NodePaths {
    fn default() -> Self {
        Self::from_root(".")
    }
}
