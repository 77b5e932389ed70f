//! Checkpoint and VAE loading
//!
//! Weight formats are handled by a [`CheckpointBackend`]. This module owns the
//! node-facing side: which files are selectable, and resolving a selected
//! name to a path inside the configured search directory.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use burn::prelude::*;
use burn_nodes_core::{NodeError, NodeResult, TextEncoder, Vae};
use burn_nodes_samplers::DiffusionModel;

use crate::config::NodePaths;

/// Extensions selectable as model configs
pub const CONFIG_EXTENSIONS: &[&str] = &["yaml"];

/// Extensions selectable as checkpoints or VAE weights
pub const CHECKPOINT_EXTENSIONS: &[&str] = &["ckpt", "safetensors"];

/// Shared, exclusively borrowed diffusion model
pub type ModelHandle<B> = Rc<RefCell<dyn DiffusionModel<B>>>;

/// Shared text encoder
pub type ClipHandle<B> = Rc<dyn TextEncoder<B>>;

/// Shared VAE
pub type VaeHandle<B> = Rc<dyn Vae<B>>;

/// Components of a full checkpoint
pub struct LoadedCheckpoint<B: Backend> {
    pub model: ModelHandle<B>,
    pub clip: ClipHandle<B>,
    pub vae: VaeHandle<B>,
}

/// Weight-format specific construction of models from files
pub trait CheckpointBackend<B: Backend> {
    fn load_checkpoint(
        &self,
        config_path: &Path,
        ckpt_path: &Path,
        device: &B::Device,
    ) -> NodeResult<LoadedCheckpoint<B>>;

    fn load_vae(&self, path: &Path, device: &B::Device) -> NodeResult<VaeHandle<B>>;
}

/// Sorted file names in `dir` whose extension matches, case-insensitively
///
/// Files with any other extension are left out rather than reported.
pub fn list_files(dir: &Path, extensions: &[&str]) -> NodeResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| NodeError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| NodeError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                extensions
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            });
        if !matches {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Name-based loader over the configured model directories
pub struct ModelLoader<B: Backend> {
    paths: NodePaths,
    backend: Rc<dyn CheckpointBackend<B>>,
}

impl<B: Backend> ModelLoader<B> {
    pub fn new(paths: NodePaths, backend: Rc<dyn CheckpointBackend<B>>) -> Self {
        Self { paths, backend }
    }

    pub fn paths(&self) -> &NodePaths {
        &self.paths
    }

    pub fn config_names(&self) -> NodeResult<Vec<String>> {
        list_files(&self.paths.configs_dir, CONFIG_EXTENSIONS)
    }

    pub fn checkpoint_names(&self) -> NodeResult<Vec<String>> {
        list_files(&self.paths.checkpoints_dir, CHECKPOINT_EXTENSIONS)
    }

    pub fn vae_names(&self) -> NodeResult<Vec<String>> {
        list_files(&self.paths.vae_dir, CHECKPOINT_EXTENSIONS)
    }

    #[tracing::instrument(skip(self, device))]
    pub fn load_checkpoint(
        &self,
        config_name: &str,
        ckpt_name: &str,
        device: &B::Device,
    ) -> NodeResult<LoadedCheckpoint<B>> {
        let config_path = resolve(&self.paths.configs_dir, config_name, &self.config_names()?)?;
        let ckpt_path = resolve(
            &self.paths.checkpoints_dir,
            ckpt_name,
            &self.checkpoint_names()?,
        )?;
        let loaded = self
            .backend
            .load_checkpoint(&config_path, &ckpt_path, device)?;
        tracing::info!(path = %ckpt_path.display(), "checkpoint loaded");
        Ok(loaded)
    }

    #[tracing::instrument(skip(self, device))]
    pub fn load_vae(&self, vae_name: &str, device: &B::Device) -> NodeResult<VaeHandle<B>> {
        let path = resolve(&self.paths.vae_dir, vae_name, &self.vae_names()?)?;
        let vae = self.backend.load_vae(&path, device)?;
        tracing::info!(path = %path.display(), "vae loaded");
        Ok(vae)
    }
}

/// Join `name` onto `dir` if it is one of the selectable names
fn resolve(dir: &Path, name: &str, selectable: &[String]) -> NodeResult<PathBuf> {
    if !selectable.iter().any(|candidate| candidate == name) {
        return Err(NodeError::configuration(format!(
            "'{name}' is not a selectable file in {}",
            dir.display()
        )));
    }
    Ok(dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn test_list_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &["b.safetensors", "a.CKPT", "notes.txt", "c.ckpt.bak", "d.Yaml"],
        );
        fs::create_dir(dir.path().join("nested.ckpt")).unwrap();

        let names = list_files(dir.path(), CHECKPOINT_EXTENSIONS).unwrap();
        assert_eq!(names, vec!["a.CKPT", "b.safetensors"]);

        let configs = list_files(dir.path(), CONFIG_EXTENSIONS).unwrap();
        assert_eq!(configs, vec!["d.Yaml"]);
    }

    #[test]
    fn test_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_files(&dir.path().join("absent"), CONFIG_EXTENSIONS).unwrap_err();
        assert!(matches!(err, NodeError::Io { .. }));
    }

    #[test]
    fn test_resolve_rejects_unlisted() {
        let selectable = vec!["v1.ckpt".to_string()];
        assert_eq!(
            resolve(Path::new("/m"), "v1.ckpt", &selectable).unwrap(),
            PathBuf::from("/m/v1.ckpt")
        );
        assert!(matches!(
            resolve(Path::new("/m"), "../secret.ckpt", &selectable),
            Err(NodeError::Configuration(_))
        ));
    }
}
