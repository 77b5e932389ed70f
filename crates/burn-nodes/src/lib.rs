//! burn-nodes: diffusion graph nodes on Burn
//!
//! The node set of a text-to-image pipeline: checkpoint and VAE loaders,
//! prompt encoding and conditioning composition, latent creation and resize,
//! the k-sampler, VAE encode/decode and image load/save.
//!
//! # Example
//!
//! ```ignore
//! use burn_nodes::{NodeContext, NodeInputs, NodeKind, NodePaths, NodeValue, ModelLoader, Placement};
//!
//! let loader = ModelLoader::new(NodePaths::from_root("."), backend);
//! let ctx = NodeContext::new(Placement::default(), loader);
//!
//! let latent = NodeKind::EmptyLatentImage.execute(&ctx, &NodeInputs::new())?;
//! ```

pub mod config;
pub mod image_io;
pub mod loader;
pub mod node;

pub use burn_nodes_core as core;
pub use burn_nodes_samplers as samplers;

pub use burn_nodes_core::{
    Area, Conditioning, ConditioningEntry, ConditioningMeta, CropMethod, Latent, NodeError,
    NodeResult, Placeable, Placement, SetAreaConfig, TextEncoder, UpscaleMethod, Vae,
};
pub use burn_nodes_samplers::{
    DiffusionModel, KSampler, ModelSampling, SampleRequest, SamplerAlgorithm, SchedulerPolicy,
};
pub use config::NodePaths;
pub use image_io::{ImageSaver, PngMetadata, image_hash, load_image};
pub use loader::{
    CHECKPOINT_EXTENSIONS, CONFIG_EXTENSIONS, CheckpointBackend, ClipHandle, LoadedCheckpoint,
    ModelHandle, ModelLoader, VaeHandle, list_files,
};
pub use node::{
    InputDefault, InputSpec, MAX_RESOLUTION, NodeContext, NodeInputs, NodeKind, NodeValue,
    ValueKind,
};
