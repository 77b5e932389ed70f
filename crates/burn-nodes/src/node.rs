//! The node set
//!
//! [`NodeKind`] is closed: every node is one variant, dispatched through
//! [`NodeKind::declare_inputs`], [`NodeKind::return_types`],
//! [`NodeKind::category`] and [`NodeKind::execute`]. Inputs are validated
//! against the declarations before a node runs, and missing optional inputs
//! take their declared defaults.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use burn_nodes_core::{
    Conditioning, CropMethod, Latent, NodeError, NodeResult, Placement, SetAreaConfig,
    UpscaleMethod, decode_latent, encode_pixels, encode_text,
};
use burn_nodes_samplers::{KSampler, SampleRequest, SamplerAlgorithm, SchedulerPolicy};
use serde_json::Value;

use crate::config::NodePaths;
use crate::image_io::{ImageSaver, PngMetadata, image_hash, load_image};
use crate::loader::{ClipHandle, ModelHandle, ModelLoader, VaeHandle, list_files};

/// Largest accepted pixel dimension
pub const MAX_RESOLUTION: u64 = 4096;

/// Extensions the image loader offers
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

// ============================================================================
// Values
// ============================================================================

/// Kind tag of a node input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    String,
    Json,
    Model,
    Clip,
    Vae,
    Conditioning,
    Latent,
    Image,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Int => "INT",
            ValueKind::Float => "FLOAT",
            ValueKind::String => "STRING",
            ValueKind::Json => "JSON",
            ValueKind::Model => "MODEL",
            ValueKind::Clip => "CLIP",
            ValueKind::Vae => "VAE",
            ValueKind::Conditioning => "CONDITIONING",
            ValueKind::Latent => "LATENT",
            ValueKind::Image => "IMAGE",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value flowing along a graph edge
#[derive(Clone)]
pub enum NodeValue<B: Backend> {
    Int(u64),
    Float(f64),
    String(String),
    Json(Value),
    Model(ModelHandle<B>),
    Clip(ClipHandle<B>),
    Vae(VaeHandle<B>),
    Conditioning(Conditioning<B>),
    Latent(Latent<B>),
    /// Pixels `[batch, H, W, 3]` in `[0, 1]`
    Image(Tensor<B, 4>),
}

impl<B: Backend> NodeValue<B> {
    pub fn kind(&self) -> ValueKind {
        match self {
            NodeValue::Int(_) => ValueKind::Int,
            NodeValue::Float(_) => ValueKind::Float,
            NodeValue::String(_) => ValueKind::String,
            NodeValue::Json(_) => ValueKind::Json,
            NodeValue::Model(_) => ValueKind::Model,
            NodeValue::Clip(_) => ValueKind::Clip,
            NodeValue::Vae(_) => ValueKind::Vae,
            NodeValue::Conditioning(_) => ValueKind::Conditioning,
            NodeValue::Latent(_) => ValueKind::Latent,
            NodeValue::Image(_) => ValueKind::Image,
        }
    }
}

impl<B: Backend> fmt::Debug for NodeValue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Int(v) => write!(f, "Int({v})"),
            NodeValue::Float(v) => write!(f, "Float({v})"),
            NodeValue::String(v) => write!(f, "String({v:?})"),
            NodeValue::Json(v) => write!(f, "Json({v})"),
            NodeValue::Conditioning(c) => write!(f, "Conditioning(len={})", c.len()),
            NodeValue::Latent(l) => write!(f, "Latent({:?})", l.dims()),
            NodeValue::Image(t) => write!(f, "Image({:?})", t.dims()),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Default taken by an input the caller left out
#[derive(Debug, Clone, PartialEq)]
pub enum InputDefault {
    Int(u64),
    Float(f64),
    String(&'static str),
}

/// Declaration of one node input
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    /// Hidden inputs are supplied by the host, not wired in the graph
    pub required: bool,
    pub default: Option<InputDefault>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// UI increment; not enforced
    pub step: Option<f64>,
    pub choices: Option<Vec<String>>,
}

impl InputSpec {
    fn new(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            min: None,
            max: None,
            step: None,
            choices: None,
        }
    }

    fn int(name: &'static str, default: u64, min: u64, max: u64) -> Self {
        Self {
            default: Some(InputDefault::Int(default)),
            min: Some(min as f64),
            max: Some(max as f64),
            ..Self::new(name, ValueKind::Int)
        }
    }

    fn float(name: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self {
            default: Some(InputDefault::Float(default)),
            min: Some(min),
            max: Some(max),
            ..Self::new(name, ValueKind::Float)
        }
    }

    fn choice<S: ToString>(name: &'static str, choices: impl IntoIterator<Item = S>) -> Self {
        Self {
            choices: Some(choices.into_iter().map(|c| c.to_string()).collect()),
            ..Self::new(name, ValueKind::String)
        }
    }

    fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    fn with_default(mut self, default: InputDefault) -> Self {
        self.default = Some(default);
        self
    }

    fn hidden(mut self) -> Self {
        self.required = false;
        self
    }

    /// Check a supplied value against this declaration
    fn validate<B: Backend>(&self, value: &NodeValue<B>) -> NodeResult<()> {
        let number = match (self.kind, value) {
            (ValueKind::Int, NodeValue::Int(v)) => Some(*v as f64),
            (ValueKind::Float, NodeValue::Float(v)) => Some(*v),
            (ValueKind::Float, NodeValue::Int(v)) => Some(*v as f64),
            (kind, value) if kind == value.kind() => None,
            (kind, value) => {
                return Err(NodeError::invalid_parameter(format!(
                    "input '{}' expects {kind}, got {}",
                    self.name,
                    value.kind()
                )));
            }
        };

        if let Some(n) = number {
            let below = self.min.is_some_and(|min| n < min);
            let above = self.max.is_some_and(|max| n > max);
            if n.is_nan() || below || above {
                return Err(NodeError::invalid_parameter(format!(
                    "input '{}' = {n} is outside {}..={}",
                    self.name,
                    self.min.unwrap_or(f64::NEG_INFINITY),
                    self.max.unwrap_or(f64::INFINITY)
                )));
            }
        }

        match (&self.choices, value) {
            (Some(choices), NodeValue::String(s)) if !choices.contains(s) => {
                Err(NodeError::configuration(format!(
                    "input '{}' = '{s}' is not one of {choices:?}",
                    self.name
                )))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Named input values for one node execution
#[derive(Clone)]
pub struct NodeInputs<B: Backend> {
    values: HashMap<String, NodeValue<B>>,
}

impl<B: Backend> Default for NodeInputs<B> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<B: Backend> NodeInputs<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: NodeValue<B>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: NodeValue<B>) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&NodeValue<B>> {
        self.values.get(name)
    }

    fn require(&self, name: &str) -> NodeResult<&NodeValue<B>> {
        self.values
            .get(name)
            .ok_or_else(|| NodeError::invalid_parameter(format!("missing input '{name}'")))
    }

    fn wrong_kind(name: &str, expected: ValueKind, got: &NodeValue<B>) -> NodeError {
        NodeError::invalid_parameter(format!(
            "input '{name}' expects {expected}, got {}",
            got.kind()
        ))
    }

    pub fn int(&self, name: &str) -> NodeResult<u64> {
        match self.require(name)? {
            NodeValue::Int(v) => Ok(*v),
            other => Err(Self::wrong_kind(name, ValueKind::Int, other)),
        }
    }

    /// Pixel or count input as `usize`
    pub fn size(&self, name: &str) -> NodeResult<usize> {
        let v = self.int(name)?;
        usize::try_from(v)
            .map_err(|_| NodeError::invalid_parameter(format!("input '{name}' = {v} is too large")))
    }

    /// Float input; integer values are widened
    pub fn float(&self, name: &str) -> NodeResult<f64> {
        match self.require(name)? {
            NodeValue::Float(v) => Ok(*v),
            NodeValue::Int(v) => Ok(*v as f64),
            other => Err(Self::wrong_kind(name, ValueKind::Float, other)),
        }
    }

    pub fn string(&self, name: &str) -> NodeResult<&str> {
        match self.require(name)? {
            NodeValue::String(v) => Ok(v),
            other => Err(Self::wrong_kind(name, ValueKind::String, other)),
        }
    }

    /// Optional JSON input; absent is `None`
    pub fn json(&self, name: &str) -> NodeResult<Option<&Value>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(NodeValue::Json(v)) => Ok(Some(v)),
            Some(other) => Err(Self::wrong_kind(name, ValueKind::Json, other)),
        }
    }

    pub fn model(&self, name: &str) -> NodeResult<ModelHandle<B>> {
        match self.require(name)? {
            NodeValue::Model(v) => Ok(v.clone()),
            other => Err(Self::wrong_kind(name, ValueKind::Model, other)),
        }
    }

    pub fn clip(&self, name: &str) -> NodeResult<ClipHandle<B>> {
        match self.require(name)? {
            NodeValue::Clip(v) => Ok(v.clone()),
            other => Err(Self::wrong_kind(name, ValueKind::Clip, other)),
        }
    }

    pub fn vae(&self, name: &str) -> NodeResult<VaeHandle<B>> {
        match self.require(name)? {
            NodeValue::Vae(v) => Ok(v.clone()),
            other => Err(Self::wrong_kind(name, ValueKind::Vae, other)),
        }
    }

    pub fn conditioning(&self, name: &str) -> NodeResult<&Conditioning<B>> {
        match self.require(name)? {
            NodeValue::Conditioning(v) => Ok(v),
            other => Err(Self::wrong_kind(name, ValueKind::Conditioning, other)),
        }
    }

    pub fn latent(&self, name: &str) -> NodeResult<&Latent<B>> {
        match self.require(name)? {
            NodeValue::Latent(v) => Ok(v),
            other => Err(Self::wrong_kind(name, ValueKind::Latent, other)),
        }
    }

    pub fn image(&self, name: &str) -> NodeResult<Tensor<B, 4>> {
        match self.require(name)? {
            NodeValue::Image(v) => Ok(v.clone()),
            other => Err(Self::wrong_kind(name, ValueKind::Image, other)),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// Collaborators shared by every node in a graph run
pub struct NodeContext<B: Backend> {
    pub placement: Placement<B>,
    pub loader: ModelLoader<B>,
    pub saver: ImageSaver,
}

impl<B: Backend> NodeContext<B> {
    pub fn new(placement: Placement<B>, loader: ModelLoader<B>) -> Self {
        let saver = ImageSaver::new(loader.paths().output_dir.clone());
        Self {
            placement,
            loader,
            saver,
        }
    }

    pub fn paths(&self) -> &NodePaths {
        self.loader.paths()
    }

    /// Selectable images in the input directory
    pub fn input_images(&self) -> NodeResult<Vec<String>> {
        list_files(&self.paths().input_dir, IMAGE_EXTENSIONS)
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Every node this crate provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    KSampler,
    CheckpointLoader,
    VaeLoader,
    ClipTextEncode,
    ConditioningCombine,
    ConditioningSetArea,
    EmptyLatentImage,
    LatentUpscale,
    VaeEncode,
    VaeDecode,
    LoadImage,
    SaveImage,
}

impl NodeKind {
    pub const ALL: [NodeKind; 12] = [
        NodeKind::KSampler,
        NodeKind::CheckpointLoader,
        NodeKind::VaeLoader,
        NodeKind::ClipTextEncode,
        NodeKind::ConditioningCombine,
        NodeKind::ConditioningSetArea,
        NodeKind::EmptyLatentImage,
        NodeKind::LatentUpscale,
        NodeKind::VaeEncode,
        NodeKind::VaeDecode,
        NodeKind::LoadImage,
        NodeKind::SaveImage,
    ];

    /// Registry name
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::KSampler => "KSampler",
            NodeKind::CheckpointLoader => "CheckpointLoader",
            NodeKind::VaeLoader => "VAELoader",
            NodeKind::ClipTextEncode => "CLIPTextEncode",
            NodeKind::ConditioningCombine => "ConditioningCombine",
            NodeKind::ConditioningSetArea => "ConditioningSetArea",
            NodeKind::EmptyLatentImage => "EmptyLatentImage",
            NodeKind::LatentUpscale => "LatentUpscale",
            NodeKind::VaeEncode => "VAEEncode",
            NodeKind::VaeDecode => "VAEDecode",
            NodeKind::LoadImage => "LoadImage",
            NodeKind::SaveImage => "SaveImage",
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            NodeKind::KSampler => "sampling",
            NodeKind::CheckpointLoader | NodeKind::VaeLoader => "loaders",
            NodeKind::ClipTextEncode
            | NodeKind::ConditioningCombine
            | NodeKind::ConditioningSetArea => "conditioning",
            NodeKind::EmptyLatentImage
            | NodeKind::LatentUpscale
            | NodeKind::VaeEncode
            | NodeKind::VaeDecode => "latent",
            NodeKind::LoadImage | NodeKind::SaveImage => "image",
        }
    }

    pub fn return_types(&self) -> &'static [ValueKind] {
        match self {
            NodeKind::KSampler
            | NodeKind::EmptyLatentImage
            | NodeKind::LatentUpscale
            | NodeKind::VaeEncode => &[ValueKind::Latent],
            NodeKind::CheckpointLoader => &[ValueKind::Model, ValueKind::Clip, ValueKind::Vae],
            NodeKind::VaeLoader => &[ValueKind::Vae],
            NodeKind::ClipTextEncode
            | NodeKind::ConditioningCombine
            | NodeKind::ConditioningSetArea => &[ValueKind::Conditioning],
            NodeKind::VaeDecode | NodeKind::LoadImage => &[ValueKind::Image],
            NodeKind::SaveImage => &[],
        }
    }

    /// Output nodes produce side effects rather than values
    pub fn is_output_node(&self) -> bool {
        matches!(self, NodeKind::SaveImage)
    }

    /// Input declarations; file choices are listed from the context's paths
    pub fn declare_inputs<B: Backend>(&self, ctx: &NodeContext<B>) -> NodeResult<Vec<InputSpec>> {
        use ValueKind as K;

        let pixel = |name: &'static str, default: u64| {
            InputSpec::int(name, default, 64, MAX_RESOLUTION).with_step(64.0)
        };

        let specs = match self {
            NodeKind::KSampler => vec![
                InputSpec::new("model", K::Model),
                InputSpec::int("seed", 0, 0, u64::MAX),
                InputSpec::int("steps", 20, 1, 10_000),
                InputSpec::float("cfg", 8.0, 0.0, 100.0),
                InputSpec::choice("sampler_name", SamplerAlgorithm::NAMES)
                    .with_default(InputDefault::String(SamplerAlgorithm::Euler.name())),
                InputSpec::choice("scheduler", SchedulerPolicy::NAMES)
                    .with_default(InputDefault::String(SchedulerPolicy::Normal.name())),
                InputSpec::new("positive", K::Conditioning),
                InputSpec::new("negative", K::Conditioning),
                InputSpec::new("latent_image", K::Latent),
                InputSpec::float("denoise", 1.0, 0.0, 1.0).with_step(0.01),
            ],
            NodeKind::CheckpointLoader => vec![
                InputSpec::choice("config_name", ctx.loader.config_names()?),
                InputSpec::choice("ckpt_name", ctx.loader.checkpoint_names()?),
            ],
            NodeKind::VaeLoader => vec![InputSpec::choice("vae_name", ctx.loader.vae_names()?)],
            NodeKind::ClipTextEncode => vec![
                InputSpec::new("text", K::String),
                InputSpec::new("clip", K::Clip),
            ],
            NodeKind::ConditioningCombine => vec![
                InputSpec::new("conditioning_1", K::Conditioning),
                InputSpec::new("conditioning_2", K::Conditioning),
            ],
            NodeKind::ConditioningSetArea => {
                let defaults = SetAreaConfig::default();
                vec![
                    InputSpec::new("conditioning", K::Conditioning),
                    pixel("width", defaults.width as u64),
                    pixel("height", defaults.height as u64),
                    InputSpec::int("x", 0, 0, MAX_RESOLUTION).with_step(64.0),
                    InputSpec::int("y", 0, 0, MAX_RESOLUTION).with_step(64.0),
                    InputSpec::float("strength", defaults.strength as f64, 0.0, 10.0)
                        .with_step(0.01),
                ]
            }
            NodeKind::EmptyLatentImage => vec![
                pixel("width", 512),
                pixel("height", 512),
                InputSpec::int("batch_size", 1, 1, 64),
            ],
            NodeKind::LatentUpscale => vec![
                InputSpec::new("samples", K::Latent),
                InputSpec::choice("upscale_method", UpscaleMethod::NAMES),
                pixel("width", 512),
                pixel("height", 512),
                InputSpec::choice("crop", CropMethod::NAMES),
            ],
            NodeKind::VaeEncode => vec![
                InputSpec::new("pixels", K::Image),
                InputSpec::new("vae", K::Vae),
            ],
            NodeKind::VaeDecode => vec![
                InputSpec::new("samples", K::Latent),
                InputSpec::new("vae", K::Vae),
            ],
            NodeKind::LoadImage => vec![InputSpec::choice("image", ctx.input_images()?)],
            NodeKind::SaveImage => vec![
                InputSpec::new("images", K::Image),
                InputSpec::new("filename_prefix", K::String)
                    .with_default(InputDefault::String("ComfyUI")),
                InputSpec::new("prompt", K::Json).hidden(),
                InputSpec::new("extra_pnginfo", K::Json).hidden(),
            ],
        };
        Ok(specs)
    }

    /// Validate `inputs` against the declarations, filling defaults
    pub fn resolve_inputs<B: Backend>(
        &self,
        ctx: &NodeContext<B>,
        inputs: &NodeInputs<B>,
    ) -> NodeResult<NodeInputs<B>> {
        let mut resolved = NodeInputs::new();
        for spec in self.declare_inputs(ctx)? {
            let value = match (inputs.get(spec.name), &spec.default) {
                (Some(value), _) => value.clone(),
                (None, Some(InputDefault::Int(v))) => NodeValue::Int(*v),
                (None, Some(InputDefault::Float(v))) => NodeValue::Float(*v),
                (None, Some(InputDefault::String(v))) => NodeValue::String(v.to_string()),
                (None, None) if !spec.required => continue,
                (None, None) => {
                    return Err(NodeError::invalid_parameter(format!(
                        "{} is missing input '{}'",
                        self.name(),
                        spec.name
                    )));
                }
            };
            spec.validate(&value)?;
            resolved.insert(spec.name, value);
        }
        Ok(resolved)
    }

    /// Validate inputs and run the node
    #[tracing::instrument(skip_all, fields(node = self.name()))]
    pub fn execute<B: Backend>(
        &self,
        ctx: &NodeContext<B>,
        inputs: &NodeInputs<B>,
    ) -> NodeResult<Vec<NodeValue<B>>> {
        let inputs = self.resolve_inputs(ctx, inputs)?;
        let storage = &ctx.placement.storage;

        let outputs = match self {
            NodeKind::KSampler => {
                let request = SampleRequest::new(
                    inputs.conditioning("positive")?.clone(),
                    inputs.conditioning("negative")?.clone(),
                    inputs.latent("latent_image")?.clone(),
                )
                .with_seed(inputs.int("seed")?)
                .with_steps(inputs.size("steps")?)
                .with_cfg(inputs.float("cfg")? as f32)
                .with_sampler(inputs.string("sampler_name")?)
                .with_scheduler(inputs.string("scheduler")?)
                .with_denoise(inputs.float("denoise")? as f32);

                let model = inputs.model("model")?;
                let mut model = model
                    .try_borrow_mut()
                    .map_err(|_| NodeError::configuration("model is already in use"))?;
                let latent = KSampler::new(ctx.placement.clone()).sample(&mut *model, &request)?;
                vec![NodeValue::Latent(latent)]
            }
            NodeKind::CheckpointLoader => {
                let loaded = ctx.loader.load_checkpoint(
                    inputs.string("config_name")?,
                    inputs.string("ckpt_name")?,
                    storage,
                )?;
                vec![
                    NodeValue::Model(loaded.model),
                    NodeValue::Clip(loaded.clip),
                    NodeValue::Vae(loaded.vae),
                ]
            }
            NodeKind::VaeLoader => {
                vec![NodeValue::Vae(
                    ctx.loader.load_vae(inputs.string("vae_name")?, storage)?,
                )]
            }
            NodeKind::ClipTextEncode => {
                let clip = inputs.clip("clip")?;
                vec![NodeValue::Conditioning(encode_text(
                    &*clip,
                    inputs.string("text")?,
                )?)]
            }
            NodeKind::ConditioningCombine => {
                let combined = inputs
                    .conditioning("conditioning_1")?
                    .combine(inputs.conditioning("conditioning_2")?);
                vec![NodeValue::Conditioning(combined)]
            }
            NodeKind::ConditioningSetArea => {
                let config = SetAreaConfig {
                    width: inputs.size("width")?,
                    height: inputs.size("height")?,
                    x: inputs.size("x")?,
                    y: inputs.size("y")?,
                    strength: inputs.float("strength")? as f32,
                    ..SetAreaConfig::default()
                };
                vec![NodeValue::Conditioning(
                    inputs.conditioning("conditioning")?.set_area(&config),
                )]
            }
            NodeKind::EmptyLatentImage => {
                let latent = Latent::empty(
                    inputs.size("width")?,
                    inputs.size("height")?,
                    inputs.size("batch_size")?,
                    storage,
                );
                vec![NodeValue::Latent(latent)]
            }
            NodeKind::LatentUpscale => {
                let method = UpscaleMethod::from_str(inputs.string("upscale_method")?)?;
                let crop = CropMethod::from_str(inputs.string("crop")?)?;
                let latent = inputs.latent("samples")?.upscale(
                    method,
                    inputs.size("width")?,
                    inputs.size("height")?,
                    crop,
                )?;
                vec![NodeValue::Latent(latent)]
            }
            NodeKind::VaeEncode => {
                let vae = inputs.vae("vae")?;
                vec![NodeValue::Latent(encode_pixels(
                    &*vae,
                    inputs.image("pixels")?,
                )?)]
            }
            NodeKind::VaeDecode => {
                let vae = inputs.vae("vae")?;
                vec![NodeValue::Image(decode_latent(
                    &*vae,
                    inputs.latent("samples")?,
                )?)]
            }
            NodeKind::LoadImage => {
                let path = ctx.paths().input_dir.join(inputs.string("image")?);
                vec![NodeValue::Image(load_image::<B>(&path, storage)?)]
            }
            NodeKind::SaveImage => {
                let metadata = PngMetadata {
                    prompt: inputs.json("prompt")?.cloned(),
                    extra: match inputs.json("extra_pnginfo")? {
                        None => serde_json::Map::new(),
                        Some(Value::Object(map)) => map.clone(),
                        Some(_) => {
                            return Err(NodeError::invalid_parameter(
                                "extra_pnginfo must be a JSON object",
                            ));
                        }
                    },
                };
                ctx.saver.save(
                    inputs.image("images")?,
                    inputs.string("filename_prefix")?,
                    &metadata,
                )?;
                Vec::new()
            }
        };
        Ok(outputs)
    }

    /// Change token for cached results; only file-backed nodes have one
    ///
    /// For `LoadImage` this is the SHA-256 of the selected file. The selection
    /// is validated like [`NodeKind::execute`] does.
    pub fn is_changed<B: Backend>(
        &self,
        ctx: &NodeContext<B>,
        inputs: &NodeInputs<B>,
    ) -> NodeResult<Option<String>> {
        match self {
            NodeKind::LoadImage => {
                let inputs = self.resolve_inputs(ctx, inputs)?;
                let path = ctx.paths().input_dir.join(inputs.string("image")?);
                Ok(Some(image_hash(&path)?))
            }
            _ => Ok(None),
        }
    }
}

impl FromStr for NodeKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| NodeError::configuration(format!("unknown node '{s}'")))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_names_round_trip() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.name().parse::<NodeKind>().unwrap(), kind);
        }
        assert!(matches!(
            "KSamplerAdvanced".parse::<NodeKind>(),
            Err(NodeError::Configuration(_))
        ));
    }

    #[test]
    fn test_only_save_image_is_output() {
        let outputs: Vec<_> = NodeKind::ALL
            .iter()
            .filter(|k| k.is_output_node())
            .collect();
        assert_eq!(outputs, vec![&NodeKind::SaveImage]);
        assert!(NodeKind::SaveImage.return_types().is_empty());
    }

    #[test]
    fn test_validate_range() {
        let spec = InputSpec::int("steps", 20, 1, 10_000);
        assert!(spec.validate::<TestBackend>(&NodeValue::Int(20)).is_ok());
        assert!(matches!(
            spec.validate::<TestBackend>(&NodeValue::Int(0)),
            Err(NodeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_validate_kind() {
        let spec = InputSpec::float("cfg", 8.0, 0.0, 100.0);
        assert!(spec.validate::<TestBackend>(&NodeValue::Int(7)).is_ok());
        assert!(matches!(
            spec.validate::<TestBackend>(&NodeValue::String("7".into())),
            Err(NodeError::InvalidParameter(_))
        ));
        assert!(matches!(
            spec.validate::<TestBackend>(&NodeValue::Float(f64::NAN)),
            Err(NodeError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_validate_choice() {
        let spec = InputSpec::choice("crop", CropMethod::NAMES);
        assert!(
            spec.validate::<TestBackend>(&NodeValue::String("center".into()))
                .is_ok()
        );
        assert!(matches!(
            spec.validate::<TestBackend>(&NodeValue::String("left".into())),
            Err(NodeError::Configuration(_))
        ));
    }
}
