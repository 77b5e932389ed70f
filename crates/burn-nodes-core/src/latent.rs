//! Latent container and resize operations
//!
//! Latents are `[batch, 4, height / 8, width / 8]`. The /8 ratio is a contract
//! with the VAE and is never changed here.

use std::str::FromStr;

use burn::prelude::*;
use burn::tensor::module::adaptive_avg_pool2d;

use crate::error::{NodeError, NodeResult};

/// Pixel-to-latent spatial ratio
pub const LATENT_SCALE: usize = 8;

/// Latent channel count for this model family
pub const LATENT_CHANNELS: usize = 4;

/// Pixel dimensions are truncated to a multiple of this before encoding
pub const PIXEL_ALIGN: usize = 64;

/// Resampling method for [`Latent::upscale`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpscaleMethod {
    #[default]
    NearestExact,
    Bilinear,
    /// Average over each target cell's source area
    Area,
}

impl UpscaleMethod {
    pub const NAMES: [&'static str; 3] = ["nearest-exact", "bilinear", "area"];

    pub fn name(&self) -> &'static str {
        match self {
            UpscaleMethod::NearestExact => "nearest-exact",
            UpscaleMethod::Bilinear => "bilinear",
            UpscaleMethod::Area => "area",
        }
    }
}

impl FromStr for UpscaleMethod {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest-exact" | "nearest" => Ok(UpscaleMethod::NearestExact),
            "bilinear" => Ok(UpscaleMethod::Bilinear),
            "area" => Ok(UpscaleMethod::Area),
            other => Err(NodeError::configuration(format!(
                "unknown upscale method '{other}'"
            ))),
        }
    }
}

/// Aspect handling before resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CropMethod {
    #[default]
    Disabled,
    /// Crop the relatively longer dimension symmetrically to the target aspect
    Center,
}

impl CropMethod {
    pub const NAMES: [&'static str; 2] = ["disabled", "center"];

    pub fn name(&self) -> &'static str {
        match self {
            CropMethod::Disabled => "disabled",
            CropMethod::Center => "center",
        }
    }
}

impl FromStr for CropMethod {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(CropMethod::Disabled),
            "center" => Ok(CropMethod::Center),
            other => Err(NodeError::configuration(format!(
                "unknown crop method '{other}'"
            ))),
        }
    }
}

/// Batched latent tensor `[batch, 4, h, w]`
#[derive(Debug, Clone)]
pub struct Latent<B: Backend> {
    samples: Tensor<B, 4>,
}

impl<B: Backend> Latent<B> {
    /// Wrap a tensor, checking the channel count
    pub fn new(samples: Tensor<B, 4>) -> NodeResult<Self> {
        let [_, channels, _, _] = samples.dims();
        if channels != LATENT_CHANNELS {
            return Err(NodeError::shape_mismatch(format!(
                "latent must have {LATENT_CHANNELS} channels, got {channels}"
            )));
        }
        Ok(Self { samples })
    }

    /// Zero latent for an image of `width` x `height` pixels
    pub fn empty(width: usize, height: usize, batch_size: usize, device: &B::Device) -> Self {
        let samples = Tensor::zeros(
            [
                batch_size,
                LATENT_CHANNELS,
                height / LATENT_SCALE,
                width / LATENT_SCALE,
            ],
            device,
        );
        Self { samples }
    }

    pub fn samples(&self) -> &Tensor<B, 4> {
        &self.samples
    }

    pub fn into_samples(self) -> Tensor<B, 4> {
        self.samples
    }

    pub fn dims(&self) -> [usize; 4] {
        self.samples.dims()
    }

    pub fn batch_size(&self) -> usize {
        self.dims()[0]
    }

    /// Spatial size in pixels as `(width, height)`
    pub fn pixel_size(&self) -> (usize, usize) {
        let [_, _, h, w] = self.dims();
        (w * LATENT_SCALE, h * LATENT_SCALE)
    }

    pub fn device(&self) -> B::Device {
        self.samples.device()
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            samples: self.samples.to_device(device),
        }
    }

    /// Resample to a target pixel size, optionally center-cropping first
    pub fn upscale(
        &self,
        method: UpscaleMethod,
        width: usize,
        height: usize,
        crop: CropMethod,
    ) -> NodeResult<Latent<B>> {
        let target_h = height / LATENT_SCALE;
        let target_w = width / LATENT_SCALE;
        if target_h == 0 || target_w == 0 {
            return Err(NodeError::invalid_parameter(format!(
                "upscale target {width}x{height} is smaller than one latent cell"
            )));
        }

        let [batch, channels, old_h, old_w] = self.dims();
        let source = match crop {
            CropMethod::Disabled => self.samples.clone(),
            CropMethod::Center => {
                let (x, y) = center_crop_offsets(old_w, old_h, width, height);
                // Keep at least one cell for extreme aspect changes
                let x = x.min((old_w - 1) / 2);
                let y = y.min((old_h - 1) / 2);
                self.samples.clone().slice([
                    0..batch,
                    0..channels,
                    y..old_h - y,
                    x..old_w - x,
                ])
            }
        };

        let samples = match method {
            UpscaleMethod::NearestExact => {
                let rows = nearest_exact_axis(source, 2, target_h);
                nearest_exact_axis(rows, 3, target_w)
            }
            UpscaleMethod::Bilinear => {
                let rows = bilinear_axis(source, 2, target_h);
                bilinear_axis(rows, 3, target_w)
            }
            UpscaleMethod::Area => adaptive_avg_pool2d(source, [target_h, target_w]),
        };

        Ok(Latent { samples })
    }
}

/// Source index for each output cell, sampling at cell centres
///
/// Output cell `i` reads `floor((i + 0.5) * input / output)`, clamped to the
/// last input cell.
fn nearest_exact_indices(input: usize, output: usize) -> Vec<usize> {
    let scale = input as f64 / output as f64;
    (0..output)
        .map(|i| (((i as f64 + 0.5) * scale).floor() as usize).min(input - 1))
        .collect()
}

/// Half-pixel linear taps `(lower, upper, weight of upper)` per output cell
fn half_pixel_taps(input: usize, output: usize) -> Vec<(usize, usize, f32)> {
    let scale = input as f64 / output as f64;
    (0..output)
        .map(|i| {
            let src = ((i as f64 + 0.5) * scale - 0.5).max(0.0);
            let lower = (src.floor() as usize).min(input - 1);
            let upper = (lower + 1).min(input - 1);
            (lower, upper, (src - lower as f64) as f32)
        })
        .collect()
}

fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(data, [indices.len()]), device)
}

fn nearest_exact_axis<B: Backend>(source: Tensor<B, 4>, dim: usize, size: usize) -> Tensor<B, 4> {
    let device = source.device();
    let indices = nearest_exact_indices(source.dims()[dim], size);
    source.select(dim, index_tensor::<B>(&indices, &device))
}

fn bilinear_axis<B: Backend>(source: Tensor<B, 4>, dim: usize, size: usize) -> Tensor<B, 4> {
    let device = source.device();
    let taps = half_pixel_taps(source.dims()[dim], size);
    let lower: Vec<usize> = taps.iter().map(|t| t.0).collect();
    let upper: Vec<usize> = taps.iter().map(|t| t.1).collect();
    let weights: Vec<f32> = taps.iter().map(|t| t.2).collect();

    let low = source.clone().select(dim, index_tensor::<B>(&lower, &device));
    let high = source.select(dim, index_tensor::<B>(&upper, &device));

    let mut weight_shape = [1; 4];
    weight_shape[dim] = size;
    let weights: Tensor<B, 4> =
        Tensor::<B, 4>::from_data(TensorData::new(weights, weight_shape), &device)
            .expand(low.dims());
    low.clone() + (high - low) * weights
}

/// Symmetric crop offsets `(x, y)` that bring a source to the target aspect
///
/// Only one of the two offsets is ever non-zero: the source's relatively longer
/// dimension loses `round((old - old * ratio) / 2)` cells on each side.
pub fn center_crop_offsets(
    old_width: usize,
    old_height: usize,
    new_width: usize,
    new_height: usize,
) -> (usize, usize) {
    let old_aspect = old_width as f64 / old_height as f64;
    let new_aspect = new_width as f64 / new_height as f64;
    let (mut x, mut y) = (0, 0);
    if old_aspect > new_aspect {
        let w = old_width as f64;
        x = ((w - w * (new_aspect / old_aspect)) / 2.0).round() as usize;
    } else if old_aspect < new_aspect {
        let h = old_height as f64;
        y = ((h - h * (old_aspect / new_aspect)) / 2.0).round() as usize;
    }
    (x, y)
}

/// Truncate `[batch, H, W, 3]` pixels so H and W are multiples of 64
///
/// Pixels are cropped from the bottom and right edges, never padded.
pub fn truncate_to_alignment<B: Backend>(pixels: Tensor<B, 4>) -> NodeResult<Tensor<B, 4>> {
    let [batch, height, width, channels] = pixels.dims();
    let aligned_h = (height / PIXEL_ALIGN) * PIXEL_ALIGN;
    let aligned_w = (width / PIXEL_ALIGN) * PIXEL_ALIGN;
    if aligned_h == 0 || aligned_w == 0 {
        return Err(NodeError::invalid_parameter(format!(
            "image {width}x{height} is smaller than {PIXEL_ALIGN}x{PIXEL_ALIGN}"
        )));
    }
    if aligned_h == height && aligned_w == width {
        return Ok(pixels);
    }
    Ok(pixels.slice([0..batch, 0..aligned_h, 0..aligned_w, 0..channels]))
}
