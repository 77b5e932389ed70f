//! Classifier-free guidance and conditioning compositing
//!
//! One guided noise estimate costs one model query per conditioning list.
//! Inside a list, entries are gated by sigma and composited by area:
//! full-frame entries share a single call over the whole latent, each area
//! entry is evaluated on its crop, and the weighted sum is normalised by the
//! accumulated strength.

use burn::prelude::*;
use burn_nodes_core::{Conditioning, ConditioningEntry, NodeResult};

use crate::algorithm::Denoiser;
use crate::model::DiffusionModel;

/// Apply classifier-free guidance
///
/// `guided = negative + cfg * (positive - negative)`
pub fn apply_guidance<B: Backend>(
    noise_pred_negative: Tensor<B, 4>,
    noise_pred_positive: Tensor<B, 4>,
    guidance_scale: f32,
) -> Tensor<B, 4> {
    noise_pred_negative.clone() + (noise_pred_positive - noise_pred_negative) * guidance_scale
}

/// Noise estimate for one conditioning list at `sigma`
pub fn conditioned_estimate<B, M>(
    model: &M,
    latent: &Tensor<B, 4>,
    conditioning: &Conditioning<B>,
    sigma: f32,
) -> NodeResult<Tensor<B, 4>>
where
    B: Backend,
    M: DiffusionModel<B> + ?Sized,
{
    let [batch, channels, height, width] = latent.dims();

    let mut full_frame: Vec<ConditioningEntry<B>> = Vec::new();
    let mut regional = Vec::new();
    for entry in conditioning.iter().filter(|e| e.meta.is_active_at(sigma)) {
        match entry.meta.area {
            None => full_frame.push(entry.clone()),
            Some(area) => {
                if let Some(area) = area.clamp_to(height, width) {
                    regional.push((area, entry));
                }
            }
        }
    }

    if full_frame.is_empty() && regional.is_empty() {
        return model.apply(latent.clone(), &[], sigma);
    }

    let device = latent.device();
    let mut out: Tensor<B, 4> = Tensor::zeros([batch, channels, height, width], &device);
    let mut weight: Tensor<B, 4> = Tensor::zeros([batch, channels, height, width], &device);

    if !full_frame.is_empty() {
        let strength = full_frame
            .iter()
            .map(|e| e.meta.strength_or_default())
            .sum::<f32>()
            / full_frame.len() as f32;
        let estimate = model.apply(latent.clone(), &full_frame, sigma)?;
        out = out + estimate * strength;
        weight = weight + strength;
    }

    // Later entries are accumulated after earlier ones within shared regions
    for (area, entry) in regional {
        let region = [
            0..batch,
            0..channels,
            area.y..area.y + area.height,
            area.x..area.x + area.width,
        ];
        let crop = latent.clone().slice(region.clone());
        let strength = entry.meta.strength_or_default();
        let estimate = model.apply(crop, std::slice::from_ref(entry), sigma)?;

        let region_out = out.clone().slice(region.clone()) + estimate * strength;
        out = out.slice_assign(region.clone(), region_out);
        let region_weight = weight.clone().slice(region.clone()) + strength;
        weight = weight.slice_assign(region, region_weight);
    }

    Ok(out / weight.clamp_min(f32::MIN_POSITIVE))
}

/// Guided denoiser over a positive and a negative conditioning list
pub struct CfgDenoiser<'a, B: Backend, M: DiffusionModel<B> + ?Sized> {
    model: &'a M,
    positive: &'a Conditioning<B>,
    negative: &'a Conditioning<B>,
    guidance_scale: f32,
}

impl<'a, B: Backend, M: DiffusionModel<B> + ?Sized> CfgDenoiser<'a, B, M> {
    pub fn new(
        model: &'a M,
        positive: &'a Conditioning<B>,
        negative: &'a Conditioning<B>,
        guidance_scale: f32,
    ) -> Self {
        Self {
            model,
            positive,
            negative,
            guidance_scale,
        }
    }
}

impl<B: Backend, M: DiffusionModel<B> + ?Sized> Denoiser<B> for CfgDenoiser<'_, B, M> {
    fn noise_estimate(&mut self, latent: Tensor<B, 4>, sigma: f32) -> NodeResult<Tensor<B, 4>> {
        let positive = conditioned_estimate(self.model, &latent, self.positive, sigma)?;
        let negative = conditioned_estimate(self.model, &latent, self.negative, sigma)?;
        Ok(apply_guidance(negative, positive, self.guidance_scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use burn_nodes_core::{Area, ConditioningMeta, Placeable};
    use std::cell::RefCell;

    type TestBackend = NdArray;

    /// Returns the mean of each entry's embedding as a constant field
    #[derive(Default)]
    struct EmbeddingMean {
        calls: RefCell<Vec<(usize, [usize; 4])>>,
    }

    impl Placeable<TestBackend> for EmbeddingMean {
        fn place(&mut self, _device: &NdArrayDevice) {}
    }

    impl DiffusionModel<TestBackend> for EmbeddingMean {
        fn apply(
            &self,
            latent: Tensor<TestBackend, 4>,
            conditioning: &[ConditioningEntry<TestBackend>],
            _sigma: f32,
        ) -> NodeResult<Tensor<TestBackend, 4>> {
            self.calls
                .borrow_mut()
                .push((conditioning.len(), latent.dims()));
            let value: f32 = conditioning
                .iter()
                .map(|e| e.embedding.clone().mean().into_scalar())
                .sum();
            Ok(Tensor::ones(latent.dims(), &latent.device()) * value)
        }
    }

    fn entry(value: f32, meta: ConditioningMeta) -> ConditioningEntry<TestBackend> {
        let device = NdArrayDevice::default();
        ConditioningEntry::new(Tensor::ones([1, 1, 2], &device) * value).with_meta(meta)
    }

    fn values(t: Tensor<TestBackend, 4>) -> Vec<f32> {
        t.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_guidance_collapses_when_estimates_agree() {
        let device = NdArrayDevice::default();
        let negative: Tensor<TestBackend, 4> = Tensor::ones([1, 4, 2, 2], &device) * 0.25;
        let guided = apply_guidance(negative.clone(), negative.clone(), 8.0);
        assert_eq!(values(guided), values(negative));
    }

    #[test]
    fn test_guidance_scales_difference() {
        let device = NdArrayDevice::default();
        let negative: Tensor<TestBackend, 4> = Tensor::ones([1, 1, 1, 1], &device);
        let positive: Tensor<TestBackend, 4> = Tensor::ones([1, 1, 1, 1], &device) * 2.0;
        assert_eq!(values(apply_guidance(negative, positive, 3.0)), vec![4.0]);
    }

    #[test]
    fn test_no_active_entries_queries_unconditioned() {
        let device = NdArrayDevice::default();
        let model = EmbeddingMean::default();
        let gated = Conditioning::new(vec![entry(
            3.0,
            ConditioningMeta {
                sigma_max: Some(1.0),
                ..Default::default()
            },
        )]);
        let latent: Tensor<TestBackend, 4> = Tensor::zeros([1, 4, 4, 4], &device);

        let out = conditioned_estimate(&model, &latent, &gated, 5.0).unwrap();
        assert!(values(out).iter().all(|v| *v == 0.0));
        assert_eq!(model.calls.borrow()[0].0, 0);
    }

    #[test]
    fn test_full_frame_entries_share_one_call() {
        let device = NdArrayDevice::default();
        let model = EmbeddingMean::default();
        let cond = Conditioning::new(vec![
            entry(1.0, ConditioningMeta::default()),
            entry(2.0, ConditioningMeta::default()),
        ]);
        let latent: Tensor<TestBackend, 4> = Tensor::zeros([1, 4, 4, 4], &device);

        let out = conditioned_estimate(&model, &latent, &cond, 1.0).unwrap();
        assert_eq!(model.calls.borrow().len(), 1);
        assert!(values(out).iter().all(|v| (*v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn test_area_entry_only_covers_its_region() {
        let device = NdArrayDevice::default();
        let model = EmbeddingMean::default();
        let area = ConditioningMeta {
            area: Some(Area {
                height: 2,
                width: 2,
                y: 0,
                x: 0,
            }),
            strength: Some(0.5),
            ..Default::default()
        };
        let cond = Conditioning::new(vec![entry(4.0, area)]);
        let latent: Tensor<TestBackend, 4> = Tensor::zeros([1, 1, 4, 4], &device);

        let out = values(conditioned_estimate(&model, &latent, &cond, 1.0).unwrap());
        assert_eq!(model.calls.borrow()[0].1, [1, 1, 2, 2]);
        // Normalised by strength inside the area, zero outside
        assert!((out[0] - 4.0).abs() < 1e-6);
        assert!((out[5] - 4.0).abs() < 1e-6);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[15], 0.0);
    }

    #[test]
    fn test_area_blends_with_full_frame() {
        let device = NdArrayDevice::default();
        let model = EmbeddingMean::default();
        let area = ConditioningMeta {
            area: Some(Area {
                height: 1,
                width: 1,
                y: 0,
                x: 0,
            }),
            strength: Some(1.0),
            ..Default::default()
        };
        let cond = Conditioning::new(vec![
            entry(2.0, ConditioningMeta::default()),
            entry(4.0, area),
        ]);
        let latent: Tensor<TestBackend, 4> = Tensor::zeros([1, 1, 2, 2], &device);

        let out = values(conditioned_estimate(&model, &latent, &cond, 1.0).unwrap());
        assert!((out[0] - 3.0).abs() < 1e-6);
        assert!((out[3] - 2.0).abs() < 1e-6);
    }
}
