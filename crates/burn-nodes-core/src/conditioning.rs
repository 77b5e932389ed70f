//! Conditioning data model
//!
//! A [`Conditioning`] is an ordered list of [`ConditioningEntry`] values, each
//! an encoded prompt embedding `[batch, tokens, dim]` plus optional gating
//! metadata. Order does not matter when lists are combined, but it does for
//! area compositing: later entries overlay earlier ones inside their area.
//!
//! Lists have value semantics. Burn tensors are immutable, so cloning an entry
//! never lets a downstream edit reach an upstream list; [`Conditioning::set_area`]
//! always returns a fresh list.

use burn::prelude::*;

use crate::broadcast::tile_batch;
use crate::error::NodeResult;
use crate::latent::LATENT_SCALE;

/// Rectangle in latent units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
    pub height: usize,
    pub width: usize,
    pub y: usize,
    pub x: usize,
}

impl Area {
    /// Convert a pixel-space rectangle by integer division with the latent scale
    pub fn from_pixels(width: usize, height: usize, x: usize, y: usize) -> Self {
        Self {
            height: height / LATENT_SCALE,
            width: width / LATENT_SCALE,
            y: y / LATENT_SCALE,
            x: x / LATENT_SCALE,
        }
    }

    /// Intersect with a latent of the given spatial size
    ///
    /// Returns `None` when nothing of the area lies inside the latent.
    pub fn clamp_to(&self, latent_height: usize, latent_width: usize) -> Option<Area> {
        let y0 = self.y.min(latent_height);
        let x0 = self.x.min(latent_width);
        let y1 = (self.y + self.height).min(latent_height);
        let x1 = (self.x + self.width).min(latent_width);
        if y1 <= y0 || x1 <= x0 {
            return None;
        }
        Some(Area {
            height: y1 - y0,
            width: x1 - x0,
            y: y0,
            x: x0,
        })
    }
}

/// Optional gating metadata attached to an entry
///
/// Every field is independently optional; `None` means "not restricted".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConditioningMeta {
    /// Region the entry applies to
    pub area: Option<Area>,
    /// Compositing weight
    pub strength: Option<f32>,
    /// Lowest sigma the entry is active at (inclusive)
    pub sigma_min: Option<f32>,
    /// Highest sigma the entry is active at (inclusive)
    pub sigma_max: Option<f32>,
}

impl ConditioningMeta {
    /// Compositing weight, 1.0 when unset
    pub fn strength_or_default(&self) -> f32 {
        self.strength.unwrap_or(1.0)
    }

    /// Whether the sigma gate admits `sigma`
    pub fn is_active_at(&self, sigma: f32) -> bool {
        self.sigma_min.is_none_or(|min| sigma >= min)
            && self.sigma_max.is_none_or(|max| sigma <= max)
    }
}

/// One encoded prompt plus its metadata
#[derive(Debug, Clone)]
pub struct ConditioningEntry<B: Backend> {
    /// Text embedding `[batch, tokens, dim]`
    pub embedding: Tensor<B, 3>,
    pub meta: ConditioningMeta,
}

impl<B: Backend> ConditioningEntry<B> {
    pub fn new(embedding: Tensor<B, 3>) -> Self {
        Self {
            embedding,
            meta: ConditioningMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: ConditioningMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Leading dimension of the embedding
    pub fn batch_size(&self) -> usize {
        self.embedding.dims()[0]
    }

    /// Tile the embedding batch up to `batch`
    pub fn broadcast_to(&self, batch: usize) -> NodeResult<Self> {
        Ok(Self {
            embedding: tile_batch(self.embedding.clone(), batch)?,
            meta: self.meta,
        })
    }

    pub fn to_device(self, device: &B::Device) -> Self {
        Self {
            embedding: self.embedding.to_device(device),
            meta: self.meta,
        }
    }
}

/// Parameters for [`Conditioning::set_area`], in pixel units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetAreaConfig {
    pub width: usize,
    pub height: usize,
    pub x: usize,
    pub y: usize,
    pub strength: f32,
    pub sigma_min: f32,
    pub sigma_max: f32,
}

impl Default for SetAreaConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            x: 0,
            y: 0,
            strength: 1.0,
            sigma_min: 0.0,
            sigma_max: 99.0,
        }
    }
}

/// Ordered list of conditioning entries
#[derive(Debug, Clone)]
pub struct Conditioning<B: Backend> {
    entries: Vec<ConditioningEntry<B>>,
}

impl<B: Backend> Default for Conditioning<B> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<B: Backend> Conditioning<B> {
    pub fn new(entries: Vec<ConditioningEntry<B>>) -> Self {
        Self { entries }
    }

    /// Single-entry list with empty metadata, as produced by a text encoder
    pub fn from_embedding(embedding: Tensor<B, 3>) -> Self {
        Self::new(vec![ConditioningEntry::new(embedding)])
    }

    pub fn entries(&self) -> &[ConditioningEntry<B>] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConditioningEntry<B>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Concatenate two lists, preserving order and keeping duplicates
    pub fn combine(&self, other: &Conditioning<B>) -> Conditioning<B> {
        let mut entries = Vec::with_capacity(self.len() + other.len());
        entries.extend(self.entries.iter().cloned());
        entries.extend(other.entries.iter().cloned());
        Conditioning { entries }
    }

    /// Copy of the list with area, strength and sigma gate set on every entry
    ///
    /// The receiver is left untouched so it can feed other branches of a graph.
    pub fn set_area(&self, config: &SetAreaConfig) -> Conditioning<B> {
        let area = Area::from_pixels(config.width, config.height, config.x, config.y);
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                entry.meta.area = Some(area);
                entry.meta.strength = Some(config.strength);
                entry.meta.sigma_min = Some(config.sigma_min);
                entry.meta.sigma_max = Some(config.sigma_max);
                entry
            })
            .collect();
        Conditioning { entries }
    }

    /// Tile every entry's batch up to `batch` and move it to `device`
    pub fn prepare(&self, batch: usize, device: &B::Device) -> NodeResult<Conditioning<B>> {
        let entries = self
            .entries
            .iter()
            .map(|entry| Ok(entry.broadcast_to(batch)?.to_device(device)))
            .collect::<NodeResult<Vec<_>>>()?;
        Ok(Conditioning { entries })
    }
}

impl<B: Backend> FromIterator<ConditioningEntry<B>> for Conditioning<B> {
    fn from_iter<I: IntoIterator<Item = ConditioningEntry<B>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn embedding(batch: usize, value: f32) -> Tensor<TestBackend, 3> {
        let device = <TestBackend as Backend>::Device::default();
        Tensor::<TestBackend, 3>::ones([batch, 2, 4], &device) * value
    }

    fn values(tensor: &Tensor<TestBackend, 3>) -> Vec<f32> {
        tensor.clone().into_data().to_vec().unwrap()
    }

    #[test]
    fn test_area_from_pixels_divides_by_eight() {
        let area = Area::from_pixels(200, 100, 64, 17);
        assert_eq!(
            area,
            Area {
                height: 12,
                width: 25,
                y: 2,
                x: 8
            }
        );
    }

    #[test]
    fn test_area_clamp() {
        let area = Area {
            height: 10,
            width: 10,
            y: 60,
            x: 0,
        };
        assert_eq!(
            area.clamp_to(64, 64),
            Some(Area {
                height: 4,
                width: 10,
                y: 60,
                x: 0
            })
        );
        let outside = Area {
            height: 8,
            width: 8,
            y: 64,
            x: 0,
        };
        assert_eq!(outside.clamp_to(64, 64), None);
    }

    #[test]
    fn test_sigma_gate() {
        let meta = ConditioningMeta {
            sigma_min: Some(1.0),
            sigma_max: Some(5.0),
            ..Default::default()
        };
        assert!(meta.is_active_at(1.0));
        assert!(meta.is_active_at(5.0));
        assert!(!meta.is_active_at(0.5));
        assert!(!meta.is_active_at(6.0));
        assert!(ConditioningMeta::default().is_active_at(1000.0));
    }

    #[test]
    fn test_combine_is_length_additive_and_ordered() {
        let a = Conditioning::from_embedding(embedding(1, 1.0));
        let b: Conditioning<TestBackend> = [embedding(1, 2.0), embedding(1, 3.0)]
            .into_iter()
            .map(ConditioningEntry::new)
            .collect();
        let c = Conditioning::from_embedding(embedding(1, 4.0));

        let ab = a.combine(&b);
        assert_eq!(ab.len(), a.len() + b.len());

        assert_eq!(values(&ab.entries()[0].embedding), values(&embedding(1, 1.0)));

        let left = ab.combine(&c);
        let right = a.combine(&b.combine(&c));
        assert_eq!(left.len(), right.len());
        for (l, r) in left.iter().zip(right.iter()) {
            assert_eq!(values(&l.embedding), values(&r.embedding));
        }
    }

    #[test]
    fn test_set_area_leaves_input_untouched() {
        let original = Conditioning::from_embedding(embedding(1, 1.0));
        let config = SetAreaConfig {
            width: 256,
            height: 128,
            x: 64,
            y: 0,
            strength: 0.5,
            sigma_min: 0.0,
            sigma_max: 99.0,
        };

        let updated = original.set_area(&config);

        assert_eq!(original.entries()[0].meta, ConditioningMeta::default());
        let meta = updated.entries()[0].meta;
        assert_eq!(
            meta.area,
            Some(Area {
                height: 16,
                width: 32,
                y: 0,
                x: 8
            })
        );
        assert_eq!(meta.strength, Some(0.5));
        assert_eq!(meta.sigma_max, Some(99.0));
    }

    #[test]
    fn test_prepare_broadcasts_every_entry() {
        let device = <TestBackend as Backend>::Device::default();
        let cond = Conditioning::from_embedding(embedding(1, 1.0))
            .combine(&Conditioning::from_embedding(embedding(2, 2.0)));

        let prepared = cond.prepare(4, &device).unwrap();
        assert!(prepared.iter().all(|e| e.batch_size() == 4));

        let err = Conditioning::from_embedding(embedding(3, 1.0))
            .prepare(4, &device)
            .unwrap_err();
        assert!(matches!(err, NodeError::ShapeMismatch(_)));
    }
}
