//! Compute placement
//!
//! A request moves the model to the compute device for the duration of
//! sampling and must hand it back to storage afterwards, otherwise it pins
//! memory needed by the next unrelated request. [`PlacementGuard`] ties that
//! release to scope: the model returns to storage when the guard drops, on the
//! success path and on every `?` exit alike.

use std::ops::{Deref, DerefMut};

use burn::prelude::*;

/// A component that can be moved wholesale between devices
pub trait Placeable<B: Backend> {
    /// Synchronously move every parameter to `device`
    fn place(&mut self, device: &B::Device);
}

/// Compute and storage devices for one pipeline
#[derive(Debug, Clone)]
pub struct Placement<B: Backend> {
    /// High-throughput device used while sampling
    pub compute: B::Device,
    /// Baseline device tensors and models return to between requests
    pub storage: B::Device,
}

impl<B: Backend> Placement<B> {
    pub fn new(compute: B::Device, storage: B::Device) -> Self {
        Self { compute, storage }
    }

    /// Compute and storage on the same device; transfers become no-ops
    pub fn single(device: B::Device) -> Self {
        Self {
            compute: device.clone(),
            storage: device,
        }
    }

    /// Move `target` to the compute device until the returned guard drops
    pub fn acquire<'a, P>(&self, target: &'a mut P) -> PlacementGuard<'a, B, P>
    where
        P: Placeable<B> + ?Sized,
    {
        tracing::debug!(compute = ?self.compute, "placing model on compute device");
        target.place(&self.compute);
        PlacementGuard {
            target,
            storage: self.storage.clone(),
        }
    }
}

impl<B: Backend> Default for Placement<B> {
    fn default() -> Self {
        Self::single(B::Device::default())
    }
}

/// Scoped hold on a component placed on the compute device
pub struct PlacementGuard<'a, B: Backend, P: Placeable<B> + ?Sized> {
    target: &'a mut P,
    storage: B::Device,
}

impl<B: Backend, P: Placeable<B> + ?Sized> Deref for PlacementGuard<'_, B, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.target
    }
}

impl<B: Backend, P: Placeable<B> + ?Sized> DerefMut for PlacementGuard<'_, B, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.target
    }
}

impl<B: Backend, P: Placeable<B> + ?Sized> Drop for PlacementGuard<'_, B, P> {
    fn drop(&mut self) {
        tracing::debug!(storage = ?self.storage, "returning model to storage device");
        self.target.place(&self.storage);
    }
}
