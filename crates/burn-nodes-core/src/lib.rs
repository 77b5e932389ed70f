//! burn-nodes-core: data contracts shared by every node
//!
//! - [`conditioning`]: prompt embeddings with area, strength and sigma gating
//! - [`latent`]: the `[batch, 4, h/8, w/8]` latent container and its resize ops
//! - [`broadcast`]: batch tiling between conditioning and latent batches
//! - [`placement`]: scoped compute-device placement
//! - [`noise`]: per-request seeded Gaussian noise
//! - [`encoders`]: text encoder and VAE boundaries

pub mod broadcast;
pub mod conditioning;
pub mod encoders;
pub mod error;
pub mod latent;
pub mod noise;
pub mod placement;

pub use broadcast::{tile_batch, tile_factor};
pub use conditioning::{Area, Conditioning, ConditioningEntry, ConditioningMeta, SetAreaConfig};
pub use encoders::{TextEncoder, Vae, decode_latent, encode_pixels, encode_text};
pub use error::{NodeError, NodeResult};
pub use latent::{
    CropMethod, LATENT_CHANNELS, LATENT_SCALE, Latent, PIXEL_ALIGN, UpscaleMethod,
    center_crop_offsets, truncate_to_alignment,
};
pub use noise::NoiseGenerator;
pub use placement::{Placeable, Placement, PlacementGuard};
