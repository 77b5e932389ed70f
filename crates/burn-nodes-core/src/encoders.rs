//! Text encoder and VAE boundaries
//!
//! Both collaborators are black boxes. The helpers here enforce the parts of
//! their contract that belong to this layer: pixel alignment before encoding
//! and the latent channel check after it.

use burn::prelude::*;

use crate::conditioning::Conditioning;
use crate::error::NodeResult;
use crate::latent::{Latent, truncate_to_alignment};

/// Prompt text to embedding `[batch, tokens, dim]`
pub trait TextEncoder<B: Backend> {
    fn encode(&self, text: &str) -> NodeResult<Tensor<B, 3>>;
}

/// Pixel space `[batch, H, W, 3]` in `[0, 1]` to and from latent space
pub trait Vae<B: Backend> {
    fn encode(&self, pixels: Tensor<B, 4>) -> NodeResult<Tensor<B, 4>>;

    fn decode(&self, latent: Tensor<B, 4>) -> NodeResult<Tensor<B, 4>>;
}

/// Encode a prompt into a single-entry conditioning list
pub fn encode_text<B: Backend, E: TextEncoder<B> + ?Sized>(
    encoder: &E,
    text: &str,
) -> NodeResult<Conditioning<B>> {
    Ok(Conditioning::from_embedding(encoder.encode(text)?))
}

/// Truncate pixels to the 64-pixel grid and encode them
pub fn encode_pixels<B: Backend, V: Vae<B> + ?Sized>(
    vae: &V,
    pixels: Tensor<B, 4>,
) -> NodeResult<Latent<B>> {
    let pixels = truncate_to_alignment(pixels)?;
    Latent::new(vae.encode(pixels)?)
}

/// Decode a latent back to `[batch, H, W, 3]` pixels
pub fn decode_latent<B: Backend, V: Vae<B> + ?Sized>(
    vae: &V,
    latent: &Latent<B>,
) -> NodeResult<Tensor<B, 4>> {
    vae.decode(latent.samples().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latent::LATENT_SCALE;
    use burn_ndarray::NdArray;
    use std::cell::RefCell;

    type TestBackend = NdArray;

    #[derive(Default)]
    struct ShapeVae {
        seen: RefCell<Vec<[usize; 4]>>,
    }

    impl Vae<TestBackend> for ShapeVae {
        fn encode(&self, pixels: Tensor<TestBackend, 4>) -> NodeResult<Tensor<TestBackend, 4>> {
            let [b, h, w, _] = pixels.dims();
            self.seen.borrow_mut().push(pixels.dims());
            Ok(Tensor::zeros(
                [b, 4, h / LATENT_SCALE, w / LATENT_SCALE],
                &pixels.device(),
            ))
        }

        fn decode(&self, latent: Tensor<TestBackend, 4>) -> NodeResult<Tensor<TestBackend, 4>> {
            let [b, _, h, w] = latent.dims();
            Ok(Tensor::ones(
                [b, h * LATENT_SCALE, w * LATENT_SCALE, 3],
                &latent.device(),
            ))
        }
    }

    #[test]
    fn test_encode_truncates_not_pads() {
        let device = <TestBackend as Backend>::Device::default();
        let vae = ShapeVae::default();
        let pixels: Tensor<TestBackend, 4> = Tensor::zeros([1, 513, 513, 3], &device);

        let latent = encode_pixels(&vae, pixels).unwrap();

        assert_eq!(vae.seen.borrow()[0], [1, 512, 512, 3]);
        assert_eq!(latent.dims(), [1, 4, 64, 64]);
    }

    #[test]
    fn test_decode_round_trips_size() {
        let device = <TestBackend as Backend>::Device::default();
        let vae = ShapeVae::default();
        let latent = Latent::<TestBackend>::empty(128, 64, 2, &device);
        let pixels = decode_latent(&vae, &latent).unwrap();
        assert_eq!(pixels.dims(), [2, 64, 128, 3]);
    }
}
