//! Image files in and out of pixel tensors
//!
//! Pixel tensors are `[batch, H, W, 3]` RGB in `[0, 1]`. Saved images carry
//! the prompt graph and any extra records as PNG text chunks holding JSON.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn_nodes_core::{NodeError, NodeResult};
use serde_json::{Map, Value};
use sha2::Digest;

/// Decode an image file into a `[1, H, W, 3]` tensor
#[tracing::instrument(skip(device))]
pub fn load_image<B: Backend>(path: &Path, device: &B::Device) -> NodeResult<Tensor<B, 4>> {
    let decoded = image::open(path).map_err(|e| match e {
        image::ImageError::IoError(source) => NodeError::io(path, source),
        other => NodeError::image(path, other),
    })?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let data: Vec<f32> = rgb
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();
    Ok(Tensor::from_data(
        TensorData::new(data, [1, height as usize, width as usize, 3]),
        device,
    ))
}

/// Identity of an image file: SHA-256 of its bytes, lowercase hex
pub fn image_hash(path: &Path) -> NodeResult<String> {
    let bytes = fs::read(path).map_err(|e| NodeError::io(path, e))?;
    let digest = sha2::Sha256::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    Ok(out)
}

/// Text records embedded in saved PNGs
#[derive(Debug, Clone, Default)]
pub struct PngMetadata {
    /// Stored under the `prompt` keyword
    pub prompt: Option<Value>,
    /// One record per key
    pub extra: Map<String, Value>,
}

/// Writes numbered PNGs into an output directory
#[derive(Debug, Clone)]
pub struct ImageSaver {
    output_dir: PathBuf,
}

impl ImageSaver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Counter the next save with `prefix` will use
    ///
    /// Files named `<prefix>_<counter>...` are considered. A counter that does
    /// not parse as a number counts as 0. With no such file the counter
    /// starts at 1.
    pub fn next_counter(&self, prefix: &str) -> NodeResult<u64> {
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
            Err(e) => return Err(NodeError::io(&self.output_dir, e)),
        };

        let mut highest = None;
        for entry in entries {
            let entry = entry.map_err(|e| NodeError::io(&self.output_dir, e))?;
            let name = entry.file_name();
            if let Some(counter) = name.to_str().and_then(|n| existing_counter(n, prefix)) {
                highest = highest.max(Some(counter));
            }
        }
        Ok(highest.map_or(1, |c| c + 1))
    }

    /// File name the next save with `prefix` will use
    pub fn next_filename(&self, prefix: &str) -> NodeResult<String> {
        Ok(filename(prefix, self.next_counter(prefix)?))
    }

    /// Save every image of a `[batch, H, W, 3]` tensor, returning the paths
    #[tracing::instrument(skip(self, images, metadata), fields(dir = %self.output_dir.display()))]
    pub fn save<B: Backend>(
        &self,
        images: Tensor<B, 4>,
        prefix: &str,
        metadata: &PngMetadata,
    ) -> NodeResult<Vec<PathBuf>> {
        let [batch, height, width, channels] = images.dims();
        if channels != 3 {
            return Err(NodeError::shape_mismatch(format!(
                "images must have 3 channels, got {channels}"
            )));
        }
        fs::create_dir_all(&self.output_dir).map_err(|e| NodeError::io(&self.output_dir, e))?;

        let mut counter = self.next_counter(prefix)?;
        let mut written = Vec::with_capacity(batch);
        for index in 0..batch {
            let image = images
                .clone()
                .slice([index..index + 1, 0..height, 0..width, 0..3]);
            let bytes = to_rgb8(image)?;
            let path = self.output_dir.join(filename(prefix, counter));
            write_png(&path, &bytes, width, height, metadata)?;
            tracing::info!(path = %path.display(), "image saved");
            written.push(path);
            counter += 1;
        }
        Ok(written)
    }
}

fn filename(prefix: &str, counter: u64) -> String {
    format!("{prefix}_{counter:05}_.png")
}

/// Counter of an existing file written with `prefix`, if it was
fn existing_counter(file_name: &str, prefix: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('_')?;
    let digits = rest.split('_').next().unwrap_or_default();
    Some(digits.parse().unwrap_or(0))
}

fn to_rgb8<B: Backend>(image: Tensor<B, 4>) -> NodeResult<Vec<u8>> {
    let values: Vec<f32> = image
        .clamp(0.0, 1.0)
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| NodeError::invalid_parameter(format!("unreadable image tensor: {e:?}")))?;
    Ok(values.into_iter().map(|v| (v * 255.0) as u8).collect())
}

fn write_png(
    path: &Path,
    bytes: &[u8],
    width: usize,
    height: usize,
    metadata: &PngMetadata,
) -> NodeResult<()> {
    let file = File::create(path).map_err(|e| NodeError::io(path, e))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width as u32, height as u32);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Best);

    let records = metadata
        .prompt
        .iter()
        .map(|prompt| ("prompt", prompt))
        .chain(metadata.extra.iter().map(|(k, v)| (k.as_str(), v)));
    for (keyword, value) in records {
        let text = value.to_string();
        // tEXt is Latin-1 only
        let added = if text.is_ascii() {
            encoder.add_text_chunk(keyword.to_string(), text)
        } else {
            encoder.add_itxt_chunk(keyword.to_string(), text)
        };
        added.map_err(|e| NodeError::image(path, e))?;
    }

    let mut writer = encoder
        .write_header()
        .map_err(|e| NodeError::image(path, e))?;
    writer
        .write_image_data(bytes)
        .map_err(|e| NodeError::image(path, e))?;
    writer.finish().map_err(|e| NodeError::image(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_existing_counter() {
        assert_eq!(existing_counter("ComfyUI_00007_.png", "ComfyUI"), Some(7));
        assert_eq!(existing_counter("ComfyUI_final_.png", "ComfyUI"), Some(0));
        assert_eq!(existing_counter("ComfyUIx_00009_.png", "ComfyUI"), None);
        assert_eq!(existing_counter("Other_00050_.png", "ComfyUI"), None);
    }

    #[test]
    fn test_next_counter_resumes_after_highest() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ComfyUI_00003_.png", "ComfyUI_00007_.png", "Other_00050_.png"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let saver = ImageSaver::new(dir.path());
        assert_eq!(saver.next_filename("ComfyUI").unwrap(), "ComfyUI_00008_.png");
        assert_eq!(saver.next_counter("Fresh").unwrap(), 1);
    }

    #[test]
    fn test_unparseable_counter_counts_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ComfyUI_draft_.png"), b"").unwrap();
        let saver = ImageSaver::new(dir.path());
        assert_eq!(saver.next_counter("ComfyUI").unwrap(), 1);
    }

    #[test]
    fn test_missing_output_dir_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let saver = ImageSaver::new(dir.path().join("not-yet"));
        assert_eq!(saver.next_counter("ComfyUI").unwrap(), 1);
    }

    #[test]
    fn test_image_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.bin");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            image_hash(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_rejects_non_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let device = <TestBackend as Backend>::Device::default();
        let images: Tensor<TestBackend, 4> = Tensor::zeros([1, 8, 8, 4], &device);
        let err = ImageSaver::new(dir.path())
            .save(images, "x", &PngMetadata::default())
            .unwrap_err();
        assert!(matches!(err, NodeError::ShapeMismatch(_)));
    }
}
