//! Saving and reloading images through the filesystem

use std::fs::{self, File};

use burn::prelude::*;
use burn_ndarray::NdArray;
use burn_nodes::{ImageSaver, PngMetadata, load_image};
use serde_json::json;

type TestBackend = NdArray;

fn device() -> <TestBackend as Backend>::Device {
    <TestBackend as Backend>::Device::default()
}

#[test]
fn test_batch_save_numbers_files_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ComfyUI_00007_.png"), b"").unwrap();

    let mut values = vec![0.0f32; 2 * 4 * 6 * 3];
    values[0] = 1.0;
    let images: Tensor<TestBackend, 4> =
        Tensor::from_data(TensorData::new(values, [2, 4, 6, 3]), &device());

    let saver = ImageSaver::new(dir.path());
    let written = saver
        .save(images, "ComfyUI", &PngMetadata::default())
        .unwrap();

    let names: Vec<_> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["ComfyUI_00008_.png", "ComfyUI_00009_.png"]);

    let loaded = load_image::<TestBackend>(&written[0], &device()).unwrap();
    assert_eq!(loaded.dims(), [1, 4, 6, 3]);
    let pixels: Vec<f32> = loaded.into_data().to_vec().unwrap();
    assert_eq!(pixels[0], 1.0);
    assert!(pixels[1..].iter().all(|v| *v == 0.0));
}

#[test]
fn test_metadata_written_as_text_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let images: Tensor<TestBackend, 4> = Tensor::zeros([1, 2, 2, 3], &device());

    let mut extra = serde_json::Map::new();
    extra.insert("workflow".to_string(), json!({ "nodes": [1, 2] }));
    let metadata = PngMetadata {
        prompt: Some(json!({ "3": { "class_type": "KSampler" } })),
        extra,
    };
    let written = ImageSaver::new(dir.path())
        .save(images, "meta", &metadata)
        .unwrap();

    let decoder = png::Decoder::new(File::open(&written[0]).unwrap());
    let reader = decoder.read_info().unwrap();
    let texts: Vec<(String, String)> = reader
        .info()
        .uncompressed_latin1_text
        .iter()
        .map(|chunk| (chunk.keyword.clone(), chunk.text.clone()))
        .collect();

    assert_eq!(
        texts,
        vec![
            (
                "prompt".to_string(),
                r#"{"3":{"class_type":"KSampler"}}"#.to_string()
            ),
            ("workflow".to_string(), r#"{"nodes":[1,2]}"#.to_string()),
        ]
    );
}

#[test]
fn test_load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_image::<TestBackend>(&dir.path().join("absent.png"), &device()).unwrap_err();
    assert!(matches!(err, burn_nodes::NodeError::Io { .. }));
}
