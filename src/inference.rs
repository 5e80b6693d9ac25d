// src/inference.rs
//
// ONNX segmentation backend (cargo feature `onnx`).
//
// Expects a single NCHW float input named "input" and one output of shape
// [1, 1, H, W] (logits, sigmoid applied here) or [1, 2, H, W] (two-class
// logits, softmax applied here, channel 1 = vegetation).

use crate::detection::SegmentationBackend;
use crate::mask::ProbabilityMap;
use crate::preprocessing;
use crate::types::ModelConfig;
use anyhow::{bail, ensure, Context, Result};
use image::imageops::{self, FilterType};
use image::{Luma, RgbImage};
use ndarray::ArrayView4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::sync::Mutex;
use tracing::{debug, info};

pub struct OnnxSegmenter {
    session: Mutex<Session>,
    name: String,
    input_width: u32,
    input_height: u32,
}

impl OnnxSegmenter {
    pub fn new(path: &str, config: &ModelConfig) -> Result<Self> {
        info!("Initializing segmentation model");
        info!("Model path: {}", path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .with_inter_threads(1)?
            .commit_from_file(path)
            .context("Failed to load model")?;

        info!("✓ Segmentation model initialized successfully");

        Ok(Self {
            session: Mutex::new(session),
            name: format!("onnx:{}", path),
            input_width: config.input_width,
            input_height: config.input_height,
        })
    }

    fn infer(&self, input: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let shape = [1usize, 3, self.input_height as usize, self.input_width as usize];
        let input_value = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outputs = session.run(ort::inputs!["input" => input_value])?;
        let (output_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = output_shape.iter().map(|&d| d.max(0) as usize).collect();
        debug!("Model output shape: {:?}", dims);
        Ok((dims, data.to_vec()))
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl SegmentationBackend for OnnxSegmenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, image: &RgbImage) -> Result<ProbabilityMap> {
        ensure!(image.width() > 0 && image.height() > 0, "empty image");
        let tensor = preprocessing::to_model_tensor(image, self.input_width, self.input_height)?;
        let (dims, data) = self.infer(tensor)?;

        ensure!(dims.len() == 4, "unexpected output rank {}", dims.len());
        let view = ArrayView4::from_shape((dims[0], dims[1], dims[2], dims[3]), &data)
            .context("output shape does not match data length")?;
        let (channels, h, w) = (dims[1], dims[2] as u32, dims[3] as u32);

        let probability = match channels {
            1 => ProbabilityMap::from_fn(w, h, |x, y| {
                Luma([sigmoid(view[[0, 0, y as usize, x as usize]])])
            }),
            2 => ProbabilityMap::from_fn(w, h, |x, y| {
                let bg = view[[0, 0, y as usize, x as usize]];
                let fg = view[[0, 1, y as usize, x as usize]];
                Luma([sigmoid(fg - bg)])
            }),
            n => bail!("unsupported output channel count {}", n),
        };

        Ok(imageops::resize(&probability, image.width(), image.height(), FilterType::Triangle))
    }
}
