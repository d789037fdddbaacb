use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::softmax;
use candle_transformers::models::vit;
use image::imageops::{self, FilterType};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::classifier::{Classifier, vocabulary_from_id2label};
use crate::error::{AppError, Result};
use crate::image_input::Bitmap;
use crate::provision::ModelFiles;

// ViT image processors normalize every channel with mean 0.5 and std 0.5.
const PIXEL_MEAN: f32 = 0.5;
const PIXEL_STD: f32 = 0.5;

/// Vision Transformer image classifier evaluated on the CPU.
pub struct VitClassifier {
    model: vit::Model,
    device: Device,
    image_size: usize,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LabelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
    Ok(serde_json::from_str(&json)?)
}

impl VitClassifier {
    #[tracing::instrument(skip(files, id2label), fields(weights = %files.weights.display()))]
    pub fn load(files: &ModelFiles, id2label: Option<HashMap<u32, String>>) -> Result<Self> {
        let device = Device::Cpu;

        let model_config: vit::Config = read_json(&files.config)?;

        // Command-line id2label takes precedence. Otherwise, use model config's id2label.
        let id2label = match id2label {
            Some(id2label) => id2label,
            None => {
                let label_config: LabelConfig = read_json(&files.config)?;
                label_config
                    .id2label
                    .into_iter()
                    .map(|(id, label)| {
                        id.parse::<u32>()
                            .map(|id| (id, label))
                            .map_err(|_| AppError::ModelLoad(format!("invalid label id {id:?}")))
                    })
                    .collect::<Result<HashMap<_, _>>>()?
            }
        };
        let labels = vocabulary_from_id2label(&id2label)?;

        let vb = if files.use_pth {
            VarBuilder::from_pth(&files.weights, DType::F32, &device)?
        } else {
            unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)? }
        };
        let model = vit::Model::new(&model_config, labels.len(), vb)
            .map_err(|e| AppError::ModelLoad(e.to_string()))?;

        tracing::info!(num_labels = labels.len(), image_size = model_config.image_size, "ViT model loaded");

        Ok(Self {
            model,
            device,
            image_size: model_config.image_size,
            labels,
        })
    }
}

/// Resizes the bitmap to `size`x`size` and lays it out as a normalized
/// `(1, 3, size, size)` tensor.
pub fn bitmap_to_tensor(bitmap: &Bitmap, size: usize, device: &Device) -> Result<Tensor> {
    let resized = imageops::resize(bitmap, size as u32, size as u32, FilterType::Triangle);
    let plane = size * size;
    let mut data = vec![0f32; 3 * plane];

    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            let value = f32::from(pixel[c]) / 255.0;
            data[c * plane + i] = (value - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    Ok(Tensor::from_vec(data, (1, 3, size, size), device)?)
}

impl Classifier for VitClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn probabilities(&self, bitmap: &Bitmap) -> Result<Vec<f32>> {
        let input = bitmap_to_tensor(bitmap, self.image_size, &self.device)?;
        let logits = self.model.forward(&input)?;
        let probs = softmax(&logits, 1)?.squeeze(0)?.to_vec1::<f32>()?;
        Ok(probs)
    }
}
