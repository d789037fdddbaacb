use serde::Serialize;
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::image_input::Bitmap;

/// A loaded, ready-to-query image classifier.
///
/// Implementations only produce the probability vector; [`Classifier::predict`]
/// derives the label and index from it so every backend gives the same
/// guarantees.
pub trait Classifier: Send + Sync {
    /// Label vocabulary in output order.
    fn labels(&self) -> &[String];

    /// One probability per label, in vocabulary order.
    fn probabilities(&self, bitmap: &Bitmap) -> Result<Vec<f32>>;

    fn predict(&self, bitmap: &Bitmap) -> Result<Prediction> {
        let probabilities = self.probabilities(bitmap)?;
        Prediction::new(self.labels(), probabilities)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub index: usize,
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Picks the most probable label. On ties the earliest label wins.
    pub fn new(labels: &[String], probabilities: Vec<f32>) -> Result<Self> {
        if labels.len() != probabilities.len() {
            return Err(AppError::InvariantViolation(format!(
                "classifier returned {} probabilities for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }

        let index = probabilities
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, &p)| match best {
                Some((_, best_p)) if !p.total_cmp(&best_p).is_gt() => best,
                _ => Some((i, p)),
            })
            .map(|(i, _)| i)
            .ok_or_else(|| AppError::InvariantViolation("empty label vocabulary".to_string()))?;

        Ok(Self {
            label: labels[index].clone(),
            index,
            probabilities,
        })
    }
}

/// Orders an id-to-label map into a vocabulary. Ids must run from 0 without gaps.
pub fn vocabulary_from_id2label(id2label: &HashMap<u32, String>) -> Result<Vec<String>> {
    if id2label.is_empty() {
        return Err(AppError::ModelLoad("label mapping is empty".to_string()));
    }

    (0..id2label.len() as u32)
        .map(|id| {
            id2label.get(&id).cloned().ok_or_else(|| {
                AppError::ModelLoad(format!(
                    "label mapping has {} entries but no label for id {id}",
                    id2label.len()
                ))
            })
        })
        .collect()
}
