use serde::Serialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedLabel {
    pub label: String,
    pub probability: f32,
}

/// Pairs every label with its probability and orders them highest first.
///
/// The sort is stable, so labels with identical probabilities keep their
/// vocabulary order.
pub fn rank(labels: &[String], probabilities: &[f32]) -> Result<Vec<RankedLabel>> {
    if labels.len() != probabilities.len() {
        return Err(AppError::InvariantViolation(format!(
            "{} labels but {} probabilities",
            labels.len(),
            probabilities.len()
        )));
    }

    let mut ranked: Vec<RankedLabel> = labels
        .iter()
        .zip(probabilities.iter())
        .map(|(label, &probability)| RankedLabel {
            label: label.clone(),
            probability,
        })
        .collect();
    ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    Ok(ranked)
}

/// Bar row for the probability chart.
#[derive(Debug, Clone, Serialize)]
pub struct ProbabilityBar {
    pub label: String,
    pub percent_text: String,
    pub width: String,
    pub highlight: bool,
}

impl ProbabilityBar {
    pub fn from_ranked(ranked: &RankedLabel, predicted: &str) -> Self {
        let pct = f64::from(ranked.probability) * 100.0;
        Self {
            label: ranked.label.clone(),
            percent_text: format!("{pct:.2}%"),
            width: format!("{pct:.4}%"),
            highlight: ranked.label == predicted,
        }
    }
}
