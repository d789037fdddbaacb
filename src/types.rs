use serde::Serialize;

use crate::content::DisplayContent;
use crate::ranking::RankedLabel;

#[derive(Debug, Serialize)]
pub struct ClassificationResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub data: ClassificationData,
}

#[derive(Debug, Serialize)]
pub struct ClassificationData {
    pub index: usize,
    pub label: String,
    pub probs: Vec<f64>,
    pub num_classes: usize,
    pub ranked: Vec<RankedLabel>,
    pub content: DisplayContent,
}

#[derive(Debug, Serialize)]
pub struct LabelsResponse {
    pub object: String,
    pub data: Vec<String>,
}
