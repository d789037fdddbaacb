use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::classifier::{Classifier, Prediction};
use crate::content::ContentResolver;
use crate::error::{AppError, Result};
use crate::image_input::{self, ImageSource};
use crate::provision::ModelProvisioner;
use crate::ranking::{RankedLabel, rank};
use crate::render::{Renderer, ResultView};
use crate::types::{ClassificationData, ClassificationResponse, LabelsResponse};

#[derive(Clone)]
pub struct AppState {
    provisioner: Arc<ModelProvisioner>,
    resolver: Arc<ContentResolver>,
    renderer: Arc<Renderer>,
}

impl AppState {
    pub fn new(
        provisioner: Arc<ModelProvisioner>,
        resolver: ContentResolver,
        renderer: Renderer,
    ) -> Self {
        Self {
            provisioner,
            resolver: Arc::new(resolver),
            renderer: Arc::new(renderer),
        }
    }

    async fn classifier(&self) -> Result<Arc<dyn Classifier>> {
        self.provisioner.handle().await
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/predict", post(predict_page_handler))
        .route("/content", get(content_page_handler).post(content_form_handler))
        .route("/v1/classify", post(classify_handler))
        .route("/v1/labels", get(labels_handler))
        .route("/v1/content/:label", get(content_handler))
        .route("/health", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct Classified {
    prediction: Prediction,
    ranked: Vec<RankedLabel>,
    image_uri: String,
}

/// Decode, classify and rank one submitted image.
async fn classify_image(
    classifier: Arc<dyn Classifier>,
    bytes: Bytes,
    source: ImageSource,
) -> Result<Classified> {
    let result = tokio::task::spawn_blocking(move || -> Result<Classified> {
        let bitmap = image_input::normalize(&bytes, source)?;
        let prediction = classifier.predict(&bitmap)?;
        let ranked = rank(classifier.labels(), &prediction.probabilities)?;
        let image_uri = image_input::to_data_uri(&bitmap)?;
        Ok(Classified {
            prediction,
            ranked,
            image_uri,
        })
    })
    .await?;

    match &result {
        Ok(classified) => {
            counter!("predictions_total").increment(1);
            tracing::info!(
                label = %classified.prediction.label,
                index = classified.prediction.index,
                "Image classified"
            );
        }
        Err(e) => {
            counter!("prediction_failures_total", "kind" => e.kind()).increment(1);
        }
    }
    result
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>> {
    let classifier = state.classifier().await?;
    Ok(Html(state.renderer.index(classifier.labels(), None)?))
}

#[tracing::instrument(skip(state, multipart))]
async fn predict_page_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response> {
    let classifier = state.classifier().await?;

    let mut upload = None;
    let mut camera = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        // Browsers send empty parts for untouched file inputs.
        if bytes.is_empty() {
            continue;
        }
        match name.as_str() {
            "file" => upload = Some(bytes),
            "camera" => camera = Some(bytes),
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    // A file upload takes precedence over a camera capture.
    let submission = match (upload, camera) {
        (Some(bytes), _) => (bytes, ImageSource::Upload),
        (None, Some(bytes)) => (bytes, ImageSource::Camera),
        (None, None) => {
            return Ok(Html(state.renderer.index(classifier.labels(), None)?).into_response());
        }
    };

    let classified = match classify_image(classifier.clone(), submission.0, submission.1).await {
        Ok(classified) => classified,
        Err(e @ (AppError::Decode(_) | AppError::UnsupportedFormat(_))) => {
            tracing::warn!(error = %e, "Rejected submitted image");
            let page = state
                .renderer
                .index(classifier.labels(), Some(&e.to_string()))?;
            return Ok((e.status_code(), Html(page)).into_response());
        }
        Err(e) => return Err(e),
    };

    let label = classified.prediction.label.as_str();
    let view = ResultView::new(
        classifier.labels(),
        classified.image_uri.clone(),
        label,
        &classified.prediction.probabilities,
        &classified.ranked,
        state.resolver.resolve_display(label),
    );
    Ok(Html(state.renderer.result(&view)?).into_response())
}

#[derive(Debug, Deserialize)]
struct ContentQuery {
    label: Option<String>,
    predicted: Option<String>,
}

async fn content_page_handler(
    State(state): State<AppState>,
    Query(query): Query<ContentQuery>,
) -> Result<Html<String>> {
    let classifier = state.classifier().await?;
    content_page(&state, classifier.labels(), query.label, query.predicted)
}

fn content_page(
    state: &AppState,
    labels: &[String],
    label: Option<String>,
    predicted: Option<String>,
) -> Result<Html<String>> {
    // Default to the predicted label when it is known, else the first label.
    let label = label
        .or_else(|| predicted.clone().filter(|p| labels.contains(p)))
        .or_else(|| labels.first().cloned())
        .unwrap_or_default();

    let content = state.resolver.resolve_display(&label);
    Ok(Html(state.renderer.content(
        labels,
        &content,
        predicted.as_deref(),
    )?))
}

#[derive(Debug, Deserialize)]
struct ContentForm {
    label: Option<String>,
    predicted: Option<String>,
    probs: Option<String>,
    image: Option<String>,
}

/// Label selector posted from the result page. Redraws the whole result view
/// for the chosen label; falls back to the content page when the carried
/// prediction does not fit the vocabulary.
async fn content_form_handler(
    State(state): State<AppState>,
    Form(form): Form<ContentForm>,
) -> Result<Html<String>> {
    let classifier = state.classifier().await?;
    let labels = classifier.labels();

    let predicted = form.predicted.filter(|p| labels.contains(p));
    let probabilities = form
        .probs
        .as_deref()
        .and_then(|probs| parse_probabilities(probs, labels.len()));

    let (predicted, probabilities) = match (predicted, probabilities) {
        (Some(predicted), Some(probabilities)) => (predicted, probabilities),
        (predicted, _) => {
            tracing::debug!("Label selector carried no usable prediction");
            return content_page(&state, labels, form.label, predicted);
        }
    };

    let label = form.label.unwrap_or_else(|| predicted.clone());
    let ranked = rank(labels, &probabilities)?;
    let image_uri = form
        .image
        .filter(|uri| uri.starts_with(image_input::DATA_URI_PREFIX))
        .unwrap_or_default();

    let view = ResultView::new(
        labels,
        image_uri,
        &predicted,
        &probabilities,
        &ranked,
        state.resolver.resolve_display(&label),
    );
    Ok(Html(state.renderer.result(&view)?))
}

/// Parses a comma-separated probability vector. `None` unless it has one
/// finite value per label.
fn parse_probabilities(text: &str, expected: usize) -> Option<Vec<f32>> {
    let probabilities = text
        .split(',')
        .map(|p| p.trim().parse::<f32>().ok().filter(|p| p.is_finite()))
        .collect::<Option<Vec<_>>>()?;
    (probabilities.len() == expected).then_some(probabilities)
}

/// Classifies a raw image body. Any decodable format is accepted.
#[tracing::instrument(skip(state, body), fields(bytes = body.len()))]
async fn classify_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ClassificationResponse>> {
    if body.is_empty() {
        return Err(AppError::BadRequest("request body is empty".to_string()));
    }

    let classifier = state.classifier().await?;
    let classified = classify_image(classifier.clone(), body, ImageSource::Camera).await?;
    let prediction = classified.prediction;

    Ok(Json(ClassificationResponse {
        id: format!("classify-{}", uuid::Uuid::new_v4().simple()),
        object: "classification".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: state.provisioner.model_name(),
        data: ClassificationData {
            content: state.resolver.resolve_display(&prediction.label),
            index: prediction.index,
            num_classes: prediction.probabilities.len(),
            probs: prediction.probabilities.iter().map(|&p| p as f64).collect(),
            label: prediction.label,
            ranked: classified.ranked,
        },
    }))
}

async fn labels_handler(State(state): State<AppState>) -> Result<Json<LabelsResponse>> {
    let classifier = state.classifier().await?;
    Ok(Json(LabelsResponse {
        object: "list".to_string(),
        data: classifier.labels().to_vec(),
    }))
}

async fn content_handler(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Json<crate::content::DisplayContent> {
    Json(state.resolver.resolve_display(&label))
}
