mod classifier;
mod config;
mod content;
mod error;
mod image_input;
mod provision;
mod ranking;
mod render;
mod server;
mod types;
mod video;
mod vit_classifier;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;

use classifier::Classifier;
use config::Config;
use content::{ContentResolver, ContentTable};
use provision::{ClassifierLoader, HfHubFetcher, ModelFiles, ModelProvisioner};
use render::Renderer;
use server::AppState;
use vit_classifier::VitClassifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,label_lens=debug".into()),
        )
        .init();

    let config = Config::parse();
    tracing::info!("Starting image classification server with config: {:?}", config);

    let id2label = config.parse_id2label();
    let loader: ClassifierLoader =
        Arc::new(move |files: &ModelFiles| -> error::Result<Arc<dyn Classifier>> {
            let classifier: Arc<dyn Classifier> =
                Arc::new(VitClassifier::load(files, id2label.clone())?);
            Ok(classifier)
        });
    let provisioner = Arc::new(ModelProvisioner::new(
        config.provision_config(),
        Arc::new(HfHubFetcher::new()?),
        loader,
    ));

    tracing::info!("Loading model...");
    let classifier = provisioner.handle().await?;
    tracing::info!(labels = ?classifier.labels(), "Model loaded successfully");

    let table = match &config.content_path {
        Some(path) => ContentTable::load(path)?.bind_vocabulary(classifier.labels()),
        None => ContentTable::default(),
    };
    if table.is_empty() {
        tracing::warn!("Content table is empty, every label will show the no-content notice");
    } else {
        tracing::info!(labels = table.len(), "Content table ready");
    }
    let state = AppState::new(provisioner, ContentResolver::new(table), Renderer::new()?);

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = server::router(state, config.max_upload_bytes)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer);

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}
