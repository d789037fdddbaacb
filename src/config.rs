use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::provision::{ModelSource, ProvisionConfig};

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Model ID from Hugging Face Hub
    #[arg(long, env = "MODEL_ID", default_value = "google/vit-base-patch16-224")]
    pub model_id: String,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Local directory the fetched model files are cached in
    #[arg(long, env = "MODEL_DIR", default_value = "model")]
    pub model_dir: PathBuf,

    /// Local model directory to load instead of fetching from the Hub
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Use PyTorch weights instead of safetensors
    #[arg(long, env = "USE_PTH")]
    pub use_pth: bool,

    /// Expected SHA-256 (hex) of the weights file
    #[arg(long, env = "MODEL_SHA256")]
    pub model_sha256: Option<String>,

    /// Labels mapping in format "0=Mercedes,1=Ferrari,2=Red Bull"
    #[arg(long, env = "ID2LABEL")]
    pub id2label: Option<String>,

    /// JSON file with curated content per label
    #[arg(long, env = "CONTENT_PATH")]
    pub content_path: Option<PathBuf>,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn parse_id2label(&self) -> Option<HashMap<u32, String>> {
        self.id2label.as_ref().map(|labels| {
            labels
                .split(',')
                .filter_map(|pair| {
                    let (id, label) = pair.split_once('=')?;
                    let id = id.trim().parse().ok()?;
                    Some((id, label.trim().to_string()))
                })
                .collect()
        })
    }

    pub fn provision_config(&self) -> ProvisionConfig {
        let source = match &self.model_path {
            Some(dir) => ModelSource::Local { dir: dir.clone() },
            None => ModelSource::Hub {
                model_id: self.model_id.clone(),
                revision: self.model_revision.clone(),
                cache_dir: self.model_dir.clone(),
            },
        };

        ProvisionConfig {
            source,
            use_pth: self.use_pth,
            weights_sha256: self.model_sha256.clone(),
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
