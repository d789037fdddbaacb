//! Model provisioning: make sure the checkpoint is on local disk, then build
//! the inference handle from it exactly once per process.

use async_trait::async_trait;
use hf_hub::{Repo, RepoType, api::tokio::Api};
use metrics::counter;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::classifier::Classifier;
use crate::error::{AppError, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const PTH_FILE: &str = "pytorch_model.bin";

const PART_SUFFIX: &str = ".part";

/// Local files making up a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
    pub use_pth: bool,
}

impl ModelFiles {
    pub fn in_dir(dir: &Path, use_pth: bool) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            weights: dir.join(weights_file_name(use_pth)),
            use_pth,
        }
    }

    fn exist(&self) -> bool {
        self.config.is_file() && self.weights.is_file()
    }
}

fn weights_file_name(use_pth: bool) -> &'static str {
    if use_pth { PTH_FILE } else { SAFETENSORS_FILE }
}

#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Fetch from the Hugging Face Hub into `cache_dir` unless already there.
    Hub {
        model_id: String,
        revision: String,
        cache_dir: PathBuf,
    },
    /// Use a directory that already holds the checkpoint. Never fetches.
    Local { dir: PathBuf },
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub source: ModelSource,
    pub use_pth: bool,
    /// Expected hex SHA-256 of the weights file.
    pub weights_sha256: Option<String>,
}

/// Retrieves a single file of a remote checkpoint.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Returns a local path holding the fetched file. The provisioner copies it
    /// into its own cache directory, so the path may point into a shared cache.
    async fn fetch(&self, model_id: &str, revision: &str, filename: &str) -> Result<PathBuf>;
}

pub struct HfHubFetcher {
    api: Api,
}

impl HfHubFetcher {
    pub fn new() -> Result<Self> {
        let api = Api::new().map_err(|e| AppError::download("huggingface.co", e))?;
        Ok(Self { api })
    }
}

#[async_trait]
impl ArtifactFetcher for HfHubFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, model_id: &str, revision: &str, filename: &str) -> Result<PathBuf> {
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        self.api
            .repo(repo)
            .get(filename)
            .await
            .map_err(|e| AppError::download(model_id, e))
    }
}

/// Makes sure the checkpoint files exist locally, fetching them if needed.
///
/// Files already present are reused without contacting the remote. When a
/// weights digest is configured, a cached copy that does not match is fetched
/// again; a fetched copy that does not match is a download error.
#[tracing::instrument(skip(config, fetcher))]
pub async fn ensure_model_files(
    config: &ProvisionConfig,
    fetcher: &dyn ArtifactFetcher,
) -> Result<ModelFiles> {
    let (model_id, revision, cache_dir) = match &config.source {
        ModelSource::Local { dir } => {
            if !dir.is_dir() {
                return Err(AppError::ModelLoad(format!(
                    "Model path {} is not a directory.",
                    dir.display()
                )));
            }
            let files = ModelFiles::in_dir(dir, config.use_pth);
            if !files.exist() {
                return Err(AppError::ModelLoad(format!(
                    "Model path {} is missing {} or {}",
                    dir.display(),
                    CONFIG_FILE,
                    weights_file_name(config.use_pth)
                )));
            }
            return Ok(files);
        }
        ModelSource::Hub {
            model_id,
            revision,
            cache_dir,
        } => (model_id, revision, cache_dir),
    };

    let files = ModelFiles::in_dir(cache_dir, config.use_pth);
    if files.exist() {
        match &config.weights_sha256 {
            None => {
                tracing::debug!(dir = %cache_dir.display(), "Using cached model files");
                return Ok(files);
            }
            Some(expected) if sha256_matches(&files.weights, expected).await? => {
                tracing::debug!(dir = %cache_dir.display(), "Using verified cached model files");
                return Ok(files);
            }
            Some(_) => {
                tracing::warn!(
                    weights = %files.weights.display(),
                    "Cached weights fail checksum verification, fetching again"
                );
            }
        }
    }

    tracing::info!(model_id = %model_id, revision = %revision, "Fetching model files");
    tokio::fs::create_dir_all(cache_dir)
        .await
        .map_err(|e| AppError::io(cache_dir, e))?;

    for (filename, dest) in [
        (CONFIG_FILE, &files.config),
        (weights_file_name(config.use_pth), &files.weights),
    ] {
        let fetched = fetcher.fetch(model_id, revision, filename).await?;
        install(&fetched, dest)
            .await
            .map_err(|e| AppError::download(model_id.as_str(), e))?;
    }
    counter!("model_fetches_total").increment(1);

    if let Some(expected) = &config.weights_sha256 {
        if !sha256_matches(&files.weights, expected).await? {
            return Err(AppError::download(
                model_id.as_str(),
                format!("{} does not match the expected SHA-256", files.weights.display()),
            ));
        }
    }

    tracing::info!(dir = %cache_dir.display(), "Model files ready");
    Ok(files)
}

/// Copies `src` to `dest` through a `.part` file so an interrupted copy never
/// shows up under the final name.
async fn install(src: &Path, dest: &Path) -> Result<()> {
    let mut part = dest.as_os_str().to_owned();
    part.push(PART_SUFFIX);
    let part = PathBuf::from(part);

    if let Err(e) = tokio::fs::copy(src, &part).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(AppError::io(&part, e));
    }
    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| AppError::io(dest, e))
}

async fn sha256_matches(path: &Path, expected: &str) -> Result<bool> {
    let path = path.to_path_buf();
    let expected = expected.trim().to_string();
    tokio::task::spawn_blocking(move || -> Result<bool> {
        let mut file = std::fs::File::open(&path).map_err(|e| AppError::io(&path, e))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher).map_err(|e| AppError::io(&path, e))?;
        let actual = hex::encode(hasher.finalize());
        Ok(actual.eq_ignore_ascii_case(&expected))
    })
    .await?
}

pub type ClassifierLoader =
    Arc<dyn Fn(&ModelFiles) -> Result<Arc<dyn Classifier>> + Send + Sync>;

/// Process-wide inference handle, provisioned on first use.
///
/// Concurrent first callers wait on a single fetch-and-load; every later call
/// returns the same handle without touching the filesystem. A failed attempt
/// leaves the cell empty.
pub struct ModelProvisioner {
    config: ProvisionConfig,
    fetcher: Arc<dyn ArtifactFetcher>,
    loader: ClassifierLoader,
    handle: OnceCell<Arc<dyn Classifier>>,
}

impl ModelProvisioner {
    pub fn new(
        config: ProvisionConfig,
        fetcher: Arc<dyn ArtifactFetcher>,
        loader: ClassifierLoader,
    ) -> Self {
        Self {
            config,
            fetcher,
            loader,
            handle: OnceCell::new(),
        }
    }

    pub async fn handle(&self) -> Result<Arc<dyn Classifier>> {
        self.handle
            .get_or_try_init(|| async {
                let files = ensure_model_files(&self.config, self.fetcher.as_ref()).await?;
                let loader = self.loader.clone();
                tokio::task::spawn_blocking(move || loader(&files)).await?
            })
            .await
            .cloned()
    }

    pub fn model_name(&self) -> String {
        match &self.config.source {
            ModelSource::Hub { model_id, .. } => model_id.clone(),
            ModelSource::Local { dir } => dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::FixedClassifier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Serves files out of a fake remote directory and counts calls.
    struct CountingFetcher {
        remote: TempDir,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingFetcher {
        fn new() -> Self {
            let remote = TempDir::new().unwrap();
            std::fs::write(remote.path().join(CONFIG_FILE), br#"{"id2label": {"0": "a"}}"#)
                .unwrap();
            std::fs::write(remote.path().join(SAFETENSORS_FILE), b"weights").unwrap();
            std::fs::write(remote.path().join(PTH_FILE), b"pickled weights").unwrap();
            Self {
                remote,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ArtifactFetcher for CountingFetcher {
        async fn fetch(&self, model_id: &str, _revision: &str, filename: &str) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(AppError::download(model_id, "connection reset"));
            }
            Ok(self.remote.path().join(filename))
        }
    }

    fn hub_config(cache_dir: &Path) -> ProvisionConfig {
        ProvisionConfig {
            source: ModelSource::Hub {
                model_id: "acme/cars".to_string(),
                revision: "main".to_string(),
                cache_dir: cache_dir.to_path_buf(),
            },
            use_pth: false,
            weights_sha256: None,
        }
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn counting_loader(loads: Arc<AtomicUsize>) -> ClassifierLoader {
        Arc::new(move |_files: &ModelFiles| -> Result<Arc<dyn Classifier>> {
            loads.fetch_add(1, Ordering::SeqCst);
            let classifier: Arc<dyn Classifier> =
                Arc::new(FixedClassifier::new(&["a", "b"], &[0.3, 0.7]));
            Ok(classifier)
        })
    }

    #[tokio::test]
    async fn test_fetches_when_absent_then_reuses() {
        let cache = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new();
        let config = hub_config(&cache.path().join("model"));

        let files = ensure_model_files(&config, &fetcher).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(std::fs::read(&files.weights).unwrap(), b"weights");
        assert!(files.config.is_file());
        assert!(!files.weights.with_extension("safetensors.part").exists());

        let again = ensure_model_files(&config, &fetcher).await.unwrap();
        assert_eq!(again, files);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_pth_weights_file() {
        let cache = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new();
        let config = ProvisionConfig {
            use_pth: true,
            ..hub_config(cache.path())
        };

        let files = ensure_model_files(&config, &fetcher).await.unwrap();
        assert!(files.use_pth);
        assert!(files.weights.ends_with(PTH_FILE));
        assert_eq!(std::fs::read(&files.weights).unwrap(), b"pickled weights");
    }

    #[tokio::test]
    async fn test_download_failure_leaves_nothing_behind() {
        let cache = TempDir::new().unwrap();
        let fetcher = CountingFetcher::failing();
        let config = hub_config(cache.path());

        let err = ensure_model_files(&config, &fetcher).await.unwrap_err();
        assert!(matches!(err, AppError::Download { .. }));
        assert!(!ModelFiles::in_dir(cache.path(), false).exist());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_after_fetch_is_download_error() {
        let cache = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new();
        let config = ProvisionConfig {
            weights_sha256: Some(sha256_hex(b"something else")),
            ..hub_config(cache.path())
        };

        let err = ensure_model_files(&config, &fetcher).await.unwrap_err();
        assert!(matches!(err, AppError::Download { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_cached_weights_are_fetched_again() {
        let cache = TempDir::new().unwrap();
        std::fs::write(cache.path().join(CONFIG_FILE), b"{}").unwrap();
        std::fs::write(cache.path().join(SAFETENSORS_FILE), b"truncat").unwrap();

        let fetcher = CountingFetcher::new();
        let config = ProvisionConfig {
            weights_sha256: Some(sha256_hex(b"weights").to_uppercase()),
            ..hub_config(cache.path())
        };

        let files = ensure_model_files(&config, &fetcher).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(std::fs::read(&files.weights).unwrap(), b"weights");

        ensure_model_files(&config, &fetcher).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_local_source_never_fetches() {
        let dir = TempDir::new().unwrap();
        let fetcher = CountingFetcher::new();
        let config = ProvisionConfig {
            source: ModelSource::Local {
                dir: dir.path().to_path_buf(),
            },
            use_pth: false,
            weights_sha256: None,
        };

        let err = ensure_model_files(&config, &fetcher).await.unwrap_err();
        assert!(matches!(err, AppError::ModelLoad(_)));

        std::fs::write(dir.path().join(CONFIG_FILE), b"{}").unwrap();
        std::fs::write(dir.path().join(SAFETENSORS_FILE), b"w").unwrap();
        ensure_model_files(&config, &fetcher).await.unwrap();
        assert_eq!(fetcher.calls(), 0);

        let missing = ProvisionConfig {
            source: ModelSource::Local {
                dir: dir.path().join("nope"),
            },
            ..config
        };
        assert!(ensure_model_files(&missing, &fetcher).await.is_err());
    }

    #[tokio::test]
    async fn test_handle_is_provisioned_once() {
        let cache = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let provisioner = ModelProvisioner::new(
            hub_config(cache.path()),
            fetcher.clone(),
            counting_loader(loads.clone()),
        );

        let first = provisioner.handle().await.unwrap();
        let second = provisioner.handle().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let bitmap = crate::image_input::Bitmap::new(1, 1);
        assert_eq!(
            first.predict(&bitmap).unwrap(),
            second.predict(&bitmap).unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_fetches_once() {
        let cache = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let provisioner = Arc::new(ModelProvisioner::new(
            hub_config(cache.path()),
            fetcher.clone(),
            counting_loader(loads.clone()),
        ));

        let tasks = (0..8).map(|_| {
            let provisioner = provisioner.clone();
            tokio::spawn(async move { provisioner.handle().await })
        });
        let handles: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_provisioning_is_reported() {
        let cache = TempDir::new().unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let provisioner = ModelProvisioner::new(
            hub_config(cache.path()),
            Arc::new(CountingFetcher::failing()),
            counting_loader(loads.clone()),
        );

        assert!(matches!(
            provisioner.handle().await,
            Err(AppError::Download { .. })
        ));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }
}
