//! Getting the trained artifact onto local disk and into memory, exactly once.

use crate::config::{AppConfig, ArtifactConfig, ArtifactFormat, RunMode};
use crate::error::ArtifactError;
use crate::features::FeatureDeriver;
use crate::model::{LinearModel, PriceModel};
use crate::service::PredictionService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Fetch `url` into `dest`, streaming the body into a sibling `.download`
/// file. The temp file only replaces `dest` once the whole body has arrived
/// and is at least `min_bytes` long; on any failure it is removed.
pub async fn download(url: &str, dest: &Path, timeout: Duration, min_bytes: u64) -> Result<u64, ArtifactError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ArtifactError::io(parent, e))?;
    }
    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".download");
    let tmp = PathBuf::from(tmp);

    let result = fetch_to(url, &tmp, timeout).await.and_then(|size| {
        if size < min_bytes {
            Err(ArtifactError::Undersized {
                path: dest.to_path_buf(),
                size,
                min: min_bytes,
            })
        } else {
            Ok(size)
        }
    });
    let size = match result {
        Ok(size) => size,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ArtifactError::io(dest, e));
    }
    Ok(size)
}

async fn fetch_to(url: &str, tmp: &Path, timeout: Duration) -> Result<u64, ArtifactError> {
    let err = |source| ArtifactError::Download {
        url: url.to_string(),
        source,
    };

    let client = reqwest::Client::builder().timeout(timeout).build().map_err(err)?;
    let mut resp = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(err)?;

    let mut file = tokio::fs::File::create(tmp)
        .await
        .map_err(|e| ArtifactError::io(tmp, e))?;
    let mut size = 0u64;
    while let Some(chunk) = resp.chunk().await.map_err(err)? {
        file.write_all(&chunk).await.map_err(|e| ArtifactError::io(tmp, e))?;
        size += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| ArtifactError::io(tmp, e))?;
    Ok(size)
}

/// Make sure the artifact file exists and clears the size floor, downloading
/// it first when running in cloud mode with a remote URL.
pub async fn ensure_local(cfg: &ArtifactConfig) -> Result<u64, ArtifactError> {
    let size = file_size(&cfg.path).await;
    let usable = size.is_some_and(|s| s >= cfg.min_bytes);

    if !usable && cfg.mode == RunMode::Cloud {
        if let Some(url) = &cfg.remote_url {
            tracing::info!("downloading artifact from {} to {}", url, cfg.path.display());
            let n = download(url, &cfg.path, cfg.download_timeout(), cfg.min_bytes).await?;
            tracing::info!("artifact downloaded; {} bytes", n);
        }
    }

    match file_size(&cfg.path).await {
        None => Err(ArtifactError::Missing(cfg.path.clone())),
        Some(size) if size < cfg.min_bytes => Err(ArtifactError::Undersized {
            path: cfg.path.clone(),
            size,
            min: cfg.min_bytes,
        }),
        Some(size) => Ok(size),
    }
}

fn load_blocking(cfg: &ArtifactConfig) -> Result<Arc<dyn PriceModel>, ArtifactError> {
    match cfg.format {
        ArtifactFormat::Linear => Ok(Arc::new(LinearModel::load(&cfg.path)?)),
        #[cfg(feature = "torch")]
        ArtifactFormat::Torchscript => {
            let meta = cfg
                .meta_path
                .as_deref()
                .ok_or_else(|| ArtifactError::Contract("torchscript artifacts need a meta_path".into()))?;
            Ok(Arc::new(crate::model::TorchModel::new(&cfg.path, meta)?))
        }
        #[cfg(not(feature = "torch"))]
        ArtifactFormat::Torchscript => Err(ArtifactError::Backend(
            "torchscript artifacts need the `torch` feature".into(),
        )),
    }
}

pub async fn load_model(cfg: &ArtifactConfig) -> Result<Arc<dyn PriceModel>, ArtifactError> {
    let cfg = cfg.clone();
    tokio::task::spawn_blocking(move || load_blocking(&cfg))
        .await
        .map_err(|e| ArtifactError::Backend(format!("artifact loader panicked: {e}")))?
}

pub async fn build_service(cfg: &ArtifactConfig, deriver: FeatureDeriver) -> Result<PredictionService, ArtifactError> {
    let size = ensure_local(cfg).await?;
    let model = load_model(cfg).await?;
    tracing::info!(
        "loaded {:?} artifact {} ({} bytes); contract {:?}",
        cfg.format,
        cfg.path.display(),
        size,
        model.contract()
    );
    PredictionService::new(model, deriver)
}

/// Process-wide prediction service, built on first use and shared afterwards.
///
/// Concurrent first callers wait on the same initialization. The outcome,
/// success or failure, is kept: a failed load is never attempted again and
/// every later caller gets the same error.
pub struct ServiceHandle {
    artifact: ArtifactConfig,
    deriver: FeatureDeriver,
    cell: OnceCell<Result<Arc<PredictionService>, Arc<ArtifactError>>>,
}

impl ServiceHandle {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            artifact: cfg.artifact.clone(),
            deriver: cfg.deriver(),
            cell: OnceCell::new(),
        }
    }

    /// Handle around a service that is already loaded.
    pub fn ready(service: PredictionService) -> Self {
        Self {
            artifact: ArtifactConfig::default(),
            deriver: service.deriver().clone(),
            cell: OnceCell::new_with(Some(Ok(Arc::new(service)))),
        }
    }

    pub fn deriver(&self) -> &FeatureDeriver {
        &self.deriver
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    pub async fn get(&self) -> Result<Arc<PredictionService>, Arc<ArtifactError>> {
        self.cell
            .get_or_init(|| async {
                build_service(&self.artifact, self.deriver.clone())
                    .await
                    .map(Arc::new)
                    .map_err(|e| {
                        tracing::error!("artifact initialization failed: {}", e);
                        Arc::new(e)
                    })
            })
            .await
            .clone()
    }
}
