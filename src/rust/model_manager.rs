use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// Where to fetch a model bundle from and how to check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Directory name of the bundle inside the cache
    pub name: String,
    pub model_url: String,
    /// Lower-case hex SHA-256 of the ONNX file; unchecked when `None`
    pub model_hash: Option<String>,
    pub head_url: Option<String>,
    pub head_hash: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("Download of {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Model verification failed")]
    VerificationFailed,
    #[error("Hash mismatch: expected {expected}, got {actual} for {file_type} file")]
    HashMismatch {
        file_type: String,
        expected: String,
        actual: String,
    },
}

#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    download_lock: Arc<Mutex<()>>,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        // 1. Check environment variable
        if let Ok(path) = env::var("RICE_LEAF_CACHE") {
            return PathBuf::from(path).join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("rice-leaf").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("rice-leaf").join("models");
        }

        // 4. If all else fails, use system temp directory
        env::temp_dir().join("rice-leaf").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn get_model_path(&self, name: &str) -> PathBuf {
        self.models_dir.join(name).join("model.onnx")
    }

    pub fn get_head_path(&self, name: &str) -> PathBuf {
        self.models_dir.join(name).join("head.json")
    }

    /// True when every file the bundle declares is present on disk.
    pub fn is_model_downloaded(&self, info: &ModelInfo) -> bool {
        let model_path = self.get_model_path(&info.name);
        log::debug!("Model path: {:?} (exists: {})", model_path, model_path.exists());
        if !model_path.exists() {
            return false;
        }
        if info.head_url.is_some() {
            let head_path = self.get_head_path(&info.name);
            log::debug!("Head path: {:?} (exists: {})", head_path, head_path.exists());
            return head_path.exists();
        }
        true
    }

    pub async fn download_model(&self, info: &ModelInfo) -> Result<(), ModelError> {
        let _lock = self.download_lock.lock().await;

        let model_dir = self.models_dir.join(&info.name);
        log::info!("Creating model directory at {:?}", model_dir);
        fs::create_dir_all(&model_dir)?;

        let model_path = self.get_model_path(&info.name);
        let model_result = self
            .fetch_if_needed(&info.model_url, &model_path, info.model_hash.as_deref(), "model")
            .await;

        let head_result = match &info.head_url {
            Some(url) => {
                let head_path = self.get_head_path(&info.name);
                self.fetch_if_needed(url, &head_path, info.head_hash.as_deref(), "head").await
            }
            None => Ok(()),
        };

        match (model_result, head_result) {
            (Ok(()), Ok(())) => {
                log::info!("Model bundle '{}' ready to use", info.name);
                Ok(())
            }
            (Err(e), _) => {
                log::error!("Failed to setup model file: {}", e);
                // Cleanup on failure
                let _ = self.remove_download(&info.name);
                Err(e)
            }
            (_, Err(e)) => {
                log::error!("Failed to setup head file: {}", e);
                let _ = self.remove_download(&info.name);
                Err(e)
            }
        }
    }

    async fn fetch_if_needed(
        &self,
        url: &str,
        path: &Path,
        expected_hash: Option<&str>,
        file_type: &str,
    ) -> Result<(), ModelError> {
        if path.exists() {
            match expected_hash {
                Some(hash) if !self.verify_file(path, hash)? => {
                    log::warn!("{} file verification failed, redownloading", file_type);
                }
                _ => {
                    log::info!("Existing {} file at {:?} is usable", file_type, path);
                    return Ok(());
                }
            }
        }
        self.download_and_verify_file(url, path, expected_hash, file_type).await
    }

    fn verify_file(&self, path: &Path, expected_hash: &str) -> Result<bool, ModelError> {
        let bytes = fs::read(path)?;
        let hash = sha256_hex(&bytes);
        log::debug!("Verifying {:?}: {} bytes, hash {} (expected {})", path, bytes.len(), hash, expected_hash);
        Ok(hash.eq_ignore_ascii_case(expected_hash))
    }

    /// Checks the bundle's files against their declared hashes. Files without a declared
    /// hash only need to exist.
    pub fn verify_model(&self, info: &ModelInfo) -> Result<bool, ModelError> {
        if !self.is_model_downloaded(info) {
            log::info!("Model bundle '{}' is not complete on disk", info.name);
            return Ok(false);
        }

        let model_ok = match &info.model_hash {
            Some(hash) => self.verify_file(&self.get_model_path(&info.name), hash)?,
            None => true,
        };
        let head_ok = match (&info.head_url, &info.head_hash) {
            (Some(_), Some(hash)) => self.verify_file(&self.get_head_path(&info.name), hash)?,
            _ => true,
        };

        log::info!("Verification of '{}': model {}, head {}", info.name, model_ok, head_ok);
        Ok(model_ok && head_ok)
    }

    async fn download_and_verify_file(
        &self,
        url: &str,
        path: &Path,
        expected_hash: Option<&str>,
        file_type: &str,
    ) -> Result<(), ModelError> {
        log::info!("Downloading {} file from {} to {:?}", file_type, url, path);
        let response = reqwest::get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::HttpStatus { url: url.to_string(), status: status.as_u16() });
        }
        let bytes = response.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());

        if let Some(expected) = expected_hash {
            let hash = sha256_hex(&bytes);
            if !hash.eq_ignore_ascii_case(expected) {
                log::error!("{} hash mismatch: expected {}, got {}", file_type, expected, hash);
                return Err(ModelError::HashMismatch {
                    file_type: file_type.to_string(),
                    expected: expected.to_string(),
                    actual: hash,
                });
            }
        } else {
            log::warn!("No hash configured for {} file, skipping verification", file_type);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes)?;

        if let Some(expected) = expected_hash {
            if !self.verify_file(path, expected)? {
                return Err(ModelError::VerificationFailed);
            }
        }

        log::info!("{} file downloaded successfully", file_type);
        Ok(())
    }

    pub fn remove_download(&self, name: &str) -> Result<(), ModelError> {
        let model_path = self.get_model_path(name);
        let head_path = self.get_head_path(name);

        if model_path.exists() {
            fs::remove_file(&model_path)?;
        }
        if head_path.exists() {
            fs::remove_file(&head_path)?;
        }
        Ok(())
    }

    /// Ensures that a model bundle is downloaded and verified.
    /// If the bundle doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_model_downloaded(&self, info: &ModelInfo) -> Result<(), ModelError> {
        log::info!("Checking if model '{}' is downloaded...", info.name);
        if !self.is_model_downloaded(info) {
            log::info!("Model not found, downloading...");
            self.download_model(info).await?;
        } else if !self.verify_model(info)? {
            log::info!("Model verification failed, re-downloading...");
            self.remove_download(&info.name)?;
            self.download_model(info).await?;
        } else {
            log::info!("Model verification successful");
        }

        if !self.is_model_downloaded(info) {
            return Err(ModelError::NotDownloaded(info.name.clone()));
        }
        Ok(())
    }
}
