use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Files a base encoder must provide.
const REQUIRED_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

/// Tokenizer companions copied into the bundle when the base model has them.
const OPTIONAL_FILES: [&str; 4] = [
    "tokenizer_config.json",
    "special_tokens_map.json",
    "sentencepiece.bpe.model",
    "vocab.txt",
];

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model file missing: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Verification failed for {0}")]
    VerificationFailed(String),
}

/// Paths of a base encoder on local disk.
#[derive(Debug, Clone)]
pub struct BaseModelFiles {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
    /// Optional tokenizer files present next to `tokenizer.json`
    pub extras: Vec<PathBuf>,
}

impl BaseModelFiles {
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ModelError> {
        let dir = dir.as_ref().to_path_buf();
        for name in REQUIRED_FILES {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(ModelError::NotDownloaded(path.display().to_string()));
            }
        }
        let extras = OPTIONAL_FILES
            .iter()
            .map(|name| dir.join(name))
            .filter(|path| path.is_file())
            .collect();
        Ok(Self {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
            extras,
            dir,
        })
    }
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn sidecar_path(path: &Path) -> PathBuf {
    with_suffix(path, ".sha256")
}

/// Resolves base encoders from a local directory or the Hugging Face hub,
/// keeping downloads in a verified on-disk cache.
#[derive(Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    endpoint: String,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a ModelManager with the default cache directory and endpoint
    pub fn new_default() -> io::Result<Self> {
        let endpoint = env::var("VI_INTENT_HF_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self::new(Self::get_default_models_dir(), endpoint)
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        if let Ok(path) = env::var("VI_INTENT_CACHE") {
            return PathBuf::from(path).join("models");
        }
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("vi_intent").join("models");
        }
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("vi_intent").join("models");
        }
        env::temp_dir().join("vi_intent").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P, endpoint: impl Into<String>) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_model_dir(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(model_id.replace('/', "--"))
    }

    fn file_url(&self, model_id: &str, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.endpoint, model_id, file)
    }

    /// A local directory is used as is; anything else is treated as a hub
    /// model id and downloaded on first use.
    pub async fn resolve(&self, model: &str) -> Result<BaseModelFiles, ModelError> {
        let local = Path::new(model);
        if local.is_dir() {
            log::info!("Using local base model at {}", local.display());
            return BaseModelFiles::from_dir(local);
        }
        self.ensure_model_downloaded(model).await
    }

    /// True when the cached file matches its recorded hash.
    pub fn verify_file(&self, path: &Path) -> Result<bool, ModelError> {
        let sidecar = sidecar_path(path);
        if !path.exists() || !sidecar.exists() {
            return Ok(false);
        }
        let expected = fs::read_to_string(&sidecar)?;
        let actual = sha256_file(path)?;
        log::debug!("Verifying {:?}: expected {}, got {}", path, expected.trim(), actual);
        Ok(actual == expected.trim())
    }

    pub fn is_model_downloaded(&self, model_id: &str) -> bool {
        let dir = self.get_model_dir(model_id);
        REQUIRED_FILES.iter().all(|name| dir.join(name).exists())
    }

    /// Downloads (or re-verifies) every file of `model_id` into the cache.
    pub async fn ensure_model_downloaded(&self, model_id: &str) -> Result<BaseModelFiles, ModelError> {
        let _lock = self.download_lock.lock().await;
        let dir = self.get_model_dir(model_id);
        fs::create_dir_all(&dir)?;
        log::debug!("Model cache directory {:?}", dir);

        for name in REQUIRED_FILES {
            self.fetch_file(model_id, name, &dir, true).await?;
        }
        for name in OPTIONAL_FILES {
            self.fetch_file(model_id, name, &dir, false).await?;
        }
        BaseModelFiles::from_dir(&dir)
    }

    async fn fetch_file(&self, model_id: &str, name: &str, dir: &Path, required: bool) -> Result<(), ModelError> {
        let path = dir.join(name);
        if path.exists() {
            if self.verify_file(&path)? {
                log::debug!("{} verified from cache", name);
                return Ok(());
            }
            log::warn!("Cached {} failed verification, redownloading", name);
        }

        let url = self.file_url(model_id, name);
        log::info!("Downloading {}", url);
        let response = reqwest::get(&url).await?;
        if response.status() == StatusCode::NOT_FOUND && !required {
            log::debug!("{} not provided by {}", name, model_id);
            return Ok(());
        }
        let mut response = response.error_for_status()?;
        let expected_len = response.content_length();

        // The sidecar hash is taken from the bytes as they arrive.
        let partial = with_suffix(&path, ".part");
        let mut file = File::create(&partial)?;
        let mut hasher = Sha256::new();
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        file.flush()?;
        drop(file);

        if let Some(expected) = expected_len {
            if written != expected {
                fs::remove_file(&partial)?;
                return Err(ModelError::VerificationFailed(format!(
                    "{}: expected {} bytes, received {}",
                    path.display(),
                    expected,
                    written
                )));
            }
        }
        log::info!("Downloaded {} bytes for {}", written, name);

        self.remove_file(&path)?;
        fs::rename(&partial, &path)?;
        fs::write(sidecar_path(&path), format!("{:x}", hasher.finalize()))?;
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ModelError> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        let sidecar = sidecar_path(path);
        if sidecar.exists() {
            fs::remove_file(sidecar)?;
        }
        Ok(())
    }

    pub fn remove_download(&self, model_id: &str) -> Result<(), ModelError> {
        let dir = self.get_model_dir(model_id);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Answers exactly one HTTP request with `body`, then stops listening.
    async fn serve_once(body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn write_base_model(dir: &Path) {
        for name in REQUIRED_FILES {
            fs::write(dir.join(name), b"{}").unwrap();
        }
        fs::write(dir.join("sentencepiece.bpe.model"), b"spm").unwrap();
    }

    #[test]
    fn test_base_model_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BaseModelFiles::from_dir(dir.path()),
            Err(ModelError::NotDownloaded(_))
        ));

        write_base_model(dir.path());
        let files = BaseModelFiles::from_dir(dir.path()).unwrap();
        assert!(files.weights.ends_with("model.safetensors"));
        assert_eq!(files.extras.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_local_dir() -> Result<(), ModelError> {
        let cache = tempfile::tempdir()?;
        let local = tempfile::tempdir()?;
        write_base_model(local.path());

        let manager = ModelManager::new(cache.path(), DEFAULT_ENDPOINT)?;
        let files = manager.resolve(local.path().to_str().unwrap_or_default()).await?;
        assert_eq!(files.dir, local.path());
        Ok(())
    }

    #[tokio::test]
    async fn test_download_records_streamed_hash() -> Result<(), ModelError> {
        let body: &'static [u8] = b"{\"model_type\":\"xlm-roberta\"}";
        let endpoint = serve_once(body).await;
        let cache = tempfile::tempdir()?;
        let manager = ModelManager::new(cache.path(), endpoint)?;
        let dir = manager.get_model_dir("org/tiny");
        fs::create_dir_all(&dir)?;

        manager.fetch_file("org/tiny", "config.json", &dir, true).await?;
        let path = dir.join("config.json");
        assert_eq!(fs::read(&path)?, body);
        assert_eq!(fs::read_to_string(sidecar_path(&path))?, sha256_hex(body));
        assert!(!with_suffix(&path, ".part").exists());

        // nothing listens any more, so this has to come from the cache
        manager.fetch_file("org/tiny", "config.json", &dir, true).await?;
        assert!(manager.verify_file(&path)?);
        Ok(())
    }

    #[test]
    fn test_sidecar_verification() {
        let cache = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(cache.path(), DEFAULT_ENDPOINT).unwrap();
        let path = cache.path().join("config.json");
        fs::write(&path, b"{\"model_type\":\"bert\"}").unwrap();
        assert!(!manager.verify_file(&path).unwrap());

        fs::write(sidecar_path(&path), sha256_hex(b"{\"model_type\":\"bert\"}")).unwrap();
        assert!(manager.verify_file(&path).unwrap());

        fs::write(&path, b"tampered").unwrap();
        assert!(!manager.verify_file(&path).unwrap());
    }

    #[test]
    fn test_cache_layout() {
        let cache = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(cache.path(), "https://mirror.example/").unwrap();
        assert!(manager
            .get_model_dir("FacebookAI/xlm-roberta-large")
            .ends_with("FacebookAI--xlm-roberta-large"));
        assert_eq!(
            manager.file_url("bert-base-multilingual-cased", "config.json"),
            "https://mirror.example/bert-base-multilingual-cased/resolve/main/config.json"
        );
        assert!(!manager.is_model_downloaded("bert-base-multilingual-cased"));
    }

    #[test]
    fn test_default_models_dir() {
        env::set_var("VI_INTENT_CACHE", "/tmp/test-cache");
        let path = ModelManager::get_default_models_dir();
        assert!(path.to_str().unwrap().contains("/tmp/test-cache/models"));
        env::remove_var("VI_INTENT_CACHE");

        let path = ModelManager::get_default_models_dir();
        assert!(path.to_str().unwrap().contains("vi_intent/models"));
    }
}
