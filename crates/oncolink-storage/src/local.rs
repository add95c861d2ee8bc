use crate::keys::is_valid_key;
use crate::traits::{Storage, StorageError, StorageResult};
use crate::{ByteReader, StorageBackend};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

const OVERWRITE_BLOCK: usize = 64 * 1024;
const OVERWRITE_PATTERNS: [u8; 3] = [0x00, 0xFF, 0xAA];

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    secure_delete_passes: u32,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/oncolink/uploads")
    /// * `secure_delete_passes` - Overwrite passes performed before a file is unlinked
    pub async fn new(base_path: impl Into<PathBuf>, secure_delete_passes: u32) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            secure_delete_passes,
        })
    }

    /// Convert storage key to filesystem path with security validation
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if !is_valid_key(storage_key) {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(storage_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Overwrite the file contents in place, flushing each pass to disk.
    async fn overwrite(&self, path: &Path) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new().write(true).open(path).await?;
        let len = file.metadata().await?.len();

        for pass in 0..self.secure_delete_passes {
            let pattern = OVERWRITE_PATTERNS[pass as usize % OVERWRITE_PATTERNS.len()];
            let block = vec![pattern; OVERWRITE_BLOCK];
            file.seek(SeekFrom::Start(0)).await?;

            let mut remaining = len;
            while remaining > 0 {
                let n = remaining.min(OVERWRITE_BLOCK as u64) as usize;
                file.write_all(&block[..n]).await?;
                remaining -= n as u64;
            }
            file.flush().await?;
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save(
        &self,
        key: &str,
        _content_type: &str,
        mut reader: ByteReader,
    ) -> StorageResult<String> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let written = async {
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(bytes)
        }
        .await;

        let bytes_copied = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path).await {
                    tracing::warn!(
                        error = %cleanup,
                        key = %key,
                        "Failed to remove partial upload"
                    );
                }
                // Keep the reader's own error kind so callers can tell a rejected stream
                // from a failing disk.
                return Err(StorageError::IoError(e));
            }
        };

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream upload successful"
        );

        Ok(key.to_string())
    }

    async fn get(&self, path: &str) -> StorageResult<ByteReader> {
        let file_path = self.key_to_path(path)?;

        let file = match fs::File::open(&file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    file_path.display(),
                    e
                )));
            }
        };

        tracing::debug!(key = %path, "Local storage stream download opened");
        Ok(Box::pin(file))
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let file_path = self.key_to_path(path)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&file_path).await.unwrap_or(false) {
            return Ok(());
        }

        if self.secure_delete_passes > 0 {
            self.overwrite(&file_path).await.map_err(|e| {
                StorageError::DeleteFailed(format!(
                    "Failed to overwrite file {}: {}",
                    file_path.display(),
                    e
                ))
            })?;
        }

        match fs::remove_file(&file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    file_path.display(),
                    e
                )));
            }
        }

        tracing::info!(
            key = %path,
            passes = self.secure_delete_passes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage secure delete successful"
        );

        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let file_path = self.key_to_path(path)?;
        Ok(fs::try_exists(&file_path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
