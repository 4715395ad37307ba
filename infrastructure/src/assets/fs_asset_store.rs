// ./infrastructure/src/assets/fs_asset_store.rs
use application::{ApplicationError, AssetStore};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, instrument};

/// Uploaded-image storage under one configured directory.
///
/// Every incoming filename is sanitized to a bare basename before any
/// filesystem access, so a stored or fetched asset can never escape the
/// root directory. Storing under an existing name silently overwrites.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    /// Creates the asset directory if needed and returns the store.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ApplicationError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            ApplicationError::AssetStorage(format!(
                "failed to create asset directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

/// Reduces a client-supplied filename to a safe basename: directory
/// components are dropped, and anything outside `[A-Za-z0-9._-]` becomes
/// an underscore. Returns `None` when nothing usable remains.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // A name of only dots (".", "..") or nothing at all is unusable.
    if cleaned.trim_matches('.').is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    #[instrument(skip(self, bytes))]
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<String, ApplicationError> {
        let name = sanitize_filename(filename).ok_or_else(|| {
            ApplicationError::InvalidInput(format!("unusable image filename: '{filename}'"))
        })?;
        let path = self.root.join(&name);
        fs::write(&path, bytes).await.map_err(|e| {
            ApplicationError::AssetStorage(format!("failed to write {}: {}", path.display(), e))
        })?;
        debug!(stored = %name, size = bytes.len(), "Asset written");
        Ok(name)
    }

    #[instrument(skip(self))]
    async fn fetch(&self, filename: &str) -> Result<Option<Vec<u8>>, ApplicationError> {
        let Some(name) = sanitize_filename(filename) else {
            return Ok(None);
        };
        match fs::read(self.root.join(&name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ApplicationError::AssetStorage(format!(
                "failed to read asset '{name}': {e}"
            ))),
        }
    }
}
