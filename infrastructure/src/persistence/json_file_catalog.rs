// ./infrastructure/src/persistence/json_file_catalog.rs
use application::{ApplicationError, CatalogRepository};
use async_trait::async_trait;
use domain::Item;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, instrument};

/// Whole-document catalog persistence over a single JSON file.
///
/// The file holds the entire record collection as one indented JSON
/// array; every save rewrites it completely. A file that does not exist
/// yet reads back as an empty collection.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl CatalogRepository for JsonFileCatalog {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Vec<Item>, ApplicationError> {
        match fs::read(&self.path).await {
            Ok(bytes) => {
                let items: Vec<Item> = serde_json::from_slice(&bytes).map_err(|e| {
                    ApplicationError::Persistence(format!(
                        "malformed catalog document at {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                debug!(count = items.len(), "Catalog document loaded");
                Ok(items)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No catalog document yet, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(ApplicationError::Persistence(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    #[instrument(skip(self, items))]
    async fn save(&self, items: &[Item]) -> Result<(), ApplicationError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    ApplicationError::Persistence(format!(
                        "failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        // Indented so the document stays readable by hand.
        let body = serde_json::to_vec_pretty(items).map_err(|e| {
            ApplicationError::Persistence(format!("failed to serialize catalog: {e}"))
        })?;
        fs::write(&self.path, body).await.map_err(|e| {
            ApplicationError::Persistence(format!(
                "failed to write {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(count = items.len(), "Catalog document written");
        Ok(())
    }
}
