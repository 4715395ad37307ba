use async_trait::async_trait;
use domain::{DomainError, Item, SortOption};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Item not found: {0}")]
    NotFound(u64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Persistence failure: {0}")]
    Persistence(String),
    #[error("Asset storage failure: {0}")]
    AssetStorage(String),
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError), // Propagate domain errors cleanly
}

// --- Infrastructure Interfaces (Traits) ---

/// Interface for the durable whole-document catalog store.
///
/// The persisted document is the entire record collection; `save` replaces
/// it, `load` reads it back. There is no partial update.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Returns the persisted collection. A document that does not exist
    /// yet is an empty collection, not an error.
    async fn load(&self) -> Result<Vec<Item>, ApplicationError>;
    /// Replaces the persisted document with the given collection.
    async fn save(&self, items: &[Item]) -> Result<(), ApplicationError>;
}

/// Interface for storing and retrieving uploaded image assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Writes the asset and returns the filename it was stored under
    /// (which may differ from the input after sanitization).
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<String, ApplicationError>;
    /// Reads an asset back by stored filename. Unknown names are `None`.
    async fn fetch(&self, filename: &str) -> Result<Option<Vec<u8>>, ApplicationError>;
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

#[derive(Deserialize, Debug)]
pub struct SearchRequest {
    #[serde(default)]
    pub search_term: String,
    /// Absent means the endpoint's default ordering (name A-Z).
    #[serde(default)]
    pub sort_option: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct PriceQueryRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Deserialize, Debug)]
pub struct SortRequest {
    /// Absent means "leave the current order unchanged".
    #[serde(default)]
    pub sort: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct PriceTotalResponse {
    pub total: f64,
}

#[derive(Serialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

/// Field values for a record about to be created. The id and image path
/// are assigned by the service.
#[derive(Debug)]
pub struct ItemDraft {
    pub name: String,
    pub description: String,
    pub age: f64,
    pub price: f64,
}

/// Partial field replacement for an update. `None` keeps the previous
/// value.
#[derive(Debug, Default)]
pub struct ItemChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub age: Option<f64>,
    pub price: Option<f64>,
}

/// An uploaded image file as received from the transport layer.
#[derive(Debug)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

// --- Catalog Service (Use Cases) ---

/// The authoritative in-process collection plus the id counter derived
/// from it. Guarded as one unit so id assignment and collection mutation
/// cannot be observed separately.
struct CatalogState {
    items: Vec<Item>,
    next_id: u64,
}

/// Owns the process-lifetime record collection and applies every
/// mutation and query against it. Persistence is durability only: each
/// mutation writes the full collection back out through the repository,
/// and queries never re-read the document.
///
/// All operations go through one `RwLock`; a mutation holds the write
/// guard across its whole read-modify-persist span, so concurrent
/// requests cannot interleave id assignment or document writes.
pub struct CatalogService {
    repository: Arc<dyn CatalogRepository>,
    assets: Arc<dyn AssetStore>,
    state: RwLock<CatalogState>,
}

impl CatalogService {
    /// Loads the persisted collection once and derives the next record id
    /// from it. Ids stay monotonic for the process lifetime; a restart
    /// re-derives the counter from the highest persisted id.
    pub async fn open(
        repository: Arc<dyn CatalogRepository>,
        assets: Arc<dyn AssetStore>,
    ) -> Result<Self, ApplicationError> {
        let items = repository.load().await?;
        let next_id = items.iter().map(|item| item.id).max().map_or(1, |max| max + 1);
        info!(count = items.len(), next_id, "Catalog loaded");
        Ok(Self {
            repository,
            assets,
            state: RwLock::new(CatalogState { items, next_id }),
        })
    }

    /// Records whose name contains the search term (case- and
    /// space-insensitively), ordered per the sort option.
    #[instrument(skip(self))]
    pub async fn search_and_sort(&self, search_term: &str, sort_option: SortOption) -> Vec<Item> {
        let state = self.state.read().await;
        let mut matches = domain::filter_items(&state.items, search_term);
        domain::sort_items(&mut matches, sort_option);
        debug!(hits = matches.len(), "Search finished");
        matches
    }

    /// Sum of `price` over the records matching the query; 0 when nothing
    /// matches.
    #[instrument(skip(self))]
    pub async fn sum_price_for_query(&self, query: &str) -> f64 {
        let state = self.state.read().await;
        domain::filter_items(&state.items, query)
            .iter()
            .map(|item| item.price)
            .sum()
    }

    /// Snapshot of the whole collection in its current order.
    pub async fn list(&self) -> Vec<Item> {
        self.state.read().await.items.clone()
    }

    /// Creates a record from the draft and a mandatory image upload,
    /// re-sorts the full collection, persists it, and returns the new
    /// record (fields as assigned, independent of its sorted position).
    #[instrument(skip(self, draft, upload), fields(name = %draft.name))]
    pub async fn create(
        &self,
        draft: ItemDraft,
        upload: Option<ImageUpload>,
        sort_option: SortOption,
    ) -> Result<Item, ApplicationError> {
        let upload = upload.ok_or_else(|| {
            warn!("Create rejected: no image part in the request");
            ApplicationError::InvalidInput("No image part in the request".to_string())
        })?;
        if upload.filename.is_empty() {
            warn!("Create rejected: no file selected");
            return Err(ApplicationError::InvalidInput("No selected file".to_string()));
        }
        if !domain::allowed_image_file(&upload.filename) {
            warn!(filename = %upload.filename, "Create rejected: file type not allowed");
            return Err(DomainError::UnsupportedImageType(upload.filename).into());
        }

        let mut state = self.state.write().await;
        let stored = self.assets.store(&upload.filename, &upload.bytes).await?;
        let item = Item {
            id: state.next_id,
            name: draft.name,
            description: draft.description,
            age: draft.age,
            price: draft.price,
            image: format!("/assets/{stored}"),
        };
        state.next_id += 1;
        state.items.push(item.clone());
        domain::sort_items(&mut state.items, sort_option);
        self.repository.save(&state.items).await?;
        info!(id = item.id, "Item created");
        Ok(item)
    }

    /// Re-orders the whole collection, persists the result, and returns
    /// it.
    #[instrument(skip(self))]
    pub async fn resort(&self, sort_option: SortOption) -> Result<Vec<Item>, ApplicationError> {
        let mut state = self.state.write().await;
        domain::sort_items(&mut state.items, sort_option);
        self.repository.save(&state.items).await?;
        info!(count = state.items.len(), "Catalog re-sorted");
        Ok(state.items.clone())
    }

    /// Applies a partial update to the record with the given id. A
    /// supplied upload replaces the image only when it is usable (named,
    /// allowed extension); an unusable one is skipped without failing the
    /// rest of the update. Re-sorts and persists on success.
    #[instrument(skip(self, changes, upload))]
    pub async fn update(
        &self,
        id: u64,
        changes: ItemChanges,
        upload: Option<ImageUpload>,
        sort_option: SortOption,
    ) -> Result<Item, ApplicationError> {
        let mut state = self.state.write().await;
        let position = state
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| {
                warn!(id, "Update failed: item not found");
                ApplicationError::NotFound(id)
            })?;

        let new_image = match upload {
            Some(upload)
                if !upload.filename.is_empty() && domain::allowed_image_file(&upload.filename) =>
            {
                let stored = self.assets.store(&upload.filename, &upload.bytes).await?;
                Some(format!("/assets/{stored}"))
            }
            Some(upload) => {
                warn!(filename = %upload.filename, "Ignoring unusable image upload on update");
                None
            }
            None => None,
        };

        let item = &mut state.items[position];
        if let Some(image) = new_image {
            item.image = image;
        }
        if let Some(name) = changes.name {
            item.name = name;
        }
        if let Some(description) = changes.description {
            item.description = description;
        }
        if let Some(age) = changes.age {
            item.age = age;
        }
        if let Some(price) = changes.price {
            item.price = price;
        }
        let updated = item.clone();

        domain::sort_items(&mut state.items, sort_option);
        self.repository.save(&state.items).await?;
        info!(id, "Item updated");
        Ok(updated)
    }

    /// Removes any record with the given id and persists the collection
    /// unconditionally, even when nothing matched.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: u64) -> Result<(), ApplicationError> {
        let mut state = self.state.write().await;
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        let removed = before - state.items.len();
        if removed == 0 {
            debug!(id, "Delete matched no items; persisting unchanged collection");
        }
        self.repository.save(&state.items).await?;
        info!(id, removed, "Item deleted");
        Ok(())
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Repository stub that records every persisted snapshot.
    #[derive(Default)]
    struct RecordingRepository {
        initial: Vec<Item>,
        saves: Mutex<Vec<Vec<Item>>>,
    }

    impl RecordingRepository {
        fn with_items(items: Vec<Item>) -> Self {
            Self {
                initial: items,
                saves: Mutex::new(Vec::new()),
            }
        }

        fn last_save(&self) -> Option<Vec<Item>> {
            self.saves.lock().unwrap().last().cloned()
        }

        fn save_count(&self) -> usize {
            self.saves.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CatalogRepository for RecordingRepository {
        async fn load(&self) -> Result<Vec<Item>, ApplicationError> {
            Ok(self.initial.clone())
        }

        async fn save(&self, items: &[Item]) -> Result<(), ApplicationError> {
            self.saves.lock().unwrap().push(items.to_vec());
            Ok(())
        }
    }

    /// Asset store stub that accepts everything verbatim.
    #[derive(Default)]
    struct RecordingAssets {
        stored: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AssetStore for RecordingAssets {
        async fn store(&self, filename: &str, _bytes: &[u8]) -> Result<String, ApplicationError> {
            self.stored.lock().unwrap().push(filename.to_string());
            Ok(filename.to_string())
        }

        async fn fetch(&self, _filename: &str) -> Result<Option<Vec<u8>>, ApplicationError> {
            Ok(None)
        }
    }

    fn item(id: u64, name: &str, age: f64, price: f64) -> Item {
        Item {
            id,
            name: name.to_string(),
            description: String::new(),
            age,
            price,
            image: format!("/assets/{id}.png"),
        }
    }

    fn draft(name: &str, age: f64, price: f64) -> ItemDraft {
        ItemDraft {
            name: name.to_string(),
            description: format!("{name} description"),
            age,
            price,
        }
    }

    fn upload(filename: &str) -> Option<ImageUpload> {
        Some(ImageUpload {
            filename: filename.to_string(),
            bytes: vec![0u8; 4],
        })
    }

    async fn service_with(
        items: Vec<Item>,
    ) -> (CatalogService, Arc<RecordingRepository>, Arc<RecordingAssets>) {
        let repository = Arc::new(RecordingRepository::with_items(items));
        let assets = Arc::new(RecordingAssets::default());
        let service = CatalogService::open(repository.clone(), assets.clone())
            .await
            .unwrap();
        (service, repository, assets)
    }

    #[tokio::test]
    async fn create_assigns_ids_monotonically() {
        let (service, _, _) = service_with(Vec::new()).await;
        let first = service
            .create(draft("Ann", 2.0, 20.0), upload("ann.png"), SortOption::NameAscending)
            .await
            .unwrap();
        let second = service
            .create(draft("Rex", 3.0, 50.0), upload("rex.png"), SortOption::NameAscending)
            .await
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        // With three records, deleting #2 and creating again must yield a
        // fresh id (4), never a collision with surviving record #3.
        let (service, _, _) = service_with(vec![
            item(1, "Ann", 2.0, 20.0),
            item(2, "Bo", 1.0, 15.0),
            item(3, "Rex", 3.0, 50.0),
        ])
        .await;

        service.delete(2).await.unwrap();
        let created = service
            .create(draft("Tia", 4.0, 35.0), upload("tia.png"), SortOption::NameAscending)
            .await
            .unwrap();
        assert_eq!(created.id, 4);

        let mut ids: Vec<u64> = service.list().await.iter().map(|i| i.id).collect();
        ids.sort_unstable();
        let count = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), count, "ids must stay unique after delete/create");
    }

    #[tokio::test]
    async fn next_id_derives_from_highest_persisted_id() {
        let (service, _, _) = service_with(vec![item(7, "Rex", 3.0, 50.0)]).await;
        let created = service
            .create(draft("Ann", 2.0, 20.0), upload("ann.png"), SortOption::Unsorted)
            .await
            .unwrap();
        assert_eq!(created.id, 8);
    }

    #[tokio::test]
    async fn create_requires_an_image_part() {
        let (service, repository, _) = service_with(Vec::new()).await;
        let result = service
            .create(draft("Ann", 2.0, 20.0), None, SortOption::NameAscending)
            .await;
        assert!(matches!(result, Err(ApplicationError::InvalidInput(_))));
        assert_eq!(repository.save_count(), 0);
    }

    #[tokio::test]
    async fn create_rejects_empty_filename() {
        let (service, _, _) = service_with(Vec::new()).await;
        let result = service
            .create(draft("Ann", 2.0, 20.0), upload(""), SortOption::NameAscending)
            .await;
        assert!(matches!(result, Err(ApplicationError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn create_rejects_disallowed_extension() {
        let (service, _, assets) = service_with(Vec::new()).await;
        let result = service
            .create(draft("Ann", 2.0, 20.0), upload("ann.exe"), SortOption::NameAscending)
            .await;
        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::UnsupportedImageType(_)))
        ));
        assert!(assets.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_sorts_and_persists_the_full_collection() {
        let (service, repository, _) = service_with(vec![item(1, "Rex", 3.0, 50.0)]).await;
        let created = service
            .create(draft("Ann", 2.0, 20.0), upload("ann.png"), SortOption::NameAscending)
            .await
            .unwrap();
        assert_eq!(created.name, "Ann");
        assert_eq!(created.image, "/assets/ann.png");

        let persisted = repository.last_save().unwrap();
        let names: Vec<&str> = persisted.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Ann", "Rex"]);
    }

    #[tokio::test]
    async fn queries_observe_in_memory_state() {
        // The in-memory collection is authoritative: a create is visible
        // to searches immediately, without reloading the document.
        let (service, _, _) = service_with(Vec::new()).await;
        service
            .create(draft("Rex", 3.0, 50.0), upload("rex.png"), SortOption::NameAscending)
            .await
            .unwrap();
        let hits = service.search_and_sort("rex", SortOption::NameAscending).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Rex");
    }

    #[tokio::test]
    async fn search_orders_per_requested_option() {
        let (service, _, _) = service_with(vec![
            item(1, "Rex", 3.0, 50.0),
            item(2, "Ann", 5.0, 20.0),
        ])
        .await;

        let by_name = service.search_and_sort("", SortOption::NameAscending).await;
        let names: Vec<&str> = by_name.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Ann", "Rex"]);

        let by_price = service.search_and_sort("", SortOption::PriceDescending).await;
        let names: Vec<&str> = by_price.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Rex", "Ann"]);
    }

    #[tokio::test]
    async fn search_does_not_mutate_state() {
        let (service, repository, _) = service_with(vec![
            item(1, "Rex", 3.0, 50.0),
            item(2, "Ann", 5.0, 20.0),
        ])
        .await;
        service.search_and_sort("", SortOption::NameAscending).await;
        assert_eq!(repository.save_count(), 0);
        let names: Vec<String> = service.list().await.into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["Rex", "Ann"]);
    }

    #[tokio::test]
    async fn price_sum_over_matches_and_over_nothing() {
        let (service, _, _) = service_with(vec![
            item(1, "Rex", 3.0, 50.0),
            item(2, "Ann", 5.0, 20.0),
        ])
        .await;
        assert_eq!(service.sum_price_for_query("").await, 70.0);
        assert_eq!(service.sum_price_for_query("rex").await, 50.0);
        assert_eq!(service.sum_price_for_query("zebra").await, 0.0);
    }

    #[tokio::test]
    async fn resort_persists_the_new_order() {
        let (service, repository, _) = service_with(vec![
            item(1, "Rex", 3.0, 50.0),
            item(2, "Ann", 5.0, 20.0),
        ])
        .await;
        let sorted = service.resort(SortOption::PriceAscending).await.unwrap();
        let names: Vec<&str> = sorted.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Ann", "Rex"]);
        assert_eq!(repository.last_save().unwrap(), sorted);
    }

    #[tokio::test]
    async fn update_with_only_price_keeps_other_fields() {
        let (service, _, _) = service_with(vec![item(1, "Rex", 3.0, 50.0)]).await;
        let updated = service
            .update(
                1,
                ItemChanges {
                    price: Some(99.0),
                    ..ItemChanges::default()
                },
                None,
                SortOption::NameAscending,
            )
            .await
            .unwrap();
        assert_eq!(updated.price, 99.0);
        assert_eq!(updated.name, "Rex");
        assert_eq!(updated.age, 3.0);
        assert_eq!(updated.image, "/assets/1.png");
    }

    #[tokio::test]
    async fn update_replaces_image_when_upload_is_usable() {
        let (service, _, _) = service_with(vec![item(1, "Rex", 3.0, 50.0)]).await;
        let updated = service
            .update(
                1,
                ItemChanges::default(),
                upload("newrex.jpg"),
                SortOption::NameAscending,
            )
            .await
            .unwrap();
        assert_eq!(updated.image, "/assets/newrex.jpg");
    }

    #[tokio::test]
    async fn update_skips_unusable_upload_but_succeeds() {
        let (service, _, assets) = service_with(vec![item(1, "Rex", 3.0, 50.0)]).await;
        let updated = service
            .update(
                1,
                ItemChanges {
                    name: Some("Rexy".to_string()),
                    ..ItemChanges::default()
                },
                upload("virus.exe"),
                SortOption::NameAscending,
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Rexy");
        assert_eq!(updated.image, "/assets/1.png");
        assert!(assets.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let (service, repository, _) = service_with(vec![item(1, "Rex", 3.0, 50.0)]).await;
        let result = service
            .update(42, ItemChanges::default(), None, SortOption::NameAscending)
            .await;
        assert!(matches!(result, Err(ApplicationError::NotFound(42))));
        assert_eq!(repository.save_count(), 0);
    }

    #[tokio::test]
    async fn delete_of_unknown_id_persists_unchanged_and_succeeds() {
        let (service, repository, _) = service_with(vec![item(1, "Rex", 3.0, 50.0)]).await;
        service.delete(42).await.unwrap();
        assert_eq!(repository.save_count(), 1);
        let persisted = repository.last_save().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].name, "Rex");
    }

    #[tokio::test]
    async fn delete_removes_the_record_and_persists() {
        let (service, repository, _) = service_with(vec![
            item(1, "Rex", 3.0, 50.0),
            item(2, "Ann", 5.0, 20.0),
        ])
        .await;
        service.delete(1).await.unwrap();
        let persisted = repository.last_save().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].name, "Ann");
        assert_eq!(service.list().await.len(), 1);
    }
}
