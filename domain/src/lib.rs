use serde::{Deserialize, Serialize}; // For the persisted record shape
use std::cmp::Ordering;
use thiserror::Error; // For domain-specific errors

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("File type not allowed: '{0}'")]
    UnsupportedImageType(String),
}

// --- Catalog Record ---

/// One catalog entry. The serialized field names are the wire/persistence
/// contract and must not change.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub age: f64,
    pub price: f64,
    /// Public path of the stored image asset, e.g. "/assets/rex.png".
    pub image: String,
}

// --- Sort Options ---

/// The fixed set of orderings a client can request. Anything outside the
/// six recognized wire strings leaves the input order unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOption {
    AgeAscending,
    AgeDescending,
    PriceAscending,
    PriceDescending,
    NameAscending,
    NameDescending,
    Unsorted,
}

impl SortOption {
    /// Maps a client-supplied sort string to an option. Unrecognized
    /// strings fall back to `Unsorted` rather than failing the request.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "age (low-high)" => SortOption::AgeAscending,
            "age (high-low)" => SortOption::AgeDescending,
            "price (low-high)" => SortOption::PriceAscending,
            "price (high-low)" => SortOption::PriceDescending,
            "name (A-Z)" => SortOption::NameAscending,
            "name (Z-A)" => SortOption::NameDescending,
            _ => SortOption::Unsorted,
        }
    }
}

/// Sorts records in place per the requested option.
///
/// The sort is stable: records comparing equal keep their relative input
/// order, so repeated sorting is idempotent and output is deterministic.
/// Descending orders compare with swapped operands, which still reports
/// `Equal` for equal keys and therefore preserves stability.
pub fn sort_items(items: &mut [Item], option: SortOption) {
    match option {
        SortOption::AgeAscending => items.sort_by(|a, b| a.age.total_cmp(&b.age)),
        SortOption::AgeDescending => items.sort_by(|a, b| b.age.total_cmp(&a.age)),
        SortOption::PriceAscending => items.sort_by(|a, b| a.price.total_cmp(&b.price)),
        SortOption::PriceDescending => items.sort_by(|a, b| b.price.total_cmp(&a.price)),
        SortOption::NameAscending => items.sort_by(|a, b| compare_names(a, b)),
        SortOption::NameDescending => items.sort_by(|a, b| compare_names(b, a)),
        SortOption::Unsorted => {}
    }
}

/// Case-insensitive name comparison used by the name orderings.
fn compare_names(a: &Item, b: &Item) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}

// --- Substring Matching ---

/// Normalizes text for matching: lower-cased, space characters removed.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().replace(' ', "")
}

/// Keeps the records whose normalized name contains the normalized query
/// as a substring. An empty query matches every record.
pub fn filter_items(items: &[Item], query: &str) -> Vec<Item> {
    let needle = normalize(query);
    items
        .iter()
        .filter(|item| normalize(&item.name).contains(&needle))
        .cloned()
        .collect()
}

// --- Image Uploads ---

/// File extensions accepted for uploaded images, matched on the filename
/// suffix only (no content sniffing).
pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Checks whether a filename carries an allowed image extension,
/// case-insensitively.
pub fn allowed_image_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ALLOWED_IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}
