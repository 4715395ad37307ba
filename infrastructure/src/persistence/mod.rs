pub mod json_file_catalog;

// Re-export the repository implementation
pub use json_file_catalog::JsonFileCatalog;
