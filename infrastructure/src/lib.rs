// Module declarations
pub mod assets;
pub mod persistence;

// Re-export all implementations
pub use assets::FsAssetStore;
pub use persistence::JsonFileCatalog;
