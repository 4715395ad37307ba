pub mod fs_asset_store;

// Re-export the asset store implementation
pub use fs_asset_store::FsAssetStore;
