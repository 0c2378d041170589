//! Source asset lookup.
//!
//! Uploads and their storage are owned by another system; the orchestrator
//! only needs to turn an [`AssetId`] into the file on disk and its owner.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;

use rd_core::{Asset, AssetId, Error, Result, UserId};

/// Resolves asset ids to stored source files.
pub trait AssetResolver: Send + Sync {
    /// Look up an asset.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no asset has this id.
    fn resolve(&self, asset_id: AssetId) -> Result<Asset>;
}

/// In-process registry of known assets.
#[derive(Debug, Default)]
pub struct AssetCatalog {
    assets: RwLock<HashMap<AssetId, Asset>>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stored file as an asset owned by `owner`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if `path` is not an existing regular file.
    pub fn register(&self, owner: UserId, path: impl Into<PathBuf>) -> Result<Asset> {
        let path = path.into();
        if !path.is_file() {
            return Err(Error::invalid_input(format!(
                "source {} is not an existing file",
                path.display()
            )));
        }
        let asset = Asset::new(owner, path);
        tracing::debug!(asset_id = %asset.id, owner = %owner, name = %asset.original_name, "Asset registered");
        self.assets.write().insert(asset.id, asset.clone());
        Ok(asset)
    }

    /// Add an already-built asset without touching the filesystem.
    pub fn insert(&self, asset: Asset) {
        self.assets.write().insert(asset.id, asset);
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }
}

impl AssetResolver for AssetCatalog {
    fn resolve(&self, asset_id: AssetId) -> Result<Asset> {
        self.assets
            .read()
            .get(&asset_id)
            .cloned()
            .ok_or_else(|| Error::not_found("asset", asset_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn register_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holiday.mov");
        std::fs::write(&path, b"data").unwrap();

        let catalog = AssetCatalog::new();
        let owner = UserId::new();
        let asset = catalog.register(owner, &path).unwrap();

        let resolved = catalog.resolve(asset.id).unwrap();
        assert_eq!(resolved.owner, owner);
        assert_eq!(resolved.original_name, "holiday.mov");
        assert_eq!(resolved.storage_path, path);
    }

    #[test]
    fn register_missing_file_rejected() {
        let catalog = AssetCatalog::new();
        let result = catalog.register(UserId::new(), "/nonexistent/clip.mov");
        assert_matches!(result, Err(Error::InvalidInput(_)));
        assert!(catalog.is_empty());
    }

    #[test]
    fn unknown_asset_not_found() {
        let catalog = AssetCatalog::new();
        assert_matches!(
            catalog.resolve(AssetId::new()),
            Err(Error::NotFound { .. })
        );
    }
}
