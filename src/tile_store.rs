//! Tile persistence
//!
//! Tiles are addressed by `{zoom}/{x}/{y}.{ext}`, the path a slippy-map
//! client requests. [`FsTileStore`] lays that out under a root directory;
//! [`MemoryTileStore`] keeps tiles in a map for tests and callers that ship
//! tiles elsewhere.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::trace;

use crate::error::{Error, Result};
use crate::tile_grid::TileCoordinate;

/// Relative location of a tile: `{zoom}/{x}/{y}.{ext}`
#[must_use]
pub fn tile_path(coordinate: TileCoordinate, extension: &str) -> String {
    format!("{coordinate}.{extension}")
}

/// Destination for encoded tiles
///
/// Implementations must be safe to call from many worker threads at once.
/// Distinct coordinates never share a location, so no cross-tile locking is
/// needed beyond what the store itself requires.
pub trait TileStore: Send + Sync {
    /// Store `bytes` at the tile's location, replacing any previous tile
    fn put(&self, coordinate: TileCoordinate, extension: &str, bytes: &[u8]) -> Result<()>;

    /// Human-readable identifier for logging
    fn identifier(&self) -> String;
}

/// Writes tiles into a directory tree, creating directories on demand
#[derive(Debug, Clone)]
pub struct FsTileStore {
    root: PathBuf,
}

impl FsTileStore {
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a tile under the root
    #[must_use]
    pub fn path_for(&self, coordinate: TileCoordinate, extension: &str) -> PathBuf {
        self.root
            .join(coordinate.zoom().to_string())
            .join(coordinate.x().to_string())
            .join(format!("{}.{extension}", coordinate.y()))
    }
}

impl TileStore for FsTileStore {
    fn put(&self, coordinate: TileCoordinate, extension: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(coordinate, extension);
        let storage_failed = |source| Error::StorageFailed { coordinate, source };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(storage_failed)?;
        }
        fs::write(&path, bytes).map_err(storage_failed)?;
        trace!(path = %path.display(), bytes = bytes.len(), "wrote tile");
        Ok(())
    }

    fn identifier(&self) -> String {
        self.root.display().to_string()
    }
}

/// Keeps tiles in memory, keyed by [`tile_path`]
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryTileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, coordinate: TileCoordinate, extension: &str) -> Option<Vec<u8>> {
        self.lock().get(&tile_path(coordinate, extension)).cloned()
    }

    /// Stored tile paths in sorted order
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.tiles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TileStore for MemoryTileStore {
    fn put(&self, coordinate: TileCoordinate, extension: &str, bytes: &[u8]) -> Result<()> {
        self.lock().insert(tile_path(coordinate, extension), bytes.to_vec());
        Ok(())
    }

    fn identifier(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(zoom: u8, x: u32, y: u32) -> TileCoordinate {
        TileCoordinate::new(zoom, x, y).unwrap()
    }

    #[test]
    fn test_tile_path_layout() {
        assert_eq!(tile_path(tile(3, 5, 1), "png"), "3/5/1.png");
        let store = FsTileStore::new("/tmp/tiles");
        assert_eq!(
            store.path_for(tile(12, 2048, 1361), "jpg"),
            Path::new("/tmp/tiles/12/2048/1361.jpg")
        );
    }

    #[test]
    fn test_fs_store_creates_dirs_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTileStore::new(dir.path());
        store.put(tile(2, 1, 3), "png", b"first").unwrap();
        store.put(tile(2, 1, 3), "png", b"second").unwrap();
        let written = fs::read(dir.path().join("2/1/3.png")).unwrap();
        assert_eq!(written, b"second");
    }

    #[test]
    fn test_fs_store_failure_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the tile file should go
        fs::create_dir_all(dir.path().join("1/0/0.png")).unwrap();
        let store = FsTileStore::new(dir.path());
        let err = store.put(tile(1, 0, 0), "png", b"x").unwrap_err();
        assert!(matches!(err, Error::StorageFailed { coordinate, .. } if coordinate == tile(1, 0, 0)));
        assert!(err.is_tile_scoped());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTileStore::new();
        assert!(store.is_empty());
        store.put(tile(1, 1, 0), "png", &[1, 2, 3]).unwrap();
        store.put(tile(0, 0, 0), "png", &[4]).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.paths(), vec!["0/0/0.png", "1/1/0.png"]);
        assert_eq!(store.get(tile(1, 1, 0), "png"), Some(vec![1, 2, 3]));
        assert_eq!(store.get(tile(1, 1, 0), "jpg"), None);
    }
}
