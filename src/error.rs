//! Error types shared by every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

use crate::tile_grid::TileCoordinate;

/// Errors produced while building a tile pyramid.
///
/// `UnreadableRaster` and `UnsupportedProjection` are fatal for a run.
/// `EncodeFailed` and `StorageFailed` are scoped to a single tile and are
/// collected into the run summary by the pyramid builder.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unreadable raster {}: {reason}", path.display())]
    UnreadableRaster { path: PathBuf, reason: String },

    #[error("unsupported projection: {0}")]
    UnsupportedProjection(String),

    #[error("failed to encode tile {coordinate}: {reason}")]
    EncodeFailed {
        coordinate: TileCoordinate,
        reason: String,
    },

    #[error("failed to store tile {coordinate}: {source}")]
    StorageFailed {
        coordinate: TileCoordinate,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write GeoTIFF: {0}")]
    GeoTiffWrite(String),

    #[error("invalid tile coordinate {zoom}/{x}/{y}")]
    InvalidTile { zoom: u8, x: u32, y: u32 },

    #[error("invalid bounding box: {0}")]
    InvalidBounds(String),

    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::UnreadableRaster {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable snake_case name of the variant, used in run reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnreadableRaster { .. } => "unreadable_raster",
            Error::UnsupportedProjection(_) => "unsupported_projection",
            Error::EncodeFailed { .. } => "encode_failed",
            Error::StorageFailed { .. } => "storage_failed",
            Error::GeoTiffWrite(_) => "geotiff_write",
            Error::InvalidTile { .. } => "invalid_tile",
            Error::InvalidBounds(_) => "invalid_bounds",
            Error::InvalidRaster(_) => "invalid_raster",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }

    /// True for errors that only affect one tile.
    #[must_use]
    pub fn is_tile_scoped(&self) -> bool {
        matches!(self, Error::EncodeFailed { .. } | Error::StorageFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
