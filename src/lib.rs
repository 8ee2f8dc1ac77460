//! # geopyramid - Web Mercator tile pyramids from GeoTIFFs
//!
//! Turns one geo-referenced raster (any CRS, band count and sample type)
//! into a quadtree of fixed-size image tiles laid out as `{z}/{x}/{y}.png`,
//! the addressing every slippy-map client requests. Pure Rust, no GDAL.
//!
//! ## Features
//!
//! - **GeoTIFF input**: pixel scale/tiepoint or model transformation, EPSG
//!   codes from the GeoKey directory, `GDAL_NODATA`
//! - **Reprojection**: default Web Mercator grid with nearest or bilinear
//!   resampling, parallel over rows
//! - **Normalization**: per-band or global min/max stretch to 8-bit
//! - **Tiling**: closed-interval tile selection, pixel windows clipped to the
//!   raster, PNG (with alpha) or JPEG output
//! - **Partial failure**: failing tiles are reported, never abort a run, and
//!   can be retried from a JSON report
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use geopyramid::{FsTileStore, PyramidConfig, ZoomRange, generate_pyramid};
//!
//! let config = PyramidConfig::default().with_zoom(ZoomRange::new(0, 8)?);
//! let store = FsTileStore::new("tiles");
//! let summary = generate_pyramid("scene.tif", config, &store)?;
//! println!("{} tiles, {} failed", summary.tile_count(), summary.failed_count());
//! ```
//!
//! ## Architecture
//!
//! - [`source`]: GeoTIFF decoding into an [`AnyRaster`]
//! - [`reproject`]: default transform and resampling via [`Reprojector`]
//! - [`normalize`]: 8-bit stretch
//! - [`tile_grid`]: tile coordinates, extents and pixel windows
//! - [`tile_writer`]: rendering and encoding via [`TileWriter`]
//! - [`tile_store`]: where tiles go ([`FsTileStore`], [`MemoryTileStore`])
//! - [`pyramid`]: orchestration via [`PyramidBuilder`]
//! - [`geometry`]: [`Point`], [`BoundingBox`], CRS handling and affine transforms

// ============================================================================
// Public modules
// ============================================================================

pub mod config;
pub mod error;
pub mod geometry;
pub mod geotiff_writer;
pub mod normalize;
pub mod pyramid;
pub mod raster;
pub mod reproject;
pub mod source;
pub mod tile_grid;
pub mod tile_store;
pub mod tile_writer;

// ============================================================================
// Errors & Configuration
// ============================================================================

pub use error::{Error, Result};
pub use config::{PyramidConfig, ZoomRange, DEFAULT_TILE_SIZE, MAX_TILE_SIZE};

// ============================================================================
// Rasters
// ============================================================================

pub use raster::{AnyRaster, Raster, Sample, SampleType, MASK_EMPTY, MASK_VALID};
pub use source::open;
pub use geotiff_writer::{GeoTiffCompression, GeoTiffWriter};

// ============================================================================
// Pipeline Stages
// ============================================================================

pub use reproject::{default_transform, OutputGrid, ResamplingMethod, Reprojector};
pub use normalize::{normalize, BandRange, NormalizeOptions, DEGENERATE_FILL};

// ============================================================================
// Tiling
// ============================================================================

pub use tile_grid::{
    PixelWindow,
    TileCoordinate,
    MAX_ZOOM,
    pixel_window_for_tile,
    tile_bounds,
    tile_count_for_zoom,
    tiles_for_zoom,
};

pub use tile_writer::{TileFormat, TileImage, TileWriter, DEFAULT_JPEG_QUALITY};
pub use tile_store::{FsTileStore, MemoryTileStore, TileStore, tile_path};

// ============================================================================
// Orchestration
// ============================================================================

pub use pyramid::{
    CancellationToken,
    FailureReport,
    PyramidBuilder,
    PyramidSummary,
    SummaryReport,
    TileFailure,
    ZoomSummary,
    generate_pyramid,
};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{BoundingBox, Point};
pub use geometry::transform::GeoTransform;
pub use geometry::projection::{
    CoordTransformer,
    Crs,
    lon_lat_to_mercator,
    mercator_to_lon_lat,
    project_point,
};
