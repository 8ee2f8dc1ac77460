//! Pyramid generation settings

use crate::error::{Error, Result};
use crate::normalize::NormalizeOptions;
use crate::reproject::ResamplingMethod;
use crate::tile_grid::MAX_ZOOM;
use crate::tile_writer::TileFormat;

/// Default tile edge in pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;
/// Largest tile edge accepted
pub const MAX_TILE_SIZE: u32 = 4096;

/// Inclusive range of zoom levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRange {
    min: u8,
    max: u8,
}

impl ZoomRange {
    /// # Errors
    /// Returns [`Error::InvalidConfig`] unless `min <= max <= MAX_ZOOM`.
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min > max {
            return Err(Error::InvalidConfig(format!(
                "min zoom {min} is greater than max zoom {max}"
            )));
        }
        if max > MAX_ZOOM {
            return Err(Error::InvalidConfig(format!(
                "max zoom {max} exceeds {MAX_ZOOM}"
            )));
        }
        Ok(Self { min, max })
    }

    #[must_use]
    pub fn min(&self) -> u8 {
        self.min
    }

    #[must_use]
    pub fn max(&self) -> u8 {
        self.max
    }

    /// Zoom levels in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u8> {
        self.min..=self.max
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self { min: 8, max: 12 }
    }
}

/// Configuration of one pyramid run
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidConfig {
    pub zoom: ZoomRange,
    /// Tile edge in pixels
    pub tile_size: u32,
    /// `None` selects by sample type, see [`ResamplingMethod::for_sample_type`]
    pub resampling: Option<ResamplingMethod>,
    pub format: TileFormat,
    /// Value written where the reprojected raster has no data
    pub nodata_fill: f64,
    pub normalize: NormalizeOptions,
    /// Worker threads; `None` uses one per core
    pub threads: Option<usize>,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            zoom: ZoomRange::default(),
            tile_size: DEFAULT_TILE_SIZE,
            resampling: None,
            format: TileFormat::default(),
            nodata_fill: 0.0,
            normalize: NormalizeOptions::default(),
            threads: None,
        }
    }
}

impl PyramidConfig {
    #[must_use]
    pub fn with_zoom(mut self, zoom: ZoomRange) -> Self {
        self.zoom = zoom;
        self
    }

    #[must_use]
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    #[must_use]
    pub fn with_resampling(mut self, resampling: ResamplingMethod) -> Self {
        self.resampling = Some(resampling);
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TileFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_nodata_fill(mut self, fill: f64) -> Self {
        self.nodata_fill = fill;
        self
    }

    #[must_use]
    pub fn with_normalize(mut self, normalize: NormalizeOptions) -> Self {
        self.normalize = normalize;
        self
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Check every field; the builder methods do not validate.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        ZoomRange::new(self.zoom.min, self.zoom.max)?;
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "tile size {} is outside 1..={MAX_TILE_SIZE}",
                self.tile_size
            )));
        }
        if let TileFormat::Jpeg { quality } = self.format
            && !(1..=100).contains(&quality)
        {
            return Err(Error::InvalidConfig(format!(
                "JPEG quality {quality} is outside 1..=100"
            )));
        }
        if !self.nodata_fill.is_finite() {
            return Err(Error::InvalidConfig("nodata fill must be finite".into()));
        }
        if self.threads == Some(0) {
            return Err(Error::InvalidConfig("thread count must be at least 1".into()));
        }
        Ok(())
    }
}
