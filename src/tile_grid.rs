//! XYZ tile grid math
//!
//! Standard slippy-map addressing over Web Mercator: zoom `z` splits the
//! world square `[-HALF_EARTH, HALF_EARTH]²` into `2^z × 2^z` tiles, `x`
//! growing eastward and `y` growing southward from the top-left corner.
//! Pure functions, no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::geometry::projection::{Crs, HALF_EARTH};
use crate::raster::{Raster, Sample};

/// Highest zoom level supported
pub const MAX_ZOOM: u8 = 22;

/// Slack in pixels when snapping a tile's footprint to the raster grid
const WINDOW_EPSILON: f64 = 1e-6;

/// Address of one tile in the pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawTileCoordinate")]
pub struct TileCoordinate {
    #[serde(rename = "z")]
    zoom: u8,
    x: u32,
    y: u32,
}

#[derive(Deserialize)]
struct RawTileCoordinate {
    z: u8,
    x: u32,
    y: u32,
}

impl TryFrom<RawTileCoordinate> for TileCoordinate {
    type Error = Error;

    fn try_from(raw: RawTileCoordinate) -> Result<Self> {
        TileCoordinate::new(raw.z, raw.x, raw.y)
    }
}

impl TileCoordinate {
    /// # Errors
    /// Returns [`Error::InvalidTile`] if `zoom > MAX_ZOOM` or `x`/`y` is not
    /// below `2^zoom`.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self> {
        if zoom > MAX_ZOOM || x >= tiles_per_side(zoom) || y >= tiles_per_side(zoom) {
            return Err(Error::InvalidTile { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    #[inline]
    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    #[inline]
    #[must_use]
    pub fn x(&self) -> u32 {
        self.x
    }

    #[inline]
    #[must_use]
    pub fn y(&self) -> u32 {
        self.y
    }

    /// The tile one level up that contains this one
    #[must_use]
    pub fn parent(&self) -> Option<TileCoordinate> {
        (self.zoom > 0).then(|| TileCoordinate {
            zoom: self.zoom - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The four tiles one level down, in `(x, y)` row-major order
    #[must_use]
    pub fn children(&self) -> Option<[TileCoordinate; 4]> {
        if self.zoom >= MAX_ZOOM {
            return None;
        }
        let (zoom, x, y) = (self.zoom + 1, self.x * 2, self.y * 2);
        Some([
            TileCoordinate { zoom, x, y },
            TileCoordinate { zoom, x: x + 1, y },
            TileCoordinate { zoom, x, y: y + 1 },
            TileCoordinate { zoom, x: x + 1, y: y + 1 },
        ])
    }

    /// Web Mercator extent of this tile
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        let span = tile_span(self.zoom);
        let min_x = -HALF_EARTH + f64::from(self.x) * span;
        let max_y = HALF_EARTH - f64::from(self.y) * span;
        BoundingBox::from_ordered(min_x, max_y - span, min_x + span, max_y, Crs::WEB_MERCATOR)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Web Mercator extent of a tile
#[must_use]
pub fn tile_bounds(tile: TileCoordinate) -> BoundingBox {
    tile.bounds()
}

#[inline]
fn tiles_per_side(zoom: u8) -> u32 {
    1u32 << zoom.min(MAX_ZOOM)
}

/// Width of one tile in Web Mercator meters
#[inline]
fn tile_span(zoom: u8) -> f64 {
    2.0 * HALF_EARTH / f64::from(tiles_per_side(zoom))
}

/// Inclusive tile index ranges covering a box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileRange {
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
}

impl TileRange {
    fn count(&self) -> u64 {
        u64::from(self.max_x - self.min_x + 1) * u64::from(self.max_y - self.min_y + 1)
    }
}

fn tile_range(bbox: &BoundingBox, zoom: u8) -> Result<Option<TileRange>> {
    if bbox.crs() != Crs::WEB_MERCATOR {
        return Err(Error::UnsupportedProjection(format!(
            "tile grid needs a {} box, got {}",
            Crs::WEB_MERCATOR,
            bbox.crs()
        )));
    }
    if zoom > MAX_ZOOM {
        return Err(Error::InvalidConfig(format!(
            "zoom {zoom} exceeds maximum {MAX_ZOOM}"
        )));
    }

    let span = tile_span(zoom);
    let last = i64::from(tiles_per_side(zoom)) - 1;
    // Tile i covers [i * span, (i + 1) * span] from the world's west/north
    // edge; closed intervals, so touching tiles are included
    let first_index = |near: f64| ((near / span).ceil() as i64 - 1).max(0);
    let last_index = |far: f64| ((far / span).floor() as i64).min(last);

    let min_x = first_index(bbox.min_x() + HALF_EARTH);
    let max_x = last_index(bbox.max_x() + HALF_EARTH);
    let min_y = first_index(HALF_EARTH - bbox.max_y());
    let max_y = last_index(HALF_EARTH - bbox.min_y());
    if min_x > max_x || min_y > max_y {
        return Ok(None);
    }
    Ok(Some(TileRange {
        min_x: min_x as u32,
        max_x: max_x as u32,
        min_y: min_y as u32,
        max_y: max_y as u32,
    }))
}

/// Every tile at `zoom` whose extent intersects `bbox` (touching counts),
/// ordered by row then column.
///
/// # Errors
/// Returns [`Error::UnsupportedProjection`] if `bbox` is not in Web
/// Mercator and [`Error::InvalidConfig`] if `zoom > MAX_ZOOM`.
pub fn tiles_for_zoom(bbox: &BoundingBox, zoom: u8) -> Result<Vec<TileCoordinate>> {
    let Some(range) = tile_range(bbox, zoom)? else {
        return Ok(Vec::new());
    };
    let mut tiles = Vec::with_capacity(range.count() as usize);
    for y in range.min_y..=range.max_y {
        for x in range.min_x..=range.max_x {
            tiles.push(TileCoordinate { zoom, x, y });
        }
    }
    Ok(tiles)
}

/// Number of tiles [`tiles_for_zoom`] would return, without allocating
///
/// # Errors
/// See [`tiles_for_zoom`].
pub fn tile_count_for_zoom(bbox: &BoundingBox, zoom: u8) -> Result<u64> {
    Ok(tile_range(bbox, zoom)?.map_or(0, |r| r.count()))
}

/// Region of a raster's pixel grid, clipped to the raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelWindow {
    pub col_offset: usize,
    pub row_offset: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    /// True when the window covers no pixel
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.col_offset
            && row >= self.row_offset
            && col < self.col_offset + self.width
            && row < self.row_offset + self.height
    }
}

/// Pixel window of `raster` covered by `tile`.
///
/// The tile's Web Mercator corners go through the inverse of the raster's
/// affine transform and the resulting span is snapped outward to whole
/// pixels, then clipped. A tile beyond the raster gets an empty window.
///
/// # Errors
/// Returns [`Error::UnsupportedProjection`] if the tile extent cannot be
/// projected into the raster's CRS, and [`Error::InvalidRaster`] for a
/// non-invertible transform.
pub fn pixel_window_for_tile<T: Sample>(
    raster: &Raster<T>,
    tile: TileCoordinate,
) -> Result<PixelWindow> {
    let extent = tile.bounds().to_crs(raster.crs())?;
    let inverse = raster
        .transform()
        .inverse()
        .ok_or_else(|| Error::InvalidRaster("geotransform is not invertible".into()))?;

    let corners = [
        (extent.min_x(), extent.min_y()),
        (extent.max_x(), extent.min_y()),
        (extent.min_x(), extent.max_y()),
        (extent.max_x(), extent.max_y()),
    ]
    .map(|(x, y)| inverse.pixel_to_world(x, y));
    let (mut min_col, mut min_row) = (f64::INFINITY, f64::INFINITY);
    let (mut max_col, mut max_row) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in corners {
        min_col = min_col.min(p.x);
        max_col = max_col.max(p.x);
        min_row = min_row.min(p.y);
        max_row = max_row.max(p.y);
    }

    let clip = |v: f64, limit: usize| v.clamp(0.0, limit as f64) as usize;
    let (width, height) = (raster.width(), raster.height());
    let col_start = clip((min_col + WINDOW_EPSILON).floor(), width);
    let col_end = clip((max_col - WINDOW_EPSILON).ceil(), width);
    let row_start = clip((min_row + WINDOW_EPSILON).floor(), height);
    let row_end = clip((max_row - WINDOW_EPSILON).ceil(), height);

    Ok(PixelWindow {
        col_offset: col_start,
        row_offset: row_start,
        width: col_end.saturating_sub(col_start),
        height: row_end.saturating_sub(row_start),
    })
}
