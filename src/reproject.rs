//! Raster reprojection
//!
//! Warps a [`Raster`] into another CRS (Web Mercator by default). The output
//! grid comes from [`default_transform`]: the source footprint projected into
//! the target with densified edges, sampled at a square resolution that keeps
//! the source's ground resolution at its center. Every output pixel center is
//! then mapped back through the CRS conversion and the inverse source affine
//! and resampled.
//!
//! Reprojection is lossy. Warping back to the source CRS recovers values
//! only within resampling error.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::projection::{CoordTransformer, Crs, MAX_MERCATOR_LATITUDE};
use crate::geometry::transform::GeoTransform;
use crate::geometry::{BoundingBox, Point};
use crate::raster::{MASK_EMPTY, MASK_VALID, Raster, Sample, SampleType};

/// Pixel resampling method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResamplingMethod {
    /// Nearest neighbor - keeps categorical values intact
    Nearest,
    /// Bilinear interpolation over the four surrounding pixels
    Bilinear,
}

impl ResamplingMethod {
    /// Default method for a sample type: 8-bit data is treated as
    /// categorical or already display-ready, everything else as continuous.
    #[must_use]
    pub fn for_sample_type(sample_type: SampleType) -> Self {
        match sample_type {
            SampleType::U8 | SampleType::I8 => ResamplingMethod::Nearest,
            _ => ResamplingMethod::Bilinear,
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResamplingMethod::Nearest => f.write_str("nearest"),
            ResamplingMethod::Bilinear => f.write_str("bilinear"),
        }
    }
}

impl FromStr for ResamplingMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "near" => Ok(ResamplingMethod::Nearest),
            "bilinear" => Ok(ResamplingMethod::Bilinear),
            other => Err(Error::InvalidConfig(format!(
                "unknown resampling method '{other}' (expected nearest or bilinear)"
            ))),
        }
    }
}

/// Output grid chosen for a reprojection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputGrid {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

/// Compute the target transform and size for warping a raster.
///
/// The extent is the enclosing box of the densified source footprint in
/// `dst_crs`. The resolution is square: the geometric mean of the projected
/// column and row steps of the source's center pixel. Geographic sources
/// going to Web Mercator are clamped to the Mercator latitude limit first.
///
/// # Errors
/// Returns [`Error::UnsupportedProjection`] when either CRS has no
/// conversion path or the center pixel has no finite image, and
/// [`Error::InvalidRaster`] for degenerate source grids.
pub fn default_transform(
    src_crs: Crs,
    dst_crs: Crs,
    width: usize,
    height: usize,
    transform: &GeoTransform,
) -> Result<OutputGrid> {
    let mut footprint = transform
        .bounds(width, height, src_crs)
        .ok_or_else(|| Error::InvalidRaster("source geotransform is not finite".into()))?;
    if src_crs.is_geographic() && dst_crs == Crs::WEB_MERCATOR {
        footprint = BoundingBox::new(
            footprint.min_x(),
            footprint.min_y().max(-MAX_MERCATOR_LATITUDE),
            footprint.max_x(),
            footprint.max_y().min(MAX_MERCATOR_LATITUDE),
            src_crs,
        )
        .map_err(|_| {
            Error::UnsupportedProjection(
                "raster lies entirely beyond the Web Mercator latitude limit".into(),
            )
        })?;
    }
    let extent = footprint.to_crs(dst_crs)?;

    let transformer = CoordTransformer::new(src_crs, dst_crs)?;
    let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
    let project = |col: f64, row: f64| -> Result<Point> {
        let p = transform.pixel_to_world(col, row);
        transformer.transform(p.x, p.y).map(Point::from)
    };
    let center = project(cx, cy)?;
    let col_step = center.distance_to(&project(cx + 1.0, cy)?);
    let row_step = center.distance_to(&project(cx, cy + 1.0)?);
    let resolution = (col_step * row_step).sqrt();
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(Error::UnsupportedProjection(format!(
            "cannot derive a {dst_crs} resolution from the source center pixel"
        )));
    }

    // Small epsilon so extents that are an exact multiple of the resolution
    // do not gain a column from rounding noise
    let cells = |size: f64| ((size / resolution) - 1e-6).ceil().max(1.0) as usize;
    let grid = OutputGrid {
        transform: GeoTransform::from_origin(extent.min_x(), extent.max_y(), resolution, resolution),
        width: cells(extent.width()),
        height: cells(extent.height()),
    };
    debug!(
        src = %src_crs,
        dst = %dst_crs,
        resolution,
        width = grid.width,
        height = grid.height,
        "computed default transform"
    );
    Ok(grid)
}

/// Builder for warping one raster into another CRS
pub struct Reprojector<'a, T: Sample> {
    source: &'a Raster<T>,
    target: Crs,
    resampling: Option<ResamplingMethod>,
    fill: f64,
}

impl<'a, T: Sample> Reprojector<'a, T> {
    /// Reproject `source` into Web Mercator with automatic resampling and a
    /// fill value of zero
    #[must_use]
    pub fn new(source: &'a Raster<T>) -> Self {
        Self {
            source,
            target: Crs::WEB_MERCATOR,
            resampling: None,
            fill: 0.0,
        }
    }

    #[must_use]
    pub fn to_crs(mut self, target: Crs) -> Self {
        self.target = target;
        self
    }

    /// Resampling method; `None` picks [`ResamplingMethod::for_sample_type`]
    #[must_use]
    pub fn resampling(mut self, method: Option<ResamplingMethod>) -> Self {
        self.resampling = method;
        self
    }

    /// Sample value written where the source has no data
    #[must_use]
    pub fn nodata(mut self, fill: f64) -> Self {
        self.fill = fill;
        self
    }

    /// Run the warp.
    ///
    /// The output keeps the source nodata value and carries a mask marking
    /// which pixels received data.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedProjection`] if either CRS has no
    /// conversion path, and [`Error::InvalidRaster`] if the output grid
    /// would not fit in memory.
    pub fn reproject(self) -> Result<Raster<T>> {
        let source = self.source;
        let src_crs = source.crs();
        let method = self
            .resampling
            .unwrap_or_else(|| ResamplingMethod::for_sample_type(T::TYPE));

        // Surface an unsupported CRS pair before spawning any work
        CoordTransformer::new(self.target, src_crs)?;
        let grid = default_transform(
            src_crs,
            self.target,
            source.width(),
            source.height(),
            source.transform(),
        )?;
        let inverse = source
            .transform()
            .inverse()
            .ok_or_else(|| Error::InvalidRaster("source geotransform is not invertible".into()))?;

        let bands = source.band_count();
        let (width, height) = (grid.width, grid.height);
        let samples = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(bands))
            .ok_or_else(|| {
                Error::InvalidRaster(format!("output grid {width}x{height} is too large"))
            })?;

        info!(
            from = %src_crs,
            to = %self.target,
            width,
            height,
            resampling = %method,
            "reprojecting raster"
        );

        let fill = T::from_f64(self.fill);
        let mut data = vec![fill; samples];
        let mut mask = vec![MASK_EMPTY; width * height];
        let sampler = Sampler::new(source, method);
        let target = self.target;

        data.par_chunks_mut(width * bands)
            .zip(mask.par_chunks_mut(width))
            .enumerate()
            .for_each_init(
                || CoordTransformer::new(target, src_crs).ok(),
                |transformer, (row, (out_row, mask_row))| {
                    let Some(transformer) = transformer.as_ref() else {
                        return;
                    };
                    for col in 0..width {
                        let world = grid
                            .transform
                            .pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                        let Ok((sx, sy)) = transformer.transform(world.x, world.y) else {
                            continue;
                        };
                        let src = inverse.pixel_to_world(sx, sy);
                        let out = &mut out_row[col * bands..(col + 1) * bands];
                        if sampler.sample(src.x, src.y, out) {
                            mask_row[col] = MASK_VALID;
                        }
                    }
                },
            );

        let mask = Array2::from_shape_vec((height, width), mask)
            .map_err(|e| Error::InvalidRaster(e.to_string()))?;
        Raster::from_vec(width, height, bands, data, target, grid.transform)?
            .with_nodata(source.nodata())
            .with_mask(mask)
    }
}

/// Reads source samples at fractional pixel positions
pub(crate) struct Sampler<'a, T: Sample> {
    raster: &'a Raster<T>,
    data: &'a [T],
    method: ResamplingMethod,
}

impl<'a, T: Sample> Sampler<'a, T> {
    pub(crate) fn new(raster: &'a Raster<T>, method: ResamplingMethod) -> Self {
        Self {
            raster,
            data: raster.as_slice(),
            method,
        }
    }

    /// Index of the first band of pixel `(col, row)` if it holds data
    fn valid_pixel(&self, col: isize, row: isize) -> Option<usize> {
        let (w, h) = (self.raster.width() as isize, self.raster.height() as isize);
        if col < 0 || row < 0 || col >= w || row >= h {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        if !self.raster.is_valid_pixel(col, row) {
            return None;
        }
        let bands = self.raster.band_count();
        let start = (row * self.raster.width() + col) * bands;
        let pixel = &self.data[start..start + bands];
        if pixel.iter().all(|&v| self.raster.is_nodata(v)) {
            return None;
        }
        Some(start)
    }

    /// Write the resampled pixel at fractional position `(x, y)` into `out`.
    /// Returns false (leaving `out` untouched) if there is no data there.
    pub(crate) fn sample(&self, x: f64, y: f64, out: &mut [T]) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        let (w, h) = (self.raster.width() as f64, self.raster.height() as f64);
        if x < 0.0 || y < 0.0 || x >= w || y >= h {
            return false;
        }
        match self.method {
            ResamplingMethod::Nearest => self.nearest(x, y, out),
            ResamplingMethod::Bilinear => self.bilinear(x, y, out),
        }
    }

    fn nearest(&self, x: f64, y: f64, out: &mut [T]) -> bool {
        let Some(start) = self.valid_pixel(x.floor() as isize, y.floor() as isize) else {
            return false;
        };
        out.copy_from_slice(&self.data[start..start + out.len()]);
        true
    }

    fn bilinear(&self, x: f64, y: f64, out: &mut [T]) -> bool {
        // Shift to pixel-center coordinates
        let (x, y) = (x - 0.5, y - 0.5);
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as isize, y0 as isize);
        let neighbours = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x0 + 1, y0, fx * (1.0 - fy)),
            (x0, y0 + 1, (1.0 - fx) * fy),
            (x0 + 1, y0 + 1, fx * fy),
        ];

        let bands = out.len();
        let mut sums = [0.0f64; 4];
        let mut weights = [0.0f64; 4];
        let mut wide_sums = Vec::new();
        let mut wide_weights = Vec::new();
        let (sums, weights): (&mut [f64], &mut [f64]) = if bands <= 4 {
            (&mut sums[..bands], &mut weights[..bands])
        } else {
            wide_sums.resize(bands, 0.0);
            wide_weights.resize(bands, 0.0);
            (&mut wide_sums[..], &mut wide_weights[..])
        };

        let mut any = false;
        for (col, row, weight) in neighbours {
            let Some(start) = self.valid_pixel(col, row) else {
                continue;
            };
            any = true;
            for band in 0..bands {
                let value = self.data[start + band];
                if !self.raster.is_nodata(value) {
                    sums[band] += weight * value.to_f64();
                    weights[band] += weight;
                }
            }
        }
        if !any {
            return false;
        }

        // A band with no usable neighbour stays nodata, never the fill value
        let missing = T::from_f64(self.raster.nodata().unwrap_or(f64::NAN));
        for band in 0..bands {
            out[band] = if weights[band] > 0.0 {
                T::from_f64(sums[band] / weights[band])
            } else {
                missing
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::projection::lon_lat_to_mercator;

    fn wgs84_gradient(width: usize, height: usize) -> Raster<f32> {
        let data = (0..width * height).map(|i| (i % width) as f32).collect();
        Raster::from_vec(
            width,
            height,
            1,
            data,
            Crs::WGS84,
            GeoTransform::from_origin(10.0, 47.0, 2.0 / width as f64, 2.0 / height as f64),
        )
        .unwrap()
    }

    #[test]
    fn test_resampling_auto_selection() {
        assert_eq!(ResamplingMethod::for_sample_type(SampleType::U8), ResamplingMethod::Nearest);
        assert_eq!(ResamplingMethod::for_sample_type(SampleType::U16), ResamplingMethod::Bilinear);
        assert_eq!(ResamplingMethod::for_sample_type(SampleType::F64), ResamplingMethod::Bilinear);
        assert_eq!("NEAREST".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::Nearest);
        assert!("cubic".parse::<ResamplingMethod>().is_err());
    }

    #[test]
    fn test_default_transform_identity() {
        let t = GeoTransform::from_origin(-1000.0, 2000.0, 10.0, 10.0);
        let grid = default_transform(Crs::WEB_MERCATOR, Crs::WEB_MERCATOR, 100, 200, &t).unwrap();
        assert_eq!((grid.width, grid.height), (100, 200));
        assert_eq!(grid.transform, t);
    }

    #[test]
    fn test_default_transform_geographic_to_mercator() {
        let t = GeoTransform::from_origin(10.0, 47.0, 0.01, 0.01);
        let grid = default_transform(Crs::WGS84, Crs::WEB_MERCATOR, 200, 200, &t).unwrap();
        let (min_x, max_y) = lon_lat_to_mercator(10.0, 47.0);
        let c = grid.transform.coefficients();
        assert!((c[0] - min_x).abs() < 1e-6);
        assert!((c[3] - max_y).abs() < 1e-6);
        assert!((c[1] + c[5]).abs() < 1e-9, "resolution must be square");
        // 0.01 degrees is roughly 1.1 km in x and 1.6 km in y at 46N
        assert!(c[1] > 1000.0 && c[1] < 1700.0, "resolution {}", c[1]);
        assert!(grid.width > 100 && grid.height > 100);
    }

    #[test]
    fn test_polar_raster_is_clamped() {
        let t = GeoTransform::from_origin(-180.0, 90.0, 1.0, 1.0);
        let grid = default_transform(Crs::WGS84, Crs::WEB_MERCATOR, 360, 180, &t).unwrap();
        let bounds = grid
            .transform
            .bounds(grid.width, grid.height, Crs::WEB_MERCATOR)
            .unwrap();
        assert!(bounds.max_y().is_finite());
        assert!(bounds.max_y() >= crate::geometry::projection::HALF_EARTH - 1.0);
    }

    #[test]
    fn test_identity_reprojection_nearest() {
        let data: Vec<u16> = (0..16 * 8).map(|v| v as u16).collect();
        let t = GeoTransform::from_origin(0.0, 800.0, 100.0, 100.0);
        let src = Raster::from_vec(16, 8, 1, data, Crs::WEB_MERCATOR, t).unwrap();
        let out = Reprojector::new(&src)
            .resampling(Some(ResamplingMethod::Nearest))
            .reproject()
            .unwrap();
        assert_eq!((out.width(), out.height()), (16, 8));
        assert_eq!(out.as_slice(), src.as_slice());
        assert!(out.mask().unwrap().iter().all(|&m| m == MASK_VALID));
    }

    #[test]
    fn test_identity_reprojection_bilinear_preserves_values() {
        let data: Vec<f32> = (0..10 * 10).map(|v| v as f32).collect();
        let t = GeoTransform::from_origin(0.0, 100.0, 10.0, 10.0);
        let src = Raster::from_vec(10, 10, 1, data, Crs::WEB_MERCATOR, t).unwrap();
        let out = Reprojector::new(&src).reproject().unwrap();
        for (a, b) in out.as_slice().iter().zip(src.as_slice()) {
            assert!((a - b).abs() < 1e-3, "{a} != {b}");
        }
    }

    #[test]
    fn test_extent_preserved_after_roundtrip() {
        let src = wgs84_gradient(64, 64);
        let out = Reprojector::new(&src).reproject().unwrap();
        assert_eq!(out.crs(), Crs::WEB_MERCATOR);

        let back = out.bounds().to_crs(Crs::WGS84).unwrap();
        let slack = 2.0 / 64.0;
        assert!(back.contains(&src.bounds(), slack), "{back:?} vs {:?}", src.bounds());
    }

    #[test]
    fn test_values_recovered_within_resampling_error() {
        let src = wgs84_gradient(64, 64);
        let merc = Reprojector::new(&src).reproject().unwrap();
        let back = Reprojector::new(&merc).to_crs(Crs::WGS84).reproject().unwrap();

        // Sample the source pixel centres through the round-tripped raster
        let inv = back.transform().inverse().unwrap();
        let mut checked = 0;
        for row in (4..60).step_by(8) {
            for col in (4..60).step_by(8) {
                let world = src.transform().pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                let p = inv.pixel_to_world(world.x, world.y);
                let (c, r) = (p.x.floor() as usize, p.y.floor() as usize);
                if !back.is_valid_pixel(c, r) {
                    continue;
                }
                let value = back.sample(0, c, r).unwrap();
                assert!((value - col as f32).abs() <= 1.5, "{value} vs {col}");
                checked += 1;
            }
        }
        assert!(checked > 30);
    }

    #[test]
    fn test_nodata_filled_and_masked() {
        let t = GeoTransform::from_origin(0.0, 200.0, 100.0, 100.0);
        let src = Raster::from_vec(2, 2, 1, vec![5u8, 0, 7, 9], Crs::WEB_MERCATOR, t)
            .unwrap()
            .with_nodata(Some(0.0));
        let out = Reprojector::new(&src).nodata(3.0).reproject().unwrap();
        let mask = out.mask().unwrap();
        assert_eq!(mask[(0, 1)], MASK_EMPTY);
        assert_eq!(out.sample(0, 1, 0), Some(3));
        assert_eq!(mask[(1, 1)], MASK_VALID);
        assert_eq!(out.sample(0, 1, 1), Some(9));
        assert_eq!(out.nodata(), Some(0.0));
    }

    #[test]
    fn test_bilinear_ignores_nodata_neighbours() {
        let t = GeoTransform::from_origin(0.0, 20.0, 10.0, 10.0);
        let src = Raster::from_vec(2, 2, 1, vec![10.0f32, -1.0, 30.0, 50.0], Crs::WEB_MERCATOR, t)
            .unwrap()
            .with_nodata(Some(-1.0));
        let sampler = Sampler::new(&src, ResamplingMethod::Bilinear);
        let mut out = [0.0f32];
        // Exactly between all four centres: the nodata pixel is dropped
        assert!(sampler.sample(1.0, 1.0, &mut out));
        assert!((out[0] - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_nodata_band_stays_nodata() {
        // Band 2 is nodata in column 0 only; band 1 keeps every pixel valid
        let mut data = Vec::new();
        for _row in 0..4 {
            for (col, value) in [-9999.0f32, 100.0, 150.0, 200.0].into_iter().enumerate() {
                data.extend([col as f32 + 1.0, value]);
            }
        }
        let t = GeoTransform::from_origin(0.0, 40.0, 10.0, 10.0);
        let src = Raster::from_vec(4, 4, 2, data, Crs::WEB_MERCATOR, t)
            .unwrap()
            .with_nodata(Some(-9999.0));

        let out = Reprojector::new(&src)
            .resampling(Some(ResamplingMethod::Bilinear))
            .nodata(0.0)
            .reproject()
            .unwrap();
        assert_eq!((out.width(), out.height()), (4, 4));
        assert!(out.is_valid_pixel(0, 0));
        assert_eq!(out.sample(0, 0, 0), Some(1.0));
        assert!(out.is_nodata(out.sample(1, 0, 0).unwrap()));
        assert_eq!(out.sample(1, 1, 0), Some(100.0));

        let ranges = crate::normalize::band_ranges(&out, 2);
        assert_eq!((ranges[1].min, ranges[1].max), (100.0, 200.0));
        assert_eq!(ranges[1].valid_count, 12);

        let normalized = crate::normalize::normalize(&out, &Default::default()).unwrap();
        let row: Vec<u8> = (0..4).map(|col| normalized.sample(1, col, 0).unwrap()).collect();
        assert_eq!(row, vec![0, 0, 128, 255]);
    }

    #[test]
    fn test_nan_band_without_nodata_stays_nan() {
        let t = GeoTransform::from_origin(0.0, 20.0, 10.0, 10.0);
        let data = vec![1.0f32, f32::NAN, 2.0, f32::NAN, 3.0, f32::NAN, 4.0, f32::NAN];
        let src = Raster::from_vec(2, 2, 2, data, Crs::WEB_MERCATOR, t).unwrap();
        let sampler = Sampler::new(&src, ResamplingMethod::Bilinear);
        let mut out = [0.0f32; 2];
        assert!(sampler.sample(1.0, 1.0, &mut out));
        assert!((out[0] - 2.5).abs() < 1e-6);
        assert!(out[1].is_nan());
    }

    #[test]
    fn test_raster_beyond_mercator_limit_is_unsupported() {
        let polar = GeoTransform::from_origin(-180.0, 90.0, 1.0, 1.0);
        let src = Raster::from_vec(4, 2, 1, vec![0.0f32; 8], Crs::WGS84, polar).unwrap();
        let err = Reprojector::new(&src).reproject().unwrap_err();
        assert!(matches!(err, Error::UnsupportedProjection(_)), "{err}");
    }
}
