//! Dynamic-range normalization to 8-bit
//!
//! Linearly stretches each band (or all bands together) from its observed
//! `[min, max]` onto `[0, 255]`. Statistics skip non-finite samples, nodata
//! samples and pixels masked out by the reprojection.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::raster::{Raster, Sample};

/// Output value of a band whose samples are all equal
pub const DEGENERATE_FILL: u8 = 128;

/// Normalization settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Stretch every band on its own range; otherwise share one range
    pub per_band: bool,
    /// Keep only the first three bands
    pub rgb: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            per_band: true,
            rgb: false,
        }
    }
}

/// Value range of one band over its valid samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandRange {
    pub min: f64,
    pub max: f64,
    pub valid_count: usize,
}

impl BandRange {
    fn is_degenerate(&self) -> bool {
        self.valid_count == 0 || self.max <= self.min
    }

    fn merge(self, other: BandRange) -> BandRange {
        match (self.valid_count, other.valid_count) {
            (0, _) => other,
            (_, 0) => self,
            _ => BandRange {
                min: self.min.min(other.min),
                max: self.max.max(other.max),
                valid_count: self.valid_count + other.valid_count,
            },
        }
    }

    #[inline]
    fn scale(&self, value: f64) -> u8 {
        let scaled = ((value - self.min) * 255.0 / (self.max - self.min)).round();
        scaled.clamp(0.0, 255.0) as u8
    }
}

const EMPTY_RANGE: BandRange = BandRange {
    min: f64::INFINITY,
    max: f64::NEG_INFINITY,
    valid_count: 0,
};

/// Per-band value ranges over the first `bands` bands
#[must_use]
pub fn band_ranges<T: Sample>(raster: &Raster<T>, bands: usize) -> Vec<BandRange> {
    let stride = raster.band_count();
    let width = raster.width();
    let mut ranges = vec![EMPTY_RANGE; bands];

    for (index, pixel) in raster.as_slice().chunks_exact(stride).enumerate() {
        if !raster.is_valid_pixel(index % width, index / width) {
            continue;
        }
        for (range, &value) in ranges.iter_mut().zip(pixel) {
            if raster.is_nodata(value) {
                continue;
            }
            let v = value.to_f64();
            range.min = range.min.min(v);
            range.max = range.max.max(v);
            range.valid_count += 1;
        }
    }
    ranges
}

/// Rescale `raster` to 8-bit samples.
///
/// Sample `v` of a band with range `[min, max]` becomes
/// `round((v - min) * 255 / (max - min))`, clamped. A band with
/// `max == min`, or without any valid sample, is filled with
/// [`DEGENERATE_FILL`] and reported as a warning. Invalid pixels and nodata
/// samples become 0; the validity mask is carried over unchanged.
///
/// # Errors
/// Returns [`Error::InvalidConfig`] if RGB output is requested for a raster
/// with fewer than three bands.
pub fn normalize<T: Sample>(raster: &Raster<T>, options: &NormalizeOptions) -> Result<Raster<u8>> {
    let stride = raster.band_count();
    let bands = if options.rgb {
        if stride < 3 {
            return Err(Error::InvalidConfig(format!(
                "RGB output needs at least 3 bands, raster has {stride}"
            )));
        }
        3
    } else {
        stride
    };

    let mut ranges = band_ranges(raster, bands);
    if !options.per_band {
        let global = ranges.iter().copied().fold(EMPTY_RANGE, BandRange::merge);
        ranges = vec![global; bands];
    }
    for (band, range) in ranges.iter().enumerate() {
        if range.is_degenerate() {
            warn!(
                band,
                min = range.min,
                max = range.max,
                valid = range.valid_count,
                "degenerate band, filling with constant {DEGENERATE_FILL}"
            );
        } else {
            debug!(band, min = range.min, max = range.max, "band range");
        }
    }

    let (width, height) = (raster.width(), raster.height());
    let mut data = vec![0u8; width * height * bands];
    data.par_chunks_mut(width * bands)
        .zip(raster.as_slice().par_chunks(width * stride))
        .enumerate()
        .for_each(|(row, (out_row, in_row))| {
            let pixels = out_row
                .chunks_exact_mut(bands)
                .zip(in_row.chunks_exact(stride))
                .enumerate();
            for (col, (out, pixel)) in pixels {
                if !raster.is_valid_pixel(col, row) {
                    continue;
                }
                for (band, range) in ranges.iter().enumerate() {
                    let value = pixel[band];
                    out[band] = if range.is_degenerate() {
                        DEGENERATE_FILL
                    } else if raster.is_nodata(value) {
                        0
                    } else {
                        range.scale(value.to_f64())
                    };
                }
            }
        });

    let normalized = Raster::from_vec(width, height, bands, data, raster.crs(), *raster.transform())?;
    match raster.mask() {
        Some(mask) => normalized.with_mask(mask.clone()),
        None => Ok(normalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::projection::Crs;
    use crate::geometry::transform::GeoTransform;
    use crate::raster::{MASK_EMPTY, MASK_VALID};
    use ndarray::Array2;

    fn raster<T: Sample>(width: usize, height: usize, bands: usize, data: Vec<T>) -> Raster<T> {
        let t = GeoTransform::from_origin(0.0, 100.0, 1.0, 1.0);
        Raster::from_vec(width, height, bands, data, Crs::WEB_MERCATOR, t).unwrap()
    }

    #[test]
    fn test_min_max_map_to_full_range() {
        let src = raster(4, 1, 1, vec![100u16, 200, 300, 1100]);
        let out = normalize(&src, &NormalizeOptions::default()).unwrap();
        assert_eq!(out.as_slice(), &[0, 26, 51, 255]);
    }

    #[test]
    fn test_float_band_with_negative_values() {
        let src = raster(3, 1, 1, vec![-1.0f32, 0.0, 1.0]);
        let out = normalize(&src, &NormalizeOptions::default()).unwrap();
        assert_eq!(out.as_slice(), &[0, 128, 255]);
    }

    #[test]
    fn test_degenerate_band_is_mid_gray() {
        let src = raster(2, 2, 1, vec![42.0f64; 4]);
        let out = normalize(&src, &NormalizeOptions::default()).unwrap();
        assert!(out.as_slice().iter().all(|&v| v == DEGENERATE_FILL));
    }

    #[test]
    fn test_per_band_ranges_are_independent() {
        // Band 0 spans 0..10, band 1 spans 1000..2000, band 2 is constant
        let src = raster(2, 1, 3, vec![0i32, 1000, 5, 10, 2000, 5]);
        let out = normalize(&src, &NormalizeOptions::default()).unwrap();
        assert_eq!(out.as_slice(), &[0, 0, 128, 255, 255, 128]);
    }

    #[test]
    fn test_global_range_is_shared() {
        let src = raster(2, 1, 2, vec![0u16, 100, 50, 200]);
        let options = NormalizeOptions {
            per_band: false,
            ..Default::default()
        };
        let out = normalize(&src, &options).unwrap();
        assert_eq!(out.as_slice(), &[0, 128, 64, 255]);
    }

    #[test]
    fn test_nodata_and_nan_excluded_from_range() {
        let src = raster(4, 1, 1, vec![-9999.0f32, 10.0, f32::NAN, 20.0]).with_nodata(Some(-9999.0));
        let ranges = band_ranges(&src, 1);
        assert_eq!(ranges[0].min, 10.0);
        assert_eq!(ranges[0].max, 20.0);
        assert_eq!(ranges[0].valid_count, 2);

        let out = normalize(&src, &NormalizeOptions::default()).unwrap();
        assert_eq!(out.as_slice(), &[0, 0, 0, 255]);
    }

    #[test]
    fn test_mask_carried_over() {
        let mask = Array2::from_shape_vec((1, 3), vec![MASK_VALID, MASK_EMPTY, MASK_VALID]).unwrap();
        let src = raster(3, 1, 1, vec![0u16, 60000, 100]).with_mask(mask).unwrap();
        let out = normalize(&src, &NormalizeOptions::default()).unwrap();
        // The masked 60000 does not stretch the range
        assert_eq!(out.as_slice(), &[0, 0, 255]);
        assert_eq!(out.mask().unwrap()[(0, 1)], MASK_EMPTY);
    }

    #[test]
    fn test_rgb_reduction() {
        let src = raster(1, 2, 4, vec![0u8, 0, 0, 7, 10, 20, 30, 9]);
        let options = NormalizeOptions {
            rgb: true,
            ..Default::default()
        };
        let out = normalize(&src, &options).unwrap();
        assert_eq!(out.band_count(), 3);
        assert_eq!(out.as_slice(), &[0, 0, 0, 255, 255, 255]);

        let gray = raster(1, 1, 1, vec![1u8]);
        assert!(matches!(normalize(&gray, &options), Err(Error::InvalidConfig(_))));
    }
}
