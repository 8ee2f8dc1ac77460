//! In-memory geo-referenced raster.
//!
//! Pixels are stored pixel-interleaved in an `Array3` of shape
//! `(height, width, bands)`, always in standard (row-major) layout so the
//! buffer can be handed to encoders as one contiguous slice.

use std::fmt;

use ndarray::{Array2, Array3};

use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::geometry::projection::Crs;
use crate::geometry::transform::GeoTransform;

/// Mask value for pixels holding data
pub const MASK_VALID: u8 = 255;
/// Mask value for pixels without data
pub const MASK_EMPTY: u8 = 0;

/// Numeric type of one raster sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::F32 => 4,
            SampleType::F64 => 8,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleType::U8 => "u8",
            SampleType::I8 => "i8",
            SampleType::U16 => "u16",
            SampleType::I16 => "i16",
            SampleType::U32 => "u32",
            SampleType::I32 => "i32",
            SampleType::F32 => "f32",
            SampleType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A primitive type that can be stored in a [`Raster`].
pub trait Sample: Copy + Default + PartialOrd + Send + Sync + fmt::Debug + 'static {
    const TYPE: SampleType;

    fn to_f64(self) -> f64;

    /// Convert back from `f64`, rounding integers and saturating at the
    /// type's bounds. NaN becomes zero for integer types.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_int_sample {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl Sample for $t {
                const TYPE: SampleType = SampleType::$variant;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    // float -> int `as` casts saturate and map NaN to 0
                    value.round() as $t
                }
            }
        )*
    };
}

impl_int_sample!(u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32);

impl Sample for f32 {
    const TYPE: SampleType = SampleType::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Sample for f64 {
    const TYPE: SampleType = SampleType::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Immutable geo-referenced raster.
#[derive(Debug, Clone)]
pub struct Raster<T: Sample> {
    pixels: Array3<T>,
    crs: Crs,
    transform: GeoTransform,
    bounds: BoundingBox,
    nodata: Option<f64>,
    mask: Option<Array2<u8>>,
}

impl<T: Sample> Raster<T> {
    /// # Errors
    /// Returns [`Error::InvalidRaster`] for zero dimensions or a transform
    /// that is not finite and invertible.
    pub fn new(pixels: Array3<T>, crs: Crs, transform: GeoTransform) -> Result<Self> {
        let (height, width, bands) = pixels.dim();
        if width == 0 || height == 0 || bands == 0 {
            return Err(Error::InvalidRaster(format!(
                "zero dimension: {width}x{height} with {bands} bands"
            )));
        }
        if transform.inverse().is_none() {
            return Err(Error::InvalidRaster("geotransform is not invertible".into()));
        }
        let bounds = transform
            .bounds(width, height, crs)
            .ok_or_else(|| Error::InvalidRaster("geotransform is not finite".into()))?;

        let pixels = if pixels.is_standard_layout() {
            pixels
        } else {
            pixels.as_standard_layout().into_owned()
        };

        Ok(Self {
            pixels,
            crs,
            transform,
            bounds,
            nodata: None,
            mask: None,
        })
    }

    /// Build from a pixel-interleaved, row-major buffer.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRaster`] if `data` does not hold exactly
    /// `width * height * bands` samples, plus the checks of [`Raster::new`].
    pub fn from_vec(
        width: usize,
        height: usize,
        bands: usize,
        data: Vec<T>,
        crs: Crs,
        transform: GeoTransform,
    ) -> Result<Self> {
        let expected = width * height * bands;
        if data.len() != expected {
            return Err(Error::InvalidRaster(format!(
                "expected {expected} samples for {width}x{height}x{bands}, got {}",
                data.len()
            )));
        }
        let pixels = Array3::from_shape_vec((height, width, bands), data)
            .map_err(|e| Error::InvalidRaster(e.to_string()))?;
        Self::new(pixels, crs, transform)
    }

    /// Attach the sentinel value marking samples without data
    #[must_use]
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Attach a validity mask of shape `(height, width)`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRaster`] if the mask shape does not match.
    pub fn with_mask(mut self, mask: Array2<u8>) -> Result<Self> {
        if mask.dim() != (self.height(), self.width()) {
            return Err(Error::InvalidRaster(format!(
                "mask is {:?}, raster is {}x{}",
                mask.dim(),
                self.height(),
                self.width()
            )));
        }
        self.mask = Some(mask);
        Ok(self)
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    #[inline]
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.pixels.dim().2
    }

    #[must_use]
    pub fn sample_type(&self) -> SampleType {
        T::TYPE
    }

    #[must_use]
    pub fn crs(&self) -> Crs {
        self.crs
    }

    #[must_use]
    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// World extent in the raster's own CRS
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    #[must_use]
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    #[must_use]
    pub fn mask(&self) -> Option<&Array2<u8>> {
        self.mask.as_ref()
    }

    #[must_use]
    pub fn pixels(&self) -> &Array3<T> {
        &self.pixels
    }

    /// Contiguous pixel-interleaved samples
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.pixels.as_slice().unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn sample(&self, band: usize, col: usize, row: usize) -> Option<T> {
        self.pixels.get((row, col, band)).copied()
    }

    /// True if the mask (when present) marks the pixel as holding data
    #[inline]
    #[must_use]
    pub fn is_valid_pixel(&self, col: usize, row: usize) -> bool {
        match &self.mask {
            Some(mask) => mask.get((row, col)).is_some_and(|&m| m != MASK_EMPTY),
            None => col < self.width() && row < self.height(),
        }
    }

    /// True if `value` is NaN/infinite or equals the nodata sentinel
    #[inline]
    #[must_use]
    pub fn is_nodata(&self, value: T) -> bool {
        let v = value.to_f64();
        if !v.is_finite() {
            return true;
        }
        match self.nodata {
            Some(nd) if nd.is_nan() => false,
            Some(nd) => v == nd,
            None => false,
        }
    }
}

/// A raster of any supported sample type, as produced by the reader.
#[derive(Debug, Clone)]
pub enum AnyRaster {
    U8(Raster<u8>),
    I8(Raster<i8>),
    U16(Raster<u16>),
    I16(Raster<i16>),
    U32(Raster<u32>),
    I32(Raster<i32>),
    F32(Raster<f32>),
    F64(Raster<f64>),
}

/// Run the same generic expression against whichever raster an
/// [`AnyRaster`] holds.
#[macro_export]
macro_rules! with_any_raster {
    ($raster:expr, $r:ident => $body:expr) => {
        match $raster {
            $crate::raster::AnyRaster::U8($r) => $body,
            $crate::raster::AnyRaster::I8($r) => $body,
            $crate::raster::AnyRaster::U16($r) => $body,
            $crate::raster::AnyRaster::I16($r) => $body,
            $crate::raster::AnyRaster::U32($r) => $body,
            $crate::raster::AnyRaster::I32($r) => $body,
            $crate::raster::AnyRaster::F32($r) => $body,
            $crate::raster::AnyRaster::F64($r) => $body,
        }
    };
}

macro_rules! impl_from_raster {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Raster<$t>> for AnyRaster {
                fn from(raster: Raster<$t>) -> Self {
                    AnyRaster::$variant(raster)
                }
            }
        )*
    };
}

impl_from_raster!(
    u8 => U8, i8 => I8, u16 => U16, i16 => I16,
    u32 => U32, i32 => I32, f32 => F32, f64 => F64,
);

impl AnyRaster {
    #[must_use]
    pub fn width(&self) -> usize {
        with_any_raster!(self, r => r.width())
    }

    #[must_use]
    pub fn height(&self) -> usize {
        with_any_raster!(self, r => r.height())
    }

    #[must_use]
    pub fn band_count(&self) -> usize {
        with_any_raster!(self, r => r.band_count())
    }

    #[must_use]
    pub fn sample_type(&self) -> SampleType {
        with_any_raster!(self, r => r.sample_type())
    }

    #[must_use]
    pub fn crs(&self) -> Crs {
        with_any_raster!(self, r => r.crs())
    }

    #[must_use]
    pub fn transform(&self) -> GeoTransform {
        with_any_raster!(self, r => *r.transform())
    }

    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        with_any_raster!(self, r => r.bounds())
    }

    #[must_use]
    pub fn nodata(&self) -> Option<f64> {
        with_any_raster!(self, r => r.nodata())
    }
}
