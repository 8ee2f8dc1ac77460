//! Affine pixel <-> world transform.
//!
//! Coefficients use the GDAL ordering:
//!
//! ```text
//! x = c[0] + col * c[1] + row * c[2]
//! y = c[3] + col * c[4] + row * c[5]
//! ```
//!
//! where `(col, row)` are pixel-edge coordinates, so the center of pixel
//! `(i, j)` is `(i + 0.5, j + 0.5)`.

use super::projection::Crs;
use super::{BoundingBox, Point};

/// Affine transform mapping pixel coordinates to world coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    coefficients: [f64; 6],
}

impl GeoTransform {
    #[must_use]
    pub fn new(coefficients: [f64; 6]) -> Self {
        Self { coefficients }
    }

    /// North-up transform from the top-left corner and pixel size.
    ///
    /// `pixel_height` is the ground size of a row and is stored negated.
    #[must_use]
    pub fn from_origin(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    /// Build from GeoTIFF `ModelTiepoint` (I, J, K, X, Y, Z) and
    /// `ModelPixelScale` (ScaleX, ScaleY, ScaleZ) tags.
    #[must_use]
    pub fn from_tiepoint(tiepoint: &[f64], scale: &[f64]) -> Option<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 || scale[0] == 0.0 || scale[1] == 0.0 {
            return None;
        }
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        Some(Self::from_origin(origin_x, origin_y, scale[0], scale[1]))
    }

    /// Build from a GeoTIFF `ModelTransformation` 4x4 row-major matrix
    #[must_use]
    pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 16 {
            return None;
        }
        let transform = Self::new([matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5]]);
        if transform.determinant() == 0.0 {
            return None;
        }
        Some(transform)
    }

    #[inline]
    #[must_use]
    pub fn coefficients(&self) -> [f64; 6] {
        self.coefficients
    }

    /// Ground size of one pixel along each pixel axis
    #[must_use]
    pub fn pixel_size(&self) -> (f64, f64) {
        let c = &self.coefficients;
        (c[1].hypot(c[4]), c[2].hypot(c[5]))
    }

    fn determinant(&self) -> f64 {
        let c = &self.coefficients;
        c[1] * c[5] - c[2] * c[4]
    }

    #[inline]
    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> Point {
        let c = &self.coefficients;
        Point::new(
            c[0] + col * c[1] + row * c[2],
            c[3] + col * c[4] + row * c[5],
        )
    }

    /// Inverse transform, `None` if the matrix is singular
    #[must_use]
    pub fn inverse(&self) -> Option<GeoTransform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let [c0, a, b, f, d, e] = self.coefficients;
        let inv_a = e / det;
        let inv_b = -b / det;
        let inv_d = -d / det;
        let inv_e = a / det;
        Some(Self::new([
            -(inv_a * c0 + inv_b * f),
            inv_a,
            inv_b,
            -(inv_d * c0 + inv_e * f),
            inv_d,
            inv_e,
        ]))
    }

    /// Convert world coordinates to fractional pixel coordinates
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.inverse()?.pixel_to_world(x, y);
        Some((p.x, p.y))
    }

    /// World extent of a `width` x `height` raster, `None` for non-finite coefficients
    #[must_use]
    pub fn bounds(&self, width: usize, height: usize, crs: Crs) -> Option<BoundingBox> {
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(w, 0.0),
            self.pixel_to_world(0.0, h),
            self.pixel_to_world(w, h),
        ];
        if !corners.iter().all(Point::is_finite) {
            return None;
        }
        BoundingBox::enclosing(corners, crs)
    }
}
