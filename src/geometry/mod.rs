pub mod projection;
pub mod transform;

use crate::error::{Error, Result};
use projection::{CoordTransformer, Crs};

/// Points sampled along each edge when a box is projected to another CRS
const EDGE_SAMPLES: usize = 21;

/// A simple 2D point in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// X coordinate (longitude for geographic points)
    pub x: f64,
    /// Y coordinate (latitude for geographic points)
    pub y: f64,
}

impl Point {
    #[inline]
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Calculate Euclidean distance to another point.
    #[inline]
    #[must_use]
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    #[inline]
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

impl From<Point> for (f64, f64) {
    #[inline]
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// Axis-aligned bounding box tagged with the CRS its coordinates live in.
///
/// Invariant: `min <= max` on both axes. Coordinates only move between CRSs
/// through [`BoundingBox::to_crs`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
    crs: Crs,
}

impl BoundingBox {
    /// # Errors
    /// Returns [`Error::InvalidBounds`] if a coordinate is NaN or a minimum
    /// exceeds its maximum.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: Crs) -> Result<Self> {
        if [min_x, min_y, max_x, max_y].iter().any(|v| v.is_nan()) {
            return Err(Error::InvalidBounds("coordinates must not be NaN".into()));
        }
        if min_x > max_x || min_y > max_y {
            return Err(Error::InvalidBounds(format!(
                "min ({min_x}, {min_y}) exceeds max ({max_x}, {max_y})"
            )));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
            crs,
        })
    }

    /// Box from coordinates already known to be finite and ordered
    pub(crate) fn from_ordered(min_x: f64, min_y: f64, max_x: f64, max_y: f64, crs: Crs) -> Self {
        debug_assert!(min_x <= max_x && min_y <= max_y);
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
            crs,
        }
    }

    /// Smallest box enclosing every finite point, or `None` if there is none.
    pub fn enclosing<I>(points: I, crs: Crs) -> Option<Self>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for p in points.into_iter().filter(Point::is_finite) {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        if min_x > max_x {
            return None;
        }
        Some(Self {
            min_x,
            min_y,
            max_x,
            max_y,
            crs,
        })
    }

    #[inline]
    #[must_use]
    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    #[inline]
    #[must_use]
    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    #[inline]
    #[must_use]
    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    #[inline]
    #[must_use]
    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    #[inline]
    #[must_use]
    pub fn crs(&self) -> Crs {
        self.crs
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Closed-interval intersection test; touching edges count.
    ///
    /// Boxes in different CRSs never intersect.
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.crs == other.crs
            && self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// True if `other` lies inside this box, allowing `tolerance` of slack.
    #[must_use]
    pub fn contains(&self, other: &BoundingBox, tolerance: f64) -> bool {
        self.crs == other.crs
            && self.min_x - tolerance <= other.min_x
            && self.min_y - tolerance <= other.min_y
            && self.max_x + tolerance >= other.max_x
            && self.max_y + tolerance >= other.max_y
    }

    /// Points along the four edges, corners included.
    fn edge_points(&self) -> Vec<Point> {
        let steps = EDGE_SAMPLES - 1;
        let mut points = Vec::with_capacity(EDGE_SAMPLES * 4);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            points.push(Point::new(x, self.min_y));
            points.push(Point::new(x, self.max_y));
            points.push(Point::new(self.min_x, y));
            points.push(Point::new(self.max_x, y));
        }
        points
    }

    /// Project into `target`, returning the box enclosing the densified edges.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedProjection`] if no conversion path exists
    /// or no edge point has a finite image in `target`.
    pub fn to_crs(&self, target: Crs) -> Result<BoundingBox> {
        if self.crs == target {
            return Ok(*self);
        }
        let transformer = CoordTransformer::new(self.crs, target)?;
        let projected = self
            .edge_points()
            .into_iter()
            .filter_map(|p| transformer.transform(p.x, p.y).ok())
            .map(Point::from);

        BoundingBox::enclosing(projected, target).ok_or_else(|| {
            Error::UnsupportedProjection(format!(
                "bounding box has no finite image in {target}"
            ))
        })
    }
}
