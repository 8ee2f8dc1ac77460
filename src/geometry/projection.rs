//! Coordinate reference systems and point projection.
//!
//! A [`Crs`] is an EPSG code resolved to a PROJ string through the
//! `crs-definitions` database, so only codes the database knows can be
//! constructed. Transforms run through `proj4rs` (pure Rust). The
//! EPSG:4326 <-> EPSG:3857 pair, which every tile run goes through, uses
//! inline spherical Mercator math instead.

use std::f64::consts::PI;
use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{Error, Result};

/// Half the earth's circumference in Web Mercator meters
pub const HALF_EARTH: f64 = 20_037_508.342_789_244;

/// Latitude at which Web Mercator becomes a square world
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

const EARTH_RADIUS: f64 = 6_378_137.0;

/// A coordinate reference system identified by its EPSG code.
///
/// Two values are equal iff their codes are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u16,
}

impl Crs {
    /// WGS 84 longitude/latitude
    pub const WGS84: Crs = Crs { epsg: 4326 };
    /// WGS 84 / Pseudo-Mercator, the web map projection
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };

    /// Resolve an EPSG code.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedProjection`] if the code is not in the
    /// crs-definitions database.
    pub fn from_epsg(code: u32) -> Result<Self> {
        let epsg = u16::try_from(code)
            .map_err(|_| Error::UnsupportedProjection(format!("EPSG:{code} is out of range")))?;
        if crs_definitions::from_code(epsg).is_none() {
            return Err(Error::UnsupportedProjection(format!(
                "EPSG:{code} is not in the crs-definitions database"
            )));
        }
        Ok(Self { epsg })
    }

    #[inline]
    #[must_use]
    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    /// PROJ4 definition for this CRS
    #[must_use]
    pub fn proj_string(&self) -> Option<&'static str> {
        crs_definitions::from_code(self.epsg).map(|def| def.proj4)
    }

    /// Check if this CRS uses longitude/latitude degrees
    #[must_use]
    pub fn is_geographic(&self) -> bool {
        match self.proj_string() {
            Some(proj_str) => proj_str.contains("+proj=longlat"),
            None => (4000..5000).contains(&self.epsg),
        }
    }

    fn to_proj(self) -> Result<Proj> {
        let proj_str = self.proj_string().ok_or_else(|| {
            Error::UnsupportedProjection(format!("{self} has no PROJ definition"))
        })?;
        Proj::from_proj_string(proj_str)
            .map_err(|e| Error::UnsupportedProjection(format!("invalid projection {self}: {e:?}")))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Longitude/latitude (degrees) to Web Mercator meters.
///
/// Latitudes beyond the Mercator limit are clamped to it.
#[inline]
#[must_use]
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let x = lon * HALF_EARTH / 180.0;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

/// Web Mercator meters to longitude/latitude (degrees)
#[inline]
#[must_use]
pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 180.0 / HALF_EARTH;
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Transformation strategy - either fast inline math or proj4rs for everything else
enum TransformStrategy {
    Identity,
    GeoToMerc,
    MercToGeo,
    Proj4rs {
        source: Proj,
        target: Proj,
        source_is_geographic: bool,
        target_is_geographic: bool,
    },
}

/// Reusable point transformer between two CRSs.
///
/// Building the `proj4rs` projections is the expensive part, so the
/// reprojector builds one transformer per worker and reuses it per pixel.
pub struct CoordTransformer {
    source: Crs,
    target: Crs,
    strategy: TransformStrategy,
}

impl CoordTransformer {
    /// # Errors
    /// Returns [`Error::UnsupportedProjection`] if either CRS cannot be parsed
    /// by proj4rs.
    pub fn new(source: Crs, target: Crs) -> Result<Self> {
        let strategy = match (source, target) {
            (s, t) if s == t => TransformStrategy::Identity,
            (Crs::WGS84, Crs::WEB_MERCATOR) => TransformStrategy::GeoToMerc,
            (Crs::WEB_MERCATOR, Crs::WGS84) => TransformStrategy::MercToGeo,
            _ => TransformStrategy::Proj4rs {
                source: source.to_proj()?,
                target: target.to_proj()?,
                source_is_geographic: source.is_geographic(),
                target_is_geographic: target.is_geographic(),
            },
        };
        Ok(Self {
            source,
            target,
            strategy,
        })
    }

    #[must_use]
    pub fn source(&self) -> Crs {
        self.source
    }

    #[must_use]
    pub fn target(&self) -> Crs {
        self.target
    }

    /// Transform a single point from the source CRS to the target CRS
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedProjection`] if proj4rs rejects the point
    /// or produces a non-finite result.
    #[inline]
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match &self.strategy {
            TransformStrategy::Identity => Ok((x, y)),
            TransformStrategy::GeoToMerc => Ok(lon_lat_to_mercator(x, y)),
            TransformStrategy::MercToGeo => Ok(mercator_to_lon_lat(x, y)),
            TransformStrategy::Proj4rs {
                source,
                target,
                source_is_geographic,
                target_is_geographic,
            } => {
                // proj4rs uses radians for geographic coordinates
                let mut point = if *source_is_geographic {
                    (x.to_radians(), y.to_radians(), 0.0)
                } else {
                    (x, y, 0.0)
                };
                transform(source, target, &mut point).map_err(|e| {
                    Error::UnsupportedProjection(format!(
                        "transform from {} to {} failed: {e:?}",
                        self.source, self.target
                    ))
                })?;
                let (out_x, out_y) = if *target_is_geographic {
                    (point.0.to_degrees(), point.1.to_degrees())
                } else {
                    (point.0, point.1)
                };
                if out_x.is_finite() && out_y.is_finite() {
                    Ok((out_x, out_y))
                } else {
                    Err(Error::UnsupportedProjection(format!(
                        "({x}, {y}) has no finite image in {}",
                        self.target
                    )))
                }
            }
        }
    }
}

/// Project a single point from one CRS to another.
///
/// Builds a fresh [`CoordTransformer`]; use one directly for many points.
///
/// # Errors
/// See [`CoordTransformer::transform`].
pub fn project_point(source: Crs, target: Crs, x: f64, y: f64) -> Result<(f64, f64)> {
    if source == target {
        return Ok((x, y));
    }
    CoordTransformer::new(source, target)?.transform(x, y)
}
