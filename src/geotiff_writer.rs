//! GeoTIFF writer for in-memory rasters
//!
//! Writes a [`Raster`] (wrapped in an [`AnyRaster`]) with the tags the
//! reader in [`crate::source`] understands: pixel scale and tiepoint (or a
//! model transformation for rotated grids), a GeoKey directory carrying the
//! EPSG code, and `GDAL_NODATA`. Used to dump the reprojected raster of a
//! run and to build fixtures.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tiff::encoder::colortype::{
    ColorType, Gray16, Gray32Float, Gray64Float, Gray8, RGB16, RGB32Float, RGB8, RGBA16,
    RGBA32Float, RGBA8,
};
use tiff::encoder::compression::DeflateLevel;
use tiff::encoder::{Compression, DirectoryEncoder, TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;

use crate::error::{Error, Result};
use crate::raster::{AnyRaster, Raster, Sample};

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    #[default]
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression - better compression, slower
    Deflate,
}

fn encode_error(e: impl std::fmt::Display) -> Error {
    Error::GeoTiffWrite(e.to_string())
}

/// Builder for configuring GeoTIFF output
pub struct GeoTiffWriter<'a> {
    raster: &'a AnyRaster,
    compression: GeoTiffCompression,
}

impl<'a> GeoTiffWriter<'a> {
    #[must_use]
    pub fn new(raster: &'a AnyRaster) -> Self {
        Self {
            raster,
            compression: GeoTiffCompression::default(),
        }
    }

    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Write to a file path
    ///
    /// # Errors
    /// Returns [`Error::GeoTiffWrite`] on I/O or encoding failures and for
    /// sample type / band count combinations without a TIFF colour type.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let file = File::create(path).map_err(encode_error)?;
        self.write_to(BufWriter::new(file))
    }

    /// Write to any writer that implements Write + Seek
    ///
    /// # Errors
    /// See [`GeoTiffWriter::write`].
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let compression = match self.compression {
            GeoTiffCompression::None => Compression::Uncompressed,
            GeoTiffCompression::Lzw => Compression::Lzw,
            GeoTiffCompression::Deflate => Compression::Deflate(DeflateLevel::Fast),
        };
        let mut encoder = TiffEncoder::new(writer)
            .map_err(encode_error)?
            .with_compression(compression);

        match (self.raster, self.raster.band_count()) {
            (AnyRaster::U8(r), 1) => write_image::<Gray8, _>(&mut encoder, r),
            (AnyRaster::U8(r), 3) => write_image::<RGB8, _>(&mut encoder, r),
            (AnyRaster::U8(r), 4) => write_image::<RGBA8, _>(&mut encoder, r),
            (AnyRaster::U16(r), 1) => write_image::<Gray16, _>(&mut encoder, r),
            (AnyRaster::U16(r), 3) => write_image::<RGB16, _>(&mut encoder, r),
            (AnyRaster::U16(r), 4) => write_image::<RGBA16, _>(&mut encoder, r),
            (AnyRaster::F32(r), 1) => write_image::<Gray32Float, _>(&mut encoder, r),
            (AnyRaster::F32(r), 3) => write_image::<RGB32Float, _>(&mut encoder, r),
            (AnyRaster::F32(r), 4) => write_image::<RGBA32Float, _>(&mut encoder, r),
            (AnyRaster::F64(r), 1) => write_image::<Gray64Float, _>(&mut encoder, r),
            (raster, bands) => Err(Error::GeoTiffWrite(format!(
                "no TIFF colour type for {bands} band(s) of {}",
                raster.sample_type()
            ))),
        }
    }
}

fn write_image<C, W>(encoder: &mut TiffEncoder<W>, raster: &Raster<C::Inner>) -> Result<()>
where
    C: ColorType,
    C::Inner: Sample,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut image = encoder
        .new_image::<C>(raster.width() as u32, raster.height() as u32)
        .map_err(encode_error)?;
    write_geotiff_tags(image.encoder(), raster)?;
    image.write_data(raster.as_slice()).map_err(encode_error)
}

fn write_geotiff_tags<W, K, T>(dir: &mut DirectoryEncoder<'_, W, K>, raster: &Raster<T>) -> Result<()>
where
    W: Write + Seek,
    K: TiffKind,
    T: Sample,
{
    let [c0, a, b, f, d, e] = raster.transform().coefficients();
    if b == 0.0 && d == 0.0 && e < 0.0 {
        // ModelPixelScale + ModelTiepoint tying pixel (0, 0) to the origin
        dir.write_tag(Tag::ModelPixelScaleTag, &[a, -e, 0.0][..])
            .map_err(encode_error)?;
        dir.write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, c0, f, 0.0][..])
            .map_err(encode_error)?;
    } else {
        let matrix = [
            a, b, 0.0, c0, //
            d, e, 0.0, f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::ModelTransformationTag, &matrix[..])
            .map_err(encode_error)?;
    }

    let crs = raster.crs();
    let (model_type, crs_key) = if crs.is_geographic() {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY)
    };
    let geokeys: [u16; 16] = [
        1, 1, 0, 3, // KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys
        GT_MODEL_TYPE_GEO_KEY, 0, 1, model_type,
        GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
        crs_key, 0, 1, crs.epsg(),
    ];
    dir.write_tag(Tag::GeoKeyDirectoryTag, &geokeys[..])
        .map_err(encode_error)?;

    if let Some(nodata) = raster.nodata() {
        dir.write_tag(Tag::GdalNodata, nodata.to_string().as_str())
            .map_err(encode_error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::projection::Crs;
    use crate::geometry::transform::GeoTransform;
    use std::io::Cursor;

    #[test]
    fn test_unsupported_layout_is_rejected() {
        let raster = Raster::from_vec(
            2,
            2,
            2,
            vec![0i16; 8],
            Crs::WGS84,
            GeoTransform::from_origin(0.0, 0.0, 1.0, 1.0),
        )
        .unwrap();
        let mut buf = Vec::new();
        let err = GeoTiffWriter::new(&raster.into())
            .write_to(Cursor::new(&mut buf))
            .unwrap_err();
        assert!(matches!(err, Error::GeoTiffWrite(_)));
    }

    #[test]
    fn test_rotated_transform_roundtrip() {
        let transform = GeoTransform::new([1000.0, 10.0, 1.0, 2000.0, 1.0, -10.0]);
        let raster = Raster::from_vec(3, 3, 1, vec![1.5f32; 9], Crs::WEB_MERCATOR, transform).unwrap();
        let mut buf = Vec::new();
        GeoTiffWriter::new(&raster.into())
            .compression(GeoTiffCompression::Deflate)
            .write_to(Cursor::new(&mut buf))
            .unwrap();

        let decoded = crate::source::decode(Cursor::new(buf), Path::new("rotated.tif")).unwrap();
        assert_eq!(decoded.transform(), transform);
        assert_eq!(decoded.crs(), Crs::WEB_MERCATOR);
    }
}
