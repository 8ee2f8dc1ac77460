//! GeoTIFF raster source.
//!
//! Reads the whole image into memory with the `tiff` decoder and resolves
//! its geo-referencing from the GeoTIFF tags:
//! - `ModelPixelScale` + `ModelTiepoint`, or `ModelTransformation`
//! - CRS from the `GeoKeyDirectory` (projected CRS preferred over geographic)
//! - nodata from the GDAL `GDAL_NODATA` ASCII tag
//!
//! Any failure is reported as [`Error::UnreadableRaster`]; a raster is never
//! partially returned.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geometry::projection::Crs;
use crate::geometry::transform::GeoTransform;
use crate::raster::{AnyRaster, Raster, Sample};

// GeoKey constants
const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_CRS: u16 = 3072;
const GEO_KEY_USER_DEFINED: u16 = 32767;

/// Open a GeoTIFF file and read it fully into memory.
///
/// # Errors
/// Returns [`Error::UnreadableRaster`] for I/O and decode failures, zero
/// dimensions, unsupported sample types, and a missing geotransform or CRS.
pub fn open(path: impl AsRef<Path>) -> Result<AnyRaster> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::unreadable(path, e.to_string()))?;
    decode(BufReader::new(file), path)
}

/// Decode a GeoTIFF from any seekable reader; `label` names it in errors.
///
/// # Errors
/// See [`open`].
pub fn decode<R: Read + Seek>(reader: R, label: &Path) -> Result<AnyRaster> {
    let fail = |reason: String| Error::unreadable(label, reason);

    let mut decoder = Decoder::new(reader)
        .map_err(|e| fail(format!("TIFF decode error: {e}")))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| fail(format!("cannot read dimensions: {e}")))?;
    if width == 0 || height == 0 {
        return Err(fail(format!("zero dimensions {width}x{height}")));
    }

    let transform = read_geotransform(&mut decoder)
        .ok_or_else(|| fail("missing or degenerate geotransform tags".into()))?;
    let crs = read_crs(&mut decoder).map_err(fail)?;
    let nodata = read_gdal_nodata(&mut decoder);

    let image = decoder
        .read_image()
        .map_err(|e| fail(format!("cannot read image data: {e}")))?;

    let (width, height) = (width as usize, height as usize);
    let raster = match image {
        DecodingResult::U8(buf) => build(width, height, buf, crs, transform).map(AnyRaster::U8),
        DecodingResult::I8(buf) => build(width, height, buf, crs, transform).map(AnyRaster::I8),
        DecodingResult::U16(buf) => build(width, height, buf, crs, transform).map(AnyRaster::U16),
        DecodingResult::I16(buf) => build(width, height, buf, crs, transform).map(AnyRaster::I16),
        DecodingResult::U32(buf) => build(width, height, buf, crs, transform).map(AnyRaster::U32),
        DecodingResult::I32(buf) => build(width, height, buf, crs, transform).map(AnyRaster::I32),
        DecodingResult::F32(buf) => build(width, height, buf, crs, transform).map(AnyRaster::F32),
        DecodingResult::F64(buf) => build(width, height, buf, crs, transform).map(AnyRaster::F64),
        _ => return Err(fail("unsupported sample type (64-bit integer)".into())),
    }
    .map_err(|e| fail(e.to_string()))?;

    let raster = with_nodata(raster, nodata);
    info!(
        source = %label.display(),
        width,
        height,
        bands = raster.band_count(),
        sample_type = %raster.sample_type(),
        crs = %crs,
        "opened raster"
    );
    Ok(raster)
}

fn build<T: Sample>(
    width: usize,
    height: usize,
    buf: Vec<T>,
    crs: Crs,
    transform: GeoTransform,
) -> Result<Raster<T>> {
    let pixels = width * height;
    if buf.is_empty() || buf.len() % pixels != 0 {
        return Err(Error::InvalidRaster(format!(
            "{} samples do not divide into {width}x{height} pixels",
            buf.len()
        )));
    }
    let bands = buf.len() / pixels;
    Raster::from_vec(width, height, bands, buf, crs, transform)
}

fn with_nodata(raster: AnyRaster, nodata: Option<f64>) -> AnyRaster {
    match raster {
        AnyRaster::U8(r) => AnyRaster::U8(r.with_nodata(nodata)),
        AnyRaster::I8(r) => AnyRaster::I8(r.with_nodata(nodata)),
        AnyRaster::U16(r) => AnyRaster::U16(r.with_nodata(nodata)),
        AnyRaster::I16(r) => AnyRaster::I16(r.with_nodata(nodata)),
        AnyRaster::U32(r) => AnyRaster::U32(r.with_nodata(nodata)),
        AnyRaster::I32(r) => AnyRaster::I32(r.with_nodata(nodata)),
        AnyRaster::F32(r) => AnyRaster::F32(r.with_nodata(nodata)),
        AnyRaster::F64(r) => AnyRaster::F64(r.with_nodata(nodata)),
    }
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();
    if let (Some(scale), Some(tiepoint)) = (&scale, &tiepoint)
        && let Some(transform) = GeoTransform::from_tiepoint(tiepoint, scale)
    {
        return Some(transform);
    }

    let matrix = decoder.get_tag_f64_vec(Tag::ModelTransformationTag).ok()?;
    GeoTransform::from_model_transformation(&matrix)
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> std::result::Result<Crs, String> {
    let keys = decoder
        .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
        .map_err(|_| "missing GeoKeyDirectory tag".to_string())?;
    let code = crs_code_from_geokeys(&keys).ok_or("no EPSG code in GeoKeyDirectory")?;
    debug!(code, "resolved CRS code from GeoKeys");
    Crs::from_epsg(u32::from(code)).map_err(|e| e.to_string())
}

/// Extract the EPSG code from a GeoKey directory.
///
/// Layout: `KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys`
/// followed by `KeyID, TIFFTagLocation, Count, Value` per key. Only keys
/// stored inline (`TIFFTagLocation == 0`) can carry an EPSG code.
fn crs_code_from_geokeys(keys: &[u16]) -> Option<u16> {
    let num_keys = usize::from(*keys.get(3)?);
    let mut projected = None;
    let mut geographic = None;

    for entry in keys[4..].chunks_exact(4).take(num_keys) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == 0 || value == GEO_KEY_USER_DEFINED {
            continue;
        }
        match key_id {
            GEO_KEY_PROJECTED_CRS => projected = Some(value),
            GEO_KEY_GEOGRAPHIC_TYPE => geographic = Some(value),
            _ => {}
        }
    }

    projected.or(geographic)
}

fn read_gdal_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let raw = decoder.get_tag_ascii_string(Tag::GdalNodata).ok()?;
    raw.trim_end_matches('\0').trim().parse().ok()
}
