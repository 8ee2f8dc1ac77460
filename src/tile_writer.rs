//! Tile rendering and encoding
//!
//! A tile is always rendered at the full `tile_size × tile_size`. Each tile
//! pixel center is mapped into the normalized raster; pixels that fall
//! outside the tile's [`PixelWindow`] or on masked-out source pixels are left
//! transparent (PNG) or black (JPEG).

use std::fmt;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::projection::{CoordTransformer, Crs};
use crate::raster::Raster;
use crate::reproject::{ResamplingMethod, Sampler};
use crate::tile_grid::{PixelWindow, TileCoordinate};
use crate::tile_store::TileStore;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encoded image format of the tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileFormat {
    /// Lossless, with an alpha channel for areas without data
    #[default]
    Png,
    /// Lossy, no transparency; `quality` in 1..=100
    Jpeg { quality: u8 },
}

impl TileFormat {
    /// File extension used in tile paths
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Png => "png",
            TileFormat::Jpeg { .. } => "jpg",
        }
    }

    #[must_use]
    pub fn has_alpha(&self) -> bool {
        matches!(self, TileFormat::Png)
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileFormat::Png => f.write_str("png"),
            TileFormat::Jpeg { quality } => write!(f, "jpeg (quality {quality})"),
        }
    }
}

impl FromStr for TileFormat {
    type Err = Error;

    /// Parses `png`, `jpeg`/`jpg` (default quality) or `jpeg:<quality>`
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        let (name, quality) = match lower.split_once(':') {
            Some((name, quality)) => (name, Some(quality)),
            None => (lower.as_str(), None),
        };
        match (name, quality) {
            ("png", None) => Ok(TileFormat::Png),
            ("jpeg" | "jpg", None) => Ok(TileFormat::Jpeg {
                quality: DEFAULT_JPEG_QUALITY,
            }),
            ("jpeg" | "jpg", Some(q)) => q
                .parse()
                .ok()
                .filter(|q| (1..=100).contains(q))
                .map(|quality| TileFormat::Jpeg { quality })
                .ok_or_else(|| Error::InvalidConfig(format!("invalid JPEG quality '{q}'"))),
            _ => Err(Error::InvalidConfig(format!(
                "unknown tile format '{s}' (expected png or jpeg)"
            ))),
        }
    }
}

/// An encoded tile, dropped as soon as it is stored
#[derive(Debug, Clone)]
pub struct TileImage {
    pub coordinate: TileCoordinate,
    pub format: TileFormat,
    pub bytes: Vec<u8>,
}

/// How raster bands map onto image channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BandLayout {
    Gray,
    Rgb,
    Rgba,
}

impl BandLayout {
    fn for_band_count(bands: usize) -> Self {
        match bands {
            3 => BandLayout::Rgb,
            4 => BandLayout::Rgba,
            _ => BandLayout::Gray,
        }
    }

    fn color_type(self, format: TileFormat) -> ExtendedColorType {
        match (self, format.has_alpha()) {
            (BandLayout::Gray, true) => ExtendedColorType::La8,
            (BandLayout::Gray, false) => ExtendedColorType::L8,
            (_, true) => ExtendedColorType::Rgba8,
            (_, false) => ExtendedColorType::Rgb8,
        }
    }
}

/// Renders tiles from a normalized Web Mercator raster and stores them
#[derive(Debug, Clone, Copy)]
pub struct TileWriter {
    tile_size: u32,
    format: TileFormat,
    resampling: ResamplingMethod,
}

impl TileWriter {
    #[must_use]
    pub fn new(tile_size: u32, format: TileFormat, resampling: ResamplingMethod) -> Self {
        Self {
            tile_size,
            format,
            resampling,
        }
    }

    #[must_use]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[must_use]
    pub fn format(&self) -> TileFormat {
        self.format
    }

    /// Render the tile into interleaved 8-bit channels
    fn render(
        &self,
        raster: &Raster<u8>,
        window: &PixelWindow,
        coordinate: TileCoordinate,
    ) -> Result<(Vec<u8>, ExtendedColorType)> {
        let layout = BandLayout::for_band_count(raster.band_count());
        let color = layout.color_type(self.format);
        let channels = usize::from(color.channel_count());
        let size = self.tile_size as usize;

        let inverse = raster
            .transform()
            .inverse()
            .ok_or_else(|| Error::InvalidRaster("geotransform is not invertible".into()))?;
        let to_raster = CoordTransformer::new(Crs::WEB_MERCATOR, raster.crs())?;
        let sampler = Sampler::new(raster, self.resampling);

        let bounds = coordinate.bounds();
        let step = bounds.width() / f64::from(self.tile_size);
        let mut pixels = vec![0u8; size * size * channels];
        let mut sample = vec![0u8; raster.band_count()];

        for (row, out_row) in pixels.chunks_exact_mut(size * channels).enumerate() {
            let y = bounds.max_y() - (row as f64 + 0.5) * step;
            for (col, out) in out_row.chunks_exact_mut(channels).enumerate() {
                let x = bounds.min_x() + (col as f64 + 0.5) * step;
                let Ok((rx, ry)) = to_raster.transform(x, y) else {
                    continue;
                };
                let p = inverse.pixel_to_world(rx, ry);
                if !p.is_finite() || p.x < 0.0 || p.y < 0.0 {
                    continue;
                }
                if !window.contains(p.x as usize, p.y as usize) {
                    continue;
                }
                sample.fill(0);
                if !sampler.sample(p.x, p.y, &mut sample) {
                    continue;
                }
                write_pixel(layout, self.format.has_alpha(), &sample, out);
            }
        }
        Ok((pixels, color))
    }

    /// Render and encode one tile.
    ///
    /// # Errors
    /// Returns [`Error::EncodeFailed`] if the image encoder rejects the tile.
    pub fn encode(
        &self,
        raster: &Raster<u8>,
        window: &PixelWindow,
        coordinate: TileCoordinate,
    ) -> Result<TileImage> {
        let (pixels, color) = self.render(raster, window, coordinate)?;
        let encode_failed = |e: image::ImageError| Error::EncodeFailed {
            coordinate,
            reason: e.to_string(),
        };

        let mut bytes = Vec::new();
        match self.format {
            TileFormat::Png => PngEncoder::new(&mut bytes)
                .write_image(&pixels, self.tile_size, self.tile_size, color)
                .map_err(encode_failed)?,
            TileFormat::Jpeg { quality } => JpegEncoder::new_with_quality(&mut bytes, quality)
                .write_image(&pixels, self.tile_size, self.tile_size, color)
                .map_err(encode_failed)?,
        }
        Ok(TileImage {
            coordinate,
            format: self.format,
            bytes,
        })
    }

    /// Render, encode and store one tile at `{z}/{x}/{y}.{ext}`.
    ///
    /// # Errors
    /// Returns [`Error::EncodeFailed`] or [`Error::StorageFailed`].
    pub fn write_tile(
        &self,
        raster: &Raster<u8>,
        window: &PixelWindow,
        coordinate: TileCoordinate,
        store: &dyn TileStore,
    ) -> Result<()> {
        let tile = self.encode(raster, window, coordinate)?;
        store.put(tile.coordinate, tile.format.extension(), &tile.bytes)?;
        debug!(tile = %coordinate, bytes = tile.bytes.len(), "tile written");
        Ok(())
    }
}

fn write_pixel(layout: BandLayout, alpha: bool, sample: &[u8], out: &mut [u8]) {
    match (layout, alpha) {
        (BandLayout::Gray, true) => {
            out[0] = sample[0];
            out[1] = u8::MAX;
        }
        (BandLayout::Gray, false) => out[0] = sample[0],
        (BandLayout::Rgb, true) => {
            out[..3].copy_from_slice(&sample[..3]);
            out[3] = u8::MAX;
        }
        (BandLayout::Rgba, true) => out.copy_from_slice(&sample[..4]),
        (BandLayout::Rgb | BandLayout::Rgba, false) => out.copy_from_slice(&sample[..3]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::projection::HALF_EARTH;
    use crate::geometry::transform::GeoTransform;
    use crate::tile_grid::pixel_window_for_tile;
    use crate::tile_store::MemoryTileStore;

    fn tile(zoom: u8, x: u32, y: u32) -> TileCoordinate {
        TileCoordinate::new(zoom, x, y).unwrap()
    }

    /// North-east quadrant, `size` pixels square, value = column index
    fn quadrant(size: usize, bands: usize) -> Raster<u8> {
        let res = HALF_EARTH / size as f64;
        let data = (0..size * size * bands)
            .map(|i| ((i / bands) % size) as u8)
            .collect();
        let t = GeoTransform::from_origin(0.0, HALF_EARTH, res, res);
        Raster::from_vec(size, size, bands, data, Crs::WEB_MERCATOR, t).unwrap()
    }

    fn decode(bytes: &[u8]) -> image::DynamicImage {
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("png".parse::<TileFormat>().unwrap(), TileFormat::Png);
        assert_eq!(
            "JPG".parse::<TileFormat>().unwrap(),
            TileFormat::Jpeg { quality: DEFAULT_JPEG_QUALITY }
        );
        assert_eq!(
            "jpeg:40".parse::<TileFormat>().unwrap(),
            TileFormat::Jpeg { quality: 40 }
        );
        assert!("jpeg:0".parse::<TileFormat>().is_err());
        assert!("webp".parse::<TileFormat>().is_err());
        assert_eq!(TileFormat::Jpeg { quality: 9 }.extension(), "jpg");
    }

    #[test]
    fn test_full_tile_is_opaque() {
        let raster = quadrant(32, 1);
        let coord = tile(1, 1, 0);
        let window = pixel_window_for_tile(&raster, coord).unwrap();
        let writer = TileWriter::new(64, TileFormat::Png, ResamplingMethod::Nearest);
        let image = decode(&writer.encode(&raster, &window, coord).unwrap().bytes).to_luma_alpha8();

        assert_eq!(image.dimensions(), (64, 64));
        assert!(image.pixels().all(|p| p[1] == 255));
        // Every source column spans two tile pixels
        assert_eq!(image.get_pixel(0, 0)[0], 0);
        assert_eq!(image.get_pixel(7, 3)[0], 3);
        assert_eq!(image.get_pixel(63, 5)[0], 31);
    }

    #[test]
    fn test_partial_tile_is_padded_transparent() {
        // The zoom-0 tile sees the raster in its north-east quarter only
        let raster = quadrant(64, 3);
        let coord = tile(0, 0, 0);
        let window = pixel_window_for_tile(&raster, coord).unwrap();
        let writer = TileWriter::new(16, TileFormat::Png, ResamplingMethod::Nearest);
        let image = decode(&writer.encode(&raster, &window, coord).unwrap().bytes).to_rgba8();

        assert_eq!(image.dimensions(), (16, 16));
        assert_eq!(image.get_pixel(2, 2)[3], 0, "north-west is empty");
        assert_eq!(image.get_pixel(12, 12)[3], 0, "south-east is empty");
        assert_eq!(image.get_pixel(12, 2)[3], 255, "north-east has data");
    }

    #[test]
    fn test_masked_pixels_are_transparent() {
        let mask = ndarray::Array2::from_elem((8, 8), crate::raster::MASK_EMPTY);
        let raster = quadrant(8, 4).with_mask(mask).unwrap();
        let coord = tile(1, 1, 0);
        let window = pixel_window_for_tile(&raster, coord).unwrap();
        let writer = TileWriter::new(8, TileFormat::Png, ResamplingMethod::Bilinear);
        let image = decode(&writer.encode(&raster, &window, coord).unwrap().bytes).to_rgba8();
        assert!(image.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_jpeg_tile() {
        let raster = quadrant(32, 3);
        let coord = tile(1, 1, 0);
        let window = pixel_window_for_tile(&raster, coord).unwrap();
        let writer = TileWriter::new(64, TileFormat::Jpeg { quality: 90 }, ResamplingMethod::Nearest);
        let encoded = writer.encode(&raster, &window, coord).unwrap();
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(decode(&encoded.bytes).to_rgb8().dimensions(), (64, 64));
    }

    #[test]
    fn test_write_tile_is_deterministic() {
        let raster = quadrant(16, 1);
        let coord = tile(2, 2, 1);
        let window = pixel_window_for_tile(&raster, coord).unwrap();
        let writer = TileWriter::new(256, TileFormat::Png, ResamplingMethod::Nearest);
        let store = MemoryTileStore::new();

        writer.write_tile(&raster, &window, coord, &store).unwrap();
        let first = store.get(coord, "png").unwrap();
        writer.write_tile(&raster, &window, coord, &store).unwrap();
        assert_eq!(store.get(coord, "png").unwrap(), first);
        assert_eq!(store.paths(), vec!["2/2/1.png"]);
    }
}
