use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use geopyramid::{
    AnyRaster, Crs, Error, FsTileStore, GeoTiffWriter, GeoTransform, PyramidBuilder,
    PyramidConfig, Raster, SummaryReport, TileFormat, ZoomRange, generate_pyramid, open,
};
use tempfile::TempDir;

const HALF_EARTH: f64 = 20_037_508.342_789_244;

fn write_geotiff(dir: &Path, name: &str, raster: AnyRaster) -> PathBuf {
    let path = dir.join(name);
    GeoTiffWriter::new(&raster).write(&path).unwrap();
    path
}

/// One degree square over northern Italy, u16 gradient
fn alpine_scene(dir: &Path) -> PathBuf {
    let size = 512;
    let data = (0..size * size).map(|i| ((i % size) * 7 + i / size) as u16).collect();
    let res = 1.0 / size as f64;
    let t = GeoTransform::from_origin(10.0, 46.0, res, res);
    let raster = Raster::from_vec(size, size, 1, data, Crs::WGS84, t).unwrap();
    write_geotiff(dir, "alpine.tif", raster.into())
}

fn world_scene(dir: &Path) -> PathBuf {
    let size = 128;
    let res = 2.0 * HALF_EARTH / size as f64;
    let data = (0..size * size * 3).map(|i| (i % 253) as u8).collect();
    let t = GeoTransform::from_origin(-HALF_EARTH, HALF_EARTH, res, res);
    let raster = Raster::from_vec(size, size, 3, data, Crs::WEB_MERCATOR, t).unwrap();
    write_geotiff(dir, "world.tif", raster.into())
}

fn config(min: u8, max: u8) -> PyramidConfig {
    PyramidConfig::default()
        .with_zoom(ZoomRange::new(min, max).unwrap())
        .with_tile_size(64)
        .with_threads(2)
}

fn collect_tiles(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[test]
fn test_roundtrip_metadata() {
    let dir = TempDir::new().unwrap();
    let path = alpine_scene(dir.path());
    let raster = open(&path).unwrap();
    assert_eq!((raster.width(), raster.height(), raster.band_count()), (512, 512, 1));
    assert_eq!(raster.crs(), Crs::WGS84);
    let bounds = raster.bounds();
    assert!((bounds.min_x() - 10.0).abs() < 1e-9);
    assert!((bounds.max_y() - 46.0).abs() < 1e-9);
}

#[test]
fn test_geographic_scene_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = alpine_scene(dir.path());
    let out = dir.path().join("tiles");
    let store = FsTileStore::new(&out);

    let summary = generate_pyramid(&input, config(0, 2), &store).unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.zoom(0).unwrap().written, 1);
    assert!(summary.zoom(1).unwrap().written <= 4);
    assert_eq!(summary.tile_count(), 3);

    let tiles = collect_tiles(&out);
    assert!(tiles.contains_key("0/0/0.png"));
    assert!(tiles.contains_key("1/1/0.png"));
    assert!(tiles.contains_key("2/2/1.png"));
    for bytes in tiles.values() {
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}

#[test]
fn test_jpeg_tiles() {
    let dir = TempDir::new().unwrap();
    let input = world_scene(dir.path());
    let out = dir.path().join("jpeg");
    let config = config(1, 1).with_format(TileFormat::Jpeg { quality: 70 });

    let summary = generate_pyramid(&input, config, &FsTileStore::new(&out)).unwrap();
    assert_eq!(summary.tile_count(), 4);
    let tiles = collect_tiles(&out);
    assert!(tiles.keys().all(|k| k.ends_with(".jpg")));
    assert!(tiles.values().all(|b| b[..2] == [0xFF, 0xD8]));
}

#[test]
fn test_storage_failure_is_isolated() {
    let dir = TempDir::new().unwrap();
    let input = world_scene(dir.path());
    let out = dir.path().join("tiles");
    // A directory where a tile file must go
    fs::create_dir_all(out.join("2/1/1.png")).unwrap();

    let summary = generate_pyramid(&input, config(2, 2), &FsTileStore::new(&out)).unwrap();
    assert_eq!(summary.failed_count(), 1);
    assert_eq!(summary.tile_count(), 15);
    let failure = &summary.failures[0];
    assert_eq!(failure.coordinate.to_string(), "2/1/1");
    assert!(matches!(failure.error, Error::StorageFailed { .. }));
    assert!(!summary.cancelled);

    let written = collect_tiles(&out);
    assert_eq!(written.len(), 15);
}

#[test]
fn test_retry_from_report() {
    let dir = TempDir::new().unwrap();
    let input = world_scene(dir.path());
    let out = dir.path().join("tiles");
    let blocker = out.join("2/3/0.png");
    fs::create_dir_all(&blocker).unwrap();
    let store = FsTileStore::new(&out);

    let builder = PyramidBuilder::new(config(2, 2)).unwrap();
    let normalized = builder.prepare(&open(&input).unwrap()).unwrap();
    let first = builder.build(&normalized, &store).unwrap();
    assert_eq!(first.failed_count(), 1);

    let json = serde_json::to_string(&first.to_report()).unwrap();
    let report: SummaryReport = serde_json::from_str(&json).unwrap();
    assert_eq!(report.tiles_failed, 1);

    fs::remove_dir(&blocker).unwrap();
    let retry = builder
        .build_tiles(&normalized, &report.failed_tiles(), &store)
        .unwrap();
    assert!(retry.is_complete());
    assert_eq!(retry.tile_count(), 1);
    assert_eq!(collect_tiles(&out).len(), 16);
}

#[test]
fn test_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let input = alpine_scene(dir.path());
    let first = dir.path().join("a");
    let second = dir.path().join("b");

    generate_pyramid(&input, config(0, 3), &FsTileStore::new(&first)).unwrap();
    generate_pyramid(&input, config(0, 3), &FsTileStore::new(&second)).unwrap();
    let a = collect_tiles(&first);
    assert!(!a.is_empty());
    assert_eq!(a, collect_tiles(&second));

    // Writing over an existing pyramid leaves the same tree
    generate_pyramid(&input, config(0, 3), &FsTileStore::new(&first)).unwrap();
    assert_eq!(a, collect_tiles(&first));
}

#[test]
fn test_unreadable_raster_is_fatal() {
    let dir = TempDir::new().unwrap();
    let bogus = dir.path().join("not_a_tiff.tif");
    fs::write(&bogus, b"definitely not a tiff").unwrap();
    let out = dir.path().join("tiles");

    let err = generate_pyramid(&bogus, config(0, 1), &FsTileStore::new(&out)).unwrap_err();
    assert!(matches!(err, Error::UnreadableRaster { .. }));
    assert!(!out.exists());

    let missing = generate_pyramid(dir.path().join("missing.tif"), config(0, 1), &FsTileStore::new(&out));
    assert!(matches!(missing, Err(Error::UnreadableRaster { .. })));
}
