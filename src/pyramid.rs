//! Tile pyramid orchestration
//!
//! [`PyramidBuilder`] walks the configured zoom levels in ascending order.
//! For each level it asks the tile grid for every tile touching the raster
//! and hands them to a bounded rayon pool; each task computes its pixel
//! window, renders, encodes and stores one tile. The normalized raster is
//! shared read-only by all workers.
//!
//! A failing tile never aborts the run. It is recorded in the
//! [`PyramidSummary`] with its cause, and the summary can be turned into a
//! [`SummaryReport`] whose failed tiles feed [`PyramidBuilder::build_tiles`]
//! for a retry.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PyramidConfig;
use crate::error::{Error, Result};
use crate::geometry::projection::Crs;
use crate::normalize::normalize;
use crate::raster::{AnyRaster, Raster, Sample, SampleType};
use crate::reproject::{ResamplingMethod, Reprojector};
use crate::source;
use crate::tile_grid::{TileCoordinate, pixel_window_for_tile, tile_count_for_zoom, tiles_for_zoom};
use crate::tile_store::TileStore;
use crate::tile_writer::TileWriter;
use crate::with_any_raster;

/// Cooperative stop signal, checked before every tile is dispatched
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag, e.g. one set by a signal handler
    #[must_use]
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { cancelled: flag }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A tile that could not be produced
#[derive(Debug)]
pub struct TileFailure {
    pub coordinate: TileCoordinate,
    pub error: Error,
}

/// Per-zoom tile counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomSummary {
    pub zoom: u8,
    /// Tiles whose extent touches the raster
    pub planned: u64,
    pub written: u64,
    /// Tiles whose pixel window turned out empty
    pub skipped: u64,
    pub failed: u64,
}

/// Outcome of a pyramid run
#[derive(Debug, Default)]
pub struct PyramidSummary {
    pub zooms: Vec<ZoomSummary>,
    pub failures: Vec<TileFailure>,
    /// True if the run stopped early; tiles never attempted are not failures
    pub cancelled: bool,
}

impl PyramidSummary {
    /// Number of tiles written
    #[must_use]
    pub fn tile_count(&self) -> u64 {
        self.zooms.iter().map(|z| z.written).sum()
    }

    #[must_use]
    pub fn skipped_count(&self) -> u64 {
        self.zooms.iter().map(|z| z.skipped).sum()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Completed without failures or cancellation
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    #[must_use]
    pub fn zoom(&self, zoom: u8) -> Option<&ZoomSummary> {
        self.zooms.iter().find(|z| z.zoom == zoom)
    }

    /// Serializable form of this summary
    #[must_use]
    pub fn to_report(&self) -> SummaryReport {
        SummaryReport {
            tiles_written: self.tile_count(),
            tiles_skipped: self.skipped_count(),
            tiles_failed: self.failures.len() as u64,
            cancelled: self.cancelled,
            zooms: self.zooms.clone(),
            failures: self
                .failures
                .iter()
                .map(|f| FailureReport {
                    tile: f.coordinate,
                    kind: f.error.kind().to_string(),
                    message: f.error.to_string(),
                })
                .collect(),
        }
    }
}

/// One failed tile in a [`SummaryReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    #[serde(flatten)]
    pub tile: TileCoordinate,
    pub kind: String,
    pub message: String,
}

/// Run summary as persisted to JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub tiles_written: u64,
    pub tiles_skipped: u64,
    pub tiles_failed: u64,
    pub cancelled: bool,
    pub zooms: Vec<ZoomSummary>,
    pub failures: Vec<FailureReport>,
}

impl SummaryReport {
    /// Coordinates of every failed tile, for a retry run
    #[must_use]
    pub fn failed_tiles(&self) -> Vec<TileCoordinate> {
        self.failures.iter().map(|f| f.tile).collect()
    }
}

enum TileOutcome {
    Written,
    Skipped,
    NotAttempted,
    Failed(TileFailure),
}

/// Running totals of one zoom level, merged across workers
#[derive(Default)]
struct ZoomTally {
    written: u64,
    skipped: u64,
    not_attempted: bool,
    failures: Vec<TileFailure>,
}

impl ZoomTally {
    fn record(mut self, outcome: TileOutcome) -> Self {
        match outcome {
            TileOutcome::Written => self.written += 1,
            TileOutcome::Skipped => self.skipped += 1,
            TileOutcome::NotAttempted => self.not_attempted = true,
            TileOutcome::Failed(failure) => self.failures.push(failure),
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.written += other.written;
        self.skipped += other.skipped;
        self.not_attempted |= other.not_attempted;
        self.failures.extend(other.failures);
        self
    }
}

type ProgressFn = dyn Fn(TileCoordinate) + Send + Sync;

/// Drives reprojection, normalization and tile writing for one run
pub struct PyramidBuilder {
    config: PyramidConfig,
    pool: ThreadPool,
    cancel: CancellationToken,
    progress: Option<Box<ProgressFn>>,
}

impl PyramidBuilder {
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the configuration does not
    /// validate or the worker pool cannot be started.
    pub fn new(config: PyramidConfig) -> Result<Self> {
        config.validate()?;
        let mut pool = ThreadPoolBuilder::new().thread_name(|i| format!("tile-worker-{i}"));
        if let Some(threads) = config.threads {
            pool = pool.num_threads(threads);
        }
        let pool = pool
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot start worker pool: {e}")))?;
        debug!(threads = pool.current_num_threads(), "worker pool ready");
        Ok(Self {
            config,
            pool,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Called from the worker threads after every attempted tile
    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(TileCoordinate) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    #[must_use]
    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    /// Reproject to Web Mercator and normalize to 8-bit on the worker pool
    ///
    /// # Errors
    /// Propagates [`Error::UnsupportedProjection`] and raster errors.
    pub fn prepare(&self, raster: &AnyRaster) -> Result<Raster<u8>> {
        let reprojected = self.reproject(raster)?;
        self.normalize(&reprojected)
    }

    /// Reproject to Web Mercator with the configured resampling and fill,
    /// keeping the source sample type
    ///
    /// # Errors
    /// Propagates [`Error::UnsupportedProjection`] and raster errors.
    pub fn reproject(&self, raster: &AnyRaster) -> Result<AnyRaster> {
        self.pool.install(|| {
            with_any_raster!(raster, r => Reprojector::new(r)
                .to_crs(Crs::WEB_MERCATOR)
                .resampling(self.config.resampling)
                .nodata(self.config.nodata_fill)
                .reproject()
                .map(AnyRaster::from))
        })
    }

    /// Stretch an already reprojected raster to 8-bit
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for RGB output on fewer than three bands.
    pub fn normalize(&self, raster: &AnyRaster) -> Result<Raster<u8>> {
        self.pool
            .install(|| with_any_raster!(raster, r => normalize(r, &self.config.normalize)))
    }

    /// Total tiles [`PyramidBuilder::build`] will consider
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedProjection`] if the raster extent cannot
    /// be expressed in Web Mercator.
    pub fn planned_tiles<T: Sample>(&self, raster: &Raster<T>) -> Result<u64> {
        let bbox = raster.bounds().to_crs(Crs::WEB_MERCATOR)?;
        self.config
            .zoom
            .iter()
            .map(|zoom| tile_count_for_zoom(&bbox, zoom))
            .sum()
    }

    /// Write every tile of the configured zoom range.
    ///
    /// Per-tile failures are collected, never returned.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedProjection`] if the raster extent cannot
    /// be expressed in Web Mercator.
    pub fn build(&self, raster: &Raster<u8>, store: &dyn TileStore) -> Result<PyramidSummary> {
        let bbox = raster.bounds().to_crs(Crs::WEB_MERCATOR)?;
        info!(
            min_zoom = self.config.zoom.min(),
            max_zoom = self.config.zoom.max(),
            store = %store.identifier(),
            "building pyramid"
        );

        let mut summary = PyramidSummary::default();
        for zoom in self.config.zoom.iter() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let tiles = tiles_for_zoom(&bbox, zoom)?;
            self.run_zoom(zoom, &tiles, raster, store, &mut summary);
        }
        self.finish(&summary);
        Ok(summary)
    }

    /// Write only the given tiles, e.g. the failures of an earlier run.
    ///
    /// Duplicates are dropped and tiles run grouped by ascending zoom.
    ///
    /// # Errors
    /// Currently infallible; kept fallible to mirror [`PyramidBuilder::build`].
    pub fn build_tiles(
        &self,
        raster: &Raster<u8>,
        tiles: &[TileCoordinate],
        store: &dyn TileStore,
    ) -> Result<PyramidSummary> {
        let mut by_zoom: BTreeMap<u8, Vec<TileCoordinate>> = BTreeMap::new();
        for &tile in tiles {
            by_zoom.entry(tile.zoom()).or_default().push(tile);
        }
        info!(tiles = tiles.len(), zooms = by_zoom.len(), "rebuilding selected tiles");

        let mut summary = PyramidSummary::default();
        for (zoom, mut tiles) in by_zoom {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            tiles.sort_unstable();
            tiles.dedup();
            self.run_zoom(zoom, &tiles, raster, store, &mut summary);
        }
        self.finish(&summary);
        Ok(summary)
    }

    fn run_zoom(
        &self,
        zoom: u8,
        tiles: &[TileCoordinate],
        raster: &Raster<u8>,
        store: &dyn TileStore,
        summary: &mut PyramidSummary,
    ) {
        let resampling = self
            .config
            .resampling
            .unwrap_or_else(|| ResamplingMethod::for_sample_type(SampleType::U8));
        let writer = TileWriter::new(self.config.tile_size, self.config.format, resampling);
        info!(zoom, tiles = tiles.len(), "processing zoom level");

        let tally = self.pool.install(|| {
            tiles
                .par_iter()
                .map(|&tile| {
                    if self.cancel.is_cancelled() {
                        return TileOutcome::NotAttempted;
                    }
                    let outcome = process_tile(&writer, raster, tile, store);
                    if let Some(progress) = &self.progress {
                        progress(tile);
                    }
                    outcome
                })
                .fold(ZoomTally::default, ZoomTally::record)
                .reduce(ZoomTally::default, ZoomTally::merge)
        });

        let stats = ZoomSummary {
            zoom,
            planned: tiles.len() as u64,
            written: tally.written,
            skipped: tally.skipped,
            failed: tally.failures.len() as u64,
        };
        summary.cancelled |= tally.not_attempted;
        summary.failures.extend(tally.failures);
        info!(
            zoom,
            written = stats.written,
            skipped = stats.skipped,
            failed = stats.failed,
            "zoom level complete"
        );
        summary.zooms.push(stats);
    }

    fn finish(&self, summary: &PyramidSummary) {
        if summary.cancelled {
            warn!(written = summary.tile_count(), "pyramid run cancelled");
        } else {
            info!(
                written = summary.tile_count(),
                skipped = summary.skipped_count(),
                failed = summary.failed_count(),
                "pyramid complete"
            );
        }
    }
}

fn process_tile(
    writer: &TileWriter,
    raster: &Raster<u8>,
    tile: TileCoordinate,
    store: &dyn TileStore,
) -> TileOutcome {
    let result = pixel_window_for_tile(raster, tile).and_then(|window| {
        if window.is_empty() {
            debug!(%tile, "empty pixel window, skipping");
            return Ok(false);
        }
        writer.write_tile(raster, &window, tile, store).map(|()| true)
    });
    match result {
        Ok(true) => TileOutcome::Written,
        Ok(false) => TileOutcome::Skipped,
        Err(error) => {
            warn!(%tile, %error, "tile failed");
            TileOutcome::Failed(TileFailure {
                coordinate: tile,
                error,
            })
        }
    }
}

/// Open a GeoTIFF and write its full pyramid into `store`.
///
/// The source raster is dropped as soon as the reprojected, normalized
/// raster exists.
///
/// # Errors
/// Fatal errors only: [`Error::UnreadableRaster`],
/// [`Error::UnsupportedProjection`], [`Error::InvalidConfig`]. Tile
/// failures are reported in the returned summary.
pub fn generate_pyramid(
    path: impl AsRef<Path>,
    config: PyramidConfig,
    store: &dyn TileStore,
) -> Result<PyramidSummary> {
    let builder = PyramidBuilder::new(config)?;
    let normalized = {
        let raster = source::open(path)?;
        builder.prepare(&raster)?
    };
    builder.build(&normalized, store)
}
