//! geopyramid CLI - GeoTIFF to Web Mercator XYZ tiles

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use geopyramid::{
    AnyRaster, CancellationToken, Crs, FsTileStore, GeoTiffCompression, GeoTiffWriter,
    NormalizeOptions, PyramidBuilder, PyramidConfig, ResamplingMethod, SummaryReport, TileFormat,
    ZoomRange,
};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "geopyramid")]
#[command(author, version, about = "Build Web Mercator XYZ tile pyramids from GeoTIFFs", long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show raster metadata and its geographic bounds
    Info {
        /// Input GeoTIFF
        input: PathBuf,
    },
    /// Generate the tile pyramid
    Build(BuildArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Input GeoTIFF
    input: PathBuf,
    /// Output directory; tiles land at {output}/{z}/{x}/{y}.{ext}
    output: PathBuf,
    /// Lowest zoom level
    #[arg(long, default_value_t = 8)]
    min_zoom: u8,
    /// Highest zoom level (at most 22)
    #[arg(long, default_value_t = 12)]
    max_zoom: u8,
    /// Tile edge in pixels
    #[arg(long, default_value_t = geopyramid::DEFAULT_TILE_SIZE)]
    tile_size: u32,
    /// Resampling: nearest or bilinear (default: by sample type)
    #[arg(short, long)]
    resampling: Option<String>,
    /// Tile format: png, jpeg or jpeg:<quality>
    #[arg(short, long, default_value = "png")]
    format: String,
    /// JPEG quality (1-100); overrides a quality given in --format
    #[arg(short, long)]
    quality: Option<u8>,
    /// Value written where the reprojected raster has no data
    #[arg(long, default_value_t = 0.0)]
    nodata: f64,
    /// Stretch all bands with one shared min/max
    #[arg(long)]
    global_normalization: bool,
    /// Keep only the first three bands as RGB
    #[arg(long)]
    rgb: bool,
    /// Worker threads (default: one per core)
    #[arg(short = 'j', long)]
    threads: Option<usize>,
    /// Write the run summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Rebuild only the failed tiles listed in an earlier summary
    #[arg(long)]
    retry: Option<PathBuf>,
    /// Also save the reprojected (pre-normalization) raster as GeoTIFF
    #[arg(long)]
    save_reprojected: Option<PathBuf>,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn tile_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tiles ({eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

fn read_raster(path: &Path) -> Result<AnyRaster> {
    let pb = spinner("Reading raster...");
    let raster = geopyramid::open(path).context("Failed to read raster")?;
    pb.finish_and_clear();
    Ok(raster)
}

fn build_config(args: &BuildArgs) -> Result<PyramidConfig> {
    let zoom = ZoomRange::new(args.min_zoom, args.max_zoom)?;
    let format = match (args.format.parse::<TileFormat>()?, args.quality) {
        (TileFormat::Jpeg { .. }, Some(quality)) => TileFormat::Jpeg { quality },
        (format, _) => format,
    };
    let mut config = PyramidConfig::default()
        .with_zoom(zoom)
        .with_tile_size(args.tile_size)
        .with_format(format)
        .with_nodata_fill(args.nodata)
        .with_normalize(NormalizeOptions {
            per_band: !args.global_normalization,
            rgb: args.rgb,
        });
    if let Some(resampling) = &args.resampling {
        config = config.with_resampling(resampling.parse::<ResamplingMethod>()?);
    }
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    config.validate()?;
    Ok(config)
}

fn read_report(path: &Path) -> Result<SummaryReport> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read summary {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid summary {}", path.display()))
}

fn write_report(report: &SummaryReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("Failed to write summary {}", path.display()))
}

// ─── Commands ───────────────────────────────────────────────────────────

fn run_info(input: &Path) -> Result<()> {
    let raster = read_raster(input)?;
    let bounds = raster.bounds();
    let (px, py) = raster.transform().pixel_size();

    println!("File: {}", input.display());
    println!(
        "Dimensions: {} x {} ({} band(s), {})",
        raster.width(),
        raster.height(),
        raster.band_count(),
        raster.sample_type()
    );
    let bytes = raster.width() * raster.height() * raster.band_count()
        * raster.sample_type().bytes_per_sample();
    println!("In memory: {:.1} MiB", bytes as f64 / (1024.0 * 1024.0));
    println!("CRS: {}", raster.crs());
    println!("Pixel size: {px} x {py}");
    println!(
        "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
        bounds.min_x(),
        bounds.min_y(),
        bounds.max_x(),
        bounds.max_y()
    );
    match bounds.to_crs(Crs::WGS84) {
        Ok(geo) => println!(
            "Bounds (EPSG:4326): ({:.6}, {:.6}) - ({:.6}, {:.6})",
            geo.min_x(),
            geo.min_y(),
            geo.max_x(),
            geo.max_y()
        ),
        Err(e) => println!("Bounds (EPSG:4326): unavailable ({e})"),
    }
    if let Some(nodata) = raster.nodata() {
        println!("NoData: {nodata}");
    }
    Ok(())
}

fn run_build(args: &BuildArgs) -> Result<()> {
    let start = Instant::now();
    let config = build_config(args)?;
    let retry = args.retry.as_deref().map(read_report).transpose()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .context("Failed to set signal handler")?;

    let bar = tile_bar(0);
    let progress = bar.clone();
    let builder = PyramidBuilder::new(config)?
        .with_cancellation(CancellationToken::from_flag(shutdown))
        .with_progress(move |_| progress.inc(1));

    let normalized = {
        let reprojected = {
            let raster = read_raster(&args.input)?;
            let pb = spinner("Reprojecting...");
            let reprojected = builder.reproject(&raster).context("Failed to reproject raster")?;
            pb.finish_and_clear();
            reprojected
        };
        if let Some(path) = &args.save_reprojected {
            save_reprojected(&reprojected, path)?;
        }
        let pb = spinner("Normalizing...");
        let normalized = builder
            .normalize(&reprojected)
            .context("Failed to normalize raster")?;
        pb.finish_and_clear();
        normalized
    };
    info!(
        width = normalized.width(),
        height = normalized.height(),
        "raster ready for tiling"
    );

    let store = FsTileStore::new(&args.output);
    let summary = match &retry {
        Some(report) => {
            let tiles = report.failed_tiles();
            if tiles.is_empty() {
                println!("Nothing to retry.");
                return Ok(());
            }
            bar.set_length(tiles.len() as u64);
            builder.build_tiles(&normalized, &tiles, &store)?
        }
        None => {
            bar.set_length(builder.planned_tiles(&normalized)?);
            builder.build(&normalized, &store)?
        }
    };
    bar.finish_and_clear();

    for failure in &summary.failures {
        warn!(tile = %failure.coordinate, error = %failure.error, "failed tile");
    }
    if let Some(path) = &args.summary {
        write_report(&summary.to_report(), path)?;
        println!("Summary saved to: {}", path.display());
    }

    println!("Tiles saved to: {}", args.output.display());
    println!(
        "  Written: {}, skipped: {}, failed: {}",
        summary.tile_count(),
        summary.skipped_count(),
        summary.failed_count()
    );
    println!("  Processing time: {:.2?}", start.elapsed());

    if summary.cancelled {
        bail!("run cancelled before all tiles were attempted");
    }
    if !summary.failures.is_empty() {
        bail!(
            "{} tile(s) failed; rerun with --retry <summary> to rebuild them",
            summary.failed_count()
        );
    }
    Ok(())
}

fn save_reprojected(reprojected: &AnyRaster, path: &Path) -> Result<()> {
    let pb = spinner("Writing reprojected raster...");
    GeoTiffWriter::new(reprojected)
        .compression(GeoTiffCompression::Deflate)
        .write(path)
        .context("Failed to write reprojected raster")?;
    pb.finish_and_clear();
    Ok(())
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match &cli.command {
        Commands::Info { input } => run_info(input),
        Commands::Build(args) => run_build(args),
    }
}
