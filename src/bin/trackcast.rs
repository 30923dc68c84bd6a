//! Command-line entry point: decode a GPX file, process it, and render a
//! map-overlay video (or a single frame, or a textual series dump).

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use trackcast::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
use trackcast::foundation::core::{Fps, FrameIndex, parse_hex_color};
use trackcast::foundation::error::{TrackcastError, TrackcastResult};
use trackcast::pipeline::{self, PipelineOpts};
use trackcast::render::frame::{FrameStyle, render_frame};
use trackcast::telemetry::process::ProcessOpts;
use trackcast::telemetry::{RawPoint, Track, backfill_elevation};
use trackcast::tiles::cache::{TileCache, TileCacheConfig};
use trackcast::tiles::scaled::ScaledTileCache;
use trackcast::tiles::{TILE_SIZE, resolve_style, tiles_for_track};
use trackcast::{adjust, RenderStats};

/// Concurrent fetches during the prefetch phase.
const PREFETCH_WORKERS: usize = 8;

#[derive(Parser)]
#[command(name = "trackcast", version, about = "Render a GPS track into a map-overlay video")]
struct Cli {
    /// Log debug detail.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the full video.
    Render(RenderArgs),
    /// Render a single frame to a PNG, for tuning visual parameters.
    Frame(FrameArgs),
    /// Dump the processed series as text instead of rendering.
    Dump(TrackArgs),
}

#[derive(Args)]
struct TrackArgs {
    /// Input GPX file.
    #[arg(long)]
    gpx: PathBuf,

    /// Scale the camera with average speed.
    #[arg(long = "dyn-map-scale")]
    dyn_map_scale: bool,

    /// Tile zoom at camera scale 1.0.
    #[arg(long = "map-zoom", default_value_t = 15)]
    map_zoom: u32,

    /// File with track adjustment directives.
    #[arg(long = "track-adjustment-file")]
    track_adjustment_file: Option<PathBuf>,

    /// Start of the render window (`<v>s` or `<v>km`).
    #[arg(long = "cut-from")]
    cut_from: Option<String>,

    /// End of the render window (`<v>s` or `<v>km`).
    #[arg(long = "cut-to")]
    cut_to: Option<String>,
}

#[derive(Args)]
struct MapArgs {
    /// Map style name, or a custom `{z}/{x}/{y}` URL template.
    #[arg(long, default_value = "default")]
    style: String,

    /// Map widget diameter in pixels.
    #[arg(long = "widget-size", default_value_t = 600)]
    widget_size: u32,

    /// Use 512 px tiles; mismatching providers abort the run.
    #[arg(long = "2x")]
    two_x: bool,

    /// On-disk tile cache directory.
    #[arg(long = "tile-dir", default_value = "tile-cache")]
    tile_dir: PathBuf,

    /// Never touch the network; uncached tiles stay blank.
    #[arg(long)]
    offline: bool,

    /// Additive tile brightness in [-1, 1].
    #[arg(long = "map-brightness", default_value_t = 0.0)]
    map_brightness: f64,

    /// Multiplicative tile contrast around mid-gray.
    #[arg(long = "map-contrast", default_value_t = 1.0)]
    map_contrast: f64,

    /// Walked-path stroke width in pixels.
    #[arg(long = "path-width", default_value_t = 3.0)]
    path_width: f64,

    /// Walked-path color, `#RRGGBB`.
    #[arg(long = "path-color", default_value = "#FF0000")]
    path_color: String,

    /// Widget border color, `#RRGGBB`.
    #[arg(long = "border-color", default_value = "#ff9800")]
    border_color: String,

    /// HUD text/icon color, `#RRGGBB`.
    #[arg(long = "indicator-color", default_value = "#FFFFFF")]
    indicator_color: String,

    /// TTF font for the HUD; without it text indicators are skipped.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    track: TrackArgs,
    #[command(flatten)]
    map: MapArgs,

    /// Output video file.
    #[arg(long, default_value = "out.mp4")]
    out: PathBuf,

    /// Video bitrate in ffmpeg notation.
    #[arg(long, default_value = "6M")]
    bitrate: String,

    /// Output frame rate.
    #[arg(long, default_value_t = 23.976)]
    framerate: f64,

    /// Render worker threads; 0 means one per logical CPU.
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

#[derive(Args)]
struct FrameArgs {
    #[command(flatten)]
    track: TrackArgs,
    #[command(flatten)]
    map: MapArgs,

    /// Frame index to render.
    #[arg(long, default_value_t = 0)]
    frame: u64,

    /// Frame rate used to position the frame in time.
    #[arg(long, default_value_t = 23.976)]
    framerate: f64,

    /// Output PNG file.
    #[arg(long, default_value = "first_frame.png")]
    out: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(cli.cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cmd: Command) -> TrackcastResult<()> {
    match cmd {
        Command::Render(args) => render_video(args),
        Command::Frame(args) => render_single_frame(args),
        Command::Dump(args) => {
            let (track, _) = prepare_track(&args)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            track
                .dump_series(&mut out)
                .map_err(|e| TrackcastError::config(format!("writing dump: {e}")))?;
            out.flush()
                .map_err(|e| TrackcastError::config(format!("writing dump: {e}")))?;
            Ok(())
        }
    }
}

fn render_video(args: RenderArgs) -> TrackcastResult<()> {
    let fps = Fps::new(args.framerate)?;
    let (track, directives) = prepare_track(&args.track)?;
    let (tiles, scaled, style) = prepare_rendering(&args.map, &track, &directives)?;

    let mut sink = FfmpegSink::new(FfmpegSinkOpts {
        out_path: args.out.clone(),
        bitrate: args.bitrate.clone(),
        overwrite: true,
    });
    let mut opts = PipelineOpts::new(fps);
    opts.workers = args.workers;

    let stats: RenderStats = pipeline::render_track(&track, &tiles, &scaled, &style, &opts, &mut sink)?;
    tracing::info!(
        out = %args.out.display(),
        written = stats.written,
        failed = stats.failed,
        "video written"
    );
    Ok(())
}

fn render_single_frame(args: FrameArgs) -> TrackcastResult<()> {
    let fps = Fps::new(args.framerate)?;
    let (track, directives) = prepare_track(&args.track)?;
    let (tiles, scaled, style) = prepare_rendering(&args.map, &track, &directives)?;

    let frame = render_frame(FrameIndex(args.frame), fps, &track, &tiles, &scaled, &style)?;
    let png = frame
        .encode_png()
        .map_err(|e| TrackcastError::pipeline(format!("encoding frame: {e}")))?;
    std::fs::write(&args.out, png)
        .map_err(|e| TrackcastError::config(format!("{}: {e}", args.out.display())))?;
    tracing::info!(out = %args.out.display(), frame = args.frame, "frame written");
    Ok(())
}

/// Decode, process and cut the track. The parsed directives are returned
/// alongside: the pre-scale phase is keyed on their target scales.
fn prepare_track(args: &TrackArgs) -> TrackcastResult<(Track, Vec<adjust::Directive>)> {
    let mut raw = read_gpx(&args.gpx)?;
    backfill_elevation(&mut raw);

    let directives = match &args.track_adjustment_file {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                TrackcastError::config(format!("reading {}: {e}", path.display()))
            })?;
            adjust::parse_adjustments(&text)?
        }
        None => Vec::new(),
    };

    let opts = ProcessOpts {
        dynamic_scale: args.dyn_map_scale,
        base_zoom: args.map_zoom,
    };
    let mut track = Track::prepare(raw, &opts, &directives)?;
    track.cut(args.cut_from.as_deref(), args.cut_to.as_deref())?;
    tracing::info!(
        points = track.points.len(),
        total_km = format!("{:.2}", track.total_distance_km),
        "track processed"
    );
    Ok((track, directives))
}

/// Build the tile caches and the frame style, and run the prefetch and
/// pre-scale phases.
fn prepare_rendering(
    map: &MapArgs,
    track: &Track,
    directives: &[adjust::Directive],
) -> TrackcastResult<(TileCache, ScaledTileCache, FrameStyle)> {
    let style = resolve_style(&map.style)?;
    let tile_size = if map.two_x { TILE_SIZE * 2 } else { TILE_SIZE };

    let tiles = TileCache::new(TileCacheConfig {
        style,
        dir: map.tile_dir.clone(),
        hi_res: map.two_x,
        brightness: map.map_brightness,
        contrast: map.map_contrast,
        offline: map.offline,
    });

    let coverage = tiles_for_track(&track.points, map.widget_size, tile_size);
    tiles.prefetch(&coverage, PREFETCH_WORKERS)?;

    // Pre-scale only for scales the adjustment directives pin the camera to;
    // everything else (transition ramps, dynamic scaling) rescales on the fly.
    let scales = adjust::target_scales(directives, &track.points);
    let scaled = ScaledTileCache::build(&tiles, &coverage, &scales);

    let mut frame_style = FrameStyle::with_auto_geometry(map.widget_size, tile_size);
    frame_style.path_width = map.path_width;
    frame_style.path_color = parse_hex_color(&map.path_color)?;
    frame_style.border_color = parse_hex_color(&map.border_color)?;
    frame_style.indicator_color = parse_hex_color(&map.indicator_color)?;
    frame_style.font = match &map.font {
        Some(path) => {
            let bytes = std::fs::read(path)
                .map_err(|e| TrackcastError::config(format!("{}: {e}", path.display())))?;
            Some(rusttype::Font::try_from_vec(bytes).ok_or_else(|| {
                TrackcastError::config(format!("{} is not a usable TTF font", path.display()))
            })?)
        }
        None => {
            tracing::warn!("no --font given, HUD text will be skipped");
            None
        }
    };

    Ok((tiles, scaled, frame_style))
}

/// Decode a GPX file into raw points (all tracks, all segments, in order).
fn read_gpx(path: &std::path::Path) -> TrackcastResult<Vec<RawPoint>> {
    let file = std::fs::File::open(path)
        .map_err(|e| TrackcastError::config(format!("opening {}: {e}", path.display())))?;
    let gpx = gpx::read(std::io::BufReader::new(file))
        .map_err(|e| TrackcastError::config(format!("parsing {}: {e}", path.display())))?;

    let mut raw = Vec::new();
    for trk in &gpx.tracks {
        for seg in &trk.segments {
            for wpt in &seg.points {
                let time = wpt.time.ok_or_else(|| {
                    TrackcastError::config(format!(
                        "point {} in {} has no timestamp",
                        raw.len(),
                        path.display()
                    ))
                })?;
                let odt = time::OffsetDateTime::from(time);
                raw.push(RawPoint {
                    lat: wpt.point().y(),
                    lon: wpt.point().x(),
                    ele_m: wpt.elevation.unwrap_or(0.0),
                    time_s: odt.unix_timestamp_nanos() as f64 / 1e9,
                });
            }
        }
    }
    Ok(raw)
}
