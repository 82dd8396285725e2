//! mapcal - draw GPS routes onto calibrated map images
//!
//! Renders routes over a map whose four corners are known, computes the
//! footprint of the result, packages it as KMZ, replays timed routes and
//! serves the same operations over HTTP.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mapcal::assets::ImageLoader;
use mapcal::calibration::CalibrationTransform;
use mapcal::config::Config;
use mapcal::export::{corners_from_filename, download_name, encode_image, kmz, OutputFormat};
use mapcal::playback::PlaybackSession;
use mapcal::render::{draw_route, get_corners};
use mapcal::server::{run_server, AppState};
use mapcal::{CornerSet, Route};

/// mapcal - calibrated map rendering for GPS routes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "mapcal.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Draw a route onto a map image
    Render(RenderArgs),
    /// Print the geographic corners of a rendered image
    Corners(CornersArgs),
    /// Package an image and its corners as a KMZ ground overlay
    Kmz(KmzArgs),
    /// Print replay frames of a timed route as JSON lines
    Replay(ReplayArgs),
    /// Run the HTTP API
    Serve(ServeArgs),
}

/// Map image and its calibration
#[derive(Args, Debug)]
struct MapArgs {
    /// Map image file
    #[arg(short, long)]
    image: PathBuf,

    /// Corners as lat,lon x4 (TL, TR, BR, BL); read from the image filename if omitted
    #[arg(long)]
    corners: Option<String>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    map: MapArgs,

    /// Route JSON file
    #[arg(short, long)]
    route: Option<PathBuf>,

    /// Stack the statistics banner above the map
    #[arg(long)]
    header: bool,

    /// Leave the route out (blank map with the same footprint)
    #[arg(long)]
    no_route: bool,

    /// Output file; defaults to the corner-carrying download name
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CornersArgs {
    #[command(flatten)]
    map: MapArgs,

    #[arg(short, long)]
    route: Option<PathBuf>,

    #[arg(long)]
    header: bool,
}

#[derive(Args, Debug)]
struct KmzArgs {
    #[command(flatten)]
    map: MapArgs,

    /// Overlay name; defaults to the image file stem
    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    #[command(flatten)]
    map: MapArgs,

    #[arg(short, long)]
    route: PathBuf,

    /// Print a single frame at this progress (0-100) instead of the full replay
    #[arg(long)]
    progress: Option<f64>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Web server host
    #[arg(long)]
    host: Option<String>,

    /// Web server port
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_logging(verbose: bool) {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    if std::env::var_os("RUST_LOG").is_some() {
        builder.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        let log_level = if verbose { Level::DEBUG } else { Level::INFO };
        builder.with_max_level(log_level).init();
    }
}

fn load_route(path: Option<&Path>) -> Result<Route> {
    let Some(path) = path else {
        return Ok(Route::empty());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read route from {:?}", path))?;
    let route: Route = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse route from {:?}", path))?;
    info!("Loaded {} route points from {:?}", route.len(), path);
    Ok(route)
}

fn resolve_corners(map: &MapArgs) -> Result<CornerSet> {
    if let Some(corners) = &map.corners {
        return Ok(corners.parse::<CornerSet>()?);
    }
    let filename = map
        .image
        .file_name()
        .and_then(|n| n.to_str())
        .context("Image path has no file name")?;
    corners_from_filename(filename)
        .with_context(|| format!("No --corners given and none found in {:?}", filename))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("map")
        .to_string()
}

fn output_format(path: &Path, default: OutputFormat) -> OutputFormat {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) {
        Some(ext) if ext == "png" => OutputFormat::Png,
        Some(ext) if ext == "jpg" || ext == "jpeg" => OutputFormat::Jpeg,
        _ => default,
    }
}

fn run_render(config: &Config, args: &RenderArgs, loader: &mut ImageLoader) -> Result<()> {
    let corners = resolve_corners(&args.map)?;
    let route = load_route(args.route.as_deref())?;
    let image = loader.load_path(&args.map.image)?;
    let font = config.header.load_font()?;

    let options = config.render_options(args.header, !args.no_route);
    let rendered = draw_route(&image, &corners, &route, &options, font.as_ref())?;
    let footprint = get_corners(image.dimensions(), &corners, &route, &options)?;

    let output = match &args.output {
        Some(path) => path.clone(),
        None => PathBuf::from(download_name(&file_stem(&args.map.image), &footprint, !args.no_route)),
    };
    let format = output_format(&output, config.output.format);
    let bytes = encode_image(&rendered.image, format, config.output.jpeg_quality)?;
    std::fs::write(&output, bytes).with_context(|| format!("Failed to write {:?}", output))?;

    info!(
        "Wrote {:?} ({}x{})",
        output,
        rendered.image.width(),
        rendered.image.height()
    );
    println!("{}", footprint.rounded());
    Ok(())
}

fn run_corners(config: &Config, args: &CornersArgs, loader: &mut ImageLoader) -> Result<()> {
    let corners = resolve_corners(&args.map)?;
    let route = load_route(args.route.as_deref())?;
    let image = loader.load_path(&args.map.image)?;
    let options = config.render_options(args.header, true);
    let footprint = get_corners(image.dimensions(), &corners, &route, &options)?;
    println!("{}", footprint.rounded());
    Ok(())
}

fn run_kmz(config: &Config, args: &KmzArgs, loader: &mut ImageLoader) -> Result<()> {
    let corners = resolve_corners(&args.map)?;
    let image = loader.load_path(&args.map.image)?;
    let name = args.name.clone().unwrap_or_else(|| file_stem(&args.map.image));

    let jpeg = encode_image(&image, OutputFormat::Jpeg, config.output.jpeg_quality)?;
    let package = kmz(&name, &corners, &jpeg)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.kmz", name)));
    std::fs::write(&output, &package).with_context(|| format!("Failed to write {:?}", output))?;
    info!("Wrote {:?} ({} bytes)", output, package.len());
    Ok(())
}

fn run_replay(config: &Config, args: &ReplayArgs, loader: &mut ImageLoader) -> Result<()> {
    let corners = resolve_corners(&args.map)?;
    let route = load_route(Some(&args.route))?;
    if !route.is_timed() {
        bail!("Route {:?} has no timestamps, nothing to replay", args.route);
    }
    let image = loader.load_path(&args.map.image)?;
    let transform = CalibrationTransform::new(image.width(), image.height(), &corners, 0.0)?;
    let mut session = PlaybackSession::from_route(&route, transform, config.playback.options())?;

    if let Some(progress) = args.progress {
        session.set_progress(progress);
        println!("{}", serde_json::to_string(&session.frame()?)?);
        return Ok(());
    }

    let mut frames = 0usize;
    loop {
        println!("{}", serde_json::to_string(&session.frame()?)?);
        frames += 1;
        if session.is_finished() {
            break;
        }
        session.advance();
    }
    info!("Replayed {} frames", frames);
    Ok(())
}

async fn run_serve(mut config: Config, config_path: PathBuf, args: &ServeArgs) -> Result<()> {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let font = config.header.load_font()?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let config = Arc::new(parking_lot::RwLock::new(config));
    let state = Arc::new(AppState::new(config, config_path, font));

    info!("Starting web server at http://{}", addr);
    let server_state = state.clone();
    tokio::select! {
        result = run_server(&addr, server_state) => {
            if let Err(e) = &result {
                tracing::error!("Server error: {}", e);
            }
            state.shutdown();
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            state.shutdown();
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("mapcal v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_or_create(&cli.config)?;

    if let Command::Serve(args) = &cli.command {
        return run_serve(config, cli.config.clone(), args).await;
    }

    let mut loader = ImageLoader::new();
    loader.init();
    let result = match &cli.command {
        Command::Render(args) => run_render(&config, args, &mut loader),
        Command::Corners(args) => run_corners(&config, args, &mut loader),
        Command::Kmz(args) => run_kmz(&config, args, &mut loader),
        Command::Replay(args) => run_replay(&config, args, &mut loader),
        Command::Serve(_) => Ok(()),
    };
    loader.teardown();
    result
}
