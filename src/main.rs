use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use log::{debug, info, warn};
use simplelog::{Config, WriteLogger};

use folio::environment::Environment;
use folio::panic_handler::initialize_panic_handler;
use folio::pdf::{
    DocumentSource, LoadOptions, MupdfEngine, PasswordReason, PdfBinding, RenderOptions, Rotation,
    SharedCanvas, is_data_uri,
};
use folio::settings::{Settings, load_settings};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(name = "folio", version, about = "Render PDF pages to images", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render one page as PNG
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// File path, URL or data: URI
    source: String,

    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long)]
    scale: Option<f32>,

    /// Fit the page to this width
    #[arg(long)]
    width: Option<f32>,

    /// Fit the page to this height (ignored when --width is given)
    #[arg(long)]
    height: Option<f32>,

    /// Rotation in degrees, a multiple of 90
    #[arg(long, allow_negative_numbers = true)]
    rotate: Option<i32>,

    #[arg(long)]
    pixel_ratio: Option<f32>,

    /// Password for protected documents; prompts on the terminal otherwise
    #[arg(long)]
    password: Option<String>,

    #[arg(long, short, default_value = "page.png")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref());
    if let Some(level) = &cli.log_level {
        settings.log_level.clone_from(level);
    }

    WriteLogger::init(
        settings.level_filter(),
        Config::default(),
        File::create(&settings.log_file)
            .with_context(|| format!("cannot create log file {}", settings.log_file))?,
    )?;
    initialize_panic_handler();

    info!("Starting folio");

    match cli.command {
        Commands::Render(args) => render(&args, &settings),
    }
}

fn parse_source(source: &str) -> DocumentSource {
    if is_data_uri(source) || source.contains("://") {
        DocumentSource::url(source)
    } else {
        DocumentSource::file(source)
    }
}

fn render_options(args: &RenderArgs, settings: &Settings) -> Result<RenderOptions> {
    let rotate = args
        .rotate
        .map(|degrees| {
            Rotation::from_degrees(degrees)
                .ok_or_else(|| anyhow!("rotation must be a multiple of 90, got {degrees}"))
        })
        .transpose()?;

    Ok(RenderOptions {
        scale: Some(args.scale.unwrap_or(settings.scale)),
        width: args.width,
        height: args.height,
        rotate,
    })
}

/// Offer `password` once; any further request flags `rejected`.
fn password_options(password: String, rejected: Arc<AtomicBool>) -> LoadOptions {
    LoadOptions::default().with_password_callback(move |responder, reason| {
        if reason == PasswordReason::NEED_PASSWORD {
            responder.respond(password.clone());
        } else {
            warn!("Password request after the given one ({reason})");
            rejected.store(true, Ordering::Release);
        }
    })
}

fn render(args: &RenderArgs, settings: &Settings) -> Result<()> {
    let mut env = Environment::from_settings(settings);
    if let Some(ratio) = args.pixel_ratio {
        env = env.with_pixel_ratio(ratio);
    }

    let rejected = Arc::new(AtomicBool::new(false));
    let load_options = match &args.password {
        Some(password) => password_options(password.clone(), Arc::clone(&rejected)),
        None => LoadOptions::default(),
    };

    let canvas = SharedCanvas::new();
    let mut binding = PdfBinding::new(Arc::new(MupdfEngine::new()), env, load_options);
    binding.attach_canvas(canvas.clone());
    binding.set_render_options(render_options(args, settings)?);
    binding.set_page(args.page);
    binding.set_source(Some(parse_source(&args.source)));

    while !binding.is_settled() {
        if rejected.load(Ordering::Acquire) {
            bail!("incorrect password for {}", args.source);
        }
        if !binding.poll() {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    let state = binding.snapshot()?;
    debug!("Pipeline settled: {state:?}");
    if state.is_error {
        let reason = binding
            .last_error()
            .map_or_else(|| "rendering was cancelled".to_string(), |e| e.to_string());
        bail!("could not render page {}: {reason}", args.page);
    }
    if !state.render_status.is_success() {
        bail!("page {} produced no image", args.page);
    }

    let (width, height, pixels) = {
        let surface = canvas.lock();
        (surface.width(), surface.height(), surface.pixels().to_vec())
    };
    let image = image::RgbaImage::from_raw(width, height, pixels)
        .context("canvas size does not match its pixel buffer")?;
    image
        .save(&args.output)
        .with_context(|| format!("cannot write {}", args.output.display()))?;

    info!("Wrote {width}x{height} to {:?}", args.output);
    println!("{width}x{height} {}", args.output.display());
    Ok(())
}
