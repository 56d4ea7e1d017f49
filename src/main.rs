//! s8t command line: capture a website screenshot through the proxy.
//!
//! ```bash
//! s8t https://example.com
//! s8t -w 640 -f webp -q high -o shot.webp https://example.com
//! s8t --mode permissive --html page.html https://example.com
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};
use s8t::{Breakpoint, CaptureRequest, Config, ImageFormat, Pipeline, Quality, RewriteMode};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "s8t")]
#[command(version)]
#[command(about = "Capture website screenshots through a CORS proxy")]
struct Args {
    /// Page to capture
    url: String,

    /// Viewport width (320, 640, 800, 1280, 1600, 1920, 2048 or 3840)
    #[arg(short, long, default_value_t = 1280)]
    width: u32,

    /// Image format: png, jpg/jpeg or webp
    #[arg(short, long, default_value = "png")]
    format: ImageFormat,

    /// Image quality: low, medium or high
    #[arg(short, long, default_value = "medium")]
    quality: Quality,

    /// Output path (defaults to screenshot.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rewrite mode: permissive, strict or flattened
    #[arg(long)]
    mode: Option<RewriteMode>,

    /// Proxy endpoint the target URL is appended to
    #[arg(long)]
    proxy: Option<String>,

    /// Do not ask the proxy for cached responses
    #[arg(long)]
    no_proxy_cache: bool,

    /// Also save the rewritten HTML
    #[arg(long)]
    html: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(mode) = args.mode {
        config.rewrite_mode = mode;
    }
    if let Some(proxy) = &args.proxy {
        config.proxy.endpoint = proxy.clone();
    }
    if args.no_proxy_cache {
        config.proxy.cache = false;
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let viewport = Breakpoint::try_from(args.width)?;
    let request = CaptureRequest::new(args.url.clone(), viewport, args.format, args.quality);
    if url::Url::parse(&request.target_url).is_err() {
        bail!("invalid URL: {}", request.target_url);
    }

    let pipeline = Pipeline::from_config(config)?;
    pipeline.on_state_change(|state| {
        if state.is_busy() {
            eprintln!("{}", state.status_text());
        }
    });

    let object_url = pipeline.render(&request).await?;
    let image = pipeline
        .current_image()
        .context("render finished without an image")?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("screenshot.{}", request.format.extension())));
    std::fs::write(&output, &image.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;

    if let Some(path) = &args.html {
        let html = pipeline.with_session(|s| s.frame().map(|f| f.html.to_string()));
        if let Some(html) = html {
            std::fs::write(path, html).with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Rewritten HTML saved to {}", path.display());
        }
    }

    println!(
        "{} {}x{} {} -> {}",
        object_url,
        image.width,
        image.height,
        image.mime_type(),
        output.display()
    );
    pipeline.release();
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let _ = Builder::from_env(Env::default().filter_or("RUST_LOG", default_filter)).try_init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
