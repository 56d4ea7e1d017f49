//! s8t website capture
//!
//! Fetches a page through a CORS-relaxing proxy, rewrites its markup so it can
//! render out of origin, loads it into a sandboxed headless frame at a fixed
//! breakpoint width and rasterizes the result into a PNG, JPEG or WebP image.
//!
//! # Stages
//!
//! - **Proxy fetch** ([`proxy`]): one `GET` through the proxy endpoint
//! - **Rewrite** ([`rewrite`]): absolutize resource URLs, strip what a
//!   scripts-disabled sandbox cannot use
//! - **Frame load** ([`frame`]): one-shot load, sizing and scaling
//! - **Capture** ([`capture`]): paint and encode
//!
//! [`Pipeline`] drives the stages and owns the [`Session`] (state, cache,
//! current object URL).
//!
//! # Example
//!
//! ```no_run
//! use s8t::{Breakpoint, CaptureRequest, Config, ImageFormat, Pipeline, Quality};
//!
//! # async fn run() -> s8t::Result<()> {
//! let pipeline = Pipeline::from_config(Config::default())?;
//! let request = CaptureRequest::new(
//!     "https://example.com",
//!     Breakpoint::try_from(1280)?,
//!     ImageFormat::Png,
//!     Quality::High,
//! );
//! let url = pipeline.render(&request).await?;
//! println!("captured {}", url);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub mod error;
pub use error::{Error, Result};

pub mod capture;
pub mod frame;
pub mod pipeline;
pub mod proxy;
pub mod rendering;
pub mod rewrite;
pub mod session;

pub use capture::{CaptureOptions, CapturedImage, RasterCapturer};
pub use frame::{HeadlessFrameLoader, LoadedFrame, SandboxPolicy};
pub use pipeline::{Pipeline, PipelineState};
pub use proxy::{ProxyConfig, ProxyFetcher};
pub use rewrite::{RewriteMode, RewrittenDocument};
pub use session::{ObjectUrl, Session};

/// Viewport widths offered to the user
pub const WIDTH_BREAKPOINTS: [u32; 8] = [320, 640, 800, 1280, 1600, 1920, 2048, 3840];

/// A viewport width taken from [`WIDTH_BREAKPOINTS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Breakpoint(u32);

impl Breakpoint {
    pub fn width(self) -> u32 {
        self.0
    }
}

impl Default for Breakpoint {
    fn default() -> Self {
        Breakpoint(1280)
    }
}

impl TryFrom<u32> for Breakpoint {
    type Error = Error;

    fn try_from(width: u32) -> Result<Self> {
        if WIDTH_BREAKPOINTS.contains(&width) {
            Ok(Breakpoint(width))
        } else {
            Err(Error::ConfigError(format!(
                "unsupported viewport width {} (expected one of {:?})",
                width, WIDTH_BREAKPOINTS
            )))
        }
    }
}

impl From<Breakpoint> for u32 {
    fn from(b: Breakpoint) -> u32 {
        b.0
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}px", self.0)
    }
}

/// Output encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(Error::ConfigError(format!("unknown image format '{}'", other))),
        }
    }
}

/// Compression level offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    /// Numeric quality handed to the capture stage (0..=1)
    pub fn factor(self) -> f32 {
        match self {
            Quality::Low => 0.3,
            Quality::Medium => 0.7,
            Quality::High => 0.9,
        }
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(Error::ConfigError(format!("unknown image quality '{}'", other))),
        }
    }
}

/// Everything one render invocation needs. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub target_url: String,
    pub viewport: Breakpoint,
    pub format: ImageFormat,
    pub quality: Quality,
}

impl CaptureRequest {
    pub fn new(target_url: impl Into<String>, viewport: Breakpoint, format: ImageFormat, quality: Quality) -> Self {
        Self {
            target_url: target_url.into().trim().to_string(),
            viewport,
            format,
            quality,
        }
    }
}

/// Configuration for the capture pipeline
///
/// Defaults mirror the hosted tool: the public corsfix endpoint with response
/// caching, a strict rewrite, a sandbox that grants same-origin access but no
/// scripts, and reuse of the last fetched document when the URL repeats.
///
/// # Examples
///
/// ```
/// let cfg = s8t::Config::default();
/// assert!(cfg.proxy.endpoint.contains("corsfix"));
/// assert!(cfg.reuse_cached_html);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy endpoint, cache header, user agent and timeout
    pub proxy: ProxyConfig,
    /// Width of the hosting window; the frame is scaled to fill it
    pub window_width: u32,
    /// Lower bound for the frame height before content is measured
    pub min_frame_height: u32,
    /// How aggressively fetched markup is rewritten
    pub rewrite_mode: RewriteMode,
    /// Privileges granted to the frame
    pub sandbox: SandboxPolicy,
    /// Skip fetch and rewrite when the URL matches the last fetched one
    pub reuse_cached_html: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            window_width: 1280,
            min_frame_height: 720,
            rewrite_mode: RewriteMode::Strict,
            sandbox: SandboxPolicy::default(),
            reuse_cached_html: true,
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Config = serde_json::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("malformed config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 {
            return Err(Error::ConfigError("window_width must be positive".into()));
        }
        url::Url::parse(&self.proxy.endpoint)
            .map_err(|e| Error::ConfigError(format!("invalid proxy endpoint '{}': {}", self.proxy.endpoint, e)))?;
        Ok(())
    }
}

/// Fetches page markup for a target URL
#[allow(async_fn_in_trait)]
pub trait Fetch {
    async fn fetch(&self, target_url: &str) -> Result<String>;
}

/// Loads rewritten markup into a sandboxed frame
#[allow(async_fn_in_trait)]
pub trait FrameLoader {
    /// Resolve once the frame has loaded and been sized for `viewport`
    async fn load(&self, html: &str, viewport: Breakpoint) -> Result<LoadedFrame>;
}

/// Rasterizes a loaded frame
#[allow(async_fn_in_trait)]
pub trait Capturer {
    async fn capture(&self, frame: &LoadedFrame, options: &CaptureOptions) -> Result<CapturedImage>;
}
