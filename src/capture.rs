//! Capture stage: paint a loaded frame and encode it.

use crate::proxy::ProxyConfig;
use crate::rendering::{build_display_list, rasterize, PaintCommand, MAX_CANVAS_DIMENSION};
use crate::{CaptureRequest, Capturer, Error, ImageFormat, LoadedFrame, Result};
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use log::{debug, warn};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Opaque white; captured pages may leave regions transparent
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Configuration handed to the capture routine
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub width: u32,
    pub height: u32,
    /// Prefix that relays image loads through the proxy; the percent-encoded
    /// image address is appended
    pub use_proxy: Option<String>,
    pub background_color: [u8; 4],
    /// Accepted for parity with DOM capture option sets. Glyphs always come
    /// from the built-in cell face, so this has no effect on the output.
    pub embed_fonts: bool,
    pub compress: bool,
    /// Nearest-neighbour image scaling instead of filtered
    pub fast: bool,
    /// 0..=1, used by lossy encoders
    pub quality: f32,
    pub format: ImageFormat,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            use_proxy: None,
            background_color: WHITE,
            embed_fonts: true,
            compress: true,
            fast: true,
            quality: crate::Quality::default().factor(),
            format: ImageFormat::default(),
        }
    }
}

impl CaptureOptions {
    /// Options for capturing `frame` as requested, relaying images through `proxy`
    pub fn for_frame(frame: &LoadedFrame, request: &CaptureRequest, proxy: &ProxyConfig) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            use_proxy: Some(proxy.image_proxy_prefix()),
            quality: request.quality.factor(),
            format: request.format,
            ..Default::default()
        }
    }
}

/// An encoded capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl CapturedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Hex SHA-256 of the encoded bytes
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Native capture routine: paints the frame's display list, relays image
/// loads through the proxy and encodes with the `image` codecs
#[derive(Debug, Clone)]
pub struct RasterCapturer {
    client: Client,
    /// Upper bound on relayed image loads per capture
    pub max_images: usize,
}

impl RasterCapturer {
    pub fn new(client: Client) -> Self {
        Self { client, max_images: 32 }
    }

    async fn load_images(&self, commands: &[PaintCommand], use_proxy: Option<&str>) -> HashMap<String, DynamicImage> {
        let mut images = HashMap::new();
        let sources = commands.iter().filter_map(|c| match c {
            PaintCommand::Image { src, .. } if !src.is_empty() => Some(src.as_str()),
            _ => None,
        });
        for src in sources {
            if images.contains_key(src) {
                continue;
            }
            if images.len() >= self.max_images {
                debug!("image limit {} reached, remaining images become placeholders", self.max_images);
                break;
            }
            match self.load_image(src, use_proxy).await {
                Ok(img) => {
                    images.insert(src.to_string(), img);
                }
                Err(e) => warn!("image {} not loaded: {}", src, e),
            }
        }
        images
    }

    async fn load_image(&self, src: &str, use_proxy: Option<&str>) -> Result<DynamicImage> {
        if let Some(data) = src.strip_prefix("data:") {
            let (meta, payload) = data
                .split_once(',')
                .ok_or_else(|| Error::CaptureError("malformed data URL".into()))?;
            if !meta.ends_with(";base64") {
                return Err(Error::CaptureError("only base64 data URLs are decoded".into()));
            }
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|e| Error::CaptureError(format!("bad base64 payload: {}", e)))?;
            return Ok(image::load_from_memory(&bytes)?);
        }

        let url = match use_proxy {
            Some(prefix) => format!("{}{}", prefix, url::form_urlencoded::byte_serialize(src.as_bytes()).collect::<String>()),
            None => src.to_string(),
        };
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::HttpStatus {
                status: resp.status().as_u16(),
                status_text: resp.status().canonical_reason().unwrap_or("").to_string(),
            });
        }
        let bytes = resp.bytes().await?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

impl Capturer for RasterCapturer {
    async fn capture(&self, frame: &LoadedFrame, options: &CaptureOptions) -> Result<CapturedImage> {
        if options.width == 0 || options.height == 0 {
            return Err(Error::CaptureError(format!(
                "empty capture area {}x{}",
                options.width, options.height
            )));
        }
        if options.width > MAX_CANVAS_DIMENSION || options.height > MAX_CANVAS_DIMENSION {
            return Err(Error::CaptureError(format!(
                "capture area {}x{} exceeds the {}px canvas limit",
                options.width, options.height, MAX_CANVAS_DIMENSION
            )));
        }
        let commands = build_display_list(&frame.layout);
        let images = self.load_images(&commands, options.use_proxy.as_deref()).await;
        debug!(
            "painting {} commands ({} images) at {}x{}",
            commands.len(),
            images.len(),
            options.width,
            options.height
        );
        let pixels = rasterize(
            &commands,
            options.width,
            options.height,
            options.background_color,
            &images,
            options.fast,
        );
        let bytes = encode(&pixels, options)?;
        Ok(CapturedImage {
            bytes,
            format: options.format,
            width: pixels.width(),
            height: pixels.height(),
        })
    }
}

/// Encode `pixels` in the requested format.
///
/// JPEG drops alpha and honours `quality`; WebP is lossless, so `quality`
/// does not apply to it.
pub fn encode(pixels: &RgbaImage, options: &CaptureOptions) -> Result<Vec<u8>> {
    let (w, h) = pixels.dimensions();
    let mut buf = Vec::new();
    match options.format {
        ImageFormat::Png => {
            let compression = if options.compress {
                CompressionType::Best
            } else {
                CompressionType::Fast
            };
            PngEncoder::new_with_quality(&mut buf, compression, FilterType::Adaptive).write_image(
                pixels.as_raw(),
                w,
                h,
                ExtendedColorType::Rgba8,
            )?;
        }
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(pixels.clone()).to_rgb8();
            let quality = (options.quality * 100.0).round().clamp(1.0, 100.0) as u8;
            JpegEncoder::new_with_quality(&mut buf, quality).write_image(
                rgb.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            )?;
        }
        ImageFormat::Webp => {
            WebPEncoder::new_lossless(&mut buf).write_image(pixels.as_raw(), w, h, ExtendedColorType::Rgba8)?;
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, SandboxPolicy};
    use crate::{Breakpoint, Quality};

    async fn loaded(html: &str) -> LoadedFrame {
        let mut frame = Frame::new(SandboxPolicy::default(), 1280, 120);
        frame.assign_srcdoc(html, Breakpoint::try_from(320).unwrap());
        frame.loaded().await.unwrap()
    }

    fn capturer() -> RasterCapturer {
        RasterCapturer::new(Client::new())
    }

    #[tokio::test]
    async fn png_capture_matches_frame_size() {
        let frame = loaded("<h1>Hello</h1><p>World</p>").await;
        let opts = CaptureOptions {
            width: frame.width,
            height: frame.height,
            ..Default::default()
        };
        let img = capturer().capture(&frame, &opts).await.unwrap();
        assert_eq!(&img.bytes[0..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!((img.width, img.height), (320, 120));

        let decoded = image::load_from_memory(&img.bytes).unwrap().to_rgba8();
        assert!(decoded.pixels().any(|p| p.0 == [0, 0, 0, 255]));
        assert!(decoded.pixels().any(|p| p.0 == WHITE));
    }

    #[tokio::test]
    async fn jpeg_and_webp_encodings() {
        let frame = loaded("<p>x</p>").await;
        let mut opts = CaptureOptions {
            width: frame.width,
            height: frame.height,
            format: ImageFormat::Jpeg,
            quality: Quality::Low.factor(),
            ..Default::default()
        };
        let jpg = capturer().capture(&frame, &opts).await.unwrap();
        assert_eq!(&jpg.bytes[0..3], &[0xFF, 0xD8, 0xFF]);
        assert_eq!(jpg.mime_type(), "image/jpeg");

        opts.format = ImageFormat::Webp;
        let webp = capturer().capture(&frame, &opts).await.unwrap();
        assert_eq!(&webp.bytes[0..4], b"RIFF");
        assert_eq!(&webp.bytes[8..12], b"WEBP");
    }

    #[tokio::test]
    async fn higher_jpeg_quality_is_larger() {
        let frame = loaded(&"<p>some words to paint</p>".repeat(10)).await;
        let capture = |q: Quality| CaptureOptions {
            width: frame.width,
            height: frame.height,
            format: ImageFormat::Jpeg,
            quality: q.factor(),
            ..Default::default()
        };
        let low = capturer().capture(&frame, &capture(Quality::Low)).await.unwrap();
        let high = capturer().capture(&frame, &capture(Quality::High)).await.unwrap();
        assert!(high.bytes.len() > low.bytes.len());
    }

    #[tokio::test]
    async fn data_url_images_are_decoded() {
        let mut png = Vec::new();
        let red = RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]));
        PngEncoder::new(&mut png)
            .write_image(red.as_raw(), 4, 4, ExtendedColorType::Rgba8)
            .unwrap();
        let src = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );
        let frame = loaded(&format!(r#"<img src="{}" width="40" height="40">"#, src)).await;
        let opts = CaptureOptions {
            width: frame.width,
            height: frame.height,
            ..Default::default()
        };
        let img = capturer().capture(&frame, &opts).await.unwrap();
        let decoded = image::load_from_memory(&img.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(20, 20).0, [255, 0, 0, 255]);
    }

    #[tokio::test]
    async fn capture_area_above_canvas_limit_is_rejected() {
        let frame = loaded("<p>x</p>").await;
        let opts = CaptureOptions {
            width: frame.width,
            height: MAX_CANVAS_DIMENSION + 1,
            ..Default::default()
        };
        let err = capturer().capture(&frame, &opts).await.unwrap_err();
        assert!(matches!(err, Error::CaptureError(_)));
        assert!(err.user_message().starts_with("Failed to generate image"));
    }

    #[test]
    fn data_url_and_digest() {
        let img = CapturedImage {
            bytes: vec![1, 2, 3],
            format: ImageFormat::Png,
            width: 1,
            height: 1,
        };
        assert_eq!(img.to_data_url(), "data:image/png;base64,AQID");
        assert_eq!(img.digest().len(), 64);
    }

    #[test]
    fn options_follow_request() {
        let layout = crate::rendering::PageLayout::default();
        let frame = LoadedFrame {
            html: std::sync::Arc::from(""),
            viewport: Breakpoint::try_from(800).unwrap(),
            width: 800,
            height: 900,
            scale: 1.6,
            layout,
        };
        let req = CaptureRequest::new("https://example.com", frame.viewport, ImageFormat::Webp, Quality::High);
        let opts = CaptureOptions::for_frame(&frame, &req, &ProxyConfig::default());
        assert_eq!((opts.width, opts.height), (800, 900));
        assert_eq!(opts.format, ImageFormat::Webp);
        assert!((opts.quality - 0.9).abs() < f32::EPSILON);
        assert_eq!(opts.use_proxy.as_deref(), Some("https://proxy.corsfix.com/?url="));
        assert_eq!(opts.background_color, WHITE);
        assert!(opts.embed_fonts && opts.compress && opts.fast);
    }
}
