/// Rasterizer for display lists

use crate::rendering::layout::CELL;
use crate::rendering::paint::{PaintCommand, Rgba};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use std::collections::HashMap;

/// Largest canvas side in pixels; taller frames are clamped to it
pub const MAX_CANVAS_DIMENSION: u32 = 32_767;

const PLACEHOLDER_FILL: Rgba = [230, 230, 230, 255];
const PLACEHOLDER_EDGE: Rgba = [190, 190, 190, 255];

/// RGBA canvas with clipped drawing primitives
pub struct Canvas {
    pixels: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32, background: Rgba) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width.max(1), height.max(1), image::Rgba(background)),
        }
    }

    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, rgba: Rgba) {
        let (cw, ch) = self.pixels.dimensions();
        let x0 = x.max(0) as u32;
        let y0 = y.max(0) as u32;
        let x1 = (x as i64 + width as i64).clamp(0, cw as i64) as u32;
        let y1 = (y as i64 + height as i64).clamp(0, ch as i64) as u32;
        for py in y0..y1 {
            for px in x0..x1 {
                self.pixels.put_pixel(px, py, image::Rgba(rgba));
            }
        }
    }

    /// Draw text as solid glyph blocks on an 8px cell grid.
    pub fn draw_text(&mut self, x: i32, y: i32, text: &str, scale: u32, rgba: Rgba) {
        let cell = (CELL * scale) as i32;
        let glyph_w = (CELL - 2) * scale;
        let glyph_h = (CELL - 1) * scale;
        let bottom = self.pixels.height() as i64;
        for (row, line) in text.lines().enumerate() {
            let top = y as i64 + row as i64 * cell as i64;
            if top >= bottom {
                break;
            }
            for (col, c) in line.chars().enumerate() {
                if c.is_whitespace() {
                    continue;
                }
                self.fill_rect(x.saturating_add(col as i32 * cell), top as i32, glyph_w, glyph_h, rgba);
            }
        }
    }

    pub fn draw_image(&mut self, x: i32, y: i32, width: u32, height: u32, img: &DynamicImage, fast: bool) {
        let filter = if fast { FilterType::Nearest } else { FilterType::Triangle };
        let scaled = imageops::resize(&img.to_rgba8(), width.max(1), height.max(1), filter);
        imageops::overlay(&mut self.pixels, &scaled, x as i64, y as i64);
    }

    pub fn draw_placeholder(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.fill_rect(x, y, width, height, PLACEHOLDER_EDGE);
        if width > 2 && height > 2 {
            self.fill_rect(x + 1, y + 1, width - 2, height - 2, PLACEHOLDER_FILL);
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }
}

/// Paint `commands` onto a `width` × `height` canvas.
///
/// `images` holds decoded images keyed by source URL; commands whose source
/// is missing get a placeholder box.
pub fn rasterize(
    commands: &[PaintCommand],
    width: u32,
    height: u32,
    background: Rgba,
    images: &HashMap<String, DynamicImage>,
    fast: bool,
) -> RgbaImage {
    let mut canvas = Canvas::new(width, height, background);
    for cmd in commands {
        match cmd {
            PaintCommand::SolidRect { x, y, width, height, rgba } => {
                canvas.fill_rect(*x, *y, *width, *height, *rgba)
            }
            PaintCommand::Text { x, y, text, scale, rgba } => canvas.draw_text(*x, *y, text, *scale, *rgba),
            PaintCommand::Image { x, y, width, height, src } => match images.get(src) {
                Some(img) => canvas.draw_image(*x, *y, *width, *height, img, fast),
                None => canvas.draw_placeholder(*x, *y, *width, *height),
            },
        }
    }
    canvas.into_image()
}
