//! Layout, paint and raster stages used by the headless frame and the capturer

pub mod layout;
pub mod paint;
pub mod raster;

pub use layout::{layout_document, PageLayout};
pub use paint::{build_display_list, PaintCommand};
pub use raster::{rasterize, Canvas, MAX_CANVAS_DIMENSION};
