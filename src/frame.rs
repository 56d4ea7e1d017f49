//! Sandboxed headless frame.
//!
//! A [`Frame`] takes an inline source document, loads it on the blocking
//! pool and reports completion exactly once. The loaded frame is sized to the
//! requested breakpoint, scaled to fill the hosting window, and grown to the
//! document's scroll height.

use crate::rendering::{layout_document, PageLayout, MAX_CANVAS_DIMENSION};
use crate::{Breakpoint, Config, Error, FrameLoader, Result};
use log::debug;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Privileges granted to the frame's document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxPolicy {
    /// Without this the frame document is opaque to its host
    pub allow_same_origin: bool,
    pub allow_scripts: bool,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allow_same_origin: true,
            allow_scripts: false,
        }
    }
}

impl SandboxPolicy {
    /// The equivalent `sandbox` attribute value
    pub fn attribute(&self) -> String {
        let mut tokens = Vec::new();
        if self.allow_same_origin {
            tokens.push("allow-same-origin");
        }
        if self.allow_scripts {
            tokens.push("allow-scripts");
        }
        tokens.join(" ")
    }
}

/// A frame after its load event, ready for capture
#[derive(Debug, Clone)]
pub struct LoadedFrame {
    pub html: Arc<str>,
    pub viewport: Breakpoint,
    /// Frame width in CSS pixels (the breakpoint)
    pub width: u32,
    /// Frame height, grown to the content's scroll height
    pub height: u32,
    /// Uniform transform applied so the frame fills the hosting window
    pub scale: f64,
    pub layout: PageLayout,
}

/// One sandboxed inline frame.
///
/// Loading is single-fire: after [`Frame::loaded`] resolves, the frame has to
/// be given a new source via [`Frame::assign_srcdoc`] before it can load again.
pub struct Frame {
    policy: SandboxPolicy,
    window_width: u32,
    min_height: u32,
    srcdoc: Option<Arc<str>>,
    viewport: Breakpoint,
    pending: Option<oneshot::Receiver<PageLayout>>,
}

impl Frame {
    pub fn new(policy: SandboxPolicy, window_width: u32, min_height: u32) -> Self {
        Self {
            policy,
            window_width,
            min_height,
            srcdoc: None,
            viewport: Breakpoint::default(),
            pending: None,
        }
    }

    /// Replace the frame's document and start loading it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn assign_srcdoc(&mut self, html: &str, viewport: Breakpoint) {
        let doc: Arc<str> = Arc::from(html);
        let (tx, rx) = oneshot::channel();
        let width = viewport.width();
        let source = doc.clone();
        tokio::task::spawn_blocking(move || {
            let document = Html::parse_document(&source);
            let _ = tx.send(layout_document(&document, width));
        });
        self.srcdoc = Some(doc);
        self.viewport = viewport;
        self.pending = Some(rx);
    }

    /// Wait for the load event of the current source document.
    pub async fn loaded(&mut self) -> Result<LoadedFrame> {
        let rx = self
            .pending
            .take()
            .ok_or_else(|| Error::FrameAccess("no pending load; assign a new source document first".into()))?;
        let layout = rx
            .await
            .map_err(|e| Error::FrameAccess(format!("frame load aborted: {}", e)))?;

        if !self.policy.allow_same_origin {
            return Err(Error::FrameAccess(format!(
                "sandbox \"{}\" denies access to the frame document",
                self.policy.attribute()
            )));
        }
        let html = self
            .srcdoc
            .clone()
            .ok_or_else(|| Error::FrameAccess("frame has no source document".into()))?;

        let width = self.viewport.width();
        let scale = self.window_width as f64 / width as f64;
        let height = layout
            .content_height
            .max(self.min_height)
            .min(MAX_CANVAS_DIMENSION);
        debug!(
            "frame loaded at {} (scale {:.3}, scroll height {})",
            self.viewport, scale, layout.content_height
        );

        Ok(LoadedFrame {
            html,
            viewport: self.viewport,
            width,
            height,
            scale,
            layout,
        })
    }
}

/// [`FrameLoader`] that loads each document into a fresh [`Frame`]
#[derive(Debug, Clone)]
pub struct HeadlessFrameLoader {
    pub policy: SandboxPolicy,
    pub window_width: u32,
    pub min_frame_height: u32,
}

impl HeadlessFrameLoader {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.sandbox,
            window_width: config.window_width,
            min_frame_height: config.min_frame_height,
        }
    }
}

impl FrameLoader for HeadlessFrameLoader {
    async fn load(&self, html: &str, viewport: Breakpoint) -> Result<LoadedFrame> {
        let mut frame = Frame::new(self.policy, self.window_width, self.min_frame_height);
        frame.assign_srcdoc(html, viewport);
        frame.loaded().await
    }
}
