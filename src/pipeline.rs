//! Render pipeline: fetch → rewrite → frame load → capture.
//!
//! Stages run strictly one after another. A render is single-flight; while
//! one is in progress further requests fail with [`Error::Busy`]. The session
//! mutex is never held across an await.

use crate::capture::{CaptureOptions, CapturedImage};
use crate::rewrite::rewrite_html;
use crate::session::{ObjectUrl, Session};
use crate::{
    CaptureRequest, Capturer, Config, Error, Fetch, FrameLoader, HeadlessFrameLoader, ProxyFetcher,
    RasterCapturer, Result,
};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where a render pass currently is
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    FetchingUrl,
    LoadingHtml,
    Generating,
    Error(String),
    Ready(ObjectUrl),
}

impl PipelineState {
    /// Whether the render trigger should be disabled
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            PipelineState::FetchingUrl | PipelineState::LoadingHtml | PipelineState::Generating
        )
    }

    /// Status line shown to the user
    pub fn status_text(&self) -> String {
        match self {
            PipelineState::Idle => "Render".to_string(),
            PipelineState::FetchingUrl => "Fetching URL...".to_string(),
            PipelineState::LoadingHtml => "Loading HTML...".to_string(),
            PipelineState::Generating => "Generating image...".to_string(),
            PipelineState::Error(msg) => msg.clone(),
            PipelineState::Ready(_) => "Success!".to_string(),
        }
    }
}

type StateObserver = Arc<dyn Fn(&PipelineState) + Send + Sync>;

/// Drives the capture stages for one session
pub struct Pipeline<F = ProxyFetcher, L = HeadlessFrameLoader, C = RasterCapturer> {
    fetcher: F,
    loader: L,
    capturer: C,
    config: Config,
    session: Mutex<Session>,
    observers: Mutex<Vec<StateObserver>>,
}

impl Pipeline {
    /// Pipeline with the proxy fetcher, headless frame and raster capturer
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = ProxyFetcher::new(config.proxy.clone())?;
        let loader = HeadlessFrameLoader::from_config(&config);
        let capturer = RasterCapturer::new(fetcher.client().clone());
        Ok(Self::new(fetcher, loader, capturer, config))
    }
}

impl<F: Fetch, L: FrameLoader, C: Capturer> Pipeline<F, L, C> {
    pub fn new(fetcher: F, loader: L, capturer: C, config: Config) -> Self {
        Self {
            fetcher,
            loader,
            capturer,
            config,
            session: Mutex::new(Session::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn capturer(&self) -> &C {
        &self.capturer
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with shared access to the session
    pub fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.session())
    }

    pub fn state(&self) -> PipelineState {
        self.session().state().clone()
    }

    /// Register a callback invoked on every state transition
    pub fn on_state_change<G>(&self, cb: G)
    where
        G: Fn(&PipelineState) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(cb));
    }

    pub fn clear_observers(&self) {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn notify(&self, state: &PipelineState) {
        let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for cb in observers {
            cb(state);
        }
    }

    fn transition(&self, token: u64, state: PipelineState) -> Result<()> {
        let state = self.session().transition(token, state)?;
        self.notify(&state);
        Ok(())
    }

    /// Fetch, rewrite, load and capture `request`, installing the result as
    /// the session's current image.
    pub async fn render(&self, request: &CaptureRequest) -> Result<ObjectUrl> {
        let token = self.session().begin()?;
        match self.run(token, request).await {
            Ok(url) => Ok(url),
            Err(Error::Superseded) => {
                debug!("render #{} for {} discarded", token, request.target_url);
                Err(Error::Superseded)
            }
            Err(err) => {
                let failed = self.session().fail(token, &err);
                match failed {
                    Ok(state) => {
                        warn!("render of {} failed: {}", request.target_url, err);
                        self.notify(&state);
                        Err(err)
                    }
                    Err(_) => Err(Error::Superseded),
                }
            }
        }
    }

    async fn run(&self, token: u64, request: &CaptureRequest) -> Result<ObjectUrl> {
        let cached = if self.config.reuse_cached_html {
            self.session().cached_html(&request.target_url)
        } else {
            None
        };

        let html = match cached {
            Some(html) => {
                debug!("reusing fetched document for {}", request.target_url);
                html
            }
            None => {
                self.transition(token, PipelineState::FetchingUrl)?;
                let raw = self.fetcher.fetch(&request.target_url).await;
                self.session().check(token)?;
                let rewritten = rewrite_html(&raw?, &request.target_url, self.config.rewrite_mode);
                let html: Arc<str> = Arc::from(rewritten.into_html());
                self.session().remember(token, &request.target_url, html.clone())?;
                html
            }
        };

        self.transition(token, PipelineState::LoadingHtml)?;
        let frame = self.loader.load(&html, request.viewport).await;
        self.session().check(token)?;
        let frame = frame?;

        self.transition(token, PipelineState::Generating)?;
        let options = CaptureOptions::for_frame(&frame, request, &self.config.proxy);
        let image = self.capturer.capture(&frame, &options).await;
        self.session().check(token)?;
        let image = image?;

        info!(
            "captured {} at {} as {} ({} bytes)",
            request.target_url,
            request.viewport,
            image.mime_type(),
            image.bytes.len()
        );
        let state = self.session().install(token, frame, image)?;
        self.notify(&state);
        match state {
            PipelineState::Ready(url) => Ok(url),
            _ => Err(Error::Superseded),
        }
    }

    /// Re-capture the current frame with the request's format and quality.
    ///
    /// Never fetches. A different viewport reloads the frame from the
    /// document it already holds. If another render installs its result
    /// while the reload runs, the download fails with [`Error::Superseded`]
    /// and the newer frame is kept.
    pub async fn download(&self, request: &CaptureRequest) -> Result<CapturedImage> {
        let (frame, shown) = {
            let session = self.session();
            let frame = session.frame().cloned().ok_or(Error::NoResult)?;
            (frame, session.current_url().cloned())
        };

        let frame = if frame.viewport != request.viewport {
            debug!("reloading frame at {} for download", request.viewport);
            let reloaded = self.loader.load(&frame.html, request.viewport).await?;
            if !self.session().replace_frame_if_current(shown.as_ref(), reloaded.clone()) {
                debug!("download reload at {} discarded", request.viewport);
                return Err(Error::Superseded);
            }
            reloaded
        } else {
            frame
        };

        let options = CaptureOptions::for_frame(&frame, request, &self.config.proxy);
        self.capturer.capture(&frame, &options).await
    }

    /// Give up on the in-flight render. Its late results are discarded.
    pub fn abandon(&self) {
        let state = self.session().abandon();
        self.notify(&state);
    }

    /// Release the current image (the view consuming it went away)
    pub fn release(&self) {
        self.session().release();
        let state = self.state();
        self.notify(&state);
    }

    pub fn current_image(&self) -> Option<Arc<CapturedImage>> {
        self.session().current_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_states() {
        assert!(!PipelineState::Idle.is_busy());
        assert!(PipelineState::FetchingUrl.is_busy());
        assert!(PipelineState::LoadingHtml.is_busy());
        assert!(PipelineState::Generating.is_busy());
        assert!(!PipelineState::Error("x".into()).is_busy());
    }

    #[test]
    fn status_lines() {
        assert_eq!(PipelineState::FetchingUrl.status_text(), "Fetching URL...");
        assert_eq!(PipelineState::Generating.status_text(), "Generating image...");
        assert_eq!(PipelineState::Error("boom".into()).status_text(), "boom");
    }
}
