//! Per-session render state.
//!
//! The session owns everything that outlives one stage: the pipeline state,
//! the render sequence token, the last fetched document, the loaded frame and
//! the single live object URL. Stage results carry the token they were
//! started with; a result whose token is no longer current is rejected with
//! [`Error::Superseded`] and leaves the session untouched.

use crate::capture::CapturedImage;
use crate::frame::LoadedFrame;
use crate::pipeline::PipelineState;
use crate::{Error, Result};
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Revocable handle to a captured image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry of object URLs and the images behind them
#[derive(Debug, Default)]
pub struct ObjectUrls {
    live: HashMap<ObjectUrl, Arc<CapturedImage>>,
    next_id: u64,
    revoked_count: u64,
    last_revoked: Option<ObjectUrl>,
}

impl ObjectUrls {
    pub fn create(&mut self, image: Arc<CapturedImage>) -> ObjectUrl {
        self.next_id += 1;
        let digest = image.digest();
        let url = ObjectUrl(format!("blob:s8t/{}-{}", self.next_id, &digest[..16]));
        self.live.insert(url.clone(), image);
        url
    }

    /// Release `url`; returns false if it was not live
    pub fn revoke(&mut self, url: &ObjectUrl) -> bool {
        if self.live.remove(url).is_some() {
            self.revoked_count += 1;
            self.last_revoked = Some(url.clone());
            true
        } else {
            false
        }
    }

    pub fn resolve(&self, url: &ObjectUrl) -> Option<Arc<CapturedImage>> {
        self.live.get(url).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn revoked_count(&self) -> u64 {
        self.revoked_count
    }

    pub fn last_revoked(&self) -> Option<&ObjectUrl> {
        self.last_revoked.as_ref()
    }
}

#[derive(Debug, Clone)]
struct CachedDocument {
    url: String,
    html: Arc<str>,
}

#[derive(Debug, Default)]
pub struct Session {
    state: PipelineState,
    token: u64,
    busy: bool,
    cache: Option<CachedDocument>,
    frame: Option<LoadedFrame>,
    current: Option<ObjectUrl>,
    urls: ObjectUrls,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Start a render pass and hand out its sequence token
    pub fn begin(&mut self) -> Result<u64> {
        if self.busy {
            return Err(Error::Busy);
        }
        self.busy = true;
        self.token += 1;
        Ok(self.token)
    }

    pub fn is_current(&self, token: u64) -> bool {
        self.busy && self.token == token
    }

    pub fn check(&self, token: u64) -> Result<()> {
        if self.is_current(token) {
            Ok(())
        } else {
            Err(Error::Superseded)
        }
    }

    pub fn transition(&mut self, token: u64, state: PipelineState) -> Result<PipelineState> {
        self.check(token)?;
        debug!("render #{}: {:?}", token, state);
        self.state = state.clone();
        Ok(state)
    }

    /// Rewritten markup of `url` if it was the last document fetched
    pub fn cached_html(&self, url: &str) -> Option<Arc<str>> {
        self.cache
            .as_ref()
            .filter(|c| c.url == url)
            .map(|c| c.html.clone())
    }

    pub fn remember(&mut self, token: u64, url: &str, html: Arc<str>) -> Result<()> {
        self.check(token)?;
        self.cache = Some(CachedDocument {
            url: url.to_string(),
            html,
        });
        Ok(())
    }

    /// Install a finished capture. The previous object URL is revoked before
    /// the new one is created.
    pub fn install(&mut self, token: u64, frame: LoadedFrame, image: CapturedImage) -> Result<PipelineState> {
        self.check(token)?;
        if let Some(prev) = self.current.take() {
            self.urls.revoke(&prev);
        }
        let url = self.urls.create(Arc::new(image));
        self.current = Some(url.clone());
        self.frame = Some(frame);
        self.busy = false;
        self.state = PipelineState::Ready(url);
        Ok(self.state.clone())
    }

    pub fn fail(&mut self, token: u64, err: &Error) -> Result<PipelineState> {
        self.check(token)?;
        self.busy = false;
        self.state = PipelineState::Error(err.user_message());
        Ok(self.state.clone())
    }

    /// Drop the in-flight pass, if any; its stage results will be discarded
    pub fn abandon(&mut self) -> PipelineState {
        self.token += 1;
        self.busy = false;
        self.state = match &self.current {
            Some(url) => PipelineState::Ready(url.clone()),
            None => PipelineState::Idle,
        };
        self.state.clone()
    }

    /// Release the current object URL (the consuming view went away)
    pub fn release(&mut self) {
        if let Some(url) = self.current.take() {
            self.urls.revoke(&url);
        }
        self.frame = None;
        if !self.busy {
            self.state = PipelineState::Idle;
        }
    }

    pub fn frame(&self) -> Option<&LoadedFrame> {
        self.frame.as_ref()
    }

    /// Swap in `frame` unless the current object URL moved on from `shown`
    pub fn replace_frame_if_current(&mut self, shown: Option<&ObjectUrl>, frame: LoadedFrame) -> bool {
        if self.current.as_ref() != shown || self.frame.is_none() {
            return false;
        }
        self.frame = Some(frame);
        true
    }

    pub fn current_url(&self) -> Option<&ObjectUrl> {
        self.current.as_ref()
    }

    pub fn current_image(&self) -> Option<Arc<CapturedImage>> {
        self.current.as_ref().and_then(|u| self.urls.resolve(u))
    }

    pub fn object_urls(&self) -> &ObjectUrls {
        &self.urls
    }
}
