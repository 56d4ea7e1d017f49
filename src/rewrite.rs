//! Markup rewriting for out-of-origin rendering.
//!
//! Fetched pages are rendered away from their own origin, so every relative
//! resource reference has to be pinned to the source origin. Stricter modes
//! also drop what a scripts-disabled sandbox cannot use. The rewrite happens
//! while serializing the parsed tree; the parsed document itself is never
//! mutated.

use log::{debug, warn};
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};
use url::Url;

/// Rewrite policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteMode {
    /// Only absolutize resource URLs
    Permissive,
    /// Absolutize, then strip scripts, meta tags, non-stylesheet links and anchor targets
    #[default]
    Strict,
    /// Strict, then move head children into the body and drop the head
    Flattened,
}

impl RewriteMode {
    fn strips(self) -> bool {
        !matches!(self, RewriteMode::Permissive)
    }

    /// Capture-oriented modes pin the root to a fixed, non-scrolling viewport
    fn hides_overflow(self) -> bool {
        !matches!(self, RewriteMode::Permissive)
    }
}

impl std::str::FromStr for RewriteMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(RewriteMode::Permissive),
            "strict" => Ok(RewriteMode::Strict),
            "flattened" => Ok(RewriteMode::Flattened),
            other => Err(crate::Error::ConfigError(format!("unknown rewrite mode '{}'", other))),
        }
    }
}

/// Outcome of [`rewrite_html`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewrittenDocument {
    Rewritten(String),
    /// The input could not be rewritten and is passed through untouched
    Fallback { html: String, reason: String },
}

impl RewrittenDocument {
    pub fn html(&self) -> &str {
        match self {
            RewrittenDocument::Rewritten(html) => html,
            RewrittenDocument::Fallback { html, .. } => html,
        }
    }

    pub fn into_html(self) -> String {
        match self {
            RewrittenDocument::Rewritten(html) => html,
            RewrittenDocument::Fallback { html, .. } => html,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RewrittenDocument::Fallback { .. })
    }
}

const ABSOLUTE_SCHEMES: &[&str] = &[
    "http:", "https:", "data:", "blob:", "mailto:", "tel:", "javascript:", "about:", "ftp:",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "xmp", "iframe", "noembed", "noframes", "noscript", "plaintext",
];

const OVERFLOW_RULE: &str = "overflow-y: hidden";

/// Rewrite `html` fetched from `source_url` according to `mode`.
///
/// Never fails: when the source URL has no usable origin or the document has
/// no root element, the input comes back unchanged as
/// [`RewrittenDocument::Fallback`].
pub fn rewrite_html(html: &str, source_url: &str, mode: RewriteMode) -> RewrittenDocument {
    let fallback = |reason: String| {
        warn!("rewrite skipped for {}: {}", source_url, reason);
        RewrittenDocument::Fallback {
            html: html.to_string(),
            reason,
        }
    };

    let source = match Url::parse(source_url.trim()) {
        Ok(u) => u,
        Err(e) => return fallback(format!("invalid source URL: {}", e)),
    };
    let origin = source.origin();
    if !origin.is_tuple() {
        return fallback("source URL has an opaque origin".into());
    }

    let document = Html::parse_document(html);
    if !document.errors.is_empty() {
        debug!("parsed {} with {} recoverable errors", source_url, document.errors.len());
    }
    let has_root = document.tree.root().children().any(|c| c.value().is_element());
    if !has_root {
        return fallback("document has no root element".into());
    }

    let mut writer = RewriteWriter {
        out: String::with_capacity(html.len() + 128),
        origin: origin.ascii_serialization(),
        scheme: source.scheme().to_string(),
        mode,
    };
    writer.element(document.root_element());
    RewrittenDocument::Rewritten(writer.out)
}

/// Resolve `value` against the source origin.
///
/// Returns `None` when the value is already absolute, empty, or fragment-only.
pub fn absolutize(value: &str, origin: &str, scheme: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if ABSOLUTE_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return None;
    }
    if trimmed.starts_with("//") {
        return Some(format!("{}:{}", scheme, trimmed));
    }
    if trimmed.starts_with('/') {
        Some(format!("{}{}", origin, trimmed))
    } else {
        Some(format!("{}/{}", origin, trimmed))
    }
}

fn is_stylesheet(el: &ElementRef<'_>) -> bool {
    el.value()
        .attr("rel")
        .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
        .unwrap_or(false)
}

fn carries_resource_url(tag: &str, attr: &str) -> bool {
    matches!(
        (tag, attr),
        ("img", "src") | ("script", "src") | ("link", "href") | ("a", "href")
    )
}

struct RewriteWriter {
    out: String,
    origin: String,
    scheme: String,
    mode: RewriteMode,
}

impl RewriteWriter {
    fn dropped(&self, el: &ElementRef<'_>) -> bool {
        if !self.mode.strips() {
            return false;
        }
        match el.value().name() {
            "script" | "meta" => true,
            "link" => !is_stylesheet(el),
            _ => false,
        }
    }

    fn element(&mut self, el: ElementRef<'_>) {
        if self.dropped(&el) {
            return;
        }
        let tag = el.value().name();

        match tag {
            "head" if self.mode == RewriteMode::Flattened => {
                // children are re-emitted at the start of <body>
            }
            "head" => {
                self.open_tag(&el);
                self.base_tag();
                self.children(el, false);
                self.close_tag(tag);
            }
            "body" if self.mode == RewriteMode::Flattened => {
                self.open_tag(&el);
                self.base_tag();
                let head = el
                    .parent()
                    .and_then(ElementRef::wrap)
                    .and_then(|html| {
                        html.children()
                            .filter_map(ElementRef::wrap)
                            .find(|c| c.value().name() == "head")
                    });
                if let Some(head) = head {
                    self.children(head, false);
                }
                self.children(el, false);
                self.close_tag(tag);
            }
            _ => {
                self.open_tag(&el);
                if VOID_ELEMENTS.contains(&tag) {
                    return;
                }
                self.children(el, RAW_TEXT_ELEMENTS.contains(&tag));
                self.close_tag(tag);
            }
        }
    }

    fn children(&mut self, el: ElementRef<'_>, raw_text: bool) {
        for child in el.children() {
            match child.value() {
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        if self.is_own_base(&child_el) {
                            continue;
                        }
                        self.element(child_el);
                    }
                }
                Node::Text(text) => {
                    if raw_text {
                        self.out.push_str(text);
                    } else {
                        escape_into(&mut self.out, text, false);
                    }
                }
                Node::Comment(comment) => {
                    self.out.push_str("<!--");
                    self.out.push_str(comment);
                    self.out.push_str("-->");
                }
                _ => {}
            }
        }
    }

    /// A `<base>` left by an earlier rewrite pass
    fn is_own_base(&self, el: &ElementRef<'_>) -> bool {
        el.value().name() == "base" && el.value().attr("href") == Some(self.origin.as_str())
    }

    fn base_tag(&mut self) {
        self.out.push_str("<base href=\"");
        escape_into(&mut self.out, &self.origin, true);
        self.out.push_str("\">");
    }

    fn open_tag(&mut self, el: &ElementRef<'_>) {
        let tag = el.value().name();
        self.out.push('<');
        self.out.push_str(tag);

        let mut saw_style = false;
        // source order; scraper is built with `deterministic`
        for (name, value) in el.value().attrs() {
            if self.mode.strips() && tag == "a" && name == "href" {
                continue;
            }
            let value = if carries_resource_url(tag, name) {
                absolutize(value, &self.origin, &self.scheme).unwrap_or_else(|| value.to_string())
            } else if tag == "html" && name == "style" && self.mode.hides_overflow() {
                saw_style = true;
                with_overflow_hidden(value)
            } else {
                value.to_string()
            };
            self.attr(name, &value);
        }

        if tag == "html" && self.mode.hides_overflow() && !saw_style {
            self.attr("style", OVERFLOW_RULE);
        }
        self.out.push('>');
    }

    fn attr(&mut self, name: &str, value: &str) {
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        escape_into(&mut self.out, value, true);
        self.out.push('"');
    }

    fn close_tag(&mut self, tag: &str) {
        self.out.push_str("</");
        self.out.push_str(tag);
        self.out.push('>');
    }
}

fn with_overflow_hidden(style: &str) -> String {
    let trimmed = style.trim().trim_end_matches(';').trim_end();
    if trimmed.contains(OVERFLOW_RULE) {
        style.to_string()
    } else if trimmed.is_empty() {
        OVERFLOW_RULE.to_string()
    } else {
        format!("{}; {}", trimmed, OVERFLOW_RULE)
    }
}

fn escape_into(out: &mut String, text: &str, attr_mode: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attr_mode => out.push_str("&quot;"),
            '<' if !attr_mode => out.push_str("&lt;"),
            '>' if !attr_mode => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}
