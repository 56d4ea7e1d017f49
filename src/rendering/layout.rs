/// Block layout for loaded frames

use crate::rendering::raster::MAX_CANVAS_DIMENSION;
use scraper::{ElementRef, Html, Node};

/// Width and height of one glyph cell at scale 1
pub const CELL: u32 = 8;
const PAGE_MARGIN: u32 = 8;
const DEFAULT_IMAGE_SIZE: (u32, u32) = (150, 100);

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub margin: u32,
    pub border: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub box_model: BoxModel,
}

impl LayoutBox {
    pub fn content_width(&self) -> u32 {
        let total = self.box_model.margin + self.box_model.border + self.box_model.padding;
        self.rect.width.saturating_sub(total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Heading,
    Paragraph,
    ListItem,
    Preformatted,
    /// An `<img>`; `src` is already absolute after rewriting
    Image { src: String },
    Rule,
}

#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub lb: LayoutBox,
    pub text: String,
    pub elem_type: ElementType,
    pub scale: u32,
}

/// Laid-out page: blocks in paint order plus the scroll height
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pub width: u32,
    pub nodes: Vec<LayoutNode>,
    pub content_height: u32,
}

const SKIPPED: &[&str] = &[
    "head", "title", "script", "style", "noscript", "template", "meta", "link", "base", "svg",
    "iframe", "object", "select", "canvas",
];

const INLINE: &[&str] = &[
    "a", "span", "b", "i", "em", "strong", "code", "small", "sup", "sub", "label", "abbr", "u",
    "s", "mark", "time", "cite", "q", "kbd", "br",
];

fn text_block(tag: &str) -> Option<(ElementType, u32)> {
    match tag {
        "h1" | "h2" => Some((ElementType::Heading, 2)),
        "h3" | "h4" | "h5" | "h6" => Some((ElementType::Heading, 1)),
        "p" | "blockquote" | "figcaption" | "caption" | "dt" | "dd" | "td" | "th" | "button"
        | "summary" | "address" => Some((ElementType::Paragraph, 1)),
        "li" => Some((ElementType::ListItem, 1)),
        "pre" => Some((ElementType::Preformatted, 1)),
        _ => None,
    }
}

/// Lay out the body of `document` at `width` pixels.
///
/// Blocks stack vertically. Headings render at scale 2 (h1/h2), text wraps
/// on word boundaries, images keep their declared aspect ratio and shrink to
/// fit the content width.
pub fn layout_document(document: &Html, width: u32) -> PageLayout {
    let mut builder = LayoutBuilder {
        width,
        y: PAGE_MARGIN,
        nodes: Vec::new(),
        pending: String::new(),
    };

    let html = document.root_element();
    let root = html
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
        .unwrap_or(html);
    builder.walk(root);
    builder.flush_inline();

    PageLayout {
        width,
        content_height: builder.y.saturating_add(PAGE_MARGIN),
        nodes: builder.nodes,
    }
}

struct LayoutBuilder {
    width: u32,
    y: u32,
    nodes: Vec<LayoutNode>,
    pending: String,
}

impl LayoutBuilder {
    fn walk(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    self.pending.push_str(text);
                }
                Node::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else { continue };
                    let tag = child_el.value().name();
                    if SKIPPED.contains(&tag) {
                        continue;
                    }
                    if INLINE.contains(&tag) {
                        if tag == "br" {
                            self.pending.push(' ');
                        } else {
                            self.pending.extend(child_el.text());
                        }
                        continue;
                    }
                    self.flush_inline();
                    match tag {
                        "img" => self.image(child_el),
                        "hr" => self.rule(),
                        _ => match text_block(tag) {
                            Some((kind, scale)) => {
                                let raw = child_el.text().collect::<String>();
                                self.text_block(&raw, kind, scale);
                                for img in child_el.descendants().filter_map(ElementRef::wrap) {
                                    if img.value().name() == "img" {
                                        self.image(img);
                                    }
                                }
                            }
                            None => {
                                self.walk(child_el);
                                self.flush_inline();
                            }
                        },
                    }
                }
                _ => {}
            }
        }
    }

    fn flush_inline(&mut self) {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return;
        }
        let text = std::mem::take(&mut self.pending);
        self.text_block(&text, ElementType::Paragraph, 1);
    }

    fn text_block(&mut self, raw: &str, kind: ElementType, scale: u32) {
        let padding = if kind == ElementType::Heading { 8 } else { 6 };
        let indent = if kind == ElementType::ListItem { 2 * CELL } else { 0 };
        let box_w = self.width.saturating_sub(2 * PAGE_MARGIN);
        let content_w = box_w.saturating_sub(padding * 2 + indent);
        let chars_per_line = ((content_w / (CELL * scale)) as usize).max(1);

        let text = if kind == ElementType::Preformatted {
            raw.lines()
                .flat_map(|l| hard_wrap(l, chars_per_line))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            wrap_words(raw, chars_per_line).join("\n")
        };
        if text.trim().is_empty() {
            return;
        }

        let lines = (text.lines().count() as u32).max(1);
        let box_h = lines.saturating_mul(CELL * scale).saturating_add(padding * 2);
        self.push(
            LayoutBox {
                rect: Rect {
                    x: PAGE_MARGIN as i32,
                    y: self.y as i32,
                    width: box_w,
                    height: box_h,
                },
                box_model: BoxModel { margin: padding, border: 0, padding },
            },
            text,
            kind,
            scale,
        );
    }

    fn image(&mut self, el: ElementRef<'_>) {
        let src = el.value().attr("src").unwrap_or("").trim().to_string();
        let dim = |name: &str| {
            el.value()
                .attr(name)
                .and_then(|v| v.trim().trim_end_matches("px").parse::<u32>().ok())
                .filter(|v| *v > 0)
                .map(|v| v.min(MAX_CANVAS_DIMENSION))
        };
        let (mut w, mut h) = match (dim("width"), dim("height")) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, (w * DEFAULT_IMAGE_SIZE.1 / DEFAULT_IMAGE_SIZE.0).max(1)),
            (None, Some(h)) => (h * DEFAULT_IMAGE_SIZE.0 / DEFAULT_IMAGE_SIZE.1, h),
            (None, None) => DEFAULT_IMAGE_SIZE,
        };
        let max_w = self.width.saturating_sub(2 * PAGE_MARGIN).max(1);
        if w > max_w {
            h = (h as u64 * max_w as u64 / w as u64).max(1) as u32;
            w = max_w;
        }
        self.push(
            LayoutBox {
                rect: Rect {
                    x: PAGE_MARGIN as i32,
                    y: self.y as i32,
                    width: w,
                    height: h,
                },
                box_model: BoxModel { margin: 4, border: 0, padding: 0 },
            },
            el.value().attr("alt").unwrap_or("").to_string(),
            ElementType::Image { src },
            1,
        );
    }

    fn rule(&mut self) {
        self.push(
            LayoutBox {
                rect: Rect {
                    x: PAGE_MARGIN as i32,
                    y: self.y as i32,
                    width: self.width.saturating_sub(2 * PAGE_MARGIN),
                    height: 2,
                },
                box_model: BoxModel { margin: 6, border: 1, padding: 0 },
            },
            String::new(),
            ElementType::Rule,
            1,
        );
    }

    fn push(&mut self, mut lb: LayoutBox, text: String, elem_type: ElementType, scale: u32) {
        // past the largest canvas nothing is painted
        if self.y > MAX_CANVAS_DIMENSION {
            return;
        }
        lb.rect.height = lb.rect.height.min(MAX_CANVAS_DIMENSION);
        self.y = self
            .y
            .saturating_add(lb.rect.height)
            .saturating_add(lb.box_model.margin);
        self.nodes.push(LayoutNode { lb, text, elem_type, scale });
    }
}

fn wrap_words(txt: &str, chars_per_line: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in txt.split_whitespace() {
        if cur.chars().count() + word.chars().count() + 1 > chars_per_line && !cur.is_empty() {
            lines.push(std::mem::take(&mut cur));
        }
        if !cur.is_empty() {
            cur.push(' ');
        }
        cur.push_str(word);
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    lines
}

fn hard_wrap(line: &str, chars_per_line: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(chars_per_line).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn layout_document_places_heading_and_paragraphs() {
        let html = "<html><head><title>Test Title</title></head><body><h1>Heading</h1><p>Hello world</p><p>More text</p></body></html>";
        let doc = Html::parse_document(html);
        let page = layout_document(&doc, 200);
        assert_eq!(page.nodes.len(), 3);
        assert_eq!(page.nodes[0].elem_type, ElementType::Heading);
        assert_eq!(page.nodes[0].scale, 2);
        assert_eq!(page.nodes[1].elem_type, ElementType::Paragraph);
        assert!(page.nodes[1].lb.rect.y > page.nodes[0].lb.rect.y);
        assert!(page.content_height > page.nodes[2].lb.rect.y as u32);
    }

    #[test]
    fn loose_text_becomes_anonymous_paragraph() {
        let doc = Html::parse_document("<body><div>Loose <b>bold</b> text</div></body>");
        let page = layout_document(&doc, 320);
        assert_eq!(page.nodes.len(), 1);
        assert_eq!(page.nodes[0].text, "Loose bold text");
    }

    #[test]
    fn long_paragraph_wraps_and_grows_height() {
        let words = "word ".repeat(200);
        let doc = Html::parse_document(&format!("<p>{}</p>", words));
        let narrow = layout_document(&doc, 320);
        let wide = layout_document(&doc, 1280);
        assert!(narrow.nodes[0].text.lines().count() > 1);
        assert!(narrow.content_height > wide.content_height);
    }

    #[test]
    fn images_shrink_to_fit_width() {
        let doc = Html::parse_document(r#"<img src="https://example.com/a.png" width="1000" height="500">"#);
        let page = layout_document(&doc, 320);
        let img = &page.nodes[0];
        assert_eq!(img.elem_type, ElementType::Image { src: "https://example.com/a.png".into() });
        assert_eq!(img.lb.rect.width, 304);
        assert_eq!(img.lb.rect.height, 152);
    }

    #[test]
    fn huge_image_attributes_are_bounded() {
        let doc = Html::parse_document(r#"<img src="a.png" width="50000000">"#);
        let page = layout_document(&doc, 320);
        assert_eq!(page.nodes[0].lb.rect.width, 304);
        assert!(page.nodes[0].lb.rect.height >= 1);

        let doc = Html::parse_document(r#"<img src="a.png" width="10" height="400000000">"#);
        let page = layout_document(&doc, 320);
        assert_eq!(page.nodes[0].lb.rect.width, 10);
        assert_eq!(page.nodes[0].lb.rect.height, MAX_CANVAS_DIMENSION);
    }

    #[test]
    fn blocks_below_the_largest_canvas_are_dropped() {
        let imgs = r#"<img src="a.png" width="10" height="30000">"#.repeat(10);
        let doc = Html::parse_document(&imgs);
        let page = layout_document(&doc, 320);
        assert_eq!(page.nodes.len(), 2);
        assert!(page.content_height < 2 * MAX_CANVAS_DIMENSION + 64);
    }

    #[test]
    fn scripts_and_styles_are_not_laid_out() {
        let doc = Html::parse_document("<body><script>var a = 1;</script><style>p{}</style><p>x</p></body>");
        let page = layout_document(&doc, 640);
        assert_eq!(page.nodes.len(), 1);
        assert_eq!(page.nodes[0].text, "x");
    }
}
