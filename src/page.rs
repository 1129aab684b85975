//! The in-page environment the picker and extractor run against.
//!
//! [`PageHost`] is the seam between page-side logic and whatever actually
//! renders the document. [`StaticPage`] is a host over a parsed HTML document
//! with an explicit layout table, used by the CLI and by tests.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

use crate::extract::{self, PANEL_ID};
use crate::types::{ComputedStyles, PageSummary};

/// Viewport-relative box, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Cursor {
    #[default]
    Default,
    Crosshair,
}

/// An element as the host reports it, before any capping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementDescription {
    pub tag_name: String,
    pub id: String,
    pub class_name: String,
    pub text_content: String,
    pub outer_html: String,
    pub attributes: Vec<(String, String)>,
    pub computed_styles: ComputedStyles,
}

pub trait PageHost {
    type Node: Clone + PartialEq + std::fmt::Debug;

    /// Extract a bounded summary of the current document.
    fn page_summary(&self) -> PageSummary;

    /// Topmost element under the viewport point, if any.
    fn element_at(&self, x: f64, y: f64) -> Option<Self::Node>;
    fn bounding_rect(&self, node: &Self::Node) -> Rect;
    fn is_overlay(&self, node: &Self::Node) -> bool;
    /// True when `node` is the extension panel or lies inside it.
    fn is_in_panel(&self, node: &Self::Node) -> bool;
    fn describe(&self, node: &Self::Node) -> Option<ElementDescription>;

    /// Add the hidden, pointer-transparent highlight box.
    fn install_overlay(&mut self);
    /// Show the highlight box over `rect`.
    fn place_overlay(&mut self, rect: Rect);
    fn remove_overlay(&mut self);
    /// Capture-phase pointer-move, click and key-down listeners.
    fn attach_listeners(&mut self);
    fn detach_listeners(&mut self);
    fn set_cursor(&mut self, cursor: Cursor);
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverlayBox {
    pub rect: Rect,
    pub visible: bool,
}

/// Elements are addressed by their position in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageNode {
    Element(usize),
    Overlay,
}

const INLINE_TAGS: [&str; 12] = [
    "a", "abbr", "b", "code", "em", "i", "img", "label", "small", "span", "strong", "sub",
];

/// A parsed document plus a hand-specified layout.
///
/// Only elements given a box through [`StaticPage::lay_out`] take part in hit
/// testing. Later boxes paint over earlier ones at the same depth.
pub struct StaticPage {
    url: String,
    document: Html,
    layout: Vec<(usize, Rect)>,
    overlays: Vec<OverlayBox>,
    listener_sets: usize,
    cursor: Cursor,
}

impl StaticPage {
    pub fn new(url: impl Into<String>, html: &str) -> Self {
        Self {
            url: url.into(),
            document: Html::parse_document(html),
            layout: Vec::new(),
            overlays: Vec::new(),
            listener_sets: 0,
            cursor: Cursor::Default,
        }
    }

    /// Give the first element matching `css` a box. Returns false when
    /// nothing matches.
    pub fn lay_out(&mut self, css: &str, rect: Rect) -> bool {
        match self.node(css) {
            Some(PageNode::Element(id)) => {
                self.layout.retain(|(existing, _)| *existing != id);
                self.layout.push((id, rect));
                true
            }
            _ => false,
        }
    }

    /// First element matching `css`.
    pub fn node(&self, css: &str) -> Option<PageNode> {
        let sel = Selector::parse(css).ok()?;
        let target = self.document.select(&sel).next()?;
        self.elements()
            .position(|el| el.id() == target.id())
            .map(PageNode::Element)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn overlays(&self) -> &[OverlayBox] {
        &self.overlays
    }

    pub fn listener_sets(&self) -> usize {
        self.listener_sets
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
    }

    fn element(&self, node: &PageNode) -> Option<ElementRef<'_>> {
        match node {
            PageNode::Element(index) => self.elements().nth(*index),
            PageNode::Overlay => None,
        }
    }

    fn depth(&self, index: usize) -> usize {
        self.elements()
            .nth(index)
            .map(|el| el.ancestors().count())
            .unwrap_or(0)
    }

    fn layout_of(&self, id: usize) -> Option<Rect> {
        self.layout
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, rect)| *rect)
    }

    fn computed_styles(&self, element: ElementRef<'_>, rect: Option<Rect>) -> ComputedStyles {
        let tag = element.value().name();
        let mut styles = ComputedStyles {
            display: if INLINE_TAGS.contains(&tag) {
                "inline"
            } else {
                "block"
            }
            .to_string(),
            position: "static".to_string(),
            width: rect.map_or_else(|| "auto".to_string(), |r| format!("{}px", r.width)),
            height: rect.map_or_else(|| "auto".to_string(), |r| format!("{}px", r.height)),
            color: "rgb(0, 0, 0)".to_string(),
            background_color: "rgba(0, 0, 0, 0)".to_string(),
            font_size: "16px".to_string(),
            font_family: "Times New Roman".to_string(),
        };

        for (property, value) in inline_declarations(element.value().attr("style").unwrap_or("")) {
            let slot = match property.as_str() {
                "display" => &mut styles.display,
                "position" => &mut styles.position,
                "width" => &mut styles.width,
                "height" => &mut styles.height,
                "color" => &mut styles.color,
                "background-color" => &mut styles.background_color,
                "font-size" => &mut styles.font_size,
                "font-family" => &mut styles.font_family,
                _ => continue,
            };
            *slot = value;
        }
        styles
    }
}

fn inline_declarations(style: &str) -> BTreeMap<String, String> {
    style
        .split(';')
        .filter_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim();
            (!property.is_empty() && !value.is_empty()).then(|| (property, value.to_string()))
        })
        .collect()
}

impl PageHost for StaticPage {
    type Node = PageNode;

    fn page_summary(&self) -> PageSummary {
        extract::summarize(&self.url, &self.document)
    }

    fn element_at(&self, x: f64, y: f64) -> Option<PageNode> {
        // The overlay is pointer-transparent, so it never wins a hit test.
        self.layout
            .iter()
            .enumerate()
            .filter(|(_, (_, rect))| rect.contains(x, y))
            .max_by_key(|(order, (id, _))| (self.depth(*id), *order))
            .map(|(_, (id, _))| PageNode::Element(*id))
    }

    fn bounding_rect(&self, node: &PageNode) -> Rect {
        match node {
            PageNode::Element(id) => self.layout_of(*id).unwrap_or_default(),
            PageNode::Overlay => self.overlays.last().map(|o| o.rect).unwrap_or_default(),
        }
    }

    fn is_overlay(&self, node: &PageNode) -> bool {
        matches!(node, PageNode::Overlay)
    }

    fn is_in_panel(&self, node: &PageNode) -> bool {
        let Some(start) = self.element(node) else {
            return false;
        };
        start.value().id() == Some(PANEL_ID)
            || start
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|el| el.value().id() == Some(PANEL_ID))
    }

    fn describe(&self, node: &PageNode) -> Option<ElementDescription> {
        let element = self.element(node)?;
        let value = element.value();
        let rect = match node {
            PageNode::Element(id) => self.layout_of(*id),
            PageNode::Overlay => None,
        };
        Some(ElementDescription {
            tag_name: value.name().to_ascii_lowercase(),
            id: value.id().unwrap_or_default().to_string(),
            class_name: value.attr("class").unwrap_or_default().to_string(),
            text_content: extract::text_content(element),
            outer_html: element.html(),
            attributes: value
                .attrs()
                .map(|(name, val)| (name.to_string(), val.to_string()))
                .collect(),
            computed_styles: self.computed_styles(element, rect),
        })
    }

    fn install_overlay(&mut self) {
        self.overlays.push(OverlayBox::default());
    }

    fn place_overlay(&mut self, rect: Rect) {
        if let Some(overlay) = self.overlays.last_mut() {
            overlay.rect = rect;
            overlay.visible = true;
        }
    }

    fn remove_overlay(&mut self) {
        self.overlays.pop();
    }

    fn attach_listeners(&mut self) {
        self.listener_sets += 1;
    }

    fn detach_listeners(&mut self) {
        self.listener_sets = self.listener_sets.saturating_sub(1);
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }
}
