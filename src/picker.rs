//! Element picker.
//!
//! Two states. While `Picking`, pointer movement highlights the element under
//! the cursor and a click captures it; Escape cancels. At most one element is
//! highlighted at a time because the highlight lives inside the state itself.

use tracing::debug;

use crate::page::{Cursor, ElementDescription, PageHost, Rect};
use crate::types::{PickedElement, take_chars};

pub const ATTRIBUTE_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum PickerState<N> {
    Idle,
    Picking { highlighted: Option<N> },
}

/// What the picker did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum PickerOutcome {
    /// Not handled; the event reaches page handlers as usual.
    Ignored,
    /// The overlay now covers this box.
    Highlighted(Rect),
    /// A pick completed. The click's default action and propagation must be
    /// suppressed, and the picker is idle again.
    Picked(PickedElement),
    /// Escape ended picking without a selection.
    Cancelled,
}

impl PickerOutcome {
    pub fn suppresses_default(&self) -> bool {
        matches!(self, PickerOutcome::Picked(_))
    }
}

#[derive(Debug)]
pub struct Picker<N> {
    state: PickerState<N>,
}

impl<N> Default for Picker<N> {
    fn default() -> Self {
        Self {
            state: PickerState::Idle,
        }
    }
}

impl<N: Clone + PartialEq + std::fmt::Debug> Picker<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PickerState<N> {
        &self.state
    }

    pub fn is_picking(&self) -> bool {
        matches!(self.state, PickerState::Picking { .. })
    }

    pub fn highlighted(&self) -> Option<&N> {
        match &self.state {
            PickerState::Picking { highlighted } => highlighted.as_ref(),
            PickerState::Idle => None,
        }
    }

    /// Idle → Picking. Returns false when already picking.
    pub fn enable<H: PageHost<Node = N>>(&mut self, host: &mut H) -> bool {
        if self.is_picking() {
            return false;
        }
        host.install_overlay();
        host.attach_listeners();
        host.set_cursor(Cursor::Crosshair);
        self.state = PickerState::Picking { highlighted: None };
        debug!("Element picker enabled");
        true
    }

    /// Picking → Idle. Returns false when already idle.
    pub fn disable<H: PageHost<Node = N>>(&mut self, host: &mut H) -> bool {
        if !self.is_picking() {
            return false;
        }
        host.remove_overlay();
        host.detach_listeners();
        host.set_cursor(Cursor::Default);
        self.state = PickerState::Idle;
        debug!("Element picker disabled");
        true
    }

    pub fn pointer_move<H: PageHost<Node = N>>(
        &mut self,
        host: &mut H,
        x: f64,
        y: f64,
    ) -> PickerOutcome {
        let PickerState::Picking { highlighted } = &mut self.state else {
            return PickerOutcome::Ignored;
        };
        let Some(node) = host.element_at(x, y) else {
            return PickerOutcome::Ignored;
        };
        // Never highlight our own UI.
        if host.is_overlay(&node) || host.is_in_panel(&node) {
            return PickerOutcome::Ignored;
        }

        let rect = host.bounding_rect(&node);
        host.place_overlay(rect);
        *highlighted = Some(node);
        PickerOutcome::Highlighted(rect)
    }

    pub fn click<H: PageHost<Node = N>>(&mut self, host: &mut H, target: &N) -> PickerOutcome {
        let Some(node) = self.highlighted().cloned() else {
            return PickerOutcome::Ignored;
        };
        if host.is_in_panel(target) {
            return PickerOutcome::Ignored;
        }
        let Some(description) = host.describe(&node) else {
            return PickerOutcome::Ignored;
        };

        let picked = capture_element(description);
        debug!(tag = %picked.tag_name, id = %picked.id, "Element picked");
        self.disable(host);
        PickerOutcome::Picked(picked)
    }

    pub fn key_down<H: PageHost<Node = N>>(&mut self, host: &mut H, key: &str) -> PickerOutcome {
        if key == "Escape" && self.disable(host) {
            PickerOutcome::Cancelled
        } else {
            PickerOutcome::Ignored
        }
    }
}

/// Snapshot an element: full text and markup, attribute values capped.
pub fn capture_element(description: ElementDescription) -> PickedElement {
    PickedElement {
        tag_name: description.tag_name.to_ascii_lowercase(),
        id: description.id,
        class_name: description.class_name,
        text_content: description.text_content.trim().to_string(),
        outer_html: description.outer_html,
        attributes: description
            .attributes
            .into_iter()
            .map(|(name, value)| {
                let value = take_chars(&value, ATTRIBUTE_MAX_CHARS).to_string();
                (name, value)
            })
            .collect(),
        computed_styles: description.computed_styles,
    }
}
