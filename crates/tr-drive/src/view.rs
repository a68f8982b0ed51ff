//! The live page the engine renders into.

use crate::history::ScrollPosition;
use crate::snapshot::Snapshot;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_dom::Selector;
use tr_net::Location;

/// Where the page was last scrolled to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollTarget {
    Position(ScrollPosition),
    /// An element was scrolled into view.
    Element(NodeId),
}

#[derive(Debug, Clone)]
pub struct View {
    document: Document,
    location: Location,
    scroll: ScrollTarget,
    focused: Option<NodeId>,
    visible: bool,
}

impl View {
    pub fn new(location: Location, document: Document) -> Self {
        Self {
            document,
            location,
            scroll: ScrollTarget::Position(ScrollPosition::TOP),
            focused: None,
            visible: true,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Swaps in a freshly loaded document, as a full page load does.
    pub fn replace_document(&mut self, location: Location, document: Document) {
        self.document = document;
        self.location = location;
        self.scroll = ScrollTarget::Position(ScrollPosition::TOP);
        self.focused = None;
    }

    /// Location of the last rendered page.
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub fn title(&self) -> String {
        let Some(head) = self.document.head() else {
            return String::new();
        };
        self.document
            .children(head)
            .iter()
            .find(|child| self.document.has_tag(**child, "title"))
            .map(|title| self.document.text_content(*title).trim().to_owned())
            .unwrap_or_default()
    }

    pub fn scroll(&self) -> ScrollTarget {
        self.scroll
    }

    /// Last explicit scroll position, top when an element was scrolled to.
    pub fn scroll_position(&self) -> ScrollPosition {
        match self.scroll {
            ScrollTarget::Position(position) => position,
            ScrollTarget::Element(_) => ScrollPosition::TOP,
        }
    }

    pub fn scroll_to_position(&mut self, position: ScrollPosition) {
        self.scroll = ScrollTarget::Position(position);
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll_to_position(ScrollPosition::TOP);
    }

    pub fn scroll_into_view(&mut self, element: NodeId) {
        self.scroll = ScrollTarget::Element(element);
    }

    /// Scrolls to the element `anchor` names; false when there is none.
    pub fn scroll_to_anchor(&mut self, anchor: &str) -> bool {
        match self.anchor_element(anchor) {
            Some(element) => {
                self.scroll_into_view(element);
                true
            }
            None => false,
        }
    }

    pub fn anchor_element(&self, anchor: &str) -> Option<NodeId> {
        self.document.element_by_id(anchor).or_else(|| {
            self.document.query(
                self.document.root(),
                &Selector::attribute_equals(Some("a"), "name", anchor),
            )
        })
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused.filter(|node| self.document.is_connected(*node))
    }

    pub fn focus(&mut self, element: Option<NodeId>) {
        self.focused = element;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Captures the page for the snapshot cache.
    pub fn snapshot(&self) -> DriveResult<Snapshot> {
        Snapshot::from_document(&self.document)
    }

    /// Meta policy of the page as currently rendered.
    pub fn meta(&self, name: &str) -> Option<String> {
        let head = self.document.head()?;
        self.document
            .children(head)
            .iter()
            .copied()
            .find(|child| {
                self.document.has_tag(*child, "meta") && self.document.attr(*child, "name") == Some(name)
            })
            .and_then(|meta| self.document.attr(meta, "content"))
            .map(str::to_owned)
    }

    pub fn root_location(&self) -> Location {
        let declared = self.meta("turbo-root").unwrap_or_else(|| "/".to_owned());
        self.location
            .join(&declared)
            .unwrap_or_else(|_| self.location.clone())
    }
}
