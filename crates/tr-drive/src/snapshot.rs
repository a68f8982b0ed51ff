//! Immutable page and frame captures.

use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_dom::Selector;
use tr_net::Location;

/// Detached copy of a document (or one element) plus the `<meta>`
/// directives that decide how it may be cached and rendered.
///
/// A snapshot never changes after construction; renderers import from it
/// into the live document instead of moving its nodes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    document: Document,
    root: NodeId,
}

impl Snapshot {
    /// Parses a full response body.
    pub fn from_html(html: &str) -> DriveResult<Self> {
        Ok(Self::wrap(tr_html::parse_document(html)?))
    }

    /// Captures the live document for the snapshot cache.
    ///
    /// Live form state comes along with the clone. Password values are
    /// blanked and `data-turbo-temporary` elements dropped.
    pub fn from_document(live: &Document) -> DriveResult<Self> {
        let mut document = live.clone();
        let root = document.root();

        let passwords = Selector::attribute_equals(Some("input"), "type", "password");
        for input in document.query_all(root, &passwords) {
            document.set_value(input, "")?;
        }

        let temporary = Selector::parse("[data-turbo-temporary]")?;
        for element in document.query_all(root, &temporary) {
            if document.is_alive(element) {
                document.dispose(element);
            }
        }

        Ok(Self::wrap(document))
    }

    /// Captures one element, typically a frame, as the snapshot root.
    pub fn from_element(source: &Document, element: NodeId) -> DriveResult<Self> {
        let mut document = Document::new();
        let root = document.root();
        let copy = document.import_node(source, element)?;
        document.append_child(root, copy)?;
        Ok(Self {
            document,
            root: copy,
        })
    }

    fn wrap(document: Document) -> Self {
        let root = document.document_element().unwrap_or(document.root());
        Self { document, root }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// `<html>` for page snapshots, the captured element otherwise.
    pub fn root_element(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> Option<NodeId> {
        self.document.head()
    }

    /// `<body>` for page snapshots, the captured element for element
    /// snapshots.
    pub fn body(&self) -> Option<NodeId> {
        self.document.body().or_else(|| {
            self.document
                .is_element(self.root)
                .then_some(self.root)
                .filter(|root| !self.document.has_tag(*root, "html"))
        })
    }

    /// `content` of `<meta name=…>` in the head.
    pub fn meta(&self, name: &str) -> Option<&str> {
        let head = self.head()?;
        self.document
            .children(head)
            .iter()
            .copied()
            .find(|child| {
                self.document.has_tag(*child, "meta") && self.document.attr(*child, "name") == Some(name)
            })
            .and_then(|meta| self.document.attr(meta, "content"))
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.meta("turbo-cache-control")
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache_control() != Some("no-cache")
    }

    pub fn is_previewable(&self) -> bool {
        self.is_cacheable() && self.cache_control() != Some("no-preview")
    }

    pub fn is_visitable(&self) -> bool {
        self.meta("turbo-visit-control") != Some("reload")
    }

    pub fn should_morph_page(&self) -> bool {
        self.meta("turbo-refresh-method") == Some("morph")
    }

    pub fn should_preserve_scroll_position(&self) -> bool {
        self.meta("turbo-refresh-scroll") == Some("preserve")
    }

    pub fn prefetch_enabled(&self) -> bool {
        self.meta("turbo-prefetch") != Some("false")
    }

    /// Application root declared by `turbo-root`, `/` when absent.
    pub fn root_location(&self, base: &Location) -> Location {
        let declared = self.meta("turbo-root").unwrap_or("/");
        base.join(declared).unwrap_or_else(|_| base.clone())
    }

    /// Serialized markup of every head element tracked for reload.
    pub fn tracked_signature(&self) -> String {
        tracked_signature(&self.document)
    }

    pub fn title(&self) -> Option<String> {
        let head = self.head()?;
        self.document
            .children(head)
            .iter()
            .find(|child| self.document.has_tag(**child, "title"))
            .map(|title| self.document.text_content(*title).trim().to_owned())
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.document.element_by_id_within(self.root, id)
    }

    /// True when `anchor` names an element by id or an `<a name>`.
    pub fn has_anchor(&self, anchor: &str) -> bool {
        self.element_by_id(anchor).is_some()
            || self
                .document
                .query(self.root, &Selector::attribute_equals(Some("a"), "name", anchor))
                .is_some()
    }
}

/// Tracked head signature of any document, live or captured.
pub fn tracked_signature(document: &Document) -> String {
    let Some(head) = document.head() else {
        return String::new();
    };
    document
        .element_children(head)
        .into_iter()
        .filter(|child| document.attr(*child, "data-turbo-track") == Some("reload"))
        .map(|child| document.outer_html(child))
        .collect()
}
