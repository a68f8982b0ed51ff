//! Decides which user interactions the engine takes over.
//!
//! These are pure predicates over the live document. The session feeds
//! them clicks, hovers and submits; anything they reject is left to the
//! host to handle natively.

use crate::frame::FRAME_TAG;
use crate::visit::VisitAction;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_dom::Selector;
use tr_net::FetchMethod;
use tr_net::Location;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    pub fn any(self) -> bool {
        self.alt || self.ctrl || self.meta || self.shift
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MouseButton {
    #[default]
    Primary,
    Auxiliary,
    Secondary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickInput {
    pub button: MouseButton,
    pub modifiers: Modifiers,
}

impl ClickInput {
    /// Plain primary clicks navigate; anything else opens tabs or menus.
    pub fn is_plain(self) -> bool {
        self.button == MouseButton::Primary && !self.modifiers.any()
    }
}

/// Whether the element or its nearest `data-turbo` ancestor opts out.
pub fn turbo_disabled(document: &Document, element: NodeId) -> bool {
    let Ok(selector) = Selector::parse("[data-turbo]") else {
        return false;
    };
    document
        .closest(element, &selector)
        .and_then(|scope| document.attr(scope, "data-turbo"))
        .is_some_and(|value| value == "false")
}

/// The `<a href>` a click on `target` activates.
pub fn clicked_link(document: &Document, target: NodeId) -> Option<NodeId> {
    let selector = Selector::parse("a[href]").ok()?;
    document.closest(target, &selector)
}

/// Links that download or open elsewhere stay with the host.
pub fn link_is_followable(document: &Document, link: NodeId) -> bool {
    if document.has_attr(link, "download") || turbo_disabled(document, link) {
        return false;
    }
    match document.attr(link, "target").map(str::trim) {
        None | Some("") | Some("_self") | Some("_top") => true,
        Some(_) => false,
    }
}

pub fn link_location(document: &Document, link: NodeId, base: &Location) -> Option<Location> {
    let href = document.attr(link, "href")?;
    base.join(href).ok()
}

/// Links that submit instead of navigating.
pub fn link_submits(document: &Document, link: NodeId) -> bool {
    document.has_attr(link, "data-turbo-method") || document.has_attr(link, "data-turbo-stream")
}

/// First recognized `data-turbo-action` among `elements`.
pub fn visit_action(document: &Document, elements: &[NodeId]) -> Option<VisitAction> {
    elements
        .iter()
        .find_map(|element| document.attr(*element, "data-turbo-action"))
        .and_then(VisitAction::parse)
}

/// Where an interaction navigates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationTarget {
    Top,
    Frame(NodeId),
}

/// Resolves `data-turbo-frame` on the submitter or element, then the
/// enclosing frame and its `target`.
pub fn navigation_target(document: &Document, element: NodeId, submitter: Option<NodeId>) -> NavigationTarget {
    let explicit = submitter
        .and_then(|node| document.attr(node, "data-turbo-frame"))
        .or_else(|| document.attr(element, "data-turbo-frame"))
        .map(str::trim)
        .filter(|id| !id.is_empty());

    match explicit {
        Some("_top") => return NavigationTarget::Top,
        Some(id) => {
            if let Some(frame) = enabled_frame(document, id) {
                return NavigationTarget::Frame(frame);
            }
        }
        None => {}
    }

    let enclosing = document
        .ancestors(element)
        .into_iter()
        .find(|node| document.has_tag(*node, FRAME_TAG));
    let Some(enclosing) = enclosing else {
        return NavigationTarget::Top;
    };
    if document.has_attr(enclosing, "disabled") {
        return NavigationTarget::Top;
    }
    match document.attr(enclosing, "target").map(str::trim) {
        Some("_top") => NavigationTarget::Top,
        Some(id) if !id.is_empty() => {
            NavigationTarget::Frame(enabled_frame(document, id).unwrap_or(enclosing))
        }
        _ => NavigationTarget::Frame(enclosing),
    }
}

fn enabled_frame(document: &Document, id: &str) -> Option<NodeId> {
    document
        .element_by_id(id)
        .filter(|node| document.has_tag(*node, FRAME_TAG) && !document.has_attr(*node, "disabled"))
}

/// Whether hovering `link` may prefetch `location`.
pub fn prefetch_eligible(
    document: &Document,
    link: NodeId,
    location: &Location,
    current: &Location,
    root: &Location,
) -> bool {
    if !page_prefetch_enabled(document) || !link_is_followable(document, link) {
        return false;
    }
    if !location.is_visitable(root) || location.same_page_as(current) {
        return false;
    }
    let opted_out = Selector::parse("[data-turbo-prefetch]")
        .ok()
        .and_then(|selector| document.closest(link, &selector))
        .and_then(|scope| document.attr(scope, "data-turbo-prefetch"))
        .is_some_and(|value| value == "false");
    if opted_out {
        return false;
    }
    let safe = document
        .attr(link, "data-turbo-method")
        .and_then(FetchMethod::parse)
        .is_none_or(FetchMethod::is_safe);
    safe
        && !document.has_attr(link, "data-turbo-stream")
        && navigation_target(document, link, None) == NavigationTarget::Top
}

fn page_prefetch_enabled(document: &Document) -> bool {
    let Some(head) = document.head() else {
        return true;
    };
    !document.children(head).iter().any(|child| {
        document.has_tag(*child, "meta")
            && document.attr(*child, "name") == Some("turbo-prefetch")
            && document.attr(*child, "content") == Some("false")
    })
}

/// Submits the engine takes over: not opted out, not a dialog form and not
/// aimed at another browsing context.
pub fn form_is_submittable(document: &Document, form: NodeId, submitter: Option<NodeId>) -> bool {
    if turbo_disabled(document, form) || submitter.is_some_and(|node| turbo_disabled(document, node)) {
        return false;
    }
    let method = submitter
        .and_then(|node| document.attr(node, "formmethod"))
        .or_else(|| document.attr(form, "method"));
    if method.is_some_and(|method| method.trim().eq_ignore_ascii_case("dialog")) {
        return false;
    }
    let target = submitter
        .and_then(|node| document.attr(node, "formtarget"))
        .or_else(|| document.attr(form, "target"));
    matches!(target.map(str::trim), None | Some("") | Some("_self") | Some("_top"))
}

#[cfg(test)]
mod tests {
    use super::ClickInput;
    use super::Modifiers;
    use super::NavigationTarget;
    use super::clicked_link;
    use super::form_is_submittable;
    use super::link_is_followable;
    use super::navigation_target;
    use super::prefetch_eligible;
    use super::visit_action;
    use crate::visit::VisitAction;
    use tr_dom::Document;
    use tr_dom::NodeId;
    use tr_net::Location;

    fn document(html: &str) -> Document {
        match tr_html::parse_document(html) {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        }
    }

    fn by_id(document: &Document, id: &str) -> NodeId {
        match document.element_by_id(id) {
            Some(node) => node,
            None => panic!("#{id} missing"),
        }
    }

    fn location(path: &str) -> Location {
        match Location::parse(&format!("https://example.com{path}")) {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn modified_clicks_are_not_plain() {
        assert!(ClickInput::default().is_plain());
        let input = ClickInput {
            modifiers: Modifiers {
                meta: true,
                ..Modifiers::default()
            },
            ..ClickInput::default()
        };
        assert!(!input.is_plain());
    }

    #[test]
    fn clicks_inside_links_find_the_link() {
        let page = document(
            "<body><a id=\"go\" href=\"/go\" data-turbo-action=\"replace\"><span id=\"label\">Go</span></a>\
             <a id=\"blank\" href=\"/x\" target=\"_blank\">x</a>\
             <div data-turbo=\"false\"><a id=\"off\" href=\"/off\">off</a></div>\
             <a id=\"file\" href=\"/f.pdf\" download>f</a></body>",
        );
        let link = clicked_link(&page, by_id(&page, "label"));
        assert_eq!(link, Some(by_id(&page, "go")));
        assert!(link_is_followable(&page, by_id(&page, "go")));
        assert!(!link_is_followable(&page, by_id(&page, "blank")));
        assert!(!link_is_followable(&page, by_id(&page, "off")));
        assert!(!link_is_followable(&page, by_id(&page, "file")));
        assert_eq!(visit_action(&page, &[by_id(&page, "go")]), Some(VisitAction::Replace));
    }

    #[test]
    fn frame_targets_follow_data_turbo_frame_then_the_enclosing_frame() {
        let page = document(
            "<body><turbo-frame id=\"list\"><a id=\"inner\" href=\"/a\">a</a>\
             <a id=\"escape\" href=\"/b\" data-turbo-frame=\"_top\">b</a></turbo-frame>\
             <turbo-frame id=\"top-bound\" target=\"_top\"><a id=\"bound\" href=\"/c\">c</a></turbo-frame>\
             <a id=\"remote\" href=\"/d\" data-turbo-frame=\"list\">d</a>\
             <a id=\"plain\" href=\"/e\">e</a></body>",
        );
        let list = by_id(&page, "list");
        assert_eq!(navigation_target(&page, by_id(&page, "inner"), None), NavigationTarget::Frame(list));
        assert_eq!(navigation_target(&page, by_id(&page, "escape"), None), NavigationTarget::Top);
        assert_eq!(navigation_target(&page, by_id(&page, "bound"), None), NavigationTarget::Top);
        assert_eq!(navigation_target(&page, by_id(&page, "remote"), None), NavigationTarget::Frame(list));
        assert_eq!(navigation_target(&page, by_id(&page, "plain"), None), NavigationTarget::Top);
    }

    #[test]
    fn prefetch_skips_opted_out_and_unsafe_links() {
        let page = document(
            "<body><a id=\"ok\" href=\"/ok\">ok</a>\
             <a id=\"off\" href=\"/off\" data-turbo-prefetch=\"false\">off</a>\
             <a id=\"delete\" href=\"/d\" data-turbo-method=\"delete\">d</a>\
             <a id=\"here\" href=\"/page#section\">here</a></body>",
        );
        let current = location("/page");
        let root = location("/");
        let eligible = |id: &str, path: &str| prefetch_eligible(&page, by_id(&page, id), &location(path), &current, &root);
        assert!(eligible("ok", "/ok"));
        assert!(!eligible("off", "/off"));
        assert!(!eligible("delete", "/d"));
        assert!(!eligible("here", "/page#section"));
    }

    #[test]
    fn dialog_and_blank_forms_are_left_alone() {
        let page = document(
            "<body><form id=\"plain\" action=\"/a\"></form>\
             <form id=\"dialog\" method=\"dialog\"></form>\
             <form id=\"blank\" target=\"_blank\"></form></body>",
        );
        assert!(form_is_submittable(&page, by_id(&page, "plain"), None));
        assert!(!form_is_submittable(&page, by_id(&page, "dialog"), None));
        assert!(!form_is_submittable(&page, by_id(&page, "blank"), None));
    }
}
