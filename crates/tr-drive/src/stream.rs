//! `<turbo-stream>` directives and their application to the live page.

use crate::render::morph::morph_children;
use crate::render::morph::morph_element;
use crate::render::permanent::adopt_permanents;
use std::collections::HashSet;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_dom::Selector;
use tr_net::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Append,
    Prepend,
    Replace,
    Update,
    Before,
    After,
    Remove,
    Refresh,
}

impl StreamAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "append" => Some(Self::Append),
            "prepend" => Some(Self::Prepend),
            "replace" => Some(Self::Replace),
            "update" => Some(Self::Update),
            "before" => Some(Self::Before),
            "after" => Some(Self::After),
            "remove" => Some(Self::Remove),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
            Self::Update => "update",
            Self::Before => "before",
            Self::After => "after",
            Self::Remove => "remove",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    Id(String),
    Selector(String),
    Unspecified,
}

/// One parsed `<turbo-stream>` element.
#[derive(Debug, Clone)]
pub struct StreamDirective {
    pub action: StreamAction,
    pub target: StreamTarget,
    pub request_id: Option<String>,
    /// `method="morph"` on `replace` and `update`.
    pub morph: bool,
    /// The `<template>` content; its root holds the payload nodes.
    pub template: Document,
}

impl StreamDirective {
    pub fn from_element(document: &Document, element: NodeId) -> DriveResult<Self> {
        let raw_action = document.attr(element, "action").unwrap_or_default();
        let action = StreamAction::parse(raw_action).ok_or_else(|| {
            DriveError::new(
                "stream.action_invalid",
                format!("unknown stream action `{raw_action}`"),
            )
        })?;

        let target = match (document.attr(element, "target"), document.attr(element, "targets")) {
            (Some(id), _) if !id.is_empty() => StreamTarget::Id(id.to_owned()),
            (_, Some(selector)) if !selector.is_empty() => StreamTarget::Selector(selector.to_owned()),
            _ => StreamTarget::Unspecified,
        };

        let template = match document
            .children(element)
            .iter()
            .copied()
            .find(|child| document.has_tag(*child, "template"))
        {
            Some(template) => document.extract(template)?,
            None => Document::new(),
        };

        Ok(Self {
            action,
            target,
            request_id: document
                .attr(element, "request-id")
                .filter(|id| !id.is_empty())
                .map(str::to_owned),
            morph: document.attr(element, "method") == Some("morph"),
            template,
        })
    }

    /// Top-level payload nodes.
    pub fn content(&self) -> &[NodeId] {
        self.template.children(self.template.root())
    }

    pub fn content_html(&self) -> String {
        self.template.to_html()
    }

    /// Live elements the directive applies to.
    pub fn resolve_targets(&self, document: &Document) -> DriveResult<Vec<NodeId>> {
        match &self.target {
            StreamTarget::Id(id) => Ok(document.element_by_id(id).into_iter().collect()),
            StreamTarget::Selector(selector) => document.select_all(document.root(), selector),
            StreamTarget::Unspecified => Ok(Vec::new()),
        }
    }
}

/// A stream response body or pushed message: a fragment holding directives.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    directives: Vec<StreamDirective>,
}

impl StreamMessage {
    pub fn parse(html: &str) -> DriveResult<Self> {
        let fragment = tr_html::parse_fragment(html)?;
        Ok(Self {
            directives: collect_directives(&fragment, fragment.root())?,
        })
    }

    pub fn directives(&self) -> &[StreamDirective] {
        &self.directives
    }

    pub fn into_directives(self) -> Vec<StreamDirective> {
        self.directives
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

/// What applying a directive did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEffect {
    Applied { targets: usize },
    /// The page should refresh; the session decides whether and when.
    Refresh { request_id: Option<String> },
    NoTarget,
}

/// Applies one DOM directive to `document`.
pub fn apply(document: &mut Document, directive: &StreamDirective) -> DriveResult<StreamEffect> {
    if directive.action == StreamAction::Refresh {
        return Ok(StreamEffect::Refresh {
            request_id: directive.request_id.clone(),
        });
    }

    let targets = directive.resolve_targets(document)?;
    if targets.is_empty() {
        log::debug!(
            target: "trellis::stream",
            "{} directive matched no target ({:?})",
            directive.action.as_str(),
            directive.target
        );
        return Ok(StreamEffect::NoTarget);
    }

    for target in &targets {
        if document.is_alive(*target) {
            apply_to(document, directive, *target)?;
        }
    }
    log::debug!(
        target: "trellis::stream",
        "applied {} to {} target(s)",
        directive.action.as_str(),
        targets.len()
    );
    Ok(StreamEffect::Applied {
        targets: targets.len(),
    })
}

fn apply_to(document: &mut Document, directive: &StreamDirective, target: NodeId) -> DriveResult<()> {
    let template = &directive.template;
    match directive.action {
        StreamAction::Remove => {
            document.dispose(target);
        }
        StreamAction::Replace if directive.morph => {
            if let Some(first) = template.element_children(template.root()).first() {
                morph_element(document, target, template, *first)?;
            }
        }
        StreamAction::Update if directive.morph => {
            morph_children(document, target, template, template.root())?;
        }
        StreamAction::Append | StreamAction::Prepend => {
            let payload = stage_payload(document, template)?;
            remove_duplicate_children(document, target, payload);
            let reference = match directive.action {
                StreamAction::Prepend => document.first_child(target),
                _ => None,
            };
            move_children(document, payload, target, reference)?;
        }
        StreamAction::Update => {
            let payload = stage_payload(document, template)?;
            document.clear_children(target);
            move_children(document, payload, target, None)?;
        }
        StreamAction::Replace | StreamAction::Before | StreamAction::After => {
            let payload = stage_payload(document, template)?;
            let parent = document.parent(target).ok_or_else(|| {
                DriveError::new(
                    "dom.node_detached",
                    format!("stream {} target has no parent", directive.action.as_str()),
                )
            })?;
            let reference = match directive.action {
                StreamAction::After => document.next_sibling(target),
                _ => Some(target),
            };
            move_children(document, payload, parent, reference)?;
            if directive.action == StreamAction::Replace {
                document.dispose(target);
            }
        }
        StreamAction::Refresh => {}
    }
    Ok(())
}

/// Imports the template into a detached fragment, swapping in live
/// permanent elements.
fn stage_payload(document: &mut Document, template: &Document) -> DriveResult<NodeId> {
    let fragment = document.create_fragment();
    for child in template.children(template.root()) {
        let imported = document.import_node(template, *child)?;
        document.append_child(fragment, imported)?;
    }
    adopt_permanents(document, fragment)?;
    Ok(fragment)
}

/// Drops children of `target` whose id matches a top-level payload element.
fn remove_duplicate_children(document: &mut Document, target: NodeId, payload: NodeId) {
    let incoming: HashSet<String> = document
        .children(payload)
        .iter()
        .filter_map(|child| document.element_id(*child))
        .map(str::to_owned)
        .collect();
    if incoming.is_empty() {
        return;
    }
    let duplicates: Vec<NodeId> = document
        .children(target)
        .iter()
        .copied()
        .filter(|child| document.element_id(*child).is_some_and(|id| incoming.contains(id)))
        .collect();
    for duplicate in duplicates {
        document.dispose(duplicate);
    }
}

fn move_children(
    document: &mut Document,
    fragment: NodeId,
    parent: NodeId,
    reference: Option<NodeId>,
) -> DriveResult<()> {
    for child in document.children(fragment).to_vec() {
        document.insert_before(parent, child, reference)?;
    }
    document.dispose(fragment);
    Ok(())
}

/// Outermost `<turbo-stream>` elements under `scope`, in document order.
fn stream_elements(document: &Document, scope: NodeId) -> Vec<NodeId> {
    document
        .descendants(scope)
        .into_iter()
        .filter(|node| document.has_tag(*node, "turbo-stream"))
        .filter(|node| {
            !document
                .ancestors(*node)
                .iter()
                .any(|ancestor| document.has_tag(*ancestor, "turbo-stream"))
        })
        .collect()
}

fn collect_directives(document: &Document, scope: NodeId) -> DriveResult<Vec<StreamDirective>> {
    stream_elements(document, scope)
        .into_iter()
        .map(|element| StreamDirective::from_element(document, element))
        .collect()
}

/// Removes `<turbo-stream>` elements rendered into the page and returns
/// their directives for application.
pub fn take_page_streams(document: &mut Document) -> DriveResult<Vec<StreamDirective>> {
    let elements = stream_elements(document, document.root());
    let mut directives = Vec::with_capacity(elements.len());
    for element in elements {
        directives.push(StreamDirective::from_element(document, element)?);
        document.dispose(element);
    }
    Ok(directives)
}

/// Resolved `src` of every connected `<turbo-stream-source>`.
pub fn stream_source_locations(document: &Document, base: &Location) -> Vec<Location> {
    let sources = Selector::parse("turbo-stream-source[src]");
    let Ok(sources) = sources else {
        return Vec::new();
    };
    document
        .query_all(document.root(), &sources)
        .into_iter()
        .filter_map(|element| document.attr(element, "src"))
        .filter_map(|src| base.join(src).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::StreamAction;
    use super::StreamEffect;
    use super::StreamMessage;
    use super::StreamTarget;
    use super::apply;
    use super::take_page_streams;
    use tr_dom::Document;
    use tr_dom::NodeId;

    fn document(html: &str) -> Document {
        match tr_html::parse_document(html) {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        }
    }

    fn message(html: &str) -> StreamMessage {
        match StreamMessage::parse(html) {
            Ok(message) => message,
            Err(error) => panic!("{error}"),
        }
    }

    fn by_id(document: &Document, id: &str) -> NodeId {
        match document.element_by_id(id) {
            Some(node) => node,
            None => panic!("#{id} missing"),
        }
    }

    fn apply_all(page: &mut Document, message: &StreamMessage) -> Vec<StreamEffect> {
        message
            .directives()
            .iter()
            .map(|directive| match apply(page, directive) {
                Ok(effect) => effect,
                Err(error) => panic!("{error}"),
            })
            .collect()
    }

    #[test]
    fn parses_actions_targets_and_templates() {
        let parsed = message(
            "<turbo-stream action=\"append\" target=\"list\"><template><li id=\"a\">A</li></template></turbo-stream>\
             <turbo-stream action=\"remove\" targets=\".done\"></turbo-stream>\
             <turbo-stream action=\"refresh\" request-id=\"abc\"></turbo-stream>",
        );
        let directives = parsed.directives();
        assert_eq!(directives.len(), 3);
        assert_eq!(directives[0].action, StreamAction::Append);
        assert_eq!(directives[0].target, StreamTarget::Id("list".to_owned()));
        assert_eq!(directives[0].content_html(), "<li id=\"a\">A</li>");
        assert_eq!(directives[1].target, StreamTarget::Selector(".done".to_owned()));
        assert_eq!(directives[2].request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn unknown_actions_are_rejected() {
        let result = StreamMessage::parse("<turbo-stream action=\"explode\" target=\"x\"></turbo-stream>");
        assert!(result.is_err_and(|error| error.code == "stream.action_invalid"));
    }

    #[test]
    fn append_removes_existing_duplicates_first() {
        let mut page = document("<body><ul id=\"list\"><li id=\"a\">old a</li><li id=\"z\">z</li></ul></body>");
        let stale = by_id(&page, "a");
        let parsed = message(
            "<turbo-stream action=\"append\" target=\"list\">\
             <template><li id=\"a\">new a</li><li id=\"b\">b</li></template></turbo-stream>",
        );

        let effects = apply_all(&mut page, &parsed);
        assert_eq!(effects, vec![StreamEffect::Applied { targets: 1 }]);
        assert!(!page.is_alive(stale));
        let list = by_id(&page, "list");
        assert_eq!(
            page.inner_html(list),
            "<li id=\"z\">z</li><li id=\"a\">new a</li><li id=\"b\">b</li>"
        );
        assert_eq!(page.select_all(list, "#a").map(|found| found.len()).ok(), Some(1));
    }

    #[test]
    fn prepend_before_after_and_remove() {
        let mut page = document("<body><ul id=\"list\"><li id=\"m\">m</li></ul><p class=\"x\">1</p><p class=\"x\">2</p></body>");
        let parsed = message(
            "<turbo-stream action=\"prepend\" target=\"list\"><template><li>first</li></template></turbo-stream>\
             <turbo-stream action=\"before\" target=\"m\"><template><li>pre</li></template></turbo-stream>\
             <turbo-stream action=\"after\" target=\"m\"><template><li>post</li></template></turbo-stream>\
             <turbo-stream action=\"remove\" targets=\"p.x\"></turbo-stream>",
        );
        apply_all(&mut page, &parsed);
        let list = by_id(&page, "list");
        assert_eq!(
            page.inner_html(list),
            "<li>first</li><li>pre</li><li id=\"m\">m</li><li>post</li>"
        );
        assert!(page.select(page.root(), "p").is_ok_and(|found| found.is_none()));
    }

    #[test]
    fn replace_and_update_keep_permanent_elements() {
        let mut page = document(
            "<body><div id=\"card\"><video id=\"clip\" data-turbo-permanent></video><p>old</p></div></body>",
        );
        let clip = by_id(&page, "clip");
        let parsed = message(
            "<turbo-stream action=\"update\" target=\"card\"><template>\
             <video id=\"clip\" data-turbo-permanent></video><p>new</p></template></turbo-stream>",
        );
        apply_all(&mut page, &parsed);
        assert_eq!(page.element_by_id("clip"), Some(clip));
        assert!(page.inner_html(by_id(&page, "card")).contains("<p>new</p>"));

        let replaced = message(
            "<turbo-stream action=\"replace\" target=\"card\" method=\"morph\"><template>\
             <div id=\"card\" class=\"fresh\"><video id=\"clip\" data-turbo-permanent></video></div></template></turbo-stream>",
        );
        apply_all(&mut page, &replaced);
        let card = by_id(&page, "card");
        assert_eq!(page.attr(card, "class"), Some("fresh"));
        assert_eq!(page.element_by_id("clip"), Some(clip));
    }

    #[test]
    fn refresh_is_reported_not_applied() {
        let mut page = document("<body></body>");
        let parsed = message("<turbo-stream action=\"refresh\" request-id=\"r1\"></turbo-stream>");
        assert_eq!(
            apply_all(&mut page, &parsed),
            vec![StreamEffect::Refresh {
                request_id: Some("r1".to_owned())
            }]
        );
    }

    #[test]
    fn page_streams_are_taken_out_of_the_document() {
        let mut page = document(
            "<body><ul id=\"list\"></ul>\
             <turbo-stream action=\"append\" target=\"list\"><template><li>x</li></template></turbo-stream></body>",
        );
        let directives = match take_page_streams(&mut page) {
            Ok(directives) => directives,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(directives.len(), 1);
        assert!(page.select(page.root(), "turbo-stream").is_ok_and(|found| found.is_none()));
    }
}
