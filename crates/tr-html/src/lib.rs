//! HTML tokenization and tree construction into the `tr-dom` arena.
//!
//! Full documents are normalized to an `html`/`head`/`body` skeleton so that
//! snapshots and renderers can always rely on both sections being present.
//! Fragments (stream messages, frame extracts) are parsed without that
//! skeleton.

mod entities;
mod tokenizer;

use tokenizer::Token;
use tokenizer::tokenize;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_dom::NodeKind;
use tr_dom::is_void_element;

pub use entities::decode_entities;

/// Parses raw HTML into a DOM document.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn parse_document(&self, input: &str) -> DriveResult<Document> {
        let mut doc = Document::new();
        let root = doc.root();
        let html = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        doc.append_child(root, html)?;
        doc.append_child(html, head)?;
        doc.append_child(html, body)?;

        let mut builder = TreeBuilder {
            doc: &mut doc,
            stack: vec![head],
            skeleton: Some(Skeleton {
                html,
                head,
                body,
                in_body: false,
            }),
        };
        for token in tokenize(input) {
            builder.process(token)?;
        }
        Ok(doc)
    }

    /// Parses `input` into a standalone document whose root holds the
    /// fragment's top-level nodes.
    pub fn parse_fragment(&self, input: &str) -> DriveResult<Document> {
        let mut doc = Document::new();
        let root = doc.root();
        self.parse_into(&mut doc, root, input)?;
        Ok(doc)
    }

    /// Parses `input` into a new detached fragment node owned by `doc`.
    pub fn parse_fragment_into(&self, doc: &mut Document, input: &str) -> DriveResult<NodeId> {
        let fragment = doc.create_fragment();
        self.parse_into(doc, fragment, input)?;
        Ok(fragment)
    }

    fn parse_into(&self, doc: &mut Document, container: NodeId, input: &str) -> DriveResult<()> {
        let mut builder = TreeBuilder {
            doc,
            stack: vec![container],
            skeleton: None,
        };
        for token in tokenize(input) {
            builder.process(token)?;
        }
        Ok(())
    }
}

pub fn parse_document(input: &str) -> DriveResult<Document> {
    HtmlParser.parse_document(input)
}

pub fn parse_fragment(input: &str) -> DriveResult<Document> {
    HtmlParser.parse_fragment(input)
}

#[derive(Debug, Clone, Copy)]
struct Skeleton {
    html: NodeId,
    head: NodeId,
    body: NodeId,
    in_body: bool,
}

struct TreeBuilder<'a> {
    doc: &'a mut Document,
    // Bottom entry is the insertion container and is never popped.
    stack: Vec<NodeId>,
    skeleton: Option<Skeleton>,
}

impl TreeBuilder<'_> {
    fn process(&mut self, token: Token) -> DriveResult<()> {
        match token {
            Token::Doctype(name) => self.doctype(&name),
            Token::Comment(text) => {
                let parent = self.current();
                let comment = self.doc.create_comment(&text);
                self.doc.append_child(parent, comment)
            }
            Token::Text(text) => self.text(&text),
            Token::Start {
                name,
                attrs,
                self_closing,
            } => self.start_tag(&name, &attrs, self_closing),
            Token::End { name } => {
                self.end_tag(&name);
                Ok(())
            }
        }
    }

    fn current(&self) -> NodeId {
        self.stack.last().copied().unwrap_or_else(|| self.doc.root())
    }

    fn doctype(&mut self, name: &str) -> DriveResult<()> {
        let Some(skeleton) = self.skeleton else {
            return Ok(());
        };
        let root = self.doc.root();
        if self
            .doc
            .children(root)
            .iter()
            .any(|child| matches!(self.doc.kind(*child), Some(NodeKind::Doctype(_))))
        {
            return Ok(());
        }
        let doctype = self.doc.create_doctype(name);
        self.doc.insert_before(root, doctype, Some(skeleton.html))
    }

    fn enter_body(&mut self) {
        if let Some(skeleton) = self.skeleton.as_mut() {
            if !skeleton.in_body {
                skeleton.in_body = true;
                self.stack = vec![skeleton.body];
            }
        }
    }

    fn in_head_section(&self) -> bool {
        self.skeleton.is_some_and(|skeleton| !skeleton.in_body)
    }

    fn text(&mut self, text: &str) -> DriveResult<()> {
        if self.in_head_section() && self.stack.len() == 1 {
            if text.trim().is_empty() {
                return Ok(());
            }
            self.enter_body();
        }

        let parent = self.current();
        if let Some(last) = self.doc.children(parent).last().copied() {
            if let Some(NodeKind::Text(existing)) = self.doc.kind(last) {
                let merged = format!("{existing}{text}");
                return self.doc.set_text(last, &merged);
            }
        }
        let node = self.doc.create_text(text);
        self.doc.append_child(parent, node)
    }

    fn start_tag(
        &mut self,
        name: &str,
        attrs: &[(String, String)],
        self_closing: bool,
    ) -> DriveResult<()> {
        if let Some(skeleton) = self.skeleton {
            match name {
                "html" => return self.merge_attributes(skeleton.html, attrs),
                "head" => return self.merge_attributes(skeleton.head, attrs),
                "body" => {
                    self.enter_body();
                    return self.merge_attributes(skeleton.body, attrs);
                }
                _ => {}
            }
            if !skeleton.in_body && self.stack.len() == 1 && !is_head_content(name) {
                self.enter_body();
            }
        } else if matches!(name, "html" | "head" | "body") {
            return Ok(());
        }

        self.close_implied(name);

        let element = self.doc.create_element(name);
        for (key, value) in attrs {
            self.doc.set_attr(element, key, value)?;
        }
        let parent = self.current();
        self.doc.append_child(parent, element)?;

        if !self_closing && !is_void_element(name) {
            self.stack.push(element);
        }
        Ok(())
    }

    fn merge_attributes(&mut self, node: NodeId, attrs: &[(String, String)]) -> DriveResult<()> {
        for (key, value) in attrs {
            if !self.doc.has_attr(node, key) {
                self.doc.set_attr(node, key, value)?;
            }
        }
        Ok(())
    }

    fn end_tag(&mut self, name: &str) {
        if let Some(skeleton) = self.skeleton {
            match name {
                "head" => {
                    if !skeleton.in_body {
                        self.enter_body();
                    }
                    return;
                }
                "body" | "html" => return,
                _ => {}
            }
        }

        if let Some(position) = self.open_position(name, &[]) {
            self.stack.truncate(position);
        }
    }

    /// Stack position of the nearest open `name`, stopping at any of
    /// `boundaries` and never reaching the container.
    fn open_position(&self, name: &str, boundaries: &[&str]) -> Option<usize> {
        for position in (1..self.stack.len()).rev() {
            let tag = self.doc.tag(self.stack[position]);
            if tag == Some(name) {
                return Some(position);
            }
            if tag.is_some_and(|tag| boundaries.contains(&tag)) {
                return None;
            }
        }
        None
    }

    fn close_implied(&mut self, name: &str) {
        if closes_paragraph(name) {
            if let Some(position) = self.open_position("p", &["button", "td", "th", "template"]) {
                self.stack.truncate(position);
            }
        }

        let (closes, boundaries): (&[&str], &[&str]) = match name {
            "li" => (&["li"], &["ul", "ol", "menu"]),
            "dt" | "dd" => (&["dt", "dd"], &["dl"]),
            "option" => (&["option"], &["select", "datalist", "optgroup"]),
            "optgroup" => (&["option", "optgroup"], &["select"]),
            "tr" => (&["tr", "td", "th"], &["table", "tbody", "thead", "tfoot"]),
            "td" | "th" => (&["td", "th"], &["tr", "table"]),
            "tbody" | "thead" | "tfoot" => (&["tbody", "thead", "tfoot"], &["table"]),
            _ => return,
        };
        for candidate in closes {
            if let Some(position) = self.open_position(candidate, boundaries) {
                self.stack.truncate(position);
                return;
            }
        }
    }
}

fn is_head_content(tag: &str) -> bool {
    matches!(
        tag,
        "title" | "meta" | "link" | "style" | "script" | "base" | "noscript" | "template"
    )
}

fn closes_paragraph(tag: &str) -> bool {
    matches!(
        tag,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "details"
            | "div"
            | "dl"
            | "fieldset"
            | "figure"
            | "footer"
            | "form"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "header"
            | "hr"
            | "main"
            | "nav"
            | "ol"
            | "p"
            | "pre"
            | "section"
            | "table"
            | "ul"
    )
}

#[cfg(test)]
mod tests {
    use super::HtmlParser;
    use tr_dom::Document;

    fn document(input: &str) -> Document {
        match HtmlParser.parse_document(input) {
            Ok(doc) => doc,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn normalizes_missing_skeleton() {
        let doc = document("<p>Hello</p>");
        let Some(body) = doc.body() else {
            panic!("body missing");
        };
        assert!(doc.head().is_some());
        assert_eq!(doc.inner_html(body), "<p>Hello</p>");
    }

    #[test]
    fn routes_head_content_and_keeps_attributes() {
        let doc = document(
            "<!DOCTYPE html><html lang=\"en\"><head><title>Inbox &amp; more</title>\
             <meta name=\"turbo-cache-control\" content=\"no-preview\"></head>\
             <body class=\"app\"><main id=\"main\">Hi</main></body></html>",
        );
        let (Some(head), Some(body), Some(html)) = (doc.head(), doc.body(), doc.document_element())
        else {
            panic!("skeleton missing");
        };
        assert_eq!(doc.attr(html, "lang"), Some("en"));
        assert_eq!(doc.attr(body, "class"), Some("app"));
        assert_eq!(doc.element_children(head).len(), 2);
        assert!(doc.to_html().starts_with("<!DOCTYPE html><html lang=\"en\"><head><title>Inbox &amp; more</title>"));
        assert!(doc.element_by_id("main").is_some());
    }

    #[test]
    fn body_content_before_head_close_moves_to_body() {
        let doc = document("<title>T</title><div id=\"x\">content</div>");
        let Some(body) = doc.body() else {
            panic!("body missing");
        };
        assert_eq!(doc.inner_html(body), "<div id=\"x\">content</div>");
    }

    #[test]
    fn implied_end_tags() {
        let doc = document("<ul><li>one<li>two</ul><p>a<div>b</div>");
        let Some(body) = doc.body() else {
            panic!("body missing");
        };
        assert_eq!(
            doc.inner_html(body),
            "<ul><li>one</li><li>two</li></ul><p>a</p><div>b</div>"
        );
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        let doc = document("<div>a</span>b</div>");
        let Some(body) = doc.body() else {
            panic!("body missing");
        };
        assert_eq!(doc.inner_html(body), "<div>ab</div>");
    }

    #[test]
    fn fragments_keep_template_content() {
        let parsed = HtmlParser.parse_fragment(
            "<turbo-stream action=\"append\" target=\"list\"><template><li id=\"a\">A</li></template></turbo-stream>",
        );
        let doc = match parsed {
            Ok(doc) => doc,
            Err(error) => panic!("{error}"),
        };
        let stream = doc.children(doc.root())[0];
        assert_eq!(doc.tag(stream), Some("turbo-stream"));
        assert!(doc.body().is_none());
        let template = doc.children(stream)[0];
        assert_eq!(doc.inner_html(template), "<li id=\"a\">A</li>");
    }

    #[test]
    fn fragment_into_existing_document_is_detached() {
        let mut doc = Document::new();
        let fragment = match HtmlParser.parse_fragment_into(&mut doc, "<b id=\"n\">x</b> tail") {
            Ok(node) => node,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(doc.children(fragment).len(), 2);
        assert!(doc.element_by_id("n").is_none());
        assert!(!doc.is_connected(fragment));
    }
}
