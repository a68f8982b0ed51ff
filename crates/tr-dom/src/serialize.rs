use crate::Document;
use crate::NodeId;
use crate::NodeKind;
use crate::is_void_element;

pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attribute(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out
}

fn is_raw_text(tag: &str) -> bool {
    matches!(
        tag,
        "script" | "style" | "xmp" | "iframe" | "noembed" | "noframes" | "plaintext"
    )
}

impl Document {
    /// Markup for `node` including its own tag.
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    /// Markup for the children of `node`.
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.write_node(*child, &mut out);
        }
        out
    }

    /// Full document markup, doctype included.
    pub fn to_html(&self) -> String {
        self.inner_html(self.root())
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        let Some(kind) = self.kind(node) else {
            return;
        };
        match kind {
            NodeKind::Document | NodeKind::Fragment => {
                for child in self.children(node) {
                    self.write_node(*child, out);
                }
            }
            NodeKind::Doctype(name) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(name);
                out.push('>');
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeKind::Text(text) => {
                let raw = self
                    .parent(node)
                    .and_then(|parent| self.tag(parent))
                    .is_some_and(is_raw_text);
                if raw {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            NodeKind::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for (key, value) in element.attributes() {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(value));
                    out.push('"');
                }
                out.push('>');
                if is_void_element(&element.name) {
                    return;
                }
                for child in self.children(node) {
                    self.write_node(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Document;

    #[test]
    fn serializes_elements_text_and_voids() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.create_element_with("div", &[("title", "a \"b\" & c")]);
        let text = doc.create_text("1 < 2");
        let br = doc.create_element("br");
        let built = doc
            .append_child(root, div)
            .and_then(|_| doc.append_child(div, text))
            .and_then(|_| doc.append_child(div, br));
        assert!(built.is_ok());
        assert_eq!(
            doc.outer_html(div),
            "<div title=\"a &quot;b&quot; &amp; c\">1 &lt; 2<br></div>"
        );
        assert_eq!(doc.inner_html(div), "1 &lt; 2<br>");
    }

    #[test]
    fn script_text_is_not_escaped() {
        let mut doc = Document::new();
        let script = doc.create_element("script");
        let text = doc.create_text("if (a < b) {}");
        assert!(doc.append_child(script, text).is_ok());
        assert_eq!(doc.outer_html(script), "<script>if (a < b) {}</script>");
    }
}
