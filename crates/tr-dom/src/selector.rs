//! A small CSS selector engine.
//!
//! Supports type, universal, `#id`, `.class` and attribute selectors
//! (`[a]`, `[a=v]`, `[a~=v]`, `[a|=v]`, `[a^=v]`, `[a$=v]`, `[a*=v]`),
//! `:not(...)` over compounds, descendant and child combinators, and
//! comma-separated lists.

use crate::Document;
use crate::NodeId;
use tr_core::DriveError;
use tr_core::DriveResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    // Rightmost compound first; each carries the combinator linking it to the
    // next compound on its left.
    parts: Vec<(Compound, Combinator)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    None,
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeTest>,
    negations: Vec<Compound>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeTest {
    name: String,
    op: Option<(AttributeOp, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeOp {
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

impl Selector {
    pub fn parse(input: &str) -> DriveResult<Self> {
        let mut alternatives = Vec::new();
        for raw in split_top_level_commas(input) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(invalid(input, "empty selector in list"));
            }
            alternatives.push(parse_complex(trimmed).map_err(|reason| invalid(input, reason))?);
        }
        if alternatives.is_empty() {
            return Err(invalid(input, "empty selector"));
        }
        Ok(Self { alternatives })
    }

    /// Selector matching elements whose attribute equals `value` exactly.
    pub fn attribute_equals(tag: Option<&str>, name: &str, value: &str) -> Self {
        let compound = Compound {
            tag: tag.map(str::to_ascii_lowercase),
            attributes: vec![AttributeTest {
                name: name.to_ascii_lowercase(),
                op: Some((AttributeOp::Equals, value.to_owned())),
            }],
            ..Compound::default()
        };
        Self {
            alternatives: vec![Complex {
                parts: vec![(compound, Combinator::None)],
            }],
        }
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        doc.is_element(node)
            && self
                .alternatives
                .iter()
                .any(|complex| complex.matches_at(doc, node, 0))
    }
}

impl Complex {
    fn matches_at(&self, doc: &Document, node: NodeId, part: usize) -> bool {
        let Some((compound, combinator)) = self.parts.get(part) else {
            return true;
        };
        if !compound.matches(doc, node) {
            return false;
        }
        match combinator {
            Combinator::None => true,
            Combinator::Child => doc
                .parent(node)
                .is_some_and(|parent| self.matches_at(doc, parent, part + 1)),
            Combinator::Descendant => doc
                .ancestors(node)
                .into_iter()
                .any(|ancestor| self.matches_at(doc, ancestor, part + 1)),
        }
    }
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(element) = doc.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag {
            if element.name != *tag {
                return false;
            }
        }
        if self
            .ids
            .iter()
            .any(|id| element.attr("id") != Some(id.as_str()))
        {
            return false;
        }
        if self.classes.iter().any(|class| !element.has_class(class)) {
            return false;
        }
        if !self.attributes.iter().all(|test| test.matches(element.attr(&test.name))) {
            return false;
        }
        !self.negations.iter().any(|negated| negated.matches(doc, node))
    }

    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.ids.is_empty()
            && self.classes.is_empty()
            && self.attributes.is_empty()
            && self.negations.is_empty()
    }
}

impl AttributeTest {
    fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        let Some((op, expected)) = &self.op else {
            return true;
        };
        let expected = expected.as_str();
        match op {
            AttributeOp::Equals => actual == expected,
            AttributeOp::Includes => actual.split_ascii_whitespace().any(|token| token == expected),
            AttributeOp::DashMatch => {
                actual == expected
                    || actual
                        .strip_prefix(expected)
                        .is_some_and(|rest| rest.starts_with('-'))
            }
            AttributeOp::Prefix => !expected.is_empty() && actual.starts_with(expected),
            AttributeOp::Suffix => !expected.is_empty() && actual.ends_with(expected),
            AttributeOp::Substring => !expected.is_empty() && actual.contains(expected),
        }
    }
}

fn invalid(input: &str, reason: &str) -> DriveError {
    DriveError::new(
        "dom.selector_invalid",
        format!("cannot parse selector {input:?}: {reason}"),
    )
}

fn split_top_level_commas(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut start = 0_usize;
    let mut depth = 0_u32;
    let mut quote: Option<u8> = None;

    for (idx, byte) in bytes.iter().copied().enumerate() {
        if let Some(open) = quote {
            if byte == open {
                quote = None;
            }
            continue;
        }
        match byte {
            b'"' | b'\'' => quote = Some(byte),
            b'(' | b'[' => depth = depth.saturating_add(1),
            b')' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                out.push(&input[start..idx]);
                start = idx.saturating_add(1);
            }
            _ => {}
        }
    }
    out.push(&input[start..]);
    out
}

fn parse_complex(input: &str) -> Result<Complex, &'static str> {
    let bytes = input.as_bytes();
    let mut idx = 0_usize;
    let mut left_to_right: Vec<(Compound, Combinator)> = Vec::new();
    let mut pending = Combinator::None;

    loop {
        let mut saw_space = false;
        while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
            saw_space = true;
            idx = idx.saturating_add(1);
        }
        if idx >= bytes.len() {
            break;
        }
        if bytes[idx] == b'>' {
            if left_to_right.is_empty() {
                return Err("selector starts with a combinator");
            }
            pending = Combinator::Child;
            idx = idx.saturating_add(1);
            continue;
        }
        if saw_space && !left_to_right.is_empty() && pending == Combinator::None {
            pending = Combinator::Descendant;
        }
        if !left_to_right.is_empty() && pending == Combinator::None {
            return Err("missing combinator between compounds");
        }

        let (compound, next) = parse_compound(input, idx)?;
        idx = next;
        left_to_right.push((compound, pending));
        pending = Combinator::None;
    }

    if pending != Combinator::None {
        return Err("selector ends with a combinator");
    }
    if left_to_right.is_empty() {
        return Err("empty selector");
    }

    // Each compound already carries the link to its left neighbour, so
    // reversing yields right-to-left matching order.
    left_to_right.reverse();
    Ok(Complex {
        parts: left_to_right,
    })
}

fn parse_compound(input: &str, mut idx: usize) -> Result<(Compound, usize), &'static str> {
    let bytes = input.as_bytes();
    let mut compound = Compound::default();
    let mut universal = false;

    if idx < bytes.len() && bytes[idx] == b'*' {
        universal = true;
        idx = idx.saturating_add(1);
    } else if idx < bytes.len() && is_ident_byte(bytes[idx]) {
        let (name, next) = read_ident(input, idx);
        compound.tag = Some(name.to_ascii_lowercase());
        idx = next;
    }

    while idx < bytes.len() {
        match bytes[idx] {
            b'#' => {
                let (name, next) = read_ident(input, idx.saturating_add(1));
                if name.is_empty() {
                    return Err("empty id selector");
                }
                compound.ids.push(name.to_owned());
                idx = next;
            }
            b'.' => {
                let (name, next) = read_ident(input, idx.saturating_add(1));
                if name.is_empty() {
                    return Err("empty class selector");
                }
                compound.classes.push(name.to_owned());
                idx = next;
            }
            b'[' => {
                let (test, next) = parse_attribute(input, idx.saturating_add(1))?;
                compound.attributes.push(test);
                idx = next;
            }
            b':' => {
                let rest = &input[idx..];
                if !rest.starts_with(":not(") {
                    return Err("unsupported pseudo-class");
                }
                let open = idx.saturating_add(5);
                let close = find_closing_paren(bytes, open).ok_or("unclosed :not(")?;
                let inner = input[open..close].trim();
                let (negated, consumed) = parse_compound(inner, 0)?;
                if consumed != inner.len() || negated.is_empty() {
                    return Err(":not() accepts a single compound selector");
                }
                compound.negations.push(negated);
                idx = close.saturating_add(1);
            }
            _ => break,
        }
    }

    if compound.is_empty() && !universal {
        return Err("expected a compound selector");
    }
    Ok((compound, idx))
}

fn parse_attribute(input: &str, mut idx: usize) -> Result<(AttributeTest, usize), &'static str> {
    let bytes = input.as_bytes();
    idx = skip_ws(bytes, idx);
    let (name, next) = read_ident(input, idx);
    if name.is_empty() {
        return Err("empty attribute name");
    }
    idx = skip_ws(bytes, next);

    let mut test = AttributeTest {
        name: name.to_ascii_lowercase(),
        op: None,
    };

    if bytes.get(idx) == Some(&b']') {
        return Ok((test, idx.saturating_add(1)));
    }

    let op = match bytes.get(idx) {
        Some(b'=') => {
            idx = idx.saturating_add(1);
            AttributeOp::Equals
        }
        Some(prefix) if bytes.get(idx.saturating_add(1)) == Some(&b'=') => {
            let op = match prefix {
                b'~' => AttributeOp::Includes,
                b'|' => AttributeOp::DashMatch,
                b'^' => AttributeOp::Prefix,
                b'$' => AttributeOp::Suffix,
                b'*' => AttributeOp::Substring,
                _ => return Err("unknown attribute operator"),
            };
            idx = idx.saturating_add(2);
            op
        }
        _ => return Err("malformed attribute selector"),
    };

    idx = skip_ws(bytes, idx);
    let value = match bytes.get(idx) {
        Some(quote @ (b'"' | b'\'')) => {
            let start = idx.saturating_add(1);
            let end = bytes[start..]
                .iter()
                .position(|byte| byte == quote)
                .map(|offset| start + offset)
                .ok_or("unterminated attribute value")?;
            idx = end.saturating_add(1);
            input[start..end].to_owned()
        }
        _ => {
            let (raw, next) = read_ident(input, idx);
            idx = next;
            raw.to_owned()
        }
    };

    idx = skip_ws(bytes, idx);
    if bytes.get(idx) != Some(&b']') {
        return Err("unclosed attribute selector");
    }
    test.op = Some((op, value));
    Ok((test, idx.saturating_add(1)))
}

fn find_closing_paren(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth = 1_u32;
    let mut quote: Option<u8> = None;
    for (offset, byte) in bytes.get(from..)?.iter().copied().enumerate() {
        if let Some(open) = quote {
            if byte == open {
                quote = None;
            }
            continue;
        }
        match byte {
            b'"' | b'\'' => quote = Some(byte),
            b'(' => depth = depth.saturating_add(1),
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(from + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn read_ident(input: &str, start: usize) -> (&str, usize) {
    let bytes = input.as_bytes();
    let mut end = start;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end = end.saturating_add(1);
    }
    (&input[start.min(end)..end], end)
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') || byte >= 0x80
}

fn skip_ws(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::Selector;
    use crate::Document;
    use crate::NodeId;

    fn tree() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let root = doc.root();
        let frame = doc.create_element_with("turbo-frame", &[("id", "inbox"), ("src", "/inbox")]);
        let list = doc.create_element_with("ul", &[("class", "messages unread")]);
        let item = doc.create_element_with(
            "li",
            &[("data-turbo-permanent", ""), ("lang", "en-GB"), ("id", "m1")],
        );
        let linked = doc
            .append_child(root, frame)
            .and_then(|_| doc.append_child(frame, list))
            .and_then(|_| doc.append_child(list, item));
        assert!(linked.is_ok());
        (doc, frame, list, item)
    }

    fn parse(input: &str) -> Selector {
        match Selector::parse(input) {
            Ok(selector) => selector,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn compound_selectors_match_elements() {
        let (doc, frame, list, item) = tree();
        assert!(parse("turbo-frame#inbox").matches(&doc, frame));
        assert!(parse(".messages.unread").matches(&doc, list));
        assert!(parse("[data-turbo-permanent]").matches(&doc, item));
        assert!(parse("li[lang|=en]").matches(&doc, item));
        assert!(parse("[src^=\"/in\"]").matches(&doc, frame));
        assert!(!parse("ul.read").matches(&doc, list));
    }

    #[test]
    fn combinators_walk_ancestors() {
        let (doc, _, _, item) = tree();
        assert!(parse("turbo-frame li").matches(&doc, item));
        assert!(parse("ul > li").matches(&doc, item));
        assert!(!parse("turbo-frame > li").matches(&doc, item));
        assert!(parse("turbo-frame > ul > #m1").matches(&doc, item));
    }

    #[test]
    fn lists_and_negation() {
        let (doc, frame, list, item) = tree();
        let selector = parse("ol, ul:not(.read)");
        assert!(selector.matches(&doc, list));
        assert!(!selector.matches(&doc, frame));
        assert!(!parse("li:not([data-turbo-permanent])").matches(&doc, item));
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "a,", "> a", "a >", "[=x]", "a:hover", "[a=\"x]"] {
            assert!(Selector::parse(input).is_err(), "{input}");
        }
    }

    #[test]
    fn document_query_helpers() {
        let (doc, _, _, item) = tree();
        let found = doc.select(doc.root(), "li[id='m1']");
        assert!(matches!(found, Ok(Some(node)) if node == item));
    }
}
