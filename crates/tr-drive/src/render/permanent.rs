//! Permanent elements survive renders by identity.
//!
//! Before a swap, each incoming copy of a live permanent element is replaced
//! by a placeholder `<meta>`. After the swap the placeholder is replaced by
//! the live element itself, so exactly one instance ever exists.

use std::collections::HashSet;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;

pub const PLACEHOLDER_NAME: &str = "turbo-permanent-placeholder";

pub fn is_permanent(document: &Document, node: NodeId) -> bool {
    document.has_attr(node, "data-turbo-permanent")
        && document.element_id(node).is_some_and(|id| !id.is_empty())
}

/// Permanent elements under `scope` in document order. A repeated id keeps
/// its first element; later ones are ignored.
pub fn permanent_elements(document: &Document, scope: NodeId) -> Vec<(String, NodeId)> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for node in document.descendants(scope) {
        if !is_permanent(document, node) {
            continue;
        }
        let Some(id) = document.element_id(node) else {
            continue;
        };
        if seen.insert(id.to_owned()) {
            found.push((id.to_owned(), node));
        } else {
            log::trace!(target: "trellis::render", "ignoring duplicate permanent element #{id}");
        }
    }
    found
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pair {
    live: NodeId,
    placeholder: NodeId,
}

/// Live permanent elements parked behind placeholders during a render.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PermanentSwap {
    pairs: Vec<Pair>,
}

impl PermanentSwap {
    /// Puts placeholders under `incoming` for every permanent element that
    /// also lives under `current`. Both subtrees belong to `document`.
    pub fn enter(document: &mut Document, current: NodeId, incoming: NodeId) -> DriveResult<Self> {
        let arriving = permanent_elements(document, incoming);
        let mut pairs = Vec::new();

        for (id, live) in permanent_elements(document, current) {
            let Some((_, copy)) = arriving.iter().find(|(candidate, _)| *candidate == id) else {
                continue;
            };
            let placeholder =
                document.create_element_with("meta", &[("name", PLACEHOLDER_NAME), ("content", &id)]);
            document.replace_node(*copy, placeholder)?;
            document.dispose(*copy);
            pairs.push(Pair { live, placeholder });
        }

        Ok(Self { pairs })
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn live_elements(&self) -> Vec<NodeId> {
        self.pairs.iter().map(|pair| pair.live).collect()
    }

    /// Takes the live elements out of the outgoing tree so disposing it
    /// cannot free them.
    pub fn detach_live(&self, document: &mut Document) {
        for pair in &self.pairs {
            document.detach(pair.live);
        }
    }

    /// Moves every live element into its placeholder's slot.
    pub fn leave(self, document: &mut Document) -> DriveResult<Vec<NodeId>> {
        let mut restored = Vec::with_capacity(self.pairs.len());
        for pair in self.pairs {
            if !document.is_alive(pair.live) || !document.is_alive(pair.placeholder) {
                continue;
            }
            document.replace_node(pair.placeholder, pair.live)?;
            document.dispose(pair.placeholder);
            restored.push(pair.live);
        }
        Ok(restored)
    }
}

/// Swaps incoming copies under `incoming` for the live permanent elements
/// found anywhere else in the document. Used where no outgoing subtree is
/// known up front, such as stream payloads.
pub fn adopt_permanents(document: &mut Document, incoming: NodeId) -> DriveResult<usize> {
    let mut adopted = 0;
    for (id, copy) in permanent_elements(document, incoming) {
        let Some(live) = document.element_by_id(&id) else {
            continue;
        };
        if live == copy || document.contains(incoming, live) || !is_permanent(document, live) {
            continue;
        }
        document.replace_node(copy, live)?;
        document.dispose(copy);
        adopted += 1;
    }
    Ok(adopted)
}

#[cfg(test)]
mod tests {
    use super::PermanentSwap;
    use super::permanent_elements;
    use tr_dom::Document;

    fn document(html: &str) -> Document {
        match tr_html::parse_document(html) {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn duplicate_permanent_ids_keep_the_first() {
        let page = document(
            "<body><div id=\"p\" data-turbo-permanent class=\"first\"></div>\
             <div id=\"p\" data-turbo-permanent class=\"second\"></div>\
             <div id=\"q\"></div></body>",
        );
        let found = permanent_elements(&page, page.root());
        assert_eq!(found.len(), 1);
        assert_eq!(page.attr(found[0].1, "class"), Some("first"));
    }

    #[test]
    fn placeholders_hand_the_live_element_to_the_new_tree() {
        let mut page = document(
            "<body><div id=\"old\"><audio id=\"player\" data-turbo-permanent src=\"a.mp3\"></audio></div></body>",
        );
        let Some(body) = page.body() else {
            panic!("body missing");
        };
        let Some(live) = page.element_by_id("player") else {
            panic!("player missing");
        };
        let incoming = page.create_element("div");
        let copy = page.create_element_with("audio", &[("id", "player"), ("data-turbo-permanent", "")]);
        if let Err(error) = page.append_child(incoming, copy) {
            panic!("{error}");
        }

        let swap = match PermanentSwap::enter(&mut page, body, incoming) {
            Ok(swap) => swap,
            Err(error) => panic!("{error}"),
        };
        assert!(!page.is_alive(copy));
        assert_eq!(page.children(incoming).len(), 1);

        swap.detach_live(&mut page);
        let restored = match swap.leave(&mut page) {
            Ok(restored) => restored,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(restored, vec![live]);
        assert_eq!(page.parent(live), Some(incoming));
        assert_eq!(page.children(incoming), &[live]);
    }
}
