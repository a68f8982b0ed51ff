//! Attribute and child-level reconciliation of a live subtree against an
//! incoming one.
//!
//! Ids present in both trees are "persistent". Every element carries the set
//! of persistent ids found in its subtree; two elements whose sets intersect
//! describe the same region and are morphed into each other. Remaining
//! nodes fall back to a soft match on kind and tag. Old nodes still holding
//! persistent ids are parked in a side fragment when unmatched so a later
//! sibling can re-adopt them by id.

use crate::render::permanent::is_permanent;
use std::collections::HashMap;
use std::collections::HashSet;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;
use tr_dom::NodeKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MorphReport {
    pub morphed: usize,
    pub inserted: usize,
    pub removed: usize,
    pub scripts: usize,
}

/// Morphs `target` (in `document`) into `incoming` (in `source`), element
/// included. When the two cannot match, `target` is swapped for a copy.
/// Returns the node that now stands where `target` stood.
pub fn morph_element(
    document: &mut Document,
    target: NodeId,
    source: &Document,
    incoming: NodeId,
) -> DriveResult<(NodeId, MorphReport)> {
    let mut morpher = Morpher::new(document, target, source, incoming);
    let result = if morpher.is_soft_match(document, target, incoming) {
        morpher.morph_node(document, target, incoming).map(|()| target)
    } else {
        morpher.replace_whole(document, target, incoming)
    };
    let report = morpher.finish(document);
    Ok((result?, report))
}

/// Morphs only the children of `target` into the children of `incoming`.
pub fn morph_children(
    document: &mut Document,
    target: NodeId,
    source: &Document,
    incoming: NodeId,
) -> DriveResult<MorphReport> {
    let mut morpher = Morpher::new(document, target, source, incoming);
    let result = morpher.morph_child_list(document, target, incoming);
    let report = morpher.finish(document);
    result.map(|()| report)
}

struct Morpher<'a> {
    source: &'a Document,
    root: NodeId,
    persistent: HashSet<String>,
    old_sets: HashMap<NodeId, HashSet<String>>,
    new_sets: HashMap<NodeId, HashSet<String>>,
    pantry: NodeId,
    settled: HashSet<NodeId>,
    report: MorphReport,
}

impl<'a> Morpher<'a> {
    fn new(document: &mut Document, root: NodeId, source: &'a Document, incoming: NodeId) -> Self {
        let old_ids = ids_under(document, root);
        let new_ids = ids_under(source, incoming);
        let persistent: HashSet<String> = old_ids
            .keys()
            .filter(|id| new_ids.contains_key(*id))
            .cloned()
            .collect();

        let old_sets = id_sets(document, root, &old_ids, &persistent);
        let new_sets = id_sets(source, incoming, &new_ids, &persistent);
        let pantry = document.create_fragment();

        Self {
            source,
            root,
            persistent,
            old_sets,
            new_sets,
            pantry,
            settled: HashSet::new(),
            report: MorphReport::default(),
        }
    }

    fn finish(self, document: &mut Document) -> MorphReport {
        document.dispose(self.pantry);
        self.report
    }

    fn old_set(&self, node: NodeId) -> Option<&HashSet<String>> {
        self.old_sets.get(&node).filter(|set| !set.is_empty())
    }

    fn new_set(&self, node: NodeId) -> Option<&HashSet<String>> {
        self.new_sets.get(&node).filter(|set| !set.is_empty())
    }

    fn is_id_set_match(&self, document: &Document, old: NodeId, new: NodeId) -> bool {
        if !same_tag(document, old, self.source, new) {
            return false;
        }
        match (self.old_set(old), self.new_set(new)) {
            (Some(old_set), Some(new_set)) => !old_set.is_disjoint(new_set),
            _ => false,
        }
    }

    fn is_soft_match(&self, document: &Document, old: NodeId, new: NodeId) -> bool {
        match (document.kind(old), self.source.kind(new)) {
            (Some(NodeKind::Text(_)), Some(NodeKind::Text(_)))
            | (Some(NodeKind::Comment(_)), Some(NodeKind::Comment(_))) => true,
            (Some(NodeKind::Element(old_element)), Some(NodeKind::Element(new_element))) => {
                if old_element.name != new_element.name {
                    return false;
                }
                if old_element.id().is_some() && old_element.id() != new_element.id() {
                    return false;
                }
                match (self.old_set(old), self.new_set(new)) {
                    (Some(old_set), Some(new_set)) => !old_set.is_disjoint(new_set),
                    (Some(_), None) | (None, Some(_)) => false,
                    (None, None) => true,
                }
            }
            _ => false,
        }
    }

    fn morph_node(&mut self, document: &mut Document, old: NodeId, new: NodeId) -> DriveResult<()> {
        self.settled.insert(old);
        self.report.morphed += 1;

        if !document.is_element(old) {
            let incoming = self.source.text(new).unwrap_or_default();
            if document.text(old) != Some(incoming) {
                document.set_text(old, incoming)?;
            }
            return Ok(());
        }

        sync_attributes(document, old, self.source, new)?;
        if is_permanent(document, old) {
            return Ok(());
        }
        sync_form_state(document, old, self.source, new)?;
        self.morph_child_list(document, old, new)
    }

    fn morph_child_list(&mut self, document: &mut Document, parent: NodeId, new_parent: NodeId) -> DriveResult<()> {
        let mut cursor = document.first_child(parent);

        for new_child in self.source.children(new_parent).to_vec() {
            if let Some(old) = cursor {
                if self.is_id_set_match(document, old, new_child) || self.is_soft_match(document, old, new_child) {
                    self.morph_node(document, old, new_child)?;
                    cursor = document.next_sibling(old);
                    continue;
                }
            }

            if let Some(found) = self.find_id_set_match(document, cursor, new_child) {
                let mut doomed = cursor;
                while let Some(node) = doomed {
                    if node == found {
                        break;
                    }
                    doomed = document.next_sibling(node);
                    self.remove_old(document, node);
                }
                self.morph_node(document, found, new_child)?;
                cursor = document.next_sibling(found);
                continue;
            }

            if let Some(existing) = self.find_persistent(document, parent, new_child) {
                document.insert_before(parent, existing, cursor)?;
                if cursor == Some(existing) {
                    cursor = document.next_sibling(existing);
                }
                self.morph_node(document, existing, new_child)?;
                continue;
            }

            let created = self.create_node(document, new_child)?;
            document.insert_before(parent, created, cursor)?;
            self.report.inserted += 1;
        }

        while let Some(node) = cursor {
            cursor = document.next_sibling(node);
            self.remove_old(document, node);
        }
        Ok(())
    }

    /// Later sibling of `cursor` (inclusive) whose id set matches `new`.
    fn find_id_set_match(&self, document: &Document, cursor: Option<NodeId>, new: NodeId) -> Option<NodeId> {
        self.new_set(new)?;
        let mut candidate = cursor;
        while let Some(node) = candidate {
            if self.is_id_set_match(document, node, new) {
                return Some(node);
            }
            candidate = document.next_sibling(node);
        }
        None
    }

    /// Live element carrying `new`'s persistent id, parked or still in place.
    fn find_persistent(&self, document: &Document, parent: NodeId, new: NodeId) -> Option<NodeId> {
        let id = self.source.element_id(new)?;
        if !self.persistent.contains(id) {
            return None;
        }
        let found = document
            .element_by_id_within(self.pantry, id)
            .or_else(|| document.element_by_id_within(self.root, id))?;
        let usable = !self.settled.contains(&found)
            && !document.contains(found, parent)
            && same_tag(document, found, self.source, new);
        usable.then_some(found)
    }

    fn remove_old(&mut self, document: &mut Document, node: NodeId) {
        self.report.removed += 1;
        if document.is_element(node) && self.old_set(node).is_some() {
            if let Err(error) = document.append_child(self.pantry, node) {
                log::trace!(target: "trellis::render", "could not park node: {error}");
                document.dispose(node);
            }
        } else {
            document.dispose(node);
        }
    }

    /// Builds a live copy of `new`. Subtrees holding persistent ids are built
    /// element by element so live persistent nodes can be adopted into them.
    fn create_node(&mut self, document: &mut Document, new: NodeId) -> DriveResult<NodeId> {
        let source = self.source;
        let Some(tag) = source.tag(new) else {
            return document.import_node(source, new);
        };
        if self.new_set(new).is_none() {
            let imported = document.import_node(source, new)?;
            self.report.scripts += count_scripts(document, imported);
            return Ok(imported);
        }

        let attributes: Vec<(&str, &str)> = source
            .attributes(new)
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let created = document.create_element_with(tag, &attributes);
        if tag == "script" {
            self.report.scripts += 1;
        }
        self.morph_child_list(document, created, new)?;
        Ok(created)
    }

    fn replace_whole(&mut self, document: &mut Document, target: NodeId, incoming: NodeId) -> DriveResult<NodeId> {
        let created = self.create_node(document, incoming)?;
        document.replace_node(target, created)?;
        document.dispose(target);
        self.report.inserted += 1;
        self.report.removed += 1;
        Ok(created)
    }
}

fn same_tag(document: &Document, old: NodeId, source: &Document, new: NodeId) -> bool {
    match (document.tag(old), source.tag(new)) {
        (Some(old_tag), Some(new_tag)) => old_tag == new_tag,
        _ => false,
    }
}

fn ids_under(document: &Document, root: NodeId) -> HashMap<String, NodeId> {
    let mut ids = HashMap::new();
    for node in document.descendants(root) {
        if let Some(id) = document.element_id(node) {
            ids.entry(id.to_owned()).or_insert(node);
        }
    }
    ids
}

/// Adds each persistent id to its element and every ancestor below `root`.
fn id_sets(
    document: &Document,
    root: NodeId,
    ids: &HashMap<String, NodeId>,
    persistent: &HashSet<String>,
) -> HashMap<NodeId, HashSet<String>> {
    let mut sets: HashMap<NodeId, HashSet<String>> = HashMap::new();
    for id in persistent {
        let Some(node) = ids.get(id) else {
            continue;
        };
        let mut cursor = Some(*node);
        while let Some(current) = cursor {
            if current == root {
                break;
            }
            sets.entry(current).or_default().insert(id.clone());
            cursor = document.parent(current);
        }
    }
    sets
}

fn sync_attributes(document: &mut Document, old: NodeId, source: &Document, new: NodeId) -> DriveResult<()> {
    for (name, value) in source.attributes(new) {
        if document.attr(old, name) != Some(value.as_str()) {
            document.set_attr(old, name, value)?;
        }
    }
    let stale: Vec<String> = document
        .attributes(old)
        .iter()
        .filter(|(name, _)| !source.has_attr(new, name))
        .map(|(name, _)| name.clone())
        .collect();
    for name in stale {
        document.remove_attr(old, &name);
    }
    Ok(())
}

/// Live state follows the incoming markup; the server's view wins.
fn sync_form_state(document: &mut Document, old: NodeId, source: &Document, new: NodeId) -> DriveResult<()> {
    let Some(tag) = document.tag(old).map(str::to_owned) else {
        return Ok(());
    };
    match tag.as_str() {
        "input" => {
            if matches!(source.attr(new, "type"), Some("checkbox" | "radio")) {
                let checked = source.checked(new);
                if document.checked(old) != checked {
                    document.set_checked(old, checked)?;
                }
            } else if source.attr(new, "type") != Some("file") {
                let value = source.value(new);
                if document.value(old) != value {
                    document.set_value(old, &value)?;
                }
            }
        }
        "textarea" => {
            let value = source.value(new);
            if document.value(old) != value {
                document.set_value(old, &value)?;
            }
        }
        "option" => {
            let selected = source.selected(new);
            if document.selected(old) != selected {
                document.set_selected(old, selected)?;
            }
        }
        _ => {}
    }
    Ok(())
}

pub(crate) fn count_scripts(document: &Document, node: NodeId) -> usize {
    std::iter::once(node)
        .chain(document.descendants(node))
        .filter(|candidate| document.has_tag(*candidate, "script"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::morph_children;
    use super::morph_element;
    use tr_dom::Document;
    use tr_dom::NodeId;

    fn document(html: &str) -> Document {
        match tr_html::parse_document(html) {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        }
    }

    fn body(document: &Document) -> NodeId {
        match document.body() {
            Some(body) => body,
            None => panic!("body missing"),
        }
    }

    fn by_id(document: &Document, id: &str) -> NodeId {
        match document.element_by_id(id) {
            Some(node) => node,
            None => panic!("#{id} missing"),
        }
    }

    #[test]
    fn morph_produces_the_incoming_markup() {
        let mut live = document("<body><h1 class=\"old\">Hi</h1><p>one</p><p>two</p></body>");
        let incoming = document("<body><h1 class=\"new\">Hello</h1><p>one</p><ul><li>x</li></ul></body>");
        let live_body = body(&live);
        let heading = live.children(live_body)[0];

        if let Err(error) = morph_children(&mut live, live_body, &incoming, body(&incoming)) {
            panic!("{error}");
        }
        assert_eq!(live.inner_html(live_body), incoming.inner_html(body(&incoming)));
        assert_eq!(live.children(live_body)[0], heading);
    }

    #[test]
    fn persistent_ids_keep_identity_when_reordered() {
        let mut live = document("<body><div id=\"a\">A</div><div id=\"b\">B</div><div id=\"c\">C</div></body>");
        let incoming = document("<body><div id=\"c\">C2</div><div id=\"a\">A</div><div id=\"b\">B</div></body>");
        let (a, b, c) = (by_id(&live, "a"), by_id(&live, "b"), by_id(&live, "c"));
        let live_body = body(&live);

        if let Err(error) = morph_children(&mut live, live_body, &incoming, body(&incoming)) {
            panic!("{error}");
        }
        assert_eq!(live.children(live_body), &[c, a, b]);
        assert_eq!(live.text_content(c), "C2");
    }

    #[test]
    fn permanent_element_survives_a_replaced_parent() {
        let mut live = document(
            "<body><div id=\"wrap\"><section class=\"a\">\
             <div id=\"player\" data-turbo-permanent data-state=\"old\">live</div></section></div></body>",
        );
        let incoming = document(
            "<body><div id=\"wrap\"><article>\
             <div id=\"player\" data-turbo-permanent data-state=\"new\">server</div></article></div></body>",
        );
        let player = by_id(&live, "player");
        let live_body = body(&live);

        if let Err(error) = morph_children(&mut live, live_body, &incoming, body(&incoming)) {
            panic!("{error}");
        }
        assert!(live.is_alive(player));
        assert_eq!(live.element_by_id("player"), Some(player));
        assert_eq!(live.attr(player, "data-state"), Some("new"));
        assert_eq!(live.text_content(player), "live");
        let parent = live.parent(player);
        assert!(parent.is_some_and(|parent| live.has_tag(parent, "article")));
        assert!(live.select(live_body, "section").is_ok_and(|found| found.is_none()));
    }

    #[test]
    fn form_state_follows_the_incoming_markup() {
        let mut live = document("<body><input id=\"q\" value=\"a\"><input type=\"checkbox\" name=\"c\" checked></body>");
        let incoming = document("<body><input id=\"q\" value=\"b\"><input type=\"checkbox\" name=\"c\"></body>");
        let query = by_id(&live, "q");
        if let Err(error) = live.set_value(query, "typed") {
            panic!("{error}");
        }
        let live_body = body(&live);

        if let Err(error) = morph_children(&mut live, live_body, &incoming, body(&incoming)) {
            panic!("{error}");
        }
        assert_eq!(live.value(query), "b");
        let checkbox = live.children(live_body)[1];
        assert!(!live.checked(checkbox));
    }

    #[test]
    fn mismatched_roots_are_swapped_whole() {
        let mut live = document("<body><div id=\"box\"><p>x</p></div></body>");
        let incoming = match tr_html::parse_fragment("<section id=\"box\"><p>y</p></section>") {
            Ok(document) => document,
            Err(error) => panic!("{error}"),
        };
        let target = by_id(&live, "box");
        let section = incoming.children(incoming.root())[0];

        let (result, _) = match morph_element(&mut live, target, &incoming, section) {
            Ok(outcome) => outcome,
            Err(error) => panic!("{error}"),
        };
        assert!(!live.is_alive(target));
        assert!(live.has_tag(result, "section"));
        assert_eq!(live.element_by_id("box"), Some(result));
    }
}
