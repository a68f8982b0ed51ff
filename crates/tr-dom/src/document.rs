//! Generational node arena with tree mutation primitives.

use crate::node::Element;
use crate::node::NodeId;
use crate::node::NodeKind;
use crate::node::NodeRecord;
use crate::node::Slot;
use crate::selector::Selector;
use std::collections::HashMap;
use tr_core::DriveError;
use tr_core::DriveResult;

/// One DOM tree plus any detached nodes created for it.
#[derive(Debug, Clone)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    ids: HashMap<String, Vec<NodeId>>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut document = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            ids: HashMap::new(),
        };
        document.root = document.alloc(NodeKind::Document);
        document
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.record.is_some())
            .count()
    }

    // -- Node creation ---

    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.alloc(NodeKind::Element(Element::new(name)))
    }

    pub fn create_element_with(&mut self, name: &str, attributes: &[(&str, &str)]) -> NodeId {
        let node = self.create_element(name);
        for (key, value) in attributes {
            self.set_attr_unchecked(node, key, value);
        }
        node
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_owned()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Comment(text.to_owned()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeKind::Fragment)
    }

    pub fn create_doctype(&mut self, name: &str) -> NodeId {
        self.alloc(NodeKind::Doctype(name.to_owned()))
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let record = NodeRecord {
            kind,
            parent: None,
            children: Vec::new(),
        };

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.record = Some(record);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            record: Some(record),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    // -- Record access ---

    fn record(&self, node: NodeId) -> Option<&NodeRecord> {
        let slot = self.slots.get(node.index as usize)?;
        if slot.generation != node.generation {
            return None;
        }
        slot.record.as_ref()
    }

    fn record_mut(&mut self, node: NodeId) -> Option<&mut NodeRecord> {
        let slot = self.slots.get_mut(node.index as usize)?;
        if slot.generation != node.generation {
            return None;
        }
        slot.record.as_mut()
    }

    fn require(&self, node: NodeId) -> DriveResult<&NodeRecord> {
        self.record(node).ok_or_else(|| missing(node))
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.record(node).is_some()
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.record(node).map(|record| &record.kind)
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match self.kind(node)? {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        match &mut self.record_mut(node)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.element(node).is_some()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|element| element.name.as_str())
    }

    pub fn has_tag(&self, node: NodeId, tag: &str) -> bool {
        self.tag(node) == Some(tag)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.record(node).and_then(|record| record.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.record(node)
            .map(|record| record.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn element_children(&self, node: NodeId) -> Vec<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .filter(|child| self.is_element(*child))
            .collect()
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.children(node).first().copied()
    }

    pub fn index_in_parent(&self, node: NodeId) -> Option<usize> {
        let parent = self.parent(node)?;
        self.children(parent).iter().position(|child| *child == node)
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let index = self.index_in_parent(node)?;
        self.children(parent).get(index + 1).copied()
    }

    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let index = self.index_in_parent(node)?;
        index
            .checked_sub(1)
            .and_then(|previous| self.children(parent).get(previous).copied())
    }

    /// True when `node` is reachable from the document root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// True when `node` is `ancestor` or one of its descendants.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return self.is_alive(current);
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.parent(node);
        while let Some(current) = cursor {
            out.push(current);
            cursor = self.parent(current);
        }
        out
    }

    /// Pre-order descendants of `node`, excluding `node` itself.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    // -- Well-known elements ---

    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .iter()
            .copied()
            .find(|child| self.has_tag(*child, "html"))
    }

    pub fn head(&self) -> Option<NodeId> {
        self.document_element().and_then(|html| {
            self.children(html)
                .iter()
                .copied()
                .find(|child| self.has_tag(*child, "head"))
        })
    }

    pub fn body(&self) -> Option<NodeId> {
        self.document_element().and_then(|html| {
            self.children(html)
                .iter()
                .copied()
                .find(|child| self.has_tag(*child, "body"))
        })
    }

    // -- Tree mutation ---

    /// Appends `child` as last child of `parent`, detaching it first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DriveResult<()> {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` before `reference` (or at the end when `None`).
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DriveResult<()> {
        if !self.require(parent)?.kind.can_have_children() {
            return Err(DriveError::new(
                "dom.hierarchy_invalid",
                format!("node {} cannot have children", parent.index),
            ));
        }
        self.require(child)?;
        if self.contains(child, parent) {
            return Err(DriveError::new(
                "dom.hierarchy_invalid",
                format!(
                    "inserting node {} under {} would create a cycle",
                    child.index, parent.index
                ),
            ));
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DriveError::new(
                    "dom.reference_invalid",
                    format!(
                        "reference node {} is not a child of {}",
                        reference.index, parent.index
                    ),
                ));
            }
            if reference == child {
                return Ok(());
            }
        }

        self.detach(child);

        let position = match reference {
            Some(reference) => self
                .children(parent)
                .iter()
                .position(|candidate| *candidate == reference)
                .unwrap_or(self.children(parent).len()),
            None => self.children(parent).len(),
        };

        if let Some(record) = self.record_mut(parent) {
            record.children.insert(position, child);
        }
        if let Some(record) = self.record_mut(child) {
            record.parent = Some(parent);
        }
        Ok(())
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> DriveResult<()> {
        let first = self.first_child(parent);
        if first == Some(child) {
            return Ok(());
        }
        self.insert_before(parent, child, first)
    }

    /// Inserts `node` immediately after `reference` in its parent.
    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> DriveResult<()> {
        let parent = self.parent(reference).ok_or_else(|| orphan(reference))?;
        let next = self.next_sibling(reference);
        if next == Some(node) || reference == node {
            return Ok(());
        }
        self.insert_before(parent, node, next)
    }

    /// Detaches `node` from its parent; the node stays alive.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        if let Some(record) = self.record_mut(parent) {
            record.children.retain(|child| *child != node);
        }
        if let Some(record) = self.record_mut(node) {
            record.parent = None;
        }
    }

    /// Puts `replacement` where `old` was and detaches `old`.
    pub fn replace_node(&mut self, old: NodeId, replacement: NodeId) -> DriveResult<()> {
        if old == replacement {
            return Ok(());
        }
        let parent = self.parent(old).ok_or_else(|| orphan(old))?;
        self.insert_before(parent, replacement, Some(old))?;
        self.detach(old);
        Ok(())
    }

    /// Detaches and frees `node` with its whole subtree.
    pub fn dispose(&mut self, node: NodeId) {
        if node == self.root {
            return;
        }
        self.detach(node);
        let mut doomed = self.descendants(node);
        doomed.push(node);
        for id in doomed {
            if let Some(element_id) = self.element(id).and_then(|element| element.id()) {
                let key = element_id.to_owned();
                self.unindex(&key, id);
            }
            if let Some(slot) = self.slots.get_mut(id.index as usize) {
                if slot.generation == id.generation && slot.record.take().is_some() {
                    self.free.push(id.index);
                }
            }
        }
    }

    /// Frees every child of `node`.
    pub fn clear_children(&mut self, node: NodeId) {
        for child in self.children(node).to_vec() {
            self.dispose(child);
        }
    }

    // -- Attributes ---

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node).and_then(|element| element.attr(name))
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        self.element(node)
            .map(Element::attributes)
            .unwrap_or(&[])
    }

    pub fn element_id(&self, node: NodeId) -> Option<&str> {
        self.element(node).and_then(Element::id)
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> DriveResult<()> {
        if self.element(node).is_none() {
            return Err(not_element(node));
        }
        self.set_attr_unchecked(node, name, value);
        Ok(())
    }

    fn set_attr_unchecked(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(element) = self.element_mut(node) else {
            return;
        };
        let previous = element.set_attr(name, value);
        if name.eq_ignore_ascii_case("id") {
            if let Some(previous) = previous {
                self.unindex(&previous, node);
            }
            if !value.is_empty() {
                self.ids.entry(value.to_owned()).or_default().push(node);
            }
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        let Some(element) = self.element_mut(node) else {
            return;
        };
        let previous = element.remove_attr(name);
        if name.eq_ignore_ascii_case("id") {
            if let Some(previous) = previous {
                self.unindex(&previous, node);
            }
        }
    }

    pub fn toggle_attr(&mut self, node: NodeId, name: &str, present: bool) -> DriveResult<()> {
        if present {
            if !self.has_attr(node, name) {
                self.set_attr(node, name, "")?;
            }
        } else {
            self.remove_attr(node, name);
        }
        Ok(())
    }

    fn unindex(&mut self, key: &str, node: NodeId) {
        if let Some(entries) = self.ids.get_mut(key) {
            entries.retain(|candidate| *candidate != node);
            if entries.is_empty() {
                self.ids.remove(key);
            }
        }
    }

    /// First connected element carrying `id`, in document order.
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.element_by_id_within(self.root, id)
    }

    /// First element under `scope` (inclusive) carrying `id`, in tree order.
    pub fn element_by_id_within(&self, scope: NodeId, id: &str) -> Option<NodeId> {
        let candidates: Vec<NodeId> = self
            .ids
            .get(id)?
            .iter()
            .copied()
            .filter(|node| self.contains(scope, *node))
            .collect();

        match candidates.as_slice() {
            [] => None,
            [only] => Some(*only),
            _ => std::iter::once(scope)
                .chain(self.descendants(scope))
                .find(|node| candidates.contains(node)),
        }
    }

    // -- Text ---

    pub fn text(&self, node: NodeId) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Text(text) | NodeKind::Comment(text) => Some(text),
            _ => None,
        }
    }

    pub fn set_text(&mut self, node: NodeId, value: &str) -> DriveResult<()> {
        match self.record_mut(node).map(|record| &mut record.kind) {
            Some(NodeKind::Text(text)) | Some(NodeKind::Comment(text)) => {
                value.clone_into(text);
                Ok(())
            }
            Some(_) => Err(DriveError::new(
                "dom.kind_mismatch",
                format!("node {} is not a character data node", node.index),
            )),
            None => Err(missing(node)),
        }
    }

    pub fn text_content(&self, node: NodeId) -> String {
        if let Some(NodeKind::Text(text)) = self.kind(node) {
            return text.clone();
        }
        let mut out = String::new();
        for descendant in self.descendants(node) {
            if let Some(NodeKind::Text(text)) = self.kind(descendant) {
                out.push_str(text);
            }
        }
        out
    }

    pub fn set_text_content(&mut self, node: NodeId, value: &str) -> DriveResult<()> {
        self.require(node)?;
        self.clear_children(node);
        if !value.is_empty() {
            let text = self.create_text(value);
            self.append_child(node, text)?;
        }
        Ok(())
    }

    // -- Live form state ---

    /// Current value of an input, textarea, select or option.
    pub fn value(&self, node: NodeId) -> String {
        let Some(element) = self.element(node) else {
            return String::new();
        };
        if let Some(value) = &element.form.value {
            return value.clone();
        }
        match element.name.as_str() {
            "textarea" => self.text_content(node),
            "select" => self
                .selected_options(node)
                .first()
                .map(|option| self.value(*option))
                .unwrap_or_default(),
            "option" => element
                .attr("value")
                .map(str::to_owned)
                .unwrap_or_else(|| self.text_content(node).trim().to_owned()),
            "input" if matches!(element.attr("type"), Some("checkbox" | "radio")) => element
                .attr("value")
                .unwrap_or("on")
                .to_owned(),
            _ => element.attr("value").unwrap_or_default().to_owned(),
        }
    }

    pub fn set_value(&mut self, node: NodeId, value: &str) -> DriveResult<()> {
        if self.has_tag(node, "select") {
            for option in self.options(node) {
                let matches = self.value(option) == value;
                self.set_selected(option, matches)?;
            }
            return Ok(());
        }
        let element = self.element_mut(node).ok_or_else(|| not_element(node))?;
        element.form.value = Some(value.to_owned());
        Ok(())
    }

    pub fn checked(&self, node: NodeId) -> bool {
        self.element(node).is_some_and(|element| {
            element
                .form
                .checked
                .unwrap_or_else(|| element.has_attr("checked"))
        })
    }

    pub fn set_checked(&mut self, node: NodeId, checked: bool) -> DriveResult<()> {
        let element = self.element_mut(node).ok_or_else(|| not_element(node))?;
        element.form.checked = Some(checked);
        Ok(())
    }

    pub fn selected(&self, node: NodeId) -> bool {
        self.element(node).is_some_and(|element| {
            element
                .form
                .selected
                .unwrap_or_else(|| element.has_attr("selected"))
        })
    }

    pub fn set_selected(&mut self, node: NodeId, selected: bool) -> DriveResult<()> {
        let element = self.element_mut(node).ok_or_else(|| not_element(node))?;
        element.form.selected = Some(selected);
        Ok(())
    }

    pub fn options(&self, select: NodeId) -> Vec<NodeId> {
        self.descendants(select)
            .into_iter()
            .filter(|node| self.has_tag(*node, "option"))
            .collect()
    }

    /// Options counted as selected. A single-choice dropdown with nothing
    /// selected falls back to its first enabled option.
    pub fn selected_options(&self, select: NodeId) -> Vec<NodeId> {
        let options = self.options(select);
        let selected: Vec<NodeId> = options
            .iter()
            .copied()
            .filter(|option| self.selected(*option))
            .collect();
        if !selected.is_empty() || !self.is_dropdown(select) {
            return selected;
        }
        options
            .into_iter()
            .find(|option| !self.option_disabled(*option))
            .into_iter()
            .collect()
    }

    fn is_dropdown(&self, select: NodeId) -> bool {
        if self.has_attr(select, "multiple") {
            return false;
        }
        self.attr(select, "size")
            .and_then(|size| size.trim().parse::<u32>().ok())
            .is_none_or(|size| size <= 1)
    }

    fn option_disabled(&self, option: NodeId) -> bool {
        self.has_attr(option, "disabled")
            || self
                .parent(option)
                .is_some_and(|parent| self.has_tag(parent, "optgroup") && self.has_attr(parent, "disabled"))
    }

    // -- Queries ---

    pub fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|node| selector.matches(self, *node))
            .collect()
    }

    pub fn query(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|node| selector.matches(self, *node))
    }

    /// Parses `selector` and returns every match under `scope`.
    pub fn select_all(&self, scope: NodeId, selector: &str) -> DriveResult<Vec<NodeId>> {
        Ok(self.query_all(scope, &Selector::parse(selector)?))
    }

    pub fn select(&self, scope: NodeId, selector: &str) -> DriveResult<Option<NodeId>> {
        Ok(self.query(scope, &Selector::parse(selector)?))
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        std::iter::once(node)
            .chain(self.ancestors(node))
            .find(|candidate| selector.matches(self, *candidate))
    }

    // -- Copying ---

    /// Deep-copies `node` from `source` into this arena, detached.
    pub fn import_node(&mut self, source: &Document, node: NodeId) -> DriveResult<NodeId> {
        let kind = source.require(node)?.kind.clone();
        let copy = self.alloc_with_index(kind);
        for child in source.children(node) {
            let imported = self.import_node(source, *child)?;
            self.append_child(copy, imported)?;
        }
        Ok(copy)
    }

    /// Deep-copies `node` inside this arena, detached.
    pub fn clone_node(&mut self, node: NodeId) -> DriveResult<NodeId> {
        let kind = self.require(node)?.kind.clone();
        let copy = self.alloc_with_index(kind);
        for child in self.children(node).to_vec() {
            let cloned = self.clone_node(child)?;
            self.append_child(copy, cloned)?;
        }
        Ok(copy)
    }

    fn alloc_with_index(&mut self, kind: NodeKind) -> NodeId {
        let id = match &kind {
            NodeKind::Element(element) => element.id().map(str::to_owned),
            _ => None,
        };
        let node = self.alloc(kind);
        if let Some(id) = id {
            self.ids.entry(id).or_default().push(node);
        }
        node
    }

    /// Builds a standalone document whose root holds a copy of `node`'s children.
    pub fn extract(&self, node: NodeId) -> DriveResult<Document> {
        let mut document = Document::new();
        let root = document.root();
        for child in self.children(node) {
            let imported = document.import_node(self, *child)?;
            document.append_child(root, imported)?;
        }
        Ok(document)
    }
}

fn missing(node: NodeId) -> DriveError {
    DriveError::new(
        "dom.node_missing",
        format!(
            "node {} (generation {}) is not alive",
            node.index, node.generation
        ),
    )
}

fn orphan(node: NodeId) -> DriveError {
    DriveError::new(
        "dom.node_detached",
        format!("node {} has no parent", node.index),
    )
}

fn not_element(node: NodeId) -> DriveError {
    DriveError::new(
        "dom.kind_mismatch",
        format!("node {} is not an element", node.index),
    )
}

#[cfg(test)]
mod tests {
    use super::Document;

    fn sample() -> (Document, [super::NodeId; 4]) {
        let mut doc = Document::new();
        let root = doc.root();
        let html = doc.create_element("html");
        let body = doc.create_element("body");
        let first = doc.create_element_with("div", &[("id", "first")]);
        let second = doc.create_element_with("p", &[("id", "second"), ("class", "note big")]);
        let wired = doc
            .append_child(root, html)
            .and_then(|_| doc.append_child(html, body))
            .and_then(|_| doc.append_child(body, first))
            .and_then(|_| doc.append_child(body, second));
        assert!(wired.is_ok());
        (doc, [html, body, first, second])
    }

    #[test]
    fn id_index_tracks_connected_elements() {
        let (mut doc, [_, body, first, _]) = sample();
        assert_eq!(doc.element_by_id("first"), Some(first));
        assert_eq!(doc.body(), Some(body));

        doc.detach(first);
        assert_eq!(doc.element_by_id("first"), None);
        assert!(doc.is_alive(first));

        let renamed = doc.set_attr(first, "id", "renamed");
        assert!(renamed.is_ok());
        assert!(doc.append_child(body, first).is_ok());
        assert_eq!(doc.element_by_id("renamed"), Some(first));
        assert_eq!(doc.element_by_id("first"), None);
    }

    #[test]
    fn duplicate_ids_resolve_in_tree_order() {
        let (mut doc, [_, body, first, _]) = sample();
        let early = doc.create_element_with("span", &[("id", "dup")]);
        let late = doc.create_element_with("span", &[("id", "dup")]);
        assert!(doc.append_child(body, late).is_ok());
        assert!(doc.insert_before(body, early, Some(first)).is_ok());
        assert_eq!(doc.element_by_id("dup"), Some(early));
    }

    #[test]
    fn insertion_rejects_cycles() {
        let (mut doc, [html, body, _, _]) = sample();
        let result = doc.append_child(body, html);
        assert!(result.is_err());
        if let Err(error) = result {
            assert_eq!(error.code, "dom.hierarchy_invalid");
        }
    }

    #[test]
    fn disposed_handles_go_stale_and_slots_are_reused() {
        let (mut doc, [_, _, first, _]) = sample();
        doc.dispose(first);
        assert!(!doc.is_alive(first));
        assert_eq!(doc.element_by_id("first"), None);

        let fresh = doc.create_element("section");
        assert_eq!(fresh.index(), first.index());
        assert_ne!(fresh, first);
        assert!(doc.tag(first).is_none());
    }

    #[test]
    fn live_form_state_overrides_markup() {
        let mut doc = Document::new();
        let input = doc.create_element_with("input", &[("value", "markup")]);
        assert_eq!(doc.value(input), "markup");
        assert!(doc.set_value(input, "typed").is_ok());
        assert_eq!(doc.value(input), "typed");
        assert_eq!(doc.attr(input, "value"), Some("markup"));

        let select = doc.create_element("select");
        let a = doc.create_element_with("option", &[("value", "a"), ("selected", "")]);
        let b = doc.create_element_with("option", &[("value", "b")]);
        assert!(doc.append_child(select, a).is_ok());
        assert!(doc.append_child(select, b).is_ok());
        assert_eq!(doc.value(select), "a");
        assert!(doc.set_value(select, "b").is_ok());
        assert_eq!(doc.value(select), "b");
        assert!(!doc.selected(a));
    }

    #[test]
    fn dropdowns_without_a_selection_use_the_first_enabled_option() {
        let mut doc = Document::new();
        let select = doc.create_element("select");
        let off = doc.create_element_with("option", &[("value", "off"), ("disabled", "")]);
        let s = doc.create_element_with("option", &[("value", "s")]);
        let m = doc.create_element_with("option", &[("value", "m")]);
        for option in [off, s, m] {
            assert!(doc.append_child(select, option).is_ok());
        }
        assert_eq!(doc.selected_options(select), vec![s]);
        assert_eq!(doc.value(select), "s");

        let list = doc.create_element_with("select", &[("multiple", "")]);
        let x = doc.create_element_with("option", &[("value", "x")]);
        assert!(doc.append_child(list, x).is_ok());
        assert!(doc.selected_options(list).is_empty());
        assert_eq!(doc.value(list), "");
    }

    #[test]
    fn import_copies_subtree_and_form_state() {
        let (mut source, [_, body, first, _]) = sample();
        let input = source.create_element_with("input", &[("name", "q")]);
        assert!(source.append_child(first, input).is_ok());
        assert!(source.set_value(input, "hello").is_ok());

        let mut target = Document::new();
        let copy = target.import_node(&source, body);
        let copy = match copy {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(target.descendants(copy).len(), 3);
        let root = target.root();
        assert!(target.append_child(root, copy).is_ok());
        let imported_input = target.descendants(copy)[1];
        assert_eq!(target.value(imported_input), "hello");
        assert!(target.element_by_id("second").is_some());
    }

    #[test]
    fn sibling_navigation() {
        let (doc, [_, body, first, second]) = sample();
        assert_eq!(doc.next_sibling(first), Some(second));
        assert_eq!(doc.previous_sibling(second), Some(first));
        assert_eq!(doc.previous_sibling(first), None);
        assert_eq!(doc.index_in_parent(second), Some(1));
        assert!(doc.contains(body, second));
        assert!(!doc.contains(second, body));
    }
}
