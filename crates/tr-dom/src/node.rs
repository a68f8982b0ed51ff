//! Node records stored in the arena.

/// Handle to a node slot. The generation guards against stale handles once a
/// slot has been freed and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Fragment,
    Doctype(String),
    Element(Element),
    Text(String),
    Comment(String),
}

impl NodeKind {
    pub fn is_element(&self) -> bool {
        matches!(self, Self::Element(_))
    }

    pub fn can_have_children(&self) -> bool {
        matches!(self, Self::Document | Self::Fragment | Self::Element(_))
    }
}

/// Element name, attributes and live form state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub(crate) attributes: Vec<(String, String)>,
    pub form: FormState,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attributes: Vec::new(),
            form: FormState::default(),
        }
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|value| !value.is_empty())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|token| token == class))
    }

    pub fn is_form_control(&self) -> bool {
        matches!(self.name.as_str(), "input" | "textarea" | "select" | "option")
    }

    pub(crate) fn set_attr(&mut self, name: &str, value: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value.to_owned())),
            None => {
                self.attributes.push((name, value.to_owned()));
                None
            }
        }
    }

    pub(crate) fn remove_attr(&mut self, name: &str) -> Option<String> {
        let position = self
            .attributes
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.attributes.remove(position).1)
    }
}

/// Live form-control state that is not reflected in attributes.
///
/// `None` means "still the default", i.e. derived from markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    pub value: Option<String>,
    pub checked: Option<bool>,
    pub selected: Option<bool>,
}

impl FormState {
    pub fn is_dirty(&self) -> bool {
        self.value.is_some() || self.checked.is_some() || self.selected.is_some()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NodeRecord {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) record: Option<NodeRecord>,
}
