//! Arena-backed DOM tree used by the parser, snapshots and renderers.
//!
//! Nodes live in a generational arena owned by a [`Document`] and are
//! addressed through copyable [`NodeId`] handles. Parent and child links are
//! explicit indices, and an id attribute index sits beside the arena, so
//! there are no reference cycles to manage.

mod document;
mod node;
pub mod selector;
mod serialize;

pub use document::Document;
pub use node::Element;
pub use node::FormState;
pub use node::NodeId;
pub use node::NodeKind;
pub use selector::Selector;
pub use serialize::escape_attribute;
pub use serialize::escape_text;

/// Elements serialized without a closing tag and never given children.
pub fn is_void_element(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}
