//! Reconciles the live `<head>` with an incoming one.

use std::collections::HashSet;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;

/// How the incoming head is combined with the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadMerge {
    /// Keep every live element and add the new ones.
    Append,
    /// Keep shared and tracked elements, drop the rest, add the new ones.
    Merge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadReport {
    pub added: usize,
    pub removed: usize,
    pub scripts: usize,
}

/// Merges `source`'s head into `document`'s head. Elements are compared by
/// their serialized markup.
pub fn merge_head(document: &mut Document, source: &Document, policy: HeadMerge) -> DriveResult<HeadReport> {
    let mut report = HeadReport::default();
    let (Some(live_head), Some(new_head)) = (document.head(), source.head()) else {
        return Ok(report);
    };

    let incoming: Vec<(NodeId, String)> = source
        .element_children(new_head)
        .into_iter()
        .map(|child| (child, source.outer_html(child)))
        .collect();
    let incoming_markup: HashSet<&str> = incoming.iter().map(|(_, markup)| markup.as_str()).collect();

    let mut kept = HashSet::new();
    for child in document.element_children(live_head) {
        let markup = document.outer_html(child);
        let keep = match policy {
            HeadMerge::Append => true,
            HeadMerge::Merge => {
                incoming_markup.contains(markup.as_str())
                    || document.has_attr(child, "data-turbo-track")
                    || document.has_attr(child, "data-turbo-permanent")
            }
        };
        if keep {
            kept.insert(markup);
        } else {
            document.dispose(child);
            report.removed += 1;
        }
    }

    for (child, markup) in incoming {
        if kept.contains(&markup) {
            continue;
        }
        let imported = document.import_node(source, child)?;
        document.append_child(live_head, imported)?;
        if document.has_tag(imported, "script") {
            report.scripts += 1;
        }
        kept.insert(markup);
        report.added += 1;
    }

    log::trace!(
        target: "trellis::render",
        "head merge {:?}: {} added, {} removed",
        policy,
        report.added,
        report.removed
    );
    Ok(report)
}
