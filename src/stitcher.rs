use crate::error::{Result, VastError};
use crate::models::{Document, NodeId, Tree};
use quick_xml::escape::escape;

/// Serialize a tree to an XML string
pub fn to_xml(tree: &Tree) -> String {
    let mut xml = String::new();

    // XML declaration
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    node_to_xml(tree, tree.root(), 0, &mut xml);

    xml
}

/// Serialize a single node and its subtree, without declaration
pub fn node_to_xml_string(tree: &Tree, id: NodeId) -> String {
    let mut xml = String::new();
    node_to_xml(tree, id, 0, &mut xml);
    xml.trim_end().to_string()
}

fn node_to_xml(tree: &Tree, id: NodeId, level: usize, xml: &mut String) {
    let node = tree.node(id);
    let indent = "  ".repeat(level);

    // Open element with attributes
    xml.push_str(&format!("{}<{}", indent, node.tag));
    for (name, value) in &node.attrs {
        xml.push_str(&format!(" {}=\"{}\"", name, escape(value.as_str())));
    }

    let content = node.content.trim();
    if node.children().is_empty() {
        if content.is_empty() {
            xml.push_str("/>\n");
        } else {
            xml.push_str(&format!(">{}</{}>\n", escape(content), node.tag));
        }
        return;
    }

    xml.push_str(">\n");
    if !content.is_empty() {
        xml.push_str(&format!("{}  {}\n", indent, escape(content)));
    }
    for child in tree.children(id) {
        node_to_xml(tree, child, level + 1, xml);
    }

    // Close element
    xml.push_str(&format!("{}</{}>\n", indent, node.tag));
}

/// Stitch a resolved chain (root first, InLine document last) into one tree.
///
/// The InLine tree is copied and every wrapper's Impression, Error and
/// Extension elements are added to the InLine element. Wrapper Tracking
/// elements go to the first Linear's TrackingEvents, and wrapper
/// ClickTracking / CustomClick elements to its VideoClicks.
pub fn stitch_chain(chain: &[Document]) -> Result<Tree> {
    let (terminal, wrappers) = chain
        .split_last()
        .ok_or_else(|| VastError::Other("cannot stitch an empty chain".to_string()))?;

    let mut stitched = terminal.tree.clone();
    let inline = stitched
        .find_first("InLine")
        .ok_or_else(|| VastError::MissingField("InLine".to_string()))?;
    let linear = stitched
        .descendants(inline)
        .into_iter()
        .find(|id| stitched.tag(*id) == "Linear");

    for doc in wrappers {
        let Some(wrapper) = doc.tree.find_first("Wrapper") else {
            continue;
        };
        merge_wrapper(&mut stitched, inline, linear, &doc.tree, wrapper);
    }

    Ok(stitched)
}

/// Graft the cumulative elements below `id` into the stitched tree. Grafted
/// elements are copied whole and not searched further, so an Extension body
/// never contributes trackers.
fn merge_wrapper(stitched: &mut Tree, inline: NodeId, linear: Option<NodeId>, source: &Tree, id: NodeId) {
    for child in source.children(id) {
        match source.tag(child) {
            "Impression" | "Error" => {
                stitched.graft(inline, source, child);
            }
            "Extension" => {
                let extensions = child_or_append(stitched, inline, "Extensions");
                stitched.graft(extensions, source, child);
            }
            "Tracking" => {
                if let Some(linear) = linear {
                    let events = child_or_append(stitched, linear, "TrackingEvents");
                    stitched.graft(events, source, child);
                }
            }
            "ClickTracking" | "CustomClick" => {
                if let Some(linear) = linear {
                    let clicks = child_or_append(stitched, linear, "VideoClicks");
                    stitched.graft(clicks, source, child);
                }
            }
            _ => merge_wrapper(stitched, inline, linear, source, child),
        }
    }
}

fn child_or_append(tree: &mut Tree, parent: NodeId, tag: &str) -> NodeId {
    match tree.child(parent, tag) {
        Some(existing) => existing,
        None => tree.append(parent, tag),
    }
}
