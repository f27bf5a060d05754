use crate::error::{Result, VastError};
use crate::models::{Document, NodeId, Tree};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::str::from_utf8;

/// Parse XML text into a document tree
pub fn parse_tree(xml: &str) -> Result<Tree> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut tree: Option<Tree> = None;
    // Open elements, innermost last
    let mut stack: Vec<NodeId> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let id = open_element(&mut tree, &stack, e)?;
                stack.push(id);
            }
            Ok(Event::Empty(ref e)) => {
                open_element(&mut tree, &stack, e)?;
            }
            Ok(Event::Text(e)) => {
                if let (Some(tree), Some(current)) = (tree.as_mut(), stack.last()) {
                    let text = e.unescape()?;
                    tree.node_mut(*current).content.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let (Some(tree), Some(current)) = (tree.as_mut(), stack.last()) {
                    let text = from_utf8(&e).map_err(|err| {
                        VastError::MalformedDocument(format!("invalid UTF-8 in CDATA: {}", err))
                    })?;
                    tree.node_mut(*current).content.push_str(text.trim());
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        let name = tree
            .as_ref()
            .map(|tree| tree.tag(*open).to_string())
            .unwrap_or_default();
        return Err(VastError::MalformedDocument(format!(
            "unexpected end of file inside <{}>",
            name
        )));
    }

    tree.ok_or_else(|| VastError::MalformedDocument("no root element".to_string()))
}

/// Parse XML text into a [`Document`] loaded from `source`
pub fn parse_document(xml: &str, source: &str, depth: usize) -> Result<Document> {
    let tree = parse_tree(xml)?;
    Ok(Document::new(tree, source, depth))
}

/// Create the node for a start or empty tag and copy its attributes
fn open_element(tree: &mut Option<Tree>, stack: &[NodeId], start: &BytesStart) -> Result<NodeId> {
    let name = from_utf8(start.name().as_ref())
        .map_err(|err| VastError::MalformedDocument(format!("invalid UTF-8 in tag name: {}", err)))?
        .to_string();

    let id = if let Some(existing) = tree.as_mut() {
        let Some(parent) = stack.last() else {
            return Err(VastError::MalformedDocument(format!(
                "element <{}> found after the root element",
                name
            )));
        };
        existing.append(*parent, &name)
    } else {
        let new_tree = Tree::new(&name);
        let root = new_tree.root();
        *tree = Some(new_tree);
        root
    };

    if let Some(tree) = tree.as_mut() {
        for attr in start.attributes() {
            let attr = attr?;
            let key = from_utf8(attr.key.as_ref()).map_err(|err| {
                VastError::MalformedDocument(format!("invalid UTF-8 in attribute name: {}", err))
            })?;
            let value = attr.unescape_value()?;
            tree.set_attr(id, key, &value);
        }
    }

    Ok(id)
}
