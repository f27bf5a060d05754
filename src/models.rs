use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::SchemaVersion;

/// Index of a node inside its [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

/// A single element of a VAST document tree
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Node {
    /// The tag name (e.g. "InLine", "MediaFile")
    pub tag: String,

    /// Element attributes, keyed by name
    pub attrs: BTreeMap<String, String>,

    /// Text or CDATA content, possibly empty
    pub content: String,

    /// Children in document order
    children: Vec<NodeId>,

    /// Back-reference used for path reporting only
    parent: Option<NodeId>,
}

impl Node {
    fn new(tag: &str, parent: Option<NodeId>) -> Self {
        Node {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
            content: String::new(),
            children: Vec::new(),
            parent,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

/// Arena holding every node of one document.
///
/// Nodes are only ever appended under an existing parent, so each node has
/// exactly one owner and the tree cannot contain cycles.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Create a tree holding a single root element
    pub fn new(root_tag: &str) -> Self {
        Tree {
            nodes: vec![Node::new(root_tag, None)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Append a new element below `parent` and return its id
    pub fn append(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(tag, Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Append a new element with text content
    pub fn append_with_content(&mut self, parent: NodeId, tag: &str, content: &str) -> NodeId {
        let id = self.append(parent, tag);
        self.set_content(id, content);
        id
    }

    pub fn set_content(&mut self, id: NodeId, content: &str) {
        self.nodes[id.0].content = content.to_string();
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        self.nodes[id.0]
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    pub fn tag(&self, id: NodeId) -> &str {
        &self.nodes[id.0].tag
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0].children.iter().copied()
    }

    /// First direct child of `id` with the given tag
    pub fn child(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.children(id).find(|child| self.tag(*child) == tag)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Tag names from the root down to `id`
    pub fn path(&self, id: NodeId) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            path.push(self.tag(node).to_string());
            current = self.parent(node);
        }
        path.reverse();
        path
    }

    /// All nodes below `id` (excluding `id`), depth-first in document order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id.0].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        out
    }

    /// First node in document order (root included) with the given tag
    pub fn find_first(&self, tag: &str) -> Option<NodeId> {
        let root = self.root();
        if self.tag(root) == tag {
            return Some(root);
        }
        self.descendants(root)
            .into_iter()
            .find(|id| self.tag(*id) == tag)
    }

    /// Text contents of every node whose tag is in `tags`, in document order
    pub fn contents_of(&self, tags: &[&str]) -> Vec<String> {
        let root = self.root();
        std::iter::once(root)
            .chain(self.descendants(root))
            .filter(|id| tags.contains(&self.tag(*id)))
            .map(|id| self.node(id).content.trim().to_string())
            .collect()
    }

    /// Deep-copy the subtree at `source_id` of `source` below `parent`
    pub fn graft(&mut self, parent: NodeId, source: &Tree, source_id: NodeId) -> NodeId {
        let original = source.node(source_id);
        let id = self.append(parent, &original.tag);
        self.nodes[id.0].attrs = original.attrs.clone();
        self.nodes[id.0].content = original.content.clone();
        for child in source.children(source_id) {
            self.graft(id, source, child);
        }
        id
    }
}

/// A VAST document: its tree plus where it came from in a wrapper chain
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Document {
    pub tree: Tree,

    /// The locator or identifier the document was loaded from
    pub source: String,

    /// Chain depth at which the document was reached (root = 0)
    pub depth: usize,
}

impl Document {
    pub fn new(tree: Tree, source: impl Into<String>, depth: usize) -> Self {
        Document {
            tree,
            source: source.into(),
            depth,
        }
    }

    /// An empty `<VAST version="...">` document for the given schema version
    pub fn vast(version: SchemaVersion) -> Self {
        let mut tree = Tree::new("VAST");
        let root = tree.root();
        tree.set_attr(root, "version", version.as_str());
        Document::new(tree, "inline", 0)
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }
}
