//! Arena-backed source tree
//!
//! Nodes are stored in document (pre-order) order, so a node's arena index is
//! its stable identity and comparing indices compares document positions.
//! A node's descendants occupy the contiguous index range right after it.

use super::loader::SourceError;
use super::path::{PathExpr, PathSyntaxError};
use super::Namespaces;
use std::collections::HashMap;
use std::fmt;

/// Namespace-qualified name of an element or attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local: local.into(),
        }
    }

    /// Name without a namespace
    pub fn unqualified(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    pub fn is(&self, namespace: Option<&str>, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == namespace
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone)]
struct NodeData {
    name: QName,
    attributes: Vec<Attribute>,
    children: Vec<usize>,
    parent: Option<usize>,
    text: Option<String>,
    /// 1-based position among same-named siblings
    sibling_position: usize,
    /// Exclusive end of this node's subtree in the arena
    subtree_end: usize,
}

/// Immutable, fully materialized source document
#[derive(Debug, Clone)]
pub struct SourceTree {
    nodes: Vec<NodeData>,
}

impl SourceTree {
    /// Root element of the document
    pub fn root(&self) -> SourceNode<'_> {
        SourceNode {
            tree: self,
            index: 0,
        }
    }

    /// Node at a document-order position
    pub fn node(&self, index: usize) -> Option<SourceNode<'_>> {
        (index < self.nodes.len()).then_some(SourceNode { tree: self, index })
    }

    /// Number of elements in the document
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn data(&self, index: usize) -> &NodeData {
        &self.nodes[index]
    }
}

/// Copyable handle to one element of a [`SourceTree`]
#[derive(Clone, Copy)]
pub struct SourceNode<'t> {
    tree: &'t SourceTree,
    index: usize,
}

impl<'t> SourceNode<'t> {
    /// Document-order position (stable node identity)
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn tree(&self) -> &'t SourceTree {
        self.tree
    }

    fn data(&self) -> &'t NodeData {
        self.tree.data(self.index)
    }

    pub fn name(&self) -> &'t QName {
        &self.data().name
    }

    pub fn local_name(&self) -> &'t str {
        &self.data().name.local
    }

    pub fn namespace(&self) -> Option<&'t str> {
        self.data().name.namespace.as_deref()
    }

    pub fn is(&self, namespace: Option<&str>, local: &str) -> bool {
        self.data().name.is(namespace, local)
    }

    pub fn attributes(&self) -> &'t [Attribute] {
        &self.data().attributes
    }

    /// Value of an attribute without a namespace (`code`, `codeSystem`, ...)
    pub fn attribute(&self, local: &str) -> Option<&'t str> {
        self.attribute_ns(None, local)
    }

    /// Value of a namespace-qualified attribute (`xsi:type`)
    pub fn attribute_ns(&self, namespace: Option<&str>, local: &str) -> Option<&'t str> {
        self.data()
            .attributes
            .iter()
            .find(|attr| attr.name.is(namespace, local))
            .map(|attr| attr.value.as_str())
    }

    /// Text content, if the element carried any non-whitespace text
    pub fn text(&self) -> Option<&'t str> {
        self.data().text.as_deref()
    }

    pub fn parent(&self) -> Option<SourceNode<'t>> {
        self.data().parent.map(|index| SourceNode {
            tree: self.tree,
            index,
        })
    }

    pub fn children(&self) -> impl Iterator<Item = SourceNode<'t>> + 't {
        let tree = self.tree;
        self.data()
            .children
            .iter()
            .map(move |&index| SourceNode { tree, index })
    }

    /// Children with the given local name in this element's namespace
    pub fn children_named(&self, local: &'t str) -> impl Iterator<Item = SourceNode<'t>> + 't {
        let namespace = self.namespace();
        self.children()
            .filter(move |child| child.is(namespace, local))
    }

    /// First child with the given local name in this element's namespace
    pub fn child(&self, local: &str) -> Option<SourceNode<'t>> {
        let namespace = self.namespace();
        self.children().find(|child| child.is(namespace, local))
    }

    /// All descendants in document order, excluding this node
    pub fn descendants(&self) -> impl Iterator<Item = SourceNode<'t>> + 't {
        let tree = self.tree;
        (self.index + 1..self.data().subtree_end).map(move |index| SourceNode { tree, index })
    }

    pub fn ancestors(&self) -> impl Iterator<Item = SourceNode<'t>> + 't {
        std::iter::successors(self.parent(), |node| node.parent())
    }

    /// Absolute path for diagnostics, e.g. `/ClinicalDocument[1]/component[1]/section[2]`
    pub fn absolute_path(&self) -> String {
        let mut segments: Vec<SourceNode<'t>> = self.ancestors().collect();
        segments.reverse();
        segments.push(*self);

        let mut path = String::new();
        for node in segments {
            let data = node.data();
            path.push('/');
            path.push_str(&data.name.local);
            path.push('[');
            path.push_str(&data.sibling_position.to_string());
            path.push(']');
        }
        path
    }

    /// Evaluate a compiled path expression with this node as context
    pub fn select(&self, expr: &PathExpr) -> Vec<SourceNode<'t>> {
        expr.select(*self)
    }

    pub fn select_one(&self, expr: &PathExpr) -> Option<SourceNode<'t>> {
        expr.select_one(*self)
    }

    /// Compile `expr` against the CDA namespace table and evaluate it
    pub fn query(&self, expr: &str) -> Result<Vec<SourceNode<'t>>, PathSyntaxError> {
        Ok(PathExpr::compile(expr, &Namespaces::cda())?.select(*self))
    }
}

impl PartialEq for SourceNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.index == other.index
    }
}

impl Eq for SourceNode<'_> {}

impl fmt::Debug for SourceNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceNode({})", self.absolute_path())
    }
}

/// Incremental builder used by the XML loader
///
/// Elements must be opened and closed in document order; the builder computes
/// sibling positions and subtree ranges as it goes.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<NodeData>,
    stack: Vec<OpenElement>,
}

/// An element whose closing tag has not been seen yet
#[derive(Debug)]
struct OpenElement {
    index: usize,
    /// Children opened so far, counted per name
    seen: HashMap<QName, usize>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, name: QName, attributes: Vec<Attribute>) -> Result<(), SourceError> {
        let index = self.nodes.len();
        let (parent, sibling_position) = match self.stack.last_mut() {
            Some(open) => {
                let seen = open.seen.entry(name.clone()).or_insert(0);
                *seen += 1;
                (Some(open.index), *seen)
            }
            None => (None, 1),
        };
        if parent.is_none() && !self.nodes.is_empty() {
            return Err(SourceError::Structure(format!(
                "second root element <{}>",
                name.local
            )));
        }

        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        self.nodes.push(NodeData {
            name,
            attributes,
            children: Vec::new(),
            parent,
            text: None,
            sibling_position,
            subtree_end: index + 1,
        });
        self.stack.push(OpenElement {
            index,
            seen: HashMap::new(),
        });
        Ok(())
    }

    /// Append text to the innermost open element; whitespace-only text is dropped
    pub fn text(&mut self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let Some(current) = self.stack.last().map(|open| open.index) else {
            return;
        };
        match &mut self.nodes[current].text {
            Some(existing) => {
                existing.push(' ');
                existing.push_str(content);
            }
            slot @ None => *slot = Some(content.to_string()),
        }
    }

    pub fn close(&mut self) -> Result<(), SourceError> {
        let index = self
            .stack
            .pop()
            .map(|open| open.index)
            .ok_or_else(|| SourceError::Structure("closing tag without open element".into()))?;
        self.nodes[index].subtree_end = self.nodes.len();
        Ok(())
    }

    pub fn finish(self) -> Result<SourceTree, SourceError> {
        if let Some(open) = self.stack.last() {
            return Err(SourceError::Structure(format!(
                "element <{}> is never closed",
                self.nodes[open.index].name.local
            )));
        }
        if self.nodes.is_empty() {
            return Err(SourceError::Empty);
        }
        Ok(SourceTree { nodes: self.nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> SourceTree {
        let ns = Some("urn:hl7-org:v3");
        let mut builder = TreeBuilder::new();
        builder.open(QName::new(ns, "doc"), vec![]).unwrap();
        builder
            .open(
                QName::new(ns, "item"),
                vec![Attribute {
                    name: QName::unqualified("code"),
                    value: "A".into(),
                }],
            )
            .unwrap();
        builder.text("  first  ");
        builder.close().unwrap();
        builder.open(QName::new(ns, "item"), vec![]).unwrap();
        builder.open(QName::new(ns, "leaf"), vec![]).unwrap();
        builder.close().unwrap();
        builder.close().unwrap();
        builder.close().unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_navigation() {
        let tree = build();
        let root = tree.root();

        assert_eq!(root.local_name(), "doc");
        assert_eq!(root.children().count(), 2);

        let first = root.child("item").unwrap();
        assert_eq!(first.attribute("code"), Some("A"));
        assert_eq!(first.text(), Some("first"));
        assert_eq!(first.parent(), Some(root));
        assert_eq!(root.children_named("item").count(), 2);
    }

    #[test]
    fn test_absolute_path_uses_sibling_positions() {
        let tree = build();
        let leaf = tree.root().descendants().last().unwrap();

        assert_eq!(leaf.absolute_path(), "/doc[1]/item[2]/leaf[1]");
    }

    #[test]
    fn test_sibling_positions_are_counted_per_name() {
        let mut builder = TreeBuilder::new();
        builder.open(QName::unqualified("section"), vec![]).unwrap();
        for local in ["code", "entry", "title", "entry", "entry"] {
            builder.open(QName::unqualified(local), vec![]).unwrap();
            builder.close().unwrap();
        }
        // Same local name in another namespace counts separately
        builder
            .open(QName::new(Some("urn:hl7-org:sdtc"), "entry"), vec![])
            .unwrap();
        builder.close().unwrap();
        builder.close().unwrap();
        let tree = builder.finish().unwrap();

        let paths: Vec<_> = tree
            .root()
            .children()
            .map(|node| node.absolute_path())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/section[1]/code[1]",
                "/section[1]/entry[1]",
                "/section[1]/title[1]",
                "/section[1]/entry[2]",
                "/section[1]/entry[3]",
                "/section[1]/entry[1]",
            ]
        );
    }

    #[test]
    fn test_descendants_are_in_document_order() {
        let tree = build();
        let names: Vec<_> = tree
            .root()
            .descendants()
            .map(|node| node.local_name())
            .collect();

        assert_eq!(names, vec!["item", "item", "leaf"]);
    }

    #[test]
    fn test_builder_rejects_unclosed_elements() {
        let mut builder = TreeBuilder::new();
        builder.open(QName::unqualified("doc"), vec![]).unwrap();
        assert!(matches!(builder.finish(), Err(SourceError::Structure(_))));
    }

    #[test]
    fn test_builder_rejects_empty_document() {
        assert!(matches!(TreeBuilder::new().finish(), Err(SourceError::Empty)));
    }
}
