use crate::{Body, Document, Node, Value};

/// Visitor for walking a document tree immutably
///
/// Default implementations walk every reachable node. Override a visit_*
/// method to act on nodes; call the matching walk_* function to continue
/// into children.
pub trait Visitor: Sized {
    fn visit_node(&mut self, doc: &Document, node: &Node) {
        walk_node(self, doc, node);
    }

    fn visit_value(&mut self, doc: &Document, value: &Value) {
        walk_value(self, doc, value);
    }
}

pub fn walk_document<V: Visitor>(visitor: &mut V, doc: &Document) {
    if let Some(root) = doc.node(doc.root()) {
        visitor.visit_node(doc, root);
    }
}

pub fn walk_node<V: Visitor>(visitor: &mut V, doc: &Document, node: &Node) {
    match node.body() {
        Body::Record { fields, .. } => {
            for value in fields.values() {
                visitor.visit_value(doc, value);
            }
        }
        Body::Map(entries) => {
            for value in entries.values() {
                visitor.visit_value(doc, value);
            }
        }
        Body::Seq(items) => {
            for value in items {
                visitor.visit_value(doc, value);
            }
        }
    }
}

pub fn walk_value<V: Visitor>(visitor: &mut V, doc: &Document, value: &Value) {
    if let Value::Node(id) = value {
        if let Some(node) = doc.node(*id) {
            visitor.visit_node(doc, node);
        }
    }
}

/// Count records by type across the attached tree
#[derive(Debug, Default)]
pub struct KindCounter {
    pub counts: std::collections::BTreeMap<String, usize>,
}

impl Visitor for KindCounter {
    fn visit_node(&mut self, doc: &Document, node: &Node) {
        if let Some(kind) = node.record_kind() {
            *self.counts.entry(kind.to_string()).or_insert(0) += 1;
        }
        walk_node(self, doc, node);
    }
}
