//! # Document Arena
//!
//! Owns every node of one document. Nodes are created by wrapping [`Raw`]
//! values and are never freed: a removed subtree stays in the arena with its
//! parent link cleared, so handles held by history entries remain valid.

use crate::codec::{AttrCodec, JsonCodec};
use crate::visitor::{walk_node, Visitor};
use crate::{Body, ContainerKind, IdArena, ModelError, Node, NodeId, Raw, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
pub struct Document {
    arena: IdArena,
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
}

impl Document {
    /// Create a document whose root is an empty record of type `kind`
    pub fn new(kind: &str) -> Self {
        let mut arena = IdArena::new();
        let root = arena.issue();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node::new(
                root,
                None,
                Body::Record {
                    kind: kind.to_string(),
                    fields: BTreeMap::new(),
                },
            ),
        );
        Self { arena, nodes, root }
    }

    /// Build a document from a raw tree. The root must be a container.
    pub fn from_raw(raw: Raw) -> Result<Self, ModelError> {
        if !raw.is_container() || matches!(raw, Raw::Node(_)) {
            return Err(ModelError::ScalarRoot);
        }
        let mut doc = Self::new("document");
        let placeholder = doc.root;
        match doc.wrap(raw, None)? {
            Value::Node(root) => {
                doc.nodes.remove(&placeholder);
                doc.root = root;
                Ok(doc)
            }
            _ => Err(ModelError::ScalarRoot),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, ModelError> {
        Self::from_raw(JsonCodec.decode(json))
    }

    /// Serialize the whole tree through the default codec
    pub fn to_json(&self) -> serde_json::Value {
        JsonCodec.encode(self, &Value::Node(self.root))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, ModelError> {
        self.nodes.get(&id).ok_or(ModelError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes in the arena, attached or not
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Field of a record or entry of a map
    pub fn field(&self, id: NodeId, key: &str) -> Option<&Value> {
        self.nodes.get(&id).and_then(|n| n.field(key))
    }

    /// Node referenced by a record field or map entry
    pub fn child(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.field(id, key).and_then(Value::as_node)
    }

    pub fn items(&self, id: NodeId) -> Option<&[Value]> {
        self.nodes.get(&id).and_then(|n| n.items())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent())
    }

    pub fn stable_id(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).and_then(|n| n.stable_id())
    }

    pub fn record_kind(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).and_then(|n| n.record_kind())
    }

    /// Walk parent links upward, starting with the direct parent
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.parent(id),
            budget: self.nodes.len(),
        }
    }

    /// True if the node is the root or reachable from it through parent links
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).any(|a| a == self.root)
    }

    /// Position of a node inside its parent sequence
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.items(parent)?
            .iter()
            .position(|v| *v == Value::Node(id))
    }

    pub fn expect_kind(&self, id: NodeId, expected: ContainerKind) -> Result<&Node, ModelError> {
        let node = self.get(id)?;
        if node.kind() != expected {
            return Err(ModelError::KindMismatch {
                id,
                expected,
                actual: node.kind(),
            });
        }
        Ok(node)
    }

    /// Find a record by stable id in the subtree under `within`, optionally
    /// restricted to records of one type
    pub fn find_record(&self, within: NodeId, kind: Option<&str>, stable_id: &str) -> Option<NodeId> {
        let start = self.nodes.get(&within)?;
        let mut finder = RecordFinder {
            kind,
            stable_id,
            found: None,
        };
        finder.visit_node(self, start);
        finder.found
    }

    /// Deep copy of a value back into raw form
    pub fn to_raw(&self, value: &Value) -> Raw {
        let id = match value {
            Value::Node(id) => *id,
            scalar => return Raw::from(scalar.clone()),
        };
        match self.nodes.get(&id).map(Node::body) {
            Some(Body::Record { kind, fields }) => Raw::Record {
                kind: kind.clone(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.to_raw(v)))
                    .collect(),
            },
            Some(Body::Map(entries)) => Raw::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.to_raw(v)))
                    .collect(),
            ),
            Some(Body::Seq(items)) => Raw::Seq(items.iter().map(|v| self.to_raw(v)).collect()),
            None => Raw::Null,
        }
    }

    /// Turn a raw value into a slot value, wrapping nested containers into
    /// new nodes parented to `parent`. Already-observed nodes are adopted
    /// instead of copied. On error the arena is left as it was.
    pub fn wrap(&mut self, raw: Raw, parent: Option<NodeId>) -> Result<Value, ModelError> {
        self.stage(raw, parent).map(|(value, _)| value)
    }

    /// Wrap `raw`, keeping what it took so the caller can still back out
    /// with `discard`
    pub(crate) fn stage(&mut self, raw: Raw, parent: Option<NodeId>) -> Result<(Value, Staged), ModelError> {
        let mut staged = Staged::default();
        match self.wrap_into(raw, parent, &mut staged) {
            Ok(value) => Ok((value, staged)),
            Err(err) => {
                self.discard(staged);
                Err(err)
            }
        }
    }

    /// Drop the nodes a staged wrap created and return adopted nodes to
    /// their previous parents
    pub(crate) fn discard(&mut self, staged: Staged) {
        for id in staged.created.iter().rev() {
            self.nodes.remove(id);
        }
        for (id, parent) in staged.adopted.into_iter().rev() {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.set_parent(parent);
            }
        }
    }

    fn wrap_into(&mut self, raw: Raw, parent: Option<NodeId>, staged: &mut Staged) -> Result<Value, ModelError> {
        let value = match raw {
            Raw::Null => Value::Null,
            Raw::Bool(b) => Value::Bool(b),
            Raw::Number(n) => Value::Number(n),
            Raw::Str(s) => Value::Str(s),
            Raw::Node(id) => {
                let previous = self.get(id)?.parent();
                self.adopt(id, parent)?;
                staged.adopted.push((id, previous));
                Value::Node(id)
            }
            Raw::Record { kind, fields } => {
                let id = self.arena.issue();
                let fields = fields
                    .into_iter()
                    .map(|(k, v)| self.wrap_into(v, Some(id), staged).map(|w| (k, w)))
                    .collect::<Result<BTreeMap<_, _>, ModelError>>()?;
                self.nodes
                    .insert(id, Node::new(id, parent, Body::Record { kind, fields }));
                staged.created.push(id);
                Value::Node(id)
            }
            Raw::Map(entries) => {
                let id = self.arena.issue();
                let entries = entries
                    .into_iter()
                    .map(|(k, v)| self.wrap_into(v, Some(id), staged).map(|w| (k, w)))
                    .collect::<Result<BTreeMap<_, _>, ModelError>>()?;
                self.nodes.insert(id, Node::new(id, parent, Body::Map(entries)));
                staged.created.push(id);
                Value::Node(id)
            }
            Raw::Seq(items) => {
                let id = self.arena.issue();
                let items = items
                    .into_iter()
                    .map(|v| self.wrap_into(v, Some(id), staged))
                    .collect::<Result<Vec<_>, ModelError>>()?;
                self.nodes.insert(id, Node::new(id, parent, Body::Seq(items)));
                staged.created.push(id);
                Value::Node(id)
            }
        };
        Ok(value)
    }

    fn adopt(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), ModelError> {
        let node = self.get(id)?;
        debug_assert!(node.is_observed());
        if let (Some(current), Some(target)) = (node.parent(), parent) {
            let held = self
                .nodes
                .get(&current)
                .is_some_and(|p| p.body().holds(id));
            if current != target && held {
                return Err(ModelError::AlreadyAttached(id));
            }
        }
        if let Some(target) = parent {
            if target == id || self.ancestors(target).any(|a| a == id) {
                return Err(ModelError::Cycle(id));
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.set_parent(parent);
        }
        Ok(())
    }

    /// Write a key without notifying any observer. Returns the displaced
    /// value, `None` if the key was absent.
    pub fn restore_key(
        &mut self,
        id: NodeId,
        key: &str,
        value: Option<Value>,
    ) -> Result<Option<Value>, ModelError> {
        let entries = self.entries_mut(id)?;
        let displaced = match &value {
            Some(v) => entries.insert(key.to_string(), v.clone()),
            None => entries.remove(key),
        };
        if let Some(v) = &value {
            self.attach(v, id);
        }
        if let Some(old) = &displaced {
            self.release(old, id);
        }
        Ok(displaced)
    }

    /// Write one sequence index without notifying any observer. Writing past
    /// the end pads with nulls; writing `None` leaves a null hole that a
    /// later length restore trims. Returns the displaced value, `None` if the
    /// index was past the end.
    pub fn restore_index(
        &mut self,
        id: NodeId,
        index: usize,
        value: Option<Value>,
    ) -> Result<Option<Value>, ModelError> {
        let items = self.items_mut(id)?;
        let existed = index < items.len();
        let displaced = match &value {
            Some(v) => {
                if !existed {
                    items.resize(index + 1, Value::Null);
                }
                let old = std::mem::replace(&mut items[index], v.clone());
                existed.then_some(old)
            }
            None if existed => Some(std::mem::replace(&mut items[index], Value::Null)),
            None => None,
        };
        if let Some(v) = &value {
            self.attach(v, id);
        }
        if let Some(old) = &displaced {
            self.release(old, id);
        }
        Ok(displaced)
    }

    /// Set a sequence length without notifying any observer. Returns the
    /// previous length.
    pub fn restore_len(&mut self, id: NodeId, len: usize) -> Result<usize, ModelError> {
        let items = self.items_mut(id)?;
        let previous = items.len();
        let removed: Vec<Value> = if len < previous {
            items.drain(len..).collect()
        } else {
            items.resize(len, Value::Null);
            Vec::new()
        };
        for value in &removed {
            self.release(value, id);
        }
        Ok(previous)
    }

    pub(crate) fn entries(&self, id: NodeId) -> Result<&BTreeMap<String, Value>, ModelError> {
        match self.get(id)?.body() {
            Body::Record { fields, .. } => Ok(fields),
            Body::Map(entries) => Ok(entries),
            Body::Seq(_) => Err(ModelError::KindMismatch {
                id,
                expected: ContainerKind::Map,
                actual: ContainerKind::Seq,
            }),
        }
    }

    pub(crate) fn entries_mut(&mut self, id: NodeId) -> Result<&mut BTreeMap<String, Value>, ModelError> {
        let node = self.nodes.get_mut(&id).ok_or(ModelError::NodeNotFound(id))?;
        match node.body_mut() {
            Body::Record { fields, .. } => Ok(fields),
            Body::Map(entries) => Ok(entries),
            Body::Seq(_) => Err(ModelError::KindMismatch {
                id,
                expected: ContainerKind::Map,
                actual: ContainerKind::Seq,
            }),
        }
    }

    pub(crate) fn seq_items(&self, id: NodeId) -> Result<&Vec<Value>, ModelError> {
        let node = self.get(id)?;
        match node.body() {
            Body::Seq(items) => Ok(items),
            other => Err(ModelError::KindMismatch {
                id,
                expected: ContainerKind::Seq,
                actual: other.kind(),
            }),
        }
    }

    pub(crate) fn items_mut(&mut self, id: NodeId) -> Result<&mut Vec<Value>, ModelError> {
        let node = self.nodes.get_mut(&id).ok_or(ModelError::NodeNotFound(id))?;
        match node.body_mut() {
            Body::Seq(items) => Ok(items),
            other => Err(ModelError::KindMismatch {
                id,
                expected: ContainerKind::Seq,
                actual: other.kind(),
            }),
        }
    }

    pub(crate) fn attach(&mut self, value: &Value, to: NodeId) {
        if let Value::Node(child) = value {
            if let Some(node) = self.nodes.get_mut(child) {
                node.set_parent(Some(to));
            }
        }
    }

    /// Clear the parent link of a node removed from `from`, unless `from`
    /// still holds it in another slot
    pub(crate) fn release(&mut self, value: &Value, from: NodeId) {
        let Value::Node(child) = value else {
            return;
        };
        if self.nodes.get(&from).is_some_and(|n| n.body().holds(*child)) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(child) {
            if node.parent() == Some(from) {
                node.set_parent(None);
            }
        }
    }
}

/// Nodes created and adopted by one wrap
#[derive(Debug, Default)]
pub(crate) struct Staged {
    created: Vec<NodeId>,
    adopted: Vec<(NodeId, Option<NodeId>)>,
}

/// Iterator over a node's parent chain
pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
    budget: usize,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;
        self.next = self.doc.parent(current);
        Some(current)
    }
}

struct RecordFinder<'q> {
    kind: Option<&'q str>,
    stable_id: &'q str,
    found: Option<NodeId>,
}

impl Visitor for RecordFinder<'_> {
    fn visit_node(&mut self, doc: &Document, node: &Node) {
        if self.found.is_some() {
            return;
        }
        let kind_matches = match self.kind {
            Some(kind) => node.record_kind() == Some(kind),
            None => node.record_kind().is_some(),
        };
        if kind_matches && node.stable_id() == Some(self.stable_id) {
            self.found = Some(node.id());
            return;
        }
        walk_node(self, doc, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::from_raw(Raw::record(
            "document",
            [(
                "pages",
                Raw::seq([Raw::record(
                    "page",
                    [
                        ("id", "p1".into()),
                        (
                            "shapes",
                            Raw::seq([Raw::record("shape", [("id", "s1".into())])]),
                        ),
                    ],
                )]),
            )],
        ))
        .unwrap()
    }

    #[test]
    fn test_wrap_sets_parents() {
        let doc = sample();
        let pages = doc.child(doc.root(), "pages").unwrap();
        assert_eq!(doc.parent(pages), Some(doc.root()));

        let shape = doc.find_record(doc.root(), Some("shape"), "s1").unwrap();
        assert!(doc.is_attached(shape));
        assert_eq!(doc.index_in_parent(shape), Some(0));
        assert_eq!(doc.ancestors(shape).count(), 4);
    }

    #[test]
    fn test_scalar_root_rejected() {
        assert_eq!(
            Document::from_raw(Raw::from(1)).unwrap_err(),
            ModelError::ScalarRoot
        );
    }

    #[test]
    fn test_restore_index_and_len() {
        let mut doc = sample();
        let pages = doc.child(doc.root(), "pages").unwrap();
        let page = doc.items(pages).unwrap()[0].clone();

        let displaced = doc.restore_index(pages, 0, None).unwrap();
        assert_eq!(displaced, Some(page.clone()));
        assert_eq!(doc.parent(page.as_node().unwrap()), None);

        let previous = doc.restore_len(pages, 0).unwrap();
        assert_eq!(previous, 1);
        assert!(doc.items(pages).unwrap().is_empty());

        assert_eq!(doc.restore_index(pages, 2, Some(page.clone())).unwrap(), None);
        assert_eq!(doc.items(pages).unwrap().len(), 3);
        assert_eq!(doc.parent(page.as_node().unwrap()), Some(pages));
    }

    #[test]
    fn test_release_keeps_parent_while_still_held() {
        let mut doc = sample();
        let pages = doc.child(doc.root(), "pages").unwrap();
        let page = doc.items(pages).unwrap()[0].clone();

        doc.restore_index(pages, 1, Some(page.clone())).unwrap();
        doc.restore_index(pages, 0, Some(Value::Null)).unwrap();
        assert_eq!(doc.parent(page.as_node().unwrap()), Some(pages));
    }

    #[test]
    fn test_adopt_rejects_cycles() {
        let mut doc = sample();
        let pages = doc.child(doc.root(), "pages").unwrap();
        let root = doc.root();
        let err = doc.wrap(Raw::Node(root), Some(pages)).unwrap_err();
        assert_eq!(err, ModelError::Cycle(root));
    }
}
