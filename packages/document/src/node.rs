use crate::{NodeId, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Container shape of a node, fixed when the node is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Record,
    Map,
    Seq,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Record => write!(f, "record"),
            ContainerKind::Map => write!(f, "map"),
            ContainerKind::Seq => write!(f, "sequence"),
        }
    }
}

/// Contents of a container node
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Typed record with named fields. `kind` is the record's type tag.
    Record {
        kind: String,
        fields: BTreeMap<String, Value>,
    },
    Map(BTreeMap<String, Value>),
    Seq(Vec<Value>),
}

impl Body {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Body::Record { .. } => ContainerKind::Record,
            Body::Map(_) => ContainerKind::Map,
            Body::Seq(_) => ContainerKind::Seq,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Body::Record { fields, .. } => fields.len(),
            Body::Map(entries) => entries.len(),
            Body::Seq(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if any slot holds `id`
    pub fn holds(&self, id: NodeId) -> bool {
        let target = Value::Node(id);
        match self {
            Body::Record { fields, .. } => fields.values().any(|v| *v == target),
            Body::Map(entries) => entries.values().any(|v| *v == target),
            Body::Seq(items) => items.contains(&target),
        }
    }
}

/// An observed container in the document arena
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    observed: bool,
    body: Body,
}

impl Node {
    pub(crate) fn new(id: NodeId, parent: Option<NodeId>, body: Body) -> Self {
        Self {
            id,
            parent,
            observed: true,
            body,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Container this node was last written into, if still attached
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn kind(&self) -> ContainerKind {
        self.body.kind()
    }

    /// Type tag of a record node
    pub fn record_kind(&self) -> Option<&str> {
        match &self.body {
            Body::Record { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Field of a record or entry of a map
    pub fn field(&self, key: &str) -> Option<&Value> {
        match &self.body {
            Body::Record { fields, .. } => fields.get(key),
            Body::Map(entries) => entries.get(key),
            Body::Seq(_) => None,
        }
    }

    pub fn items(&self) -> Option<&[Value]> {
        match &self.body {
            Body::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// The record's `id` field, used as its stable id across replicas
    pub fn stable_id(&self) -> Option<&str> {
        match &self.body {
            Body::Record { fields, .. } => fields.get("id").and_then(Value::as_str),
            _ => None,
        }
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }
}
