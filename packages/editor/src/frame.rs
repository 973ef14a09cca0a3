//! # Frame Post-Effects
//!
//! Commands that move, resize, insert or remove shapes leave group frames
//! stale. Handlers mark the shapes they touch as dirty; at commit the
//! post-effect engine recomputes derived geometry once for the whole
//! transaction.
//!
//! Post-effects write through the recording path, so their writes are part
//! of the transaction: undone with it locally, and recomputed the same way
//! on every replica that replays its commands.

use crate::errors::EditorError;
use crate::resolve::{is_group, SHAPE_KIND};
use std::collections::HashSet;
use vellum_document::{Document, NodeId, Value, WriteObserver};

/// Shapes whose frame changed during the open transaction
#[derive(Debug, Default, Clone)]
pub struct DirtyFrames {
    nodes: Vec<NodeId>,
    seen: HashSet<NodeId>,
}

impl DirtyFrames {
    pub fn mark(&mut self, node: NodeId) {
        if self.seen.insert(node) {
            self.nodes.push(node);
        }
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.seen.clear();
    }
}

/// Derived-state update run at commit
pub trait PostEffect: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        doc: &mut Document,
        observer: &mut dyn WriteObserver,
        dirty: &DirtyFrames,
    ) -> Result<(), EditorError>;
}

/// Resize every affected group to the union of its children's frames
#[derive(Debug)]
pub struct GroupBounds;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl Rect {
    fn of(doc: &Document, shape: NodeId) -> Rect {
        let number = |key: &str| doc.field(shape, key).and_then(Value::as_f64).unwrap_or(0.0);
        Rect {
            x: number("x"),
            y: number("y"),
            width: number("width"),
            height: number("height"),
        }
    }

    fn union(self, other: Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Rect {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }
}

impl GroupBounds {
    /// Dirty groups and group ancestors of dirty shapes, deepest first
    fn affected_groups(doc: &Document, dirty: &DirtyFrames) -> Vec<NodeId> {
        let mut groups: Vec<(usize, NodeId)> = Vec::new();
        let mut seen = HashSet::new();

        for &node in dirty.nodes() {
            if !doc.is_attached(node) {
                continue;
            }
            let candidates = std::iter::once(node).chain(doc.ancestors(node));
            for candidate in candidates {
                if doc.record_kind(candidate) == Some(SHAPE_KIND)
                    && is_group(doc, candidate)
                    && seen.insert(candidate)
                {
                    groups.push((doc.ancestors(candidate).count(), candidate));
                }
            }
        }

        groups.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        groups.into_iter().map(|(_, group)| group).collect()
    }
}

impl PostEffect for GroupBounds {
    fn name(&self) -> &'static str {
        "GroupBounds"
    }

    fn run(
        &self,
        doc: &mut Document,
        observer: &mut dyn WriteObserver,
        dirty: &DirtyFrames,
    ) -> Result<(), EditorError> {
        for group in Self::affected_groups(doc, dirty) {
            let children: Vec<NodeId> = doc
                .child(group, "childs")
                .and_then(|childs| doc.items(childs))
                .map(|items| items.iter().filter_map(Value::as_node).collect())
                .unwrap_or_default();
            let Some(bounds) = children
                .iter()
                .map(|child| Rect::of(doc, *child))
                .reduce(Rect::union)
            else {
                continue;
            };

            if Rect::of(doc, group) == bounds {
                continue;
            }
            tracing::debug!("[GroupBounds] group {} -> {:?}", group, bounds);
            let mut record = doc.record_mut(group, &mut *observer)?;
            record.set("x", bounds.x)?;
            record.set("y", bounds.y)?;
            record.set("width", bounds.width)?;
            record.set("height", bounds.height)?;
        }
        Ok(())
    }
}

/// Engine that runs post-effects at commit
#[derive(Debug)]
pub struct PostEffectEngine {
    effects: Vec<Box<dyn PostEffect>>,
}

impl PostEffectEngine {
    /// Create engine with default effects
    pub fn new() -> Self {
        Self {
            effects: vec![Box::new(GroupBounds)],
        }
    }

    pub fn empty() -> Self {
        Self { effects: Vec::new() }
    }

    pub fn add_effect(&mut self, effect: Box<dyn PostEffect>) {
        self.effects.push(effect);
    }

    pub fn run(
        &self,
        doc: &mut Document,
        observer: &mut dyn WriteObserver,
        dirty: &DirtyFrames,
    ) -> Result<(), EditorError> {
        if dirty.is_empty() {
            return Ok(());
        }
        for effect in &self.effects {
            tracing::trace!("[PostEffectEngine] running {}", effect.name());
            effect.run(doc, observer, dirty)?;
        }
        Ok(())
    }
}

impl Default for PostEffectEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_document::Untracked;

    fn doc() -> Document {
        Document::from_json(&json!({
            "typeId": "document",
            "pages": [{"typeId": "page", "id": "p1", "shapes": [
                {"typeId": "shape", "id": "outer", "type": "group",
                 "x": 0, "y": 0, "width": 0, "height": 0, "childs": [
                    {"typeId": "shape", "id": "inner", "type": "group",
                     "x": 0, "y": 0, "width": 0, "height": 0, "childs": [
                        {"typeId": "shape", "id": "a", "type": "rect",
                         "x": 10, "y": 10, "width": 10, "height": 10},
                        {"typeId": "shape", "id": "b", "type": "rect",
                         "x": 30, "y": 5, "width": 10, "height": 10}
                    ]},
                    {"typeId": "shape", "id": "c", "type": "rect",
                     "x": 0, "y": 40, "width": 5, "height": 5}
                ]}
            ]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_nested_groups_resize_deepest_first() {
        let mut doc = doc();
        let a = doc.find_record(doc.root(), Some("shape"), "a").unwrap();
        let inner = doc.find_record(doc.root(), Some("shape"), "inner").unwrap();
        let outer = doc.find_record(doc.root(), Some("shape"), "outer").unwrap();

        let mut dirty = DirtyFrames::default();
        dirty.mark(a);
        PostEffectEngine::new()
            .run(&mut doc, &mut Untracked, &dirty)
            .unwrap();

        assert_eq!(
            Rect::of(&doc, inner),
            Rect { x: 10.0, y: 5.0, width: 30.0, height: 15.0 }
        );
        assert_eq!(
            Rect::of(&doc, outer),
            Rect { x: 0.0, y: 5.0, width: 40.0, height: 40.0 }
        );
    }

    #[test]
    fn test_clean_transaction_runs_nothing() {
        let mut doc = doc();
        let before = doc.to_json();
        PostEffectEngine::new()
            .run(&mut doc, &mut Untracked, &DirtyFrames::default())
            .unwrap();
        assert_eq!(doc.to_json(), before);
    }
}
