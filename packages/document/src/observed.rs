//! # Observed Containers
//!
//! Mutable views over arena nodes. Every write reports the slot's previous
//! value to a [`WriteObserver`] before storing the new one, and reports
//! the container as changed afterwards. An observer may veto a write by
//! returning an error, in which case the document is left untouched.
//!
//! Sequence operations report every index whose content moves, plus the
//! previous length, so an observer can restore the sequence exactly.

use crate::{ContainerKind, Document, ModelError, NodeId, Raw, Value};

/// Hooks invoked around observed writes
pub trait WriteObserver {
    /// A record field or map entry is about to be written or removed
    fn will_write(&mut self, target: NodeId, key: &str, previous: Option<&Value>) -> Result<(), ModelError>;

    /// A sequence index is about to be written; `previous` is `None` past the end
    fn will_write_index(&mut self, target: NodeId, index: usize, previous: Option<&Value>) -> Result<(), ModelError>;

    /// A sequence is about to change length
    fn will_resize(&mut self, target: NodeId, previous_len: usize) -> Result<(), ModelError>;

    /// A write to `target` completed
    fn changed(&mut self, target: NodeId);
}

/// Observer that accepts every write and records nothing. Used to build
/// documents before they are handed to an editor.
#[derive(Debug, Default, Clone, Copy)]
pub struct Untracked;

impl WriteObserver for Untracked {
    fn will_write(&mut self, _: NodeId, _: &str, _: Option<&Value>) -> Result<(), ModelError> {
        Ok(())
    }

    fn will_write_index(&mut self, _: NodeId, _: usize, _: Option<&Value>) -> Result<(), ModelError> {
        Ok(())
    }

    fn will_resize(&mut self, _: NodeId, _: usize) -> Result<(), ModelError> {
        Ok(())
    }

    fn changed(&mut self, _: NodeId) {}
}

/// Operations common to all observed container views
pub trait ObservedContainer {
    fn id(&self) -> NodeId;
    fn kind(&self) -> ContainerKind;
    fn document(&self) -> &Document;

    fn len(&self) -> usize {
        self.document()
            .node(self.id())
            .map(|n| n.body().len())
            .unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parent(&self) -> Option<NodeId> {
        self.document().parent(self.id())
    }
}

impl Document {
    pub fn record_mut<'a>(
        &'a mut self,
        id: NodeId,
        observer: &'a mut dyn WriteObserver,
    ) -> Result<RecordMut<'a>, ModelError> {
        self.expect_kind(id, ContainerKind::Record)?;
        Ok(RecordMut {
            doc: self,
            observer,
            id,
        })
    }

    pub fn map_mut<'a>(
        &'a mut self,
        id: NodeId,
        observer: &'a mut dyn WriteObserver,
    ) -> Result<MapMut<'a>, ModelError> {
        self.expect_kind(id, ContainerKind::Map)?;
        Ok(MapMut {
            doc: self,
            observer,
            id,
        })
    }

    pub fn seq_mut<'a>(
        &'a mut self,
        id: NodeId,
        observer: &'a mut dyn WriteObserver,
    ) -> Result<SeqMut<'a>, ModelError> {
        self.expect_kind(id, ContainerKind::Seq)?;
        Ok(SeqMut {
            doc: self,
            observer,
            id,
        })
    }

    /// View of any container, dispatched on its kind
    pub fn observe<'a>(
        &'a mut self,
        id: NodeId,
        observer: &'a mut dyn WriteObserver,
    ) -> Result<Observed<'a>, ModelError> {
        Ok(match self.get(id)?.kind() {
            ContainerKind::Record => Observed::Record(RecordMut {
                doc: self,
                observer,
                id,
            }),
            ContainerKind::Map => Observed::Map(MapMut {
                doc: self,
                observer,
                id,
            }),
            ContainerKind::Seq => Observed::Seq(SeqMut {
                doc: self,
                observer,
                id,
            }),
        })
    }
}

pub enum Observed<'a> {
    Record(RecordMut<'a>),
    Map(MapMut<'a>),
    Seq(SeqMut<'a>),
}

/// Write a keyed slot shared by records and maps
fn write_key(
    doc: &mut Document,
    observer: &mut dyn WriteObserver,
    id: NodeId,
    key: &str,
    raw: Raw,
) -> Result<Option<Value>, ModelError> {
    let (value, staged) = doc.stage(raw, Some(id))?;
    let announced = doc
        .entries(id)
        .and_then(|entries| observer.will_write(id, key, entries.get(key)));
    if let Err(err) = announced {
        doc.discard(staged);
        return Err(err);
    }
    let old = doc.entries_mut(id)?.insert(key.to_string(), value);
    if let Some(old) = &old {
        doc.release(old, id);
    }
    observer.changed(id);
    Ok(old)
}

fn remove_key(
    doc: &mut Document,
    observer: &mut dyn WriteObserver,
    id: NodeId,
    key: &str,
) -> Result<Option<Value>, ModelError> {
    let Some(previous) = doc.entries(id)?.get(key) else {
        return Ok(None);
    };
    observer.will_write(id, key, Some(previous))?;
    let old = doc.entries_mut(id)?.remove(key);
    if let Some(old) = &old {
        doc.release(old, id);
    }
    observer.changed(id);
    Ok(old)
}

/// Observed view of a typed record
pub struct RecordMut<'a> {
    doc: &'a mut Document,
    observer: &'a mut dyn WriteObserver,
    id: NodeId,
}

impl RecordMut<'_> {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.field(self.id, key)
    }

    pub fn record_kind(&self) -> Option<&str> {
        self.doc.record_kind(self.id)
    }

    /// Set a field, returning the value it replaced
    pub fn set(&mut self, key: &str, raw: impl Into<Raw>) -> Result<Option<Value>, ModelError> {
        write_key(self.doc, self.observer, self.id, key, raw.into())
    }

    /// Remove a field. Removing an absent field is a no-op.
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>, ModelError> {
        remove_key(self.doc, self.observer, self.id, key)
    }
}

impl ObservedContainer for RecordMut<'_> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Record
    }

    fn document(&self) -> &Document {
        self.doc
    }
}

/// Observed view of a string-keyed map
pub struct MapMut<'a> {
    doc: &'a mut Document,
    observer: &'a mut dyn WriteObserver,
    id: NodeId,
}

impl MapMut<'_> {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.field(self.id, key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.doc
            .entries(self.id)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, key: &str, raw: impl Into<Raw>) -> Result<Option<Value>, ModelError> {
        write_key(self.doc, self.observer, self.id, key, raw.into())
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>, ModelError> {
        remove_key(self.doc, self.observer, self.id, key)
    }

    /// Remove every entry
    pub fn clear(&mut self) -> Result<(), ModelError> {
        for key in self.keys() {
            self.remove(&key)?;
        }
        Ok(())
    }
}

impl ObservedContainer for MapMut<'_> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Map
    }

    fn document(&self) -> &Document {
        self.doc
    }
}

/// Observed view of a sequence
pub struct SeqMut<'a> {
    doc: &'a mut Document,
    observer: &'a mut dyn WriteObserver,
    id: NodeId,
}

impl SeqMut<'_> {
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items().get(index)
    }

    pub fn items(&self) -> &[Value] {
        self.doc.items(self.id).unwrap_or(&[])
    }

    /// Report indices `from..to` as about to be written
    fn announce(&mut self, from: usize, to: usize) -> Result<(), ModelError> {
        for index in from..to {
            let previous = self.doc.seq_items(self.id)?.get(index);
            self.observer.will_write_index(self.id, index, previous)?;
        }
        Ok(())
    }

    fn check_index(&self, index: usize, len: usize) -> Result<(), ModelError> {
        if index >= len {
            return Err(ModelError::IndexOutOfBounds { index, len });
        }
        Ok(())
    }

    /// Overwrite an existing index, returning the replaced value
    pub fn set(&mut self, index: usize, raw: impl Into<Raw>) -> Result<Value, ModelError> {
        let len = self.len();
        self.check_index(index, len)?;
        let (value, staged) = self.doc.stage(raw.into(), Some(self.id))?;
        if let Err(err) = self.announce(index, index + 1) {
            self.doc.discard(staged);
            return Err(err);
        }
        let old = std::mem::replace(&mut self.doc.items_mut(self.id)?[index], value);
        self.doc.release(&old, self.id);
        self.observer.changed(self.id);
        Ok(old)
    }

    pub fn push(&mut self, raw: impl Into<Raw>) -> Result<(), ModelError> {
        let len = self.len();
        self.insert(len, raw)
    }

    /// Insert at `index`, shifting later items right. `index == len` appends.
    pub fn insert(&mut self, index: usize, raw: impl Into<Raw>) -> Result<(), ModelError> {
        let len = self.len();
        if index > len {
            return Err(ModelError::IndexOutOfBounds { index, len });
        }
        let (value, staged) = self.doc.stage(raw.into(), Some(self.id))?;
        let announced = self
            .observer
            .will_resize(self.id, len)
            .and_then(|_| self.announce(index, len + 1));
        if let Err(err) = announced {
            self.doc.discard(staged);
            return Err(err);
        }
        self.doc.items_mut(self.id)?.insert(index, value);
        self.observer.changed(self.id);
        Ok(())
    }

    /// Remove `index`, shifting later items left
    pub fn remove(&mut self, index: usize) -> Result<Value, ModelError> {
        let len = self.len();
        self.check_index(index, len)?;
        self.observer.will_resize(self.id, len)?;
        self.announce(index, len)?;
        let old = self.doc.items_mut(self.id)?.remove(index);
        self.doc.release(&old, self.id);
        self.observer.changed(self.id);
        Ok(old)
    }

    /// Shorten to `len` items. Does nothing if already that short.
    pub fn truncate(&mut self, len: usize) -> Result<(), ModelError> {
        let current = self.len();
        if len >= current {
            return Ok(());
        }
        self.observer.will_resize(self.id, current)?;
        self.announce(len, current)?;
        let removed: Vec<Value> = self.doc.items_mut(self.id)?.drain(len..).collect();
        for old in &removed {
            self.doc.release(old, self.id);
        }
        self.observer.changed(self.id);
        Ok(())
    }

    /// Set the length, padding with nulls when growing
    pub fn resize(&mut self, len: usize) -> Result<(), ModelError> {
        let current = self.len();
        if len <= current {
            return self.truncate(len);
        }
        self.observer.will_resize(self.id, current)?;
        self.announce(current, len)?;
        self.doc.items_mut(self.id)?.resize(len, Value::Null);
        self.observer.changed(self.id);
        Ok(())
    }

    /// Move the item at `from` so that it ends up at `to`
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<(), ModelError> {
        let len = self.len();
        self.check_index(from, len)?;
        self.check_index(to, len)?;
        if from == to {
            return Ok(());
        }
        let value = self.remove(from)?;
        self.insert(to, value)
    }
}

impl ObservedContainer for SeqMut<'_> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn kind(&self) -> ContainerKind {
        ContainerKind::Seq
    }

    fn document(&self) -> &Document {
        self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Journal {
        events: Vec<String>,
        reject: bool,
    }

    impl WriteObserver for Journal {
        fn will_write(&mut self, target: NodeId, key: &str, previous: Option<&Value>) -> Result<(), ModelError> {
            if self.reject {
                return Err(ModelError::WriteRejected("closed"));
            }
            self.events.push(format!("key {} {} {:?}", target, key, previous));
            Ok(())
        }

        fn will_write_index(&mut self, target: NodeId, index: usize, previous: Option<&Value>) -> Result<(), ModelError> {
            if self.reject {
                return Err(ModelError::WriteRejected("closed"));
            }
            self.events.push(format!("index {} {} {:?}", target, index, previous));
            Ok(())
        }

        fn will_resize(&mut self, target: NodeId, previous_len: usize) -> Result<(), ModelError> {
            if self.reject {
                return Err(ModelError::WriteRejected("closed"));
            }
            self.events.push(format!("len {} {}", target, previous_len));
            Ok(())
        }

        fn changed(&mut self, target: NodeId) {
            self.events.push(format!("changed {}", target));
        }
    }

    fn doc_with_list() -> (Document, NodeId) {
        let doc = Document::from_raw(Raw::record(
            "root",
            [("list", Raw::seq([1.into(), 2.into(), 3.into()]))],
        ))
        .unwrap();
        let list = doc.child(doc.root(), "list").unwrap();
        (doc, list)
    }

    #[test]
    fn test_record_set_reports_previous() {
        let (mut doc, _) = doc_with_list();
        let root = doc.root();
        let mut journal = Journal::default();

        let mut record = doc.record_mut(root, &mut journal).unwrap();
        record.set("name", "a").unwrap();
        record.set("name", "b").unwrap();

        assert_eq!(
            journal.events,
            vec![
                format!("key {} name None", root),
                format!("changed {}", root),
                format!("key {} name Some(Str(\"a\"))", root),
                format!("changed {}", root),
            ]
        );
    }

    #[test]
    fn test_insert_announces_shifted_indices() {
        let (mut doc, list) = doc_with_list();
        let mut journal = Journal::default();

        doc.seq_mut(list, &mut journal).unwrap().insert(1, 9).unwrap();

        assert_eq!(journal.events.len(), 5);
        assert_eq!(journal.events[0], format!("len {} 3", list));
        assert_eq!(journal.events[3], format!("index {} 3 None", list));
        assert_eq!(
            doc.items(list).unwrap(),
            &[
                Value::Number(1.0),
                Value::Number(9.0),
                Value::Number(2.0),
                Value::Number(3.0)
            ]
        );
    }

    #[test]
    fn test_rejected_write_leaves_document_untouched() {
        let (mut doc, list) = doc_with_list();
        let mut journal = Journal {
            reject: true,
            ..Default::default()
        };

        let err = doc.seq_mut(list, &mut journal).unwrap().push(4).unwrap_err();
        assert_eq!(err, ModelError::WriteRejected("closed"));
        assert_eq!(doc.items(list).unwrap().len(), 3);
    }

    #[test]
    fn test_rejected_nested_write_adds_no_nodes() {
        let (mut doc, list) = doc_with_list();
        let root = doc.root();
        let count = doc.node_count();
        let mut journal = Journal {
            reject: true,
            ..Default::default()
        };

        let raw = Raw::record("box", [("items", Raw::seq([Raw::map([("k", Raw::from(1))])]))]);
        let err = doc.record_mut(root, &mut journal).unwrap().set("box", raw).unwrap_err();
        assert_eq!(err, ModelError::WriteRejected("closed"));
        assert_eq!(doc.node_count(), count);
        assert!(journal.events.is_empty());

        let err = doc.seq_mut(list, &mut journal).unwrap().insert(0, Raw::Seq(Vec::new())).unwrap_err();
        assert_eq!(err, ModelError::WriteRejected("closed"));
        assert_eq!(doc.node_count(), count);
    }

    #[test]
    fn test_failed_wrap_is_not_announced() {
        let (mut doc, list) = doc_with_list();
        let root = doc.root();
        let count = doc.node_count();
        let mut journal = Journal::default();

        // "a" is wrapped before "b" fails to adopt a node held elsewhere
        let raw = Raw::record("box", [("a", Raw::map([("k", Raw::from(1))])), ("b", Raw::Node(list))]);
        let err = doc.record_mut(root, &mut journal).unwrap().set("box", raw).unwrap_err();
        assert_eq!(err, ModelError::AlreadyAttached(list));
        assert!(journal.events.is_empty());
        assert_eq!(doc.node_count(), count);
        assert_eq!(doc.parent(list), Some(root));
        assert_eq!(doc.field(root, "box"), None);
    }

    #[test]
    fn test_kind_mismatch() {
        let (mut doc, list) = doc_with_list();
        let err = doc.map_mut(list, &mut Untracked).err().unwrap();
        assert_eq!(
            err,
            ModelError::KindMismatch {
                id: list,
                expected: ContainerKind::Map,
                actual: ContainerKind::Seq
            }
        );
    }

    #[test]
    fn test_nested_values_are_wrapped_once() {
        let (mut doc, list) = doc_with_list();
        let root = doc.root();

        doc.record_mut(root, &mut Untracked)
            .unwrap()
            .set("meta", Raw::map([("a", Raw::from(1))]))
            .unwrap();
        let meta = doc.child(root, "meta").unwrap();
        let before = doc.node_count();

        // Writing an observed node moves it instead of copying it
        doc.record_mut(root, &mut Untracked).unwrap().remove("meta").unwrap();
        assert_eq!(doc.parent(meta), None);
        doc.seq_mut(list, &mut Untracked).unwrap().push(Raw::Node(meta)).unwrap();

        assert_eq!(doc.node_count(), before);
        assert_eq!(doc.parent(meta), Some(list));
    }

    #[test]
    fn test_attached_node_cannot_be_shared() {
        let (mut doc, list) = doc_with_list();
        let root = doc.root();
        doc.record_mut(root, &mut Untracked)
            .unwrap()
            .set("meta", Raw::Map(Default::default()))
            .unwrap();
        let meta = doc.child(root, "meta").unwrap();

        let err = doc
            .seq_mut(list, &mut Untracked)
            .unwrap()
            .push(Raw::Node(meta))
            .unwrap_err();
        assert_eq!(err, ModelError::AlreadyAttached(meta));
    }

    #[test]
    fn test_truncate_and_move() {
        let (mut doc, list) = doc_with_list();
        let mut untracked = Untracked;
        let mut seq = doc.seq_mut(list, &mut untracked).unwrap();
        seq.move_item(0, 2).unwrap();
        assert_eq!(
            seq.items(),
            &[Value::Number(2.0), Value::Number(3.0), Value::Number(1.0)]
        );
        seq.truncate(1).unwrap();
        assert_eq!(seq.len(), 1);
        seq.resize(3).unwrap();
        assert_eq!(seq.get(2), Some(&Value::Null));
    }
}
