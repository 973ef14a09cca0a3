//! # Transaction Log
//!
//! Records the previous value of every slot touched during an open
//! transaction, so the transaction can be rolled back or undone.
//!
//! ## Design
//!
//! - Keyed writes produce one [`Rec`] per (target, key) per segment
//! - Sequence writes accumulate into one [`ArrayRec`] per target per segment,
//!   holding every touched index plus the original length
//! - Recorder commands are appended as [`SubCommand`] entries carrying the
//!   writes they made; appending one starts a new segment, so raw writes
//!   that follow it get fresh records
//! - Undo and redo both swap: applying an entry writes its stored values and
//!   keeps the values it displaced, ready for the opposite direction
//! - While trapped, writes are neither recorded nor rejected; changed
//!   targets are still queued for notification. Each trapped write is kept
//!   as a one-step scratch entry, which becomes the command's own undo
//!   record, or is unwound if the command fails halfway

use crate::cmd::Cmd;
use std::collections::{HashMap, HashSet};
use vellum_document::{Document, ModelError, NodeId, Value, WriteObserver};

/// Previous value of a record field or map entry. `None` means the key was
/// absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Rec {
    pub target: NodeId,
    pub key: String,
    pub value: Option<Value>,
}

impl Rec {
    /// Write the stored value back and keep the displaced one
    pub(crate) fn swap(&mut self, doc: &mut Document) -> Result<(), ModelError> {
        let displaced = doc.restore_key(self.target, &self.key, self.value.take())?;
        self.value = displaced;
        Ok(())
    }
}

/// Previous contents of a sequence: touched indices and original length
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRec {
    pub target: NodeId,
    /// `None` values were past the end of the sequence
    pub items: Vec<(usize, Option<Value>)>,
    pub len: Option<usize>,
}

impl ArrayRec {
    fn new(target: NodeId) -> Self {
        Self {
            target,
            items: Vec::new(),
            len: None,
        }
    }

    /// Restore every element first and the length last, keeping what was
    /// displaced
    pub(crate) fn swap(&mut self, doc: &mut Document) -> Result<(), ModelError> {
        let current = doc
            .items(self.target)
            .ok_or(ModelError::NodeNotFound(self.target))?;
        let current_len = current.len();
        let displaced: Vec<Option<Value>> = self
            .items
            .iter()
            .map(|(index, _)| current.get(*index).cloned())
            .collect();

        for (index, value) in &self.items {
            doc.restore_index(self.target, *index, value.clone())?;
        }
        if let Some(len) = self.len {
            doc.restore_len(self.target, len)?;
            self.len = Some(current_len);
        }

        for ((_, slot), old) in self.items.iter_mut().zip(displaced) {
            *slot = old;
        }
        Ok(())
    }
}

/// A recorder command applied inside the transaction, with the writes it
/// made while trapped. Undo and redo swap those writes.
#[derive(Debug, Clone, PartialEq)]
pub struct SubCommand {
    pub cmd: Cmd,
    pub writes: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Rec(Rec),
    Array(ArrayRec),
    Sub(SubCommand),
}

/// Entries of one transaction, in recording order
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    entries: Vec<Entry>,
    description: Option<String>,
    /// Commands of a replayed envelope that took effect
    replayed: Vec<Cmd>,
}

impl Transaction {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [Entry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Recorder commands of this transaction, in order
    pub fn cmds(&self) -> impl Iterator<Item = &Cmd> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Sub(sub) => Some(&sub.cmd),
            _ => None,
        })
    }

    pub fn replayed(&self) -> &[Cmd] {
        &self.replayed
    }

    /// Commands another replica has to apply to repeat this transaction:
    /// the recorder's own commands, or the ones a replay applied
    pub fn shared_cmds(&self) -> impl Iterator<Item = &Cmd> {
        self.cmds().chain(self.replayed.iter())
    }

    pub(crate) fn cmds_mut(&mut self) -> impl Iterator<Item = &mut Cmd> {
        self.entries.iter_mut().filter_map(|entry| match entry {
            Entry::Sub(sub) => Some(&mut sub.cmd),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Key(String),
    Index(usize),
    Len,
}

/// The open transaction plus the bookkeeping used while recording into it
#[derive(Debug, Default)]
pub struct TransactionLog {
    open: Option<Transaction>,
    seen: HashSet<(NodeId, Slot)>,
    arrays: HashMap<NodeId, usize>,
    trap_depth: u32,
    scratch: Vec<Entry>,
    pending: Vec<NodeId>,
    pending_set: HashSet<NodeId>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn is_trapped(&self) -> bool {
        self.trap_depth > 0
    }

    /// Open a new transaction. Fails if one is already open.
    pub fn begin(&mut self) -> bool {
        if self.open.is_some() {
            return false;
        }
        self.reset_segment();
        self.open = Some(Transaction::default());
        true
    }

    /// Close the open transaction and hand it over
    pub fn finish(&mut self) -> Option<Transaction> {
        self.reset_segment();
        self.open.take()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        if let Some(txn) = &mut self.open {
            txn.description = Some(description.into());
        }
    }

    /// Entries of the open transaction
    pub fn open_entries_mut(&mut self) -> Option<&mut [Entry]> {
        self.open.as_mut().map(|txn| txn.entries.as_mut_slice())
    }

    pub fn open_len(&self) -> usize {
        self.open.as_ref().map_or(0, Transaction::len)
    }

    /// Append a recorder command and start a new dedup segment
    pub fn push_sub(&mut self, sub: SubCommand) -> bool {
        let Some(txn) = &mut self.open else {
            return false;
        };
        txn.entries.push(Entry::Sub(sub));
        self.reset_segment();
        true
    }

    /// Remember a replayed command on the open transaction. Its writes are
    /// recorded as plain entries.
    pub(crate) fn note_replayed(&mut self, cmd: &Cmd) {
        if let Some(txn) = &mut self.open {
            txn.replayed.push(cmd.clone());
        }
    }

    /// Run `f` with recording suspended
    pub fn trapped<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        if self.trap_depth == 0 {
            self.scratch.clear();
        }
        self.trap_depth += 1;
        let result = f(self);
        self.trap_depth -= 1;
        result
    }

    /// Writes made by the last trapped run, oldest first
    pub(crate) fn take_scratch(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.scratch)
    }

    /// Queue a node for the next notification flush
    pub fn touch(&mut self, node: NodeId) {
        if self.pending_set.insert(node) {
            self.pending.push(node);
        }
    }

    /// Drain queued notifications, in first-touch order
    pub fn take_pending(&mut self) -> Vec<NodeId> {
        self.pending_set.clear();
        std::mem::take(&mut self.pending)
    }

    fn reset_segment(&mut self) {
        self.seen.clear();
        self.arrays.clear();
    }
}

fn swap_entry(entry: &mut Entry, doc: &mut Document, touched: &mut Vec<NodeId>) -> Result<(), ModelError> {
    match entry {
        Entry::Rec(rec) => {
            rec.swap(doc)?;
            touched.push(rec.target);
        }
        Entry::Array(rec) => {
            rec.swap(doc)?;
            touched.push(rec.target);
        }
        Entry::Sub(_) => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Direction {
    Back,
    Forward,
}

impl Direction {
    fn flip(self) -> Self {
        match self {
            Direction::Back => Direction::Forward,
            Direction::Forward => Direction::Back,
        }
    }
}

fn swap_one(entry: &mut Entry, doc: &mut Document, touched: &mut Vec<NodeId>, dir: Direction) -> Result<(), ModelError> {
    match entry {
        Entry::Sub(sub) => swap_all(&mut sub.writes, doc, touched, dir),
        other => swap_entry(other, doc, touched),
    }
}

/// Swap every entry in `dir` order. If one fails, the entries already
/// swapped are swapped back, leaving the document as it was.
fn swap_all(entries: &mut [Entry], doc: &mut Document, touched: &mut Vec<NodeId>, dir: Direction) -> Result<(), ModelError> {
    let order: Vec<usize> = match dir {
        Direction::Back => (0..entries.len()).rev().collect(),
        Direction::Forward => (0..entries.len()).collect(),
    };
    for (done, &index) in order.iter().enumerate() {
        if let Err(err) = swap_one(&mut entries[index], doc, touched, dir) {
            for &undo in order[..done].iter().rev() {
                if let Err(restore) = swap_one(&mut entries[undo], doc, touched, dir.flip()) {
                    tracing::error!("[TransactionLog] could not restore entry {}: {}", undo, restore);
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Swap entries in reverse order, restoring the state before them
pub(crate) fn unwind(entries: &mut [Entry], doc: &mut Document, touched: &mut Vec<NodeId>) -> Result<(), ModelError> {
    swap_all(entries, doc, touched, Direction::Back)
}

/// Swap entries in recording order, restoring the state after them
pub(crate) fn rewind(entries: &mut [Entry], doc: &mut Document, touched: &mut Vec<NodeId>) -> Result<(), ModelError> {
    swap_all(entries, doc, touched, Direction::Forward)
}

fn array_rec<'t>(
    txn: &'t mut Transaction,
    arrays: &mut HashMap<NodeId, usize>,
    target: NodeId,
) -> &'t mut ArrayRec {
    let position = *arrays.entry(target).or_insert_with(|| {
        txn.entries.push(Entry::Array(ArrayRec::new(target)));
        txn.entries.len() - 1
    });
    match &mut txn.entries[position] {
        Entry::Array(rec) => rec,
        _ => unreachable!("array index always points at an array entry"),
    }
}

impl WriteObserver for TransactionLog {
    fn will_write(&mut self, target: NodeId, key: &str, previous: Option<&Value>) -> Result<(), ModelError> {
        if self.trap_depth > 0 {
            self.scratch.push(Entry::Rec(Rec {
                target,
                key: key.to_string(),
                value: previous.cloned(),
            }));
            return Ok(());
        }
        let Some(txn) = &mut self.open else {
            return Err(ModelError::WriteRejected("no open transaction"));
        };
        if self.seen.insert((target, Slot::Key(key.to_string()))) {
            txn.entries.push(Entry::Rec(Rec {
                target,
                key: key.to_string(),
                value: previous.cloned(),
            }));
        }
        Ok(())
    }

    fn will_write_index(&mut self, target: NodeId, index: usize, previous: Option<&Value>) -> Result<(), ModelError> {
        if self.trap_depth > 0 {
            let mut rec = ArrayRec::new(target);
            rec.items.push((index, previous.cloned()));
            self.scratch.push(Entry::Array(rec));
            return Ok(());
        }
        let Some(txn) = &mut self.open else {
            return Err(ModelError::WriteRejected("no open transaction"));
        };
        if self.seen.insert((target, Slot::Index(index))) {
            array_rec(txn, &mut self.arrays, target)
                .items
                .push((index, previous.cloned()));
        }
        Ok(())
    }

    fn will_resize(&mut self, target: NodeId, previous_len: usize) -> Result<(), ModelError> {
        if self.trap_depth > 0 {
            let mut rec = ArrayRec::new(target);
            rec.len = Some(previous_len);
            self.scratch.push(Entry::Array(rec));
            return Ok(());
        }
        let Some(txn) = &mut self.open else {
            return Err(ModelError::WriteRejected("no open transaction"));
        };
        if self.seen.insert((target, Slot::Len)) {
            array_rec(txn, &mut self.arrays, target).len = Some(previous_len);
        }
        Ok(())
    }

    fn changed(&mut self, target: NodeId) {
        self.touch(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_document::{Raw, Untracked};

    fn doc() -> (Document, NodeId, NodeId) {
        let doc = Document::from_raw(Raw::record(
            "root",
            [
                ("list", Raw::seq([1.into(), 2.into(), 3.into()])),
                ("name", "a".into()),
            ],
        ))
        .unwrap();
        let list = doc.child(doc.root(), "list").unwrap();
        let root = doc.root();
        (doc, root, list)
    }

    #[test]
    fn test_rejects_writes_without_transaction() {
        let (mut doc, root, _) = doc();
        let mut log = TransactionLog::new();
        let err = doc.record_mut(root, &mut log).unwrap().set("name", "b").unwrap_err();
        assert_eq!(err, ModelError::WriteRejected("no open transaction"));
        assert_eq!(doc.field(root, "name"), Some(&Value::Str("a".into())));
    }

    #[test]
    fn test_first_write_wins() {
        let (mut doc, root, _) = doc();
        let mut log = TransactionLog::new();
        assert!(log.begin());
        assert!(!log.begin());

        let mut record = doc.record_mut(root, &mut log).unwrap();
        record.set("name", "b").unwrap();
        record.set("name", "c").unwrap();
        record.set("extra", 1).unwrap();

        let txn = log.finish().unwrap();
        assert_eq!(
            txn.entries(),
            &[
                Entry::Rec(Rec {
                    target: root,
                    key: "name".into(),
                    value: Some(Value::Str("a".into())),
                }),
                Entry::Rec(Rec {
                    target: root,
                    key: "extra".into(),
                    value: None,
                }),
            ]
        );
    }

    #[test]
    fn test_array_rec_swaps_back_and_forth() {
        let (mut doc, _, list) = doc();
        let original = doc.to_json();
        let mut log = TransactionLog::new();
        log.begin();

        let mut seq = doc.seq_mut(list, &mut log).unwrap();
        seq.remove(0).unwrap();
        seq.remove(0).unwrap();
        seq.push(9).unwrap();
        let edited = doc.to_json();

        let mut txn = log.finish().unwrap();
        assert_eq!(txn.len(), 1);
        let Entry::Array(rec) = &mut txn.entries_mut()[0] else {
            panic!("expected array entry");
        };
        assert_eq!(rec.len, Some(3));

        rec.swap(&mut doc).unwrap();
        assert_eq!(doc.to_json(), original);
        rec.swap(&mut doc).unwrap();
        assert_eq!(doc.to_json(), edited);
    }

    #[test]
    fn test_trap_suspends_recording() {
        let (mut doc, root, _) = doc();
        let mut log = TransactionLog::new();

        log.trapped(|log| {
            doc.record_mut(root, log).unwrap().set("name", "b").unwrap();
        });
        assert_eq!(log.take_pending(), vec![root]);
        assert!(log.finish().is_none());
    }

    #[test]
    fn test_unwind_trapped_writes() {
        let (mut doc, root, list) = doc();
        let original = doc.to_json();
        let mut log = TransactionLog::new();

        log.trapped(|log| {
            doc.record_mut(root, log).unwrap().set("name", "b").unwrap();
            let mut seq = doc.seq_mut(list, log).unwrap();
            seq.insert(1, 7).unwrap();
            seq.remove(0).unwrap();
        });
        let mut partial = log.take_scratch();
        assert!(!partial.is_empty());

        let mut touched = Vec::new();
        unwind(&mut partial, &mut doc, &mut touched).unwrap();
        assert_eq!(doc.to_json(), original);
        assert!(touched.contains(&root));
        assert!(touched.contains(&list));

        rewind(&mut partial, &mut doc, &mut touched).unwrap();
        assert_eq!(doc.field(root, "name"), Some(&Value::Str("b".into())));
        assert_eq!(doc.items(list).unwrap().len(), 3);
    }

    #[test]
    fn test_failed_unwind_leaves_document_untouched() {
        let (mut doc, root, list) = doc();
        let mut entries = vec![
            // A sequence has no keys, so this entry cannot be swapped
            Entry::Rec(Rec {
                target: list,
                key: "name".into(),
                value: None,
            }),
            Entry::Rec(Rec {
                target: root,
                key: "name".into(),
                value: Some(Value::Str("z".into())),
            }),
        ];

        let mut touched = Vec::new();
        assert!(unwind(&mut entries, &mut doc, &mut touched).is_err());
        assert_eq!(doc.field(root, "name"), Some(&Value::Str("a".into())));
        assert!(rewind(&mut entries, &mut doc, &mut touched).is_err());
        assert_eq!(doc.field(root, "name"), Some(&Value::Str("a".into())));
    }

    #[test]
    fn test_sub_command_starts_new_segment() {
        let (mut doc, root, _) = doc();
        let mut log = TransactionLog::new();
        log.begin();

        doc.record_mut(root, &mut log).unwrap().set("name", "b").unwrap();
        log.push_sub(SubCommand {
            cmd: Cmd::new(crate::cmd::OpKind::PageModify, "p", vec![]),
            writes: Vec::new(),
        });
        doc.record_mut(root, &mut log).unwrap().set("name", "c").unwrap();

        assert_eq!(log.open_len(), 3);
        // Untracked writes never reach the log
        doc.record_mut(root, &mut Untracked).unwrap().set("name", "d").unwrap();
        assert_eq!(log.open_len(), 3);
    }
}
