//! # Repository
//!
//! Owns the document together with its transaction log and history, and is
//! the single writer for that document.
//!
//! ## Lifecycle
//!
//! ```text
//! start ──▶ writes / recorder commands ──▶ commit ──▶ history ──▶ undo ⇄ redo
//!                                    └───▶ rollback
//! ```
//!
//! Writes are only accepted while a transaction is open. `commit` runs the
//! frame post-effects, pushes the transaction onto the history and emits
//! the envelope of recorder commands for other replicas. Watchers are
//! notified once per commit, rollback, undo or redo.

use crate::cmd::{Cmd, Envelope};
use crate::config::EditorConfig;
use crate::errors::EditorError;
use crate::frame::{DirtyFrames, PostEffectEngine};
use crate::handlers::{ApplyCtx, ApplyOutcome, HandlerTable};
use crate::history::History;
use crate::log::{self, SubCommand, Transaction, TransactionLog};
use crate::merge;
use crate::notify::{Notifier, WatchId};
use vellum_document::{
    AttrCodec, Document, IdGenerator, JsonCodec, MapMut, NodeId, RecordMut, SeqMut,
};

type CommitHook = Box<dyn FnMut(&Envelope)>;

pub struct Repository {
    pub(crate) doc: Document,
    pub(crate) log: TransactionLog,
    pub(crate) history: History,
    pub(crate) notifier: Notifier,
    pub(crate) handlers: HandlerTable,
    pub(crate) effects: PostEffectEngine,
    pub(crate) dirty: DirtyFrames,
    pub(crate) codec: Box<dyn AttrCodec>,
    pub(crate) ids: IdGenerator,
    pub(crate) config: EditorConfig,
    commit_hooks: Vec<CommitHook>,
}

impl Repository {
    pub fn new(doc: Document) -> Self {
        Self::with_config(doc, EditorConfig::default())
    }

    pub fn with_config(doc: Document, config: EditorConfig) -> Self {
        Self {
            doc,
            log: TransactionLog::new(),
            history: History::with_max_levels(config.max_history),
            notifier: Notifier::new(),
            handlers: HandlerTable::new(),
            effects: PostEffectEngine::new(),
            dirty: DirtyFrames::default(),
            codec: Box::new(JsonCodec),
            ids: IdGenerator::new(&config.replica_id),
            config,
            commit_hooks: Vec::new(),
        }
    }

    /// Replace the attribute codec used by handlers
    pub fn with_codec(mut self, codec: Box<dyn AttrCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    pub fn effects_mut(&mut self) -> &mut PostEffectEngine {
        &mut self.effects
    }

    /// Serialized export of the document
    pub fn export(&self) -> serde_json::Value {
        self.codec.encode(&self.doc, &vellum_document::Value::Node(self.doc.root()))
    }

    /// Fresh replica-scoped id for new entities
    pub fn new_id(&mut self) -> String {
        self.ids.new_id()
    }

    pub fn is_open(&self) -> bool {
        self.log.is_open()
    }

    /// Describe the open transaction (shown for undo)
    pub fn describe(&mut self, description: impl Into<String>) {
        self.log.set_description(description);
    }

    pub fn start(&mut self) -> Result<(), EditorError> {
        if !self.log.begin() {
            return Err(EditorError::TransactionOpen);
        }
        self.dirty.clear();
        tracing::debug!("[Repository] transaction started");
        Ok(())
    }

    /// Close the open transaction, push it onto the history and return the
    /// envelope of its recorder commands, if any
    pub fn commit(&mut self) -> Result<Option<Envelope>, EditorError> {
        if !self.log.is_open() {
            return Err(EditorError::NoTransaction);
        }
        if self.config.frame_updates {
            if let Err(err) = self.effects.run(&mut self.doc, &mut self.log, &self.dirty) {
                tracing::error!("[Repository] post-effects failed, rolling back: {}", err);
                self.rollback()?;
                return Err(err);
            }
        }
        self.dirty.clear();

        let mut txn = self.log.finish().ok_or(EditorError::NoTransaction)?;
        let envelope = self.envelope_for(&mut txn);
        tracing::debug!(
            "[Repository] committed {} entries, {} commands",
            txn.len(),
            envelope.as_ref().map_or(0, Envelope::len)
        );
        self.history.push(txn);
        self.flush();

        if let Some(envelope) = &envelope {
            for hook in &mut self.commit_hooks {
                hook(envelope);
            }
        }
        Ok(envelope)
    }

    /// Discard the open transaction, restoring every recorded slot
    pub fn rollback(&mut self) -> Result<(), EditorError> {
        let mut txn = self.log.finish().ok_or(EditorError::NoTransaction)?;
        self.dirty.clear();
        let result = revert(&mut txn, &mut self.doc, &mut self.log);
        tracing::debug!("[Repository] rolled back {} entries", txn.len());
        self.flush();
        result
    }

    /// Revert the latest committed transaction. Returns false when there is
    /// nothing to undo.
    pub fn undo(&mut self) -> Result<bool, EditorError> {
        if self.log.is_open() {
            return Err(EditorError::TransactionOpen);
        }
        let Some(txn) = self.history.step_back() else {
            return Ok(false);
        };
        let result = revert(txn, &mut self.doc, &mut self.log);
        if result.is_err() {
            // The document is back where it was, so the entry stays undoable
            self.history.step_forward();
        }
        self.flush();
        result.map(|_| true)
    }

    /// Replay the latest undone transaction. Returns false when there is
    /// nothing to redo.
    pub fn redo(&mut self) -> Result<bool, EditorError> {
        if self.log.is_open() {
            return Err(EditorError::TransactionOpen);
        }
        let Some(txn) = self.history.step_forward() else {
            return Ok(false);
        };
        let result = replay(txn, &mut self.doc, &mut self.log);
        if result.is_err() {
            self.history.step_back();
        }
        self.flush();
        result.map(|_| true)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_len(&self) -> usize {
        self.history.undo_len()
    }

    pub fn redo_len(&self) -> usize {
        self.history.redo_len()
    }

    pub fn watch(&mut self, callback: impl FnMut(NodeId) + 'static) -> WatchId {
        self.notifier.watch(callback)
    }

    pub fn watch_node(&mut self, node: NodeId, callback: impl FnMut(NodeId) + 'static) -> WatchId {
        self.notifier.watch_node(node, callback)
    }

    pub fn unwatch(&mut self, id: WatchId) -> bool {
        self.notifier.unwatch(id)
    }

    /// Called with every envelope a commit emits
    pub fn on_commit(&mut self, hook: impl FnMut(&Envelope) + 'static) {
        self.commit_hooks.push(Box::new(hook));
    }

    /// Recorded view of a record. Writes fail unless a transaction is open.
    pub fn record_mut(&mut self, id: NodeId) -> Result<RecordMut<'_>, EditorError> {
        Ok(self.doc.record_mut(id, &mut self.log)?)
    }

    pub fn map_mut(&mut self, id: NodeId) -> Result<MapMut<'_>, EditorError> {
        Ok(self.doc.map_mut(id, &mut self.log)?)
    }

    pub fn seq_mut(&mut self, id: NodeId) -> Result<SeqMut<'_>, EditorError> {
        Ok(self.doc.seq_mut(id, &mut self.log)?)
    }

    /// Mark a shape whose frame changed through raw writes
    pub fn mark_frame_dirty(&mut self, shape: NodeId) {
        self.dirty.mark(shape);
    }

    /// Apply a recorder command under the trap and append (or merge) it
    pub(crate) fn record_cmd(&mut self, cmd: Cmd) -> Result<(), EditorError> {
        if !self.log.is_open() {
            return Err(EditorError::NoTransaction);
        }
        let outcome = {
            let doc = &mut self.doc;
            let handlers = &self.handlers;
            let codec = self.codec.as_ref();
            let dirty = &mut self.dirty;
            self.log.trapped(|log| {
                let mut ctx = ApplyCtx {
                    doc,
                    observer: log,
                    codec,
                    dirty: Some(dirty),
                };
                handlers.apply(&mut ctx, &cmd)
            })
        };
        let mut writes = self.log.take_scratch();
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut touched = Vec::new();
                log::unwind(&mut writes, &mut self.doc, &mut touched)?;
                return Err(err);
            }
        };
        if let ApplyOutcome::Skipped(reason) = outcome {
            return Err(EditorError::Unsupported(reason));
        }

        if self.config.merge_commands {
            if let Some(sub) = self.log.open_entries_mut().and_then(|e| merge::merge_entries(e, &cmd)) {
                tracing::debug!("[Recorder] merged {}", cmd.describe());
                sub.writes.append(&mut writes);
                return Ok(());
            }
        }
        tracing::debug!("[Recorder] recorded {}", cmd.describe());
        self.log.push_sub(SubCommand { cmd, writes });
        Ok(())
    }

    fn envelope_for(&mut self, txn: &mut Transaction) -> Option<Envelope> {
        if txn.cmds().next().is_none() {
            return None;
        }
        let unit_id = self.ids.new_id();
        for cmd in txn.cmds_mut() {
            cmd.unit_id = unit_id.clone();
        }
        Envelope::from_cmds(txn.cmds().cloned().collect(), &unit_id)
    }

    fn flush(&mut self) {
        let changed = self.log.take_pending();
        if changed.is_empty() {
            return;
        }
        tracing::trace!("[Repository] notifying {} changed nodes", changed.len());
        self.notifier.notify(&changed);
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("nodes", &self.doc.node_count())
            .field("open", &self.log.is_open())
            .field("undo", &self.history.undo_len())
            .field("redo", &self.history.redo_len())
            .finish()
    }
}

/// Restore the state before `txn`, walking its entries backwards
fn revert(txn: &mut Transaction, doc: &mut Document, log: &mut TransactionLog) -> Result<(), EditorError> {
    let mut touched = Vec::new();
    let result = log::unwind(txn.entries_mut(), doc, &mut touched);
    for node in touched {
        log.touch(node);
    }
    Ok(result?)
}

/// Reapply `txn` after it was reverted, walking its entries forwards
fn replay(txn: &mut Transaction, doc: &mut Document, log: &mut TransactionLog) -> Result<(), EditorError> {
    let mut touched = Vec::new();
    let result = log::rewind(txn.entries_mut(), doc, &mut touched);
    for node in touched {
        log.touch(node);
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{Entry, Rec};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use vellum_document::{Raw, Value};

    fn repo() -> (Repository, NodeId) {
        let doc = Document::from_raw(Raw::record(
            "root",
            [(
                "entries",
                Raw::map([("0", Raw::from(0)), ("1", Raw::from(1)), ("2", Raw::from(2))]),
            )],
        ))
        .unwrap();
        let map = doc.child(doc.root(), "entries").unwrap();
        (Repository::new(doc), map)
    }

    #[test]
    fn test_state_errors() {
        let (mut repo, _) = repo();
        assert!(matches!(repo.commit(), Err(EditorError::NoTransaction)));
        assert!(matches!(repo.rollback(), Err(EditorError::NoTransaction)));
        repo.start().unwrap();
        assert!(matches!(repo.start(), Err(EditorError::TransactionOpen)));
        assert!(matches!(repo.undo(), Err(EditorError::TransactionOpen)));
        repo.commit().unwrap();
        assert!(!repo.undo().unwrap());
        assert!(!repo.redo().unwrap());
    }

    #[test]
    fn test_raw_writes_undo_and_redo() {
        let (mut repo, map) = repo();
        let original = repo.export();

        repo.start().unwrap();
        repo.map_mut(map).unwrap().insert("3", 3).unwrap();
        repo.map_mut(map).unwrap().insert("0", 10).unwrap();
        assert_eq!(repo.commit().unwrap(), None);
        let edited = repo.export();

        assert!(repo.undo().unwrap());
        assert_eq!(repo.export(), original);
        assert!(repo.redo().unwrap());
        assert_eq!(repo.export(), edited);
        assert_eq!(
            repo.document().field(map, "3"),
            Some(&Value::Number(3.0))
        );
    }

    #[test]
    fn test_failed_undo_keeps_history_cursor() {
        let doc = Document::from_raw(Raw::record(
            "root",
            [
                ("entries", Raw::map([("0", Raw::from(0))])),
                ("list", Raw::seq([Raw::from(1)])),
            ],
        ))
        .unwrap();
        let map = doc.child(doc.root(), "entries").unwrap();
        let list = doc.child(doc.root(), "list").unwrap();
        let mut repo = Repository::new(doc);

        repo.start().unwrap();
        repo.map_mut(map).unwrap().insert("1", 1).unwrap();
        repo.map_mut(map).unwrap().insert("2", 2).unwrap();
        repo.commit().unwrap();
        let edited = repo.export();

        // Point the first record at a sequence, which has no keys
        if let Some(txn) = repo.history.step_back() {
            txn.entries_mut()[0] = Entry::Rec(Rec {
                target: list,
                key: "1".into(),
                value: None,
            });
        }
        repo.history.step_forward();

        assert!(repo.undo().is_err());
        assert_eq!(repo.undo_len(), 1);
        assert_eq!(repo.redo_len(), 0);
        assert_eq!(repo.export(), edited);
    }

    #[test]
    fn test_watchers_see_each_change_once() {
        let (mut repo, map) = repo();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        repo.watch(move |node| sink.borrow_mut().push(node));

        repo.start().unwrap();
        repo.map_mut(map).unwrap().insert("3", 3).unwrap();
        repo.map_mut(map).unwrap().insert("4", 4).unwrap();
        assert!(seen.borrow().is_empty());
        repo.commit().unwrap();
        assert_eq!(*seen.borrow(), vec![map]);

        repo.undo().unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_commit_hook_receives_envelope() {
        let doc = Document::from_json(&json!({
            "typeId": "document",
            "pages": [{"typeId": "page", "id": "p1", "name": "One", "shapes": []}]
        }))
        .unwrap();
        let mut repo = Repository::new(doc);
        let units = Rc::new(RefCell::new(Vec::new()));
        let sink = units.clone();
        repo.on_commit(move |envelope| sink.borrow_mut().push(envelope.unit_id().to_string()));

        let (_, envelope) = repo
            .transact(|rec| rec.modify_page("p1", "name", json!("Cover")))
            .unwrap();
        let envelope = envelope.unwrap();
        assert_eq!(*units.borrow(), vec![envelope.unit_id().to_string()]);
    }
}
