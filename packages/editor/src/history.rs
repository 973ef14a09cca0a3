//! # Undo/Redo History
//!
//! Committed transactions plus a cursor.
//!
//! ## Design
//!
//! - Entries before the cursor can be undone, entries at or after it redone
//! - Pushing a new transaction drops everything after the cursor
//! - Empty transactions are never pushed
//! - Bounded by `max_levels`; the oldest entry is dropped first (0 = unlimited)

use crate::log::Transaction;

#[derive(Debug)]
pub struct History {
    entries: Vec<Transaction>,
    cursor: usize,
    max_levels: usize,
}

impl History {
    /// Create a history with default max levels (100)
    pub fn new() -> Self {
        Self::with_max_levels(100)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            max_levels,
        }
    }

    pub fn push(&mut self, txn: Transaction) {
        if txn.is_empty() {
            return;
        }
        self.entries.truncate(self.cursor);
        self.entries.push(txn);
        self.cursor = self.entries.len();

        if self.max_levels > 0 && self.entries.len() > self.max_levels {
            let excess = self.entries.len() - self.max_levels;
            self.entries.drain(..excess);
            self.cursor -= excess;
        }
    }

    /// Move the cursor back and return the transaction to undo
    pub(crate) fn step_back(&mut self) -> Option<&mut Transaction> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get_mut(self.cursor)
    }

    /// Move the cursor forward and return the transaction to redo
    pub(crate) fn step_forward(&mut self) -> Option<&mut Transaction> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get_mut(self.cursor - 1)
    }

    /// Transaction the next undo would revert
    pub fn peek_undo(&self) -> Option<&Transaction> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Transaction the next redo would replay
    pub fn peek_redo(&self) -> Option<&Transaction> {
        self.entries.get(self.cursor)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn undo_len(&self) -> usize {
        self.cursor
    }

    pub fn redo_len(&self) -> usize {
        self.entries.len() - self.cursor
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.peek_undo().and_then(Transaction::description)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::TransactionLog;
    use vellum_document::{Document, Raw};

    /// A transaction holding `n` recorded writes
    fn txn(n: usize) -> Transaction {
        let mut doc = Document::from_raw(Raw::Map(Default::default())).unwrap();
        let root = doc.root();
        let mut log = TransactionLog::new();
        log.begin();
        for i in 0..n {
            doc.map_mut(root, &mut log)
                .unwrap()
                .insert(&i.to_string(), 1)
                .unwrap();
        }
        log.finish().unwrap()
    }

    #[test]
    fn test_empty_transactions_are_not_pushed() {
        let mut history = History::new();
        history.push(txn(0));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_cursor_moves() {
        let mut history = History::new();
        history.push(txn(1));
        history.push(txn(2));
        assert_eq!(history.undo_len(), 2);

        assert_eq!(history.step_back().map(|t| t.len()), Some(2));
        assert_eq!(history.redo_len(), 1);
        assert_eq!(history.peek_redo().map(Transaction::len), Some(2));

        assert_eq!(history.step_forward().map(|t| t.len()), Some(2));
        assert!(history.step_forward().is_none());
    }

    #[test]
    fn test_push_clears_redo() {
        let mut history = History::new();
        history.push(txn(1));
        history.push(txn(1));
        history.step_back();
        assert!(history.can_redo());

        history.push(txn(3));
        assert!(!history.can_redo());
        assert_eq!(history.undo_len(), 2);
    }

    #[test]
    fn test_max_levels() {
        let mut history = History::with_max_levels(3);
        for n in 1..=5 {
            history.push(txn(n));
        }
        assert_eq!(history.undo_len(), 3);
        assert_eq!(history.peek_undo().map(Transaction::len), Some(5));

        let mut unlimited = History::with_max_levels(0);
        for _ in 0..150 {
            unlimited.push(txn(1));
        }
        assert_eq!(unlimited.undo_len(), 150);
    }
}
