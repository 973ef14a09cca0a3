//! Change notification for watchers of document nodes

use vellum_document::NodeId;

pub type WatchId = u64;

type Callback = Box<dyn FnMut(NodeId)>;

enum Scope {
    All,
    Node(NodeId),
}

struct Watcher {
    id: WatchId,
    scope: Scope,
    callback: Callback,
}

/// Registered watchers. Flushed once per commit, rollback, undo or redo
/// with the deduplicated set of changed nodes.
#[derive(Default)]
pub struct Notifier {
    next_id: WatchId,
    watchers: Vec<Watcher>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch every changed node
    pub fn watch(&mut self, callback: impl FnMut(NodeId) + 'static) -> WatchId {
        self.register(Scope::All, Box::new(callback))
    }

    /// Watch a single node
    pub fn watch_node(&mut self, node: NodeId, callback: impl FnMut(NodeId) + 'static) -> WatchId {
        self.register(Scope::Node(node), Box::new(callback))
    }

    pub fn unwatch(&mut self, id: WatchId) -> bool {
        let before = self.watchers.len();
        self.watchers.retain(|w| w.id != id);
        self.watchers.len() != before
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn notify(&mut self, changed: &[NodeId]) {
        for node in changed {
            for watcher in &mut self.watchers {
                let interested = match watcher.scope {
                    Scope::All => true,
                    Scope::Node(id) => id == *node,
                };
                if interested {
                    (watcher.callback)(*node);
                }
            }
        }
    }

    fn register(&mut self, scope: Scope, callback: Callback) -> WatchId {
        self.next_id += 1;
        self.watchers.push(Watcher {
            id: self.next_id,
            scope,
            callback,
        });
        self.next_id
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use vellum_document::{Document, Raw};

    #[test]
    fn test_scoped_watchers() {
        let doc = Document::from_raw(Raw::record(
            "root",
            [("a", Raw::seq([])), ("b", Raw::seq([]))],
        ))
        .unwrap();
        let a = doc.child(doc.root(), "a").unwrap();
        let b = doc.child(doc.root(), "b").unwrap();

        let all = Rc::new(RefCell::new(Vec::new()));
        let only_b = Rc::new(RefCell::new(Vec::new()));

        let mut notifier = Notifier::new();
        let sink = all.clone();
        let watch_all = notifier.watch(move |n| sink.borrow_mut().push(n));
        let sink = only_b.clone();
        notifier.watch_node(b, move |n| sink.borrow_mut().push(n));

        notifier.notify(&[a, b]);
        assert_eq!(*all.borrow(), vec![a, b]);
        assert_eq!(*only_b.borrow(), vec![b]);

        assert!(notifier.unwatch(watch_all));
        assert!(!notifier.unwatch(watch_all));
        notifier.notify(&[a]);
        assert_eq!(all.borrow().len(), 2);
    }
}
