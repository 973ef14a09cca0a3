//! # Command Merging
//!
//! Folds repeated attribute writes within one transaction, so a drag that
//! sets `x` a hundred times emits a single command.
//!
//! The pending buffer is scanned from the newest command back. A structural
//! command (or a raw write recorded between commands) ends the scan without
//! merging: targets such as table cells are addressed by position, so a
//! write may only move back over commands that leave every address intact.
//! A modify command addressing the same (kind, target, attribute) as the new
//! one takes over the new value and keeps its original `before`.

use crate::cmd::Cmd;
use crate::log::{Entry, SubCommand};

enum Step {
    Merged,
    Stop,
    Continue,
}

fn step(existing: &mut Cmd, cmd: &Cmd) -> Step {
    if existing.kind.is_structural() {
        return Step::Stop;
    }
    if existing.same_slot(cmd) {
        existing.value = cmd.value.clone();
        return Step::Merged;
    }
    Step::Continue
}

/// Try to fold `cmd` into a pending command. Returns true if it merged.
pub fn merge(pending: &mut [Cmd], cmd: &Cmd) -> bool {
    if !cmd.kind.is_modify() {
        return false;
    }
    for existing in pending.iter_mut().rev() {
        match step(existing, cmd) {
            Step::Merged => return true,
            Step::Stop => return false,
            Step::Continue => {}
        }
    }
    false
}

/// Merge against the entries of an open transaction and return the
/// command that took the new value. Raw writes recorded between commands
/// act as barriers.
pub fn merge_entries<'e>(entries: &'e mut [Entry], cmd: &Cmd) -> Option<&'e mut SubCommand> {
    if !cmd.kind.is_modify() {
        return None;
    }
    for entry in entries.iter_mut().rev() {
        let Entry::Sub(sub) = entry else {
            return None;
        };
        match step(&mut sub.cmd, cmd) {
            Step::Merged => return Some(sub),
            Step::Stop => return None,
            Step::Continue => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::OpKind;
    use serde_json::json;

    fn modify(shape: &str, attr: &str, before: i64, after: i64) -> Cmd {
        Cmd::new(OpKind::ShapeModify, "p1", vec![shape.into()])
            .with_attr(attr)
            .with_value(json!(after))
            .with_before(json!(before))
    }

    #[test]
    fn test_repeated_writes_fold() {
        let mut pending = vec![modify("s1", "x", 0, 1)];
        assert!(merge(&mut pending, &modify("s1", "x", 1, 2)));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].before, json!(0));
        assert_eq!(pending[0].value, json!(2));
    }

    #[test]
    fn test_other_attributes_do_not_fold() {
        let mut pending = vec![modify("s1", "x", 0, 1)];
        assert!(!merge(&mut pending, &modify("s1", "y", 0, 1)));
        assert!(!merge(&mut pending, &modify("s2", "x", 0, 1)));
    }

    #[test]
    fn test_scan_passes_unrelated_modifies() {
        let mut pending = vec![modify("s1", "y", 0, 5), modify("s1", "x", 0, 1)];
        assert!(merge(&mut pending, &modify("s1", "x", 1, 2)));
        assert_eq!(pending[1].value, json!(2));
    }

    #[test]
    fn test_raw_write_is_a_barrier() {
        let sub = |cmd| {
            Entry::Sub(SubCommand {
                cmd,
                writes: Vec::new(),
            })
        };
        let mut entries = vec![sub(modify("s1", "x", 0, 1)), sub(modify("s1", "y", 0, 1))];
        let merged = merge_entries(&mut entries, &modify("s1", "y", 1, 3)).unwrap();
        assert_eq!(merged.cmd.value, json!(3));
        assert_eq!(merged.cmd.before, json!(0));

        let rec = Entry::Rec(crate::log::Rec {
            target: vellum_document::IdArena::new().issue(),
            key: "x".into(),
            value: None,
        });
        let mut entries = vec![sub(modify("s1", "x", 0, 1)), rec];
        assert!(merge_entries(&mut entries, &modify("s1", "x", 1, 2)).is_none());
    }

    #[test]
    fn test_structural_command_stops_scan() {
        let insert = Cmd::new(OpKind::ShapeInsert, "p1", vec!["s2".into()]);
        let mut pending = vec![modify("s1", "x", 0, 1), insert.clone()];
        assert!(!merge(&mut pending, &modify("s1", "x", 1, 2)));
        assert_eq!(pending[0].value, json!(1));

        let mut pending = vec![insert, modify("s1", "x", 0, 1)];
        assert!(merge(&mut pending, &modify("s1", "x", 1, 2)));

        let mut pending = vec![modify("s1", "x", 0, 1)];
        let delete = Cmd::new(OpKind::ShapeDelete, "p1", vec!["s1".into()]);
        assert!(!merge(&mut pending, &delete));
    }
}
