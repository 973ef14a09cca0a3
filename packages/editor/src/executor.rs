//! # Command Executor
//!
//! Replays envelopes received from other replicas. The whole envelope runs
//! inside one transaction: writes are recorded (not trapped), so a
//! structural failure rolls the document back to exactly where it was.
//! The applied commands stay on the transaction, so a session can send
//! their inverse when the replayed edit is undone.

use crate::cmd::Envelope;
use crate::errors::EditorError;
use crate::handlers::{ApplyCtx, ApplyOutcome};
use crate::repository::Repository;

/// Result of replaying one envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub unit_id: String,
    pub applied: usize,
    /// Commands skipped as unknown, with the reason
    pub skipped: Vec<String>,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

impl Repository {
    /// Apply a remote envelope as one transaction
    pub fn apply(&mut self, envelope: &Envelope) -> Result<ApplyReport, EditorError> {
        let span = tracing::info_span!("apply", unit = %envelope.unit_id());
        let _enter = span.enter();

        self.start()?;
        let mut report = ApplyReport {
            unit_id: envelope.unit_id().to_string(),
            ..Default::default()
        };

        for cmd in envelope.cmds() {
            let mut ctx = ApplyCtx {
                doc: &mut self.doc,
                observer: &mut self.log,
                codec: self.codec.as_ref(),
                dirty: Some(&mut self.dirty),
            };
            match self.handlers.apply(&mut ctx, cmd) {
                Ok(ApplyOutcome::Applied) => {
                    tracing::debug!("[Executor] applied {}", cmd.describe());
                    self.log.note_replayed(cmd);
                    report.applied += 1;
                }
                Ok(ApplyOutcome::Skipped(reason)) => {
                    tracing::warn!("[Executor] skipped {}: {}", cmd.describe(), reason);
                    report.skipped.push(reason);
                }
                Err(err) => {
                    tracing::error!("[Executor] {} failed: {}", cmd.describe(), err);
                    self.rollback()?;
                    return Err(err);
                }
            }
        }

        self.commit()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::cmd::{Cmd, Envelope, OpKind};
    use crate::errors::EditorError;
    use crate::repository::Repository;
    use serde_json::json;
    use vellum_document::Document;

    fn repo() -> Repository {
        Repository::new(
            Document::from_json(&json!({
                "typeId": "document",
                "pages": [{"typeId": "page", "id": "p1", "name": "One", "shapes": [
                    {"typeId": "shape", "id": "a", "type": "rect", "x": 0}
                ]}]
            }))
            .unwrap(),
        )
    }

    #[test]
    fn test_failed_envelope_rolls_back() {
        let mut repo = repo();
        let before = repo.export();

        let envelope = Envelope::from_cmds(
            vec![
                Cmd::new(OpKind::ShapeModify, "p1", vec!["a".into()])
                    .with_attr("x")
                    .with_value(json!(50)),
                Cmd::new(OpKind::ShapeDelete, "p1", vec!["missing".into()])
                    .with_value(json!({"index": 0, "id": "missing"})),
            ],
            "u1",
        )
        .unwrap();

        let err = repo.apply(&envelope).unwrap_err();
        assert!(matches!(err, EditorError::Unresolved(_)));
        assert_eq!(repo.export(), before);
        assert!(!repo.is_open());
        assert!(!repo.can_undo());
    }

    #[test]
    fn test_unknown_commands_are_reported() {
        let mut repo = repo();
        let envelope = Envelope::from_cmds(
            vec![
                Cmd::new(OpKind::Other("Wobble".into()), "p1", vec!["a".into()]),
                Cmd::new(OpKind::ShapeModify, "p1", vec!["a".into()])
                    .with_attr("x")
                    .with_value(json!(5)),
            ],
            "u2",
        )
        .unwrap();

        let report = repo.apply(&envelope).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(!report.is_complete());
        assert_eq!(repo.export()["pages"][0]["shapes"][0]["x"], json!(5));

        // Remote edits are undoable locally like any other transaction
        assert!(repo.undo().unwrap());
        assert_eq!(repo.export()["pages"][0]["shapes"][0]["x"], json!(0));
    }
}
