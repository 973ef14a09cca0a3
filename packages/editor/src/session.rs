//! # Replica Session
//!
//! One replica's view of a shared document: a [`Repository`] plus the
//! envelopes it has produced and not yet seen confirmed.
//!
//! Local gestures are applied immediately and queued for sending. Every
//! replica consumes the same ordered stream from the [`Sequencer`]; a
//! replica recognizes its own envelopes there and confirms them instead of
//! applying them twice.

use crate::cmd::{Cmd, Envelope};
use crate::config::EditorConfig;
use crate::errors::EditorError;
use crate::executor::ApplyReport;
use crate::recorder::Recorder;
use crate::repository::Repository;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use vellum_document::Document;

/// Envelope waiting for the sequencer to echo it back
#[derive(Debug, Clone)]
pub struct PendingEnvelope {
    pub unit_id: String,
    pub envelope: Envelope,
    /// Milliseconds since the epoch when it was produced
    pub timestamp: u64,
}

pub struct ReplicaSession {
    id: String,
    repo: Repository,
    pending: Vec<PendingEnvelope>,
    outbox: VecDeque<Envelope>,
    /// Last sequence number consumed from the sequencer
    cursor: u64,
}

impl ReplicaSession {
    pub fn new(doc: Document, config: EditorConfig) -> Self {
        Self::from_repository(Repository::with_config(doc, config))
    }

    pub fn from_repository(repo: Repository) -> Self {
        Self {
            id: repo.config().replica_id.clone(),
            repo,
            pending: Vec::new(),
            outbox: VecDeque::new(),
            cursor: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn repository_mut(&mut self) -> &mut Repository {
        &mut self.repo
    }

    pub fn document(&self) -> &Document {
        self.repo.document()
    }

    /// Run a local gesture. Returns the unit id of the queued envelope, if
    /// the gesture produced one.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Recorder<'_>) -> Result<T, EditorError>,
    ) -> Result<(T, Option<String>), EditorError> {
        let (value, envelope) = self.repo.transact(f)?;
        let unit_id = envelope.map(|envelope| self.queue(envelope));
        Ok((value, unit_id))
    }

    /// Undo locally and queue the inverse commands for the other replicas
    pub fn undo(&mut self) -> Result<bool, EditorError> {
        let inverse: Vec<Cmd> = match self.repo.history().peek_undo() {
            Some(txn) => {
                let mut cmds: Vec<Cmd> = txn.shared_cmds().map(Cmd::inverse).collect();
                cmds.reverse();
                cmds
            }
            None => return Ok(false),
        };
        if !self.repo.undo()? {
            return Ok(false);
        }
        self.queue_cmds(inverse, "undo");
        Ok(true)
    }

    /// Redo locally and queue the commands again for the other replicas
    pub fn redo(&mut self) -> Result<bool, EditorError> {
        let forward: Vec<Cmd> = match self.repo.history().peek_redo() {
            Some(txn) => txn.shared_cmds().cloned().collect(),
            None => return Ok(false),
        };
        if !self.repo.redo()? {
            return Ok(false);
        }
        self.queue_cmds(forward, "redo");
        Ok(true)
    }

    /// Handle an envelope from the ordered stream. Our own envelopes are
    /// confirmed, everything else is replayed.
    pub fn receive(&mut self, envelope: &Envelope) -> Result<Option<ApplyReport>, EditorError> {
        if self.confirm(envelope.unit_id()) {
            return Ok(None);
        }
        self.repo.apply(envelope).map(Some)
    }

    pub fn confirm(&mut self, unit_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.unit_id != unit_id);
        before != self.pending.len()
    }

    /// Drop a pending envelope the sequencer refused
    pub fn reject(&mut self, unit_id: &str) -> bool {
        let rejected = self.confirm(unit_id);
        if rejected {
            tracing::warn!("[Session {}] envelope {} rejected", self.id, unit_id);
        }
        rejected
    }

    pub fn pending(&self) -> &[PendingEnvelope] {
        &self.pending
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Envelopes produced since the last call, oldest first
    pub fn take_outgoing(&mut self) -> Vec<Envelope> {
        self.outbox.drain(..).collect()
    }

    /// Send queued envelopes to the sequencer
    pub fn push(&mut self, sequencer: &mut Sequencer) {
        for envelope in self.take_outgoing() {
            sequencer.submit(&self.id, envelope);
        }
    }

    /// Consume everything the sequencer has ordered since the last pull
    pub fn pull(&mut self, sequencer: &Sequencer) -> Result<Vec<ApplyReport>, EditorError> {
        let mut reports = Vec::new();
        for entry in sequencer.since(self.cursor) {
            self.cursor = entry.seq;
            if let Some(report) = self.receive(&entry.envelope)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    fn queue_cmds(&mut self, cmds: Vec<Cmd>, what: &str) {
        let unit_id = self.repo.new_id();
        match Envelope::from_cmds(cmds, &unit_id) {
            Some(envelope) => {
                self.queue(envelope);
            }
            None => tracing::debug!("[Session {}] {} has no commands to send", self.id, what),
        }
    }

    fn queue(&mut self, envelope: Envelope) -> String {
        let unit_id = envelope.unit_id().to_string();
        self.pending.push(PendingEnvelope {
            unit_id: unit_id.clone(),
            envelope: envelope.clone(),
            timestamp: now_millis(),
        });
        self.outbox.push_back(envelope);
        unit_id
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct Sequenced {
    pub seq: u64,
    pub origin: String,
    pub envelope: Envelope,
}

/// Central ordering point. Sequence numbers start at 1.
#[derive(Debug, Default)]
pub struct Sequencer {
    entries: Vec<Sequenced>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, origin: &str, envelope: Envelope) -> u64 {
        let seq = self.entries.len() as u64 + 1;
        tracing::debug!("[Sequencer] #{} {} from {}", seq, envelope.unit_id(), origin);
        self.entries.push(Sequenced {
            seq,
            origin: origin.to_string(),
            envelope,
        });
        seq
    }

    /// Entries after `seq`
    pub fn since(&self, seq: u64) -> &[Sequenced] {
        let start = (seq as usize).min(self.entries.len());
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
