//! # Vellum Editor
//!
//! Transactional editing engine for Vellum documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ document: node arena + observed containers  │
//! └─────────────────────────────────────────────┘
//!                     ↓ every write reports to a WriteObserver
//! ┌─────────────────────────────────────────────┐
//! │ editor                                      │
//! │  - TransactionLog: Rec / ArrayRec records   │
//! │  - Repository: start/commit/rollback/undo   │
//! │  - Recorder: semantic edits → Cmd           │
//! │  - HandlerTable: Cmd → document writes      │
//! │  - Repository::apply: replay remote Cmds    │
//! └─────────────────────────────────────────────┘
//!                     ↓ Envelope (Cmd or CmdGroup)
//! ┌─────────────────────────────────────────────┐
//! │ session: pending queue + Sequencer ordering │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Single writer**: a repository owns its document; writes outside a
//!    transaction are rejected
//! 2. **Two records of one edit**: the log restores local state, the `Cmd`
//!    reproduces the edit on other replicas, and the trap keeps a recorder
//!    edit out of the log's raw records
//! 3. **Stable ids on the wire**: commands address pages, shapes and items
//!    by their `id` field, never by arena handles
//! 4. **All or nothing**: a failed command rolls back its transaction
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vellum_editor::Repository;
//!
//! let mut repo = Repository::new(doc);
//! let (_, envelope) = repo.transact(|rec| {
//!     rec.modify_shape("page-1", "rect-1", "width", json!(240))
//! })?;
//! send(envelope.unwrap().to_json_line()?);
//!
//! repo.undo()?;
//! ```

mod attrs;
mod cmd;
mod config;
mod errors;
mod executor;
mod frame;
mod handlers;
mod history;
mod log;
mod merge;
mod notify;
mod recorder;
mod repository;
mod resolve;
mod session;

pub use attrs::{AttrSpec, AttrType};
pub use cmd::{
    Axis, Cmd, CmdGroup, Envelope, GroupPayload, OpKind, PathSeg, Placement, TextRange,
    UngroupPayload,
};
pub use config::{EditorConfig, DEFAULT_CONFIG_NAME};
pub use errors::EditorError;
pub use executor::ApplyReport;
pub use frame::{DirtyFrames, GroupBounds, PostEffect, PostEffectEngine};
pub use handlers::{ApplyCtx, ApplyOutcome, HandlerFn, HandlerTable};
pub use history::History;
pub use log::{ArrayRec, Entry, Rec, SubCommand, Transaction, TransactionLog};
pub use merge::merge;
pub use notify::{Notifier, WatchId};
pub use recorder::Recorder;
pub use repository::Repository;
pub use resolve::{CELL_KIND, PAGE_KIND, SHAPE_KIND, TEXT_KIND};
pub use session::{PendingEnvelope, ReplicaSession, Sequenced, Sequencer};

// Re-export document types for convenience
pub use vellum_document::{Document, NodeId, Raw, Value};
