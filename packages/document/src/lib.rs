//! # Vellum Document Model
//!
//! Arena-backed document tree with observed containers.
//!
//! Every container in a document (records, maps and sequences) lives in a
//! per-document arena and is addressed by a [`NodeId`]. Mutable views
//! ([`RecordMut`], [`MapMut`], [`SeqMut`]) report each slot write to a
//! [`WriteObserver`] before it happens, which is how the editor's transaction
//! log captures previous values.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut doc = Document::from_json(&json!({"typeId": "document", "pages": []}))?;
//! let pages = doc.field(doc.root(), "pages").and_then(Value::as_node).unwrap();
//! doc.seq_mut(pages, &mut Untracked)?.push(Raw::record("page", [("id", "p1".into())]))?;
//! ```

pub mod codec;
pub mod document;
pub mod error;
pub mod id;
pub mod node;
pub mod observed;
pub mod value;
pub mod visitor;

pub use codec::{AttrCodec, JsonCodec, TYPE_KEY};
pub use document::Document;
pub use error::ModelError;
pub use id::{replica_seed, IdArena, IdGenerator, NodeId};
pub use node::{Body, ContainerKind, Node};
pub use observed::{
    MapMut, Observed, ObservedContainer, RecordMut, SeqMut, Untracked, WriteObserver,
};
pub use value::{Raw, Value};
