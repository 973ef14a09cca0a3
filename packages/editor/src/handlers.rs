//! # Handler Table
//!
//! Applies a [`Cmd`] to the document, one handler per [`OpKind`].
//!
//! ## Design
//!
//! - Handlers resolve stable ids to nodes and write through the observed
//!   wrappers, so the same code serves local recording (trapped) and remote
//!   replay (recorded)
//! - Structural commands check that the document still looks the way the
//!   sender saw it (id at index, parent) and fail with
//!   [`EditorError::Mismatch`] otherwise
//! - Unknown kinds and unknown attribute ids are skipped, never errors

use crate::attrs::{self, AttrSpec};
use crate::cmd::{Axis, Cmd, GroupPayload, OpKind, PathSeg, Placement, TextRange, UngroupPayload};
use crate::errors::EditorError;
use crate::frame::DirtyFrames;
use crate::resolve::{self, CELL_KIND};
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use std::collections::HashMap;
use vellum_document::{
    AttrCodec, Document, MapMut, NodeId, Raw, RecordMut, SeqMut, Value, WriteObserver,
};

/// Everything a handler may touch
pub struct ApplyCtx<'a> {
    pub doc: &'a mut Document,
    pub observer: &'a mut dyn WriteObserver,
    pub codec: &'a dyn AttrCodec,
    pub dirty: Option<&'a mut DirtyFrames>,
}

impl ApplyCtx<'_> {
    fn record(&mut self, id: NodeId) -> Result<RecordMut<'_>, EditorError> {
        Ok(self.doc.record_mut(id, &mut *self.observer)?)
    }

    fn map(&mut self, id: NodeId) -> Result<MapMut<'_>, EditorError> {
        Ok(self.doc.map_mut(id, &mut *self.observer)?)
    }

    fn seq(&mut self, id: NodeId) -> Result<SeqMut<'_>, EditorError> {
        Ok(self.doc.seq_mut(id, &mut *self.observer)?)
    }

    fn mark_dirty(&mut self, node: NodeId) {
        if let Some(dirty) = self.dirty.as_deref_mut() {
            dirty.mark(node);
        }
    }

    fn decode(&self, data: &Json) -> Raw {
        self.codec.decode(data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    Skipped(String),
}

pub type HandlerFn = fn(&mut ApplyCtx<'_>, &Cmd) -> Result<ApplyOutcome, EditorError>;

/// Dispatch table from op kind to handler
pub struct HandlerTable {
    handlers: HashMap<OpKind, HandlerFn>,
}

impl HandlerTable {
    /// Table with a handler for every built-in op kind
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.register(OpKind::PageInsert, page_insert);
        table.register(OpKind::PageDelete, page_delete);
        table.register(OpKind::PageMove, page_move);
        table.register(OpKind::PageModify, page_modify);
        table.register(OpKind::ShapeInsert, shape_insert);
        table.register(OpKind::ShapeDelete, shape_delete);
        table.register(OpKind::ShapeMove, shape_move);
        table.register(OpKind::ShapeModify, shape_modify);
        table.register(OpKind::ShapeArrayAttrInsert, array_insert);
        table.register(OpKind::ShapeArrayAttrDelete, array_delete);
        table.register(OpKind::ShapeArrayAttrMove, array_move);
        table.register(OpKind::ShapeArrayAttrModify, array_modify);
        table.register(OpKind::TextInsert, text_insert);
        table.register(OpKind::TextDelete, text_delete);
        table.register(OpKind::TextModify, text_modify);
        table.register(OpKind::TableInsert, table_insert);
        table.register(OpKind::TableDelete, table_delete);
        table.register(OpKind::TableModify, table_modify);
        table.register(OpKind::Group, group);
        table
    }

    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: OpKind, handler: HandlerFn) {
        self.handlers.insert(kind, handler);
    }

    pub fn supports(&self, kind: &OpKind) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn apply(&self, ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
        match self.handlers.get(&cmd.kind) {
            Some(handler) => handler(ctx, cmd),
            None => Ok(ApplyOutcome::Skipped(format!("unsupported op kind {}", cmd.kind))),
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("kinds", &self.handlers.len())
            .finish()
    }
}

fn payload<T: DeserializeOwned>(json: &Json, what: &str) -> Result<T, EditorError> {
    serde_json::from_value(json.clone()).map_err(|e| EditorError::Payload(format!("{}: {}", what, e)))
}

fn required<'j>(data: &'j Option<Json>, what: &str) -> Result<&'j Json, EditorError> {
    data.as_ref()
        .ok_or_else(|| EditorError::Payload(format!("{} is missing its data", what)))
}

fn skipped(cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    Ok(ApplyOutcome::Skipped(format!(
        "unknown attribute '{}' for {}",
        cmd.attr, cmd.kind
    )))
}

fn check_index(index: usize, len: usize, what: &str) -> Result<(), EditorError> {
    if index > len {
        return Err(EditorError::Mismatch(format!(
            "{} index {} out of range (length {})",
            what, index, len
        )));
    }
    Ok(())
}

fn seq_len(doc: &Document, seq: NodeId) -> usize {
    doc.items(seq).map_or(0, <[Value]>::len)
}

fn node_at(doc: &Document, seq: NodeId, index: usize) -> Option<NodeId> {
    doc.items(seq)?.get(index)?.as_node()
}

/// Write one attribute of a record, keeping a displaced container node
fn write_attr(
    ctx: &mut ApplyCtx<'_>,
    record: NodeId,
    spec: &AttrSpec,
    value: &Json,
) -> Result<(), EditorError> {
    if !spec.ty.accepts(value) {
        return Err(EditorError::Payload(format!(
            "attribute '{}' expects {:?}, got {}",
            spec.id, spec.ty, value
        )));
    }
    if value.is_null() {
        ctx.record(record)?.remove(spec.field)?;
    } else {
        let raw = ctx.decode(value);
        ctx.record(record)?.set(spec.field, raw)?;
    }
    Ok(())
}

fn page_insert(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "page insert")?;
    let page_id = resolve::target_id(cmd, 0)?;
    if resolve::page(ctx.doc, page_id).is_ok() {
        return Err(EditorError::Mismatch(format!("page {} already exists", page_id)));
    }
    let pages = resolve::pages(ctx.doc)?;
    check_index(at.index, seq_len(ctx.doc, pages), "page")?;
    let raw = ctx.decode(required(&at.data, "page insert")?);
    ctx.seq(pages)?.insert(at.index, raw)?;
    Ok(ApplyOutcome::Applied)
}

fn page_delete(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "page delete")?;
    let page_id = resolve::target_id(cmd, 0)?;
    let (_, index) = resolve::page_position(ctx.doc, page_id)?;
    if index != at.index {
        return Err(EditorError::Mismatch(format!(
            "page {} is at {}, sender saw {}",
            page_id, index, at.index
        )));
    }
    let pages = resolve::pages(ctx.doc)?;
    ctx.seq(pages)?.remove(index)?;
    Ok(ApplyOutcome::Applied)
}

fn page_move(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "page move")?;
    let page_id = resolve::target_id(cmd, 0)?;
    let (_, from) = resolve::page_position(ctx.doc, page_id)?;
    if let Some(seen) = at.from.as_deref().filter(|seen| seen.index != from) {
        return Err(EditorError::Mismatch(format!(
            "page {} is at {}, sender saw {}",
            page_id, from, seen.index
        )));
    }
    let pages = resolve::pages(ctx.doc)?;
    if at.index >= seq_len(ctx.doc, pages) {
        return Err(EditorError::Mismatch(format!("page index {} out of range", at.index)));
    }
    ctx.seq(pages)?.move_item(from, at.index)?;
    Ok(ApplyOutcome::Applied)
}

fn page_modify(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let Some(spec) = attrs::lookup(attrs::PAGE_ATTRS, &cmd.attr) else {
        return skipped(cmd);
    };
    let page = resolve::page(ctx.doc, resolve::target_id(cmd, 0)?)?;
    write_attr(ctx, page, spec, &cmd.value)?;
    Ok(ApplyOutcome::Applied)
}

fn shape_insert(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "shape insert")?;
    let shape_id = resolve::target_id(cmd, 0)?;
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    if resolve::find_shape(ctx.doc, page, shape_id).is_some() {
        return Err(EditorError::Mismatch(format!("shape {} already exists", shape_id)));
    }
    let container = resolve::container(ctx.doc, page, at.parent.as_deref())?;
    check_index(at.index, seq_len(ctx.doc, container), "shape")?;

    let raw = ctx.decode(required(&at.data, "shape insert")?);
    ctx.seq(container)?.insert(at.index, raw)?;
    if let Some(shape) = node_at(ctx.doc, container, at.index) {
        ctx.mark_dirty(shape);
    }
    Ok(ApplyOutcome::Applied)
}

/// Check that a shape sits where the sender saw it
fn expect_location(
    location: &resolve::Location,
    at: &Placement,
    shape_id: &str,
) -> Result<(), EditorError> {
    if location.parent != at.parent || location.index != at.index {
        return Err(EditorError::Mismatch(format!(
            "shape {} is at {:?}/{}, sender saw {:?}/{}",
            shape_id, location.parent, location.index, at.parent, at.index
        )));
    }
    Ok(())
}

/// Mark the group owning a sequence, if any, as dirty
fn mark_owner_dirty(ctx: &mut ApplyCtx<'_>, seq: NodeId) {
    if let Some(owner) = ctx.doc.parent(seq) {
        if resolve::is_group(ctx.doc, owner) {
            ctx.mark_dirty(owner);
        }
    }
}

fn shape_delete(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "shape delete")?;
    let shape_id = resolve::target_id(cmd, 0)?;
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let shape = resolve::shape(ctx.doc, page, shape_id)?;
    let location = resolve::locate(ctx.doc, page, shape)?;
    expect_location(&location, &at, shape_id)?;

    ctx.seq(location.seq)?.remove(location.index)?;
    mark_owner_dirty(ctx, location.seq);
    Ok(ApplyOutcome::Applied)
}

fn shape_move(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "shape move")?;
    let shape_id = resolve::target_id(cmd, 0)?;
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let shape = resolve::shape(ctx.doc, page, shape_id)?;
    let from = resolve::locate(ctx.doc, page, shape)?;
    if let Some(seen) = at.from.as_deref() {
        expect_location(&from, seen, shape_id)?;
    }
    let container = resolve::container(ctx.doc, page, at.parent.as_deref())?;

    if container == shape || ctx.doc.ancestors(container).any(|a| a == shape) {
        return Err(EditorError::Mismatch(format!(
            "moving {} into its own subtree",
            shape_id
        )));
    }

    ctx.seq(from.seq)?.remove(from.index)?;
    check_index(at.index, seq_len(ctx.doc, container), "shape")?;
    ctx.seq(container)?.insert(at.index, Raw::Node(shape))?;
    mark_owner_dirty(ctx, from.seq);
    ctx.mark_dirty(shape);
    Ok(ApplyOutcome::Applied)
}

fn shape_modify(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    if let [PathSeg::Id(table_id), PathSeg::Cell { row, col }] = cmd.target.as_slice() {
        return cell_modify(ctx, cmd, table_id, *row, *col);
    }
    let Some(spec) = attrs::lookup(attrs::SHAPE_ATTRS, &cmd.attr) else {
        return skipped(cmd);
    };
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let shape = resolve::shape(ctx.doc, page, resolve::target_id(cmd, 0)?)?;
    write_attr(ctx, shape, spec, &cmd.value)?;
    if spec.geometry {
        ctx.mark_dirty(shape);
    }
    Ok(ApplyOutcome::Applied)
}

/// Cells are created on first write and removed once they hold nothing
fn cell_modify(
    ctx: &mut ApplyCtx<'_>,
    cmd: &Cmd,
    table_id: &str,
    row: usize,
    col: usize,
) -> Result<ApplyOutcome, EditorError> {
    let Some(spec) = attrs::lookup(attrs::CELL_ATTRS, &cmd.attr) else {
        return skipped(cmd);
    };
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let table = resolve::table(ctx.doc, page, table_id)?;
    let key = resolve::cell_key(ctx.doc, table, row, col)?;

    let cells = match ctx.doc.child(table, "cells") {
        Some(cells) => cells,
        None if cmd.value.is_null() => return Ok(ApplyOutcome::Applied),
        None => {
            ctx.record(table)?.set("cells", Raw::Map(Default::default()))?;
            ctx.doc
                .child(table, "cells")
                .ok_or_else(|| EditorError::Unresolved(format!("cells of table {}", table_id)))?
        }
    };

    let cell = match ctx.doc.child(cells, &key) {
        Some(cell) => cell,
        None if cmd.value.is_null() => return Ok(ApplyOutcome::Applied),
        None => {
            let raw = Raw::Record {
                kind: CELL_KIND.to_string(),
                fields: Default::default(),
            };
            ctx.map(cells)?.insert(&key, raw)?;
            ctx.doc
                .child(cells, &key)
                .ok_or_else(|| EditorError::Unresolved(format!("cell {}", key)))?
        }
    };

    write_attr(ctx, cell, spec, &cmd.value)?;

    if ctx.doc.node(cell).is_some_and(|n| n.body().is_empty()) {
        ctx.map(cells)?.remove(&key)?;
    }
    Ok(ApplyOutcome::Applied)
}

/// Shape and its id-carrying array named by `cmd.attr`
fn shape_array(ctx: &mut ApplyCtx<'_>, cmd: &Cmd, create: bool) -> Result<Option<(NodeId, NodeId)>, EditorError> {
    if attrs::array_attrs(&cmd.attr).is_none() {
        return Ok(None);
    }
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let shape = resolve::shape(ctx.doc, page, resolve::target_id(cmd, 0)?)?;
    let array = match ctx.doc.child(shape, &cmd.attr) {
        Some(array) => array,
        None if create => {
            ctx.record(shape)?.set(&cmd.attr, Raw::Seq(Vec::new()))?;
            ctx.doc
                .child(shape, &cmd.attr)
                .ok_or_else(|| EditorError::Unresolved(format!("{} of {}", cmd.attr, shape)))?
        }
        None => {
            return Err(EditorError::Unresolved(format!(
                "shape has no {} array",
                cmd.attr
            )))
        }
    };
    Ok(Some((shape, array)))
}

fn array_insert(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "array insert")?;
    let Some((shape, array)) = shape_array(ctx, cmd, true)? else {
        return skipped(cmd);
    };
    let item_id = at
        .id
        .as_deref()
        .ok_or_else(|| EditorError::Payload("array insert is missing the item id".to_string()))?;
    if resolve::item_by_id(ctx.doc, array, item_id).is_some() {
        return Err(EditorError::Mismatch(format!("item {} already exists", item_id)));
    }
    check_index(at.index, seq_len(ctx.doc, array), "item")?;
    let raw = ctx.decode(required(&at.data, "array insert")?);
    ctx.seq(array)?.insert(at.index, raw)?;
    if cmd.attr == "points" {
        ctx.mark_dirty(shape);
    }
    Ok(ApplyOutcome::Applied)
}

fn array_delete(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "array delete")?;
    let Some((shape, array)) = shape_array(ctx, cmd, false)? else {
        return skipped(cmd);
    };
    let item_id = at
        .id
        .as_deref()
        .ok_or_else(|| EditorError::Payload("array delete is missing the item id".to_string()))?;
    let found = node_at(ctx.doc, array, at.index).and_then(|n| ctx.doc.stable_id(n));
    if found != Some(item_id) {
        return Err(EditorError::Mismatch(format!(
            "expected item {} at {}, found {:?}",
            item_id, at.index, found
        )));
    }
    ctx.seq(array)?.remove(at.index)?;
    if cmd.attr == "points" {
        ctx.mark_dirty(shape);
    }
    Ok(ApplyOutcome::Applied)
}

fn array_move(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let at: Placement = payload(&cmd.value, "array move")?;
    let Some((_, array)) = shape_array(ctx, cmd, false)? else {
        return skipped(cmd);
    };
    let item_id = at
        .id
        .as_deref()
        .ok_or_else(|| EditorError::Payload("array move is missing the item id".to_string()))?;
    let (from, _) = resolve::item_by_id(ctx.doc, array, item_id)
        .ok_or_else(|| EditorError::Unresolved(format!("item {}", item_id)))?;
    if at.index >= seq_len(ctx.doc, array) {
        return Err(EditorError::Mismatch(format!("item index {} out of range", at.index)));
    }
    ctx.seq(array)?.move_item(from, at.index)?;
    Ok(ApplyOutcome::Applied)
}

fn array_modify(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let shape = resolve::shape(ctx.doc, page, resolve::target_id(cmd, 0)?)?;
    let item_id = resolve::target_id(cmd, 1)?;

    let located = attrs::SHAPE_ARRAYS.iter().find_map(|name| {
        let array = ctx.doc.child(shape, name)?;
        resolve::item_by_id(ctx.doc, array, item_id).map(|(_, item)| (*name, item))
    });
    let (array_name, item) =
        located.ok_or_else(|| EditorError::Unresolved(format!("item {} of shape", item_id)))?;

    let spec = attrs::array_attrs(array_name).and_then(|table| attrs::lookup(table, &cmd.attr));
    let Some(spec) = spec else {
        return skipped(cmd);
    };
    write_attr(ctx, item, spec, &cmd.value)?;
    if spec.geometry {
        ctx.mark_dirty(shape);
    }
    Ok(ApplyOutcome::Applied)
}

fn text_node(ctx: &ApplyCtx<'_>, cmd: &Cmd) -> Result<NodeId, EditorError> {
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let owner = resolve::text_owner(ctx.doc, page, &cmd.target)?;
    resolve::text(ctx.doc, owner)
}

fn content(doc: &Document, text: NodeId) -> String {
    doc.field(text, "content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Byte offset of a character index
fn byte_offset(content: &str, index: usize) -> Option<usize> {
    if index == content.chars().count() {
        return Some(content.len());
    }
    content.char_indices().nth(index).map(|(offset, _)| offset)
}

fn text_insert(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let range: TextRange = payload(&cmd.value, "text insert")?;
    let inserted = range
        .text
        .ok_or_else(|| EditorError::Payload("text insert is missing its text".to_string()))?;
    let text = text_node(ctx, cmd)?;
    let mut current = content(ctx.doc, text);
    let offset = byte_offset(&current, range.index)
        .ok_or_else(|| EditorError::Mismatch(format!("text index {} out of range", range.index)))?;
    current.insert_str(offset, &inserted);
    ctx.record(text)?.set("content", current)?;
    Ok(ApplyOutcome::Applied)
}

fn text_delete(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let range: TextRange = payload(&cmd.value, "text delete")?;
    let len = match (range.len, &range.text) {
        (Some(len), _) => len,
        (None, Some(text)) => text.chars().count(),
        (None, None) => {
            return Err(EditorError::Payload("text delete is missing its length".to_string()))
        }
    };
    let text = text_node(ctx, cmd)?;
    let mut current = content(ctx.doc, text);
    let out_of_range = || EditorError::Mismatch(format!("text range {}+{} out of range", range.index, len));
    let start = byte_offset(&current, range.index).ok_or_else(out_of_range)?;
    let end = range
        .index
        .checked_add(len)
        .and_then(|end| byte_offset(&current, end))
        .ok_or_else(out_of_range)?;
    current.replace_range(start..end, "");
    ctx.record(text)?.set("content", current)?;
    Ok(ApplyOutcome::Applied)
}

fn text_modify(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let Some(spec) = attrs::lookup(attrs::TEXT_ATTRS, &cmd.attr) else {
        return skipped(cmd);
    };
    if !spec.ty.accepts(&cmd.value) {
        return Err(EditorError::Payload(format!(
            "text attribute '{}' expects {:?}",
            spec.id, spec.ty
        )));
    }
    let text = text_node(ctx, cmd)?;
    let attrs_map = match ctx.doc.child(text, "attrs") {
        Some(map) => map,
        None if cmd.value.is_null() => return Ok(ApplyOutcome::Applied),
        None => {
            ctx.record(text)?.set("attrs", Raw::Map(Default::default()))?;
            ctx.doc
                .child(text, "attrs")
                .ok_or_else(|| EditorError::Unresolved("text attributes".to_string()))?
        }
    };
    if cmd.value.is_null() {
        ctx.map(attrs_map)?.remove(spec.field)?;
    } else {
        let raw = ctx.decode(&cmd.value);
        ctx.map(attrs_map)?.insert(spec.field, raw)?;
    }
    Ok(ApplyOutcome::Applied)
}

fn table_axis(cmd: &Cmd) -> Option<Axis> {
    Axis::parse(&cmd.attr)
}

fn table_insert(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let Some(axis) = table_axis(cmd) else {
        return skipped(cmd);
    };
    let at: Placement = payload(&cmd.value, "table insert")?;
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let table = resolve::table(ctx.doc, page, resolve::target_id(cmd, 0)?)?;
    let line_id = at
        .id
        .as_deref()
        .ok_or_else(|| EditorError::Payload("table insert is missing the line id".to_string()))?;

    let lines = match ctx.doc.child(table, axis.field()) {
        Some(lines) => lines,
        None => {
            ctx.record(table)?.set(axis.field(), Raw::Seq(Vec::new()))?;
            ctx.doc
                .child(table, axis.field())
                .ok_or_else(|| EditorError::Unresolved(format!("{} of table", axis.field())))?
        }
    };
    if resolve::item_by_id(ctx.doc, lines, line_id).is_some() {
        return Err(EditorError::Mismatch(format!("line {} already exists", line_id)));
    }
    check_index(at.index, seq_len(ctx.doc, lines), axis.as_str())?;
    let raw = ctx.decode(required(&at.data, "table insert")?);
    ctx.seq(lines)?.insert(at.index, raw)?;

    let cells = at.cells.unwrap_or_default();
    if !cells.is_empty() {
        let cell_map = match ctx.doc.child(table, "cells") {
            Some(map) => map,
            None => {
                ctx.record(table)?.set("cells", Raw::Map(Default::default()))?;
                ctx.doc
                    .child(table, "cells")
                    .ok_or_else(|| EditorError::Unresolved("cells of table".to_string()))?
            }
        };
        for (key, data) in &cells {
            let raw = ctx.decode(data);
            ctx.map(cell_map)?.insert(key, raw)?;
        }
    }
    Ok(ApplyOutcome::Applied)
}

/// True if a `"rowId:colId"` key belongs to the given line
pub(crate) fn cell_in_line(key: &str, axis: Axis, line_id: &str) -> bool {
    match (axis, key.split_once(':')) {
        (Axis::Row, Some((row, _))) => row == line_id,
        (Axis::Col, Some((_, col))) => col == line_id,
        _ => false,
    }
}

fn table_delete(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let Some(axis) = table_axis(cmd) else {
        return skipped(cmd);
    };
    let at: Placement = payload(&cmd.value, "table delete")?;
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let table = resolve::table(ctx.doc, page, resolve::target_id(cmd, 0)?)?;
    let line_id = at
        .id
        .as_deref()
        .ok_or_else(|| EditorError::Payload("table delete is missing the line id".to_string()))?;
    let lines = ctx
        .doc
        .child(table, axis.field())
        .ok_or_else(|| EditorError::Unresolved(format!("{} of table", axis.field())))?;
    let found = node_at(ctx.doc, lines, at.index).and_then(|n| ctx.doc.stable_id(n));
    if found != Some(line_id) {
        return Err(EditorError::Mismatch(format!(
            "expected {} {} at {}, found {:?}",
            axis.as_str(),
            line_id,
            at.index,
            found
        )));
    }

    if let Some(cell_map) = ctx.doc.child(table, "cells") {
        let keys: Vec<String> = ctx
            .map(cell_map)?
            .keys()
            .into_iter()
            .filter(|key| cell_in_line(key, axis, line_id))
            .collect();
        for key in keys {
            ctx.map(cell_map)?.remove(&key)?;
        }
    }

    ctx.seq(lines)?.remove(at.index)?;
    Ok(ApplyOutcome::Applied)
}

fn table_modify(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    let (axis, spec) = match cmd.attr.as_str() {
        "rowHeight" => (Axis::Row, attrs::lookup(attrs::TABLE_LINE_ATTRS, "rowHeight")),
        "colWidth" => (Axis::Col, attrs::lookup(attrs::TABLE_LINE_ATTRS, "colWidth")),
        _ => return skipped(cmd),
    };
    let Some(spec) = spec else {
        return skipped(cmd);
    };
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let table = resolve::table(ctx.doc, page, resolve::target_id(cmd, 0)?)?;
    let line_id = resolve::target_id(cmd, 1)?;
    let line = ctx
        .doc
        .child(table, axis.field())
        .and_then(|lines| resolve::item_by_id(ctx.doc, lines, line_id))
        .map(|(_, line)| line)
        .ok_or_else(|| EditorError::Unresolved(format!("{} {}", axis.as_str(), line_id)))?;
    write_attr(ctx, line, spec, &cmd.value)?;
    Ok(ApplyOutcome::Applied)
}

fn group(ctx: &mut ApplyCtx<'_>, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
    match cmd.attr.as_str() {
        "group" => apply_group(ctx, cmd, payload(&cmd.value, "group")?),
        "ungroup" => apply_ungroup(ctx, cmd, payload(&cmd.value, "ungroup")?),
        _ => skipped(cmd),
    }
}

fn apply_group(ctx: &mut ApplyCtx<'_>, cmd: &Cmd, spec: GroupPayload) -> Result<ApplyOutcome, EditorError> {
    let group_id = resolve::target_id(cmd, 0)?;
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    if resolve::find_shape(ctx.doc, page, group_id).is_some() {
        return Err(EditorError::Mismatch(format!("shape {} already exists", group_id)));
    }
    if spec.shapes.is_empty() {
        return Err(EditorError::Payload("group needs at least one shape".to_string()));
    }

    let mut members = Vec::with_capacity(spec.shapes.len());
    for shape_id in &spec.shapes {
        let shape = resolve::shape(ctx.doc, page, shape_id)?;
        let location = resolve::locate(ctx.doc, page, shape)?;
        ctx.seq(location.seq)?.remove(location.index)?;
        mark_owner_dirty(ctx, location.seq);
        members.push(shape);
    }

    let container = resolve::container(ctx.doc, page, spec.parent.as_deref())?;
    check_index(spec.index, seq_len(ctx.doc, container), "group")?;
    let raw = ctx.decode(&spec.group);
    ctx.seq(container)?.insert(spec.index, raw)?;
    let group = node_at(ctx.doc, container, spec.index)
        .ok_or_else(|| EditorError::Unresolved(format!("group {}", group_id)))?;

    let childs = match ctx.doc.child(group, "childs") {
        Some(childs) => childs,
        None => {
            ctx.record(group)?.set("childs", Raw::Seq(Vec::new()))?;
            ctx.doc
                .child(group, "childs")
                .ok_or_else(|| EditorError::Unresolved(format!("children of {}", group_id)))?
        }
    };
    for member in members {
        ctx.seq(childs)?.push(Raw::Node(member))?;
    }
    ctx.mark_dirty(group);
    Ok(ApplyOutcome::Applied)
}

fn apply_ungroup(ctx: &mut ApplyCtx<'_>, cmd: &Cmd, spec: UngroupPayload) -> Result<ApplyOutcome, EditorError> {
    let group_id = resolve::target_id(cmd, 0)?;
    let page = resolve::page(ctx.doc, &cmd.block_id)?;
    let group = resolve::shape(ctx.doc, page, group_id)?;
    if !resolve::is_group(ctx.doc, group) {
        return Err(EditorError::Mismatch(format!("shape {} is not a group", group_id)));
    }
    let childs = ctx
        .doc
        .child(group, "childs")
        .ok_or_else(|| EditorError::Mismatch(format!("group {} has no child list", group_id)))?;

    let children: HashMap<String, NodeId> = ctx
        .doc
        .items(childs)
        .unwrap_or(&[])
        .iter()
        .filter_map(Value::as_node)
        .filter_map(|child| Some((ctx.doc.stable_id(child)?.to_string(), child)))
        .collect();
    let unknown = spec
        .placements
        .iter()
        .any(|p| p.id.as_deref().map_or(true, |id| !children.contains_key(id)));
    if unknown || children.len() != spec.placements.len() {
        return Err(EditorError::Mismatch(format!(
            "children of group {} differ from the sender's",
            group_id
        )));
    }

    ctx.seq(childs)?.truncate(0)?;
    let location = resolve::locate(ctx.doc, page, group)?;
    ctx.seq(location.seq)?.remove(location.index)?;
    mark_owner_dirty(ctx, location.seq);

    for placement in &spec.placements {
        let Some(child) = placement.id.as_deref().and_then(|id| children.get(id)) else {
            continue;
        };
        let container = resolve::container(ctx.doc, page, placement.parent.as_deref())?;
        check_index(placement.index, seq_len(ctx.doc, container), "shape")?;
        ctx.seq(container)?.insert(placement.index, Raw::Node(*child))?;
        ctx.mark_dirty(*child);
    }
    Ok(ApplyOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_document::{JsonCodec, Untracked};

    fn doc() -> Document {
        Document::from_json(&json!({
            "typeId": "document",
            "pages": [{"typeId": "page", "id": "p1", "name": "One", "shapes": [
                {"typeId": "shape", "id": "a", "type": "rect", "x": 0, "y": 0, "width": 10, "height": 10,
                 "fills": [{"typeId": "fill", "id": "f1", "color": "#fff"}]},
                {"typeId": "shape", "id": "b", "type": "rect", "x": 20, "y": 0, "width": 10, "height": 10}
            ]}]
        }))
        .unwrap()
    }

    fn run(doc: &mut Document, cmd: &Cmd) -> Result<ApplyOutcome, EditorError> {
        let mut ctx = ApplyCtx {
            doc,
            observer: &mut Untracked,
            codec: &JsonCodec,
            dirty: None,
        };
        HandlerTable::new().apply(&mut ctx, cmd)
    }

    fn shape_ids(doc: &Document) -> Vec<String> {
        let page = resolve::page(doc, "p1").unwrap();
        let shapes = resolve::shapes(doc, page).unwrap();
        doc.items(shapes)
            .unwrap()
            .iter()
            .filter_map(Value::as_node)
            .filter_map(|n| doc.stable_id(n).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_unknown_kind_and_attribute_are_skipped() {
        let mut doc = doc();
        let unknown = Cmd::new(OpKind::Other("Sparkle".into()), "p1", vec!["a".into()]);
        assert!(matches!(run(&mut doc, &unknown), Ok(ApplyOutcome::Skipped(_))));

        let attr = Cmd::new(OpKind::ShapeModify, "p1", vec!["a".into()])
            .with_attr("glow")
            .with_value(json!(1));
        assert!(matches!(run(&mut doc, &attr), Ok(ApplyOutcome::Skipped(_))));
    }

    #[test]
    fn test_shape_insert_and_delete_check_placement() {
        let mut doc = doc();
        let insert = Cmd::new(OpKind::ShapeInsert, "p1", vec!["c".into()]).with_value(json!({
            "index": 1,
            "data": {"typeId": "shape", "id": "c", "type": "rect"}
        }));
        run(&mut doc, &insert).unwrap();
        assert_eq!(shape_ids(&doc), vec!["a", "c", "b"]);

        let stale = Cmd::new(OpKind::ShapeDelete, "p1", vec!["c".into()])
            .with_value(json!({"index": 0, "id": "c"}));
        assert!(matches!(run(&mut doc, &stale), Err(EditorError::Mismatch(_))));

        let delete = Cmd::new(OpKind::ShapeDelete, "p1", vec!["c".into()])
            .with_value(json!({"index": 1, "id": "c"}));
        run(&mut doc, &delete).unwrap();
        assert_eq!(shape_ids(&doc), vec!["a", "b"]);
    }

    #[test]
    fn test_modify_rejects_wrong_type() {
        let mut doc = doc();
        let cmd = Cmd::new(OpKind::ShapeModify, "p1", vec!["a".into()])
            .with_attr("x")
            .with_value(json!("far"));
        assert!(matches!(run(&mut doc, &cmd), Err(EditorError::Payload(_))));
    }

    #[test]
    fn test_array_item_modify() {
        let mut doc = doc();
        let cmd = Cmd::new(OpKind::ShapeArrayAttrModify, "p1", vec!["a".into(), "f1".into()])
            .with_attr("color")
            .with_value(json!("#000"));
        run(&mut doc, &cmd).unwrap();
        let fill = doc.find_record(doc.root(), Some("fill"), "f1").unwrap();
        assert_eq!(doc.field(fill, "color"), Some(&Value::Str("#000".into())));
    }

    #[test]
    fn test_group_then_ungroup() {
        let mut doc = doc();
        let before = doc.to_json();
        let group = Cmd::new(OpKind::Group, "p1", vec!["g".into()])
            .with_attr("group")
            .with_value(json!({
                "group": {"typeId": "shape", "id": "g", "type": "group"},
                "shapes": ["a", "b"],
                "index": 0
            }));
        run(&mut doc, &group).unwrap();
        assert_eq!(shape_ids(&doc), vec!["g"]);

        let ungroup = Cmd::new(OpKind::Group, "p1", vec!["g".into()])
            .with_attr("ungroup")
            .with_value(json!({"placements": [
                {"index": 0, "id": "a"},
                {"index": 1, "id": "b"}
            ]}));
        run(&mut doc, &ungroup).unwrap();
        assert_eq!(doc.to_json(), before);
    }

    #[test]
    fn test_move_into_own_subtree_fails() {
        let mut doc = doc();
        let group = Cmd::new(OpKind::Group, "p1", vec!["g".into()])
            .with_attr("group")
            .with_value(json!({
                "group": {"typeId": "shape", "id": "g", "type": "group"},
                "shapes": ["a"],
                "index": 0
            }));
        run(&mut doc, &group).unwrap();

        let cycle = Cmd::new(OpKind::ShapeMove, "p1", vec!["g".into()])
            .with_value(json!({"parent": "g", "index": 0}));
        assert!(matches!(run(&mut doc, &cycle), Err(EditorError::Mismatch(_))));
    }

    #[test]
    fn test_move_checks_source_location() {
        let mut doc = doc();
        let stale = Cmd::new(OpKind::ShapeMove, "p1", vec!["a".into()])
            .with_value(json!({"index": 1, "from": {"index": 1}}));
        assert!(matches!(run(&mut doc, &stale), Err(EditorError::Mismatch(_))));
        assert_eq!(shape_ids(&doc), vec!["a", "b"]);

        let current = Cmd::new(OpKind::ShapeMove, "p1", vec!["a".into()])
            .with_value(json!({"index": 1, "from": {"index": 0}}));
        run(&mut doc, &current).unwrap();
        assert_eq!(shape_ids(&doc), vec!["b", "a"]);

        let page = Cmd::new(OpKind::PageMove, "p1", vec!["p1".into()])
            .with_value(json!({"index": 0, "from": {"index": 2}}));
        assert!(matches!(run(&mut doc, &page), Err(EditorError::Mismatch(_))));
    }

    #[test]
    fn test_text_edits_use_character_indices() {
        let mut doc = Document::from_json(&json!({
            "typeId": "document",
            "pages": [{"typeId": "page", "id": "p1", "shapes": [
                {"typeId": "shape", "id": "t", "type": "text",
                 "text": {"typeId": "text", "content": "héllo", "attrs": {}}}
            ]}]
        }))
        .unwrap();

        let insert = Cmd::new(OpKind::TextInsert, "p1", vec!["t".into()])
            .with_value(json!({"index": 2, "text": "✓"}));
        run(&mut doc, &insert).unwrap();
        let delete = Cmd::new(OpKind::TextDelete, "p1", vec!["t".into()])
            .with_value(json!({"index": 0, "len": 2}));
        run(&mut doc, &delete).unwrap();

        let shape = doc.find_record(doc.root(), Some("shape"), "t").unwrap();
        let text = doc.child(shape, "text").unwrap();
        assert_eq!(doc.field(text, "content"), Some(&Value::Str("✓llo".into())));
    }

    #[test]
    fn test_text_delete_rejects_oversized_length() {
        let mut doc = Document::from_json(&json!({
            "typeId": "document",
            "pages": [{"typeId": "page", "id": "p1", "shapes": [
                {"typeId": "shape", "id": "t", "type": "text",
                 "text": {"typeId": "text", "content": "hello", "attrs": {}}}
            ]}]
        }))
        .unwrap();

        let delete = Cmd::new(OpKind::TextDelete, "p1", vec!["t".into()])
            .with_value(json!({"index": 2, "len": usize::MAX}));
        assert!(matches!(run(&mut doc, &delete), Err(EditorError::Mismatch(_))));

        let shape = doc.find_record(doc.root(), Some("shape"), "t").unwrap();
        let text = doc.child(shape, "text").unwrap();
        assert_eq!(doc.field(text, "content"), Some(&Value::Str("hello".into())));
    }

    #[test]
    fn test_cell_lines() {
        assert!(cell_in_line("r1:c1", Axis::Row, "r1"));
        assert!(!cell_in_line("r1:c1", Axis::Col, "r1"));
        assert!(cell_in_line("r1:c1", Axis::Col, "c1"));
    }
}
